//! Rotation parameter resolution for the rotating layers.
//!
//! Two 0x60-byte parameter tables (A and B) live in VRAM at the RPTA
//! address, B at +0x80. Each describes an affine transform with a
//! viewpoint; an optional coefficient table rescales it per scanline or
//! per pixel. Everything here runs in 48.16 fixed point.

use crate::bitwise::{Bits, sign_extend};
use crate::memory::VideoMemory;
use crate::registers::Registers;
use crate::snapshot::RegisterSnapshot;

pub const FIXED_SHIFT: u32 = 16;
pub type Fixed = i64;

const fn mul(a: Fixed, b: Fixed) -> Fixed {
    (a * b) >> FIXED_SHIFT
}

#[must_use]
pub const fn from_int(value: i32) -> Fixed {
    (value as Fixed) << FIXED_SHIFT
}

/// Raw rotation parameter table contents.
///
/// Field widths follow the hardware layout: screen-start values are
/// s13.10 stored at bit 6, the matrix is s4.10, viewpoint/center are
/// s14 integers, the scale factors s8.16.
#[derive(Default, Copy, Clone, Debug)]
pub struct RotationTable {
    pub xst: Fixed,
    pub yst: Fixed,
    pub zst: Fixed,
    pub delta_xst: Fixed,
    pub delta_yst: Fixed,
    pub delta_x: Fixed,
    pub delta_y: Fixed,
    pub a: Fixed,
    pub b: Fixed,
    pub c: Fixed,
    pub d: Fixed,
    pub e: Fixed,
    pub f: Fixed,
    pub px: Fixed,
    pub py: Fixed,
    pub pz: Fixed,
    pub cx: Fixed,
    pub cy: Fixed,
    pub cz: Fixed,
    pub mx: Fixed,
    pub my: Fixed,
    pub kx: Fixed,
    pub ky: Fixed,
    pub ka_start: Fixed,
    pub delta_ka_line: Fixed,
    pub delta_ka_dot: Fixed,
}

impl RotationTable {
    /// Reads one parameter set from VRAM.
    ///
    /// The stored fields carry their fraction at bit 6, which puts the
    /// integer LSB at bit 16: masked and sign-extended, the raw long is
    /// already a .16 value.
    #[must_use]
    pub fn read(memory: &VideoMemory, address: u32) -> Self {
        let long = |offset: u32, bits: u32| -> Fixed {
            Fixed::from(sign_extend(memory.vram_long(address + offset) & !0x3F, bits))
        };
        let word = |offset: u32| -> Fixed {
            from_int(sign_extend(
                u32::from(memory.vram_word(address + offset)) & 0x3FFF,
                14,
            ))
        };

        Self {
            xst: long(0x00, 29),
            yst: long(0x04, 29),
            zst: long(0x08, 29),
            delta_xst: long(0x0C, 19),
            delta_yst: long(0x10, 19),
            delta_x: long(0x14, 19),
            delta_y: long(0x18, 19),
            a: long(0x1C, 20),
            b: long(0x20, 20),
            c: long(0x24, 20),
            d: long(0x28, 20),
            e: long(0x2C, 20),
            f: long(0x30, 20),
            px: word(0x34),
            py: word(0x36),
            pz: word(0x38),
            cx: word(0x3C),
            cy: word(0x3E),
            cz: word(0x40),
            mx: long(0x44, 30),
            my: long(0x48, 30),
            kx: Fixed::from(sign_extend(memory.vram_long(address + 0x4C) & 0xFF_FFFF, 24)),
            ky: Fixed::from(sign_extend(memory.vram_long(address + 0x50) & 0xFF_FFFF, 24)),
            ka_start: Fixed::from(memory.vram_long(address + 0x54) & !0x3F),
            delta_ka_line: Fixed::from(sign_extend(memory.vram_long(address + 0x58) & !0x3F, 32)),
            delta_ka_dot: Fixed::from(sign_extend(memory.vram_long(address + 0x5C) & !0x3F, 32)),
        }
    }
}

/// How a fetched coefficient modifies the transform.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum CoefficientUse {
    ScaleBoth,
    ScaleX,
    ScaleY,
    /// Replaces the viewpoint X offset instead of scaling.
    ViewpointX,
}

/// Coefficient table configuration for one parameter set, from the
/// KTCTL/KTAOF bytes and RAMCTL's CRKTE bit.
#[derive(Copy, Clone, Debug)]
pub struct CoefficientConfig {
    pub word_sized: bool,
    pub usage: CoefficientUse,
    pub line_color: bool,
    /// Table base byte address (VRAM), folded from KTAOF.
    pub base: u32,
    /// Coefficients live in the upper half of CRAM instead of VRAM.
    pub from_cram: bool,
}

impl CoefficientConfig {
    /// Decodes one KTCTL/KTAOF byte pair; `None` when the coefficient
    /// table is disabled.
    #[must_use]
    pub fn from_registers(ktctl: u16, ktaof: u16, crkte: bool, which: usize) -> Option<Self> {
        let ktctl = if which == 0 { ktctl & 0xFF } else { ktctl >> 8 };
        let ktaof = if which == 0 { ktaof & 0x7 } else { (ktaof >> 8) & 0x7 };
        if !ktctl.get_bit(0) {
            return None;
        }
        Some(Self {
            word_sized: ktctl.get_bit(1),
            usage: match ktctl.get_bits(2..=3) {
                0 => CoefficientUse::ScaleBoth,
                1 => CoefficientUse::ScaleX,
                2 => CoefficientUse::ScaleY,
                _ => CoefficientUse::ViewpointX,
            },
            line_color: ktctl.get_bit(4),
            base: u32::from(ktaof) << 16,
            from_cram: crkte,
        })
    }

    /// Fetches the coefficient for accumulator value `ka`.
    #[must_use]
    pub fn fetch(&self, memory: &VideoMemory, ka: Fixed) -> Coefficient {
        let index = (ka >> FIXED_SHIFT) as u32;
        let size = if self.word_sized { 2 } else { 4 };
        let address = if self.from_cram {
            // CRAM-resident tables sit in the upper 2 KiB.
            0x800 + (index * size & 0x7FF)
        } else {
            self.base.wrapping_add(index * size)
        };

        if self.word_sized {
            let raw = if self.from_cram {
                read_cram_word(memory, address)
            } else {
                memory.vram_word(address)
            };
            Coefficient {
                value: Fixed::from(sign_extend(u32::from(raw) << 6, 21)),
                transparent: raw & 0x8000 != 0,
                line_color: None,
            }
        } else {
            let raw = if self.from_cram {
                u32::from(read_cram_word(memory, address)) << 16
                    | u32::from(read_cram_word(memory, address + 2))
            } else {
                memory.vram_long(address)
            };
            Coefficient {
                value: Fixed::from(sign_extend(raw & 0xFF_FFFF, 24)),
                transparent: raw & 0x8000_0000 != 0,
                line_color: self.line_color.then(|| (raw >> 24) as u8 & 0x7F),
            }
        }
    }
}

fn read_cram_word(memory: &VideoMemory, address: u32) -> u16 {
    let address = (address & 0xFFF) as usize;
    u16::from(memory.cram[address]) << 8 | u16::from(memory.cram[address | 1])
}

#[derive(Copy, Clone, Debug)]
pub struct Coefficient {
    pub value: Fixed,
    pub transparent: bool,
    pub line_color: Option<u8>,
}

/// What happens to source coordinates outside the rotation surface.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum ScreenOver {
    /// Wrap around (mode 0; mode 1 degrades here with a warning).
    Repeat,
    /// Transparent outside the surface (mode 2).
    Transparent,
    /// Transparent outside a fixed 512x512 area (mode 3).
    Transparent512,
}

impl ScreenOver {
    #[must_use]
    pub fn from_plsz(plsz: u16, which: usize) -> Self {
        let bits = if which == 0 {
            plsz.get_bits(10..=11)
        } else {
            plsz.get_bits(14..=15)
        };
        match bits {
            0 => Self::Repeat,
            1 => {
                tracing::warn!("screen-over repeat-with-pattern is unsupported, wrapping instead");
                Self::Repeat
            }
            2 => Self::Transparent,
            _ => Self::Transparent512,
        }
    }
}

/// One fully-resolved rotation parameter set, ready for per-line use.
#[derive(Clone, Debug)]
pub struct RotationParameter {
    pub table: RotationTable,
    pub coefficient: Option<CoefficientConfig>,
    pub screen_over: ScreenOver,
    /// Viewpoint translation, constant over the frame.
    xp: Fixed,
    yp: Fixed,
    /// Per-dot screen-space steps.
    step_x: Fixed,
    step_y: Fixed,
}

impl RotationParameter {
    #[must_use]
    pub fn build(snapshot: &RegisterSnapshot, which: usize) -> Self {
        let regs = &snapshot.registers;
        let address = regs.rotation_table_address() + (which as u32) * 0x80;
        let table = RotationTable::read(&snapshot.memory, address);
        let coefficient = CoefficientConfig::from_registers(
            regs.ktctl,
            regs.ktaof,
            regs.ramctl.get_bit(15),
            which,
        );
        Self::from_table(table, coefficient, ScreenOver::from_plsz(regs.plsz, which))
    }

    #[must_use]
    pub fn from_table(
        table: RotationTable,
        coefficient: Option<CoefficientConfig>,
        screen_over: ScreenOver,
    ) -> Self {
        let t = &table;
        let xp = mul(t.a, t.px - t.cx) + mul(t.b, t.py - t.cy) + mul(t.c, t.pz - t.cz)
            + t.cx
            + t.mx;
        let yp = mul(t.d, t.px - t.cx) + mul(t.e, t.py - t.cy) + mul(t.f, t.pz - t.cz)
            + t.cy
            + t.my;
        let step_x = mul(t.a, t.delta_x) + mul(t.b, t.delta_y);
        let step_y = mul(t.d, t.delta_x) + mul(t.e, t.delta_y);
        Self {
            table,
            coefficient,
            screen_over,
            xp,
            yp,
            step_x,
            step_y,
        }
    }

    /// Per-scanline state: the screen-space start vector and the
    /// coefficient accumulator for line `line`.
    #[must_use]
    pub fn line_state(&self, memory: &VideoMemory, line: u32) -> RotationLine {
        let t = &self.table;
        let j = from_int(line as i32);
        let x_sub = t.xst + mul(t.delta_xst, j) - t.px;
        let y_sub = t.yst + mul(t.delta_yst, j) - t.py;
        let z_sub = t.zst - t.pz;

        let ka = t.ka_start + t.delta_ka_line * i64::from(line);
        // A zero per-dot step means one coefficient fetch covers the
        // whole line; the hardware does this for "bad cycle" VRAM
        // timings as well.
        let line_coefficient = self
            .coefficient
            .filter(|_| t.delta_ka_dot == 0)
            .map(|config| config.fetch(memory, ka));

        RotationLine {
            x_start: mul(t.a, x_sub) + mul(t.b, y_sub) + mul(t.c, z_sub),
            y_start: mul(t.d, x_sub) + mul(t.e, y_sub) + mul(t.f, z_sub),
            ka,
            line_coefficient,
        }
    }

    /// Source coordinates for output dot `x` on a prepared line, or
    /// `None` when the coefficient marks the dot transparent.
    #[must_use]
    pub fn resolve(
        &self,
        memory: &VideoMemory,
        line: &RotationLine,
        x: u32,
    ) -> Option<(i32, i32)> {
        let t = &self.table;
        let mut kx = t.kx;
        let mut ky = t.ky;
        let mut xp = self.xp;

        if let Some(config) = &self.coefficient {
            let coefficient = match line.line_coefficient {
                Some(c) => c,
                None => config.fetch(memory, line.ka + t.delta_ka_dot * i64::from(x)),
            };
            if coefficient.transparent {
                return None;
            }
            match config.usage {
                CoefficientUse::ScaleBoth => {
                    kx = coefficient.value;
                    ky = coefficient.value;
                }
                CoefficientUse::ScaleX => kx = coefficient.value,
                CoefficientUse::ScaleY => ky = coefficient.value,
                CoefficientUse::ViewpointX => xp = coefficient.value << 2,
            }
        }

        let i = i64::from(x);
        let ix = xp + mul(kx, line.x_start + self.step_x * i);
        let iy = self.yp + mul(ky, line.y_start + self.step_y * i);
        Some(((ix >> FIXED_SHIFT) as i32, (iy >> FIXED_SHIFT) as i32))
    }

    /// The line color slot this line resolves to, when the coefficient
    /// table carries line color data.
    #[must_use]
    pub fn line_color(&self, line: &RotationLine) -> Option<u8> {
        line.line_coefficient.and_then(|c| c.line_color)
    }
}

/// Per-scanline rotation state.
#[derive(Copy, Clone, Debug)]
pub struct RotationLine {
    x_start: Fixed,
    y_start: Fixed,
    ka: Fixed,
    line_coefficient: Option<Coefficient>,
}

/// How the per-pixel parameter set is chosen (RPMD).
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum ParameterSelect {
    FixedA,
    FixedB,
    /// A normally, B where A's coefficient reads transparent.
    CoefficientMsb,
    /// A inside the rotation window, B outside.
    Window,
}

impl ParameterSelect {
    #[must_use]
    pub fn from_registers(registers: &Registers) -> Self {
        match registers.rpmd & 0x3 {
            0 => Self::FixedA,
            1 => Self::FixedB,
            2 => Self::CoefficientMsb,
            _ => Self::Window,
        }
    }
}
