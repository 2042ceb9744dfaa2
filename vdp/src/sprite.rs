//! Sprite framebuffer integration.
//!
//! The rendered sprite framebuffer enters composition as one more
//! layer, but each of its dots carries its own priority and color
//! calculation selection packed into the dot value. SPCTL picks one of
//! sixteen packings (the sprite type) and whether RGB dots are allowed
//! alongside palette dots.

use crate::bitwise::Bits;
use crate::color::{Color, ColorOffset};
use crate::compositor::Pixel;
use crate::layer::{LayerOutput, PixelOp, ShadowOp};
use crate::memory::CramMode;
use crate::rotation::{FIXED_SHIFT, RotationTable};
use crate::snapshot::{RegisterSnapshot, Resolution};
use crate::window::{SpriteWindowMask, WindowSet};

/// One framebuffer dot split into its sprite-type fields.
#[derive(Copy, Clone, Default, PartialEq, Eq, Debug)]
struct SpriteDot {
    /// Index into the PRISA-D priority table.
    priority_slot: u8,
    /// Index into the CCRSA-D ratio table.
    ratio_slot: u8,
    /// Color bank data.
    data: u16,
    /// The reserved next-to-last color code requests a shadow.
    normal_shadow: bool,
    /// MSB of types 2-7: sprite window bit, or shadow sprite marker.
    msb: bool,
}

/// Field packing per sprite type. Types 0x8-0xF read 8-bit dots.
fn decode_dot(sprite_type: u8, raw: u16) -> SpriteDot {
    let raw = if sprite_type & 0x8 != 0 { raw & 0xFF } else { raw };
    let msb = (2..=7).contains(&sprite_type) && raw.get_bit(15);

    let (priority_slot, ratio_slot, data_mask) = match sprite_type {
        0x0 => (raw >> 14 & 0x3, raw >> 11 & 0x7, 0x7FF),
        0x1 => (raw >> 13 & 0x7, raw >> 11 & 0x3, 0x7FF),
        0x2 => (raw >> 14 & 0x1, raw >> 11 & 0x7, 0x7FF),
        0x3 => (raw >> 13 & 0x3, raw >> 11 & 0x3, 0x7FF),
        0x4 => (raw >> 13 & 0x3, raw >> 10 & 0x7, 0x3FF),
        0x5 => (raw >> 12 & 0x7, raw >> 11 & 0x1, 0x7FF),
        0x6 => (raw >> 12 & 0x7, raw >> 10 & 0x3, 0x3FF),
        0x7 => (raw >> 12 & 0x7, raw >> 9 & 0x7, 0x1FF),
        0x8 => (raw >> 7 & 0x1, 0, 0x7F),
        0x9 => (raw >> 7 & 0x1, raw >> 6 & 0x1, 0x3F),
        0xA => (raw >> 6 & 0x3, 0, 0x3F),
        0xB => (0, raw >> 6 & 0x3, 0x3F),
        0xC => (raw >> 7 & 0x1, 0, 0xFF),
        0xD => (raw >> 7 & 0x1, raw >> 6 & 0x1, 0xFF),
        0xE => (raw >> 6 & 0x3, 0, 0xFF),
        _ => (0, raw >> 6 & 0x3, 0xFF),
    };

    let data = raw & data_mask;
    SpriteDot {
        priority_slot: priority_slot as u8,
        ratio_slot: ratio_slot as u8,
        data,
        normal_shadow: data == data_mask - 1,
        msb,
    }
}

/// The sprite layer's frame-constant configuration.
#[derive(Clone, Debug)]
pub struct SpriteLayer {
    sprite_type: u8,
    /// VDP1 TVMR bit 0: byte-deep framebuffer (1024x256, or 512x512
    /// under rotated read-out).
    eight_bit: bool,
    /// SPCTL bit 4: the MSB of types 2-7 drives the sprite window.
    window_enabled: bool,
    /// SPCTL bit 5: dots with bit 15 set are RGB555 data.
    mixed_rgb: bool,
    /// SPCTL bits 8-10 and 12-13: the priority threshold and the
    /// comparison selecting which sprite dots blend.
    cc_number: u8,
    cc_condition: u8,
    cc_enabled: bool,
    priorities: [u8; 8],
    ratios: [u8; 8],
    /// SDCTL bit 8: an all-zero shadow sprite dot shades the layers
    /// below instead of vanishing.
    transparent_shadow: bool,
    wctl: u8,
    cc_wctl: u8,
    color_offset: Option<ColorOffset>,
    cram_offset: u32,
    cram_mode: CramMode,
    line_screen: u8,
    /// CCCTL bits 8-9, for the ratio advertising rules.
    additive: bool,
    bottom_ratio: bool,
    /// Framebuffer readout through rotation parameter A (TVMR bit 1).
    rotation: Option<RotationTable>,
}

impl SpriteLayer {
    #[must_use]
    pub fn build(snapshot: &RegisterSnapshot) -> Self {
        let r = &snapshot.registers;
        let priority_pair = |reg: u16| [(reg & 0x7) as u8, (reg >> 8 & 0x7) as u8];
        let ratio_pair = |reg: u16| {
            [
                ((!reg & 0x1F) << 1) as u8 + 1,
                ((!reg >> 7) & 0x3E) as u8 + 1,
            ]
        };
        let [p0, p1] = priority_pair(r.prisa);
        let [p2, p3] = priority_pair(r.prisb);
        let [p4, p5] = priority_pair(r.prisc);
        let [p6, p7] = priority_pair(r.prisd);
        let [c0, c1] = ratio_pair(r.ccrsa);
        let [c2, c3] = ratio_pair(r.ccrsb);
        let [c4, c5] = ratio_pair(r.ccrsc);
        let [c6, c7] = ratio_pair(r.ccrsd);

        let rotation = snapshot.vdp1.rotated_readout().then(|| {
            RotationTable::read(&snapshot.memory, snapshot.registers.rotation_table_address())
        });

        Self {
            sprite_type: (r.spctl & 0xF) as u8,
            eight_bit: snapshot.vdp1.eight_bit(),
            window_enabled: r.spctl.get_bit(4),
            mixed_rgb: r.spctl.get_bit(5),
            cc_number: (r.spctl >> 8 & 0x7) as u8,
            cc_condition: (r.spctl >> 12 & 0x3) as u8,
            cc_enabled: r.ccctl.get_bit(6),
            priorities: [p0, p1, p2, p3, p4, p5, p6, p7],
            ratios: [c0, c1, c2, c3, c4, c5, c6, c7],
            transparent_shadow: r.sdctl.get_bit(8),
            wctl: (r.wctlc >> 8) as u8,
            cc_wctl: (r.wctld >> 8) as u8,
            color_offset: r.clofen.get_bit(6).then(|| {
                if r.clofsl.get_bit(6) {
                    ColorOffset::from_registers(r.cobr, r.cobg, r.cobb)
                } else {
                    ColorOffset::from_registers(r.coar, r.coag, r.coab)
                }
            }),
            cram_offset: u32::from(r.craofb & 0x70) << 4,
            cram_mode: snapshot.cram_mode(),
            line_screen: u8::from(r.lnclen.get_bit(5)),
            additive: r.ccctl.get_bit(8),
            bottom_ratio: r.ccctl.get_bit(9),
            rotation,
        }
    }

    /// Framebuffer coordinates feeding output dot (i, j).
    fn source_position(&self, resolution: Resolution, i: u32, j: u32) -> (u32, u32) {
        match &self.rotation {
            Some(t) => {
                let fx = t.xst + t.delta_x * i64::from(i) + t.delta_xst * i64::from(j);
                let fy = t.yst + t.delta_y * i64::from(i) + t.delta_yst * i64::from(j);
                // Rotated read-out is 512x256 word-deep, 512x512 byte-deep.
                let y_mask = if self.eight_bit { 511 } else { 255 };
                (
                    ((fx >> FIXED_SHIFT) as u32) & 511,
                    ((fy >> FIXED_SHIFT) as u32) & y_mask,
                )
            }
            None => (i >> resolution.sprite_x_shift(), j),
        }
    }

    /// Scans the framebuffer for sprite window bits. Only the 16-bit
    /// dot types 2-7 carry the bit.
    #[must_use]
    pub fn window_mask(
        &self,
        snapshot: &RegisterSnapshot,
        resolution: Resolution,
    ) -> SpriteWindowMask {
        let mut mask = SpriteWindowMask::new(resolution.width, resolution.height);
        if !self.window_enabled || self.eight_bit || !(2..=7).contains(&self.sprite_type) {
            return mask;
        }
        for j in 0..resolution.height {
            for i in 0..resolution.width {
                let (x, y) = self.source_position(resolution, i, j);
                if snapshot.vdp1.framebuffer.word_pixel(x, y).get_bit(15) {
                    mask.set(i, j);
                }
            }
        }
        mask
    }

    /// Renders the sprite layer's submissions for the frame.
    #[must_use]
    pub fn render(
        &self,
        snapshot: &RegisterSnapshot,
        resolution: Resolution,
        windows: &WindowSet,
    ) -> LayerOutput {
        let mut out = LayerOutput::default();
        let rotated = self.rotation.is_some();

        for j in 0..resolution.height {
            for i in 0..resolution.width {
                if !windows.visible(self.wctl, i, j) {
                    continue;
                }
                let (x, y) = self.source_position(resolution, i, j);
                if self.eight_bit {
                    let raw = snapshot.vdp1.framebuffer.byte_pixel(x, y, rotated);
                    self.emit_bank(&mut out, snapshot, u16::from(raw), i, j, windows);
                } else {
                    let raw = snapshot.vdp1.framebuffer.word_pixel(x, y);
                    if self.mixed_rgb && raw.get_bit(15) {
                        self.emit_rgb(&mut out, raw, i, j, windows);
                    } else {
                        self.emit_bank(&mut out, snapshot, raw, i, j, windows);
                    }
                }
            }
        }
        out
    }

    fn emit_rgb(&self, out: &mut LayerOutput, raw: u16, i: u32, j: u32, windows: &WindowSet) {
        // Types 8-F only carry 8 significant bits; for types 2-7 with
        // the sprite window active, an otherwise-empty dot is window
        // data rather than black. Types 0 and 1 always draw.
        let transparent = if self.sprite_type & 0x8 != 0 {
            raw & 0xFF == 0
        } else if self.window_enabled && (2..=7).contains(&self.sprite_type) {
            raw & 0x7FFF == 0
        } else {
            false
        };
        if transparent {
            return;
        }

        let mut alpha = 0x3F;
        let mut advertises = false;
        if self.cc_condition == 3 && self.cc_enabled && windows.visible(self.cc_wctl, i, j) {
            alpha = self.ratios[0];
            advertises = self.additive || self.bottom_ratio;
        }

        let color = self.offset(Color::from_rgb555(raw));
        out.ops.push(PixelOp {
            priority: self.priorities[0],
            x: i,
            y: j,
            pixel: Pixel {
                color,
                alpha,
                advertises_ratio: advertises,
                line_screen: self.line_screen,
            },
        });
    }

    fn emit_bank(
        &self,
        out: &mut LayerOutput,
        snapshot: &RegisterSnapshot,
        raw: u16,
        i: u32,
        j: u32,
        windows: &WindowSet,
    ) {
        if raw == 0 {
            return;
        }
        let dot = decode_dot(self.sprite_type, raw);
        let priority = self.priorities[usize::from(dot.priority_slot)];

        if dot.normal_shadow {
            out.shadows.push(ShadowOp { priority, x: i, y: j });
            return;
        }

        if dot.msb {
            // The MSB marks a shadow either way; with the sprite window
            // enabled it additionally feeds the window mask, which is
            // scanned in its own pass before the layers run.
            if raw & 0x7FFF != 0 {
                // Shadow sprite over its own pixel: draw it, then
                // shade it in place.
                self.push_bank_pixel(out, snapshot, &dot, priority, i, j, windows);
                out.shadows.push(ShadowOp { priority, x: i, y: j });
            } else if self.window_enabled || self.transparent_shadow {
                out.shadows.push(ShadowOp { priority, x: i, y: j });
            }
            return;
        }

        self.push_bank_pixel(out, snapshot, &dot, priority, i, j, windows);
    }

    #[allow(clippy::too_many_arguments)]
    fn push_bank_pixel(
        &self,
        out: &mut LayerOutput,
        snapshot: &RegisterSnapshot,
        dot: &SpriteDot,
        priority: u8,
        i: u32,
        j: u32,
        windows: &WindowSet,
    ) {
        let (color, msb) = snapshot
            .memory
            .cram_color(self.cram_mode, self.cram_offset + u32::from(dot.data));

        let mut alpha = 0x3F;
        let mut advertises = false;
        if self.cc_enabled && windows.visible(self.cc_wctl, i, j) {
            let selected = match self.cc_condition {
                0 => priority <= self.cc_number,
                1 => priority == self.cc_number,
                2 => priority >= self.cc_number,
                _ => msb,
            };
            if self.bottom_ratio {
                // The ratio is advertised to the layer above even when
                // this dot itself stays opaque.
                alpha = self.ratios[usize::from(dot.ratio_slot)];
                advertises = selected;
                if !selected {
                    alpha = 0x3F;
                }
            } else if selected {
                alpha = self.ratios[usize::from(dot.ratio_slot)];
                advertises = self.additive;
            }
        }

        out.ops.push(PixelOp {
            priority,
            x: i,
            y: j,
            pixel: Pixel {
                color: self.offset(color),
                alpha,
                advertises_ratio: advertises,
                line_screen: self.line_screen,
            },
        });
    }

    fn offset(&self, color: Color) -> Color {
        self.color_offset.map_or(color, |o| o.apply(color))
    }
}
