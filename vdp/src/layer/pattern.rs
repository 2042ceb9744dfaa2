//! Tile and bitmap source addressing.
//!
//! Tiled layers address VRAM through three levels: a map of planes
//! (2x2 for the normal layers, 4x4 for the rotation layers), planes of
//! 1x1/2x1/2x2 pages, and pages of 64x64 (8x8-dot characters) or
//! 32x32 (16x16) pattern-name entries. A pattern name is one or two
//! words and yields the character address, palette, flip and the
//! special function bits.

use crate::bitwise::Bits;
use crate::color::Color;
use crate::memory::VideoMemory;

/// Source pixel depth, the CHCTL color-number code.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum CellFormat {
    /// 4 bpp palette.
    Palette16,
    /// 8 bpp palette.
    Palette256,
    /// 16 bpp palette.
    Palette2048,
    /// 16 bpp direct RGB555.
    Rgb555,
    /// 32 bpp direct RGB888.
    Rgb888,
}

impl CellFormat {
    #[must_use]
    pub fn from_code(code: u16) -> Self {
        match code & 0x7 {
            0 => Self::Palette16,
            1 => Self::Palette256,
            2 => Self::Palette2048,
            3 => Self::Rgb555,
            _ => Self::Rgb888,
        }
    }

    /// Bytes per 8x8 character cell.
    #[must_use]
    pub const fn cell_bytes(self) -> u32 {
        match self {
            Self::Palette16 => 0x20,
            Self::Palette256 => 0x40,
            Self::Palette2048 | Self::Rgb555 => 0x80,
            Self::Rgb888 => 0x100,
        }
    }
}

/// A decoded source dot before palette resolution.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum Dot {
    /// Palette index (already masked to the format width) plus the raw
    /// dot value consumed by the special function tests.
    Palette(u16),
    /// Direct color; the flag is the transparency bit (15 or 31).
    Rgb(Color, bool),
}

/// Reads one dot out of a linear cell/bitmap pixel array.
///
/// `stride` is the row width in dots; `base` the first dot's VRAM
/// address. Addresses wrap like the bus does.
#[must_use]
pub fn fetch_dot(
    memory: &VideoMemory,
    format: CellFormat,
    base: u32,
    stride: u32,
    x: u32,
    y: u32,
) -> Dot {
    let index = y * stride + x;
    match format {
        CellFormat::Palette16 => {
            let byte = memory.vram_byte(base + index / 2);
            // Even dots sit in the high nibble.
            let dot = if x & 1 == 0 { byte >> 4 } else { byte & 0xF };
            Dot::Palette(u16::from(dot))
        }
        CellFormat::Palette256 => Dot::Palette(u16::from(memory.vram_byte(base + index))),
        CellFormat::Palette2048 => Dot::Palette(memory.vram_word(base + index * 2) & 0x7FF),
        CellFormat::Rgb555 => {
            let word = memory.vram_word(base + index * 2);
            Dot::Rgb(Color::from_rgb555(word), word.get_bit(15))
        }
        CellFormat::Rgb888 => {
            let long = memory.vram_long(base + index * 4);
            Dot::Rgb(Color::from_rgb888(long), long.get_bit(31))
        }
    }
}

/// Pattern-name decode parameters, from PNCNx/PNCR and CHCTL.
#[derive(Copy, Clone, Debug)]
pub struct PatternNameControl {
    /// One-word entries use the supplement bits below; two-word entries
    /// carry everything inline.
    pub one_word: bool,
    /// 16x16-dot characters (else 8x8).
    pub double_cells: bool,
    /// PNCN bits 0-9: supplement character/palette bits for one-word
    /// entries.
    pub supplement: u16,
    /// PNCN bit 14: trade flip bits for two extra character bits.
    pub aux_mode: bool,
}

impl PatternNameControl {
    #[must_use]
    pub fn new(pnc: u16, chctl_double: bool) -> Self {
        Self {
            one_word: pnc.get_bit(15),
            double_cells: chctl_double,
            supplement: pnc & 0x3FF,
            aux_mode: pnc.get_bit(14),
        }
    }

    /// Pattern-name entries per page side.
    #[must_use]
    pub const fn page_entries(&self) -> u32 {
        if self.double_cells { 32 } else { 64 }
    }

    #[must_use]
    pub const fn entry_bytes(&self) -> u32 {
        if self.one_word { 2 } else { 4 }
    }

    /// Character dots per side.
    #[must_use]
    pub const fn character_dots(&self) -> u32 {
        if self.double_cells { 16 } else { 8 }
    }
}

/// One decoded pattern name.
#[derive(Copy, Clone, Default, PartialEq, Eq, Debug)]
pub struct TileAttributes {
    /// Character byte address in VRAM.
    pub char_address: u32,
    /// Palette bits; the dot index is or-ed under `palette << 4`.
    pub palette: u16,
    pub flip_h: bool,
    pub flip_v: bool,
    pub special_function: bool,
    pub special_color: bool,
}

impl TileAttributes {
    /// Decodes the pattern name at `address`.
    ///
    /// `large_vram` is VRSIZE bit 15; without it the character number
    /// loses its top bits.
    #[must_use]
    pub fn decode(
        memory: &VideoMemory,
        control: &PatternNameControl,
        format: CellFormat,
        large_vram: bool,
        address: u32,
    ) -> Self {
        let mut attributes;

        if control.one_word {
            let word = memory.vram_word(address);
            let supplement = control.supplement;
            attributes = Self {
                special_function: supplement.get_bit(9),
                special_color: supplement.get_bit(8),
                ..Self::default()
            };

            attributes.palette = if format == CellFormat::Palette16 {
                (word >> 12) | ((supplement & 0xE0) >> 1)
            } else {
                (word & 0x7000) >> 8
            };

            let char_number = if control.aux_mode {
                // Aux mode: no flip, 12 character bits in the word.
                if control.double_cells {
                    u32::from(word & 0xFFF) << 2
                        | u32::from(supplement & 0x3)
                        | u32::from(supplement & 0x10) << 10
                } else {
                    u32::from(word & 0xFFF) | u32::from(supplement & 0x1C) << 10
                }
            } else {
                attributes.flip_h = word.get_bit(10);
                attributes.flip_v = word.get_bit(11);
                if control.double_cells {
                    u32::from(word & 0x3FF) << 2
                        | u32::from(supplement & 0x3)
                        | u32::from(supplement & 0x1C) << 10
                } else {
                    u32::from(word & 0x3FF) | u32::from(supplement & 0x1F) << 10
                }
            };
            attributes.char_address = char_number;
        } else {
            let first = memory.vram_word(address);
            let second = memory.vram_word(address + 2);
            attributes = Self {
                char_address: u32::from(second & 0x7FFF),
                flip_h: first.get_bit(14),
                flip_v: first.get_bit(15),
                special_function: first.get_bit(13),
                special_color: first.get_bit(12),
                palette: if format == CellFormat::Palette16 {
                    first & 0x7F
                } else {
                    first & 0x70
                },
            };
        }

        if !large_vram {
            attributes.char_address &= 0x3FFF;
        }
        attributes.char_address *= 0x20;
        attributes
    }

    /// Fetches a dot out of this character. `cx`/`cy` are dot
    /// coordinates within the character before flipping.
    #[must_use]
    pub fn fetch(
        &self,
        memory: &VideoMemory,
        format: CellFormat,
        double_cells: bool,
        mut cx: u32,
        mut cy: u32,
    ) -> Dot {
        if double_cells {
            cx &= 15;
            cy &= 15;
            if self.flip_h {
                cx = 15 - cx;
            }
            if self.flip_v {
                cy = 15 - cy;
            }
            // 16x16 characters are stored as four consecutive 8x8
            // cells: top-left, top-right, bottom-left, bottom-right.
            let sub = (cy / 8) * 2 + cx / 8;
            let base = self.char_address + sub * format.cell_bytes();
            fetch_dot(memory, format, base, 8, cx & 7, cy & 7)
        } else {
            cx &= 7;
            cy &= 7;
            if self.flip_h {
                cx = 7 - cx;
            }
            if self.flip_v {
                cy = 7 - cy;
            }
            fetch_dot(memory, format, self.char_address, 8, cx, cy)
        }
    }
}

/// Plane sizes from a two-bit PLSZ field: pages per plane axis.
#[must_use]
pub fn plane_size(code: u16) -> (u32, u32) {
    match code & 0x3 {
        0 => (1, 1),
        1 => (2, 1),
        2 => {
            tracing::warn!("reserved plane size code 2, treating as 2x2");
            (2, 2)
        }
        _ => (2, 2),
    }
}

/// Tile address space of one layer: the plane map plus derived sizes.
#[derive(Clone, Debug)]
pub struct ScreenGeometry {
    /// Planes per map axis (2 normal, 4 rotation).
    pub map_size: u32,
    pub plane_w: u32,
    pub plane_h: u32,
    pub control: PatternNameControl,
    plane_addresses: Vec<u32>,
}

impl ScreenGeometry {
    /// `map_offset` is the layer's 3-bit MPOF field; `map_registers`
    /// lists the 6-bit plane values row-major.
    #[must_use]
    pub fn new(
        control: PatternNameControl,
        plane_size_code: u16,
        map_offset: u16,
        map_registers: &[u8],
    ) -> Self {
        let (plane_w, plane_h) = plane_size(plane_size_code);
        let map_size = if map_registers.len() == 16 { 4 } else { 2 };

        let entries = control.page_entries();
        let page_bytes = entries * entries * control.entry_bytes();
        let pages_per_plane = plane_w * plane_h;

        let plane_addresses = map_registers
            .iter()
            .map(|&reg| {
                let page = u32::from(map_offset & 0x7) << 6 | u32::from(reg & 0x3F);
                // Planes are aligned to their own size.
                (page & !(pages_per_plane - 1)) * page_bytes & 0x7_FFFF
            })
            .collect();

        Self {
            map_size,
            plane_w,
            plane_h,
            control,
            plane_addresses,
        }
    }

    /// Total addressable dots per axis; coordinates wrap at these.
    #[must_use]
    pub const fn width_dots(&self) -> u32 {
        self.map_size * self.plane_w * 512
    }

    #[must_use]
    pub const fn height_dots(&self) -> u32 {
        self.map_size * self.plane_h * 512
    }

    /// VRAM address of the pattern-name entry covering dot (x, y).
    #[must_use]
    pub fn pattern_name_address(&self, x: u32, y: u32) -> u32 {
        let plane_px_w = self.plane_w * 512;
        let plane_px_h = self.plane_h * 512;

        let plane_col = (x / plane_px_w) % self.map_size;
        let plane_row = (y / plane_px_h) % self.map_size;
        let plane = self.plane_addresses[(plane_row * self.map_size + plane_col) as usize];

        let (x, y) = (x % plane_px_w, y % plane_px_h);
        let page_index = (y / 512) * self.plane_w + x / 512;
        let entries = self.control.page_entries();
        let page = plane + page_index * entries * entries * self.control.entry_bytes();

        let shift = if self.control.double_cells { 4 } else { 3 };
        let entry = (y % 512 >> shift) * entries + (x % 512 >> shift);
        page + entry * self.control.entry_bytes()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn control_one_word() -> PatternNameControl {
        PatternNameControl::new(0x8000, false)
    }

    #[test]
    fn one_word_decode_with_supplement() {
        let mut memory = VideoMemory::default();
        // Entry: char 0x155, flip both, palette 5.
        memory.vram[0] = 0x5D;
        memory.vram[1] = 0x55;
        let control = PatternNameControl::new(0x8000 | 0x1A3, false);

        let attrs = TileAttributes::decode(
            &memory,
            &control,
            CellFormat::Palette16,
            true,
            0,
        );
        assert!(attrs.flip_h && attrs.flip_v);
        // char = 0x155 | (supp & 0x1F) << 10 = 0x155 | 0x3 << 10
        assert_eq!(attrs.char_address, (0x155 | 0x3 << 10) * 0x20);
        // palette = entry bits 12-15 | (supp & 0xE0) >> 1 = 5 | 0x50
        assert_eq!(attrs.palette, 0x55);
        assert!(attrs.special_color); // supplement bit 8
    }

    #[test]
    fn two_word_decode() {
        let mut memory = VideoMemory::default();
        // First word: v-flip, special function, palette 0x12.
        memory.vram[0x10] = 0xA0 | 0x00;
        memory.vram[0x11] = 0x12;
        // Second word: character 0x1234.
        memory.vram[0x12] = 0x12;
        memory.vram[0x13] = 0x34;
        let control = PatternNameControl::new(0x0000, false);

        let attrs = TileAttributes::decode(
            &memory,
            &control,
            CellFormat::Palette16,
            true,
            0x10,
        );
        assert!(attrs.flip_v && !attrs.flip_h);
        assert!(attrs.special_function);
        assert_eq!(attrs.palette, 0x12);
        assert_eq!(attrs.char_address, 0x1234 * 0x20);
    }

    #[test]
    fn small_vram_masks_character_number() {
        let mut memory = VideoMemory::default();
        memory.vram[0x12] = 0x7F;
        memory.vram[0x13] = 0xFF;
        let control = PatternNameControl::new(0, false);

        let attrs =
            TileAttributes::decode(&memory, &control, CellFormat::Palette256, false, 0x10);
        assert_eq!(attrs.char_address, 0x3FFF * 0x20);
    }

    #[test]
    fn nibble_order_in_16_color_cells() {
        let mut memory = VideoMemory::default();
        memory.vram[0x100] = 0xAB;
        assert_eq!(
            fetch_dot(&memory, CellFormat::Palette16, 0x100, 8, 0, 0),
            Dot::Palette(0xA)
        );
        assert_eq!(
            fetch_dot(&memory, CellFormat::Palette16, 0x100, 8, 1, 0),
            Dot::Palette(0xB)
        );
    }

    #[test]
    fn flip_reverses_cell_fetch() {
        let mut memory = VideoMemory::default();
        // 256-color cell: dot (2, 1) = 0x42.
        memory.vram[8 + 2] = 0x42;
        let attrs = TileAttributes {
            char_address: 0,
            flip_h: true,
            flip_v: true,
            ..TileAttributes::default()
        };
        assert_eq!(
            attrs.fetch(&memory, CellFormat::Palette256, false, 5, 6),
            Dot::Palette(0x42)
        );
    }

    #[test]
    fn double_cell_sub_cell_order() {
        let mut memory = VideoMemory::default();
        // Bottom-right 8x8 cell of a 16x16 character starts at cell 3.
        memory.vram[(3 * 0x40) as usize] = 0x99;
        let attrs = TileAttributes::default();
        assert_eq!(
            attrs.fetch(&memory, CellFormat::Palette256, true, 8, 8),
            Dot::Palette(0x99)
        );
    }

    #[test]
    fn plane_map_addressing() {
        let control = control_one_word();
        // 2x2 planes of 2x1 pages; map offset 0; planes at pages 4..7.
        let geometry = ScreenGeometry::new(control, 1, 0, &[4, 6, 8, 10]);
        assert_eq!(geometry.width_dots(), 2048);
        assert_eq!(geometry.height_dots(), 1024);

        let page_bytes = 64 * 64 * 2;
        // Dot (0,0): plane 0 at page 4 (aligned to 2 pages).
        assert_eq!(geometry.pattern_name_address(0, 0), 4 * page_bytes);
        // Dot (512, 0): second page of plane 0.
        assert_eq!(geometry.pattern_name_address(512, 0), 5 * page_bytes);
        // Dot (1024, 0): plane 1.
        assert_eq!(geometry.pattern_name_address(1024, 0), 6 * page_bytes);
        // Second entry row of plane 0.
        assert_eq!(
            geometry.pattern_name_address(8, 8),
            4 * page_bytes + (64 + 1) * 2
        );
    }
}
