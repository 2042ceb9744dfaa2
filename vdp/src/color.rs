use serde::{Deserialize, Serialize};

use crate::bitwise::{Bits, sign_extend};

/// A display color with 8-bit channels packed as `0x00BB_GGRR`
/// (red in the low byte, matching the RGB555 channel order of
/// palette words shifted up by 3).
#[derive(Serialize, Deserialize, Default, Copy, Clone, PartialEq, Eq, Debug)]
pub struct Color(pub u32);

impl Color {
    /// Palette/framebuffer word: `0bM_BBBBB_GGGGG_RRRRR`, 5 bits per
    /// channel. Bit 15 is not a color bit and is ignored here.
    #[must_use]
    pub fn from_rgb555(value: u16) -> Self {
        let value = u32::from(value);
        Self((value & 0x1F) << 3 | (value & 0x3E0) << 6 | (value & 0x7C00) << 9)
    }

    /// CRAM long or bitmap dot: `0x00BB_GGRR` with full 8-bit channels.
    #[must_use]
    pub const fn from_rgb888(value: u32) -> Self {
        Self(value & 0x00FF_FFFF)
    }

    #[must_use]
    pub const fn rgb(r: u8, g: u8, b: u8) -> Self {
        Self((b as u32) << 16 | (g as u32) << 8 | r as u32)
    }

    #[must_use]
    pub fn red(self) -> u8 {
        self.0.get_bits(0..=7) as u8
    }

    #[must_use]
    pub fn green(self) -> u8 {
        self.0.get_bits(8..=15) as u8
    }

    #[must_use]
    pub fn blue(self) -> u8 {
        self.0.get_bits(16..=23) as u8
    }

    fn map<F: Fn(u8) -> u8>(self, f: F) -> Self {
        Self::rgb(f(self.red()), f(self.green()), f(self.blue()))
    }

    /// Ratio blend toward `bottom`: `ratio` runs 0..=63, 63 keeps
    /// `self` unchanged.
    #[must_use]
    pub fn blend(self, bottom: Self, ratio: u8) -> Self {
        debug_assert!(ratio <= 0x3F);
        let mix = |t: u8, b: u8| {
            let t = u32::from(t) * (u32::from(ratio) + 1);
            let b = u32::from(b) * (0x3F - u32::from(ratio));
            ((t + b) >> 6) as u8
        };
        Self::rgb(
            mix(self.red(), bottom.red()),
            mix(self.green(), bottom.green()),
            mix(self.blue(), bottom.blue()),
        )
    }

    /// Per-channel saturating add, for additive color calculation.
    #[must_use]
    pub fn saturating_add(self, other: Self) -> Self {
        Self::rgb(
            self.red().saturating_add(other.red()),
            self.green().saturating_add(other.green()),
            self.blue().saturating_add(other.blue()),
        )
    }

    /// Shadow: halves every channel.
    #[must_use]
    pub fn halve(self) -> Self {
        self.map(|c| c >> 1)
    }

    #[must_use]
    pub const fn to_rgba8888(self) -> u32 {
        // R in the high byte for the emitted frame.
        let r = self.0 & 0xFF;
        let g = (self.0 >> 8) & 0xFF;
        let b = (self.0 >> 16) & 0xFF;
        r << 24 | g << 16 | b << 8 | 0xFF
    }
}

/// Signed per-channel color offset, -256..=255 on each channel.
///
/// Two banks (A and B) exist in hardware; which one a layer uses is
/// selected per layer by `CLOFSL` once `CLOFEN` enables the feature.
#[derive(Default, Copy, Clone, PartialEq, Eq, Debug)]
pub struct ColorOffset {
    pub r: i16,
    pub g: i16,
    pub b: i16,
}

impl ColorOffset {
    /// Decodes the three 9-bit signed offset registers of one bank.
    #[must_use]
    pub fn from_registers(red: u16, green: u16, blue: u16) -> Self {
        let decode = |reg: u16| sign_extend(u32::from(reg) & 0x1FF, 9) as i16;
        Self {
            r: decode(red),
            g: decode(green),
            b: decode(blue),
        }
    }

    /// Applies the offset with clamping to 0..=255 per channel.
    #[must_use]
    pub fn apply(self, color: Color) -> Color {
        let clamp = |c: u8, off: i16| (i16::from(c) + off).clamp(0, 255) as u8;
        Color::rgb(
            clamp(color.red(), self.r),
            clamp(color.green(), self.g),
            clamp(color.blue(), self.b),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn rgb555_expands_channels() {
        let c = Color::from_rgb555(0x7FFF);
        assert_eq!((c.red(), c.green(), c.blue()), (0xF8, 0xF8, 0xF8));

        let c = Color::from_rgb555(0x001F);
        assert_eq!((c.red(), c.green(), c.blue()), (0xF8, 0, 0));

        // Bit 15 carries palette metadata, not color.
        assert_eq!(Color::from_rgb555(0x8000), Color::rgb(0, 0, 0));
    }

    #[test]
    fn blend_full_ratio_is_identity() {
        let top = Color::rgb(200, 100, 50);
        let bottom = Color::rgb(10, 20, 30);
        assert_eq!(top.blend(bottom, 0x3F), top);
    }

    #[test]
    fn blend_mixes_toward_bottom() {
        let top = Color::rgb(255, 0, 255);
        let bottom = Color::rgb(0, 0, 0);
        let mixed = top.blend(bottom, 0x1F);
        assert_eq!(mixed, Color::rgb(127, 0, 127));
    }

    #[test]
    fn additive_saturates() {
        let a = Color::rgb(200, 200, 10);
        let b = Color::rgb(100, 55, 10);
        assert_eq!(a.saturating_add(b), Color::rgb(255, 255, 20));
    }

    #[test]
    fn offset_decodes_sign_and_clamps() {
        let off = ColorOffset::from_registers(0x1FF, 0x100, 0x00A);
        assert_eq!((off.r, off.g, off.b), (-1, -256, 10));

        let c = off.apply(Color::rgb(0, 100, 250));
        assert_eq!(c, Color::rgb(0, 0, 255));
    }
}
