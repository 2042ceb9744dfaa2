use crate::bitwise::Bits;

/// Mosaic coarsening: every cell of `x_size` x `y_size` output dots
/// samples its top-left source dot. Sizes run 1..=16 from MZCTL.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub struct Mosaic {
    x_size: u32,
    y_size: u32,
}

impl Mosaic {
    pub const OFF: Self = Self { x_size: 1, y_size: 1 };

    /// Reads MZCTL for one layer; `enable_bit` is the layer's slot in
    /// the low nibble (NBG0 = 0 .. RBG0 = 4).
    #[must_use]
    pub fn from_mzctl(mzctl: u16, enable_bit: u32) -> Self {
        if !mzctl.get_bit(enable_bit) {
            return Self::OFF;
        }
        Self {
            x_size: u32::from(mzctl.get_bits(8..=11)) + 1,
            y_size: u32::from(mzctl.get_bits(12..=15)) + 1,
        }
    }

    #[must_use]
    pub const fn quantize_x(self, x: u32) -> u32 {
        x - x % self.x_size
    }

    #[must_use]
    pub const fn quantize_y(self, y: u32) -> u32 {
        y - y % self.y_size
    }

    #[must_use]
    pub const fn is_enabled(self) -> bool {
        self.x_size > 1 || self.y_size > 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn disabled_is_identity() {
        let mosaic = Mosaic::from_mzctl(0xFF00, 0);
        assert!(!mosaic.is_enabled());
        assert_eq!(mosaic.quantize_x(13), 13);
        assert_eq!(mosaic.quantize_y(7), 7);
    }

    #[test]
    fn adjacent_columns_share_a_block() {
        // x size 4, y size 2, enabled for NBG1.
        let mosaic = Mosaic::from_mzctl(0x1302, 1);
        assert!(mosaic.is_enabled());
        for x in 0..64 {
            let block = mosaic.quantize_x(x);
            assert_eq!(block, x / 4 * 4);
            if x % 4 != 3 {
                assert_eq!(mosaic.quantize_x(x + 1), block);
            }
        }
        assert_eq!(mosaic.quantize_y(5), 4);
    }

    #[test]
    fn largest_cell() {
        let mosaic = Mosaic::from_mzctl(0xFF01, 0);
        assert_eq!(mosaic.quantize_x(31), 16);
        assert_eq!(mosaic.quantize_y(15), 0);
    }
}
