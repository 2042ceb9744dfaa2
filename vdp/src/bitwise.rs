use std::ops::RangeInclusive;

/// Helper methods to pick apart hardware register words.
/// Bit indices run from lsb to msb (right to left).
pub trait Bits: Copy {
    fn get_bit(self, bit_idx: u32) -> bool;

    /// Extracts an inclusive bit range, shifted down to position 0.
    fn get_bits(self, bits_range: RangeInclusive<u32>) -> Self;

    fn set_bit(&mut self, bit_idx: u32, value: bool);
}

macro_rules! impl_bits {
    ($($ty:ty),*) => {$(
        impl Bits for $ty {
            fn get_bit(self, bit_idx: u32) -> bool {
                debug_assert!(bit_idx < Self::BITS);
                (self >> bit_idx) & 1 != 0
            }

            fn get_bits(self, bits_range: RangeInclusive<u32>) -> Self {
                let start = *bits_range.start();
                let end = *bits_range.end();
                debug_assert!(start <= end && end < Self::BITS);

                let mask = if end - start + 1 == Self::BITS {
                    Self::MAX
                } else {
                    (1 << (end - start + 1)) - 1
                };

                (self >> start) & mask
            }

            fn set_bit(&mut self, bit_idx: u32, value: bool) {
                debug_assert!(bit_idx < Self::BITS);
                if value {
                    *self |= 1 << bit_idx;
                } else {
                    *self &= !(1 << bit_idx);
                }
            }
        }
    )*};
}

impl_bits!(u8, u16, u32, u64, usize);

/// Sign-extends the low `bits` bits of `value`.
pub const fn sign_extend(value: u32, bits: u32) -> i32 {
    debug_assert!(bits >= 1 && bits <= 32);
    let shift = 32 - bits;
    ((value << shift) as i32) >> shift
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::RngExt;

    #[test]
    fn test_get_bit() {
        let b = 0b110011101_u32;
        assert!(b.get_bit(0));
        assert!(!b.get_bit(1));
        assert!(b.get_bit(2));
        assert!(b.get_bit(8));
        assert!(!b.get_bit(31));
    }

    #[test]
    fn test_set_bit() {
        let mut b = 0b110011101_u16;
        b.set_bit(1, true);
        b.set_bit(0, false);
        assert_eq!(b, 0b110011110);
    }

    #[test]
    fn test_get_bits() {
        let b = 0b1011_0110_1001_0110_u16;
        assert_eq!(b.get_bits(0..=3), 0b0110);
        assert_eq!(b.get_bits(4..=7), 0b1001);
        assert_eq!(b.get_bits(12..=15), 0b1011);
        assert_eq!(b.get_bits(0..=15), b);
    }

    #[test]
    fn test_get_bits_random() {
        let mut rng = rand::rng();
        for _ in 0..1000 {
            let value: u32 = rng.random();
            let start = rng.random_range(0..32);
            let end = rng.random_range(start..32);

            let expected = (u64::from(value) >> start) & ((1_u64 << (end - start + 1)) - 1);
            assert_eq!(u64::from(value.get_bits(start..=end)), expected);
        }
    }

    #[test]
    fn test_sign_extend() {
        assert_eq!(sign_extend(0b1_1111_1111, 9), -1);
        assert_eq!(sign_extend(0b0_1111_1111, 9), 255);
        assert_eq!(sign_extend(0x1FFF_FF, 21), -1);
        assert_eq!(sign_extend(0, 14), 0);
    }
}
