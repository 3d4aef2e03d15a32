//! Unsigned bit-field packing for 32-bit words.
//!
//! Every instruction word and every program word built by the loader goes
//! through these two primitives. A field is described by its `width` in bits
//! and the offset of its least significant bit (`lsb`).

/// Number of bits in a machine word.
pub const WORD_BITS: u32 = 32;

/// Mask with the low `width` bits set.
#[inline]
const fn low_mask(width: u32) -> u32 {
    ((1u64 << width) - 1) as u32
}

/// Returns true if a `width`-bit field at `lsb` lies inside a word.
#[inline]
pub const fn field_fits(width: u32, lsb: u32) -> bool {
    width <= WORD_BITS && lsb <= WORD_BITS - width
}

/// Returns true if `value` can be stored in `width` unsigned bits.
#[inline]
pub const fn fits_unsigned(value: u32, width: u32) -> bool {
    width >= WORD_BITS || (value as u64) < (1u64 << width)
}

/// Extract the `width`-bit unsigned field whose lowest bit is `lsb`.
///
/// The field layout must be valid (`width + lsb <= 32`); this is checked in
/// debug builds only.
#[inline]
pub fn extract_unsigned(word: u32, width: u32, lsb: u32) -> u32 {
    debug_assert!(field_fits(width, lsb), "field {}@{} out of range", width, lsb);
    if width == 0 {
        return 0;
    }
    ((word as u64 >> lsb) as u32) & low_mask(width)
}

/// Replace the `width`-bit field at `lsb` with `value`, leaving every other
/// bit of `word` untouched.
///
/// `value` must fit in `width` bits; checked in debug builds only.
#[inline]
pub fn insert_unsigned(word: u32, width: u32, lsb: u32, value: u32) -> u32 {
    debug_assert!(field_fits(width, lsb), "field {}@{} out of range", width, lsb);
    debug_assert!(fits_unsigned(value, width), "{:#x} wider than {} bits", value, width);
    if width == 0 {
        return word;
    }
    let mask = (low_mask(width) as u64) << lsb;
    let cleared = word as u64 & !mask;
    (cleared | ((value as u64) << lsb) & mask) as u32
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_extract_opcode_field() {
        assert_eq!(extract_unsigned(0xD000_0048, 4, 28), 13);
        assert_eq!(extract_unsigned(0x7000_0000, 4, 28), 7);
        assert_eq!(extract_unsigned(0xD000_0048, 25, 0), 72);
    }

    #[test]
    fn test_extract_register_fields() {
        // A = 5, B = 3, C = 6
        let word = (5 << 6) | (3 << 3) | 6;
        assert_eq!(extract_unsigned(word, 3, 6), 5);
        assert_eq!(extract_unsigned(word, 3, 3), 3);
        assert_eq!(extract_unsigned(word, 3, 0), 6);
    }

    #[test]
    fn test_full_width_field() {
        assert_eq!(extract_unsigned(0xDEAD_BEEF, 32, 0), 0xDEAD_BEEF);
        assert_eq!(insert_unsigned(0, 32, 0, 0xDEAD_BEEF), 0xDEAD_BEEF);
    }

    #[test]
    fn test_zero_width_field() {
        assert_eq!(extract_unsigned(u32::MAX, 0, 32), 0);
        assert_eq!(insert_unsigned(0x1234, 0, 32, 0), 0x1234);
    }

    #[test]
    fn test_insert_bytes_big_endian() {
        let mut word = 0;
        for (i, byte) in [0x12u32, 0x34, 0x56, 0x78].into_iter().enumerate() {
            word = insert_unsigned(word, 8, 24 - 8 * i as u32, byte);
        }
        assert_eq!(word, 0x1234_5678);
    }

    #[test]
    fn test_insert_preserves_other_bits() {
        let word = insert_unsigned(0xFFFF_FFFF, 8, 8, 0);
        assert_eq!(word, 0xFFFF_00FF);
    }

    proptest! {
        #[test]
        fn prop_insert_then_extract(word in any::<u32>(), value in any::<u32>(), width in 1u32..=32, lsb in 0u32..32) {
            let lsb = lsb % (WORD_BITS - width + 1);
            let value = value & low_mask(width);
            let packed = insert_unsigned(word, width, lsb, value);
            prop_assert_eq!(extract_unsigned(packed, width, lsb), value);
        }

        #[test]
        fn prop_insert_leaves_outside_bits(word in any::<u32>(), value in any::<u32>(), width in 1u32..=32, lsb in 0u32..32) {
            let lsb = lsb % (WORD_BITS - width + 1);
            let value = value & low_mask(width);
            let mask = ((low_mask(width) as u64) << lsb) as u32;
            let packed = insert_unsigned(word, width, lsb, value);
            prop_assert_eq!(packed & !mask, word & !mask);
        }
    }
}
