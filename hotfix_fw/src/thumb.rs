//! Thumb encodings used by the slot and the thunk.

/// `udf #0x42`. Raises UsageFault once that class is enabled.
pub const UDF_SENTINEL: u16 = 0xDE42;

/// `bx lr`
pub const BX_LR: u16 = 0x4770;

/// `movs r0, r0`. Only touches flags, used as the idle thunk body.
pub const MOVS_R0_R0: u16 = 0x0000;

/// Execution-state bit carried in bit 0 of every branch target.
pub const THUMB_BIT: u32 = 1;

const UDF_MASK: u16 = 0xFF00;
const UDF_BASE: u16 = 0xDE00;

/// First halfword of a 32-bit Thumb-2 encoding (`0b11101`, `0b11110`, `0b11111`).
const WIDE_PREFIX: u16 = 0xE800;

/// Slot word for `hw`: the instruction in the low halfword, `bx lr` in the
/// high one, matching little-endian halfword fetch order.
#[inline]
pub const fn slot_word(hw: u16) -> u32 {
    ((BX_LR as u32) << 16) | hw as u32
}

/// Leading (low) halfword of a slot word.
#[inline]
pub const fn leading_halfword(word: u32) -> u16 {
    (word & 0xFFFF) as u16
}

/// Trailing (high) halfword of a slot word.
#[inline]
pub const fn trailing_halfword(word: u32) -> u16 {
    (word >> 16) as u16
}

/// Permanently undefined `UDF #imm8`.
#[inline]
pub const fn is_udf(hw: u16) -> bool {
    hw & UDF_MASK == UDF_BASE
}

/// `hw` opens a 32-bit instruction and cannot be executed on its own.
#[inline]
pub const fn is_wide_prefix(hw: u16) -> bool {
    hw >= WIDE_PREFIX
}

#[inline]
pub const fn thumb_entry(addr: u32) -> u32 {
    addr | THUMB_BIT
}

#[inline]
pub const fn strip_thumb(addr: u32) -> u32 {
    addr & !THUMB_BIT
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slot_word_places_instruction_first() {
        let word = slot_word(0x1234);
        assert_eq!(word, 0x4770_1234);
        assert_eq!(word.to_le_bytes(), [0x34, 0x12, 0x70, 0x47]);
        assert_eq!(leading_halfword(word), 0x1234);
        assert_eq!(trailing_halfword(word), BX_LR);
    }

    #[test]
    fn sentinel_is_undefined() {
        assert!(is_udf(UDF_SENTINEL));
        assert!(is_udf(0xDE00));
        assert!(!is_udf(BX_LR));
        assert!(!is_udf(MOVS_R0_R0));
        assert!(!is_udf(0xDF00)); // svc
    }

    #[test]
    fn wide_prefixes() {
        assert!(is_wide_prefix(0xF000));
        assert!(is_wide_prefix(0xE800));
        assert!(!is_wide_prefix(0xE7FE)); // b .
        assert!(!is_wide_prefix(UDF_SENTINEL));
    }

    #[test]
    fn thumb_bit_helpers() {
        assert_eq!(thumb_entry(0x000F_F000), 0x000F_F001);
        assert_eq!(thumb_entry(0x000F_F001), 0x000F_F001);
        assert_eq!(strip_thumb(0x000F_F003), 0x000F_F002);
    }
}
