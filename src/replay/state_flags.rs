//! Bit-packed per-player state flags.
//!
//! Each replay frame carries one packed integer per player encoding the
//! attack, block and jump sub-states (3 bits each) plus a stun bit:
//!
//! ```text
//! bit  9   8..6   5..3   2..0
//!     stun jump   block  attack
//! ```
//!
//! Bits 10 and above are reserved and round-trip as zero; decoding masks
//! them away rather than rejecting the value, matching the tolerance the
//! rest of the protocol shows towards forward-compatible payloads.

use std::fmt;

/// All defined flag bits. Anything above bit 9 is reserved.
pub const STATE_FLAGS_MASK: u16 = 0x03FF;

const SUB_STATE_MASK: u16 = 0b111;
const BLOCK_SHIFT: u16 = 3;
const JUMP_SHIFT: u16 = 6;
const STUN_SHIFT: u16 = 9;

/// One stage of an attack, block or jump action.
///
/// Each sub-state field is exactly one of these five values; the wire
/// format has room for eight, so [`SubState::from_bits`] returns `None`
/// for the three undefined encodings.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Default)]
pub enum SubState {
    /// The action is not in progress.
    #[default]
    None,
    /// Wind-up frames before the action takes effect.
    Startup,
    /// The frames during which the action has effect.
    Active,
    /// Wind-down frames after the active window.
    Recovery,
    /// The action is held, waiting (e.g. a held block).
    Wait,
}

impl SubState {
    /// Decodes a 3-bit field into a sub-state. Returns `None` for the
    /// undefined encodings 5-7.
    #[must_use]
    pub const fn from_bits(bits: u8) -> Option<Self> {
        match bits {
            0 => Some(SubState::None),
            1 => Some(SubState::Startup),
            2 => Some(SubState::Active),
            3 => Some(SubState::Recovery),
            4 => Some(SubState::Wait),
            _ => None,
        }
    }

    /// The 3-bit wire encoding of this sub-state.
    #[must_use]
    pub const fn as_bits(self) -> u8 {
        match self {
            SubState::None => 0,
            SubState::Startup => 1,
            SubState::Active => 2,
            SubState::Recovery => 3,
            SubState::Wait => 4,
        }
    }
}

/// A packed integer encoding three sub-state fields and a stun bit for one
/// player at one frame.
///
/// The raw bits are stored losslessly (after masking reserved bits), so
/// `StateFlags::from_bits(x).bits() == x` for every `x` in `[0, 1023]`,
/// even for the undefined sub-state encodings a buggy producer might emit.
/// The typed accessors ([`attack_state`](Self::attack_state) and friends)
/// surface those as `None`.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Default)]
pub struct StateFlags(u16);

impl StateFlags {
    /// Decodes a raw wire value. Reserved bits (10+) are masked away.
    #[must_use]
    pub const fn from_bits(bits: u16) -> Self {
        StateFlags(bits & STATE_FLAGS_MASK)
    }

    /// Packs the three sub-states and the stun bit into wire form.
    #[must_use]
    pub const fn pack(attack: SubState, block: SubState, jump: SubState, stunned: bool) -> Self {
        let mut bits = attack.as_bits() as u16;
        bits |= (block.as_bits() as u16) << BLOCK_SHIFT;
        bits |= (jump.as_bits() as u16) << JUMP_SHIFT;
        if stunned {
            bits |= 1 << STUN_SHIFT;
        }
        StateFlags(bits)
    }

    /// The raw packed value. This is the exact inverse of
    /// [`from_bits`](Self::from_bits) for all in-range inputs.
    #[inline]
    #[must_use]
    pub const fn bits(self) -> u16 {
        self.0
    }

    /// Raw 3-bit attack field.
    #[inline]
    #[must_use]
    pub const fn attack_bits(self) -> u8 {
        (self.0 & SUB_STATE_MASK) as u8
    }

    /// Raw 3-bit block field.
    #[inline]
    #[must_use]
    pub const fn block_bits(self) -> u8 {
        ((self.0 >> BLOCK_SHIFT) & SUB_STATE_MASK) as u8
    }

    /// Raw 3-bit jump field.
    #[inline]
    #[must_use]
    pub const fn jump_bits(self) -> u8 {
        ((self.0 >> JUMP_SHIFT) & SUB_STATE_MASK) as u8
    }

    /// The attack sub-state, or `None` if the field holds an undefined encoding.
    #[must_use]
    pub const fn attack_state(self) -> Option<SubState> {
        SubState::from_bits(self.attack_bits())
    }

    /// The block sub-state, or `None` if the field holds an undefined encoding.
    #[must_use]
    pub const fn block_state(self) -> Option<SubState> {
        SubState::from_bits(self.block_bits())
    }

    /// The jump sub-state, or `None` if the field holds an undefined encoding.
    #[must_use]
    pub const fn jump_state(self) -> Option<SubState> {
        SubState::from_bits(self.jump_bits())
    }

    /// Whether the stun bit is set.
    #[inline]
    #[must_use]
    pub const fn stunned(self) -> bool {
        (self.0 >> STUN_SHIFT) & 1 == 1
    }
}

impl fmt::Display for StateFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "attack={:?} block={:?} jump={:?} stunned={}",
            self.attack_state(),
            self.block_state(),
            self.jump_state(),
            self.stunned()
        )
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn pack_and_unpack_all_defined_sub_states() {
        for a in 0..=4u8 {
            for b in 0..=4u8 {
                for j in 0..=4u8 {
                    for stunned in [false, true] {
                        let attack = SubState::from_bits(a).unwrap();
                        let block = SubState::from_bits(b).unwrap();
                        let jump = SubState::from_bits(j).unwrap();
                        let flags = StateFlags::pack(attack, block, jump, stunned);
                        assert_eq!(flags.attack_state(), Some(attack));
                        assert_eq!(flags.block_state(), Some(block));
                        assert_eq!(flags.jump_state(), Some(jump));
                        assert_eq!(flags.stunned(), stunned);
                    }
                }
            }
        }
    }

    #[test]
    fn bit_layout_matches_wire_contract() {
        let flags = StateFlags::pack(
            SubState::Startup,
            SubState::Active,
            SubState::Recovery,
            true,
        );
        // attack=1, block=2<<3, jump=3<<6, stun=1<<9
        assert_eq!(flags.bits(), 1 | (2 << 3) | (3 << 6) | (1 << 9));
    }

    #[test]
    fn reserved_bits_are_masked_on_decode() {
        let flags = StateFlags::from_bits(0xFC00 | 0b101);
        assert_eq!(flags.bits(), 0b101);
        assert!(!flags.stunned());
    }

    #[test]
    fn undefined_sub_state_encodings_surface_as_none() {
        let flags = StateFlags::from_bits(0b111);
        assert_eq!(flags.attack_bits(), 7);
        assert_eq!(flags.attack_state(), None);
        // the raw value still round-trips
        assert_eq!(StateFlags::from_bits(flags.bits()).bits(), 0b111);
    }

    #[test]
    fn default_is_all_clear() {
        let flags = StateFlags::default();
        assert_eq!(flags.bits(), 0);
        assert_eq!(flags.attack_state(), Some(SubState::None));
        assert!(!flags.stunned());
    }

    #[test]
    fn sub_state_from_bits_rejects_out_of_range() {
        assert_eq!(SubState::from_bits(5), None);
        assert_eq!(SubState::from_bits(6), None);
        assert_eq!(SubState::from_bits(7), None);
        assert_eq!(SubState::from_bits(255), None);
    }

    proptest! {
        /// encode(decode(x)) == x for every value without reserved bits.
        #[test]
        fn round_trip_all_in_range_values(bits in 0u16..=STATE_FLAGS_MASK) {
            prop_assert_eq!(StateFlags::from_bits(bits).bits(), bits);
        }

        /// Reserved bits never survive a decode.
        #[test]
        fn reserved_bits_never_survive(bits in any::<u16>()) {
            prop_assert_eq!(StateFlags::from_bits(bits).bits(), bits & STATE_FLAGS_MASK);
        }

        /// Typed round-trip over the defined sub-state space.
        #[test]
        fn round_trip_typed(a in 0u8..=4, b in 0u8..=4, j in 0u8..=4, stunned in any::<bool>()) {
            let attack = SubState::from_bits(a).unwrap();
            let block = SubState::from_bits(b).unwrap();
            let jump = SubState::from_bits(j).unwrap();
            let flags = StateFlags::pack(attack, block, jump, stunned);
            prop_assert_eq!(flags.attack_state(), Some(attack));
            prop_assert_eq!(flags.block_state(), Some(block));
            prop_assert_eq!(flags.jump_state(), Some(jump));
            prop_assert_eq!(flags.stunned(), stunned);
        }
    }
}
