//! Register file and program counter.
//!
//! The machine has eight general-purpose 32-bit registers, `r0` to `r7`,
//! and a program counter naming a (segment, index) pair.

use crate::machine::memory::{SegmentId, Word};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Number of general-purpose registers.
pub const REGISTER_COUNT: usize = 8;

/// A validated register operand, always in `0..8`.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u32", into = "u32")]
pub struct RegisterIndex(u8);

impl RegisterIndex {
    /// Validate a raw register number.
    pub fn new(raw: u32) -> Result<Self, RegisterError> {
        if (raw as usize) < REGISTER_COUNT {
            Ok(Self(raw as u8))
        } else {
            Err(RegisterError::OutOfRange(raw))
        }
    }

    #[inline]
    pub const fn get(self) -> usize {
        self.0 as usize
    }
}

impl TryFrom<u32> for RegisterIndex {
    type Error = RegisterError;

    fn try_from(raw: u32) -> Result<Self, Self::Error> {
        Self::new(raw)
    }
}

impl From<RegisterIndex> for u32 {
    fn from(index: RegisterIndex) -> Self {
        index.0 as u32
    }
}

impl fmt::Debug for RegisterIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "r{}", self.0)
    }
}

impl fmt::Display for RegisterIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "r{}", self.0)
    }
}

/// Register operand outside the register file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum RegisterError {
    #[error("register index {0} out of range (0-7)")]
    OutOfRange(u32),
}

/// Location of the next instruction to fetch.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgramCounter {
    pub segment: SegmentId,
    pub index: u32,
}

impl ProgramCounter {
    /// Step to the next word. Wraps at the end of the index space; a
    /// wrapped counter simply fetches from the start of the segment.
    #[inline]
    pub fn advance(&mut self) {
        self.index = self.index.wrapping_add(1);
    }

    /// Jump to `index` inside the program segment.
    #[inline]
    pub fn jump(&mut self, index: u32) {
        self.segment = SegmentId::PROGRAM;
        self.index = index;
    }
}

impl fmt::Display for ProgramCounter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{:06}", self.segment, self.index)
    }
}

/// The register file.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Registers {
    values: [Word; REGISTER_COUNT],
}

impl Registers {
    /// All registers zeroed.
    pub fn new() -> Self {
        Self { values: [0; REGISTER_COUNT] }
    }

    #[inline]
    pub fn get(&self, reg: RegisterIndex) -> Word {
        self.values[reg.get()]
    }

    #[inline]
    pub fn set(&mut self, reg: RegisterIndex, value: Word) {
        self.values[reg.get()] = value;
    }

    /// All eight values, `r0` first.
    pub fn as_array(&self) -> &[Word; REGISTER_COUNT] {
        &self.values
    }
}

impl fmt::Display for Registers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, value) in self.values.iter().enumerate() {
            if i > 0 {
                write!(f, " ")?;
            }
            write!(f, "r{}={:#010x}", i, value)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn r(n: u32) -> RegisterIndex {
        RegisterIndex::new(n).unwrap()
    }

    #[test]
    fn test_register_index_range() {
        for n in 0..8 {
            assert_eq!(RegisterIndex::new(n).unwrap().get(), n as usize);
        }
        assert_eq!(RegisterIndex::new(8), Err(RegisterError::OutOfRange(8)));
        assert_eq!(RegisterIndex::try_from(u32::MAX), Err(RegisterError::OutOfRange(u32::MAX)));
    }

    #[test]
    fn test_registers_start_zeroed() {
        let regs = Registers::new();
        assert_eq!(regs.as_array(), &[0; REGISTER_COUNT]);
    }

    #[test]
    fn test_get_set() {
        let mut regs = Registers::new();
        regs.set(r(3), 0xDEAD_BEEF);
        assert_eq!(regs.get(r(3)), 0xDEAD_BEEF);
        assert_eq!(regs.get(r(2)), 0);
    }

    #[test]
    fn test_program_counter() {
        let mut pc = ProgramCounter::default();
        pc.advance();
        pc.advance();
        assert_eq!(pc.index, 2);

        pc.jump(40);
        assert_eq!(pc, ProgramCounter { segment: SegmentId::PROGRAM, index: 40 });

        pc.jump(u32::MAX);
        pc.advance();
        assert_eq!(pc.index, 0);
    }

    #[test]
    fn test_register_index_serde() {
        let json = serde_json::to_string(&r(5)).unwrap();
        assert_eq!(json, "5");
        assert!(serde_json::from_str::<RegisterIndex>("9").is_err());
    }
}
