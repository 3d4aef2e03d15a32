//! Instruction decoder.
//!
//! Every instruction is a single 32-bit word. The top four bits hold the
//! opcode. Opcodes 0-12 carry three 3-bit register fields:
//!
//! ```text
//!  31  28                              8   6 5   3 2   0
//! +------+----------- unused ---------+-----+-----+-----+
//! |  op  |                            |  A  |  B  |  C  |
//! +------+----------------------------+-----+-----+-----+
//! ```
//!
//! Opcode 13 (load immediate) carries one register and a 25-bit value:
//!
//! ```text
//!  31  28 27 25 24                                     0
//! +------+-----+---------------------------------------+
//! |  13  |  A  |               immediate               |
//! +------+-----+---------------------------------------+
//! ```

use crate::bitpack::{extract_unsigned, insert_unsigned};
use crate::machine::memory::Word;
use crate::machine::registers::{RegisterError, RegisterIndex};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

pub const OPCODE_WIDTH: u32 = 4;
pub const OPCODE_LSB: u32 = 28;
pub const REGISTER_WIDTH: u32 = 3;
pub const REG_A_LSB: u32 = 6;
pub const REG_B_LSB: u32 = 3;
pub const REG_C_LSB: u32 = 0;
pub const IMMEDIATE_REG_LSB: u32 = 25;
pub const IMMEDIATE_WIDTH: u32 = 25;

/// Largest value a load-immediate can carry.
pub const IMMEDIATE_MAX: u32 = (1 << IMMEDIATE_WIDTH) - 1;

/// The fourteen opcodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum Opcode {
    CondMove = 0,
    SegLoad = 1,
    SegStore = 2,
    Add = 3,
    Mul = 4,
    Div = 5,
    Nand = 6,
    Halt = 7,
    Map = 8,
    Unmap = 9,
    Output = 10,
    Input = 11,
    LoadProgram = 12,
    LoadImmediate = 13,
}

impl Opcode {
    /// Number of defined opcodes.
    pub const COUNT: usize = 14;

    pub const ALL: [Opcode; Self::COUNT] = [
        Opcode::CondMove,
        Opcode::SegLoad,
        Opcode::SegStore,
        Opcode::Add,
        Opcode::Mul,
        Opcode::Div,
        Opcode::Nand,
        Opcode::Halt,
        Opcode::Map,
        Opcode::Unmap,
        Opcode::Output,
        Opcode::Input,
        Opcode::LoadProgram,
        Opcode::LoadImmediate,
    ];

    /// Assembly mnemonic.
    pub const fn mnemonic(self) -> &'static str {
        match self {
            Opcode::CondMove => "cmov",
            Opcode::SegLoad => "sload",
            Opcode::SegStore => "sstore",
            Opcode::Add => "add",
            Opcode::Mul => "mul",
            Opcode::Div => "div",
            Opcode::Nand => "nand",
            Opcode::Halt => "halt",
            Opcode::Map => "map",
            Opcode::Unmap => "unmap",
            Opcode::Output => "out",
            Opcode::Input => "in",
            Opcode::LoadProgram => "loadp",
            Opcode::LoadImmediate => "li",
        }
    }
}

impl TryFrom<u32> for Opcode {
    type Error = DecodeError;

    fn try_from(raw: u32) -> Result<Self, Self::Error> {
        Opcode::ALL
            .get(raw as usize)
            .copied()
            .ok_or(DecodeError::InvalidOpcode(raw))
    }
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.mnemonic())
    }
}

/// A decoded instruction.
///
/// Operand names follow the encoding: `a`, `b` and `c` are the register
/// fields at bits 6, 3 and 0.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Instruction {
    /// if r[c] != 0 then r[a] := r[b]
    CondMove { a: RegisterIndex, b: RegisterIndex, c: RegisterIndex },
    /// r[a] := m[r[b]][r[c]]
    SegLoad { a: RegisterIndex, b: RegisterIndex, c: RegisterIndex },
    /// m[r[a]][r[b]] := r[c]
    SegStore { a: RegisterIndex, b: RegisterIndex, c: RegisterIndex },
    /// r[a] := r[b] + r[c] (mod 2^32)
    Add { a: RegisterIndex, b: RegisterIndex, c: RegisterIndex },
    /// r[a] := r[b] * r[c] (mod 2^32)
    Mul { a: RegisterIndex, b: RegisterIndex, c: RegisterIndex },
    /// r[a] := r[b] / r[c]
    Div { a: RegisterIndex, b: RegisterIndex, c: RegisterIndex },
    /// r[a] := !(r[b] & r[c])
    Nand { a: RegisterIndex, b: RegisterIndex, c: RegisterIndex },
    Halt,
    /// r[b] := id of a new segment of r[c] words
    Map { b: RegisterIndex, c: RegisterIndex },
    /// free segment r[c]
    Unmap { c: RegisterIndex },
    /// write byte r[c]
    Output { c: RegisterIndex },
    /// r[c] := next input byte, or all ones at end of input
    Input { c: RegisterIndex },
    /// m[0] := copy of m[r[b]]; pc := r[c]
    LoadProgram { b: RegisterIndex, c: RegisterIndex },
    /// r[a] := value
    LoadImmediate { a: RegisterIndex, value: u32 },
}

impl Instruction {
    pub fn opcode(&self) -> Opcode {
        match self {
            Instruction::CondMove { .. } => Opcode::CondMove,
            Instruction::SegLoad { .. } => Opcode::SegLoad,
            Instruction::SegStore { .. } => Opcode::SegStore,
            Instruction::Add { .. } => Opcode::Add,
            Instruction::Mul { .. } => Opcode::Mul,
            Instruction::Div { .. } => Opcode::Div,
            Instruction::Nand { .. } => Opcode::Nand,
            Instruction::Halt => Opcode::Halt,
            Instruction::Map { .. } => Opcode::Map,
            Instruction::Unmap { .. } => Opcode::Unmap,
            Instruction::Output { .. } => Opcode::Output,
            Instruction::Input { .. } => Opcode::Input,
            Instruction::LoadProgram { .. } => Opcode::LoadProgram,
            Instruction::LoadImmediate { .. } => Opcode::LoadImmediate,
        }
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let op = self.opcode();
        match *self {
            Instruction::CondMove { a, b, c }
            | Instruction::SegLoad { a, b, c }
            | Instruction::SegStore { a, b, c }
            | Instruction::Add { a, b, c }
            | Instruction::Mul { a, b, c }
            | Instruction::Div { a, b, c }
            | Instruction::Nand { a, b, c } => write!(f, "{:<6} {}, {}, {}", op, a, b, c),
            Instruction::Halt => write!(f, "{}", op),
            Instruction::Map { b, c } | Instruction::LoadProgram { b, c } => {
                write!(f, "{:<6} {}, {}", op, b, c)
            }
            Instruction::Unmap { c } | Instruction::Output { c } | Instruction::Input { c } => {
                write!(f, "{:<6} {}", op, c)
            }
            Instruction::LoadImmediate { a, value } => write!(f, "{:<6} {}, {}", op, a, value),
        }
    }
}

/// Decode one instruction word.
pub fn decode(word: Word) -> Result<Instruction, DecodeError> {
    let opcode = Opcode::try_from(extract_unsigned(word, OPCODE_WIDTH, OPCODE_LSB))?;

    let a = register(word, REG_A_LSB)?;
    let b = register(word, REG_B_LSB)?;
    let c = register(word, REG_C_LSB)?;

    let instruction = match opcode {
        Opcode::CondMove => Instruction::CondMove { a, b, c },
        Opcode::SegLoad => Instruction::SegLoad { a, b, c },
        Opcode::SegStore => Instruction::SegStore { a, b, c },
        Opcode::Add => Instruction::Add { a, b, c },
        Opcode::Mul => Instruction::Mul { a, b, c },
        Opcode::Div => Instruction::Div { a, b, c },
        Opcode::Nand => Instruction::Nand { a, b, c },
        Opcode::Halt => Instruction::Halt,
        Opcode::Map => Instruction::Map { b, c },
        Opcode::Unmap => Instruction::Unmap { c },
        Opcode::Output => Instruction::Output { c },
        Opcode::Input => Instruction::Input { c },
        Opcode::LoadProgram => Instruction::LoadProgram { b, c },
        Opcode::LoadImmediate => Instruction::LoadImmediate {
            a: register(word, IMMEDIATE_REG_LSB)?,
            value: extract_unsigned(word, IMMEDIATE_WIDTH, 0),
        },
    };

    Ok(instruction)
}

fn register(word: Word, lsb: u32) -> Result<RegisterIndex, DecodeError> {
    Ok(RegisterIndex::new(extract_unsigned(word, REGISTER_WIDTH, lsb))?)
}

/// Encode an instruction as a word.
///
/// Unused register fields are left zero. Immediates wider than 25 bits are
/// truncated to their low 25 bits.
pub fn encode(instr: &Instruction) -> Word {
    let with_op = |op: Opcode| insert_unsigned(0, OPCODE_WIDTH, OPCODE_LSB, op as u32);
    let regs = |word: Word, a: Option<RegisterIndex>, b: Option<RegisterIndex>, c: Option<RegisterIndex>| {
        let mut word = word;
        for (reg, lsb) in [(a, REG_A_LSB), (b, REG_B_LSB), (c, REG_C_LSB)] {
            if let Some(reg) = reg {
                word = insert_unsigned(word, REGISTER_WIDTH, lsb, reg.get() as u32);
            }
        }
        word
    };

    let op = instr.opcode();
    match *instr {
        Instruction::CondMove { a, b, c }
        | Instruction::SegLoad { a, b, c }
        | Instruction::SegStore { a, b, c }
        | Instruction::Add { a, b, c }
        | Instruction::Mul { a, b, c }
        | Instruction::Div { a, b, c }
        | Instruction::Nand { a, b, c } => regs(with_op(op), Some(a), Some(b), Some(c)),
        Instruction::Halt => with_op(op),
        Instruction::Map { b, c } | Instruction::LoadProgram { b, c } => {
            regs(with_op(op), None, Some(b), Some(c))
        }
        Instruction::Unmap { c } | Instruction::Output { c } | Instruction::Input { c } => {
            regs(with_op(op), None, None, Some(c))
        }
        Instruction::LoadImmediate { a, value } => {
            let word = insert_unsigned(with_op(op), REGISTER_WIDTH, IMMEDIATE_REG_LSB, a.get() as u32);
            insert_unsigned(word, IMMEDIATE_WIDTH, 0, value & IMMEDIATE_MAX)
        }
    }
}

/// Errors that can occur during instruction decoding.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("invalid opcode: {0}")]
    InvalidOpcode(u32),

    #[error(transparent)]
    Register(#[from] RegisterError),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn r(n: u32) -> RegisterIndex {
        RegisterIndex::new(n).unwrap()
    }

    #[test]
    fn test_decode_load_immediate() {
        assert_eq!(
            decode(0xD000_0048).unwrap(),
            Instruction::LoadImmediate { a: r(0), value: 72 }
        );
        // r7, max immediate
        assert_eq!(
            decode(0xDFFF_FFFF).unwrap(),
            Instruction::LoadImmediate { a: r(7), value: IMMEDIATE_MAX }
        );
    }

    #[test]
    fn test_decode_three_register_fields() {
        // add r1, r2, r3
        let word = (3 << 28) | (1 << 6) | (2 << 3) | 3;
        assert_eq!(
            decode(word).unwrap(),
            Instruction::Add { a: r(1), b: r(2), c: r(3) }
        );
    }

    #[test]
    fn test_decode_ignores_unused_bits() {
        // halt with junk in the middle bits
        assert_eq!(decode(0x7ABC_DEFF).unwrap(), Instruction::Halt);
        // output r0, junk above the register fields
        assert_eq!(decode(0xA012_3400).unwrap(), Instruction::Output { c: r(0) });
    }

    #[test]
    fn test_decode_invalid_opcodes() {
        assert_eq!(decode(0xE000_0000), Err(DecodeError::InvalidOpcode(14)));
        assert_eq!(decode(0xF000_0000), Err(DecodeError::InvalidOpcode(15)));
    }

    #[test]
    fn test_opcode_values_match_table() {
        for (value, op) in Opcode::ALL.iter().enumerate() {
            assert_eq!(*op as usize, value);
            assert_eq!(Opcode::try_from(value as u32).unwrap(), *op);
        }
    }

    #[test]
    fn test_encode_known_words() {
        assert_eq!(encode(&Instruction::LoadImmediate { a: r(0), value: 72 }), 0xD000_0048);
        assert_eq!(encode(&Instruction::Output { c: r(0) }), 0xA000_0000);
        assert_eq!(encode(&Instruction::Halt), 0x7000_0000);
        assert_eq!(
            encode(&Instruction::SegStore { a: r(7), b: r(6), c: r(5) }),
            0x2000_01F5
        );
    }

    #[test]
    fn test_encode_decode_every_opcode() {
        let cases = [
            Instruction::CondMove { a: r(1), b: r(2), c: r(3) },
            Instruction::SegLoad { a: r(4), b: r(5), c: r(6) },
            Instruction::SegStore { a: r(7), b: r(0), c: r(1) },
            Instruction::Add { a: r(2), b: r(3), c: r(4) },
            Instruction::Mul { a: r(5), b: r(6), c: r(7) },
            Instruction::Div { a: r(0), b: r(1), c: r(2) },
            Instruction::Nand { a: r(3), b: r(4), c: r(5) },
            Instruction::Halt,
            Instruction::Map { b: r(6), c: r(7) },
            Instruction::Unmap { c: r(1) },
            Instruction::Output { c: r(2) },
            Instruction::Input { c: r(3) },
            Instruction::LoadProgram { b: r(4), c: r(5) },
            Instruction::LoadImmediate { a: r(6), value: 0x1AB_CDEF },
        ];
        for instr in cases {
            assert_eq!(decode(encode(&instr)).unwrap(), instr);
        }
    }

    #[test]
    fn test_display() {
        assert_eq!(
            Instruction::Add { a: r(1), b: r(2), c: r(3) }.to_string(),
            "add    r1, r2, r3"
        );
        assert_eq!(Instruction::Halt.to_string(), "halt");
        assert_eq!(
            Instruction::LoadImmediate { a: r(0), value: 72 }.to_string(),
            "li     r0, 72"
        );
    }
}
