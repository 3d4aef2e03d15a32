//! The Universal Machine.
//!
//! This module implements the complete machine:
//! - segmented memory with handle recycling
//! - 8 general-purpose 32-bit registers and a program counter
//! - a 14-instruction set decoded from packed 32-bit words

pub mod memory;
pub mod registers;
pub mod decode;
pub mod execute;

pub use memory::{Memory, SegmentError, SegmentId, Word};
pub use registers::{ProgramCounter, RegisterError, RegisterIndex, Registers};
pub use decode::{decode, encode, DecodeError, Instruction, Opcode};
pub use execute::{Machine, MachineError, MachineState, Snapshot, StdMachine};
