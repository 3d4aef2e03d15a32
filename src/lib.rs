//! # Universal Machine Emulator
//!
//! An emulator for the 32-bit Universal Machine: eight registers, a
//! segmented memory whose segment 0 holds the running program, and
//! fourteen instructions packed into 32-bit words.
//!
//! ```
//! use um::Machine;
//!
//! // li r0, 'H'; out r0; li r0, '\n'; out r0; halt
//! let program = vec![0xD000_0048, 0xA000_0000, 0xD000_000A, 0xA000_0000, 0x7000_0000];
//! let mut machine = Machine::new(program, std::io::empty(), Vec::new());
//! machine.run().unwrap();
//! assert_eq!(machine.into_output(), b"H\n");
//! ```

pub mod bitpack;
pub mod machine;
pub mod loader;

// Re-export commonly used types
pub use bitpack::{extract_unsigned, insert_unsigned};
pub use machine::{Instruction, Machine, MachineError, MachineState, Memory, Opcode, Registers, SegmentId, Word};
pub use loader::{load_program, pack_words, read_program, LoadError};
