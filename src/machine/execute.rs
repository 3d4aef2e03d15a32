//! Execution engine.
//!
//! Implements the fetch-decode-execute cycle and all instruction behaviors.

use crate::machine::decode::{self, DecodeError, Instruction, Opcode};
use crate::machine::memory::{Memory, SegmentError, SegmentId, Word};
use crate::machine::registers::{ProgramCounter, Registers};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io::{self, BufWriter, Read, StdinLock, StdoutLock, Write};
use thiserror::Error;
use tracing::{debug, trace};

/// Machine execution state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MachineState {
    /// Fetching and executing instructions.
    Running,
    /// A halt instruction ran; memory has been released.
    Halted,
    /// A checked error aborted the run.
    Faulted,
}

/// What the dispatcher does with the program counter after an instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    Advance,
    Jumped,
    Stop,
}

/// A machine wired to the console.
pub type StdMachine = Machine<StdinLock<'static>, BufWriter<StdoutLock<'static>>>;

/// The Universal Machine.
pub struct Machine<R, W> {
    /// General-purpose registers.
    pub regs: Registers,
    /// Segmented memory; segment 0 is the program.
    pub mem: Memory,
    /// Next instruction to fetch.
    pub pc: ProgramCounter,
    /// Current execution state.
    pub state: MachineState,
    /// Instructions executed so far.
    pub cycles: u64,
    opcode_counts: [u64; Opcode::COUNT],
    peak_segments: usize,
    // Segment counts as they stood when halt released memory.
    at_halt: Option<SegmentTally>,
    last_instr: Option<Instruction>,
    input: R,
    output: W,
}

impl StdMachine {
    /// A machine reading stdin and writing stdout.
    pub fn with_stdio(program: Vec<Word>) -> Self {
        Machine::new(program, io::stdin().lock(), BufWriter::new(io::stdout().lock()))
    }
}

impl<R: Read, W: Write> Machine<R, W> {
    /// A machine with `program` in segment 0, zeroed registers and the
    /// program counter at the first word.
    pub fn new(program: Vec<Word>, input: R, output: W) -> Self {
        Self {
            regs: Registers::new(),
            mem: Memory::with_program(program),
            pc: ProgramCounter::default(),
            state: MachineState::Running,
            cycles: 0,
            opcode_counts: [0; Opcode::COUNT],
            peak_segments: 1,
            at_halt: None,
            last_instr: None,
            input,
            output,
        }
    }

    /// Execute a single instruction.
    ///
    /// Returns the instruction that was executed. Any error leaves the
    /// machine faulted with the program counter on the failing instruction.
    pub fn step(&mut self) -> Result<Instruction, MachineError> {
        if self.state != MachineState::Running {
            return Err(MachineError::NotRunning(self.state));
        }

        match self.cycle() {
            Ok(instr) => Ok(instr),
            Err(e) => {
                self.state = MachineState::Faulted;
                // Keep whatever the program printed before failing.
                let _ = self.output.flush();
                Err(e)
            }
        }
    }

    fn cycle(&mut self) -> Result<Instruction, MachineError> {
        // Fetch
        let pc = self.pc;
        let word = self.mem.read(pc.segment, pc.index)?;

        // Decode
        let instr = decode::decode(word)?;
        trace!("{} {:08x}  {}", pc, word, instr);

        // Execute
        match self.execute(instr)? {
            Flow::Advance => self.pc.advance(),
            Flow::Jumped | Flow::Stop => {}
        }

        self.cycles += 1;
        self.opcode_counts[instr.opcode() as usize] += 1;
        self.last_instr = Some(instr);

        Ok(instr)
    }

    /// Run until halt or error.
    ///
    /// Returns the number of instructions executed.
    pub fn run(&mut self) -> Result<u64, MachineError> {
        let start_cycles = self.cycles;

        while self.state == MachineState::Running {
            self.step()?;
        }

        Ok(self.cycles - start_cycles)
    }

    /// Run for at most `max_cycles` instructions.
    pub fn run_limited(&mut self, max_cycles: u64) -> Result<u64, MachineError> {
        let start_cycles = self.cycles;
        let limit = self.cycles.saturating_add(max_cycles);

        while self.state == MachineState::Running && self.cycles < limit {
            self.step()?;
        }

        if self.state == MachineState::Running {
            self.output.flush()?;
        }

        Ok(self.cycles - start_cycles)
    }

    /// Execute a decoded instruction.
    fn execute(&mut self, instr: Instruction) -> Result<Flow, MachineError> {
        let regs = &mut self.regs;

        match instr {
            Instruction::CondMove { a, b, c } => {
                if regs.get(c) != 0 {
                    regs.set(a, regs.get(b));
                }
            }

            Instruction::SegLoad { a, b, c } => {
                let value = self.mem.read(SegmentId::from(regs.get(b)), regs.get(c))?;
                regs.set(a, value);
            }

            Instruction::SegStore { a, b, c } => {
                self.mem.write(SegmentId::from(regs.get(a)), regs.get(b), regs.get(c))?;
            }

            Instruction::Add { a, b, c } => {
                regs.set(a, regs.get(b).wrapping_add(regs.get(c)));
            }

            Instruction::Mul { a, b, c } => {
                regs.set(a, regs.get(b).wrapping_mul(regs.get(c)));
            }

            Instruction::Div { a, b, c } => {
                let quotient = regs
                    .get(b)
                    .checked_div(regs.get(c))
                    .ok_or(MachineError::DivisionByZero)?;
                regs.set(a, quotient);
            }

            Instruction::Nand { a, b, c } => {
                regs.set(a, !(regs.get(b) & regs.get(c)));
            }

            Instruction::Halt => {
                self.halt()?;
                return Ok(Flow::Stop);
            }

            Instruction::Map { b, c } => {
                let id = self.mem.map(regs.get(c))?;
                regs.set(b, id.raw());
                self.peak_segments = self.peak_segments.max(self.mem.live_count());
            }

            Instruction::Unmap { c } => {
                self.mem.unmap(SegmentId::from(regs.get(c)))?;
            }

            Instruction::Output { c } => {
                let value = regs.get(c);
                let byte = u8::try_from(value).map_err(|_| MachineError::OutputOutOfRange(value))?;
                self.output.write_all(&[byte])?;
            }

            Instruction::Input { c } => {
                // Anything already printed must be visible before we block.
                self.output.flush()?;
                let value = match read_byte(&mut self.input)? {
                    Some(byte) => byte as Word,
                    None => Word::MAX,
                };
                regs.set(c, value);
            }

            Instruction::LoadProgram { b, c } => {
                let source = SegmentId::from(regs.get(b));
                let target = regs.get(c);
                self.mem.install_as_program(source)?;
                if source != SegmentId::PROGRAM {
                    debug!(from = source.raw(), entry = target, "load program");
                }
                self.pc.jump(target);
                return Ok(Flow::Jumped);
            }

            Instruction::LoadImmediate { a, value } => {
                regs.set(a, value);
            }
        }

        Ok(Flow::Advance)
    }

    /// Stop the machine and release its memory.
    ///
    /// Calling it on a machine that is already halted does nothing.
    pub fn halt(&mut self) -> Result<(), MachineError> {
        if self.state == MachineState::Halted {
            return Ok(());
        }
        self.state = MachineState::Halted;
        self.at_halt = Some(SegmentTally::of(&self.mem));
        self.mem.release();
        self.output.flush()?;
        debug!(cycles = self.cycles, "halt");
        Ok(())
    }

    /// Get the last executed instruction.
    pub fn last_instruction(&self) -> Option<Instruction> {
        self.last_instr
    }

    /// Check if the machine is halted.
    pub fn is_halted(&self) -> bool {
        self.state == MachineState::Halted
    }

    /// Check if the machine is running.
    pub fn is_running(&self) -> bool {
        self.state == MachineState::Running
    }

    /// How many times each opcode has executed.
    pub fn opcode_count(&self, op: Opcode) -> u64 {
        self.opcode_counts[op as usize]
    }

    /// A serializable summary of the machine.
    pub fn snapshot(&self) -> Snapshot {
        let opcode_counts = Opcode::ALL
            .iter()
            .filter(|op| self.opcode_counts[**op as usize] > 0)
            .map(|op| (op.mnemonic(), self.opcode_counts[*op as usize]))
            .collect();
        let tally = self.at_halt.unwrap_or_else(|| SegmentTally::of(&self.mem));

        Snapshot {
            state: self.state,
            cycles: self.cycles,
            pc: self.pc,
            registers: self.regs.clone(),
            program_words: tally.program_words,
            live_segments: tally.live,
            free_segments: tally.free,
            peak_segments: self.peak_segments,
            opcode_counts,
        }
    }

    /// The output sink.
    pub fn output(&self) -> &W {
        &self.output
    }

    /// Consume the machine, returning its output sink.
    pub fn into_output(self) -> W {
        self.output
    }
}

#[derive(Debug, Clone, Copy)]
struct SegmentTally {
    program_words: usize,
    live: usize,
    free: usize,
}

impl SegmentTally {
    fn of(mem: &Memory) -> Self {
        Self {
            program_words: mem.program().len(),
            live: mem.live_count(),
            free: mem.free_count(),
        }
    }
}

/// Read one byte, `None` at end of input.
fn read_byte<R: Read>(input: &mut R) -> io::Result<Option<u8>> {
    let mut buf = [0u8; 1];
    loop {
        match input.read(&mut buf) {
            Ok(0) => return Ok(None),
            Ok(_) => return Ok(Some(buf[0])),
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
}

impl<R, W> std::fmt::Debug for Machine<R, W> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Machine")
            .field("state", &self.state)
            .field("cycles", &self.cycles)
            .field("pc", &self.pc)
            .field("regs", &self.regs)
            .field("mem", &self.mem)
            .finish()
    }
}

/// Machine state summary, printed by `--stats`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Snapshot {
    pub state: MachineState,
    pub cycles: u64,
    pub pc: ProgramCounter,
    pub registers: Registers,
    pub program_words: usize,
    pub live_segments: usize,
    pub free_segments: usize,
    pub peak_segments: usize,
    pub opcode_counts: BTreeMap<&'static str, u64>,
}

/// Errors that can occur during execution.
#[derive(Debug, Error)]
pub enum MachineError {
    #[error("machine not running: {0:?}")]
    NotRunning(MachineState),

    #[error("memory error: {0}")]
    Memory(#[from] SegmentError),

    #[error("decode error: {0}")]
    Decode(#[from] DecodeError),

    #[error("division by zero")]
    DivisionByZero,

    #[error("output value {0} out of range (0-255)")]
    OutputOutOfRange(Word),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}
