//! Universal Machine Emulator - CLI Entry Point
//!
//! `um-emu <program>` loads a program file into segment 0 and runs it with
//! stdin and stdout attached to the machine's input and output. Everything
//! the emulator itself reports goes to stderr.

use clap::Parser;
use std::io::{Read, Write};
use std::process::ExitCode;
use tracing::{info, Level};
use um::machine::StdMachine;
use um::{Machine, Word};

#[derive(Parser)]
#[command(name = "um-emu")]
#[command(version)]
#[command(about = "An emulator for the 32-bit segmented-memory Universal Machine")]
struct Cli {
    /// Path to the program file to execute
    program: String,

    /// Log every executed instruction to stderr
    #[arg(short, long)]
    trace: bool,

    /// Log segment lifecycle and loading details to stderr
    #[arg(short, long)]
    verbose: bool,

    /// Stop after this many instructions
    #[arg(long)]
    max_cycles: Option<u64>,

    /// Print a JSON summary of the machine to stderr when the run ends
    #[arg(long)]
    stats: bool,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    init_tracing(if cli.trace {
        Level::TRACE
    } else if cli.verbose {
        Level::DEBUG
    } else {
        Level::WARN
    });

    run_program(&cli)
}

fn init_tracing(level: Level) {
    let _ = tracing_subscriber::fmt()
        .without_time()
        .with_target(false)
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .try_init();
}

/// How a run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RunStatus {
    /// The program executed a halt instruction.
    Halted,
    /// `--max-cycles` ran out first.
    Stopped,
    /// The machine trapped on an error.
    Faulted,
    /// The program file could not be read.
    LoadFailed,
}

impl From<RunStatus> for ExitCode {
    fn from(status: RunStatus) -> Self {
        match status {
            RunStatus::Halted => ExitCode::SUCCESS,
            _ => ExitCode::FAILURE,
        }
    }
}

fn run_program(cli: &Cli) -> ExitCode {
    execute_program(cli, StdMachine::with_stdio).into()
}

/// Load the program named on the command line, build a machine around it
/// with `build`, and run it. Diagnostics and `--stats` go to stderr.
fn execute_program<R, W, F>(cli: &Cli, build: F) -> RunStatus
where
    R: Read,
    W: Write,
    F: FnOnce(Vec<Word>) -> Machine<R, W>,
{
    let program = match um::load_program(&cli.program) {
        Ok(words) => words,
        Err(e) => {
            eprintln!("um-emu: failed to load program: {}", e);
            return RunStatus::LoadFailed;
        }
    };
    info!(path = %cli.program, words = program.len(), "loaded program");

    let mut machine = build(program);

    let result = match cli.max_cycles {
        Some(limit) => machine.run_limited(limit),
        None => machine.run(),
    };

    if cli.stats {
        match serde_json::to_string_pretty(&machine.snapshot()) {
            Ok(json) => eprintln!("{}", json),
            Err(e) => eprintln!("um-emu: cannot render stats: {}", e),
        }
    }

    match result {
        Ok(cycles) if machine.is_halted() => {
            info!(cycles, "halted");
            RunStatus::Halted
        }
        Ok(cycles) => {
            eprintln!("um-emu: stopped after {} instructions without halting (--max-cycles)", cycles);
            RunStatus::Stopped
        }
        Err(e) => {
            eprintln!("um-emu: fatal error at {}: {}", machine.pc, e);
            RunStatus::Faulted
        }
    }
}
