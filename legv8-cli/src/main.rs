//! Assembles a LEGv8 source file and runs it to completion.
//!
//! An interactive debugger REPL and an LSP front-end are plausible companion binaries
//! for this toolchain, but neither lives here: this is the thin runnable entry point
//! that wires the library crates together, nothing more.

use std::fs;
use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Parser;

use legv8::exception::ExceptionKind;
use legv8::memory::Memory;
use legv8::vm::{State, Vm};
use legv8_asm::{assemble, LabelTable};

const MAX_REPORTED_ERRORS: usize = 3;

/// Assemble and run a LEGv8 program.
#[derive(Parser, Debug)]
#[command(name = "legv8", version, about)]
struct Cli {
    /// Source file to assemble and run.
    file: PathBuf,

    /// Enable the 4096-byte zero page at address 0.
    #[arg(short = 'z', long = "zero-page")]
    zero_page: bool,

    /// Cap reported diagnostics at 3, noting how many were omitted.
    #[arg(short = 'l', long = "limit-errors")]
    limit_errors: bool,
}

fn main() -> ExitCode {
    env_logger::init();
    let cli = Cli::parse();
    match run(&cli) {
        Ok(code) => code,
        Err(err) => {
            eprintln!("error: {err:#}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: &Cli) -> Result<ExitCode> {
    let color = legv8::diagnostics::color_enabled();
    let label = cli.file.display().to_string();

    let source = fs::read_to_string(&cli.file)
        .with_context(|| format!("reading \"{}\"", cli.file.display()))?;

    let assembled = assemble(&source);
    if !assembled.errors.is_empty() {
        report_assembler_errors(&label, &source, &assembled.errors, cli.limit_errors, color);
        return Ok(ExitCode::FAILURE);
    }

    let mut bytes = Vec::with_capacity(assembled.words.len() * 4);
    for word in &assembled.words {
        bytes.extend_from_slice(&word.to_be_bytes());
    }
    let memory = Memory::new(bytes, cli.zero_page);
    let mut vm = Vm::new(memory, std::io::stdout());
    vm.run();

    match vm.state {
        State::Halted => Ok(ExitCode::SUCCESS),
        State::Faulted => {
            let exception = vm.exception.expect("Faulted implies an exception was recorded");
            report_exception(&label, &source, &assembled.spans, &assembled.labels, vm.pc, &exception.kind, color);
            Ok(ExitCode::FAILURE)
        }
        State::Running => unreachable!("Vm::run only returns once the machine stops running"),
    }
}

fn report_assembler_errors(label: &str, source: &str, errors: &[legv8_asm::AssemblerError], limit: bool, color: bool) {
    let (shown, omitted) = if limit && errors.len() > MAX_REPORTED_ERRORS {
        (&errors[..MAX_REPORTED_ERRORS], errors.len() - MAX_REPORTED_ERRORS)
    } else {
        (errors, 0)
    };
    for error in shown {
        eprintln!(
            "{}",
            legv8::diagnostics::render(
                label,
                source,
                error.span.start,
                error.span.end,
                &error.kind.to_string(),
                None,
                color,
            )
        );
    }
    if omitted > 0 {
        eprintln!("({omitted} errors omitted)");
    }
}

fn report_exception(
    label: &str,
    source: &str,
    spans: &[std::ops::Range<usize>],
    labels: &LabelTable,
    pc: u64,
    kind: &ExceptionKind,
    color: bool,
) {
    let nearest_label = labels.nearest_at_or_before(pc);
    match spans.get(pc as usize) {
        Some(span) => {
            eprintln!(
                "{}",
                legv8::diagnostics::render(label, source, span.start, span.end, &kind.to_string(), nearest_label, color)
            );
        }
        None => match nearest_label {
            Some(name) => eprintln!("{label}: {kind} (pc={pc}, near '{name}')"),
            None => eprintln!("{label}: {kind} (pc={pc})"),
        },
    }
}
