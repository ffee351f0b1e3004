//! VM exception kinds, modelled after an exception syndrome register.

use std::fmt;

use crate::Address;

/// Which direction a faulting memory access was going.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum AccessKind {
    Load,
    Store,
}

impl fmt::Display for AccessKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            AccessKind::Load => "load",
            AccessKind::Store => "store",
        })
    }
}

/// Why a `bkpt` exception was raised.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum BreakKind {
    Halt,
    Dump,
    Debugger,
}

impl fmt::Display for BreakKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            BreakKind::Halt => "halt",
            BreakKind::Dump => "dump",
            BreakKind::Debugger => "debugger",
        })
    }
}

/// The ten exception kinds a running program can raise.
#[derive(Clone, Copy, PartialEq, Debug)]
pub enum ExceptionKind {
    /// Placeholder, never raised by this interpreter directly.
    Unknown,
    /// FP register disabled. Unused in this dialect; reserved for parity with the
    /// syndrome register this model is taken from.
    Simd,
    /// Illegal execution state.
    Ies,
    /// Supervisor call. Unused: this ISA has no `SVC`.
    Sys,
    /// Undecodable word, illegal operand, or a mis-targeted `BR`.
    Instr,
    /// PC went negative or past text on a branch.
    Pc,
    /// Memory access to a reserved region, or out-of-range within a region.
    Data { kind: AccessKind, addr: Address },
    /// Integer or floating-point division by zero.
    FpeDivisionByZero,
    /// Watchpoint. Unused in this core; reserved for a surrounding debugger.
    Wpt,
    /// `HALT`, `DUMP`, or a debugger-triggered break.
    Bkpt(BreakKind),
}

impl fmt::Display for ExceptionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExceptionKind::Unknown => write!(f, "unknown exception"),
            ExceptionKind::Simd => write!(f, "SIMD/FP register disabled"),
            ExceptionKind::Ies => write!(f, "illegal execution state"),
            ExceptionKind::Sys => write!(f, "supervisor call"),
            ExceptionKind::Instr => write!(f, "illegal instruction"),
            ExceptionKind::Pc => write!(f, "program counter out of range"),
            ExceptionKind::Data { kind, addr } => {
                write!(f, "data abort: {kind} at 0x{addr:016X}")
            }
            ExceptionKind::FpeDivisionByZero => {
                write!(f, "floating-point exception: division by zero")
            }
            ExceptionKind::Wpt => write!(f, "watchpoint"),
            ExceptionKind::Bkpt(kind) => write!(f, "breakpoint exception: reached {kind}"),
        }
    }
}

/// A raised exception together with the program counter it was raised at.
#[derive(Clone, Copy, PartialEq, Debug)]
pub struct Exception {
    pub kind: ExceptionKind,
    pub pc: u64,
}

impl fmt::Display for Exception {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (pc={})", self.kind, self.pc)
    }
}
