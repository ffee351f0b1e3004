//! Assembler diagnostic kinds. Every variant carries the source byte range its message
//! should underline.

use std::ops::Range;

use thiserror::Error;

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ErrorKind {
    #[error("expected {expected}, got {got}")]
    ExpectedToken { expected: &'static str, got: String },
    #[error("unknown instruction mnemonic")]
    UnknownMnemonic,
    #[error("shift amount must fit in 6 bits (0..=63)")]
    ShiftAmountOverflow,
    #[error("immediate must fit in a signed 12-bit field")]
    ImmediateOverflow,
    #[error("MOVZ/MOVK immediate must fit in 16 bits")]
    MovImmediateOverflow,
    #[error("MOVZ/MOVK shift must be one of 0, 16, 32, 48")]
    MovShiftOverflow,
    #[error("MOVZ/MOVK shift must be introduced with LSL")]
    MovNoLsl,
    #[error("load/store offset must fit in an unsigned 9-bit field")]
    LoadStoreOffsetOverflow,
    #[error("branch target is too far for this encoding (relocations are not implemented)")]
    UnimplementedFarJump,
    #[error("label cannot contain '.'")]
    DotLabel,
    #[error("unexpected token {0}")]
    UnexpectedToken(String),
    #[error("label '{0}' is already defined")]
    DuplicateLabelName(String),
    #[error("label '{0}' is undefined")]
    UndefinedLabel(String),
    #[error("label name is empty")]
    EmptyLabel,
}

/// One recorded diagnostic: a kind plus the span it applies to. Assembly recovers
/// after each error, so many of these can accumulate from a single run.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AssemblerError {
    pub kind: ErrorKind,
    pub span: Range<usize>,
}

impl AssemblerError {
    pub fn new(kind: ErrorKind, span: Range<usize>) -> Self {
        AssemblerError { kind, span }
    }
}

impl std::fmt::Display for AssemblerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.kind)
    }
}

impl std::error::Error for AssemblerError {}
