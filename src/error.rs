//! Crate-wide error type and the small in-progress result tag the
//! reconstructor's dispatch loop uses internally.

use thiserror::Error;

/// A 0-based `(line, col)` position, as carried by position-bearing IR
/// operands (`arg2`/`arg3`) and by lexer tokens.
///
/// `NONE` is the sentinel used wherever the spec calls a position
/// "optional": many `Expr` fields would otherwise need `Option<Pos>`
/// scattered through every match arm that only cares whether a position
/// was supplied at all.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Pos {
    pub line: i32,
    pub col: i32,
}

impl Pos {
    pub const NONE: Pos = Pos { line: -1, col: -1 };

    pub fn new(line: i32, col: i32) -> Self {
        Self { line, col }
    }

    pub fn is_none(&self) -> bool {
        *self == Self::NONE
    }
}

/// Top-level crate error. Every fallible library operation returns
/// `Result<T, AelError>`; the driver is the only place that turns one of
/// these into a process exit code and a stderr line (§7 propagation
/// policy: components never log or print directly).
#[derive(Debug, Error)]
pub enum AelError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("IR parse error at line {line}: {message}")]
    IrParse { line: usize, message: String },

    #[error("unsupported construct at IR index {ir_index}: {message}")]
    TemplateFatal { ir_index: usize, message: String },

    #[error("stack underflow at IR index {ir_index} (OP={op}, stack depth {depth})")]
    StackUnderflow {
        ir_index: usize,
        op: i32,
        depth: usize,
    },

    #[error("out of memory")]
    OutOfMemory,

    #[error("usage error: {0}")]
    Usage(String),
}

/// The tagged result each reconstructor handler returns (spec §4.5, §7).
///
/// Deliberately distinct from `AelError`: `NotHandled` is not a failure,
/// it just means "try the next handler in the dispatch chain". Only
/// `Fail`/`Oom`/`FailEmit` are converted into an `AelError` by the
/// top-level scan loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Handled {
    NotHandled,
    Handled,
    Fail(String),
    Oom,
    FailEmit,
}

impl Handled {
    pub fn is_handled(&self) -> bool {
        matches!(self, Handled::Handled)
    }
}

/// Why a requested `emit_at` position could not be honored (spec §4.1,
/// §7 item 4). Recorded, never fatal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EmitFailReason {
    #[default]
    None,
    BackwardLine,
    BackwardCol,
    Io,
}
