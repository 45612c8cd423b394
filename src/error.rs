use std::{error::Error, fmt};

use backtrace::Backtrace;

/// The failure categories surfaced by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// A wait-for cycle was observed while acquiring a latch, and the
    /// requesting transaction was chosen as the victim. The caller is
    /// expected to abort the transaction.
    DeadlockAborted,

    /// Every buffer slot holds a dirty page, so no slot can be freed
    /// without breaking the NO-STEAL policy.
    NoEvictablePage,

    /// An i/o failure against a table file or the log file.
    Io,

    /// A caller broke an api contract (released a latch it doesn't
    /// hold, requested a page outside the file, etc).
    InvariantViolation,
}

pub struct SmallError {
    kind: ErrorKind,
    details: String,
    backtrace: Backtrace,
}

impl SmallError {
    pub fn new(kind: ErrorKind, msg: &str) -> SmallError {
        SmallError {
            kind,
            details: msg.to_string(),
            backtrace: Backtrace::new(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn show_backtrace(&self) {
        log::error!("{}\nbacktrace:\n{:?}", self, self.backtrace);
    }
}

impl fmt::Display for SmallError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{:?}: {}", self.kind, self.details)
    }
}

impl fmt::Debug for SmallError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self)
    }
}

impl Error for SmallError {}

impl From<std::io::Error> for SmallError {
    fn from(e: std::io::Error) -> Self {
        SmallError::new(ErrorKind::Io, &e.to_string())
    }
}
