//!
//! SQLite Error Types
//!
//! Maps SQLite integer result codes onto a closed `ErrorKind` taxonomy and
//! defines the crate-wide `Error` type.
//!
//! ## Result Codes
//!
//! Every primary result code SQLite publishes, other than `SQLITE_OK`,
//! `SQLITE_ROW` and `SQLITE_DONE`, has exactly one `ErrorKind`. Extended
//! codes (e.g. `SQLITE_CONSTRAINT_UNIQUE`) are reduced to their primary
//! byte for the kind; the raw code is kept on the error for callers that
//! need it.
//!
//! `SQLITE_ROW` and `SQLITE_DONE` are step outcomes, never errors. A code
//! outside the published list means this table is out of date with the
//! linked SQLite and panics.
//!

use std::ffi::CStr;
use std::fmt;
use std::path::PathBuf;

use libc::c_int;
use libsqlite3_sys as ffi;
use thiserror::Error;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Error,
    Internal,
    Perm,
    Abort,
    Busy,
    Locked,
    NoMem,
    ReadOnly,
    Interrupt,
    IoErr,
    Corrupt,
    NotFound,
    Full,
    CantOpen,
    Protocol,
    Empty,
    Schema,
    TooBig,
    Constraint,
    Mismatch,
    Misuse,
    NoLfs,
    Auth,
    Format,
    Range,
    NotADb,
    Notice,
    Warning,
}

impl ErrorKind {
    pub const ALL: [ErrorKind; 28] = [
        ErrorKind::Error,
        ErrorKind::Internal,
        ErrorKind::Perm,
        ErrorKind::Abort,
        ErrorKind::Busy,
        ErrorKind::Locked,
        ErrorKind::NoMem,
        ErrorKind::ReadOnly,
        ErrorKind::Interrupt,
        ErrorKind::IoErr,
        ErrorKind::Corrupt,
        ErrorKind::NotFound,
        ErrorKind::Full,
        ErrorKind::CantOpen,
        ErrorKind::Protocol,
        ErrorKind::Empty,
        ErrorKind::Schema,
        ErrorKind::TooBig,
        ErrorKind::Constraint,
        ErrorKind::Mismatch,
        ErrorKind::Misuse,
        ErrorKind::NoLfs,
        ErrorKind::Auth,
        ErrorKind::Format,
        ErrorKind::Range,
        ErrorKind::NotADb,
        ErrorKind::Notice,
        ErrorKind::Warning,
    ];

    /// Map a result code to its kind.
    ///
    /// Returns `None` for `SQLITE_OK`, `SQLITE_ROW` and `SQLITE_DONE`.
    /// Panics on a primary code SQLite does not publish.
    pub fn from_code(code: c_int) -> Option<ErrorKind> {
        let kind = match code & 0xff {
            ffi::SQLITE_OK | ffi::SQLITE_ROW | ffi::SQLITE_DONE => return None,
            ffi::SQLITE_ERROR => ErrorKind::Error,
            ffi::SQLITE_INTERNAL => ErrorKind::Internal,
            ffi::SQLITE_PERM => ErrorKind::Perm,
            ffi::SQLITE_ABORT => ErrorKind::Abort,
            ffi::SQLITE_BUSY => ErrorKind::Busy,
            ffi::SQLITE_LOCKED => ErrorKind::Locked,
            ffi::SQLITE_NOMEM => ErrorKind::NoMem,
            ffi::SQLITE_READONLY => ErrorKind::ReadOnly,
            ffi::SQLITE_INTERRUPT => ErrorKind::Interrupt,
            ffi::SQLITE_IOERR => ErrorKind::IoErr,
            ffi::SQLITE_CORRUPT => ErrorKind::Corrupt,
            ffi::SQLITE_NOTFOUND => ErrorKind::NotFound,
            ffi::SQLITE_FULL => ErrorKind::Full,
            ffi::SQLITE_CANTOPEN => ErrorKind::CantOpen,
            ffi::SQLITE_PROTOCOL => ErrorKind::Protocol,
            ffi::SQLITE_EMPTY => ErrorKind::Empty,
            ffi::SQLITE_SCHEMA => ErrorKind::Schema,
            ffi::SQLITE_TOOBIG => ErrorKind::TooBig,
            ffi::SQLITE_CONSTRAINT => ErrorKind::Constraint,
            ffi::SQLITE_MISMATCH => ErrorKind::Mismatch,
            ffi::SQLITE_MISUSE => ErrorKind::Misuse,
            ffi::SQLITE_NOLFS => ErrorKind::NoLfs,
            ffi::SQLITE_AUTH => ErrorKind::Auth,
            ffi::SQLITE_FORMAT => ErrorKind::Format,
            ffi::SQLITE_RANGE => ErrorKind::Range,
            ffi::SQLITE_NOTADB => ErrorKind::NotADb,
            ffi::SQLITE_NOTICE => ErrorKind::Notice,
            ffi::SQLITE_WARNING => ErrorKind::Warning,
            other => panic!("unknown SQLite result code {} (primary {})", code, other),
        };
        Some(kind)
    }

    /// The primary result code for this kind.
    pub fn code(self) -> c_int {
        match self {
            ErrorKind::Error => ffi::SQLITE_ERROR,
            ErrorKind::Internal => ffi::SQLITE_INTERNAL,
            ErrorKind::Perm => ffi::SQLITE_PERM,
            ErrorKind::Abort => ffi::SQLITE_ABORT,
            ErrorKind::Busy => ffi::SQLITE_BUSY,
            ErrorKind::Locked => ffi::SQLITE_LOCKED,
            ErrorKind::NoMem => ffi::SQLITE_NOMEM,
            ErrorKind::ReadOnly => ffi::SQLITE_READONLY,
            ErrorKind::Interrupt => ffi::SQLITE_INTERRUPT,
            ErrorKind::IoErr => ffi::SQLITE_IOERR,
            ErrorKind::Corrupt => ffi::SQLITE_CORRUPT,
            ErrorKind::NotFound => ffi::SQLITE_NOTFOUND,
            ErrorKind::Full => ffi::SQLITE_FULL,
            ErrorKind::CantOpen => ffi::SQLITE_CANTOPEN,
            ErrorKind::Protocol => ffi::SQLITE_PROTOCOL,
            ErrorKind::Empty => ffi::SQLITE_EMPTY,
            ErrorKind::Schema => ffi::SQLITE_SCHEMA,
            ErrorKind::TooBig => ffi::SQLITE_TOOBIG,
            ErrorKind::Constraint => ffi::SQLITE_CONSTRAINT,
            ErrorKind::Mismatch => ffi::SQLITE_MISMATCH,
            ErrorKind::Misuse => ffi::SQLITE_MISUSE,
            ErrorKind::NoLfs => ffi::SQLITE_NOLFS,
            ErrorKind::Auth => ffi::SQLITE_AUTH,
            ErrorKind::Format => ffi::SQLITE_FORMAT,
            ErrorKind::Range => ffi::SQLITE_RANGE,
            ErrorKind::NotADb => ffi::SQLITE_NOTADB,
            ErrorKind::Notice => ffi::SQLITE_NOTICE,
            ErrorKind::Warning => ffi::SQLITE_WARNING,
        }
    }

    fn description(self) -> &'static str {
        match self {
            ErrorKind::Error => "SQL logic error",
            ErrorKind::Internal => "internal logic error",
            ErrorKind::Perm => "access permission denied",
            ErrorKind::Abort => "query aborted",
            ErrorKind::Busy => "database is locked",
            ErrorKind::Locked => "database table is locked",
            ErrorKind::NoMem => "out of memory",
            ErrorKind::ReadOnly => "attempt to write a readonly database",
            ErrorKind::Interrupt => "interrupted",
            ErrorKind::IoErr => "disk I/O error",
            ErrorKind::Corrupt => "database disk image is malformed",
            ErrorKind::NotFound => "unknown operation",
            ErrorKind::Full => "database or disk is full",
            ErrorKind::CantOpen => "unable to open database file",
            ErrorKind::Protocol => "locking protocol",
            ErrorKind::Empty => "empty database",
            ErrorKind::Schema => "database schema has changed",
            ErrorKind::TooBig => "string or blob too big",
            ErrorKind::Constraint => "constraint failed",
            ErrorKind::Mismatch => "datatype mismatch",
            ErrorKind::Misuse => "bad parameter or other API misuse",
            ErrorKind::NoLfs => "large file support is disabled",
            ErrorKind::Auth => "authorization denied",
            ErrorKind::Format => "auxiliary database format error",
            ErrorKind::Range => "column index out of range",
            ErrorKind::NotADb => "file is not a database",
            ErrorKind::Notice => "notification message",
            ErrorKind::Warning => "warning message",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.description())
    }
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("{message} ({kind}, code {code})")]
    Sqlite {
        kind: ErrorKind,
        code: i32,
        message: String,
    },

    #[error("String contains an interior nul byte: {0}")]
    Nul(#[from] std::ffi::NulError),

    #[error("Text value is not valid UTF-8: {0}")]
    Utf8(#[from] std::str::Utf8Error),

    #[error("Failed to parse config at {path}: {reason}")]
    Config { path: PathBuf, reason: String },

    #[error("{0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

impl Error {
    /// The engine error kind, if this error came from SQLite.
    pub fn kind(&self) -> Option<ErrorKind> {
        match self {
            Error::Sqlite { kind, .. } => Some(*kind),
            _ => None,
        }
    }

    /// True for `Busy` and `Locked`, the two kinds a caller may retry.
    pub fn is_busy(&self) -> bool {
        matches!(self.kind(), Some(ErrorKind::Busy | ErrorKind::Locked))
    }

    pub(crate) fn with_message(kind: ErrorKind, message: impl Into<String>) -> Self {
        Error::Sqlite {
            kind,
            code: kind.code(),
            message: message.into(),
        }
    }

    /// Build an error for `code`, taking the message from the connection
    /// when one is available.
    ///
    /// # Safety
    /// `db` must be null or a live connection handle.
    pub(crate) unsafe fn from_code(code: c_int, db: *mut ffi::sqlite3) -> Self {
        let kind = match ErrorKind::from_code(code) {
            Some(kind) => kind,
            None => panic!("result code {} is not an error", code),
        };
        let message = unsafe {
            let raw = if db.is_null() {
                ffi::sqlite3_errstr(code)
            } else {
                ffi::sqlite3_errmsg(db)
            };
            if raw.is_null() {
                kind.to_string()
            } else {
                CStr::from_ptr(raw).to_string_lossy().into_owned()
            }
        };
        Error::Sqlite {
            kind,
            code,
            message,
        }
    }
}

/// Turn a result code into `Ok(())` or the mapped error.
///
/// # Safety
/// `db` must be null or a live connection handle.
pub(crate) unsafe fn check(code: c_int, db: *mut ffi::sqlite3) -> Result<()> {
    if code == ffi::SQLITE_OK {
        Ok(())
    } else {
        Err(unsafe { Error::from_code(code, db) })
    }
}
