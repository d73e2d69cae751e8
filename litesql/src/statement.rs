//!
//! Prepared Statements
//!
//! A `Statement` wraps one `sqlite3_stmt*` and borrows its `Connection`.
//!
//! ## Lifecycle
//!
//! ```text
//! prepare -> (bind* -> step -> row | done)* -> finalize
//! ```
//!
//! - `step()` returns `true` while rows are available, `false` once done.
//!   Stepping a finished statement again restarts it from the first row.
//! - `reset()` rewinds for another run and keeps bound values.
//! - `clear_bindings()` sets every parameter back to NULL.
//! - `finalize()` destroys the handle and reports the last evaluation
//!   error, if any. Dropping a statement finalizes it too. Either way the
//!   statement is consumed, so it cannot be stepped afterwards.
//!
//! Column values borrowed through `get` hold a shared borrow of the
//! statement, and `step`/`reset` need a unique one, so a `&str` or `&[u8]`
//! cannot outlive the row it was read from:
//!
//! ```compile_fail
//! let conn = litesql::Connection::open_in_memory().unwrap();
//! let mut stmt = conn.prepare("SELECT 'a' UNION ALL SELECT 'b'").unwrap();
//! stmt.step().unwrap();
//! let first: &str = stmt.get(0).unwrap();
//! stmt.step().unwrap();
//! println!("{}", first);
//! ```
//!
//! ```compile_fail
//! let conn = litesql::Connection::open_in_memory().unwrap();
//! let mut stmt = conn.prepare("SELECT x'0102'").unwrap();
//! stmt.step().unwrap();
//! let bytes: &[u8] = stmt.get(0).unwrap();
//! stmt.reset().unwrap();
//! println!("{:?}", bytes);
//! ```
//!
//! Copy the value out to keep it across rows:
//!
//! ```
//! let conn = litesql::Connection::open_in_memory().unwrap();
//! let mut stmt = conn.prepare("SELECT 'a' UNION ALL SELECT 'b'").unwrap();
//! stmt.step().unwrap();
//! let first: String = stmt.get(0).unwrap();
//! stmt.step().unwrap();
//! assert_eq!(first, "a");
//! ```
//!
//! A finalized statement is gone:
//!
//! ```compile_fail
//! let conn = litesql::Connection::open_in_memory().unwrap();
//! let mut stmt = conn.prepare("SELECT 1").unwrap();
//! stmt.finalize().unwrap();
//! stmt.step().unwrap();
//! ```
//!

use std::ffi::{CStr, CString};
use std::fmt;
use std::mem::ManuallyDrop;
use std::ptr::{self, NonNull};

use libc::{c_char, c_int};
use libsqlite3_sys as ffi;
use tracing::{debug, warn};

use crate::connection::Connection;
use crate::errors::{check, Error, ErrorKind, Result};
use crate::value::{FromValue, Sink, Value, ValueKind, ValueSource};

/// Reference to a bind parameter.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Param<'a> {
    /// 1-based position.
    Index(usize),
    /// Full parameter name including its prefix, e.g. `":id"` or `"$name"`.
    Name(&'a str),
}

impl From<usize> for Param<'_> {
    fn from(index: usize) -> Self {
        Param::Index(index)
    }
}

impl<'a> From<&'a str> for Param<'a> {
    fn from(name: &'a str) -> Self {
        Param::Name(name)
    }
}

pub struct Statement<'conn> {
    stmt: NonNull<ffi::sqlite3_stmt>,
    conn: &'conn Connection,
    has_row: bool,
}

impl<'conn> Statement<'conn> {
    pub(crate) fn prepare(conn: &'conn Connection, sql: &str) -> Result<Self> {
        let len = c_int::try_from(sql.len())
            .map_err(|_| Error::with_message(ErrorKind::TooBig, "SQL text is too long"))?;
        let mut stmt: *mut ffi::sqlite3_stmt = ptr::null_mut();
        unsafe {
            let rc = ffi::sqlite3_prepare_v2(
                conn.handle(),
                sql.as_ptr() as *const c_char,
                len,
                &mut stmt,
                ptr::null_mut(),
            );
            check(rc, conn.handle())?;
        }

        // Empty or comment-only input compiles to nothing.
        let Some(stmt) = NonNull::new(stmt) else {
            return Err(Error::with_message(
                ErrorKind::Misuse,
                "SQL text contains no statement",
            ));
        };

        debug!(sql, "Prepared statement");
        Ok(Statement {
            stmt,
            conn,
            has_row: false,
        })
    }

    /// Bind `value` to the parameter at 1-based `index`.
    pub fn bind<'v>(&mut self, index: usize, value: impl Into<Value<'v>>) -> Result<()> {
        self.bind_param(Param::Index(index), value)
    }

    /// Bind `value` to the parameter called `name` (prefix included).
    pub fn bind_named<'v>(&mut self, name: &str, value: impl Into<Value<'v>>) -> Result<()> {
        self.bind_param(Param::Name(name), value)
    }

    pub fn bind_param<'v>(&mut self, param: Param<'_>, value: impl Into<Value<'v>>) -> Result<()> {
        let index = match param {
            // Out-of-range positions are left to SQLite, which answers
            // SQLITE_RANGE.
            Param::Index(index) => c_int::try_from(index).unwrap_or(0),
            Param::Name(name) => match self.parameter_index(name)? {
                Some(index) => index as c_int,
                None => {
                    return Err(Error::with_message(
                        ErrorKind::Range,
                        format!("Unknown parameter name '{}'", name),
                    ));
                }
            },
        };

        let sink = Sink::Parameter {
            stmt: self.stmt,
            index,
        };
        unsafe {
            let rc = value.into().encode(sink);
            check(rc, self.conn.handle())
        }
    }

    /// Advance to the next row. `Ok(true)` means a row is available,
    /// `Ok(false)` means the statement has finished.
    pub fn step(&mut self) -> Result<bool> {
        self.has_row = false;
        let rc = unsafe { ffi::sqlite3_step(self.stmt.as_ptr()) };
        match rc {
            ffi::SQLITE_ROW => {
                self.has_row = true;
                Ok(true)
            }
            ffi::SQLITE_DONE => Ok(false),
            _ => Err(unsafe { Error::from_code(rc, self.conn.handle()) }),
        }
    }

    /// Rewind so the statement can be stepped again. Bound values stay.
    pub fn reset(&mut self) -> Result<()> {
        self.has_row = false;
        unsafe {
            let rc = ffi::sqlite3_reset(self.stmt.as_ptr());
            check(rc, self.conn.handle())
        }
    }

    /// Set every parameter back to NULL.
    pub fn clear_bindings(&mut self) -> Result<()> {
        unsafe {
            let rc = ffi::sqlite3_clear_bindings(self.stmt.as_ptr());
            check(rc, self.conn.handle())
        }
    }

    /// Destroy the statement. The handle is released even when an error
    /// from the last evaluation is returned.
    pub fn finalize(self) -> Result<()> {
        let this = ManuallyDrop::new(self);
        let rc = unsafe { ffi::sqlite3_finalize(this.stmt.as_ptr()) };
        debug!("Finalized statement");
        unsafe { check(rc, this.conn.handle()) }
    }

    /// Decode column `column` (0-based) of the current row.
    pub fn get<'s, T: FromValue<'s>>(&'s self, column: usize) -> Result<T> {
        let source = self.column_source(column)?;
        T::from_source(source)
    }

    /// Storage class of column `column` in the current row.
    pub fn column_kind(&self, column: usize) -> Result<ValueKind> {
        Ok(self.column_source(column)?.kind())
    }

    pub fn column_count(&self) -> usize {
        unsafe { ffi::sqlite3_column_count(self.stmt.as_ptr()) as usize }
    }

    pub fn column_name(&self, column: usize) -> Option<String> {
        if column >= self.column_count() {
            return None;
        }
        unsafe {
            let name = ffi::sqlite3_column_name(self.stmt.as_ptr(), column as c_int);
            if name.is_null() {
                None
            } else {
                Some(CStr::from_ptr(name).to_string_lossy().into_owned())
            }
        }
    }

    pub fn bind_param_count(&self) -> usize {
        unsafe { ffi::sqlite3_bind_parameter_count(self.stmt.as_ptr()) as usize }
    }

    /// 1-based index of the parameter called `name`, if there is one.
    pub fn parameter_index(&self, name: &str) -> Result<Option<usize>> {
        let c_name = CString::new(name)?;
        let index =
            unsafe { ffi::sqlite3_bind_parameter_index(self.stmt.as_ptr(), c_name.as_ptr()) };
        Ok(if index > 0 { Some(index as usize) } else { None })
    }

    /// The SQL text this statement was compiled from.
    pub fn sql(&self) -> Option<&str> {
        unsafe {
            let raw = ffi::sqlite3_sql(self.stmt.as_ptr());
            if raw.is_null() {
                None
            } else {
                CStr::from_ptr(raw).to_str().ok()
            }
        }
    }

    fn column_source(&self, column: usize) -> Result<ValueSource<'_>> {
        if !self.has_row {
            return Err(Error::with_message(
                ErrorKind::Misuse,
                "no row is available; step() has not returned true",
            ));
        }
        if column >= self.column_count() {
            return Err(Error::with_message(
                ErrorKind::Range,
                format!("column index {} out of range", column),
            ));
        }
        Ok(unsafe { ValueSource::column(self.stmt, column as c_int) })
    }
}

impl fmt::Debug for Statement<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Statement")
            .field("sql", &self.sql())
            .field("has_row", &self.has_row)
            .finish_non_exhaustive()
    }
}

impl Drop for Statement<'_> {
    fn drop(&mut self) {
        let rc = unsafe { ffi::sqlite3_finalize(self.stmt.as_ptr()) };
        if rc != ffi::SQLITE_OK {
            warn!(code = rc, "Statement finalized on drop reported an error");
        }
    }
}
