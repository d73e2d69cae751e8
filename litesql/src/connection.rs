//!
//! SQLite Connection
//!
//! `Connection` owns exactly one `sqlite3*` handle. It is opened once and
//! closed once: either explicitly through `close()`, which reports the
//! result, or implicitly on drop, which logs it.
//!
//! Statements and blob handles borrow the connection, so the compiler
//! guarantees they are all finalized before `close()` can consume it.
//!
//! ## Threading
//!
//! A `Connection` is neither `Send` nor `Sync`. SQLite serializes calls on
//! one connection, but a connection and the statements derived from it are
//! not safe for unsynchronized use from several threads. Open one
//! connection per worker thread.
//!

use std::ffi::{CStr, CString};
use std::fmt;
use std::mem::ManuallyDrop;
use std::ptr::{self, NonNull};

use libc::c_char;
use libsqlite3_sys as ffi;
use tracing::{debug, warn};

use crate::config::{DatabaseConfig, OpenFlags};
use crate::errors::{check, Error, ErrorKind, Result};
use crate::statement::Statement;

pub struct Connection {
    db: NonNull<ffi::sqlite3>,
}

impl Connection {
    /// Open the database at `path`.
    ///
    /// The path is always interpreted as a URI when it starts with
    /// `file:`. When `flags.wal` is set the journal is switched to WAL
    /// before returning.
    pub fn open(path: &str, flags: OpenFlags) -> Result<Self> {
        let c_path = CString::new(path)?;
        let mut db: *mut ffi::sqlite3 = ptr::null_mut();
        let rc = unsafe {
            ffi::sqlite3_open_v2(c_path.as_ptr(), &mut db, flags.to_raw(), ptr::null())
        };

        if rc != ffi::SQLITE_OK {
            let err = unsafe { Error::from_code(rc, db) };
            if !db.is_null() {
                unsafe {
                    ffi::sqlite3_close(db);
                }
            }
            return Err(err);
        }

        let Some(db) = NonNull::new(db) else {
            return Err(Error::with_message(
                ErrorKind::NoMem,
                "sqlite3_open_v2 returned a null handle",
            ));
        };

        unsafe {
            ffi::sqlite3_extended_result_codes(db.as_ptr(), 1);
        }

        let conn = Connection { db };
        if flags.wal {
            conn.exec("PRAGMA journal_mode=WAL")?;
        }

        debug!(
            path,
            read_write = flags.read_write,
            wal = flags.wal,
            "Opened database"
        );
        Ok(conn)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::open(":memory:", OpenFlags::default())
    }

    pub fn open_config(config: &DatabaseConfig) -> Result<Self> {
        let conn = Self::open(&config.path, config.flags)?;
        if let Some(ms) = config.busy_timeout_ms {
            conn.busy_timeout(ms)?;
        }
        Ok(conn)
    }

    /// Close the connection.
    ///
    /// The handle is gone after this call whatever the outcome. If SQLite
    /// refuses the close, the error is returned and the handle is handed
    /// to `sqlite3_close_v2`, which releases it once nothing references it.
    pub fn close(self) -> Result<()> {
        let this = ManuallyDrop::new(self);
        let db = this.db.as_ptr();
        let rc = unsafe { ffi::sqlite3_close(db) };
        if rc == ffi::SQLITE_OK {
            debug!("Closed database");
            return Ok(());
        }

        let err = unsafe { Error::from_code(rc, db) };
        unsafe {
            ffi::sqlite3_close_v2(db);
        }
        Err(err)
    }

    /// True unless an explicit transaction is open.
    pub fn is_autocommit(&self) -> bool {
        unsafe { ffi::sqlite3_get_autocommit(self.db.as_ptr()) != 0 }
    }

    pub fn last_insert_rowid(&self) -> i64 {
        unsafe { ffi::sqlite3_last_insert_rowid(self.db.as_ptr()) }
    }

    /// Message for the most recent failed call on this connection.
    ///
    /// SQLite's buffer is overwritten by the next call, so the text is
    /// copied out.
    pub fn last_error(&self) -> String {
        unsafe {
            let msg = ffi::sqlite3_errmsg(self.db.as_ptr());
            if msg.is_null() {
                String::new()
            } else {
                CStr::from_ptr(msg).to_string_lossy().into_owned()
            }
        }
    }

    /// Rows modified by the most recent INSERT, UPDATE or DELETE.
    pub fn changes(&self) -> u64 {
        unsafe { ffi::sqlite3_changes(self.db.as_ptr()) as u64 }
    }

    /// Compile the first statement in `sql`. Trailing text is ignored.
    pub fn prepare(&self, sql: &str) -> Result<Statement<'_>> {
        Statement::prepare(self, sql)
    }

    /// Run every statement in `sql`, discarding any rows.
    pub fn exec(&self, sql: &str) -> Result<()> {
        let c_sql = CString::new(sql)?;
        let mut errmsg: *mut c_char = ptr::null_mut();
        let rc = unsafe {
            ffi::sqlite3_exec(
                self.db.as_ptr(),
                c_sql.as_ptr(),
                None,
                ptr::null_mut(),
                &mut errmsg,
            )
        };
        if rc == ffi::SQLITE_OK {
            return Ok(());
        }

        let mut err = unsafe { Error::from_code(rc, self.db.as_ptr()) };
        if !errmsg.is_null() {
            unsafe {
                if let Error::Sqlite { message, .. } = &mut err {
                    *message = CStr::from_ptr(errmsg).to_string_lossy().into_owned();
                }
                ffi::sqlite3_free(errmsg.cast());
            }
        }
        Err(err)
    }

    pub fn begin(&self) -> Result<()> {
        self.exec("BEGIN")
    }

    pub fn commit(&self) -> Result<()> {
        self.exec("COMMIT")
    }

    pub fn rollback(&self) -> Result<()> {
        self.exec("ROLLBACK")
    }

    /// Retry for up to `ms` milliseconds when a table is locked. Zero
    /// turns the busy handler off.
    pub fn busy_timeout(&self, ms: u32) -> Result<()> {
        let ms = ms.min(i32::MAX as u32) as i32;
        unsafe {
            let rc = ffi::sqlite3_busy_timeout(self.db.as_ptr(), ms);
            check(rc, self.db.as_ptr())
        }
    }

    /// Ask any running statement on this connection to stop at its next
    /// opportunity. The statement then fails with `ErrorKind::Interrupt`.
    pub fn interrupt(&self) {
        unsafe { ffi::sqlite3_interrupt(self.db.as_ptr()) }
    }

    pub(crate) fn handle(&self) -> *mut ffi::sqlite3 {
        self.db.as_ptr()
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("autocommit", &self.is_autocommit())
            .finish_non_exhaustive()
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        let rc = unsafe { ffi::sqlite3_close_v2(self.db.as_ptr()) };
        if rc != ffi::SQLITE_OK {
            warn!(code = rc, "Failed to close database on drop");
        }
    }
}

/// Version string of the linked SQLite library, e.g. `"3.45.0"`.
pub fn version() -> &'static str {
    unsafe {
        let raw = ffi::sqlite3_libversion();
        if raw.is_null() {
            return "";
        }
        CStr::from_ptr(raw).to_str().unwrap_or("")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_autocommit_tracks_transactions() {
        let conn = Connection::open_in_memory().unwrap();
        assert!(conn.is_autocommit());
        conn.begin().unwrap();
        assert!(!conn.is_autocommit());
        conn.commit().unwrap();
        assert!(conn.is_autocommit());

        conn.exec("BEGIN").unwrap();
        assert!(!conn.is_autocommit());
        conn.rollback().unwrap();
        assert!(conn.is_autocommit());
    }

    #[test]
    fn test_exec_and_last_insert_rowid() {
        let conn = Connection::open_in_memory().unwrap();
        conn.exec(
            "CREATE TABLE t(id INTEGER PRIMARY KEY, name TEXT);
             INSERT INTO t(name) VALUES ('a');
             INSERT INTO t(name) VALUES ('b');",
        )
        .unwrap();
        assert_eq!(conn.last_insert_rowid(), 2);

        conn.exec("UPDATE t SET name = 'c'").unwrap();
        assert_eq!(conn.changes(), 2);
    }

    #[test]
    fn test_exec_reports_engine_message() {
        let conn = Connection::open_in_memory().unwrap();
        let err = conn.exec("SELEC 1").unwrap_err();
        assert_eq!(err.kind(), Some(ErrorKind::Error));
        assert!(err.to_string().contains("syntax error"));
        assert!(conn.last_error().contains("syntax error"));
    }

    #[test]
    fn test_constraint_violation_kind() {
        let conn = Connection::open_in_memory().unwrap();
        conn.exec("CREATE TABLE t(id INTEGER PRIMARY KEY)").unwrap();
        conn.exec("INSERT INTO t VALUES (1)").unwrap();
        let err = conn.exec("INSERT INTO t VALUES (1)").unwrap_err();
        assert_eq!(err.kind(), Some(ErrorKind::Constraint));
        match err {
            Error::Sqlite { code, .. } => assert_eq!(code, ffi::SQLITE_CONSTRAINT_PRIMARYKEY),
            other => panic!("unexpected error {:?}", other),
        }
    }

    #[test]
    fn test_nul_in_path_is_rejected() {
        let err = Connection::open("bad\0path", OpenFlags::default()).unwrap_err();
        assert!(matches!(err, Error::Nul(_)));
    }

    #[test]
    fn test_open_missing_file_read_only_fails() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing.db");
        let err = Connection::open(path.to_str().unwrap(), OpenFlags::read_only()).unwrap_err();
        assert_eq!(err.kind(), Some(ErrorKind::CantOpen));
    }

    #[test]
    fn test_close_reports_ok() {
        let conn = Connection::open_in_memory().unwrap();
        conn.close().unwrap();
    }

    #[test]
    fn test_version_is_three_dot_something() {
        assert!(version().starts_with("3."));
    }

    #[test]
    fn test_debug_shows_transaction_state() {
        let conn = Connection::open_in_memory().unwrap();
        assert_eq!(format!("{:?}", conn), "Connection { autocommit: true, .. }");
        conn.begin().unwrap();
        assert_eq!(format!("{:?}", conn), "Connection { autocommit: false, .. }");
    }
}
