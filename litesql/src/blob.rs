//!
//! Incremental Blob I/O
//!
//! A `Blob` reads and writes one BLOB cell in place, by byte offset,
//! without loading the whole value. Its size is fixed at the time the
//! row was written; reserve space with `ZeroBlob` and fill it later.
//!

use std::ffi::CString;
use std::fmt;
use std::mem::ManuallyDrop;
use std::ptr::{self, NonNull};

use libc::c_int;
use libsqlite3_sys as ffi;
use tracing::{debug, warn};

use crate::connection::Connection;
use crate::errors::{check, Error, ErrorKind, Result};

pub struct Blob<'conn> {
    blob: NonNull<ffi::sqlite3_blob>,
    conn: &'conn Connection,
}

impl Connection {
    /// Open the BLOB stored in `table.column` of row `rowid` in the main
    /// database.
    pub fn open_blob(
        &self,
        table: &str,
        column: &str,
        rowid: i64,
        writable: bool,
    ) -> Result<Blob<'_>> {
        let c_table = CString::new(table)?;
        let c_column = CString::new(column)?;
        let mut blob: *mut ffi::sqlite3_blob = ptr::null_mut();

        let rc = unsafe {
            ffi::sqlite3_blob_open(
                self.handle(),
                c"main".as_ptr(),
                c_table.as_ptr(),
                c_column.as_ptr(),
                rowid,
                c_int::from(writable),
                &mut blob,
            )
        };
        unsafe { check(rc, self.handle())? };

        let Some(blob) = NonNull::new(blob) else {
            return Err(Error::with_message(
                ErrorKind::NoMem,
                "sqlite3_blob_open returned a null handle",
            ));
        };

        debug!(table, column, rowid, writable, "Opened blob");
        Ok(Blob { blob, conn: self })
    }
}

impl Blob<'_> {
    /// Size of the BLOB in bytes.
    pub fn len(&self) -> usize {
        unsafe { ffi::sqlite3_blob_bytes(self.blob.as_ptr()) as usize }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Fill `buf` from the BLOB starting at `offset`. Reading past the end
    /// fails with `ErrorKind::Error` and leaves `buf` unspecified.
    pub fn read_at(&self, buf: &mut [u8], offset: usize) -> Result<()> {
        let (len, offset) = self.span(buf.len(), offset)?;
        let rc = unsafe {
            ffi::sqlite3_blob_read(self.blob.as_ptr(), buf.as_mut_ptr().cast(), len, offset)
        };
        unsafe { check(rc, self.conn.handle()) }
    }

    /// Overwrite bytes starting at `offset`. Writes cannot grow the BLOB;
    /// writing past the end fails with `ErrorKind::Error`. A write to a
    /// read-only handle fails with `ErrorKind::ReadOnly`.
    pub fn write_at(&mut self, data: &[u8], offset: usize) -> Result<()> {
        let (len, offset) = self.span(data.len(), offset)?;
        let rc = unsafe {
            ffi::sqlite3_blob_write(self.blob.as_ptr(), data.as_ptr().cast(), len, offset)
        };
        unsafe { check(rc, self.conn.handle()) }
    }

    /// Point this handle at another row of the same table and column.
    ///
    /// On failure the handle is left aborted; any further read or write
    /// fails with `ErrorKind::Abort`.
    pub fn reopen(&mut self, rowid: i64) -> Result<()> {
        let rc = unsafe { ffi::sqlite3_blob_reopen(self.blob.as_ptr(), rowid) };
        unsafe { check(rc, self.conn.handle()) }
    }

    /// Close the handle, reporting any error from committing a write.
    pub fn close(self) -> Result<()> {
        let this = ManuallyDrop::new(self);
        let rc = unsafe { ffi::sqlite3_blob_close(this.blob.as_ptr()) };
        unsafe { check(rc, this.conn.handle()) }
    }

    fn span(&self, len: usize, offset: usize) -> Result<(c_int, c_int)> {
        match (c_int::try_from(len), c_int::try_from(offset)) {
            (Ok(len), Ok(offset)) => Ok((len, offset)),
            _ => Err(Error::with_message(
                ErrorKind::TooBig,
                "blob offset or length exceeds the engine's limit",
            )),
        }
    }
}

impl fmt::Debug for Blob<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Blob").field("len", &self.len()).finish_non_exhaustive()
    }
}

impl Drop for Blob<'_> {
    fn drop(&mut self) {
        let rc = unsafe { ffi::sqlite3_blob_close(self.blob.as_ptr()) };
        if rc != ffi::SQLITE_OK {
            warn!(code = rc, "Failed to close blob on drop");
        }
    }
}
