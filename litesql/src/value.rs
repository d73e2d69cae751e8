//!
//! Value Codec
//!
//! Converts between native Rust values and SQLite's dynamically typed
//! values. Both directions live here and nowhere else:
//!
//! - **Encode**: `Value` is the closed set of shapes SQLite can receive.
//!   `Value::encode` is the only match over it and writes into a `Sink`,
//!   which is either a statement parameter slot or a function result.
//! - **Decode**: `FromValue` is implemented once per supported target
//!   type and reads from a `ValueSource`, which is either a statement
//!   column or a function argument.
//!
//! ## Integers
//!
//! Types that fit in 32 signed bits (`i8`, `i16`, `i32`, `u8`, `u16`) use
//! SQLite's 32-bit encoder, `i64`, `u32` and `isize` use the 64-bit one.
//! `u64`, `usize`, `i128` and `u128` have no `From` impl, so a value that
//! may need more than 64 signed bits is rejected at compile time:
//!
//! ```compile_fail
//! let _ = litesql::Value::from(1u64);
//! ```
//!
//! ```compile_fail
//! let _ = litesql::Value::from(1i128);
//! ```
//!
//! Decoding narrows with `as`: an `i64` stored value read as `i32`
//! keeps the low 32 bits. SQLite's own coercions apply before that, e.g.
//! text read as an integer goes through SQLite's numeric conversion.
//!
//! ## Borrowed text and blobs
//!
//! `&str` and `&[u8]` decoded from a column or argument point into memory
//! SQLite owns. Their lifetime is tied to the borrow of the statement or
//! argument they came from, so the compiler rejects holding one across
//! the next `step`, `reset` or `finalize`.
//!

use std::marker::PhantomData;
use std::ptr::NonNull;

use libc::{c_char, c_int, c_void};
use libsqlite3_sys as ffi;

use crate::errors::Result;

/// Storage class of a value as SQLite currently holds it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ValueKind {
    Null,
    Integer,
    Float,
    Text,
    Blob,
}

impl ValueKind {
    pub(crate) fn from_raw(raw: c_int) -> Self {
        match raw {
            ffi::SQLITE_INTEGER => ValueKind::Integer,
            ffi::SQLITE_FLOAT => ValueKind::Float,
            ffi::SQLITE_TEXT => ValueKind::Text,
            ffi::SQLITE_BLOB => ValueKind::Blob,
            _ => ValueKind::Null,
        }
    }
}

/// A blob of `len` zero bytes, allocated by SQLite.
///
/// Only valid as a bind value or a function result. Use it to reserve
/// space that is filled in later through incremental blob I/O.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ZeroBlob(pub u64);

/// A value SQLite can receive, borrowed from the caller.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Value<'a> {
    Null,
    Int32(i32),
    Int64(i64),
    Float(f64),
    Bool(bool),
    Text(&'a str),
    Blob(&'a [u8]),
    ZeroBlob(ZeroBlob),
}

impl Value<'_> {
    /// Write this value into a parameter slot or function result.
    ///
    /// Text and blob bytes are handed over with `SQLITE_TRANSIENT`, so
    /// SQLite copies them before this returns.
    ///
    /// # Safety
    /// The handle inside `sink` must be live.
    pub(crate) unsafe fn encode(&self, sink: Sink) -> c_int {
        unsafe {
            match *self {
                Value::Null => sink.null(),
                Value::Int32(v) => sink.int(v),
                Value::Int64(v) => sink.int64(v),
                Value::Float(v) => sink.double(v),
                Value::Bool(v) => sink.int(v as i32),
                Value::Text(s) => sink.text(s),
                Value::Blob(b) => sink.blob(b),
                Value::ZeroBlob(ZeroBlob(len)) => sink.zeroblob(len),
            }
        }
    }
}

macro_rules! value_from {
    ($variant:ident: $($ty:ty),+) => {
        $(
            impl From<$ty> for Value<'_> {
                fn from(v: $ty) -> Self {
                    Value::$variant(v.into())
                }
            }
        )+
    };
}

value_from!(Int32: i8, i16, i32, u8, u16);
value_from!(Int64: i64, u32);
value_from!(Float: f32, f64);
value_from!(Bool: bool);
value_from!(ZeroBlob: ZeroBlob);

impl From<isize> for Value<'_> {
    fn from(v: isize) -> Self {
        Value::Int64(v as i64)
    }
}

impl<'a> From<&'a str> for Value<'a> {
    fn from(v: &'a str) -> Self {
        Value::Text(v)
    }
}

impl<'a> From<&'a String> for Value<'a> {
    fn from(v: &'a String) -> Self {
        Value::Text(v.as_str())
    }
}

impl<'a> From<&'a [u8]> for Value<'a> {
    fn from(v: &'a [u8]) -> Self {
        Value::Blob(v)
    }
}

impl<'a, const N: usize> From<&'a [u8; N]> for Value<'a> {
    fn from(v: &'a [u8; N]) -> Self {
        Value::Blob(v.as_slice())
    }
}

impl<'a> From<&'a Vec<u8>> for Value<'a> {
    fn from(v: &'a Vec<u8>) -> Self {
        Value::Blob(v.as_slice())
    }
}

impl<'a, T: Into<Value<'a>>> From<Option<T>> for Value<'a> {
    fn from(v: Option<T>) -> Self {
        match v {
            Some(inner) => inner.into(),
            None => Value::Null,
        }
    }
}

/// Where an encoded value goes.
#[derive(Clone, Copy)]
pub(crate) enum Sink {
    Parameter {
        stmt: NonNull<ffi::sqlite3_stmt>,
        index: c_int,
    },
    Result(NonNull<ffi::sqlite3_context>),
}

impl Sink {
    unsafe fn null(self) -> c_int {
        unsafe {
            match self {
                Sink::Parameter { stmt, index } => ffi::sqlite3_bind_null(stmt.as_ptr(), index),
                Sink::Result(ctx) => {
                    ffi::sqlite3_result_null(ctx.as_ptr());
                    ffi::SQLITE_OK
                }
            }
        }
    }

    unsafe fn int(self, v: i32) -> c_int {
        unsafe {
            match self {
                Sink::Parameter { stmt, index } => ffi::sqlite3_bind_int(stmt.as_ptr(), index, v),
                Sink::Result(ctx) => {
                    ffi::sqlite3_result_int(ctx.as_ptr(), v);
                    ffi::SQLITE_OK
                }
            }
        }
    }

    unsafe fn int64(self, v: i64) -> c_int {
        unsafe {
            match self {
                Sink::Parameter { stmt, index } => {
                    ffi::sqlite3_bind_int64(stmt.as_ptr(), index, v)
                }
                Sink::Result(ctx) => {
                    ffi::sqlite3_result_int64(ctx.as_ptr(), v);
                    ffi::SQLITE_OK
                }
            }
        }
    }

    unsafe fn double(self, v: f64) -> c_int {
        unsafe {
            match self {
                Sink::Parameter { stmt, index } => {
                    ffi::sqlite3_bind_double(stmt.as_ptr(), index, v)
                }
                Sink::Result(ctx) => {
                    ffi::sqlite3_result_double(ctx.as_ptr(), v);
                    ffi::SQLITE_OK
                }
            }
        }
    }

    unsafe fn text(self, s: &str) -> c_int {
        let ptr = s.as_ptr() as *const c_char;
        let len = s.len() as u64;
        unsafe {
            match self {
                Sink::Parameter { stmt, index } => ffi::sqlite3_bind_text64(
                    stmt.as_ptr(),
                    index,
                    ptr,
                    len,
                    ffi::SQLITE_TRANSIENT(),
                    ffi::SQLITE_UTF8 as u8,
                ),
                Sink::Result(ctx) => {
                    ffi::sqlite3_result_text64(
                        ctx.as_ptr(),
                        ptr,
                        len,
                        ffi::SQLITE_TRANSIENT(),
                        ffi::SQLITE_UTF8 as u8,
                    );
                    ffi::SQLITE_OK
                }
            }
        }
    }

    // An empty slice still has a non-null pointer, so SQLite stores a
    // zero-length blob rather than NULL.
    unsafe fn blob(self, b: &[u8]) -> c_int {
        let ptr = b.as_ptr() as *const c_void;
        let len = b.len() as u64;
        unsafe {
            match self {
                Sink::Parameter { stmt, index } => ffi::sqlite3_bind_blob64(
                    stmt.as_ptr(),
                    index,
                    ptr,
                    len,
                    ffi::SQLITE_TRANSIENT(),
                ),
                Sink::Result(ctx) => {
                    ffi::sqlite3_result_blob64(ctx.as_ptr(), ptr, len, ffi::SQLITE_TRANSIENT());
                    ffi::SQLITE_OK
                }
            }
        }
    }

    unsafe fn zeroblob(self, len: u64) -> c_int {
        unsafe {
            match self {
                Sink::Parameter { stmt, index } => {
                    ffi::sqlite3_bind_zeroblob64(stmt.as_ptr(), index, len)
                }
                Sink::Result(ctx) => ffi::sqlite3_result_zeroblob64(ctx.as_ptr(), len),
            }
        }
    }
}

#[derive(Clone, Copy)]
enum RawSource {
    Column {
        stmt: NonNull<ffi::sqlite3_stmt>,
        index: c_int,
    },
    Argument(NonNull<ffi::sqlite3_value>),
}

/// A read-only view of one SQLite value: a column of the current row or
/// a function argument. Borrowed data it hands out lives for `'a`.
#[derive(Clone, Copy)]
pub struct ValueSource<'a> {
    raw: RawSource,
    _marker: PhantomData<&'a ()>,
}

impl<'a> ValueSource<'a> {
    /// # Safety
    /// `stmt` must have a current row, `index` must be in range, and the
    /// row must stay current for `'a`.
    pub(crate) unsafe fn column(stmt: NonNull<ffi::sqlite3_stmt>, index: c_int) -> Self {
        Self {
            raw: RawSource::Column { stmt, index },
            _marker: PhantomData,
        }
    }

    /// # Safety
    /// `value` must stay valid for `'a`.
    pub(crate) unsafe fn argument(value: NonNull<ffi::sqlite3_value>) -> Self {
        Self {
            raw: RawSource::Argument(value),
            _marker: PhantomData,
        }
    }

    pub fn kind(&self) -> ValueKind {
        let raw = unsafe {
            match self.raw {
                RawSource::Column { stmt, index } => ffi::sqlite3_column_type(stmt.as_ptr(), index),
                RawSource::Argument(v) => ffi::sqlite3_value_type(v.as_ptr()),
            }
        };
        ValueKind::from_raw(raw)
    }

    fn int64(&self) -> i64 {
        unsafe {
            match self.raw {
                RawSource::Column { stmt, index } => {
                    ffi::sqlite3_column_int64(stmt.as_ptr(), index)
                }
                RawSource::Argument(v) => ffi::sqlite3_value_int64(v.as_ptr()),
            }
        }
    }

    fn double(&self) -> f64 {
        unsafe {
            match self.raw {
                RawSource::Column { stmt, index } => {
                    ffi::sqlite3_column_double(stmt.as_ptr(), index)
                }
                RawSource::Argument(v) => ffi::sqlite3_value_double(v.as_ptr()),
            }
        }
    }

    // Bytes of a text or blob view. The accessor follows the storage
    // class so SQLite never converts a blob to text in place, which would
    // invalidate a slice handed out earlier for the same value. The
    // pointer is fetched before the length.
    fn bytes(&self) -> &'a [u8] {
        let is_blob = self.kind() == ValueKind::Blob;
        unsafe {
            let (ptr, len) = match self.raw {
                RawSource::Column { stmt, index } => {
                    let ptr = if is_blob {
                        ffi::sqlite3_column_blob(stmt.as_ptr(), index) as *const u8
                    } else {
                        ffi::sqlite3_column_text(stmt.as_ptr(), index) as *const u8
                    };
                    (ptr, ffi::sqlite3_column_bytes(stmt.as_ptr(), index))
                }
                RawSource::Argument(v) => {
                    let ptr = if is_blob {
                        ffi::sqlite3_value_blob(v.as_ptr()) as *const u8
                    } else {
                        ffi::sqlite3_value_text(v.as_ptr()) as *const u8
                    };
                    (ptr, ffi::sqlite3_value_bytes(v.as_ptr()))
                }
            };
            borrow_bytes(ptr, len)
        }
    }
}

/// SQLite returns a null pointer for empty and NULL values.
unsafe fn borrow_bytes<'a>(ptr: *const u8, len: c_int) -> &'a [u8] {
    if ptr.is_null() || len <= 0 {
        &[]
    } else {
        unsafe { std::slice::from_raw_parts(ptr, len as usize) }
    }
}

mod sealed {
    pub trait Sealed {}
}

/// A Rust type a SQLite value can be decoded into.
///
/// Implemented for the integer types with a `Value` encoding, `f32`,
/// `f64`, `bool`, `&str`, `&[u8]`, `String`, `Vec<u8>`, `Value` and
/// `Option<T>` of any of these (`None` for SQL NULL).
pub trait FromValue<'a>: Sized + sealed::Sealed {
    #[doc(hidden)]
    fn from_source(source: ValueSource<'a>) -> Result<Self>;
}

macro_rules! from_integer {
    ($($ty:ty),+) => {
        $(
            impl sealed::Sealed for $ty {}

            impl<'a> FromValue<'a> for $ty {
                fn from_source(source: ValueSource<'a>) -> Result<Self> {
                    Ok(source.int64() as $ty)
                }
            }
        )+
    };
}

from_integer!(i8, i16, i32, i64, isize, u8, u16, u32);

impl sealed::Sealed for f64 {}

impl<'a> FromValue<'a> for f64 {
    fn from_source(source: ValueSource<'a>) -> Result<Self> {
        Ok(source.double())
    }
}

impl sealed::Sealed for f32 {}

impl<'a> FromValue<'a> for f32 {
    fn from_source(source: ValueSource<'a>) -> Result<Self> {
        Ok(source.double() as f32)
    }
}

impl sealed::Sealed for bool {}

impl<'a> FromValue<'a> for bool {
    fn from_source(source: ValueSource<'a>) -> Result<Self> {
        Ok(source.int64() != 0)
    }
}

impl sealed::Sealed for &str {}

impl<'a> FromValue<'a> for &'a str {
    fn from_source(source: ValueSource<'a>) -> Result<Self> {
        Ok(std::str::from_utf8(source.bytes())?)
    }
}

impl sealed::Sealed for &[u8] {}

impl<'a> FromValue<'a> for &'a [u8] {
    fn from_source(source: ValueSource<'a>) -> Result<Self> {
        Ok(source.bytes())
    }
}

impl sealed::Sealed for String {}

impl<'a> FromValue<'a> for String {
    fn from_source(source: ValueSource<'a>) -> Result<Self> {
        <&str>::from_source(source).map(str::to_owned)
    }
}

impl sealed::Sealed for Vec<u8> {}

impl<'a> FromValue<'a> for Vec<u8> {
    fn from_source(source: ValueSource<'a>) -> Result<Self> {
        Ok(source.bytes().to_vec())
    }
}

impl sealed::Sealed for Value<'_> {}

/// Decodes by storage class. Never yields `Int32`, `Bool` or `ZeroBlob`.
impl<'a> FromValue<'a> for Value<'a> {
    fn from_source(source: ValueSource<'a>) -> Result<Self> {
        Ok(match source.kind() {
            ValueKind::Null => Value::Null,
            ValueKind::Integer => Value::Int64(source.int64()),
            ValueKind::Float => Value::Float(source.double()),
            ValueKind::Text => Value::Text(std::str::from_utf8(source.bytes())?),
            ValueKind::Blob => Value::Blob(source.bytes()),
        })
    }
}

impl<T: sealed::Sealed> sealed::Sealed for Option<T> {}

impl<'a, T: FromValue<'a>> FromValue<'a> for Option<T> {
    fn from_source(source: ValueSource<'a>) -> Result<Self> {
        if source.kind() == ValueKind::Null {
            Ok(None)
        } else {
            T::from_source(source).map(Some)
        }
    }
}
