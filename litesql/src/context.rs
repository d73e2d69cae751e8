//!
//! Function Invocation Handles
//!
//! Types handed to user-defined function handlers for the duration of one
//! call from SQLite:
//!
//! - `ValueRef`: one SQL argument.
//! - `Context`: where the handler writes its result, error or subtype.
//! - `AggregateContext`: a `Context` that also exposes the per-group
//!   accumulator of an aggregate or window function.
//!
//! None of them can be constructed outside this crate, and their
//! lifetimes end with the callback that received them.
//!

use std::marker::PhantomData;
use std::ops::{Deref, DerefMut};
use std::ptr::NonNull;

use libc::{c_char, c_int, c_uint};
use libsqlite3_sys as ffi;

use crate::errors::{ErrorKind, Result};
use crate::value::{FromValue, Sink, Value, ValueKind, ValueSource};

/// One argument of a user-defined function call.
///
/// Layout-compatible with `sqlite3_value*`, so SQLite's `argv` array can
/// be viewed as `&[ValueRef]` directly.
#[repr(transparent)]
pub struct ValueRef<'a> {
    raw: NonNull<ffi::sqlite3_value>,
    _marker: PhantomData<&'a ffi::sqlite3_value>,
}

impl<'a> ValueRef<'a> {
    pub fn get<T: FromValue<'a>>(&self) -> Result<T> {
        T::from_source(unsafe { ValueSource::argument(self.raw) })
    }

    pub fn kind(&self) -> ValueKind {
        unsafe { ValueSource::argument(self.raw) }.kind()
    }

    /// Subtype tag attached by the function that produced this value, or 0.
    pub fn subtype(&self) -> u32 {
        unsafe { ffi::sqlite3_value_subtype(self.raw.as_ptr()) as u32 }
    }

    pub(crate) fn as_ptr(&self) -> *mut ffi::sqlite3_value {
        self.raw.as_ptr()
    }
}

/// View SQLite's argument array as `ValueRef`s.
///
/// # Safety
/// `argv` must point to `argc` non-null values that stay valid for `'a`.
pub(crate) unsafe fn arguments<'a>(
    argc: c_int,
    argv: *mut *mut ffi::sqlite3_value,
) -> &'a [ValueRef<'a>] {
    if argc <= 0 || argv.is_null() {
        &[]
    } else {
        unsafe { std::slice::from_raw_parts(argv as *const ValueRef<'a>, argc as usize) }
    }
}

/// Result slot of the current user-defined function call.
pub struct Context<'a> {
    raw: NonNull<ffi::sqlite3_context>,
    _marker: PhantomData<&'a mut ffi::sqlite3_context>,
}

impl Context<'_> {
    /// # Safety
    /// `raw` must be the context of a call in progress.
    pub(crate) unsafe fn from_raw(raw: NonNull<ffi::sqlite3_context>) -> Self {
        Self {
            raw,
            _marker: PhantomData,
        }
    }

    /// Set the function result.
    ///
    /// SQLite records encoding failures (an oversized text, blob or
    /// zero-blob) on the context itself, so the call then fails with
    /// `ErrorKind::TooBig`.
    pub fn result<'v>(&mut self, value: impl Into<Value<'v>>) {
        unsafe {
            value.into().encode(Sink::Result(self.raw));
        }
    }

    /// Forward an argument as the result, unchanged, subtype included.
    pub fn result_value(&mut self, value: &ValueRef<'_>) {
        unsafe { ffi::sqlite3_result_value(self.raw.as_ptr(), value.as_ptr()) }
    }

    /// Fail the current SQL statement with `message`.
    pub fn result_error(&mut self, message: &str) {
        let len = c_int::try_from(message.len()).unwrap_or(c_int::MAX);
        unsafe {
            ffi::sqlite3_result_error(self.raw.as_ptr(), message.as_ptr() as *const c_char, len);
        }
    }

    /// Fail the current SQL statement with the given error kind.
    pub fn result_error_kind(&mut self, kind: ErrorKind) {
        unsafe { ffi::sqlite3_result_error_code(self.raw.as_ptr(), kind.code()) }
    }

    /// Attach a subtype tag to the result.
    ///
    /// SQLite keeps only the low 8 bits; higher bits are dropped without
    /// error.
    pub fn sub_type(&mut self, subtype: u32) {
        unsafe { ffi::sqlite3_result_subtype(self.raw.as_ptr(), subtype as c_uint) }
    }
}

/// Per-group state of an aggregate or window function.
///
/// SQLite allocates it zero-filled the first time a group needs it and
/// frees it after the group's final call, without running any destructor.
///
/// # Safety
/// The all-zero bit pattern must be a valid value of the type. The type
/// must not need dropping (`Copy` enforces this), and its alignment must
/// not exceed 8 bytes, the alignment of SQLite's allocations; the latter
/// is checked at compile time when a function is registered.
pub unsafe trait Accumulator: Copy + 'static {}

macro_rules! accumulator {
    ($($ty:ty),+) => {
        $(unsafe impl Accumulator for $ty {})+
    };
}

accumulator!(i8, i16, i32, i64, isize, u8, u16, u32, u64, usize, f32, f64, bool, ());

unsafe impl<T: Accumulator, const N: usize> Accumulator for [T; N] {}
unsafe impl<A: Accumulator, B: Accumulator> Accumulator for (A, B) {}
unsafe impl<A: Accumulator, B: Accumulator, C: Accumulator> Accumulator for (A, B, C) {}
unsafe impl<A: Accumulator, B: Accumulator, C: Accumulator, D: Accumulator> Accumulator
    for (A, B, C, D)
{
}

/// A `Context` for aggregate and window handlers, carrying the group's
/// accumulator.
pub struct AggregateContext<'a, A> {
    context: Context<'a>,
    state: NonNull<A>,
}

impl<A: Accumulator> AggregateContext<'_, A> {
    /// Look up (or allocate) the accumulator for the group this call
    /// belongs to. `None` when SQLite cannot allocate it.
    ///
    /// # Safety
    /// `raw` must be the context of an aggregate or window callback in
    /// progress. Outside such a callback SQLite's behaviour is undefined.
    pub(crate) unsafe fn from_raw(raw: NonNull<ffi::sqlite3_context>) -> Option<Self> {
        const {
            assert!(
                std::mem::align_of::<A>() <= 8,
                "accumulator alignment exceeds SQLite's 8-byte allocations"
            )
        };

        let size = std::mem::size_of::<A>();
        let state = if size == 0 {
            NonNull::dangling()
        } else {
            let size = c_int::try_from(size).ok()?;
            let ptr = unsafe { ffi::sqlite3_aggregate_context(raw.as_ptr(), size) };
            NonNull::new(ptr.cast::<A>())?
        };

        Some(Self {
            context: unsafe { Context::from_raw(raw) },
            state,
        })
    }

    /// The group's accumulator, zero-initialised on first access.
    pub fn data(&mut self) -> &mut A {
        unsafe { self.state.as_mut() }
    }
}

impl<'a, A> Deref for AggregateContext<'a, A> {
    type Target = Context<'a>;

    fn deref(&self) -> &Context<'a> {
        &self.context
    }
}

impl<'a, A> DerefMut for AggregateContext<'a, A> {
    fn deref_mut(&mut self) -> &mut Context<'a> {
        &mut self.context
    }
}
