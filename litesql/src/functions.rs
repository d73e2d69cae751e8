//!
//! User-Defined SQL Functions
//!
//! Registers Rust handlers as scalar, aggregate and window functions on a
//! `Connection`.
//!
//! ## Dispatch
//!
//! SQLite calls back through a C function pointer plus one opaque
//! user-data pointer. Registration moves the caller's state and handlers
//! into one value, stores a pointer to it as the user data, and passes a
//! monomorphized `extern "C"` trampoline per handler role. Each
//! trampoline:
//!
//! 1. recovers the registered value from the user data (`user_data`),
//! 2. views `argv` as `&[ValueRef]` (`context::arguments`),
//! 3. calls the handler with `(state, context, arguments)`.
//!
//! Trampolines never encode or decode values themselves; handlers do that
//! through `ValueRef::get` and `Context::result`. A panicking handler is
//! caught and reported to SQLite as a function error.
//!
//! Zero-sized registrations (stateless handlers built from plain `fn`
//! items or non-capturing closures) store a null user-data pointer and
//! are recovered without dereferencing it. Everything else is boxed, so
//! the pointer is aligned for its type. SQLite drops the registration
//! through `destroy_user_data` when the function is replaced, removed, or
//! the connection closes.
//!

use std::ffi::CString;
use std::mem;
use std::panic::{self, AssertUnwindSafe};
use std::ptr::{self, NonNull};

use libc::{c_int, c_void};
use libsqlite3_sys as ffi;
use tracing::debug;

use crate::connection::Connection;
use crate::context::{arguments, Accumulator, AggregateContext, Context, ValueRef};
use crate::errors::{check, Error, ErrorKind, Result};

/// Largest arity the bundled SQLite accepts (`SQLITE_MAX_FUNCTION_ARG`).
pub const MAX_ARITY: u8 = 127;

/// Name, arity and flags of a function being registered.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FunctionDescriptor<'a> {
    pub name: &'a str,
    /// Exact number of arguments, at most `MAX_ARITY`. SQLite rejects
    /// calls with any other count before a handler runs.
    pub arity: u8,
    /// Promise that the output depends only on the inputs, letting SQLite
    /// reuse results within one statement and use the function in indexes.
    pub deterministic: bool,
}

impl<'a> FunctionDescriptor<'a> {
    pub fn new(name: &'a str, arity: u8) -> Self {
        Self {
            name,
            arity,
            deterministic: false,
        }
    }

    pub fn deterministic(mut self) -> Self {
        self.deterministic = true;
        self
    }

    fn arity(&self) -> Result<c_int> {
        raw_arity(self.arity)
    }

    fn flags(&self) -> c_int {
        let mut flags = ffi::SQLITE_UTF8;
        if self.deterministic {
            flags |= ffi::SQLITE_DETERMINISTIC;
        }
        flags
    }
}

// SQLite answers an oversized arity with MISUSE without setting an error
// message on the connection, so it is rejected here.
fn raw_arity(arity: u8) -> Result<c_int> {
    if arity > MAX_ARITY {
        return Err(Error::with_message(
            ErrorKind::Misuse,
            format!("function arity {} exceeds the limit of {}", arity, MAX_ARITY),
        ));
    }
    Ok(c_int::from(arity))
}

struct ScalarFunction<S, F> {
    state: S,
    func: F,
}

struct AggregateFunction<S, St, Fi> {
    state: S,
    step: St,
    finish: Fi,
}

struct WindowFunction<S, St, Fi, Va, In> {
    state: S,
    step: St,
    finish: Fi,
    value: Va,
    inverse: In,
}

/// Step and final roles shared by aggregate and window registrations.
trait Aggregator<A> {
    fn step(&self, ctx: &mut AggregateContext<'_, A>, args: &[ValueRef<'_>]);
    fn finish(&self, ctx: &mut AggregateContext<'_, A>);
}

/// Extra roles of a window registration.
trait Windowed<A>: Aggregator<A> {
    fn value(&self, ctx: &mut AggregateContext<'_, A>);
    fn inverse(&self, ctx: &mut AggregateContext<'_, A>, args: &[ValueRef<'_>]);
}

impl<S, A, St, Fi> Aggregator<A> for AggregateFunction<S, St, Fi>
where
    St: Fn(&S, &mut AggregateContext<'_, A>, &[ValueRef<'_>]),
    Fi: Fn(&S, &mut AggregateContext<'_, A>),
{
    fn step(&self, ctx: &mut AggregateContext<'_, A>, args: &[ValueRef<'_>]) {
        (self.step)(&self.state, ctx, args)
    }

    fn finish(&self, ctx: &mut AggregateContext<'_, A>) {
        (self.finish)(&self.state, ctx)
    }
}

impl<S, A, St, Fi, Va, In> Aggregator<A> for WindowFunction<S, St, Fi, Va, In>
where
    St: Fn(&S, &mut AggregateContext<'_, A>, &[ValueRef<'_>]),
    Fi: Fn(&S, &mut AggregateContext<'_, A>),
{
    fn step(&self, ctx: &mut AggregateContext<'_, A>, args: &[ValueRef<'_>]) {
        (self.step)(&self.state, ctx, args)
    }

    fn finish(&self, ctx: &mut AggregateContext<'_, A>) {
        (self.finish)(&self.state, ctx)
    }
}

impl<S, A, St, Fi, Va, In> Windowed<A> for WindowFunction<S, St, Fi, Va, In>
where
    St: Fn(&S, &mut AggregateContext<'_, A>, &[ValueRef<'_>]),
    Fi: Fn(&S, &mut AggregateContext<'_, A>),
    Va: Fn(&S, &mut AggregateContext<'_, A>),
    In: Fn(&S, &mut AggregateContext<'_, A>, &[ValueRef<'_>]),
{
    fn value(&self, ctx: &mut AggregateContext<'_, A>) {
        (self.value)(&self.state, ctx)
    }

    fn inverse(&self, ctx: &mut AggregateContext<'_, A>, args: &[ValueRef<'_>]) {
        (self.inverse)(&self.state, ctx, args)
    }
}

fn into_user_data<T>(value: T) -> *mut c_void {
    if mem::size_of::<T>() == 0 {
        mem::forget(value);
        ptr::null_mut()
    } else {
        Box::into_raw(Box::new(value)).cast()
    }
}

/// Recover the registration stored by `into_user_data::<T>`.
///
/// # Safety
/// `ctx` must belong to a function registered with user data of type `T`.
unsafe fn user_data<'a, T>(ctx: *mut ffi::sqlite3_context) -> &'a T {
    if mem::size_of::<T>() == 0 {
        unsafe { NonNull::<T>::dangling().as_ref() }
    } else {
        unsafe { &*(ffi::sqlite3_user_data(ctx) as *const T) }
    }
}

unsafe extern "C" fn destroy_user_data<T>(data: *mut c_void) {
    let result = panic::catch_unwind(AssertUnwindSafe(|| unsafe {
        if mem::size_of::<T>() == 0 {
            drop(ptr::read(NonNull::<T>::dangling().as_ptr()));
        } else {
            drop(Box::from_raw(data as *mut T));
        }
    }));
    if result.is_err() {
        tracing::error!("Panic while dropping user-defined function state");
    }
}

/// Run a handler, turning a panic into a function error.
fn guard(ctx: NonNull<ffi::sqlite3_context>, handler: impl FnOnce()) {
    if let Err(panic_info) = panic::catch_unwind(AssertUnwindSafe(handler)) {
        let panic_msg = if let Some(s) = panic_info.downcast_ref::<&str>() {
            s.to_string()
        } else if let Some(s) = panic_info.downcast_ref::<String>() {
            s.clone()
        } else {
            "unknown panic payload".to_string()
        };
        let mut context = unsafe { Context::from_raw(ctx) };
        context.result_error(&format!("user-defined function panicked: {}", panic_msg));
    }
}

unsafe extern "C" fn call_scalar<S, F>(
    ctx: *mut ffi::sqlite3_context,
    argc: c_int,
    argv: *mut *mut ffi::sqlite3_value,
) where
    F: Fn(&S, &mut Context<'_>, &[ValueRef<'_>]),
{
    let Some(raw) = NonNull::new(ctx) else { return };
    let function = unsafe { user_data::<ScalarFunction<S, F>>(ctx) };
    let args = unsafe { arguments(argc, argv) };
    let mut context = unsafe { Context::from_raw(raw) };
    guard(raw, || (function.func)(&function.state, &mut context, args));
}

unsafe extern "C" fn call_step<A, T>(
    ctx: *mut ffi::sqlite3_context,
    argc: c_int,
    argv: *mut *mut ffi::sqlite3_value,
) where
    A: Accumulator,
    T: Aggregator<A>,
{
    let Some(raw) = NonNull::new(ctx) else { return };
    let function = unsafe { user_data::<T>(ctx) };
    let args = unsafe { arguments(argc, argv) };
    let Some(mut context) = (unsafe { AggregateContext::<A>::from_raw(raw) }) else {
        unsafe { ffi::sqlite3_result_error_nomem(ctx) };
        return;
    };
    guard(raw, || function.step(&mut context, args));
}

unsafe extern "C" fn call_final<A, T>(ctx: *mut ffi::sqlite3_context)
where
    A: Accumulator,
    T: Aggregator<A>,
{
    let Some(raw) = NonNull::new(ctx) else { return };
    let function = unsafe { user_data::<T>(ctx) };
    let Some(mut context) = (unsafe { AggregateContext::<A>::from_raw(raw) }) else {
        unsafe { ffi::sqlite3_result_error_nomem(ctx) };
        return;
    };
    guard(raw, || function.finish(&mut context));
}

unsafe extern "C" fn call_value<A, T>(ctx: *mut ffi::sqlite3_context)
where
    A: Accumulator,
    T: Windowed<A>,
{
    let Some(raw) = NonNull::new(ctx) else { return };
    let function = unsafe { user_data::<T>(ctx) };
    let Some(mut context) = (unsafe { AggregateContext::<A>::from_raw(raw) }) else {
        unsafe { ffi::sqlite3_result_error_nomem(ctx) };
        return;
    };
    guard(raw, || function.value(&mut context));
}

unsafe extern "C" fn call_inverse<A, T>(
    ctx: *mut ffi::sqlite3_context,
    argc: c_int,
    argv: *mut *mut ffi::sqlite3_value,
) where
    A: Accumulator,
    T: Windowed<A>,
{
    let Some(raw) = NonNull::new(ctx) else { return };
    let function = unsafe { user_data::<T>(ctx) };
    let args = unsafe { arguments(argc, argv) };
    let Some(mut context) = (unsafe { AggregateContext::<A>::from_raw(raw) }) else {
        unsafe { ffi::sqlite3_result_error_nomem(ctx) };
        return;
    };
    guard(raw, || function.inverse(&mut context, args));
}

impl Connection {
    /// Register a scalar function, called once per row per call site.
    ///
    /// `state` is shared by every call and dropped when SQLite discards
    /// the function.
    pub fn create_scalar_function<S, F>(
        &self,
        descriptor: FunctionDescriptor<'_>,
        state: S,
        func: F,
    ) -> Result<()>
    where
        S: 'static,
        F: Fn(&S, &mut Context<'_>, &[ValueRef<'_>]) + 'static,
    {
        let name = CString::new(descriptor.name)?;
        let arity = descriptor.arity()?;
        let data = into_user_data(ScalarFunction { state, func });

        // On failure SQLite runs the destructor itself.
        let rc = unsafe {
            ffi::sqlite3_create_function_v2(
                self.handle(),
                name.as_ptr(),
                arity,
                descriptor.flags(),
                data,
                Some(call_scalar::<S, F>),
                None,
                None,
                Some(destroy_user_data::<ScalarFunction<S, F>>),
            )
        };
        unsafe { check(rc, self.handle())? };

        debug!(
            name = descriptor.name,
            arity = descriptor.arity,
            "Registered scalar function"
        );
        Ok(())
    }

    /// Register an aggregate function.
    ///
    /// `step` runs once per input row of a group and `finish` once per
    /// group to produce the result. Both see the same accumulator `A`
    /// through `AggregateContext::data`.
    pub fn create_aggregate_function<S, A, St, Fi>(
        &self,
        descriptor: FunctionDescriptor<'_>,
        state: S,
        step: St,
        finish: Fi,
    ) -> Result<()>
    where
        S: 'static,
        A: Accumulator,
        St: Fn(&S, &mut AggregateContext<'_, A>, &[ValueRef<'_>]) + 'static,
        Fi: Fn(&S, &mut AggregateContext<'_, A>) + 'static,
    {
        type Registration<S, St, Fi> = AggregateFunction<S, St, Fi>;

        let name = CString::new(descriptor.name)?;
        let arity = descriptor.arity()?;
        let data = into_user_data(Registration { state, step, finish });

        let rc = unsafe {
            ffi::sqlite3_create_function_v2(
                self.handle(),
                name.as_ptr(),
                arity,
                descriptor.flags(),
                data,
                None,
                Some(call_step::<A, Registration<S, St, Fi>>),
                Some(call_final::<A, Registration<S, St, Fi>>),
                Some(destroy_user_data::<Registration<S, St, Fi>>),
            )
        };
        unsafe { check(rc, self.handle())? };

        debug!(
            name = descriptor.name,
            arity = descriptor.arity,
            "Registered aggregate function"
        );
        Ok(())
    }

    /// Register an aggregate window function.
    ///
    /// On top of `step` and `finish`, `value` reports the current result
    /// without ending the group and `inverse` removes a row that left the
    /// frame, so a sliding frame costs O(1) per row instead of a full
    /// recomputation.
    pub fn create_window_function<S, A, St, Fi, Va, In>(
        &self,
        descriptor: FunctionDescriptor<'_>,
        state: S,
        step: St,
        finish: Fi,
        value: Va,
        inverse: In,
    ) -> Result<()>
    where
        S: 'static,
        A: Accumulator,
        St: Fn(&S, &mut AggregateContext<'_, A>, &[ValueRef<'_>]) + 'static,
        Fi: Fn(&S, &mut AggregateContext<'_, A>) + 'static,
        Va: Fn(&S, &mut AggregateContext<'_, A>) + 'static,
        In: Fn(&S, &mut AggregateContext<'_, A>, &[ValueRef<'_>]) + 'static,
    {
        type Registration<S, St, Fi, Va, In> = WindowFunction<S, St, Fi, Va, In>;

        let name = CString::new(descriptor.name)?;
        let arity = descriptor.arity()?;
        let data = into_user_data(Registration {
            state,
            step,
            finish,
            value,
            inverse,
        });

        let rc = unsafe {
            ffi::sqlite3_create_window_function(
                self.handle(),
                name.as_ptr(),
                arity,
                descriptor.flags(),
                data,
                Some(call_step::<A, Registration<S, St, Fi, Va, In>>),
                Some(call_final::<A, Registration<S, St, Fi, Va, In>>),
                Some(call_value::<A, Registration<S, St, Fi, Va, In>>),
                Some(call_inverse::<A, Registration<S, St, Fi, Va, In>>),
                Some(destroy_user_data::<Registration<S, St, Fi, Va, In>>),
            )
        };
        unsafe { check(rc, self.handle())? };

        debug!(
            name = descriptor.name,
            arity = descriptor.arity,
            "Registered window function"
        );
        Ok(())
    }

    /// Unregister the function `name` with the given arity. Its state is
    /// dropped once no running statement uses it.
    pub fn remove_function(&self, name: &str, arity: u8) -> Result<()> {
        let c_name = CString::new(name)?;
        let arity = raw_arity(arity)?;
        let rc = unsafe {
            ffi::sqlite3_create_function_v2(
                self.handle(),
                c_name.as_ptr(),
                arity,
                ffi::SQLITE_UTF8,
                ptr::null_mut(),
                None,
                None,
                None,
                None,
            )
        };
        unsafe { check(rc, self.handle()) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use std::rc::Rc;

    #[test]
    fn test_descriptor_flags() {
        let plain = FunctionDescriptor::new("f", 1);
        assert_eq!(plain.flags(), ffi::SQLITE_UTF8);
        assert!(!plain.deterministic);

        let pure = FunctionDescriptor::new("f", 1).deterministic();
        assert_eq!(pure.flags(), ffi::SQLITE_UTF8 | ffi::SQLITE_DETERMINISTIC);
    }

    #[test]
    fn test_zero_sized_registration_uses_null_user_data() {
        fn handler(_: &(), _: &mut Context<'_>, _: &[ValueRef<'_>]) {}
        let registration = ScalarFunction {
            state: (),
            func: handler,
        };
        // A fn item is zero-sized, so the whole registration is too.
        assert_eq!(mem::size_of_val(&registration), 0);
        assert!(into_user_data(registration).is_null());
    }

    #[test]
    fn test_sized_registration_is_boxed_and_dropped() {
        let drops = Rc::new(Cell::new(0));

        struct Tracker(Rc<Cell<u32>>);
        impl Drop for Tracker {
            fn drop(&mut self) {
                self.0.set(self.0.get() + 1);
            }
        }

        let data = into_user_data(Tracker(drops.clone()));
        assert!(!data.is_null());
        assert_eq!(data as usize % mem::align_of::<Tracker>(), 0);
        unsafe { destroy_user_data::<Tracker>(data) };
        assert_eq!(drops.get(), 1);
    }

    #[test]
    fn test_state_dropped_when_function_removed() {
        let drops = Rc::new(Cell::new(0));

        struct Tracker(Rc<Cell<u32>>);
        impl Drop for Tracker {
            fn drop(&mut self) {
                self.0.set(self.0.get() + 1);
            }
        }

        let conn = Connection::open_in_memory().unwrap();
        conn.create_scalar_function(
            FunctionDescriptor::new("one", 0),
            Tracker(drops.clone()),
            |_, ctx, _| ctx.result(1),
        )
        .unwrap();
        assert_eq!(drops.get(), 0);

        conn.remove_function("one", 0).unwrap();
        assert_eq!(drops.get(), 1);
        assert!(conn.prepare("SELECT one()").is_err());
    }

    #[test]
    fn test_state_dropped_when_connection_closes() {
        let drops = Rc::new(Cell::new(0));

        struct Tracker(Rc<Cell<u32>>);
        impl Drop for Tracker {
            fn drop(&mut self) {
                self.0.set(self.0.get() + 1);
            }
        }

        let conn = Connection::open_in_memory().unwrap();
        conn.create_scalar_function(
            FunctionDescriptor::new("one", 0),
            Tracker(drops.clone()),
            |_, ctx, _| ctx.result(1),
        )
        .unwrap();
        conn.close().unwrap();
        assert_eq!(drops.get(), 1);
    }

    #[test]
    fn test_arity_above_limit_is_rejected() {
        let conn = Connection::open_in_memory().unwrap();
        let err = conn
            .create_scalar_function(FunctionDescriptor::new("wide", 128), (), |_, ctx, _| {
                ctx.result(1)
            })
            .unwrap_err();
        assert_eq!(err.kind(), Some(crate::ErrorKind::Misuse));
        assert!(err.to_string().contains("arity 128"), "{}", err);

        let err = conn.remove_function("wide", 200).unwrap_err();
        assert_eq!(err.kind(), Some(crate::ErrorKind::Misuse));

        conn.create_scalar_function(FunctionDescriptor::new("widest", MAX_ARITY), (), |_, ctx, _| {
            ctx.result(1)
        })
        .unwrap();
    }

    #[test]
    fn test_nul_in_name_is_rejected() {
        let conn = Connection::open_in_memory().unwrap();
        let err = conn
            .create_scalar_function(FunctionDescriptor::new("bad\0name", 0), (), |_, ctx, _| {
                ctx.result(1)
            })
            .unwrap_err();
        assert!(matches!(err, crate::Error::Nul(_)));
    }
}
