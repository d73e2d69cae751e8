///
/// litesql - Typed SQLite Bindings
///
/// Memory-safe access to the SQLite C interface through libsqlite3-sys with
/// the bundled engine.
///
/// Architecture:
/// - `Connection` owns one `sqlite3*`. `Statement` and `Blob` borrow it, so
///   every handle is finalized before the connection can be closed.
/// - `Value` is the single native representation of an SQL value. Encoding
///   into a bind parameter or a function result goes through one match
///   (`Value::encode`); decoding from a column or a function argument goes
///   through the `FromValue` trait.
/// - Text and blob views decoded from a statement borrow the statement, so
///   stepping or resetting it while a view is alive does not compile.
/// - User-defined functions are closures plus shared state, registered per
///   connection and dispatched through monomorphized `extern "C"`
///   trampolines.
/// - Engine failures become `Error::Sqlite` with an `ErrorKind` taken from
///   the primary result code.
///
/// Modules:
/// - errors: Error, ErrorKind, result code mapping
/// - value: Value, ValueKind, ZeroBlob, FromValue
/// - config: OpenFlags, DatabaseConfig (TOML)
/// - connection: Connection, version
/// - statement: Statement, Param
/// - context: ValueRef, Context, AggregateContext, Accumulator
/// - functions: FunctionDescriptor and function registration
/// - blob: Blob
///

pub mod blob;
pub mod config;
pub mod connection;
pub mod context;
pub mod errors;
pub mod functions;
pub mod statement;
pub mod value;

pub use blob::Blob;
pub use config::{DatabaseConfig, OpenFlags};
pub use connection::{version, Connection};
pub use context::{Accumulator, AggregateContext, Context, ValueRef};
pub use errors::{Error, ErrorKind, Result};
pub use functions::{FunctionDescriptor, MAX_ARITY};
pub use statement::{Param, Statement};
pub use value::{FromValue, Value, ValueKind, ValueSource, ZeroBlob};
