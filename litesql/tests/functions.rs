///
/// # Integration Tests for user-defined functions
///
/// Registers scalar, aggregate and window functions on an in-memory
/// connection and checks what SQL queries observe.
///

use std::cell::Cell;

use litesql::{
    Connection, Context, ErrorKind, FunctionDescriptor, Value, ValueKind, ValueRef, ZeroBlob,
};

fn numbers(conn: &Connection) {
    conn.exec("CREATE TABLE t(x INTEGER)").unwrap();
    let mut stmt = conn.prepare("INSERT INTO t VALUES (?)").unwrap();
    for x in 1..=10 {
        stmt.bind(1, x).unwrap();
        assert!(!stmt.step().unwrap());
        stmt.reset().unwrap();
    }
    stmt.finalize().unwrap();
}

fn column_i64(conn: &Connection, sql: &str) -> Vec<i64> {
    let mut stmt = conn.prepare(sql).unwrap();
    let mut out = Vec::new();
    while stmt.step().unwrap() {
        out.push(stmt.get::<i64>(0).unwrap());
    }
    out
}

fn running_sum(conn: &Connection) {
    conn.create_window_function::<_, i64, _, _, _, _>(
        FunctionDescriptor::new("running_sum", 1),
        (),
        |_, ctx, args| {
            let v = args[0].get::<i64>().unwrap_or(0);
            *ctx.data() += v;
        },
        |_, ctx| {
            let total = *ctx.data();
            ctx.result(total);
        },
        |_, ctx| {
            let total = *ctx.data();
            ctx.result(total);
        },
        |_, ctx, args| {
            let v = args[0].get::<i64>().unwrap_or(0);
            *ctx.data() -= v;
        },
    )
    .unwrap();
}

#[test]
fn test_scalar_uppercase() {
    let conn = Connection::open_in_memory().unwrap();
    conn.create_scalar_function(
        FunctionDescriptor::new("shout", 1).deterministic(),
        (),
        |_, ctx, args| match args[0].get::<&str>() {
            Ok(s) => ctx.result(&s.to_uppercase()),
            Err(e) => ctx.result_error(&e.to_string()),
        },
    )
    .unwrap();

    let mut stmt = conn.prepare("SELECT shout('sqlite3')").unwrap();
    assert!(stmt.step().unwrap());
    assert_eq!(stmt.get::<&str>(0).unwrap(), "SQLITE3");
}

#[test]
fn test_scalar_state_is_shared_across_calls() {
    let conn = Connection::open_in_memory().unwrap();
    numbers(&conn);
    conn.create_scalar_function(
        FunctionDescriptor::new("counter", 0),
        Cell::new(0i64),
        |count, ctx, _| {
            count.set(count.get() + 1);
            ctx.result(count.get());
        },
    )
    .unwrap();

    let seen = column_i64(&conn, "SELECT counter() FROM t WHERE x <= 3");
    assert_eq!(seen, vec![1, 2, 3]);
    let seen = column_i64(&conn, "SELECT counter()");
    assert_eq!(seen, vec![4]);
}

#[test]
fn test_stateless_fn_item() {
    fn double(_: &(), ctx: &mut Context<'_>, args: &[ValueRef<'_>]) {
        match args[0].kind() {
            ValueKind::Integer => ctx.result(args[0].get::<i64>().unwrap_or(0) * 2),
            ValueKind::Float => ctx.result(args[0].get::<f64>().unwrap_or(0.0) * 2.0),
            _ => ctx.result(Value::Null),
        }
    }

    let conn = Connection::open_in_memory().unwrap();
    conn.create_scalar_function(FunctionDescriptor::new("double", 1), (), double)
        .unwrap();

    let mut stmt = conn.prepare("SELECT double(21), double(1.25), double('a')").unwrap();
    assert!(stmt.step().unwrap());
    assert_eq!(stmt.get::<i64>(0).unwrap(), 42);
    assert_eq!(stmt.get::<f64>(1).unwrap(), 2.5);
    assert_eq!(stmt.get::<Option<i64>>(2).unwrap(), None);
}

#[test]
fn test_variadic_argument_view() {
    let conn = Connection::open_in_memory().unwrap();
    conn.create_scalar_function(FunctionDescriptor::new("kinds", 3), (), |_, ctx, args| {
        let kinds: Vec<String> = args.iter().map(|a| format!("{:?}", a.kind())).collect();
        ctx.result(&kinds.join(","));
    })
    .unwrap();

    let mut stmt = conn.prepare("SELECT kinds(1, 'two', x'03')").unwrap();
    assert!(stmt.step().unwrap());
    assert_eq!(stmt.get::<String>(0).unwrap(), "Integer,Text,Blob");
}

#[test]
fn test_aggregate_sum() {
    let conn = Connection::open_in_memory().unwrap();
    numbers(&conn);
    conn.create_aggregate_function::<_, i64, _, _>(
        FunctionDescriptor::new("my_sum", 1),
        (),
        |_, ctx, args| {
            *ctx.data() += args[0].get::<i64>().unwrap_or(0);
        },
        |_, ctx| {
            let total = *ctx.data();
            ctx.result(total);
        },
    )
    .unwrap();

    assert_eq!(column_i64(&conn, "SELECT my_sum(x) FROM t"), vec![55]);
    assert_eq!(column_i64(&conn, "SELECT my_sum(x) FROM t WHERE 0"), vec![0]);
    assert_eq!(
        column_i64(&conn, "SELECT my_sum(x) FROM t GROUP BY x % 2 ORDER BY x % 2"),
        vec![30, 25]
    );
}

#[test]
fn test_aggregate_tuple_accumulator() {
    let conn = Connection::open_in_memory().unwrap();
    numbers(&conn);
    conn.create_aggregate_function::<_, (f64, i64), _, _>(
        FunctionDescriptor::new("mean", 1),
        (),
        |_, ctx, args| {
            let v = args[0].get::<f64>().unwrap_or(0.0);
            let (sum, count) = ctx.data();
            *sum += v;
            *count += 1;
        },
        |_, ctx| {
            let (sum, count) = *ctx.data();
            if count == 0 {
                ctx.result(Value::Null);
            } else {
                ctx.result(sum / count as f64);
            }
        },
    )
    .unwrap();

    let mut stmt = conn.prepare("SELECT mean(x), mean(x) FILTER (WHERE 0) FROM t").unwrap();
    assert!(stmt.step().unwrap());
    assert_eq!(stmt.get::<f64>(0).unwrap(), 5.5);
    assert_eq!(stmt.get::<Option<f64>>(1).unwrap(), None);
}

#[test]
fn test_window_running_sum() {
    let conn = Connection::open_in_memory().unwrap();
    numbers(&conn);
    running_sum(&conn);

    let sums = column_i64(
        &conn,
        "SELECT running_sum(x) OVER (
             ORDER BY x ROWS BETWEEN UNBOUNDED PRECEDING AND CURRENT ROW
         ) FROM t",
    );
    assert_eq!(sums, vec![1, 3, 6, 10, 15, 21, 28, 36, 45, 55]);
}

#[test]
fn test_window_running_sum_default_frame() {
    let conn = Connection::open_in_memory().unwrap();
    numbers(&conn);
    running_sum(&conn);

    // RANGE BETWEEN UNBOUNDED PRECEDING AND CURRENT ROW.
    let sums = column_i64(&conn, "SELECT running_sum(x) OVER (ORDER BY x) FROM t");
    assert_eq!(sums, vec![1, 3, 6, 10, 15, 21, 28, 36, 45, 55]);

    // Peers share the value computed at the end of their group.
    let sums = column_i64(
        &conn,
        "SELECT running_sum(x) OVER (ORDER BY x / 4) FROM t ORDER BY x",
    );
    assert_eq!(sums, vec![6, 6, 6, 28, 28, 28, 28, 55, 55, 55]);
}

#[test]
fn test_window_sliding_frame_uses_inverse() {
    let conn = Connection::open_in_memory().unwrap();
    numbers(&conn);
    running_sum(&conn);

    let sums = column_i64(
        &conn,
        "SELECT running_sum(x) OVER (ORDER BY x ROWS BETWEEN 1 PRECEDING AND CURRENT ROW) FROM t",
    );
    assert_eq!(sums, vec![1, 3, 5, 7, 9, 11, 13, 15, 17, 19]);
}

#[test]
fn test_window_function_as_plain_aggregate() {
    let conn = Connection::open_in_memory().unwrap();
    numbers(&conn);
    running_sum(&conn);

    assert_eq!(column_i64(&conn, "SELECT running_sum(x) FROM t"), vec![55]);
}

#[test]
fn test_subtype_round_trip() {
    let conn = Connection::open_in_memory().unwrap();
    conn.create_scalar_function(FunctionDescriptor::new("tag", 2), (), |_, ctx, args| {
        let tag = args[1].get::<u32>().unwrap_or(0);
        ctx.result_value(&args[0]);
        ctx.sub_type(tag);
    })
    .unwrap();
    conn.create_scalar_function(FunctionDescriptor::new("read_subtype", 1), (), |_, ctx, args| {
        ctx.result(args[0].subtype());
    })
    .unwrap();

    let mut stmt = conn
        .prepare(
            "SELECT read_subtype(tag(v, 74)), read_subtype(tag(v, 330)), read_subtype(v)
             FROM (SELECT 'x' AS v)",
        )
        .unwrap();
    assert!(stmt.step().unwrap());
    assert_eq!(stmt.get::<i64>(0).unwrap(), 74);
    // Only the low 8 bits survive: 330 = 0x14a.
    assert_eq!(stmt.get::<i64>(1).unwrap(), 0x4a);
    assert_eq!(stmt.get::<i64>(2).unwrap(), 0);
}

#[test]
fn test_result_value_forwards_unchanged() {
    let conn = Connection::open_in_memory().unwrap();
    conn.create_scalar_function(FunctionDescriptor::new("identity", 1), (), |_, ctx, args| {
        ctx.result_value(&args[0]);
    })
    .unwrap();

    let mut stmt = conn
        .prepare("SELECT identity(x'0102'), identity(NULL), identity(2.5), identity('abc')")
        .unwrap();
    assert!(stmt.step().unwrap());
    assert_eq!(stmt.get::<&[u8]>(0).unwrap(), &[1u8, 2][..]);
    assert_eq!(stmt.column_kind(1).unwrap(), ValueKind::Null);
    assert_eq!(stmt.get::<f64>(2).unwrap(), 2.5);
    assert_eq!(stmt.get::<&str>(3).unwrap(), "abc");
}

#[test]
fn test_zeroblob_result() {
    let conn = Connection::open_in_memory().unwrap();
    conn.create_scalar_function(FunctionDescriptor::new("zb", 1), (), |_, ctx, args| {
        let len = args[0].get::<i64>().unwrap_or(0).max(0) as u64;
        ctx.result(ZeroBlob(len));
    })
    .unwrap();

    let mut stmt = conn.prepare("SELECT zb(4), typeof(zb(4)), length(zb(0))").unwrap();
    assert!(stmt.step().unwrap());
    assert_eq!(stmt.get::<Vec<u8>>(0).unwrap(), vec![0u8; 4]);
    assert_eq!(stmt.get::<&str>(1).unwrap(), "blob");
    assert_eq!(stmt.get::<i64>(2).unwrap(), 0);
}

#[test]
fn test_result_error_fails_statement() {
    let conn = Connection::open_in_memory().unwrap();
    conn.create_scalar_function(FunctionDescriptor::new("fail", 0), (), |_, ctx, _| {
        ctx.result_error("bad input");
    })
    .unwrap();

    let mut stmt = conn.prepare("SELECT fail()").unwrap();
    let err = stmt.step().unwrap_err();
    assert_eq!(err.kind(), Some(ErrorKind::Error));
    assert!(err.to_string().contains("bad input"), "{}", err);
}

#[test]
fn test_result_error_kind() {
    let conn = Connection::open_in_memory().unwrap();
    conn.create_scalar_function(FunctionDescriptor::new("too_big", 0), (), |_, ctx, _| {
        ctx.result_error_kind(ErrorKind::TooBig);
    })
    .unwrap();

    let mut stmt = conn.prepare("SELECT too_big()").unwrap();
    assert_eq!(stmt.step().unwrap_err().kind(), Some(ErrorKind::TooBig));
}

#[test]
fn test_panic_is_reported_as_error() {
    let conn = Connection::open_in_memory().unwrap();
    conn.create_scalar_function(FunctionDescriptor::new("boom", 0), (), |_, _ctx, _| {
        panic!("boom");
    })
    .unwrap();

    let mut stmt = conn.prepare("SELECT boom()").unwrap();
    let err = stmt.step().unwrap_err();
    assert_eq!(err.kind(), Some(ErrorKind::Error));
    assert!(err.to_string().contains("panicked: boom"), "{}", err);

    // The connection stays usable.
    drop(stmt);
    assert_eq!(column_i64(&conn, "SELECT 1"), vec![1]);
}

#[test]
fn test_arity_mismatch_rejected_at_prepare() {
    let conn = Connection::open_in_memory().unwrap();
    conn.create_scalar_function(FunctionDescriptor::new("one_arg", 1), (), |_, ctx, _| {
        ctx.result(1);
    })
    .unwrap();

    let err = conn.prepare("SELECT one_arg(1, 2)").unwrap_err();
    assert_eq!(err.kind(), Some(ErrorKind::Error));
    assert!(err.to_string().contains("wrong number of arguments"), "{}", err);
}

#[test]
fn test_reregistering_replaces_function() {
    let conn = Connection::open_in_memory().unwrap();
    conn.create_scalar_function(FunctionDescriptor::new("version_of", 0), 1i64, |v, ctx, _| {
        ctx.result(*v);
    })
    .unwrap();
    assert_eq!(column_i64(&conn, "SELECT version_of()"), vec![1]);

    conn.create_scalar_function(FunctionDescriptor::new("version_of", 0), 2i64, |v, ctx, _| {
        ctx.result(*v);
    })
    .unwrap();
    assert_eq!(column_i64(&conn, "SELECT version_of()"), vec![2]);
}

#[test]
fn test_remove_function() {
    let conn = Connection::open_in_memory().unwrap();
    conn.create_scalar_function(FunctionDescriptor::new("gone", 0), (), |_, ctx, _| {
        ctx.result(1);
    })
    .unwrap();
    conn.remove_function("gone", 0).unwrap();

    let err = conn.prepare("SELECT gone()").unwrap_err();
    assert!(err.to_string().contains("no such function"), "{}", err);
}
