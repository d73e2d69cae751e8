///
/// litesql CLI - Run one SQL statement against a SQLite database
///
/// Usage:
/// - litesql <database> <sql> [--param VALUE]...
/// - --config FILE: take open flags and busy timeout from a TOML file
/// - --read-only: open without write access
/// - --verbose: log library activity to stderr
///
/// Rows are printed tab-separated after a header row of column names.
/// Statements without result columns print the number of changed rows.
///

use clap::Parser;
use std::io::Write;
use std::path::PathBuf;

use litesql::{Connection, DatabaseConfig, Value};

#[derive(Parser)]
#[command(name = "litesql")]
#[command(author, version, about = "Run SQL against a SQLite database", long_about = None)]
struct Cli {
    /// Database file, or :memory:
    database: String,

    /// SQL statement to run
    sql: String,

    /// Value for the next positional parameter (?1, ?2, ...)
    #[arg(long = "param", value_name = "VALUE")]
    params: Vec<String>,

    /// TOML file with open flags and busy timeout
    #[arg(long)]
    config: Option<PathBuf>,

    /// Open the database read-only
    #[arg(long)]
    read_only: bool,

    /// Log library activity to stderr
    #[arg(short, long)]
    verbose: bool,
}

/// A command-line parameter, typed by its spelling.
#[derive(Debug, PartialEq)]
enum Param {
    Null,
    Integer(i64),
    Float(f64),
    Text(String),
}

impl Param {
    fn parse(raw: &str) -> Self {
        if raw.eq_ignore_ascii_case("null") {
            return Param::Null;
        }
        if let Ok(v) = raw.parse::<i64>() {
            return Param::Integer(v);
        }
        // f64 also accepts "inf" and "nan"; keep those as text.
        if raw.bytes().any(|b| b.is_ascii_digit()) {
            if let Ok(v) = raw.parse::<f64>() {
                return Param::Float(v);
            }
        }
        Param::Text(raw.to_string())
    }

    fn as_value(&self) -> Value<'_> {
        match self {
            Param::Null => Value::Null,
            Param::Integer(v) => Value::Int64(*v),
            Param::Float(v) => Value::Float(*v),
            Param::Text(s) => Value::Text(s),
        }
    }
}

fn render(value: Value<'_>) -> String {
    match value {
        Value::Null => "NULL".to_string(),
        Value::Int32(v) => v.to_string(),
        Value::Int64(v) => v.to_string(),
        Value::Float(v) => v.to_string(),
        Value::Bool(v) => (v as i32).to_string(),
        Value::Text(s) => s.to_string(),
        Value::Blob(bytes) => {
            let hex: String = bytes.iter().map(|b| format!("{:02x}", b)).collect();
            format!("x'{}'", hex)
        }
        Value::ZeroBlob(blob) => format!("zeroblob({})", blob.0),
    }
}

fn load_config(cli: &Cli) -> litesql::Result<DatabaseConfig> {
    let mut config = match &cli.config {
        Some(path) => DatabaseConfig::from_path(path)?,
        None => DatabaseConfig::new(cli.database.clone()),
    };
    config.path = cli.database.clone();
    if cli.read_only {
        config.flags.read_write = false;
        config.flags.create = false;
    }
    Ok(config)
}

fn run(cli: &Cli, out: &mut impl Write) -> litesql::Result<()> {
    let config = load_config(cli)?;
    let conn = Connection::open_config(&config)?;

    let mut stmt = conn.prepare(&cli.sql)?;
    let params: Vec<Param> = cli.params.iter().map(|p| Param::parse(p)).collect();
    for (i, param) in params.iter().enumerate() {
        stmt.bind(i + 1, param.as_value())?;
    }

    let columns = stmt.column_count();
    if columns > 0 {
        let header: Vec<String> = (0..columns)
            .map(|i| stmt.column_name(i).unwrap_or_default())
            .collect();
        writeln!(out, "{}", header.join("\t"))?;
    }

    while stmt.step()? {
        let mut row = Vec::with_capacity(columns);
        for i in 0..columns {
            row.push(render(stmt.get::<Value>(i)?));
        }
        writeln!(out, "{}", row.join("\t"))?;
    }

    if columns == 0 {
        writeln!(out, "{} row(s) changed", conn.changes())?;
    }

    stmt.finalize()?;
    conn.close()
}

fn main() {
    let cli = Cli::parse();

    let level = if cli.verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::WARN
    };
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .with_max_level(level)
        .init();

    let stdout = std::io::stdout();
    if let Err(e) = run(&cli, &mut stdout.lock()) {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}
