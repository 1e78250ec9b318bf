//! Connection seam between [`SqlStore`](super::SqlStore) and a database engine.

use std::path::Path;

use color_eyre::{eyre::eyre, Result};
use rusqlite::{params_from_iter, Connection};

/// A result row. Every cached column is text.
pub type Row = Vec<String>;

/// SQL flavour of the connected engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect {
  Sqlite,
  Postgres,
  Mysql,
}

impl Dialect {
  /// Statement opening a transaction.
  pub fn begin(&self) -> &'static str {
    match self {
      Self::Sqlite => "BEGIN TRANSACTION",
      Self::Postgres => "BEGIN",
      Self::Mysql => "START TRANSACTION",
    }
  }

  /// Rewrite `?` placeholders into the engine's syntax.
  pub fn placeholders(&self, sql: &str) -> String {
    match self {
      Self::Sqlite | Self::Mysql => sql.to_string(),
      Self::Postgres => {
        let mut out = String::with_capacity(sql.len() + 8);
        let mut n = 0;
        for c in sql.chars() {
          if c == '?' {
            n += 1;
            out.push('$');
            out.push_str(&n.to_string());
          } else {
            out.push(c);
          }
        }
        out
      }
    }
  }
}

/// Minimal statement interface the durable store needs from an engine.
///
/// Values are always bound as parameters, never spliced into `sql`.
pub trait SqlDriver: Send {
  fn dialect(&self) -> Dialect;

  /// Run a statement without parameters or results (DDL, transaction control).
  fn execute_batch(&mut self, sql: &str) -> Result<()>;

  /// Run a statement and return the number of affected rows.
  fn execute(&mut self, sql: &str, params: &[&str]) -> Result<u64>;

  /// Run a query and return every row, all columns read as text.
  fn query(&mut self, sql: &str, params: &[&str]) -> Result<Vec<Row>>;

  /// Flush and release the connection.
  fn close(self: Box<Self>) -> Result<()>;
}

/// Embedded SQLite engine.
pub struct SqliteDriver {
  conn: Connection,
}

impl SqliteDriver {
  /// Open or create the database file, creating its directory if needed.
  pub fn open(path: &Path) -> Result<Self> {
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)
        .map_err(|e| eyre!("Failed to create cache directory: {}", e))?;
    }

    let conn = Connection::open(path)
      .map_err(|e| eyre!("Failed to open cache database at {}: {}", path.display(), e))?;

    Self::configure(conn)
  }

  /// Private database that lives as long as the driver.
  pub fn open_in_memory() -> Result<Self> {
    let conn = Connection::open_in_memory()
      .map_err(|e| eyre!("Failed to open in-memory cache database: {}", e))?;

    Self::configure(conn)
  }

  fn configure(conn: Connection) -> Result<Self> {
    conn
      .busy_timeout(std::time::Duration::from_secs(5))
      .map_err(|e| eyre!("Failed to set busy timeout: {}", e))?;
    Ok(Self { conn })
  }
}

impl SqlDriver for SqliteDriver {
  fn dialect(&self) -> Dialect {
    Dialect::Sqlite
  }

  fn execute_batch(&mut self, sql: &str) -> Result<()> {
    self
      .conn
      .execute_batch(sql)
      .map_err(|e| eyre!("Failed to run '{}': {}", sql, e))
  }

  fn execute(&mut self, sql: &str, params: &[&str]) -> Result<u64> {
    let changed = self
      .conn
      .execute(sql, params_from_iter(params.iter()))
      .map_err(|e| eyre!("Failed to execute statement: {}", e))?;
    Ok(changed as u64)
  }

  fn query(&mut self, sql: &str, params: &[&str]) -> Result<Vec<Row>> {
    let mut stmt = self
      .conn
      .prepare(sql)
      .map_err(|e| eyre!("Failed to prepare query: {}", e))?;
    let columns = stmt.column_count();

    let rows = stmt
      .query_map(params_from_iter(params.iter()), |row| {
        (0..columns)
          .map(|i| row.get::<_, String>(i))
          .collect::<rusqlite::Result<Row>>()
      })
      .map_err(|e| eyre!("Failed to run query: {}", e))?
      .collect::<rusqlite::Result<Vec<Row>>>()
      .map_err(|e| eyre!("Failed to read row: {}", e))?;

    Ok(rows)
  }

  fn close(self: Box<Self>) -> Result<()> {
    let Self { conn } = *self;
    conn
      .execute_batch("PRAGMA optimize;")
      .map_err(|e| eyre!("Failed to optimize cache database: {}", e))?;
    conn
      .close()
      .map_err(|(_, e)| eyre!("Failed to close cache database: {}", e))
  }
}
