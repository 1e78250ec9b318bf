//! PostgreSQL engine for the durable cache.

use color_eyre::{eyre::eyre, Result};
use postgres::types::ToSql;
use postgres::{Client, NoTls};

use super::driver::{Dialect, Row, SqlDriver};

pub struct PostgresDriver {
  client: Client,
}

impl PostgresDriver {
  pub fn connect(host: &str, port: u16, db_name: &str, user: &str, password: &str) -> Result<Self> {
    let client = postgres::Config::new()
      .host(host)
      .port(port)
      .dbname(db_name)
      .user(user)
      .password(password)
      .connect(NoTls)
      .map_err(|e| eyre!("Failed to connect to PostgreSQL at {}:{}: {}", host, port, e))?;

    Ok(Self { client })
  }
}

fn bind<'a>(params: &'a [&'a str]) -> Vec<&'a (dyn ToSql + Sync)> {
  params.iter().map(|p| p as &(dyn ToSql + Sync)).collect()
}

impl SqlDriver for PostgresDriver {
  fn dialect(&self) -> Dialect {
    Dialect::Postgres
  }

  fn execute_batch(&mut self, sql: &str) -> Result<()> {
    self
      .client
      .batch_execute(sql)
      .map_err(|e| eyre!("Failed to run '{}': {}", sql, e))
  }

  fn execute(&mut self, sql: &str, params: &[&str]) -> Result<u64> {
    let sql = Dialect::Postgres.placeholders(sql);
    self
      .client
      .execute(sql.as_str(), &bind(params))
      .map_err(|e| eyre!("Failed to execute statement: {}", e))
  }

  fn query(&mut self, sql: &str, params: &[&str]) -> Result<Vec<Row>> {
    let sql = Dialect::Postgres.placeholders(sql);
    let rows = self
      .client
      .query(sql.as_str(), &bind(params))
      .map_err(|e| eyre!("Failed to run query: {}", e))?;

    rows
      .iter()
      .map(|row| {
        (0..row.len())
          .map(|i| {
            row
              .try_get::<_, String>(i)
              .map_err(|e| eyre!("Failed to read column {}: {}", i, e))
          })
          .collect()
      })
      .collect()
  }

  fn close(self: Box<Self>) -> Result<()> {
    let Self { client } = *self;
    client
      .close()
      .map_err(|e| eyre!("Failed to close PostgreSQL connection: {}", e))
  }
}
