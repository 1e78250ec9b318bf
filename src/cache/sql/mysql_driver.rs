//! MySQL engine for the durable cache.

use color_eyre::{eyre::eyre, Result};
use mysql::prelude::Queryable;
use mysql::{Conn, OptsBuilder, Params, Value};

use super::driver::{Dialect, Row, SqlDriver};

pub struct MysqlDriver {
  conn: Conn,
}

impl MysqlDriver {
  pub fn connect(host: &str, port: u16, db_name: &str, user: &str, password: &str) -> Result<Self> {
    let opts = OptsBuilder::new()
      .ip_or_hostname(Some(host))
      .tcp_port(port)
      .db_name(Some(db_name))
      .user(Some(user))
      .pass(Some(password));

    let conn = Conn::new(opts)
      .map_err(|e| eyre!("Failed to connect to MySQL at {}:{}: {}", host, port, e))?;

    Ok(Self { conn })
  }
}

fn bind(params: &[&str]) -> Params {
  if params.is_empty() {
    Params::Empty
  } else {
    Params::Positional(params.iter().map(|p| Value::from(p.to_string())).collect())
  }
}

impl SqlDriver for MysqlDriver {
  fn dialect(&self) -> Dialect {
    Dialect::Mysql
  }

  fn execute_batch(&mut self, sql: &str) -> Result<()> {
    self
      .conn
      .query_drop(sql)
      .map_err(|e| eyre!("Failed to run '{}': {}", sql, e))
  }

  fn execute(&mut self, sql: &str, params: &[&str]) -> Result<u64> {
    self
      .conn
      .exec_drop(sql, bind(params))
      .map_err(|e| eyre!("Failed to execute statement: {}", e))?;
    Ok(self.conn.affected_rows())
  }

  fn query(&mut self, sql: &str, params: &[&str]) -> Result<Vec<Row>> {
    let rows: Vec<mysql::Row> = self
      .conn
      .exec(sql, bind(params))
      .map_err(|e| eyre!("Failed to run query: {}", e))?;

    rows
      .into_iter()
      .map(|row| {
        (0..row.len())
          .map(|i| {
            row
              .get_opt::<String, usize>(i)
              .ok_or_else(|| eyre!("Missing column {}", i))?
              .map_err(|e| eyre!("Failed to read column {}: {}", i, e))
          })
          .collect()
      })
      .collect()
  }

  fn close(self: Box<Self>) -> Result<()> {
    // The connection is released on drop.
    drop(self);
    Ok(())
  }
}
