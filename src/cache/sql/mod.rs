//! Durable cache backend on a relational database.

mod driver;
#[cfg(feature = "mysql")]
mod mysql_driver;
#[cfg(feature = "postgres")]
mod postgres_driver;
pub mod schema;

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Mutex, MutexGuard};

use color_eyre::{eyre::eyre, Result};
use tracing::{debug, error, info, warn};

use crate::config::{DatabaseConfig, DatabaseType};
use crate::model::{
  DataModel, DataObject, Payload, Persistence, Role, Space, SpaceChannel, SpaceMember, SpaceType,
};

use super::traits::CacheStore;

pub use driver::{Dialect, Row, SqlDriver, SqliteDriver};

/// [`CacheStore`] backed by SQLite, PostgreSQL or MySQL.
///
/// One mutex guards the connection. Multi-row writes run in a single
/// transaction, so readers never see a space without the children that were
/// saved with it.
pub struct SqlStore {
  driver: Mutex<Option<Box<dyn SqlDriver>>>,
  dialect: Dialect,
}

impl SqlStore {
  /// Connect to the database named by `config` and create missing tables.
  pub fn open(config: &DatabaseConfig) -> Result<Self> {
    let driver: Box<dyn SqlDriver> = match config.db_type {
      DatabaseType::Embedded => Box::new(SqliteDriver::open(&config.embedded_path()?)?),
      DatabaseType::Postgres => connect_postgres(config)?,
      DatabaseType::Mysql => connect_mysql(config)?,
      DatabaseType::None => {
        return Err(eyre!("Database caching is disabled in this configuration"))
      }
    };
    Self::with_driver(driver)
  }

  /// Embedded store in a private in-memory SQLite database.
  pub fn open_in_memory() -> Result<Self> {
    Self::with_driver(Box::new(SqliteDriver::open_in_memory()?))
  }

  pub fn with_driver(mut driver: Box<dyn SqlDriver>) -> Result<Self> {
    let dialect = driver.dialect();
    for statement in schema::statements(dialect) {
      driver
        .execute_batch(statement)
        .map_err(|e| eyre!("Failed to create cache schema: {}", e))?;
    }

    Ok(Self {
      driver: Mutex::new(Some(driver)),
      dialect,
    })
  }

  /// Whether the engine runs inside this process.
  pub fn is_embedded(&self) -> bool {
    self.dialect == Dialect::Sqlite
  }

  pub fn dialect(&self) -> Dialect {
    self.dialect
  }

  fn lock(&self) -> Result<MutexGuard<'_, Option<Box<dyn SqlDriver>>>> {
    self
      .driver
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))
  }

  fn with_conn<T>(&self, f: impl FnOnce(&mut dyn SqlDriver) -> Result<T>) -> Result<T> {
    let mut guard = self.lock()?;
    let driver = guard
      .as_mut()
      .ok_or_else(|| eyre!("Cache database is closed"))?;
    f(driver.as_mut())
  }

  /// Run `f` between BEGIN and COMMIT, rolling back if anything fails.
  fn transaction<T>(&self, f: impl FnOnce(&mut dyn SqlDriver) -> Result<T>) -> Result<T> {
    self.with_conn(|db| {
      let begin = db.dialect().begin();
      db.execute_batch(begin)?;
      let result = f(&mut *db).and_then(|value| db.execute_batch("COMMIT").map(|_| value));
      if result.is_err() {
        if let Err(e) = db.execute_batch("ROLLBACK") {
          warn!(error = %e, "Failed to roll back cache transaction");
        }
      }
      result
    })
  }
}

impl Drop for SqlStore {
  fn drop(&mut self) {
    let slot = match self.driver.get_mut() {
      Ok(slot) => slot,
      Err(poisoned) => poisoned.into_inner(),
    };
    if let Some(driver) = slot.take() {
      if let Err(e) = driver.close() {
        error!(error = %e, "Failed to close cache database");
      }
    }
  }
}

#[cfg(feature = "postgres")]
fn connect_postgres(config: &DatabaseConfig) -> Result<Box<dyn SqlDriver>> {
  let port = config
    .effective_port()
    .ok_or_else(|| eyre!("No port configured for PostgreSQL"))?;
  let driver = postgres_driver::PostgresDriver::connect(
    config.host()?,
    port,
    &config.db_name,
    &config.user,
    &config.effective_password(),
  )?;
  Ok(Box::new(driver))
}

#[cfg(not(feature = "postgres"))]
fn connect_postgres(_config: &DatabaseConfig) -> Result<Box<dyn SqlDriver>> {
  Err(eyre!(
    "PostgreSQL support is not compiled in; enable the `postgres` feature"
  ))
}

#[cfg(feature = "mysql")]
fn connect_mysql(config: &DatabaseConfig) -> Result<Box<dyn SqlDriver>> {
  let port = config
    .effective_port()
    .ok_or_else(|| eyre!("No port configured for MySQL"))?;
  let driver = mysql_driver::MysqlDriver::connect(
    config.host()?,
    port,
    &config.db_name,
    &config.user,
    &config.effective_password(),
  )?;
  Ok(Box::new(driver))
}

#[cfg(not(feature = "mysql"))]
fn connect_mysql(_config: &DatabaseConfig) -> Result<Box<dyn SqlDriver>> {
  Err(eyre!("MySQL support is not compiled in; enable the `mysql` feature"))
}

// ============================================================================
// Row helpers
// ============================================================================

fn space_exists(db: &mut dyn SqlDriver, space_id: &str) -> Result<bool> {
  let rows = db.query(
    "SELECT space_id FROM spaces WHERE space_id = ? LIMIT 1",
    &[space_id],
  )?;
  Ok(!rows.is_empty())
}

fn insert_space_row(db: &mut dyn SqlDriver, space: &Space, user: &str) -> Result<()> {
  let persistence = space.persistence.to_column();
  db.execute(
    "DELETE FROM spaces WHERE space_id = ? AND owning_user = ?",
    &[&space.id, user],
  )?;
  db.execute(
    "INSERT INTO spaces (space_id, owning_user, name, domain, space_type, persistence)
     VALUES (?, ?, ?, ?, ?, ?)",
    &[
      &space.id,
      user,
      &space.name,
      &space.domain,
      space.space_type.as_str(),
      &persistence,
    ],
  )?;
  Ok(())
}

/// Bring every user's row of the space in line with `space`.
fn update_space_rows(db: &mut dyn SqlDriver, space: &Space) -> Result<()> {
  let persistence = space.persistence.to_column();
  db.execute(
    "UPDATE spaces SET name = ?, domain = ?, space_type = ?, persistence = ?
     WHERE space_id = ?",
    &[
      &space.name,
      &space.domain,
      space.space_type.as_str(),
      &persistence,
      &space.id,
    ],
  )?;
  Ok(())
}

fn delete_children(db: &mut dyn SqlDriver, space_id: &str) -> Result<()> {
  db.execute("DELETE FROM channels WHERE space_id = ?", &[space_id])?;
  db.execute("DELETE FROM members WHERE space_id = ?", &[space_id])?;
  Ok(())
}

/// Replace members and channels of the space with the ones in `space`.
fn replace_children(db: &mut dyn SqlDriver, space: &Space) -> Result<()> {
  delete_children(db, &space.id)?;

  for channel in &space.channels {
    for (key, value) in &channel.properties {
      db.execute(
        "INSERT INTO channels (space_id, channel_type, property_key, property_value)
         VALUES (?, ?, ?, ?)",
        &[&space.id, &channel.channel_type, key, value],
      )?;
    }
  }

  for member in &space.members {
    db.execute(
      "INSERT INTO members (space_id, bare_address, role) VALUES (?, ?, ?)",
      &[&space.id, &member.address, member.role.as_str()],
    )?;
  }
  Ok(())
}

fn save_space_tx(db: &mut dyn SqlDriver, space: &Space, user: &str) -> Result<()> {
  let space = space.normalized();
  insert_space_row(db, &space, user)?;
  // Other users' rows of the same space carry the same fields.
  update_space_rows(db, &space)?;
  replace_children(db, &space)
}

fn load_members(db: &mut dyn SqlDriver, space_id: &str) -> Result<Vec<SpaceMember>> {
  let rows = db.query(
    "SELECT bare_address, role FROM members WHERE space_id = ?",
    &[space_id],
  )?;

  let members = rows
    .into_iter()
    .filter_map(|row| match row.as_slice() {
      [address, role] => match role.parse::<Role>() {
        Ok(role) => Some(SpaceMember::new(address.clone(), role)),
        Err(e) => {
          warn!(space_id, address = %address, error = %e, "Skipping cached member");
          None
        }
      },
      _ => None,
    })
    .collect();
  Ok(members)
}

fn load_channels(db: &mut dyn SqlDriver, space_id: &str) -> Result<Vec<SpaceChannel>> {
  let rows = db.query(
    "SELECT channel_type, property_key, property_value FROM channels WHERE space_id = ?",
    &[space_id],
  )?;

  let mut by_type: BTreeMap<String, SpaceChannel> = BTreeMap::new();
  for row in rows {
    if let [channel_type, key, value] = row.as_slice() {
      by_type
        .entry(channel_type.clone())
        .or_insert_with(|| SpaceChannel::new(channel_type.clone()))
        .properties
        .insert(key.clone(), value.clone());
    }
  }
  Ok(by_type.into_values().collect())
}

/// Build a space from `(space_id, name, domain, space_type, persistence)`.
fn load_space(db: &mut dyn SqlDriver, row: &Row) -> Result<Option<Space>> {
  let [space_id, name, domain, space_type, persistence] = row.as_slice() else {
    return Err(eyre!("Unexpected space row shape ({} columns)", row.len()));
  };

  let space_type = match space_type.parse::<SpaceType>() {
    Ok(t) => t,
    Err(e) => {
      warn!(space_id = %space_id, error = %e, "Skipping cached space");
      return Ok(None);
    }
  };
  let persistence = Persistence::from_column(persistence).unwrap_or_else(|e| {
    warn!(space_id = %space_id, error = %e, "Unreadable persistence, assuming off");
    Persistence::Off
  });

  let mut space = Space::new(
    space_id.clone(),
    name.clone(),
    domain.clone(),
    space_type,
    persistence,
  );
  space.members.extend(load_members(db, space_id)?);
  space.channels.extend(load_channels(db, space_id)?);
  Ok(Some(space))
}

/// Parse `(object_id, element_name, namespace, payload_body)` rows, skipping
/// bodies that are not well-formed.
fn parse_objects(rows: Vec<Row>) -> Vec<DataObject> {
  rows
    .into_iter()
    .filter_map(|row| {
      let [id, element_name, namespace, body] = row.as_slice() else {
        return None;
      };
      match DataObject::parse(id.clone(), element_name.clone(), namespace.clone(), body.clone()) {
        Ok(object) => Some(object),
        Err(e) => {
          warn!(object_id = %id, error = %e, "Skipping cached data object");
          None
        }
      }
    })
    .collect()
}

// ============================================================================
// CacheStore implementation
// ============================================================================

impl CacheStore for SqlStore {
  fn backend_name(&self) -> &'static str {
    match self.dialect {
      Dialect::Sqlite => "sqlite",
      Dialect::Postgres => "postgres",
      Dialect::Mysql => "mysql",
    }
  }

  fn save_space(&self, space: &Space, user: &str) -> Result<()> {
    space.validate()?;
    self.transaction(|db| save_space_tx(db, space, user))?;
    debug!(space_id = %space.id, user, "Cached space");
    Ok(())
  }

  fn save_spaces(&self, spaces: &[Space], user: &str) -> Result<()> {
    for space in spaces {
      space.validate()?;
    }
    self.transaction(|db| {
      for space in spaces {
        save_space_tx(db, space, user)?;
      }
      Ok(())
    })?;
    debug!(count = spaces.len(), user, "Cached spaces");
    Ok(())
  }

  fn space_ids_for_user(&self, user: &str) -> Result<Vec<String>> {
    self.with_conn(|db| {
      let rows = db.query(
        "SELECT space_id FROM spaces WHERE owning_user = ? ORDER BY space_id",
        &[user],
      )?;
      Ok(rows.into_iter().filter_map(|row| row.into_iter().next()).collect())
    })
  }

  fn cached_spaces_for_user(&self, user: &str) -> Result<Vec<Space>> {
    self.with_conn(|db| {
      let rows = db.query(
        "SELECT space_id, name, domain, space_type, persistence FROM spaces
         WHERE owning_user = ? ORDER BY space_id",
        &[user],
      )?;

      let mut spaces = Vec::with_capacity(rows.len());
      for row in &rows {
        if let Some(space) = load_space(db, row)? {
          spaces.push(space);
        }
      }
      Ok(spaces)
    })
  }

  fn is_space_cached(&self, space_id: &str) -> Result<bool> {
    self.with_conn(|db| space_exists(db, space_id))
  }

  fn update_cached_space(&self, space: &Space) -> Result<()> {
    space.validate()?;
    let space = &space.normalized();
    let updated = self.transaction(|db| {
      if !space_exists(db, &space.id)? {
        return Ok(false);
      }
      update_space_rows(db, space)?;
      replace_children(db, space)?;
      Ok(true)
    })?;

    if updated {
      debug!(space_id = %space.id, "Updated cached space");
    } else {
      debug!(space_id = %space.id, "Update for a space that is not cached");
    }
    Ok(())
  }

  fn delete_cached_space(&self, space_id: &str) -> Result<()> {
    self.transaction(|db| {
      db.execute("DELETE FROM spaces WHERE space_id = ?", &[space_id])?;
      delete_children(db, space_id)
    })?;
    debug!(space_id, "Deleted cached space");
    Ok(())
  }

  fn delete_cached_spaces_for_user(&self, user: &str) -> Result<()> {
    let removed = self.transaction(|db| {
      let rows = db.query("SELECT space_id FROM spaces WHERE owning_user = ?", &[user])?;
      let space_ids: Vec<String> = rows.into_iter().filter_map(|r| r.into_iter().next()).collect();

      db.execute("DELETE FROM spaces WHERE owning_user = ?", &[user])?;

      let mut removed = 0usize;
      for space_id in &space_ids {
        if !space_exists(db, space_id)? {
          delete_children(db, space_id)?;
          removed += 1;
        }
      }
      Ok(removed)
    })?;
    debug!(user, removed, "Deleted cached spaces for user");
    Ok(())
  }

  fn save_payload_to_send(
    &self,
    user: &str,
    payload_id: &str,
    space_id: &str,
    payload: &Payload,
  ) -> Result<()> {
    self.transaction(|db| {
      db.execute("DELETE FROM send_queue WHERE send_id = ?", &[payload_id])?;
      db.execute(
        "INSERT INTO send_queue (send_id, target_space, element_name, namespace, payload_body, owning_user)
         VALUES (?, ?, ?, ?, ?, ?)",
        &[
          payload_id,
          space_id,
          &payload.element_name,
          &payload.namespace,
          &payload.body,
          user,
        ],
      )?;
      Ok(())
    })?;
    debug!(payload_id, space_id, user, "Queued payload");
    Ok(())
  }

  fn payloads_to_send(&self, user: &str) -> Result<HashMap<String, Payload>> {
    self.with_conn(|db| {
      let rows = db.query(
        "SELECT send_id, element_name, namespace, payload_body FROM send_queue
         WHERE owning_user = ?",
        &[user],
      )?;

      Ok(
        rows
          .into_iter()
          .filter_map(|row| match <[String; 4]>::try_from(row) {
            Ok([id, element_name, namespace, body]) => {
              Some((id, Payload::new(element_name, namespace, body)))
            }
            Err(_) => None,
          })
          .collect(),
      )
    })
  }

  fn space_for_payload(&self, payload_id: &str) -> Result<Option<String>> {
    self.with_conn(|db| {
      let rows = db.query(
        "SELECT target_space FROM send_queue WHERE send_id = ?",
        &[payload_id],
      )?;
      Ok(rows.into_iter().next().and_then(|r| r.into_iter().next()))
    })
  }

  fn delete_payload_to_send(&self, payload_id: &str) -> Result<()> {
    self.with_conn(|db| {
      db.execute("DELETE FROM send_queue WHERE send_id = ?", &[payload_id])?;
      Ok(())
    })
  }

  fn clear_send_cache(&self, user: &str) -> Result<()> {
    let removed = self.with_conn(|db| {
      db.execute("DELETE FROM send_queue WHERE owning_user = ?", &[user])
    })?;
    debug!(user, removed, "Cleared send queue");
    Ok(())
  }

  fn is_data_object_cached(&self, object_id: &str) -> Result<bool> {
    self.with_conn(|db| {
      let rows = db.query(
        "SELECT object_id FROM data_objects WHERE object_id = ? LIMIT 1",
        &[object_id],
      )?;
      Ok(!rows.is_empty())
    })
  }

  fn save_data_object(&self, space_id: &str, object: &DataObject) -> Result<()> {
    self.transaction(|db| {
      db.execute("DELETE FROM data_objects WHERE object_id = ?", &[&object.id])?;
      db.execute(
        "INSERT INTO data_objects (object_id, owning_space, element_name, namespace, payload_body)
         VALUES (?, ?, ?, ?, ?)",
        &[
          &object.id,
          space_id,
          &object.element_name,
          &object.namespace,
          &object.body,
        ],
      )?;
      Ok(())
    })?;
    debug!(object_id = %object.id, space_id, "Cached data object");
    Ok(())
  }

  fn cached_data_objects(&self, space_id: &str) -> Result<Vec<DataObject>> {
    self.with_conn(|db| {
      let rows = db.query(
        "SELECT object_id, element_name, namespace, payload_body FROM data_objects
         WHERE owning_space = ?",
        &[space_id],
      )?;
      Ok(parse_objects(rows))
    })
  }

  fn delete_cached_data_objects_for_space(&self, space_id: &str) -> Result<()> {
    self.with_conn(|db| {
      db.execute("DELETE FROM data_objects WHERE owning_space = ?", &[space_id])?;
      Ok(())
    })
  }

  fn update_cached_data_objects(&self, supported: &HashSet<DataModel>) -> Result<()> {
    let pruned = self.transaction(|db| {
      let rows = db.query(
        "SELECT object_id, element_name, namespace, payload_body FROM data_objects",
        &[],
      )?;
      let stale: Vec<String> = parse_objects(rows)
        .into_iter()
        .filter(|o| !o.is_supported_by(supported))
        .map(|o| o.id)
        .collect();

      for id in &stale {
        db.execute("DELETE FROM data_objects WHERE object_id = ?", &[id])?;
      }
      Ok(stale.len())
    })?;
    debug!(pruned, "Pruned data objects with unsupported models");
    Ok(())
  }

  fn clear_data_cache(&self) -> Result<()> {
    self.transaction(|db| {
      db.execute("DELETE FROM send_queue", &[])?;
      db.execute("DELETE FROM data_objects", &[])?;
      Ok(())
    })
  }

  fn clear_spaces_cache(&self) -> Result<()> {
    self.transaction(|db| {
      db.execute("DELETE FROM channels", &[])?;
      db.execute("DELETE FROM members", &[])?;
      db.execute("DELETE FROM spaces", &[])?;
      Ok(())
    })
  }

  fn clear_saved_data_objects(&self) -> Result<()> {
    self.with_conn(|db| {
      db.execute("DELETE FROM data_objects", &[])?;
      Ok(())
    })
  }

  fn shutdown(&self) -> Result<()> {
    let driver = self.lock()?.take();
    match driver {
      Some(driver) => {
        driver.close()?;
        info!(backend = self.backend_name(), "Closed cache database");
      }
      None => debug!("Cache database already closed"),
    }
    Ok(())
  }
}
