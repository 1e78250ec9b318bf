//! Tables of the durable cache.
//!
//! Identifiers are `VARCHAR(255)` so composite keys stay within MySQL's index
//! limit; serialized bodies are `TEXT`. Column names avoid `type`, `key`,
//! `value` and `user`, which are reserved in some dialects.

use super::driver::Dialect;

const CREATE_TABLES: [&str; 5] = [
  // One row per (space, local user) association
  r#"CREATE TABLE IF NOT EXISTS spaces (
    space_id VARCHAR(255) NOT NULL,
    owning_user VARCHAR(255) NOT NULL,
    name TEXT NOT NULL,
    domain TEXT NOT NULL,
    space_type VARCHAR(16) NOT NULL,
    persistence VARCHAR(64) NOT NULL,
    PRIMARY KEY (space_id, owning_user)
)"#,
  r#"CREATE TABLE IF NOT EXISTS channels (
    space_id VARCHAR(255) NOT NULL,
    channel_type VARCHAR(255) NOT NULL,
    property_key VARCHAR(255) NOT NULL,
    property_value TEXT NOT NULL,
    PRIMARY KEY (space_id, channel_type, property_key)
)"#,
  r#"CREATE TABLE IF NOT EXISTS members (
    space_id VARCHAR(255) NOT NULL,
    bare_address VARCHAR(255) NOT NULL,
    role VARCHAR(16) NOT NULL,
    PRIMARY KEY (space_id, bare_address)
)"#,
  r#"CREATE TABLE IF NOT EXISTS send_queue (
    send_id VARCHAR(255) NOT NULL PRIMARY KEY,
    target_space VARCHAR(255) NOT NULL,
    element_name VARCHAR(255) NOT NULL,
    namespace TEXT NOT NULL,
    payload_body TEXT NOT NULL,
    owning_user VARCHAR(255) NOT NULL
)"#,
  r#"CREATE TABLE IF NOT EXISTS data_objects (
    object_id VARCHAR(255) NOT NULL PRIMARY KEY,
    owning_space VARCHAR(255) NOT NULL,
    element_name VARCHAR(255) NOT NULL,
    namespace TEXT NOT NULL,
    payload_body TEXT NOT NULL
)"#,
];

const CREATE_INDEXES: [&str; 3] = [
  "CREATE INDEX IF NOT EXISTS idx_spaces_user ON spaces(owning_user)",
  "CREATE INDEX IF NOT EXISTS idx_send_queue_user ON send_queue(owning_user)",
  "CREATE INDEX IF NOT EXISTS idx_data_objects_space ON data_objects(owning_space)",
];

/// Idempotent statements creating the cache schema.
///
/// MySQL has no `CREATE INDEX IF NOT EXISTS`, so it runs on primary keys only.
pub fn statements(dialect: Dialect) -> Vec<&'static str> {
  let mut statements = CREATE_TABLES.to_vec();
  if dialect != Dialect::Mysql {
    statements.extend_from_slice(&CREATE_INDEXES);
  }
  statements
}
