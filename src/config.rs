use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Environment variable consulted when the config omits the password.
pub const PASSWORD_ENV: &str = "MIRROR_DB_PASSWORD";

/// Which cache backend to run.
#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum DatabaseType {
  /// No database: in-memory cache, lost on restart
  None,
  /// SQLite file owned by this process
  #[default]
  Embedded,
  /// PostgreSQL server
  Postgres,
  /// MySQL / MariaDB server
  Mysql,
}

impl DatabaseType {
  /// Port used when the config does not name one.
  pub fn default_port(&self) -> Option<u16> {
    match self {
      Self::Postgres => Some(5432),
      Self::Mysql => Some(3306),
      Self::None | Self::Embedded => None,
    }
  }
}

/// Construction-time cache configuration. There is no runtime reconfiguration.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct DatabaseConfig {
  #[serde(default, rename = "type")]
  pub db_type: DatabaseType,
  /// Directory of the embedded database, or host name of a server
  #[serde(default)]
  pub location: Option<String>,
  #[serde(default)]
  pub port: Option<u16>,
  #[serde(default = "default_db_name")]
  pub db_name: String,
  #[serde(default = "default_db_user")]
  pub user: String,
  #[serde(default)]
  pub password: Option<String>,
}

fn default_db_name() -> String {
  "SDKDb".to_string()
}

fn default_db_user() -> String {
  "SA".to_string()
}

impl Default for DatabaseConfig {
  fn default() -> Self {
    Self {
      db_type: DatabaseType::Embedded,
      location: None,
      port: None,
      db_name: default_db_name(),
      user: default_db_user(),
      password: None,
    }
  }
}

impl DatabaseConfig {
  /// Embedded database stored in `location`.
  pub fn embedded(location: impl Into<String>) -> Self {
    Self {
      location: Some(location.into()),
      ..Self::default()
    }
  }

  /// Embedded database in the platform data directory.
  pub fn embedded_default() -> Self {
    Self::default()
  }

  pub fn postgres(host: &str, db_name: &str, user: &str, password: &str) -> Self {
    Self::networked(DatabaseType::Postgres, host, db_name, user, password)
  }

  pub fn mysql(host: &str, db_name: &str, user: &str, password: &str) -> Self {
    Self::networked(DatabaseType::Mysql, host, db_name, user, password)
  }

  /// No database at all: everything is cached in memory during runtime.
  pub fn disabled() -> Self {
    Self {
      db_type: DatabaseType::None,
      ..Self::default()
    }
  }

  fn networked(db_type: DatabaseType, host: &str, db_name: &str, user: &str, password: &str) -> Self {
    Self {
      db_type,
      location: Some(host.to_string()),
      port: None,
      db_name: db_name.to_string(),
      user: user.to_string(),
      password: Some(password.to_string()),
    }
  }

  /// Parse a YAML document holding a `DatabaseConfig`.
  pub fn from_yaml_str(contents: &str) -> Result<Self> {
    serde_yaml::from_str(contents).map_err(|e| eyre!("Failed to parse cache config: {}", e))
  }

  pub fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read cache config {}: {}", path.display(), e))?;

    Self::from_yaml_str(&contents)
      .map_err(|e| eyre!("Failed to parse cache config {}: {}", path.display(), e))
  }

  /// Path of the embedded SQLite file: `<location>/<db_name>.db`.
  ///
  /// Without a location the platform data directory is used.
  pub fn embedded_path(&self) -> Result<PathBuf> {
    let dir = match self.location.as_deref() {
      Some(location) if !location.trim().is_empty() => PathBuf::from(location),
      _ => Self::default_dir()?,
    };
    Ok(dir.join(format!("{}.db", self.db_name)))
  }

  fn default_dir() -> Result<PathBuf> {
    let data_dir = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or_else(|| eyre!("Could not determine data directory"))?;

    Ok(data_dir.join("mirror-sdk"))
  }

  /// Host of a networked database.
  pub fn host(&self) -> Result<&str> {
    self
      .location
      .as_deref()
      .filter(|h| !h.trim().is_empty())
      .ok_or_else(|| eyre!("A {:?} cache database needs a host name", self.db_type))
  }

  pub fn effective_port(&self) -> Option<u16> {
    self.port.or_else(|| self.db_type.default_port())
  }

  /// Password from the config, else from `MIRROR_DB_PASSWORD`, else empty.
  pub fn effective_password(&self) -> String {
    self
      .password
      .clone()
      .or_else(|| std::env::var(PASSWORD_ENV).ok())
      .unwrap_or_default()
  }
}
