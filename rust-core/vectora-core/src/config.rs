//! # Configuration
//!
//! Read-only settings loaded once at process start from a TOML file.
//!
//! [`Config`] is the generic key/value view application code reads its own
//! settings from; lookups never fail and fall back to empty/zero values for
//! missing or mistyped keys. Keys may be dotted (`"mail.host"`) to reach into
//! tables.
//!
//! [`ServerConfig`] is the typed `[server]` section:
//!
//! ```toml
//! [server]
//! host = "0.0.0.0"
//! port = 8080
//! max_body_bytes = 1048576
//! tmp_dir = "/var/tmp/vectora"
//! error_timeout_secs = 60
//! supported_locales = ["en", "ru"]
//!
//! [server.logging]
//! json = true
//! filter = "vectora=debug"
//! ```

use crate::error::{Error, Result};
use serde::Deserialize;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use toml::{Table, Value};

/// Generic key/value configuration
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Config {
    data: Table,
}

impl Config {
    /// Load a TOML file
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` if the file cannot be read or parsed.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| Error::Config {
            reason: format!("cannot read {}: {e}", path.display()),
        })?;
        content.parse()
    }

    fn lookup(&self, key: &str) -> Option<&Value> {
        let mut parts = key.split('.');
        let mut current = self.data.get(parts.next()?)?;
        for part in parts {
            current = current.as_table()?.get(part)?;
        }
        Some(current)
    }

    /// String value, empty if missing
    #[must_use]
    pub fn str(&self, key: &str) -> &str {
        self.lookup(key).and_then(Value::as_str).unwrap_or_default()
    }

    /// Integer value, 0 if missing
    #[must_use]
    pub fn int(&self, key: &str) -> i64 {
        self.lookup(key).and_then(Value::as_integer).unwrap_or_default()
    }

    /// Boolean value, false if missing
    #[must_use]
    pub fn bool(&self, key: &str) -> bool {
        self.lookup(key).and_then(Value::as_bool).unwrap_or_default()
    }

    /// Float value, 0.0 if missing
    #[must_use]
    pub fn float64(&self, key: &str) -> f64 {
        self.lookup(key).and_then(Value::as_float).unwrap_or_default()
    }

    /// Array value, empty if missing
    #[must_use]
    pub fn array(&self, key: &str) -> &[Value] {
        self.lookup(key)
            .and_then(Value::as_array)
            .map_or(&[], Vec::as_slice)
    }

    /// String elements of an array; other elements are skipped
    #[must_use]
    pub fn array_str(&self, key: &str) -> Vec<String> {
        self.array(key)
            .iter()
            .filter_map(Value::as_str)
            .map(str::to_string)
            .collect()
    }

    /// Table value, `None` if missing
    #[must_use]
    pub fn map(&self, key: &str) -> Option<&Table> {
        self.lookup(key).and_then(Value::as_table)
    }

    /// String entries of a table; other entries are skipped
    #[must_use]
    pub fn map_str(&self, key: &str) -> HashMap<String, String> {
        self.map(key)
            .into_iter()
            .flatten()
            .filter_map(|(k, v)| v.as_str().map(|v| (k.clone(), v.to_string())))
            .collect()
    }

    /// Deserialize a section into a typed value
    ///
    /// A missing section deserializes from an empty table.
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` if the section does not fit `T`.
    pub fn section<T: serde::de::DeserializeOwned>(&self, key: &str) -> Result<T> {
        let value = self
            .lookup(key)
            .cloned()
            .unwrap_or_else(|| Value::Table(Table::new()));
        value.try_into().map_err(|e: toml::de::Error| Error::Config {
            reason: format!("invalid [{key}] section: {e}"),
        })
    }
}

impl FromStr for Config {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let data = s.parse::<Table>().map_err(|e| Error::Config {
            reason: e.to_string(),
        })?;
        Ok(Self { data })
    }
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Emit JSON lines instead of human-readable output
    pub json: bool,
    /// `EnvFilter` directives, overridden by `RUST_LOG`
    pub filter: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            json: false,
            filter: "vectora=info".to_string(),
        }
    }
}

/// HTTP server configuration
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Interface to bind
    pub host: String,
    /// Port to bind
    pub port: u16,
    /// Default request body limit in bytes
    pub max_body_bytes: u64,
    /// Staging directory for uploaded files
    pub tmp_dir: PathBuf,
    /// Grace period for in-flight requests on shutdown
    pub shutdown_timeout_secs: u64,
    /// Window within which identical faults are logged once
    pub error_timeout_secs: u64,
    /// Locale used when negotiation finds nothing supported
    pub default_locale: String,
    /// Locales the application ships translations for
    pub supported_locales: Vec<String>,
    /// Address that receives fault reports by mail
    pub admin_email: Option<String>,
    /// Logging output
    pub logging: LoggingConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        let tmp_dir = std::env::current_dir()
            .map(|dir| dir.join("tmp"))
            .unwrap_or_else(|_| PathBuf::from("tmp"));

        Self {
            host: "127.0.0.1".to_string(),
            port: 80,
            max_body_bytes: 128 * 1024,
            tmp_dir,
            shutdown_timeout_secs: 30,
            error_timeout_secs: 60,
            default_locale: "en".to_string(),
            supported_locales: vec!["en".to_string()],
            admin_email: None,
            logging: LoggingConfig::default(),
        }
    }
}

impl ServerConfig {
    /// Read the `[server]` section of `config`
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` if the section has fields of the wrong type.
    pub fn from_config(config: &Config) -> Result<Self> {
        config.section("server")
    }

    /// Load the `[server]` section from a TOML file
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` if the file cannot be read or parsed.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        Self::from_config(&Config::load(path)?)
    }

    /// Socket address to bind
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` if `host` is not an IP address.
    pub fn address(&self) -> Result<SocketAddr> {
        let ip = self.host.parse().map_err(|e| Error::Config {
            reason: format!("invalid host '{}': {e}", self.host),
        })?;
        Ok(SocketAddr::new(ip, self.port))
    }

    /// Shutdown grace period
    #[must_use]
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }

    /// Fault deduplication window
    #[must_use]
    pub fn error_timeout(&self) -> Duration {
        Duration::from_secs(self.error_timeout_secs)
    }
}
