//! Centralized server configuration.
//!
//! Loaded via the `config` crate from an optional TOML file, then from
//! environment variables prefixed with `LANTERN__`. Nested keys use `__`, so
//! `LANTERN__ENGINE__NODE_TIMEOUT_SECS=30` sets `engine.node_timeout_secs`.
//!
//! Without `database_url` the server keeps state in memory, and without
//! `nats_url` it uses the in-process queue.

use lantern_workflow::EngineConfig;
use serde::Deserialize;
use std::path::Path;

/// Environment variable naming an optional configuration file.
pub const CONFIG_FILE_ENV: &str = "LANTERN_CONFIG";

/// Server configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Address the HTTP server listens on.
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,

    /// PostgreSQL database connection URL.
    #[serde(default)]
    pub database_url: Option<String>,

    /// Maximum pooled database connections.
    #[serde(default = "default_max_connections")]
    pub database_max_connections: u32,

    /// NATS server URL.
    #[serde(default)]
    pub nats_url: Option<String>,

    /// Consumers started per queue.
    #[serde(default = "default_worker_concurrency")]
    pub worker_concurrency: usize,

    /// Engine tuning.
    #[serde(default)]
    pub engine: EngineConfig,
}

fn default_bind_addr() -> String {
    "127.0.0.1:3000".to_string()
}

fn default_max_connections() -> u32 {
    5
}

fn default_worker_concurrency() -> usize {
    4
}

impl ServerConfig {
    /// Loads configuration from the file named by `LANTERN_CONFIG`, if any,
    /// and the environment.
    ///
    /// # Errors
    ///
    /// Returns an error if the file is unreadable or a value is invalid.
    pub fn from_env() -> Result<Self, config::ConfigError> {
        let file = std::env::var_os(CONFIG_FILE_ENV);
        Self::load(file.as_deref().map(Path::new), environment())
    }

    /// Loads configuration from an optional file and an environment source.
    ///
    /// Environment values override file values.
    ///
    /// # Errors
    ///
    /// Returns an error if the file is unreadable or a value is invalid.
    pub fn load(
        file: Option<&Path>,
        environment: config::Environment,
    ) -> Result<Self, config::ConfigError> {
        let mut builder = config::Config::builder();
        if let Some(path) = file {
            builder = builder.add_source(
                config::File::from(path)
                    .format(config::FileFormat::Toml)
                    .required(true),
            );
        }
        builder
            .add_source(environment)
            .build()?
            .try_deserialize()
    }
}

/// The `LANTERN__` environment source.
#[must_use]
pub fn environment() -> config::Environment {
    config::Environment::with_prefix("LANTERN")
        .prefix_separator("__")
        .separator("__")
        .try_parsing(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    fn env(vars: &[(&str, &str)]) -> config::Environment {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        environment().source(Some(vars))
    }

    #[test]
    fn defaults_without_sources() {
        let config = ServerConfig::load(None, env(&[])).unwrap();
        assert_eq!(config.bind_addr, "127.0.0.1:3000");
        assert!(config.database_url.is_none());
        assert!(config.nats_url.is_none());
        assert_eq!(config.worker_concurrency, 4);
        assert_eq!(config.engine, EngineConfig::default());
    }

    #[test]
    fn reads_toml_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            r#"
bind_addr = "0.0.0.0:8080"
nats_url = "nats://localhost:4222"
worker_concurrency = 8

[engine]
node_timeout_secs = 30
"#
        )
        .unwrap();

        let config = ServerConfig::load(Some(file.path()), env(&[])).unwrap();
        assert_eq!(config.bind_addr, "0.0.0.0:8080");
        assert_eq!(config.nats_url.as_deref(), Some("nats://localhost:4222"));
        assert_eq!(config.worker_concurrency, 8);
        assert_eq!(config.engine.node_timeout_secs, Some(30));
        assert_eq!(config.engine.max_update_attempts, 8);
    }

    #[test]
    fn environment_overrides_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(file, "worker_concurrency = 8").unwrap();

        let config = ServerConfig::load(
            Some(file.path()),
            env(&[
                ("LANTERN__WORKER_CONCURRENCY", "2"),
                ("LANTERN__ENGINE__MAX_UPDATE_ATTEMPTS", "3"),
            ]),
        )
        .unwrap();
        assert_eq!(config.worker_concurrency, 2);
        assert_eq!(config.engine.max_update_attempts, 3);
    }

    #[test]
    fn missing_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent.toml");
        assert!(ServerConfig::load(Some(&path), env(&[])).is_err());
    }
}
