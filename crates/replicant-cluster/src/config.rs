//! Configuration for a Replicant cluster session.

use std::path::PathBuf;

use serde::Deserialize;

/// Top-level cluster configuration.
///
/// Loaded from `replicant.toml` `[cluster]` section or
/// `REPLICANT__CLUSTER__*` environment variables.
#[derive(Debug, Clone, Deserialize)]
pub struct ClusterConfig {
    /// Root directory for member data (default: "./target/dbs").
    #[serde(default = "default_data_dir")]
    pub data_dir: String,

    /// Number of slaves started next to the master.
    #[serde(default = "default_slaves")]
    pub slaves: usize,

    /// Keep at most this many entries in the master's log. Slaves that
    /// fall further behind hit a replication gap and must resynchronize.
    #[serde(default)]
    pub log_retain: Option<u64>,
}

impl ClusterConfig {
    pub fn data_path(&self) -> PathBuf {
        PathBuf::from(&self.data_dir)
    }
}

fn default_data_dir() -> String {
    "./target/dbs".to_string()
}

fn default_slaves() -> usize {
    1
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            slaves: default_slaves(),
            log_retain: None,
        }
    }
}

/// Load the `[cluster]` section, falling back to defaults when absent.
pub fn load(file_prefix: &str) -> anyhow::Result<ClusterConfig> {
    let cfg = config::Config::builder()
        .add_source(config::File::with_name(file_prefix).required(false))
        .add_source(
            config::Environment::with_prefix("REPLICANT")
                .separator("__")
                .try_parsing(true),
        )
        .build()?;

    match cfg.get::<ClusterConfig>("cluster") {
        Ok(c) => Ok(c),
        Err(_) => Ok(ClusterConfig::default()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ClusterConfig::default();
        assert_eq!(config.data_dir, "./target/dbs");
        assert_eq!(config.slaves, 1);
        assert!(config.log_retain.is_none());
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let prefix = dir.path().join("replicant");
        std::fs::write(
            dir.path().join("replicant.toml"),
            "[cluster]\ndata_dir = \"/tmp/cluster\"\nslaves = 3\nlog_retain = 100\n",
        )
        .unwrap();

        let config = load(prefix.to_str().unwrap()).unwrap();
        assert_eq!(config.data_dir, "/tmp/cluster");
        assert_eq!(config.slaves, 3);
        assert_eq!(config.log_retain, Some(100));
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let prefix = dir.path().join("absent");
        let config = load(prefix.to_str().unwrap()).unwrap();
        assert_eq!(config.slaves, 1);
    }
}
