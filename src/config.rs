use figment::providers::{Env, Format, Toml};
use figment::Figment;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{Result, TransferError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MysqlFlavor {
    Mysql,
    MariaDb,
}

impl Default for MysqlFlavor {
    fn default() -> Self {
        MysqlFlavor::Mysql
    }
}

/// Source MySQL connection settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SourceConfig {
    pub host: String,
    #[serde(default = "default_mysql_port")]
    pub port: u16,
    pub username: String,
    pub password: String,
    #[serde(default = "default_server_id")]
    pub server_id: u32,
    #[serde(default = "default_charset")]
    pub charset: String,
    #[serde(default)]
    pub flavor: MysqlFlavor,
    /// Path to a `mysqldump`-compatible executable, used for the initial full
    /// dump before replication starts. Not exercised by this engine directly
    /// (the binlog client replays from a checkpoint), but accepted and
    /// recorded since operators configure it alongside the source.
    #[serde(default)]
    pub dump_exec: Option<PathBuf>,
    #[serde(default)]
    pub skip_master_data: bool,
}

fn default_mysql_port() -> u16 {
    3306
}

fn default_server_id() -> u32 {
    1001
}

fn default_charset() -> String {
    "utf8mb4".to_string()
}

/// One `[[rules]]` table from the config file, before wildcard expansion.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RuleTemplate {
    pub schema: String,
    pub table: String,
    pub columns: Option<Vec<String>>,
    pub topic_template: Option<String>,
    pub key_template: Option<String>,
    pub script_path: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DestinationConfig {
    Kafka {
        brokers: String,
        #[serde(default)]
        acks: Option<String>,
    },
    Redis {
        url: String,
    },
    HttpIndex {
        base_url: String,
        #[serde(default)]
        bearer_token: Option<String>,
    },
    Log,
}

/// Top-level configuration, loaded from a TOML file overlaid with `TRANSFER_`
/// prefixed environment variables, the same figment+serde layering
/// `inputlayer-inputlayer` uses for its own config.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EngineConfig {
    pub source: SourceConfig,
    pub rules: Vec<RuleTemplate>,
    pub destination: DestinationConfig,
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    #[serde(default)]
    pub skip_no_pk_table: bool,
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    #[serde(default = "default_metrics_interval_secs")]
    pub metrics_interval_secs: u64,
    /// Metrics-loop on/off switch.
    #[serde(default = "default_true")]
    pub is_exporter_enable: bool,
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("./data")
}

fn default_queue_capacity() -> usize {
    4096
}

fn default_metrics_interval_secs() -> u64 {
    10
}

fn default_true() -> bool {
    true
}

impl EngineConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let config: EngineConfig = Figment::new()
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed("TRANSFER_").split("__"))
            .extract()
            .map_err(|e| TransferError::ConfigInvalid(e.to_string()))?;

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.rules.is_empty() {
            return Err(TransferError::ConfigInvalid(
                "at least one rule must be configured".to_string(),
            ));
        }
        for rule in &self.rules {
            if rule.table.trim().is_empty() || rule.schema.trim().is_empty() {
                return Err(TransferError::ConfigInvalid(
                    "rule schema/table must not be empty".to_string(),
                ));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn source_config() -> SourceConfig {
        SourceConfig {
            host: "127.0.0.1".to_string(),
            port: 3306,
            username: "root".to_string(),
            password: String::new(),
            server_id: 1001,
            charset: default_charset(),
            flavor: MysqlFlavor::Mysql,
            dump_exec: None,
            skip_master_data: false,
        }
    }

    #[test]
    fn rejects_empty_rule_set() {
        let config = EngineConfig {
            source: source_config(),
            rules: vec![],
            destination: DestinationConfig::Log,
            data_dir: default_data_dir(),
            skip_no_pk_table: false,
            queue_capacity: default_queue_capacity(),
            metrics_interval_secs: default_metrics_interval_secs(),
            is_exporter_enable: true,
        };
        assert!(config.validate().is_err());
    }
}
