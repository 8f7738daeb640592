//! Typed sync configuration.

use chrono::{DateTime, TimeZone, Utc};
use fundsnap_common::SnapshotCompression;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Errors from loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid TOML in {path}: {message}")]
    Parse { path: PathBuf, message: String },

    #[error("invalid value for {field}: {message}")]
    Invalid { field: &'static str, message: String },

    #[error("environment variable {0} is not set")]
    MissingEnv(String),
}

impl From<ConfigError> for fundsnap_common::Error {
    fn from(e: ConfigError) -> Self {
        fundsnap_common::Error::Config(e.to_string())
    }
}

/// Top-level sync configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Location of the snapshot Parquet file.
    pub snapshot_path: PathBuf,

    /// Block compressor for snapshot writes (`snappy` or `zstd`).
    pub compression: SnapshotCompression,

    /// Exclusive lower bound used by `full` runs.
    pub full_load_start: DateTime<Utc>,

    pub logging: LoggingConfig,

    pub warehouse: WarehouseConfig,

    pub queries: QueryPaths,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            snapshot_path: PathBuf::from("daily_funding.parquet"),
            compression: SnapshotCompression::default(),
            full_load_start: default_full_load_start(),
            logging: LoggingConfig::default(),
            warehouse: WarehouseConfig::default(),
            queries: QueryPaths::default(),
        }
    }
}

fn default_full_load_start() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 11, 1, 0, 0, 0)
        .single()
        .unwrap_or(DateTime::<Utc>::UNIX_EPOCH)
}

/// Process-wide logging settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Directory receiving one `YYYY-MM-DD.log` file per day.
    pub dir: PathBuf,
    /// Default filter directive; `RUST_LOG` takes precedence.
    pub level: String,
    /// Emit JSON lines instead of human-readable text.
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("logs"),
            level: "info".to_string(),
            json: false,
        }
    }
}

/// BigQuery connection settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WarehouseConfig {
    /// Billing project the query jobs run in.
    pub project_id: String,
    /// Job location (dataset region).
    pub location: String,
    /// `project.dataset` substituted for `{source_dataset}` in query text.
    pub source_dataset: String,
    /// Environment variable holding an OAuth2 bearer token.
    pub token_env: String,
    /// Rows per result page.
    pub page_size: u32,
    /// Server-side wait per poll of an unfinished job.
    pub poll_timeout_ms: u32,
}

impl Default for WarehouseConfig {
    fn default() -> Self {
        Self {
            project_id: String::new(),
            location: "US".to_string(),
            source_dataset: "kz-dp-prod.kz_pg_to_bq_realtime".to_string(),
            token_env: "BIGQUERY_ACCESS_TOKEN".to_string(),
            page_size: 10_000,
            poll_timeout_ms: 10_000,
        }
    }
}

impl WarehouseConfig {
    /// Read the bearer token from the configured environment variable.
    pub fn access_token(&self) -> Result<String, ConfigError> {
        match std::env::var(&self.token_env) {
            Ok(token) if !token.trim().is_empty() => Ok(token.trim().to_string()),
            _ => Err(ConfigError::MissingEnv(self.token_env.clone())),
        }
    }

    /// Checks needed only when a live warehouse client is built.
    pub fn validate_for_client(&self) -> Result<(), ConfigError> {
        if self.project_id.trim().is_empty() {
            return Err(ConfigError::Invalid {
                field: "warehouse.project_id",
                message: "must be set to run queries".to_string(),
            });
        }
        if self.location.trim().is_empty() {
            return Err(ConfigError::Invalid {
                field: "warehouse.location",
                message: "must not be empty".to_string(),
            });
        }
        Ok(())
    }
}

/// Optional overrides for the embedded aggregation queries.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueryPaths {
    pub incremental_path: Option<PathBuf>,
    pub full_path: Option<PathBuf>,
}

impl SyncConfig {
    /// Load configuration from a TOML file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse_toml(&content).map_err(|e| match e {
            ConfigError::Parse { message, .. } => ConfigError::Parse {
                path: path.to_path_buf(),
                message,
            },
            other => other,
        })
    }

    /// Parse configuration from a TOML string.
    pub fn parse_toml(content: &str) -> Result<Self, ConfigError> {
        let config: SyncConfig = toml::from_str(content).map_err(|e| ConfigError::Parse {
            path: PathBuf::from("<inline>"),
            message: e.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Semantic validation independent of the warehouse client.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.snapshot_path.as_os_str().is_empty() {
            return Err(ConfigError::Invalid {
                field: "snapshot_path",
                message: "must not be empty".to_string(),
            });
        }
        if self.logging.dir.as_os_str().is_empty() {
            return Err(ConfigError::Invalid {
                field: "logging.dir",
                message: "must not be empty".to_string(),
            });
        }
        if self.warehouse.page_size == 0 {
            return Err(ConfigError::Invalid {
                field: "warehouse.page_size",
                message: "must be positive".to_string(),
            });
        }
        if self.full_load_start > Utc::now() {
            return Err(ConfigError::Invalid {
                field: "full_load_start",
                message: format!("{} is in the future", self.full_load_start),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_production_layout() {
        let config = SyncConfig::default();
        assert_eq!(config.snapshot_path, PathBuf::from("daily_funding.parquet"));
        assert_eq!(config.logging.dir, PathBuf::from("logs"));
        assert_eq!(
            config.full_load_start.to_rfc3339(),
            "2025-11-01T00:00:00+00:00"
        );
        assert!(config.validate().is_ok());
    }

    #[test]
    fn partial_toml_keeps_defaults() {
        let config = SyncConfig::parse_toml(
            r#"
            snapshot_path = "/data/funding.parquet"

            [warehouse]
            project_id = "analytics-prod"
            "#,
        )
        .unwrap();
        assert_eq!(config.snapshot_path, PathBuf::from("/data/funding.parquet"));
        assert_eq!(config.warehouse.project_id, "analytics-prod");
        assert_eq!(config.warehouse.location, "US");
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn full_load_start_parses_rfc3339() {
        let config = SyncConfig::parse_toml(r#"full_load_start = "2025-06-01T00:00:00Z""#).unwrap();
        assert_eq!(config.full_load_start.to_rfc3339(), "2025-06-01T00:00:00+00:00");
    }

    #[test]
    fn compression_is_configurable() {
        assert_eq!(SyncConfig::default().compression, SnapshotCompression::Snappy);
        let config = SyncConfig::parse_toml(r#"compression = "zstd""#).unwrap();
        assert_eq!(config.compression, SnapshotCompression::Zstd);
        let err = SyncConfig::parse_toml(r#"compression = "lz4""#).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }

    #[test]
    fn zero_page_size_rejected() {
        let err = SyncConfig::parse_toml("[warehouse]\npage_size = 0").unwrap_err();
        assert!(matches!(
            err,
            ConfigError::Invalid {
                field: "warehouse.page_size",
                ..
            }
        ));
    }

    #[test]
    fn malformed_toml_is_parse_error() {
        let err = SyncConfig::parse_toml("snapshot_path = ").unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }

    #[test]
    fn client_validation_requires_project() {
        let warehouse = WarehouseConfig::default();
        assert!(warehouse.validate_for_client().is_err());
        let warehouse = WarehouseConfig {
            project_id: "p".into(),
            ..WarehouseConfig::default()
        };
        assert!(warehouse.validate_for_client().is_ok());
    }

    #[test]
    fn from_file_reports_path() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("fundsnap.toml");
        std::fs::write(&path, "[logging]\njson = true\n").unwrap();
        let config = SyncConfig::from_file(&path).unwrap();
        assert!(config.logging.json);

        let missing = SyncConfig::from_file(&dir.path().join("nope.toml")).unwrap_err();
        assert!(missing.to_string().contains("nope.toml"));
    }
}
