//! fundsnap configuration loading and validation.
//!
//! This crate provides:
//! - Typed Rust structs for the TOML sync configuration
//! - Config resolution (CLI → env → working dir → XDG → defaults)
//! - Versioned aggregation query bundles with integrity hashes

pub mod query;
pub mod resolve;
pub mod settings;

pub use query::{QueryBundle, QueryBundleError, QueryKind};
pub use resolve::{resolve_config, resolve_config_with_env, ConfigSource};
pub use settings::{ConfigError, LoggingConfig, QueryPaths, SyncConfig, WarehouseConfig};
