//! Versioned aggregation query bundles.
//!
//! The warehouse aggregation is opaque to the sync core: it is SQL text with
//! one bound parameter, `@watermark`. A `QueryBundle` pairs that text with a
//! name, a version and a SHA-256 of the rendered SQL so every fetch can log
//! exactly which query generation produced the rows.
//!
//! # Sources
//!
//! 1. An operator-supplied file (`[queries]` in the config).
//! 2. The embedded defaults compiled into the binary.
//!
//! A bundle file is plain SQL. An optional first-line header
//! `-- fundsnap-query: <name> <version>` names it; otherwise the file stem
//! and version `custom` are used.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::Path;

/// Placeholder replaced with `WarehouseConfig::source_dataset`.
pub const DATASET_PLACEHOLDER: &str = "{source_dataset}";

/// The only bound parameter a query may rely on.
pub const WATERMARK_PARAM: &str = "@watermark";

const HEADER_PREFIX: &str = "-- fundsnap-query:";

const EMBEDDED_INCREMENTAL_SQL: &str = include_str!("queries/incremental.sql");
const EMBEDDED_FULL_SQL: &str = include_str!("queries/full.sql");

/// Which run mode a query serves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryKind {
    Incremental,
    Full,
}

impl std::fmt::Display for QueryKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            QueryKind::Incremental => write!(f, "incremental"),
            QueryKind::Full => write!(f, "full"),
        }
    }
}

/// Errors that can occur while loading a query bundle.
#[derive(Debug, thiserror::Error)]
pub enum QueryBundleError {
    #[error("I/O error reading query: {0}")]
    Io(#[from] std::io::Error),

    #[error("query '{0}' is empty")]
    Empty(String),

    #[error("query '{0}' does not reference @watermark")]
    MissingWatermarkParam(String),

    #[error("query '{name}' still contains placeholder {placeholder} after rendering")]
    UnrenderedPlaceholder { name: String, placeholder: String },
}

impl From<QueryBundleError> for fundsnap_common::Error {
    fn from(e: QueryBundleError) -> Self {
        fundsnap_common::Error::InvalidQuery(e.to_string())
    }
}

/// A rendered, hashed aggregation query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryBundle {
    pub name: String,
    pub version: String,
    pub kind: QueryKind,
    /// SQL with `{source_dataset}` already substituted.
    pub sql: String,
    /// SHA-256 (hex) of `sql`.
    pub sql_hash: String,
}

impl QueryBundle {
    /// Version tag of the embedded queries.
    pub const EMBEDDED_VERSION: &'static str = "2";

    /// Build a bundle from raw SQL, rendering and validating it.
    pub fn new(
        name: impl Into<String>,
        version: impl Into<String>,
        kind: QueryKind,
        raw_sql: &str,
        source_dataset: &str,
    ) -> Result<Self, QueryBundleError> {
        let name = name.into();
        let sql = raw_sql.replace(DATASET_PLACEHOLDER, source_dataset);

        let body = strip_comments(&sql);
        if body.trim().is_empty() {
            return Err(QueryBundleError::Empty(name));
        }
        if !body.contains(WATERMARK_PARAM) {
            return Err(QueryBundleError::MissingWatermarkParam(name));
        }
        if sql.contains(DATASET_PLACEHOLDER) {
            return Err(QueryBundleError::UnrenderedPlaceholder {
                name,
                placeholder: DATASET_PLACEHOLDER.to_string(),
            });
        }

        let sql_hash = sha256_hex(sql.as_bytes());
        Ok(Self {
            name,
            version: version.into(),
            kind,
            sql,
            sql_hash,
        })
    }

    /// The query compiled into the binary for `kind`.
    pub fn embedded(kind: QueryKind, source_dataset: &str) -> Result<Self, QueryBundleError> {
        let raw = match kind {
            QueryKind::Incremental => EMBEDDED_INCREMENTAL_SQL,
            QueryKind::Full => EMBEDDED_FULL_SQL,
        };
        Self::new(
            format!("embedded-{kind}"),
            Self::EMBEDDED_VERSION,
            kind,
            raw,
            source_dataset,
        )
    }

    /// Load a bundle from a SQL file.
    pub fn load_from_file(
        path: &Path,
        kind: QueryKind,
        source_dataset: &str,
    ) -> Result<Self, QueryBundleError> {
        let raw = std::fs::read_to_string(path)?;
        let (name, version) = parse_header(&raw).unwrap_or_else(|| {
            let stem = path
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_else(|| "custom".to_string());
            (stem, "custom".to_string())
        });
        Self::new(name, version, kind, &raw, source_dataset)
    }

    /// Load from `path` when given, otherwise the embedded default.
    pub fn resolve(
        path: Option<&Path>,
        kind: QueryKind,
        source_dataset: &str,
    ) -> Result<Self, QueryBundleError> {
        match path {
            Some(p) => Self::load_from_file(p, kind, source_dataset),
            None => Self::embedded(kind, source_dataset),
        }
    }

    /// Short identifier for logs: `name@version#hash8`.
    pub fn label(&self) -> String {
        format!(
            "{}@{}#{}",
            self.name,
            self.version,
            &self.sql_hash[..8.min(self.sql_hash.len())]
        )
    }
}

fn parse_header(raw: &str) -> Option<(String, String)> {
    let first = raw.lines().next()?.trim();
    let rest = first.strip_prefix(HEADER_PREFIX)?.trim();
    let mut parts = rest.split_whitespace();
    let name = parts.next()?.to_string();
    let version = parts.next().unwrap_or("custom").to_string();
    Some((name, version))
}

/// SQL with `--` line comments removed, trailing ones included.
fn strip_comments(sql: &str) -> String {
    sql.lines()
        .map(|l| l.find("--").map_or(l, |at| &l[..at]))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Compute SHA-256 hex digest.
fn sha256_hex(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    const DATASET: &str = "proj.dataset";

    #[test]
    fn embedded_queries_render() {
        for kind in [QueryKind::Incremental, QueryKind::Full] {
            let bundle = QueryBundle::embedded(kind, DATASET).unwrap();
            assert!(bundle.sql.contains("`proj.dataset.ext_funding_tx`"));
            assert!(bundle.sql.contains(WATERMARK_PARAM));
            assert_eq!(bundle.sql_hash.len(), 64);
            assert_eq!(bundle.kind, kind);
        }
    }

    #[test]
    fn incremental_query_filters_exclusively() {
        let bundle = QueryBundle::embedded(QueryKind::Incremental, DATASET).unwrap();
        assert!(bundle.sql.contains("f.insertedAt > @watermark"));
    }

    #[test]
    fn hash_depends_on_dataset() {
        let a = QueryBundle::embedded(QueryKind::Full, "a.b").unwrap();
        let b = QueryBundle::embedded(QueryKind::Full, "c.d").unwrap();
        assert_ne!(a.sql_hash, b.sql_hash);
    }

    #[test]
    fn missing_watermark_rejected() {
        let err = QueryBundle::new("x", "1", QueryKind::Full, "SELECT 1", DATASET).unwrap_err();
        assert!(matches!(err, QueryBundleError::MissingWatermarkParam(_)));
    }

    #[test]
    fn comment_only_query_rejected() {
        let err =
            QueryBundle::new("x", "1", QueryKind::Full, "-- @watermark\n", DATASET).unwrap_err();
        assert!(matches!(err, QueryBundleError::Empty(_)));
    }

    #[test]
    fn watermark_mentioned_only_in_comments_rejected() {
        let raw = "-- Binds @watermark\nSELECT * FROM `{source_dataset}.ext_funding_tx`\n";
        let err = QueryBundle::new("x", "1", QueryKind::Incremental, raw, DATASET).unwrap_err();
        assert!(matches!(err, QueryBundleError::MissingWatermarkParam(_)));

        let trailing = "SELECT * FROM t -- insertedAt > @watermark\n";
        let err =
            QueryBundle::new("x", "1", QueryKind::Incremental, trailing, DATASET).unwrap_err();
        assert!(matches!(err, QueryBundleError::MissingWatermarkParam(_)));
    }

    #[test]
    fn file_header_names_bundle() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("gapfill.sql");
        std::fs::write(
            &path,
            "-- fundsnap-query: funding-v3 3\nSELECT * FROM t WHERE insertedAt > @watermark\n",
        )
        .unwrap();
        let bundle = QueryBundle::load_from_file(&path, QueryKind::Incremental, DATASET).unwrap();
        assert_eq!(bundle.name, "funding-v3");
        assert_eq!(bundle.version, "3");
        assert!(bundle.label().starts_with("funding-v3@3#"));
    }

    #[test]
    fn file_without_header_uses_stem() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("override.sql");
        std::fs::write(&path, "SELECT * FROM t WHERE insertedAt > @watermark").unwrap();
        let bundle = QueryBundle::resolve(Some(&path), QueryKind::Full, DATASET).unwrap();
        assert_eq!(bundle.name, "override");
        assert_eq!(bundle.version, "custom");
    }
}
