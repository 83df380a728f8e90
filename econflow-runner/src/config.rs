//! Pipeline configuration: TOML file, `.env`, then environment overrides.

use econflow_core::collect::CollectorSettings;
use econflow_core::domain::{Bounds, Catalog, CatalogError, SourceId};
use econflow_core::store::WriteMode;
use econflow_core::transform::{AggregateOptions, GapPolicy, NullPolicy};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;

pub const ENV_STORE_ROOT: &str = "ECONFLOW_STORE_ROOT";
pub const ENV_MAX_WORKERS: &str = "ECONFLOW_MAX_WORKERS";
pub const ENV_WRITE_MODE: &str = "ECONFLOW_WRITE_MODE";
pub const ENV_ROLLING_WINDOW: &str = "ECONFLOW_ROLLING_WINDOW";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid value for {key}: '{value}' ({reason})")]
    InvalidValue {
        key: String,
        value: String,
        reason: String,
    },

    #[error(transparent)]
    Catalog(#[from] CatalogError),
}

/// Where the lake lives and how writes treat invalid records.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreSection {
    pub root: PathBuf,
    pub write_mode: WriteMode,
}

impl Default for StoreSection {
    fn default() -> Self {
        Self {
            root: PathBuf::from("lake"),
            write_mode: WriteMode::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineSection {
    /// Units of work processed concurrently.
    pub max_workers: usize,
    /// Trailing window for rolling statistics.
    pub window: usize,
    pub null_policy: NullPolicy,
    pub gap_policy: GapPolicy,
    /// Build a joined panel across the succeeded units of a batch.
    pub join: bool,
}

impl Default for PipelineSection {
    fn default() -> Self {
        let agg = AggregateOptions::default();
        Self {
            max_workers: 4,
            window: agg.window,
            null_policy: agg.null_policy,
            gap_policy: agg.gap_policy,
            join: agg.join,
        }
    }
}

/// `[[bounds]]` entry replacing an indicator's plausible range.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoundsOverride {
    pub source: SourceId,
    pub code: String,
    pub min: f64,
    pub max: f64,
}

/// Top-level configuration, every section defaulted.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub store: StoreSection,
    pub collector: CollectorSettings,
    pub pipeline: PipelineSection,
    pub bounds: Vec<BoundsOverride>,
}

impl PipelineConfig {
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        config.check()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&content)
    }

    /// File (or defaults when `path` is `None`), then `.env`, then the
    /// process environment.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(p) => Self::from_file(p)?,
            None => Self::default(),
        };
        if let Ok(env_file) = dotenvy::dotenv() {
            debug!(path = %env_file.display(), "loaded .env");
        }
        config.apply_env(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Apply `ECONFLOW_*` overrides read through `lookup`.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<(), ConfigError> {
        if let Some(root) = lookup(ENV_STORE_ROOT) {
            self.store.root = PathBuf::from(root);
        }
        if let Some(raw) = lookup(ENV_MAX_WORKERS) {
            self.pipeline.max_workers = parse_env(ENV_MAX_WORKERS, &raw)?;
        }
        if let Some(raw) = lookup(ENV_WRITE_MODE) {
            self.store.write_mode = raw.parse().map_err(|reason| ConfigError::InvalidValue {
                key: ENV_WRITE_MODE.into(),
                value: raw.clone(),
                reason,
            })?;
        }
        if let Some(raw) = lookup(ENV_ROLLING_WINDOW) {
            self.pipeline.window = parse_env(ENV_ROLLING_WINDOW, &raw)?;
        }
        self.check()
    }

    pub fn aggregate_options(&self) -> AggregateOptions {
        AggregateOptions {
            window: self.pipeline.window,
            null_policy: self.pipeline.null_policy,
            gap_policy: self.pipeline.gap_policy,
            join: self.pipeline.join,
        }
    }

    /// Built-in catalogs with the `[[bounds]]` overrides applied.
    pub fn catalogs(&self) -> Result<Vec<Catalog>, ConfigError> {
        let mut catalogs: Vec<Catalog> = SourceId::ALL.iter().map(|s| Catalog::builtin(*s)).collect();
        for o in &self.bounds {
            if let Some(catalog) = catalogs.iter_mut().find(|c| c.source() == o.source) {
                catalog.override_bounds(&o.code, Bounds::new(o.min, o.max))?;
            }
        }
        Ok(catalogs)
    }

    fn check(&self) -> Result<(), ConfigError> {
        if self.pipeline.max_workers == 0 {
            return Err(ConfigError::InvalidValue {
                key: "pipeline.max_workers".into(),
                value: "0".into(),
                reason: "must be at least 1".into(),
            });
        }
        if self.pipeline.window == 0 {
            return Err(ConfigError::InvalidValue {
                key: "pipeline.window".into(),
                value: "0".into(),
                reason: "must be at least 1".into(),
            });
        }
        Ok(())
    }
}

fn parse_env(key: &str, raw: &str) -> Result<usize, ConfigError> {
    raw.trim().parse().map_err(|e: std::num::ParseIntError| ConfigError::InvalidValue {
        key: key.into(),
        value: raw.into(),
        reason: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn empty_file_is_all_defaults() {
        let config = PipelineConfig::from_toml("").unwrap();
        assert_eq!(config, PipelineConfig::default());
        assert_eq!(config.pipeline.window, 3);
        assert_eq!(config.store.write_mode, WriteMode::Quarantine);
    }

    #[test]
    fn sections_parse() {
        let config = PipelineConfig::from_toml(
            r#"
            [store]
            root = "/data/lake"
            write_mode = "strict"

            [collector]
            timeout_secs = 10

            [collector.retry]
            max_attempts = 2

            [pipeline]
            max_workers = 8
            window = 6
            null_policy = "propagate"
            gap_policy = "linear"
            join = true

            [[bounds]]
            source = "bcb"
            code = "ipca"
            min = -2.0
            max = 4.0
            "#,
        )
        .unwrap();

        assert_eq!(config.store.root, PathBuf::from("/data/lake"));
        assert_eq!(config.store.write_mode, WriteMode::Strict);
        assert_eq!(config.collector.timeout_secs, 10);
        assert_eq!(config.collector.retry.max_attempts, 2);
        assert_eq!(config.pipeline.max_workers, 8);
        assert_eq!(config.aggregate_options().null_policy, NullPolicy::Propagate);
        assert!(config.aggregate_options().join);

        let catalogs = config.catalogs().unwrap();
        let bcb = catalogs.iter().find(|c| c.source() == SourceId::Bcb).unwrap();
        assert_eq!(bcb.get("ipca").unwrap().bounds, Bounds::new(-2.0, 4.0));
    }

    #[test]
    fn env_overrides_file_values() {
        let mut config = PipelineConfig::from_toml("[pipeline]\nmax_workers = 2").unwrap();
        let env: HashMap<&str, &str> = [
            (ENV_STORE_ROOT, "/tmp/elsewhere"),
            (ENV_MAX_WORKERS, "16"),
            (ENV_WRITE_MODE, "strict"),
            (ENV_ROLLING_WINDOW, "12"),
        ]
        .into_iter()
        .collect();
        config
            .apply_env(|k| env.get(k).map(|v| v.to_string()))
            .unwrap();

        assert_eq!(config.store.root, PathBuf::from("/tmp/elsewhere"));
        assert_eq!(config.pipeline.max_workers, 16);
        assert_eq!(config.store.write_mode, WriteMode::Strict);
        assert_eq!(config.pipeline.window, 12);
    }

    #[test]
    fn bad_env_value_is_reported() {
        let mut config = PipelineConfig::default();
        let err = config
            .apply_env(|k| (k == ENV_MAX_WORKERS).then(|| "many".to_string()))
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { ref key, .. } if key == ENV_MAX_WORKERS));

        let err = config
            .apply_env(|k| (k == ENV_WRITE_MODE).then(|| "lenient".to_string()))
            .unwrap_err();
        assert!(err.to_string().contains("lenient"));
    }

    #[test]
    fn zero_workers_rejected() {
        assert!(PipelineConfig::from_toml("[pipeline]\nmax_workers = 0").is_err());
    }

    #[test]
    fn override_for_unknown_indicator_fails() {
        let config = PipelineConfig::from_toml(
            "[[bounds]]\nsource = \"ibge\"\ncode = \"selic\"\nmin = 0.0\nmax = 1.0",
        )
        .unwrap();
        assert!(matches!(config.catalogs(), Err(ConfigError::Catalog(_))));
    }
}
