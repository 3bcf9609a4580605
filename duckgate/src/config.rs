// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Client configuration
//!
//! Loadable from JSON. Credentials are deliberately not part of it; they are
//! handed to `initialize` directly.

use crate::adapter::DEFAULT_BATCH_SIZE;
use crate::catalog::CatalogPolicy;
use crate::connection::ExecutionStrategy;
use crate::error::{Error, Result};
use crate::provision::ViewSpec;
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

/// Default name of the execution-context thread
pub const DEFAULT_CONTEXT_THREAD_NAME: &str = "duckgate-context";

/// Client configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub strategy: ExecutionStrategy,
    /// Rows per batch for streaming results
    pub batch_size: usize,
    pub catalog_policy: CatalogPolicy,
    /// Views provisioned right after `initialize`
    #[serde(deserialize_with = "deserialize_views")]
    pub views: Vec<ViewSpec>,
    /// Deadline applied to every request crossing the bridge
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_timeout_ms: Option<u64>,
    pub context_thread_name: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            strategy: ExecutionStrategy::default(),
            batch_size: DEFAULT_BATCH_SIZE,
            catalog_policy: CatalogPolicy::default(),
            views: Vec::new(),
            request_timeout_ms: None,
            context_thread_name: DEFAULT_CONTEXT_THREAD_NAME.to_string(),
        }
    }
}

impl Config {
    /// Engine driven in-process
    pub fn in_process() -> Self {
        Self::default().with_strategy(ExecutionStrategy::DirectBinding)
    }

    /// Engine hosted by the execution context
    pub fn relayed() -> Self {
        Self::default().with_strategy(ExecutionStrategy::RelayedThroughBridge)
    }

    pub fn with_strategy(mut self, strategy: ExecutionStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn with_catalog_policy(mut self, policy: CatalogPolicy) -> Self {
        self.catalog_policy = policy;
        self
    }

    pub fn with_views(mut self, views: impl IntoIterator<Item = ViewSpec>) -> Self {
        self.views = views.into_iter().collect();
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout_ms = Some(duration_to_millis(timeout));
        self
    }

    pub fn request_timeout(&self) -> Option<Duration> {
        self.request_timeout_ms.map(Duration::from_millis)
    }

    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Config = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("Failed to read {}: {}", path.display(), e)))?;
        Self::from_json_str(&contents)
    }

    pub fn validate(&self) -> Result<()> {
        if self.batch_size == 0 {
            return Err(Error::Config("batch_size must be greater than zero".to_string()));
        }
        if self.request_timeout_ms == Some(0) {
            return Err(Error::Config(
                "request_timeout_ms must be greater than zero".to_string(),
            ));
        }
        if self.context_thread_name.trim().is_empty() {
            return Err(Error::Config("context_thread_name must not be empty".to_string()));
        }
        if let Some(spec) = self.views.iter().find(|v| v.view_name.trim().is_empty()) {
            return Err(Error::Config(format!(
                "view with sources {:?} has an empty name",
                spec.source_paths
            )));
        }
        Ok(())
    }
}

/// Whole milliseconds for the wire and config, rounded up so a sub-millisecond
/// duration never collapses to zero
pub(crate) fn duration_to_millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_nanos().div_ceil(1_000_000)).unwrap_or(u64::MAX)
}

/// Views are accepted as a list of specs or as `{ "<viewName>": ["path", ...] }`
fn deserialize_views<'de, D>(deserializer: D) -> std::result::Result<Vec<ViewSpec>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Views {
        List(Vec<ViewSpec>),
        Map(BTreeMap<String, Vec<String>>),
    }

    Ok(match Views::deserialize(deserializer)? {
        Views::List(views) => views,
        Views::Map(views) => views
            .into_iter()
            .map(|(name, paths)| ViewSpec::new(name, paths))
            .collect(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.strategy, ExecutionStrategy::RelayedThroughBridge);
        assert_eq!(config.batch_size, 2048);
        assert_eq!(config.catalog_policy, CatalogPolicy::BestEffort);
        assert_eq!(config.context_thread_name, "duckgate-context");
        assert!(config.request_timeout().is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_views_in_map_form() {
        let config = Config::from_json_str(
            r#"{"views": {"trips": ["a.parquet", "b.parquet"], "Zones": ["z.parquet"]}}"#,
        )
        .unwrap();
        assert_eq!(
            config.views,
            vec![
                ViewSpec::new("Zones", ["z.parquet"]),
                ViewSpec::new("trips", ["a.parquet", "b.parquet"]),
            ]
        );
    }

    #[test]
    fn test_views_in_list_form() {
        let config = Config::from_json_str(
            r#"{"strategy": "direct_binding", "batch_size": 10,
                "views": [{"viewName": "trips", "sourcePaths": ["a.parquet"]}]}"#,
        )
        .unwrap();
        assert_eq!(config.strategy, ExecutionStrategy::DirectBinding);
        assert_eq!(config.batch_size, 10);
        assert_eq!(config.views, vec![ViewSpec::new("trips", ["a.parquet"])]);
    }

    #[test]
    fn test_validation_errors() {
        assert!(matches!(
            Config::from_json_str(r#"{"batch_size": 0}"#),
            Err(Error::Config(_))
        ));
        assert!(Config::default()
            .with_views([ViewSpec::new(" ", ["a.parquet"])])
            .validate()
            .is_err());
        assert!(matches!(
            Config::from_json_str(r#"{"strategy": "telepathy"}"#),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn test_sub_millisecond_timeouts_round_up() {
        let config = Config::relayed().with_request_timeout(Duration::from_micros(500));
        assert_eq!(config.request_timeout_ms, Some(1));
        assert!(config.validate().is_ok());

        assert_eq!(duration_to_millis(Duration::from_nanos(1)), 1);
        assert_eq!(duration_to_millis(Duration::from_micros(1500)), 2);
        assert_eq!(duration_to_millis(Duration::from_millis(250)), 250);
        assert_eq!(duration_to_millis(Duration::ZERO), 0);
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"catalog_policy": "required", "request_timeout_ms": 250}}"#).unwrap();

        let config = Config::from_file(file.path()).unwrap();
        assert_eq!(config.catalog_policy, CatalogPolicy::Required);
        assert_eq!(config.request_timeout(), Some(Duration::from_millis(250)));
    }

    #[test]
    fn test_missing_file() {
        let err = Config::from_file("/definitely/not/here.json").unwrap_err();
        assert!(err.to_string().contains("Failed to read"));
    }
}
