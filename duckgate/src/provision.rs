// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Declarative view provisioning
//!
//! Each configured view becomes `CREATE OR REPLACE VIEW <name> AS SELECT *
//! FROM read_parquet([...])`. Names are sanitized into plain identifiers and
//! moved out of the way of reserved keywords. Views are provisioned
//! independently: one failing view never stops the others, and nothing is
//! rolled back.

use crate::catalog::ReservedIdentifierSet;
use crate::connection::ConnectionManager;
use crate::error::{Error, Result};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

/// Appended to a sanitized name that collides with a reserved keyword
pub const VIEW_SUFFIX: &str = "_view";

static NON_IDENTIFIER_CHARS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[^A-Za-z0-9_]").expect("valid identifier pattern"));

/// A named view over one or more parquet sources
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ViewSpec {
    pub view_name: String,
    pub source_paths: Vec<String>,
}

impl ViewSpec {
    pub fn new<I, S>(view_name: impl Into<String>, source_paths: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            view_name: view_name.into(),
            source_paths: source_paths.into_iter().map(Into::into).collect(),
        }
    }

    pub fn sanitized_name(&self) -> String {
        sanitize_view_name(&self.view_name)
    }
}

/// Replace every character outside `[A-Za-z0-9_]` with `_`, then lower-case
pub fn sanitize_view_name(name: &str) -> String {
    NON_IDENTIFIER_CHARS
        .replace_all(name, "_")
        .to_ascii_lowercase()
}

/// Sanitized name, with [`VIEW_SUFFIX`] appended if it is reserved
pub fn resolve_view_name(name: &str, reserved: &ReservedIdentifierSet) -> String {
    let sanitized = sanitize_view_name(name);
    if reserved.contains(&sanitized) {
        format!("{}{}", sanitized, VIEW_SUFFIX)
    } else {
        sanitized
    }
}

/// Quote `value` as a SQL string literal
pub fn quote_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

/// Provisioned view name and the statement that creates it
pub fn view_statement(spec: &ViewSpec, reserved: &ReservedIdentifierSet) -> Result<(String, String)> {
    if spec.source_paths.is_empty() {
        return Err(Error::EngineExecution(format!(
            "view '{}' has no source paths",
            spec.view_name
        )));
    }
    let name = resolve_view_name(&spec.view_name, reserved);
    let sources = spec
        .source_paths
        .iter()
        .map(|path| quote_literal(path))
        .collect::<Vec<_>>()
        .join(", ");
    let sql = format!(
        "CREATE OR REPLACE VIEW {} AS SELECT * FROM read_parquet([{}]);",
        name, sources
    );
    Ok((name, sql))
}

/// Result of provisioning one view
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ViewOutcome {
    /// Name as configured
    pub view_name: String,
    /// Name the view was (or would have been) created under
    pub provisioned_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ViewOutcome {
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

/// Per-view outcomes, in configuration order
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProvisionReport {
    pub outcomes: Vec<ViewOutcome>,
}

impl ProvisionReport {
    pub fn is_success(&self) -> bool {
        self.outcomes.iter().all(ViewOutcome::is_success)
    }

    pub fn failures(&self) -> impl Iterator<Item = &ViewOutcome> {
        self.outcomes.iter().filter(|o| !o.is_success())
    }

    pub fn provisioned_names(&self) -> Vec<&str> {
        self.outcomes
            .iter()
            .filter(|o| o.is_success())
            .map(|o| o.provisioned_name.as_str())
            .collect()
    }
}

/// Issues provisioning statements against a ready connection
pub struct ViewProvisioner;

impl ViewProvisioner {
    pub async fn provision(
        connection: &ConnectionManager,
        specs: &[ViewSpec],
        reserved: &ReservedIdentifierSet,
    ) -> ProvisionReport {
        let mut report = ProvisionReport::default();

        for spec in specs {
            let outcome = match view_statement(spec, reserved) {
                Ok((name, sql)) => {
                    let error = match connection.execute(sql, Vec::new()).await {
                        Ok(_) => {
                            log::info!("Provisioned view '{}' as {}", spec.view_name, name);
                            None
                        }
                        Err(e) => {
                            log::warn!("Failed to provision view '{}': {}", spec.view_name, e);
                            Some(e.wire_message())
                        }
                    };
                    ViewOutcome {
                        view_name: spec.view_name.clone(),
                        provisioned_name: name,
                        error,
                    }
                }
                Err(e) => {
                    log::warn!("Skipping view '{}': {}", spec.view_name, e);
                    ViewOutcome {
                        view_name: spec.view_name.clone(),
                        provisioned_name: resolve_view_name(&spec.view_name, reserved),
                        error: Some(e.wire_message()),
                    }
                }
            };
            report.outcomes.push(outcome);
        }

        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::ExecutionStrategy;
    use crate::engine::{Credentials, MemoryEngineFactory};
    use std::sync::Arc;

    #[test]
    fn test_sanitize_examples() {
        assert_eq!(sanitize_view_name("my view!"), "my_view_");
        assert_eq!(sanitize_view_name("Trips-2024.Q1"), "trips_2024_q1");
        assert_eq!(sanitize_view_name("already_ok"), "already_ok");
        assert_eq!(sanitize_view_name(""), "");
    }

    #[test]
    fn test_sanitize_is_deterministic_and_idempotent() {
        let alphabet: Vec<char> = "aZ09_ -.!é/'\"".chars().collect();
        for _ in 0..200 {
            let len = fastrand::usize(0..16);
            let name: String = (0..len)
                .map(|_| alphabet[fastrand::usize(..alphabet.len())])
                .collect();

            let once = sanitize_view_name(&name);
            assert_eq!(once, sanitize_view_name(&name));
            assert_eq!(sanitize_view_name(&once), once);
            assert!(once
                .chars()
                .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_'));
            assert_eq!(once.chars().count(), name.chars().count());
        }
    }

    #[test]
    fn test_reserved_names_get_one_suffix() {
        let reserved = ReservedIdentifierSet::new(["select"]);
        assert_eq!(resolve_view_name("Select", &reserved), "select_view");
        assert_eq!(resolve_view_name("my view!", &reserved), "my_view_");
        assert_eq!(resolve_view_name("select_view", &reserved), "select_view");
    }

    #[test]
    fn test_view_statement_quotes_paths() {
        let spec = ViewSpec::new("Trips", ["s3://b/a.parquet", "o'brien.parquet"]);
        let (name, sql) = view_statement(&spec, &ReservedIdentifierSet::empty()).unwrap();
        assert_eq!(name, "trips");
        assert_eq!(
            sql,
            "CREATE OR REPLACE VIEW trips AS SELECT * FROM read_parquet(['s3://b/a.parquet', 'o''brien.parquet']);"
        );
    }

    #[test]
    fn test_view_without_sources_is_rejected() {
        let spec = ViewSpec::new("empty", Vec::<String>::new());
        let err = view_statement(&spec, &ReservedIdentifierSet::empty()).unwrap_err();
        assert_eq!(
            err,
            Error::EngineExecution("view 'empty' has no source paths".into())
        );
    }

    #[tokio::test]
    async fn test_failures_are_reported_per_view() {
        let factory = MemoryEngineFactory::new().with_missing_source("missing.parquet");
        let mgr = ConnectionManager::new(Arc::new(factory.clone()), ExecutionStrategy::DirectBinding);
        mgr.initialize(Credentials::in_memory()).await.unwrap();

        let specs = vec![
            ViewSpec::new("good one", ["a.parquet"]),
            ViewSpec::new("broken", ["missing.parquet"]),
            ViewSpec::new("no sources", Vec::<String>::new()),
            ViewSpec::new("Select", ["b.parquet"]),
        ];
        let reserved = ReservedIdentifierSet::new(["select"]);
        let report = ViewProvisioner::provision(&mgr, &specs, &reserved).await;

        assert!(!report.is_success());
        assert_eq!(report.provisioned_names(), vec!["good_one", "select_view"]);
        let failed: Vec<&str> = report.failures().map(|o| o.view_name.as_str()).collect();
        assert_eq!(failed, vec!["broken", "no sources"]);

        let views = factory.recorder().views();
        assert!(views.contains_key("good_one"));
        assert!(views.contains_key("select_view"));
        assert_eq!(views.len(), 2);
    }
}
