// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Reserved-identifier catalog
//!
//! The engine's reserved keywords are read once per connection and cached
//! against the connection id, so a reconnect always sees a fresh load.

use crate::connection::ConnectionManager;
use crate::engine::RESERVED_KEYWORDS_SQL;
use crate::error::{Error, Result};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use uuid::Uuid;

/// Lower-cased reserved keywords
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReservedIdentifierSet {
    keywords: HashSet<String>,
}

impl ReservedIdentifierSet {
    pub fn new<I, S>(keywords: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            keywords: keywords
                .into_iter()
                .map(|k| k.as_ref().trim().to_lowercase())
                .filter(|k| !k.is_empty())
                .collect(),
        }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    /// Case-insensitive membership
    pub fn contains(&self, identifier: &str) -> bool {
        self.keywords.contains(&identifier.to_lowercase())
    }

    pub fn len(&self) -> usize {
        self.keywords.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keywords.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.keywords.iter().map(String::as_str)
    }
}

/// What to do when the keyword catalog cannot be read
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CatalogPolicy {
    /// Carry on with an empty set and log a warning
    #[default]
    BestEffort,
    /// Fail the operation that needed the catalog
    Required,
}

/// Per-connection cache of the reserved-identifier set
#[derive(Default)]
pub struct ReservedCatalog {
    cached: Mutex<Option<(Uuid, Arc<ReservedIdentifierSet>)>>,
}

impl ReservedCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reserved identifiers of the live connection, loading them on first use
    pub async fn load(&self, connection: &ConnectionManager) -> Result<Arc<ReservedIdentifierSet>> {
        let connection_id = connection.connection_id().ok_or(Error::NotInitialized)?;
        if let Some(set) = self.cached_for(connection_id) {
            return Ok(set);
        }

        let keywords = connection.query_column(RESERVED_KEYWORDS_SQL).await?;
        let set = Arc::new(ReservedIdentifierSet::new(keywords));
        log::debug!(
            "Loaded {} reserved identifiers for connection {}",
            set.len(),
            connection_id
        );

        // A reconnect during the load must not be served this set
        if connection.connection_id() == Some(connection_id) {
            *self.cached.lock() = Some((connection_id, set.clone()));
        }
        Ok(set)
    }

    /// Like [`load`](Self::load), applying `policy` to load failures
    pub async fn load_with_policy(
        &self,
        connection: &ConnectionManager,
        policy: CatalogPolicy,
    ) -> Result<Arc<ReservedIdentifierSet>> {
        match self.load(connection).await {
            Ok(set) => Ok(set),
            Err(Error::NotInitialized) => Err(Error::NotInitialized),
            Err(e) if policy == CatalogPolicy::BestEffort => {
                log::warn!(
                    "Could not read reserved identifiers, continuing without them: {}",
                    e
                );
                Ok(Arc::new(ReservedIdentifierSet::empty()))
            }
            Err(e) => Err(e),
        }
    }

    pub fn invalidate(&self) {
        self.cached.lock().take();
    }

    /// Currently cached set, regardless of which connection it belongs to
    pub fn cached(&self) -> Option<Arc<ReservedIdentifierSet>> {
        self.cached.lock().as_ref().map(|(_, set)| set.clone())
    }

    fn cached_for(&self, connection_id: Uuid) -> Option<Arc<ReservedIdentifierSet>> {
        match self.cached.lock().as_ref() {
            Some((id, set)) if *id == connection_id => Some(set.clone()),
            _ => None,
        }
    }
}
