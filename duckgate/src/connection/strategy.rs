use serde::{Deserialize, Serialize};

/// How statements reach the engine
///
/// Determines whether the connection lives in the caller's context or inside
/// the isolated execution context, and which engine path a statement takes.
///
/// # Strategies
///
/// - **DirectBinding**: the engine is driven in-process. Statements without
///   parameters take the direct text path; statements with parameters are
///   prepared and bound.
///
/// - **PreparedStatement**: the engine is driven in-process and every
///   statement is prepared, parameters or not.
///
/// - **RelayedThroughBridge**: the connection is hosted by the execution
///   context and every call crosses the bridge. Inside the context, dispatch
///   follows the `DirectBinding` rules.
///
/// # Examples
///
/// ```rust,no_run
/// use duckgate::{Client, Config, ExecutionStrategy, MemoryEngineFactory};
/// use std::sync::Arc;
///
/// let config = Config::default().with_strategy(ExecutionStrategy::DirectBinding);
/// let client = Client::new(Arc::new(MemoryEngineFactory::new()), config)?;
/// assert!(!client.strategy().is_relayed());
/// # Ok::<(), duckgate::Error>(())
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStrategy {
    /// In-process, direct path unless parameters are present
    DirectBinding,

    /// In-process, always prepared
    PreparedStatement,

    /// Hosted by the execution context (default)
    #[default]
    RelayedThroughBridge,
}

impl ExecutionStrategy {
    /// Returns true if calls cross the execution-context boundary
    pub fn is_relayed(&self) -> bool {
        matches!(self, ExecutionStrategy::RelayedThroughBridge)
    }

    /// Whether a statement goes through the prepared path
    pub fn uses_prepared_path(&self, has_parameters: bool) -> bool {
        match self {
            ExecutionStrategy::PreparedStatement => true,
            ExecutionStrategy::DirectBinding | ExecutionStrategy::RelayedThroughBridge => {
                has_parameters
            }
        }
    }

    /// Strategy used by the session that actually drives the engine
    pub fn hosted(self) -> Self {
        match self {
            ExecutionStrategy::RelayedThroughBridge => ExecutionStrategy::DirectBinding,
            other => other,
        }
    }
}
