//! Build strategy capability contract.
//!
//! A strategy supplies, for every stage, a change predicate, a cache key and
//! the work itself. All three default to [`StrategyError::NotImplemented`], so
//! a strategy that forgets a stage fails on first use instead of silently
//! skipping work.

use crate::context::BuildContext;
use crate::engine::{EngineError, Image};
use crate::key::{CacheKey, ImageRef};
use crate::stage::Stage;
use std::fmt;

/// Strategy operation, used to report what was missing or failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    /// `needs_rebuild`
    NeedsRebuild,
    /// `compute_key`
    ComputeKey,
    /// `execute`
    Execute,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Operation::NeedsRebuild => "needs_rebuild",
            Operation::ComputeKey => "compute_key",
            Operation::Execute => "execute",
        })
    }
}

/// Error types for strategy operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StrategyError {
    /// Strategy does not provide this operation for this stage
    #[error("{operation} is not implemented for stage {stage}")]
    NotImplemented {
        /// Stage asked about
        stage: Stage,
        /// Missing operation
        operation: Operation,
    },

    /// Stage definition is malformed
    #[error("Invalid input for stage {stage}: {reason}")]
    InvalidInput {
        /// Offending stage
        stage: Stage,
        /// What is wrong
        reason: String,
    },

    /// Container engine call made by the strategy failed
    #[error("Engine error in stage {stage}: {source}")]
    Engine {
        /// Stage being processed
        stage: Stage,
        /// Underlying engine failure
        #[source]
        source: EngineError,
    },
}

impl StrategyError {
    /// Shorthand for the default "not implemented" failure.
    #[must_use]
    pub fn not_implemented(stage: Stage, operation: Operation) -> Self {
        StrategyError::NotImplemented { stage, operation }
    }

    /// Shorthand for a malformed input failure.
    pub fn invalid(stage: Stage, reason: impl Into<String>) -> Self {
        StrategyError::InvalidInput {
            stage,
            reason: reason.into(),
        }
    }
}

/// Result type for strategy operations.
pub type StrategyResult<T> = Result<T, StrategyError>;

/// Trait for pluggable per-stage build behaviour
///
/// Implementations are selected at construction time. Override only the
/// operations/stages you support; everything else fails loudly.
#[async_trait::async_trait]
pub trait BuildStrategy: Send + Sync {
    /// Strategy name (for logging/debugging)
    fn name(&self) -> &str;

    /// True when the stage's inputs differ from those that produced its
    /// cached image, or no cached image exists.
    ///
    /// Must not mutate build state.
    async fn needs_rebuild(&self, stage: Stage, _context: &BuildContext) -> StrategyResult<bool> {
        Err(StrategyError::not_implemented(stage, Operation::NeedsRebuild))
    }

    /// Deterministic fingerprint of the stage's relevant inputs.
    fn compute_key(&self, stage: Stage, _context: &BuildContext) -> StrategyResult<CacheKey> {
        Err(StrategyError::not_implemented(stage, Operation::ComputeKey))
    }

    /// Perform the stage's work on top of `from` and return the new image.
    async fn execute(
        &self,
        stage: Stage,
        _from: &ImageRef,
        _context: &BuildContext,
    ) -> StrategyResult<Image> {
        Err(StrategyError::not_implemented(stage, Operation::Execute))
    }
}
