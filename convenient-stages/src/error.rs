//! Stage and pipeline error taxonomy.

use crate::engine::EngineError;
use crate::stage::Stage;
use crate::strategy::{Operation, StrategyError};

/// Failure of a single stage. Never retried.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StageError {
    /// Strategy omitted a required operation
    #[error("{operation} is not implemented for stage {stage}")]
    NotImplemented {
        /// Stage asked about
        stage: Stage,
        /// Missing operation
        operation: Operation,
    },

    /// Predicate/key/execute logic rejected the stage's inputs
    #[error("Strategy error in stage {stage}: {source}")]
    Strategy {
        /// Offending stage
        stage: Stage,
        /// Strategy failure
        #[source]
        source: StrategyError,
    },

    /// Container engine failed to build or tag the stage image
    #[error("Stage {stage} failed to build: {cause}")]
    StageBuildFailed {
        /// Failing stage
        stage: Stage,
        /// Engine failure
        #[source]
        cause: EngineError,
    },
}

impl StageError {
    /// Stage the error belongs to.
    #[must_use]
    pub fn stage(&self) -> Stage {
        match self {
            StageError::NotImplemented { stage, .. }
            | StageError::Strategy { stage, .. }
            | StageError::StageBuildFailed { stage, .. } => *stage,
        }
    }

    /// Whether the engine reported cancellation.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        matches!(
            self,
            StageError::StageBuildFailed {
                cause: EngineError::Cancelled(_),
                ..
            }
        )
    }
}

impl From<StrategyError> for StageError {
    fn from(e: StrategyError) -> Self {
        match e {
            StrategyError::NotImplemented { stage, operation } => {
                StageError::NotImplemented { stage, operation }
            }
            StrategyError::Engine { stage, source } => StageError::StageBuildFailed {
                stage,
                cause: source,
            },
            StrategyError::InvalidInput { stage, .. } => StageError::Strategy { stage, source: e },
        }
    }
}

/// Failure of a whole build invocation.
///
/// Carries the failing stage and the stages already completed in this
/// invocation; those remain tagged and are reused by the next run.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{}", self.describe())]
pub struct PipelineError {
    /// Stage that failed
    pub failed_stage: Stage,
    /// Stages built successfully before the failure, in order
    pub completed: Vec<Stage>,
    /// Underlying stage failure
    #[source]
    pub source: StageError,
}

impl PipelineError {
    /// Wrap a stage failure.
    #[must_use]
    pub fn new(completed: Vec<Stage>, source: StageError) -> Self {
        Self {
            failed_stage: source.stage(),
            completed,
            source,
        }
    }

    /// "built through X, failed at Y: cause", or without the first part
    /// when nothing completed.
    fn describe(&self) -> String {
        match self.completed.last() {
            Some(last) => format!(
                "built through {last}, failed at {}: {}",
                self.failed_stage, self.source
            ),
            None => format!("failed at {}: {}", self.failed_stage, self.source),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strategy_errors_map_to_taxonomy() {
        let e: StageError =
            StrategyError::not_implemented(Stage::AppInstall, Operation::Execute).into();
        assert!(matches!(e, StageError::NotImplemented { stage: Stage::AppInstall, .. }));

        let e: StageError = StrategyError::invalid(Stage::Prepare, "bad").into();
        assert!(matches!(e, StageError::Strategy { stage: Stage::Prepare, .. }));

        let e: StageError = StrategyError::Engine {
            stage: Stage::Sources1,
            source: EngineError::Cancelled("sigint".to_string()),
        }
        .into();
        assert_eq!(e.stage(), Stage::Sources1);
        assert!(e.is_cancelled());
    }

    #[test]
    fn test_pipeline_error_message() {
        let source = StageError::StageBuildFailed {
            stage: Stage::Sources1,
            cause: EngineError::CommandFailed("exit 2".to_string()),
        };
        let err = PipelineError::new(vec![Stage::InfraInstall], source.clone());
        assert_eq!(err.failed_stage, Stage::Sources1);
        assert_eq!(
            err.to_string(),
            "built through infra_install, failed at sources_1: \
             Stage sources_1 failed to build: Engine command failed: exit 2"
        );

        let err = PipelineError::new(vec![], source.clone());
        assert!(err.to_string().starts_with("failed at sources_1:"));
        assert_eq!(
            std::error::Error::source(&err).map(ToString::to_string),
            Some(source.to_string())
        );
    }
}
