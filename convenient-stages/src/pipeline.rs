//! Pipeline orchestrator with cascading invalidation.
//!
//! One build invocation:
//! 1. Scan stages in pipeline order, asking the strategy whether each needs
//!    a rebuild, and stop at the first dirty stage `S`.
//! 2. If nothing is dirty the build is a no-op and the last stage's cached
//!    image is the result.
//! 3. Otherwise run `S` and every stage after it, in order. Stages after `S`
//!    are never asked: their parent image changes, so they always rebuild.
//!
//! Stages before `S` are reused verbatim. There is no retry loop; the first
//! failure aborts the remaining stages.

use crate::context::BuildContext;
use crate::engine::ContainerEngine;
use crate::error::{PipelineError, StageError};
use crate::executor::{StageExecutor, StageOutput};
use crate::key::ImageRef;
use crate::stage::{Stage, StageGraph};
use crate::strategy::BuildStrategy;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, warn};

/// Rebuild state of a stage for one invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageState {
    /// Predicate evaluated false; the cached image is reused
    Clean,
    /// Predicate evaluated true; first stage to rebuild
    Dirty,
    /// Downstream of a dirty stage; rebuilt without asking
    Inherited,
}

impl StageState {
    /// Whether the stage will be executed.
    #[must_use]
    pub fn is_dirty(self) -> bool {
        !matches!(self, StageState::Clean)
    }
}

impl fmt::Display for StageState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            StageState::Clean => "clean",
            StageState::Dirty => "dirty",
            StageState::Inherited => "dirty (parent changed)",
        })
    }
}

/// Outcome of the predicate scan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildPlan {
    /// Every stage with its state, in pipeline order
    pub stages: Vec<(Stage, StageState)>,
    /// First stage whose predicate was true
    pub first_dirty: Option<Stage>,
    /// Stages to execute, in order
    pub to_run: Vec<Stage>,
}

impl BuildPlan {
    /// True when every stage is clean.
    #[must_use]
    pub fn is_noop(&self) -> bool {
        self.to_run.is_empty()
    }

    /// State of a stage, if it is part of the plan.
    #[must_use]
    pub fn state(&self, stage: Stage) -> Option<StageState> {
        self.stages
            .iter()
            .find(|(s, _)| *s == stage)
            .map(|(_, state)| *state)
    }
}

/// Successful build invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildOutcome {
    /// Image of the last stage in the chain
    pub final_image: ImageRef,
    /// Stages executed in this invocation, in order
    pub executed: Vec<StageOutput>,
    /// Stages whose cached image was reused
    pub reused: Vec<Stage>,
    /// When the invocation started
    pub started_at: DateTime<Utc>,
    /// Total wall time
    pub duration: Duration,
}

impl BuildOutcome {
    /// Executed stage names, in order.
    #[must_use]
    pub fn executed_stages(&self) -> Vec<Stage> {
        self.executed.iter().map(|output| output.stage).collect()
    }
}

/// Stage pipeline orchestrator.
pub struct Pipeline {
    graph: StageGraph,
    strategy: Arc<dyn BuildStrategy>,
    executor: StageExecutor,
}

impl Pipeline {
    /// Pipeline over `graph`, using `strategy` for per-stage behaviour and
    /// `engine` for tagging.
    pub fn new(
        graph: StageGraph,
        strategy: Arc<dyn BuildStrategy>,
        engine: Arc<dyn ContainerEngine>,
    ) -> Self {
        Self {
            graph,
            strategy,
            executor: StageExecutor::new(engine),
        }
    }

    /// Stage graph this pipeline walks.
    #[must_use]
    pub fn graph(&self) -> &StageGraph {
        &self.graph
    }

    /// Evaluate predicates up to the first dirty stage.
    ///
    /// Side-effect free as long as the strategy's predicates are.
    ///
    /// # Errors
    ///
    /// Returns `PipelineError` if a predicate fails; no stage has been
    /// built at that point.
    pub async fn plan(&self, context: &BuildContext) -> Result<BuildPlan, PipelineError> {
        let mut stages = Vec::with_capacity(self.graph.len());
        let mut first_dirty = None;

        for &stage in self.graph.ordered_stages() {
            if first_dirty.is_some() {
                stages.push((stage, StageState::Inherited));
                continue;
            }

            let dirty = self
                .strategy
                .needs_rebuild(stage, context)
                .await
                .map_err(|e| PipelineError::new(Vec::new(), StageError::from(e)))?;

            if dirty {
                info!("✗ DIRTY     {}", stage);
                first_dirty = Some(stage);
                stages.push((stage, StageState::Dirty));
            } else {
                info!("✓ CLEAN     {}", stage);
                stages.push((stage, StageState::Clean));
            }
        }

        let to_run = first_dirty
            .map(|stage| self.graph.downstream_closure(stage))
            .unwrap_or_default();

        Ok(BuildPlan {
            stages,
            first_dirty,
            to_run,
        })
    }

    /// Run one build invocation and return the final image.
    ///
    /// # Errors
    ///
    /// Returns `PipelineError` naming the failing stage and the stages
    /// completed before it. Completed stages stay tagged, so calling `run`
    /// again resumes after them.
    pub async fn run(&self, context: &BuildContext) -> Result<BuildOutcome, PipelineError> {
        let started_at = Utc::now();
        let start = Instant::now();
        info!(
            "Building {} stages from {} with {} strategy",
            self.graph.len(),
            context.base_image,
            self.strategy.name()
        );

        let plan = self.plan(context).await?;

        let Some(first_dirty) = plan.first_dirty else {
            let final_image = self.cached_image(self.graph.last(), context)?;
            info!("All stages clean, nothing to build: {}", final_image);
            return Ok(BuildOutcome {
                final_image,
                executed: Vec::new(),
                reused: self.graph.ordered_stages().to_vec(),
                started_at,
                duration: start.elapsed(),
            });
        };

        let reused: Vec<Stage> = plan
            .stages
            .iter()
            .filter(|(_, state)| !state.is_dirty())
            .map(|(stage, _)| *stage)
            .collect();

        let mut from = match self.graph.parent_of(first_dirty) {
            Some(parent) => self.cached_image(parent, context)?,
            None => context.base_image.clone(),
        };

        info!(
            "Rebuilding {} of {} stages starting at {}",
            plan.to_run.len(),
            self.graph.len(),
            first_dirty
        );

        let mut executed: Vec<StageOutput> = Vec::with_capacity(plan.to_run.len());
        for &stage in &plan.to_run {
            let output = self
                .executor
                .materialize(stage, &from, self.strategy.as_ref(), context, true)
                .await
                .map_err(|source| {
                    if source.is_cancelled() {
                        warn!("Stage {} cancelled, aborting remaining stages", stage);
                    } else {
                        warn!("Stage {} failed: {}", stage, source);
                    }
                    PipelineError::new(executed.iter().map(|o| o.stage).collect(), source)
                })?;

            from = output.reference.clone();
            executed.push(output);
        }

        let duration = start.elapsed();
        info!(
            "Build finished in {:.2}s: {} ({} built, {} reused)",
            duration.as_secs_f64(),
            from,
            executed.len(),
            reused.len()
        );

        Ok(BuildOutcome {
            final_image: from,
            executed,
            reused,
            started_at,
            duration,
        })
    }

    /// Reference of a stage whose cached image is reused.
    fn cached_image(&self, stage: Stage, context: &BuildContext) -> Result<ImageRef, PipelineError> {
        let key = self
            .strategy
            .compute_key(stage, context)
            .map_err(|e| PipelineError::new(Vec::new(), StageError::from(e)))?;
        Ok(ImageRef::for_key(&context.namespace, &key))
    }
}
