//! Stage executor: produces (or reuses) the tagged image of one stage.

use crate::context::BuildContext;
use crate::engine::{ContainerEngine, Image};
use crate::error::StageError;
use crate::key::{CacheKey, ImageRef};
use crate::stage::Stage;
use crate::strategy::BuildStrategy;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// Result of materializing one stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageOutput {
    /// Stage materialized
    pub stage: Stage,
    /// Stage cache key
    pub key: CacheKey,
    /// Reference the stage image is tagged as; the next stage builds from it
    pub reference: ImageRef,
    /// Freshly built image, `None` when an existing image was reused
    pub built: Option<Image>,
    /// Wall time spent in this stage
    pub duration: Duration,
}

impl StageOutput {
    /// Whether the existing image was returned unchanged.
    #[must_use]
    pub fn reused(&self) -> bool {
        self.built.is_none()
    }
}

/// Materializes stage images through the container engine.
#[derive(Clone)]
pub struct StageExecutor {
    engine: Arc<dyn ContainerEngine>,
}

impl StageExecutor {
    /// Create an executor on top of an engine.
    pub fn new(engine: Arc<dyn ContainerEngine>) -> Self {
        Self { engine }
    }

    /// Produce the image for `stage` on top of `from`.
    ///
    /// When `rebuild` is false and the stage reference already exists, the
    /// existing image is returned untouched. Otherwise the strategy executes
    /// the stage and the result is tagged under the stage reference; the tag
    /// only happens on success.
    ///
    /// # Errors
    ///
    /// - `StageError::NotImplemented` / `StageError::Strategy` from the strategy
    /// - `StageError::StageBuildFailed` if the engine fails to build or tag
    pub async fn materialize(
        &self,
        stage: Stage,
        from: &ImageRef,
        strategy: &dyn BuildStrategy,
        context: &BuildContext,
        rebuild: bool,
    ) -> Result<StageOutput, StageError> {
        let start = Instant::now();
        let key = strategy.compute_key(stage, context)?;
        let reference = ImageRef::for_key(&context.namespace, &key);
        debug!("{}: key {} -> {}", stage, key.short(), reference);

        if !rebuild {
            let exists = self
                .engine
                .image_exists(&reference)
                .await
                .map_err(|cause| StageError::StageBuildFailed { stage, cause })?;
            if exists {
                info!("✓ CACHED    {} ({})", stage, key.short());
                return Ok(StageOutput {
                    stage,
                    key,
                    reference,
                    built: None,
                    duration: start.elapsed(),
                });
            }
        }

        info!("⚡ BUILDING  {} from {} ({})", stage, from, key.short());
        let image = strategy.execute(stage, from, context).await?;

        self.engine
            .tag(&image, &reference)
            .await
            .map_err(|cause| StageError::StageBuildFailed { stage, cause })?;

        let duration = start.elapsed();
        info!(
            "✓ BUILT     {} as {} in {:.2}s",
            stage,
            reference,
            duration.as_secs_f64()
        );

        Ok(StageOutput {
            stage,
            key,
            reference,
            built: Some(image),
            duration,
        })
    }
}
