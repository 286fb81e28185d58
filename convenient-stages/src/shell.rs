//! Strategy that runs configured shell commands for every stage.

use crate::context::BuildContext;
use crate::engine::{ContainerEngine, Image};
use crate::key::{CacheKey, ImageRef};
use crate::stage::{Stage, StageGraph};
use crate::strategy::{BuildStrategy, StrategyError, StrategyResult};
use std::collections::BTreeMap;
use std::fs;
use std::sync::Arc;
use tracing::debug;

/// Variable carrying the source revision into `sources_*` stage commands.
pub const SOURCE_REVISION_ENV: &str = "DAPP_SOURCE_REVISION";

/// Runs each stage's `commands` through the container engine.
///
/// A stage key covers the parent stage's key (or the base image for the
/// root), so any upstream change moves every downstream key as well.
/// `sources_*` stages with commands see the revision as
/// `$DAPP_SOURCE_REVISION`, and key on it.
pub struct ShellStrategy {
    engine: Arc<dyn ContainerEngine>,
    graph: StageGraph,
}

impl ShellStrategy {
    /// Strategy over the given pipeline.
    pub fn new(engine: Arc<dyn ContainerEngine>, graph: StageGraph) -> Self {
        Self { engine, graph }
    }

    fn commands(stage: Stage, context: &BuildContext) -> StrategyResult<&[String]> {
        let commands = context
            .stage(stage)
            .map_or(&[][..], |spec| spec.commands.as_slice());

        for (idx, command) in commands.iter().enumerate() {
            if command.trim().is_empty() {
                return Err(StrategyError::invalid(
                    stage,
                    format!("command #{} is empty", idx + 1),
                ));
            }
            if command.contains('\0') {
                return Err(StrategyError::invalid(
                    stage,
                    format!("command #{} contains a NUL byte", idx + 1),
                ));
            }
        }
        Ok(commands)
    }

    /// Environment the stage commands run with. Keyed and executed alike.
    fn build_env(
        stage: Stage,
        context: &BuildContext,
        commands: &[String],
    ) -> StrategyResult<BTreeMap<String, String>> {
        let mut env = context.stage_env(stage);
        if stage.is_sources() && !commands.is_empty() {
            let revision = context.source_revision.as_deref().ok_or_else(|| {
                StrategyError::invalid(stage, "source stage has commands but no source revision")
            })?;
            let _ = env.insert(SOURCE_REVISION_ENV.to_string(), revision.to_string());
        }
        Ok(env)
    }

    fn image_ref(&self, stage: Stage, context: &BuildContext) -> StrategyResult<ImageRef> {
        let key = self.compute_key(stage, context)?;
        Ok(ImageRef::for_key(&context.namespace, &key))
    }
}

#[async_trait::async_trait]
impl BuildStrategy for ShellStrategy {
    fn name(&self) -> &str {
        "shell"
    }

    async fn needs_rebuild(&self, stage: Stage, context: &BuildContext) -> StrategyResult<bool> {
        let reference = self.image_ref(stage, context)?;
        let exists = self
            .engine
            .image_exists(&reference)
            .await
            .map_err(|source| StrategyError::Engine { stage, source })?;
        debug!("{}: {} {}", stage, reference, if exists { "cached" } else { "missing" });
        Ok(!exists)
    }

    fn compute_key(&self, stage: Stage, context: &BuildContext) -> StrategyResult<CacheKey> {
        if !self.graph.contains(stage) {
            return Err(StrategyError::invalid(stage, "stage is not part of the pipeline"));
        }

        let mut key = match self.graph.parent_of(stage) {
            Some(parent) => {
                let parent_key = self.compute_key(parent, context)?;
                CacheKey::builder().field("parent", parent_key.as_str())
            }
            None => CacheKey::builder().field("from", context.base_image.as_str()),
        };
        key = key.field("stage", stage.as_str());

        let commands = Self::commands(stage, context)?;
        for command in commands {
            key = key.field("cmd", command);
        }

        for (name, value) in Self::build_env(stage, context, commands)? {
            key = key.field("env", name).part(value);
        }

        if let Some(spec) = context.stage(stage) {
            for file in &spec.files {
                let path = context.resolve(file);
                let content = fs::read(&path).map_err(|e| {
                    StrategyError::invalid(stage, format!("cannot read {}: {e}", path.display()))
                })?;
                key = key
                    .field("file", file.to_string_lossy().as_bytes())
                    .part(CacheKey::from_content(&content).as_str());
            }
        }

        Ok(key.finish())
    }

    async fn execute(
        &self,
        stage: Stage,
        from: &ImageRef,
        context: &BuildContext,
    ) -> StrategyResult<Image> {
        let commands = Self::commands(stage, context)?;
        let env = Self::build_env(stage, context, commands)?;
        self.engine
            .build(from, commands, &env)
            .await
            .map_err(|source| StrategyError::Engine { stage, source })
    }
}
