//! Cascading invalidation tests
//!
//! A scripted strategy decides which stages report dirty and records every
//! predicate and execute call, so the orchestrator's stage selection can be
//! checked directly:
//! 1. Only the first dirty stage and its downstream closure run
//! 2. Predicates after the first dirty stage are never evaluated
//! 3. Failures abort the rest of the chain and keep earlier tags
//! 4. Missing strategy operations fail loudly

use convenient_stages::{
    BuildContext, BuildStrategy, CacheKey, ContainerEngine, EngineCall, EngineError, Image,
    ImageRef, MemoryEngine, Operation, Pipeline, StageError, Stage, StageGraph, StrategyError,
    StrategyResult,
};
use std::collections::{BTreeMap, HashSet};
use std::sync::{Arc, Mutex};
use tracing_test::traced_test;

#[derive(Default)]
struct Calls {
    predicates: Vec<Stage>,
    executed: Vec<(Stage, ImageRef)>,
}

/// Strategy whose predicates are set by the test.
struct ScriptedStrategy {
    engine: Arc<MemoryEngine>,
    dirty: Mutex<HashSet<Stage>>,
    calls: Mutex<Calls>,
}

impl ScriptedStrategy {
    fn new(engine: Arc<MemoryEngine>) -> Self {
        Self {
            engine,
            dirty: Mutex::new(HashSet::new()),
            calls: Mutex::new(Calls::default()),
        }
    }

    fn set_dirty(&self, stages: &[Stage]) {
        *self.dirty.lock().unwrap() = stages.iter().copied().collect();
    }

    fn predicates(&self) -> Vec<Stage> {
        self.calls.lock().unwrap().predicates.clone()
    }

    fn executed(&self) -> Vec<(Stage, ImageRef)> {
        self.calls.lock().unwrap().executed.clone()
    }

    fn reset(&self) {
        *self.calls.lock().unwrap() = Calls::default();
    }
}

#[async_trait::async_trait]
impl BuildStrategy for ScriptedStrategy {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn needs_rebuild(&self, stage: Stage, _context: &BuildContext) -> StrategyResult<bool> {
        self.calls.lock().unwrap().predicates.push(stage);
        Ok(self.dirty.lock().unwrap().contains(&stage))
    }

    fn compute_key(&self, stage: Stage, context: &BuildContext) -> StrategyResult<CacheKey> {
        Ok(CacheKey::builder()
            .field("from", context.base_image.as_str())
            .field("stage", stage.as_str())
            .finish())
    }

    async fn execute(
        &self,
        stage: Stage,
        from: &ImageRef,
        _context: &BuildContext,
    ) -> StrategyResult<Image> {
        self.calls
            .lock()
            .unwrap()
            .executed
            .push((stage, from.clone()));
        self.engine
            .build(from, &[stage.to_string()], &BTreeMap::new())
            .await
            .map_err(|source| StrategyError::Engine { stage, source })
    }
}

fn reference(stage: Stage, context: &BuildContext, strategy: &ScriptedStrategy) -> ImageRef {
    ImageRef::for_key(&context.namespace, &strategy.compute_key(stage, context).unwrap())
}

fn setup(graph: StageGraph) -> (Arc<MemoryEngine>, Arc<ScriptedStrategy>, Pipeline) {
    let engine = Arc::new(MemoryEngine::new());
    let strategy = Arc::new(ScriptedStrategy::new(engine.clone()));
    let pipeline = Pipeline::new(graph, strategy.clone(), engine.clone());
    (engine, strategy, pipeline)
}

fn short_chain() -> StageGraph {
    StageGraph::from_table(&[
        (Stage::Prepare, None),
        (Stage::InfraInstall, Some(Stage::Prepare)),
        (Stage::Sources1, Some(Stage::InfraInstall)),
    ])
    .unwrap()
}

#[tokio::test]
async fn test_example_scenario_short_chain() {
    let (_engine, strategy, pipeline) = setup(short_chain());
    let ctx = BuildContext::new("alpine:3");
    strategy.set_dirty(&[Stage::InfraInstall]);

    let outcome = pipeline.run(&ctx).await.unwrap();

    let executed = strategy.executed();
    assert_eq!(executed.len(), 2);
    assert_eq!(executed[0], (Stage::InfraInstall, reference(Stage::Prepare, &ctx, &strategy)));
    assert_eq!(
        executed[1],
        (Stage::Sources1, reference(Stage::InfraInstall, &ctx, &strategy))
    );
    assert_eq!(outcome.executed[1].reference, outcome.final_image);
    assert_eq!(outcome.reused, vec![Stage::Prepare]);
}

#[tokio::test]
async fn test_cascading_invalidation_for_every_stage() {
    let graph = StageGraph::new();
    let ordered = graph.ordered_stages().to_vec();

    for (k, &dirty) in ordered.iter().enumerate() {
        let (_engine, strategy, pipeline) = setup(graph.clone());
        let ctx = BuildContext::new("alpine:3");
        strategy.set_dirty(&[dirty]);

        let outcome = pipeline.run(&ctx).await.unwrap();

        let executed: Vec<Stage> = strategy.executed().into_iter().map(|(s, _)| s).collect();
        assert_eq!(executed, ordered[k..].to_vec(), "first dirty stage {dirty}");
        assert_eq!(outcome.executed_stages(), ordered[k..].to_vec());
        assert_eq!(outcome.reused, ordered[..k].to_vec());
        for stage in &ordered[..k] {
            assert!(!executed.contains(stage));
        }
    }
}

#[tokio::test]
async fn test_predicates_stop_at_first_dirty_stage() {
    let (_engine, strategy, pipeline) = setup(StageGraph::new());
    let ctx = BuildContext::new("alpine:3");
    // AppSetup also reports dirty but must never be asked.
    strategy.set_dirty(&[Stage::InfraSetup, Stage::AppSetup]);

    let plan = pipeline.plan(&ctx).await.unwrap();

    assert_eq!(
        strategy.predicates(),
        vec![Stage::Prepare, Stage::InfraInstall, Stage::Sources1, Stage::InfraSetup]
    );
    assert_eq!(plan.first_dirty, Some(Stage::InfraSetup));
    assert_eq!(plan.to_run, StageGraph::new().downstream_closure(Stage::InfraSetup));
    assert!(strategy.executed().is_empty(), "plan must not execute");
}

#[tokio::test]
async fn test_all_clean_is_noop() {
    let (engine, strategy, pipeline) = setup(StageGraph::new());
    let ctx = BuildContext::new("alpine:3");

    let outcome = pipeline.run(&ctx).await.unwrap();

    assert!(outcome.executed.is_empty());
    assert!(strategy.executed().is_empty());
    assert!(engine.calls().is_empty());
    assert_eq!(outcome.final_image, reference(Stage::Sources4, &ctx, &strategy));
    assert_eq!(strategy.predicates().len(), 9);
}

#[tokio::test]
async fn test_root_stage_builds_from_base_image() {
    let (_engine, strategy, pipeline) = setup(short_chain());
    let ctx = BuildContext::new("registry.local/base:1");
    strategy.set_dirty(&[Stage::Prepare]);

    let _ = pipeline.run(&ctx).await.unwrap();

    let executed = strategy.executed();
    assert_eq!(executed[0], (Stage::Prepare, ImageRef::new("registry.local/base:1")));
    assert_eq!(executed.len(), 3);
}

#[tokio::test]
async fn test_failure_keeps_earlier_stages_tagged() {
    let (engine, strategy, pipeline) = setup(StageGraph::new());
    let ctx = BuildContext::new("alpine:3");
    strategy.set_dirty(&[Stage::InfraInstall]);
    // infra_install, sources_1 succeed; infra_setup (3rd build) fails
    engine.fail_build(3, "exit status 100");

    let err = pipeline.run(&ctx).await.unwrap_err();

    assert_eq!(err.failed_stage, Stage::InfraSetup);
    assert_eq!(err.completed, vec![Stage::InfraInstall, Stage::Sources1]);
    assert!(matches!(
        err.source,
        StageError::StageBuildFailed {
            stage: Stage::InfraSetup,
            cause: EngineError::CommandFailed(_),
        }
    ));
    assert!(err.to_string().starts_with("built through sources_1, failed at infra_setup"));

    assert!(engine.resolve(&reference(Stage::InfraInstall, &ctx, &strategy)).is_some());
    assert!(engine.resolve(&reference(Stage::Sources1, &ctx, &strategy)).is_some());
    for stage in &Stage::ALL[3..] {
        assert!(engine.resolve(&reference(*stage, &ctx, &strategy)).is_none());
    }
    assert_eq!(strategy.executed().len(), 3, "later stages must not run");
}

#[tokio::test]
async fn test_cancellation_aborts_remaining_stages() {
    let (engine, strategy, pipeline) = setup(StageGraph::new());
    let ctx = BuildContext::new("alpine:3");
    strategy.set_dirty(&[Stage::AppInstall]);
    engine.cancel_build(2);

    let err = pipeline.run(&ctx).await.unwrap_err();

    assert_eq!(err.failed_stage, Stage::Sources2);
    assert_eq!(err.completed, vec![Stage::AppInstall]);
    assert!(err.source.is_cancelled());
    assert_eq!(engine.build_count(), 2);
}

#[tokio::test]
async fn test_rerun_after_failure_resumes() {
    let (engine, strategy, pipeline) = setup(StageGraph::new());
    let ctx = BuildContext::new("alpine:3");
    strategy.set_dirty(&[Stage::Prepare]);
    engine.fail_build(2, "network down");
    assert!(pipeline.run(&ctx).await.is_err());

    // Predicates reflecting the engine cache: prepare is now tagged.
    strategy.set_dirty(&[Stage::InfraInstall]);
    strategy.reset();
    let outcome = pipeline.run(&ctx).await.unwrap();

    assert_eq!(outcome.reused, vec![Stage::Prepare]);
    assert_eq!(outcome.executed.len(), 8);
    assert_eq!(
        strategy.executed()[0].1,
        reference(Stage::Prepare, &ctx, &strategy)
    );
}

/// Only customizes `app_install`; everything else is left to the defaults.
struct AppInstallOnly;

#[async_trait::async_trait]
impl BuildStrategy for AppInstallOnly {
    fn name(&self) -> &str {
        "app-install-only"
    }

    async fn needs_rebuild(&self, stage: Stage, _context: &BuildContext) -> StrategyResult<bool> {
        match stage {
            Stage::AppInstall => Ok(true),
            _ => Err(StrategyError::not_implemented(stage, Operation::NeedsRebuild)),
        }
    }
}

#[tokio::test]
async fn test_partial_strategy_fails_loudly() {
    let engine = Arc::new(MemoryEngine::new());
    let pipeline = Pipeline::new(StageGraph::new(), Arc::new(AppInstallOnly), engine.clone());

    let err = pipeline.run(&BuildContext::new("alpine:3")).await.unwrap_err();

    assert_eq!(err.failed_stage, Stage::Prepare);
    assert!(err.completed.is_empty());
    assert_eq!(
        err.source,
        StageError::NotImplemented {
            stage: Stage::Prepare,
            operation: Operation::NeedsRebuild,
        }
    );
    assert!(engine.calls().is_empty());
}

#[tokio::test]
async fn test_missing_execute_is_reported_for_first_dirty_stage() {
    let engine = Arc::new(MemoryEngine::new());
    let graph = StageGraph::from_table(&[(Stage::AppInstall, None)]).unwrap();
    let pipeline = Pipeline::new(graph, Arc::new(AppInstallOnly), engine.clone());

    let err = pipeline.run(&BuildContext::new("alpine:3")).await.unwrap_err();

    assert_eq!(
        err.source,
        StageError::NotImplemented {
            stage: Stage::AppInstall,
            operation: Operation::ComputeKey,
        }
    );
    assert!(
        !engine
            .calls()
            .iter()
            .any(|call| matches!(call, EngineCall::Tag { .. }))
    );
}

#[tokio::test]
#[traced_test]
async fn test_logs_stage_decisions() {
    let (_engine, strategy, pipeline) = setup(short_chain());
    strategy.set_dirty(&[Stage::Sources1]);

    let _ = pipeline.run(&BuildContext::new("alpine:3")).await.unwrap();

    assert!(logs_contain("CLEAN     prepare"));
    assert!(logs_contain("DIRTY     sources_1"));
    assert!(logs_contain("BUILDING  sources_1"));
}
