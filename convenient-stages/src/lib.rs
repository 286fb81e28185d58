//! Cached, linearly chained stage pipeline for building container images.
//!
//! An image is built through a fixed chain of named stages
//! (`prepare → infra_install → sources_1 → … → sources_4`). Every stage
//! produces an intermediate image tagged under a reference derived from a
//! content key, so unchanged stages are reused across builds.
//!
//! # Components
//!
//! - [`StageGraph`]: the static stage → parent table and its traversal
//! - [`BuildStrategy`]: per-stage predicate, key and execution; the
//!   defaults fail with `NotImplemented`. [`ShellStrategy`] runs configured
//!   shell commands
//! - [`StageExecutor`]: builds or reuses one stage image
//! - [`Pipeline`]: finds the first dirty stage and rebuilds it and every
//!   stage downstream of it
//! - [`ContainerEngine`]: the image backend ([`DockerEngine`],
//!   [`MemoryEngine`])
//!
//! # Example
//!
//! ```
//! use convenient_stages::{BuildContext, MemoryEngine, Pipeline, ShellStrategy, Stage, StageGraph};
//! use std::sync::Arc;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let engine = Arc::new(MemoryEngine::new());
//! let graph = StageGraph::new();
//! let strategy = Arc::new(ShellStrategy::new(engine.clone(), graph.clone()));
//! let pipeline = Pipeline::new(graph, strategy, engine.clone());
//!
//! let context = BuildContext::new("ubuntu:22.04")
//!     .with_commands(Stage::InfraInstall, ["apt-get update"]);
//!
//! let first = pipeline.run(&context).await?;
//! assert_eq!(first.executed.len(), 9);
//!
//! // Nothing changed: every stage is reused.
//! let second = pipeline.run(&context).await?;
//! assert!(second.executed.is_empty());
//! assert_eq!(first.final_image, second.final_image);
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]
#![warn(unused_results)]

pub mod context;
pub mod engine;
pub mod error;
pub mod executor;
pub mod key;
pub mod pipeline;
pub mod shell;
pub mod stage;
pub mod strategy;

pub use context::{BuildConfig, BuildContext, ConfigError, SourceSpec, StageSpec};
pub use engine::{
    ContainerEngine, DockerEngine, EngineCall, EngineError, EngineResult, Image, InheritedConfig,
    MemoryEngine,
};
pub use error::{PipelineError, StageError};
pub use executor::{StageExecutor, StageOutput};
pub use key::{CacheKey, DEFAULT_NAMESPACE, ImageRef, KeyBuilder};
pub use pipeline::{BuildOutcome, BuildPlan, Pipeline, StageState};
pub use shell::{SOURCE_REVISION_ENV, ShellStrategy};
pub use stage::{GraphError, STAGE_DEPENDENCIES, Stage, StageGraph};
pub use strategy::{BuildStrategy, Operation, StrategyError, StrategyResult};
