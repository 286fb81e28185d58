//! Stage identifiers and the linear stage graph.
//!
//! The pipeline is described by a table of `stage -> parent` entries. One
//! generic traversal answers every question about it (parent, canonical
//! order, downstream closure), so nothing in the crate hardcodes per-stage
//! stage lists.

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::str::FromStr;

/// A named pipeline step. Each stage produces one intermediate image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    /// Base system preparation on top of the user supplied image.
    Prepare,
    /// Infrastructure package installation.
    InfraInstall,
    /// First source snapshot.
    #[serde(rename = "sources_1")]
    Sources1,
    /// Infrastructure configuration.
    InfraSetup,
    /// Application dependency installation.
    AppInstall,
    /// Second source snapshot.
    #[serde(rename = "sources_2")]
    Sources2,
    /// Application configuration.
    AppSetup,
    /// Third source snapshot.
    #[serde(rename = "sources_3")]
    Sources3,
    /// Final source snapshot.
    #[serde(rename = "sources_4")]
    Sources4,
}

impl Stage {
    /// Every stage, in declaration order.
    pub const ALL: [Stage; 9] = [
        Stage::Prepare,
        Stage::InfraInstall,
        Stage::Sources1,
        Stage::InfraSetup,
        Stage::AppInstall,
        Stage::Sources2,
        Stage::AppSetup,
        Stage::Sources3,
        Stage::Sources4,
    ];

    /// Stable snake_case name used in configs, logs and the CLI.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Stage::Prepare => "prepare",
            Stage::InfraInstall => "infra_install",
            Stage::Sources1 => "sources_1",
            Stage::InfraSetup => "infra_setup",
            Stage::AppInstall => "app_install",
            Stage::Sources2 => "sources_2",
            Stage::AppSetup => "app_setup",
            Stage::Sources3 => "sources_3",
            Stage::Sources4 => "sources_4",
        }
    }

    /// Whether this stage snapshots application sources.
    #[must_use]
    pub fn is_sources(self) -> bool {
        matches!(
            self,
            Stage::Sources1 | Stage::Sources2 | Stage::Sources3 | Stage::Sources4
        )
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Stage {
    type Err = GraphError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Stage::ALL
            .into_iter()
            .find(|stage| stage.as_str() == s)
            .ok_or_else(|| GraphError::UnknownStage(s.to_string()))
    }
}

/// Default pipeline: each entry is `(stage, parent)`.
pub const STAGE_DEPENDENCIES: [(Stage, Option<Stage>); 9] = [
    (Stage::Prepare, None),
    (Stage::InfraInstall, Some(Stage::Prepare)),
    (Stage::Sources1, Some(Stage::InfraInstall)),
    (Stage::InfraSetup, Some(Stage::Sources1)),
    (Stage::AppInstall, Some(Stage::InfraSetup)),
    (Stage::Sources2, Some(Stage::AppInstall)),
    (Stage::AppSetup, Some(Stage::Sources2)),
    (Stage::Sources3, Some(Stage::AppSetup)),
    (Stage::Sources4, Some(Stage::Sources3)),
];

/// Error types for stage graph construction.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GraphError {
    /// Stage table has no entries
    #[error("Stage table is empty")]
    Empty,

    /// Stage name is not one of the known stages
    #[error("Unknown stage: {0}")]
    UnknownStage(String),

    /// Stage listed more than once
    #[error("Stage {0} is listed more than once")]
    DuplicateStage(Stage),

    /// Parent refers to a stage outside the table
    #[error("Stage {stage} depends on {parent}, which is not part of the pipeline")]
    MissingParent {
        /// Dependent stage
        stage: Stage,
        /// Parent that is not in the table
        parent: Stage,
    },

    /// Zero or several stages without a parent
    #[error("Pipeline must have exactly one root stage, found {0}")]
    RootCount(usize),

    /// Two stages build from the same parent
    #[error("Stages {first} and {second} both build from {parent}")]
    Branch {
        /// Shared parent
        parent: Stage,
        /// First child
        first: Stage,
        /// Second child
        second: Stage,
    },

    /// The chain from the root does not cover every stage
    #[error("Stages not reachable from the root (cycle?): {0:?}")]
    Unreachable(Vec<Stage>),
}

/// Static, linear dependency chain over a set of stages.
///
/// Constructed once and never mutated; the order is fixed pipeline
/// configuration rather than runtime state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageGraph {
    order: Vec<Stage>,
    parents: HashMap<Stage, Stage>,
}

impl Default for StageGraph {
    fn default() -> Self {
        Self::new()
    }
}

impl StageGraph {
    /// The full nine-stage pipeline.
    #[must_use]
    pub fn new() -> Self {
        let order = STAGE_DEPENDENCIES.iter().map(|(stage, _)| *stage).collect();
        let parents = STAGE_DEPENDENCIES
            .iter()
            .filter_map(|(stage, parent)| parent.map(|p| (*stage, p)))
            .collect();
        Self { order, parents }
    }

    /// Build a graph from a `(stage, parent)` table.
    ///
    /// # Errors
    ///
    /// Returns a `GraphError` unless the table describes a single linear
    /// chain: one root, no duplicates, no branches, no cycles, and every
    /// parent present in the table.
    pub fn from_table(table: &[(Stage, Option<Stage>)]) -> Result<Self, GraphError> {
        if table.is_empty() {
            return Err(GraphError::Empty);
        }

        let mut seen = HashSet::new();
        for (stage, _) in table {
            if !seen.insert(*stage) {
                return Err(GraphError::DuplicateStage(*stage));
            }
        }

        let mut parents = HashMap::new();
        let mut children: HashMap<Stage, Stage> = HashMap::new();
        let mut roots = Vec::new();

        for &(stage, parent) in table {
            let Some(parent) = parent else {
                roots.push(stage);
                continue;
            };
            if !seen.contains(&parent) {
                return Err(GraphError::MissingParent { stage, parent });
            }
            if let Some(&first) = children.get(&parent) {
                return Err(GraphError::Branch {
                    parent,
                    first,
                    second: stage,
                });
            }
            let _ = children.insert(parent, stage);
            let _ = parents.insert(stage, parent);
        }

        let &[root] = roots.as_slice() else {
            return Err(GraphError::RootCount(roots.len()));
        };

        let mut order = vec![root];
        let mut current = root;
        while let Some(&next) = children.get(&current) {
            order.push(next);
            current = next;
        }

        if order.len() != table.len() {
            let mut unreachable: Vec<Stage> = table
                .iter()
                .map(|(stage, _)| *stage)
                .filter(|stage| !order.contains(stage))
                .collect();
            unreachable.sort();
            return Err(GraphError::Unreachable(unreachable));
        }

        Ok(Self { order, parents })
    }

    /// Stage whose output image `stage` builds from, or `None` for the root.
    #[must_use]
    pub fn parent_of(&self, stage: Stage) -> Option<Stage> {
        self.parents.get(&stage).copied()
    }

    /// All stages in canonical pipeline order.
    #[must_use]
    pub fn ordered_stages(&self) -> &[Stage] {
        &self.order
    }

    /// `stage` followed by every stage after it in the chain.
    ///
    /// Empty when `stage` is not part of this graph.
    #[must_use]
    pub fn downstream_closure(&self, stage: Stage) -> Vec<Stage> {
        self.position(stage)
            .map(|idx| self.order[idx..].to_vec())
            .unwrap_or_default()
    }

    /// Whether the stage belongs to this graph.
    #[must_use]
    pub fn contains(&self, stage: Stage) -> bool {
        self.position(stage).is_some()
    }

    /// Last stage of the chain; its image is the build result.
    #[must_use]
    pub fn last(&self) -> Stage {
        // from_table/new never produce an empty order
        self.order[self.order.len() - 1]
    }

    /// Number of stages.
    #[must_use]
    pub fn len(&self) -> usize {
        self.order.len()
    }

    /// Always false; kept for clippy's `len_without_is_empty`.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    fn position(&self, stage: Stage) -> Option<usize> {
        self.order.iter().position(|s| *s == stage)
    }
}
