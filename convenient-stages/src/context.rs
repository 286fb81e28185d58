//! Per-invocation build parameters and their YAML configuration form.

use crate::key::{DEFAULT_NAMESPACE, ImageRef};
use crate::stage::Stage;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

/// Work definition of a single stage.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StageSpec {
    /// Shell commands, run in order
    pub commands: Vec<String>,

    /// Files whose content feeds the stage key (relative to the context root)
    pub files: Vec<PathBuf>,

    /// Stage-local environment, merged over the global one
    pub env: BTreeMap<String, String>,
}

/// Where application sources come from.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SourceSpec {
    /// Local git checkout used to resolve the revision
    pub path: Option<PathBuf>,

    /// Ref to resolve in `path` (defaults to `HEAD`)
    #[serde(rename = "ref")]
    pub reference: Option<String>,

    /// Pinned revision; wins over `path`
    pub revision: Option<String>,
}

/// Parameters of one build invocation.
///
/// Owned by the caller and read-only to the pipeline while it runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildContext {
    /// Image the root stage builds from
    pub base_image: ImageRef,

    /// Namespace of stage image references
    pub namespace: String,

    /// Environment shared by every stage
    pub env: BTreeMap<String, String>,

    /// Per-stage work; a missing entry means "no commands"
    pub stages: BTreeMap<Stage, StageSpec>,

    /// Resolved source revision for the `sources_*` stages
    pub source_revision: Option<String>,

    /// Directory relative stage files are resolved against
    pub root: PathBuf,
}

impl BuildContext {
    /// Context with only a base image; everything else empty.
    pub fn new(base_image: impl Into<ImageRef>) -> Self {
        Self {
            base_image: base_image.into(),
            namespace: DEFAULT_NAMESPACE.to_string(),
            env: BTreeMap::new(),
            stages: BTreeMap::new(),
            source_revision: None,
            root: PathBuf::from("."),
        }
    }

    /// Set the commands of one stage.
    #[must_use]
    pub fn with_commands<I, S>(mut self, stage: Stage, commands: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.stages.entry(stage).or_default().commands =
            commands.into_iter().map(Into::into).collect();
        self
    }

    /// Set the source revision.
    #[must_use]
    pub fn with_revision(mut self, revision: impl Into<String>) -> Self {
        self.source_revision = Some(revision.into());
        self
    }

    /// Work configured for a stage, if any.
    #[must_use]
    pub fn stage(&self, stage: Stage) -> Option<&StageSpec> {
        self.stages.get(&stage)
    }

    /// Global env overlaid with the stage env.
    #[must_use]
    pub fn stage_env(&self, stage: Stage) -> BTreeMap<String, String> {
        let mut env = self.env.clone();
        if let Some(spec) = self.stage(stage) {
            env.extend(spec.env.iter().map(|(k, v)| (k.clone(), v.clone())));
        }
        env
    }

    /// Resolve a stage file against the context root.
    #[must_use]
    pub fn resolve(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.root.join(path)
        }
    }
}

/// Error types for configuration loading.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Config file could not be read
    #[error("IO error reading {0}: {1}")]
    Io(PathBuf, String),

    /// Config file is not valid YAML for a build
    #[error("Parse error in {0}: {1}")]
    Parse(PathBuf, String),

    /// Config parsed but is unusable
    #[error("Invalid configuration in {0}: {1}")]
    Invalid(PathBuf, String),
}

/// On-disk build description (`dapp.yml`).
///
/// ```yaml
/// from: ubuntu:22.04
/// namespace: myapp
/// env:
///   DEBIAN_FRONTEND: noninteractive
/// stages:
///   infra_install:
///     commands: [apt-get update, apt-get install -y curl]
///   app_install:
///     files: [Gemfile.lock]
///     commands: [bundle install]
/// source:
///   path: .
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BuildConfig {
    /// Base image of the root stage
    pub from: String,

    /// Namespace of stage image references
    #[serde(default)]
    pub namespace: Option<String>,

    /// Environment shared by every stage
    #[serde(default)]
    pub env: BTreeMap<String, String>,

    /// Per-stage work
    #[serde(default)]
    pub stages: BTreeMap<Stage, StageSpec>,

    /// Application source settings
    #[serde(default)]
    pub source: SourceSpec,

    #[serde(skip)]
    path: PathBuf,
}

impl BuildConfig {
    /// Load and validate a config file.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if the file is unreadable, not valid YAML, or
    /// has an empty `from`/`namespace`.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path)
            .map_err(|e| ConfigError::Io(path.to_path_buf(), e.to_string()))?;
        Self::parse(path, &content)
    }

    /// Parse config text; `path` is only used for error messages and as
    /// the base for relative paths.
    ///
    /// # Errors
    ///
    /// See [`BuildConfig::load`].
    pub fn parse(path: &Path, content: &str) -> Result<Self, ConfigError> {
        let mut config: BuildConfig = serde_yaml::from_str(content)
            .map_err(|e| ConfigError::Parse(path.to_path_buf(), e.to_string()))?;
        config.path = path.to_path_buf();

        if config.from.trim().is_empty() {
            return Err(ConfigError::Invalid(
                path.to_path_buf(),
                "`from` must name a base image".to_string(),
            ));
        }
        if config.namespace.as_deref().is_some_and(|ns| ns.trim().is_empty()) {
            return Err(ConfigError::Invalid(
                path.to_path_buf(),
                "`namespace` must not be empty".to_string(),
            ));
        }

        tracing::debug!(
            "Loaded build config {} ({} configured stages)",
            path.display(),
            config.stages.len()
        );
        Ok(config)
    }

    /// Directory containing the config file.
    #[must_use]
    pub fn root(&self) -> PathBuf {
        self.path
            .parent()
            .map(Path::to_path_buf)
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| PathBuf::from("."))
    }

    /// Source checkout to resolve a revision from, relative to the config.
    #[must_use]
    pub fn source_path(&self) -> Option<PathBuf> {
        self.source.path.as_ref().map(|p| {
            if p.is_absolute() {
                p.clone()
            } else {
                self.root().join(p)
            }
        })
    }

    /// Build the invocation context.
    ///
    /// `revision` (e.g. from the command line or a git checkout) is used
    /// when the config does not pin one.
    #[must_use]
    pub fn into_context(self, revision: Option<String>) -> BuildContext {
        let root = self.root();
        BuildContext {
            base_image: ImageRef::new(self.from),
            namespace: self
                .namespace
                .unwrap_or_else(|| DEFAULT_NAMESPACE.to_string()),
            env: self.env,
            stages: self.stages,
            source_revision: self.source.revision.or(revision),
            root,
        }
    }
}
