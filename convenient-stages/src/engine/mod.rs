//! Container engine abstraction.
//!
//! The pipeline never looks inside images: it asks the engine whether a
//! reference exists, hands it commands to run on top of an image, and tags
//! the result. Everything else (layer format, storage, registries) belongs
//! to the engine.

pub mod docker;
pub mod memory;

pub use docker::{DockerEngine, InheritedConfig};
pub use memory::{EngineCall, MemoryEngine};

use crate::key::ImageRef;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Engine-assigned image identifier. Opaque to the pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Image(String);

impl Image {
    /// Wrap an engine image id.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Get the id as a string
    #[must_use]
    pub fn id(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Image {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Error types for engine operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EngineError {
    /// Engine command exited unsuccessfully
    #[error("Engine command failed: {0}")]
    CommandFailed(String),

    /// Operation was interrupted before completing
    #[error("Engine operation cancelled: {0}")]
    Cancelled(String),

    /// Image or reference does not exist
    #[error("Image not found: {0}")]
    NotFound(String),

    /// Engine process could not be spawned or talked to
    #[error("IO error: {0}")]
    Io(String),
}

impl From<std::io::Error> for EngineError {
    fn from(e: std::io::Error) -> Self {
        EngineError::Io(e.to_string())
    }
}

/// Result type for engine operations.
pub type EngineResult<T> = Result<T, EngineError>;

/// Trait for container engine implementations
///
/// The engine's image namespace is treated as append-only and keyed by
/// [`ImageRef`]. Implementations are expected to make `tag` idempotent.
#[async_trait::async_trait]
pub trait ContainerEngine: Send + Sync {
    /// Whether an image is stored under `reference`.
    async fn image_exists(&self, reference: &ImageRef) -> EngineResult<bool>;

    /// Run `commands` on top of `from` and return the resulting image.
    ///
    /// An empty command list still yields a new image.
    async fn build(
        &self,
        from: &ImageRef,
        commands: &[String],
        env: &BTreeMap<String, String>,
    ) -> EngineResult<Image>;

    /// Point `reference` at `image`.
    async fn tag(&self, image: &Image, reference: &ImageRef) -> EngineResult<()>;

    /// Engine name (for logging/debugging)
    fn name(&self) -> &str;
}
