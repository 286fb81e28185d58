//! In-process engine that keeps images in a map.

use super::{ContainerEngine, EngineError, EngineResult, Image};
use crate::key::ImageRef;
use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

/// One observed engine call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineCall {
    /// `build(from, commands, env)`
    Build {
        /// Parent reference
        from: ImageRef,
        /// Commands run
        commands: Vec<String>,
        /// Environment the commands saw
        env: BTreeMap<String, String>,
    },
    /// `tag(image, reference)`
    Tag {
        /// Tagged image
        image: Image,
        /// New reference
        reference: ImageRef,
    },
}

#[derive(Debug, Clone)]
enum Scripted {
    Fail(String),
    Cancel,
}

#[derive(Debug, Default)]
struct State {
    tags: HashMap<ImageRef, Image>,
    calls: Vec<EngineCall>,
    scripted: HashMap<usize, Scripted>,
    builds: usize,
}

/// Engine backed by an in-memory tag table.
///
/// Builds produce fresh image ids (`mem-1`, `mem-2`, ...). Individual build
/// calls can be scripted to fail or be cancelled, which makes it the engine
/// of choice for exercising the pipeline without a container runtime.
#[derive(Debug, Default)]
pub struct MemoryEngine {
    state: Mutex<State>,
    next_id: AtomicUsize,
}

impl MemoryEngine {
    /// Create an empty engine.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the `n`th build call (1-based, counted over the engine's
    /// lifetime) fail.
    pub fn fail_build(&self, n: usize, message: impl Into<String>) {
        let _ = self.lock().scripted.insert(n, Scripted::Fail(message.into()));
    }

    /// Make the `n`th build call report cancellation.
    pub fn cancel_build(&self, n: usize) {
        let _ = self.lock().scripted.insert(n, Scripted::Cancel);
    }

    /// Pre-populate a reference, as if an earlier run had tagged it.
    pub fn insert(&self, reference: ImageRef, image: Image) {
        let _ = self.lock().tags.insert(reference, image);
    }

    /// Drop a reference, simulating cache eviction.
    pub fn evict(&self, reference: &ImageRef) -> Option<Image> {
        self.lock().tags.remove(reference)
    }

    /// Image currently tagged as `reference`.
    #[must_use]
    pub fn resolve(&self, reference: &ImageRef) -> Option<Image> {
        self.lock().tags.get(reference).cloned()
    }

    /// Every call seen so far, in order.
    #[must_use]
    pub fn calls(&self) -> Vec<EngineCall> {
        self.lock().calls.clone()
    }

    /// Number of build calls seen so far.
    #[must_use]
    pub fn build_count(&self) -> usize {
        self.lock().builds
    }

    /// Forget recorded calls (tags are kept).
    pub fn clear_calls(&self) {
        self.lock().calls.clear();
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, State> {
        // A poisoned lock only means a panicking test thread; the map is
        // still consistent.
        self.state
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

#[async_trait::async_trait]
impl ContainerEngine for MemoryEngine {
    async fn image_exists(&self, reference: &ImageRef) -> EngineResult<bool> {
        Ok(self.lock().tags.contains_key(reference))
    }

    async fn build(
        &self,
        from: &ImageRef,
        commands: &[String],
        env: &BTreeMap<String, String>,
    ) -> EngineResult<Image> {
        let mut state = self.lock();
        state.builds += 1;
        state.calls.push(EngineCall::Build {
            from: from.clone(),
            commands: commands.to_vec(),
            env: env.clone(),
        });

        let n = state.builds;
        match state.scripted.remove(&n) {
            Some(Scripted::Fail(message)) => return Err(EngineError::CommandFailed(message)),
            Some(Scripted::Cancel) => {
                return Err(EngineError::Cancelled(format!("build #{n} interrupted")));
            }
            None => {}
        }

        let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(Image::new(format!("mem-{id}")))
    }

    async fn tag(&self, image: &Image, reference: &ImageRef) -> EngineResult<()> {
        let mut state = self.lock();
        state.calls.push(EngineCall::Tag {
            image: image.clone(),
            reference: reference.clone(),
        });
        let _ = state.tags.insert(reference.clone(), image.clone());
        Ok(())
    }

    fn name(&self) -> &str {
        "memory"
    }
}
