//! Cache keys and the image references derived from them.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

/// Namespace used for stage images when the config does not set one.
pub const DEFAULT_NAMESPACE: &str = "dapp";

/// Content fingerprint of one stage's inputs (SHA-256, lowercase hex).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CacheKey(String);

impl CacheKey {
    /// Start hashing a new key.
    #[must_use]
    pub fn builder() -> KeyBuilder {
        KeyBuilder::new()
    }

    /// Key of a single blob.
    #[must_use]
    pub fn from_content(content: &[u8]) -> Self {
        Self(hex::encode(Sha256::digest(content)))
    }

    /// Get the key as a string
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// First 12 hex digits, for log lines.
    #[must_use]
    pub fn short(&self) -> &str {
        &self.0[..self.0.len().min(12)]
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Incremental key hasher.
///
/// Every part is length-prefixed, so `["ab", "c"]` and `["a", "bc"]`
/// hash differently.
#[derive(Clone, Default)]
pub struct KeyBuilder {
    hasher: Sha256,
}

impl fmt::Debug for KeyBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyBuilder").finish_non_exhaustive()
    }
}

impl KeyBuilder {
    /// Create an empty builder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one part.
    #[must_use]
    pub fn part(mut self, data: impl AsRef<[u8]>) -> Self {
        let data = data.as_ref();
        self.hasher.update((data.len() as u64).to_le_bytes());
        self.hasher.update(data);
        self
    }

    /// Feed a labelled part, e.g. `("cmd", "apt-get update")`.
    #[must_use]
    pub fn field(self, label: &str, value: impl AsRef<[u8]>) -> Self {
        self.part(label).part(value)
    }

    /// Finish hashing.
    #[must_use]
    pub fn finish(self) -> CacheKey {
        CacheKey(hex::encode(self.hasher.finalize()))
    }
}

/// Opaque image reference understood by the container engine.
///
/// Either a user supplied base image (`ubuntu:22.04`) or a stage image
/// reference derived from a cache key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ImageRef(String);

impl ImageRef {
    /// Wrap an arbitrary reference.
    pub fn new(reference: impl Into<String>) -> Self {
        Self(reference.into())
    }

    /// Stage image reference: `<namespace>:<key>`.
    ///
    /// Pure function of its arguments.
    #[must_use]
    pub fn for_key(namespace: &str, key: &CacheKey) -> Self {
        Self(format!("{namespace}:{key}"))
    }

    /// Get the reference as a string
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ImageRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ImageRef {
    fn from(reference: &str) -> Self {
        Self::new(reference)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_is_sha256_hex() {
        let key = CacheKey::from_content(b"hello");
        assert_eq!(
            key.as_str(),
            "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824"
        );
        assert_eq!(key.short(), "2cf24dba5fb0");
    }

    #[test]
    fn test_builder_is_deterministic() {
        let a = CacheKey::builder().field("cmd", "make").part("x").finish();
        let b = CacheKey::builder().field("cmd", "make").part("x").finish();
        assert_eq!(a, b);
    }

    #[test]
    fn test_part_boundaries_do_not_alias() {
        let a = CacheKey::builder().part("ab").part("c").finish();
        let b = CacheKey::builder().part("a").part("bc").finish();
        assert_ne!(a, b);
    }

    #[test]
    fn test_image_ref_for_key() {
        let key = CacheKey::from_content(b"x");
        let reference = ImageRef::for_key(DEFAULT_NAMESPACE, &key);
        assert_eq!(reference.as_str(), format!("dapp:{key}"));
        assert_eq!(reference, ImageRef::for_key("dapp", &key));
    }
}
