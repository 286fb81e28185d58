//! Source revision lookup on local git checkouts.
//!
//! The `sources_*` stages key on the commit their application sources come
//! from. [`GitSource`] turns a ref name in a checkout into that commit id.
//!
//! ```no_run
//! use convenient_git::GitSource;
//! use std::path::Path;
//!
//! # fn main() -> Result<(), convenient_git::GitError> {
//! let source = GitSource::open(Path::new("."))?;
//! let revision = source.resolve(None)?;
//! println!("building sources at {revision}");
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]

use git2::{ErrorCode, ObjectType, Repository};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Ref resolved when none is given.
pub const DEFAULT_REF: &str = "HEAD";

/// Errors from opening a checkout or resolving a ref.
#[derive(Debug, thiserror::Error)]
pub enum GitError {
    /// No repository at the path
    #[error("No git repository at {0}")]
    NotFound(PathBuf),

    /// Ref name does not exist in the repository
    #[error("Unknown ref '{refname}' in {path}")]
    UnknownRef {
        /// Ref that was looked up
        refname: String,
        /// Repository path
        path: PathBuf,
    },

    /// Ref exists but does not point at a commit (e.g. unborn `HEAD`)
    #[error("Ref '{0}' does not point at a commit")]
    NotACommit(String),

    /// Any other libgit2 failure
    #[error("Git error: {0}")]
    Git(#[from] git2::Error),
}

/// Convenience result alias.
pub type GitResult<T> = Result<T, GitError>;

/// An opened source checkout.
pub struct GitSource {
    repo: Repository,
    path: PathBuf,
}

impl std::fmt::Debug for GitSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GitSource").field("path", &self.path).finish()
    }
}

impl GitSource {
    /// Open the repository at `path` (work tree or bare).
    ///
    /// # Errors
    ///
    /// `GitError::NotFound` if there is no repository there.
    pub fn open(path: &Path) -> GitResult<Self> {
        let repo = Repository::open(path).map_err(|e| match e.code() {
            ErrorCode::NotFound => GitError::NotFound(path.to_path_buf()),
            _ => GitError::Git(e),
        })?;
        debug!("Opened git source {}", path.display());
        Ok(Self {
            repo,
            path: path.to_path_buf(),
        })
    }

    /// Path the repository was opened from.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Commit id `refname` points at; `HEAD` when `None`.
    ///
    /// Accepts anything `git rev-parse` does: branch and tag names, full
    /// ref names, abbreviated ids.
    ///
    /// # Errors
    ///
    /// `GitError::UnknownRef` if nothing matches, `GitError::NotACommit` if
    /// the ref does not lead to a commit.
    pub fn resolve(&self, refname: Option<&str>) -> GitResult<String> {
        let refname = refname.unwrap_or(DEFAULT_REF);

        let object = self.repo.revparse_single(refname).map_err(|e| match e.code() {
            ErrorCode::NotFound | ErrorCode::InvalidSpec => GitError::UnknownRef {
                refname: refname.to_string(),
                path: self.path.clone(),
            },
            ErrorCode::UnbornBranch => GitError::NotACommit(refname.to_string()),
            _ => GitError::Git(e),
        })?;

        let commit = object
            .peel(ObjectType::Commit)
            .map_err(|_| GitError::NotACommit(refname.to_string()))?;

        let oid = commit.id().to_string();
        debug!("{} resolved to {}", refname, oid);
        Ok(oid)
    }
}
