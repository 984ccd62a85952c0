//! Git integration layer.
//!
//! This module wraps the `git2` backend and re-exports only what the sync
//! pipeline needs: credentials, clone URL construction and the clone itself.

mod git2_backend;

pub use git2_backend::{GitCredentials, clone_repo, clone_url};
