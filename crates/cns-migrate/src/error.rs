//! Error types for a migration run.
//!
//! Every variant of [`MigrateError`] that escapes [`crate::run::execute`] is
//! fatal: the run stops and no summary is produced. Per-volume problems never
//! surface here; they are folded into a [`crate::types::MigrationOutcome`].

use thiserror::Error;

use crate::storage::StorageError;

/// Fatal errors that abort a migration run.
#[derive(Debug, Error)]
pub enum MigrateError {
    /// Cluster or backend connection config could not be resolved.
    #[error("configuration error: {0}")]
    Config(String),

    /// The storage platform rejected our credentials or the session failed.
    #[error("authentication to storage platform failed: {0}")]
    Auth(String),

    /// A named source or destination backend does not exist.
    #[error("cannot resolve datastore {name} in datacenter {datacenter}: {reason}")]
    BackendResolution {
        /// Datastore name that was requested
        name: String,
        /// Datacenter the lookup was scoped to
        datacenter: String,
        /// Underlying failure
        reason: String,
    },

    /// The volume list is empty or unreadable.
    #[error("input error: {0}")]
    Input(String),

    /// Enumerating the source catalog failed part way.
    #[error("volume query failed: {0}")]
    Query(String),

    /// A named cluster object does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// Cluster API call failed.
    #[error("cluster API error: {0}")]
    Cluster(#[from] kube::Error),

    /// The run was cancelled before all volumes were processed.
    #[error("migration cancelled after {processed} of {requested} volumes")]
    Cancelled {
        /// Volumes that finished before the signal arrived
        processed: usize,
        /// Volumes in the input list
        requested: usize,
    },
}

impl MigrateError {
    /// Wraps a storage error raised while logging in.
    pub fn auth(err: StorageError) -> Self {
        MigrateError::Auth(err.to_string())
    }

    /// Wraps a storage error raised while fetching a catalog page.
    pub fn query(err: StorageError) -> Self {
        MigrateError::Query(err.to_string())
    }
}

/// Result alias for fallible run-level operations.
pub type Result<T> = std::result::Result<T, MigrateError>;
