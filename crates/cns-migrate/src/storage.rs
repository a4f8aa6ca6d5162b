//! Storage-platform abstraction.
//!
//! This module defines the [`StorageClient`] trait the migration core talks to,
//! together with the value types that cross it. The vCenter implementation in
//! [`crate::vcenter`] speaks SOAP; tests use in-memory fakes.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

use crate::types::StorageVolume;

/// Category of a fault reported by the storage platform.
///
/// The platform's own fault type name is mapped onto this enum by the
/// collaborator, so callers never inspect raw fault payloads.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum FaultCategory {
    /// The object already exists at the destination.
    AlreadyExists,
    /// The referenced object does not exist.
    NotFound,
    /// The request carried an invalid argument.
    InvalidArgument,
    /// The operation is not supported for this object.
    NotSupported,
    /// Any other fault, with the platform's type name.
    Other(String),
}

impl FaultCategory {
    /// Maps a platform fault type name (for example `AlreadyExists` or
    /// `vim.fault.AlreadyExists`) onto a category.
    pub fn from_type_name(name: &str) -> Self {
        let short = name.rsplit('.').next().unwrap_or(name);
        let short = short.strip_suffix("Fault").unwrap_or(short);
        match short {
            "AlreadyExists" => FaultCategory::AlreadyExists,
            "NotFound" | "ManagedObjectNotFound" | "CnsVolumeNotFound" => FaultCategory::NotFound,
            "InvalidArgument" | "InvalidRequest" => FaultCategory::InvalidArgument,
            "NotSupported" => FaultCategory::NotSupported,
            _ => FaultCategory::Other(name.to_string()),
        }
    }
}

impl fmt::Display for FaultCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FaultCategory::AlreadyExists => write!(f, "AlreadyExists"),
            FaultCategory::NotFound => write!(f, "NotFound"),
            FaultCategory::InvalidArgument => write!(f, "InvalidArgument"),
            FaultCategory::NotSupported => write!(f, "NotSupported"),
            FaultCategory::Other(name) => write!(f, "{}", name),
        }
    }
}

/// A structured fault returned by the storage platform.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fault {
    /// Classified fault type.
    pub category: FaultCategory,
    /// Human readable message from the platform.
    pub message: String,
}

impl Fault {
    /// Fault of `category` with `message`.
    pub fn new(category: FaultCategory, message: impl Into<String>) -> Self {
        Self {
            category,
            message: message.into(),
        }
    }

    /// Whether the platform says the object already exists.
    pub fn is_already_exists(&self) -> bool {
        self.category == FaultCategory::AlreadyExists
    }
}

impl fmt::Display for Fault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.category, self.message)
    }
}

/// Errors raised by a [`StorageClient`].
#[derive(Debug, Error)]
pub enum StorageError {
    /// The request never got a response.
    #[error("transport error: {0}")]
    Transport(String),

    /// The platform answered with a fault.
    #[error("platform fault: {0}")]
    Fault(Fault),

    /// The response could not be understood.
    #[error("unexpected response: {0}")]
    Protocol(String),

    /// Login failed or the session was rejected.
    #[error("not authenticated: {0}")]
    Auth(String),

    /// A named object does not exist.
    #[error("object not found: {0}")]
    NotFound(String),

    /// A task did not finish in time.
    #[error("task {task} did not finish within {timeout_secs}s")]
    Timeout {
        /// Task that was being waited on
        task: String,
        /// Configured wait limit
        timeout_secs: u64,
    },
}

impl StorageError {
    /// The fault carried by this error, if the platform reported one.
    pub fn fault(&self) -> Option<&Fault> {
        match self {
            StorageError::Fault(fault) => Some(fault),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for StorageError {
    fn from(err: reqwest::Error) -> Self {
        StorageError::Transport(err.to_string())
    }
}

/// Result of a storage platform call.
pub type Result<T> = std::result::Result<T, StorageError>;

/// Managed-object reference to a datastore.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BackendRef {
    /// Managed object type, normally `Datastore`.
    pub kind: String,
    /// Managed object id, e.g. `datastore-123`.
    pub value: String,
    /// Display name the backend was resolved from.
    pub name: String,
}

impl BackendRef {
    /// Reference to the datastore with managed object id `value`.
    pub fn datastore(value: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            kind: "Datastore".to_string(),
            value: value.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for BackendRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({}:{})", self.name, self.kind, self.value)
    }
}

/// Pagination cursor for a volume query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct QueryCursor {
    /// Index of the next record.
    pub offset: u64,
    /// Page size the server used.
    pub limit: u64,
    /// Records matching the query in total.
    pub total_records: u64,
}

/// A volume query scoped to one backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VolumeQuery {
    /// Backend whose volumes are listed.
    pub backend: BackendRef,
    /// `None` for the first page.
    pub cursor: Option<QueryCursor>,
    /// Records to request per page.
    pub page_limit: u64,
}

/// One page of query results.
#[derive(Debug, Clone, Default)]
pub struct VolumePage {
    /// Volumes on this page.
    pub volumes: Vec<StorageVolume>,
    /// Position after this page.
    pub cursor: QueryCursor,
}

/// Handle to a platform-side long-running task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskHandle {
    /// Managed object id of the task.
    pub id: String,
}

/// Per-volume entry in a finished task's result.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct VolumeOperationResult {
    /// Volume the result refers to.
    pub volume_id: Option<String>,
    /// Fault reported for this volume, if any.
    pub fault: Option<Fault>,
}

/// Result payload of a finished relocation task.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TaskResult {
    /// One entry per volume in the task.
    pub volume_results: Vec<VolumeOperationResult>,
}

impl TaskResult {
    /// First per-volume fault in the result, if any.
    pub fn first_fault(&self) -> Option<&Fault> {
        self.volume_results.iter().find_map(|r| r.fault.as_ref())
    }
}

/// Operations the migration core needs from the storage platform.
#[async_trait]
pub trait StorageClient: Send + Sync {
    /// Resolve a datastore by name inside `datacenter`.
    async fn resolve_backend(&self, datacenter: &str, name: &str) -> Result<BackendRef>;

    /// Fetch one page of volumes resident on `query.backend`.
    async fn query_volumes(&self, query: &VolumeQuery) -> Result<VolumePage>;

    /// Start relocating `volume_id` onto `destination`.
    ///
    /// A platform fault raised by the call itself comes back as
    /// [`StorageError::Fault`].
    async fn relocate_volume(&self, volume_id: &str, destination: &BackendRef) -> Result<TaskHandle>;

    /// Block until `task` finishes and return its result payload.
    async fn wait_for_task(&self, task: &TaskHandle) -> Result<TaskResult>;
}
