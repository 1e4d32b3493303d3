use staleward_model::{HostId, ModelError, StalenessState, TenantId};
use thiserror::Error;

use crate::jobs::RunSummary;

/// Failures raised by a storage adapter.
#[derive(Error, Debug)]
pub enum StorageError {
    #[cfg(feature = "postgres")]
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Storage unavailable: {0}")]
    Unavailable(String),

    #[error("Invalid stored record: {0}")]
    InvalidRecord(String),

    #[error("Host not found: {0}")]
    HostNotFound(HostId),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Session already closed")]
    SessionClosed,
}

/// Outcome of a failed publish as reported by a bus adapter.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PublishError {
    /// The bus refused this one message. The connection stays usable.
    #[error("Message rejected: {0}")]
    Rejected(String),

    /// The connection cannot carry any further messages.
    #[error("Connection unusable: {0}")]
    ConnectionUnusable(String),
}

#[derive(Error, Debug)]
pub enum PolicyLoadError {
    #[error("Policy storage unreachable: {0}")]
    Unreachable(#[source] StorageError),

    #[error("Invalid staleness policy for tenant {tenant_id}: {source}")]
    Invalid {
        tenant_id: String,
        #[source]
        source: ModelError,
    },

    #[error("Duplicate staleness policy for tenant {0}")]
    Duplicate(TenantId),
}

#[derive(Error, Debug)]
pub enum PredicateBuildError {
    #[error("Policy thresholds are not monotonic ({scope}): {source}")]
    NonMonotonic {
        scope: String,
        #[source]
        source: ModelError,
    },

    #[error("Threshold for {state} ({seconds}s) leaves the timestamp range")]
    WindowOutOfRange {
        state: StalenessState,
        seconds: i64,
    },
}

#[derive(Error, Debug)]
pub enum ChunkFetchError {
    #[error("Failed to fetch chunk {chunk}: {source}")]
    Storage {
        chunk: usize,
        #[source]
        source: StorageError,
    },

    #[error(
        "Chunk {chunk} returned host {tenant_id}/{host_id} at or before the cursor"
    )]
    OutOfOrder {
        chunk: usize,
        tenant_id: TenantId,
        host_id: HostId,
    },

    #[error("Chunk {chunk} returned {returned} records, limit is {limit}")]
    Oversized {
        chunk: usize,
        returned: usize,
        limit: usize,
    },
}

/// Per-host failure. Logged and counted; the scan continues.
#[derive(Error, Debug)]
pub enum HostEmitError {
    #[error("Failed to serialize event: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("Event rejected by bus: {0}")]
    Rejected(String),

    #[error("Failed to write host before emit: {0}")]
    Write(#[source] StorageError),

    #[error("Failed to derive staleness timestamps: {0}")]
    Timestamps(#[source] ModelError),
}

#[derive(Error, Debug)]
pub enum BusConnectionError {
    #[error("Failed to connect to event bus: {0}")]
    Connect(String),

    #[error("Event bus connection lost: {0}")]
    Lost(String),

    #[error("Failed to flush event bus producer: {0}")]
    Flush(String),
}

#[derive(Error, Debug)]
pub enum JobError {
    #[error(transparent)]
    PolicyLoad(#[from] PolicyLoadError),

    #[error(transparent)]
    PredicateBuild(#[from] PredicateBuildError),

    #[error(transparent)]
    ChunkFetch(#[from] ChunkFetchError),

    #[error(transparent)]
    BusConnection(#[from] BusConnectionError),

    #[error("Access denied for tenant {0}")]
    TenantDenied(TenantId),

    #[error(transparent)]
    Metrics(#[from] crate::metrics::MetricsError),
}

/// A fatal run error together with the counts accumulated before it.
#[derive(Error, Debug)]
#[error(
    "{error} (scanned={}, delivered={}, failed={}, skipped={})",
    .summary.scanned,
    .summary.delivered,
    .summary.failed,
    .summary.skipped
)]
pub struct JobFailure {
    #[source]
    pub error: JobError,
    pub summary: RunSummary,
}

#[derive(Error, Debug)]
pub enum PolicyAdminError {
    #[error("Policy storage error: {0}")]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Invalid(#[from] ModelError),
}

pub type Result<T> = std::result::Result<T, JobError>;
