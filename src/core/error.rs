use super::types::FullRoutingState;
use super::types::UploadedGroupMetadata;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RoutingError {
    #[error("Corrupt routing payload: {0}")]
    CorruptPayload(String),

    #[error("Transfer failed for partition '{partition_name}' [{partition_id}]: {cause}")]
    TransferFailure {
        partition_name: String,
        partition_id: String,
        cause: String,
    },

    #[error(
        "Routing state reconstructed partially: {} partition(s) failed",
        .0.failures.len()
    )]
    PartialReconstruction(Box<PartialReconstruction>),

    #[error("Routing publication failed: {} partition(s) failed", .failures.len())]
    PublicationFailed {
        failures: Vec<RoutingError>,
        /// Files written before the failure was known; left in place for external cleanup.
        orphaned: Vec<UploadedGroupMetadata>,
    },

    #[error("Failed to encode routing: {0}")]
    EncodeFailure(String),

    #[error("Blob '{0}' not found")]
    BlobNotFound(String),

    #[error("Blob '{0}' already exists")]
    BlobAlreadyExists(String),

    #[error("Blob store error: {0}")]
    BlobStoreError(String),

    #[error("Invalid routing group: {0}")]
    InvalidRouting(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Illegal publication transition: {0}")]
    IllegalTransition(String),

    #[error("Lock error: {0}")]
    LockError(String),
}

/// A single partition that could not be fetched or decoded during reconstruction.
#[derive(Debug)]
pub struct PartitionFailure {
    pub partition_name: String,
    pub partition_id: String,
    pub cause: RoutingError,
}

/// Outcome of a reconstruction where at least one partition failed.
///
/// `recovered` holds every partition that did decode, so callers may choose a
/// degraded start instead of a full retry.
#[derive(Debug)]
pub struct PartialReconstruction {
    pub recovered: FullRoutingState,
    pub failures: Vec<PartitionFailure>,
}

impl PartialReconstruction {
    pub fn failed_partitions(&self) -> Vec<&str> {
        self.failures
            .iter()
            .map(|failure| failure.partition_name.as_str())
            .collect()
    }
}

impl RoutingError {
    pub fn transfer(
        partition_name: impl Into<String>,
        partition_id: impl Into<String>,
        cause: impl ToString,
    ) -> Self {
        Self::TransferFailure {
            partition_name: partition_name.into(),
            partition_id: partition_id.into(),
            cause: cause.to_string(),
        }
    }

    /// Name of the partition this error is scoped to, when it is partition-scoped.
    pub fn partition_name(&self) -> Option<&str> {
        match self {
            Self::TransferFailure { partition_name, .. } => Some(partition_name.as_str()),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, RoutingError>;

impl<T> From<std::sync::PoisonError<T>> for RoutingError {
    fn from(err: std::sync::PoisonError<T>) -> Self {
        Self::LockError(err.to_string())
    }
}
