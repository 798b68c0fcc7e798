//! Routing table persistence: encoding, naming, diffing, upload, merge and read-back.

pub mod codec;
pub mod diff;
pub mod manifest;
pub mod naming;
pub mod read;
pub mod upload;

pub use diff::{changed_groups, deleted_partitions, full_snapshot};
pub use manifest::{incremental_entries, merge, merge_with_deletions};
pub use naming::{CODEC_MARKER, DELIMITER, FileNameGenerator};
pub use read::{reconstruct, reconstruct_incremental};
pub use upload::{
    CompletionTracker, INDEX_ROUTING_PATH_TOKEN, RoutingTableUploader, UploadBatch,
    UploadListener,
};
