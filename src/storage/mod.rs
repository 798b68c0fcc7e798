pub mod blob;
pub mod fs;
pub mod memory;

pub use blob::{
    AsyncBlobWriter, BlobPath, BlobStore, PATH_DELIMITER, WriteCompletion, WritePriority,
    WriteRequest, payload_checksum,
};
pub use fs::FsBlobStore;
pub use memory::InMemoryBlobStore;
