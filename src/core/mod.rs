pub mod error;
pub mod types;

pub use error::{PartialReconstruction, PartitionFailure, Result, RoutingError};
pub use types::{
    FullRoutingState, PartitionIdentity, RoutingGroup, ShardRole, ShardRouting,
    ShardRoutingState, UploadedGroupMetadata,
};
