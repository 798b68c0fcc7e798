// ============================================================================
// Remote Routing Table Persistence
// ============================================================================

//! Persists per-partition routing tables to a blob store and rebuilds the full
//! routing state from a manifest of uploaded files.
//!
//! ```
//! use remote_routing::{
//!     FullRoutingState, InMemoryBlobStore, PartitionIdentity, RemoteRoutingConfig,
//!     RemoteRoutingTableService, RoutingGroup, ShardRole, ShardRouting,
//! };
//! use std::sync::Arc;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = RemoteRoutingConfig::new("prod", "cluster-uuid");
//! let service = RemoteRoutingTableService::new(config, Arc::new(InMemoryBlobStore::new()))?
//!     .ok_or("remote routing disabled")?;
//!
//! let orders = RoutingGroup::new(
//!     PartitionIdentity::new("orders", "orders-uuid"),
//!     vec![ShardRouting::started(0, ShardRole::Primary, "node-1")],
//! )?;
//! let state = FullRoutingState::from_groups(1, vec![Arc::new(orders)]);
//!
//! let runtime = tokio::runtime::Runtime::new()?;
//! let published = runtime.block_on(service.publish(None, &state, &[]))?;
//! let restored = runtime.block_on(service.read_routing_state(1, &published.entries))?;
//! assert_eq!(restored, state);
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod core;
pub mod routing;
pub mod service;
pub mod storage;

// Re-export main types for convenience
pub use config::RemoteRoutingConfig;
pub use core::{
    FullRoutingState, PartialReconstruction, PartitionFailure, PartitionIdentity, Result,
    RoutingError, RoutingGroup, ShardRole, ShardRouting, ShardRoutingState,
    UploadedGroupMetadata,
};
pub use service::{PublicationCycle, PublicationPhase, PublishedRouting, RemoteRoutingTableService};
pub use storage::{
    AsyncBlobWriter, BlobPath, BlobStore, FsBlobStore, InMemoryBlobStore, WritePriority,
};
