use crate::config::RemoteRoutingConfig;
use crate::core::{FullRoutingState, Result, RoutingError, RoutingGroup, UploadedGroupMetadata};
use crate::routing::diff::{
    changed_groups, deleted_partitions, full_snapshot, groups_missing_entries,
};
use crate::routing::manifest::merge_with_deletions;
use crate::routing::naming::{FileNameGenerator, latest_routing_file};
use crate::routing::read::{reconstruct, reconstruct_incremental};
use crate::routing::upload::{INDEX_ROUTING_PATH_TOKEN, RoutingTableUploader};
use crate::storage::{BlobPath, BlobStore};
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{Instrument, Level, event, info_span};

/// Where a single publication currently stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublicationPhase {
    Idle,
    Diffing,
    Uploading { pending: usize },
    Merging,
    Published,
    Failed,
}

impl PublicationPhase {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Published | Self::Failed)
    }
}

impl fmt::Display for PublicationPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Diffing => write!(f, "diffing"),
            Self::Uploading { pending } => write!(f, "uploading({})", pending),
            Self::Merging => write!(f, "merging"),
            Self::Published => write!(f, "published"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// Phase tracker for one publication.
///
/// Moves strictly forward `Idle -> Diffing -> Uploading -> Merging -> Published`;
/// any non-terminal phase may move to `Failed`.
#[derive(Debug, Clone)]
pub struct PublicationCycle {
    version: u64,
    phase: PublicationPhase,
}

impl PublicationCycle {
    pub fn new(version: u64) -> Self {
        Self {
            version,
            phase: PublicationPhase::Idle,
        }
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn phase(&self) -> PublicationPhase {
        self.phase
    }

    pub fn begin_diff(&mut self) -> Result<()> {
        self.advance(PublicationPhase::Diffing)
    }

    pub fn begin_upload(&mut self, pending: usize) -> Result<()> {
        self.advance(PublicationPhase::Uploading { pending })
    }

    pub fn begin_merge(&mut self) -> Result<()> {
        self.advance(PublicationPhase::Merging)
    }

    pub fn complete(&mut self) -> Result<()> {
        self.advance(PublicationPhase::Published)
    }

    pub fn fail(&mut self) -> Result<()> {
        self.advance(PublicationPhase::Failed)
    }

    fn advance(&mut self, next: PublicationPhase) -> Result<()> {
        use PublicationPhase::*;
        let allowed = match (self.phase, next) {
            (Idle, Diffing) => true,
            (Diffing, Uploading { .. }) => true,
            (Uploading { .. }, Merging) => true,
            (Merging, Published) => true,
            (from, Failed) => !from.is_terminal(),
            _ => false,
        };
        if !allowed {
            return Err(RoutingError::IllegalTransition(format!(
                "version {}: {} -> {}",
                self.version, self.phase, next
            )));
        }
        self.phase = next;
        Ok(())
    }
}

/// Result of a successful publication.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishedRouting {
    pub version: u64,
    /// Manifest entries for every partition of the published state, by partition name.
    pub entries: Vec<UploadedGroupMetadata>,
    /// Entries written by this publication.
    pub uploaded: Vec<UploadedGroupMetadata>,
    /// Entries carried forward from the previous manifest.
    pub reused: usize,
    pub deleted: Vec<String>,
}

/// Publishes routing tables to a blob store and reads them back.
pub struct RemoteRoutingTableService {
    config: RemoteRoutingConfig,
    store: Arc<dyn BlobStore>,
    uploader: RoutingTableUploader,
    routing_path: BlobPath,
}

impl RemoteRoutingTableService {
    /// Builds the service, or returns `Ok(None)` when remote routing is disabled.
    pub fn new(config: RemoteRoutingConfig, store: Arc<dyn BlobStore>) -> Result<Option<Self>> {
        Self::with_name_generator(config, store, Arc::new(FileNameGenerator::new()))
    }

    pub fn with_name_generator(
        config: RemoteRoutingConfig,
        store: Arc<dyn BlobStore>,
        names: Arc<FileNameGenerator>,
    ) -> Result<Option<Self>> {
        if !config.is_enabled() {
            event!(Level::DEBUG, "remote routing table persistence disabled");
            return Ok(None);
        }
        config.validate()?;

        let routing_path = config
            .cluster_metadata_base_path()
            .add(INDEX_ROUTING_PATH_TOKEN);
        event!(
            Level::INFO,
            cluster = %config.cluster_name,
            path = %routing_path,
            "remote routing table service started"
        );
        Ok(Some(Self {
            uploader: RoutingTableUploader::with_name_generator(store.clone(), names),
            config,
            store,
            routing_path,
        }))
    }

    pub fn config(&self) -> &RemoteRoutingConfig {
        &self.config
    }

    /// `<cluster metadata path>/index-routing`
    pub fn routing_path(&self) -> &BlobPath {
        &self.routing_path
    }

    /// Publishes `current` with the configured timeout.
    pub async fn publish(
        &self,
        previous: Option<&FullRoutingState>,
        current: &FullRoutingState,
        previous_entries: &[UploadedGroupMetadata],
    ) -> Result<PublishedRouting> {
        self.publish_with_timeout(
            previous,
            current,
            previous_entries,
            self.config.publication_timeout_duration(),
        )
        .await
    }

    /// Uploads the partitions of `current` that need a new file and merges the
    /// results into the previous manifest entries.
    ///
    /// Without a previous state or previous entries every partition is uploaded.
    /// If any upload fails the publication fails as a whole; files that were
    /// already written are returned as `orphaned` and left in the store.
    pub async fn publish_with_timeout(
        &self,
        previous: Option<&FullRoutingState>,
        current: &FullRoutingState,
        previous_entries: &[UploadedGroupMetadata],
        timeout: Duration,
    ) -> Result<PublishedRouting> {
        let span = info_span!(
            "routing.publish",
            version = current.version(),
            partitions = current.len()
        );
        let mut cycle = PublicationCycle::new(current.version());

        let (to_upload, deleted) = span.in_scope(|| -> Result<_> {
            cycle.begin_diff()?;
            let to_upload = plan_uploads(previous, current, previous_entries);
            let deleted = deleted_partitions(previous_entries, current);
            event!(
                Level::DEBUG,
                full = previous.is_none() || previous_entries.is_empty(),
                changed = to_upload.len(),
                deleted = deleted.len(),
                "routing diff computed"
            );
            cycle.begin_upload(to_upload.len())?;
            Ok((to_upload, deleted))
        })?;

        let batch = self
            .uploader
            .upload_all(to_upload, &self.routing_path, timeout)
            .instrument(span.clone())
            .await;

        span.in_scope(|| {
            if !batch.is_success() {
                cycle.fail()?;
                for err in &batch.failures {
                    event!(Level::WARN, error = %err, "routing upload failed");
                }
                event!(
                    Level::ERROR,
                    failed = batch.failures.len(),
                    orphaned = batch.uploaded.len(),
                    "routing publication failed"
                );
                return Err(RoutingError::PublicationFailed {
                    failures: batch.failures,
                    orphaned: batch.uploaded,
                });
            }

            cycle.begin_merge()?;
            let entries = merge_with_deletions(previous_entries, &batch.uploaded, &deleted);
            cycle.complete()?;

            let reused = entries.len().saturating_sub(batch.uploaded.len());
            event!(
                Level::INFO,
                uploaded = batch.uploaded.len(),
                reused,
                deleted = deleted.len(),
                "routing publication complete"
            );
            Ok(PublishedRouting {
                version: current.version(),
                entries,
                uploaded: batch.uploaded,
                reused,
                deleted,
            })
        })
    }

    /// Rebuilds the state at `version` from manifest entries.
    pub async fn read_routing_state(
        &self,
        version: u64,
        entries: &[UploadedGroupMetadata],
    ) -> Result<FullRoutingState> {
        reconstruct(
            self.store.clone(),
            version,
            entries,
            self.config.max_concurrent_reads,
        )
        .await
    }

    /// Rebuilds the state at `version`, reusing unchanged groups of `previous_state`.
    pub async fn read_incremental(
        &self,
        previous_state: &FullRoutingState,
        previous_entries: &[UploadedGroupMetadata],
        version: u64,
        entries: &[UploadedGroupMetadata],
    ) -> Result<FullRoutingState> {
        reconstruct_incremental(
            self.store.clone(),
            previous_state,
            previous_entries,
            version,
            entries,
            self.config.max_concurrent_reads,
        )
        .await
    }

    /// Most recently written routing file of one partition, if any.
    pub fn latest_routing_file(&self, partition_id: &str) -> Result<Option<String>> {
        latest_routing_file(self.store.as_ref(), &self.routing_path.add(partition_id))
    }
}

fn plan_uploads(
    previous: Option<&FullRoutingState>,
    current: &FullRoutingState,
    previous_entries: &[UploadedGroupMetadata],
) -> Vec<Arc<RoutingGroup>> {
    let previous = match previous {
        Some(previous) if !previous_entries.is_empty() => previous,
        _ => return full_snapshot(current),
    };

    let mut groups = changed_groups(previous, current);
    let mut seen: HashSet<String> = groups.iter().map(|g| g.name().to_string()).collect();
    for group in groups_missing_entries(previous_entries, current) {
        if seen.insert(group.name().to_string()) {
            groups.push(group);
        }
    }
    groups
}
