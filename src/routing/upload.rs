use super::codec;
use super::naming::FileNameGenerator;
use crate::core::{PartitionIdentity, Result, RoutingError, RoutingGroup, UploadedGroupMetadata};
use crate::storage::{BlobPath, BlobStore, WritePriority, WriteRequest, payload_checksum};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::time::{Duration, Instant, timeout_at};
use tracing::{Level, event, info_span};

/// Path token under the cluster metadata path that holds per-partition routing files.
pub const INDEX_ROUTING_PATH_TOKEN: &str = "index-routing";

/// Receives the outcome of a single upload, exactly once.
pub type UploadListener = Box<dyn FnOnce(Result<UploadedGroupMetadata>) + Send + 'static>;

/// Uploads one partition's routing table per call.
///
/// Picks the store's prioritized asynchronous writer when it has one and falls back
/// to a blocking write otherwise. Each call makes a single attempt.
#[derive(Clone)]
pub struct RoutingTableUploader {
    store: Arc<dyn BlobStore>,
    names: Arc<FileNameGenerator>,
}

impl RoutingTableUploader {
    pub fn new(store: Arc<dyn BlobStore>) -> Self {
        Self::with_name_generator(store, Arc::new(FileNameGenerator::new()))
    }

    pub fn with_name_generator(store: Arc<dyn BlobStore>, names: Arc<FileNameGenerator>) -> Self {
        Self { store, names }
    }

    /// Encodes `group` and writes it to `destination/<partition uuid>/<file name>`.
    ///
    /// `listener` is invoked inline for blocking stores and from the store's
    /// completion path for asynchronous ones.
    pub fn upload(&self, group: &RoutingGroup, destination: &BlobPath, listener: UploadListener) {
        let identity = group.identity().clone();
        let span = info_span!(
            "routing.upload",
            partition = %identity.name,
            partition_id = %identity.uuid
        );
        let _enter = span.enter();

        let bytes = match codec::encode(group) {
            Ok(bytes) => bytes,
            Err(err) => {
                event!(Level::ERROR, error = %err, "routing table encode failed");
                listener(Err(transfer_failure(&identity, err)));
                return;
            }
        };

        let key = destination
            .add(identity.uuid.as_str())
            .blob_key(&self.names.next_file_name());
        let metadata =
            UploadedGroupMetadata::new(identity.name.clone(), identity.uuid.clone(), key.clone());

        match self.store.async_writer() {
            None => {
                event!(Level::DEBUG, key = %key, bytes = bytes.len(), "blocking routing upload");
                let result = self
                    .store
                    .write_blob(&key, &bytes, true)
                    .map(|()| metadata)
                    .map_err(|err| {
                        event!(Level::WARN, error = %err, "routing upload failed");
                        transfer_failure(&identity, err)
                    });
                listener(result);
            }
            Some(writer) => {
                event!(
                    Level::DEBUG,
                    key = %key,
                    bytes = bytes.len(),
                    "async routing upload submitted"
                );
                let request = WriteRequest {
                    key,
                    checksum: Some(payload_checksum(&bytes)),
                    data: bytes,
                    fail_if_exists: true,
                    priority: WritePriority::Urgent,
                };
                writer.async_write_blob(
                    request,
                    Box::new(move |result| {
                        listener(
                            result
                                .map(|()| metadata)
                                .map_err(|err| transfer_failure(&identity, err)),
                        )
                    }),
                );
            }
        }
    }

    /// Uploads every group concurrently and gathers one outcome per group.
    ///
    /// A group whose completion has not arrived by `wait` is reported as failed;
    /// its transfer is not cancelled.
    pub async fn upload_all(
        &self,
        groups: Vec<Arc<RoutingGroup>>,
        destination: &BlobPath,
        wait: Duration,
    ) -> UploadBatch {
        let tracker =
            CompletionTracker::new(groups.iter().map(|g| g.identity().clone()).collect());
        for (index, group) in groups.into_iter().enumerate() {
            let listener = tracker.listener(index);
            let uploader = self.clone();
            let destination = destination.clone();
            tokio::task::spawn_blocking(move || uploader.upload(&group, &destination, listener));
        }
        tracker.wait(wait).await
    }
}

/// Outcomes of a batch of uploads, in submission order.
#[derive(Debug, Default)]
pub struct UploadBatch {
    pub uploaded: Vec<UploadedGroupMetadata>,
    pub failures: Vec<RoutingError>,
}

impl UploadBatch {
    pub fn is_success(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Fan-in for upload completions.
///
/// Hands out one listener per upload and counts each upload once. Waiting ends when
/// every upload has reported, every listener has been dropped, or the deadline passes.
pub struct CompletionTracker {
    identities: Vec<PartitionIdentity>,
    sender: mpsc::UnboundedSender<(usize, Result<UploadedGroupMetadata>)>,
    receiver: mpsc::UnboundedReceiver<(usize, Result<UploadedGroupMetadata>)>,
}

impl CompletionTracker {
    pub fn new(identities: Vec<PartitionIdentity>) -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        Self {
            identities,
            sender,
            receiver,
        }
    }

    pub fn pending(&self) -> usize {
        self.identities.len()
    }

    pub fn listener(&self, index: usize) -> UploadListener {
        let sender = self.sender.clone();
        Box::new(move |result| {
            // The tracker may already have given up waiting.
            let _ = sender.send((index, result));
        })
    }

    pub async fn wait(self, wait: Duration) -> UploadBatch {
        let CompletionTracker {
            identities,
            sender,
            mut receiver,
        } = self;
        drop(sender);

        // `None` when `wait` is too large to express as an instant: no deadline.
        let deadline = Instant::now().checked_add(wait);
        let mut slots: Vec<Option<Result<UploadedGroupMetadata>>> =
            identities.iter().map(|_| None).collect();
        let mut pending = identities.len();
        let mut timed_out = false;

        while pending > 0 {
            let received = match deadline {
                Some(deadline) => timeout_at(deadline, receiver.recv()).await,
                None => Ok(receiver.recv().await),
            };
            match received {
                Ok(Some((index, result))) => {
                    if let Some(slot) = slots.get_mut(index) {
                        if slot.is_none() {
                            *slot = Some(result);
                            pending -= 1;
                        }
                    }
                }
                Ok(None) => break,
                Err(_) => {
                    timed_out = true;
                    break;
                }
            }
        }

        let mut batch = UploadBatch::default();
        for (identity, slot) in identities.into_iter().zip(slots) {
            match slot {
                Some(Ok(metadata)) => batch.uploaded.push(metadata),
                Some(Err(err)) => batch.failures.push(err),
                None if timed_out => batch.failures.push(RoutingError::transfer(
                    identity.name,
                    identity.uuid,
                    format!("upload did not complete within {:?}", wait),
                )),
                None => batch.failures.push(RoutingError::transfer(
                    identity.name,
                    identity.uuid,
                    "upload completion was dropped without a result",
                )),
            }
        }
        batch
    }
}

fn transfer_failure(identity: &PartitionIdentity, cause: RoutingError) -> RoutingError {
    match cause {
        RoutingError::TransferFailure { .. } => cause,
        other => RoutingError::transfer(identity.name.clone(), identity.uuid.clone(), other),
    }
}
