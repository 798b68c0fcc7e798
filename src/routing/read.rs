use super::codec;
use super::naming::{CODEC_MARKER, codec_marker_of};
use crate::core::{
    FullRoutingState, PartialReconstruction, PartitionFailure, Result, RoutingError,
    RoutingGroup, UploadedGroupMetadata,
};
use crate::storage::BlobStore;
use futures::stream::{self, StreamExt};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{Instrument, Level, event, info_span};

/// Rebuilds the routing state at `version` from manifest entries.
///
/// Entries are fetched concurrently, at most `max_concurrent_reads` at a time.
/// Every entry is attempted; if any fails the call returns
/// [`RoutingError::PartialReconstruction`] carrying the partitions that did decode.
pub async fn reconstruct(
    store: Arc<dyn BlobStore>,
    version: u64,
    entries: &[UploadedGroupMetadata],
    max_concurrent_reads: usize,
) -> Result<FullRoutingState> {
    let span = info_span!("routing.reconstruct", version, entries = entries.len());
    let outcomes = fetch_groups(store, entries.to_vec(), max_concurrent_reads)
        .instrument(span.clone())
        .await;
    span.in_scope(|| assemble(FullRoutingState::new(version), outcomes))
}

/// Rebuilds the routing state at `version`, reusing groups of `previous_state`
/// whose manifest entry points at the same file as in `previous_entries`.
pub async fn reconstruct_incremental(
    store: Arc<dyn BlobStore>,
    previous_state: &FullRoutingState,
    previous_entries: &[UploadedGroupMetadata],
    version: u64,
    entries: &[UploadedGroupMetadata],
    max_concurrent_reads: usize,
) -> Result<FullRoutingState> {
    let span = info_span!(
        "routing.reconstruct_incremental",
        version,
        previous_version = previous_state.version()
    );
    let (state, to_fetch) = span.in_scope(|| {
        let previous_files: HashMap<&str, &str> = previous_entries
            .iter()
            .map(|e| (e.partition_name.as_str(), e.uploaded_file_path.as_str()))
            .collect();

        let mut state = FullRoutingState::new(version);
        let mut to_fetch = Vec::new();
        for entry in entries {
            let unchanged = previous_files.get(entry.partition_name.as_str()).copied()
                == Some(entry.uploaded_file_path.as_str());
            match previous_state.get(&entry.partition_name) {
                Some(group) if unchanged && group.uuid() == entry.partition_id => {
                    state.insert(group.clone());
                }
                _ => to_fetch.push(entry.clone()),
            }
        }
        event!(
            Level::DEBUG,
            reused = state.len(),
            fetching = to_fetch.len(),
            "incremental routing read planned"
        );
        (state, to_fetch)
    });

    let outcomes = fetch_groups(store, to_fetch, max_concurrent_reads)
        .instrument(span.clone())
        .await;
    span.in_scope(|| assemble(state, outcomes))
}

async fn fetch_groups(
    store: Arc<dyn BlobStore>,
    entries: Vec<UploadedGroupMetadata>,
    max_concurrent_reads: usize,
) -> Vec<(UploadedGroupMetadata, Result<RoutingGroup>)> {
    stream::iter(entries)
        .map(|entry| {
            let store = store.clone();
            async move {
                let job_entry = entry.clone();
                let job =
                    tokio::task::spawn_blocking(move || fetch_group(store.as_ref(), &job_entry));
                let outcome = match job.await {
                    Ok(outcome) => outcome,
                    Err(join_err) => Err(RoutingError::transfer(
                        entry.partition_name.clone(),
                        entry.partition_id.clone(),
                        format!("read task failed: {}", join_err),
                    )),
                };
                (entry, outcome)
            }
        })
        .buffer_unordered(max_concurrent_reads.max(1))
        .collect()
        .await
}

/// Reads and decodes one entry. Fetch errors become `TransferFailure`; decode errors
/// stay `CorruptPayload`.
pub fn fetch_group(store: &dyn BlobStore, entry: &UploadedGroupMetadata) -> Result<RoutingGroup> {
    let key = entry.uploaded_file_path.as_str();
    match codec_marker_of(key) {
        Some(CODEC_MARKER) => {}
        other => {
            return Err(RoutingError::CorruptPayload(format!(
                "routing file '{}' has unsupported codec marker {:?}",
                key, other
            )));
        }
    }
    let bytes = store.read_blob(key).map_err(|err| {
        RoutingError::transfer(entry.partition_name.clone(), entry.partition_id.clone(), err)
    })?;
    codec::decode_bytes(&bytes, &entry.identity())
}

fn assemble(
    mut state: FullRoutingState,
    outcomes: Vec<(UploadedGroupMetadata, Result<RoutingGroup>)>,
) -> Result<FullRoutingState> {
    let mut failures = Vec::new();
    for (entry, outcome) in outcomes {
        match outcome {
            Ok(group) => state.insert(Arc::new(group)),
            Err(cause) => {
                event!(
                    Level::WARN,
                    partition = %entry.partition_name,
                    file = %entry.uploaded_file_path,
                    error = %cause,
                    "routing file could not be restored"
                );
                failures.push(PartitionFailure {
                    partition_name: entry.partition_name,
                    partition_id: entry.partition_id,
                    cause,
                });
            }
        }
    }

    if failures.is_empty() {
        event!(Level::INFO, partitions = state.len(), "routing state reconstructed");
        return Ok(state);
    }
    failures.sort_by(|a, b| a.partition_name.cmp(&b.partition_name));
    Err(RoutingError::PartialReconstruction(Box::new(
        PartialReconstruction {
            recovered: state,
            failures,
        },
    )))
}
