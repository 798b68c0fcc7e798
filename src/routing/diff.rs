use crate::core::{FullRoutingState, RoutingGroup, UploadedGroupMetadata};
use std::collections::HashSet;
use std::sync::Arc;

/// Groups of `current` that are new or differ from `previous`.
///
/// Partitions only present in `previous` are not reported; see [`deleted_partitions`].
/// Order follows iteration order of `current`.
pub fn changed_groups(
    previous: &FullRoutingState,
    current: &FullRoutingState,
) -> Vec<Arc<RoutingGroup>> {
    current
        .groups()
        .filter(|group| match previous.get(group.name()) {
            Some(before) => !(Arc::ptr_eq(before, group) || before.as_ref() == group.as_ref()),
            None => true,
        })
        .cloned()
        .collect()
}

/// Every group of `current`, for the first publication of a cluster.
pub fn full_snapshot(current: &FullRoutingState) -> Vec<Arc<RoutingGroup>> {
    current.groups().cloned().collect()
}

/// Partitions referenced by `previous_entries` that no longer exist in `current`.
pub fn deleted_partitions(
    previous_entries: &[UploadedGroupMetadata],
    current: &FullRoutingState,
) -> Vec<String> {
    let mut seen = HashSet::new();
    previous_entries
        .iter()
        .filter(|entry| !current.contains(&entry.partition_name))
        .filter(|entry| seen.insert(entry.partition_name.clone()))
        .map(|entry| entry.partition_name.clone())
        .collect()
}

/// Groups of `current` with no entry in `previous_entries`.
pub(crate) fn groups_missing_entries(
    previous_entries: &[UploadedGroupMetadata],
    current: &FullRoutingState,
) -> Vec<Arc<RoutingGroup>> {
    let covered: HashSet<&str> = previous_entries
        .iter()
        .map(|entry| entry.partition_name.as_str())
        .collect();
    current
        .groups()
        .filter(|group| !covered.contains(group.name()))
        .cloned()
        .collect()
}
