use crate::core::{FullRoutingState, Result, RoutingError, UploadedGroupMetadata};
use std::collections::{BTreeMap, HashMap};

/// Combines the previous manifest's entries with freshly uploaded ones.
///
/// Keyed by partition name; entries in `new_entries` overwrite earlier ones, and a
/// later duplicate inside `new_entries` wins. Output is ordered by partition name.
pub fn merge(
    previous_entries: &[UploadedGroupMetadata],
    new_entries: &[UploadedGroupMetadata],
) -> Vec<UploadedGroupMetadata> {
    merged_map(previous_entries, new_entries).into_values().collect()
}

/// [`merge`], then drops the partitions named in `deleted`.
pub fn merge_with_deletions(
    previous_entries: &[UploadedGroupMetadata],
    new_entries: &[UploadedGroupMetadata],
    deleted: &[String],
) -> Vec<UploadedGroupMetadata> {
    let mut merged = merged_map(previous_entries, new_entries);
    for name in deleted {
        merged.remove(name);
    }
    merged.into_values().collect()
}

/// One entry per partition of `current`: unchanged partitions keep their previous
/// entry, changed ones take the uploaded entry.
///
/// Fails if a partition of `current` is covered by neither list.
pub fn incremental_entries(
    current: &FullRoutingState,
    previous_entries: &[UploadedGroupMetadata],
    uploaded: &[UploadedGroupMetadata],
) -> Result<Vec<UploadedGroupMetadata>> {
    let previous: HashMap<&str, &UploadedGroupMetadata> = previous_entries
        .iter()
        .map(|entry| (entry.partition_name.as_str(), entry))
        .collect();
    let fresh: HashMap<&str, &UploadedGroupMetadata> = uploaded
        .iter()
        .map(|entry| (entry.partition_name.as_str(), entry))
        .collect();

    let mut entries = Vec::with_capacity(current.len());
    for name in current.partition_names() {
        let entry = fresh
            .get(name)
            .or_else(|| previous.get(name))
            .ok_or_else(|| {
                RoutingError::InvalidRouting(format!(
                    "Partition '{}' has neither an uploaded nor a previous routing file",
                    name
                ))
            })?;
        entries.push((*entry).clone());
    }
    Ok(entries)
}

/// Serializes entries for embedding in a manifest document.
pub fn entries_to_json(entries: &[UploadedGroupMetadata]) -> Result<String> {
    serde_json::to_string(entries).map_err(|e| {
        RoutingError::EncodeFailure(format!("serializing manifest entries: {}", e))
    })
}

pub fn entries_from_json(json: &str) -> Result<Vec<UploadedGroupMetadata>> {
    serde_json::from_str(json).map_err(|e| {
        RoutingError::CorruptPayload(format!("Failed to parse manifest entries: {}", e))
    })
}

fn merged_map(
    previous_entries: &[UploadedGroupMetadata],
    new_entries: &[UploadedGroupMetadata],
) -> BTreeMap<String, UploadedGroupMetadata> {
    let mut merged = BTreeMap::new();
    for entry in previous_entries.iter().chain(new_entries) {
        merged.insert(entry.partition_name.clone(), entry.clone());
    }
    merged
}
