//! Integration tests for routing table publication and reconstruction

use remote_routing::routing::{changed_groups, merge, naming};
use remote_routing::{
    BlobStore, FsBlobStore, FullRoutingState, InMemoryBlobStore, PartitionIdentity,
    RemoteRoutingConfig, RemoteRoutingTableService, RoutingError, RoutingGroup, ShardRole,
    ShardRouting, UploadedGroupMetadata, WritePriority,
};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

fn config() -> RemoteRoutingConfig {
    RemoteRoutingConfig::new("it-cluster", "it-uuid").base_path("remote")
}

fn service_over(store: Arc<dyn BlobStore>) -> RemoteRoutingTableService {
    RemoteRoutingTableService::new(config(), store)
        .unwrap()
        .expect("remote routing enabled")
}

fn group(name: &str, shards: u32) -> Arc<RoutingGroup> {
    let mut routing = Vec::new();
    for shard in 0..shards {
        routing.push(ShardRouting::started(shard, ShardRole::Primary, "node-1"));
        routing.push(ShardRouting::initializing(shard, ShardRole::Replica, "node-2"));
    }
    Arc::new(
        RoutingGroup::new(PartitionIdentity::new(name, format!("{}-uuid", name)), routing).unwrap(),
    )
}

#[tokio::test]
async fn test_new_partition_is_the_only_upload() {
    let temp_dir = TempDir::new().unwrap();
    let store = Arc::new(FsBlobStore::new(temp_dir.path()).unwrap());
    let service = service_over(store.clone());

    let previous = FullRoutingState::from_groups(1, vec![group("idx1", 1)]);
    let first = service.publish(None, &previous, &[]).await.unwrap();
    let f1 = first.entries[0].clone();
    assert_eq!(f1.partition_name, "idx1");

    let current = previous.with_group(2, group("idx2", 3));
    let diff = changed_groups(&previous, &current);
    assert_eq!(diff.len(), 1);
    assert_eq!(diff[0].name(), "idx2");

    let published = service
        .publish(Some(&previous), &current, &[f1.clone()])
        .await
        .unwrap();
    assert_eq!(published.uploaded.len(), 1);
    let f2 = published.uploaded[0].clone();
    assert_eq!(f2.partition_name, "idx2");
    assert_eq!(f2.partition_id, "idx2-uuid");
    assert_eq!(published.entries, vec![f1, f2.clone()]);
    assert_eq!(published.reused, 1);

    // Routing files land on disk under the documented layout.
    assert!(
        f2.uploaded_file_path
            .starts_with("remote/it-cluster/cluster-state/it-uuid/index-routing/idx2-uuid/")
    );
    assert!(f2.uploaded_file_path.ends_with("__CODEC1"));
    assert!(temp_dir.path().join(&f2.uploaded_file_path).is_file());

    let restored = service
        .read_routing_state(2, &published.entries)
        .await
        .unwrap();
    assert_eq!(restored, current);
    assert_eq!(restored.get("idx2").unwrap().shard_count(), 6);
}

#[tokio::test]
async fn test_deleted_partition_leaves_manifest() {
    let store = Arc::new(InMemoryBlobStore::new());
    let service = service_over(store.clone());

    let v1 = FullRoutingState::from_groups(1, vec![group("a", 1), group("b", 1)]);
    let first = service.publish(None, &v1, &[]).await.unwrap();

    let v2 = v1.without_group(2, "b");
    let second = service.publish(Some(&v1), &v2, &first.entries).await.unwrap();
    assert!(second.uploaded.is_empty());
    assert_eq!(second.deleted, vec!["b".to_string()]);
    let names: Vec<&str> = second
        .entries
        .iter()
        .map(|e| e.partition_name.as_str())
        .collect();
    assert_eq!(names, vec!["a"]);

    // The file itself is not removed.
    assert_eq!(store.len().unwrap(), 2);
}

#[tokio::test]
async fn test_async_store_publication() {
    let store = InMemoryBlobStore::with_async_writes();
    let service = service_over(Arc::new(store.clone()));
    let state = FullRoutingState::from_groups(5, vec![group("x", 2), group("y", 2), group("z", 0)]);

    let published = service.publish(None, &state, &[]).await.unwrap();
    assert_eq!(published.entries.len(), 3);
    assert_eq!(store.sync_write_count(), 0);
    let log = store.async_write_log().unwrap();
    assert_eq!(log.len(), 3);
    assert!(log.iter().all(|(_, priority)| *priority == WritePriority::Urgent));

    let restored = service.read_routing_state(5, &published.entries).await.unwrap();
    assert_eq!(restored, state);
}

#[tokio::test]
async fn test_publication_fails_as_a_whole() {
    let store = InMemoryBlobStore::with_async_writes();
    store
        .fail_prefix("remote/it-cluster/cluster-state/it-uuid/index-routing/b-uuid")
        .unwrap();
    let service = service_over(Arc::new(store.clone()));
    let state = FullRoutingState::from_groups(1, vec![group("a", 1), group("b", 1), group("c", 1)]);

    match service.publish(None, &state, &[]).await {
        Err(RoutingError::PublicationFailed { failures, orphaned }) => {
            assert_eq!(failures.len(), 1);
            assert_eq!(failures[0].partition_name(), Some("b"));
            let mut orphaned: Vec<String> =
                orphaned.into_iter().map(|e| e.partition_name).collect();
            orphaned.sort();
            assert_eq!(orphaned, vec!["a", "c"]);
        }
        other => panic!("expected publication failure, got {:?}", other.map(|p| p.version)),
    }
}

#[tokio::test]
async fn test_stalled_uploads_respect_timeout() {
    let store = InMemoryBlobStore::with_async_writes();
    store.drop_completions(true);
    let service = service_over(Arc::new(store));
    let state = FullRoutingState::from_groups(1, vec![group("a", 1)]);

    let result = service
        .publish_with_timeout(None, &state, &[], Duration::from_millis(200))
        .await;
    assert!(matches!(
        result,
        Err(RoutingError::PublicationFailed { ref failures, .. }) if failures.len() == 1
    ));
}

#[tokio::test]
async fn test_partial_reconstruction_keeps_healthy_partitions() {
    let temp_dir = TempDir::new().unwrap();
    let store = Arc::new(FsBlobStore::new(temp_dir.path()).unwrap());
    let service = service_over(store.clone());
    let state = FullRoutingState::from_groups(3, vec![group("A", 1), group("B", 2), group("C", 1)]);
    let published = service.publish(None, &state, &[]).await.unwrap();

    let b = published
        .entries
        .iter()
        .find(|e| e.partition_name == "B")
        .unwrap();
    std::fs::write(temp_dir.path().join(&b.uploaded_file_path), b"garbage").unwrap();

    let err = service
        .read_routing_state(3, &published.entries)
        .await
        .unwrap_err();
    let RoutingError::PartialReconstruction(partial) = err else {
        panic!("expected partial reconstruction");
    };
    assert_eq!(partial.failed_partitions(), vec!["B"]);
    assert_eq!(partial.recovered.partition_names().collect::<Vec<_>>(), vec!["A", "C"]);
    assert_eq!(partial.recovered.get("A"), state.get("A"));
}

#[tokio::test]
async fn test_incremental_read_after_republish() {
    let store = Arc::new(InMemoryBlobStore::new());
    let service = service_over(store.clone());

    let v1 = FullRoutingState::from_groups(1, vec![group("a", 1), group("b", 1)]);
    let first = service.publish(None, &v1, &[]).await.unwrap();
    let restored_v1 = service.read_routing_state(1, &first.entries).await.unwrap();

    let v2 = v1.with_group(2, group("b", 4));
    let second = service.publish(Some(&v1), &v2, &first.entries).await.unwrap();
    assert_eq!(second.uploaded.len(), 1);

    let restored_v2 = service
        .read_incremental(&restored_v1, &first.entries, 2, &second.entries)
        .await
        .unwrap();
    assert_eq!(restored_v2, v2);
    assert!(Arc::ptr_eq(
        restored_v2.get("a").unwrap(),
        restored_v1.get("a").unwrap()
    ));
}

#[tokio::test]
async fn test_republished_partition_gets_newer_file() {
    let store = Arc::new(InMemoryBlobStore::new());
    let service = service_over(store.clone());

    let v1 = FullRoutingState::from_groups(1, vec![group("a", 1)]);
    let first = service.publish(None, &v1, &[]).await.unwrap();
    let v2 = v1.with_group(2, group("a", 2));
    let second = service.publish(Some(&v1), &v2, &first.entries).await.unwrap();

    let older = &first.entries[0].uploaded_file_path;
    let newer = &second.entries[0].uploaded_file_path;
    assert_ne!(older, newer);
    assert!(newer < older, "newer files sort first");
    assert!(naming::timestamp_of(newer) > naming::timestamp_of(older));
    assert_eq!(
        service.latest_routing_file("a-uuid").unwrap().as_deref(),
        Some(newer.as_str())
    );
}

#[test]
fn test_disabled_by_default() {
    let store: Arc<dyn BlobStore> = Arc::new(InMemoryBlobStore::new());
    let config = RemoteRoutingConfig::default()
        .with_settings([("cluster.remote_store.routing.enabled", "false")])
        .unwrap();
    assert!(RemoteRoutingTableService::new(config, store).unwrap().is_none());
}

#[test]
fn test_merge_keeps_carried_entries() {
    let f1 = UploadedGroupMetadata::new("idx1", "idx1-uuid", "p/idx1/f1");
    let f2 = UploadedGroupMetadata::new("idx2", "idx2-uuid", "p/idx2/f2");
    assert_eq!(merge(&[f1.clone()], &[f2.clone()]), vec![f1, f2]);
}
