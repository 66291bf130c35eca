mod common;

use common::*;

use proto::common::{VectorIndexSnapshotMeta, VectorWithId};
use vector::index::IndexStatus;
use vector::meta::{apply_log_id_key, MetaStore};
use vector::wal::{LogEntry, VectorCommand, WalStorage};
use vector::{codec, VectorError};

fn add_entry(index: u64, vectors: Vec<(u64, Vec<f32>)>) -> LogEntry {
    LogEntry {
        index,
        commands: vec![VectorCommand::VectorAdd {
            vectors: vectors
                .into_iter()
                .map(|(id, values)| VectorWithId { id, values })
                .collect(),
        }],
    }
}

fn delete_entry(index: u64, ids: Vec<u64>) -> LogEntry {
    LogEntry {
        index,
        commands: vec![VectorCommand::VectorDelete { ids }],
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn test_boot_load_from_snapshot() {
    let env = test_env();
    let region = make_region(42, 2);
    env.wal_manager.get_or_create(42);
    seed_disk_snapshot(&env, 42, 2, 100, &[(1, vec![1.0, 2.0])]);

    env.manager.init(vec![region]).unwrap();

    let index = env.manager.get_index(42).unwrap();
    assert_eq!(index.apply_log_index(), 100);
    assert_eq!(index.snapshot_log_index(), 100);
    assert_eq!(index.count(), 1);
    assert_eq!(index.status(), IndexStatus::Normal);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_boot_load_replays_wal_tail() {
    let env = test_env();
    let region = make_region(42, 2);
    let wal = env.wal_manager.get_or_create(42);
    seed_disk_snapshot(&env, 42, 2, 100, &[(1, vec![1.0, 2.0])]);
    wal.append(add_entry(101, vec![(2, vec![3.0, 4.0])]));
    wal.append(add_entry(102, vec![(3, vec![5.0, 6.0])]));

    env.manager.init(vec![region]).unwrap();

    let index = env.manager.get_index(42).unwrap();
    assert_eq!(index.apply_log_index(), 102);
    assert_eq!(index.snapshot_log_index(), 100);
    assert_eq!(index.count(), 3);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_boot_build_without_snapshot() {
    let env = test_env();
    let region = make_region(42, 2);
    env.wal_manager.get_or_create(42);
    for id in 1..=10 {
        seed_kv_row(&env, &region, id, &[id as f32, 0.0]);
    }
    env.meta_store
        .put(apply_log_id_key(42), codec::encode_log_id(7));

    env.manager.init(vec![region]).unwrap();

    let index = env.manager.get_index(42).unwrap();
    assert_eq!(index.count(), 10);
    assert_eq!(index.apply_log_index(), 7);
    assert_eq!(index.status(), IndexStatus::Normal);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_build_skips_zero_dimension_rows() {
    let env = test_env();
    let region = make_region(42, 2);
    env.wal_manager.get_or_create(42);
    seed_kv_row(&env, &region, 1, &[1.0, 2.0]);
    seed_kv_row(&env, &region, 2, &[]);

    env.manager.init(vec![region]).unwrap();

    let index = env.manager.get_index(42).unwrap();
    assert_eq!(index.count(), 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_rebuild_replays_wal_tail() {
    let env = test_env();
    let region = make_region(42, 2);
    let wal = env.wal_manager.get_or_create(42);

    // Rows in the primary store as of log 100.
    seed_kv_row(&env, &region, 1, &[1.0, 2.0]);
    env.meta_store
        .put(apply_log_id_key(42), codec::encode_log_id(100));

    // WAL tail: add 1000 at 101, delete it again at 102.
    wal.append(add_entry(101, vec![(1000, vec![3.0, 4.0])]));
    wal.append(delete_entry(102, vec![1000]));

    env.manager.rebuild(&region, false).await.unwrap();

    let index = env.manager.get_index(42).unwrap();
    assert_eq!(index.apply_log_index(), 102);
    assert_eq!(index.count(), 1);
    let results = index.search(&[3.0, 4.0], 10).unwrap();
    assert!(results.iter().all(|(id, _)| *id != 1000));
    assert!(!region.is_switching_vector_index());
    assert_eq!(index.status(), IndexStatus::Normal);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_rebuild_replaces_online_index_and_bumps_version() {
    let env = test_env();
    let region = make_region(42, 2);
    env.wal_manager.get_or_create(42);
    seed_kv_row(&env, &region, 1, &[1.0, 2.0]);

    let online = env.manager.create_index(&region).unwrap();
    assert_eq!(online.version(), 0);
    assert_eq!(online.count(), 0);

    env.manager.rebuild(&region, false).await.unwrap();

    let rebuilt = env.manager.get_index(42).unwrap();
    assert_eq!(rebuilt.version(), 1);
    assert_eq!(rebuilt.count(), 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_rebuild_rejected_while_busy() {
    let env = test_env();
    let region = make_region(42, 2);
    env.wal_manager.get_or_create(42);

    let online = env.manager.create_index(&region).unwrap();
    online.set_status(IndexStatus::Loading);

    let err = env.manager.rebuild(&region, false).await.unwrap_err();
    assert!(matches!(err, VectorError::Internal(_)));
    assert_eq!(online.status(), IndexStatus::Loading);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_rebuild_with_save_admits_snapshot() {
    let env = test_env();
    let region = make_region(42, 2);
    env.wal_manager.get_or_create(42);
    seed_kv_row(&env, &region, 1, &[1.0, 2.0]);
    env.meta_store
        .put(apply_log_id_key(42), codec::encode_log_id(50));

    env.manager.rebuild(&region, true).await.unwrap();

    let last = env.manager.snapshot_manager().registry().get_last(42).unwrap();
    assert_eq!(last.log_id(), 50);
    assert_eq!(env.manager.load_snapshot_log_id(42).unwrap(), 50);
    // The snapshot covers the WAL prefix, so the log may truncate it.
    let wal = env.wal_manager.get_or_create(42);
    assert_eq!(wal.vector_index_truncate_log_index(), 50);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_follower_drops_index_after_rebuild() {
    let env = test_env_with(false, false);
    let region = make_region(42, 2);
    env.wal_manager.get_or_create(42);
    seed_kv_row(&env, &region, 1, &[1.0, 2.0]);
    env.manager.add_region(region.clone());

    vector::spawn_rebuild(env.manager.clone(), region, false)
        .await
        .unwrap();

    assert!(env.manager.get_index(42).is_none());
}

#[tokio::test(flavor = "multi_thread")]
async fn test_leader_keeps_index_after_rebuild() {
    let env = test_env_with(false, true);
    let region = make_region(42, 2);
    env.wal_manager.get_or_create(42);
    seed_kv_row(&env, &region, 1, &[1.0, 2.0]);
    env.manager.add_region(region.clone());

    vector::spawn_rebuild(env.manager.clone(), region, false)
        .await
        .unwrap();

    assert!(env.manager.get_index(42).is_some());
}

#[tokio::test(flavor = "multi_thread")]
async fn test_scrub_saves_lagging_index() {
    let env = test_env();
    let region = make_region(42, 2);
    env.manager.add_region(region.clone());
    env.wal_manager.get_or_create(42);

    let index = env.manager.create_index(&region).unwrap();
    index
        .upsert(vec![VectorWithId {
            id: 1,
            values: vec![1.0, 2.0],
        }])
        .unwrap();
    // Far enough behind the (absent) last snapshot to want a save.
    index.set_apply_log_index(10_000);

    env.manager.scrub().await.unwrap();

    let last = env.manager.snapshot_manager().registry().get_last(42).unwrap();
    assert_eq!(last.log_id(), 10_000);
    assert_eq!(env.manager.load_snapshot_log_id(42).unwrap(), 10_000);
    assert_eq!(index.status(), IndexStatus::Normal);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_scrub_skips_index_not_normal() {
    let env = test_env();
    let region = make_region(42, 2);
    env.manager.add_region(region.clone());
    env.wal_manager.get_or_create(42);

    let index = env.manager.create_index(&region).unwrap();
    index.set_apply_log_index(10_000);
    index.set_status(IndexStatus::Error);

    env.manager.scrub().await.unwrap();

    assert!(env
        .manager
        .snapshot_manager()
        .registry()
        .get_last(42)
        .is_none());
}

#[tokio::test(flavor = "multi_thread")]
async fn test_scrub_skips_fresh_index() {
    let env = test_env();
    let region = make_region(42, 2);
    env.manager.add_region(region.clone());
    env.wal_manager.get_or_create(42);

    let index = env.manager.create_index(&region).unwrap();
    index.set_apply_log_index(10);

    env.manager.scrub().await.unwrap();

    assert!(env
        .manager
        .snapshot_manager()
        .registry()
        .get_last(42)
        .is_none());
}

#[tokio::test(flavor = "multi_thread")]
async fn test_delete_index_clears_metadata() {
    let env = test_env();
    let region = make_region(42, 2);

    let index = env.manager.create_index(&region).unwrap();
    env.manager.update_apply_log_id(&index, 5);
    env.manager.update_snapshot_log_id(&index, 3);
    assert_eq!(env.manager.load_apply_log_id(42).unwrap(), 5);

    env.manager.delete_index(42);

    assert!(env.manager.get_index(42).is_none());
    assert_eq!(index.status(), IndexStatus::Delete);
    assert_eq!(env.manager.load_apply_log_id(42).unwrap(), 0);
    assert_eq!(env.manager.load_snapshot_log_id(42).unwrap(), 0);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_install_declined_when_index_exists() {
    let env = test_env();
    let region = make_region(42, 2);
    env.manager.create_index(&region).unwrap();

    let meta = VectorIndexSnapshotMeta {
        vector_index_id: 42,
        snapshot_log_index: 100,
        filenames: vec![],
    };
    let err = env
        .manager
        .handle_install_snapshot("remote://127.0.0.1:20401/1", &meta)
        .await
        .unwrap_err();
    assert_eq!(err, VectorError::NotNeedSnapshot);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_download_rejects_malformed_uri() {
    let env = test_env();
    let meta = VectorIndexSnapshotMeta {
        vector_index_id: 42,
        snapshot_log_index: 100,
        filenames: vec!["meta".into()],
    };
    let err = env
        .manager
        .snapshot_manager()
        .download("remote://x/9", &meta)
        .await
        .unwrap_err();
    assert!(matches!(err, VectorError::Internal(_)));
}
