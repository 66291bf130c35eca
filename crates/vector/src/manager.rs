//! Vector index lifecycle: materialization, rebuild and scrub
//!
//! At boot each region's index is materialized from the newest snapshot
//! plus a WAL tail replay, falling back to a full build from the primary
//! store. A live rebuild runs two replay rounds: the first absorbs the
//! backlog, then the region's switching flag defers new writes upstream
//! while the short catch-up round drains the tail.

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use tokio::task;
use tokio::time::MissedTickBehavior;
use tracing::{error, info, warn};

use crate::codec;
use crate::config::VectorConfig;
use crate::error::{VectorError, VectorResult};
use crate::index::{new_index, IndexStatus, VectorIndex};
use crate::kv::KvReader;
use crate::meta::{apply_log_id_key, snapshot_log_id_key, MetaStore};
use crate::raft::RaftEngine;
use crate::region::Region;
use crate::snapshot::SnapshotManager;
use crate::wal::{VectorCommand, WalManager};
use proto::common::{VectorIndexSnapshotMeta, VectorWithId};

pub struct VectorIndexManager {
    config: VectorConfig,
    indexes: RwLock<HashMap<u64, Arc<dyn VectorIndex>>>,
    regions: RwLock<HashMap<u64, Arc<Region>>>,
    snapshots: Arc<SnapshotManager>,
    meta_store: Arc<dyn MetaStore>,
    kv: Arc<dyn KvReader>,
    wal_manager: Arc<dyn WalManager>,
    raft: Arc<dyn RaftEngine>,
}

/// Clears the region's switching flag on every exit path.
struct SwitchingGuard {
    region: Arc<Region>,
}

impl Drop for SwitchingGuard {
    fn drop(&mut self) {
        self.region.set_switching_vector_index(false);
    }
}

impl VectorIndexManager {
    pub fn new(
        config: VectorConfig,
        snapshots: Arc<SnapshotManager>,
        meta_store: Arc<dyn MetaStore>,
        kv: Arc<dyn KvReader>,
        wal_manager: Arc<dyn WalManager>,
        raft: Arc<dyn RaftEngine>,
    ) -> Self {
        Self {
            config,
            indexes: RwLock::new(HashMap::new()),
            regions: RwLock::new(HashMap::new()),
            snapshots,
            meta_store,
            kv,
            wal_manager,
            raft,
        }
    }

    pub fn snapshot_manager(&self) -> &Arc<SnapshotManager> {
        &self.snapshots
    }

    pub fn config(&self) -> &VectorConfig {
        &self.config
    }

    // ------------------------------------------------------------------
    // Live index map
    // ------------------------------------------------------------------

    pub fn get_index(&self, index_id: u64) -> Option<Arc<dyn VectorIndex>> {
        self.indexes.read().get(&index_id).cloned()
    }

    /// Put an index into the live map unconditionally.
    pub fn publish_index(&self, vector_index: Arc<dyn VectorIndex>) {
        self.indexes.write().insert(vector_index.id(), vector_index);
    }

    /// Replace the live entry; fails when the prior entry vanished.
    fn replace_index(&self, vector_index: Arc<dyn VectorIndex>) -> bool {
        let mut guard = self.indexes.write();
        match guard.entry(vector_index.id()) {
            Entry::Occupied(mut entry) => {
                entry.insert(vector_index);
                true
            }
            Entry::Vacant(_) => false,
        }
    }

    pub fn delete_index(&self, index_id: u64) {
        info!("Delete region's vector index {}", index_id);
        let removed = self.indexes.write().remove(&index_id);
        if let Some(vector_index) = removed {
            vector_index.set_status(IndexStatus::Delete);
            self.meta_store.delete(&apply_log_id_key(index_id));
            self.meta_store.delete(&snapshot_log_id_key(index_id));
        }
    }

    /// Fresh empty index for a newly created region.
    pub fn create_index(&self, region: &Region) -> VectorResult<Arc<dyn VectorIndex>> {
        let vector_index = new_index(region.id(), region.index_parameter())?;
        vector_index.set_status(IndexStatus::Normal);
        self.publish_index(vector_index.clone());
        info!("Add region {} vector index success", region.id());
        Ok(vector_index)
    }

    // ------------------------------------------------------------------
    // Regions
    // ------------------------------------------------------------------

    pub fn add_region(&self, region: Arc<Region>) {
        self.regions.write().insert(region.id(), region);
    }

    pub fn region(&self, index_id: u64) -> Option<Arc<Region>> {
        self.regions.read().get(&index_id).cloned()
    }

    pub fn regions(&self) -> Vec<Arc<Region>> {
        self.regions.read().values().cloned().collect()
    }

    // ------------------------------------------------------------------
    // Log id metadata
    // ------------------------------------------------------------------

    pub fn load_apply_log_id(&self, index_id: u64) -> VectorResult<u64> {
        match self.meta_store.get(&apply_log_id_key(index_id)) {
            Some(value) => codec::decode_log_id(&value),
            None => Ok(0),
        }
    }

    pub fn load_snapshot_log_id(&self, index_id: u64) -> VectorResult<u64> {
        match self.meta_store.get(&snapshot_log_id_key(index_id)) {
            Some(value) => codec::decode_log_id(&value),
            None => Ok(0),
        }
    }

    pub fn update_apply_log_id(&self, vector_index: &Arc<dyn VectorIndex>, log_index: u64) {
        vector_index.set_apply_log_index(log_index);
        self.meta_store.put(
            apply_log_id_key(vector_index.id()),
            codec::encode_log_id(log_index),
        );
    }

    pub fn update_snapshot_log_id(&self, vector_index: &Arc<dyn VectorIndex>, log_index: u64) {
        vector_index.set_snapshot_log_index(log_index);
        self.meta_store.put(
            snapshot_log_id_key(vector_index.id()),
            codec::encode_log_id(log_index),
        );
    }

    // ------------------------------------------------------------------
    // Boot-time materialization
    // ------------------------------------------------------------------

    /// Admit on-disk snapshots and materialize every region's index.
    pub fn init(&self, regions: Vec<Arc<Region>>) -> VectorResult<()> {
        for region in &regions {
            self.add_region(region.clone());
        }
        let region_ids: Vec<u64> = regions.iter().map(|region| region.id()).collect();
        self.snapshots.init(&region_ids)?;

        self.parallel_load_or_build(
            &regions,
            self.config.load_or_build_vector_index_concurrency,
        )
    }

    /// Run `load_or_build` for every region on a bounded pool of worker
    /// threads. The aggregate fails once all workers settle.
    pub fn parallel_load_or_build(
        &self,
        regions: &[Arc<Region>],
        concurrency: usize,
    ) -> VectorResult<()> {
        if regions.is_empty() {
            return Ok(());
        }
        let concurrency = concurrency.clamp(1, regions.len());
        let cursor = AtomicUsize::new(0);
        let failed = AtomicBool::new(false);

        std::thread::scope(|scope| {
            for _ in 0..concurrency {
                scope.spawn(|| loop {
                    let offset = cursor.fetch_add(1, Ordering::Relaxed);
                    if offset >= regions.len() || failed.load(Ordering::Relaxed) {
                        break;
                    }
                    let region = &regions[offset];
                    info!("Init load region {} vector index", region.id());
                    if let Err(e) = self.load_or_build(region) {
                        error!("Load region {} vector index failed: {}", region.id(), e);
                        failed.store(true, Ordering::Relaxed);
                        break;
                    }
                });
            }
        });

        if failed.load(Ordering::Relaxed) {
            return Err(VectorError::internal("load or build vector index failed"));
        }
        Ok(())
    }

    /// Materialize one region's index: newest snapshot plus WAL tail when
    /// possible, full build from the primary store otherwise.
    pub fn load_or_build(&self, region: &Arc<Region>) -> VectorResult<()> {
        let index_id = region.id();
        let online = self.get_index(index_id);
        if let Some(online) = &online {
            online.set_status(IndexStatus::Loading);
        }

        if let Some(vector_index) = self.load_from_snapshot(region) {
            match self.replay_wal(&vector_index, vector_index.apply_log_index() + 1, u64::MAX) {
                Ok(()) => {
                    info!(
                        "[index {}] load from snapshot success, log_id {}",
                        index_id,
                        vector_index.apply_log_index()
                    );
                    vector_index.set_status(IndexStatus::Normal);
                    self.publish_index(vector_index);
                    if let Some(online) = &online {
                        online.set_status(IndexStatus::Normal);
                    }
                    return Ok(());
                }
                Err(e) => {
                    warn!(
                        "[index {}] replay wal after snapshot load failed: {}",
                        index_id, e
                    );
                }
            }
        }

        info!(
            "[index {}] load from snapshot failed or missing, build from the primary store",
            index_id
        );

        match self.build_index(region) {
            Ok(vector_index) => {
                vector_index.set_status(IndexStatus::Normal);
                self.publish_index(vector_index);
                if let Some(online) = &online {
                    online.set_status(IndexStatus::Normal);
                }
                info!("[index {}] build vector index success", index_id);
                Ok(())
            }
            Err(e) => {
                if let Some(online) = &online {
                    online.set_status(IndexStatus::Normal);
                }
                Err(VectorError::internal(format!(
                    "build vector index {} failed: {}",
                    index_id, e
                )))
            }
        }
    }

    /// Boot load from the newest admitted snapshot; `None` falls back to a
    /// full build.
    fn load_from_snapshot(&self, region: &Region) -> Option<Arc<dyn VectorIndex>> {
        let index_id = region.id();
        let Some(last) = self.snapshots.registry().get_last(index_id) else {
            warn!("[index {}] no vector index snapshot on disk", index_id);
            return None;
        };
        info!("[index {}] snapshot log id is {}", index_id, last.log_id());

        let data_path = last.data_path();
        if !data_path.exists() {
            error!(
                "[index {}] file {} not exist, need to build vector index",
                index_id,
                data_path.display()
            );
            return None;
        }

        let vector_index = match new_index(index_id, region.index_parameter()) {
            Ok(vector_index) => vector_index,
            Err(e) => {
                warn!("[index {}] new vector index failed: {}", index_id, e);
                return None;
            }
        };
        if let Err(e) = vector_index.load(&data_path) {
            warn!("[index {}] load vector index failed: {}", index_id, e);
            return None;
        }

        vector_index.set_snapshot_log_index(last.log_id());
        vector_index.set_apply_log_index(last.log_id());
        Some(vector_index)
    }

    /// Build an index from the region's rows in the primary store.
    fn build_index(&self, region: &Region) -> VectorResult<Arc<dyn VectorIndex>> {
        let index_id = region.id();
        let vector_index = new_index(index_id, region.index_parameter())?;

        let apply_log_id = self.load_apply_log_id(index_id)?;
        vector_index.set_apply_log_index(apply_log_id);
        let snapshot_log_id = self.load_snapshot_log_id(index_id)?;
        vector_index.set_snapshot_log_index(snapshot_log_id);

        info!(
            "[index {}] build vector index, snapshot_log_id({}) apply_log_id({})",
            index_id, snapshot_log_id, apply_log_id
        );

        let start = Instant::now();
        let batch_size = self.config.build_vector_index_batch_size.max(1);
        let mut batch: Vec<VectorWithId> = Vec::with_capacity(batch_size);
        let mut count = 0u64;
        for (key, value) in self.kv.scan(region.start_key(), region.end_key()) {
            let Some(id) = codec::decode_vector_id(&key) else {
                warn!("[index {}] decode vector id failed, skip row", index_id);
                continue;
            };
            let values = match codec::decode_vector_value(&value) {
                Ok(values) => values,
                Err(e) => {
                    warn!("[index {}] vector {} decode failed: {}", index_id, id, e);
                    continue;
                }
            };
            if values.is_empty() {
                warn!("[index {}] vector {} has zero dimensions, skip", index_id, id);
                continue;
            }

            count += 1;
            batch.push(VectorWithId { id, values });
            if batch.len() >= batch_size {
                let full = std::mem::replace(&mut batch, Vec::with_capacity(batch_size));
                vector_index.upsert(full)?;
            }
        }
        if !batch.is_empty() {
            vector_index.upsert(batch)?;
        }

        info!(
            "[index {}] build vector index finish, count({}) elapsed({}ms)",
            index_id,
            count,
            start.elapsed().as_millis()
        );
        Ok(vector_index)
    }

    /// Replay WAL entries in `[start_log_id, end_log_id]` into the index,
    /// batching adds and flushing before every delete.
    fn replay_wal(
        &self,
        vector_index: &Arc<dyn VectorIndex>,
        start_log_id: u64,
        end_log_id: u64,
    ) -> VectorResult<()> {
        let index_id = vector_index.id();
        info!(
            "[index {}] replay wal from log id {} to {}",
            index_id, start_log_id, end_log_id
        );
        let start = Instant::now();

        self.raft
            .node(index_id)
            .ok_or_else(|| VectorError::RaftNotFound(format!("vector index {}", index_id)))?;
        let wal = self
            .wal_manager
            .wal(index_id)
            .ok_or_else(|| VectorError::internal(format!("not found log storage {}", index_id)))?;

        let batch_size = self.config.build_vector_index_batch_size.max(1);
        let mut batch: Vec<VectorWithId> = Vec::with_capacity(batch_size);
        let mut last_log_id = vector_index.apply_log_index();
        for entry in wal.entries(start_log_id, end_log_id) {
            for command in &entry.commands {
                match command {
                    VectorCommand::VectorAdd { vectors } => {
                        batch.extend(vectors.iter().cloned());
                        if batch.len() >= batch_size {
                            let full =
                                std::mem::replace(&mut batch, Vec::with_capacity(batch_size));
                            vector_index.upsert(full)?;
                        }
                    }
                    VectorCommand::VectorDelete { ids } => {
                        if !batch.is_empty() {
                            let full =
                                std::mem::replace(&mut batch, Vec::with_capacity(batch_size));
                            vector_index.upsert(full)?;
                        }
                        vector_index.delete(ids)?;
                    }
                }
            }
            last_log_id = entry.index;
        }
        if !batch.is_empty() {
            vector_index.upsert(batch)?;
        }

        vector_index.set_apply_log_index(last_log_id);
        info!(
            "[index {}] replay wal finish, last_log_id {} elapsed {}ms",
            index_id,
            last_log_id,
            start.elapsed().as_millis()
        );
        Ok(())
    }

    // ------------------------------------------------------------------
    // Rebuild
    // ------------------------------------------------------------------

    /// Rebuild the index from the primary store while the old one keeps
    /// serving, then hand over behind the region's switching flag.
    pub async fn rebuild(&self, region: &Arc<Region>, need_save: bool) -> VectorResult<()> {
        let index_id = region.id();
        info!("[index {}] start rebuild vector index", index_id);

        let online = self.get_index(index_id);
        if let Some(online) = &online {
            let status = online.status();
            if !matches!(
                status,
                IndexStatus::Normal | IndexStatus::Error | IndexStatus::None
            ) {
                return Err(VectorError::internal(format!(
                    "online vector index {} status is {:?}, cannot rebuild",
                    index_id, status
                )));
            }
            online.set_status(IndexStatus::Rebuilding);
        }

        let result = self.rebuild_inner(region, need_save, online.as_ref()).await;
        if result.is_err() {
            if let Some(online) = &online {
                online.set_status(IndexStatus::Error);
            }
        }
        result
    }

    async fn rebuild_inner(
        &self,
        region: &Arc<Region>,
        need_save: bool,
        online: Option<&Arc<dyn VectorIndex>>,
    ) -> VectorResult<()> {
        let index_id = region.id();
        let start = Instant::now();

        let vector_index = task::block_in_place(|| self.build_index(region))?;
        if let Some(online) = online {
            vector_index.set_version(online.version() + 1);
        }
        info!(
            "[index {}] build vector index success, log_id {} elapsed {}ms",
            index_id,
            vector_index.apply_log_index(),
            start.elapsed().as_millis()
        );

        // Save before the first replay round so the blocking catch-up round
        // stays short.
        if need_save {
            self.save_index(&vector_index).await?;
        }

        vector_index.set_status(IndexStatus::Replaying);
        task::block_in_place(|| {
            self.replay_wal(&vector_index, vector_index.apply_log_index() + 1, u64::MAX)
        })?;
        info!(
            "[index {}] replay wal first-round success, log_id {}",
            index_id,
            vector_index.apply_log_index()
        );

        // The old index stops taking writes; raft handlers defer and retry
        // until the new one is published.
        region.set_switching_vector_index(true);
        let _switching_guard = SwitchingGuard {
            region: region.clone(),
        };

        task::block_in_place(|| {
            self.replay_wal(&vector_index, vector_index.apply_log_index() + 1, u64::MAX)
        })?;
        info!(
            "[index {}] replay wal catch-up round success, log_id {}",
            index_id,
            vector_index.apply_log_index()
        );

        vector_index.set_status(IndexStatus::Normal);
        let published = if online.is_some() {
            self.replace_index(vector_index)
        } else {
            self.publish_index(vector_index);
            true
        };
        if !published {
            return Err(VectorError::internal(
                "catch-up round finished but the online vector index was deleted, \
                 stop publishing",
            ));
        }

        info!("[index {}] rebuild vector index success", index_id);
        Ok(())
    }

    // ------------------------------------------------------------------
    // Save
    // ------------------------------------------------------------------

    /// Snapshot the index, persist the frozen log id, then push the result
    /// to the followers (push failures only get logged).
    pub async fn save_index(&self, vector_index: &Arc<dyn VectorIndex>) -> VectorResult<()> {
        let index_id = vector_index.id();
        info!("[index {}] save vector index", index_id);
        vector_index.set_status(IndexStatus::Snapshotting);

        let snapshots = self.snapshots.clone();
        let index = vector_index.clone();
        let result = task::spawn_blocking(move || snapshots.save(&index))
            .await
            .map_err(|e| VectorError::internal(format!("join save task failed: {}", e)))?;

        match result {
            Ok(snapshot_log_id) => {
                self.update_snapshot_log_id(vector_index, snapshot_log_id);
                vector_index.set_status(IndexStatus::Normal);
            }
            Err(e) => {
                // The index stays serviceable; the error carries the cause.
                vector_index.set_status(IndexStatus::Normal);
                error!(
                    "[index {}] save vector index snapshot failed: {}",
                    index_id, e
                );
                return Err(e);
            }
        }

        if let Err(e) = self.snapshots.install_to_followers(index_id).await {
            error!(
                "[index {}] install snapshot to followers failed: {}",
                index_id, e
            );
        }

        info!("[index {}] save vector index success", index_id);
        Ok(())
    }

    // ------------------------------------------------------------------
    // Install handling
    // ------------------------------------------------------------------

    /// Receiver side of a leader push: followers that already materialized
    /// the index decline, everyone else downloads.
    pub async fn handle_install_snapshot(
        &self,
        uri: &str,
        meta: &VectorIndexSnapshotMeta,
    ) -> VectorResult<()> {
        if self.get_index(meta.vector_index_id).is_some() {
            return Err(VectorError::NotNeedSnapshot);
        }
        self.snapshots.download(uri, meta).await
    }

    // ------------------------------------------------------------------
    // Scrub
    // ------------------------------------------------------------------

    /// One policy sweep over all live regions: rebuild or re-snapshot the
    /// indexes that ask for it. Per-region errors do not abort the sweep.
    pub async fn scrub(&self) -> VectorResult<()> {
        let regions = self.regions();
        if regions.is_empty() {
            info!("No alive region, skip scrub vector index");
            return Ok(());
        }
        info!(
            "Scrub vector index start, alive region count {}",
            regions.len()
        );

        for region in regions {
            let index_id = region.id();
            let Some(vector_index) = self.get_index(index_id) else {
                continue;
            };

            let last_snapshot_log_id = self
                .snapshots
                .registry()
                .get_last(index_id)
                .map(|snapshot| snapshot.log_id())
                .unwrap_or(0);
            let log_lag = vector_index
                .apply_log_index()
                .saturating_sub(last_snapshot_log_id);

            let need_rebuild = vector_index.need_rebuild(log_lag);
            let need_save = vector_index.need_save(log_lag);
            if !need_rebuild && !need_save {
                continue;
            }
            info!(
                "vector index {} need rebuild({}) and need save({})",
                index_id, need_rebuild, need_save
            );

            if vector_index.status() != IndexStatus::Normal {
                info!("vector index {} status is not normal, skip scrub", index_id);
                continue;
            }

            if need_rebuild {
                if let Err(e) = self.rebuild(&region, true).await {
                    error!("Rebuild vector index {} failed: {}", index_id, e);
                    continue;
                }
            } else if need_save {
                if let Err(e) = self.save_index(&vector_index).await {
                    error!("Save vector index {} failed: {}", index_id, e);
                    continue;
                }
            }
        }
        Ok(())
    }
}

/// Rebuild on a background task once the index leaves any transient state.
/// Followers drop the fresh index afterwards unless configured to hold one.
pub fn spawn_rebuild(
    manager: Arc<VectorIndexManager>,
    region: Arc<Region>,
    need_save: bool,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let index_id = region.id();
        info!("[index {}] async rebuild vector index", index_id);

        loop {
            let Some(vector_index) = manager.get_index(index_id) else {
                break;
            };
            match vector_index.status() {
                IndexStatus::Rebuilding
                | IndexStatus::Snapshotting
                | IndexStatus::Building
                | IndexStatus::Replaying => {
                    info!("[index {}] waiting rebuild vector index", index_id);
                    tokio::time::sleep(Duration::from_secs(2)).await;
                }
                _ => break,
            }
        }

        if let Err(e) = manager.rebuild(&region, need_save).await {
            error!("[index {}] rebuild vector index failed: {}", index_id, e);
        }

        if !manager.config.enable_follower_hold_index {
            match manager.raft.node(index_id) {
                Some(node) if !node.is_leader() => manager.delete_index(index_id),
                Some(_) => {}
                None => error!("[index {}] not found raft node", index_id),
            }
        }
    })
}

/// Periodic scrub loop.
pub fn start_scrubber(manager: Arc<VectorIndexManager>) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(manager.config.scrub_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick fires immediately; skip it so a fresh boot does
        // not scrub before load-or-build settles.
        ticker.tick().await;
        loop {
            ticker.tick().await;
            if let Err(e) = manager.scrub().await {
                error!("Scrub vector index failed: {}", e);
            }
        }
    })
}
