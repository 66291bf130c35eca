//! Fork-based point-in-time capture of a live index
//!
//! The index write lock is held only across `fork()` itself; the child
//! serializes its copy-on-write view of the index while writers resume in
//! the parent. The child reports `{errcode, errmsg}` through a pipe and
//! exits with `_exit`, never touching the parent's logging or runtime.

use std::fs;
use std::fs::File;
use std::io::{Read, Write};
use std::sync::Arc;
use std::time::Instant;

use nix::sys::wait::{waitpid, WaitStatus};
use nix::unistd::{fork, pipe, ForkResult};
use prost::Message;
use tracing::{error, info};

use super::{SnapshotManager, SnapshotMeta, TmpDirGuard};
use crate::error::{VectorError, VectorResult};
use crate::index::VectorIndex;
use proto::common::{Errno, Error as PbError};

/// The child must not write more than this to the result pipe; the parent
/// reads one bounded record.
const PIPE_RECORD_CAP: usize = 4096;

/// Clears the single-in-flight flag on every exit path.
struct SnapshotDoingGuard<'a> {
    index: &'a dyn VectorIndex,
}

impl Drop for SnapshotDoingGuard<'_> {
    fn drop(&mut self) {
        self.index.set_snapshot_doing(false);
    }
}

/// Releases the index write lock at most once, on drop or explicitly.
struct WriteLockGuard<'a> {
    index: &'a dyn VectorIndex,
    locked: bool,
}

impl<'a> WriteLockGuard<'a> {
    fn lock(index: &'a dyn VectorIndex) -> Self {
        index.lock_write();
        Self {
            index,
            locked: true,
        }
    }

    fn release(&mut self) {
        if self.locked {
            self.index.unlock_write();
            self.locked = false;
        }
    }
}

impl Drop for WriteLockGuard<'_> {
    fn drop(&mut self) {
        self.release();
    }
}

#[cfg(test)]
thread_local! {
    static FORK_FAILS: std::cell::Cell<bool> = const { std::cell::Cell::new(false) };
}

// The child restricts itself to index.save(), one pipe write and _exit(),
// which keeps the fork sound even with the parent's threads mid-flight.
fn do_fork() -> nix::Result<ForkResult> {
    #[cfg(test)]
    if FORK_FAILS.with(|fails| fails.get()) {
        return Err(nix::errno::Errno::EAGAIN);
    }
    unsafe { fork() }
}

impl SnapshotManager {
    /// Capture a point-in-time snapshot of `vector_index`. Returns the log
    /// id the snapshot was frozen at; writers are blocked only for the
    /// duration of `fork()`.
    pub fn save(&self, vector_index: &Arc<dyn VectorIndex>) -> VectorResult<u64> {
        // Just one concurrent save per index.
        if vector_index.snapshot_doing() {
            return Err(VectorError::SnapshotBusy);
        }
        vector_index.set_snapshot_doing(true);
        let _doing_guard = SnapshotDoingGuard {
            index: vector_index.as_ref(),
        };

        let index_id = vector_index.id();
        let start = Instant::now();

        let mut write_lock = WriteLockGuard::lock(vector_index.as_ref());
        let apply_log_id = vector_index.apply_log_index();

        // Already covered by an admitted snapshot, nothing to do.
        if self.registry.is_exist(index_id, apply_log_id) {
            write_lock.release();
            info!(
                "[index {}] snapshot already exist, skip save, log_id {}",
                index_id, apply_log_id
            );
            return Ok(apply_log_id);
        }

        let tmp_path = self.tmp_path(index_id);
        if tmp_path.exists() {
            fs::remove_dir_all(&tmp_path).map_err(|e| {
                VectorError::internal(format!("remove {} failed: {}", tmp_path.display(), e))
            })?;
        }
        fs::create_dir_all(&tmp_path).map_err(|e| {
            VectorError::internal(format!("create {} failed: {}", tmp_path.display(), e))
        })?;
        let mut tmp_guard = TmpDirGuard::new(tmp_path.clone());

        let index_file = tmp_path.join(format!("index_{}_{}.idx", index_id, apply_log_id));
        info!(
            "[index {}] save vector index to file {}",
            index_id,
            index_file.display()
        );

        let (pipe_read, pipe_write) = pipe()
            .map_err(|e| VectorError::internal(format!("create pipe failed: {}", e)))?;

        let child = match do_fork() {
            Err(e) => {
                // Guards release the write lock and remove the tmp dir.
                error!("[index {}] save snapshot fork failed: {}", index_id, e);
                return Err(VectorError::internal(format!("fork failed: {}", e)));
            }
            Ok(ForkResult::Child) => {
                drop(pipe_read);

                // Index kinds that cannot serialize themselves are a no-op.
                let result = match vector_index.save(&index_file) {
                    Err(VectorError::NotSupport(_)) => Ok(()),
                    other => other,
                };
                if result.is_err() {
                    let _ = fs::remove_dir_all(&tmp_path);
                }

                let record = match &result {
                    Ok(()) => PbError {
                        errcode: Errno::Ok as i32,
                        errmsg: String::new(),
                    },
                    Err(e) => e.to_pb(),
                };
                let mut encoded = record.encode_to_vec();
                if encoded.len() > PIPE_RECORD_CAP {
                    encoded = PbError {
                        errcode: Errno::Internal as i32,
                        errmsg: "child result record too large".into(),
                    }
                    .encode_to_vec();
                }
                let mut pipe_file = File::from(pipe_write);
                let _ = pipe_file.write_all(&encoded);
                drop(pipe_file);

                unsafe { libc::_exit(0) }
            }
            Ok(ForkResult::Parent { child }) => {
                // Writers resume as soon as fork returns.
                write_lock.release();
                child
            }
        };

        drop(pipe_write);
        let status = waitpid(child, None)
            .map_err(|e| VectorError::internal(format!("waitpid failed: {}", e)))?;
        if !matches!(status, WaitStatus::Exited(_, 0)) {
            error!(
                "[index {}] save snapshot child process failed: {:?}",
                index_id, status
            );
            return Err(VectorError::internal(
                "save vector index failed, child process encountered an error",
            ));
        }

        let mut record = Vec::new();
        File::from(pipe_read)
            .take(PIPE_RECORD_CAP as u64)
            .read_to_end(&mut record)
            .map_err(|e| VectorError::internal(format!("read child result failed: {}", e)))?;
        let child_error = PbError::decode(record.as_slice())
            .map_err(|e| VectorError::internal(format!("decode child result failed: {}", e)))?;
        if let Some(err) = VectorError::from_pb(&child_error) {
            error!("[index {}] save snapshot failed: {}", index_id, err);
            return Err(err);
        }

        // Freeze the log id next to the data.
        let meta_path = tmp_path.join("meta");
        fs::write(&meta_path, format!("{}\n", apply_log_id)).map_err(|e| {
            VectorError::internal(format!("write {} failed: {}", meta_path.display(), e))
        })?;

        let new_path = self.snapshot_path(index_id, apply_log_id);
        if let Err(e) = fs::rename(&tmp_path, &new_path) {
            // The tmp directory remains for the next boot cleanup.
            tmp_guard.disarm();
            error!(
                "[index {}] rename snapshot {} -> {} failed: {}",
                index_id,
                tmp_path.display(),
                new_path.display(),
                e
            );
            return Err(VectorError::internal(format!(
                "rename snapshot failed: {}",
                e
            )));
        }
        tmp_guard.disarm();

        let stale = self.registry.get_all(index_id);

        let new_snapshot = Arc::new(SnapshotMeta::new(index_id, &new_path).map_err(|e| {
            VectorError::internal(format!(
                "init snapshot failed, path {}: {}",
                new_path.display(),
                e
            ))
        })?);
        if !self.registry.add(new_snapshot.clone()) {
            // The admitted entry owns the directory; this handle must not
            // delete it on drop.
            std::mem::forget(new_snapshot);
            return Err(VectorError::SnapshotExist(format!(
                "vector_index_id {} snapshot_log_index {}",
                index_id, apply_log_id
            )));
        }

        for snapshot in &stale {
            self.registry.delete(snapshot);
        }
        drop(stale);

        // The WAL may drop vector entries the snapshot now covers.
        if let Some(wal) = self.wal_manager.wal(index_id) {
            wal.set_vector_index_truncate_log_index(apply_log_id);
        }

        info!(
            "[index {}] save snapshot snapshot_{:020} elapsed {}ms",
            index_id,
            apply_log_id,
            start.elapsed().as_millis()
        );
        Ok(apply_log_id)
    }
}
