//! Reader handles exposed to peers during snapshot transfer

use std::collections::HashMap;
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;

use super::meta::SnapshotMeta;
use crate::error::{VectorError, VectorResult};

/// Table of reader ids handed out to peers. An entry keeps its snapshot
/// alive until the side that created it removes the handle; id 0 is
/// reserved as invalid.
pub struct FileReaderRegistry {
    next_reader_id: AtomicU64,
    readers: Mutex<HashMap<u64, Arc<SnapshotMeta>>>,
}

impl Default for FileReaderRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl FileReaderRegistry {
    pub fn new() -> Self {
        Self {
            next_reader_id: AtomicU64::new(1),
            readers: Mutex::new(HashMap::new()),
        }
    }

    pub fn add(&self, snapshot: Arc<SnapshotMeta>) -> u64 {
        let reader_id = self.next_reader_id.fetch_add(1, Ordering::Relaxed);
        self.readers.lock().insert(reader_id, snapshot);
        reader_id
    }

    pub fn get(&self, reader_id: u64) -> Option<Arc<SnapshotMeta>> {
        self.readers.lock().get(&reader_id).cloned()
    }

    pub fn delete(&self, reader_id: u64) -> bool {
        self.readers.lock().remove(&reader_id).is_some()
    }

    pub fn len(&self) -> usize {
        self.readers.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.readers.lock().is_empty()
    }

    /// Serve one chunk of a snapshot file: up to `size` bytes starting at
    /// `offset`. Returns the data and whether the read reached end-of-file.
    pub fn read_file(
        &self,
        reader_id: u64,
        filename: &str,
        offset: u64,
        size: u64,
    ) -> VectorResult<(Vec<u8>, bool)> {
        let snapshot = self
            .get(reader_id)
            .ok_or_else(|| VectorError::FileNotFoundReader(format!("reader_id {}", reader_id)))?;

        // Filenames come from the transfer meta and are bare names inside
        // the snapshot directory.
        if filename.is_empty() || filename.contains('/') || filename.contains('\\') {
            return Err(VectorError::FileRead(format!("bad filename {:?}", filename)));
        }

        let path = snapshot.path().join(filename);
        let mut file = File::open(&path)
            .map_err(|e| VectorError::FileRead(format!("open {} failed: {}", path.display(), e)))?;
        let file_len = file
            .metadata()
            .map_err(|e| VectorError::FileRead(format!("stat {} failed: {}", path.display(), e)))?
            .len();

        file.seek(SeekFrom::Start(offset))
            .map_err(|e| VectorError::FileRead(format!("seek {} failed: {}", path.display(), e)))?;

        let mut data = Vec::new();
        file.take(size)
            .read_to_end(&mut data)
            .map_err(|e| VectorError::FileRead(format!("read {} failed: {}", path.display(), e)))?;

        let eof = offset + data.len() as u64 >= file_len;
        debug!(
            "GetFile reader_id {} file {} offset {} read {} eof {}",
            reader_id,
            filename,
            offset,
            data.len(),
            eof
        );
        Ok((data, eof))
    }
}
