//! Read access to the primary key-value store
//!
//! Index rebuilds scan the region's data range through this trait. The
//! persistent engine lives outside this crate; [`MemoryKv`] backs tests and
//! the standalone node.

use std::collections::BTreeMap;

use parking_lot::Mutex;

/// Range reads over the primary store.
pub trait KvReader: Send + Sync {
    /// Key-value pairs in `[start, end)`, ascending by key.
    fn scan(&self, start: &[u8], end: &[u8]) -> Box<dyn Iterator<Item = (Vec<u8>, Vec<u8>)> + Send>;
}

#[derive(Default)]
pub struct MemoryKv {
    data: Mutex<BTreeMap<Vec<u8>, Vec<u8>>>,
}

impl MemoryKv {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&self, key: Vec<u8>, value: Vec<u8>) {
        self.data.lock().insert(key, value);
    }

    pub fn delete(&self, key: &[u8]) {
        self.data.lock().remove(key);
    }
}

impl KvReader for MemoryKv {
    fn scan(&self, start: &[u8], end: &[u8]) -> Box<dyn Iterator<Item = (Vec<u8>, Vec<u8>)> + Send> {
        let rows: Vec<(Vec<u8>, Vec<u8>)> = self
            .data
            .lock()
            .range(start.to_vec()..end.to_vec())
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        Box::new(rows.into_iter())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scan_range() {
        let kv = MemoryKv::new();
        kv.put(b"a".to_vec(), b"1".to_vec());
        kv.put(b"b".to_vec(), b"2".to_vec());
        kv.put(b"c".to_vec(), b"3".to_vec());

        let rows: Vec<_> = kv.scan(b"a", b"c").collect();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].0, b"a");
        assert_eq!(rows[1].0, b"b");
    }

    #[test]
    fn test_scan_empty_range() {
        let kv = MemoryKv::new();
        kv.put(b"x".to_vec(), b"1".to_vec());
        assert_eq!(kv.scan(b"a", b"b").count(), 0);
    }
}
