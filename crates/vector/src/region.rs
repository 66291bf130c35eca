//! Region descriptor for one replicated vector index

use std::sync::atomic::{AtomicBool, Ordering};

use crate::index::IndexParameter;

/// One logical region. The region id doubles as the vector index id.
#[derive(Debug)]
pub struct Region {
    id: u64,
    start_key: Vec<u8>,
    end_key: Vec<u8>,
    index_parameter: IndexParameter,
    // While set, raft handlers steer writes away from the old index and
    // retry until the rebuilt index is published.
    switching_vector_index: AtomicBool,
}

impl Region {
    pub fn new(
        id: u64,
        start_key: Vec<u8>,
        end_key: Vec<u8>,
        index_parameter: IndexParameter,
    ) -> Self {
        Self {
            id,
            start_key,
            end_key,
            index_parameter,
            switching_vector_index: AtomicBool::new(false),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn start_key(&self) -> &[u8] {
        &self.start_key
    }

    pub fn end_key(&self) -> &[u8] {
        &self.end_key
    }

    pub fn index_parameter(&self) -> &IndexParameter {
        &self.index_parameter
    }

    pub fn is_switching_vector_index(&self) -> bool {
        self.switching_vector_index.load(Ordering::Acquire)
    }

    pub fn set_switching_vector_index(&self, switching: bool) {
        self.switching_vector_index.store(switching, Ordering::Release);
    }
}
