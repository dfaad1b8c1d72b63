use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::segmenter::UtteranceChunk;

/// FIFO of pending chunks. The ingestor appends whole batches; the dispatch
/// loop is the only caller of `peek` and `pop_front`.
#[derive(Debug, Default)]
pub struct UtteranceQueue {
    inner: Mutex<VecDeque<UtteranceChunk>>,
}

impl UtteranceQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_batch(&self, chunks: Vec<UtteranceChunk>) -> usize {
        let mut queue = self.lock();
        queue.extend(chunks);
        queue.len()
    }

    pub fn peek(&self) -> Option<UtteranceChunk> {
        self.lock().front().cloned()
    }

    pub fn pop_front(&self) -> Option<UtteranceChunk> {
        self.lock().pop_front()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Drops every pending chunk and returns how many there were.
    pub fn clear(&self) -> usize {
        let mut queue = self.lock();
        let dropped = queue.len();
        queue.clear();
        dropped
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<UtteranceChunk>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
