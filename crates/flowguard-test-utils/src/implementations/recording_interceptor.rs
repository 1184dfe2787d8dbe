use parking_lot::Mutex;

use flowguard_core::{EntityInterceptor, HandleId};

/// Interceptor remembering every flush it was told about
#[derive(Debug, Default)]
pub struct RecordingInterceptor {
    flushes: Mutex<Vec<(HandleId, usize)>>,
}

impl RecordingInterceptor {
    /// Create an empty recorder
    pub fn new() -> Self {
        Self::default()
    }

    /// `(handle, entity count)` per flush, oldest first
    pub fn flushes(&self) -> Vec<(HandleId, usize)> {
        self.flushes.lock().clone()
    }

    /// Total entities flushed
    pub fn total_entities(&self) -> usize {
        self.flushes.lock().iter().map(|(_, count)| count).sum()
    }
}

impl EntityInterceptor for RecordingInterceptor {
    fn on_flush(&self, handle: &HandleId, entities: usize) {
        self.flushes.lock().push((handle.clone(), entities));
    }
}
