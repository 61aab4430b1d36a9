use crate::types::{Source, Watermark};
use std::collections::HashMap;
use std::sync::Mutex;

/// Last observed resumption point per source.
///
/// The lock is only held for a single lookup or insert, so concurrent fetches
/// for different sources never wait on each other across an await point.
#[derive(Debug, Default)]
pub struct WatermarkStore {
    inner: Mutex<HashMap<Source, Watermark>>,
}

impl WatermarkStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, source: &Source) -> Option<Watermark> {
        self.lock().get(source).copied()
    }

    /// Unconditional overwrite.
    pub fn set(&self, source: &Source, watermark: Watermark) {
        self.lock().insert(source.clone(), watermark);
    }

    /// Store `watermark` only if it is newer than the current entry.
    pub fn advance(&self, source: &Source, watermark: Watermark) -> bool {
        let mut guard = self.lock();
        match guard.get(source) {
            Some(current) if *current >= watermark => false,
            _ => {
                guard.insert(source.clone(), watermark);
                true
            }
        }
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<Source, Watermark>> {
        // A poisoned map still holds valid timestamps.
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}
