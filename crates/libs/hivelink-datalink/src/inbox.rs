use std::mem;
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Mutex-guarded queue whose drains are disjoint: every entry is returned by
/// exactly one `drain()` call.
#[derive(Debug)]
pub struct Inbox<T> {
    entries: Mutex<Vec<T>>,
}

impl<T> Default for Inbox<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Inbox<T> {
    pub fn new() -> Self {
        Self { entries: Mutex::new(Vec::new()) }
    }

    pub fn push(&self, entry: T) {
        self.lock().push(entry);
    }

    pub fn extend(&self, entries: impl IntoIterator<Item = T>) {
        self.lock().extend(entries);
    }

    pub fn drain(&self) -> Vec<T> {
        mem::take(&mut *self.lock())
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<T>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
