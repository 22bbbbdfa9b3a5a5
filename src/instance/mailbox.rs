use std::mem;

use parking_lot::Mutex;

/// Lock-guarded list of items that is posted to from any thread and drained in one
/// step. Draining swaps the list out under the lock, so an item is either in the
/// drained batch or stays for the next one.
pub struct Mailbox<T> {
    items: Mutex<Vec<T>>,
}

impl<T> Default for Mailbox<T> {
    fn default() -> Self {
        Self {
            items: Mutex::new(Vec::new()),
        }
    }
}

impl<T> Mailbox<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn post(&self, item: T) {
        self.items.lock().push(item);
    }

    /// Post `item` unless `ready` yields a value while the mailbox is locked.
    ///
    /// In that case the item is handed back together with the value instead. A
    /// concurrent [`drain`](Self::drain) therefore never misses an item whose
    /// `ready` check failed.
    pub fn post_unless<R>(&self, item: T, ready: impl FnOnce() -> Option<R>) -> Result<(), (T, R)> {
        let mut items = self.items.lock();
        match ready() {
            Some(value) => Err((item, value)),
            None => {
                items.push(item);
                Ok(())
            }
        }
    }

    pub fn drain(&self) -> Vec<T> {
        let mut drained = Vec::new();
        mem::swap(&mut drained, &mut *self.items.lock());
        drained
    }

    pub fn len(&self) -> usize {
        self.items.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.lock().is_empty()
    }
}
