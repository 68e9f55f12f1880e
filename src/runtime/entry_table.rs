//! The hot-dispatch entry table: guest function address to published host
//! code. Transitions run `New -> Resolving -> Ready | Failed` with a
//! single winner per address; losers block on the entry's condvar until
//! the winner publishes, which is also the happens-before edge for the
//! code bytes themselves.

use crate::backend::x64::CodeBlob;
use std::collections::HashMap;
use std::sync::{Arc, Condvar, Mutex};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryStatus {
    New,
    Resolving,
    Ready,
    Failed,
}

struct EntryState {
    status: EntryStatus,
    blob: Option<Arc<CodeBlob>>,
    end_address: u32,
}

/// One dispatch slot.
pub struct Entry {
    pub address: u32,
    state: Mutex<EntryState>,
    cond: Condvar,
}

impl Entry {
    pub fn status(&self) -> EntryStatus {
        self.state.lock().unwrap().status
    }

    pub fn blob(&self) -> Option<Arc<CodeBlob>> {
        self.state.lock().unwrap().blob.clone()
    }

    pub fn end_address(&self) -> u32 {
        self.state.lock().unwrap().end_address
    }

    /// Publishes compiled code and releases every waiter.
    pub fn publish_ready(&self, blob: Arc<CodeBlob>, end_address: u32) {
        let mut state = self.state.lock().unwrap();
        debug_assert_eq!(state.status, EntryStatus::Resolving);
        state.blob = Some(blob);
        state.end_address = end_address;
        state.status = EntryStatus::Ready;
        self.cond.notify_all();
    }

    pub fn publish_failed(&self) {
        let mut state = self.state.lock().unwrap();
        state.status = EntryStatus::Failed;
        self.cond.notify_all();
    }
}

/// What `get_or_create` resolved to.
pub enum Resolution {
    /// Caller owns the `Resolving` state and must publish.
    MustResolve(Arc<Entry>),
    Ready(Arc<CodeBlob>),
    Failed,
}

pub struct EntryTable {
    entries: Mutex<HashMap<u32, Arc<Entry>>>,
}

impl EntryTable {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// The dispatch path. Exactly one caller per address ever sees
    /// `MustResolve`; concurrent callers sleep until publication.
    pub fn get_or_create(&self, address: u32) -> Resolution {
        let entry = {
            let mut entries = self.entries.lock().unwrap();
            entries
                .entry(address)
                .or_insert_with(|| {
                    Arc::new(Entry {
                        address,
                        state: Mutex::new(EntryState {
                            status: EntryStatus::New,
                            blob: None,
                            end_address: address,
                        }),
                        cond: Condvar::new(),
                    })
                })
                .clone()
        };
        let mut state = entry.state.lock().unwrap();
        loop {
            match state.status {
                EntryStatus::New => {
                    state.status = EntryStatus::Resolving;
                    drop(state);
                    return Resolution::MustResolve(entry);
                }
                EntryStatus::Resolving => {
                    state = entry.cond.wait(state).unwrap();
                }
                EntryStatus::Ready => {
                    return Resolution::Ready(state.blob.clone().unwrap());
                }
                EntryStatus::Failed => return Resolution::Failed,
            }
        }
    }

    /// Fast-path lookup without creating.
    pub fn get_ready(&self, address: u32) -> Option<Arc<CodeBlob>> {
        let entry = self.entries.lock().unwrap().get(&address).cloned()?;
        let state = entry.state.lock().unwrap();
        match state.status {
            EntryStatus::Ready => state.blob.clone(),
            _ => None,
        }
    }

    /// Entries whose function range covers `address`.
    pub fn find_with_address(&self, address: u32) -> Vec<Arc<Entry>> {
        self.entries
            .lock()
            .unwrap()
            .values()
            .filter(|entry| {
                let state = entry.state.lock().unwrap();
                state.status == EntryStatus::Ready
                    && address >= entry.address
                    && address <= state.end_address
            })
            .cloned()
            .collect()
    }
}

impl Default for EntryTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::x64::CodeCache;

    #[test]
    fn single_winner_and_waiters() {
        let table = Arc::new(EntryTable::new());
        let cache = CodeCache::new();
        let blob = cache.publish(0x8201_0000, &[0xC3], Vec::new()).unwrap();

        let Resolution::MustResolve(entry) = table.get_or_create(0x8201_0000) else {
            panic!("first caller must win");
        };

        // A second thread blocks until publication.
        let table2 = table.clone();
        let waiter = std::thread::spawn(move || match table2.get_or_create(0x8201_0000) {
            Resolution::Ready(blob) => blob.entry() as usize,
            _ => 0,
        });
        std::thread::sleep(std::time::Duration::from_millis(20));
        entry.publish_ready(blob.clone(), 0x8201_0004);
        assert_eq!(waiter.join().unwrap(), blob.entry() as usize);

        // Later callers take the ready fast path.
        match table.get_or_create(0x8201_0000) {
            Resolution::Ready(ready) => assert_eq!(ready.entry(), blob.entry()),
            _ => panic!("must be ready"),
        }
    }

    #[test]
    fn failure_is_published_to_waiters() {
        let table = EntryTable::new();
        let Resolution::MustResolve(entry) = table.get_or_create(0x1000) else {
            panic!();
        };
        entry.publish_failed();
        assert!(matches!(table.get_or_create(0x1000), Resolution::Failed));
        assert!(table.get_ready(0x1000).is_none());
    }

    #[test]
    fn find_with_address_checks_ranges() {
        let table = EntryTable::new();
        let cache = CodeCache::new();
        let blob = cache.publish(0x1000, &[0xC3], Vec::new()).unwrap();
        let Resolution::MustResolve(entry) = table.get_or_create(0x1000) else {
            panic!();
        };
        entry.publish_ready(blob, 0x100C);
        assert_eq!(table.find_with_address(0x1008).len(), 1);
        assert!(table.find_with_address(0x1010).is_empty());
    }
}
