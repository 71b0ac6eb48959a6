use crate::models::HostRecord;
use serde::{Serialize, Serializer};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError, RwLock};

/// Hosts in insertion order plus an address index into them.
#[derive(Debug, Clone, Default)]
pub(crate) struct HostTable {
    hosts: Vec<Arc<HostRecord>>,
    index: HashMap<String, usize>,
}

impl HostTable {
    pub(crate) fn get(&self, address: &str) -> Option<&HostRecord> {
        self.index.get(address).map(|&i| self.hosts[i].as_ref())
    }

    /// Copy-on-write access: records still referenced by a snapshot are cloned.
    pub(crate) fn get_mut(&mut self, address: &str) -> Option<&mut HostRecord> {
        let i = *self.index.get(address)?;
        Some(Arc::make_mut(&mut self.hosts[i]))
    }

    pub(crate) fn insert(&mut self, record: HostRecord) {
        debug_assert!(!self.index.contains_key(&record.address));
        self.index.insert(record.address.clone(), self.hosts.len());
        self.hosts.push(Arc::new(record));
    }
}

/// The authoritative address -> host map.
///
/// Merges are serialised by `writer` and build the next table off to the side;
/// the finished table is published with a single pointer swap, so a snapshot
/// always sees either all or none of a merge.
#[derive(Debug, Default)]
pub struct HostStore {
    current: RwLock<Arc<HostTable>>,
    writer: Mutex<()>,
}

impl HostStore {
    pub fn new() -> Self {
        HostStore::default()
    }

    pub fn snapshot(&self) -> Snapshot {
        let table = self.current.read().unwrap_or_else(PoisonError::into_inner).clone();
        Snapshot { table }
    }

    /// Run one merge against a private copy of the table and publish it.
    /// Nothing is published when `f` returns `None`.
    pub(crate) fn write<R>(&self, f: impl FnOnce(&mut HostTable) -> Option<R>) -> Option<R> {
        let _guard = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        let base = self.snapshot().table;
        let mut next = HostTable::clone(&base);
        let out = f(&mut next)?;
        *self.current.write().unwrap_or_else(PoisonError::into_inner) = Arc::new(next);
        Some(out)
    }
}

/// Immutable point-in-time view of every host, in insertion order.
#[derive(Debug, Clone)]
pub struct Snapshot {
    table: Arc<HostTable>,
}

impl Snapshot {
    pub fn hosts(&self) -> impl Iterator<Item = &HostRecord> {
        self.table.hosts.iter().map(Arc::as_ref)
    }

    pub fn get(&self, address: &str) -> Option<&HostRecord> {
        self.table.get(address)
    }

    pub fn len(&self) -> usize {
        self.table.hosts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.hosts.is_empty()
    }
}

impl Serialize for Snapshot {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(self.hosts())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_is_isolated_from_later_writes() {
        let store = HostStore::new();
        store.write(|t| {
            t.insert(HostRecord::bare("10.0.0.1"));
            Some(())
        });
        let before = store.snapshot();
        store.write(|t| {
            t.get_mut("10.0.0.1")?.status = "down".into();
            t.insert(HostRecord::bare("10.0.0.2"));
            Some(())
        });
        assert_eq!(before.len(), 1);
        assert_eq!(before.get("10.0.0.1").unwrap().status, "unknown");
        let after = store.snapshot();
        assert_eq!(after.len(), 2);
        assert_eq!(after.get("10.0.0.1").unwrap().status, "down");
    }

    #[test]
    fn aborted_write_publishes_nothing() {
        let store = HostStore::new();
        let out: Option<()> = store.write(|t| {
            t.insert(HostRecord::bare("10.0.0.1"));
            None
        });
        assert!(out.is_none());
        assert!(store.snapshot().is_empty());
    }

    #[test]
    fn insertion_order_is_kept() {
        let store = HostStore::new();
        store.write(|t| {
            for a in ["10.0.0.9", "10.0.0.1", "10.0.0.5"] {
                t.insert(HostRecord::bare(a));
            }
            Some(())
        });
        let order: Vec<_> = store.snapshot().hosts().map(|h| h.address.clone()).collect();
        assert_eq!(order, vec!["10.0.0.9", "10.0.0.1", "10.0.0.5"]);
    }
}
