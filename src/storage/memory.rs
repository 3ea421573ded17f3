use dashmap::DashMap;
use std::collections::HashMap;

use super::Store;
use super::types::{Item, StoreError};

/// Version history of one key.
///
/// `items` is kept sorted by version. `committed_floor` remembers the highest
/// version ever committed for the key, which survives even after older items
/// are garbage-collected; commits at or below the floor are treated as
/// idempotent no-ops.
#[derive(Debug, Default)]
struct KeyVersions {
    items: Vec<Item>,
    committed_floor: u64,
}

/// In-memory storage backend.
///
/// Per-key operations are serialized by the map entry they touch, so writers
/// for distinct keys proceed in parallel. Nothing is persisted; a restarted
/// node rebuilds its view through the catch-up protocol.
#[derive(Debug, Default)]
pub struct MemStore {
    keys: DashMap<String, KeyVersions>,
}

impl MemStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn collect<F>(&self, keep: F) -> Vec<Item>
    where
        F: Fn(&Item) -> bool,
    {
        let mut out = Vec::new();
        for entry in self.keys.iter() {
            out.extend(entry.value().items.iter().filter(|item| keep(item)).cloned());
        }
        out
    }

    fn collect_newer<F>(&self, known: &HashMap<String, Vec<u64>>, keep: F) -> Vec<Item>
    where
        F: Fn(&Item) -> bool,
    {
        let mut out = Vec::new();
        for entry in self.keys.iter() {
            let newest_known = known
                .get(entry.key())
                .and_then(|versions| versions.iter().max())
                .copied()
                .unwrap_or(0);
            out.extend(
                entry
                    .value()
                    .items
                    .iter()
                    .filter(|item| item.version > newest_known && keep(item))
                    .cloned(),
            );
        }
        out
    }
}

impl Store for MemStore {
    fn read(&self, key: &str) -> Result<Item, StoreError> {
        let entry = self.keys.get(key).ok_or(StoreError::NotFound)?;
        if let Some(item) = entry.items.iter().rev().find(|item| item.committed) {
            return Ok(item.clone());
        }
        if entry.items.is_empty() {
            Err(StoreError::NotFound)
        } else {
            Err(StoreError::Dirty)
        }
    }

    fn read_version(&self, key: &str, version: u64) -> Result<Item, StoreError> {
        let entry = self.keys.get(key).ok_or(StoreError::NotFound)?;
        entry
            .items
            .iter()
            .find(|item| item.version == version)
            .cloned()
            .ok_or(StoreError::NotFound)
    }

    fn write(&self, key: &str, value: Vec<u8>, version: u64) -> Result<(), StoreError> {
        let mut entry = self.keys.entry(key.to_string()).or_default();
        if version <= entry.committed_floor
            || entry.items.iter().any(|item| item.version == version)
        {
            return Err(StoreError::VersionExists {
                key: key.to_string(),
                version,
            });
        }

        let pos = entry.items.partition_point(|item| item.version < version);
        entry.items.insert(
            pos,
            Item {
                key: key.to_string(),
                version,
                committed: false,
                value,
            },
        );
        Ok(())
    }

    fn commit(&self, key: &str, version: u64) -> Result<(), StoreError> {
        let mut entry = self.keys.get_mut(key).ok_or(StoreError::NotFound)?;
        if version <= entry.committed_floor {
            // Already committed, or superseded by a newer committed version.
            return Ok(());
        }

        let Some(item) = entry.items.iter_mut().find(|item| item.version == version) else {
            return Err(StoreError::NotFound);
        };
        item.committed = true;
        entry.committed_floor = version;
        // Everything older is superseded now.
        entry.items.retain(|item| item.version >= version);
        Ok(())
    }

    fn all_dirty(&self) -> Result<Vec<Item>, StoreError> {
        Ok(self.collect(|item| !item.committed))
    }

    fn all_committed(&self) -> Result<Vec<Item>, StoreError> {
        Ok(self.collect(|item| item.committed))
    }

    fn all_newer_dirty(&self, known: &HashMap<String, Vec<u64>>) -> Result<Vec<Item>, StoreError> {
        Ok(self.collect_newer(known, |item| !item.committed))
    }

    fn all_newer_committed(
        &self,
        known: &HashMap<String, Vec<u64>>,
    ) -> Result<Vec<Item>, StoreError> {
        Ok(self.collect_newer(known, |item| item.committed))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_basic_commit_cycle() {
        let store = MemStore::new();

        store.write("k", b"v".to_vec(), 1).unwrap();
        assert_eq!(store.read("k"), Err(StoreError::Dirty));

        store.commit("k", 1).unwrap();
        let item = store.read("k").unwrap();
        assert_eq!(item.version, 1);
        assert_eq!(item.value, b"v".to_vec());
        assert!(item.committed);
    }
}
