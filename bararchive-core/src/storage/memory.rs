//! In-memory object store for tests and dry runs.

use super::{validate_key, ObjectEntry, ObjectStore, StorageError};
use std::collections::{BTreeMap, BTreeSet};
use std::io;
use std::sync::RwLock;

/// Object store held in a sorted map.
///
/// Failures can be injected per key (`fail_puts_for`) or for every listing
/// (`fail_listings_with`) to exercise error paths.
#[derive(Debug, Default)]
pub struct MemoryObjectStore {
    objects: RwLock<BTreeMap<String, Vec<u8>>>,
    failing_puts: RwLock<BTreeSet<String>>,
    listing_failure: RwLock<Option<io::ErrorKind>>,
}

impl MemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every `put` to `key` fail with a non-transient I/O error.
    pub fn fail_puts_for(&self, key: impl Into<String>) {
        self.failing_puts.write().unwrap().insert(key.into());
    }

    /// Make every `list` fail with an error of the given kind.
    pub fn fail_listings_with(&self, kind: io::ErrorKind) {
        *self.listing_failure.write().unwrap() = Some(kind);
    }

    pub fn keys(&self) -> Vec<String> {
        self.objects.read().unwrap().keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.objects.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl ObjectStore for MemoryObjectStore {
    fn name(&self) -> &str {
        "memory"
    }

    fn list(&self, prefix: &str) -> Result<Vec<ObjectEntry>, StorageError> {
        if let Some(kind) = *self.listing_failure.read().unwrap() {
            return Err(StorageError::from_io(prefix, io::Error::from(kind)));
        }
        let objects = self.objects.read().unwrap();
        Ok(objects
            .range(prefix.to_string()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, v)| ObjectEntry {
                key: k.clone(),
                size_bytes: v.len() as u64,
            })
            .collect())
    }

    fn exists(&self, key: &str) -> Result<bool, StorageError> {
        validate_key(key)?;
        Ok(self.objects.read().unwrap().contains_key(key))
    }

    fn put(&self, key: &str, bytes: &[u8]) -> Result<(), StorageError> {
        validate_key(key)?;
        if self.failing_puts.read().unwrap().contains(key) {
            return Err(StorageError::Io {
                key: key.to_string(),
                source: io::Error::new(io::ErrorKind::Other, "injected write failure"),
            });
        }
        self.objects
            .write()
            .unwrap()
            .insert(key.to_string(), bytes.to_vec());
        Ok(())
    }

    fn get(&self, key: &str) -> Result<Vec<u8>, StorageError> {
        validate_key(key)?;
        self.objects
            .read()
            .unwrap()
            .get(key)
            .cloned()
            .ok_or_else(|| StorageError::NotFound {
                key: key.to_string(),
            })
    }
}
