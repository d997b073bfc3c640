//! Filesystem-backed object store.
//!
//! Each key maps to a file under the store root. Writes go to `{path}.tmp`
//! and are renamed into place, so a crashed write never leaves a partial
//! object under its final key.

use super::{validate_key, ObjectEntry, ObjectStore, StorageError};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

const TMP_SUFFIX: &str = ".tmp";

pub struct LocalObjectStore {
    root: PathBuf,
}

impl LocalObjectStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, key: &str) -> Result<PathBuf, StorageError> {
        validate_key(key)?;
        let mut path = self.root.clone();
        path.extend(key.split('/'));
        Ok(path)
    }

    /// Directory to start walking from: the deepest complete directory in `prefix`.
    fn walk_start(&self, prefix: &str) -> (PathBuf, String) {
        match prefix.rfind('/') {
            Some(idx) => {
                let dir_part = &prefix[..idx];
                let mut dir = self.root.clone();
                dir.extend(dir_part.split('/').filter(|s| !s.is_empty()));
                (dir, format!("{dir_part}/"))
            }
            None => (self.root.clone(), String::new()),
        }
    }
}

impl ObjectStore for LocalObjectStore {
    fn name(&self) -> &str {
        "local"
    }

    fn list(&self, prefix: &str) -> Result<Vec<ObjectEntry>, StorageError> {
        let (start, key_base) = self.walk_start(prefix);
        let mut entries = Vec::new();
        match fs::metadata(&start) {
            Ok(meta) if meta.is_dir() => {}
            Ok(_) => return Ok(entries),
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(entries),
            Err(e) => return Err(StorageError::from_io(prefix, e)),
        }
        walk(&start, &key_base, prefix, &mut entries)?;
        entries.sort();
        Ok(entries)
    }

    fn exists(&self, key: &str) -> Result<bool, StorageError> {
        let path = self.path_for(key)?;
        match fs::metadata(&path) {
            Ok(meta) => Ok(meta.is_file()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(StorageError::from_io(key, e)),
        }
    }

    fn put(&self, key: &str, bytes: &[u8]) -> Result<(), StorageError> {
        let path = self.path_for(key)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| StorageError::from_io(key, e))?;
        }

        let mut tmp = path.clone().into_os_string();
        tmp.push(TMP_SUFFIX);
        let tmp = PathBuf::from(tmp);

        fs::write(&tmp, bytes).map_err(|e| StorageError::from_io(key, e))?;
        fs::rename(&tmp, &path).map_err(|e| {
            let _ = fs::remove_file(&tmp);
            StorageError::from_io(key, e)
        })
    }

    fn get(&self, key: &str) -> Result<Vec<u8>, StorageError> {
        let path = self.path_for(key)?;
        fs::read(&path).map_err(|e| StorageError::from_io(key, e))
    }
}

fn walk(
    dir: &Path,
    key_base: &str,
    prefix: &str,
    out: &mut Vec<ObjectEntry>,
) -> Result<(), StorageError> {
    let read = fs::read_dir(dir).map_err(|e| StorageError::from_io(key_base, e))?;
    for entry in read {
        let entry = entry.map_err(|e| StorageError::from_io(key_base, e))?;
        let name = entry.file_name();
        let Some(name) = name.to_str() else {
            continue;
        };
        let key = format!("{key_base}{name}");
        let meta = entry.metadata().map_err(|e| StorageError::from_io(&key, e))?;

        if meta.is_dir() {
            let child_base = format!("{key}/");
            // Only descend where the prefix can still match
            if child_base.starts_with(prefix) || prefix.starts_with(&child_base) {
                walk(&entry.path(), &child_base, prefix, out)?;
            }
        } else if !name.ends_with(TMP_SUFFIX) && key.starts_with(prefix) {
            out.push(ObjectEntry {
                key,
                size_bytes: meta.len(),
            });
        }
    }
    Ok(())
}
