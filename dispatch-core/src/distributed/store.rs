// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! On-disk persistence for the RC's rules/resources tables and the
//! coordinator's success/error logs.
//!
//! Grounded on `original_source/pygr/coordinator.py`'s `shelve`-backed
//! `getrules`/`getresources`, which re-open the shelf after every write to
//! guarantee durability before replying to the caller. This crate uses a
//! single JSON file per table instead of a `shelve` dbm file, but keeps
//! the same discipline: every mutating method serializes the whole table
//! and `fsync`s it before returning.

use serde::{de::DeserializeOwned, Serialize};
use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::hash::Hash;
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::error::DispatchError;

/// A JSON-file-backed key-value table that flushes to disk on every
/// mutation. Used for the RC's `rules` and `resources` tables.
pub struct FileKvStore<K, V> {
    path: PathBuf,
    entries: HashMap<K, V>,
}

impl<K, V> FileKvStore<K, V>
where
    K: Eq + Hash + Serialize + DeserializeOwned + Clone,
    V: Serialize + DeserializeOwned + Clone,
{
    /// Open (or create) the store at `path`, loading any existing entries.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, DispatchError> {
        let path = path.as_ref().to_path_buf();
        let entries = if path.exists() {
            let data = fs::read_to_string(&path).map_err(|source| DispatchError::Persistence {
                path: path.display().to_string(),
                source,
            })?;
            if data.trim().is_empty() {
                HashMap::new()
            } else {
                serde_json::from_str(&data).unwrap_or_default()
            }
        } else {
            HashMap::new()
        };
        Ok(Self { path, entries })
    }

    /// Look up an entry.
    pub fn get(&self, key: &K) -> Option<&V> {
        self.entries.get(key)
    }

    /// All entries, for status/listing calls.
    pub fn iter(&self) -> impl Iterator<Item = (&K, &V)> {
        self.entries.iter()
    }

    /// Insert or update an entry and flush to disk immediately.
    pub fn set(&mut self, key: K, value: V) -> Result<(), DispatchError> {
        self.entries.insert(key, value);
        self.flush()
    }

    /// Remove an entry (if present) and flush to disk immediately.
    pub fn remove(&mut self, key: &K) -> Result<(), DispatchError> {
        self.entries.remove(key);
        self.flush()
    }

    fn flush(&self) -> Result<(), DispatchError> {
        let data =
            serde_json::to_vec_pretty(&self.entries).map_err(DispatchError::from)?;
        let mut file =
            File::create(&self.path).map_err(|source| DispatchError::Persistence {
                path: self.path.display().to_string(),
                source,
            })?;
        file.write_all(&data)
            .and_then(|_| file.sync_all())
            .map_err(|source| DispatchError::Persistence {
                path: self.path.display().to_string(),
                source,
            })
    }
}

/// The RC's persisted host inventory: plain-text `host maxLoad` lines, one
/// per host, matching the format original_source reads with
/// `line.split()`.
pub struct HostStore {
    path: PathBuf,
}

impl HostStore {
    /// Point at (but do not yet read) a hosts file.
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    /// Load the current host list, tolerating a missing file (an empty
    /// fleet is valid).
    pub fn load(&self) -> Result<HashMap<String, f64>, DispatchError> {
        if !self.path.exists() {
            return Ok(HashMap::new());
        }
        let data = fs::read_to_string(&self.path).map_err(|source| DispatchError::Persistence {
            path: self.path.display().to_string(),
            source,
        })?;
        let mut hosts = HashMap::new();
        for line in data.lines() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let mut parts = line.split_whitespace();
            if let (Some(name), Some(load_str)) = (parts.next(), parts.next()) {
                if let Ok(max_load) = load_str.parse::<f64>() {
                    hosts.insert(name.to_string(), max_load);
                }
            }
        }
        Ok(hosts)
    }

    /// Overwrite the hosts file with the given inventory.
    pub fn save(&self, hosts: &HashMap<String, f64>) -> Result<(), DispatchError> {
        let mut names: Vec<&String> = hosts.keys().collect();
        names.sort();
        let mut contents = String::new();
        for name in names {
            contents.push_str(&format!("{} {}\n", name, hosts[name]));
        }
        let mut file =
            File::create(&self.path).map_err(|source| DispatchError::Persistence {
                path: self.path.display().to_string(),
                source,
            })?;
        file.write_all(contents.as_bytes())
            .and_then(|_| file.sync_all())
            .map_err(|source| DispatchError::Persistence {
                path: self.path.display().to_string(),
                source,
            })
    }
}

/// Append-only log used for the coordinator's success log
/// (`already_done`), and truncate-on-start log used for the error log,
/// matching original_source's `open(..., 'a')` / `open(..., 'w')` split.
pub struct AppendLog {
    path: PathBuf,
}

impl AppendLog {
    /// Open (creating if necessary) an append-only log.
    pub fn open_append(path: impl AsRef<Path>) -> Result<Self, DispatchError> {
        let path = path.as_ref().to_path_buf();
        OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|source| DispatchError::Persistence {
                path: path.display().to_string(),
                source,
            })?;
        Ok(Self { path })
    }

    /// Truncate (or create) a log, discarding any prior contents —
    /// matches `unregister_client`'s fresh error log per run.
    pub fn open_truncated(path: impl AsRef<Path>) -> Result<Self, DispatchError> {
        let path = path.as_ref().to_path_buf();
        File::create(&path).map_err(|source| DispatchError::Persistence {
            path: path.display().to_string(),
            source,
        })?;
        Ok(Self { path })
    }

    /// Append one line, flushing before returning.
    pub fn append_line(&self, line: &str) -> Result<(), DispatchError> {
        let mut file = OpenOptions::new().append(true).open(&self.path).map_err(
            |source| DispatchError::Persistence {
                path: self.path.display().to_string(),
                source,
            },
        )?;
        writeln!(file, "{line}").and_then(|_| file.sync_all()).map_err(|source| {
            DispatchError::Persistence {
                path: self.path.display().to_string(),
                source,
            }
        })
    }

    /// Read back every line already recorded (used to rebuild the
    /// `already_done` set on coordinator restart).
    pub fn read_lines(&self) -> Result<Vec<String>, DispatchError> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let data = fs::read_to_string(&self.path).map_err(|source| DispatchError::Persistence {
            path: self.path.display().to_string(),
            source,
        })?;
        Ok(data.lines().map(str::to_string).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_file_kv_store_roundtrip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("rules.json");

        {
            let mut store: FileKvStore<String, String> = FileKvStore::open(&path).unwrap();
            store.set("build_index".into(), "make index".into()).unwrap();
        }

        let store: FileKvStore<String, String> = FileKvStore::open(&path).unwrap();
        assert_eq!(store.get(&"build_index".to_string()).unwrap(), "make index");
    }

    #[test]
    fn test_file_kv_store_remove() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("resources.json");

        let mut store: FileKvStore<String, u32> = FileKvStore::open(&path).unwrap();
        store.set("a".into(), 1).unwrap();
        store.remove(&"a".to_string()).unwrap();
        assert!(store.get(&"a".to_string()).is_none());
    }

    #[test]
    fn test_host_store_roundtrip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("hosts.txt");
        let store = HostStore::new(&path);

        let mut hosts = HashMap::new();
        hosts.insert("host1".to_string(), 8.0);
        hosts.insert("host2".to_string(), 16.0);
        store.save(&hosts).unwrap();

        let loaded = store.load().unwrap();
        assert_eq!(loaded.get("host1"), Some(&8.0));
        assert_eq!(loaded.get("host2"), Some(&16.0));
    }

    #[test]
    fn test_host_store_missing_file_is_empty() {
        let dir = TempDir::new().unwrap();
        let store = HostStore::new(dir.path().join("missing.txt"));
        assert!(store.load().unwrap().is_empty());
    }

    #[test]
    fn test_append_log() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("success.log");
        let log = AppendLog::open_append(&path).unwrap();
        log.append_line("task-1").unwrap();
        log.append_line("task-2").unwrap();

        let lines = log.read_lines().unwrap();
        assert_eq!(lines, vec!["task-1", "task-2"]);
    }

    #[test]
    fn test_truncated_log_discards_prior_contents() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("errors.log");
        {
            let log = AppendLog::open_append(&path).unwrap();
            log.append_line("stale error").unwrap();
        }
        let log = AppendLog::open_truncated(&path).unwrap();
        assert!(log.read_lines().unwrap().is_empty());
    }
}
