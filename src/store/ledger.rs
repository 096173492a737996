//! Open-Trade Ledger
//!
//! Persists, per open position, the feature snapshot that produced it, keyed
//! by broker order id. The document is a JSON object
//! `{ "<order id>": { "<feature>": value, ... } }`; every mutation rewrites it
//! through a temp file in the same directory that is fsynced and renamed over
//! the old one.

use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use super::StoreError;
use crate::strategy::FeatureSnapshot;

pub struct OpenTradeLedger {
    path: PathBuf,
    entries: BTreeMap<u64, FeatureSnapshot>,
}

impl OpenTradeLedger {
    /// Load the ledger at `path`.
    ///
    /// A missing file is an empty ledger. An unreadable document is moved
    /// aside to `<path>.corrupt-<UTC timestamp>` and the ledger starts empty,
    /// even if the move itself fails.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();

        let entries = match fs::read_to_string(&path) {
            Ok(text) if text.trim().is_empty() => BTreeMap::new(),
            Ok(text) => match parse_document(&text) {
                Ok(entries) => entries,
                Err(reason) => {
                    warn!("Ledger {} is corrupt ({}); starting empty", path.display(), reason);
                    move_aside(&path, &corrupt_path(&path, Utc::now()));
                    BTreeMap::new()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(source) => return Err(StoreError::Io { path, source }),
        };

        debug!("Ledger {} holds {} open trades", path.display(), entries.len());
        Ok(Self { path, entries })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, order_id: u64) -> bool {
        self.entries.contains_key(&order_id)
    }

    pub fn get(&self, order_id: u64) -> Option<&FeatureSnapshot> {
        self.entries.get(&order_id)
    }

    /// Order ids and snapshots, ascending by id
    pub fn all(&self) -> impl Iterator<Item = (u64, &FeatureSnapshot)> {
        self.entries.iter().map(|(id, snapshot)| (*id, snapshot))
    }

    /// Record the snapshot for a freshly filled order and persist
    pub fn put(&mut self, order_id: u64, snapshot: FeatureSnapshot) -> Result<(), StoreError> {
        if self.entries.contains_key(&order_id) {
            return Err(StoreError::DuplicateOrder(order_id));
        }
        self.entries.insert(order_id, snapshot);
        if let Err(e) = self.persist() {
            self.entries.remove(&order_id);
            return Err(e);
        }
        Ok(())
    }

    /// Drop an entry and persist. Removing an absent id is a no-op.
    pub fn remove(&mut self, order_id: u64) -> Result<bool, StoreError> {
        let Some(snapshot) = self.entries.remove(&order_id) else {
            return Ok(false);
        };
        if let Err(e) = self.persist() {
            self.entries.insert(order_id, snapshot);
            return Err(e);
        }
        Ok(true)
    }

    fn persist(&self) -> Result<(), StoreError> {
        let document: BTreeMap<String, &FeatureSnapshot> = self
            .entries
            .iter()
            .map(|(id, snapshot)| (id.to_string(), snapshot))
            .collect();
        let json = serde_json::to_vec_pretty(&document)?;

        let io_err = |source| StoreError::Io {
            path: self.path.clone(),
            source,
        };

        let dir = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        let mut tmp = tempfile::NamedTempFile::new_in(dir).map_err(io_err)?;
        tmp.write_all(&json).map_err(io_err)?;
        tmp.as_file().sync_all().map_err(io_err)?;
        tmp.persist(&self.path).map_err(|e| io_err(e.error))?;
        Ok(())
    }
}

fn parse_document(text: &str) -> Result<BTreeMap<u64, FeatureSnapshot>, String> {
    let raw: BTreeMap<String, FeatureSnapshot> =
        serde_json::from_str(text).map_err(|e| e.to_string())?;
    raw.into_iter()
        .map(|(key, snapshot)| {
            key.parse::<u64>()
                .map(|id| (id, snapshot))
                .map_err(|_| format!("order id '{key}' is not numeric"))
        })
        .collect()
}

/// First free `<path>.corrupt-<stamp>[-n]` name
fn corrupt_path(path: &Path, now: DateTime<Utc>) -> PathBuf {
    let mut base = path.as_os_str().to_owned();
    base.push(format!(".corrupt-{}", now.format("%Y%m%dT%H%M%S%.6fZ")));

    let mut candidate = PathBuf::from(&base);
    let mut n = 1;
    while candidate.exists() {
        let mut name = base.clone();
        name.push(format!("-{n}"));
        candidate = PathBuf::from(name);
        n += 1;
    }
    candidate
}

/// Rename a corrupt ledger out of the way. Failure is logged and tolerated.
fn move_aside(path: &Path, aside: &Path) -> bool {
    match fs::rename(path, aside) {
        Ok(()) => {
            warn!("Moved corrupt ledger to {}", aside.display());
            true
        }
        Err(e) => {
            warn!("Could not move corrupt ledger {} aside: {}", path.display(), e);
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn snapshot(pairs: &[(&str, f64)]) -> FeatureSnapshot {
        pairs.iter().map(|(k, v)| (k.to_string(), *v)).collect()
    }

    #[test]
    fn test_missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = OpenTradeLedger::open(dir.path().join("open_trades.json")).unwrap();
        assert!(ledger.is_empty());
    }

    #[test]
    fn test_put_survives_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("open_trades.json");

        let mut ledger = OpenTradeLedger::open(&path).unwrap();
        ledger.put(42, snapshot(&[("close", 2001.5), ("signal", 1.0)])).unwrap();

        let reloaded = OpenTradeLedger::open(&path).unwrap();
        assert_eq!(reloaded.len(), 1);
        assert_eq!(reloaded.get(42).unwrap().get("close"), Some(&2001.5));

        let raw: serde_json::Value = serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(raw["42"]["signal"], 1.0);
    }

    #[test]
    fn test_duplicate_put_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let mut ledger = OpenTradeLedger::open(dir.path().join("l.json")).unwrap();
        ledger.put(7, snapshot(&[("close", 1.0)])).unwrap();
        let err = ledger.put(7, snapshot(&[("close", 2.0)])).unwrap_err();
        assert!(matches!(err, StoreError::DuplicateOrder(7)));
        assert_eq!(ledger.get(7).unwrap().get("close"), Some(&1.0));
    }

    #[test]
    fn test_remove_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("l.json");
        let mut ledger = OpenTradeLedger::open(&path).unwrap();
        ledger.put(1, snapshot(&[("close", 1.0)])).unwrap();

        assert!(ledger.remove(1).unwrap());
        assert!(!ledger.remove(1).unwrap());
        assert!(OpenTradeLedger::open(&path).unwrap().is_empty());
    }

    #[test]
    fn test_corrupt_document_is_moved_aside() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("l.json");
        fs::write(&path, "{\"42\": {\"close\": ").unwrap();

        let ledger = OpenTradeLedger::open(&path).unwrap();
        assert!(ledger.is_empty());
        assert!(!path.exists());
        assert_eq!(aside_files(dir.path()).len(), 1);
    }

    fn aside_files(dir: &Path) -> Vec<String> {
        let mut names: Vec<String> = fs::read_dir(dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .filter(|n| n.starts_with("l.json.corrupt-"))
            .collect();
        names.sort();
        names
    }

    #[test]
    fn test_repeated_corruption_keeps_every_copy() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("l.json");

        fs::write(&path, "first").unwrap();
        assert!(OpenTradeLedger::open(&path).unwrap().is_empty());
        fs::write(&path, "second").unwrap();
        assert!(OpenTradeLedger::open(&path).unwrap().is_empty());

        let names = aside_files(dir.path());
        assert_eq!(names.len(), 2);
        let contents: Vec<String> = names
            .iter()
            .map(|n| fs::read_to_string(dir.path().join(n)).unwrap())
            .collect();
        assert!(contents.contains(&"first".to_string()));
        assert!(contents.contains(&"second".to_string()));
    }

    #[test]
    fn test_corrupt_name_avoids_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("l.json");
        let now = Utc.with_ymd_and_hms(2024, 3, 4, 5, 6, 7).unwrap();

        let first = corrupt_path(&path, now);
        assert!(first.to_string_lossy().ends_with("l.json.corrupt-20240304T050607.000000Z"));
        fs::write(&first, "x").unwrap();
        let second = corrupt_path(&path, now);
        assert!(second.to_string_lossy().ends_with("Z-1"));
    }

    #[test]
    fn test_failed_move_still_yields_usable_ledger() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("l.json");
        fs::write(&path, "not json").unwrap();

        // A non-empty directory cannot be replaced by a file
        let blocked = dir.path().join("blocked");
        fs::create_dir(&blocked).unwrap();
        fs::write(blocked.join("keep"), "").unwrap();
        assert!(!move_aside(&path, &blocked));
        assert!(path.exists());

        let mut ledger = OpenTradeLedger::open(&path).unwrap();
        assert!(ledger.is_empty());
        ledger.put(7, snapshot(&[("close", 1.0)])).unwrap();
        assert!(OpenTradeLedger::open(&path).unwrap().contains(7));
    }

    #[test]
    fn test_non_numeric_key_is_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("l.json");
        fs::write(&path, r#"{"abc": {"close": 1.0}}"#).unwrap();
        assert!(OpenTradeLedger::open(&path).unwrap().is_empty());
    }

    #[test]
    fn test_all_is_ordered() {
        let dir = tempfile::tempdir().unwrap();
        let mut ledger = OpenTradeLedger::open(dir.path().join("l.json")).unwrap();
        ledger.put(9, FeatureSnapshot::new()).unwrap();
        ledger.put(3, FeatureSnapshot::new()).unwrap();
        let ids: Vec<u64> = ledger.all().map(|(id, _)| id).collect();
        assert_eq!(ids, vec![3, 9]);
    }
}
