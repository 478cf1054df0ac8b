//! Pool document persistence.
//!
//! The document is an ordered YAML mapping from consumer name to a flat
//! list of record strings. Everything outside the list being mutated is
//! carried as opaque values, so unrelated consumers' entries and their
//! ordering survive a rewrite untouched.

use std::fs;
use std::path::{Path, PathBuf};

use serde_yaml::{Mapping, Value};

use crate::error::{Error, Result};

/// In-memory copy of the whole pool document.
#[derive(Debug, Clone, Default)]
pub struct PoolDocument {
    root: Mapping,
}

impl PoolDocument {
    /// An empty document with no consumers.
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads the document at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConfigMissing`] when the file does not exist and
    /// [`Error::ConfigParse`] when it cannot be parsed. Neither mutates
    /// anything.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = match fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Err(Error::ConfigMissing {
                    path: path.to_path_buf(),
                });
            }
            Err(err) => return Err(err.into()),
        };

        let root: Mapping = serde_yaml::from_str(&raw).map_err(|source| Error::ConfigParse {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(Self { root })
    }

    /// Record strings for one consumer, in document order. A missing
    /// consumer yields an empty list.
    pub fn records(&self, consumer: &str) -> Vec<String> {
        match self.root.get(consumer) {
            Some(Value::Sequence(entries)) => entries
                .iter()
                .filter_map(|entry| entry.as_str().map(String::from))
                .collect(),
            _ => Vec::new(),
        }
    }

    /// Replaces one consumer's record list, leaving the rest of the
    /// document untouched. An existing key keeps its position.
    pub fn set_records(&mut self, consumer: &str, records: Vec<String>) {
        let list = Value::Sequence(records.into_iter().map(Value::String).collect());
        self.root.insert(Value::String(consumer.to_string()), list);
    }

    /// Serializes the document back to YAML.
    pub fn to_yaml(&self) -> Result<String> {
        Ok(serde_yaml::to_string(&self.root)?)
    }
}

/// Writes the document atomically: serialize next to the target, then
/// rename over it. A failed write leaves the previous document intact.
pub fn write_document(path: &Path, doc: &PoolDocument) -> Result<()> {
    let yaml = doc.to_yaml()?;
    let tmp = tmp_path(path);
    fs::write(&tmp, yaml.as_bytes())?;
    if let Err(err) = fs::rename(&tmp, path) {
        let _ = fs::remove_file(&tmp);
        return Err(err.into());
    }
    Ok(())
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut os = path.as_os_str().to_os_string();
    os.push(".tmp");
    PathBuf::from(os)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_of_missing_file_reports_config_missing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent.yaml");
        assert!(matches!(
            PoolDocument::load(&path),
            Err(Error::ConfigMissing { .. })
        ));
    }

    #[test]
    fn load_of_unparseable_file_reports_config_parse() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.yaml");
        fs::write(&path, "- just\n- a list\n").unwrap();
        assert!(matches!(
            PoolDocument::load(&path),
            Err(Error::ConfigParse { .. })
        ));
    }

    #[test]
    fn round_trips_consumer_records() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("accounts.yaml");

        let mut doc = PoolDocument::new();
        doc.set_records("login", vec!["alice|p1|s1".into(), "bob|p2|s2".into()]);
        write_document(&path, &doc).unwrap();

        let reloaded = PoolDocument::load(&path).unwrap();
        assert_eq!(reloaded.records("login"), vec!["alice|p1|s1", "bob|p2|s2"]);
        assert!(reloaded.records("other").is_empty());
    }

    #[test]
    fn rewrite_preserves_other_consumers_and_order() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("accounts.yaml");
        fs::write(
            &path,
            "warmup:\n- x|y|z\nlogin:\n- alice|p1|s1\nfollow:\n- c|d|e\n",
        )
        .unwrap();

        let mut doc = PoolDocument::load(&path).unwrap();
        doc.set_records("login", vec![]);
        write_document(&path, &doc).unwrap();

        let raw = fs::read_to_string(&path).unwrap();
        let warmup = raw.find("warmup").unwrap();
        let login = raw.find("login").unwrap();
        let follow = raw.find("follow").unwrap();
        assert!(warmup < login && login < follow);
        assert!(raw.contains("x|y|z"));
        assert!(raw.contains("c|d|e"));
    }

    #[test]
    fn write_leaves_no_temp_file_behind() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("accounts.yaml");

        let mut doc = PoolDocument::new();
        doc.set_records("login", vec!["alice|p1|s1".into()]);
        write_document(&path, &doc).unwrap();

        assert!(path.exists());
        assert!(!tmp_path(&path).exists());
    }
}
