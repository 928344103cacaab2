//! Deployment record persistence.

use std::{
    collections::BTreeMap,
    fmt,
    future::Future,
    io::Write,
    path::{Path, PathBuf},
    str::FromStr,
    sync::Mutex,
};

use alloy_core::primitives::Address;
use anyhow::{Context, Result};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::DeploymentVersion;

/// Suffix of the version sidecar stored next to each record.
pub const VERSION_SUFFIX: &str = ".version";

/// The persisted outcome of one completed pipeline run.
///
/// A flat mapping from logical keys (`token`, `genesis`, `claimer`, ...) to the addresses
/// deployed in that run. Serialized as a JSON object of checksummed addresses, keys sorted.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeploymentRecord(BTreeMap<String, Address>);

impl DeploymentRecord {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set `key` to `address`, replacing any previous value.
    pub fn insert(&mut self, key: impl Into<String>, address: Address) {
        self.0.insert(key.into(), address);
    }

    pub fn get(&self, key: &str) -> Option<Address> {
        self.0.get(key).copied()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, Address)> {
        self.0.iter().map(|(k, v)| (k.as_str(), *v))
    }
}

impl<K: Into<String>> FromIterator<(K, Address)> for DeploymentRecord {
    fn from_iter<I: IntoIterator<Item = (K, Address)>>(iter: I) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }
}

impl fmt::Display for DeploymentRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            return write!(f, "none");
        }
        let entries: Vec<String> = self
            .0
            .iter()
            .map(|(key, address)| format!("{key}={}", address.to_checksum(None)))
            .collect();
        write!(f, "{}", entries.join(", "))
    }
}

impl Serialize for DeploymentRecord {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let checksummed: BTreeMap<&str, String> = self
            .0
            .iter()
            .map(|(k, v)| (k.as_str(), v.to_checksum(None)))
            .collect();
        checksummed.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for DeploymentRecord {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = BTreeMap::<String, String>::deserialize(deserializer)?;
        raw.into_iter()
            .map(|(key, value)| {
                Address::from_str(&value)
                    .map(|address| (key.clone(), address))
                    .map_err(|e| {
                        serde::de::Error::custom(format!("invalid address for `{key}`: {e}"))
                    })
            })
            .collect::<Result<BTreeMap<_, _>, _>>()
            .map(Self)
    }
}

/// Durable storage for deployment records, keyed by record name.
///
/// `load` is a pure read that yields `None` when nothing was recorded yet. `save` must be
/// all-or-nothing: either the whole record lands or the previous state stays intact.
/// Implementations are not expected to serialize concurrent writers.
pub trait RecordStore: Send + Sync {
    /// Load the record stored under `name`, if any.
    fn load(&self, name: &str) -> impl Future<Output = Result<Option<DeploymentRecord>>> + Send;

    /// Replace the record stored under `name`.
    fn save(
        &self,
        name: &str,
        record: &DeploymentRecord,
    ) -> impl Future<Output = Result<()>> + Send;

    /// Load the version metadata written alongside `name`.
    fn load_version(
        &self,
        _name: &str,
    ) -> impl Future<Output = Result<Option<DeploymentVersion>>> + Send {
        async { Ok(None) }
    }

    /// Write the version metadata for `name`.
    fn save_version(
        &self,
        _name: &str,
        _version: &DeploymentVersion,
    ) -> impl Future<Output = Result<()>> + Send {
        async { Ok(()) }
    }
}

/// Record store backed by one JSON file per record in a directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileRecordStore {
    root: PathBuf,
}

impl FileRecordStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path of the file backing `name`.
    ///
    /// Record names are plain file names; anything that could escape the root is rejected.
    pub fn record_path(&self, name: &str) -> Result<PathBuf> {
        if name.is_empty()
            || name == "."
            || name == ".."
            || name.contains(['/', '\\'])
        {
            anyhow::bail!("Invalid record name: '{}'", name);
        }
        Ok(self.root.join(name))
    }

    fn version_path(&self, name: &str) -> Result<PathBuf> {
        self.record_path(&format!("{name}{VERSION_SUFFIX}"))
    }

    fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<Option<T>> {
        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(e).context(format!("Failed to read {}", path.display()));
            }
        };

        let value = serde_json::from_str(&content)
            .context(format!("Failed to parse {} as JSON", path.display()))?;
        Ok(Some(value))
    }

    /// Write `value` to `path` through a temp file in the same directory and an atomic rename.
    fn write_json_atomic<T: Serialize>(&self, path: &Path, value: &T) -> Result<()> {
        let json = serde_json::to_string_pretty(value).context("Failed to serialize JSON")?;

        std::fs::create_dir_all(&self.root).context(format!(
            "Failed to create record directory {}",
            self.root.display()
        ))?;

        let mut tmp = tempfile::NamedTempFile::new_in(&self.root)
            .context("Failed to create temporary record file")?;
        tmp.write_all(json.as_bytes())
            .context("Failed to write temporary record file")?;
        tmp.as_file()
            .sync_all()
            .context("Failed to flush temporary record file")?;
        tmp.persist(path)
            .map_err(|e| e.error)
            .context(format!("Failed to move record into place at {}", path.display()))?;

        Ok(())
    }
}

impl RecordStore for FileRecordStore {
    async fn load(&self, name: &str) -> Result<Option<DeploymentRecord>> {
        let path = self.record_path(name)?;
        let record = Self::read_json(&path)?;
        tracing::debug!(path = %path.display(), found = record.is_some(), "Loaded deployment record");
        Ok(record)
    }

    async fn save(&self, name: &str, record: &DeploymentRecord) -> Result<()> {
        let path = self.record_path(name)?;
        self.write_json_atomic(&path, record)?;
        tracing::info!(path = %path.display(), "Deployment record saved");
        Ok(())
    }

    async fn load_version(&self, name: &str) -> Result<Option<DeploymentVersion>> {
        Self::read_json(&self.version_path(name)?)
    }

    async fn save_version(&self, name: &str, version: &DeploymentVersion) -> Result<()> {
        let path = self.version_path(name)?;
        self.write_json_atomic(&path, version)
    }
}

/// In-memory record store, for dry runs and tests.
#[derive(Debug, Default)]
pub struct MemoryRecordStore {
    records: Mutex<BTreeMap<String, DeploymentRecord>>,
    versions: Mutex<BTreeMap<String, DeploymentVersion>>,
    saves: Mutex<usize>,
}

impl MemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed the store with an existing record.
    pub fn with_record(self, name: impl Into<String>, record: DeploymentRecord) -> Self {
        self.records
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(name.into(), record);
        self
    }

    /// Snapshot of the record stored under `name`.
    pub fn get(&self, name: &str) -> Option<DeploymentRecord> {
        self.records
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(name)
            .cloned()
    }

    /// Number of successful `save` calls so far.
    pub fn save_count(&self) -> usize {
        *self.saves.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl RecordStore for MemoryRecordStore {
    async fn load(&self, name: &str) -> Result<Option<DeploymentRecord>> {
        Ok(self.get(name))
    }

    async fn save(&self, name: &str, record: &DeploymentRecord) -> Result<()> {
        self.records
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(name.to_string(), record.clone());
        *self.saves.lock().unwrap_or_else(|e| e.into_inner()) += 1;
        Ok(())
    }

    async fn load_version(&self, name: &str) -> Result<Option<DeploymentVersion>> {
        Ok(self
            .versions
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(name)
            .cloned())
    }

    async fn save_version(&self, name: &str, version: &DeploymentVersion) -> Result<()> {
        self.versions
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(name.to_string(), version.clone());
        Ok(())
    }
}
