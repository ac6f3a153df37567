//! Recorded state: per-resource snapshots of what was last applied
//!
//! A [`StateRecord`] is mutated only by the Applier, one commit per
//! successfully provisioned step, so a crash mid-run leaves a correct and
//! resumable partial state. The store itself is an external collaborator
//! behind the [`StateStore`] trait; a TOML-file implementation is provided.

use crate::provider::Applied;
use crate::spec::{PropertyMap, ResourceId, ResourceSpec};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};

/// Snapshot of one provisioned resource
///
/// Properties are stored as declared (references unresolved) so the diff
/// engine compares spec against spec and stays pure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateRecord {
    /// Logical name, matching the spec it was applied from
    pub id: ResourceId,
    /// Type tag at apply time
    pub resource_type: String,
    /// Provider-assigned identifier
    pub provider_id: String,
    /// Last-applied declared property values
    #[serde(default)]
    pub properties: PropertyMap,
    /// Output values returned by the provider
    #[serde(default)]
    pub outputs: PropertyMap,
    /// Dependency ids recorded at apply time, used to order later deletions
    #[serde(default)]
    pub dependencies: BTreeSet<ResourceId>,
    /// When this record was last committed
    pub updated_at: DateTime<Utc>,
}

impl StateRecord {
    /// Build the record for a freshly provisioned spec
    pub fn from_applied(spec: &ResourceSpec, applied: Applied) -> Self {
        Self {
            id: spec.id.clone(),
            resource_type: spec.resource_type.clone(),
            provider_id: applied.provider_id,
            properties: spec.properties.clone(),
            outputs: applied.outputs,
            dependencies: spec.dependency_ids(),
            updated_at: Utc::now(),
        }
    }
}

/// External collaborator persisting state records
///
/// `commit` and `remove` are single-record atomic writes; the engine never
/// asks for cross-record transactions.
pub trait StateStore: Send {
    /// Load every record, in any order
    fn load(&mut self) -> Result<Vec<StateRecord>>;

    /// Persist one record, replacing any previous record with the same id
    fn commit(&mut self, record: &StateRecord) -> Result<()>;

    /// Delete the record for `id`; absent ids are not an error
    fn remove(&mut self, id: &ResourceId) -> Result<()>;
}

/// In-memory store for tests and embedding
#[derive(Debug, Default)]
pub struct MemoryStateStore {
    records: BTreeMap<ResourceId, StateRecord>,
}

impl MemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed the store with existing records
    pub fn with_records(records: impl IntoIterator<Item = StateRecord>) -> Self {
        Self {
            records: records
                .into_iter()
                .map(|r| (r.id.clone(), r))
                .collect(),
        }
    }

    pub fn get(&self, id: &ResourceId) -> Option<&StateRecord> {
        self.records.get(id)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

impl StateStore for MemoryStateStore {
    fn load(&mut self) -> Result<Vec<StateRecord>> {
        Ok(self.records.values().cloned().collect())
    }

    fn commit(&mut self, record: &StateRecord) -> Result<()> {
        self.records.insert(record.id.clone(), record.clone());
        Ok(())
    }

    fn remove(&mut self, id: &ResourceId) -> Result<()> {
        self.records.remove(id);
        Ok(())
    }
}

/// Serialized layout of the state file
#[derive(Debug, Default, Serialize, Deserialize)]
struct StateFile {
    #[serde(default)]
    resources: Vec<StateRecord>,
}

/// TOML-file state store
///
/// The whole file is rewritten on each commit; a commit is atomic at the
/// record level because records are keyed by id and rewritten together.
#[derive(Debug)]
pub struct FileStateStore {
    path: PathBuf,
    records: BTreeMap<ResourceId, StateRecord>,
}

impl FileStateStore {
    /// Open a store at `path`, reading existing records if the file exists
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        let records = if path.exists() {
            let content = fs::read_to_string(&path)
                .with_context(|| format!("Failed to read state file: {}", path.display()))?;
            let file: StateFile = toml::from_str(&content)
                .with_context(|| format!("Failed to parse state file: {}", path.display()))?;
            log::debug!(
                "loaded {} state records from {}",
                file.resources.len(),
                path.display()
            );
            file.resources
                .into_iter()
                .map(|r| (r.id.clone(), r))
                .collect()
        } else {
            log::debug!("state file does not exist, starting empty");
            BTreeMap::new()
        };

        Ok(Self { path, records })
    }

    fn persist(&self) -> Result<()> {
        if let Some(dir) = self.path.parent()
            && !dir.as_os_str().is_empty()
        {
            fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create state directory: {}", dir.display()))?;
        }

        let file = StateFile {
            resources: self.records.values().cloned().collect(),
        };
        let content =
            toml::to_string_pretty(&file).context("Failed to serialize state to TOML")?;

        fs::write(&self.path, &content)
            .with_context(|| format!("Failed to write state file: {}", self.path.display()))?;

        log::debug!("saved state to {}", self.path.display());
        Ok(())
    }
}

impl StateStore for FileStateStore {
    fn load(&mut self) -> Result<Vec<StateRecord>> {
        Ok(self.records.values().cloned().collect())
    }

    fn commit(&mut self, record: &StateRecord) -> Result<()> {
        self.records.insert(record.id.clone(), record.clone());
        self.persist()
    }

    fn remove(&mut self, id: &ResourceId) -> Result<()> {
        if self.records.remove(id).is_some() {
            self.persist()?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spec::PropertyValue;

    fn record(id: &str) -> StateRecord {
        StateRecord {
            id: id.into(),
            resource_type: "kv_table".into(),
            provider_id: format!("prov-{id}"),
            properties: PropertyMap::from([("read_capacity".into(), PropertyValue::Int(2))]),
            outputs: PropertyMap::from([("name".into(), PropertyValue::from("table-1"))]),
            dependencies: BTreeSet::new(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn memory_store_commit_and_remove() {
        let mut store = MemoryStateStore::new();
        store.commit(&record("table")).unwrap();
        assert_eq!(store.load().unwrap().len(), 1);

        store.remove(&"table".into()).unwrap();
        assert!(store.load().unwrap().is_empty());
        // Removing an absent id is not an error
        store.remove(&"table".into()).unwrap();
    }

    #[test]
    fn file_store_round_trips_records() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.toml");

        {
            let mut store = FileStateStore::open(&path).unwrap();
            store.commit(&record("table")).unwrap();
            store.commit(&record("func")).unwrap();
        }

        let mut reopened = FileStateStore::open(&path).unwrap();
        let mut loaded = reopened.load().unwrap();
        loaded.sort_by(|a, b| a.id.cmp(&b.id));
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded[0].id, ResourceId::from("func"));
        assert_eq!(loaded[1].provider_id, "prov-table");
        assert_eq!(
            loaded[1].outputs.get("name"),
            Some(&PropertyValue::from("table-1"))
        );
    }

    #[test]
    fn file_store_remove_persists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.toml");

        let mut store = FileStateStore::open(&path).unwrap();
        store.commit(&record("table")).unwrap();
        store.remove(&"table".into()).unwrap();
        drop(store);

        let mut reopened = FileStateStore::open(&path).unwrap();
        assert!(reopened.load().unwrap().is_empty());
    }

    #[test]
    fn missing_file_starts_empty() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = FileStateStore::open(dir.path().join("nope.toml")).unwrap();
        assert!(store.load().unwrap().is_empty());
    }
}
