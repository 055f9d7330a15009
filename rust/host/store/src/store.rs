//! Persistence for records and user indexes, behind an injected trait so
//! the host logic never touches a concrete backend (and tests can run
//! against memory).

use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use sphinx_host_api::types::{IndexEntry, IndexId, RecordId, StoredRecord};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("store i/o failed: {0}")]
    Io(#[from] io::Error),
    #[error("stored data is corrupt: {0}")]
    Corrupt(String),
}

impl From<sphinx_marshalling::SerializationError> for StoreError {
    fn from(err: sphinx_marshalling::SerializationError) -> Self {
        Self::Corrupt(err.0)
    }
}

impl From<sphinx_marshalling::DeserializationError> for StoreError {
    fn from(err: sphinx_marshalling::DeserializationError) -> Self {
        Self::Corrupt(err.0)
    }
}

/// Durable state owned by the host: one record per blinded identifier and
/// one entry set per user-index identifier.
///
/// Implementations must make `put_record` atomic: a crash mid-write leaves
/// the previous state, never a partial record.
pub trait RecordStore: Send {
    fn get_record(&self, id: &RecordId) -> Result<Option<StoredRecord>, StoreError>;
    fn put_record(&mut self, id: &RecordId, record: &StoredRecord) -> Result<(), StoreError>;
    /// Returns whether a record existed.
    fn delete_record(&mut self, id: &RecordId) -> Result<bool, StoreError>;

    fn index_entries(&self, id: &IndexId) -> Result<Option<Vec<IndexEntry>>, StoreError>;
    fn add_index_entry(&mut self, id: &IndexId, entry: &IndexEntry) -> Result<(), StoreError>;
    /// Removes a single entry; drops the index once its last entry is gone.
    fn remove_index_entry(&mut self, id: &IndexId, entry: &IndexEntry) -> Result<(), StoreError>;
}

/// In-memory store for tests and the in-process demo host.
#[derive(Default)]
pub struct MemoryStore {
    records: HashMap<RecordId, StoredRecord>,
    indexes: HashMap<IndexId, Vec<IndexEntry>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl RecordStore for MemoryStore {
    fn get_record(&self, id: &RecordId) -> Result<Option<StoredRecord>, StoreError> {
        Ok(self.records.get(id).cloned())
    }

    fn put_record(&mut self, id: &RecordId, record: &StoredRecord) -> Result<(), StoreError> {
        self.records.insert(*id, record.clone());
        Ok(())
    }

    fn delete_record(&mut self, id: &RecordId) -> Result<bool, StoreError> {
        Ok(self.records.remove(id).is_some())
    }

    fn index_entries(&self, id: &IndexId) -> Result<Option<Vec<IndexEntry>>, StoreError> {
        Ok(self.indexes.get(id).cloned())
    }

    fn add_index_entry(&mut self, id: &IndexId, entry: &IndexEntry) -> Result<(), StoreError> {
        let entries = self.indexes.entry(*id).or_default();
        if !entries.contains(entry) {
            entries.push(entry.clone());
        }
        Ok(())
    }

    fn remove_index_entry(&mut self, id: &IndexId, entry: &IndexEntry) -> Result<(), StoreError> {
        if let Some(entries) = self.indexes.get_mut(id) {
            entries.retain(|e| e != entry);
            if entries.is_empty() {
                self.indexes.remove(id);
            }
        }
        Ok(())
    }
}

/// File-backed store: one CBOR file per identifier, records and indexes in
/// separate directories, all writes via temp file and rename.
pub struct FileStore {
    records_dir: PathBuf,
    indexes_dir: PathBuf,
}

impl FileStore {
    pub fn open(data_dir: &Path) -> Result<Self, StoreError> {
        let records_dir = data_dir.join("records");
        let indexes_dir = data_dir.join("indexes");
        fs::create_dir_all(&records_dir)?;
        fs::create_dir_all(&indexes_dir)?;
        Ok(Self {
            records_dir,
            indexes_dir,
        })
    }

    fn read_file<T: serde::de::DeserializeOwned>(path: &Path) -> Result<Option<T>, StoreError> {
        match fs::read(path) {
            Ok(bytes) => Ok(Some(sphinx_marshalling::from_slice(&bytes)?)),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    fn write_file<T: serde::Serialize>(path: &Path, value: &T) -> Result<(), StoreError> {
        let bytes = sphinx_marshalling::to_vec(value)?;
        let tmp = path.with_extension("tmp");
        fs::write(&tmp, bytes)?;
        fs::rename(&tmp, path)?;
        Ok(())
    }

    fn record_path(&self, id: &RecordId) -> PathBuf {
        self.records_dir.join(hex::encode(id.0))
    }

    fn index_path(&self, id: &IndexId) -> PathBuf {
        self.indexes_dir.join(hex::encode(id.0))
    }
}

impl RecordStore for FileStore {
    fn get_record(&self, id: &RecordId) -> Result<Option<StoredRecord>, StoreError> {
        Self::read_file(&self.record_path(id))
    }

    fn put_record(&mut self, id: &RecordId, record: &StoredRecord) -> Result<(), StoreError> {
        Self::write_file(&self.record_path(id), record)
    }

    fn delete_record(&mut self, id: &RecordId) -> Result<bool, StoreError> {
        match fs::remove_file(self.record_path(id)) {
            Ok(()) => Ok(true),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(err) => Err(err.into()),
        }
    }

    fn index_entries(&self, id: &IndexId) -> Result<Option<Vec<IndexEntry>>, StoreError> {
        Self::read_file(&self.index_path(id))
    }

    fn add_index_entry(&mut self, id: &IndexId, entry: &IndexEntry) -> Result<(), StoreError> {
        let mut entries: Vec<IndexEntry> =
            Self::read_file(&self.index_path(id))?.unwrap_or_default();
        if !entries.contains(entry) {
            entries.push(entry.clone());
        }
        Self::write_file(&self.index_path(id), &entries)
    }

    fn remove_index_entry(&mut self, id: &IndexId, entry: &IndexEntry) -> Result<(), StoreError> {
        let entries: Option<Vec<IndexEntry>> = Self::read_file(&self.index_path(id))?;
        let Some(mut entries) = entries else {
            return Ok(());
        };
        entries.retain(|e| e != entry);
        if entries.is_empty() {
            match fs::remove_file(self.index_path(id)) {
                Ok(()) => Ok(()),
                Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
                Err(err) => Err(err.into()),
            }
        } else {
            Self::write_file(&self.index_path(id), &entries)
        }
    }
}
