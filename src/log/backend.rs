//! Persistence backends for log records.
//!
//! The [`Backend`] trait is the seam between the store's log semantics and
//! wherever records live. Two implementations ship with the crate:
//!
//! - [`MemoryBackend`] - a map, for tests and short-lived sessions
//! - [`FileBackend`] - generational on-disk snapshots (feature `storage`)

use super::{LogRecord, RecordId};
use crate::page_key::PageKey;
use std::collections::{BTreeMap, BTreeSet};
use std::io;

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error("corrupt storage: {0}")]
    Corrupt(&'static str),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("record {0} already exists")]
    DuplicateId(RecordId),
    #[error("record {0} does not exist")]
    Missing(RecordId),
}

pub trait Backend {
    /// Inserts a record under its caller-chosen id.
    fn insert(&mut self, record: LogRecord) -> Result<(), StorageError>;

    fn get(&self, id: &RecordId) -> Result<Option<LogRecord>, StorageError>;

    /// Replaces an existing record with the same id.
    fn update(&mut self, record: LogRecord) -> Result<(), StorageError>;

    /// Records for one page, ordered by date ascending.
    fn records_for_page(&self, page_key: &PageKey) -> Result<Vec<LogRecord>, StorageError>;

    fn page_keys(&self) -> Result<Vec<PageKey>, StorageError>;

    /// Removes every listed record that exists and returns those removed.
    fn remove(&mut self, ids: &[RecordId]) -> Result<Vec<LogRecord>, StorageError>;

    /// Every record, ordered by date ascending.
    fn all_records(&self) -> Result<Vec<LogRecord>, StorageError>;
}

#[derive(Debug, Default, Clone)]
pub struct MemoryBackend {
    records: BTreeMap<RecordId, LogRecord>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn contains(&self, id: &RecordId) -> bool {
        self.records.contains_key(id)
    }

    fn sorted<'a>(records: impl Iterator<Item = &'a LogRecord>) -> Vec<LogRecord> {
        let mut out: Vec<LogRecord> = records.cloned().collect();
        out.sort_by(|a, b| a.date.cmp(&b.date).then_with(|| a.id.cmp(&b.id)));
        out
    }
}

impl Backend for MemoryBackend {
    fn insert(&mut self, record: LogRecord) -> Result<(), StorageError> {
        if self.records.contains_key(&record.id) {
            return Err(StorageError::DuplicateId(record.id));
        }
        self.records.insert(record.id.clone(), record);
        Ok(())
    }

    fn get(&self, id: &RecordId) -> Result<Option<LogRecord>, StorageError> {
        Ok(self.records.get(id).cloned())
    }

    fn update(&mut self, record: LogRecord) -> Result<(), StorageError> {
        match self.records.get_mut(&record.id) {
            Some(existing) => {
                *existing = record;
                Ok(())
            }
            None => Err(StorageError::Missing(record.id)),
        }
    }

    fn records_for_page(&self, page_key: &PageKey) -> Result<Vec<LogRecord>, StorageError> {
        Ok(Self::sorted(
            self.records
                .values()
                .filter(|record| record.page_key == *page_key),
        ))
    }

    fn page_keys(&self) -> Result<Vec<PageKey>, StorageError> {
        let keys: BTreeSet<&PageKey> = self.records.values().map(|record| &record.page_key).collect();
        Ok(keys.into_iter().cloned().collect())
    }

    fn remove(&mut self, ids: &[RecordId]) -> Result<Vec<LogRecord>, StorageError> {
        Ok(ids.iter().filter_map(|id| self.records.remove(id)).collect())
    }

    fn all_records(&self) -> Result<Vec<LogRecord>, StorageError> {
        Ok(Self::sorted(self.records.values()))
    }
}

#[cfg(feature = "storage")]
pub use file::FileBackend;

#[cfg(feature = "storage")]
mod file {
    use super::{Backend, MemoryBackend, StorageError};
    use crate::log::{LogRecord, RecordId};
    use crate::page_key::PageKey;
    use crc32fast::Hasher;
    use serde::{Deserialize, Serialize};
    use std::fs;
    use std::io;
    use std::path::{Path, PathBuf};
    use tracing::warn;

    const HEADER_A: &str = "header_a";
    const HEADER_B: &str = "header_b";
    const VERSION: u32 = 1;

    #[derive(Debug, Serialize, Deserialize, Clone)]
    struct Header {
        version: u32,
        generation: u64,
        record_count: usize,
        segment_checksum: u32,
        segment_len: u64,
    }

    fn segment_name(generation: u64) -> String {
        format!("records-{generation}.json")
    }

    /// Keeps the full record set in memory and writes a new JSON segment
    /// generation after every mutation. Two header files name the current
    /// generation with its checksum and length; a mutation takes effect once
    /// `header_a` is on disk, and a segment is only deleted after both headers
    /// have moved past it.
    #[derive(Debug)]
    pub struct FileBackend {
        root: PathBuf,
        generation: u64,
        records: MemoryBackend,
    }

    impl FileBackend {
        pub fn open(root: impl AsRef<Path>) -> Result<Self, StorageError> {
            let root = root.as_ref().to_path_buf();
            fs::create_dir_all(&root)?;
            let mut records = MemoryBackend::new();
            let generation = match read_segment(&root) {
                Ok((generation, loaded)) => {
                    for record in loaded {
                        records.insert(record)?;
                    }
                    generation
                }
                Err(StorageError::Io(err)) if err.kind() == io::ErrorKind::NotFound => 0,
                Err(err) => return Err(err),
            };
            Ok(Self {
                root,
                generation,
                records,
            })
        }

        pub fn root(&self) -> &Path {
            &self.root
        }

        /// Applies `change` to a copy of the records and persists the copy.
        /// The in-memory state only moves forward once the write committed.
        fn commit<T>(
            &mut self,
            change: impl FnOnce(&mut MemoryBackend) -> Result<T, StorageError>,
        ) -> Result<T, StorageError> {
            let mut candidate = self.records.clone();
            let out = change(&mut candidate)?;
            let generation = self.generation + 1;
            self.write_generation(generation, &candidate)?;
            self.records = candidate;
            self.generation = generation;
            Ok(out)
        }

        fn write_generation(
            &self,
            generation: u64,
            records: &MemoryBackend,
        ) -> Result<(), StorageError> {
            let records = records.all_records()?;
            let payload = serde_json::to_vec(&records)?;
            let segment = segment_name(generation);
            write_atomic(&self.root, &segment, &payload)?;

            let header = Header {
                version: VERSION,
                generation,
                record_count: records.len(),
                segment_checksum: checksum_bytes(&payload),
                segment_len: payload.len() as u64,
            };
            let encoded = serde_json::to_vec(&header)?;
            write_atomic(&self.root, HEADER_A, &encoded)?;

            if let Err(err) = write_atomic(&self.root, HEADER_B, &encoded) {
                warn!(error = %err, "secondary log header not updated");
                return Ok(());
            }
            if generation > 1 {
                let stale = self.root.join(segment_name(generation - 1));
                if let Err(err) = fs::remove_file(&stale)
                    && err.kind() != io::ErrorKind::NotFound
                {
                    warn!(path = %stale.display(), error = %err, "stale segment not removed");
                }
            }
            Ok(())
        }
    }

    fn write_atomic(root: &Path, name: &str, bytes: &[u8]) -> Result<(), StorageError> {
        let temp_path = root.join(format!("{name}.tmp"));
        fs::write(&temp_path, bytes)?;
        fs::rename(&temp_path, root.join(name))?;
        Ok(())
    }

    fn read_header(root: &Path, path: &Path) -> Result<(u64, Vec<LogRecord>), StorageError> {
        let bytes = fs::read(path)?;
        let header: Header =
            serde_json::from_slice(&bytes).map_err(|_| StorageError::Corrupt("header"))?;
        if header.version != VERSION {
            return Err(StorageError::Corrupt("version"));
        }
        let segment = match fs::read(root.join(segment_name(header.generation))) {
            Ok(segment) => segment,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                return Err(StorageError::Corrupt("missing segment"));
            }
            Err(err) => return Err(err.into()),
        };
        if segment.len() as u64 != header.segment_len {
            return Err(StorageError::Corrupt("length mismatch"));
        }
        if checksum_bytes(&segment) != header.segment_checksum {
            return Err(StorageError::Corrupt("checksum mismatch"));
        }
        let records: Vec<LogRecord> = serde_json::from_slice(&segment)?;
        if records.len() != header.record_count {
            return Err(StorageError::Corrupt("record count mismatch"));
        }
        Ok((header.generation, records))
    }

    /// Loads the newest generation that one of the headers validates.
    fn read_segment(root: &Path) -> Result<(u64, Vec<LogRecord>), StorageError> {
        let mut best: Option<(u64, Vec<LogRecord>)> = None;
        let mut last_error = None;

        for name in [HEADER_A, HEADER_B] {
            let path = root.join(name);
            match read_header(root, &path) {
                Ok(loaded) => {
                    if best.as_ref().is_none_or(|(generation, _)| loaded.0 > *generation) {
                        best = Some(loaded);
                    }
                }
                Err(StorageError::Io(err)) if err.kind() == io::ErrorKind::NotFound => {
                    warn!(path = %path.display(), "log header missing");
                    last_error.get_or_insert(StorageError::Io(err));
                }
                Err(err) => {
                    warn!(path = %path.display(), error = %err, "log header rejected");
                    last_error = Some(err);
                }
            }
        }

        match (best, last_error) {
            (Some(loaded), _) => Ok(loaded),
            (None, Some(err)) => Err(err),
            (None, None) => Err(StorageError::Io(io::Error::new(
                io::ErrorKind::NotFound,
                "no log header",
            ))),
        }
    }

    fn checksum_bytes(bytes: &[u8]) -> u32 {
        let mut hasher = Hasher::new();
        hasher.update(bytes);
        hasher.finalize()
    }

    impl Backend for FileBackend {
        fn insert(&mut self, record: LogRecord) -> Result<(), StorageError> {
            self.commit(|records| records.insert(record))
        }

        fn get(&self, id: &RecordId) -> Result<Option<LogRecord>, StorageError> {
            self.records.get(id)
        }

        fn update(&mut self, record: LogRecord) -> Result<(), StorageError> {
            self.commit(|records| records.update(record))
        }

        fn records_for_page(&self, page_key: &PageKey) -> Result<Vec<LogRecord>, StorageError> {
            self.records.records_for_page(page_key)
        }

        fn page_keys(&self) -> Result<Vec<PageKey>, StorageError> {
            self.records.page_keys()
        }

        fn remove(&mut self, ids: &[RecordId]) -> Result<Vec<LogRecord>, StorageError> {
            if !ids.iter().any(|id| self.records.contains(id)) {
                return Ok(Vec::new());
            }
            self.commit(|records| records.remove(ids))
        }

        fn all_records(&self) -> Result<Vec<LogRecord>, StorageError> {
            self.records.all_records()
        }
    }

}
