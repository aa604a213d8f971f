use crate::mutants::{MutationDetails, MutationIdentifier, MutationResult, MutationStatusTestPair};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::io::Write;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, warn};

/// Hex SHA-256 over the identifier, the class content hash and the sorted,
/// deduplicated covering tests. Reordering the tests does not change it;
/// adding or removing one does.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(String);

impl Fingerprint {
    pub fn of(details: &MutationDetails) -> Self {
        let mut hasher = Sha256::new();
        let mut field = |value: &str| {
            hasher.update((value.len() as u64).to_le_bytes());
            hasher.update(value.as_bytes());
        };
        let id = &details.id;
        field(&id.operator);
        field(&id.location.class);
        field(&id.location.method);
        field(&id.location.descriptor);
        field(&id.index.to_string());
        field(&id.description);
        field(&details.class_hash);
        let tests: BTreeSet<&str> = details.tests_in_order.iter().map(String::as_str).collect();
        for test in tests {
            field(test);
        }
        Fingerprint(hex::encode(hasher.finalize()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryRecord {
    pub fingerprint: Fingerprint,
    pub id: MutationIdentifier,
    pub result: MutationStatusTestPair,
}

pub trait HistoryStore {
    fn record_result(&mut self, result: &MutationResult);
    fn lookup(&self, fingerprint: &Fingerprint) -> Option<&HistoryRecord>;

    fn previous_result(&self, details: &MutationDetails) -> Option<&MutationStatusTestPair> {
        self.lookup(&Fingerprint::of(details)).map(|r| &r.result)
    }
}

#[derive(Debug, Error)]
pub enum HistoryError {
    #[error("history i/o on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to encode history: {0}")]
    Json(#[from] serde_json::Error),
    #[error("failed to replace history file: {0}")]
    Persist(#[from] tempfile::PersistError),
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct HistoryFile {
    records: Vec<HistoryRecord>,
}

/// History kept in a JSON file. Writes go through a temp file in the same
/// directory so a crash never leaves a half-written history behind.
#[derive(Debug, Default)]
pub struct FileHistoryStore {
    path: Option<PathBuf>,
    records: HashMap<Fingerprint, HistoryRecord>,
}

impl FileHistoryStore {
    /// Open the history at `path`. A missing file is an empty history, and
    /// so is one that cannot be parsed.
    pub fn open(path: &Path) -> Result<Self, HistoryError> {
        let mut store = Self {
            path: Some(path.to_path_buf()),
            records: HashMap::new(),
        };
        let data = match std::fs::read_to_string(path) {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(store),
            Err(source) => {
                return Err(HistoryError::Io {
                    path: path.to_path_buf(),
                    source,
                });
            }
        };
        match serde_json::from_str::<HistoryFile>(&data) {
            Ok(file) => {
                for record in file.records {
                    store.records.insert(record.fingerprint.clone(), record);
                }
                debug!(path = %path.display(), records = store.records.len(), "loaded history");
            }
            Err(e) => warn!(path = %path.display(), error = %e, "ignoring unreadable history"),
        }
        Ok(store)
    }

    pub fn in_memory() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn save(&self) -> Result<(), HistoryError> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let mut records: Vec<&HistoryRecord> = self.records.values().collect();
        records.sort_by(|a, b| a.id.cmp(&b.id));
        let json = serde_json::to_string_pretty(&serde_json::json!({ "records": records }))?;

        let dir = match path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p,
            _ => Path::new("."),
        };
        let io_err = |source| HistoryError::Io {
            path: path.clone(),
            source,
        };
        let mut tmp = tempfile::NamedTempFile::new_in(dir).map_err(io_err)?;
        tmp.write_all(json.as_bytes()).map_err(io_err)?;
        tmp.persist(path)?;
        debug!(path = %path.display(), records = records.len(), "saved history");
        Ok(())
    }
}

impl HistoryStore for FileHistoryStore {
    fn record_result(&mut self, result: &MutationResult) {
        let fingerprint = Fingerprint::of(&result.details);
        self.records.insert(
            fingerprint.clone(),
            HistoryRecord {
                fingerprint,
                id: result.details.id.clone(),
                result: result.status.clone(),
            },
        );
    }

    fn lookup(&self, fingerprint: &Fingerprint) -> Option<&HistoryRecord> {
        self.records.get(fingerprint)
    }
}

/// Records every finished result into a history store.
pub struct HistoryListener<'a> {
    store: &'a mut dyn HistoryStore,
}

impl<'a> HistoryListener<'a> {
    pub fn new(store: &'a mut dyn HistoryStore) -> Self {
        Self { store }
    }

    pub fn handle_mutation_results(&mut self, results: &[MutationResult]) {
        for result in results {
            self.store.record_result(result);
        }
    }
}
