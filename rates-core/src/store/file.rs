use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use fd_lock::RwLock;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;

use super::{StateStore, apply_candidate, apply_mark};
use crate::constants::MAX_CONFLICT_RETRIES;
use crate::error::StoreError;
use crate::types::{ChangeCandidate, ChangeRecord, StoredQuote};

/// Содержимое файла состояния.
#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
struct Document {
    /// растёт при каждой записи файла; по нему видно запись другим процессом
    generation: u64,
    quotes: BTreeMap<String, StoredQuote>,
}

/// Долговременное хранилище в JSON-файле.
///
/// Каждая мутация берёт эксклюзивную блокировку соседнего файла
/// `<имя>.lock`, перечитывает документ, пишет временный файл рядом с
/// целевым и атомарно переименовывает его поверх. Писатель, обошедший
/// блокировку, виден по сдвигу `generation`: мутация повторяется, не более
/// [`MAX_CONFLICT_RETRIES`] раз. Чтения перечитывают файл, если его
/// `generation` ушёл вперёд.
pub struct JsonFileStore {
    path: PathBuf,
    lock_path: PathBuf,
    doc: Mutex<Document>,
}

impl JsonFileStore {
    /// Открывает файл; отсутствующий файл означает пустое состояние.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();
        let lock_path = match path.file_name() {
            Some(name) => {
                let mut name = name.to_os_string();
                name.push(".lock");
                path.with_file_name(name)
            }
            None => return Err(unavailable(&path, &"not a file path")),
        };
        let doc = read_document(&path)?;
        info!(
            "state file {} opened: {} quotes, generation {}",
            path.display(),
            doc.quotes.len(),
            doc.generation
        );
        Ok(Self {
            path,
            lock_path,
            doc: Mutex::new(doc),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn lock(&self) -> MutexGuard<'_, Document> {
        match self.doc.lock() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Подтягивает чужие записи, если файл ушёл вперёд.
    fn refresh(&self, doc: &mut Document) -> Result<(), StoreError> {
        let on_disk = read_document(&self.path)?;
        if on_disk.generation != doc.generation {
            debug!(
                "state file generation moved {} -> {}; reloading",
                doc.generation, on_disk.generation
            );
            *doc = on_disk;
        }
        Ok(())
    }

    fn lock_file(&self) -> Result<RwLock<File>, StoreError> {
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(&self.lock_path)
            .map_err(|e| unavailable(&self.lock_path, &e))?;
        Ok(RwLock::new(file))
    }

    fn commit<R>(
        &self,
        mutate: impl Fn(&mut BTreeMap<String, StoredQuote>) -> R,
    ) -> Result<R, StoreError> {
        let mut doc = self.lock();

        // чтение -> проверка -> rename под одной блокировкой между процессами
        let mut file_lock = self.lock_file()?;
        let _guard = file_lock
            .write()
            .map_err(|e| unavailable(&self.lock_path, &e))?;

        for attempt in 1..=MAX_CONFLICT_RETRIES {
            self.refresh(&mut doc)?;

            let mut quotes = doc.quotes.clone();
            let out = mutate(&mut quotes);
            if quotes == doc.quotes {
                return Ok(out);
            }

            let next = Document {
                generation: doc.generation + 1,
                quotes,
            };
            let tmp = write_temp(&self.path, &next)?;

            if read_document(&self.path)?.generation != doc.generation {
                warn!(
                    "state file {} changed concurrently (attempt {attempt}/{MAX_CONFLICT_RETRIES})",
                    self.path.display()
                );
                continue;
            }

            tmp.persist(&self.path)
                .map_err(|e| unavailable(&self.path, &e.error))?;
            *doc = next;
            return Ok(out);
        }

        Err(StoreError::ConflictRetryExhausted {
            attempts: MAX_CONFLICT_RETRIES,
        })
    }
}

impl StateStore for JsonFileStore {
    fn get(&self, id: &str) -> Result<Option<StoredQuote>, StoreError> {
        let mut doc = self.lock();
        self.refresh(&mut doc)?;
        Ok(doc.quotes.get(id).cloned())
    }

    fn upsert_if_changed(
        &self,
        candidates: &[ChangeCandidate],
    ) -> Result<Vec<ChangeRecord>, StoreError> {
        // весь батч коммитится одной записью файла: либо все id, либо ни одного
        self.commit(|quotes| {
            candidates
                .iter()
                .filter_map(|c| apply_candidate(quotes, c))
                .collect()
        })
    }

    fn mark_notified(&self, delivered: &[ChangeRecord]) -> Result<usize, StoreError> {
        self.commit(|quotes| delivered.iter().filter(|rec| apply_mark(quotes, rec)).count())
    }

    fn list(&self) -> Result<Vec<StoredQuote>, StoreError> {
        let mut doc = self.lock();
        self.refresh(&mut doc)?;
        Ok(doc.quotes.values().cloned().collect())
    }
}

fn read_document(path: &Path) -> Result<Document, StoreError> {
    let bytes = match fs::read(path) {
        Ok(b) => b,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Document::default()),
        Err(e) => return Err(unavailable(path, &e)),
    };

    if bytes.iter().all(u8::is_ascii_whitespace) {
        return Ok(Document::default());
    }

    serde_json::from_slice(&bytes).map_err(|e| unavailable(path, &e))
}

fn write_temp(path: &Path, doc: &Document) -> Result<NamedTempFile, StoreError> {
    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };

    let mut tmp = NamedTempFile::new_in(dir).map_err(|e| unavailable(path, &e))?;
    serde_json::to_writer_pretty(&mut tmp, doc).map_err(|e| unavailable(path, &e))?;
    tmp.write_all(b"\n").map_err(|e| unavailable(path, &e))?;
    tmp.as_file().sync_all().map_err(|e| unavailable(path, &e))?;
    Ok(tmp)
}

fn unavailable(path: &Path, e: &dyn std::fmt::Display) -> StoreError {
    StoreError::Unavailable(format!("{}: {e}", path.display()))
}
