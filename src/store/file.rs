//! Append-only file store.
//!
//! Every write appends one JSON record to a log file:
//!
//! ```text
//! {"op":"put","id":"https://…/3/4/2.png","encodedImage":"data:…","timestamp":1700000000000,"revision":12}
//! {"op":"delete","id":"https://…/3/4/1.png","revision":13}
//! ```
//!
//! Opening the store replays the log into an in-memory index. Overwritten and
//! deleted records keep occupying disk space until [`TileStore::compact`]
//! rewrites the log with live records only.
//!
//! Compaction writes the snapshot without holding the store lock. Records
//! appended meanwhile are also kept in a side buffer and copied onto the new
//! log before it replaces the old one.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::fs::{self, File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::error::StoreError;

use super::{apply_mutation, CacheEntry, DeleteTarget, Revision, StoreInfo, TileDocument, TileStore};

/// One line of the log.
#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "lowercase")]
enum LogRecord {
    Put(CacheEntry),
    Delete {
        id: String,
        revision: Revision,
    },
}

/// [`TileStore`] persisted to a single JSON-lines log file.
///
/// The index and log handle sit behind one async mutex, so upserts to the
/// same key serialize and a crash can lose at most the record being appended.
/// A failed append is cut back off the log before the error is returned.
pub struct FileStore {
    path: PathBuf,
    state: Mutex<FileState>,
    /// Held for the whole of a compaction
    compaction: Mutex<()>,
}

struct FileState {
    entries: HashMap<String, CacheEntry>,
    last_revision: u64,
    log: File,
    log_len: u64,
    /// Records appended since the running compaction took its snapshot
    compaction_tail: Option<Vec<u8>>,
}

impl FileStore {
    /// Open the store at `path`, creating an empty log if none exists.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or created, or if a
    /// complete record fails to parse.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();

        let replayed = match fs::read_to_string(&path).await {
            Ok(contents) => replay(&contents)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Replay::default(),
            Err(e) => return Err(e.into()),
        };

        let log = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await?;

        // Appends must start on a fresh line
        if log.metadata().await?.len() > replayed.valid_len {
            log.set_len(replayed.valid_len).await?;
        }
        let log_len = replayed.valid_len;
        let Replay {
            entries,
            last_revision,
            ..
        } = replayed;

        debug!(
            path = %path.display(),
            entries = entries.len(),
            log_len,
            "Opened tile store"
        );

        Ok(Self {
            path,
            state: Mutex::new(FileState {
                entries,
                last_revision,
                log,
                log_len,
                compaction_tail: None,
            }),
            compaction: Mutex::new(()),
        })
    }

    /// Path of the log file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn compaction_path(&self) -> PathBuf {
        self.path.with_extension("compact")
    }
}

/// Index rebuilt from a log file.
#[derive(Default)]
struct Replay {
    entries: HashMap<String, CacheEntry>,
    last_revision: u64,
    /// Length of the log up to its last complete record
    valid_len: u64,
}

/// Rebuild the index from log contents.
///
/// A final line without a newline is an append that never completed and is
/// dropped.
fn replay(contents: &str) -> Result<Replay, StoreError> {
    let valid_len = contents.rfind('\n').map_or(0, |i| i + 1);
    let (complete, torn) = contents.split_at(valid_len);
    let mut replayed = Replay {
        valid_len: valid_len as u64,
        ..Replay::default()
    };

    for (index, line) in complete.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }

        let record: LogRecord = serde_json::from_str(line).map_err(|e| StoreError::Corrupt {
            line: index + 1,
            message: e.to_string(),
        })?;

        match record {
            LogRecord::Put(entry) => {
                replayed.last_revision = replayed.last_revision.max(entry.revision.sequence());
                replayed.entries.insert(entry.key.clone(), entry);
            }
            LogRecord::Delete { id, revision } => {
                replayed.last_revision = replayed.last_revision.max(revision.sequence());
                replayed.entries.remove(&id);
            }
        }
    }

    if !torn.is_empty() {
        warn!(
            line = complete.lines().count() + 1,
            bytes = torn.len(),
            "Ignoring torn record at end of tile log"
        );
    }

    Ok(replayed)
}

fn encode_record(record: &LogRecord) -> Result<Vec<u8>, StoreError> {
    let mut line = serde_json::to_vec(record).map_err(|e| StoreError::Serialize(e.to_string()))?;
    line.push(b'\n');
    Ok(line)
}

impl FileState {
    fn next_revision(&self) -> Revision {
        Revision::from_sequence(self.last_revision + 1)
    }

    async fn append(&mut self, record: &LogRecord) -> Result<(), StoreError> {
        let line = encode_record(record)?;
        if let Err(e) = self.write_line(&line).await {
            self.rollback().await;
            return Err(e);
        }

        self.log_len += line.len() as u64;
        if let Some(tail) = self.compaction_tail.as_mut() {
            tail.extend_from_slice(&line);
        }
        Ok(())
    }

    async fn write_line(&mut self, line: &[u8]) -> Result<(), StoreError> {
        self.log.write_all(line).await?;
        self.log.flush().await?;
        Ok(())
    }

    /// Cut the log back to the end of the last complete record.
    async fn rollback(&mut self) {
        if let Err(e) = self.log.set_len(self.log_len).await {
            warn!(
                error = %e,
                log_len = self.log_len,
                "Failed to truncate tile log after a failed append"
            );
        }
    }
}

/// Write `live` to `tmp_path` and reopen it for appending.
async fn write_snapshot(
    tmp_path: &Path,
    live: Vec<CacheEntry>,
) -> Result<(File, u64), StoreError> {
    let mut buffer = Vec::new();
    for entry in live {
        buffer.extend(encode_record(&LogRecord::Put(entry))?);
    }

    let mut tmp = File::create(tmp_path).await?;
    tmp.write_all(&buffer).await?;
    tmp.sync_all().await?;
    drop(tmp);

    let log = OpenOptions::new().append(true).open(tmp_path).await?;
    Ok((log, buffer.len() as u64))
}

/// Append the records written during compaction, then move the new log into
/// place. `log` stays valid across the rename.
async fn install_log(
    log: &mut File,
    tail: &[u8],
    tmp_path: &Path,
    path: &Path,
) -> Result<(), StoreError> {
    if !tail.is_empty() {
        log.write_all(tail).await?;
        log.flush().await?;
    }
    log.sync_all().await?;
    fs::rename(tmp_path, path).await?;
    Ok(())
}

#[async_trait]
impl TileStore for FileStore {
    async fn get(&self, key: &str) -> Result<Option<CacheEntry>, StoreError> {
        let state = self.state.lock().await;
        Ok(state.entries.get(key).cloned())
    }

    async fn upsert<F>(&self, key: &str, mutate: F) -> Result<Revision, StoreError>
    where
        F: FnOnce(TileDocument) -> TileDocument + Send + 'static,
    {
        let mut state = self.state.lock().await;

        let revision = state.next_revision();
        let entry = apply_mutation(key, state.entries.get(key), revision, mutate)?;

        let record = LogRecord::Put(entry);
        state.append(&record).await?;

        if let LogRecord::Put(entry) = record {
            state.entries.insert(entry.key.clone(), entry);
        }
        state.last_revision = revision.sequence();

        Ok(revision)
    }

    async fn entries(&self) -> Result<Vec<CacheEntry>, StoreError> {
        let state = self.state.lock().await;
        Ok(state.entries.values().cloned().collect())
    }

    async fn bulk_delete(&self, targets: &[DeleteTarget]) -> Result<usize, StoreError> {
        let mut state = self.state.lock().await;
        let mut removed = 0;

        for target in targets {
            let matches = state
                .entries
                .get(&target.key)
                .is_some_and(|entry| entry.revision == target.revision);
            if !matches {
                continue;
            }

            let revision = state.next_revision();
            state
                .append(&LogRecord::Delete {
                    id: target.key.clone(),
                    revision,
                })
                .await?;
            state.entries.remove(&target.key);
            state.last_revision = revision.sequence();
            removed += 1;
        }

        Ok(removed)
    }

    async fn compact(&self) -> Result<(), StoreError> {
        let _compacting = self.compaction.lock().await;
        let tmp_path = self.compaction_path();

        let mut live = {
            let mut state = self.state.lock().await;
            state.compaction_tail = Some(Vec::new());
            state.entries.values().cloned().collect::<Vec<_>>()
        };
        live.sort_by(|a, b| a.key.cmp(&b.key));

        let snapshot = write_snapshot(&tmp_path, live).await;

        let mut state = self.state.lock().await;
        let tail = state.compaction_tail.take().unwrap_or_default();

        let installed = match snapshot {
            Ok((mut log, snapshot_len)) => install_log(&mut log, &tail, &tmp_path, &self.path)
                .await
                .map(|()| (log, snapshot_len)),
            Err(e) => Err(e),
        };
        let (log, snapshot_len) = match installed {
            Ok(installed) => installed,
            Err(e) => {
                if let Err(cleanup) = fs::remove_file(&tmp_path).await {
                    debug!(error = %cleanup, "No compaction file to clean up");
                }
                return Err(e);
            }
        };

        let before = state.log_len;
        state.log = log;
        state.log_len = snapshot_len + tail.len() as u64;

        debug!(
            path = %self.path.display(),
            before,
            after = state.log_len,
            "Compacted tile store"
        );

        Ok(())
    }

    async fn info(&self) -> Result<StoreInfo, StoreError> {
        let state = self.state.lock().await;
        Ok(StoreInfo {
            entry_count: state.entries.len(),
            size_bytes: state.log_len,
        })
    }
}
