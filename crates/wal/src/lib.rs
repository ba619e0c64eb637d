//! Write-ahead log: a directory of zero-padded sequence files, one JSON
//! record per line, backing crash recovery and the write-ahead rule that the
//! buffer pool enforces on dirty eviction.


use std::collections::HashSet;
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use common::{DbError, DbResult};
use serde::{Deserialize, Serialize};

fn to_hex(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 2);
    for byte in bytes {
        out.push_str(&format!("{byte:02x}"));
    }
    out
}

fn from_hex(s: &str) -> DbResult<Vec<u8>> {
    if s.len() % 2 != 0 {
        return Err(DbError::Storage("odd-length hex string in WAL record".into()));
    }
    (0..s.len())
        .step_by(2)
        .map(|i| {
            u8::from_str_radix(&s[i..i + 2], 16)
                .map_err(|e| DbError::Storage(format!("invalid hex in WAL record: {e}")))
        })
        .collect()
}

fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

/// `BEGIN | COMMIT | ROLLBACK` marker for a `TRANSACTION` record.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum TxnOp {
    Begin,
    Commit,
    Rollback,
}

/// The type-specific payload of a WAL line.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum WalBody {
    #[serde(rename = "TRANSACTION")]
    Transaction { txn_id: u64, operation: TxnOp },
    #[serde(rename = "PAGE_WRITE")]
    PageWrite {
        txn_id: u64,
        file_name: String,
        page_id: u64,
        before_image: String,
        after_image: String,
    },
    #[serde(rename = "CHECKPOINT")]
    Checkpoint { checkpoint_lsn: u64 },
}

/// One durable line in a WAL segment file.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct WalRecord {
    pub lsn: u64,
    pub timestamp: i64,
    #[serde(flatten)]
    pub body: WalBody,
}

impl WalRecord {
    pub fn page_write(
        lsn: u64,
        txn_id: u64,
        file_name: &str,
        page_id: u64,
        before_image: &[u8],
        after_image: &[u8],
    ) -> Self {
        Self {
            lsn,
            timestamp: now_millis(),
            body: WalBody::PageWrite {
                txn_id,
                file_name: file_name.to_string(),
                page_id,
                before_image: to_hex(before_image),
                after_image: to_hex(after_image),
            },
        }
    }

    pub fn txn_id(&self) -> Option<u64> {
        match &self.body {
            WalBody::Transaction { txn_id, .. } => Some(*txn_id),
            WalBody::PageWrite { txn_id, .. } => Some(*txn_id),
            WalBody::Checkpoint { .. } => None,
        }
    }
}

fn segment_name(seq: u64) -> String {
    format!("wal_{seq:010}.log")
}

fn segment_seq(path: &Path) -> Option<u64> {
    let stem = path.file_stem()?.to_str()?;
    stem.strip_prefix("wal_")?.parse().ok()
}

fn list_segments(dir: &Path) -> DbResult<Vec<(u64, PathBuf)>> {
    let mut segments = Vec::new();
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if let Some(seq) = segment_seq(&path) {
            segments.push((seq, path));
        }
    }
    segments.sort_by_key(|(seq, _)| *seq);
    Ok(segments)
}

/// Outcome of a crash-recovery pass.
#[derive(Debug, Default)]
pub struct RecoveryOutcome {
    pub committed_txns: HashSet<u64>,
    pub pages_redone: usize,
    pub skipped_invalid_lines: usize,
}

/// Write-ahead log manager: owns the active segment file and allocates LSNs.
#[derive(Debug)]
pub struct Wal {
    dir: PathBuf,
    current_seq: u64,
    current_file: File,
    next_lsn: u64,
}

impl Wal {
    /// Open (creating if necessary) the WAL directory, resuming LSN
    /// allocation from whatever the existing segments already contain.
    pub fn open(dir: impl AsRef<Path>) -> DbResult<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;

        let segments = list_segments(&dir)?;
        let (current_seq, max_lsn) = if segments.is_empty() {
            (0, 0)
        } else {
            let mut max_lsn = 0u64;
            for (_, path) in &segments {
                for line in read_lines(path)? {
                    if let Ok(record) = serde_json::from_str::<WalRecord>(&line) {
                        max_lsn = max_lsn.max(record.lsn);
                    }
                }
            }
            (segments.last().unwrap().0, max_lsn)
        };

        let path = dir.join(segment_name(current_seq));
        let current_file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)?;

        Ok(Self {
            dir,
            current_seq,
            current_file,
            next_lsn: if max_lsn == 0 && segments.is_empty() {
                1
            } else {
                max_lsn + 1
            },
        })
    }

    fn write_record(&mut self, record: &WalRecord) -> DbResult<u64> {
        let line = serde_json::to_string(record)
            .map_err(|e| DbError::Fatal(format!("WAL serialize failed: {e}")))?;
        self.current_file
            .write_all(line.as_bytes())
            .and_then(|_| self.current_file.write_all(b"\n"))
            .map_err(|e| DbError::Fatal(format!("WAL append failed: {e}")))?;
        self.current_file
            .sync_all()
            .map_err(|e| DbError::Fatal(format!("WAL sync failed: {e}")))?;
        Ok(record.lsn)
    }

    /// Append a record, returning its allocated LSN. Durable before returning.
    pub fn append(&mut self, body: WalBody) -> DbResult<u64> {
        let lsn = self.next_lsn;
        self.next_lsn += 1;
        let record = WalRecord {
            lsn,
            timestamp: now_millis(),
            body,
        };
        self.write_record(&record)
    }

    /// Record that a dirty page's after-image was forced to durable storage,
    /// satisfying the write-ahead rule for that write.
    pub fn force_page_write(
        &mut self,
        txn_id: u64,
        file_name: &str,
        page_id: u64,
        before_image: &[u8],
        after_image: &[u8],
    ) -> DbResult<u64> {
        let lsn = self.next_lsn;
        self.next_lsn += 1;
        let record = WalRecord::page_write(lsn, txn_id, file_name, page_id, before_image, after_image);
        self.write_record(&record)
    }

    /// Seal the current segment and start a new one, returning the
    /// checkpoint LSN. Segments wholly older than the checkpoint become
    /// eligible for [`Wal::reclaim`].
    pub fn checkpoint(&mut self) -> DbResult<u64> {
        let checkpoint_lsn = self.append(WalBody::Checkpoint {
            checkpoint_lsn: self.next_lsn,
        })?;
        self.current_seq += 1;
        let path = self.dir.join(segment_name(self.current_seq));
        self.current_file = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(checkpoint_lsn)
    }

    /// Delete every segment file whose highest LSN is below `checkpoint_lsn`.
    pub fn reclaim(&mut self, checkpoint_lsn: u64) -> DbResult<usize> {
        let mut removed = 0;
        for (seq, path) in list_segments(&self.dir)? {
            if seq == self.current_seq {
                continue;
            }
            let mut max_lsn = 0u64;
            for line in read_lines(&path)? {
                if let Ok(record) = serde_json::from_str::<WalRecord>(&line) {
                    max_lsn = max_lsn.max(record.lsn);
                }
            }
            if max_lsn < checkpoint_lsn {
                fs::remove_file(&path)?;
                removed += 1;
            }
        }
        Ok(removed)
    }

    pub fn current_lsn(&self) -> u64 {
        self.next_lsn.saturating_sub(1)
    }
}

fn read_lines(path: &Path) -> DbResult<Vec<String>> {
    let file = File::open(path)?;
    BufReader::new(file)
        .lines()
        .map(|l| l.map_err(DbError::from))
        .collect()
}

/// Two-pass recovery: first determine which transactions committed, then
/// replay the after-image of every `PAGE_WRITE` belonging to one of them.
/// `apply_page` receives `(file_name, page_id, after_image)`; `file_name` is
/// the name the file was registered under in its `FileManager`, since a
/// `FileId` is only meaningful within the process that allocated it.
pub fn recover(
    dir: impl AsRef<Path>,
    mut apply_page: impl FnMut(&str, u64, &[u8]) -> DbResult<()>,
) -> DbResult<RecoveryOutcome> {
    let dir = dir.as_ref();
    if !dir.exists() {
        return Ok(RecoveryOutcome::default());
    }
    let segments = list_segments(dir)?;
    let mut outcome = RecoveryOutcome::default();

    // Analysis pass.
    for (_, path) in &segments {
        for line in read_lines(path)? {
            match serde_json::from_str::<WalRecord>(&line) {
                Ok(record) => {
                    if let WalBody::Transaction {
                        txn_id,
                        operation: TxnOp::Commit,
                    } = record.body
                    {
                        outcome.committed_txns.insert(txn_id);
                    }
                }
                Err(_) if line.trim().is_empty() => {}
                Err(err) => {
                    tracing::warn!(%err, "skipping invalid WAL line during analysis pass");
                    outcome.skipped_invalid_lines += 1;
                }
            }
        }
    }

    // Redo pass.
    for (_, path) in &segments {
        for line in read_lines(path)? {
            let record = match serde_json::from_str::<WalRecord>(&line) {
                Ok(record) => record,
                Err(_) => continue, // already counted above
            };
            if let WalBody::PageWrite {
                txn_id,
                file_name,
                page_id,
                after_image,
                ..
            } = record.body
            {
                if outcome.committed_txns.contains(&txn_id) {
                    let bytes = from_hex(&after_image)?;
                    apply_page(&file_name, page_id, &bytes)?;
                    outcome.pages_redone += 1;
                }
            }
        }
    }

    Ok(outcome)
}
