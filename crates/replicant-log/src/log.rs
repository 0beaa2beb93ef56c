//! The append-only transaction log.
//!
//! Entries are persisted as JSON lines, one entry per line:
//! ```text
//! {dir}/
//!   txlog.jsonl       all retained entries, ascending id
//!   txlog.meta.json   compaction floor and the hash anchoring it
//! ```
//! The log itself is not synchronized. The master serializes access
//! because id assignment and append have to happen in the same critical
//! section as its commit checks.

use std::collections::HashMap;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use replicant_core::{ChangeSet, GlobalTxId, MemberId, TxId};

use crate::error::{LogError, Result};
use crate::LogEntry;

const LOG_FILE: &str = "txlog.jsonl";
const META_FILE: &str = "txlog.meta.json";

/// Compaction state written next to the entries.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct LogMeta {
    /// Id of the first retained entry.
    floor: GlobalTxId,
    /// Content hash of the last compacted entry.
    anchor_hash: Option<String>,
}

#[derive(Debug)]
pub struct TransactionLog {
    dir: Option<PathBuf>,
    entries: Vec<LogEntry>,
    meta: LogMeta,
    last_id: GlobalTxId,
    committed: HashMap<TxId, GlobalTxId>,
}

impl TransactionLog {
    /// A log that lives only in memory.
    pub fn in_memory() -> Self {
        Self {
            dir: None,
            entries: Vec::new(),
            meta: LogMeta {
                floor: GlobalTxId(1),
                anchor_hash: None,
            },
            last_id: GlobalTxId::ZERO,
            committed: HashMap::new(),
        }
    }

    /// Open (or create) the log persisted in `dir`, verifying the hash chain.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;

        let mut log = Self::in_memory();
        let meta_path = dir.join(META_FILE);
        if meta_path.is_file() {
            log.meta = serde_json::from_str(&fs::read_to_string(&meta_path)?)?;
        }
        log.last_id = GlobalTxId(log.meta.floor.0.saturating_sub(1));

        let log_path = dir.join(LOG_FILE);
        if log_path.is_file() {
            let contents = fs::read_to_string(&log_path)?;
            for line in contents.lines().filter(|l| !l.trim().is_empty()) {
                let entry: LogEntry = serde_json::from_str(line)?;
                log.check_successor(&entry)?;
                log.push(entry);
            }
        }
        log.dir = Some(dir);

        tracing::info!(
            floor = %log.meta.floor,
            last_id = %log.last_id,
            entries = log.entries.len(),
            "Transaction log opened"
        );
        Ok(log)
    }

    pub fn dir(&self) -> Option<&Path> {
        self.dir.as_deref()
    }

    /// Id of the newest entry, or zero when nothing was ever committed.
    pub fn last_id(&self) -> GlobalTxId {
        self.last_id
    }

    /// Id of the oldest entry still served.
    pub fn first_retained_id(&self) -> GlobalTxId {
        self.meta.floor
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Global id a transaction was committed under, if it is in the log.
    pub fn committed_id(&self, tx: &TxId) -> Option<GlobalTxId> {
        self.committed.get(tx).copied()
    }

    /// Highest local transaction counter `member` committed among the
    /// retained entries, or 0.
    pub fn last_local_tx(&self, member: MemberId) -> u64 {
        self.committed
            .keys()
            .filter(|tx| tx.member == member)
            .map(|tx| tx.local)
            .max()
            .unwrap_or(0)
    }

    fn last_hash(&self) -> Option<String> {
        match self.entries.last() {
            Some(e) => Some(e.content_hash.clone()),
            None => self.meta.anchor_hash.clone(),
        }
    }

    /// Assign the next id to `change_set`, persist it, and append it.
    pub fn append(&mut self, member: MemberId, tx: TxId, change_set: ChangeSet) -> Result<LogEntry> {
        let id = self.last_id.next();
        let entry = LogEntry::seal(id, member, tx, change_set, self.last_hash())?;

        if let Some(dir) = &self.dir {
            let mut file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(dir.join(LOG_FILE))?;
            let mut line = serde_json::to_vec(&entry)?;
            line.push(b'\n');
            file.write_all(&line)?;
            file.sync_data()?;
        }

        tracing::debug!(global_id = %id, tx = %tx, member = %member, "Log entry appended");
        self.push(entry.clone());
        Ok(entry)
    }

    /// All entries with id greater than `since`, ascending.
    ///
    /// Fails with [`LogError::ReplicationGap`] when some of those entries
    /// have already been compacted away.
    pub fn entries_since(&self, since: GlobalTxId) -> Result<Vec<LogEntry>> {
        if since.next() < self.meta.floor {
            return Err(LogError::ReplicationGap {
                requested: since,
                first_available: self.meta.floor,
            });
        }
        let skip = (since.0 + 1).saturating_sub(self.meta.floor.0) as usize;
        Ok(self.entries.iter().skip(skip).cloned().collect())
    }

    /// Drop every entry with id lower than `id`.
    pub fn truncate_before(&mut self, id: GlobalTxId) -> Result<usize> {
        if id <= self.meta.floor {
            return Ok(0);
        }
        let floor = id.min(self.last_id.next());
        let drop = (floor.0 - self.meta.floor.0) as usize;
        if drop == 0 {
            return Ok(0);
        }
        let anchor_hash = self
            .entries
            .get(drop - 1)
            .map(|e| e.content_hash.clone());
        let dropped: Vec<LogEntry> = self.entries.drain(..drop).collect();
        for entry in &dropped {
            self.committed.remove(&entry.tx);
        }
        self.meta = LogMeta { floor, anchor_hash };

        if let Some(dir) = &self.dir {
            write_atomically(&dir.join(META_FILE), &serde_json::to_vec_pretty(&self.meta)?)?;
            let mut body = Vec::new();
            for entry in &self.entries {
                body.extend(serde_json::to_vec(entry)?);
                body.push(b'\n');
            }
            write_atomically(&dir.join(LOG_FILE), &body)?;
        }

        tracing::info!(floor = %floor, dropped = dropped.len(), "Transaction log compacted");
        Ok(dropped.len())
    }

    fn check_successor(&self, entry: &LogEntry) -> Result<()> {
        let corrupt = |reason: String| LogError::Corrupt {
            id: entry.id,
            reason,
        };
        if entry.id != self.last_id.next() {
            return Err(corrupt(format!("expected id {}", self.last_id.next())));
        }
        if entry.prev_hash != self.last_hash() {
            return Err(corrupt("previous hash does not match chain".to_string()));
        }
        if !entry.verify_integrity() {
            return Err(corrupt("content hash does not match content".to_string()));
        }
        Ok(())
    }

    fn push(&mut self, entry: LogEntry) {
        self.last_id = entry.id;
        self.committed.insert(entry.tx, entry.id);
        self.entries.push(entry);
    }
}

fn write_atomically(path: &Path, bytes: &[u8]) -> Result<()> {
    let tmp = path.with_extension("tmp");
    fs::write(&tmp, bytes)?;
    fs::rename(&tmp, path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use replicant_core::{Mutation, NodeId};

    fn tx(local: u64) -> TxId {
        TxId {
            member: MemberId(1),
            local,
        }
    }

    fn create(id: u64) -> ChangeSet {
        ChangeSet::from(vec![Mutation::CreateNode { id: NodeId(id) }])
    }

    #[test]
    fn ids_are_strictly_increasing() {
        let mut log = TransactionLog::in_memory();
        let a = log.append(MemberId(1), tx(1), create(1)).unwrap();
        let b = log.append(MemberId(1), tx(2), create(2)).unwrap();
        assert_eq!(a.id, GlobalTxId(1));
        assert_eq!(b.id, GlobalTxId(2));
        assert_eq!(b.prev_hash.as_deref(), Some(a.content_hash.as_str()));
        assert_eq!(log.committed_id(&tx(2)), Some(GlobalTxId(2)));
        assert_eq!(log.last_local_tx(MemberId(1)), 2);
        assert_eq!(log.last_local_tx(MemberId(2)), 0);
    }

    #[test]
    fn entries_since_returns_the_tail() {
        let mut log = TransactionLog::in_memory();
        for i in 1..=3 {
            log.append(MemberId(1), tx(i), create(i)).unwrap();
        }
        let ids: Vec<_> = log
            .entries_since(GlobalTxId(1))
            .unwrap()
            .into_iter()
            .map(|e| e.id)
            .collect();
        assert_eq!(ids, vec![GlobalTxId(2), GlobalTxId(3)]);
        assert!(log.entries_since(GlobalTxId(3)).unwrap().is_empty());
        assert!(log.entries_since(GlobalTxId(9)).unwrap().is_empty());
    }

    #[test]
    fn compacted_range_is_a_gap() {
        let mut log = TransactionLog::in_memory();
        for i in 1..=4 {
            log.append(MemberId(1), tx(i), create(i)).unwrap();
        }
        assert_eq!(log.truncate_before(GlobalTxId(3)).unwrap(), 2);
        assert_eq!(log.first_retained_id(), GlobalTxId(3));

        let gap = log.entries_since(GlobalTxId(1));
        assert!(matches!(
            gap,
            Err(LogError::ReplicationGap {
                first_available: GlobalTxId(3),
                ..
            })
        ));
        assert_eq!(log.entries_since(GlobalTxId(2)).unwrap().len(), 2);

        // Appending after compaction continues the chain.
        let next = log.append(MemberId(1), tx(5), create(5)).unwrap();
        assert_eq!(next.id, GlobalTxId(5));
    }

    #[test]
    fn reopen_restores_entries_and_chain() {
        let dir = tempfile::tempdir().unwrap();
        {
            let mut log = TransactionLog::open(dir.path()).unwrap();
            for i in 1..=3 {
                log.append(MemberId(1), tx(i), create(i)).unwrap();
            }
            log.truncate_before(GlobalTxId(2)).unwrap();
        }

        let mut log = TransactionLog::open(dir.path()).unwrap();
        assert_eq!(log.last_id(), GlobalTxId(3));
        assert_eq!(log.first_retained_id(), GlobalTxId(2));
        assert_eq!(log.committed_id(&tx(3)), Some(GlobalTxId(3)));
        let next = log.append(MemberId(1), tx(4), create(4)).unwrap();
        assert_eq!(next.id, GlobalTxId(4));

        let reopened = TransactionLog::open(dir.path()).unwrap();
        assert_eq!(reopened.last_id(), GlobalTxId(4));
    }

    #[test]
    fn tampered_file_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        {
            let mut log = TransactionLog::open(dir.path()).unwrap();
            log.append(MemberId(1), tx(1), create(1)).unwrap();
        }
        let path = dir.path().join(LOG_FILE);
        let tampered = fs::read_to_string(&path)
            .unwrap()
            .replace(r#""id":1}"#, r#""id":7}"#);
        fs::write(&path, tampered).unwrap();

        let result = TransactionLog::open(dir.path());
        assert!(matches!(result, Err(LogError::Corrupt { .. })));
    }
}
