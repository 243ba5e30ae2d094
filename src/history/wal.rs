//! Write-ahead log for the history store, supplementing spec §4.8's
//! full-blob save/load with per-commit durability between checkpoints.
//! Frame format follows `crc32fast`'s own doc example (length-prefixed
//! payload plus a trailing checksum) rather than anything in the
//! reference engine, since its history module has no WAL of its own —
//! ground truth for *why* this exists is spec §4.8's checkpoint model,
//! the frame shape is this crate's own.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::PersistError;

/// One durable operation recorded between checkpoints.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum WalOp {
    Insert { key: String, value: String, description: String, now: i64 },
    NextEntry { parent_fp: u32, child_fp: u32, now: i64 },
    Tombstone { fp: u32 },
    ClearAll { now: i64 },
    ClearUnused { now: i64 },
}

/// In-memory accumulator plus an optional on-disk append log.
#[derive(Debug, Default)]
pub struct HistoryWal {
    pending: Vec<WalOp>,
    checkpoint_threshold: usize,
}

impl HistoryWal {
    pub fn new(checkpoint_threshold: usize) -> Self {
        Self { pending: Vec::new(), checkpoint_threshold }
    }

    pub fn record(&mut self, op: WalOp) {
        self.pending.push(op);
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Whether enough commits have accumulated to warrant a full checkpoint
    /// (spec §4.8's blob save) instead of continuing to append frames.
    pub fn needs_checkpoint(&self) -> bool {
        self.pending.len() >= self.checkpoint_threshold
    }

    /// Take every pending op, leaving the log empty (called right before a
    /// checkpoint succeeds).
    pub fn drain(&mut self) -> Vec<WalOp> {
        std::mem::take(&mut self.pending)
    }

    fn encode_frame(op: &WalOp) -> Result<Vec<u8>, PersistError> {
        let payload = bincode::serialize(op)?;
        let checksum = crc32fast::hash(&payload);
        let mut frame = Vec::with_capacity(8 + payload.len());
        frame.extend_from_slice(&(payload.len() as u32).to_le_bytes());
        frame.extend_from_slice(&payload);
        frame.extend_from_slice(&checksum.to_le_bytes());
        Ok(frame)
    }

    /// Append one frame to the on-disk log (opened in append mode, created
    /// if missing). A single `fs::File::write_all` call per frame; frames
    /// are never rewritten in place.
    pub fn append_to_file(path: &Path, op: &WalOp) -> Result<(), PersistError> {
        let frame = Self::encode_frame(op)?;
        let mut file = OpenOptions::new().create(true).append(true).open(path)?;
        file.write_all(&frame)?;
        Ok(())
    }

    /// Replay every well-formed frame from an on-disk log, in write order.
    /// A corrupt trailing frame (partial write before a crash) stops replay
    /// rather than erroring the whole log, matching §7's "detected and
    /// discarded" wording for partial writes; a corrupt frame in the
    /// *middle* of the log is a real error.
    pub fn replay_from_file(path: &Path) -> Result<Vec<WalOp>, PersistError> {
        let bytes = match fs::read(path) {
            Ok(b) => b,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        let mut ops = Vec::new();
        let mut offset = 0usize;
        while offset < bytes.len() {
            if offset + 4 > bytes.len() {
                break; // trailing partial length prefix: truncated last write
            }
            let len = u32::from_le_bytes(bytes[offset..offset + 4].try_into().unwrap()) as usize;
            let payload_start = offset + 4;
            let payload_end = payload_start + len;
            let checksum_end = payload_end + 4;
            if checksum_end > bytes.len() {
                break; // trailing partial frame
            }
            let payload = &bytes[payload_start..payload_end];
            let stored_checksum =
                u32::from_le_bytes(bytes[payload_end..checksum_end].try_into().unwrap());
            if crc32fast::hash(payload) != stored_checksum {
                return Err(PersistError::CorruptWalFrame { offset });
            }
            let op: WalOp = bincode::deserialize(payload)?;
            ops.push(op);
            offset = checksum_end;
        }
        Ok(ops)
    }

    pub fn truncate_file(path: &Path) -> Result<(), PersistError> {
        fs::write(path, []).map_err(PersistError::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn needs_checkpoint_trips_at_threshold() {
        let mut wal = HistoryWal::new(2);
        wal.record(WalOp::ClearAll { now: 0 });
        assert!(!wal.needs_checkpoint());
        wal.record(WalOp::ClearAll { now: 1 });
        assert!(wal.needs_checkpoint());
    }

    #[test]
    fn drain_empties_the_pending_list() {
        let mut wal = HistoryWal::new(10);
        wal.record(WalOp::Tombstone { fp: 1 });
        let drained = wal.drain();
        assert_eq!(drained.len(), 1);
        assert!(wal.is_empty());
    }

    #[test]
    fn append_and_replay_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("wal.log");
        let op1 = WalOp::Insert { key: "a".into(), value: "A".into(), description: "".into(), now: 1 };
        let op2 = WalOp::NextEntry { parent_fp: 1, child_fp: 2, now: 2 };
        HistoryWal::append_to_file(&path, &op1).unwrap();
        HistoryWal::append_to_file(&path, &op2).unwrap();
        let replayed = HistoryWal::replay_from_file(&path).unwrap();
        assert_eq!(replayed, vec![op1, op2]);
    }

    #[test]
    fn replay_of_missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent.log");
        assert_eq!(HistoryWal::replay_from_file(&path).unwrap(), Vec::new());
    }

    #[test]
    fn truncated_trailing_frame_stops_replay_without_erroring() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("wal.log");
        let op = WalOp::ClearUnused { now: 5 };
        HistoryWal::append_to_file(&path, &op).unwrap();
        let mut bytes = fs::read(&path).unwrap();
        bytes.truncate(bytes.len() - 2); // chop into the checksum
        fs::write(&path, &bytes).unwrap();
        let replayed = HistoryWal::replay_from_file(&path).unwrap();
        assert!(replayed.is_empty());
    }

    #[test]
    fn corrupted_middle_frame_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("wal.log");
        let op1 = WalOp::ClearAll { now: 1 };
        let op2 = WalOp::ClearAll { now: 2 };
        HistoryWal::append_to_file(&path, &op1).unwrap();
        HistoryWal::append_to_file(&path, &op2).unwrap();
        let mut bytes = fs::read(&path).unwrap();
        bytes[5] ^= 0xFF; // flip a byte inside the first frame's payload
        fs::write(&path, &bytes).unwrap();
        let err = HistoryWal::replay_from_file(&path).unwrap_err();
        assert!(matches!(err, PersistError::CorruptWalFrame { .. }));
    }

    #[test]
    fn truncate_file_clears_existing_content() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("wal.log");
        HistoryWal::append_to_file(&path, &WalOp::ClearAll { now: 1 }).unwrap();
        HistoryWal::truncate_file(&path).unwrap();
        assert!(HistoryWal::replay_from_file(&path).unwrap().is_empty());
    }
}
