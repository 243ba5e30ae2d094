//! C6: the history entry and its LRU store.
//!
//! The persistence mechanics (magic + version header, bincode body, atomic
//! tmp-then-rename write) follow the reference engine's own
//! `user_history::UserHistory::{to_bytes, from_bytes, save, open}`, but the
//! data model is the spec's fingerprint/successor-chain entry rather than
//! the reference engine's reading→surface frequency table — the two
//! designs solve different problems and only the on-disk envelope carries
//! over.

pub mod predictor;
mod wal;

pub use predictor::{
    MatchKind, PredictRequest, PredictResult, Predictor, RevertToken, TryInsertError,
};
pub use wal::{HistoryWal, WalOp};

use std::collections::{HashMap, VecDeque};
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::PersistError;

const MAGIC: &[u8; 4] = b"LXCH";
const VERSION: u8 = 1;

/// 32-bit FNV-1a, used for entry identity (spec §3: "32-bit hash of
/// `key + \"\\t\" + value`"). `crc32fast` is reserved for WAL frame
/// integrity elsewhere in this module, not identity hashing.
pub fn fingerprint(key: &str, value: &str) -> u32 {
    const OFFSET_BASIS: u32 = 0x811c_9dc5;
    const PRIME: u32 = 0x0100_0193;
    let mut hash = OFFSET_BASIS;
    for byte in key.as_bytes().iter().chain(b"\t").chain(value.as_bytes()) {
        hash ^= *byte as u32;
        hash = hash.wrapping_mul(PRIME);
    }
    hash
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EntryType {
    Default,
    CleanAllEvent,
    CleanUnusedEvent,
}

/// One learned (reading, surface) pair plus the bookkeeping the predictor
/// needs to rank and chain it (spec §3 "History entry (C6)").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub key: String,
    pub value: String,
    pub description: String,
    pub next_entries: Vec<u32>,
    pub last_access_time: i64,
    pub suggestion_freq: u32,
    pub conversion_freq: u32,
    pub removed: bool,
    pub spelling_correction: bool,
    pub bigram_boost: bool,
    pub entry_type: EntryType,
}

impl HistoryEntry {
    fn new(key: String, value: String, description: String, now: i64) -> Self {
        Self {
            key,
            value,
            description,
            next_entries: Vec::new(),
            last_access_time: now,
            suggestion_freq: 0,
            conversion_freq: 0,
            removed: false,
            spelling_correction: false,
            bigram_boost: false,
            entry_type: EntryType::Default,
        }
    }

    pub fn fingerprint(&self) -> u32 {
        fingerprint(&self.key, &self.value)
    }
}

/// Live counts reported after a load/save round trip (spec §7: expiry
/// counts are "reported through usage statistics", surface left open by
/// the distilled spec).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HistoryStats {
    pub live_entries: usize,
    pub expired_pruned: usize,
    pub removed_tombstones: usize,
}

/// Settings the store needs at construction; copied out of
/// [`crate::settings::HistorySettings`] rather than borrowed so the store
/// never outlives a settings reload.
#[derive(Debug, Clone, Copy)]
pub struct StoreLimits {
    pub cache_size: usize,
    pub expiry_days: u64,
    pub max_successors: usize,
}

impl From<&crate::settings::HistorySettings> for StoreLimits {
    fn from(s: &crate::settings::HistorySettings) -> Self {
        Self {
            cache_size: s.cache_size,
            expiry_days: s.expiry_days,
            max_successors: s.max_successors,
        }
    }
}

/// The LRU map keyed by entry fingerprint (spec §3, §4.5, §4.8).
///
/// Recency is tracked as an explicit order list rather than an intrusive
/// linked list threaded through the map, since Rust's aliasing rules make
/// the reference engine's raw-pointer LRU (if it used one) awkward to
/// carry over; a `VecDeque<u32>` of fingerprints, most-recent at the back,
/// gives the same walk-from-most-recent behaviour §4.5 needs.
#[derive(Debug, Clone, Default)]
pub struct HistoryStore {
    entries: HashMap<u32, HistoryEntry>,
    order: VecDeque<u32>,
    limits: StoreLimitsStorage,
}

/// `StoreLimits` without `Copy`-derive friction inside `HistoryStore`'s
/// `Default` impl (limits are always overwritten by a real value before
/// use; this just needs *a* value to satisfy `derive(Default)`).
#[derive(Debug, Clone, Copy)]
struct StoreLimitsStorage(StoreLimits);

impl Default for StoreLimitsStorage {
    fn default() -> Self {
        Self(StoreLimits {
            cache_size: 10_000,
            expiry_days: 62,
            max_successors: 4,
        })
    }
}

impl HistoryStore {
    pub fn new(limits: StoreLimits) -> Self {
        Self {
            entries: HashMap::new(),
            order: VecDeque::new(),
            limits: StoreLimitsStorage(limits),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, fp: u32) -> Option<&HistoryEntry> {
        self.entries.get(&fp)
    }

    /// Most-recent-first iterator over live (non-tombstoned) entries.
    pub fn iter_recent(&self) -> impl Iterator<Item = &HistoryEntry> {
        self.order
            .iter()
            .rev()
            .filter_map(move |fp| self.entries.get(fp))
            .filter(|e| !e.removed)
    }

    fn touch_order(&mut self, fp: u32) {
        self.order.retain(|f| *f != fp);
        self.order.push_back(fp);
    }

    fn is_expired(&self, entry: &HistoryEntry, now: i64) -> bool {
        let expiry_secs = self.limits.0.expiry_days as i64 * 86_400;
        now.saturating_sub(entry.last_access_time) > expiry_secs
    }

    fn default_count(&self) -> usize {
        self.entries
            .values()
            .filter(|e| e.entry_type == EntryType::Default)
            .count()
    }

    /// Insert (key, value, description), or refresh an existing entry's
    /// recency/frequency if one with the same fingerprint already exists.
    /// Returns the entry's fingerprint (spec §4.5 step 4).
    pub fn insert_or_touch(
        &mut self,
        key: &str,
        value: &str,
        description: &str,
        now: i64,
    ) -> u32 {
        let fp = fingerprint(key, value);
        match self.entries.get_mut(&fp) {
            Some(entry) => {
                entry.last_access_time = now;
                entry.conversion_freq = entry.conversion_freq.saturating_add(1);
                entry.removed = false;
            }
            None => {
                self.entries
                    .insert(fp, HistoryEntry::new(key.to_string(), value.to_string(), description.to_string(), now));
            }
        }
        self.touch_order(fp);
        self.evict();
        fp
    }

    /// Append a singleton event marker, recognised on load as a request to
    /// wipe the store (spec §4.8).
    pub fn insert_event(&mut self, kind: EntryType, now: i64) -> u32 {
        let fp = fingerprint(&format!("{kind:?}"), "");
        let mut entry = HistoryEntry::new(String::new(), String::new(), String::new(), now);
        entry.entry_type = kind;
        self.entries.insert(fp, entry);
        self.touch_order(fp);
        fp
    }

    /// Link `parent_fp`'s successor chain to `child_fp` (spec §4.5 step 4):
    /// reuse an existing slot naming the same fingerprint; else an
    /// expired-or-missing slot; else the oldest slot.
    pub fn insert_next_entry(&mut self, parent_fp: u32, child_fp: u32, now: i64) {
        let max = self.limits.0.max_successors;
        let Some(existing) = self.entries.get(&parent_fp).map(|e| e.next_entries.clone()) else {
            return;
        };
        if existing.contains(&child_fp) {
            return;
        }
        let slot = if existing.len() < max {
            None
        } else {
            let mut chosen = 0usize;
            let mut found_gap = false;
            let mut oldest_time = i64::MAX;
            for (i, fp) in existing.iter().enumerate() {
                match self.entries.get(fp) {
                    None => {
                        chosen = i;
                        found_gap = true;
                        break;
                    }
                    Some(e) if self.is_expired(e, now) => {
                        chosen = i;
                        found_gap = true;
                        break;
                    }
                    Some(e) => {
                        if e.last_access_time < oldest_time {
                            oldest_time = e.last_access_time;
                            chosen = i;
                        }
                    }
                }
            }
            let _ = found_gap;
            Some(chosen)
        };
        if let Some(entry) = self.entries.get_mut(&parent_fp) {
            match slot {
                None => entry.next_entries.push(child_fp),
                Some(i) => entry.next_entries[i] = child_fp,
            }
        }
    }

    /// Set or clear the one-shot bigram-boost flag (spec §4.5 step 5,
    /// glossary "Bigram boost"): raised on an entry when a `finish` call
    /// chains it directly from the previous committed entry, consulted
    /// by `predict`'s scoring.
    pub(crate) fn set_bigram_boost(&mut self, fp: u32, boost: bool) {
        if let Some(entry) = self.entries.get_mut(&fp) {
            entry.bigram_boost = boost;
        }
    }

    /// Tombstone an entry: retained (its fingerprint may still be a link
    /// target in another entry's `next_entries`) but never returned as a
    /// candidate again (spec §3).
    pub fn tombstone(&mut self, fp: u32) {
        if let Some(entry) = self.entries.get_mut(&fp) {
            entry.removed = true;
        }
    }

    /// Erase an entry outright: used only by [`predictor::Predictor::revert`]
    /// to undo a just-created entry before any chain referenced it (spec
    /// §4.7).
    pub fn hard_remove(&mut self, fp: u32) {
        self.entries.remove(&fp);
        self.order.retain(|f| *f != fp);
    }

    pub fn clear_all(&mut self, now: i64) {
        self.entries.clear();
        self.order.clear();
        self.insert_event(EntryType::CleanAllEvent, now);
    }

    pub fn clear_unused(&mut self, now: i64) {
        self.entries.retain(|_, e| {
            e.entry_type != EntryType::Default
                || e.suggestion_freq > 0
                || e.conversion_freq > 0
        });
        let live: std::collections::HashSet<u32> = self.entries.keys().copied().collect();
        self.order.retain(|fp| live.contains(fp));
        self.insert_event(EntryType::CleanUnusedEvent, now);
    }

    pub fn clear_entry(&mut self, key: &str, value: &str) {
        self.hard_remove(fingerprint(key, value));
    }

    /// Drop entries older than `expiry_days` (spec §3, §7). Event markers
    /// never expire: they're one-shot signals, not learned content.
    pub fn expire(&mut self, now: i64) -> usize {
        let expired: Vec<u32> = self
            .entries
            .iter()
            .filter(|(_, e)| e.entry_type == EntryType::Default && self.is_expired(e, now))
            .map(|(fp, _)| *fp)
            .collect();
        let count = expired.len();
        for fp in &expired {
            self.entries.remove(fp);
        }
        if count > 0 {
            let live: std::collections::HashSet<u32> = self.entries.keys().copied().collect();
            self.order.retain(|fp| live.contains(fp));
        }
        count
    }

    /// Drop the oldest DEFAULT entries until `cache_size` holds (spec §3:
    /// "at most `cache_size` DEFAULT entries plus event markers").
    fn evict(&mut self) {
        while self.default_count() > self.limits.0.cache_size {
            let Some(victim) = self
                .order
                .iter()
                .find(|fp| {
                    self.entries
                        .get(fp)
                        .is_some_and(|e| e.entry_type == EntryType::Default)
                })
                .copied()
            else {
                break;
            };
            self.entries.remove(&victim);
            self.order.retain(|fp| *fp != victim);
        }
    }

    fn stats(&self) -> HistoryStats {
        HistoryStats {
            live_entries: self.entries.len(),
            expired_pruned: 0,
            removed_tombstones: self.entries.values().filter(|e| e.removed).count(),
        }
    }

    fn to_bytes(&self) -> Result<Vec<u8>, PersistError> {
        let records: Vec<&HistoryEntry> = self.order.iter().filter_map(|fp| self.entries.get(fp)).collect();
        let body = bincode::serialize(&records)?;
        let mut buf = Vec::with_capacity(5 + body.len());
        buf.extend_from_slice(MAGIC);
        buf.push(VERSION);
        buf.extend_from_slice(&body);
        Ok(buf)
    }

    fn from_bytes(bytes: &[u8], limits: StoreLimits) -> Result<Self, PersistError> {
        if bytes.len() < 5 {
            return Err(PersistError::TooShort { len: bytes.len() });
        }
        if &bytes[0..4] != MAGIC {
            return Err(PersistError::BadMagic);
        }
        if bytes[4] != VERSION {
            return Err(PersistError::UnsupportedVersion(bytes[4]));
        }
        let records: Vec<HistoryEntry> = bincode::deserialize(&bytes[5..])?;
        let mut store = Self::new(limits);
        for entry in records {
            let fp = entry.fingerprint();
            store.entries.insert(fp, entry);
            store.order.push_back(fp);
        }
        Ok(store)
    }

    /// Write a full checkpoint atomically (write to `.tmp`, rename over the
    /// target), then re-read it back so in-memory order matches on-disk
    /// order exactly (spec §4.8: "save writes, then immediately re-loads").
    pub fn save(&mut self, path: &Path) -> Result<HistoryStats, PersistError> {
        let now = now_epoch();
        let pruned = self.expire(now);
        let bytes = self.to_bytes().inspect_err(|e| {
            tracing::warn!("history checkpoint serialization failed: {e}");
        })?;
        let tmp = path.with_extension("tmp");
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&tmp, &bytes)?;
        fs::rename(&tmp, path)?;
        let reloaded = Self::from_bytes(&bytes, self.limits.0)?;
        let mut stats = reloaded.stats();
        stats.expired_pruned = pruned;
        *self = reloaded;
        Ok(stats)
    }

    /// Load a checkpoint, expiring stale entries as they come in. Missing
    /// files load as an empty store rather than an error (spec §7).
    pub fn load(path: &Path, limits: StoreLimits) -> Result<(Self, HistoryStats), PersistError> {
        let bytes = match fs::read(path) {
            Ok(b) => b,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok((Self::new(limits), HistoryStats::default()))
            }
            Err(e) => {
                tracing::warn!("history checkpoint read failed: {e}");
                return Err(e.into());
            }
        };
        let mut store = Self::from_bytes(&bytes, limits)?;
        if store.entries.values().any(|e| e.entry_type == EntryType::CleanAllEvent) {
            store.entries.clear();
            store.order.clear();
        } else if store.entries.values().any(|e| e.entry_type == EntryType::CleanUnusedEvent) {
            let now = now_epoch();
            store.clear_unused(now);
        }
        let now = now_epoch();
        let pruned = store.expire(now);
        let mut stats = store.stats();
        stats.expired_pruned = pruned;
        Ok((store, stats))
    }
}

pub(crate) fn now_epoch() -> i64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limits() -> StoreLimits {
        StoreLimits { cache_size: 3, expiry_days: 62, max_successors: 2 }
    }

    #[test]
    fn fingerprint_is_stable_and_order_sensitive() {
        assert_eq!(fingerprint("き", "木"), fingerprint("き", "木"));
        assert_ne!(fingerprint("き", "木"), fingerprint("き", "気"));
    }

    #[test]
    fn insert_then_touch_collapses_to_one_entry() {
        let mut store = HistoryStore::new(limits());
        let fp1 = store.insert_or_touch("あ", "亜", "", 100);
        let fp2 = store.insert_or_touch("あ", "亜", "", 200);
        assert_eq!(fp1, fp2);
        assert_eq!(store.len(), 1);
        assert_eq!(store.get(fp1).unwrap().last_access_time, 200);
    }

    #[test]
    fn eviction_bound_holds_after_many_inserts() {
        let mut store = HistoryStore::new(limits());
        for i in 0..10 {
            store.insert_or_touch(&format!("k{i}"), &format!("v{i}"), "", i as i64);
        }
        assert!(store.len() <= limits().cache_size);
    }

    #[test]
    fn eviction_drops_oldest_first() {
        let mut store = HistoryStore::new(limits());
        let fp0 = store.insert_or_touch("k0", "v0", "", 0);
        store.insert_or_touch("k1", "v1", "", 1);
        store.insert_or_touch("k2", "v2", "", 2);
        store.insert_or_touch("k3", "v3", "", 3);
        assert!(store.get(fp0).is_none());
        assert_eq!(store.len(), 3);
    }

    #[test]
    fn expire_drops_entries_past_the_horizon() {
        let mut store = HistoryStore::new(limits());
        store.insert_or_touch("old", "v", "", 0);
        let pruned = store.expire(62 * 86_400 + 1);
        assert_eq!(pruned, 1);
        assert!(store.is_empty());
    }

    #[test]
    fn next_entries_respects_successor_bound() {
        let mut store = HistoryStore::new(limits());
        let parent = store.insert_or_touch("p", "P", "", 0);
        let c1 = store.insert_or_touch("c1", "C1", "", 1);
        let c2 = store.insert_or_touch("c2", "C2", "", 2);
        let c3 = store.insert_or_touch("c3", "C3", "", 3);
        store.insert_next_entry(parent, c1, 1);
        store.insert_next_entry(parent, c2, 2);
        assert_eq!(store.get(parent).unwrap().next_entries.len(), 2);
        store.insert_next_entry(parent, c3, 3);
        assert_eq!(store.get(parent).unwrap().next_entries.len(), 2);
        assert!(store.get(parent).unwrap().next_entries.contains(&c3));
    }

    #[test]
    fn tombstone_keeps_entry_but_hides_it_from_recent_walk() {
        let mut store = HistoryStore::new(limits());
        let fp = store.insert_or_touch("a", "A", "", 0);
        store.tombstone(fp);
        assert!(store.get(fp).is_some());
        assert_eq!(store.iter_recent().count(), 0);
    }

    #[test]
    fn save_and_load_round_trip_preserves_entries() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("history.bin");
        let mut store = HistoryStore::new(limits());
        store.insert_or_touch("あ", "亜", "kanji", 1_000_000);
        store.save(&path).unwrap();
        let (loaded, stats) = HistoryStore::load(&path, limits()).unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(stats.live_entries, 1);
    }

    #[test]
    fn load_of_missing_file_is_an_empty_store() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent.bin");
        let (store, stats) = HistoryStore::load(&path, limits()).unwrap();
        assert!(store.is_empty());
        assert_eq!(stats, HistoryStats::default());
    }

    #[test]
    fn clear_all_wipes_and_is_recognised_on_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("history.bin");
        let mut store = HistoryStore::new(limits());
        store.insert_or_touch("a", "A", "", 0);
        store.save(&path).unwrap();
        store.clear_all(1);
        store.save(&path).unwrap();
        let (loaded, _) = HistoryStore::load(&path, limits()).unwrap();
        assert!(loaded.is_empty());
    }

    #[test]
    fn bad_magic_is_rejected() {
        let err = HistoryStore::from_bytes(b"xxxx\x01", limits()).unwrap_err();
        assert!(matches!(err, PersistError::BadMagic));
    }

    #[test]
    fn truncated_blob_is_rejected() {
        let err = HistoryStore::from_bytes(b"LX", limits()).unwrap_err();
        assert!(matches!(err, PersistError::TooShort { .. }));
    }
}
