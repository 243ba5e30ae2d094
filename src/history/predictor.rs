//! C7: the history predictor's lookup, commit and background-persistence
//! API (spec §4.5, §4.7, §5, §6.3).
//!
//! The background save/load handoff follows the reference engine's
//! `async_worker::AsyncWorker`: a channel carries ownership of the store
//! to a spawned thread and back, with no shared mutable state crossing the
//! boundary, exactly as spec §9's design note asks for.

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::{mpsc, Arc};
use std::thread;

use crate::corrector::TypingCorrector;
use crate::error::PersistError;

use super::wal::WalOp;
use super::{fingerprint, now_epoch, HistoryStats, HistoryStore, HistoryWal, StoreLimits};

/// A fully-resolved predict request, built from a composition's expanded
/// strings (spec §4.5 step 2) plus whatever context the caller tracks.
#[derive(Debug, Clone, Default)]
pub struct PredictRequest {
    pub input_key: String,
    pub key_base: String,
    pub key_expanded: HashSet<String>,
    pub previous_value: Option<String>,
    pub roman_mode: bool,
    pub suggestion_mode: bool,
    pub max_results: usize,
    pub incognito: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PredictResult {
    pub key: String,
    pub value: String,
    pub description: String,
    pub spelling_correction: bool,
    pub score: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchKind {
    NoMatch,
    LeftEmptyMatch,
    LeftPrefixMatch,
    RightPrefixMatch,
    ExactMatch,
}

/// Classifies a candidate entry key `k` against a request (spec §4.5
/// "Match classifier").
///
/// `previous_entry_resolved` stands in for the reference classifier's
/// null-vs-non-null `key_base` check on the zero-query path: it's `true`
/// only once [`Predictor::predict`] has confirmed `previous_value`
/// actually resolves to a live entry, not merely that the caller passed
/// one.
fn classify(req: &PredictRequest, k: &str, previous_entry_resolved: bool) -> MatchKind {
    if req.key_base.is_empty() && req.key_expanded.is_empty() {
        if req.input_key.is_empty() && previous_entry_resolved {
            return MatchKind::LeftEmptyMatch;
        }
        return MatchKind::NoMatch;
    }
    if k == req.input_key
        && req
            .key_expanded
            .iter()
            .any(|tail| req.key_base.clone() + tail == req.input_key)
    {
        return MatchKind::ExactMatch;
    }
    // A `key_base` that's a strict prefix of `k` is a completion
    // candidate regardless of `key_expanded`; when expanded tails are
    // present they only refine which first post-base character is
    // acceptable, they don't gate the whole remainder (the reference
    // classifier's null-`key_expanded` branch still fires a prefix
    // match on bare `key_base`).
    if !req.key_base.is_empty() {
        if let Some(remainder) = k.strip_prefix(req.key_base.as_str()) {
            if k.len() > req.key_base.len() {
                let refines = req.key_expanded.is_empty()
                    || req
                        .key_expanded
                        .iter()
                        .any(|tail| !tail.is_empty() && remainder.starts_with(tail.chars().next().unwrap()));
                if refines {
                    return MatchKind::LeftPrefixMatch;
                }
            }
        }
    }
    if !k.is_empty() && req.key_base.starts_with(k) {
        return MatchKind::RightPrefixMatch;
    }
    MatchKind::NoMatch
}

/// A content word starts with a non-symbol, non-punctuation script
/// character; only these update n-gram chaining timestamps (spec §4.5).
fn is_content_word(value: &str) -> bool {
    value
        .chars()
        .next()
        .is_some_and(|c| c.is_alphanumeric() || is_kana_or_kanji(c))
}

fn is_kana_or_kanji(c: char) -> bool {
    let code = c as u32;
    (0x3040..=0x30ff).contains(&code) || (0x4e00..=0x9fff).contains(&code)
}

/// Spec §4.5 "Fuzzy matching": `s` looks roman-misspelled if it has
/// exactly one ASCII letter, optionally one other non-alphanumeric, and at
/// least one Hiragana character.
pub fn maybe_roman_misspelled_key(s: &str) -> bool {
    let mut ascii_letters = 0usize;
    let mut other_non_alnum = 0usize;
    let mut hiragana = 0usize;
    for c in s.chars() {
        if c.is_ascii_alphabetic() {
            ascii_letters += 1;
        } else if (0x3041..=0x3096).contains(&(c as u32)) {
            hiragana += 1;
        } else if !c.is_alphanumeric() {
            other_non_alnum += 1;
        }
    }
    ascii_letters == 1 && other_non_alnum <= 1 && hiragana >= 1
}

/// Accept `candidate_roman` as a fuzzy match for `input_roman` if the
/// input becomes a prefix of the candidate after at most one of: a single
/// insertion, an adjacent-character swap, or substituting a `-` in the
/// candidate by any non-alphanumeric the input has at that position (spec
/// §4.5).
pub fn roman_fuzzy_prefix_match(candidate_roman: &str, input_roman: &str) -> bool {
    if candidate_roman.starts_with(input_roman) {
        return true;
    }
    let cand: Vec<char> = candidate_roman.chars().collect();
    let input: Vec<char> = input_roman.chars().collect();

    // Single-character insertion into input_roman (i.e. dropping one char
    // from input_roman still prefixes candidate_roman).
    for i in 0..input.len() {
        let mut trial: Vec<char> = input.clone();
        trial.remove(i);
        if starts_with_chars(&cand, &trial) {
            return true;
        }
    }
    // Adjacent-character swap.
    for i in 0..input.len().saturating_sub(1) {
        let mut trial = input.clone();
        trial.swap(i, i + 1);
        if starts_with_chars(&cand, &trial) {
            return true;
        }
    }
    // `-` in candidate substituted by a non-alphanumeric from input at the
    // same position.
    if cand.len() <= input.len() {
        let mut substituted = true;
        for (i, &c) in cand.iter().enumerate() {
            if c == '-' {
                if !input.get(i).is_some_and(|ic| !ic.is_alphanumeric()) {
                    substituted = false;
                    break;
                }
            } else if Some(&c) != input.get(i) {
                substituted = false;
                break;
            }
        }
        if substituted {
            return true;
        }
    }
    false
}

fn starts_with_chars(haystack: &[char], needle: &[char]) -> bool {
    needle.len() <= haystack.len() && haystack[..needle.len()] == *needle
}

/// Shared by [`Predictor::resolve_previous_entry`] and
/// [`Predictor::predict`]: find the most-recent entry whose value equals
/// or is a suffix of `prev_value`, scanning at most `scan_limit` of the
/// most-recent LRU elements (spec §4.5 step 3).
fn find_previous_entry_by_value(
    store: &HistoryStore,
    prev_value: &str,
    scan_limit: usize,
) -> Option<(u32, String)> {
    store
        .iter_recent()
        .take(scan_limit)
        .find(|e| e.value == prev_value || prev_value.ends_with(&e.value))
        .map(|e| (e.fingerprint(), e.value.clone()))
}

/// Chain `next_entries` from `start_fp` forward, greedily preferring the
/// left-most then left-closest then most-recent content-word successor,
/// until `target_len` chars are reached or a fingerprint repeats (spec
/// §4.5 "N-gram chaining", §8 property 8). Shared between the standalone
/// [`Predictor::chain_from`] and the `RIGHT_PREFIX_MATCH`/`EXACT_MATCH`
/// extension step inside [`Predictor::predict`].
fn chain_within(store: &HistoryStore, start_fp: u32, target_len: usize) -> Option<(String, String)> {
    let mut visited = HashSet::new();
    let mut current = store.get(start_fp)?.clone();
    let mut key = current.key.clone();
    let mut value = current.value.clone();
    visited.insert(start_fp);

    let mut steps = 0;
    while key.chars().count() < target_len && steps < 3000 {
        steps += 1;
        let mut candidates: Vec<&super::HistoryEntry> = current
            .next_entries
            .iter()
            .filter(|fp| !visited.contains(*fp))
            .filter_map(|fp| store.get(*fp))
            .collect();
        if candidates.is_empty() {
            break;
        }
        candidates.sort_by(|a, b| {
            let a_content = is_content_word(&a.value);
            let b_content = is_content_word(&b.value);
            b_content.cmp(&a_content).then(b.last_access_time.cmp(&a.last_access_time))
        });
        let next = candidates[0];
        let next_fp = next.fingerprint();
        if visited.contains(&next_fp) {
            break;
        }
        visited.insert(next_fp);
        key.push_str(&next.key);
        value.push_str(&next.value);
        current = next.clone();
    }
    Some((key, value))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RevertToken(pub u32);

#[derive(Debug, thiserror::Error)]
pub enum TryInsertError {
    #[error("key or value exceeds the maximum field length")]
    TooLong,
    #[error("key or value is empty")]
    Empty,
    #[error("value ends in punctuation and this is a zero-query request")]
    TrailingPunctuation,
}

/// One committed (key, value) segment, as `finish` receives them.
#[derive(Debug, Clone)]
pub struct CommittedSegment {
    pub key: String,
    pub value: String,
    pub description: String,
}

/// A `finish` call's full input: history already on record, plus the
/// segments the user just accepted (spec §4.5 "Commit / Finish").
#[derive(Debug, Clone, Default)]
pub struct FinishRequest {
    pub history_segments: Vec<CommittedSegment>,
    pub committed_segments: Vec<CommittedSegment>,
    pub is_zero_query_request: bool,
    pub content_word_learning: bool,
    pub incognito: bool,
}

enum WorkerJob {
    Save(PathBuf, Box<HistoryStore>),
    Load(PathBuf, StoreLimits),
}

enum WorkerResult {
    Saved(Box<HistoryStore>, Result<HistoryStats, PersistError>),
    Loaded(Result<(Box<HistoryStore>, HistoryStats), PersistError>),
}

enum StoreSlot {
    Present(HistoryStore),
    OnLoan,
}

/// C7 itself: owns the LRU, an optional typo corrector, and at most one
/// background save/load worker (spec §5).
pub struct Predictor {
    slot: StoreSlot,
    limits: StoreLimits,
    corrector: Arc<dyn TypingCorrector>,
    wal: HistoryWal,
    worker: Option<(mpsc::Sender<WorkerJob>, mpsc::Receiver<WorkerResult>, thread::JoinHandle<()>)>,
    last_stats: HistoryStats,
}

impl Predictor {
    pub fn new(limits: StoreLimits, corrector: Arc<dyn TypingCorrector>, wal_threshold: usize) -> Self {
        Self {
            slot: StoreSlot::Present(HistoryStore::new(limits)),
            limits,
            corrector,
            wal: HistoryWal::new(wal_threshold),
            worker: None,
            last_stats: HistoryStats::default(),
        }
    }

    /// Non-blocking: reclaim the store from a finished worker, if any.
    fn reap_worker(&mut self) {
        let Some((_, rx, _)) = &self.worker else { return };
        let Ok(result) = rx.try_recv() else { return };
        let (_, _, handle) = self.worker.take().unwrap();
        let _ = handle.join();
        match result {
            WorkerResult::Saved(store, stats) => {
                self.slot = StoreSlot::Present(*store);
                if let Ok(s) = stats {
                    self.last_stats = s;
                }
            }
            WorkerResult::Loaded(Ok((store, stats))) => {
                self.slot = StoreSlot::Present(*store);
                self.last_stats = stats;
            }
            WorkerResult::Loaded(Err(_)) => {
                // Leave whatever store is already resident; load failed.
                if matches!(self.slot, StoreSlot::OnLoan) {
                    self.slot = StoreSlot::Present(HistoryStore::new(self.limits));
                }
            }
        }
    }

    fn store(&mut self) -> Option<&mut HistoryStore> {
        self.reap_worker();
        match &mut self.slot {
            StoreSlot::Present(s) => Some(s),
            StoreSlot::OnLoan => None,
        }
    }

    pub fn last_stats(&self) -> HistoryStats {
        self.last_stats
    }

    /// Spawn a save worker if none is outstanding; idempotent (spec §7
    /// "Worker already running").
    pub fn sync(&mut self, path: impl Into<PathBuf>) {
        self.reap_worker();
        if self.worker.is_some() {
            return;
        }
        let StoreSlot::Present(_) = &self.slot else { return };
        let StoreSlot::Present(store) = std::mem::replace(&mut self.slot, StoreSlot::OnLoan) else {
            unreachable!()
        };
        let path = path.into();
        let (job_tx, job_rx) = mpsc::channel::<WorkerJob>();
        let (res_tx, res_rx) = mpsc::channel::<WorkerResult>();
        let handle = thread::spawn(move || {
            if let Ok(WorkerJob::Save(path, mut store)) = job_rx.recv() {
                let result = store.save(&path);
                let _ = res_tx.send(WorkerResult::Saved(store, result));
            }
        });
        let _ = job_tx.send(WorkerJob::Save(path, Box::new(store)));
        self.worker = Some((job_tx, res_rx, handle));
    }

    /// Spawn a load worker if none is outstanding (spec §7).
    pub fn reload(&mut self, path: impl Into<PathBuf>) {
        self.reap_worker();
        if self.worker.is_some() {
            return;
        }
        self.slot = StoreSlot::OnLoan;
        let path = path.into();
        let limits = self.limits;
        let (job_tx, job_rx) = mpsc::channel::<WorkerJob>();
        let (res_tx, res_rx) = mpsc::channel::<WorkerResult>();
        let handle = thread::spawn(move || {
            if let Ok(WorkerJob::Load(path, limits)) = job_rx.recv() {
                let result = HistoryStore::load(&path, limits).map(|(s, st)| (Box::new(s), st));
                let _ = res_tx.send(WorkerResult::Loaded(result));
            }
        });
        let _ = job_tx.send(WorkerJob::Load(path, limits));
        self.worker = Some((job_tx, res_rx, handle));
    }

    /// Block until any in-flight worker completes (spec §5 `wait()`).
    pub fn wait(&mut self) {
        if let Some((_, rx, handle)) = self.worker.take() {
            if let Ok(result) = rx.recv() {
                match result {
                    WorkerResult::Saved(store, stats) => {
                        self.slot = StoreSlot::Present(*store);
                        if let Ok(s) = stats {
                            self.last_stats = s;
                        }
                    }
                    WorkerResult::Loaded(Ok((store, stats))) => {
                        self.slot = StoreSlot::Present(*store);
                        self.last_stats = stats;
                    }
                    WorkerResult::Loaded(Err(_)) => {
                        self.slot = StoreSlot::Present(HistoryStore::new(self.limits));
                    }
                }
            }
            let _ = handle.join();
        }
    }

    fn try_insert(
        &mut self,
        key: &str,
        value: &str,
        description: &str,
        is_zero_query: bool,
        revert: &mut Vec<RevertToken>,
        now: i64,
    ) -> Result<u32, TryInsertError> {
        let max_len = crate::settings::settings().history.max_field_bytes;
        if key.is_empty() || value.is_empty() {
            return Err(TryInsertError::Empty);
        }
        if key.len() > max_len || value.len() > max_len {
            return Err(TryInsertError::TooLong);
        }
        if is_zero_query && value.chars().last().is_some_and(is_punctuation) {
            return Err(TryInsertError::TrailingPunctuation);
        }
        let Some(store) = self.store() else {
            return Err(TryInsertError::Empty);
        };
        let fp = store.insert_or_touch(key, value, description, now);
        self.wal.record(WalOp::Insert {
            key: key.to_string(),
            value: value.to_string(),
            description: description.to_string(),
            now,
        });
        revert.push(RevertToken(fp));
        Ok(fp)
    }

    /// Spec §4.5 "Commit / Finish".
    pub fn finish(&mut self, req: &FinishRequest) -> Vec<RevertToken> {
        let mut revert = Vec::new();
        if req.incognito {
            return revert;
        }
        // Privacy filter (spec §4.5 step 2 / §8 property 7).
        if req.committed_segments.len() == 1 {
            let seg = &req.committed_segments[0];
            if seg.key.chars().all(|c| c.is_ascii_digit()) && seg.value.is_ascii() {
                return revert;
            }
        }
        let now = now_epoch();

        // Sentence-plus-punctuation merge (spec §4.5 step 3).
        let sentence_settings = &crate::settings::settings().predictor;
        if req.committed_segments.len() == 1 {
            let punct = &req.committed_segments[0];
            let is_single_punct =
                punct.value.chars().count() == 1 && punct.value.chars().all(is_punctuation);
            if is_single_punct {
                if let Some(prev) = req.history_segments.last() {
                    let sentence_like = prev.key.chars().count() >= sentence_settings.sentence_min_len
                        && prev.value.chars().last().is_some_and(is_hiragana);
                    let recent_enough = self.store().is_some_and(|store| {
                        let prev_fp = fingerprint(&prev.key, &prev.value);
                        store.get(prev_fp).is_some_and(|e| {
                            now - e.last_access_time
                                <= sentence_settings.sentence_punct_window_secs as i64
                        })
                    });
                    if sentence_like && recent_enough {
                        let merged_key = format!("{}{}", prev.key, punct.key);
                        let merged_value = format!("{}{}", prev.value, punct.value);
                        let prev_fp = fingerprint(&prev.key, &prev.value);
                        let prev_time = self
                            .store()
                            .and_then(|s| s.get(prev_fp))
                            .map(|e| e.last_access_time)
                            .unwrap_or(now);
                        let _ = self.try_insert(
                            &merged_key,
                            &merged_value,
                            "",
                            req.is_zero_query_request,
                            &mut revert,
                            prev_time,
                        );
                    }
                }
            }
        }

        let mut inserted_fps = Vec::new();
        for seg in &req.committed_segments {
            if let Ok(fp) = self.try_insert(&seg.key, &seg.value, &seg.description, req.is_zero_query_request, &mut revert, now) {
                inserted_fps.push(fp);
            }
        }

        if req.committed_segments.len() > 1 {
            let all_key: String = req.committed_segments.iter().map(|s| s.key.as_str()).collect();
            let all_value: String = req.committed_segments.iter().map(|s| s.value.as_str()).collect();
            let _ = self.try_insert(&all_key, &all_value, "", req.is_zero_query_request, &mut revert, now);
        }

        // Link consecutive committed segments and the tail of history into
        // the head of this commit, skipping a punctuation boundary.
        let mut chain_fps = Vec::new();
        if let Some(prev) = req.history_segments.last() {
            let ends_in_punct = prev.value.chars().last().is_some_and(is_punctuation);
            let starts_with_punct = req
                .committed_segments
                .first()
                .is_some_and(|s| s.value.chars().next().is_some_and(is_punctuation));
            if !ends_in_punct && !starts_with_punct {
                chain_fps.push(fingerprint(&prev.key, &prev.value));
            }
        }
        chain_fps.extend(inserted_fps.iter().copied());
        for pair in chain_fps.windows(2) {
            if let Some(store) = self.store() {
                store.insert_next_entry(pair[0], pair[1], now);
                store.set_bigram_boost(pair[1], true);
            }
        }

        if self.wal.needs_checkpoint() {
            self.wal.drain();
        }
        revert
    }

    /// Spec §4.7: undo a `finish` before any further keystroke.
    pub fn revert(&mut self, tokens: &[RevertToken]) {
        if let Some(store) = self.store() {
            for token in tokens {
                store.hard_remove(token.0);
            }
        }
    }

    pub fn clear_all_history(&mut self) {
        let now = now_epoch();
        if let Some(store) = self.store() {
            store.clear_all(now);
        }
    }

    pub fn clear_unused_history(&mut self) {
        let now = now_epoch();
        if let Some(store) = self.store() {
            store.clear_unused(now);
        }
    }

    pub fn clear_history_entry(&mut self, key: &str, value: &str) {
        if let Some(store) = self.store() {
            store.clear_entry(key, value);
        }
    }

    /// Spec §4.5 step 3: resolve the "previous entry" used for bigram
    /// boosting and `LEFT_EMPTY_MATCH`. Hash the caller's last committed
    /// `(key, value)` directly; if that exact pair isn't resident (e.g. it
    /// expired), fall back to scanning the most-recent LRU elements for an
    /// entry whose value equals or is a suffix of it.
    pub fn resolve_previous_entry(&mut self, prev_key: &str, prev_value: &str) -> Option<String> {
        let scan_limit = crate::settings::settings().predictor.previous_entry_scan_limit;
        let fp = fingerprint(prev_key, prev_value);
        let store = self.store()?;
        if store.get(fp).is_some() {
            return Some(prev_value.to_string());
        }
        find_previous_entry_by_value(store, prev_value, scan_limit).map(|(_, value)| value)
    }

    /// Spec §4.5 "Lookup pipeline".
    pub fn predict(&mut self, req: &PredictRequest) -> Vec<PredictResult> {
        if req.incognito || req.max_results == 0 {
            return Vec::new();
        }
        if req.input_key.is_empty() && req.previous_value.is_none() {
            return Vec::new();
        }
        let settings = &crate::settings::settings().predictor;
        let walk_limit = if req.suggestion_mode {
            settings.suggestion_walk_limit
        } else {
            usize::MAX
        };
        let fuzzy_roman = req.roman_mode && maybe_roman_misspelled_key(&req.input_key);
        let scan_limit = settings.previous_entry_scan_limit;
        let target_len = req.input_key.chars().count();

        let Some(store) = self.store() else { return Vec::new() };

        // Resolve the caller's previous committed value to a live entry
        // (spec §4.5 step 3) so LEFT_EMPTY_MATCH and the bigram-chain
        // continuation below only trust previous-value context that's
        // actually still in the store, not merely supplied by the caller.
        let previous_entry_resolved = req
            .previous_value
            .as_deref()
            .is_some_and(|pv| find_previous_entry_by_value(store, pv, scan_limit).is_some());

        let mut scored: Vec<(i64, PredictResult)> = Vec::new();
        let mut seen_values: HashSet<u32> = HashSet::new();
        let bigram_bonus = crate::settings::settings().history.bigram_boost_seconds;

        for entry in store.iter_recent().take(walk_limit) {
            let kind = classify(req, &entry.key, previous_entry_resolved);
            let fuzzy_hit = fuzzy_roman && roman_fuzzy_prefix_match(&entry.key, &req.input_key);
            if kind == MatchKind::NoMatch && !fuzzy_hit {
                continue;
            }
            // RIGHT_PREFIX/EXACT matches extend via the successor graph
            // up to the input key's length (spec §4.5 "N-gram chaining").
            let (key, value) = if matches!(kind, MatchKind::RightPrefixMatch | MatchKind::ExactMatch) {
                chain_within(store, entry.fingerprint(), target_len)
                    .unwrap_or_else(|| (entry.key.clone(), entry.value.clone()))
            } else {
                (entry.key.clone(), entry.value.clone())
            };
            let value_fp = fingerprint(&value, "");
            if !seen_values.insert(value_fp) {
                continue;
            }
            let score = entry.last_access_time - value.chars().count() as i64
                + if entry.bigram_boost { bigram_bonus } else { 0 };
            scored.push((
                score,
                PredictResult {
                    key,
                    value,
                    description: entry.description.clone(),
                    spelling_correction: fuzzy_hit && kind == MatchKind::NoMatch,
                    score,
                },
            ));
        }

        // Stable sort by descending score: spec §9 leaves equal-score
        // ordering to container insertion order, so a stable sort on
        // most-recent-first input preserves that on ties.
        scored.sort_by(|a, b| b.0.cmp(&a.0));
        scored
            .into_iter()
            .take(req.max_results)
            .map(|(_, r)| r)
            .collect()
    }

    /// Chain `next_entries` from `start_fp` forward, greedily preferring
    /// the left-most then left-closest then most-recent content-word
    /// successor, until `target_len` chars are reached or a fingerprint
    /// repeats (spec §4.5 "N-gram chaining", §8 property 8). [`predict`]
    /// calls the same [`chain_within`] this delegates to directly, so a
    /// `RIGHT_PREFIX_MATCH`/`EXACT_MATCH` result in the lookup pipeline
    /// gets the identical extension this standalone entry point gives.
    pub fn chain_from(&mut self, start_fp: u32, target_len: usize) -> Option<(String, String)> {
        let store = self.store()?;
        chain_within(store, start_fp, target_len)
    }
}

fn is_punctuation(c: char) -> bool {
    matches!(c, '。' | '、' | '！' | '？' | '.' | ',' | '!' | '?' | '…' | '「' | '」')
}

fn is_hiragana(c: char) -> bool {
    (0x3041..=0x3096).contains(&(c as u32))
}
