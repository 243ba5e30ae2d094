//! C4: the ordered chunk list, cursor math and public composition API.
//!
//! No reference-engine file owns this shape directly — the closest analogs
//! (`session.rs`'s single preedit buffer, `crates/lex-session`'s
//! `types::composition::Composition`) model a flat string rather than a
//! chunk list, so this module's control flow is original to this crate.
//! Its texture (small free functions, `Arc<RewriteTable>` for the shared
//! immutable table, total/never-panicking mutators per spec §7) follows the
//! reference engine's general style rather than any one file's algorithm.

use crate::table::RewriteTable;
use crate::transliterator::Transliterator;
use std::collections::HashSet;
use std::sync::Arc;

pub use crate::chunk::{Chunk, TrimMode};

/// Alias kept distinct from [`Transliterator`] at the type level so public
/// signatures read in terms of "the projection a caller names", matching
/// spec §9's resolution of the `GetPreedit` index-mismatch question:
/// every position-taking method binds its own projection explicitly.
pub type Projection = Transliterator;

/// One insertion request: a raw keystroke sequence, optionally paired with
/// a preassigned conversion (spec §4.2 `add_converted_char`, §6.2
/// `insert_key_and_preedit_at`).
#[derive(Debug, Clone)]
pub struct CompositionInput {
    pub raw: String,
    pub converted: Option<String>,
}

impl CompositionInput {
    pub fn raw_only(raw: impl Into<String>) -> Self {
        Self {
            raw: raw.into(),
            converted: None,
        }
    }

    pub fn with_preedit(raw: impl Into<String>, preedit: impl Into<String>) -> Self {
        Self {
            raw: raw.into(),
            converted: Some(preedit.into()),
        }
    }
}

/// The ordered chunk list plus the state needed to drive it (spec §3
/// "Composition (C4)"). Chunks live in a plain `Vec`, the arena the design
/// notes ask for in place of a hand-rolled linked list; no caller retains
/// indices across calls, so a `Vec`'s index instability between calls is
/// not observable.
#[derive(Debug, Clone)]
pub struct Composition {
    chunks: Vec<Chunk>,
    table: Arc<RewriteTable>,
    input_mode: Transliterator,
}

/// Constructor helper for [`Composition`] (spec §6.2a), mirroring the
/// reference engine's preference for small builder structs over
/// telescoping constructor arguments (see `Settings::init_custom`-style
/// call sites).
#[derive(Debug, Clone)]
pub struct CompositionBuilder {
    table: Arc<RewriteTable>,
    input_mode: Transliterator,
}

impl CompositionBuilder {
    pub fn new(table: Arc<RewriteTable>) -> Self {
        Self {
            table,
            input_mode: Transliterator::Hiragana,
        }
    }

    pub fn input_mode(mut self, mode: Transliterator) -> Self {
        self.input_mode = mode;
        self
    }

    pub fn build(self) -> Composition {
        Composition {
            chunks: Vec::new(),
            table: self.table,
            input_mode: self.input_mode,
        }
    }
}

impl Default for Composition {
    /// Spec §6.1a: a composition is useful out of the box against the
    /// bundled romaji→hiragana table, without the caller sourcing one.
    fn default() -> Self {
        CompositionBuilder::new(crate::table::default_table()).build()
    }
}

impl Composition {
    pub fn new(table: Arc<RewriteTable>) -> Self {
        CompositionBuilder::new(table).build()
    }

    pub fn set_table(&mut self, table: Arc<RewriteTable>) {
        self.table = table;
    }

    pub fn set_input_mode(&mut self, mode: Transliterator) {
        self.input_mode = mode;
    }

    pub fn input_mode(&self) -> Transliterator {
        self.input_mode
    }

    /// Change the projection of every chunk overlapping
    /// `[from_pos, to_pos)` under `LOCAL` to `mode` (spec §6.2
    /// `set_transliterator`).
    pub fn set_transliterator(&mut self, from_pos: usize, to_pos: usize, mode: Transliterator) {
        if from_pos >= to_pos {
            return;
        }
        self.maybe_split_chunk_at(from_pos, Transliterator::Local);
        self.maybe_split_chunk_at(to_pos, Transliterator::Local);
        let start = self.chunk_boundary_index(from_pos, Transliterator::Local);
        let end = self.chunk_boundary_index(to_pos, Transliterator::Local);
        let len = self.chunks.len();
        for chunk in &mut self.chunks[start..end.min(len)] {
            chunk.set_transliterator(mode);
        }
    }

    /// Character length of the whole preedit under `proj`.
    pub fn length(&self, proj: Transliterator) -> usize {
        self.chunks.iter().map(|c| c.get_length(proj)).sum()
    }

    // -----------------------------------------------------------------
    // Cursor / boundary bookkeeping
    // -----------------------------------------------------------------

    /// Index of the first chunk that starts at or after `pos` characters
    /// under `proj`. Callers must have already called
    /// [`Self::maybe_split_chunk_at`] for `pos` to land exactly on a
    /// boundary.
    fn chunk_boundary_index(&self, pos: usize, proj: Transliterator) -> usize {
        let mut acc = 0;
        for (i, chunk) in self.chunks.iter().enumerate() {
            if acc == pos {
                return i;
            }
            acc += chunk.get_length(proj);
        }
        self.chunks.len()
    }

    /// If `pos` falls strictly inside a chunk under `proj`, split that
    /// chunk so `pos` becomes a chunk boundary (spec §4.4 step 1).
    fn maybe_split_chunk_at(&mut self, pos: usize, proj: Transliterator) {
        let mut acc = 0;
        for i in 0..self.chunks.len() {
            let len = self.chunks[i].get_length(proj);
            if acc < pos && pos < acc + len {
                let inner = pos - acc;
                if let Some(left) = self.chunks[i].split_chunk(proj, inner) {
                    self.chunks.insert(i, left);
                }
                return;
            }
            if acc + len >= pos {
                return;
            }
            acc += len;
        }
    }

    fn gc_empty_chunks(&mut self) {
        self.chunks.retain(|c| !c.is_empty());
    }

    // -----------------------------------------------------------------
    // Insertion (spec §4.4)
    // -----------------------------------------------------------------

    pub fn insert_at(&mut self, pos: usize, raw: &str) -> usize {
        self.insert_input(pos, CompositionInput::raw_only(raw))
    }

    pub fn insert_key_and_preedit_at(&mut self, pos: usize, raw: &str, preedit: &str) -> usize {
        self.insert_input(pos, CompositionInput::with_preedit(raw, preedit))
    }

    fn insert_input(&mut self, pos: usize, input: CompositionInput) -> usize {
        let _span = tracing::debug_span!("insert_input", pos, raw = %input.raw).entered();
        let clamped = pos.min(self.length(Transliterator::Local));
        let len_before = self.length(Transliterator::Local);

        self.maybe_split_chunk_at(clamped, Transliterator::Local);
        let mut right_idx = self.chunk_boundary_index(clamped, Transliterator::Local);
        while right_idx < self.chunks.len() && self.chunks[right_idx].is_empty() {
            right_idx += 1;
        }

        let mut insertion_idx = self.get_insertion_chunk(right_idx);
        insertion_idx = self.combine_pending_chunks(insertion_idx, &input.raw);

        self.add_composition_input(insertion_idx, input);
        self.gc_empty_chunks();

        let len_after = self.length(Transliterator::Local);
        clamped + len_after.saturating_sub(len_before)
    }

    /// spec §4.4 step 3: reuse the left neighbour if it can still absorb
    /// input under the current mode; otherwise splice a fresh empty chunk.
    fn get_insertion_chunk(&mut self, right_idx: usize) -> usize {
        if right_idx > 0 && self.chunks[right_idx - 1].is_appendable(self.input_mode, &self.table)
        {
            return right_idx - 1;
        }
        self.chunks
            .insert(right_idx, Chunk::new(self.input_mode));
        right_idx
    }

    /// spec §4.4 step 4: walk left, merging neighbours whose combined
    /// pending is still a productive prefix of the table.
    fn combine_pending_chunks(&mut self, mut idx: usize, next_input: &str) -> usize {
        while idx > 0 {
            let candidate = format!("{}{}", self.chunks[idx].pending(), next_input);
            if !self.chunks[idx - 1].is_convertible(&candidate, &self.table) {
                break;
            }
            let right = self.chunks.remove(idx);
            let left = self.chunks.remove(idx - 1);
            let merged = rebuild_chunk(&left, &right, self.input_mode, &self.table);
            self.chunks.insert(idx - 1, merged);
            idx -= 1;
        }
        idx
    }

    /// spec §4.4 step 5: feed `input` into the chunk at `idx`, spilling
    /// into fresh chunks to its right whenever the current one refuses the
    /// remainder.
    fn add_composition_input(&mut self, mut idx: usize, input: CompositionInput) {
        if let Some(mut converted) = input.converted {
            let mut key_raw = input.raw;
            loop {
                if self.chunks[idx].add_converted_char(&key_raw, &mut converted, &self.table) {
                    return;
                }
                if converted.is_empty() {
                    return;
                }
                idx += 1;
                self.chunks.insert(idx, Chunk::new(self.input_mode));
                key_raw = String::new();
            }
        }

        let mut buf = input.raw;
        loop {
            let looped = self.chunks[idx].add_input(&mut buf, &self.table);
            if buf.is_empty() {
                return;
            }
            if !looped {
                idx += 1;
                self.chunks.insert(idx, Chunk::new(self.input_mode));
                continue;
            }
        }
    }

    // -----------------------------------------------------------------
    // Deletion (spec §4.4 `delete_at`)
    // -----------------------------------------------------------------

    pub fn delete_at(&mut self, pos: usize) -> usize {
        let clamped = pos.min(self.length(Transliterator::Local));
        loop {
            if self.chunks.is_empty() {
                break;
            }
            let len_before = self.length(Transliterator::Local);
            self.maybe_split_chunk_at(clamped, Transliterator::Local);
            let idx = self.chunk_boundary_index(clamped, Transliterator::Local);
            if idx >= self.chunks.len() {
                break;
            }
            if self.chunks[idx].get_length(Transliterator::Local) <= 1 {
                self.chunks.remove(idx);
            } else if let Some(_left_discarded) =
                self.chunks[idx].split_chunk(Transliterator::Local, 1)
            {
                // the left single character is discarded; the receiver
                // (now the remainder) stays at `idx`.
            }
            self.gc_empty_chunks();
            if self.length(Transliterator::Local) != len_before {
                break;
            }
        }
        clamped.min(self.length(Transliterator::Local))
    }

    // -----------------------------------------------------------------
    // Projection / trim rendering (spec §6.2)
    // -----------------------------------------------------------------

    pub fn get_string(&self) -> String {
        self.get_string_with_trim_mode(TrimMode::Fix)
    }

    pub fn get_string_with_projection(&self, proj: Projection) -> String {
        self.chunks
            .iter()
            .map(|c| c.render(proj, TrimMode::Fix))
            .collect()
    }

    pub fn get_string_with_trim_mode(&self, trim: TrimMode) -> String {
        self.chunks
            .iter()
            .map(|c| c.render(self.input_mode, trim))
            .collect()
    }

    /// spec §4.4 `get_expanded_strings`: fixed prefix plus the tail-set of
    /// the last chunk's ambiguity expansions.
    pub fn get_expanded_strings(&self) -> (String, HashSet<String>) {
        let Some((last, rest)) = self.chunks.split_last() else {
            return (String::new(), HashSet::new());
        };
        let base: String = rest
            .iter()
            .map(|c| c.render(self.input_mode, TrimMode::Fix))
            .collect();
        (base, last.expanded_results(&self.table))
    }

    /// spec §4.4 `should_commit`.
    pub fn should_commit(&self) -> bool {
        !self.chunks.is_empty()
            && self.chunks.iter().all(|c| {
                c.attributes().contains(crate::chunk::Attributes::DIRECT_INPUT) && c.pending().is_empty()
            })
    }

    /// spec §4.4 `is_toggleable`: does the chunk at `pos` have a `pending`
    /// starting with the `{?}` special marker?
    pub fn is_toggleable(&self, pos: usize) -> bool {
        let Some(marker) = self.table.special_key_sentinel("?") else {
            return false;
        };
        let clamped = pos.min(self.length(Transliterator::Local));
        let mut acc = 0;
        for chunk in &self.chunks {
            let len = chunk.get_length(Transliterator::Local);
            if clamped <= acc + len {
                return chunk.pending().starts_with(marker);
            }
            acc += len;
        }
        false
    }

    /// spec §4.4 `convert_position`.
    pub fn convert_position(
        &self,
        from_position: usize,
        from_proj: Projection,
        to_proj: Projection,
    ) -> usize {
        let mut from_acc = 0usize;
        let mut to_acc = 0usize;
        for chunk in &self.chunks {
            let from_len = chunk.get_length(from_proj);
            let to_len = chunk.get_length(to_proj);
            if from_acc + from_len < from_position {
                from_acc += from_len;
                to_acc += to_len;
                continue;
            }
            let inner = from_position - from_acc;
            if inner == 0 {
                return to_acc;
            }
            if inner >= from_len {
                return to_acc + to_len;
            }
            if inner > to_len {
                return to_acc + to_len;
            }
            return to_acc + inner;
        }
        to_acc
    }
}

/// Recombine two adjacent chunks into one by replaying their concatenated
/// raw input through a fresh chunk (spec §4.4 step 4: "merge the left
/// neighbour into the current chunk").
fn rebuild_chunk(
    left: &Chunk,
    right: &Chunk,
    mode: Transliterator,
    table: &RewriteTable,
) -> Chunk {
    let mut merged = Chunk::new(mode);
    let mut buf = format!("{}{}", left.raw(), right.raw());
    loop {
        let looped = merged.add_input(&mut buf, table);
        if buf.is_empty() || !looped {
            break;
        }
    }
    merged
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table::{Attributes, RewriteRule};

    fn romaji_table() -> Arc<RewriteTable> {
        Arc::new(RewriteTable::from_rules(vec![
            RewriteRule::new("a", "あ", "", Attributes::empty()),
            RewriteRule::new("i", "い", "", Attributes::empty()),
            RewriteRule::new("t", "", "t", Attributes::empty()),
            RewriteRule::new("tt", "っ", "t", Attributes::empty()),
            RewriteRule::new("ta", "た", "", Attributes::empty()),
            RewriteRule::new("n", "ん", "n", Attributes::empty()),
            RewriteRule::new("nn", "ん", "", Attributes::empty()),
            RewriteRule::new("na", "な", "", Attributes::empty()),
            RewriteRule::new("ny", "", "ny", Attributes::empty()),
            RewriteRule::new("nya", "にゃ", "", Attributes::empty()),
        ]))
    }

    fn type_str(comp: &mut Composition, s: &str) {
        let mut pos = comp.length(Transliterator::Local);
        for ch in s.chars() {
            pos = comp.insert_at(pos, &ch.to_string());
        }
    }

    #[test]
    fn small_tsu_scenario() {
        let mut comp = CompositionBuilder::new(romaji_table())
            .input_mode(Transliterator::Hiragana)
            .build();
        type_str(&mut comp, "itta");
        assert_eq!(comp.get_string(), "いった");
        comp.delete_at(1);
        assert_eq!(comp.get_string(), "った");
    }

    #[test]
    fn ambiguous_n_scenario() {
        let mut comp = Composition::new(romaji_table());
        type_str(&mut comp, "nya");
        assert_eq!(comp.get_string_with_trim_mode(TrimMode::Fix), "にゃ");

        let mut partial = Composition::new(romaji_table());
        type_str(&mut partial, "ny");
        assert_eq!(partial.get_string_with_trim_mode(TrimMode::Fix), "ｎｙ");
    }

    #[test]
    fn insert_at_returns_cursor_after_inserted_text() {
        let mut comp = Composition::new(romaji_table());
        let pos = comp.insert_at(0, "a");
        assert_eq!(pos, 1);
        assert_eq!(comp.get_string(), "あ");
    }

    #[test]
    fn empty_composition_has_zero_length() {
        let comp = Composition::new(romaji_table());
        assert_eq!(comp.length(Transliterator::Local), 0);
        assert_eq!(comp.get_string(), "");
    }

    #[test]
    fn delete_at_end_is_a_no_op() {
        let mut comp = Composition::new(romaji_table());
        type_str(&mut comp, "a");
        let pos = comp.delete_at(1);
        assert_eq!(pos, 1);
        assert_eq!(comp.get_string(), "あ");
    }

    #[test]
    fn should_commit_false_for_ordinary_kana_chunk() {
        let mut comp = Composition::new(romaji_table());
        type_str(&mut comp, "a");
        assert!(!comp.should_commit());
    }

    #[test]
    fn convert_position_round_trips_within_slack() {
        let mut comp = Composition::new(romaji_table());
        type_str(&mut comp, "itta");
        let local_len = comp.length(Transliterator::Local);
        for x in 0..=local_len {
            let raw_x = comp.convert_position(x, Transliterator::Local, Transliterator::RawString);
            let back = comp.convert_position(raw_x, Transliterator::RawString, Transliterator::Local);
            assert!((back as i64 - x as i64).abs() <= 1);
        }
    }

    #[test]
    fn get_expanded_strings_on_empty_composition() {
        let comp = Composition::new(romaji_table());
        let (base, tails) = comp.get_expanded_strings();
        assert_eq!(base, "");
        assert!(tails.is_empty());
    }
}
