//! C3: one atomic unit of preedit — the hot loop that absorbs keystrokes
//! against the rewrite table and tracks the chunk's four-string triple.
//!
//! The control flow below follows spec §4.2's `add_input` procedure
//! closely; the reference engine has nothing directly analogous (its
//! `romaji::convert::convert_romaji` drives a single flat buffer rather
//! than a chunk list — see `romaji/convert.rs`'s `handle_no_match`), so
//! this module is original to this crate, grounded on that file's style
//! (plain free functions over `&mut String` buffers, `TrieLookupResult`-
//! style match dispatch) rather than on a line-for-line reference.

pub use crate::table::Attributes;
use crate::table::RewriteTable;
use crate::transliterator::Transliterator;
use std::cell::Cell;
use std::collections::HashSet;

/// How `pending`/`ambiguous` are rendered into a chunk's output string
/// (spec §6.2).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrimMode {
    /// Drop `pending` entirely; show only `conversion`.
    Trim,
    /// Show `conversion` followed by the literal `pending`.
    AsIs,
    /// Show `conversion` followed by `ambiguous` if present, else `pending`.
    Fix,
}

/// Maximum recursion depth for [`Chunk::expanded_results`] (spec §4.2,
/// design note §9: "Keep it; removing the cap blows up on the standard
/// mobile toggle table").
const EXPANSION_DEPTH_CAP: u32 = 4;

#[derive(Debug, Clone)]
pub struct Chunk {
    raw: String,
    conversion: String,
    pending: String,
    ambiguous: String,
    /// The projection this chunk reports under the `LOCAL` alias; never
    /// `Transliterator::Local` itself (spec §3).
    transliterator: Transliterator,
    attributes: Attributes,
    /// First rule absorbed in this chunk sets `attributes`; later ones
    /// don't override it (spec §4.2 step 3).
    attributes_locked: bool,
    local_length_cache: Cell<Option<usize>>,
}

impl Chunk {
    pub fn new(transliterator: Transliterator) -> Self {
        Self {
            raw: String::new(),
            conversion: String::new(),
            pending: String::new(),
            ambiguous: String::new(),
            transliterator,
            attributes: Attributes::empty(),
            attributes_locked: false,
            local_length_cache: Cell::new(None),
        }
    }

    pub fn raw(&self) -> &str {
        &self.raw
    }
    pub fn conversion(&self) -> &str {
        &self.conversion
    }
    pub fn pending(&self) -> &str {
        &self.pending
    }
    pub fn ambiguous(&self) -> &str {
        &self.ambiguous
    }
    pub fn attributes(&self) -> Attributes {
        self.attributes
    }
    pub fn transliterator(&self) -> Transliterator {
        self.transliterator
    }
    pub fn set_transliterator(&mut self, t: Transliterator) {
        self.transliterator = t;
    }

    /// A live chunk must have at least one non-empty field of the triple
    /// (spec §3 invariant).
    pub fn is_empty(&self) -> bool {
        self.conversion.is_empty() && self.pending.is_empty() && self.ambiguous.is_empty()
    }

    fn invalidate_cache(&self) {
        self.local_length_cache.set(None);
    }

    /// Resolve the projection this chunk actually renders under for `proj`,
    /// applying the `LOCAL` alias and `NO_TRANSLITERATION` override.
    fn resolve(&self, proj: Transliterator) -> Transliterator {
        proj.resolve(
            self.transliterator,
            self.attributes.contains(Attributes::NO_TRANSLITERATION),
        )
    }

    /// Rendered output under `proj`, honoring `trim` for the pending tail.
    ///
    /// A chunk with nothing fixed yet (`conversion` empty) whose visible
    /// tail is still plain ASCII under a kana projection (e.g. `"ny"`
    /// before the keystroke that resolves it to `"にゃ"`) renders as
    /// full-width ASCII of `raw` instead of literal half-width letters,
    /// matching how an in-progress romaji buffer is shown mid-composition.
    pub fn render(&self, proj: Transliterator, trim: TrimMode) -> String {
        let resolved = self.resolve(proj);
        let tail = match trim {
            TrimMode::Trim => "",
            TrimMode::AsIs => self.pending.as_str(),
            TrimMode::Fix => {
                if !self.ambiguous.is_empty() {
                    self.ambiguous.as_str()
                } else {
                    self.pending.as_str()
                }
            }
        };
        if self.conversion.is_empty()
            && !self.raw.is_empty()
            && !tail.is_empty()
            && tail.is_ascii()
            && matches!(
                resolved,
                Transliterator::Hiragana
                    | Transliterator::FullKatakana
                    | Transliterator::HalfKatakana
                    | Transliterator::ConversionString
            )
        {
            return Transliterator::FullAscii.transliterate(&self.raw, "");
        }
        let converted = format!("{}{}", self.conversion, tail);
        resolved.transliterate(&self.raw, &converted)
    }

    /// Character length under `proj`; `LOCAL` is cached (spec §4.2
    /// "Projection-length cache"), any other projection recomputes.
    pub fn get_length(&self, proj: Transliterator) -> usize {
        if matches!(proj, Transliterator::Local) {
            if let Some(len) = self.local_length_cache.get() {
                return len;
            }
            let len = self.render(proj, TrimMode::AsIs).chars().count();
            self.local_length_cache.set(Some(len));
            return len;
        }
        self.render(proj, TrimMode::AsIs).chars().count()
    }

    /// Hot loop: consume a leading prefix of `buf` against `table`.
    /// Returns `true` if the caller should re-invoke immediately on the
    /// remaining `buf` (spec §4.2).
    pub fn add_input(&mut self, buf: &mut String, table: &RewriteTable) -> bool {
        self.strip_invalid_special_key_tail(buf, table);

        let key = format!("{}{}", self.pending, buf);
        let Some((rule, consumed, fixed)) = table.lookup_prefix(&key) else {
            if self.pending.is_empty() {
                self.absorb_literal_char(buf);
            }
            return false;
        };

        if consumed <= self.pending.len() {
            // The best match doesn't reach past what's already pending.
            // If a longer rule could still complete from here, speculatively
            // absorb the rest of `buf` as an extension of `pending` so a
            // later keystroke can still complete it; otherwise stall.
            if table.has_sub_rules(&key) {
                self.absorb_speculative(buf);
            }
            return false;
        }

        if consumed == key.len() {
            self.raw.push_str(buf);
            buf.clear();
            if fixed {
                self.conversion.push_str(&rule.result);
                self.pending = rule.pending.clone();
                self.ambiguous.clear();
                if !self.attributes_locked {
                    self.attributes = rule.attributes;
                    self.attributes_locked = true;
                }
            } else {
                self.pending = key;
                self.ambiguous = rule.result.clone();
            }
            self.invalidate_cache();
            return false;
        }

        // consumed > pending.len() && consumed < key.len(): fix-point split.
        let absorbed_len = consumed - self.pending.len();
        let absorbed: String = buf.drain(..absorbed_len).collect();
        self.raw.push_str(&absorbed);
        self.conversion.push_str(&rule.result);
        self.pending = rule.pending.clone();
        self.ambiguous.clear();
        if !self.attributes_locked {
            self.attributes = rule.attributes;
            self.attributes_locked = true;
        }
        self.invalidate_cache();
        !buf.is_empty() && !self.pending.is_empty()
    }

    fn absorb_literal_char(&mut self, buf: &mut String) {
        if let Some(ch) = buf.chars().next() {
            self.raw.push(ch);
            self.conversion.push(ch);
            buf.drain(..ch.len_utf8());
            self.invalidate_cache();
        }
    }

    fn absorb_speculative(&mut self, buf: &mut String) {
        if buf.is_empty() {
            return;
        }
        let taken = std::mem::take(buf);
        self.raw.push_str(&taken);
        self.pending.push_str(&taken);
        // The old `ambiguous` finalization described the shorter `pending`
        // that no longer exists; it no longer applies to the extended one.
        self.ambiguous.clear();
        self.invalidate_cache();
    }

    /// If this chunk is freshly created and its `pending` begins with a
    /// special-key sentinel no rule consumes, strip it so an orphan special
    /// key never survives into the preedit (spec §4.2).
    fn strip_invalid_special_key_tail(&mut self, buf: &str, table: &RewriteTable) {
        if self.raw.is_empty() && !self.pending.is_empty() && !buf.is_empty() {
            let first = self.pending.chars().next().unwrap();
            if crate::table::special_key::SpecialKeyTable::is_sentinel(first)
                && table.lookup_prefix(&self.pending).is_none()
            {
                let skip = first.len_utf8();
                self.raw.drain(..self.raw.len().min(skip));
                self.pending.drain(..skip);
                self.invalidate_cache();
            }
        }
    }

    /// Combined input: a kana key plus the kana it already printed (spec
    /// §4.2 `add_converted_char`). Probes `pending + converted_char` once.
    /// Returns `true` if this chunk accepted the input.
    pub fn add_converted_char(
        &mut self,
        key_str: &str,
        converted_char: &mut String,
        table: &RewriteTable,
    ) -> bool {
        let probe = format!("{}{}", self.pending, converted_char);
        match table.lookup_prefix(&probe) {
            Some((rule, consumed, _fixed)) if consumed == probe.len() => {
                self.raw.push_str(key_str);
                self.conversion.push_str(&rule.result);
                self.pending = rule.pending.clone();
                self.ambiguous.clear();
                if !self.attributes_locked {
                    self.attributes = rule.attributes;
                    self.attributes_locked = true;
                }
                converted_char.clear();
                self.invalidate_cache();
                true
            }
            Some((_, consumed, _)) if consumed > self.pending.len() => {
                self.raw.push_str(key_str);
                self.pending.push_str(converted_char);
                converted_char.clear();
                self.invalidate_cache();
                true
            }
            _ => false,
        }
    }

    /// Spec §4.4 step 4 predicate: would appending `extra` to this chunk's
    /// `pending` still be a productive prefix under `table`?
    pub fn is_convertible(&self, extra: &str, table: &RewriteTable) -> bool {
        let candidate = format!("{}{}", self.pending, extra);
        table.lookup_prefix(&candidate).is_some() || table.has_sub_rules(&candidate)
    }

    /// Can this chunk still absorb more input under `transliterator`? Used
    /// by §4.4's `GetInsertionChunk`.
    pub fn is_appendable(&self, transliterator: Transliterator, table: &RewriteTable) -> bool {
        if self.transliterator != transliterator {
            return false;
        }
        if self.attributes.contains(Attributes::END_CHUNK) {
            return false;
        }
        !self.pending.is_empty() && table.has_sub_rules(&self.pending)
    }

    /// Split this chunk at `position` characters under `proj`; the
    /// receiver keeps the right half and the new left half is returned.
    /// Returns `None` when `position` is out of `(0, length)` (spec §7:
    /// "Split out of range").
    pub fn split_chunk(&mut self, proj: Transliterator, position: usize) -> Option<Chunk> {
        let resolved = self.resolve(proj);
        let total = self.get_length(proj);
        if position == 0 || position >= total {
            return None;
        }
        let combined = format!("{}{}", self.conversion, self.pending);
        let result = resolved.split(position, &self.raw, &combined);

        let raw_splits = matches!(
            resolved,
            Transliterator::RawString | Transliterator::FullAscii | Transliterator::HalfAscii
        );

        let mut left = Chunk::new(self.transliterator);
        left.attributes = self.attributes;
        left.attributes_locked = self.attributes_locked;

        if raw_splits {
            // `raw` carries the split in this projection; conversion/pending
            // don't correspond to raw-ascii positions, so they stay whole
            // with whichever half is still live (the right, per convention).
            left.raw = result.raw_lhs;
            self.raw = result.raw_rhs;
        } else {
            // Conversion-domain split: `raw` (keystrokes) has no per-char
            // correspondence to a kana position, so it stays whole on the
            // right; only conversion/pending move.
            let conv_len = self.conversion.chars().count();
            let split_inside_conversion = position <= conv_len;
            if split_inside_conversion {
                left.conversion = result.conv_lhs;
                self.conversion = result.conv_rhs;
                // pending stays with the right half entirely.
            } else {
                let (lhs, rhs) = (result.conv_lhs, result.conv_rhs);
                let (left_conv, left_pending) =
                    split_combined_at_conversion_boundary(&lhs, conv_len);
                left.conversion = left_conv;
                left.pending = left_pending;
                self.conversion = String::new();
                self.pending = rhs;
            }
        }
        left.ambiguous.clear();
        self.ambiguous.clear();
        left.invalidate_cache();
        self.invalidate_cache();
        Some(left)
    }

    /// Strings reachable from `pending` by following zero-result ("toggle
    /// family") rules, up to depth 4, loop-guarded by visited state (spec
    /// §4.2 "Expanded results").
    pub fn expanded_results(&self, table: &RewriteTable) -> HashSet<String> {
        let mut out = HashSet::new();
        if self.pending.is_empty() {
            out.insert(crate::table::delete_special_key(&self.ambiguous));
            return out;
        }
        let mut visited = HashSet::new();
        expand_recursive(&self.pending, table, 0, &mut visited, &mut out);
        if out.is_empty() {
            out.insert(crate::table::delete_special_key(&self.pending));
        }
        out
    }
}

fn expand_recursive(
    pending: &str,
    table: &RewriteTable,
    depth: u32,
    visited: &mut HashSet<String>,
    out: &mut HashSet<String>,
) {
    // Every pending state along a toggle chain (e.g. `{*}あ`) is itself a
    // displayable candidate — the user can stop toggling at any point — so
    // it's always inserted, sentinel stripped, before recursing further.
    out.insert(crate::table::delete_special_key(pending));
    if depth >= EXPANSION_DEPTH_CAP || !visited.insert(pending.to_string()) {
        return;
    }
    for rule in table.lookup_predictive(pending) {
        if rule.input != pending {
            continue;
        }
        if rule.result.is_empty() {
            expand_recursive(&rule.pending, table, depth + 1, visited, out);
        } else {
            out.insert(crate::table::delete_special_key(&rule.result));
        }
    }
}

fn split_combined_at_conversion_boundary(lhs: &str, conv_len: usize) -> (String, String) {
    let mut chars = lhs.chars();
    let conv: String = chars.by_ref().take(conv_len).collect();
    let pending: String = chars.collect();
    (conv, pending)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table::RewriteRule;

    fn romaji_table() -> RewriteTable {
        RewriteTable::from_rules(vec![
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
        ])
    }

    #[test]
    fn literal_fallback_when_no_rule_and_pending_empty() {
        let table = RewriteTable::new();
        let mut chunk = Chunk::new(Transliterator::Hiragana);
        let mut buf = "z".to_string();
        chunk.add_input(&mut buf, &table);
        assert_eq!(chunk.raw(), "z");
        assert_eq!(chunk.conversion(), "z");
        assert!(buf.is_empty());
    }

    #[test]
    fn fixed_single_char_rule_commits_immediately() {
        let table = romaji_table();
        let mut chunk = Chunk::new(Transliterator::Hiragana);
        let mut buf = "a".to_string();
        let looped = chunk.add_input(&mut buf, &table);
        assert!(!looped);
        assert_eq!(chunk.conversion(), "あ");
        assert!(chunk.pending().is_empty());
    }

    #[test]
    fn non_fixed_rule_sets_pending_and_ambiguous() {
        let table = romaji_table();
        let mut chunk = Chunk::new(Transliterator::Hiragana);
        let mut buf = "n".to_string();
        chunk.add_input(&mut buf, &table);
        assert_eq!(chunk.pending(), "n");
        assert_eq!(chunk.ambiguous(), "ん");
        assert!(chunk.conversion().is_empty());
    }

    #[test]
    fn small_tsu_split_then_resolve() {
        // "i" "t" "t" "a" across chunk boundaries is exercised at the
        // composition level (tests/composition_scenarios.rs); here we
        // exercise the "tt" split within one chunk directly.
        let table = romaji_table();
        let mut chunk = Chunk::new(Transliterator::Hiragana);
        let mut buf = "t".to_string();
        chunk.add_input(&mut buf, &table);
        assert_eq!(chunk.pending(), "t");

        let mut buf2 = "ta".to_string();
        chunk.add_input(&mut buf2, &table);
        // "t" + "ta" = "tta": matches "tt" (consumed 2 of "tta"), a fix
        // point split leaving "a" in buf for a follow-up call.
        assert_eq!(chunk.conversion(), "っ");
        assert_eq!(chunk.pending(), "t");
        assert_eq!(buf2, "a");
    }

    #[test]
    fn speculative_absorption_of_unmatched_pending_extension() {
        let table = romaji_table();
        let mut chunk = Chunk::new(Transliterator::Hiragana);
        let mut buf = "n".to_string();
        chunk.add_input(&mut buf, &table);
        let mut buf2 = "y".to_string();
        chunk.add_input(&mut buf2, &table);
        assert_eq!(chunk.pending(), "ny");
        assert!(buf2.is_empty());

        let mut buf3 = "a".to_string();
        chunk.add_input(&mut buf3, &table);
        assert_eq!(chunk.conversion(), "にゃ");
        assert!(chunk.pending().is_empty());
    }

    #[test]
    fn unresolved_ascii_pending_falls_back_to_full_ascii_under_fix() {
        let table = romaji_table();
        let mut chunk = Chunk::new(Transliterator::Hiragana);
        let mut buf = "n".to_string();
        chunk.add_input(&mut buf, &table);
        let mut buf2 = "y".to_string();
        chunk.add_input(&mut buf2, &table);
        assert_eq!(chunk.render(Transliterator::Hiragana, TrimMode::Fix), "ｎｙ");
    }

    #[test]
    fn is_empty_true_only_when_whole_triple_empty() {
        let chunk = Chunk::new(Transliterator::Hiragana);
        assert!(chunk.is_empty());
    }

    #[test]
    fn split_out_of_range_returns_none() {
        let table = romaji_table();
        let mut chunk = Chunk::new(Transliterator::Hiragana);
        let mut buf = "a".to_string();
        chunk.add_input(&mut buf, &table);
        assert!(chunk.split_chunk(Transliterator::Hiragana, 0).is_none());
        assert!(chunk.split_chunk(Transliterator::Hiragana, 1).is_none());
    }

    #[test]
    fn split_preserves_combined_length() {
        let table = romaji_table();
        let mut chunk = Chunk::new(Transliterator::Hiragana);
        let mut buf = "n".to_string();
        chunk.add_input(&mut buf, &table);
        // pending "n" -> length-1 chunk, not splittable (matches real
        // Mozc behaviour: only multi-character chunks split meaningfully).
        let mut buf2 = "aa".to_string();
        let mut chunk2 = Chunk::new(Transliterator::Hiragana);
        chunk2.add_input(&mut buf2, &table);
        let total_before = chunk2.get_length(Transliterator::Hiragana);
        let left = chunk2.split_chunk(Transliterator::Hiragana, 1).unwrap();
        let total_after =
            left.get_length(Transliterator::Hiragana) + chunk2.get_length(Transliterator::Hiragana);
        assert_eq!(total_before, total_after);
    }

    #[test]
    fn expanded_results_respects_depth_cap() {
        let mut rules = vec![RewriteRule::new("1", "", "{a}", Attributes::empty())];
        // Build a chain that would recurse deeper than the cap if unchecked.
        for i in 0..10 {
            rules.push(RewriteRule::new(
                format!("{{a}}{}", "x".repeat(i)),
                "",
                format!("{{a}}{}", "x".repeat(i + 1)),
                Attributes::empty(),
            ));
        }
        let table = RewriteTable::from_rules(rules);
        let mut chunk = Chunk::new(Transliterator::Hiragana);
        let mut buf = "1".to_string();
        chunk.add_input(&mut buf, &table);
        // Must terminate (the cap prevents infinite/excessive recursion).
        let _ = chunk.expanded_results(&table);
    }

    #[test]
    fn expanded_results_strips_special_key_sentinels_from_a_toggle_cycle() {
        let table = crate::table::load_table(
            "1\t\tあ\nあ*\t\t{*}ぁ\n{*}ぁ\t\t{*}あ\n{*}あ\t\t{*}ぁ\n",
        )
        .unwrap();
        let mut chunk = Chunk::new(Transliterator::Hiragana);
        let mut buf = "1".to_string();
        chunk.add_input(&mut buf, &table);
        let mut buf2 = "*".to_string();
        chunk.add_input(&mut buf2, &table);
        let tails = chunk.expanded_results(&table);
        assert_eq!(tails, HashSet::from(["あ".to_string(), "ぁ".to_string()]));
    }
}
