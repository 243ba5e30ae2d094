//! C1: the immutable rewrite table.
//!
//! A byte trie over rule `input` strings, mirroring the reference engine's
//! `romaji::trie::RomajiTrie` (`HashMap<u8, Node>`, one kana/rule payload
//! per terminal node) but generalized to carry a full [`RewriteRule`]
//! (result + pending + attributes) instead of a bare kana string, and to
//! support lazy predictive iteration and "fixed" determination, which the
//! reference trie does not need.

mod loader;
mod rule;
pub mod special_key;

pub use loader::load_table;
pub use rule::{Attributes, RewriteRule};
pub use special_key::delete_special_key;

use special_key::SpecialKeyTable;
use std::collections::HashMap;
use std::sync::{Arc, OnceLock};

/// Bundled romaji→hiragana table (spec §6.1a), the same way the reference
/// engine ships `default_settings.toml` via `include_str!`.
const DEFAULT_ROMAJI_HIRAGANA_TSV: &str = include_str!("../../tables/romaji_hiragana.tsv");

/// The shared default table, parsed once. Panics only if the bundled TSV
/// itself is malformed, which is a build-time invariant, not a runtime
/// failure mode.
pub fn default_table() -> Arc<RewriteTable> {
    static INSTANCE: OnceLock<Arc<RewriteTable>> = OnceLock::new();
    INSTANCE
        .get_or_init(|| {
            Arc::new(
                load_table(DEFAULT_ROMAJI_HIRAGANA_TSV)
                    .expect("bundled romaji_hiragana.tsv must parse"),
            )
        })
        .clone()
}

#[derive(Debug, Default)]
struct Node {
    children: HashMap<u8, Node>,
    rule_idx: Option<usize>,
}

/// An ordered, immutable collection of [`RewriteRule`]s with O(|query|)
/// prefix lookup and lazy predictive lookup (spec §4.1).
#[derive(Debug, Default)]
pub struct RewriteTable {
    rules: Vec<RewriteRule>,
    root: Node,
    special_keys: SpecialKeyTable,
}

impl RewriteTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_rules(rules: Vec<RewriteRule>) -> Self {
        Self::from_rules_with_special_keys(rules, SpecialKeyTable::new())
    }

    pub(crate) fn from_rules_with_special_keys(
        rules: Vec<RewriteRule>,
        special_keys: SpecialKeyTable,
    ) -> Self {
        let mut table = Self {
            rules,
            root: Node::default(),
            special_keys,
        };
        for (idx, rule) in table.rules.iter().enumerate() {
            let mut node = &mut table.root;
            for &b in rule.input.as_bytes() {
                node = node.children.entry(b).or_default();
            }
            // Later rules with an identical `input` replace earlier ones,
            // matching a TSV file where later rows override earlier ones.
            node.rule_idx = Some(idx);
        }
        table
    }

    /// The sentinel char assigned to the literal `{name}` marker during
    /// table load, if this table's loader ever saw that name.
    pub fn special_key_sentinel(&self, name: &str) -> Option<char> {
        self.special_keys.sentinel_of(name)
    }

    pub fn rules(&self) -> &[RewriteRule] {
        &self.rules
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    fn node_at(&self, prefix: &str) -> Option<&Node> {
        let mut node = &self.root;
        for &b in prefix.as_bytes() {
            node = node.children.get(&b)?;
        }
        Some(node)
    }

    /// Longest rule whose `input` is a prefix of `query`, the number of
    /// bytes of `query` it consumes, and whether the match is *fixed*
    /// (spec §4.1, §3 "Fix(ed) match").
    pub fn lookup_prefix(&self, query: &str) -> Option<(&RewriteRule, usize, bool)> {
        let mut node = &self.root;
        let mut best: Option<(usize, usize)> = None; // (rule_idx, consumed bytes)
        for (consumed, &b) in query.as_bytes().iter().enumerate() {
            match node.children.get(&b) {
                Some(child) => {
                    node = child;
                    if let Some(idx) = node.rule_idx {
                        best = Some((idx, consumed + 1));
                    }
                }
                None => break,
            }
        }
        let (idx, consumed) = best?;
        // `fixed` asks whether any rule extends this exact matched prefix
        // further; that's true iff the trie node at `consumed` bytes still
        // has children below it.
        let match_node = self.node_at(&query[..consumed])?;
        let fixed = match_node.children.is_empty();
        Some((&self.rules[idx], consumed, fixed))
    }

    /// Whether some rule starting with `raw` carries [`Attributes::NEW_CHUNK`].
    pub fn has_new_chunk_entry(&self, raw: &str) -> bool {
        let Some(node) = self.node_at(raw) else {
            return false;
        };
        self.subtree_any(node, |r| r.attributes.contains(Attributes::NEW_CHUNK))
    }

    /// Whether any rule has `raw` as a strict prefix of its `input`.
    pub fn has_sub_rules(&self, raw: &str) -> bool {
        self.node_at(raw).is_some_and(|n| !n.children.is_empty())
    }

    fn subtree_any(&self, node: &Node, pred: impl Fn(&RewriteRule) -> bool + Copy) -> bool {
        if let Some(idx) = node.rule_idx {
            if pred(&self.rules[idx]) {
                return true;
            }
        }
        node.children.values().any(|c| self.subtree_any(c, pred))
    }

    /// Every rule whose `input` has `prefix` as a prefix, as a lazy,
    /// non-materialized iterator (spec §4.1: "must be a lazy sequence").
    pub fn lookup_predictive<'a>(&'a self, prefix: &str) -> PredictiveIter<'a> {
        let mut stack = Vec::new();
        if let Some(node) = self.node_at(prefix) {
            stack.push(node);
        }
        PredictiveIter { table: self, stack }
    }
}

/// Lazy DFS over a trie subtree, yielding rules as terminal nodes are found.
pub struct PredictiveIter<'a> {
    table: &'a RewriteTable,
    stack: Vec<&'a Node>,
}

impl<'a> Iterator for PredictiveIter<'a> {
    type Item = &'a RewriteRule;

    fn next(&mut self) -> Option<Self::Item> {
        while let Some(node) = self.stack.pop() {
            self.stack.extend(node.children.values());
            if let Some(idx) = node.rule_idx {
                return Some(&self.table.rules[idx]);
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_table() -> RewriteTable {
        RewriteTable::from_rules(vec![
            RewriteRule::new("a", "あ", "", Attributes::empty()),
            RewriteRule::new("ka", "か", "", Attributes::empty()),
            RewriteRule::new("k", "", "k", Attributes::empty()),
            RewriteRule::new("kya", "きゃ", "", Attributes::empty()),
            RewriteRule::new("n", "ん", "", Attributes::empty()),
            RewriteRule::new("nn", "ん", "", Attributes::empty()),
            RewriteRule::new("nya", "にゃ", "", Attributes::empty()),
        ])
    }

    #[test]
    fn exact_match_with_no_extension_is_fixed() {
        let t = sample_table();
        let (rule, consumed, fixed) = t.lookup_prefix("a").unwrap();
        assert_eq!(rule.result, "あ");
        assert_eq!(consumed, 1);
        assert!(fixed);
    }

    #[test]
    fn prefix_match_that_could_extend_is_not_fixed() {
        let t = sample_table();
        // "n" matches but "nn" and "nya" both extend it.
        let (rule, consumed, fixed) = t.lookup_prefix("n").unwrap();
        assert_eq!(rule.result, "ん");
        assert_eq!(consumed, 1);
        assert!(!fixed);
    }

    #[test]
    fn longest_match_wins() {
        let t = sample_table();
        let (rule, consumed, _) = t.lookup_prefix("kya").unwrap();
        assert_eq!(rule.result, "きゃ");
        assert_eq!(consumed, 3);
    }

    #[test]
    fn partial_unmatched_suffix_still_returns_longest_known_prefix() {
        let t = sample_table();
        let (rule, consumed, _) = t.lookup_prefix("kz").unwrap();
        assert_eq!(rule.pending, "k");
        assert_eq!(consumed, 1);
    }

    #[test]
    fn no_match_returns_none() {
        let t = sample_table();
        assert!(t.lookup_prefix("z").is_none());
    }

    #[test]
    fn predictive_lookup_yields_all_extensions() {
        let t = sample_table();
        let mut results: Vec<&str> = t.lookup_predictive("n").map(|r| r.input.as_str()).collect();
        results.sort();
        assert_eq!(results, vec!["n", "nn", "nya"]);
    }

    #[test]
    fn predictive_lookup_on_unknown_prefix_is_empty() {
        let t = sample_table();
        assert_eq!(t.lookup_predictive("zzz").count(), 0);
    }

    #[test]
    fn has_new_chunk_entry_detects_attribute_below_prefix() {
        let t = RewriteTable::from_rules(vec![RewriteRule::new(
            "1",
            "",
            "{?}あ",
            Attributes::NEW_CHUNK,
        )]);
        assert!(t.has_new_chunk_entry("1"));
        assert!(!t.has_new_chunk_entry("2"));
    }

    #[test]
    fn has_sub_rules_true_only_for_strict_prefixes() {
        let t = sample_table();
        assert!(t.has_sub_rules("k")); // ka, kya extend it
        assert!(!t.has_sub_rules("ka")); // nothing extends "ka" itself
        assert!(!t.has_sub_rules("zzz"));
    }

    #[test]
    fn default_table_parses_and_resolves_the_small_tsu_scenario() {
        let t = default_table();
        let (rule, consumed, fixed) = t.lookup_prefix("i").unwrap();
        assert_eq!(rule.result, "い");
        assert_eq!(consumed, 1);
        assert!(fixed);
        let (tt_rule, _, _) = t.lookup_prefix("tt").unwrap();
        assert_eq!(tt_rule.result, "っ");
        assert_eq!(tt_rule.pending, "t");
        let (nya_rule, consumed, _) = t.lookup_prefix("nya").unwrap();
        assert_eq!(nya_rule.result, "にゃ");
        assert_eq!(consumed, 3);
    }

    #[test]
    fn later_duplicate_input_overrides_earlier_row() {
        let t = RewriteTable::from_rules(vec![
            RewriteRule::new("a", "あ", "", Attributes::empty()),
            RewriteRule::new("a", "ア", "", Attributes::empty()),
        ]);
        let (rule, _, _) = t.lookup_prefix("a").unwrap();
        assert_eq!(rule.result, "ア");
    }
}
