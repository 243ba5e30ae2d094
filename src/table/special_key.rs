//! Special-key markers: `{name}` literals embedded in rewrite-rule
//! input/output, parsed into a reserved sentinel codepoint range and
//! stripped again for display (spec §4.1, §6.1, GLOSSARY "Special key").
//!
//! The sentinel range used here is the Unicode Private Use Area starting at
//! `U+F000`; each distinct `{name}` maps to one PUA codepoint, assigned in
//! first-seen order within a table load. This keeps the sentinel
//! byte-length stable (one `char`, 3 UTF-8 bytes) regardless of name length.

use std::collections::HashMap;

const PUA_BASE: u32 = 0xF000;
const PUA_END: u32 = 0xF8FF;

/// Bidirectional interner between `{name}` literals and PUA sentinel chars,
/// scoped to a single table load (spec: "a reserved sentinel codepoint
/// range").
#[derive(Debug, Default)]
pub struct SpecialKeyTable {
    by_name: HashMap<String, char>,
    by_char: HashMap<char, String>,
    next: u32,
}

impl SpecialKeyTable {
    pub fn new() -> Self {
        Self {
            by_name: HashMap::new(),
            by_char: HashMap::new(),
            next: PUA_BASE,
        }
    }

    /// Replace every `{name}` occurrence in `s` with its sentinel char,
    /// assigning a fresh sentinel the first time a name is seen.
    pub fn parse(&mut self, s: &str) -> String {
        let mut out = String::with_capacity(s.len());
        let bytes = s.as_bytes();
        let mut i = 0;
        while i < bytes.len() {
            if bytes[i] == b'{' {
                if let Some(end) = s[i..].find('}') {
                    let name = &s[i + 1..i + end];
                    if !name.is_empty() && name.chars().all(|c| c != '{' && c != '}') {
                        out.push(self.sentinel_for(name));
                        i += end + 1;
                        continue;
                    }
                }
            }
            // advance by one full char, not one byte
            let ch = s[i..].chars().next().unwrap();
            out.push(ch);
            i += ch.len_utf8();
        }
        out
    }

    fn sentinel_for(&mut self, name: &str) -> char {
        if let Some(&c) = self.by_name.get(name) {
            return c;
        }
        let code = self.next;
        // Wrap rather than panic if a pathological table defines more than
        // the PUA range holds; collisions are harmless here because lookup
        // is by name, not by sentinel identity across tables.
        self.next = if code >= PUA_END { PUA_BASE } else { code + 1 };
        let c = char::from_u32(code).expect("PUA codepoints are always valid chars");
        self.by_name.insert(name.to_string(), c);
        self.by_char.insert(c, name.to_string());
        c
    }

    pub fn name_of(&self, c: char) -> Option<&str> {
        self.by_char.get(&c).map(|s| s.as_str())
    }

    /// The sentinel already assigned to `name`, if any (does not assign one).
    pub fn sentinel_of(&self, name: &str) -> Option<char> {
        self.by_name.get(name).copied()
    }

    pub fn is_sentinel(c: char) -> bool {
        let code = c as u32;
        (PUA_BASE..=PUA_END).contains(&code)
    }
}

/// Strip every sentinel char from `s` for display (spec §4.1: the public
/// `delete_special_key` function). Stateless: it does not need the
/// originating [`SpecialKeyTable`] because any PUA char in this range is,
/// by construction, a special-key sentinel and never legitimate user text.
pub fn delete_special_key(s: &str) -> String {
    s.chars().filter(|&c| !SpecialKeyTable::is_sentinel(c)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_named_marker() {
        let mut t = SpecialKeyTable::new();
        let parsed = t.parse("{*}あ");
        assert_eq!(parsed.chars().count(), 2);
        assert!(SpecialKeyTable::is_sentinel(parsed.chars().next().unwrap()));
        assert_eq!(t.name_of(parsed.chars().next().unwrap()), Some("*"));
    }

    #[test]
    fn same_name_reuses_sentinel() {
        let mut t = SpecialKeyTable::new();
        let a = t.parse("{tab}x");
        let b = t.parse("{tab}y");
        assert_eq!(a.chars().next(), b.chars().next());
    }

    #[test]
    fn different_names_get_different_sentinels() {
        let mut t = SpecialKeyTable::new();
        let a = t.parse("{a}").chars().next().unwrap();
        let b = t.parse("{b}").chars().next().unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn delete_special_key_strips_sentinels_only() {
        let mut t = SpecialKeyTable::new();
        let parsed = t.parse("{*}ぁ");
        let displayed = delete_special_key(&parsed);
        assert_eq!(displayed, "ぁ");
    }

    #[test]
    fn unterminated_brace_is_passed_through_literally() {
        let mut t = SpecialKeyTable::new();
        let parsed = t.parse("a{bc");
        assert_eq!(parsed, "a{bc");
    }

    #[test]
    fn plain_text_without_markers_is_unchanged() {
        let mut t = SpecialKeyTable::new();
        assert_eq!(t.parse("にゃ"), "にゃ");
    }
}
