//! C2: the six fixed textual projections plus the `LOCAL` alias.
//!
//! Spec §4.3 fixes the variant set; per design note §9 this is modeled as a
//! plain enum with match arms rather than trait-object dispatch, the way
//! the reference engine models its small, closed `TrieLookupResult` enum
//! (`romaji/trie.rs`) instead of reaching for `dyn` anywhere in that path.

use std::collections::HashMap;
use std::sync::OnceLock;

/// One of the six named projections. `Local` defers to whatever the owning
/// chunk has selected as its own transliterator (spec §4.3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Transliterator {
    Local,
    ConversionString,
    RawString,
    Hiragana,
    FullKatakana,
    HalfKatakana,
    FullAscii,
    HalfAscii,
}

/// Result of a [`Transliterator::split`] call.
pub struct SplitResult {
    pub raw_lhs: String,
    pub raw_rhs: String,
    pub conv_lhs: String,
    pub conv_rhs: String,
    /// False when the split had to fall back to a cross-projection
    /// approximation because it landed mid-grapheme (spec §4.3).
    pub clean: bool,
}

impl Transliterator {
    /// Resolve `LOCAL` (and, when `no_transliteration` is set, `HALF_ASCII`
    /// / `FULL_ASCII`) against the chunk's own projection, per spec §4.3's
    /// `NO_TRANSLITERATION` attribute rule.
    pub fn resolve(self, local: Transliterator, no_transliteration: bool) -> Transliterator {
        let resolved = match self {
            Transliterator::Local => local,
            other => other,
        };
        if no_transliteration
            && matches!(
                resolved,
                Transliterator::Local | Transliterator::HalfAscii | Transliterator::FullAscii
            )
        {
            Transliterator::ConversionString
        } else {
            resolved
        }
    }

    /// Render `(raw, converted)` under this projection (spec §4.3 table).
    pub fn transliterate(self, raw: &str, converted: &str) -> String {
        match self {
            Transliterator::Local => converted.to_string(),
            Transliterator::ConversionString => converted.to_string(),
            Transliterator::RawString => raw.to_string(),
            Transliterator::Hiragana => to_fullwidth_hiragana(converted),
            Transliterator::FullKatakana => hiragana_to_katakana(&to_fullwidth_hiragana(converted)),
            Transliterator::HalfKatakana => {
                let full_kata = hiragana_to_katakana(&to_fullwidth_hiragana(converted));
                katakana_to_halfwidth(&full_kata)
            }
            Transliterator::FullAscii => {
                let base = if raw.is_empty() { converted } else { raw };
                halfwidth_to_fullwidth_ascii(base)
            }
            Transliterator::HalfAscii => {
                let base = if raw.is_empty() { converted } else { raw };
                fullwidth_to_halfwidth_ascii(base)
            }
        }
    }

    /// Character length of this projection's rendering.
    pub fn char_len(self, raw: &str, converted: &str) -> usize {
        self.transliterate(raw, converted).chars().count()
    }

    /// Partition `(raw, converted)` so the left piece has exactly `position`
    /// characters under this projection (spec §4.3).
    pub fn split(self, position: usize, raw: &str, converted: &str) -> SplitResult {
        match self {
            Transliterator::Local | Transliterator::ConversionString => {
                let (lhs, rhs) = split_at_chars(converted, position);
                SplitResult {
                    raw_lhs: String::new(),
                    raw_rhs: String::new(),
                    conv_lhs: lhs,
                    conv_rhs: rhs,
                    clean: true,
                }
            }
            Transliterator::RawString => {
                let (lhs, rhs) = split_at_chars(raw, position);
                SplitResult {
                    raw_lhs: lhs,
                    raw_rhs: rhs,
                    conv_lhs: String::new(),
                    conv_rhs: String::new(),
                    clean: true,
                }
            }
            Transliterator::Hiragana | Transliterator::FullKatakana => {
                let (lhs, rhs) = split_at_chars(converted, position);
                SplitResult {
                    raw_lhs: String::new(),
                    raw_rhs: String::new(),
                    conv_lhs: lhs,
                    conv_rhs: rhs,
                    clean: true,
                }
            }
            Transliterator::HalfKatakana => split_half_katakana(position, converted),
            Transliterator::FullAscii | Transliterator::HalfAscii => {
                let (lhs, rhs) = split_at_chars(raw, position);
                SplitResult {
                    raw_lhs: lhs,
                    raw_rhs: rhs,
                    conv_lhs: String::new(),
                    conv_rhs: String::new(),
                    clean: true,
                }
            }
        }
    }
}

fn split_at_chars(s: &str, position: usize) -> (String, String) {
    let mut chars = s.chars();
    let lhs: String = chars.by_ref().take(position).collect();
    let rhs: String = chars.collect();
    (lhs, rhs)
}

// ---------------------------------------------------------------------
// Half/full-width ↔ Hiragana/Katakana conversions
// ---------------------------------------------------------------------

/// Half-width katakana (U+FF66..U+FF9D) back to full-width hiragana, the
/// "character-form-manager fix-up" spec §4.3 names for `HIRAGANA`.
fn to_fullwidth_hiragana(s: &str) -> String {
    s.chars()
        .map(|c| half_katakana_to_hiragana(c).unwrap_or(c))
        .collect()
}

fn half_katakana_to_hiragana(c: char) -> Option<char> {
    let table = half_to_full_katakana_table();
    let full = *table.get(&c)?;
    katakana_to_hiragana_char(full)
}

fn katakana_to_hiragana_char(c: char) -> Option<char> {
    let code = c as u32;
    if (0x30A1..=0x30F6).contains(&code) {
        char::from_u32(code - 0x60)
    } else {
        None
    }
}

fn hiragana_to_katakana(s: &str) -> String {
    s.chars()
        .map(|c| {
            let code = c as u32;
            if (0x3041..=0x3096).contains(&code) {
                char::from_u32(code + 0x60).unwrap_or(c)
            } else {
                c
            }
        })
        .collect()
}

/// `(full-width katakana) -> (half-width base, optional combining mark)`.
fn katakana_half_table() -> &'static HashMap<char, (char, Option<char>)> {
    static TABLE: OnceLock<HashMap<char, (char, Option<char>)>> = OnceLock::new();
    TABLE.get_or_init(|| {
        const DAKUTEN: char = '\u{FF9E}';
        const HANDAKUTEN: char = '\u{FF9F}';
        let voiced: &[(char, char, char)] = &[
            ('ガ', 'ｶ', DAKUTEN),
            ('ギ', 'ｷ', DAKUTEN),
            ('グ', 'ｸ', DAKUTEN),
            ('ゲ', 'ｹ', DAKUTEN),
            ('ゴ', 'ｺ', DAKUTEN),
            ('ザ', 'ｻ', DAKUTEN),
            ('ジ', 'ｼ', DAKUTEN),
            ('ズ', 'ｽ', DAKUTEN),
            ('ゼ', 'ｾ', DAKUTEN),
            ('ゾ', 'ｿ', DAKUTEN),
            ('ダ', 'ﾀ', DAKUTEN),
            ('ヂ', 'ﾁ', DAKUTEN),
            ('ヅ', 'ﾂ', DAKUTEN),
            ('デ', 'ﾃ', DAKUTEN),
            ('ド', 'ﾄ', DAKUTEN),
            ('バ', 'ﾊ', DAKUTEN),
            ('ビ', 'ﾋ', DAKUTEN),
            ('ブ', 'ﾌ', DAKUTEN),
            ('ベ', 'ﾍ', DAKUTEN),
            ('ボ', 'ﾎ', DAKUTEN),
            ('パ', 'ﾊ', HANDAKUTEN),
            ('ピ', 'ﾋ', HANDAKUTEN),
            ('プ', 'ﾌ', HANDAKUTEN),
            ('ペ', 'ﾍ', HANDAKUTEN),
            ('ポ', 'ﾎ', HANDAKUTEN),
            ('ヴ', 'ｳ', DAKUTEN),
        ];
        let plain: &[(char, char)] = &[
            ('ア', 'ｱ'), ('イ', 'ｲ'), ('ウ', 'ｳ'), ('エ', 'ｴ'), ('オ', 'ｵ'),
            ('カ', 'ｶ'), ('キ', 'ｷ'), ('ク', 'ｸ'), ('ケ', 'ｹ'), ('コ', 'ｺ'),
            ('サ', 'ｻ'), ('シ', 'ｼ'), ('ス', 'ｽ'), ('セ', 'ｾ'), ('ソ', 'ｿ'),
            ('タ', 'ﾀ'), ('チ', 'ﾁ'), ('ツ', 'ﾂ'), ('テ', 'ﾃ'), ('ト', 'ﾄ'),
            ('ナ', 'ﾅ'), ('ニ', 'ﾆ'), ('ヌ', 'ﾇ'), ('ネ', 'ﾈ'), ('ノ', 'ﾉ'),
            ('ハ', 'ﾊ'), ('ヒ', 'ﾋ'), ('フ', 'ﾌ'), ('ヘ', 'ﾍ'), ('ホ', 'ﾎ'),
            ('マ', 'ﾏ'), ('ミ', 'ﾐ'), ('ム', 'ﾑ'), ('メ', 'ﾒ'), ('モ', 'ﾓ'),
            ('ヤ', 'ﾔ'), ('ユ', 'ﾕ'), ('ヨ', 'ﾖ'),
            ('ラ', 'ﾗ'), ('リ', 'ﾘ'), ('ル', 'ﾙ'), ('レ', 'ﾚ'), ('ロ', 'ﾛ'),
            ('ワ', 'ﾜ'), ('ヲ', 'ｦ'), ('ン', 'ﾝ'),
            ('ッ', 'ｯ'), ('ャ', 'ｬ'), ('ュ', 'ｭ'), ('ョ', 'ｮ'),
            ('ー', 'ｰ'), ('。', '。'), ('、', '、'),
        ];
        let mut m = HashMap::new();
        for &(full, half, mark) in voiced {
            m.insert(full, (half, Some(mark)));
        }
        for &(full, half) in plain {
            m.insert(full, (half, None));
        }
        m
    })
}

fn half_to_full_katakana_table() -> &'static HashMap<char, char> {
    static TABLE: OnceLock<HashMap<char, char>> = OnceLock::new();
    TABLE.get_or_init(|| {
        // Only the unvoiced mapping is needed to recover a base kana from a
        // lone half-width char; combining marks are handled by the caller.
        katakana_half_table()
            .iter()
            .filter(|(_, (_, mark))| mark.is_none())
            .map(|(&full, &(half, _))| (half, full))
            .collect()
    })
}

fn katakana_to_halfwidth(s: &str) -> String {
    let mut out = String::new();
    for c in s.chars() {
        match katakana_half_table().get(&c) {
            Some(&(half, Some(mark))) => {
                out.push(half);
                out.push(mark);
            }
            Some(&(half, None)) => out.push(half),
            None => out.push(c),
        }
    }
    out
}

/// Partition a `HALF_KATAKANA`-projected string at `position` half-width
/// characters. When `position` would fall between a voiced kana's base
/// char and its combining mark, there is no clean split at kana
/// granularity; fall back to partitioning the Hiragana rendering instead
/// and mark the result unclean (spec §4.3's `ズ` / `す゛` example).
fn split_half_katakana(position: usize, converted: &str) -> SplitResult {
    let full_katakana = hiragana_to_katakana(&to_fullwidth_hiragana(converted));
    let mut half_len = 0usize;
    for (i, c) in full_katakana.chars().enumerate() {
        let width = match katakana_half_table().get(&c) {
            Some((_, Some(_))) => 2,
            _ => 1,
        };
        if half_len == position {
            let (lhs, rhs) = split_at_chars(&full_katakana, i);
            return SplitResult {
                raw_lhs: String::new(),
                raw_rhs: String::new(),
                conv_lhs: hiragana_to_katakana_reverse(&lhs),
                conv_rhs: hiragana_to_katakana_reverse(&rhs),
                clean: true,
            };
        }
        if half_len < position && position < half_len + width {
            // Mid-grapheme: fall back to Hiragana, splitting at this kana's
            // own boundary (the closest clean boundary below `position`).
            let (lhs, rhs) = split_at_chars(converted, i);
            return SplitResult {
                raw_lhs: String::new(),
                raw_rhs: String::new(),
                conv_lhs: lhs,
                conv_rhs: rhs,
                clean: false,
            };
        }
        half_len += width;
    }
    // position >= total half-width length: everything goes left.
    SplitResult {
        raw_lhs: String::new(),
        raw_rhs: String::new(),
        conv_lhs: converted.to_string(),
        conv_rhs: String::new(),
        clean: true,
    }
}

fn hiragana_to_katakana_reverse(s: &str) -> String {
    // conv_lhs/conv_rhs are stored against `converted` (Hiragana), so map
    // the katakana-domain split result back down before returning it.
    s.chars()
        .map(|c| katakana_to_hiragana_char(c).unwrap_or(c))
        .collect()
}

fn halfwidth_to_fullwidth_ascii(s: &str) -> String {
    s.chars()
        .map(|c| {
            if c == ' ' {
                '\u{3000}'
            } else if ('\u{21}'..='\u{7E}').contains(&c) {
                char::from_u32(c as u32 + 0xFEE0).unwrap_or(c)
            } else {
                c
            }
        })
        .collect()
}

fn fullwidth_to_halfwidth_ascii(s: &str) -> String {
    s.chars()
        .map(|c| {
            if c == '\u{3000}' {
                ' '
            } else if ('\u{FF01}'..='\u{FF5E}').contains(&c) {
                char::from_u32(c as u32 - 0xFEE0).unwrap_or(c)
            } else {
                c
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conversion_string_is_identity_on_converted() {
        let t = Transliterator::ConversionString;
        assert_eq!(t.transliterate("nya", "にゃ"), "にゃ");
    }

    #[test]
    fn raw_string_ignores_converted() {
        let t = Transliterator::RawString;
        assert_eq!(t.transliterate("nya", "にゃ"), "nya");
    }

    #[test]
    fn full_katakana_projects_hiragana_up() {
        let t = Transliterator::FullKatakana;
        assert_eq!(t.transliterate("", "にゃ"), "ニャ");
    }

    #[test]
    fn half_katakana_decomposes_voiced_sound() {
        let t = Transliterator::HalfKatakana;
        assert_eq!(t.transliterate("", "ず"), "ｽ\u{FF9E}");
    }

    #[test]
    fn full_ascii_prefers_raw_over_converted() {
        let t = Transliterator::FullAscii;
        assert_eq!(t.transliterate("ny", "にゃ"), "ｎｙ");
    }

    #[test]
    fn half_ascii_falls_back_to_converted_when_raw_empty() {
        let t = Transliterator::HalfAscii;
        assert_eq!(t.transliterate("", "ab"), "ab");
    }

    #[test]
    fn no_transliteration_forces_conversion_string() {
        let resolved = Transliterator::HalfAscii.resolve(Transliterator::Hiragana, true);
        assert_eq!(resolved, Transliterator::ConversionString);
    }

    #[test]
    fn local_resolves_to_chunk_projection() {
        let resolved = Transliterator::Local.resolve(Transliterator::FullKatakana, false);
        assert_eq!(resolved, Transliterator::FullKatakana);
    }

    #[test]
    fn split_preserves_total_length() {
        let t = Transliterator::Hiragana;
        let original = t.char_len("", "こんにちは");
        for k in 0..=original {
            let r = t.split(k, "", "こんにちは");
            let left_len = t.char_len("", &r.conv_lhs);
            let right_len = t.char_len("", &r.conv_rhs);
            assert_eq!(left_len + right_len, original);
        }
    }

    #[test]
    fn half_katakana_split_mid_grapheme_falls_back_uncleanly() {
        // "ず" -> half-width "ｽ゛" (2 half-width chars). Splitting at
        // position 1 lands between the base char and its combining mark.
        let r = Transliterator::HalfKatakana.split(1, "", "ず");
        assert!(!r.clean);
        assert_eq!(r.conv_lhs, "");
        assert_eq!(r.conv_rhs, "ず");
    }

    #[test]
    fn half_katakana_split_on_clean_boundary() {
        let r = Transliterator::HalfKatakana.split(2, "", "ずと");
        assert!(r.clean);
        assert_eq!(r.conv_lhs, "ず");
        assert_eq!(r.conv_rhs, "と");
    }
}
