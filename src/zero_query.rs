//! C8: the zero-query contextual-suffix dictionary.
//!
//! A sorted string pool plus a fixed-width token array, queried by binary
//! search rather than a hash map so the blob can be `mmap`'d and searched
//! without deserializing it — the same shape `memmap2` is reached for
//! elsewhere in the reference stack for read-mostly lookup tables (see
//! its use for the main dictionary's trie blob).

use std::fs::File;
use std::path::Path;

use memmap2::Mmap;

use crate::error::PersistError;

/// Classification tag carried by each token (spec GLOSSARY "Zero-query
/// type"): lets a caller filter candidates by user preference.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ZeroQueryType {
    Emoji,
    Emoticon,
    NumberSuffix,
    Address,
    Other(u8),
}

impl ZeroQueryType {
    fn from_u32(v: u32) -> Self {
        match v {
            0 => Self::Emoji,
            1 => Self::Emoticon,
            2 => Self::NumberSuffix,
            3 => Self::Address,
            other => Self::Other(other as u8),
        }
    }

    fn as_u32(self) -> u32 {
        match self {
            Self::Emoji => 0,
            Self::Emoticon => 1,
            Self::NumberSuffix => 2,
            Self::Address => 3,
            Self::Other(v) => v as u32,
        }
    }
}

/// One fixed-width 16-byte record (spec §3 "Zero-query token").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Token {
    key_idx: u32,
    value_idx: u32,
    zero_query_type: u32,
    _reserved: u32,
}

const TOKEN_SIZE: usize = 16;

impl Token {
    fn to_bytes(self) -> [u8; TOKEN_SIZE] {
        let mut buf = [0u8; TOKEN_SIZE];
        buf[0..4].copy_from_slice(&self.key_idx.to_le_bytes());
        buf[4..8].copy_from_slice(&self.value_idx.to_le_bytes());
        buf[8..12].copy_from_slice(&self.zero_query_type.to_le_bytes());
        buf[12..16].copy_from_slice(&self._reserved.to_le_bytes());
        buf
    }

    fn from_bytes(b: &[u8]) -> Self {
        Self {
            key_idx: u32::from_le_bytes(b[0..4].try_into().unwrap()),
            value_idx: u32::from_le_bytes(b[4..8].try_into().unwrap()),
            zero_query_type: u32::from_le_bytes(b[8..12].try_into().unwrap()),
            _reserved: u32::from_le_bytes(b[12..16].try_into().unwrap()),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ZeroQueryResult {
    pub value: String,
    pub zero_query_type: ZeroQueryType,
}

/// The loaded dictionary: a lexicographically sorted string pool and a
/// token array sorted by `key_idx` (spec §4.6).
#[derive(Debug)]
pub struct ZeroQueryDict {
    pool: Vec<String>,
    tokens: Vec<Token>,
}

impl ZeroQueryDict {
    /// Build from `(key, value, type)` triples, sorting and deduplicating
    /// the pool and reindexing tokens against it. Used by tooling and
    /// tests; the runtime path is [`Self::open`]/[`Self::from_bytes`].
    pub fn build(entries: &[(&str, &str, ZeroQueryType)]) -> Self {
        let mut pool: Vec<String> = entries
            .iter()
            .flat_map(|(k, v, _)| [k.to_string(), v.to_string()])
            .collect();
        pool.sort();
        pool.dedup();

        let pool_index = |s: &str| pool.binary_search_by(|p| p.as_str().cmp(s)).unwrap() as u32;

        let mut tokens: Vec<Token> = entries
            .iter()
            .map(|(k, v, t)| Token {
                key_idx: pool_index(k),
                value_idx: pool_index(v),
                zero_query_type: t.as_u32(),
                _reserved: 0,
            })
            .collect();
        tokens.sort_by_key(|t| (t.key_idx, t.value_idx));

        Self { pool, tokens }
    }

    /// Serialize to the on-disk blob layout `from_bytes` understands:
    /// `[u32 pool_len][pool entries as (u32 len, bytes)...][u32 token_count][16-byte tokens...]`.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        buf.extend_from_slice(&(self.pool.len() as u32).to_le_bytes());
        for s in &self.pool {
            buf.extend_from_slice(&(s.len() as u32).to_le_bytes());
            buf.extend_from_slice(s.as_bytes());
        }
        buf.extend_from_slice(&(self.tokens.len() as u32).to_le_bytes());
        for t in &self.tokens {
            buf.extend_from_slice(&t.to_bytes());
        }
        buf
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self, PersistError> {
        let mut offset = 0usize;
        let read_u32 = |data: &[u8], offset: &mut usize| -> Result<u32, PersistError> {
            if *offset + 4 > data.len() {
                return Err(PersistError::TooShort { len: data.len() });
            }
            let v = u32::from_le_bytes(data[*offset..*offset + 4].try_into().unwrap());
            *offset += 4;
            Ok(v)
        };

        let pool_len = read_u32(data, &mut offset)? as usize;
        let mut pool = Vec::with_capacity(pool_len);
        for _ in 0..pool_len {
            let str_len = read_u32(data, &mut offset)? as usize;
            if offset + str_len > data.len() {
                return Err(PersistError::TooShort { len: data.len() });
            }
            let s = std::str::from_utf8(&data[offset..offset + str_len])
                .map_err(|_| PersistError::TooShort { len: data.len() })?
                .to_string();
            pool.push(s);
            offset += str_len;
        }

        let token_count = read_u32(data, &mut offset)? as usize;
        if offset + token_count * TOKEN_SIZE > data.len() {
            return Err(PersistError::TooShort { len: data.len() });
        }
        let mut tokens = Vec::with_capacity(token_count);
        for _ in 0..token_count {
            tokens.push(Token::from_bytes(&data[offset..offset + TOKEN_SIZE]));
            offset += TOKEN_SIZE;
        }

        Ok(Self { pool, tokens })
    }

    /// Memory-map `path` and parse it in place, rather than reading the
    /// whole blob into a heap buffer first.
    pub fn open(path: &Path) -> Result<Self, PersistError> {
        let file = File::open(path)?;
        let mmap = unsafe { Mmap::map(&file)? };
        Self::from_bytes(&mmap)
    }

    fn pool_index_of(&self, key: &str) -> Option<u32> {
        self.pool.binary_search_by(|p| p.as_str().cmp(key)).ok().map(|i| i as u32)
    }

    /// `key`'s contiguous run of tokens, empty if `key` isn't in the pool
    /// at all (spec §4.6: "only on *exact* match").
    fn equal_range(&self, key: &str) -> &[Token] {
        let Some(idx) = self.pool_index_of(key) else { return &[] };
        let start = self.tokens.partition_point(|t| t.key_idx < idx);
        let end = self.tokens.partition_point(|t| t.key_idx <= idx);
        &self.tokens[start..end]
    }

    /// Spec §4.6: zero-query lookup fires only when the live preedit key
    /// is empty, using the previously committed value as the lookup key;
    /// length-1 non-Kanji keys are excluded as too noisy.
    pub fn lookup_zero_query(&self, input_key: &str, previous_value: &str) -> Vec<ZeroQueryResult> {
        if !input_key.is_empty() {
            return Vec::new();
        }
        if previous_value.chars().count() == 1 && !is_kanji(previous_value.chars().next().unwrap()) {
            return Vec::new();
        }
        self.equal_range(previous_value)
            .iter()
            .map(|t| ZeroQueryResult {
                value: self.pool[t.value_idx as usize].clone(),
                zero_query_type: ZeroQueryType::from_u32(t.zero_query_type),
            })
            .collect()
    }
}

fn is_kanji(c: char) -> bool {
    (0x4e00..=0x9fff).contains(&(c as u32))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> ZeroQueryDict {
        ZeroQueryDict::build(&[
            ("101-0001", "東京都千代田", ZeroQueryType::Address),
            ("101-0001", "千代田区", ZeroQueryType::Address),
            ("😀", "笑顔", ZeroQueryType::Emoji),
        ])
    }

    #[test]
    fn exact_match_returns_all_tokens_for_the_key() {
        let dict = sample();
        let results = dict.lookup_zero_query("", "101-0001");
        assert_eq!(results.len(), 2);
        assert!(results.iter().any(|r| r.value == "東京都千代田"));
    }

    #[test]
    fn prefix_of_the_key_does_not_match() {
        let dict = sample();
        let results = dict.lookup_zero_query("", "101-000");
        assert!(results.is_empty());
    }

    #[test]
    fn nonempty_input_key_suppresses_zero_query_lookup() {
        let dict = sample();
        let results = dict.lookup_zero_query("1", "101-0001");
        assert!(results.is_empty());
    }

    #[test]
    fn length_one_non_kanji_key_is_ignored() {
        let dict = sample();
        let results = dict.lookup_zero_query("", "😀");
        assert!(results.is_empty());
    }

    #[test]
    fn unknown_key_returns_empty() {
        let dict = sample();
        assert!(dict.lookup_zero_query("", "zzz").is_empty());
    }

    #[test]
    fn bytes_round_trip_through_serialization() {
        let dict = sample();
        let bytes = dict.to_bytes();
        let reloaded = ZeroQueryDict::from_bytes(&bytes).unwrap();
        let results = reloaded.lookup_zero_query("", "101-0001");
        assert_eq!(results.len(), 2);
    }

    #[test]
    fn open_reads_a_memory_mapped_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("zero_query.bin");
        std::fs::write(&path, sample().to_bytes()).unwrap();
        let dict = ZeroQueryDict::open(&path).unwrap();
        assert!(!dict.lookup_zero_query("", "101-0001").is_empty());
    }

    #[test]
    fn truncated_blob_is_rejected() {
        let err = ZeroQueryDict::from_bytes(&[1, 0, 0, 0]).unwrap_err();
        assert!(matches!(err, PersistError::TooShort { .. }));
    }
}
