//! Global settings loaded from TOML, following the same `OnceLock`-backed
//! lazy-singleton pattern the reference engine uses for its own settings
//! and romaji tables.
//!
//! - [`init_custom`] sets a custom TOML before the first [`settings`] call.
//! - [`settings`] returns `&'static Settings`, parsing the embedded default
//!   TOML (via `include_str!`) the first time it is called.

use std::sync::OnceLock;

use serde::Deserialize;

pub const DEFAULT_SETTINGS_TOML: &str = include_str!("default_settings.toml");

static CUSTOM_TOML: OnceLock<String> = OnceLock::new();

/// Set custom TOML before the first [`settings`] call.
pub fn init_custom(toml_content: String) -> Result<(), SettingsError> {
    parse_settings_toml(&toml_content)?;
    CUSTOM_TOML
        .set(toml_content)
        .map_err(|_| SettingsError::AlreadyInitialized)
}

/// Get or initialize the global settings singleton.
pub fn settings() -> &'static Settings {
    static INSTANCE: OnceLock<Settings> = OnceLock::new();
    INSTANCE.get_or_init(|| {
        let toml_str = CUSTOM_TOML
            .get()
            .map(|s| s.as_str())
            .unwrap_or(DEFAULT_SETTINGS_TOML);
        parse_settings_toml(toml_str).expect("settings TOML must be valid")
    })
}

#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    #[error("TOML parse error: {0}")]
    Parse(String),
    #[error("invalid value for {field}: {reason}")]
    InvalidValue { field: String, reason: String },
    #[error("settings already initialized")]
    AlreadyInitialized,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub history: HistorySettings,
    pub predictor: PredictorSettings,
    pub corrector: CorrectorSettings,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HistorySettings {
    /// Maximum DEFAULT entries held in the LRU (spec §3: 10,000 typical).
    pub cache_size: usize,
    /// Entries older than this are expired on load/save (spec §3: 62 days).
    pub expiry_days: u64,
    /// Bound on `next_entries` per history entry (spec §3: ≤ 4).
    pub max_successors: usize,
    /// Bigram-boost bonus in seconds added to `score()` (spec §4.5: one week).
    pub bigram_boost_seconds: i64,
    /// WAL entries accumulated before a full checkpoint is recommended.
    pub wal_checkpoint_threshold: usize,
    /// Max key/value length in bytes accepted by `try_insert` (spec §4.5: 256).
    pub max_field_bytes: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PredictorSettings {
    /// LRU walk cap in suggestion mode (spec §4.5: 3000).
    pub suggestion_walk_limit: usize,
    /// How many of the most-recent LRU elements to scan for the "previous
    /// entry" lookup (spec §4.5: 500).
    pub previous_entry_scan_limit: usize,
    /// Seconds within which a sentence + trailing punctuation commit is
    /// merged into one grouped entry (spec §4.5 step 3: 5 seconds).
    pub sentence_punct_window_secs: u64,
    /// Minimum reading length, in characters, for the sentence-like check.
    pub sentence_min_len: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CorrectorSettings {
    /// Maximum number of typo-corrected alternates returned per key.
    pub max_alternates: usize,
}

pub fn parse_settings_toml(toml_str: &str) -> Result<Settings, SettingsError> {
    let s: Settings = toml::from_str(toml_str).map_err(|e| SettingsError::Parse(e.to_string()))?;
    validate(&s)?;
    Ok(s)
}

fn validate(s: &Settings) -> Result<(), SettingsError> {
    macro_rules! check_positive {
        ($section:ident . $field:ident) => {
            if s.$section.$field == 0 {
                return Err(SettingsError::InvalidValue {
                    field: concat!(stringify!($section), ".", stringify!($field)).to_string(),
                    reason: "must be positive".to_string(),
                });
            }
        };
    }

    check_positive!(history.cache_size);
    check_positive!(history.expiry_days);
    check_positive!(history.max_successors);
    check_positive!(history.max_field_bytes);
    check_positive!(predictor.suggestion_walk_limit);
    check_positive!(predictor.previous_entry_scan_limit);
    check_positive!(predictor.sentence_min_len);
    check_positive!(corrector.max_alternates);

    if s.history.max_successors > 64 {
        return Err(SettingsError::InvalidValue {
            field: "history.max_successors".to_string(),
            reason: "unreasonably large; spec bounds this at 4".to_string(),
        });
    }

    Ok(())
}
