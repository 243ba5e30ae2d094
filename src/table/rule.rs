//! A single rewrite rule and the attribute bitset chunks inherit from it.

use bitflags::bitflags;

bitflags! {
    /// Attribute bits carried by a [`RewriteRule`] and, once applied, by the
    /// [`Chunk`](crate::chunk::Chunk) that absorbed it (spec §3, §6.1).
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct Attributes: u8 {
        /// The match may only begin a new chunk; it cannot extend one.
        const NEW_CHUNK = 0b0001;
        /// No rule may extend past this match inside the same chunk.
        const END_CHUNK = 0b0010;
        /// `LOCAL`/`HALF_ASCII`/`FULL_ASCII` resolve to `CONVERSION_STRING`.
        const NO_TRANSLITERATION = 0b0100;
        /// The chunk is "direct input": `should_commit` treats it as final.
        const DIRECT_INPUT = 0b1000;
    }
}

/// One row of a §6.1 rewrite-table file: `(input, result, pending, attributes)`.
///
/// Whenever the running `pending + lookahead` has `input` as a strict
/// prefix, the matching chunk consumes that prefix, appends `result` to its
/// `conversion`, and sets its new `pending` to this rule's `pending`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RewriteRule {
    pub input: String,
    pub result: String,
    pub pending: String,
    pub attributes: Attributes,
}

impl RewriteRule {
    pub fn new(
        input: impl Into<String>,
        result: impl Into<String>,
        pending: impl Into<String>,
        attributes: Attributes,
    ) -> Self {
        Self {
            input: input.into(),
            result: result.into(),
            pending: pending.into(),
            attributes,
        }
    }
}
