//! §6.1 rewrite-table file format: tab-separated
//! `input<TAB>result<TAB>pending<TAB>attributes?`, `#`-prefixed lines and
//! blank lines skipped, special-key `{name}` markers parsed into sentinels.

use super::rule::{Attributes, RewriteRule};
use super::special_key::SpecialKeyTable;
use super::RewriteTable;
use crate::error::TableError;

fn parse_attributes(row: usize, field: &str) -> Result<Attributes, TableError> {
    let mut attrs = Attributes::empty();
    for part in field.split(',') {
        let part = part.trim();
        if part.is_empty() || part == "NO_TABLE_ATTRIBUTE" {
            continue;
        }
        let bit = match part {
            "NEW_CHUNK" => Attributes::NEW_CHUNK,
            "END_CHUNK" => Attributes::END_CHUNK,
            "NO_TRANSLITERATION" => Attributes::NO_TRANSLITERATION,
            "DIRECT_INPUT" => Attributes::DIRECT_INPUT,
            other => {
                return Err(TableError::UnknownAttribute {
                    row,
                    attr: other.to_string(),
                })
            }
        };
        attrs |= bit;
    }
    Ok(attrs)
}

/// Parse a §6.1 rewrite-table file body into a [`RewriteTable`].
///
/// Special-key markers in `input`/`pending` are resolved into sentinel
/// chars shared across the whole file, so `{tab}` always maps to the same
/// codepoint no matter which row introduces it.
pub fn load_table(contents: &str) -> Result<RewriteTable, TableError> {
    let mut keys = SpecialKeyTable::new();
    let mut rules = Vec::new();

    for (line_no, line) in contents.lines().enumerate() {
        let row = line_no + 1;
        let line = line.trim_end_matches('\r');
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let fields: Vec<&str> = line.split('\t').collect();
        if fields.len() != 3 && fields.len() != 4 {
            return Err(TableError::MalformedRow {
                row,
                found: fields.len(),
            });
        }
        let input = keys.parse(fields[0]);
        let result = fields[1].to_string();
        let pending = keys.parse(fields[2]);
        let attributes = if fields.len() == 4 {
            parse_attributes(row, fields[3])?
        } else {
            Attributes::empty()
        };
        rules.push(RewriteRule::new(input, result, pending, attributes));
    }

    Ok(RewriteTable::from_rules_with_special_keys(rules, keys))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_basic_rows() {
        let table = load_table("a\tあ\t\nka\tか\t\nk\t\tk\n").unwrap();
        assert_eq!(table.rules().len(), 3);
    }

    #[test]
    fn parses_attributes_column() {
        let table = load_table("1\t\t{?}あ\tNEW_CHUNK\n").unwrap();
        assert!(table.rules()[0].attributes.contains(Attributes::NEW_CHUNK));
    }

    #[test]
    fn parses_multiple_attributes() {
        let table = load_table("x\ty\t\tNEW_CHUNK,DIRECT_INPUT\n").unwrap();
        let attrs = table.rules()[0].attributes;
        assert!(attrs.contains(Attributes::NEW_CHUNK));
        assert!(attrs.contains(Attributes::DIRECT_INPUT));
    }

    #[test]
    fn skips_comments_and_blank_lines() {
        let table = load_table("# comment\n\na\tあ\t\n").unwrap();
        assert_eq!(table.rules().len(), 1);
    }

    #[test]
    fn rejects_malformed_row() {
        let err = load_table("a\tあ\n").unwrap_err();
        assert!(matches!(err, TableError::MalformedRow { row: 1, found: 2 }));
    }

    #[test]
    fn rejects_unknown_attribute() {
        let err = load_table("a\tあ\t\tBOGUS\n").unwrap_err();
        assert!(matches!(err, TableError::UnknownAttribute { row: 1, .. }));
    }

    #[test]
    fn no_table_attribute_is_a_no_op() {
        let table = load_table("a\tあ\t\tNO_TABLE_ATTRIBUTE\n").unwrap();
        assert!(table.rules()[0].attributes.is_empty());
    }

    #[test]
    fn special_key_markers_share_a_sentinel_across_rows() {
        let table = load_table("1\t\t{*}あ\nあ*\t\t{*}ぁ\n").unwrap();
        let first = table.rules()[0].pending.chars().next().unwrap();
        let second = table.rules()[1].pending.chars().next().unwrap();
        assert_eq!(first, second);
    }
}
