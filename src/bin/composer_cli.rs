//! Spec §6.5 CLI harness: a minimal, scriptable driver for reproducing
//! composition scenarios from a line-oriented stdin script. This is a test
//! harness, not a product surface — see `lextool`/`dictool` for the
//! reference engine's equivalent diagnostic binaries.

use std::io::{self, BufRead};
use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;

use lex_compose::table::load_table;
use lex_compose::{default_table, Composition};

#[derive(Parser)]
#[command(name = "composer_cli", about = "Reproducible composition-core test driver")]
struct Cli {
    /// Path to a rewrite-table TSV file; the bundled romaji→hiragana table
    /// is used if omitted.
    #[arg(long)]
    table: Option<PathBuf>,
}

fn main() {
    let cli = Cli::parse();
    let table = match cli.table {
        Some(path) => {
            let contents = std::fs::read_to_string(&path).unwrap_or_else(|e| {
                eprintln!("failed to read table {}: {e}", path.display());
                std::process::exit(1);
            });
            Arc::new(load_table(&contents).unwrap_or_else(|e| {
                eprintln!("failed to parse table {}: {e}", path.display());
                std::process::exit(1);
            }))
        }
        None => default_table(),
    };

    let mut composition = Composition::new(table);
    let mut cursor = 0usize;

    for line in io::stdin().lock().lines() {
        let line = match line {
            Ok(l) => l,
            Err(_) => break,
        };
        if line.is_empty() {
            continue;
        }
        let first = line.as_bytes()[0];
        if first == b'!' {
            cursor = composition.delete_at(cursor);
        } else if first == b'-' || first.is_ascii_digit() {
            match line.parse::<i64>() {
                Ok(delta) => {
                    let len = composition.length(composition.input_mode()) as i64;
                    cursor = (cursor as i64 + delta).clamp(0, len) as usize;
                }
                Err(_) => {
                    cursor = composition.insert_at(cursor, &line);
                }
            }
        } else {
            cursor = composition.insert_at(cursor, &line);
        }
        println!("{}\t{}", composition.get_string(), cursor);
    }
}
