//! Loads and validates a rewrite-table TSV file, printing a summary or the
//! parse error. Companion to `composer_cli` for table authors who want
//! fast feedback without wiring up a full composition session.

use std::path::PathBuf;

use clap::Parser;

use lex_compose::table::load_table;

#[derive(Parser)]
#[command(name = "tablecheck", about = "Validate a rewrite-table TSV file")]
struct Cli {
    /// Path to the rewrite-table TSV file.
    path: PathBuf,
    /// Print every parsed rule instead of just the summary.
    #[arg(long)]
    verbose: bool,
}

fn main() {
    let cli = Cli::parse();
    let contents = std::fs::read_to_string(&cli.path).unwrap_or_else(|e| {
        eprintln!("failed to read {}: {e}", cli.path.display());
        std::process::exit(1);
    });

    match load_table(&contents) {
        Ok(table) => {
            println!("{}: {} rules", cli.path.display(), table.rules().len());
            if cli.verbose {
                for rule in table.rules() {
                    println!(
                        "  {:?} -> result={:?} pending={:?} attrs={:?}",
                        rule.input, rule.result, rule.pending, rule.attributes
                    );
                }
            }
        }
        Err(e) => {
            eprintln!("{}: {e}", cli.path.display());
            std::process::exit(1);
        }
    }
}
