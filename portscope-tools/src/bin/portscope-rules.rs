//! portscope-rules
//!
//! Manages the persisted highlight rules shared by the monitor and replay tools.

use clap::{Parser, Subcommand};
use portscope::highlight::{Color, HighlightIndex, HighlightRule, RulesError};
use portscope_tools::{init_logging, CommonOpts};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::debug;

#[derive(Parser, Debug)]
#[command(
    name = "portscope-rules",
    version,
    about = "Manage highlight rules"
)]
struct Cli {
    #[command(flatten)]
    common: CommonOpts,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// List the current rules
    List,
    /// Add a word, or change the colors of an existing one
    Add {
        word: String,

        /// Foreground color (#RRGGBB or #AARRGGBB); picked from the palette if omitted
        #[arg(short = 'f', long = "fore")]
        fore: Option<Color>,

        /// Background color (#RRGGBB or #AARRGGBB); picked from the palette if omitted
        #[arg(short = 'b', long = "back")]
        back: Option<Color>,
    },
    /// Remove a word
    Remove { word: String },
    /// Write the rules to a text file
    Export { file: PathBuf },
    /// Merge the rules of an exported file or a legacy JSON list
    Import { file: PathBuf },
}

fn list(index: &HighlightIndex) -> Result<(), RulesError> {
    let rules = index.rules();
    if rules.is_empty() {
        println!("no highlight rules");
    }
    let width = rules.iter().map(|r| r.word.chars().count()).max().unwrap_or(0);
    for rule in rules {
        println!(
            "{:<width$}  {:>9}  {:>9}",
            rule.word,
            rule.fore.to_hex(),
            rule.back.to_hex()
        );
    }
    Ok(())
}

fn add(
    index: &HighlightIndex,
    word: String,
    fore: Option<Color>,
    back: Option<Color>,
) -> Result<(), RulesError> {
    let (palette_fore, palette_back) = Color::palette_for(&word);
    let rule = HighlightRule::new(
        &word,
        fore.unwrap_or(palette_fore),
        back.unwrap_or(palette_back),
    )?;
    println!("{} | {} | {}", rule.word, rule.fore, rule.back);
    index.upsert(rule)
}

fn remove(index: &HighlightIndex, word: String) -> Result<(), RulesError> {
    if !index.remove(&word)? {
        println!("{:?} was not highlighted", word);
    }
    Ok(())
}

fn export(index: &HighlightIndex, file: PathBuf) -> Result<(), RulesError> {
    let count = index.export_file(&file)?;
    println!("exported {} rules to {}", count, file.display());
    Ok(())
}

fn import(index: &HighlightIndex, file: PathBuf) -> Result<(), RulesError> {
    let report = index.import_file(&file)?;
    println!(
        "imported {} rules, skipped {} lines",
        report.imported(),
        report.skipped
    );
    Ok(())
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.common.verbose);

    let config = match cli.common.load_config() {
        Ok(config) => config,
        Err(err) => {
            eprintln!("ERROR: {}", err);
            return ExitCode::FAILURE;
        }
    };
    let store = cli.common.rule_store(&config);
    debug!(path = %store.path().display(), "using rule store");
    let index = HighlightIndex::open(store);

    let result = match cli.command {
        Commands::List => list(&index),
        Commands::Add { word, fore, back } => add(&index, word, fore, back),
        Commands::Remove { word } => remove(&index, word),
        Commands::Export { file } => export(&index, file),
        Commands::Import { file } => import(&index, file),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("ERROR: {}", err);
            ExitCode::FAILURE
        }
    }
}
