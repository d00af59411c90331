//! Rift CLI - resolve identifiers and scan text for them.
//!
//! This is the main binary entry point. See the `rift` library for the
//! bridge itself.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use rift::detector::{Detector, Document, Occurrence};
use rift::embed::ViewerOptions;
use rift::{Config, UriCodec};

#[derive(Parser)]
#[command(name = "rift")]
#[command(version)]
#[command(about = "Resolve and detect rift:// identifiers")]
struct Cli {
    /// JSON config file (defaults apply when omitted)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the loadable address for an identifier
    Resolve {
        /// Identifier such as rift://host/path?x=1
        identifier: String,
    },
    /// List every identifier in a text file with its position and address
    Scan {
        /// File to scan
        file: PathBuf,
    },
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().filter_or("RIFT_LOG", "info"))
        .format_timestamp_secs()
        .init();

    let cli = Cli::parse();
    let config = Config::load(cli.config.as_deref())?;

    match cli.command {
        Commands::Resolve { identifier } => resolve(&config, &identifier),
        Commands::Scan { file } => scan(&config, &file),
    }
}

fn resolve(config: &Config, identifier: &str) -> Result<()> {
    let codec = UriCodec::new(config.uri.clone());
    println!("{}", codec.to_address(identifier));

    if let Some(parsed) = codec.parse(identifier) {
        let options = ViewerOptions::from_params(&parsed.namespaced_params);
        println!("  height: {}px", options.height.pixels());
        if let Some(color) = options.color {
            println!("  color:  {color}");
        }
        for (key, value) in &parsed.namespaced_params {
            if key != "height" && key != "color" {
                println!("  {key}: {value}");
            }
        }
    } else if !codec.is_identifier(identifier) {
        log::info!("Not a {} identifier, passed through unchanged", codec.prefix());
    }
    Ok(())
}

fn scan(config: &Config, file: &Path) -> Result<()> {
    let text = std::fs::read_to_string(file)
        .with_context(|| format!("Failed to read {}", file.display()))?;
    let (document, _) = Document::from_text(&text);
    let document = Arc::new(document);

    let found = Arc::new(Mutex::new(Vec::<Occurrence>::new()));
    let sink = Arc::clone(&found);
    let detector = Detector::new(
        Arc::clone(&document),
        document.root(),
        &config.uri.scheme,
        config.detector.clone(),
        move |occurrence| {
            sink.lock()
                .map_err(|_| anyhow::anyhow!("occurrence list poisoned"))?
                .push(occurrence.clone());
            Ok(())
        },
    )?;
    detector.scan();

    let codec = UriCodec::new(config.uri.clone());
    let found = found
        .lock()
        .map_err(|_| anyhow::anyhow!("occurrence list poisoned"))?;
    for occurrence in found.iter() {
        let (line, column) = line_column(&text, occurrence.span.start);
        println!(
            "{}:{line}:{column}\t{}\t{}",
            file.display(),
            occurrence.identifier,
            codec.to_address(&occurrence.identifier)
        );
    }
    log::info!("{} identifier(s) found", found.len());
    Ok(())
}

/// 1-based line and column (in characters) of byte `offset`.
fn line_column(text: &str, offset: usize) -> (usize, usize) {
    let before = &text[..offset];
    let line = before.matches('\n').count() + 1;
    let line_start = before.rfind('\n').map_or(0, |i| i + 1);
    let column = before[line_start..].chars().count() + 1;
    (line, column)
}
