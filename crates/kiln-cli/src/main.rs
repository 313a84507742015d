//! Kiln CLI - artifact extraction and dependency repair
//!
//! Usage:
//!   kiln init                   Write the default .kiln/config.toml
//!   kiln extract <file>         Stream a message through the artifact parser
//!   kiln resolve <file>         Repair unresolved imports in every artifact

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use kiln_core::KilnConfig;
use kiln_repair::ResolutionEngine;
use kiln_stream::{parse_document_with, StreamEvent, StreamParser};
use std::path::{Path, PathBuf};
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser)]
#[command(name = "kiln")]
#[command(author, version, about = "Artifact extraction and dependency repair")]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Project root holding .kiln/config.toml
    #[arg(long, global = true, default_value = ".")]
    root: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write the default configuration
    Init {
        /// Overwrite an existing configuration
        #[arg(long)]
        force: bool,
    },

    /// Stream a message file through the parser
    Extract {
        /// Message text file
        file: PathBuf,

        /// Characters per fragment
        #[arg(long, default_value_t = 64, value_parser = clap::value_parser!(u64).range(1..))]
        chunk_size: u64,

        /// Print every parser event as it is raised
        #[arg(long)]
        events: bool,

        /// Print blocks and failures as JSON
        #[arg(long)]
        json: bool,
    },

    /// Repair unresolved imports in every artifact of a message
    Resolve {
        /// Message text file
        file: PathBuf,

        /// Print resolution results as JSON
        #[arg(long)]
        json: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging
    let level = if cli.verbose { Level::DEBUG } else { Level::WARN };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    match cli.command {
        Commands::Init { force } => cmd_init(&cli.root, force).await,
        Commands::Extract {
            file,
            chunk_size,
            events,
            json,
        } => cmd_extract(&cli.root, file, chunk_size as usize, events, json).await,
        Commands::Resolve { file, json } => cmd_resolve(&cli.root, file, json).await,
    }
}

fn load_config(root: &Path) -> Result<KilnConfig> {
    KilnConfig::load_or_default(root)
        .with_context(|| format!("Failed to load configuration under {}", root.display()))
}

async fn read_message(file: &Path) -> Result<String> {
    tokio::fs::read_to_string(file)
        .await
        .with_context(|| format!("Failed to read {}", file.display()))
}

async fn cmd_init(root: &Path, force: bool) -> Result<()> {
    let config_path = root.join(".kiln/config.toml");
    if config_path.exists() && !force {
        println!("{} already exists (use --force to overwrite)", config_path.display());
        return Ok(());
    }

    KilnConfig::write_default(root).context("Failed to write default configuration")?;
    info!("Wrote default configuration to {}", config_path.display());
    println!("Initialized kiln in {}", root.display());
    println!("Created:");
    println!("  .kiln/config.toml");
    Ok(())
}

/// Split `text` into fragments of at most `size` characters
fn fragments(text: &str, size: usize) -> Vec<&str> {
    let mut out = Vec::new();
    let mut start = 0;
    for (count, (i, _)) in text.char_indices().enumerate() {
        if count > 0 && count % size == 0 {
            out.push(&text[start..i]);
            start = i;
        }
    }
    if start < text.len() {
        out.push(&text[start..]);
    }
    out
}

fn describe(event: &StreamEvent) -> String {
    match event {
        StreamEvent::StateTransition { from, to, .. } => format!("{} -> {}", from, to),
        StreamEvent::ArtifactDetected {
            id,
            content_type,
            title,
            ..
        } => format!("detected {} ({}) \"{}\"", id, content_type, title),
        StreamEvent::ArtifactCompleted { block, .. } => format!(
            "completed {} ({} files, valid={})",
            block.id,
            block.files.len(),
            block.valid
        ),
        StreamEvent::ParseFailed { failure, .. } => format!("failed {}", failure),
    }
}

async fn cmd_extract(
    root: &Path,
    file: PathBuf,
    chunk_size: usize,
    show_events: bool,
    json: bool,
) -> Result<()> {
    let config = load_config(root)?;
    let message = read_message(&file).await?;

    let mut parser = StreamParser::with_config(config.stream);
    let mut events = Vec::new();
    for fragment in fragments(&message, chunk_size) {
        events.extend(parser.feed(fragment)?);
    }
    events.extend(parser.finish()?);

    if show_events && !json {
        println!("Events ({})", parser.stream_id());
        println!("======");
        for event in &events {
            println!("  [{}] {}", event.name(), describe(event));
        }
        println!();
    }

    let blocks: Vec<_> = events
        .iter()
        .filter_map(|e| match e {
            StreamEvent::ArtifactCompleted { block, .. } => Some(block.as_ref()),
            _ => None,
        })
        .collect();

    if json {
        let output = serde_json::json!({
            "stream_id": parser.stream_id(),
            "blocks": blocks,
            "failures": parser.failures(),
        });
        println!("{}", serde_json::to_string_pretty(&output)?);
        return Ok(());
    }

    println!("Artifacts: {}", blocks.len());
    for block in &blocks {
        println!(
            "\n  {} [{}] \"{}\"{}",
            block.id,
            block.content_type,
            block.title,
            if block.valid { "" } else { " (invalid)" }
        );
        for file in &block.files {
            println!("    - {} ({} bytes)", file.path, file.content.len());
        }
        for dep in &block.dependencies {
            println!("    dep {}@{}", dep.name, dep.version);
        }
        for error in &block.errors {
            println!("    ! {}", error);
        }
    }

    if !parser.failures().is_empty() {
        println!("\nFailures: {}", parser.failures().len());
        for failure in parser.failures() {
            println!("  - {}", failure);
        }
    }

    Ok(())
}

async fn cmd_resolve(root: &Path, file: PathBuf, json: bool) -> Result<()> {
    let config = load_config(root)?;
    let message = read_message(&file).await?;

    let document = parse_document_with(&message, config.stream);
    let engine = ResolutionEngine::with_config(config.resolution);

    let mut results = Vec::new();
    for block in &document.blocks {
        let Some(code) = block.code() else {
            continue;
        };
        results.push((block.id.as_str(), engine.resolve(&message, code)));
    }

    if json {
        let output: Vec<_> = results
            .iter()
            .map(|(id, result)| serde_json::json!({ "id": id, "resolution": result }))
            .collect();
        println!("{}", serde_json::to_string_pretty(&output)?);
        return Ok(());
    }

    if results.is_empty() {
        println!("No artifacts with code found");
        return Ok(());
    }

    for (id, result) in &results {
        match result.strategy {
            Some(strategy) if result.success => {
                println!(
                    "{}: repaired with {} (confidence {:.2})",
                    id, strategy, result.confidence
                );
                for change in &result.changes {
                    println!(
                        "  {}:{} {}",
                        change.location.line, change.location.column, change.description
                    );
                }
            }
            _ => println!(
                "{}: unchanged ({})",
                id,
                result.error.as_deref().unwrap_or("no repair")
            ),
        }
    }

    Ok(())
}
