//! Supermat CLI - Command-line interface
//!
//! Usage:
//!   supermat link <input> [--relation <type>]... [--output <file>]
//!   supermat classify <input>
//!   supermat evaluate <input>
//!
//! Input files hold a JSON paragraph, a JSON array of paragraphs or one
//! paragraph per line (JSON Lines).

use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::{Parser, Subcommand};
use supermat_core::{AppConfig, LoggingConfig, Paragraph, RelationType};
use supermat_linker::{Evaluator, LinkedParagraph, LinkingPipeline, RuleBasedLinker};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "supermat")]
#[command(about = "Relationship resolution for superconductor material spans")]
#[command(version)]
struct Cli {
    /// TOML configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Link entity spans and print the annotated paragraphs
    Link {
        /// Input file
        input: PathBuf,
        /// Relation types to resolve (defaults to the configured ones)
        #[arg(short, long = "relation")]
        relations: Vec<RelationType>,
        /// Write the output here instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Only mark critical temperature values as linkable
    Classify {
        /// Input file
        input: PathBuf,
        /// Write the output here instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Re-link gold paragraphs and report link quality
    Evaluate {
        /// Input file with gold links
        input: PathBuf,
        /// Relation types to evaluate (defaults to the configured ones)
        #[arg(short, long = "relation")]
        relations: Vec<RelationType>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = load_config(cli.config.as_deref())?;
    init_tracing(&config.logging);

    match cli.command {
        Commands::Link {
            input,
            relations,
            output,
        } => {
            let config = with_relations(config, relations);
            let pipeline = LinkingPipeline::from_config(&config)?;
            let paragraphs = read_paragraphs(&input).await?;

            let linked = paragraphs
                .iter()
                .map(|p| pipeline.run(p))
                .collect::<Result<Vec<LinkedParagraph>, _>>()?;
            let relations: usize = linked.iter().map(|l| l.relations().count()).sum();
            tracing::info!(paragraphs = linked.len(), relations, "linking finished");

            write_output(output.as_deref(), &linked).await?;
        }
        Commands::Classify { input, output } => {
            let linker = RuleBasedLinker::from_config(&config, RelationType::MaterialTc);
            let paragraphs = read_paragraphs(&input).await?;

            let classified = paragraphs
                .iter()
                .map(|p| linker.classify_values(p))
                .collect::<Result<Vec<LinkedParagraph>, _>>()?;
            tracing::info!(paragraphs = classified.len(), "classification finished");

            write_output(output.as_deref(), &classified).await?;
        }
        Commands::Evaluate { input, relations } => {
            let config = with_relations(config, relations);
            let pipeline = LinkingPipeline::from_config(&config)?;
            let gold = read_paragraphs(&input).await?;

            let mut predicted = Vec::with_capacity(gold.len());
            for paragraph in &gold {
                let mut stripped = paragraph.clone();
                stripped.clear_links();
                for span in &mut stripped.spans {
                    span.linkable = false;
                }
                predicted.push(pipeline.run(&stripped)?.paragraph);
            }

            let report = Evaluator::new()
                .only(config.linking.relations.iter().copied())
                .evaluate_paragraphs(&predicted, &gold);
            println!("{}", report.report());
        }
    }

    Ok(())
}

fn load_config(path: Option<&Path>) -> anyhow::Result<AppConfig> {
    let config = match path {
        Some(path) => AppConfig::from_file(path)?,
        None => AppConfig::default(),
    };
    Ok(config.with_env_override()?)
}

fn with_relations(mut config: AppConfig, relations: Vec<RelationType>) -> AppConfig {
    if !relations.is_empty() {
        config.linking.relations = relations;
    }
    config
}

fn init_tracing(logging: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!(
            "supermat_cli={0},supermat_linker={0},supermat_core={0}",
            logging.level
        ))
    });

    // stdout carries the JSON output
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_file(logging.include_location)
        .with_line_number(logging.include_location);

    if logging.json_format {
        builder.json().init();
    } else {
        builder.init();
    }
}

async fn read_paragraphs(path: &Path) -> anyhow::Result<Vec<Paragraph>> {
    let content = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("failed to read {}", path.display()))?;
    parse_paragraphs(&content).with_context(|| format!("invalid input in {}", path.display()))
}

fn parse_paragraphs(content: &str) -> anyhow::Result<Vec<Paragraph>> {
    if content.trim_start().starts_with('[') {
        return Ok(serde_json::from_str(content)?);
    }
    if let Ok(paragraph) = serde_json::from_str::<Paragraph>(content) {
        return Ok(vec![paragraph]);
    }

    content
        .lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(n, line)| {
            serde_json::from_str(line).with_context(|| format!("line {}", n + 1))
        })
        .collect()
}

async fn write_output(path: Option<&Path>, linked: &[LinkedParagraph]) -> anyhow::Result<()> {
    let json = serde_json::to_string_pretty(linked)?;
    match path {
        Some(path) => tokio::fs::write(path, json)
            .await
            .with_context(|| format!("failed to write {}", path.display()))?,
        None => println!("{json}"),
    }
    Ok(())
}
