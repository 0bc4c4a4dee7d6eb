use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use colored::Colorize;
use fundrag_core::{ConfigManager, FundRagConfig, GrowwMappings, LoggingConfig};
use fundrag_rag::{CitationFormatter, CitationStyle, RagPipeline, SourcePageMapper};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser)]
#[command(name = "fundrag")]
#[command(about = "FundRAG - factual answers about mutual fund schemes, with citations", long_about = None)]
#[command(version)]
struct Cli {
    /// Config file (defaults to ./fundrag.toml, then ~/.fundrag/config.toml)
    #[arg(short, long, global = true, env = "FUNDRAG_CONFIG")]
    config: Option<PathBuf>,

    /// Output format
    #[arg(short, long, global = true, value_enum, default_value = "pretty")]
    output: OutputFormat,

    /// Log at debug level
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    Pretty,
    Markdown,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Answer a question from the indexed corpus
    Ask {
        question: String,

        /// Index snapshot to load instead of retrieval.index_path
        #[arg(long)]
        index: Option<PathBuf>,

        /// Groww page-mapping file instead of groww.mapping_path
        #[arg(long)]
        mappings: Option<PathBuf>,

        /// Shorthand for --output json
        #[arg(long)]
        json: bool,
    },

    /// Show the Groww page a question maps to, without retrieval or generation
    Map {
        question: String,

        #[arg(long)]
        mappings: Option<PathBuf>,
    },

    /// Print the resolved configuration
    Config {
        /// Write a default config file to PATH instead
        #[arg(long, value_name = "PATH")]
        init: Option<PathBuf>,
    },

    /// Check the index and the LLM provider
    Health {
        #[arg(long)]
        index: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    if let Commands::Config { init: Some(path) } = &cli.command {
        ConfigManager::create_default_config(path)
            .with_context(|| format!("Failed to write {}", path.display()))?;
        println!("{} {}", "Wrote default config to".green(), path.display());
        return Ok(());
    }

    let manager = match &cli.config {
        Some(path) => ConfigManager::load_from(path),
        None => ConfigManager::load(),
    }
    .context("Failed to load configuration")?;
    init_tracing(&manager.config().logging, cli.verbose);

    if let Err(e) = execute_command(&cli, manager).await {
        eprintln!("{} {:#}", "Error:".red().bold(), e);
        std::process::exit(1);
    }
    Ok(())
}

/// `RUST_LOG` wins over the configured level. Logs go to stderr so `--json`
/// output stays machine-readable.
fn init_tracing(logging: &LoggingConfig, verbose: bool) {
    let level = if verbose { "debug" } else { logging.level.as_str() };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let registry = tracing_subscriber::registry().with(filter);

    let result = match logging.format.as_str() {
        "json" => registry
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .try_init(),
        "compact" => registry
            .with(tracing_subscriber::fmt::layer().compact().with_writer(std::io::stderr))
            .try_init(),
        _ => registry
            .with(tracing_subscriber::fmt::layer().pretty().with_writer(std::io::stderr))
            .try_init(),
    };
    if let Err(e) = result {
        eprintln!("Failed to initialise logging: {}", e);
    }
}

async fn execute_command(cli: &Cli, manager: ConfigManager) -> Result<()> {
    match &cli.command {
        Commands::Ask {
            question,
            index,
            mappings,
            json,
        } => {
            let output = if *json { OutputFormat::Json } else { cli.output };
            let config = with_overrides(manager.into_config(), index, mappings);
            execute_ask(&config, question, output).await
        }
        Commands::Map { question, mappings } => {
            let config = with_overrides(manager.into_config(), &None, mappings);
            execute_map(&config, question, cli.output)
        }
        Commands::Config { .. } => execute_config(&manager, cli.output),
        Commands::Health { index } => {
            let config = with_overrides(manager.into_config(), index, &None);
            execute_health(&config, cli.output).await
        }
    }
}

fn with_overrides(
    mut config: FundRagConfig,
    index: &Option<PathBuf>,
    mappings: &Option<PathBuf>,
) -> FundRagConfig {
    if let Some(path) = index {
        config.retrieval.index_path = Some(path.clone());
    }
    if let Some(path) = mappings {
        config.groww.mapping_path = Some(path.clone());
    }
    config
}

async fn execute_ask(config: &FundRagConfig, question: &str, output: OutputFormat) -> Result<()> {
    let pipeline = RagPipeline::from_config(config).context("Failed to initialise pipeline")?;
    let answer = pipeline.answer_query(question).await?;

    match output {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&answer)?),
        OutputFormat::Pretty | OutputFormat::Markdown => {
            let style = if output == OutputFormat::Markdown {
                CitationStyle::Markdown
            } else {
                CitationStyle::Plain
            };
            let formatter = CitationFormatter::new(style);
            println!("{}", answer.answer_text);
            if !answer.citations.is_empty() {
                println!();
                println!("{}", formatter.format_sources(&answer.citations).cyan());
            }
            println!();
            let status = if answer.fallback_used {
                "fallback".yellow()
            } else {
                "answered".green()
            };
            println!(
                "{} {} | confidence {:.2} | {} chunks | {} ms",
                "Status:".bold(),
                status,
                answer.confidence,
                answer.chunks_retrieved,
                answer.latency_ms
            );
        }
    }
    Ok(())
}

fn execute_map(config: &FundRagConfig, question: &str, output: OutputFormat) -> Result<()> {
    let mappings = match &config.groww.mapping_path {
        Some(path) => GrowwMappings::from_path(path)?,
        None => GrowwMappings::default(),
    };
    let mapper = SourcePageMapper::new(mappings);
    let analysis = mapper.analyze_query(question);
    let page = mapper.resolve(&analysis, &[]);

    if output == OutputFormat::Json {
        let value = serde_json::json!({
            "analysis": analysis,
            "page": page,
        });
        println!("{}", serde_json::to_string_pretty(&value)?);
        return Ok(());
    }

    println!("{} {}", "Category:".bold(), analysis.category);
    if let Some(amc) = &analysis.amc_slug {
        println!("{} {}", "AMC:".bold(), amc);
    }
    if let Some(fund) = &analysis.fund_slug {
        println!("{} {}", "Fund:".bold(), fund);
    }
    match page {
        Some(citation) => println!("{} {}", "Groww page:".bold(), citation.url.cyan()),
        None => println!("{} {}", "Groww page:".bold(), "none".dimmed()),
    }
    Ok(())
}

fn execute_config(manager: &ConfigManager, output: OutputFormat) -> Result<()> {
    let config = manager.config();
    if output == OutputFormat::Json {
        println!("{}", serde_json::to_string_pretty(config)?);
        return Ok(());
    }

    match manager.config_path() {
        Some(path) => println!("{} {}", "Config file:".bold(), path.display()),
        None => println!("{} {}", "Config file:".bold(), "none (defaults)".dimmed()),
    }
    println!("{} {}", "LLM provider:".bold(), config.llm.provider);
    println!(
        "{} {} / {} ({} dims)",
        "Embedding:".bold(),
        config.embedding.provider,
        config.embedding.model,
        config.embedding.dimension
    );
    match &config.retrieval.index_path {
        Some(path) => println!("{} {}", "Index:".bold(), path.display()),
        None => println!("{} {}", "Index:".bold(), "not set".yellow()),
    }
    println!(
        "{} top_k={} min_similarity={} min_confidence={}",
        "Retrieval:".bold(),
        config.retrieval.top_k,
        config.retrieval.min_similarity,
        config.answer.min_confidence
    );
    println!(
        "{} {}",
        "Answer cache:".bold(),
        if config.pipeline.cache_enabled {
            "enabled"
        } else {
            "disabled"
        }
    );
    Ok(())
}

async fn execute_health(config: &FundRagConfig, output: OutputFormat) -> Result<()> {
    let pipeline = RagPipeline::from_config(config).context("Failed to initialise pipeline")?;
    let report = pipeline.health_check().await;

    if output == OutputFormat::Json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!(
            "{} {} chunks ({}, corpus {})",
            "Index:".bold(),
            report.index_chunks,
            report.embedding_model,
            report.corpus_version
        );
        let llm_status = if report.llm_available {
            "available".green()
        } else {
            "unreachable".red()
        };
        println!(
            "{} {} / {} {}",
            "LLM:".bold(),
            report.llm_provider,
            report.llm_model,
            llm_status
        );
    }

    if !report.is_healthy() {
        bail!("Pipeline is not healthy");
    }
    Ok(())
}
