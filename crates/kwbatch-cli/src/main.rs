mod output;

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use kwbatch_client::{ClientConfig, EnvCredentialSupplier, build_orchestrator};
use kwbatch_core::{EngineConfig, FileStore, Keyword, MetricCache};

use crate::output::{Format, write_results};

#[derive(Parser)]
#[command(name = "kwbatch", version, about = "Batch keyword search metrics")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Look up search volume and trend score for keywords
    Lookup {
        /// Keywords to resolve
        keywords: Vec<String>,

        /// Read additional keywords from a file, one per line
        #[arg(short, long)]
        file: Option<PathBuf>,

        /// Output format
        #[arg(long, value_enum, default_value_t = Format::Json)]
        format: Format,
    },

    /// Show statistics for the fallback cache file
    CacheStats {
        /// Fallback cache file
        #[arg(long, env = "CACHE_FILE", default_value = "cache.json")]
        file: PathBuf,

        /// Drop expired entries and rewrite the file
        #[arg(long, default_value_t = false)]
        purge: bool,
    },

    /// Remove keywords from the fallback cache file
    Forget {
        /// Keywords to remove
        #[arg(required = true)]
        keywords: Vec<String>,

        /// Fallback cache file
        #[arg(long, env = "CACHE_FILE", default_value = "cache.json")]
        file: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("kwbatch=info".parse()?))
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Lookup {
            keywords,
            file,
            format,
        } => {
            let keywords = collect_keywords(keywords, file.as_deref())?;
            cmd_lookup(&keywords, format).await?;
        }
        Commands::CacheStats { file, purge } => {
            cmd_cache_stats(&file, purge).await?;
        }
        Commands::Forget { keywords, file } => {
            cmd_forget(&keywords, &file).await?;
        }
    }

    Ok(())
}

/// Positional keywords first, then the file's non-blank lines.
fn collect_keywords(mut keywords: Vec<String>, file: Option<&Path>) -> Result<Vec<String>> {
    if let Some(path) = file {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read keyword file: {}", path.display()))?;
        keywords.extend(
            content
                .lines()
                .map(str::trim)
                .filter(|line| !line.is_empty())
                .map(str::to_string),
        );
    }
    if keywords.is_empty() {
        anyhow::bail!("No keywords given. Pass them as arguments or with --file.");
    }
    Ok(keywords)
}

async fn cmd_lookup(keywords: &[String], format: Format) -> Result<()> {
    let engine = EngineConfig::from_env().context("Invalid engine configuration")?;
    let clients = ClientConfig::from_env().context("Invalid provider configuration")?;
    let credentials = EnvCredentialSupplier::from_env();

    let orchestrator = build_orchestrator(&engine, &clients, &credentials)
        .await
        .context("Failed to initialize providers")?;

    tracing::info!(keywords = keywords.len(), "Looking up keywords");
    let results = orchestrator
        .process(keywords)
        .await
        .context("Keyword lookup failed")?;

    let missing = results.iter().filter(|r| r.is_empty()).count();
    if missing > 0 {
        tracing::warn!(missing, "Some keywords have no data from either provider");
    }

    write_results(std::io::stdout().lock(), &results, format)
}

async fn cmd_cache_stats(file: &Path, purge: bool) -> Result<()> {
    let engine = EngineConfig::from_env().context("Invalid engine configuration")?;
    let store = open_cache_file(file, engine.cache.max_file_entries).await?;

    if purge {
        let removed = store
            .purge_expired()
            .await
            .with_context(|| format!("Failed to rewrite cache file: {}", file.display()))?;
        tracing::info!(removed, "Purged expired entries");
    }

    let stats = store.stats().await;
    println!("{}", serde_json::to_string_pretty(&stats)?);

    Ok(())
}

async fn cmd_forget(keywords: &[String], file: &Path) -> Result<()> {
    let engine = EngineConfig::from_env().context("Invalid engine configuration")?;
    let store = open_cache_file(file, engine.cache.max_file_entries).await?;
    let cache = MetricCache::new(store, engine.cache.ttl);

    for raw in keywords {
        let keyword =
            Keyword::parse(raw).with_context(|| format!("Invalid keyword: {raw:?}"))?;
        if cache.invalidate(&keyword).await {
            println!("removed  {keyword}");
        } else {
            println!("absent   {keyword}");
        }
    }

    Ok(())
}

async fn open_cache_file(file: &Path, max_entries: usize) -> Result<FileStore> {
    FileStore::open(file, max_entries)
        .await
        .with_context(|| format!("Failed to open cache file: {}", file.display()))
}
