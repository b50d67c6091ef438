//! docdex command-line interface.

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use docdex::config::{load_config, Config};
use docdex::embedding::create_provider;
use docdex::manager::PipelineManager;
use docdex::scraper::{ScrapeMode, ScrapeOptions, StrategyRegistry};
use docdex::search::{search_library, SearchOptions};
use docdex::server::{run_server, AppState};
use docdex::store::DocumentStore;
use docdex::urls::Scope;

#[derive(Parser)]
#[command(
    name = "docdex",
    about = "Index documentation sites into a searchable per-library, per-version corpus",
    version
)]
struct Cli {
    /// Path to configuration file
    #[arg(long, global = true, default_value = "./docdex.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema
    Init,

    /// Scrape a documentation source and index it
    Scrape {
        /// Library name the documents are indexed under
        library: String,

        /// Start URL (http(s) or file://)
        url: String,

        /// Version to index under (empty = unversioned)
        #[arg(long, default_value = "")]
        version: String,

        #[arg(long)]
        max_pages: Option<usize>,

        #[arg(long)]
        max_depth: Option<usize>,

        #[arg(long)]
        max_concurrency: Option<usize>,

        /// Crawl scope: subpages, hostname, or domain
        #[arg(long, default_value = "subpages")]
        scope: String,

        /// Glob or /regex/ pattern a page must match (repeatable)
        #[arg(long = "include")]
        include_patterns: Vec<String>,

        /// Glob or /regex/ pattern that excludes pages (repeatable)
        #[arg(long = "exclude")]
        exclude_patterns: Vec<String>,

        /// Scrape mode: auto, fetch, playwright, or github-markdown
        #[arg(long, default_value = "auto")]
        mode: String,

        /// Extra request header, `Name: value` (repeatable)
        #[arg(long = "header")]
        headers: Vec<String>,

        /// Fail the job on the first page error
        #[arg(long)]
        strict: bool,
    },

    /// Search indexed documentation
    Search {
        library: String,
        query: String,

        /// Version to search (resolved via best-version matching)
        #[arg(long)]
        version: Option<String>,

        #[arg(long, default_value_t = 5)]
        limit: usize,

        /// Search the literal version instead of resolving it
        #[arg(long)]
        exact: bool,
    },

    /// List indexed libraries and versions
    List,

    /// Remove all chunks for a library version
    Remove {
        library: String,

        #[arg(long, default_value = "")]
        version: String,
    },

    /// Resolve the best indexed version for a target
    FindVersion {
        library: String,

        #[arg(long)]
        version: Option<String>,
    },

    /// Start the HTTP API server
    Serve {
        /// Override the configured bind address
        #[arg(long)]
        bind: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env().add_directive("docdex=info".parse()?),
        )
        .init();

    let cli = Cli::parse();
    let config = load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            let store = open_store(&config).await?;
            store.close().await;
            println!("database ready at {}", config.db.path.display());
        }

        Commands::Scrape {
            library,
            url,
            version,
            max_pages,
            max_depth,
            max_concurrency,
            scope,
            include_patterns,
            exclude_patterns,
            mode,
            headers,
            strict,
        } => {
            let mut options = ScrapeOptions::new(url, library.clone(), version.clone());
            options.max_pages = max_pages.unwrap_or(config.scraper.max_pages);
            options.max_depth = max_depth.unwrap_or(config.scraper.max_depth);
            options.max_concurrency = max_concurrency.unwrap_or(config.scraper.max_concurrency);
            options.scope = parse_scope(&scope)?;
            options.include_patterns = include_patterns;
            options.exclude_patterns = exclude_patterns;
            options.scrape_mode = parse_mode(&mode)?;
            options.ignore_errors = !strict;
            for header in headers {
                let (name, value) = header.split_once(':').ok_or_else(|| {
                    anyhow::anyhow!("header '{header}' must be of the form 'Name: value'")
                })?;
                options
                    .headers
                    .insert(name.trim().to_string(), value.trim().to_string());
            }

            let store = Arc::new(open_store(&config).await?);
            let registry = Arc::new(StrategyRegistry::standard()?);
            let manager = PipelineManager::new(
                store.clone(),
                registry,
                config.scraper.job_concurrency,
            );
            manager.start();

            let job_id = manager
                .enqueue_job(&library, Some(&version), options)
                .await?;
            println!("job {job_id} queued");
            let job = manager.wait_for_job(job_id).await?;
            match job.error {
                Some(error) => anyhow::bail!("job {:?}: {error}", job.status),
                None => println!(
                    "job {:?}: {} pages, {} chunks indexed",
                    job.status, job.progress.pages_scraped, job.progress.chunks_indexed
                ),
            }
            manager.stop().await;
            store.close().await;
        }

        Commands::Search {
            library,
            query,
            version,
            limit,
            exact,
        } => {
            let store = open_store(&config).await?;
            let results = search_library(
                &store,
                &SearchOptions {
                    library,
                    version,
                    query,
                    limit,
                    exact_match: exact,
                },
            )
            .await?;
            if results.is_empty() {
                println!("No results.");
            }
            for (i, result) in results.iter().enumerate() {
                println!("{}. [{:.4}] {}", i + 1, result.score, result.url);
                for line in result.content.lines().take(8) {
                    println!("    {line}");
                }
                println!();
            }
            store.close().await;
        }

        Commands::List => {
            let store = open_store(&config).await?;
            let libraries = store.query_library_versions().await?;
            if libraries.is_empty() {
                println!("No libraries indexed.");
            }
            for (name, versions) in &libraries {
                println!("{name}");
                for details in versions {
                    let label = if details.version.is_empty() {
                        "(unversioned)"
                    } else {
                        &details.version
                    };
                    println!(
                        "    {label}  {} chunks, {} pages, indexed {}",
                        details.document_count,
                        details.unique_url_count,
                        details
                            .indexed_at
                            .map(|t| t.format("%Y-%m-%d").to_string())
                            .unwrap_or_else(|| "-".to_string()),
                    );
                }
            }
            store.close().await;
        }

        Commands::Remove { library, version } => {
            let store = open_store(&config).await?;
            let removed = store.delete_documents(&library, &version).await?;
            println!("removed {removed} chunks");
            store.close().await;
        }

        Commands::FindVersion { library, version } => {
            let store = open_store(&config).await?;
            let best = store
                .find_best_version(&library, version.as_deref())
                .await?;
            if best.is_empty() {
                println!("(unversioned)");
            } else {
                println!("{best}");
            }
            store.close().await;
        }

        Commands::Serve { bind } => {
            let store = Arc::new(open_store(&config).await?);
            let registry = Arc::new(StrategyRegistry::standard()?);
            let manager = Arc::new(PipelineManager::new(
                store.clone(),
                registry,
                config.scraper.job_concurrency,
            ));
            manager.start();
            let bind = bind.unwrap_or(config.server.bind.clone());
            run_server(AppState { store, manager }, &bind).await?;
        }
    }

    Ok(())
}

async fn open_store(config: &Config) -> Result<DocumentStore> {
    let embedder = create_provider(&config.embedding)?;
    Ok(DocumentStore::open(&config.db.path, Arc::from(embedder)).await?)
}

fn parse_scope(raw: &str) -> Result<Scope> {
    match raw {
        "subpages" => Ok(Scope::Subpages),
        "hostname" => Ok(Scope::Hostname),
        "domain" => Ok(Scope::Domain),
        other => anyhow::bail!("unknown scope '{other}' (use subpages, hostname, or domain)"),
    }
}

fn parse_mode(raw: &str) -> Result<ScrapeMode> {
    match raw {
        "auto" => Ok(ScrapeMode::Auto),
        "fetch" => Ok(ScrapeMode::Fetch),
        "playwright" => Ok(ScrapeMode::Playwright),
        "github-markdown" => Ok(ScrapeMode::GithubMarkdown),
        other => anyhow::bail!(
            "unknown scrape mode '{other}' (use auto, fetch, playwright, or github-markdown)"
        ),
    }
}
