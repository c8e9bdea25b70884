//! mcp-docs CLI entry point

use clap::{Parser, Subcommand};
use mcp_docs::{
    assist::AssistClient,
    config::{self, Config},
    embed::{create_provider, EmbeddingCache},
    error::{Error, Result},
    ingest::{IngestOptions, IngestionPipeline, SourceConfig},
    mcp::{McpServer, ToolRegistry},
    search::{SearchLimits, SearchRequest, SearchService},
    store::{SourceOptions, SourceType, Store},
};
use indicatif::{ProgressBar, ProgressStyle};
use std::sync::Arc;
use std::time::Duration;
use tracing::error;

#[derive(Parser)]
#[command(name = "mcp-docs")]
#[command(version, about = "Local documentation search engine with MCP server support", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the MCP server on stdio
    Serve,

    /// Create or update a source and ingest its documents
    Ingest {
        /// Unique source name
        #[arg(long)]
        name: String,

        /// Source type: link_manifest or web_crawl
        #[arg(long = "type")]
        source_type: String,

        /// Manifest URL or crawl base URL
        #[arg(long)]
        url: String,

        /// Group this source under a shared search tool
        #[arg(long)]
        group: Option<String>,

        /// Human-readable description (derived automatically if omitted)
        #[arg(long)]
        description: Option<String>,

        /// Maximum pages for web_crawl sources
        #[arg(long)]
        crawl_limit: Option<u32>,

        /// Include entries from Optional manifest sections
        #[arg(long)]
        include_optional: bool,

        /// Restrict crawling to these path globs
        #[arg(long = "include-path")]
        include_paths: Vec<String>,

        /// Exclude these path globs from crawling
        #[arg(long = "exclude-path")]
        exclude_paths: Vec<String>,

        /// Resume an interrupted ingestion run
        #[arg(long)]
        resume: bool,

        /// Fetch and report without writing anything
        #[arg(long)]
        dry_run: bool,
    },

    /// List registered sources
    Sources,

    /// Remove a source or a whole group
    Remove {
        /// Source or group name
        name: String,
    },

    /// Search one source or group from the command line
    Search {
        /// Source or group name
        source: String,

        /// The search query
        query: String,

        /// Maximum number of documents
        #[arg(short, long, default_value = "5")]
        limit: usize,
    },

    /// Search and synthesize an answer from the retrieved documents
    Ask {
        /// Source or group name
        source: String,

        /// The question
        query: String,
    },
}

#[tokio::main]
async fn main() {
    config::init_logging();

    if let Err(err) = run().await {
        error!("{}", err);
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    let cli = Cli::parse();
    let config = Config::from_env()?;
    let store = Store::open(&config.database).await?;

    match cli.command {
        Commands::Serve => serve(config, store).await,
        Commands::Ingest {
            name,
            source_type,
            url,
            group,
            description,
            crawl_limit,
            include_optional,
            include_paths,
            exclude_paths,
            resume,
            dry_run,
        } => {
            let source_type: SourceType = source_type.parse()?;
            let source = SourceConfig {
                name,
                source_type,
                base_url: url,
                group_name: group,
                description,
                options: SourceOptions {
                    crawl_limit,
                    include_optional: include_optional.then_some(true),
                    include_paths: (!include_paths.is_empty()).then_some(include_paths),
                    exclude_paths: (!exclude_paths.is_empty()).then_some(exclude_paths),
                    description: None,
                },
            };
            ingest(config, store, source, resume, dry_run).await
        }
        Commands::Sources => list_sources(store).await,
        Commands::Remove { name } => remove(store, &name).await,
        Commands::Search {
            source,
            query,
            limit,
        } => search(config, store, &source, &query, limit).await,
        Commands::Ask { source, query } => ask(config, store, &source, &query).await,
    }
}

async fn serve(config: Config, store: Store) -> Result<()> {
    let provider: Arc<dyn mcp_docs::embed::EmbeddingProvider> =
        Arc::from(create_provider(&config)?);
    let cache = Arc::new(EmbeddingCache::new(
        config.cache_max_size,
        Duration::from_secs(config.cache_ttl_secs),
    ));
    let search = SearchService::new(store.clone(), provider, cache);
    let registry = ToolRegistry::build(&store).await?;

    McpServer::new(registry, search)
        .run()
        .await
        .map_err(|e| Error::Other(e.to_string()))
}

async fn ingest(
    config: Config,
    store: Store,
    source: SourceConfig,
    resume: bool,
    dry_run: bool,
) -> Result<()> {
    let provider = create_provider(&config)?;
    let assist = AssistClient::from_config(&config)?;

    let bar = ProgressBar::new(0);
    bar.set_style(
        ProgressStyle::with_template("{spinner} {pos}/{len} documents ({msg})")
            .expect("valid progress template"),
    );

    let bar_handle = bar.clone();
    let pipeline = IngestionPipeline::new(&store, provider.as_ref(), Some(&assist), &config)
        .with_progress(Box::new(move |stats| {
            bar_handle.set_length(stats.total as u64);
            bar_handle.set_position((stats.processed + stats.skipped + stats.failed) as u64);
            bar_handle.set_message(format!(
                "{} new, {} unchanged, {} failed",
                stats.processed, stats.skipped, stats.failed
            ));
        }));

    let options = IngestOptions { resume, dry_run };
    let report = pipeline.ingest(&source, &options).await?;
    bar.finish_and_clear();

    if let Some(report) = report {
        println!(
            "Dry run: {} documents, {} bytes, ~{} chunks",
            report.document_count, report.total_content_size, report.estimated_total_chunks
        );
        for doc in report.documents {
            println!("  {} ({} bytes) {}", doc.title, doc.content_size, doc.url);
        }
    }
    Ok(())
}

async fn list_sources(store: Store) -> Result<()> {
    let sources = store.list_sources().await?;
    if sources.is_empty() {
        println!("No sources registered.");
        return Ok(());
    }

    for source in sources {
        let group = source
            .group_name
            .as_deref()
            .map(|g| format!(" [group: {}]", g))
            .unwrap_or_default();
        let ingested = source
            .last_ingested_at
            .as_deref()
            .map(|t| format!(" (last ingested {})", t))
            .unwrap_or_default();
        println!(
            "{} <{}> {}{}{}",
            source.name, source.source_type, source.base_url, group, ingested
        );
    }
    Ok(())
}

async fn remove(store: Store, name: &str) -> Result<()> {
    if store.remove_source(name).await? {
        println!("Removed source '{}'", name);
        return Ok(());
    }
    if store.remove_group(name).await? {
        println!("Removed group '{}'", name);
        return Ok(());
    }
    Err(Error::SourceNotFound(name.to_string()))
}

async fn search(
    config: Config,
    store: Store,
    source: &str,
    query: &str,
    limit: usize,
) -> Result<()> {
    let response = run_search(&config, &store, source, query, limit).await?;

    if response.documents.is_empty() {
        println!("No results found for this query.");
        return Ok(());
    }

    for doc in &response.documents {
        println!("## {}\n{}\n\n{}\n", doc.title, doc.url, doc.content);
    }
    if response.truncated {
        println!("(output truncated to fit the response budget)");
    }
    Ok(())
}

async fn ask(config: Config, store: Store, source: &str, query: &str) -> Result<()> {
    let limit = mcp_docs::config::default_search_limit();
    let response = run_search(&config, &store, source, query, limit).await?;

    if response.documents.is_empty() {
        println!("No results found for this query.");
        return Ok(());
    }

    let assist = AssistClient::from_config(&config)?;
    let docs: Vec<String> = response
        .documents
        .iter()
        .map(|doc| format!("## {}\n{}\n\n{}", doc.title, doc.url, doc.content))
        .collect();

    println!("{}", assist.synthesize(query, &docs).await);
    Ok(())
}

async fn run_search(
    config: &Config,
    store: &Store,
    source: &str,
    query: &str,
    limit: usize,
) -> Result<mcp_docs::search::SearchResponse> {
    let provider: Arc<dyn mcp_docs::embed::EmbeddingProvider> =
        Arc::from(create_provider(config)?);
    let cache = Arc::new(EmbeddingCache::new(
        config.cache_max_size,
        Duration::from_secs(config.cache_ttl_secs),
    ));
    let service = SearchService::new(store.clone(), provider, cache);

    let request = SearchRequest {
        query: query.to_string(),
        limit,
    };
    let limits = SearchLimits::default();

    if store.get_source(source).await?.is_some() {
        service.search(source, &request, &limits).await
    } else if store.is_group(source).await? {
        service.search_group(source, &request, &limits).await
    } else {
        Err(Error::SourceNotFound(source.to_string()))
    }
}
