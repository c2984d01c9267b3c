use anyhow::{Context, Result};
use clap::Parser;
use graphrefine::db::Db;
use graphrefine::graph::GraphStore;
use graphrefine::ingest::{chunk_document, forward_extractions, Extractor};
use graphrefine::llm::openai_factory;
use graphrefine::service::{GraphServiceClient, GraphSink, StoreSink};
use graphrefine::Config;
use std::path::PathBuf;
use std::time::{Duration, Instant};

#[derive(Parser, Debug)]
#[command(name = "extract")]
#[command(about = "Chunk a document, extract a graph from every chunk in parallel, and send it to the graph write service")]
struct Args {
    /// Source document (defaults to graphrefine.source_file)
    #[arg(short, long)]
    source: Option<PathBuf>,

    /// Target snapshot (defaults to graph_service.database)
    #[arg(short, long)]
    database: Option<String>,

    /// Write straight into the local graph store instead of POSTing to the service
    #[arg(long)]
    direct: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().filter_or("RUST_LOG", "info")).init();

    let args = Args::parse();
    let config = Config::load()?;

    let source_path = args.source.unwrap_or_else(|| config.source_file().to_path_buf());
    let text = std::fs::read_to_string(&source_path)
        .with_context(|| format!("Source file not found or unreadable: {}", source_path.display()))?;

    let chunks = chunk_document(&text, &config.extraction);
    log::info!(
        "{}: {} chunks (size {}, overlap {}), {} workers",
        source_path.display(),
        chunks.len(),
        config.extraction.chunk_size,
        config.extraction.chunk_overlap,
        config.extraction.max_workers.min(chunks.len().max(1))
    );
    if chunks.is_empty() {
        log::warn!("Nothing to extract");
        return Ok(());
    }

    let api_key = Config::api_key(&config.completion.api_key_env)?;
    let factory = openai_factory(config.completion.clone(), api_key);
    let extractor = Extractor::new(factory, &config.completion, &config.extraction);

    let start = Instant::now();
    let extractions = extractor.extract_chunks(chunks).await;
    log::info!("Extraction finished in {:.1}s", start.elapsed().as_secs_f64());

    let sink: Box<dyn GraphSink> = if args.direct {
        let store = GraphStore::open(Db::new(config.db_path())).await?;
        log::info!("Writing directly to {}", config.db_path().display());
        Box::new(StoreSink::new(store, config.graph_service.database.clone()))
    } else {
        log::info!("Posting to {}", config.graph_service.url);
        Box::new(GraphServiceClient::new(
            config.graph_service.url.clone(),
            Duration::from_secs(config.completion.timeout_secs),
        )?)
    };

    let report = forward_extractions(sink.as_ref(), extractions, args.database.as_deref()).await;

    log::info!("=== Extraction summary ===");
    log::info!("Chunks:                 {}", report.chunks);
    log::info!("Extraction failures:    {}", report.extraction_failures);
    log::info!("Write failures:         {}", report.write_failures);
    log::info!("Nodes written:          {}", report.nodes_written);
    log::info!("Relationships written:  {}", report.relationships_written);
    log::info!("Relationships dropped:  {}", report.relationships_dropped);

    Ok(())
}
