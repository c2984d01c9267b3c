use anyhow::{Context, Result};
use clap::Parser;
use graphrefine::db::Db;
use graphrefine::embeddings::OpenAIEmbedder;
use graphrefine::graph::{GraphStore, NodeTypes};
use graphrefine::ingest::Extractor;
use graphrefine::llm::{openai_factory, OpenAICompletionClient};
use graphrefine::refine::{Evaluator, Fixer, RefinementLoop, Termination};
use graphrefine::residual::ResidualAnalyzer;
use graphrefine::Config;
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser, Debug)]
#[command(name = "graphrefine")]
#[command(about = "Extract a knowledge graph from a document, refine it, and measure what it still misses")]
struct Args {
    /// Source document (defaults to graphrefine.source_file)
    #[arg(short, long)]
    source: Option<PathBuf>,

    /// Refine an existing snapshot instead of extracting a new initial graph
    #[arg(long)]
    from_snapshot: Option<String>,

    /// Skip the residual coverage analysis of the final snapshot
    #[arg(long)]
    skip_residual: bool,

    /// Directory for per-granularity CSV coverage reports
    #[arg(long)]
    report_dir: Option<PathBuf>,

    /// Print the refinement outcome as JSON
    #[arg(long)]
    json: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().filter_or("RUST_LOG", "info")).init();

    let args = Args::parse();
    log::info!("Starting graphrefine v{}", env!("CARGO_PKG_VERSION"));

    let config = Config::load()?;
    let source_path = args.source.unwrap_or_else(|| config.source_file().to_path_buf());
    let source = std::fs::read_to_string(&source_path)
        .with_context(|| format!("Source file not found or unreadable: {}", source_path.display()))?;
    log::info!("Source: {} ({} chars)", source_path.display(), source.chars().count());

    let store = GraphStore::open(Db::new(config.db_path())).await?;
    log::info!("Graph store: {}", config.db_path().display());

    let completion_key = Config::api_key(&config.completion.api_key_env)?;
    let factory = openai_factory(config.completion.clone(), completion_key.clone());
    let extractor = Extractor::new(factory, &config.completion, &config.extraction);
    let client = Arc::new(OpenAICompletionClient::from_config(&config.completion, completion_key)?);
    let evaluator = Evaluator::new(client.clone(), &config.completion);
    let fixer = Fixer::new(
        client,
        &config.completion,
        NodeTypes::new(config.extraction.node_types.clone()),
    );

    let refinement = RefinementLoop::new(
        store.clone(),
        extractor,
        evaluator,
        fixer,
        config.refinement.clone(),
    );
    let outcome = match &args.from_snapshot {
        Some(start) => refinement.run_from_snapshot(&source, start).await?,
        None => refinement.run(&source).await?,
    };

    match &outcome.termination {
        Termination::Converged => log::info!("Converged after {} iteration(s)", outcome.iterations.len()),
        Termination::BudgetExhausted => log::warn!(
            "Iteration budget exhausted after {} apply cycle(s)",
            outcome.apply_cycles()
        ),
        Termination::EvaluatorFailed(e) => log::error!("Evaluator failed: {}", e),
        Termination::FixerFailed(e) => log::error!("Fixer failed: {}", e),
    }
    log::info!("Final snapshot: {}", outcome.final_snapshot);

    if args.json {
        println!("{}", serde_json::to_string_pretty(&outcome)?);
    }

    if args.skip_residual {
        return Ok(());
    }

    let embeddings_key = Config::api_key(&config.embeddings.api_key_env)?;
    let embedder = Arc::new(OpenAIEmbedder::from_config(&config.embeddings, embeddings_key)?);
    let analyzer = ResidualAnalyzer::new(embedder, config.residual.clone());
    let reports = analyzer
        .analyze_all(&store, &outcome.final_snapshot, &source)
        .await?;

    if let Some(dir) = &args.report_dir {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("Cannot create report directory {}", dir.display()))?;
    }
    for report in &reports {
        report.log_summary();
        for gap in report.worst_gaps(3) {
            log::info!("  uncovered ({:.2}): {}", gap.similarity, gap.unit);
        }
        if let Some(dir) = &args.report_dir {
            let path = dir.join(format!("{}_{}_residual.csv", outcome.final_snapshot, report.granularity));
            report.write_csv(&path)?;
            log::info!("Wrote {}", path.display());
        }
    }

    Ok(())
}
