use anyhow::{Context, Result};
use clap::Parser;
use graphrefine::db::Db;
use graphrefine::embeddings::OpenAIEmbedder;
use graphrefine::graph::GraphStore;
use graphrefine::residual::{Granularity, ResidualAnalyzer};
use graphrefine::Config;
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser, Debug)]
#[command(name = "residual")]
#[command(about = "Measure how much of the source text a graph snapshot does not cover")]
struct Args {
    /// Snapshot to analyze
    snapshot: String,

    /// Granularity; all three when omitted
    #[arg(short, long, value_enum)]
    level: Option<Granularity>,

    /// Source document (defaults to graphrefine.source_file)
    #[arg(short, long)]
    source: Option<PathBuf>,

    /// Write a CSV per granularity into this directory
    #[arg(long)]
    csv_dir: Option<PathBuf>,

    /// Print the reports as JSON
    #[arg(long)]
    json: bool,

    /// Number of worst uncovered units to list
    #[arg(short, long, default_value = "20")]
    top: usize,
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().filter_or("RUST_LOG", "info")).init();

    let args = Args::parse();
    let config = Config::load()?;

    let source_path = args.source.unwrap_or_else(|| config.source_file().to_path_buf());
    let text = std::fs::read_to_string(&source_path)
        .with_context(|| format!("Source file not found or unreadable: {}", source_path.display()))?;

    let store = GraphStore::open(Db::new(config.db_path())).await?;
    let api_key = Config::api_key(&config.embeddings.api_key_env)?;
    let embedder = Arc::new(OpenAIEmbedder::from_config(&config.embeddings, api_key)?);
    let analyzer = ResidualAnalyzer::new(embedder, config.residual.clone());

    let reports = match args.level {
        Some(level) => vec![analyzer.analyze(&store, &args.snapshot, &text, level).await?],
        None => analyzer.analyze_all(&store, &args.snapshot, &text).await?,
    };

    for report in &reports {
        report.log_summary();
        for gap in report.worst_gaps(args.top) {
            log::info!("  uncovered ({:.2}): {}", gap.similarity, gap.unit);
        }
        if let Some(dir) = &args.csv_dir {
            std::fs::create_dir_all(dir)?;
            let path = dir.join(format!("{}_{}_residual.csv", args.snapshot, report.granularity));
            report.write_csv(&path)?;
            log::info!("Wrote {}", path.display());
        }
    }

    if args.json {
        println!("{}", serde_json::to_string_pretty(&reports)?);
    }

    Ok(())
}
