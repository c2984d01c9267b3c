use anyhow::Result;
use clap::{Parser, Subcommand};
use graphrefine::db::Db;
use graphrefine::embeddings::{embed_snapshot, OpenAIEmbedder};
use graphrefine::graph::GraphStore;
use graphrefine::Config;

#[derive(Parser, Debug)]
#[command(name = "snapshots")]
#[command(about = "Inspect and manage named graph snapshots")]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List snapshots with node and relationship counts
    List,
    /// Print a snapshot as JSON
    Show { name: String },
    /// Replace TARGET with a deep copy of SOURCE
    Copy { source: String, target: String },
    /// Delete a snapshot and everything in it
    Discard { name: String },
    /// Store an embedding on every node and relationship that lacks one
    Embed {
        name: String,
        /// Texts per embeddings request (defaults to embeddings.backfill_batch_size)
        #[arg(short, long)]
        batch_size: Option<usize>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().filter_or("RUST_LOG", "info")).init();

    let args = Args::parse();
    let config = Config::load()?;
    let store = GraphStore::open(Db::new(config.db_path())).await?;

    match args.command {
        Command::List => {
            let snapshots = store.list_snapshots().await?;
            println!("=== Graph snapshots ({}) ===", snapshots.len());
            for s in snapshots {
                println!(
                    "{:<20} nodes={:<6} relationships={:<6} created={} {}",
                    s.name,
                    s.node_count,
                    s.edge_count,
                    s.created_at,
                    s.copied_from
                        .map(|from| format!("(copied from {})", from))
                        .unwrap_or_default()
                );
            }
        }
        Command::Show { name } => {
            let graph = store.read(&name).await?;
            println!("{}", serde_json::to_string_pretty(&graph)?);
        }
        Command::Copy { source, target } => {
            let report = store.copy(&source, &target).await?;
            println!(
                "Copied {} -> {}: {} written, {} dropped",
                source,
                target,
                report.written(),
                report.dropped
            );
        }
        Command::Discard { name } => {
            if store.discard(&name).await? {
                println!("Discarded {}", name);
            } else {
                println!("No snapshot named {}", name);
            }
        }
        Command::Embed { name, batch_size } => {
            let api_key = Config::api_key(&config.embeddings.api_key_env)?;
            let embedder = OpenAIEmbedder::from_config(&config.embeddings, api_key)?;
            let batch_size = batch_size.unwrap_or(config.embeddings.backfill_batch_size);
            let report = embed_snapshot(&store, &name, &embedder, batch_size).await?;
            println!(
                "Embedded {}: {} nodes, {} relationships ({} already embedded, {} without text, {} failed batches)",
                name,
                report.nodes_embedded,
                report.relationships_embedded,
                report.nodes_skipped + report.relationships_skipped,
                report.without_text,
                report.failed_batches
            );
        }
    }

    Ok(())
}
