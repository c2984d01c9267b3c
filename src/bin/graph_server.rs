use anyhow::Result;
use clap::Parser;
use graphrefine::db::Db;
use graphrefine::graph::GraphStore;
use graphrefine::service::GraphServer;
use graphrefine::Config;

#[derive(Parser, Debug)]
#[command(name = "graph-server")]
#[command(about = "Serve the graph write endpoint (POST /add) backed by the local graph store")]
struct Args {
    /// Port to listen on (defaults to graph_service.port)
    #[arg(short, long)]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().filter_or("RUST_LOG", "info")).init();

    let args = Args::parse();
    log::info!("Starting graph-server v{}", env!("CARGO_PKG_VERSION"));

    let config = Config::load()?;
    let mut service = config.graph_service.clone();
    if let Some(port) = args.port {
        service.port = port;
    }

    let store = GraphStore::open(Db::new(config.db_path())).await?;
    log::info!("Graph store initialized at {}", config.db_path().display());

    GraphServer::new(store, &service).run().await?;
    Ok(())
}
