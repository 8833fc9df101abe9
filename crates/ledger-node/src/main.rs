use std::{
    net::SocketAddr,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    thread,
    time::Duration,
};

use anyhow::Context;
use clap::{Parser, Subcommand};
use ledger_node::{
    config::{NodeConfig, RunArgs, SimulateArgs},
    generator::TransactionGenerator,
    server, HttpMessenger, LocalNetwork, Node,
};
use ledger_storage::SledStore;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "ledger-node", version, about = "Proof-of-work ledger node")]
struct Cli {
    #[command(subcommand)]
    cmd: Cmd,
}

#[derive(Subcommand, Debug)]
enum Cmd {
    /// Run a single node behind the HTTP message endpoint
    Run(RunArgs),
    /// Run a whole network in this process over in-memory channels
    Simulate(SimulateArgs),
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    match Cli::parse().cmd {
        Cmd::Run(args) => run(args).await,
        Cmd::Simulate(args) => tokio::task::spawn_blocking(move || simulate(args)).await?,
    }
}

async fn run(args: RunArgs) -> anyhow::Result<()> {
    let addr: SocketAddr = args.listen.parse().context("parse --listen")?;
    let store = Arc::new(SledStore::open(args.data_dir.join(&args.id))?);
    let messenger = Arc::new(HttpMessenger::new(tokio::runtime::Handle::current()));
    let node = Node::open(args.node_config(), store, &args.chain.genesis(), messenger)?;
    let miner = node.spawn_miner()?;

    server::serve(node.clone(), addr, async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "ctrl-c handler failed");
        }
    })
    .await?;

    info!("shutting down");
    node.stop();
    if tokio::task::spawn_blocking(move || miner.join()).await?.is_err() {
        warn!("miner thread panicked");
    }
    node.close()?;
    Ok(())
}

fn simulate(args: SimulateArgs) -> anyhow::Result<()> {
    let network = Arc::new(LocalNetwork::new());
    let ids: Vec<String> = (0..args.nodes).map(|i| format!("node{i}")).collect();
    let genesis = args.chain.genesis();

    let mut nodes = Vec::with_capacity(ids.len());
    let mut threads = Vec::new();
    for id in &ids {
        let store = Arc::new(SledStore::open(args.data_dir.join(id))?);
        let config = NodeConfig {
            id: id.clone(),
            peers: ids.iter().filter(|p| *p != id).cloned().collect(),
            mining: args.chain.mining(),
        };
        let node = Node::open(config, store, &genesis, network.clone())?;
        threads.push(node.spawn_listener(network.register(id))?);
        threads.push(node.spawn_miner()?);
        nodes.push(node);
    }

    let stop = Arc::new(AtomicBool::new(false));
    let generator = {
        let mut generator = TransactionGenerator::new(args.chain.accounts.clone(), args.seed)?;
        let network = network.clone();
        let stop = stop.clone();
        let ids = ids.clone();
        let interval = Duration::from_millis(args.tx_interval_ms);
        thread::Builder::new()
            .name("generator".into())
            .spawn(move || generator.run(network.as_ref(), &ids, interval, &stop))?
    };

    info!(nodes = ids.len(), seconds = args.seconds, "simulation running");
    thread::sleep(Duration::from_secs(args.seconds));

    stop.store(true, Ordering::SeqCst);
    if generator.join().is_err() {
        warn!("generator thread panicked");
    }
    for node in &nodes {
        node.stop();
    }
    network.shutdown();
    for handle in threads {
        if handle.join().is_err() {
            warn!("node thread panicked");
        }
    }

    for node in &nodes {
        let status = node.status();
        info!(
            node = %status.id,
            height = status.height,
            tip = %hex::encode(status.tip_hash),
            supply = %status.total_supply,
            pending = status.pending,
            "final state"
        );
        println!("{}", node.render_chain());
        node.close()?;
    }
    Ok(())
}
