use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use ledger_core::{Amount, Snapshot, Transaction};
use serde::Deserialize;
use tracing::debug;
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Parser, Debug)]
#[command(name = "ledger-cli")]
#[command(about = "CLI client for a proof-of-work ledger node")]
struct Cli {
    /// Node base URL (e.g. http://127.0.0.1:8080)
    #[arg(long, global = true, default_value = "http://127.0.0.1:8080")]
    node: String,

    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Submit a transfer to the node's pending queue
    Submit {
        /// Sender
        #[arg(long)]
        from: String,
        /// Recipient
        #[arg(long)]
        to: String,
        /// Amount, e.g. 5 or 0.25
        #[arg(long)]
        amount: Amount,
    },
    /// Show the node's chain tip
    Head,
    /// Show the latest balances
    Balances,
}

#[derive(Deserialize)]
struct Head {
    height: u64,
    hash: String,
    pending: usize,
}

#[tokio::main]
async fn main() -> Result<()> {
    fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .pretty()
        .init();

    let cli = Cli::parse();
    let base = cli.node.trim_end_matches('/');
    let client = reqwest::Client::new();
    match cli.cmd {
        Command::Submit { from, to, amount } => {
            let tx = Transaction::new(from, to, amount);
            let message = serde_json::json!({
                "kind": "Transaction",
                "contents": tx.to_json(),
            });
            debug!(%tx, "submitting");
            let res = client
                .post(format!("{base}/message"))
                .json(&message)
                .send()
                .await
                .with_context(|| format!("reach {base}"))?;
            println!("status: {}", res.status());
            println!("id: {}", hex::encode(tx.id()));
        }
        Command::Head => {
            let head: Head = client
                .get(format!("{base}/chain/head"))
                .send()
                .await?
                .error_for_status()?
                .json()
                .await?;
            println!("height:  {}", head.height);
            println!("hash:    {}", head.hash);
            println!("pending: {}", head.pending);
        }
        Command::Balances => {
            let balances: Snapshot = client
                .get(format!("{base}/balances"))
                .send()
                .await?
                .error_for_status()?
                .json()
                .await?;
            for (account, amount) in &balances {
                println!("{account:<12} {:>10}", amount.to_string());
            }
            let total: Amount = balances.values().copied().sum();
            println!("{:<12} {:>10}", "total", total.to_string());
        }
    }
    Ok(())
}
