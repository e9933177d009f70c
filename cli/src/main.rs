//! sigmaindex CLI — run and inspect the Sigma ledger indexer.
//!
//! Usage:
//! ```bash
//! sigmaindex demo
//! sigmaindex replay blocks.json --config indexer.json --address TXo1... --property 3
//! sigmaindex info
//! ```

mod demo;
mod replay;

use std::env;
use std::process;

use sigmaindex_core::indexer::IndexerConfig;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let args: Vec<String> = env::args().collect();
    if args.len() < 2 {
        print_usage();
        process::exit(1);
    }

    let result = match args[1].as_str() {
        "info" => {
            cmd_info();
            Ok(())
        }
        "demo" => cmd_demo().await,
        "replay" => replay::run(&args[2..]).await,
        "version" | "--version" | "-V" => {
            println!("sigmaindex {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
        "help" | "--help" | "-h" => {
            print_usage();
            Ok(())
        }
        other => {
            eprintln!("Unknown command: {other}");
            print_usage();
            process::exit(1);
        }
    };

    if let Err(e) = result {
        eprintln!("Error: {e:#}");
        process::exit(1);
    }
}

fn print_usage() {
    println!("sigmaindex {}", env!("CARGO_PKG_VERSION"));
    println!("Reorg-safe ledger of Sigma mints and spends\n");
    println!("USAGE:");
    println!("    sigmaindex <COMMAND>\n");
    println!("COMMANDS:");
    println!("    info     Show default indexer configuration");
    println!("    demo     Run a mint/spend/reorg scenario on a simulated node");
    println!("    replay   Index blocks from a JSON file");
    println!("    version  Print version");
    println!("    help     Print this help\n");
    println!("REPLAY FLAGS:");
    println!("    <blocks.json>        JSON array of blocks, in delivery order  [required]");
    println!("    --config <FILE>      JSON indexer config");
    println!("    --address <ADDR>     Report this address's balance");
    println!("    --property <ID>      Property for --address  [default: 3]");
}

fn cmd_info() {
    let config = IndexerConfig::default();
    println!("SigmaIndex v{}", env!("CARGO_PKG_VERSION"));
    println!("  Default retained history: {} blocks", config.max_reorg_depth);
    println!("  Default group capacity: {} mints", config.group_capacity);
    println!("  Default checkpoint interval: every {} blocks", config.checkpoint_interval);
    println!("  Storage backends: memory, SQLite (feature: sqlite)");
    println!("  Operations: issuance, create denomination, simple mint, simple spend");
}

async fn cmd_demo() -> anyhow::Result<()> {
    let stages = demo::run().await?;
    println!("{}", serde_json::to_string_pretty(&stages)?);
    Ok(())
}

/// Value following `flag` in `args`.
pub(crate) fn parse_flag(args: &[String], flag: &str) -> Option<String> {
    args.iter()
        .position(|a| a == flag)
        .and_then(|i| args.get(i + 1))
        .cloned()
}
