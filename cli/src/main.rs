//! chainingest: run one configured chain module from the command line.
//!
//! ```text
//! chainingest [--config chainingest.toml] [--module <name>] <COMMAND>
//!
//! chainingest modules
//! chainingest latest
//! chainingest block 17000000 [--events out.tsv] [--currencies currencies.tsv]
//! chainingest block -1                      # mempool
//! chainingest range --from 100 --to 200
//! chainingest monitor [--from N] [--to N] [--poll-ms 2000]
//! chainingest balance <address>... [--currency <id>]
//! chainingest supply [--currency <id>]
//! chainingest resolve <handle>
//! chainingest tx <hash>
//! chainingest address <address>
//! chainingest broadcast <raw-hex>
//! ```
//!
//! Any module setting can be overridden from the environment with
//! `CHAININGEST_MODULE_<NAME>_<FIELD>`, e.g. `CHAININGEST_MODULE_ETHEREUM_MAIN_NODES`.

mod config;
mod logging;

use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};

use chainingest_core::{
    BlockDecoder, BlockId, BlockProcessor, BlockSink, ConfigOverrides, HttpTransport, Monitor,
    MonitorConfig, RangeDriver, TsvSink,
};
use chainingest_evm::{Erc20Module, EvmModule};
use chainingest_http::{HttpClientConfig, ReqwestTransport};

use crate::config::{DecoderKind, EngineConfig};

#[derive(Parser)]
#[command(
    name = "chainingest",
    about = "Pull blocks from chain nodes and export them as normalized ledger events",
    version
)]
struct Cli {
    /// Path to the TOML config file
    #[arg(short, long, global = true, default_value = "chainingest.toml")]
    config: PathBuf,

    /// Module to run; optional when the config defines only one
    #[arg(short, long, global = true)]
    module: Option<String>,

    /// Log at debug level regardless of the config file
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List the modules defined in the config file
    Modules,

    /// Print the height of the chain tip
    Latest,

    /// Process one block (-1 for the mempool) and print its events
    Block {
        #[arg(allow_hyphen_values = true)]
        height: i64,
        #[command(flatten)]
        output: Output,
    },

    /// Process an inclusive height range
    Range {
        #[arg(long)]
        from: u64,
        #[arg(long)]
        to: u64,
        #[command(flatten)]
        output: Output,
    },

    /// Follow the chain tip until interrupted
    Monitor {
        /// First height (default: current tip)
        #[arg(long)]
        from: Option<u64>,
        /// Last height (default: run forever)
        #[arg(long)]
        to: Option<u64>,
        /// Sleep between tip polls once caught up
        #[arg(long, default_value_t = 2_000)]
        poll_ms: u64,
        #[command(flatten)]
        output: Output,
    },

    /// Print balances of one or more addresses
    Balance {
        #[arg(required = true)]
        addresses: Vec<String>,
        #[arg(long)]
        currency: Option<String>,
    },

    /// Print the total supply of a currency
    Supply {
        #[arg(long)]
        currency: Option<String>,
    },

    /// Resolve a human-readable handle (e.g. an ENS name) to an address
    Resolve { handle: String },

    /// Print chain-specific details of a transaction
    Tx { hash: String },

    /// Print chain-specific details of an address
    Address { address: String },

    /// Submit a signed raw transaction and print its hash
    Broadcast { raw: String },
}

#[derive(Args)]
struct Output {
    /// Write event rows here instead of stdout
    #[arg(long)]
    events: Option<PathBuf>,
    /// Write currency rows here; dropped when not given
    #[arg(long)]
    currencies: Option<PathBuf>,
}

impl Output {
    fn open<D: BlockDecoder>(&self, processor: &BlockProcessor<D>) -> Result<TsvSink<Box<dyn Write + Send>>> {
        let policy = processor.export_policy()?.clone();
        let events = match &self.events {
            Some(path) => create(path)?,
            None => Box::new(std::io::stdout()),
        };
        let currencies = match &self.currencies {
            Some(path) => create(path)?,
            None => Box::new(std::io::sink()),
        };
        Ok(TsvSink::new(policy, events, currencies))
    }
}

fn create(path: &Path) -> Result<Box<dyn Write + Send>> {
    let file = std::fs::File::create(path).with_context(|| format!("create '{}'", path.display()))?;
    Ok(Box::new(BufWriter::new(file)))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = EngineConfig::load(&cli.config)?;

    let mut log = config.log.clone();
    if cli.verbose {
        log.level = "debug".into();
    }
    logging::init_tracing(&log);

    if let Command::Modules = cli.command {
        for entry in &config.modules {
            println!(
                "{}\t{:?}\t{} node(s)",
                entry.module.name,
                entry.decoder,
                entry.module.nodes.len()
            );
        }
        return Ok(());
    }

    let overrides = ConfigOverrides::from_env();
    if !overrides.is_empty() {
        tracing::debug!(count = overrides.len(), "environment overrides found");
    }
    let entry = config.module(cli.module.as_deref(), &overrides)?;

    let transport: Arc<dyn HttpTransport> = Arc::new(
        ReqwestTransport::new(HttpClientConfig::default()).context("build HTTP client")?,
    );

    match entry.decoder {
        DecoderKind::Evm => {
            let processor = BlockProcessor::new(entry.module, EvmModule::new(), transport)?;
            run(processor, cli.command).await
        }
        DecoderKind::Erc20 => {
            let processor = BlockProcessor::new(entry.module, Erc20Module::new(), transport)?;
            run(processor, cli.command).await
        }
    }
}

async fn run<D: BlockDecoder>(mut processor: BlockProcessor<D>, command: Command) -> Result<()> {
    processor.initialize().await?;

    match command {
        Command::Modules => {}

        Command::Latest => {
            println!("{}", processor.inquire_latest_block().await?);
        }

        Command::Block { height, output } => {
            let block = BlockId::from_i64(height)?;
            let processed = processor.process_block(block).await?;
            let mut sink = output.open(&processor)?;
            sink.accept(&processed).await?;
        }

        Command::Range { from, to, output } => {
            if from > to {
                bail!("--from {from} is above --to {to}");
            }
            let mut sink = output.open(&processor)?;
            let report = RangeDriver::new(&processor).run(from, to, &mut sink).await?;
            tracing::info!(
                processed = report.processed,
                events = report.events,
                skipped = report.skipped.len(),
                "range finished"
            );
            if !report.skipped.is_empty() {
                eprintln!("skipped heights: {:?}", report.skipped);
            }
        }

        Command::Monitor {
            from,
            to,
            poll_ms,
            output,
        } => {
            let mut sink = output.open(&processor)?;
            let monitor = Monitor::new(
                &processor,
                MonitorConfig {
                    start_at: from,
                    stop_at: to,
                    poll_interval_ms: poll_ms,
                },
            );
            tokio::select! {
                report = monitor.run(&mut sink) => {
                    let report = report?;
                    tracing::info!(
                        processed = report.processed,
                        retries = report.retries,
                        next = report.next,
                        "monitor finished"
                    );
                }
                _ = tokio::signal::ctrl_c() => {
                    tracing::info!("received Ctrl+C, stopping monitor");
                }
            }
        }

        Command::Balance {
            addresses,
            currency,
        } => {
            let balances = processor.balances(&addresses, currency.as_deref()).await?;
            for (address, balance) in addresses.iter().zip(balances) {
                println!("{address}\t{balance}");
            }
        }

        Command::Supply { currency } => {
            println!("{}", processor.currency_supply(currency.as_deref()).await?);
        }

        Command::Resolve { handle } => match processor.resolve_handle(&handle).await? {
            Some(address) => println!("{address}"),
            None => bail!("'{handle}' does not resolve to an address"),
        },

        Command::Tx { hash } => {
            let details = processor.transaction_specials(&hash).await?;
            println!("{}", serde_json::to_string_pretty(&details)?);
        }

        Command::Address { address } => {
            let details = processor.address_specials(&address).await?;
            println!("{}", serde_json::to_string_pretty(&details)?);
        }

        Command::Broadcast { raw } => {
            println!("{}", processor.broadcast_transaction(&raw).await?);
        }
    }
    Ok(())
}
