use clap::Parser;
use miette::{IntoDiagnostic, Result};
use payflow::application::engine::PaymentEngine;
use payflow::config::Settings;
use payflow::domain::ports::PaymentStoreRef;
use payflow::infrastructure::in_memory::InMemoryStore;
use payflow::infrastructure::providers::factory::registry_from_settings;
use payflow::interfaces::csv::balance_writer::BalanceWriter;
use payflow::interfaces::csv::command_reader::CommandReader;
use payflow::interfaces::csv::command_runner::CommandRunner;
use std::fs::File;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Input payment commands CSV file
    input: PathBuf,

    #[command(flatten)]
    settings: Settings,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let settings = cli.settings;

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&settings.log_level))
        .into_diagnostic()?;
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();

    let store = open_store(&settings)?;
    let providers = registry_from_settings(&settings)?;
    let engine = PaymentEngine::new(store, providers, settings.engine_config())?;

    let file = File::open(cli.input).into_diagnostic()?;
    let reader = CommandReader::new(file);
    let mut runner = CommandRunner::new(&engine);
    for command in reader.commands() {
        match command {
            Ok(command) => {
                if let Err(e) = runner.execute(command).await {
                    eprintln!("Error processing command: {}", e);
                }
            }
            Err(e) => {
                eprintln!("Error reading command: {}", e);
            }
        }
    }

    let mut balances = Vec::new();
    for merchant in runner.merchants() {
        balances.extend(engine.merchant_balances(merchant).await?);
    }

    let stdout = io::stdout();
    let mut writer = BalanceWriter::new(stdout.lock());
    writer.write_balances(&balances)?;

    Ok(())
}

#[cfg(feature = "storage-rocksdb")]
fn open_store(settings: &Settings) -> Result<PaymentStoreRef> {
    use payflow::infrastructure::rocksdb::RocksDBStore;

    match &settings.db_path {
        Some(db_path) => Ok(Arc::new(RocksDBStore::open(db_path)?)),
        None => Ok(Arc::new(InMemoryStore::new())),
    }
}

#[cfg(not(feature = "storage-rocksdb"))]
fn open_store(settings: &Settings) -> Result<PaymentStoreRef> {
    if settings.db_path.is_some() {
        eprintln!(
            "WARNING: Persistent storage requested via --db-path, but 'storage-rocksdb' feature is not enabled. Falling back to In-Memory storage."
        );
    }
    Ok(Arc::new(InMemoryStore::new()))
}
