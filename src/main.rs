use clap::Parser;
use ledger_inbox::application::engine::MessageWorker;
use ledger_inbox::config::{RetryPolicy, WorkerConfig};
use ledger_inbox::domain::account::Account;
use ledger_inbox::domain::message::EventMessage;
use ledger_inbox::domain::ports::{AccountRegistryRef, LedgerStoreRef};
use ledger_inbox::infrastructure::in_memory::{InMemoryLedger, InMemoryReceiver};
use ledger_inbox::interfaces::csv::account_writer::AccountWriter;
use ledger_inbox::telemetry::{self, LogFormat};
use miette::{IntoDiagnostic, Result};
use rust_decimal::Decimal;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::info;
use uuid::Uuid;

const DEMO_ACCOUNT: Uuid = Uuid::from_u128(0x7d445724_24ec_4d52_aa7a_ff2bac9f191d);

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to persistent ledger database (optional). If provided, uses RocksDB.
    #[arg(long)]
    db_path: Option<PathBuf>,

    /// Stop once every message has been settled instead of waiting for Ctrl-C.
    #[arg(long)]
    drain: bool,

    /// Seconds to wait after finding the queue empty.
    #[arg(long, default_value_t = 10)]
    poll_interval_secs: u64,

    /// Reschedule delays for transient failures, by attempt.
    #[arg(long, value_delimiter = ',', default_values_t = [5, 25, 125])]
    retry_backoff_secs: Vec<u64>,

    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    telemetry::init(cli.log_format);

    let config = WorkerConfig {
        idle_poll_interval: Duration::from_secs(cli.poll_interval_secs),
        retry: RetryPolicy::from_secs(&cli.retry_backoff_secs).into_diagnostic()?,
        ..WorkerConfig::default()
    };
    config.validate().into_diagnostic()?;

    let (ledger, registry) = open_ledger(cli.db_path)?;

    if registry
        .open_account(Account::new(DEMO_ACCOUNT, Decimal::new(10000, 2)))
        .await
        .into_diagnostic()?
    {
        info!(account_id = %DEMO_ACCOUNT, "Seeded demo account");
    }

    let receiver = Arc::new(InMemoryReceiver::new());
    receiver.enqueue(sample_messages()).await;

    let worker = MessageWorker::new(receiver.clone(), ledger, config);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let handle = tokio::spawn(async move { worker.run(shutdown_rx).await });

    if cli.drain {
        while !receiver.is_drained().await {
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    } else {
        tokio::signal::ctrl_c().await.into_diagnostic()?;
        info!("Ctrl-C received, shutting down");
    }
    // Fails only if the worker already exited.
    let _ = shutdown_tx.send(true);
    handle.await.into_diagnostic()?;

    info!(
        completed = receiver.completed().await.len(),
        dead_lettered = receiver.dead_letters().await.len(),
        "Worker finished"
    );

    let accounts = registry.accounts().await.into_diagnostic()?;
    let stdout = io::stdout();
    let mut writer = AccountWriter::new(stdout.lock());
    writer.write_accounts(accounts).into_diagnostic()?;

    Ok(())
}

fn open_ledger(db_path: Option<PathBuf>) -> Result<(LedgerStoreRef, AccountRegistryRef)> {
    match db_path {
        #[cfg(feature = "storage-rocksdb")]
        Some(path) => {
            let ledger = ledger_inbox::infrastructure::rocksdb::RocksDbLedger::open(path)
                .into_diagnostic()?;
            let store: LedgerStoreRef = Arc::new(ledger.clone());
            let registry: AccountRegistryRef = Arc::new(ledger);
            Ok((store, registry))
        }
        #[cfg(not(feature = "storage-rocksdb"))]
        Some(_) => {
            tracing::warn!(
                "Persistent storage requested via --db-path, but 'storage-rocksdb' feature is not enabled. Falling back to in-memory storage."
            );
            Ok(in_memory_ledger())
        }
        None => Ok(in_memory_ledger()),
    }
}

fn in_memory_ledger() -> (LedgerStoreRef, AccountRegistryRef) {
    let ledger = InMemoryLedger::new();
    let store: LedgerStoreRef = Arc::new(ledger.clone());
    let registry: AccountRegistryRef = Arc::new(ledger);
    (store, registry)
}

fn sample_messages() -> Vec<EventMessage> {
    let body = |id: &str, kind: &str, account: &str, amount: &str| {
        EventMessage::new(format!(
            r#"{{"id":"{id}","messageType":"{kind}","bankAccountId":"{account}","amount":{amount}}}"#
        ))
    };
    let account = DEMO_ACCOUNT.to_string();

    vec![
        body("11111111-1111-1111-1111-111111111111", "Credit", &account, "50.00"),
        body("22222222-2222-2222-2222-222222222222", "Debit", &account, "20.00"),
        // Unknown type, dead-lettered.
        body("33333333-3333-3333-3333-333333333333", "Foo", &account, "10.00"),
        // No such account, dead-lettered.
        body(
            "44444444-4444-4444-4444-444444444444",
            "Credit",
            "aaaaaaaa-aaaa-aaaa-aaaa-aaaaaaaaaaaa",
            "15.00",
        ),
    ]
}
