use clap::{Parser, Subcommand};
use miette::{IntoDiagnostic, Result};
use payment_reconciler::application::executors::LedgerServices;
use payment_reconciler::application::engine::PaymentEngine;
use payment_reconciler::application::webhook_router::WebhookRouter;
use payment_reconciler::domain::config::GatewayConfig;
use payment_reconciler::domain::ports::LedgerStoreRef;
use payment_reconciler::domain::transaction::PaymentTransaction;
use payment_reconciler::infrastructure::in_memory::{
    InMemoryConfigProvider, InMemoryJobQueue, InMemoryJobTracker, InMemoryLedger,
};
use payment_reconciler::infrastructure::notifier::LoggingNotifier;
use payment_reconciler::infrastructure::offline::OfflineGateway;
use payment_reconciler::interfaces::csv::ledger_writer::LedgerWriter;
use payment_reconciler::interfaces::json::event_reader::EventReader;
use payment_reconciler::interfaces::json::snapshot;
use payment_reconciler::settings::Settings;
use payment_reconciler::telemetry;
use std::collections::BTreeSet;
use std::fs::File;
use std::io::{self, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(flatten)]
    settings: Settings,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Feed a JSON Lines file of trusted gateway events through the webhook
    /// router and print the resulting ledger as CSV
    Replay {
        /// Input events file, one JSON event per line
        events: PathBuf,

        /// Ledger snapshot (JSON array of transactions) to start from
        #[arg(long)]
        ledger: Option<PathBuf>,

        /// Gateway configurations (JSON array). Defaults to one default
        /// configuration per payment method found in the ledger.
        #[arg(long)]
        configs: Option<PathBuf>,

        /// Path to persistent database (optional). If provided, uses RocksDB.
        #[arg(long)]
        db_path: Option<PathBuf>,
    },

    /// Run the discovery phase of the re-authorization job and print the
    /// chunk messages it would enqueue
    PlanReauthorization {
        /// Ledger snapshot (JSON array of transactions)
        #[arg(long)]
        ledger: PathBuf,

        /// Gateway configurations (JSON array). Defaults to re-authorization
        /// enabled for every payment method found in the ledger.
        #[arg(long)]
        configs: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    telemetry::init();
    let cli = Cli::parse();

    match cli.command {
        Command::Replay {
            events,
            ledger,
            configs,
            db_path,
        } => replay(&cli.settings, &events, ledger, configs, db_path).await,
        Command::PlanReauthorization { ledger, configs } => {
            plan_reauthorization(&cli.settings, &ledger, configs).await
        }
    }
}

async fn replay(
    settings: &Settings,
    events: &Path,
    ledger: Option<PathBuf>,
    configs: Option<PathBuf>,
    db_path: Option<PathBuf>,
) -> Result<()> {
    let seed = match ledger {
        Some(path) => snapshot::read_ledger(open(&path)?).into_diagnostic()?,
        None => Vec::new(),
    };
    let store = open_ledger(db_path, seed).await?;
    let existing = store.all().await.into_diagnostic()?;
    let configs = load_configs(configs, &existing, |payment_method| {
        GatewayConfig::new(payment_method)
    })?;

    let services = LedgerServices::new(store.clone(), Arc::new(settings.converter()));
    let configs = Arc::new(InMemoryConfigProvider::new(configs));
    let router = WebhookRouter::standard(services, configs);

    let reader = EventReader::new(BufReader::new(open(events)?));
    for (line, event) in reader.events() {
        match event {
            Ok(event) => {
                let event_id = event.id.clone();
                let outcome = router.handle(event).await;
                info!(line, %event_id, status = %outcome.status, "event replayed");
            }
            Err(err) => warn!(line, error = %err, "skipping malformed event"),
        }
    }

    let stdout = io::stdout();
    let mut writer = LedgerWriter::new(stdout.lock());
    writer
        .write_ledger(store.all().await.into_diagnostic()?)
        .into_diagnostic()?;
    Ok(())
}

async fn plan_reauthorization(
    settings: &Settings,
    ledger: &Path,
    configs: Option<PathBuf>,
) -> Result<()> {
    let seed = snapshot::read_ledger(open(ledger)?).into_diagnostic()?;
    let configs = load_configs(configs, &seed, |payment_method| {
        GatewayConfig::new(payment_method).with_reauthorization(Vec::new())
    })?;

    let engine = PaymentEngine::new(
        Arc::new(InMemoryLedger::with_transactions(seed)),
        Arc::new(OfflineGateway),
        Arc::new(InMemoryConfigProvider::new(configs)),
        Arc::new(settings.converter()),
    );
    let queue = InMemoryJobQueue::new();
    let job = engine.reauthorization(
        Arc::new(InMemoryJobTracker::new()),
        Arc::new(queue.clone()),
        Arc::new(LoggingNotifier),
        settings.reauthorization().into_diagnostic()?,
    );
    job.init().await.into_diagnostic()?;

    let stdout = io::stdout();
    let mut out = stdout.lock();
    for message in queue.drain().await {
        let line = serde_json::to_string(&message).into_diagnostic()?;
        writeln!(out, "{line}").into_diagnostic()?;
    }
    Ok(())
}

fn open(path: &Path) -> Result<File> {
    File::open(path).into_diagnostic()
}

fn load_configs(
    path: Option<PathBuf>,
    ledger: &[PaymentTransaction],
    default: impl Fn(String) -> GatewayConfig,
) -> Result<Vec<GatewayConfig>> {
    match path {
        Some(path) => snapshot::read_configs(open(&path)?).into_diagnostic(),
        None => {
            let methods: BTreeSet<String> =
                ledger.iter().map(|tx| tx.payment_method.clone()).collect();
            Ok(methods.into_iter().map(default).collect())
        }
    }
}

async fn open_ledger(
    db_path: Option<PathBuf>,
    seed: Vec<PaymentTransaction>,
) -> Result<LedgerStoreRef> {
    if let Some(db_path) = db_path {
        #[cfg(feature = "storage-rocksdb")]
        {
            use payment_reconciler::domain::ports::LedgerStore;
            use payment_reconciler::infrastructure::rocksdb::RocksDbLedger;

            let store = RocksDbLedger::open(db_path).into_diagnostic()?;
            for tx in seed {
                store.save(tx).await.into_diagnostic()?;
            }
            return Ok(Arc::new(store));
        }

        #[cfg(not(feature = "storage-rocksdb"))]
        warn!(
            path = %db_path.display(),
            "persistent storage requested via --db-path, but the 'storage-rocksdb' feature is \
             not enabled; falling back to in-memory storage"
        );
    }

    Ok(Arc::new(InMemoryLedger::with_transactions(seed)))
}
