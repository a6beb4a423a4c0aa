use anyhow::Context;
use clap::Parser;

use stockbook_audit::Args;
use stockbook_events::InMemoryEventBus;
use stockbook_infra::{AlertEnvelope, PostgresStore, ReconciliationCoordinator, Settings};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    stockbook_observability::init();

    let settings = Settings::load().context("failed to load configuration")?;
    let thresholds = settings
        .inventory
        .thresholds()
        .context("invalid stock thresholds")?;

    let store = PostgresStore::connect(&settings.database, &settings.transactions)
        .await
        .context("failed to connect to the database")?;
    if args.migrate {
        store.migrate().await.context("failed to apply migrations")?;
    }

    let coordinator = ReconciliationCoordinator::new(
        store,
        InMemoryEventBus::<AlertEnvelope>::new(),
        thresholds,
    );
    let report = stockbook_audit::run(&coordinator)
        .await
        .context("stock ledger audit failed")?;

    println!("{}", serde_json::to_string_pretty(&report)?);

    if !report.is_clean() {
        std::process::exit(1);
    }
    Ok(())
}
