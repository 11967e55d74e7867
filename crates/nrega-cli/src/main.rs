use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use nrega_store::PgPerformanceStore;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "nrega-cli")]
#[command(about = "NREGA district performance dashboard CLI")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Run the ingestion pipeline once: fetch, clean, load.
    Ingest,
    /// Apply the embedded database migrations.
    Migrate,
    /// Serve the query API.
    Serve,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();

    match cli.command.unwrap_or(Commands::Ingest) {
        Commands::Ingest => {
            let summary = nrega_etl::run_ingest_once_from_env().await?;
            println!(
                "ingest complete: run_id={} fetched={} rejected={} inserted={} skipped={}",
                summary.run_id, summary.fetched, summary.rejected, summary.inserted, summary.skipped
            );
        }
        Commands::Migrate => {
            let database_url = std::env::var("DATABASE_URL").context("DATABASE_URL must be set")?;
            let store = PgPerformanceStore::connect(&database_url).await?;
            store.migrate().await?;
            println!("migrations applied");
        }
        Commands::Serve => {
            nrega_web::serve_from_env().await?;
        }
    }

    Ok(())
}
