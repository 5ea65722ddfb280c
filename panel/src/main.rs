use std::{fs, path::PathBuf, time::Duration};

use actix_cors::Cors;
use actix_web::{middleware::Logger, web, App, HttpServer};
use anyhow::Context;
use chrono::Utc;
use clap::{Parser, Subcommand};
use common::{db::PgStore, import, memory::MemoryStore, Repository, Store};
use panel::{
    config::Config,
    identity::{GoogleIdentity, IdentityProvider, MemoryIdentity},
    provisioning, routes, AppState,
};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[clap(author, version, about = "ISP billing back office", long_about = None)]
struct Cli {
    #[clap(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the HTTP service
    Serve {
        /// Keep everything in process instead of Postgres and the hosted
        /// identity service
        #[clap(long)]
        in_memory: bool,
    },

    /// Import customers from an xlsx workbook
    Import {
        #[clap(long)]
        file: PathBuf,
    },

    /// Write the customer import template
    Template {
        #[clap(long)]
        out: PathBuf,

        /// Include sample rows
        #[clap(long)]
        demo: bool,
    },

    /// Settle stale collector provisioning markers
    Reconcile {
        /// Repeat every SECS seconds instead of running once
        #[clap(long, value_name = "SECS")]
        every: Option<u64>,
    },
}

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = Config::from_env()?;

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    match cli.command {
        Commands::Serve { in_memory: true } => {
            warn!("Running with in-memory storage; nothing survives a restart");
            serve(&config, MemoryStore::new(), MemoryIdentity::new()).await?;
        }
        Commands::Serve { in_memory: false } => {
            let store = connect_store(&config).await?;
            let identity = google_identity(&config)?;
            serve(&config, store, identity).await?;
        }
        Commands::Import { file } => {
            let bytes = fs::read(&file)
                .with_context(|| format!("Failed to read {}", file.display()))?;
            let store = connect_store(&config).await?;
            import_file(&store, &bytes).await?;
        }
        Commands::Template { out, demo } => {
            let workbook = import::template(demo)?;
            fs::write(&out, workbook)
                .with_context(|| format!("Failed to write {}", out.display()))?;
            info!(path = %out.display(), demo, "Template written");
        }
        Commands::Reconcile { every } => {
            let store = connect_store(&config).await?;
            let identity = google_identity(&config)?;
            run_reconcile(&config, &store, &identity, every).await?;
        }
    }

    Ok(())
}

async fn connect_store(config: &Config) -> anyhow::Result<PgStore> {
    let url = config.require_database_url()?;
    PgStore::connect(url, config.database_max_connections)
        .await
        .context("Failed to connect to the database")
}

fn google_identity(config: &Config) -> anyhow::Result<GoogleIdentity> {
    let account = config.require_service_account()?.clone();
    info!(project = %account.project_id, "Using hosted identity service");
    Ok(GoogleIdentity::new(account, config.identity_api_base.clone()))
}

async fn serve<S: Store, I: IdentityProvider>(
    config: &Config,
    store: S,
    identity: I,
) -> anyhow::Result<()> {
    // Markers left by a crash mid-provisioning.
    if let Err(e) = provisioning::reconcile(&store, &identity, config.reconcile_grace).await {
        error!("Startup reconciliation failed: {}", e);
    }

    let app_state = web::Data::new(AppState::new(store, identity, config.reconcile_grace));
    let upload_limit = config.upload_limit_bytes;
    let address = config.server_address();

    info!("Starting HTTP server on {}", address);
    HttpServer::new(move || {
        App::new()
            .app_data(app_state.clone())
            .app_data(web::PayloadConfig::new(upload_limit))
            .wrap(Logger::default())
            .wrap(Cors::permissive())
            .configure(routes::configure::<S, I>)
    })
    .bind(&address)
    .with_context(|| format!("Failed to bind {address}"))?
    .run()
    .await
    .context("HTTP server stopped with an error")
}

async fn import_file<S: Store>(store: &S, bytes: &[u8]) -> anyhow::Result<()> {
    let rows = import::read_workbook(bytes)?;
    let packages = store.packages().list().await?;
    let plan = import::plan(&rows, &packages, Utc::now());
    info!(rows = rows.len(), ready = plan.ready.len(), "Importing workbook");

    let report = import::apply(plan, store.customers()).await;
    if let Some(e) = report.error {
        anyhow::bail!("Import stopped at row {:?}: {}", report.failed_row, e);
    }
    Ok(())
}

async fn run_reconcile<S: Store, I: IdentityProvider>(
    config: &Config,
    store: &S,
    identity: &I,
    every: Option<u64>,
) -> anyhow::Result<()> {
    let Some(secs) = every else {
        provisioning::reconcile(store, identity, config.reconcile_grace)
            .await
            .context("Reconciliation failed")?;
        return Ok(());
    };

    let mut interval = tokio::time::interval(Duration::from_secs(secs.max(1)));
    loop {
        interval.tick().await;
        if let Err(e) = provisioning::reconcile(store, identity, config.reconcile_grace).await {
            error!("Reconciliation failed: {}", e);
        }
    }
}
