//! OpenSASE Marketplace - multi-vendor pricing, checkout and inventory service

use anyhow::{Context, Result};
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use opensase_marketplace::api::{self, AppState};
use opensase_marketplace::config::Config;
use opensase_marketplace::payment::SandboxGateway;
use opensase_marketplace::publisher::EventPublisher;
use opensase_marketplace::services::Services;
use opensase_marketplace::shipping::FlatRateTable;
use opensase_marketplace::store::{InMemoryStore, MarketplaceStore, PgStore};

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env().context("invalid configuration")?;

    let store: Arc<dyn MarketplaceStore> = match &config.database_url {
        Some(url) => {
            let db = PgPoolOptions::new().max_connections(config.db_max_connections).connect(url).await
                .context("failed to connect to Postgres")?;
            sqlx::migrate!("./migrations").run(&db).await.context("failed to run migrations")?;
            Arc::new(PgStore::new(db))
        }
        None => {
            tracing::warn!("DATABASE_URL not set, using in-memory storage; data is lost on restart");
            Arc::new(InMemoryStore::new())
        }
    };

    let nats = match &config.nats_url {
        Some(url) => match async_nats::connect(url.as_str()).await {
            Ok(client) => Some(client),
            Err(e) => {
                tracing::warn!(error = %e, "NATS unavailable, domain events will be dropped");
                None
            }
        },
        None => None,
    };

    let services = Services::new(
        store,
        Arc::new(SandboxGateway::new()),
        Arc::new(FlatRateTable::default()),
        EventPublisher::new(nats),
        &config,
    );
    let app = api::router(AppState::new(services));

    let addr = format!("0.0.0.0:{}", config.port);
    tracing::info!(
        currency = %config.currency, tax_rate = %config.tax_rate.rate(),
        "OpenSASE Marketplace listening on {}", addr
    );
    axum::serve(tokio::net::TcpListener::bind(&addr).await?, app).await?;
    Ok(())
}
