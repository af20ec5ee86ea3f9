#![forbid(unsafe_code)]

use std::{process::exit, sync::Arc};

use group_exchange::{
    config::AppConfig, database::setup_database, notify::TracingNotifier, service::ExchangeService,
};
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tracing::instrument]
#[tokio::main]
async fn main() {
    if let Err(err) = dotenvy::dotenv() {
        warn!("Could not load config from .env file: {err}");
    }

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::builder()
                .with_default_directive(
                    "group_exchange=info"
                        .parse()
                        .expect("Hard-coded default directive should be correct"),
                )
                .from_env_lossy(),
        )
        .init();

    let app_config = match AppConfig::from_env() {
        Ok(config) => config,
        Err(err) => {
            error!("Could not load app config: {err}");
            exit(255);
        }
    };

    let db_pool =
        match setup_database(&app_config.database_url, app_config.max_connections()).await {
            Ok(pool) => pool,
            Err(err) => {
                error!("Could not setup database: {err}");
                exit(255);
            }
        };

    let service = ExchangeService::new(db_pool.clone(), Arc::new(TracingNotifier));
    if let Err(err) = summarize(&service).await {
        error!("Could not summarize exchanges: {err}");
    }

    db_pool.close().await;
}

#[tracing::instrument(skip_all)]
async fn summarize(service: &ExchangeService) -> Result<(), anyhow::Error> {
    let summaries = service.summaries().await?;
    info!("{} exchanges", summaries.len());

    for summary in summaries {
        info!(
            "{:?} '{}': {} groups, {} open offers, {} accepted",
            summary.exchange.id,
            summary.exchange.name,
            summary.exchange.available_groups.len(),
            summary.open_offers,
            summary.accepted_offers
        );
    }

    Ok(())
}
