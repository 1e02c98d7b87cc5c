mod config;
mod currency;
mod dispatcher;
mod ledger;
mod routes;
#[cfg(test)]
mod test_utils;

use crate::config::Config;
use crate::dispatcher::dead_letter::DeadLetter;
use crate::dispatcher::{Dispatcher, DonationProcessor};
use crate::ledger::auth::GoogleCredentials;
use crate::ledger::sheets::SheetsLedger;
use axum::Router;
use clap::Parser;
use eyre::{Report, WrapErr as _};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

pub type SharedAppState = Arc<AppState>;
pub struct AppState {
    dispatcher: Dispatcher,
}

/// Records Tiltify donations in a Google Sheets ledger.
#[derive(Parser, Debug)]
#[command(version, about)]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(long, env = "DONATION_LEDGER_CONFIG", default_value = "config.toml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> Result<(), Report> {
    dotenvy::dotenv().ok();
    tracing_subscriber::registry()
        .with(sentry::integrations::tracing::layer())
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                format!(
                    "info,{}=trace,hyper_util=debug,axum_serve=debug",
                    env!("CARGO_CRATE_NAME")
                )
                .into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    let config = Config::load(&cli.config)?;

    let _sentry = sentry::init(sentry::ClientOptions {
        dsn: config.sentry.dsn()?,
        release: sentry::release_name!(),
        traces_sample_rate: 1.0,
        ..Default::default()
    });

    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(config.http.timeout_secs))
        .build()
        .wrap_err("Failed to build HTTP client")?;

    // May block on interactive consent, so it runs before we accept webhooks.
    let credentials = GoogleCredentials::authorize(
        &config.storage.client_secret,
        &config.storage.token,
        config.ledger.scopes.clone(),
    )
    .await
    .wrap_err("Failed to authorize with Google Sheets")?;
    let ledger = Arc::new(SheetsLedger::new(
        client.clone(),
        &config.ledger,
        Arc::new(credentials),
    ));
    let rates = currency::from_config(&config.currency, client);

    let mut processor = DonationProcessor::new(rates, ledger, config.currency.reference.clone());
    if let Some(path) = &config.storage.dead_letter {
        processor = processor.with_dead_letter(DeadLetter::new(path));
    }
    let (dispatcher, workers) = Dispatcher::start(&config.dispatcher, Arc::new(processor));
    let app_state: SharedAppState = Arc::new(AppState { dispatcher });

    let listener = tokio::net::TcpListener::bind(&config.server.to_socket_addrs())
        .await
        .wrap_err("Failed to bind webhook listener")?;
    info!("listening on {}", listener.local_addr()?);

    let app = Router::new().merge(routes::router()).with_state(app_state);

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!("failed to install CTRL+C handler: {e}");
                std::future::pending::<()>().await;
            }
            info!("received CTRL+C, shutting down");
        })
        .await
        .wrap_err("Webhook server failed")?;

    info!("Webhook server stopped, draining queued donations");
    workers.join().await;
    Ok(())
}
