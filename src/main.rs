use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio::net::TcpListener;
use tracing::info;

use starshop_api::config::{init_tracing, load_config};
use starshop_api::db::{establish_connection_from_app_config, init_schema};
use starshop_api::events::{process_events, EventSender};
use starshop_api::rails::{
    crypto_pay::CryptoPayClient, fragment::FragmentClient, rate_feed::ExchangeRateCache,
    rate_feed::HttpRateSource, ton_api::TonApiClient, LogNotificationSink,
};
use starshop_api::services::reconciliation::ReconciliationService;
use starshop_api::services::retry::RetryConfig;
use starshop_api::{app_router, AppServices, AppState, Collaborators};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = load_config().context("failed to load configuration")?;
    init_tracing(&config.log_level);
    let config = Arc::new(config);

    let db = Arc::new(
        establish_connection_from_app_config(&config)
            .await
            .context("failed to connect to the database")?,
    );
    init_schema(&db)
        .await
        .context("failed to initialize the database schema")?;

    let (event_tx, event_rx) = tokio::sync::mpsc::channel(1000);
    tokio::spawn(process_events(event_rx));
    let event_sender = Some(Arc::new(EventSender::new(event_tx)));

    let rates = Arc::new(ExchangeRateCache::new(
        config.fallback_usd_per_ton,
        Arc::new(HttpRateSource::new(config.rate_feed_url.clone())),
    ));
    ExchangeRateCache::spawn_refresh(
        rates.clone(),
        Duration::from_secs(config.rate_refresh_secs),
    );

    let collaborators = Collaborators {
        invoice_rail: Arc::new(CryptoPayClient::new(
            config.invoice_api_url.clone(),
            config.invoice_api_token.clone(),
        )),
        chain: Arc::new(TonApiClient::new(config.chain_api_url.clone())),
        issuance: Arc::new(FragmentClient::new(
            config.issuance_api_url.clone(),
            config.issuance_api_token.clone(),
        )),
        notifier: Arc::new(LogNotificationSink),
        rates,
    };

    let services = AppServices::build(
        db.clone(),
        collaborators,
        config.owner_wallet_address.clone(),
        RetryConfig::default(),
        event_sender,
    );

    services
        .localization
        .seed_defaults()
        .await
        .context("failed to seed localized texts")?;

    ReconciliationService::spawn_sweep(
        services.reconciliation.clone(),
        Duration::from_secs(config.sweep_interval_secs),
    );

    let state = AppState {
        db,
        config: config.clone(),
        services,
    };
    let app = app_router(state);

    let addr = format!("{}:{}", config.host, config.port);
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!(addr = %addr, "Server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    info!("Server shut down");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("Shutdown signal received");
}
