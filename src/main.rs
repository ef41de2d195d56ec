use std::{net::SocketAddr, sync::Arc};

use resale_aggregator::{
    build_app, build_http_client, AppConfig, AppState, EbaySource, ListingSource, ResilientFetcher,
    VestiaireSource, VintedSource,
};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let config = AppConfig::from_env()?;
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(config.log_level.clone()))?;
    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    if config.ebay.is_none() {
        tracing::warn!("EBAY_APP_ID/EBAY_CERT_ID not set, eBay searches will serve sample data");
    }

    let client = build_http_client(config.http_timeout)?;
    let sources: Vec<Arc<dyn ListingSource>> = vec![
        Arc::new(VintedSource::new(client.clone())),
        Arc::new(EbaySource::new(client.clone(), config.ebay.clone())),
        Arc::new(VestiaireSource::new(client)),
    ];

    let fetcher = Arc::new(ResilientFetcher::new(config.resilience.clone()));
    let state = AppState::new(fetcher, sources, config.resilience.rate_limit_max_wait);
    let app = build_app(state);

    let listener = tokio::net::TcpListener::bind(config.bind_addr).await?;
    tracing::info!(addr = %config.bind_addr, "resale aggregator listening");
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    tracing::info!("received shutdown signal, starting graceful shutdown");
}
