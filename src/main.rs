use std::net::SocketAddr;

use anyhow::Context;
use tokio::signal;
use tracing::{info, warn};

use stateset_payments_tax as api;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cfg = api::config::with_bootstrap_logging(api::config::load_config)
        .context("failed to load configuration")?;
    api::config::init_tracing(cfg.log_level(), cfg.log_json);
    api::handlers::health::init_start_time();

    let state = api::AppState::new(cfg.clone());
    info!(
        tax_regimes = state.services.tax.regime_count(),
        payment_methods = state.services.ranker.catalog_size(),
        fx_rates = state.services.currency.rate_count().await,
        "payments & tax engine initialised"
    );
    if let Some(every) = cfg.engine.fx.reload_interval() {
        info!(every_secs = every.as_secs(), "periodic exchange-rate reload enabled");
        api::services::payments_tax::spawn_rate_reload(
            state.services.currency.clone(),
            every,
            || api::config::load_config().map(|cfg| cfg.engine.fx),
        );
    }
    if cfg.engine.fx.require_settlement_conversion {
        warn!("settlement conversion is mandatory; missing FX rates will abort intents");
    }

    let app = api::app(state);

    // Bind and serve
    let ip: std::net::IpAddr = cfg
        .host
        .parse()
        .with_context(|| format!("invalid host address '{}'", cfg.host))?;
    let addr = SocketAddr::new(ip, cfg.port);
    info!("🚀 stateset-payments-tax listening on http://{}", addr);
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;

    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("server stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = signal::ctrl_c().await {
            warn!("failed to install Ctrl+C handler: {}", err);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(err) => {
                warn!("failed to install SIGTERM handler: {}", err);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
