use anyhow::Result;
use solar_telemetry_hub::{api, config::Config, controller::AppState, telemetry};
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let cfg = Config::load()?;
    let _log_guard = telemetry::init_tracing(&cfg.log);

    if cfg.auth.jwt_secret.is_empty() || cfg.auth.jwt_secret.starts_with("__SET_VIA_ENV") {
        anyhow::bail!(
            "SECURITY ERROR: SOLAR_HUB__AUTH__JWT_SECRET must be set to the session issuer's signing secret. \
            Generate one with: openssl rand -base64 32"
        );
    }
    if cfg.auth.jwt_secret.len() < 32 {
        warn!("jwt secret is shorter than 32 bytes - only safe for local development");
    }

    let addr = cfg.server.socket_addr()?;
    if cfg.server.host == "0.0.0.0" {
        warn!(
            "server binding to 0.0.0.0 - service will be accessible from the network. \
            Bind to 127.0.0.1 unless behind a firewall/reverse proxy."
        );
    }

    let state = AppState::init(cfg).await?;
    let app = api::router(state.clone());

    info!(%addr, mode = ?state.cfg.hardware.mode, "starting solar telemetry hub");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(telemetry::shutdown_signal())
        .await?;

    state.shutdown().await;
    warn!("shutdown complete");
    Ok(())
}
