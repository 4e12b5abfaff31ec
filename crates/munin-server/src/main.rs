//! `munin-server` — the HTTP surface for the authorization and audit
//! core (spec.md §6). Startup sequence:
//!   1. Load configuration from the environment.
//!   2. Open (or create) the SQLite database and run migrations.
//!   3. Wire the component stack into `AppState`.
//!   4. Serve the REST surface behind bearer-token auth + RBAC.

use anyhow::Context;
use munin_server::config::Config;
use munin_server::router;
use munin_server::state::AppState;
use munin_storage::Storage;
use std::net::SocketAddr;
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,munin=debug".parse().unwrap()),
        )
        .init();

    let config = Config::from_env().context("loading configuration")?;
    info!(database_path = %config.database_path.display(), "munin-server starting");

    let storage = Storage::open(&config.database_path).context("opening storage")?;
    let addr: SocketAddr = format!("{}:{}", config.host, config.port)
        .parse()
        .context("invalid bind address")?;

    let state = AppState::build(storage, config);
    let app = router::build_router(state);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding {addr}"))?;
    info!(%addr, "listening");

    axum::serve(listener, app)
        .await
        .context("server exited")?;

    Ok(())
}
