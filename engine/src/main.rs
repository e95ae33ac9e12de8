use std::sync::Arc;

// requestbox engine
//
//   - Accept song requests over a small JSON API
//   - Play them back in priority order on a background loop
//   - Keep queue, now-playing, and stats in SQLite across restarts
//   - Run behind a reverse proxy (nginx) if exposed beyond the LAN

use requestbox_engine::{
    api::{build_router, AppState},
    config::Config,
    policy::PriorityRules,
    scheduler::Scheduler,
    search::YtDlpSearch,
    store::Store,
    trigger::{NoopTrigger, OpenerTrigger, PlaybackTrigger},
};
use tracing::{info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env().add_directive("info".parse()?))
        .init();

    let version = env!("CARGO_PKG_VERSION").to_string();
    let config = Config::from_env()?;

    let store = Store::new(&config.db_path);
    info!("using database {}", store.path().display());

    let trigger: Arc<dyn PlaybackTrigger> = match &config.opener {
        Some(program) => Arc::new(OpenerTrigger::new(program.clone())),
        None => {
            info!("playback trigger disabled");
            Arc::new(NoopTrigger)
        }
    };

    let scheduler = Scheduler::open(
        store,
        trigger,
        PriorityRules::new(&config.admin_alias),
        config.timings,
    )
    .await;

    let state = AppState {
        version: version.clone(),
        scheduler: scheduler.clone(),
        search: Arc::new(YtDlpSearch::new(config.ytdlp.clone())),
    };

    let app = build_router(state, config.ui_dir.clone());

    info!("requestbox engine {version} starting on http://{}", config.bind);

    let listener = tokio::net::TcpListener::bind(config.bind).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    scheduler.stop().await;
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async { tokio::signal::ctrl_c().await.ok(); };

    #[cfg(unix)]
    let term = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!("failed to install SIGTERM handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let term = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = term => {},
    }

    warn!("Shutdown signal received.");
}
