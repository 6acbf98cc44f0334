mod api;
mod middleware;
mod scheduler;

use std::sync::Arc;

use tracing_subscriber::EnvFilter;
use trashmap_store::{ResultStore, StoreConfig};
use trashmap_vision::GeminiClient;

use crate::{
    api::{build_app, default_rate_limit_state, AppState},
    middleware::AuthState,
    scheduler::InsightRunner,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let config = Arc::new(trashmap_core::load_app_config()?);
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(config.log_level.clone()))?;
    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    tracing::info!(
        env = %config.env,
        bind_addr = %config.bind_addr,
        data_dir = %config.data_dir.display(),
        vision_model = %config.vision_model,
        "starting trashmap-server"
    );

    let store = Arc::new(ResultStore::open(StoreConfig::from_app_config(&config)).await?);
    let vision = Arc::new(GeminiClient::new(&config)?);
    let insights = Arc::new(InsightRunner::new(Arc::clone(&store), Arc::clone(&vision)));

    let mut scheduler =
        scheduler::build_scheduler(Arc::clone(&insights), &config.insight_cron).await?;

    let auth = AuthState::from_config(&config.api_keys, config.is_development())?;
    let state = AppState {
        store,
        vision,
        insights,
        max_upload_bytes: config.max_upload_bytes,
    };
    let app = build_app(state, auth, default_rate_limit_state());

    let listener = tokio::net::TcpListener::bind(config.bind_addr).await?;
    tracing::info!(addr = %config.bind_addr, "listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    scheduler.shutdown().await?;
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to listen for ctrl-c");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    tracing::info!("received shutdown signal, starting graceful shutdown");
}
