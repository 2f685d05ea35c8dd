// SPDX-License-Identifier: GPL-3.0-or-later
use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Result;
use axum::serve;
use catalogd_api::router;
use catalogd_application::tasks::TaskContext;
use catalogd_application::{AppState, LoftyTagEmbedder, YtDlpExtractor};
use catalogd_config::load as load_config;
use catalogd_infrastructure::init_database;
use catalogd_metadata::lyrics::LrcLibProvider;
use catalogd_musicbrainz::MusicBrainzClient;
use catalogd_scheduler::{Scheduler, Worker};
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::info;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let config = load_config(None)?;
    config.paths.ensure()?;
    let _secrets = catalogd_config::secrets::load_or_generate(&config.paths.secrets_path())?;

    let pool = init_database(&config).await?;

    let state = AppState::new(config.clone(), pool.clone());
    state.on_start();

    let task_ctx = Arc::new(build_task_context(&config, pool.clone())?);

    let (stop_tx, stop_rx) = watch::channel(false);

    let mut worker_handles = Vec::new();
    for i in 0..config.worker.count.max(1) {
        let worker = Worker::new(
            format!("worker-{i}"),
            pool.clone(),
            task_ctx.clone(),
            config.worker.clone(),
        );
        let stop_rx = stop_rx.clone();
        worker_handles.push(tokio::spawn(worker.run(stop_rx)));
    }

    let scheduler = Scheduler::new(pool.clone(), &config.scheduler);
    let scheduler_handle = tokio::spawn(scheduler.run(stop_rx.clone()));

    let listener = TcpListener::bind(bind_addr(&config.http)).await?;
    let addr = listener.local_addr()?;
    info!(target: "cli", "listening on {}", addr);

    serve(listener, router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!(target: "cli", "shutting down workers and scheduler");
    let _ = stop_tx.send(true);
    for handle in worker_handles {
        let _ = handle.await;
    }
    let _ = scheduler_handle.await;

    Ok(())
}

fn build_task_context(config: &catalogd_config::AppConfig, pool: sqlx::SqlitePool) -> Result<TaskContext> {
    let _ = &pool; // the task context owns its own pool handle below
    Ok(TaskContext {
        pool,
        catalog_client: Arc::new(MusicBrainzClient::new()?),
        extractor: Arc::new(YtDlpExtractor::new(
            config.download.extractor_binary.clone(),
            "bestaudio/best".to_string(),
            config.download.preferred_codec.clone(),
            config.download.cookie_file.clone(),
            config.paths.downloads_dir(),
        )),
        tag_embedder: Arc::new(LoftyTagEmbedder),
        lyrics_provider: Arc::new(LrcLibProvider::new(None)),
        http_client: reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(15))
            .build()?,
        music_root: config.paths.music_root.clone(),
    })
}

fn init_tracing() {
    let fmt_layer = fmt::layer().with_target(true).with_thread_names(true).with_level(true);
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .init();
}

fn bind_addr(http: &catalogd_config::HttpConfig) -> SocketAddr {
    let addr = format!("{}:{}", http.host, http.port);
    addr.parse().expect("valid listen address")
}

async fn shutdown_signal() {
    #[cfg(unix)]
    let mut interrupt = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::interrupt())
        .expect("install SIGINT handler");

    #[cfg(unix)]
    let mut terminate = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
        .expect("install SIGTERM handler");

    #[cfg(not(unix))]
    let interrupt = tokio::signal::ctrl_c();

    #[cfg(unix)]
    tokio::select! {
        _ = interrupt.recv() => {},
        _ = terminate.recv() => {},
    }

    #[cfg(not(unix))]
    {
        interrupt.await.expect("ctrl_c handler");
    }

    info!(target: "cli", "shutdown signal received");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bind_addr_parsing() {
        let http = catalogd_config::HttpConfig {
            host: "127.0.0.1".to_string(),
            port: 5150,
        };
        let addr = bind_addr(&http);
        assert_eq!(addr.port(), 5150);
        assert!(addr.is_ipv4());
    }

    #[test]
    fn test_bind_addr_ipv6() {
        let http = catalogd_config::HttpConfig {
            host: "[::1]".to_string(),
            port: 8080,
        };
        let addr = bind_addr(&http);
        assert_eq!(addr.port(), 8080);
        assert!(addr.is_ipv6());
    }
}
