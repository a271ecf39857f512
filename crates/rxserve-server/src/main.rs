//! Service binary: config, sampler, serve loop, shutdown sequence.

use rxserve_admission::{PressureCell, ProcessSignals, Sampler};
use rxserve_server::{AppBuilder, AppConfig};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = match load_config() {
        Ok(config) => config,
        Err(error) => {
            eprintln!("invalid configuration: {error}");
            std::process::exit(2);
        }
    };

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .expect("failed to start runtime");

    let exit_code = runtime.block_on(run(config));
    std::process::exit(exit_code);
}

fn load_config() -> Result<AppConfig, Box<dyn std::error::Error>> {
    match std::env::var("RXSERVE_CONFIG") {
        Ok(path) => {
            let document = std::fs::read_to_string(&path)?;
            Ok(AppConfig::from_json(&document)?)
        }
        Err(_) => Ok(AppConfig::default()),
    }
}

async fn run(config: AppConfig) -> i32 {
    // The sampler feeds the admission controller for the life of the
    // process and stops with the rest of the background work.
    let cell = PressureCell::new();
    let background_stop = CancellationToken::new();
    let signals = Arc::new(ProcessSignals::new(
        config.listen.heap_budget_mb * 1024 * 1024,
    ));
    let sampler = Sampler::new(
        signals,
        cell.clone(),
        Duration::from_millis(config.rate_limiting.check_interval_ms),
    );
    let sampler_handle = sampler.spawn(background_stop.clone());

    let drain_deadline = config.graceful_shutdown.drain_deadline();
    let address = config.listen.address.clone();

    let parts = match AppBuilder::new(config).pressure_cell(cell).build().await {
        Ok(parts) => parts,
        Err(error) => {
            tracing::error!(%error, "startup failed");
            return 2;
        }
    };

    let listener = match TcpListener::bind(&address).await {
        Ok(listener) => listener,
        Err(error) => {
            tracing::error!(%error, %address, "failed to bind");
            return 2;
        }
    };
    tracing::info!(%address, "listening");

    let accept_stop = CancellationToken::new();
    let server = {
        let stop = accept_stop.clone();
        let router = parts.router;
        tokio::spawn(async move {
            axum::serve(listener, router)
                .with_graceful_shutdown(async move { stop.cancelled().await })
                .await
        })
    };

    shutdown_signal().await;
    tracing::info!("shutdown signal received");

    // Ordered shutdown: reject new work, drain in-flight requests up to
    // the deadline, then stop the listener and background tasks.
    parts.state.admission.begin_shutdown();
    let outcome = parts.state.coordinator.drain(drain_deadline).await;

    background_stop.cancel();
    accept_stop.cancel();
    let _ = sampler_handle.await;
    if let Err(error) = server.await.expect("server task panicked") {
        tracing::error!(%error, "server terminated with an error");
        return 1;
    }

    outcome.exit_code()
}

async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(error) => {
                tracing::error!(%error, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
