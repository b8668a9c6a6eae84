//! ShelfCache Daemon - cache ops endpoints and RESP listener

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use shelfcache::{spawn_cleanup, Warmer};
use shelfd::config::{load_warm_sources, Args};
use shelfd::http::{router, AppState};
use shelfd::{build_cache, server, sources};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tracing::{error, info};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let args = Args::parse();

    // Health check
    if args.health {
        match TcpStream::connect(&args.bind).await {
            Ok(_) => {
                println!("OK");
                std::process::exit(0);
            }
            Err(_) => {
                eprintln!("FAILED");
                std::process::exit(1);
            }
        }
    }

    info!("Starting ShelfCache Daemon v{}", env!("CARGO_PKG_VERSION"));
    info!(
        l1_capacity = args.l1_capacity,
        l1_ttl_secs = args.l1_ttl().as_secs(),
        l2_ttl_secs = args.l2_ttl().as_secs(),
        "cache configuration"
    );

    let cache = build_cache(&args);

    let warm_sources = match &args.warm_sources {
        Some(path) => load_warm_sources(path)?,
        None => Vec::new(),
    };
    let client = reqwest::Client::builder()
        .user_agent(concat!("shelfd/", env!("CARGO_PKG_VERSION")))
        .build()
        .context("failed to build HTTP client")?;
    let warmer = Arc::new(Warmer::new(
        Arc::clone(&cache),
        sources::warm_entries(&client, &warm_sources),
        args.warm_interval(),
    ));

    let cleanup = spawn_cleanup(Arc::clone(&cache), args.cleanup_interval());
    if !warm_sources.is_empty() {
        warmer.start();
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let resp = match &args.resp_bind {
        Some(bind) => {
            let listener = TcpListener::bind(bind)
                .await
                .with_context(|| format!("failed to bind RESP listener on {}", bind))?;
            let store = Arc::clone(cache.tiers().l2());
            let mut rx = shutdown_rx.clone();
            Some(tokio::spawn(server::serve_resp(listener, store, async move {
                let _ = rx.wait_for(|stop| *stop).await;
            })))
        }
        None => None,
    };

    let listener = TcpListener::bind(&args.bind)
        .await
        .with_context(|| format!("failed to bind HTTP listener on {}", args.bind))?;
    info!("Ops endpoints listening on http://{}", args.bind);

    let app = router(AppState {
        cache: Arc::clone(&cache),
        warmer: Arc::clone(&warmer),
    });
    let served = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await;

    let _ = shutdown_tx.send(true);
    if let Some(resp) = resp {
        match resp.await {
            Ok(Err(e)) => error!(error = %e, "RESP listener failed"),
            Err(e) => error!(error = %e, "RESP listener task panicked"),
            Ok(Ok(())) => {}
        }
    }
    warmer.stop().await;
    cleanup.stop().await;

    served.context("HTTP server failed")?;
    info!("Shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
