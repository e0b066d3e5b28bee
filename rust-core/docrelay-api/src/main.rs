// SPDX-License-Identifier: PMPL-1.0-or-later
//! DocRelay server binary
//!
//! Wires the in-memory store, cache and queue together, starts the intake
//! loop and serves the HTTP API until interrupted.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use docrelay_api::{ApiKeyAuthenticator, AppState, Authenticator, OpenAuthenticator, ServiceConfig};
use docrelay_broker::{install_crypto_provider, Dispatcher, InMemoryQueue, IntakeLoop, WebhookHook};
use docrelay_cache::{InMemoryCache, ResultCache};
use docrelay_store::{DocumentStore, InMemoryDriver};
use tokio::sync::watch;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

const CACHE_PURGE_INTERVAL: Duration = Duration::from_secs(60);

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = ServiceConfig::from_env();
    init_tracing(config.log_json);
    install_crypto_provider();

    let store = DocumentStore::new(Arc::new(InMemoryDriver::new()), config.store_config());
    store.ping().await.context("document store is unreachable")?;
    info!("connected to document store");

    let backend = Arc::new(InMemoryCache::new());
    let results = ResultCache::new(backend.clone(), config.cache_ttl());
    let queue = Arc::new(InMemoryQueue::new(config.visibility_timeout()));
    let dispatcher = Arc::new(Dispatcher::new(store));

    let (stop, shutdown) = watch::channel(false);

    let purge = tokio::spawn({
        let mut shutdown = shutdown.clone();
        async move {
            let mut ticker = tokio::time::interval(CACHE_PURGE_INTERVAL);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        backend.purge_expired().await;
                    }
                    _ = shutdown.changed() => break,
                }
            }
        }
    });

    let mut intake = IntakeLoop::new(queue.clone(), dispatcher.clone(), results.clone(), config.intake_config());
    if let Some(url) = &config.webhook_url {
        info!(%url, "completion webhook enabled");
        intake = intake.with_hook(Arc::new(WebhookHook::new(url.clone())));
    }
    let intake = tokio::spawn(intake.run(shutdown));

    let auth: Arc<dyn Authenticator> = if config.auth_enabled {
        if config.api_keys.is_empty() {
            warn!("authentication enabled without DOCRELAY_API_KEYS; every request will be rejected");
        }
        Arc::new(ApiKeyAuthenticator::with_keys(
            config.api_keys.iter().map(|(label, key)| (label.as_str(), key.as_str())),
        ))
    } else {
        Arc::new(OpenAuthenticator)
    };
    let state = AppState::new(dispatcher, queue, results).with_authenticator(auth);

    let addr = config.bind_addr();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!(%addr, "starting DocRelay");

    docrelay_api::serve(listener, state, async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            warn!(error = %err, "failed to listen for ctrl-c");
        }
        info!("shutdown requested");
    })
    .await
    .context("HTTP server failed")?;

    let _ = stop.send(true);
    intake.await.context("intake loop panicked")?;
    purge.await.context("cache purge task panicked")?;
    info!("DocRelay stopped");
    Ok(())
}
