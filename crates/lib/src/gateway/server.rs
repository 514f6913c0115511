//! Relay HTTP server (single port): health probe and Telegram webhook.

use crate::auth::AllowList;
use crate::catalog::Catalog;
use crate::channels::{
    ChannelHandle, ChannelRegistry, InboundMessage, TelegramUpdate, TELEGRAM_CHANNEL_ID,
};
use crate::config::{self, Config, RelaySettings};
use crate::dispatch::Dispatcher;
use crate::exec::Executor;
use crate::gateway::inbound::run_dispatch_loop;
use crate::platform::HostEnvironment;
use anyhow::{Context, Result};
use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
    routing::{get, post},
    Json, Router,
};
use serde_json::json;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

const PROTOCOL_VERSION: u32 = 1;

/// Shared state for the HTTP handlers.
#[derive(Clone)]
pub struct RelayState {
    pub config: Arc<Config>,
    pub host: HostEnvironment,
    /// Sender for inbound requests (webhook POSTs). The dispatch loop receives.
    pub inbound_tx: mpsc::Sender<InboundMessage>,
    /// Cancelled on shutdown; the webhook stops accepting once set.
    pub shutdown: CancellationToken,
}

/// Run the relay until `shutdown` is cancelled.
///
/// Binds config.gateway.bind:config.gateway.port. A non-loopback bind requires a webhook
/// secret, since the webhook route is the only thing exposed. Startup order: bind, build the
/// catalog and engine, start the dispatch loop, then start Telegram (webhook or long-poll).
pub async fn run_relay(
    config: Config,
    settings: RelaySettings,
    shutdown: CancellationToken,
) -> Result<()> {
    let bind = config.gateway.bind.trim().to_string();
    if !config::is_loopback_bind(&bind) && config.telegram.webhook_secret.is_none() {
        anyhow::bail!(
            "refusing to bind relay to {} without telegram.webhookSecret",
            bind
        );
    }
    let bind_addr = format!("{}:{}", bind, config.gateway.port);
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("binding to {}", bind_addr))?;

    let host = HostEnvironment::detect();
    let catalog = Arc::new(Catalog::for_host(
        &host,
        config.exec.log_fallback_paths.clone(),
    ));
    let executor = Executor::new(catalog, settings.base_dir.clone(), config.exec.limits());
    let allow_list = Arc::new(AllowList::new(settings.allowed_user_ids.iter().copied()));
    log::info!(
        "relay: {} allowed principal(s), base dir {}, {} worker(s)",
        settings.allowed_user_ids.len(),
        settings.base_dir.display(),
        executor.limits().workers
    );
    let dispatcher = Dispatcher::new(allow_list, executor, settings.webapp_url.clone());

    let (inbound_tx, inbound_rx) = mpsc::channel::<InboundMessage>(64);
    let channel_registry = Arc::new(ChannelRegistry::new());
    let dispatch_handle = tokio::spawn(run_dispatch_loop(
        dispatcher,
        channel_registry.clone(),
        inbound_rx,
        shutdown.clone(),
        config.exec.shutdown_grace(),
    ));

    let telegram = Arc::new(settings.telegram_channel());
    let mut channel_tasks: Vec<JoinHandle<()>> = Vec::new();
    let webhook_mode = match config.telegram.webhook_url.as_deref() {
        Some(url) => {
            let secret = config.telegram.webhook_secret.as_deref();
            if let Err(e) = telegram.set_webhook(url, secret).await {
                log::warn!("telegram set_webhook failed: {}", e);
            } else {
                log::info!("telegram channel registered (webhook mode): {}", url);
            }
            true
        }
        None => {
            channel_tasks.push(
                telegram
                    .clone()
                    .start_inbound(inbound_tx.clone(), shutdown.clone()),
            );
            log::info!("telegram channel registered and getUpdates loop started");
            false
        }
    };
    channel_registry
        .register(telegram.id().to_string(), telegram.clone())
        .await;

    let state = RelayState {
        config: Arc::new(config),
        host,
        inbound_tx,
        shutdown: shutdown.clone(),
    };
    let app = Router::new()
        .route("/", get(health_http))
        .route("/telegram/webhook", post(telegram_webhook))
        .with_state(state);

    log::info!("relay listening on {}", bind_addr);
    let served = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown.clone().cancelled_owned())
        .await
        .context("relay server exited");
    if served.is_err() {
        shutdown.cancel();
    }

    log::info!("shutting down: stopping channels and draining requests");
    channel_registry.stop_all().await;
    if webhook_mode {
        if let Err(e) = telegram.delete_webhook().await {
            log::debug!("telegram delete_webhook on shutdown: {}", e);
        }
    }
    for h in channel_tasks {
        let _ = h.await;
    }
    let _ = dispatch_handle.await;
    log::info!("relay stopped");
    served
}

/// POST /telegram/webhook: checks the optional secret header, parses the update, forwards it.
async fn telegram_webhook(
    State(state): State<RelayState>,
    headers: HeaderMap,
    body: Bytes,
) -> StatusCode {
    if let Some(ref expected) = state.config.telegram.webhook_secret {
        let provided = headers
            .get("X-Telegram-Bot-Api-Secret-Token")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("");
        if provided != expected.as_str() {
            return StatusCode::FORBIDDEN;
        }
    }
    if state.shutdown.is_cancelled() {
        return StatusCode::SERVICE_UNAVAILABLE;
    }
    let update: TelegramUpdate = match serde_json::from_slice(&body) {
        Ok(u) => u,
        Err(_) => return StatusCode::BAD_REQUEST,
    };
    let Some(inbound) = update.into_inbound() else {
        return StatusCode::OK;
    };
    debug_assert_eq!(inbound.channel_id, TELEGRAM_CHANNEL_ID);
    if state.inbound_tx.send(inbound).await.is_err() {
        return StatusCode::SERVICE_UNAVAILABLE;
    }
    StatusCode::OK
}

/// GET / returns a simple health JSON (for probes).
async fn health_http(State(state): State<RelayState>) -> Json<serde_json::Value> {
    Json(json!({
        "runtime": "running",
        "protocol": PROTOCOL_VERSION,
        "port": state.config.gateway.port,
        "platform": state.host.platform,
        "sandboxed": state.host.sandboxed,
    }))
}
