//! Gateway HTTP + WebSocket server (single port).

use crate::config::{self, Config};
use crate::correlator::PendingTable;
use crate::events::{BroadcastEventSink, EventSink, EVENT_SHUTDOWN};
use crate::gateway::protocol::{Ack, ProcessParams};
use crate::gateway::webhook::{DeliveryHandler, WebhookRegistry};
use crate::relay::{ConversationInput, HttpWebhookSender, RelayAgent};
use crate::settings::{InstanceSettings, DEFAULT_INSTANCE_ID};
use anyhow::{Context, Result};
use axum::{
    body::Bytes,
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Path, State,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde_json::json;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

/// Shared state for the gateway (config, pending table, agents, webhooks, events).
#[derive(Clone)]
pub struct GatewayState {
    pub config: Arc<Config>,
    pub settings: Arc<InstanceSettings>,
    /// The one pending-response table, shared by every agent and the delivery handler.
    pub pending: Arc<PendingTable>,
    /// Relay agents keyed by instance id.
    pub agents: Arc<HashMap<String, Arc<RelayAgent>>>,
    /// Instance used when a process request names none.
    pub default_agent: String,
    pub webhooks: Arc<WebhookRegistry>,
    /// Host event bus; `/ws` clients subscribe to it.
    pub events: BroadcastEventSink,
}

/// Build gateway state from config: settings store, pending table, one agent per instance,
/// and a delivery handler registered under each instance's receive target.
pub async fn build_state(config: &Config) -> Result<GatewayState> {
    config.validate()?;
    let instances = config.resolved_instances();
    let settings = Arc::new(
        InstanceSettings::from_instances(&instances).context("loading instance settings")?,
    );
    let pending = Arc::new(PendingTable::with_retention(Duration::from_secs(
        config.correlator.retention_secs,
    )));
    let (event_tx, _) = broadcast::channel(64);
    let events = BroadcastEventSink::new(event_tx);

    let base_url = config::resolve_base_url(config);
    let sender = Arc::new(
        HttpWebhookSender::new(
            base_url.clone(),
            Duration::from_secs(config.outbound.request_timeout_secs),
        )
        .context("building outbound webhook client")?,
    );
    log::info!("outbound webhooks go to {}/webhook/<sendTarget>", base_url);

    let webhooks = Arc::new(WebhookRegistry::new());
    let delivery = Arc::new(DeliveryHandler::new(pending.clone()));
    let mut agents = HashMap::new();
    let mut registered = BTreeSet::new();
    for (id, s) in &instances {
        if s.receive_target.is_empty() {
            log::info!("instance {}: no receive target, replies will not be awaited", id);
        } else {
            // Instances may share a receive target; all deliveries land in the same table.
            if registered.insert(s.receive_target.clone()) {
                webhooks
                    .register(s.receive_target.clone(), delivery.clone())
                    .await;
            }
            log::info!("instance {}: receiving on webhook {}", id, s.receive_target);
        }
        let agent = RelayAgent::new(
            id.clone(),
            settings.clone(),
            pending.clone(),
            sender.clone(),
            Arc::new(events.clone()),
        );
        agents.insert(id.clone(), Arc::new(agent));
    }

    let default_agent = if instances.contains_key(DEFAULT_INSTANCE_ID) {
        DEFAULT_INSTANCE_ID.to_string()
    } else {
        instances.keys().next().cloned().unwrap_or_default()
    };

    Ok(GatewayState {
        config: Arc::new(config.clone()),
        settings,
        pending,
        agents: Arc::new(agents),
        default_agent,
        webhooks,
        events,
    })
}

/// HTTP routes for a built state.
pub fn router(state: GatewayState) -> Router {
    Router::new()
        .route("/", get(health_http))
        .route("/ws", get(ws_handler))
        .route("/api/conversation/process", post(process_http))
        .route("/api/webhook/:webhook_id", post(webhook_http))
        .with_state(state)
}

/// Run the gateway server; binds to config.gateway.bind:config.gateway.port.
/// Blocks until shutdown (e.g. Ctrl+C).
pub async fn run_gateway(config: Config) -> Result<()> {
    let bind = config.gateway.bind.trim().to_string();
    if !config::is_loopback_bind(&bind) {
        log::warn!(
            "gateway bound to non-loopback address {}; inbound webhooks are not authenticated",
            bind
        );
    }

    let state = build_state(&config).await?;
    let sweeper = state
        .pending
        .clone()
        .spawn_sweeper(Duration::from_secs(config.correlator.sweep_interval_secs));
    let events = state.events.clone();
    let app = router(state);

    let bind_addr = format!("{}:{}", bind, config.gateway.port);
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("binding to {}", bind_addr))?;
    log::info!("gateway listening on {}", bind_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(events, sweeper))
        .await
        .context("gateway server exited")?;
    log::info!("gateway stopped");
    Ok(())
}

/// Future that completes when the process should shut down (SIGINT or SIGTERM).
/// Broadcasts a shutdown event to WebSocket clients and stops the correlator sweeper.
async fn shutdown_signal(events: BroadcastEventSink, sweeper: JoinHandle<()>) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            log::error!("failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut s) => {
                s.recv().await;
            }
            Err(e) => {
                log::error!("failed to install SIGTERM handler: {}", e);
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
    log::info!("shutdown signal received, broadcasting shutdown and draining connections");

    events.emit(EVENT_SHUTDOWN, json!({}));
    sweeper.abort();
}

/// GET / returns a simple health JSON (for probes).
async fn health_http(State(state): State<GatewayState>) -> Json<serde_json::Value> {
    Json(json!({
        "runtime": "running",
        "port": state.config.gateway.port,
        "instances": state.settings.ids(),
        "webhooks": state.webhooks.ids().await,
        "pending": state.pending.len(),
        "waiting": state.pending.waiting(),
    }))
}

/// POST /api/conversation/process: run one relay turn. Always 200 with a result for a known agent.
async fn process_http(
    State(state): State<GatewayState>,
    Json(params): Json<ProcessParams>,
) -> Response {
    let agent_id = params
        .agent_id
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .unwrap_or(state.default_agent.as_str());
    let Some(agent) = state.agents.get(agent_id).cloned() else {
        return (
            StatusCode::NOT_FOUND,
            Json(Ack::error(format!("unknown agent: {}", agent_id))),
        )
            .into_response();
    };
    let result = agent
        .process(ConversationInput {
            text: params.text,
            conversation_id: params.conversation_id,
            satellite_id: params.satellite_id,
        })
        .await;
    Json(result).into_response()
}

/// POST /api/webhook/:webhook_id: inbound webhook dispatch.
async fn webhook_http(
    State(state): State<GatewayState>,
    Path(webhook_id): Path<String>,
    body: Bytes,
) -> Response {
    let reply = state.webhooks.dispatch(&webhook_id, body).await;
    (reply.status, Json(reply.ack)).into_response()
}

/// GET /ws upgrades to WebSocket and streams event frames until the client goes away.
async fn ws_handler(State(state): State<GatewayState>, ws: WebSocketUpgrade) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(mut socket: WebSocket, state: GatewayState) {
    let mut event_rx = state.events.subscribe();
    loop {
        tokio::select! {
            biased;

            event = event_rx.recv() => {
                match event {
                    Ok(frame) => {
                        let is_shutdown = is_shutdown_frame(&frame);
                        if socket.send(Message::Text(frame)).await.is_err() || is_shutdown {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        log::debug!("ws client lagged {} event(s)", n);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
            incoming = socket.recv() => {
                match incoming {
                    Some(Ok(Message::Close(_))) | None | Some(Err(_)) => break,
                    // Client frames are ignored; the stream is one-way.
                    Some(Ok(_)) => {}
                }
            }
        }
    }
}

fn is_shutdown_frame(frame: &str) -> bool {
    serde_json::from_str::<serde_json::Value>(frame)
        .ok()
        .and_then(|v| v.get("event").and_then(|e| e.as_str()).map(|e| e == EVENT_SHUTDOWN))
        .unwrap_or(false)
}
