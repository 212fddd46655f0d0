//! HTTP handlers for the sandbox.
//!
//! The sandbox owns a loopback relay standing in for the hosted service.
//! POST routes drive the relay or call `set_typing`; GET routes read the
//! reconciled views back.

use crate::config::Config;
use crate::metrics;
use anyhow::{Context, Result};
use axum::{
    body::Bytes,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use dashmap::DashMap;
use murmur_core::{OccupancyMap, OccupancyReconciler, PresenceAggregate, TypingService};
use murmur_protocol::{decode_json, ChannelId};
use murmur_transport::{LoopbackTransport, PubSub};
use serde_json::json;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{error, info};

/// Shared sandbox state.
pub struct AppState {
    /// The in-process relay.
    pub relay: LoopbackTransport,
    /// Occupancy across the configured channels.
    pub presence: OccupancyReconciler,
    /// Online aggregate kept in sync by the reconciler.
    pub online: PresenceAggregate,
    /// One typing service per channel.
    pub typing: HashMap<ChannelId, TypingService>,
}

impl AppState {
    /// Bind presence and typing against a fresh relay.
    ///
    /// # Errors
    ///
    /// Returns an error if any subscription fails.
    pub async fn start(config: &Config) -> Result<Arc<Self>> {
        let relay = LoopbackTransport::new();
        let transport: Arc<dyn PubSub> = Arc::new(relay.clone());

        let presence = OccupancyReconciler::new(Arc::clone(&transport), config.presence());
        presence.bind().await.context("Failed to bind presence")?;
        let online = presence.get_presence(Arc::new(DashMap::new()));

        let mut typing = HashMap::new();
        for channel in &config.channels {
            let service = TypingService::new(Arc::clone(&transport), config.typing());
            service
                .bind(channel)
                .await
                .with_context(|| format!("Failed to bind typing on {channel}"))?;
            typing.insert(channel.clone(), service);
        }

        for channel in &config.channels {
            relay.join(channel, &config.user_id);
        }

        Ok(Arc::new(Self {
            relay,
            presence,
            online,
            typing,
        }))
    }
}

/// Build the HTTP router.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/occupancy", get(occupancy_handler))
        .route("/online", get(online_handler))
        .route("/typing/:channel", get(typing_handler))
        .route("/presence", post(presence_json_handler))
        .route("/presence/:channel/:action/:user", post(presence_event_handler))
        .route("/typing/:channel/:user/:state", post(set_typing_handler))
        .with_state(state)
}

/// Run the HTTP server.
///
/// # Errors
///
/// Returns an error if the server fails to start.
pub async fn run_server(config: Config) -> Result<()> {
    if config.metrics.enabled {
        if let Err(e) = metrics::start_metrics_server(config.metrics.port) {
            error!("Failed to start metrics server: {:#}", e);
        }
    }

    let state = AppState::start(&config).await?;
    let app = router(state);

    let addr = config.bind_addr()?;
    let listener = TcpListener::bind(addr).await?;
    info!("Murmur sandbox listening on {}", addr);

    axum::serve(listener, app).await?;

    Ok(())
}

/// Health check handler.
async fn health_handler() -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

async fn occupancy_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let map = state
        .presence
        .current()
        .map(|map| OccupancyMap::clone(&map))
        .unwrap_or_default();
    Json(map)
}

async fn online_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let online: BTreeMap<String, bool> = state
        .online
        .iter()
        .map(|entry| (entry.key().clone(), *entry.value()))
        .collect();
    Json(online)
}

async fn typing_handler(
    State(state): State<Arc<AppState>>,
    Path(channel): Path<String>,
) -> impl IntoResponse {
    match state.typing.get(&channel) {
        Some(service) => (StatusCode::OK, Json(json!(service.typing_now(&channel, false)))),
        None => unknown_channel(&channel),
    }
}

async fn presence_event_handler(
    State(state): State<Arc<AppState>>,
    Path((channel, action, user)): Path<(String, String, String)>,
) -> impl IntoResponse {
    let delivered = match action.as_str() {
        "join" => state.relay.join(&channel, &user),
        "leave" => state.relay.leave(&channel, &user),
        "timeout" => state.relay.timeout(&channel, &user),
        other => {
            return (
                StatusCode::BAD_REQUEST,
                Json(json!({ "error": format!("unknown presence action: {other}") })),
            )
        }
    };
    (StatusCode::OK, Json(json!({ "delivered": delivered })))
}

/// Deliver a presence event given as the hosted service's JSON.
async fn presence_json_handler(
    State(state): State<Arc<AppState>>,
    body: Bytes,
) -> impl IntoResponse {
    match decode_json(&body) {
        Ok(event) => {
            let delivered = state.relay.inject(event.into());
            (StatusCode::OK, Json(json!({ "delivered": delivered })))
        }
        Err(e) => (StatusCode::BAD_REQUEST, Json(json!({ "error": e.to_string() }))),
    }
}

async fn set_typing_handler(
    State(state): State<Arc<AppState>>,
    Path((channel, user, typing)): Path<(String, String, String)>,
) -> impl IntoResponse {
    let is_typing = match typing.as_str() {
        "on" => true,
        "off" => false,
        other => {
            return (
                StatusCode::BAD_REQUEST,
                Json(json!({ "error": format!("typing state must be on or off, got {other}") })),
            )
        }
    };
    let Some(service) = state.typing.get(&channel) else {
        return unknown_channel(&channel);
    };

    let accepted = service.set_typing(&user, &channel, is_typing, None).await;
    (StatusCode::OK, Json(json!({ "accepted": accepted })))
}

fn unknown_channel(channel: &str) -> (StatusCode, Json<serde_json::Value>) {
    (
        StatusCode::NOT_FOUND,
        Json(json!({ "error": format!("channel not tracked: {channel}") })),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{to_bytes, Body};
    use axum::http::{Method, Request};
    use std::time::Duration;
    use tower::ServiceExt;

    async fn start() -> Arc<AppState> {
        let mut config = Config::default();
        config.user_id = "me".into();
        config.channels = vec!["lobby".into()];
        AppState::start(&config).await.unwrap()
    }

    async fn call(
        state: &Arc<AppState>,
        method: Method,
        uri: &str,
    ) -> (StatusCode, serde_json::Value) {
        send(state, method, uri, Body::empty()).await
    }

    async fn send(
        state: &Arc<AppState>,
        method: Method,
        uri: &str,
        body: Body,
    ) -> (StatusCode, serde_json::Value) {
        let request = Request::builder()
            .method(method)
            .uri(uri)
            .body(body)
            .unwrap();
        let response = router(Arc::clone(state)).oneshot(request).await.unwrap();
        let status = response.status();
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&body).unwrap())
    }

    async fn eventually_get(
        state: &Arc<AppState>,
        uri: &str,
        check: impl Fn(&serde_json::Value) -> bool,
    ) -> serde_json::Value {
        for _ in 0..200 {
            let (_, body) = call(state, Method::GET, uri).await;
            if check(&body) {
                return body;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("{uri} never satisfied the check");
    }

    #[tokio::test]
    async fn test_health() {
        let state = start().await;
        let (status, body) = call(&state, Method::GET, "/health").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
    }

    #[tokio::test]
    async fn test_join_shows_in_occupancy_and_online() {
        let state = start().await;

        let (status, _) = call(&state, Method::POST, "/presence/lobby/join/bob").await;
        assert_eq!(status, StatusCode::OK);

        let occupancy = eventually_get(&state, "/occupancy", |body| {
            body["lobby"]["member_ids"]
                .as_array()
                .map(|ids| ids.iter().any(|id| id == "bob"))
                .unwrap_or(false)
        })
        .await;
        assert_eq!(occupancy["lobby"]["channel_id"], "lobby");

        eventually_get(&state, "/online", |body| body["bob"] == true).await;

        call(&state, Method::POST, "/presence/lobby/leave/bob").await;
        let online = eventually_get(&state, "/online", |body| body["bob"] == false).await;
        assert_eq!(online["me"], true);
    }

    #[tokio::test]
    async fn test_typing_round_trip() {
        let state = start().await;

        let (status, body) = call(&state, Method::POST, "/typing/lobby/bob/on").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["accepted"], true);

        let (_, typing) = call(&state, Method::GET, "/typing/lobby").await;
        assert_eq!(typing, json!(["bob"]));

        let (_, body) = call(&state, Method::POST, "/typing/lobby/bob/on").await;
        assert_eq!(body["accepted"], false);

        call(&state, Method::POST, "/typing/lobby/bob/off").await;
        eventually_get(&state, "/typing/lobby", |body| *body == json!([])).await;
    }

    #[tokio::test]
    async fn test_json_presence_event() {
        let state = start().await;
        eventually_get(&state, "/occupancy", |body| body["lobby"].is_object()).await;

        let raw = r#"{"channel":"lobby","event":"interval","join":["carol","dave"],"occupancy":3}"#;
        let (status, body) = send(&state, Method::POST, "/presence", Body::from(raw)).await;
        assert_eq!(status, StatusCode::OK);
        assert!(body["delivered"].as_u64().unwrap() > 0);

        let occupancy =
            eventually_get(&state, "/occupancy", |body| body["lobby"]["count"] == 3).await;
        let members = occupancy["lobby"]["member_ids"].as_array().unwrap();
        assert!(members.iter().any(|id| id == "carol"));
        assert!(members.iter().any(|id| id == "dave"));

        let missing_channel = Body::from(r#"{"event":"join"}"#);
        let (status, _) = send(&state, Method::POST, "/presence", missing_channel).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_bad_requests() {
        let state = start().await;

        let (status, _) = call(&state, Method::POST, "/presence/lobby/dance/bob").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) = call(&state, Method::POST, "/typing/lobby/bob/maybe").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) = call(&state, Method::GET, "/typing/nowhere").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }
}
