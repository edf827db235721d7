use crate::observer::PageSignal;
use crate::stats::StatsCollector;
use crate::tracker::types::WebsiteEvent;
use crate::tracker::{EventTracker, SuspensionTracker, TokenTracker};
use axum::{
    extract::{Json as AxumJson, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use std::sync::Arc;
use tokio::sync::mpsc::Sender;
use tracing::warn;

struct ApiState {
    events: EventTracker,
    suspensions: SuspensionTracker,
    tokens: TokenTracker,
    stats: Arc<StatsCollector>,
    signal_sender: Sender<PageSignal>,
}

#[allow(clippy::too_many_arguments)]
pub async fn start_api_server(
    events: EventTracker,
    suspensions: SuspensionTracker,
    tokens: TokenTracker,
    stats: Arc<StatsCollector>,
    signal_sender: Sender<PageSignal>,
    host: String,
    port: u16,
) {
    let state = Arc::new(ApiState {
        events,
        suspensions,
        tokens,
        stats,
        signal_sender,
    });

    let app = Router::new()
        .route("/api/events", get(get_events))
        .route("/api/events/clear", post(clear_events))
        .route("/api/events/clear_range", post(clear_events_range))
        .route("/api/events/clear_domains", post(clear_events_domains))
        .route("/api/suspensions", get(get_suspensions).post(set_suspensions))
        .route("/api/suspensions/check", get(check_suspension))
        .route("/api/tokens", get(get_tokens))
        .route("/api/tokens/start", post(start_token))
        .route("/api/tokens/stop", post(stop_token))
        .route("/api/stats", get(get_stats))
        .route("/api/signal", post(inject_signal))
        .with_state(state);

    let addr = std::net::SocketAddr::new(host.parse().unwrap(), port);
    tracing::info!("API Server listening on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await.unwrap();
    axum::serve(listener, app).await.unwrap();
}

#[derive(serde::Deserialize)]
struct EventsQuery {
    #[serde(default)]
    start_ms: u64,
    #[serde(default = "default_end_ms")]
    end_ms: u64,
}

fn default_end_ms() -> u64 {
    u64::MAX
}

async fn get_events(
    State(state): State<Arc<ApiState>>,
    Query(query): Query<EventsQuery>,
) -> Result<Json<Vec<WebsiteEvent>>, ApiError> {
    let events = state.events.query_events(query.start_ms, query.end_ms).await?;
    Ok(Json(events))
}

async fn clear_events(State(state): State<Arc<ApiState>>) -> impl IntoResponse {
    // Deletion failures stop at this surface: log, report, move on.
    match state.events.clear_all().await {
        Ok(()) => Json(serde_json::json!({ "status": "cleared" })).into_response(),
        Err(e) => {
            warn!("Clear-all request failed: {:#}", e);
            ApiError::from(e).into_response()
        }
    }
}

#[derive(serde::Deserialize)]
struct ClearRangeRequest {
    start_ms: u64,
    end_ms: u64,
}

async fn clear_events_range(
    State(state): State<Arc<ApiState>>,
    AxumJson(payload): AxumJson<ClearRangeRequest>,
) -> impl IntoResponse {
    match state
        .events
        .clear_range(payload.start_ms, payload.end_ms)
        .await
    {
        Ok(()) => Json(serde_json::json!({ "status": "cleared" })).into_response(),
        Err(e) => {
            warn!("Clear-range request failed: {:#}", e);
            ApiError::from(e).into_response()
        }
    }
}

#[derive(serde::Deserialize)]
struct ClearDomainsRequest {
    domains: Vec<String>,
}

async fn clear_events_domains(
    State(state): State<Arc<ApiState>>,
    AxumJson(payload): AxumJson<ClearDomainsRequest>,
) -> impl IntoResponse {
    match state.events.clear_by_domains(payload.domains).await {
        Ok(()) => Json(serde_json::json!({ "status": "cleared" })).into_response(),
        Err(e) => {
            warn!("Clear-domains request failed: {:#}", e);
            ApiError::from(e).into_response()
        }
    }
}

async fn get_suspensions(
    State(state): State<Arc<ApiState>>,
) -> Result<Json<Vec<String>>, ApiError> {
    Ok(Json(state.suspensions.get_all_suspended().await?))
}

#[derive(serde::Deserialize)]
struct SuspendRequest {
    domains: Vec<String>,
    suspended: bool,
}

async fn set_suspensions(
    State(state): State<Arc<ApiState>>,
    AxumJson(payload): AxumJson<SuspendRequest>,
) -> Result<impl IntoResponse, ApiError> {
    state
        .suspensions
        .set_suspended(payload.domains, payload.suspended)
        .await?;
    Ok(Json(
        serde_json::json!({ "status": "ok", "suspended": payload.suspended }),
    ))
}

#[derive(serde::Deserialize)]
struct CheckQuery {
    fqdn: String,
}

async fn check_suspension(
    State(state): State<Arc<ApiState>>,
    Query(query): Query<CheckQuery>,
) -> impl IntoResponse {
    let suspended = state.suspensions.is_suspended(&query.fqdn);
    Json(serde_json::json!({ "fqdn": query.fqdn, "suspended": suspended }))
}

async fn get_tokens(State(state): State<Arc<ApiState>>) -> Result<Json<Vec<String>>, ApiError> {
    Ok(Json(state.tokens.get_all_tokens().await?))
}

#[derive(serde::Deserialize)]
struct StartTokenRequest {
    fqdn: String,
}

async fn start_token(
    State(state): State<Arc<ApiState>>,
    AxumJson(payload): AxumJson<StartTokenRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let token = state.tokens.start_tracking(payload.fqdn).await?;
    Ok(Json(serde_json::json!({ "token": token })))
}

#[derive(serde::Deserialize)]
struct StopTokenRequest {
    token: String,
}

async fn stop_token(
    State(state): State<Arc<ApiState>>,
    AxumJson(payload): AxumJson<StopTokenRequest>,
) -> Result<impl IntoResponse, ApiError> {
    state.tokens.stop_tracking(payload.token).await?;
    Ok(Json(serde_json::json!({ "status": "stopped" })))
}

async fn get_stats(State(state): State<Arc<ApiState>>) -> impl IntoResponse {
    Json(state.stats.get_snapshot())
}

async fn inject_signal(
    State(state): State<Arc<ApiState>>,
    AxumJson(signal): AxumJson<PageSignal>,
) -> impl IntoResponse {
    match state.signal_sender.send(signal).await {
        Ok(()) => Json(serde_json::json!({ "status": "accepted" })).into_response(),
        Err(_) => ApiError::observer_stopped().into_response(),
    }
}

/// Maps internal failures onto a JSON 500 body.
struct ApiError(anyhow::Error);

impl ApiError {
    fn observer_stopped() -> Self {
        Self(anyhow::anyhow!("page view observer stopped"))
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(e: anyhow::Error) -> Self {
        Self(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(serde_json::json!({ "error": format!("{:#}", self.0) })),
        )
            .into_response()
    }
}
