//! HTTP surface for the bridge: swap lifecycle endpoints, relayer metrics
//! and the health rollup. Thin on purpose — validation beyond what the
//! orchestrator itself performs is not this layer's job.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tower_http::trace::TraceLayer;
use tracing::error;
use uuid::Uuid;

use bridge_core::error::BridgeError;
use bridge_core::health::{self, ChainHealth, HealthReport};
use bridge_core::orchestrator::InitiateRequest;
use bridge_core::relayer::RelayerStats;
use bridge_core::types::{Chain, RelayTask, Swap};

use crate::BridgeNode;

/// Sanitized, security-conscious error body: never leaks the underlying
/// error's full `Debug` representation, only its `Display` message.
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: String,
    pub code: &'static str,
}

impl ApiError {
    fn into_body(self) -> (StatusCode, ErrorBody) {
        let (status, code) = match &self.0 {
            BridgeError::Validation(_) => (StatusCode::BAD_REQUEST, "validation"),
            BridgeError::AlreadyInState(_) => (StatusCode::CONFLICT, "already_in_state"),
            BridgeError::TimelockNotExpired { .. } => (StatusCode::CONFLICT, "timelock_not_expired"),
            BridgeError::CircuitOpen { .. } => (StatusCode::SERVICE_UNAVAILABLE, "circuit_open"),
            BridgeError::ChainUnavailable { .. } => (StatusCode::BAD_GATEWAY, "chain_unavailable"),
            BridgeError::RateLimited { .. } => (StatusCode::TOO_MANY_REQUESTS, "rate_limited"),
            BridgeError::Timeout { .. } => (StatusCode::GATEWAY_TIMEOUT, "timeout"),
            BridgeError::InvalidPreimage => (StatusCode::BAD_REQUEST, "invalid_preimage"),
            BridgeError::InvariantViolation(_) => (StatusCode::INTERNAL_SERVER_ERROR, "invariant_violation"),
            BridgeError::RetryExhausted { .. } => (StatusCode::BAD_GATEWAY, "retry_exhausted"),
            BridgeError::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "internal"),
        };
        (status, ErrorBody { error: self.0.to_string(), code })
    }
}

/// Wraps a `BridgeError` so it can be returned directly from a handler.
pub struct ApiError(BridgeError);

impl From<BridgeError> for ApiError {
    fn from(err: BridgeError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, body) = self.into_body();
        (status, Json(body)).into_response()
    }
}

/// The swap as returned to clients: identical to the stored `Swap` minus
/// the secret preimage, which is never exposed once revealed.
#[derive(Debug, Serialize)]
pub struct SwapView {
    #[serde(flatten)]
    pub swap: Swap,
}

impl From<Swap> for SwapView {
    fn from(mut swap: Swap) -> Self {
        swap.secret = None;
        Self { swap }
    }
}

#[derive(Debug, Serialize)]
pub struct InitiateResponse {
    pub swap_id: Uuid,
}

#[derive(Debug, Serialize)]
pub struct SuccessResponse {
    pub success: bool,
}

#[derive(Debug, Serialize)]
pub struct SwapStatusResponse {
    pub swap: SwapView,
    pub relayer_tasks: Vec<RelayTask>,
}

#[derive(Debug, Serialize)]
pub struct SwapListResponse {
    pub swaps: Vec<SwapView>,
    pub count: usize,
}

#[derive(Debug, Serialize)]
pub struct RelayerMetricsResponse {
    pub pending_tasks: usize,
    pub processing_tasks: usize,
    pub completed_tasks: usize,
    pub failed_tasks: usize,
    pub total_tasks: usize,
    pub success_rate: f64,
    pub avg_execution_ms: f64,
    pub last_processed_at: Option<DateTime<Utc>>,
}

impl From<RelayerStats> for RelayerMetricsResponse {
    fn from(stats: RelayerStats) -> Self {
        Self {
            pending_tasks: stats.pending,
            processing_tasks: stats.processing,
            completed_tasks: stats.completed,
            failed_tasks: stats.failed,
            total_tasks: stats.total,
            success_rate: stats.success_rate,
            avg_execution_ms: stats.avg_execution_ms,
            last_processed_at: stats.last_processed_at,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub orchestrator: HealthReport,
    pub relayer: RelayerMetricsResponse,
    pub timestamp: i64,
}

pub fn router(node: Arc<BridgeNode>) -> Router {
    Router::new()
        .route("/swap/initiate", post(initiate_swap))
        .route("/swap/complete/{id}", post(complete_swap))
        .route("/swap/refund/{id}", post(refund_swap))
        .route("/swap/status/{id}", get(swap_status))
        .route("/swap/all", get(list_swaps))
        .route("/relayer/metrics", get(relayer_metrics))
        .route("/health", get(health_rollup))
        .layer(TraceLayer::new_for_http())
        .with_state(node)
}

async fn initiate_swap(
    State(node): State<Arc<BridgeNode>>,
    Json(req): Json<InitiateRequest>,
) -> Result<Json<InitiateResponse>, ApiError> {
    let swap_id = node.orchestrator.initiate(req).await?;
    Ok(Json(InitiateResponse { swap_id }))
}

async fn complete_swap(
    State(node): State<Arc<BridgeNode>>,
    Path(id): Path<Uuid>,
) -> Result<Json<SuccessResponse>, ApiError> {
    node.orchestrator.force_complete(id).await?;
    Ok(Json(SuccessResponse { success: true }))
}

async fn refund_swap(
    State(node): State<Arc<BridgeNode>>,
    Path(id): Path<Uuid>,
) -> Result<Json<SuccessResponse>, ApiError> {
    node.orchestrator.force_refund(id).await?;
    Ok(Json(SuccessResponse { success: true }))
}

async fn swap_status(
    State(node): State<Arc<BridgeNode>>,
    Path(id): Path<Uuid>,
) -> Result<Json<SwapStatusResponse>, ApiError> {
    let swap = node
        .repository
        .get(id)
        .ok_or_else(|| ApiError(BridgeError::Validation("swap not found".into())))?;
    let relayer_tasks = node.relayer.tasks_for_swap(id);
    Ok(Json(SwapStatusResponse {
        swap: swap.into(),
        relayer_tasks,
    }))
}

async fn list_swaps(State(node): State<Arc<BridgeNode>>) -> Json<SwapListResponse> {
    let swaps: Vec<SwapView> = node.repository.list_all().into_iter().map(SwapView::from).collect();
    let count = swaps.len();
    Json(SwapListResponse { swaps, count })
}

async fn relayer_metrics(State(node): State<Arc<BridgeNode>>) -> Json<RelayerMetricsResponse> {
    Json(node.relayer.stats().into())
}

async fn health_rollup(State(node): State<Arc<BridgeNode>>) -> Json<HealthResponse> {
    let mut chains = Vec::with_capacity(2);
    for chain in [Chain::A, Chain::B] {
        let Some(monitor) = node.monitors.get(&chain) else { continue };
        let monitor_health = monitor.health().await;
        let breaker_open = node.resilience.breaker_open(chain).await;
        let status = health::chain_status(&monitor_health, breaker_open);
        chains.push(ChainHealth {
            chain,
            monitor: monitor_health.into(),
            breaker_open,
            status,
        });
    }
    let status = health::overall_status(&chains);
    let report = HealthReport {
        status,
        chains,
        active_swaps: node.repository.list_non_terminal().len(),
        relayer_pending_tasks: node.relayer.pending_count(),
    };

    if report.status != health::HealthStatus::Healthy {
        error!(status = ?report.status, "bridge health is not fully healthy");
    }

    Json(HealthResponse {
        orchestrator: report,
        relayer: node.relayer.stats().into(),
        timestamp: chrono::Utc::now().timestamp(),
    })
}
