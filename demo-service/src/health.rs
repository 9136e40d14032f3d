use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use shared::protocol::HEALTH_PATH;
use shared::types::HealthReport;
use crate::config::ServiceConfig;

/// Counters behind the simulated health endpoint
pub struct HealthState {
    started: Instant,
    request_count: AtomicU64,
    error_count: AtomicU64,
    error_probability: f64,
    error_message: String,
    attributes: HashMap<String, String>,
}

impl HealthState {
    pub fn new(config: &ServiceConfig) -> Self {
        Self {
            started: Instant::now(),
            request_count: AtomicU64::new(0),
            error_count: AtomicU64::new(0),
            error_probability: config.error_probability,
            error_message: config.error_message.clone(),
            attributes: config.attributes.clone(),
        }
    }
}

pub fn router(state: Arc<HealthState>) -> Router {
    Router::new()
        .route(HEALTH_PATH, get(health))
        .with_state(state)
}

async fn health(State(state): State<Arc<HealthState>>) -> Response {
    let request_count = state.request_count.fetch_add(1, Ordering::SeqCst) + 1;

    if rand::random::<f64>() < state.error_probability {
        let errors = state.error_count.fetch_add(1, Ordering::SeqCst) + 1;
        tracing::debug!("Simulated failure ({} of {} requests)", errors, request_count);
        return (StatusCode::INTERNAL_SERVER_ERROR, state.error_message.clone()).into_response();
    }

    Json(HealthReport {
        uptime_sec: state.started.elapsed().as_secs(),
        request_count,
        error_count: state.error_count.load(Ordering::SeqCst),
        attributes: state.attributes.clone(),
    })
    .into_response()
}
