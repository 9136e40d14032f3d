use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use shared::protocol::{METRICS_PATH, REGISTER_PATH};
use shared::types::{MetricsView, RegistrationRequest, ServiceRecord};
use crate::directory::ServiceDirectory;

#[derive(Clone)]
pub struct AppState {
    pub directory: ServiceDirectory,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route(REGISTER_PATH, post(register))
        .route(METRICS_PATH, get(get_metrics))
        .route("/metrics/:id", get(get_service_metrics))
        .with_state(state)
}

async fn register(
    State(state): State<AppState>,
    payload: Result<Json<RegistrationRequest>, JsonRejection>,
) -> Result<StatusCode, (StatusCode, String)> {
    let Json(req) = payload.map_err(|e| {
        tracing::warn!("Rejected registration: {}", e.body_text());
        (StatusCode::BAD_REQUEST, format!("invalid json: {}", e.body_text()))
    })?;

    let id = req.id.clone();
    let endpoint = req.url.clone();

    state
        .directory
        .register(ServiceRecord::from(req))
        .await
        .map_err(|e| {
            tracing::warn!("Rejected registration: {}", e);
            (StatusCode::BAD_REQUEST, e.to_string())
        })?;

    tracing::info!(
        "Registered service {} at {} ({} registered)",
        id,
        endpoint,
        state.directory.len().await
    );
    Ok(StatusCode::CREATED)
}

async fn get_metrics(State(state): State<AppState>) -> Json<Vec<MetricsView>> {
    let now = Utc::now();
    let mut views: Vec<MetricsView> = state
        .directory
        .list_snapshot()
        .await
        .iter()
        .map(|record| MetricsView::from_record(record, now))
        .collect();
    views.sort_by(|a, b| a.service.cmp(&b.service));

    Json(views)
}

async fn get_service_metrics(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<MetricsView>, StatusCode> {
    state
        .directory
        .get(&id)
        .await
        .map(|record| Json(MetricsView::from_record(&record, Utc::now())))
        .ok_or(StatusCode::NOT_FOUND)
}
