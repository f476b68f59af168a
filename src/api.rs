use axum::{
    extract::{Json, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use chrono::{Local, NaiveDate};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::limit::RequestBodyLimitLayer;

use crate::metrics;
use crate::notifications::{NotificationQuery, NotificationService};
use crate::snooze::SnoozeGate;
use crate::store::{NotificationStore, SnoozePreferenceStore};

// Request and response models
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct NotificationsParams {
    quantum_id: String,
    from: Option<NaiveDate>,
    to: Option<NaiveDate>,
    unprocessed_only: Option<bool>,
    process_on_read: Option<bool>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SubjectParams {
    quantum_id: String,
}

#[derive(Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
struct SnoozeRequest {
    quantum_id: String,
    snooze_until: NaiveDate,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SnoozeResponse {
    snooze_until: Option<NaiveDate>,
}

// API state
pub struct ApiState<S, P> {
    pub notifications: NotificationService<S, P>,
    pub snooze: Arc<SnoozeGate<P>>,
}

// Set up API router
pub fn create_api_router<S, P>(state: Arc<ApiState<S, P>>) -> Router
where
    S: NotificationStore + Send + Sync + 'static,
    P: SnoozePreferenceStore + Send + Sync + 'static,
{
    Router::new()
        .route("/notifications", get(list_notifications::<S, P>))
        .route(
            "/preferences/snooze",
            get(get_snooze::<S, P>).put(update_snooze::<S, P>),
        )
        .route("/metrics", get(|| async { metrics::metrics_handler() }))
        .route("/health", get(|| async { "OK" }))
        .with_state(state)
        .layer(RequestBodyLimitLayer::new(64 * 1024))
        .layer(CorsLayer::permissive())
}

fn bad_request(message: &str) -> Response {
    (StatusCode::BAD_REQUEST, message.to_string()).into_response()
}

fn server_error(e: impl std::fmt::Display) -> Response {
    (StatusCode::INTERNAL_SERVER_ERROR, format!("Database error: {}", e)).into_response()
}

// API handlers
async fn list_notifications<S, P>(
    State(state): State<Arc<ApiState<S, P>>>,
    Query(params): Query<NotificationsParams>,
) -> Response
where
    S: NotificationStore + Send + Sync + 'static,
    P: SnoozePreferenceStore + Send + Sync + 'static,
{
    if params.quantum_id.trim().is_empty() {
        return bad_request("quantumId must not be blank");
    }

    let query = NotificationQuery {
        quantum_id: params.quantum_id,
        from: params.from,
        to: params.to,
        unprocessed_only: params.unprocessed_only.unwrap_or(false),
        process_on_read: params.process_on_read.unwrap_or(true),
    };

    match state
        .notifications
        .list_notifications(&query, Local::now().date_naive())
        .await
    {
        Ok(views) => Json(views).into_response(),
        Err(e) => {
            tracing::error!(quantum_id = %query.quantum_id, error = %e, "Error listing notifications");
            server_error(e)
        }
    }
}

async fn get_snooze<S, P>(
    State(state): State<Arc<ApiState<S, P>>>,
    Query(params): Query<SubjectParams>,
) -> Response
where
    S: NotificationStore + Send + Sync + 'static,
    P: SnoozePreferenceStore + Send + Sync + 'static,
{
    match state
        .snooze
        .active_snooze(&params.quantum_id, Local::now().date_naive())
        .await
    {
        Ok(snooze_until) => Json(SnoozeResponse { snooze_until }).into_response(),
        Err(e) => {
            tracing::error!(quantum_id = %params.quantum_id, error = %e, "Error fetching snooze preference");
            server_error(e)
        }
    }
}

async fn update_snooze<S, P>(
    State(state): State<Arc<ApiState<S, P>>>,
    Json(req): Json<SnoozeRequest>,
) -> Response
where
    S: NotificationStore + Send + Sync + 'static,
    P: SnoozePreferenceStore + Send + Sync + 'static,
{
    if req.quantum_id.trim().is_empty() {
        return bad_request("quantumId must not be blank");
    }

    tracing::info!(quantum_id = %req.quantum_id, snooze_until = %req.snooze_until, "Updating snooze preference");
    match state.snooze.set_snooze(&req.quantum_id, req.snooze_until).await {
        Ok(()) => Json(SnoozeResponse {
            snooze_until: Some(req.snooze_until),
        })
        .into_response(),
        Err(e) => {
            tracing::error!(quantum_id = %req.quantum_id, error = %e, "Error updating snooze preference");
            server_error(e)
        }
    }
}
