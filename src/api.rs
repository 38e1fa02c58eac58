//! REST endpoints: flow CRUD, customer enrollment, engine trigger, stats.
//!
//! The engine itself has no HTTP surface of its own — these routes are the
//! operational wrapper: an external scheduler POSTs the run endpoint, the
//! flow editor manages flows and steps, and integrations register webhook
//! URLs per event.

use std::str::FromStr;
use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post, put};
use axum::{Json, Router};
use chrono::Utc;
use serde::Deserialize;
use tower_http::cors::CorsLayer;
use uuid::Uuid;

use crate::engine::FlowEngine;
use crate::error::DatabaseError;
use crate::model::{NewStep, StepContent, StepKind};
use crate::store::Store;
use crate::webhook::{WebhookEvent, WebhookSink};

/// Shared state for the API routes.
#[derive(Clone)]
pub struct ApiState {
    pub store: Arc<dyn Store>,
    pub engine: Arc<FlowEngine>,
    pub webhooks: Arc<dyn WebhookSink>,
}

/// Build the API router.
pub fn api_routes(state: ApiState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/automation/run", post(run_pass))
        .route("/api/automation/stats", get(stats))
        .route("/api/flows", post(create_flow).get(list_flows))
        .route(
            "/api/flows/{id}",
            get(get_flow).put(rename_flow).delete(delete_flow),
        )
        .route("/api/flows/{id}/steps", put(save_steps))
        .route("/api/flows/{id}/customers", post(add_customer))
        .route("/api/enrollments/pause", post(pause_enrollment))
        .route("/api/enrollments/resume", post(resume_enrollment))
        .route("/api/customers/{email}/progress", get(customer_progress))
        .route("/api/webhooks", put(register_webhook))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

// ── Error mapping ───────────────────────────────────────────────────

fn db_error(e: DatabaseError) -> (StatusCode, Json<serde_json::Value>) {
    let status = match &e {
        DatabaseError::NotFound { .. } => StatusCode::NOT_FOUND,
        DatabaseError::InvalidStepContent { .. } | DatabaseError::Constraint(_) => {
            StatusCode::UNPROCESSABLE_ENTITY
        }
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    if status == StatusCode::INTERNAL_SERVER_ERROR {
        tracing::error!("API database error: {e}");
    }
    (status, Json(serde_json::json!({ "error": e.to_string() })))
}

fn bad_request(message: &str) -> (StatusCode, Json<serde_json::Value>) {
    (
        StatusCode::UNPROCESSABLE_ENTITY,
        Json(serde_json::json!({ "error": message })),
    )
}

// ── Handlers ────────────────────────────────────────────────────────

/// GET /health
async fn health() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "ok" }))
}

/// POST /api/automation/run
///
/// Trigger one engine pass. This is what an external cron hits; the
/// response carries the pass counters.
async fn run_pass(State(state): State<ApiState>) -> impl IntoResponse {
    match state.engine.run_pass().await {
        Ok(summary) => Json(serde_json::json!({
            "success": true,
            "summary": summary,
        }))
        .into_response(),
        Err(e) => {
            tracing::error!("Triggered engine pass failed: {e}");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(serde_json::json!({ "success": false, "error": e.to_string() })),
            )
                .into_response()
        }
    }
}

/// GET /api/automation/stats
async fn stats(State(state): State<ApiState>) -> impl IntoResponse {
    match state.store.automation_stats(Utc::now()).await {
        Ok(stats) => Json(stats).into_response(),
        Err(e) => db_error(e).into_response(),
    }
}

#[derive(Deserialize)]
struct CreateFlowRequest {
    user_id: String,
    name: String,
}

/// POST /api/flows
async fn create_flow(
    State(state): State<ApiState>,
    Json(req): Json<CreateFlowRequest>,
) -> impl IntoResponse {
    match state.store.create_flow(&req.user_id, &req.name).await {
        Ok(flow) => (StatusCode::CREATED, Json(flow)).into_response(),
        Err(e) => db_error(e).into_response(),
    }
}

#[derive(Deserialize)]
struct ListFlowsQuery {
    user_id: String,
}

/// GET /api/flows?user_id=...
async fn list_flows(
    State(state): State<ApiState>,
    Query(query): Query<ListFlowsQuery>,
) -> impl IntoResponse {
    match state.store.list_flows(&query.user_id).await {
        Ok(flows) => Json(flows).into_response(),
        Err(e) => db_error(e).into_response(),
    }
}

/// GET /api/flows/{id}
async fn get_flow(State(state): State<ApiState>, Path(id): Path<Uuid>) -> impl IntoResponse {
    match state.store.get_flow(id).await {
        Ok(Some((flow, steps))) => Json(serde_json::json!({
            "flow": flow,
            "steps": steps,
        }))
        .into_response(),
        Ok(None) => (
            StatusCode::NOT_FOUND,
            Json(serde_json::json!({ "error": "Flow not found" })),
        )
            .into_response(),
        Err(e) => db_error(e).into_response(),
    }
}

#[derive(Deserialize)]
struct RenameFlowRequest {
    name: String,
}

/// PUT /api/flows/{id}
async fn rename_flow(
    State(state): State<ApiState>,
    Path(id): Path<Uuid>,
    Json(req): Json<RenameFlowRequest>,
) -> impl IntoResponse {
    match state.store.rename_flow(id, &req.name).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => db_error(e).into_response(),
    }
}

/// DELETE /api/flows/{id}
async fn delete_flow(State(state): State<ApiState>, Path(id): Path<Uuid>) -> impl IntoResponse {
    match state.store.delete_flow(id).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => db_error(e).into_response(),
    }
}

/// A step as submitted by the flow editor.
#[derive(Deserialize)]
struct StepPayload {
    #[serde(rename = "type")]
    kind: String,
    content: serde_json::Value,
}

#[derive(Deserialize)]
struct SaveStepsRequest {
    steps: Vec<StepPayload>,
}

/// PUT /api/flows/{id}/steps
///
/// Replaces the flow's step list wholesale. Step content is validated
/// against its kind before anything is written.
async fn save_steps(
    State(state): State<ApiState>,
    Path(id): Path<Uuid>,
    Json(req): Json<SaveStepsRequest>,
) -> impl IntoResponse {
    let mut steps = Vec::with_capacity(req.steps.len());
    for payload in req.steps {
        let kind = match StepKind::from_str(&payload.kind) {
            Ok(kind) => kind,
            Err(e) => return db_error(e).into_response(),
        };
        let content = match StepContent::decode(kind, &payload.content.to_string()) {
            Ok(content) => content,
            Err(e) => return db_error(e).into_response(),
        };
        steps.push(NewStep { content });
    }

    match state.store.get_flow(id).await {
        Ok(Some(_)) => {}
        Ok(None) => {
            return (
                StatusCode::NOT_FOUND,
                Json(serde_json::json!({ "error": "Flow not found" })),
            )
                .into_response();
        }
        Err(e) => return db_error(e).into_response(),
    }

    match state.store.save_steps(id, steps).await {
        Ok(saved) => Json(saved).into_response(),
        Err(e) => db_error(e).into_response(),
    }
}

#[derive(Deserialize)]
struct AddCustomerRequest {
    email: String,
    name: Option<String>,
}

/// POST /api/flows/{id}/customers
///
/// Upsert the customer by email and enroll them at step 0, immediately
/// due. Fires the `customer.added` webhook for the flow's owner.
async fn add_customer(
    State(state): State<ApiState>,
    Path(id): Path<Uuid>,
    Json(req): Json<AddCustomerRequest>,
) -> impl IntoResponse {
    let flow = match state.store.get_flow(id).await {
        Ok(Some((flow, _))) => flow,
        Ok(None) => {
            return (
                StatusCode::NOT_FOUND,
                Json(serde_json::json!({ "error": "Flow not found" })),
            )
                .into_response();
        }
        Err(e) => return db_error(e).into_response(),
    };

    let customer = match state
        .store
        .upsert_customer(&req.email, req.name.as_deref())
        .await
    {
        Ok(customer) => customer,
        Err(e) => return db_error(e).into_response(),
    };

    let now = Utc::now();
    let enrollment = match state.store.create_enrollment(customer.id, id, now).await {
        Ok(enrollment) => enrollment,
        Err(e) => return db_error(e).into_response(),
    };

    state
        .webhooks
        .dispatch(
            &flow.user_id,
            WebhookEvent::CustomerAdded,
            serde_json::json!({
                "customer": customer,
                "onboarding": { "id": flow.id, "name": flow.name },
                "addedAt": now,
            }),
        )
        .await;

    (
        StatusCode::CREATED,
        Json(serde_json::json!({
            "customer": customer,
            "enrollment": enrollment,
        })),
    )
        .into_response()
}

#[derive(Deserialize)]
struct EnrollmentRef {
    customer_id: Uuid,
    flow_id: Uuid,
}

/// POST /api/enrollments/pause
async fn pause_enrollment(
    State(state): State<ApiState>,
    Json(req): Json<EnrollmentRef>,
) -> impl IntoResponse {
    set_status(&state, req, crate::model::EnrollmentStatus::Paused, None).await
}

/// POST /api/enrollments/resume
///
/// Resumed enrollments become immediately due.
async fn resume_enrollment(
    State(state): State<ApiState>,
    Json(req): Json<EnrollmentRef>,
) -> impl IntoResponse {
    set_status(
        &state,
        req,
        crate::model::EnrollmentStatus::Active,
        Some(Utc::now()),
    )
    .await
}

async fn set_status(
    state: &ApiState,
    req: EnrollmentRef,
    status: crate::model::EnrollmentStatus,
    next_action_at: Option<chrono::DateTime<Utc>>,
) -> axum::response::Response {
    match state
        .store
        .set_enrollment_status(req.customer_id, req.flow_id, status, next_action_at)
        .await
    {
        Ok(true) => StatusCode::NO_CONTENT.into_response(),
        Ok(false) => (
            StatusCode::NOT_FOUND,
            Json(serde_json::json!({ "error": "Enrollment not found" })),
        )
            .into_response(),
        Err(e) => db_error(e).into_response(),
    }
}

/// GET /api/customers/{email}/progress
async fn customer_progress(
    State(state): State<ApiState>,
    Path(email): Path<String>,
) -> impl IntoResponse {
    let customer = match state.store.get_customer_by_email(&email).await {
        Ok(Some(customer)) => customer,
        Ok(None) => {
            return (
                StatusCode::NOT_FOUND,
                Json(serde_json::json!({ "error": "Customer not found" })),
            )
                .into_response();
        }
        Err(e) => return db_error(e).into_response(),
    };

    match state.store.customer_progress(customer.id).await {
        Ok(progress) => Json(progress).into_response(),
        Err(e) => db_error(e).into_response(),
    }
}

#[derive(Deserialize)]
struct RegisterWebhookRequest {
    user_id: String,
    event: String,
    target_url: String,
}

const KNOWN_EVENTS: &[&str] = &["onboarding.completed", "customer.added", "step.completed"];

/// PUT /api/webhooks
///
/// Register (or replace) the single webhook URL a user holds per event.
async fn register_webhook(
    State(state): State<ApiState>,
    Json(req): Json<RegisterWebhookRequest>,
) -> impl IntoResponse {
    if !KNOWN_EVENTS.contains(&req.event.as_str()) {
        return bad_request(&format!("Unknown webhook event '{}'", req.event)).into_response();
    }
    if !req.target_url.starts_with("http://") && !req.target_url.starts_with("https://") {
        return bad_request("target_url must be an http(s) URL").into_response();
    }

    match state
        .store
        .upsert_webhook(&req.user_id, &req.event, &req.target_url)
        .await
    {
        Ok(registration) => Json(registration).into_response(),
        Err(e) => db_error(e).into_response(),
    }
}
