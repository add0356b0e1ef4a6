//! REST API for the governance-session engine
//!
//! Each flow is mounted under `/api/{flow}` with the same five session
//! routes plus its terminal actions. Every response uses the
//! `ApiResponse` envelope.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::error::GovernanceError;
use crate::flows::{
    Engine, FlowController, PortfolioSetupController, QuarterlyReviewController,
    QuickAuditController,
};
use crate::session::Session;

/// =============================
/// Request Models
/// =============================

#[derive(Debug, Default, Deserialize)]
pub struct StartRequest {
    pub user_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct AnswerRequest {
    pub answer: String,
}

/// =============================
/// Response Wrapper
/// =============================

#[derive(Debug, Serialize, Deserialize)]
pub struct ApiResponse {
    pub success: bool,
    pub data: Option<serde_json::Value>,
    pub error: Option<String>,
    pub timestamp: String,
}

impl ApiResponse {
    pub fn success<T: Serialize>(data: T) -> Self {
        Self {
            success: true,
            data: serde_json::to_value(data).ok(),
            error: None,
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }

    pub fn error(message: String) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(message),
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }
}

type Reply = (StatusCode, Json<ApiResponse>);

/// =============================
/// Helpers
/// =============================

fn stable_uuid_from_string(input: &str) -> Uuid {
    use sha2::{Digest, Sha256};

    let hash = Sha256::digest(input.as_bytes());
    let mut bytes = [0u8; 16];
    bytes.copy_from_slice(&hash[..16]);

    // Set UUID version (4) and variant (RFC4122) bits.
    bytes[6] = (bytes[6] & 0x0f) | 0x40;
    bytes[8] = (bytes[8] & 0x3f) | 0x80;

    Uuid::from_bytes(bytes)
}

/// User ids may be UUIDs or any stable external handle.
fn parse_user_id(value: Option<&str>) -> Uuid {
    match value {
        Some(v) if !v.trim().is_empty() => {
            Uuid::parse_str(v).unwrap_or_else(|_| stable_uuid_from_string(v))
        }
        _ => stable_uuid_from_string("anonymous-user"),
    }
}

pub fn status_for(error: &GovernanceError) -> StatusCode {
    match error {
        GovernanceError::SessionNotFound(_) | GovernanceError::NotFound(_) => StatusCode::NOT_FOUND,
        GovernanceError::SessionClosed(_)
        | GovernanceError::ConcurrentModification(_)
        | GovernanceError::InvalidTransition { .. } => StatusCode::CONFLICT,
        e if e.is_validation() => StatusCode::UNPROCESSABLE_ENTITY,
        GovernanceError::Generation { .. } | GovernanceError::RetriesExhausted { .. } => {
            StatusCode::BAD_GATEWAY
        }
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn reply<C: FlowController>(
    controller: &C,
    result: crate::Result<Session<C::State, C::Data>>,
) -> Reply {
    match result {
        Ok(session) => {
            let body = serde_json::json!({
                "current_question": controller.current_question(&session),
                "progress": session.progress(),
                "session": session,
            });
            (StatusCode::OK, Json(ApiResponse::success(body)))
        }
        Err(e) => {
            let status = status_for(&e);
            if status.is_server_error() {
                error!(error = %e, "Request failed");
            } else {
                warn!(status = status.as_u16(), error = %e, "Request rejected");
            }
            (status, Json(ApiResponse::error(e.to_string())))
        }
    }
}

/// =============================
/// Health Endpoint
/// =============================

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now().to_rfc3339()
    }))
}

/// =============================
/// Session Endpoints (every flow)
/// =============================

async fn start_session<C: FlowController>(
    State(controller): State<Arc<C>>,
    Json(req): Json<StartRequest>,
) -> Reply {
    let user_id = parse_user_id(req.user_id.as_deref());
    let result = controller.start_session(user_id).await;
    reply(controller.as_ref(), result)
}

async fn load_session<C: FlowController>(
    State(controller): State<Arc<C>>,
    Path(session_id): Path<Uuid>,
) -> Reply {
    let result = controller.load_session(session_id).await;
    reply(controller.as_ref(), result)
}

async fn process_answer<C: FlowController>(
    State(controller): State<Arc<C>>,
    Path(session_id): Path<Uuid>,
    Json(req): Json<AnswerRequest>,
) -> Reply {
    let result = controller.process_answer(session_id, &req.answer).await;
    reply(controller.as_ref(), result)
}

async fn skip_vagueness_gate<C: FlowController>(
    State(controller): State<Arc<C>>,
    Path(session_id): Path<Uuid>,
) -> Reply {
    let result = controller.skip_vagueness_gate(session_id).await;
    reply(controller.as_ref(), result)
}

async fn abandon<C: FlowController>(
    State(controller): State<Arc<C>>,
    Path(session_id): Path<Uuid>,
) -> Reply {
    let result = controller.abandon(session_id).await;
    reply(controller.as_ref(), result)
}

fn flow_routes<C: FlowController>() -> Router<Arc<C>> {
    Router::new()
        .route("/sessions", post(start_session::<C>))
        .route("/sessions/:id", get(load_session::<C>))
        .route("/sessions/:id/answer", post(process_answer::<C>))
        .route("/sessions/:id/skip", post(skip_vagueness_gate::<C>))
        .route("/sessions/:id/abandon", post(abandon::<C>))
}

/// =============================
/// Terminal Actions
/// =============================

async fn quick_generate(
    State(controller): State<Arc<QuickAuditController>>,
    Path(session_id): Path<Uuid>,
) -> Reply {
    let result = controller.generate_output(session_id).await;
    reply(controller.as_ref(), result)
}

async fn setup_publish(
    State(controller): State<Arc<PortfolioSetupController>>,
    Path(session_id): Path<Uuid>,
) -> Reply {
    let result = controller.publish_portfolio(session_id).await;
    reply(controller.as_ref(), result)
}

async fn quarterly_bet(
    State(controller): State<Arc<QuarterlyReviewController>>,
    Path(session_id): Path<Uuid>,
) -> Reply {
    let result = controller.create_new_bet(session_id).await;
    reply(controller.as_ref(), result)
}

async fn quarterly_generate(
    State(controller): State<Arc<QuarterlyReviewController>>,
    Path(session_id): Path<Uuid>,
) -> Reply {
    let result = controller.generate_output(session_id).await;
    reply(controller.as_ref(), result)
}

/// =============================
/// Router
/// =============================

pub fn create_router(engine: &Engine) -> Router {
    let quick = flow_routes::<QuickAuditController>()
        .route("/sessions/:id/generate", post(quick_generate))
        .with_state(engine.quick.clone());

    let setup = flow_routes::<PortfolioSetupController>()
        .route("/sessions/:id/publish", post(setup_publish))
        .with_state(engine.setup.clone());

    let quarterly = flow_routes::<QuarterlyReviewController>()
        .route("/sessions/:id/bet", post(quarterly_bet))
        .route("/sessions/:id/generate", post(quarterly_generate))
        .with_state(engine.quarterly.clone());

    Router::new()
        .route("/health", get(health))
        .nest("/api/quick", quick)
        .nest("/api/setup", setup)
        .nest("/api/quarterly", quarterly)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

/// =============================
/// Server Startup
/// =============================

pub async fn start_server(
    engine: Engine,
    port: u16,
) -> std::result::Result<(), Box<dyn std::error::Error>> {
    let router = create_router(&engine);

    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", port)).await?;

    info!("API Server listening on http://0.0.0.0:{}", port);
    info!("Local: http://127.0.0.1:{}", port);

    axum::serve(listener, router).await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generation::testing::ScriptedGenerator;
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    fn router() -> Router {
        create_router(&Engine::in_memory(Arc::new(ScriptedGenerator::new())))
    }

    async fn call(router: &Router, method: &str, uri: &str, body: serde_json::Value) -> (StatusCode, ApiResponse) {
        let request = Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap();

        let response = router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn test_health() {
        let response = router()
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_quick_session_round() {
        let router = router();
        let (status, body) = call(&router, "POST", "/api/quick/sessions", serde_json::json!({"user_id": "dana"})).await;
        assert_eq!(status, StatusCode::OK);
        let data = body.data.unwrap();
        assert_eq!(data["session"]["state"], "sensitivity_gate");
        assert!(data["current_question"].is_string());
        let id = data["session"]["session_id"].as_str().unwrap().to_string();

        let (status, body) = call(
            &router,
            "POST",
            &format!("/api/quick/sessions/{}/answer", id),
            serde_json::json!({"answer": "no"}),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body.data.unwrap()["session"]["state"], "role_context");

        // Not in a clarify step
        let (status, body) = call(&router, "POST", &format!("/api/quick/sessions/{}/skip", id), serde_json::json!({})).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert!(!body.success);

        let (status, _) = call(&router, "POST", &format!("/api/quick/sessions/{}/abandon", id), serde_json::json!({})).await;
        assert_eq!(status, StatusCode::OK);
        let (status, _) = call(
            &router,
            "POST",
            &format!("/api/quick/sessions/{}/answer", id),
            serde_json::json!({"answer": "Team lead"}),
        )
        .await;
        assert_eq!(status, StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn test_error_statuses() {
        let router = router();
        let (status, _) = call(&router, "GET", &format!("/api/setup/sessions/{}", Uuid::new_v4()), serde_json::json!({})).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        // No portfolio published yet
        let (status, body) = call(&router, "POST", "/api/quarterly/sessions", serde_json::json!({})).await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert!(body.error.unwrap().contains("portfolio"));

        assert_eq!(
            status_for(&GovernanceError::SkipBudgetExhausted { used: 2, budget: 2 }),
            StatusCode::UNPROCESSABLE_ENTITY
        );
    }
}
