use std::str::FromStr;
use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::{Deserialize, Serialize};

use super::models::{Session, SessionStatus};
use super::orchestrator::{SessionOrchestrator, Step};
use super::sweeper::Sweeper;
use crate::errors::SessionError;

// ── Shared application state ──────────────────────────────────────────

pub struct AppState {
    pub orchestrator: SessionOrchestrator,
    pub sweeper: Arc<Sweeper>,
}

pub type SharedState = Arc<AppState>;

// ── Request / response payload types ──────────────────────────────────

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivateRequest {
    pub impression_text: String,
}

#[derive(Deserialize)]
pub struct ListParams {
    pub status: Option<String>,
}

#[derive(Serialize)]
pub struct AdvanceResponse {
    pub advanced: bool,
    pub session: Session,
}

impl From<Step> for AdvanceResponse {
    fn from(step: Step) -> Self {
        Self {
            advanced: step.advanced(),
            session: step.into_session(),
        }
    }
}

// ── Error handling ────────────────────────────────────────────────────

pub enum ApiError {
    NotFound(String),
    BadRequest(String),
    Conflict(String),
    BadGateway(String),
    Internal(String),
}

impl From<SessionError> for ApiError {
    fn from(e: SessionError) -> Self {
        let msg = e.to_string();
        match e {
            SessionError::NotFound { .. } => ApiError::NotFound(msg),
            SessionError::InvalidState { .. } | SessionError::BadRequest(_) => {
                ApiError::BadRequest(msg)
            }
            SessionError::Conflict { .. } => ApiError::Conflict(msg),
            SessionError::JudgeUnavailable(_) | SessionError::InvestmentProvider(_) => {
                ApiError::BadGateway(msg)
            }
            SessionError::Persistence(_) | SessionError::ImagesUnavailable(_) => {
                ApiError::Internal(msg)
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, msg),
            ApiError::BadGateway(msg) => (StatusCode::BAD_GATEWAY, msg),
            ApiError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };
        (status, Json(serde_json::json!({"error": message}))).into_response()
    }
}

// ── Router ────────────────────────────────────────────────────────────

pub fn api_router() -> Router<SharedState> {
    Router::new()
        .route("/api/sessions", get(list_sessions).post(create_session))
        .route("/api/sessions/{id}", get(get_session))
        .route("/api/sessions/{id}/activate", post(activate_session))
        .route("/api/sessions/{id}/feedback", post(shown_feedback))
        .route("/api/sessions/{id}/advance", post(advance_session))
        .route("/api/stats", get(get_stats))
        .route("/api/sweep", post(run_sweep))
        .route("/health", get(health_check))
}

// ── Handlers ──────────────────────────────────────────────────────────

async fn health_check() -> &'static str {
    "ok"
}

async fn list_sessions(
    State(state): State<SharedState>,
    Query(params): Query<ListParams>,
) -> Result<impl IntoResponse, ApiError> {
    let sessions = match params.status.as_deref() {
        Some(raw) => {
            let status = SessionStatus::from_str(raw).map_err(ApiError::BadRequest)?;
            state.orchestrator.sessions_with_status(status).await?
        }
        None => state.orchestrator.get_sessions().await?,
    };
    Ok(Json(sessions))
}

async fn create_session(State(state): State<SharedState>) -> Result<impl IntoResponse, ApiError> {
    let session = state.orchestrator.create_session().await?;
    Ok((StatusCode::CREATED, Json(session)))
}

async fn get_session(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(state.orchestrator.get_session(&id).await?))
}

async fn activate_session(
    State(state): State<SharedState>,
    Path(id): Path<String>,
    Json(req): Json<ActivateRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let session = state
        .orchestrator
        .activate_session(&id, &req.impression_text)
        .await?;
    Ok(Json(session))
}

async fn shown_feedback(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let step = state.orchestrator.shown_feedback(&id).await?;
    Ok(Json(step.into_session()))
}

async fn advance_session(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let step = state.orchestrator.advance(&id).await?;
    Ok(Json(AdvanceResponse::from(step)))
}

async fn get_stats(State(state): State<SharedState>) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(state.orchestrator.stats().await?))
}

async fn run_sweep(State(state): State<SharedState>) -> Result<impl IntoResponse, ApiError> {
    match state.sweeper.run_cycle().await {
        Some(report) => Ok(Json(report)),
        None => Err(ApiError::Conflict("a sweep is already running".into())),
    }
}

// ── Tests ─────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::session::investment::testing::ScriptedWagers;
    use crate::session::judge::testing::ScriptedJudge;
    use crate::session::orchestrator::testing::orchestrator;
    use axum::body::Body;
    use axum::http::Request;
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    fn test_state() -> SharedState {
        let orch = orchestrator(Arc::new(ScriptedJudge::always(1)), Arc::new(ScriptedWagers::new()));
        Arc::new(AppState {
            sweeper: Arc::new(Sweeper::new(orch.clone(), Duration::from_secs(30))),
            orchestrator: orch,
        })
    }

    fn test_app(state: SharedState) -> Router {
        api_router().with_state(state)
    }

    async fn body_json<T: serde::de::DeserializeOwned>(body: Body) -> T {
        let bytes = body.collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn post_json(uri: &str, body: serde_json::Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    fn empty(method: &str, uri: &str) -> Request<Body> {
        Request::builder()
            .method(method)
            .uri(uri)
            .body(Body::empty())
            .unwrap()
    }

    #[tokio::test]
    async fn test_health_check() {
        let response = test_app(test_state()).oneshot(empty("GET", "/health")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = response.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(&body[..], b"ok");
    }

    #[tokio::test]
    async fn test_create_then_get_session() {
        let state = test_state();
        let response = test_app(state.clone())
            .oneshot(empty("POST", "/api/sessions"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);
        let created: serde_json::Value = body_json(response.into_body()).await;
        assert_eq!(created["status"], "new");
        assert_eq!(created["images"].as_array().unwrap().len(), 2);

        let id = created["id"].as_str().unwrap();
        let response = test_app(state)
            .oneshot(empty("GET", &format!("/api/sessions/{}", id)))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let fetched: serde_json::Value = body_json(response.into_body()).await;
        assert_eq!(fetched, created);
    }

    #[tokio::test]
    async fn test_get_unknown_session_is_404() {
        let response = test_app(test_state())
            .oneshot(empty("GET", "/api/sessions/missing"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let body: serde_json::Value = body_json(response.into_body()).await;
        assert!(body["error"].as_str().unwrap().contains("missing"));
    }

    #[tokio::test]
    async fn test_activate_and_reactivate() {
        let state = test_state();
        let session = state.orchestrator.create_session().await.unwrap();
        let uri = format!("/api/sessions/{}/activate", session.id);

        let response = test_app(state.clone())
            .oneshot(post_json(&uri, serde_json::json!({"impressionText": "bright warm room"})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let activated: serde_json::Value = body_json(response.into_body()).await;
        assert_eq!(activated["status"], "unjudged");
        assert_eq!(activated["impressionText"], "bright warm room");

        let response = test_app(state)
            .oneshot(post_json(&uri, serde_json::json!({"impressionText": "again"})))
            .await
            .unwrap();
        assert!(
            response.status() == StatusCode::BAD_REQUEST || response.status() == StatusCode::CONFLICT
        );
    }

    #[tokio::test]
    async fn test_activate_with_empty_impression_is_400() {
        let state = test_state();
        let session = state.orchestrator.create_session().await.unwrap();
        let response = test_app(state)
            .oneshot(post_json(
                &format!("/api/sessions/{}/activate", session.id),
                serde_json::json!({"impressionText": ""}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_list_filters_by_status() {
        let state = test_state();
        let a = state.orchestrator.create_session().await.unwrap();
        state.orchestrator.create_session().await.unwrap();
        state.orchestrator.record_impression(&a.id, "x").await.unwrap();

        let response = test_app(state.clone())
            .oneshot(empty("GET", "/api/sessions?status=unjudged"))
            .await
            .unwrap();
        let sessions: Vec<serde_json::Value> = body_json(response.into_body()).await;
        assert_eq!(sessions.len(), 1);
        assert_eq!(sessions[0]["id"], a.id.as_str());

        let response = test_app(state.clone())
            .oneshot(empty("GET", "/api/sessions"))
            .await
            .unwrap();
        let sessions: Vec<serde_json::Value> = body_json(response.into_body()).await;
        assert_eq!(sessions.len(), 2);

        let response = test_app(state)
            .oneshot(empty("GET", "/api/sessions?status=bogus"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_advance_reports_progress() {
        let state = test_state();
        let session = state.orchestrator.create_session().await.unwrap();
        state.orchestrator.record_impression(&session.id, "x").await.unwrap();

        let response = test_app(state)
            .oneshot(empty("POST", &format!("/api/sessions/{}/advance", session.id)))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body: serde_json::Value = body_json(response.into_body()).await;
        assert_eq!(body["advanced"], true);
        assert_eq!(body["session"]["status"], "judged");
        assert_eq!(body["session"]["chosenImageIdx"], 1);
    }

    #[tokio::test]
    async fn test_feedback_before_resolution_is_400() {
        let state = test_state();
        let session = state.orchestrator.create_session().await.unwrap();
        let response = test_app(state)
            .oneshot(empty("POST", &format!("/api/sessions/{}/feedback", session.id)))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_stats_and_sweep() {
        let state = test_state();
        let response = test_app(state.clone())
            .oneshot(empty("GET", "/api/stats"))
            .await
            .unwrap();
        let stats: serde_json::Value = body_json(response.into_body()).await;
        assert_eq!(stats["totalSessions"], 0);
        assert_eq!(stats["winPercentage"], 0.0);

        let response = test_app(state)
            .oneshot(empty("POST", "/api/sweep"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let report: serde_json::Value = body_json(response.into_body()).await;
        assert_eq!(report["examined"], 0);
    }

    #[test]
    fn test_error_status_mapping() {
        let status = |e: SessionError| ApiError::from(e).into_response().status();
        assert_eq!(status(SessionError::NotFound { id: "x".into() }), StatusCode::NOT_FOUND);
        assert_eq!(status(SessionError::Conflict { id: "x".into() }), StatusCode::CONFLICT);
        assert_eq!(
            status(SessionError::JudgeUnavailable("down".into())),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(
            status(SessionError::InvalidState {
                id: "x".into(),
                expected: SessionStatus::New,
                actual: SessionStatus::Judged
            }),
            StatusCode::BAD_REQUEST
        );
    }
}
