//! HTTP API for the RAS node

use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use ras_core::{Ballot, NewSession, RasError, ReviewerId, SessionId};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use crate::auth::bearer_token;
use crate::runtime::NodeRuntime;

/// API state containing node runtime
pub type ApiState = Arc<NodeRuntime>;

/// API response wrapper
#[derive(Debug, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: Option<T>,
    pub error: Option<String>,
}

impl<T: Serialize> ApiResponse<T> {
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn err(error: impl ToString) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(error.to_string()),
        }
    }
}

/// Session creation response
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatedResponse {
    pub ras_id: SessionId,
}

/// HTTP status for an error surfaced at the API boundary
pub fn status_for(err: &RasError) -> StatusCode {
    match err {
        RasError::Validation(_) | RasError::SessionUnavailable | RasError::KeyNotFound => {
            StatusCode::BAD_REQUEST
        }
        RasError::Unauthorized => StatusCode::UNAUTHORIZED,
        RasError::NotAPanelist => StatusCode::FORBIDDEN,
        RasError::NotFound(_) => StatusCode::NOT_FOUND,
        RasError::AlreadyVoted | RasError::InvalidTransition { .. } => StatusCode::CONFLICT,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn error_response(err: RasError) -> Response {
    let status = status_for(&err);
    if status.is_server_error() {
        error!("Request failed: {}", err);
    }
    (status, Json(ApiResponse::<()>::err(err))).into_response()
}

fn ok_response<T: Serialize>(data: T) -> Response {
    (StatusCode::OK, Json(ApiResponse::ok(data))).into_response()
}

fn bad_body(rejection: JsonRejection) -> Response {
    error_response(RasError::Validation(rejection.body_text()))
}

fn parse_session_id(raw: &str) -> Result<SessionId, Response> {
    raw.parse().map_err(error_response)
}

/// Create API router
pub fn create_router(state: ApiState) -> Router {
    let enable_cors = state.config().api.enable_cors;

    let router = Router::new()
        // Health
        .route("/health", get(health))
        .route("/status", get(status))
        // Sessions
        .route("/ras/new", post(create_session))
        .route("/ras/vote", post(cast_vote))
        .route("/ras/user/:user_id", get(get_assignment))
        .route("/ras/:ras_id", get(get_session))
        .route("/ras/:ras_id/void", post(void_session))
        // Final votes
        .route("/votes/rasId/:ras_id", get(votes_for_session))
        .route("/votes/post/:post_uri", get(votes_for_post))
        .with_state(state)
        .layer(TraceLayer::new_for_http());

    if enable_cors {
        let cors = CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any);
        router.layer(cors)
    } else {
        router
    }
}

/// Health check
async fn health() -> impl IntoResponse {
    Json(serde_json::json!({"status": "ok"}))
}

/// Node status
async fn status(State(runtime): State<ApiState>) -> impl IntoResponse {
    Json(ApiResponse::ok(runtime.status()))
}

async fn create_session(
    State(runtime): State<ApiState>,
    body: Result<Json<NewSession>, JsonRejection>,
) -> Response {
    let Json(request) = match body {
        Ok(body) => body,
        Err(rejection) => return bad_body(rejection),
    };

    match runtime.coordinator().create_session(request).await {
        Ok(ras_id) => ok_response(CreatedResponse { ras_id }),
        Err(e) => error_response(e),
    }
}

/// Next open assignment for a reviewer, or 204 when there is none
async fn get_assignment(State(runtime): State<ApiState>, Path(user_id): Path<String>) -> Response {
    let reviewer = match user_id.trim().parse::<i64>() {
        Ok(id) => ReviewerId(id),
        Err(_) => {
            return error_response(RasError::Validation(format!("invalid user id: {user_id}")))
        }
    };

    match runtime.coordinator().get_assignment(reviewer).await {
        Ok(Some(summary)) => ok_response(summary),
        Ok(None) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => error_response(e),
    }
}

async fn cast_vote(
    State(runtime): State<ApiState>,
    headers: HeaderMap,
    body: Result<Json<Ballot>, JsonRejection>,
) -> Response {
    let Some(token) = bearer_token(&headers) else {
        return error_response(RasError::Unauthorized);
    };
    let Json(ballot) = match body {
        Ok(body) => body,
        Err(rejection) => return bad_body(rejection),
    };

    match runtime.coordinator().cast_vote(token, ballot).await {
        Ok(_) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => error_response(e),
    }
}

async fn get_session(State(runtime): State<ApiState>, Path(ras_id): Path<String>) -> Response {
    let id = match parse_session_id(&ras_id) {
        Ok(id) => id,
        Err(response) => return response,
    };
    match runtime.coordinator().get_session(&id).await {
        Ok(session) => ok_response(session),
        Err(e) => error_response(e),
    }
}

async fn void_session(State(runtime): State<ApiState>, Path(ras_id): Path<String>) -> Response {
    let id = match parse_session_id(&ras_id) {
        Ok(id) => id,
        Err(response) => return response,
    };
    match runtime.coordinator().void_session(&id).await {
        Ok(session) => ok_response(session),
        Err(e) => error_response(e),
    }
}

async fn votes_for_session(
    State(runtime): State<ApiState>,
    Path(ras_id): Path<String>,
) -> Response {
    let id = match parse_session_id(&ras_id) {
        Ok(id) => id,
        Err(response) => return response,
    };
    match runtime.coordinator().votes_for_session(&id).await {
        Ok(votes) => ok_response(votes),
        Err(e) => error_response(e),
    }
}

async fn votes_for_post(State(runtime): State<ApiState>, Path(post_uri): Path<String>) -> Response {
    match runtime.coordinator().votes_for_post(&post_uri).await {
        Ok(votes) => ok_response(votes),
        Err(e) => error_response(e),
    }
}

/// Start API server
pub async fn start_api_server(runtime: Arc<NodeRuntime>, listen_addr: &str) -> anyhow::Result<()> {
    let router = create_router(runtime);

    let listener = tokio::net::TcpListener::bind(listen_addr).await?;
    info!("API server listening on {}", listen_addr);

    axum::serve(listener, router).await?;

    Ok(())
}
