//! API routes for doubtd
//!
//! Solver calls block on SQLite and outbound HTTP, so every one of them runs
//! on the blocking pool.

use crate::server::{AppState, Session};
use axum::{
    extract::{Path, State},
    http::{header::AUTHORIZATION, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use doubt_common::api::{
    AccountResponse, AnswerResponse, AskRequest, CredentialsRequest, ErrorResponse,
    FeedbackRequest, FollowUpRequest, HealthResponse, NormalizeRequest, NormalizeResponse,
};
use doubt_common::auth::AuthError;
use doubt_common::image_host::ImageHostError;
use doubt_common::store::{Feedback, QuestionSummary, QuestionThread};
use doubt_common::{Question, SolverError};
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info, warn};

type AppStateArc = Arc<AppState>;

// ============================================================================
// Errors
// ============================================================================

/// Error reply: status plus a notice the client shows as-is
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
}

impl ApiError {
    fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    fn unauthorized() -> Self {
        Self::new(StatusCode::UNAUTHORIZED, "Please log in to access the app.")
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(ErrorResponse { error: self.message })).into_response()
    }
}

impl From<AuthError> for ApiError {
    fn from(e: AuthError) -> Self {
        let status = match &e {
            AuthError::InvalidInput(_) => StatusCode::BAD_REQUEST,
            AuthError::AlreadyExists => StatusCode::CONFLICT,
            AuthError::InvalidCredentials => StatusCode::UNAUTHORIZED,
            AuthError::Store(inner) => {
                error!("  Account storage failure: {}", inner);
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        Self::new(status, SolverError::Auth(e).user_message())
    }
}

impl From<SolverError> for ApiError {
    fn from(e: SolverError) -> Self {
        let status = match e {
            SolverError::Auth(auth) => return auth.into(),
            SolverError::EmptyQuestion | SolverError::InvalidInput(_) => StatusCode::BAD_REQUEST,
            SolverError::NotFound(_) => StatusCode::NOT_FOUND,
            SolverError::FollowUpLimit(_) => StatusCode::TOO_MANY_REQUESTS,
            SolverError::Image(
                ImageHostError::Empty
                | ImageHostError::TooLarge { .. }
                | ImageHostError::UnsupportedFormat,
            ) => StatusCode::BAD_REQUEST,
            SolverError::Image(_) | SolverError::Llm(_) => StatusCode::BAD_GATEWAY,
            SolverError::Store(ref inner) => {
                error!("  Storage failure: {}", inner);
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        Self::new(status, e.user_message())
    }
}

type ApiResult<T> = Result<Json<T>, ApiError>;

/// Run a blocking solver call off the async workers
async fn blocking<T, F>(f: F) -> Result<T, ApiError>
where
    F: FnOnce() -> Result<T, ApiError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f).await.map_err(|e| {
        error!("  Blocking task failed: {}", e);
        ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, "Internal error")
    })?
}

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
}

async fn session(state: &AppState, headers: &HeaderMap) -> Result<Session, ApiError> {
    let token = bearer_token(headers).ok_or_else(ApiError::unauthorized)?;
    let session = state
        .sessions
        .read()
        .await
        .get(token)
        .cloned()
        .ok_or_else(ApiError::unauthorized)?;
    if session.is_expired(state.session_ttl) {
        state.sessions.write().await.remove(token);
        return Err(ApiError::new(
            StatusCode::UNAUTHORIZED,
            "Session expired. Please log in again.",
        ));
    }
    Ok(session)
}

// ============================================================================
// Health Routes
// ============================================================================

pub fn health_routes() -> Router<AppStateArc> {
    Router::new().route("/v1/health", get(health_check))
}

async fn health_check(State(state): State<AppStateArc>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_seconds: state.start_time.elapsed().as_secs(),
        active_sessions: state.sessions.read().await.len(),
    })
}

// ============================================================================
// Normalize Routes
// ============================================================================

pub fn normalize_routes() -> Router<AppStateArc> {
    Router::new().route("/v1/normalize", post(normalize_text))
}

async fn normalize_text(
    State(state): State<AppStateArc>,
    Json(req): Json<NormalizeRequest>,
) -> ApiResult<NormalizeResponse> {
    let strategy = req.strategy.unwrap_or(state.solver.config().strategy);
    let text =
        blocking(move || Ok(doubt_common::normalize_with(strategy, req.text.as_deref()))).await?;
    Ok(Json(NormalizeResponse { text, strategy }))
}

// ============================================================================
// Account Routes
// ============================================================================

pub fn account_routes() -> Router<AppStateArc> {
    Router::new()
        .route("/v1/signup", post(signup))
        .route("/v1/login", post(login))
        .route("/v1/logout", post(logout))
}

async fn signup(
    State(state): State<AppStateArc>,
    Json(req): Json<CredentialsRequest>,
) -> Result<(StatusCode, Json<AccountResponse>), ApiError> {
    let solver = state.solver.clone();
    let user = blocking(move || Ok(solver.signup(&req.username, &req.password)?)).await?;

    Ok((
        StatusCode::CREATED,
        Json(AccountResponse {
            user_id: user.id,
            username: user.username,
            token: None,
        }),
    ))
}

async fn login(
    State(state): State<AppStateArc>,
    Json(req): Json<CredentialsRequest>,
) -> ApiResult<AccountResponse> {
    let solver = state.solver.clone();
    let user = blocking(move || Ok(solver.login(&req.username, &req.password)?)).await?;

    let token = uuid::Uuid::new_v4().to_string();
    let mut sessions = state.sessions.write().await;
    let ttl = state.session_ttl;
    sessions.retain(|_, session| !session.is_expired(ttl));
    sessions.insert(
        token.clone(),
        Session {
            user_id: user.id.clone(),
            username: user.username.clone(),
            started: Instant::now(),
        },
    );
    drop(sessions);
    info!("  Session opened for {}", user.id);

    Ok(Json(AccountResponse {
        user_id: user.id,
        username: user.username,
        token: Some(token),
    }))
}

async fn logout(State(state): State<AppStateArc>, headers: HeaderMap) -> Result<StatusCode, ApiError> {
    let token = bearer_token(&headers).ok_or_else(ApiError::unauthorized)?;
    let closed = state
        .sessions
        .write()
        .await
        .remove(token)
        .ok_or_else(ApiError::unauthorized)?;
    info!("  Session closed for {}", closed.user_id);
    Ok(StatusCode::NO_CONTENT)
}

// ============================================================================
// Question Routes
// ============================================================================

pub fn question_routes() -> Router<AppStateArc> {
    Router::new()
        .route("/v1/questions", post(ask).get(list_questions))
        .route("/v1/questions/:id", get(get_question))
        .route("/v1/questions/:id/messages", post(follow_up))
        .route("/v1/questions/:id/feedback", post(feedback))
}

fn decode_image(encoded: &str) -> Result<Vec<u8>, ApiError> {
    let payload = match encoded.split_once(";base64,") {
        Some((prefix, data)) if prefix.starts_with("data:") => data,
        _ => encoded,
    };
    BASE64
        .decode(payload.trim())
        .map_err(|_| ApiError::new(StatusCode::BAD_REQUEST, "Image is not valid base64."))
}

async fn ask(
    State(state): State<AppStateArc>,
    headers: HeaderMap,
    Json(req): Json<AskRequest>,
) -> ApiResult<AnswerResponse> {
    let session = session(&state, &headers).await?;
    let image = req.image_base64.as_deref().map(decode_image).transpose()?;
    let question = Question {
        text: req.text,
        image,
        subject: req.subject,
        question_type: req.question_type,
    };

    info!("  Question from {}", session.user_id);
    let solver = state.solver.clone();
    let turn = blocking(move || {
        let conversation = doubt_common::Conversation::new();
        solver
            .ask(&session.user_id, &conversation, question)
            .map_err(|e| {
                warn!("  Question failed: {}", e);
                ApiError::from(e)
            })
    })
    .await?;

    Ok(Json(turn.into()))
}

async fn follow_up(
    State(state): State<AppStateArc>,
    Path(id): Path<String>,
    headers: HeaderMap,
    Json(req): Json<FollowUpRequest>,
) -> ApiResult<AnswerResponse> {
    let session = session(&state, &headers).await?;
    let solver = state.solver.clone();
    let turn = blocking(move || {
        solver
            .follow_up(&session.user_id, &id, &req.text)
            .map_err(|e| {
                warn!("  Follow-up failed: {}", e);
                ApiError::from(e)
            })
    })
    .await?;

    Ok(Json(turn.into()))
}

async fn list_questions(
    State(state): State<AppStateArc>,
    headers: HeaderMap,
) -> ApiResult<Vec<QuestionSummary>> {
    let session = session(&state, &headers).await?;
    let solver = state.solver.clone();
    let questions = blocking(move || Ok(solver.questions(&session.user_id)?)).await?;
    Ok(Json(questions))
}

async fn get_question(
    State(state): State<AppStateArc>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> ApiResult<QuestionThread> {
    let session = session(&state, &headers).await?;
    let solver = state.solver.clone();
    let thread = blocking(move || Ok(solver.thread(&session.user_id, &id)?)).await?;
    Ok(Json(thread))
}

async fn feedback(
    State(state): State<AppStateArc>,
    Path(id): Path<String>,
    headers: HeaderMap,
    Json(req): Json<FeedbackRequest>,
) -> Result<(StatusCode, Json<Feedback>), ApiError> {
    let session = session(&state, &headers).await?;
    let solver = state.solver.clone();
    let feedback = blocking(move || {
        Ok(solver.submit_feedback(&session.user_id, &id, &req.text, req.rating)?)
    })
    .await?;
    Ok((StatusCode::CREATED, Json(feedback)))
}
