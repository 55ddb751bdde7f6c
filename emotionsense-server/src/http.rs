//! EmotionSense HTTP REST API
//!
//! Axum-based HTTP server exposing emotion sessions, detection, the chatbot,
//! recommendations and insights.
//!
//! Architecture: each endpoint has a thin axum handler that delegates to a
//! function in [`crate::subsystems`]. Those functions take the store and
//! owner id directly and are tested without axum dispatch machinery.
//!
//! Everything under `/api` is owner-scoped through [`AuthUser`]; `/health`
//! and `/version` are open.

use std::sync::Arc;

use anyhow::Result;
use axum::extract::multipart::MultipartRejection;
use axum::extract::{DefaultBodyLimit, Multipart, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use emotionsense_core::detector::{create_face_detector, create_voice_detector, EmotionDetector};
use emotionsense_core::models::{
    ChatSession, EmotionInsight, EmotionLog, EmotionSession, FeedbackUpdate, LogFilter,
    NewEmotionLog, NewHistory, NewRecommendation, ProfileUpdate, Recommendation,
    RecommendationHistory, UserProfile,
};
use emotionsense_core::store::EmotionStore;
use emotionsense_core::{DetectorError, EmotionSenseConfig};
use sqlx::PgPool;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tower_http::trace::TraceLayer;
use uuid::Uuid;

use crate::error::ApiError;
use crate::extract::{ApiJson, ApiPath, ApiQuery, AuthUser};
use crate::subsystems::chat::{ChatSessionDetail, SendMessageRequest, SendMessageResponse};
use crate::subsystems::detect::DetectResponse;
use crate::subsystems::insights::GenerateInsightRequest;
use crate::subsystems::recommend::CatalogQuery;
use crate::subsystems::sessions::SessionDetail;
use crate::subsystems::{chat, detect, insights, profile, recommend, sessions};

/// Headroom above the upload limit for multipart framing and text fields.
const MULTIPART_OVERHEAD_BYTES: usize = 64 * 1024;

/// Shared state for all HTTP handlers
pub struct HttpState {
    pub store: Arc<dyn EmotionStore>,
    /// Present when running against Postgres; reported by `/health`.
    pub pool: Option<PgPool>,
    pub config: EmotionSenseConfig,
    pub face: Option<Arc<dyn EmotionDetector>>,
    pub voice: Option<Arc<dyn EmotionDetector>>,
}

impl HttpState {
    /// Build the state, constructing detectors from `[detection]`.
    pub fn new(
        store: Arc<dyn EmotionStore>,
        pool: Option<PgPool>,
        config: EmotionSenseConfig,
    ) -> Result<Self, DetectorError> {
        let face = create_face_detector(&config.detection)?;
        let voice = create_voice_detector(&config.detection)?;
        tracing::info!(
            face = face.as_ref().map(|d| d.name()).unwrap_or("disabled"),
            voice = voice.as_ref().map(|d| d.name()).unwrap_or("disabled"),
            "Emotion detectors ready"
        );
        Ok(Self {
            store,
            pool,
            config,
            face,
            voice,
        })
    }
}

type ApiResult<T> = std::result::Result<Json<T>, ApiError>;
type Created<T> = std::result::Result<(StatusCode, Json<T>), ApiError>;

fn created<T>(value: T) -> (StatusCode, Json<T>) {
    (StatusCode::CREATED, Json(value))
}

/// Build the Axum router with all endpoints
pub fn build_router(state: Arc<HttpState>) -> Router {
    let body_limit = state.config.http.max_upload_bytes() + MULTIPART_OVERHEAD_BYTES;

    let emotions = Router::new()
        .route("/sessions", get(list_sessions_handler).post(open_session_handler))
        .route("/sessions/active", get(active_session_handler))
        .route("/sessions/:id", get(session_detail_handler))
        .route("/sessions/:id/end", post(close_session_handler))
        .route("/logs", get(list_logs_handler).post(create_log_handler))
        .route("/logs/detect", post(detect_handler))
        .route("/logs/:id", get(get_log_handler))
        .route("/profile/me", get(get_profile_handler).patch(update_profile_handler));

    let chatbot = Router::new()
        .route("/sessions", get(list_chat_sessions_handler))
        .route("/sessions/active", get(active_chat_session_handler))
        .route("/sessions/:id", get(chat_session_detail_handler))
        .route("/sessions/:id/end", post(close_chat_session_handler))
        .route("/messages/send", post(send_message_handler));

    let recommendations = Router::new()
        .route("/items", get(list_items_handler).post(create_item_handler))
        .route("/items/for_emotion", get(for_emotion_handler))
        .route("/items/:id", get(get_item_handler))
        .route("/history", get(list_history_handler).post(record_history_handler))
        .route("/history/:id/feedback", post(feedback_handler))
        .route("/insights", get(list_insights_handler))
        .route("/insights/generate", post(generate_insight_handler))
        .route("/insights/:id", get(get_insight_handler));

    Router::new()
        .route("/health", get(health_handler))
        .route("/version", get(version_handler))
        .nest("/api/emotions", emotions)
        .nest("/api/chatbot", chatbot)
        .nest("/api/recommendations", recommendations)
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Start the HTTP server on the configured address.
/// Gracefully shuts down when the broadcast shutdown signal fires.
pub async fn start_http_server(
    state: Arc<HttpState>,
    mut shutdown: broadcast::Receiver<()>,
) -> Result<()> {
    let addr = format!("{}:{}", state.config.http.host, state.config.http.port);
    let app = build_router(state);
    let listener = TcpListener::bind(&addr).await?;
    tracing::info!("EmotionSense HTTP API listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = shutdown.recv().await;
            tracing::info!("HTTP server shutting down...");
        })
        .await?;

    Ok(())
}

// ============================================================================
// Inner (directly testable) functions
// ============================================================================

/// Inner health check. Without a pool the service is running on the
/// in-memory store and is always healthy.
pub async fn health_inner(pool: Option<&PgPool>) -> (StatusCode, serde_json::Value) {
    let Some(pool) = pool else {
        return (
            StatusCode::OK,
            serde_json::json!({
                "status": "healthy",
                "version": env!("CARGO_PKG_VERSION"),
                "storage": "memory",
            }),
        );
    };

    match emotionsense_core::db::health_check(pool).await {
        Ok(pg_ver) => (
            StatusCode::OK,
            serde_json::json!({
                "status": "healthy",
                "version": env!("CARGO_PKG_VERSION"),
                "storage": "postgresql",
                "postgresql": pg_ver,
            }),
        ),
        Err(e) => {
            tracing::warn!(error = %e, "Health check failed");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                serde_json::json!({
                    "status": "unhealthy",
                    "error": e.to_string(),
                }),
            )
        }
    }
}

/// Inner version (pure, no IO).
pub fn version_inner() -> serde_json::Value {
    serde_json::json!({
        "version": env!("CARGO_PKG_VERSION"),
        "api": "emotionsense/1",
    })
}

// ============================================================================
// Axum handler wrappers (thin, delegate to subsystems)
// ============================================================================

pub async fn health_handler(State(state): State<Arc<HttpState>>) -> impl IntoResponse {
    let (status, body) = health_inner(state.pool.as_ref()).await;
    (status, Json(body))
}

pub async fn version_handler() -> impl IntoResponse {
    (StatusCode::OK, Json(version_inner()))
}

// ---- emotion sessions and logs ---------------------------------------------

async fn list_sessions_handler(
    State(state): State<Arc<HttpState>>,
    AuthUser(owner): AuthUser,
) -> ApiResult<Vec<EmotionSession>> {
    sessions::list_sessions(state.store.as_ref(), owner).await.map(Json)
}

async fn open_session_handler(
    State(state): State<Arc<HttpState>>,
    AuthUser(owner): AuthUser,
) -> Created<EmotionSession> {
    sessions::open_session(state.store.as_ref(), owner).await.map(created)
}

async fn active_session_handler(
    State(state): State<Arc<HttpState>>,
    AuthUser(owner): AuthUser,
) -> ApiResult<EmotionSession> {
    sessions::active_session(state.store.as_ref(), owner).await.map(Json)
}

async fn session_detail_handler(
    State(state): State<Arc<HttpState>>,
    AuthUser(owner): AuthUser,
    ApiPath(id): ApiPath<Uuid>,
) -> ApiResult<SessionDetail> {
    sessions::session_detail(state.store.as_ref(), owner, id).await.map(Json)
}

async fn close_session_handler(
    State(state): State<Arc<HttpState>>,
    AuthUser(owner): AuthUser,
    ApiPath(id): ApiPath<Uuid>,
) -> ApiResult<EmotionSession> {
    sessions::close_session(state.store.as_ref(), owner, id).await.map(Json)
}

async fn list_logs_handler(
    State(state): State<Arc<HttpState>>,
    AuthUser(owner): AuthUser,
    ApiQuery(filter): ApiQuery<LogFilter>,
) -> ApiResult<Vec<EmotionLog>> {
    sessions::list_logs(state.store.as_ref(), owner, filter).await.map(Json)
}

async fn create_log_handler(
    State(state): State<Arc<HttpState>>,
    AuthUser(owner): AuthUser,
    ApiJson(req): ApiJson<NewEmotionLog>,
) -> Created<EmotionLog> {
    sessions::create_log(state.store.as_ref(), owner, req).await.map(created)
}

async fn get_log_handler(
    State(state): State<Arc<HttpState>>,
    AuthUser(owner): AuthUser,
    ApiPath(id): ApiPath<Uuid>,
) -> ApiResult<EmotionLog> {
    sessions::get_log(state.store.as_ref(), owner, id).await.map(Json)
}

async fn detect_handler(
    State(state): State<Arc<HttpState>>,
    AuthUser(owner): AuthUser,
    multipart: std::result::Result<Multipart, MultipartRejection>,
) -> ApiResult<DetectResponse> {
    let multipart = multipart.map_err(|rejection| ApiError::BadRequest(rejection.body_text()))?;
    let upload = detect::read_upload(multipart, state.config.http.max_upload_bytes()).await?;
    detect::detect(&state, owner, upload).await.map(Json)
}

async fn get_profile_handler(
    State(state): State<Arc<HttpState>>,
    AuthUser(owner): AuthUser,
) -> ApiResult<UserProfile> {
    profile::get_profile(state.store.as_ref(), owner).await.map(Json)
}

async fn update_profile_handler(
    State(state): State<Arc<HttpState>>,
    AuthUser(owner): AuthUser,
    ApiJson(update): ApiJson<ProfileUpdate>,
) -> ApiResult<UserProfile> {
    profile::update_profile(state.store.as_ref(), owner, update).await.map(Json)
}

// ---- chatbot ----------------------------------------------------------------

async fn list_chat_sessions_handler(
    State(state): State<Arc<HttpState>>,
    AuthUser(owner): AuthUser,
) -> ApiResult<Vec<ChatSession>> {
    chat::list_sessions(state.store.as_ref(), owner).await.map(Json)
}

async fn active_chat_session_handler(
    State(state): State<Arc<HttpState>>,
    AuthUser(owner): AuthUser,
) -> ApiResult<ChatSession> {
    chat::active_session(state.store.as_ref(), owner).await.map(Json)
}

async fn chat_session_detail_handler(
    State(state): State<Arc<HttpState>>,
    AuthUser(owner): AuthUser,
    ApiPath(id): ApiPath<Uuid>,
) -> ApiResult<ChatSessionDetail> {
    chat::session_detail(state.store.as_ref(), owner, id).await.map(Json)
}

async fn close_chat_session_handler(
    State(state): State<Arc<HttpState>>,
    AuthUser(owner): AuthUser,
    ApiPath(id): ApiPath<Uuid>,
) -> ApiResult<ChatSession> {
    chat::close_session(state.store.as_ref(), owner, id).await.map(Json)
}

async fn send_message_handler(
    State(state): State<Arc<HttpState>>,
    AuthUser(owner): AuthUser,
    ApiJson(req): ApiJson<SendMessageRequest>,
) -> ApiResult<SendMessageResponse> {
    chat::send_message(state.store.as_ref(), owner, req).await.map(Json)
}

// ---- recommendations ----------------------------------------------------------

async fn list_items_handler(
    State(state): State<Arc<HttpState>>,
    AuthUser(_): AuthUser,
    ApiQuery(query): ApiQuery<CatalogQuery>,
) -> ApiResult<Vec<Recommendation>> {
    recommend::list_items(state.store.as_ref(), query).await.map(Json)
}

async fn create_item_handler(
    State(state): State<Arc<HttpState>>,
    AuthUser(_): AuthUser,
    ApiJson(req): ApiJson<NewRecommendation>,
) -> Created<Recommendation> {
    recommend::create_item(state.store.as_ref(), req).await.map(created)
}

async fn get_item_handler(
    State(state): State<Arc<HttpState>>,
    AuthUser(_): AuthUser,
    ApiPath(id): ApiPath<Uuid>,
) -> ApiResult<Recommendation> {
    recommend::get_item(state.store.as_ref(), id).await.map(Json)
}

async fn for_emotion_handler(
    State(state): State<Arc<HttpState>>,
    AuthUser(_): AuthUser,
    ApiQuery(query): ApiQuery<CatalogQuery>,
) -> ApiResult<Vec<Recommendation>> {
    let sample_size = state.config.recommendations.sample_size;
    recommend::for_emotion(state.store.as_ref(), sample_size, query)
        .await
        .map(Json)
}

async fn list_history_handler(
    State(state): State<Arc<HttpState>>,
    AuthUser(owner): AuthUser,
) -> ApiResult<Vec<RecommendationHistory>> {
    recommend::list_history(state.store.as_ref(), owner).await.map(Json)
}

async fn record_history_handler(
    State(state): State<Arc<HttpState>>,
    AuthUser(owner): AuthUser,
    ApiJson(req): ApiJson<NewHistory>,
) -> Created<RecommendationHistory> {
    recommend::record_history(state.store.as_ref(), owner, req)
        .await
        .map(created)
}

async fn feedback_handler(
    State(state): State<Arc<HttpState>>,
    AuthUser(owner): AuthUser,
    ApiPath(id): ApiPath<Uuid>,
    ApiJson(update): ApiJson<FeedbackUpdate>,
) -> ApiResult<RecommendationHistory> {
    recommend::submit_feedback(state.store.as_ref(), owner, id, update)
        .await
        .map(Json)
}

async fn list_insights_handler(
    State(state): State<Arc<HttpState>>,
    AuthUser(owner): AuthUser,
) -> ApiResult<Vec<EmotionInsight>> {
    insights::list(state.store.as_ref(), owner).await.map(Json)
}

async fn get_insight_handler(
    State(state): State<Arc<HttpState>>,
    AuthUser(owner): AuthUser,
    ApiPath(id): ApiPath<Uuid>,
) -> ApiResult<EmotionInsight> {
    insights::get(state.store.as_ref(), owner, id).await.map(Json)
}

async fn generate_insight_handler(
    State(state): State<Arc<HttpState>>,
    AuthUser(owner): AuthUser,
    ApiJson(req): ApiJson<GenerateInsightRequest>,
) -> Created<EmotionInsight> {
    insights::generate(state.store.as_ref(), owner, req)
        .await
        .map(created)
}
