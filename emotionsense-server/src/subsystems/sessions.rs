//! Emotion session lifecycle and emotion log endpoints.

use emotionsense_core::models::{EmotionLog, EmotionSession, LogFilter, NewEmotionLog};
use emotionsense_core::store::EmotionStore;
use serde::Serialize;
use uuid::Uuid;

use crate::error::ApiError;

/// A session together with the logs recorded in it.
#[derive(Debug, Serialize)]
pub struct SessionDetail {
    #[serde(flatten)]
    pub session: EmotionSession,
    pub logs: Vec<EmotionLog>,
}

pub async fn open_session(
    store: &dyn EmotionStore,
    owner: i64,
) -> Result<EmotionSession, ApiError> {
    Ok(store.open_session(owner).await?)
}

pub async fn active_session(
    store: &dyn EmotionStore,
    owner: i64,
) -> Result<EmotionSession, ApiError> {
    Ok(store.active_session(owner).await?)
}

pub async fn list_sessions(
    store: &dyn EmotionStore,
    owner: i64,
) -> Result<Vec<EmotionSession>, ApiError> {
    Ok(store.list_sessions(owner).await?)
}

pub async fn session_detail(
    store: &dyn EmotionStore,
    owner: i64,
    id: Uuid,
) -> Result<SessionDetail, ApiError> {
    let session = store.get_session(owner, id).await?;
    let logs = store.session_logs(owner, id).await?;
    Ok(SessionDetail { session, logs })
}

pub async fn close_session(
    store: &dyn EmotionStore,
    owner: i64,
    id: Uuid,
) -> Result<EmotionSession, ApiError> {
    Ok(store.close_session(owner, id).await?)
}

/// Record a log supplied directly by the client.
///
/// A log without a session stays unattached.
pub async fn create_log(
    store: &dyn EmotionStore,
    owner: i64,
    req: NewEmotionLog,
) -> Result<EmotionLog, ApiError> {
    req.validate().map_err(ApiError::BadRequest)?;
    let session_id = req.session_id;
    let log = req.into_log(owner, session_id);
    tracing::debug!(
        owner,
        emotion = %log.emotion_type,
        source = %log.source,
        "Recording emotion log"
    );
    Ok(store.insert_log(log).await?)
}

pub async fn get_log(
    store: &dyn EmotionStore,
    owner: i64,
    id: Uuid,
) -> Result<EmotionLog, ApiError> {
    Ok(store.get_log(owner, id).await?)
}

pub async fn list_logs(
    store: &dyn EmotionStore,
    owner: i64,
    filter: LogFilter,
) -> Result<Vec<EmotionLog>, ApiError> {
    Ok(store.list_logs(owner, &filter).await?)
}
