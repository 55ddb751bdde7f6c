//! Postgres-backed store.
//!
//! Enum columns are stored as their label text and parsed back on read; a
//! label the code does not know surfaces as [`StoreError::Corrupt`].
//! The one-active-session rule is enforced by partial unique indexes
//! (`emotion_sessions_one_active`, `chat_sessions_one_active`).

use std::collections::HashMap;
use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use sqlx::types::Json;
use sqlx::PgPool;
use uuid::Uuid;

use super::{
    effective_limit, ChatStore, EmotionLogStore, InsightStore, ProfileStore, RecommendationStore,
    SessionStore, StoreResult,
};
use crate::aggregate::aggregate;
use crate::error::StoreError;
use crate::models::{
    ChatMessage, ChatSession, ChatTurn, ChatbotContext, ContentType, Emotion, EmotionInsight,
    EmotionLog, EmotionReading, EmotionSession, FeedbackUpdate, LogFilter, ProfileUpdate,
    Recommendation, RecommendationHistory, UnknownLabel, UserProfile,
};
use crate::models::now;

/// Attempts at settling get-or-create races on the active session.
const ACTIVE_RETRIES: usize = 3;

const SESSION_COLUMNS: &str = "id, owner_id, start_time, end_time, is_active, \
     dominant_emotion, average_confidence, total_emotions_detected";
const LOG_COLUMNS: &str =
    "id, owner_id, emotion_type, confidence, source, timestamp, session_id, raw_data";
const CHAT_SESSION_COLUMNS: &str =
    "id, owner_id, start_time, end_time, is_active, initial_emotion, total_messages";
const MESSAGE_COLUMNS: &str = "id, session_id, sender, message, timestamp, \
     detected_emotion, emotion_confidence, response_type";
const CONTEXT_COLUMNS: &str = "id, session_id, conversation_summary, user_concerns, \
     suggested_topics, emotion_history, mood_trend, updated_at";
const RECOMMENDATION_COLUMNS: &str = "id, content_type, emotion_trigger, title, content, artist, \
     spotify_url, youtube_url, duration_minutes, difficulty, is_active, created_at, usage_count";
const HISTORY_COLUMNS: &str = "id, owner_id, recommendation_id, detected_emotion, \
     emotion_confidence, timestamp, was_clicked, was_completed, user_feedback, feedback_comment";
const INSIGHT_COLUMNS: &str = "id, owner_id, start_date, end_date, most_common_emotion, \
     emotion_distribution, mood_trend, most_helpful_content_type, \
     total_recommendations_received, ai_summary, created_at";

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

fn label<T>(raw: &str) -> StoreResult<T>
where
    T: FromStr<Err = UnknownLabel>,
{
    raw.parse()
        .map_err(|e: UnknownLabel| StoreError::Corrupt(e.to_string()))
}

fn opt_label<T>(raw: Option<String>) -> StoreResult<Option<T>>
where
    T: FromStr<Err = UnknownLabel>,
{
    raw.as_deref().map(label::<T>).transpose()
}

/// Current time at the precision Postgres stores, so returned rows match re-reads.
fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db) if db.is_unique_violation())
}

// ============================================================================
// Row types
// ============================================================================

#[derive(sqlx::FromRow)]
struct SessionRow {
    id: Uuid,
    owner_id: i64,
    start_time: DateTime<Utc>,
    end_time: Option<DateTime<Utc>>,
    is_active: bool,
    dominant_emotion: Option<String>,
    average_confidence: Option<f64>,
    total_emotions_detected: i64,
}

impl TryFrom<SessionRow> for EmotionSession {
    type Error = StoreError;

    fn try_from(row: SessionRow) -> StoreResult<Self> {
        Ok(EmotionSession {
            id: row.id,
            owner_id: row.owner_id,
            start_time: row.start_time,
            end_time: row.end_time,
            is_active: row.is_active,
            dominant_emotion: opt_label(row.dominant_emotion)?,
            average_confidence: row.average_confidence,
            total_emotions_detected: row.total_emotions_detected,
        })
    }
}

#[derive(sqlx::FromRow)]
struct LogRow {
    id: Uuid,
    owner_id: i64,
    emotion_type: String,
    confidence: f64,
    source: String,
    timestamp: DateTime<Utc>,
    session_id: Option<Uuid>,
    raw_data: Option<serde_json::Value>,
}

impl TryFrom<LogRow> for EmotionLog {
    type Error = StoreError;

    fn try_from(row: LogRow) -> StoreResult<Self> {
        Ok(EmotionLog {
            id: row.id,
            owner_id: row.owner_id,
            emotion_type: label(&row.emotion_type)?,
            confidence: row.confidence,
            source: label(&row.source)?,
            timestamp: row.timestamp,
            session_id: row.session_id,
            raw_data: row.raw_data,
        })
    }
}

#[derive(sqlx::FromRow)]
struct ProfileRow {
    id: Uuid,
    owner_id: i64,
    preferred_music_genre: String,
    enable_voice_detection: bool,
    enable_face_detection: bool,
    total_sessions: i64,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<ProfileRow> for UserProfile {
    fn from(row: ProfileRow) -> Self {
        UserProfile {
            id: row.id,
            owner_id: row.owner_id,
            preferred_music_genre: row.preferred_music_genre,
            enable_voice_detection: row.enable_voice_detection,
            enable_face_detection: row.enable_face_detection,
            total_sessions: row.total_sessions,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

#[derive(sqlx::FromRow)]
struct ChatSessionRow {
    id: Uuid,
    owner_id: i64,
    start_time: DateTime<Utc>,
    end_time: Option<DateTime<Utc>>,
    is_active: bool,
    initial_emotion: Option<String>,
    total_messages: i64,
}

impl TryFrom<ChatSessionRow> for ChatSession {
    type Error = StoreError;

    fn try_from(row: ChatSessionRow) -> StoreResult<Self> {
        Ok(ChatSession {
            id: row.id,
            owner_id: row.owner_id,
            start_time: row.start_time,
            end_time: row.end_time,
            is_active: row.is_active,
            initial_emotion: opt_label(row.initial_emotion)?,
            total_messages: row.total_messages,
        })
    }
}

#[derive(sqlx::FromRow)]
struct MessageRow {
    id: Uuid,
    session_id: Uuid,
    sender: String,
    message: String,
    timestamp: DateTime<Utc>,
    detected_emotion: Option<String>,
    emotion_confidence: Option<f64>,
    response_type: Option<String>,
}

impl TryFrom<MessageRow> for ChatMessage {
    type Error = StoreError;

    fn try_from(row: MessageRow) -> StoreResult<Self> {
        Ok(ChatMessage {
            id: row.id,
            session_id: row.session_id,
            sender: label(&row.sender)?,
            message: row.message,
            timestamp: row.timestamp,
            detected_emotion: opt_label(row.detected_emotion)?,
            emotion_confidence: row.emotion_confidence,
            response_type: opt_label(row.response_type)?,
        })
    }
}

#[derive(sqlx::FromRow)]
struct ContextRow {
    id: Uuid,
    session_id: Uuid,
    conversation_summary: String,
    user_concerns: Json<Vec<String>>,
    suggested_topics: Json<Vec<String>>,
    emotion_history: Json<Vec<EmotionReading>>,
    mood_trend: Option<String>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<ContextRow> for ChatbotContext {
    type Error = StoreError;

    fn try_from(row: ContextRow) -> StoreResult<Self> {
        Ok(ChatbotContext {
            id: row.id,
            session_id: row.session_id,
            conversation_summary: row.conversation_summary,
            user_concerns: row.user_concerns.0,
            suggested_topics: row.suggested_topics.0,
            emotion_history: row.emotion_history.0,
            mood_trend: opt_label(row.mood_trend)?,
            updated_at: row.updated_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct RecommendationRow {
    id: Uuid,
    content_type: String,
    emotion_trigger: String,
    title: String,
    content: String,
    artist: String,
    spotify_url: String,
    youtube_url: String,
    duration_minutes: Option<i32>,
    difficulty: Option<String>,
    is_active: bool,
    created_at: DateTime<Utc>,
    usage_count: i64,
}

impl TryFrom<RecommendationRow> for Recommendation {
    type Error = StoreError;

    fn try_from(row: RecommendationRow) -> StoreResult<Self> {
        Ok(Recommendation {
            id: row.id,
            content_type: label(&row.content_type)?,
            emotion_trigger: label(&row.emotion_trigger)?,
            title: row.title,
            content: row.content,
            artist: row.artist,
            spotify_url: row.spotify_url,
            youtube_url: row.youtube_url,
            duration_minutes: row.duration_minutes,
            difficulty: opt_label(row.difficulty)?,
            is_active: row.is_active,
            created_at: row.created_at,
            usage_count: row.usage_count,
        })
    }
}

#[derive(sqlx::FromRow)]
struct HistoryRow {
    id: Uuid,
    owner_id: i64,
    recommendation_id: Uuid,
    detected_emotion: String,
    emotion_confidence: f64,
    timestamp: DateTime<Utc>,
    was_clicked: bool,
    was_completed: bool,
    user_feedback: Option<String>,
    feedback_comment: String,
}

impl TryFrom<HistoryRow> for RecommendationHistory {
    type Error = StoreError;

    fn try_from(row: HistoryRow) -> StoreResult<Self> {
        Ok(RecommendationHistory {
            id: row.id,
            owner_id: row.owner_id,
            recommendation_id: row.recommendation_id,
            detected_emotion: label(&row.detected_emotion)?,
            emotion_confidence: row.emotion_confidence,
            timestamp: row.timestamp,
            was_clicked: row.was_clicked,
            was_completed: row.was_completed,
            user_feedback: opt_label(row.user_feedback)?,
            feedback_comment: row.feedback_comment,
        })
    }
}

#[derive(sqlx::FromRow)]
struct TypedHistoryRow {
    #[sqlx(flatten)]
    history: HistoryRow,
    rec_content_type: String,
}

#[derive(sqlx::FromRow)]
struct InsightRow {
    id: Uuid,
    owner_id: i64,
    start_date: NaiveDate,
    end_date: NaiveDate,
    most_common_emotion: String,
    emotion_distribution: Json<HashMap<String, u64>>,
    mood_trend: String,
    most_helpful_content_type: Option<String>,
    total_recommendations_received: i64,
    ai_summary: String,
    created_at: DateTime<Utc>,
}

impl TryFrom<InsightRow> for EmotionInsight {
    type Error = StoreError;

    fn try_from(row: InsightRow) -> StoreResult<Self> {
        Ok(EmotionInsight {
            id: row.id,
            owner_id: row.owner_id,
            start_date: row.start_date,
            end_date: row.end_date,
            most_common_emotion: label(&row.most_common_emotion)?,
            emotion_distribution: row.emotion_distribution.0,
            mood_trend: label(&row.mood_trend)?,
            most_helpful_content_type: opt_label(row.most_helpful_content_type)?,
            total_recommendations_received: row.total_recommendations_received,
            ai_summary: row.ai_summary,
            created_at: row.created_at,
        })
    }
}

fn convert_all<R, T>(rows: Vec<R>) -> StoreResult<Vec<T>>
where
    T: TryFrom<R, Error = StoreError>,
{
    rows.into_iter().map(T::try_from).collect()
}

// ============================================================================
// Emotion sessions
// ============================================================================

#[async_trait]
impl SessionStore for PgStore {
    async fn active_session(&self, owner_id: i64) -> StoreResult<EmotionSession> {
        let select = format!(
            "SELECT {SESSION_COLUMNS} FROM emotion_sessions WHERE owner_id = $1 AND is_active"
        );
        let insert = format!(
            r#"
            INSERT INTO emotion_sessions (id, owner_id, start_time, is_active)
            VALUES ($1, $2, $3, TRUE)
            ON CONFLICT (owner_id) WHERE is_active DO NOTHING
            RETURNING {SESSION_COLUMNS}
            "#
        );

        // The active row can be closed between our insert conflict and the
        // re-select, so the pair is retried a bounded number of times.
        for attempt in 0..ACTIVE_RETRIES {
            if let Some(row) = sqlx::query_as::<_, SessionRow>(&select)
                .bind(owner_id)
                .fetch_optional(&self.pool)
                .await?
            {
                return row.try_into();
            }

            let fresh = EmotionSession::open(owner_id, now());
            if let Some(row) = sqlx::query_as::<_, SessionRow>(&insert)
                .bind(fresh.id)
                .bind(owner_id)
                .bind(fresh.start_time)
                .fetch_optional(&self.pool)
                .await?
            {
                tracing::info!(owner_id, session_id = %row.id, "Opened emotion session");
                return row.try_into();
            }
            tracing::debug!(owner_id, attempt, "Active session insert raced, retrying");
        }

        Err(StoreError::Contention("session"))
    }

    async fn open_session(&self, owner_id: i64) -> StoreResult<EmotionSession> {
        let session = EmotionSession::open(owner_id, now());
        let result = sqlx::query(
            "INSERT INTO emotion_sessions (id, owner_id, start_time, is_active) VALUES ($1, $2, $3, TRUE)",
        )
        .bind(session.id)
        .bind(owner_id)
        .bind(session.start_time)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => {
                tracing::info!(owner_id, session_id = %session.id, "Opened emotion session");
                Ok(session)
            }
            Err(e) if is_unique_violation(&e) => Err(StoreError::AlreadyActive("session")),
            Err(e) => Err(e.into()),
        }
    }

    async fn get_session(&self, owner_id: i64, id: Uuid) -> StoreResult<EmotionSession> {
        let sql =
            format!("SELECT {SESSION_COLUMNS} FROM emotion_sessions WHERE id = $1 AND owner_id = $2");
        sqlx::query_as::<_, SessionRow>(&sql)
            .bind(id)
            .bind(owner_id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| StoreError::not_found("session", id))?
            .try_into()
    }

    async fn list_sessions(&self, owner_id: i64) -> StoreResult<Vec<EmotionSession>> {
        let sql = format!(
            "SELECT {SESSION_COLUMNS} FROM emotion_sessions WHERE owner_id = $1 ORDER BY start_time DESC"
        );
        let rows = sqlx::query_as::<_, SessionRow>(&sql)
            .bind(owner_id)
            .fetch_all(&self.pool)
            .await?;
        convert_all(rows)
    }

    async fn close_session(&self, owner_id: i64, id: Uuid) -> StoreResult<EmotionSession> {
        let mut tx = self.pool.begin().await?;

        let sql = format!(
            "SELECT {SESSION_COLUMNS} FROM emotion_sessions WHERE id = $1 AND owner_id = $2 FOR UPDATE"
        );
        let mut session: EmotionSession = sqlx::query_as::<_, SessionRow>(&sql)
            .bind(id)
            .bind(owner_id)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or_else(|| StoreError::not_found("session", id))?
            .try_into()?;

        if !session.is_active {
            tx.rollback().await?;
            return Ok(session);
        }

        let readings = sqlx::query_as::<_, (String, f64)>(
            r#"
            SELECT emotion_type, confidence
            FROM emotion_logs
            WHERE session_id = $1
            ORDER BY timestamp, id
            "#,
        )
        .bind(id)
        .fetch_all(&mut *tx)
        .await?
        .into_iter()
        .map(|(emotion, confidence)| -> StoreResult<(Emotion, f64)> {
            Ok((label(&emotion)?, confidence))
        })
        .collect::<StoreResult<Vec<_>>>()?;

        let stats = aggregate(readings);
        session.close_with(&stats, now());

        sqlx::query(
            r#"
            UPDATE emotion_sessions
            SET end_time = $2,
                is_active = FALSE,
                dominant_emotion = $3,
                average_confidence = $4,
                total_emotions_detected = $5
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(session.end_time)
        .bind(session.dominant_emotion.map(|e| e.as_str()))
        .bind(session.average_confidence)
        .bind(session.total_emotions_detected)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        tracing::info!(
            owner_id,
            session_id = %id,
            total = session.total_emotions_detected,
            "Closed emotion session"
        );
        Ok(session)
    }
}

// ============================================================================
// Emotion logs
// ============================================================================

#[async_trait]
impl EmotionLogStore for PgStore {
    async fn insert_log(&self, log: EmotionLog) -> StoreResult<EmotionLog> {
        let mut tx = self.pool.begin().await?;

        if let Some(session_id) = log.session_id {
            // FOR SHARE blocks a concurrent close until this insert commits
            let state: Option<(bool,)> = sqlx::query_as(
                "SELECT is_active FROM emotion_sessions WHERE id = $1 AND owner_id = $2 FOR SHARE",
            )
            .bind(session_id)
            .bind(log.owner_id)
            .fetch_optional(&mut *tx)
            .await?;

            match state {
                None => return Err(StoreError::not_found("session", session_id)),
                Some((false,)) => return Err(StoreError::SessionClosed(session_id)),
                Some((true,)) => {}
            }
        }

        sqlx::query(
            r#"
            INSERT INTO emotion_logs
                (id, owner_id, emotion_type, confidence, source, timestamp, session_id, raw_data)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(log.id)
        .bind(log.owner_id)
        .bind(log.emotion_type.as_str())
        .bind(log.confidence)
        .bind(log.source.as_str())
        .bind(log.timestamp)
        .bind(log.session_id)
        .bind(&log.raw_data)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(log)
    }

    async fn get_log(&self, owner_id: i64, id: Uuid) -> StoreResult<EmotionLog> {
        let sql = format!("SELECT {LOG_COLUMNS} FROM emotion_logs WHERE id = $1 AND owner_id = $2");
        sqlx::query_as::<_, LogRow>(&sql)
            .bind(id)
            .bind(owner_id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| StoreError::not_found("emotion log", id))?
            .try_into()
    }

    async fn list_logs(&self, owner_id: i64, filter: &LogFilter) -> StoreResult<Vec<EmotionLog>> {
        let sql = format!(
            r#"
            SELECT {LOG_COLUMNS}
            FROM emotion_logs
            WHERE owner_id = $1
              AND ($2::text IS NULL OR emotion_type = $2)
              AND ($3::text IS NULL OR source = $3)
              AND ($4::uuid IS NULL OR session_id = $4)
            ORDER BY timestamp DESC
            LIMIT $5
            "#
        );
        let rows = sqlx::query_as::<_, LogRow>(&sql)
            .bind(owner_id)
            .bind(filter.emotion.map(|e| e.as_str()))
            .bind(filter.source.map(|s| s.as_str()))
            .bind(filter.session_id)
            .bind(effective_limit(filter.limit) as i64)
            .fetch_all(&self.pool)
            .await?;
        convert_all(rows)
    }

    async fn session_logs(&self, owner_id: i64, session_id: Uuid) -> StoreResult<Vec<EmotionLog>> {
        let sql = format!(
            r#"
            SELECT {LOG_COLUMNS}
            FROM emotion_logs
            WHERE owner_id = $1 AND session_id = $2
            ORDER BY timestamp, id
            "#
        );
        let rows = sqlx::query_as::<_, LogRow>(&sql)
            .bind(owner_id)
            .bind(session_id)
            .fetch_all(&self.pool)
            .await?;
        convert_all(rows)
    }

    async fn logs_between(
        &self,
        owner_id: i64,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> StoreResult<Vec<EmotionLog>> {
        let sql = format!(
            r#"
            SELECT {LOG_COLUMNS}
            FROM emotion_logs
            WHERE owner_id = $1 AND timestamp >= $2 AND timestamp < $3
            ORDER BY timestamp, id
            "#
        );
        let rows = sqlx::query_as::<_, LogRow>(&sql)
            .bind(owner_id)
            .bind(from)
            .bind(to)
            .fetch_all(&self.pool)
            .await?;
        convert_all(rows)
    }
}

// ============================================================================
// Profiles
// ============================================================================

impl PgStore {
    async fn ensure_profile(&self, owner_id: i64) -> StoreResult<()> {
        sqlx::query(
            "INSERT INTO user_profiles (id, owner_id) VALUES ($1, $2) ON CONFLICT (owner_id) DO NOTHING",
        )
        .bind(Uuid::new_v4())
        .bind(owner_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn load_profile(&self, owner_id: i64) -> StoreResult<UserProfile> {
        let row = sqlx::query_as::<_, ProfileRow>(
            r#"
            SELECT p.id, p.owner_id, p.preferred_music_genre,
                   p.enable_voice_detection, p.enable_face_detection,
                   (SELECT COUNT(*) FROM emotion_sessions s WHERE s.owner_id = p.owner_id)
                       AS total_sessions,
                   p.created_at, p.updated_at
            FROM user_profiles p
            WHERE p.owner_id = $1
            "#,
        )
        .bind(owner_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(row.into())
    }
}

#[async_trait]
impl ProfileStore for PgStore {
    async fn profile(&self, owner_id: i64) -> StoreResult<UserProfile> {
        self.ensure_profile(owner_id).await?;
        self.load_profile(owner_id).await
    }

    async fn update_profile(
        &self,
        owner_id: i64,
        update: &ProfileUpdate,
    ) -> StoreResult<UserProfile> {
        self.ensure_profile(owner_id).await?;
        sqlx::query(
            r#"
            UPDATE user_profiles
            SET preferred_music_genre = COALESCE($2, preferred_music_genre),
                enable_voice_detection = COALESCE($3, enable_voice_detection),
                enable_face_detection = COALESCE($4, enable_face_detection),
                updated_at = now()
            WHERE owner_id = $1
            "#,
        )
        .bind(owner_id)
        .bind(update.preferred_music_genre.as_deref().map(str::trim))
        .bind(update.enable_voice_detection)
        .bind(update.enable_face_detection)
        .execute(&self.pool)
        .await?;
        self.load_profile(owner_id).await
    }
}

// ============================================================================
// Chat
// ============================================================================

#[async_trait]
impl ChatStore for PgStore {
    async fn active_chat_session(&self, owner_id: i64) -> StoreResult<ChatSession> {
        let select = format!(
            "SELECT {CHAT_SESSION_COLUMNS} FROM chat_sessions WHERE owner_id = $1 AND is_active"
        );
        let insert = format!(
            r#"
            INSERT INTO chat_sessions (id, owner_id, start_time, is_active)
            VALUES ($1, $2, $3, TRUE)
            ON CONFLICT (owner_id) WHERE is_active DO NOTHING
            RETURNING {CHAT_SESSION_COLUMNS}
            "#
        );

        for attempt in 0..ACTIVE_RETRIES {
            if let Some(row) = sqlx::query_as::<_, ChatSessionRow>(&select)
                .bind(owner_id)
                .fetch_optional(&self.pool)
                .await?
            {
                return row.try_into();
            }

            let fresh = ChatSession::open(owner_id, now());
            if let Some(row) = sqlx::query_as::<_, ChatSessionRow>(&insert)
                .bind(fresh.id)
                .bind(owner_id)
                .bind(fresh.start_time)
                .fetch_optional(&self.pool)
                .await?
            {
                tracing::info!(owner_id, session_id = %row.id, "Opened chat session");
                return row.try_into();
            }
            tracing::debug!(owner_id, attempt, "Active chat session insert raced, retrying");
        }

        Err(StoreError::Contention("chat session"))
    }

    async fn get_chat_session(&self, owner_id: i64, id: Uuid) -> StoreResult<ChatSession> {
        let sql = format!(
            "SELECT {CHAT_SESSION_COLUMNS} FROM chat_sessions WHERE id = $1 AND owner_id = $2"
        );
        sqlx::query_as::<_, ChatSessionRow>(&sql)
            .bind(id)
            .bind(owner_id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| StoreError::not_found("chat session", id))?
            .try_into()
    }

    async fn list_chat_sessions(&self, owner_id: i64) -> StoreResult<Vec<ChatSession>> {
        let sql = format!(
            "SELECT {CHAT_SESSION_COLUMNS} FROM chat_sessions WHERE owner_id = $1 ORDER BY start_time DESC"
        );
        let rows = sqlx::query_as::<_, ChatSessionRow>(&sql)
            .bind(owner_id)
            .fetch_all(&self.pool)
            .await?;
        convert_all(rows)
    }

    async fn close_chat_session(&self, owner_id: i64, id: Uuid) -> StoreResult<ChatSession> {
        let mut tx = self.pool.begin().await?;

        let sql = format!(
            "SELECT {CHAT_SESSION_COLUMNS} FROM chat_sessions WHERE id = $1 AND owner_id = $2 FOR UPDATE"
        );
        let mut session: ChatSession = sqlx::query_as::<_, ChatSessionRow>(&sql)
            .bind(id)
            .bind(owner_id)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or_else(|| StoreError::not_found("chat session", id))?
            .try_into()?;

        if !session.is_active {
            tx.rollback().await?;
            return Ok(session);
        }

        let (count,): (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM chat_messages WHERE session_id = $1")
                .bind(id)
                .fetch_one(&mut *tx)
                .await?;
        session.close_with(count, now());

        sqlx::query(
            "UPDATE chat_sessions SET end_time = $2, is_active = FALSE, total_messages = $3 WHERE id = $1",
        )
        .bind(id)
        .bind(session.end_time)
        .bind(session.total_messages)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        tracing::info!(owner_id, session_id = %id, messages = count, "Closed chat session");
        Ok(session)
    }

    async fn chat_messages(
        &self,
        owner_id: i64,
        session_id: Uuid,
    ) -> StoreResult<Vec<ChatMessage>> {
        self.get_chat_session(owner_id, session_id).await?;
        let sql = format!(
            r#"
            SELECT {MESSAGE_COLUMNS}
            FROM chat_messages
            WHERE session_id = $1
            ORDER BY timestamp, (sender = 'bot')
            "#
        );
        let rows = sqlx::query_as::<_, MessageRow>(&sql)
            .bind(session_id)
            .fetch_all(&self.pool)
            .await?;
        convert_all(rows)
    }

    async fn chat_context(
        &self,
        owner_id: i64,
        session_id: Uuid,
    ) -> StoreResult<Option<ChatbotContext>> {
        self.get_chat_session(owner_id, session_id).await?;
        let sql = format!("SELECT {CONTEXT_COLUMNS} FROM chatbot_contexts WHERE session_id = $1");
        sqlx::query_as::<_, ContextRow>(&sql)
            .bind(session_id)
            .fetch_optional(&self.pool)
            .await?
            .map(ChatbotContext::try_from)
            .transpose()
    }

    async fn record_turn(&self, owner_id: i64, turn: &ChatTurn) -> StoreResult<ChatbotContext> {
        let session_id = turn.user_message.session_id;
        let now = crate::models::now();
        let mut tx = self.pool.begin().await?;

        // Locking the session row serialises turns and closes for this session.
        let state: Option<(bool,)> = sqlx::query_as(
            "SELECT is_active FROM chat_sessions WHERE id = $1 AND owner_id = $2 FOR UPDATE",
        )
        .bind(session_id)
        .bind(owner_id)
        .fetch_optional(&mut *tx)
        .await?;
        match state {
            None => return Err(StoreError::not_found("chat session", session_id)),
            Some((false,)) => return Err(StoreError::SessionClosed(session_id)),
            Some((true,)) => {}
        }

        sqlx::query(
            r#"
            UPDATE chat_sessions
            SET initial_emotion = COALESCE(initial_emotion, $2),
                total_messages = total_messages + 2
            WHERE id = $1
            "#,
        )
        .bind(session_id)
        .bind(turn.user_message.detected_emotion.map(|e| e.as_str()))
        .execute(&mut *tx)
        .await?;

        for message in [&turn.user_message, &turn.bot_message] {
            sqlx::query(
                r#"
                INSERT INTO chat_messages
                    (id, session_id, sender, message, timestamp,
                     detected_emotion, emotion_confidence, response_type)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
                "#,
            )
            .bind(message.id)
            .bind(message.session_id)
            .bind(message.sender.as_str())
            .bind(&message.message)
            .bind(message.timestamp)
            .bind(message.detected_emotion.map(|e| e.as_str()))
            .bind(message.emotion_confidence)
            .bind(message.response_type.map(|r| r.as_str()))
            .execute(&mut *tx)
            .await?;
        }

        let sql = format!("SELECT {CONTEXT_COLUMNS} FROM chatbot_contexts WHERE session_id = $1");
        let mut context = match sqlx::query_as::<_, ContextRow>(&sql)
            .bind(session_id)
            .fetch_optional(&mut *tx)
            .await?
        {
            Some(row) => ChatbotContext::try_from(row)?,
            None => ChatbotContext::new(session_id, now),
        };
        context.record_turn(turn, now);

        sqlx::query(
            r#"
            INSERT INTO chatbot_contexts
                (id, session_id, conversation_summary, user_concerns,
                 suggested_topics, emotion_history, mood_trend, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ON CONFLICT (session_id) DO UPDATE
            SET conversation_summary = EXCLUDED.conversation_summary,
                user_concerns = EXCLUDED.user_concerns,
                suggested_topics = EXCLUDED.suggested_topics,
                emotion_history = EXCLUDED.emotion_history,
                mood_trend = EXCLUDED.mood_trend,
                updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(context.id)
        .bind(session_id)
        .bind(&context.conversation_summary)
        .bind(Json(&context.user_concerns))
        .bind(Json(&context.suggested_topics))
        .bind(Json(&context.emotion_history))
        .bind(context.mood_trend.map(|t| t.as_str()))
        .bind(context.updated_at)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(context)
    }
}

// ============================================================================
// Recommendations
// ============================================================================

#[async_trait]
impl RecommendationStore for PgStore {
    async fn insert_recommendation(&self, rec: Recommendation) -> StoreResult<Recommendation> {
        sqlx::query(
            r#"
            INSERT INTO recommendations
                (id, content_type, emotion_trigger, title, content, artist, spotify_url,
                 youtube_url, duration_minutes, difficulty, is_active, created_at, usage_count)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            "#,
        )
        .bind(rec.id)
        .bind(rec.content_type.as_str())
        .bind(rec.emotion_trigger.as_str())
        .bind(&rec.title)
        .bind(&rec.content)
        .bind(&rec.artist)
        .bind(&rec.spotify_url)
        .bind(&rec.youtube_url)
        .bind(rec.duration_minutes)
        .bind(rec.difficulty.map(|d| d.as_str()))
        .bind(rec.is_active)
        .bind(rec.created_at)
        .bind(rec.usage_count)
        .execute(&self.pool)
        .await?;
        Ok(rec)
    }

    async fn get_recommendation(&self, id: Uuid) -> StoreResult<Recommendation> {
        let sql = format!(
            "SELECT {RECOMMENDATION_COLUMNS} FROM recommendations WHERE id = $1 AND is_active"
        );
        sqlx::query_as::<_, RecommendationRow>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| StoreError::not_found("recommendation", id))?
            .try_into()
    }

    async fn list_recommendations(
        &self,
        emotion: Option<Emotion>,
        content_type: Option<ContentType>,
    ) -> StoreResult<Vec<Recommendation>> {
        let sql = format!(
            r#"
            SELECT {RECOMMENDATION_COLUMNS}
            FROM recommendations
            WHERE is_active
              AND ($1::text IS NULL OR emotion_trigger = $1)
              AND ($2::text IS NULL OR content_type = $2)
            ORDER BY usage_count DESC, created_at
            "#
        );
        let rows = sqlx::query_as::<_, RecommendationRow>(&sql)
            .bind(emotion.map(|e| e.as_str()))
            .bind(content_type.map(|c| c.as_str()))
            .fetch_all(&self.pool)
            .await?;
        convert_all(rows)
    }

    async fn record_history(
        &self,
        history: RecommendationHistory,
    ) -> StoreResult<RecommendationHistory> {
        let mut tx = self.pool.begin().await?;

        let bumped =
            sqlx::query("UPDATE recommendations SET usage_count = usage_count + 1 WHERE id = $1")
                .bind(history.recommendation_id)
                .execute(&mut *tx)
                .await?;
        if bumped.rows_affected() == 0 {
            return Err(StoreError::not_found(
                "recommendation",
                history.recommendation_id,
            ));
        }

        sqlx::query(
            r#"
            INSERT INTO recommendation_history
                (id, owner_id, recommendation_id, detected_emotion, emotion_confidence,
                 timestamp, was_clicked, was_completed, user_feedback, feedback_comment)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(history.id)
        .bind(history.owner_id)
        .bind(history.recommendation_id)
        .bind(history.detected_emotion.as_str())
        .bind(history.emotion_confidence)
        .bind(history.timestamp)
        .bind(history.was_clicked)
        .bind(history.was_completed)
        .bind(history.user_feedback.map(|f| f.as_str()))
        .bind(&history.feedback_comment)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(history)
    }

    async fn list_history(&self, owner_id: i64) -> StoreResult<Vec<RecommendationHistory>> {
        let sql = format!(
            "SELECT {HISTORY_COLUMNS} FROM recommendation_history WHERE owner_id = $1 ORDER BY timestamp DESC"
        );
        let rows = sqlx::query_as::<_, HistoryRow>(&sql)
            .bind(owner_id)
            .fetch_all(&self.pool)
            .await?;
        convert_all(rows)
    }

    async fn update_feedback(
        &self,
        owner_id: i64,
        id: Uuid,
        update: &FeedbackUpdate,
    ) -> StoreResult<RecommendationHistory> {
        let sql = format!(
            r#"
            UPDATE recommendation_history
            SET user_feedback = $3,
                feedback_comment = $4,
                was_clicked = COALESCE($5, was_clicked),
                was_completed = COALESCE($6, was_completed)
            WHERE id = $1 AND owner_id = $2
            RETURNING {HISTORY_COLUMNS}
            "#
        );
        sqlx::query_as::<_, HistoryRow>(&sql)
            .bind(id)
            .bind(owner_id)
            .bind(update.feedback.as_str())
            .bind(&update.comment)
            .bind(update.was_clicked)
            .bind(update.was_completed)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| StoreError::not_found("recommendation history", id))?
            .try_into()
    }

    async fn history_between(
        &self,
        owner_id: i64,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> StoreResult<Vec<(RecommendationHistory, ContentType)>> {
        let rows = sqlx::query_as::<_, TypedHistoryRow>(
            r#"
            SELECT h.id, h.owner_id, h.recommendation_id, h.detected_emotion,
                   h.emotion_confidence, h.timestamp, h.was_clicked, h.was_completed,
                   h.user_feedback, h.feedback_comment,
                   r.content_type AS rec_content_type
            FROM recommendation_history h
            JOIN recommendations r ON r.id = h.recommendation_id
            WHERE h.owner_id = $1 AND h.timestamp >= $2 AND h.timestamp < $3
            ORDER BY h.timestamp
            "#,
        )
        .bind(owner_id)
        .bind(from)
        .bind(to)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|row| -> StoreResult<(RecommendationHistory, ContentType)> {
                let content_type = label(&row.rec_content_type)?;
                Ok((row.history.try_into()?, content_type))
            })
            .collect()
    }
}

// ============================================================================
// Insights
// ============================================================================

#[async_trait]
impl InsightStore for PgStore {
    async fn insert_insight(&self, insight: EmotionInsight) -> StoreResult<EmotionInsight> {
        sqlx::query(
            r#"
            INSERT INTO emotion_insights
                (id, owner_id, start_date, end_date, most_common_emotion, emotion_distribution,
                 mood_trend, most_helpful_content_type, total_recommendations_received,
                 ai_summary, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            "#,
        )
        .bind(insight.id)
        .bind(insight.owner_id)
        .bind(insight.start_date)
        .bind(insight.end_date)
        .bind(insight.most_common_emotion.as_str())
        .bind(Json(&insight.emotion_distribution))
        .bind(insight.mood_trend.as_str())
        .bind(insight.most_helpful_content_type.map(|c| c.as_str()))
        .bind(insight.total_recommendations_received)
        .bind(&insight.ai_summary)
        .bind(insight.created_at)
        .execute(&self.pool)
        .await?;
        Ok(insight)
    }

    async fn list_insights(&self, owner_id: i64) -> StoreResult<Vec<EmotionInsight>> {
        let sql = format!(
            "SELECT {INSIGHT_COLUMNS} FROM emotion_insights WHERE owner_id = $1 ORDER BY end_date DESC, created_at DESC"
        );
        let rows = sqlx::query_as::<_, InsightRow>(&sql)
            .bind(owner_id)
            .fetch_all(&self.pool)
            .await?;
        convert_all(rows)
    }

    async fn get_insight(&self, owner_id: i64, id: Uuid) -> StoreResult<EmotionInsight> {
        let sql =
            format!("SELECT {INSIGHT_COLUMNS} FROM emotion_insights WHERE id = $1 AND owner_id = $2");
        sqlx::query_as::<_, InsightRow>(&sql)
            .bind(id)
            .bind(owner_id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| StoreError::not_found("insight", id))?
            .try_into()
    }
}
