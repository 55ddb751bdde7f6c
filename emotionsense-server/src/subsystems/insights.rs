//! Emotion insights over a date range.
//!
//! An insight is computed once from the owner's emotion logs and
//! recommendation history, stored, and served read-only afterwards.

use chrono::{DateTime, Days, NaiveDate, Utc};
use emotionsense_core::aggregate::{aggregate, distribution};
use emotionsense_core::models::{
    now, ContentType, EmotionInsight, EmotionLog, Feedback, MoodTrend, RecommendationHistory,
};
use emotionsense_core::mood::overall_trend;
use emotionsense_core::store::EmotionStore;
use serde::Deserialize;
use uuid::Uuid;

use crate::error::ApiError;

#[derive(Debug, Deserialize)]
pub struct GenerateInsightRequest {
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
}

fn day_start(date: NaiveDate) -> DateTime<Utc> {
    date.and_time(chrono::NaiveTime::MIN).and_utc()
}

/// Content type with the most "helpful" ratings; ties go to the earliest rated.
pub fn most_helpful_content_type(
    history: &[(RecommendationHistory, ContentType)],
) -> Option<ContentType> {
    let mut counts: Vec<(ContentType, usize)> = Vec::new();
    for (entry, content_type) in history {
        if entry.user_feedback != Some(Feedback::Helpful) {
            continue;
        }
        match counts.iter_mut().find(|(c, _)| c == content_type) {
            Some((_, n)) => *n += 1,
            None => counts.push((*content_type, 1)),
        }
    }

    let mut best: Option<(ContentType, usize)> = None;
    for &(content_type, n) in &counts {
        if best.map_or(true, |(_, top)| n > top) {
            best = Some((content_type, n));
        }
    }
    best.map(|(c, _)| c)
}

/// Build the insight from logs (chronological) and history in the range.
pub fn build_insight(
    owner: i64,
    req: &GenerateInsightRequest,
    logs: &[EmotionLog],
    history: &[(RecommendationHistory, ContentType)],
) -> Option<EmotionInsight> {
    let stats = aggregate(logs.iter().map(|l| (l.emotion_type, l.confidence)));
    let most_common = stats.dominant_emotion?;

    let emotions: Vec<_> = logs.iter().map(|l| l.emotion_type).collect();
    let trend = overall_trend(&emotions).unwrap_or(MoodTrend::Stable);
    let helpful = most_helpful_content_type(history);
    let dist = distribution(emotions.iter().copied());
    let share = dist.get(most_common.as_str()).copied().unwrap_or(0) as f64 * 100.0
        / stats.total as f64;

    let mut summary = format!(
        "Between {} and {} you logged {} emotions. Most common was {} ({:.0}%). Your mood trend was {}.",
        req.start_date, req.end_date, stats.total, most_common, share, trend
    );
    if let Some(content_type) = helpful {
        summary.push_str(&format!(
            " {} recommendations were the most helpful for you.",
            capitalize(content_type.as_str())
        ));
    }

    Some(EmotionInsight {
        id: Uuid::new_v4(),
        owner_id: owner,
        start_date: req.start_date,
        end_date: req.end_date,
        most_common_emotion: most_common,
        emotion_distribution: dist,
        mood_trend: trend,
        most_helpful_content_type: helpful,
        total_recommendations_received: history.len() as i64,
        ai_summary: summary,
        created_at: now(),
    })
}

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

pub async fn generate(
    store: &dyn EmotionStore,
    owner: i64,
    req: GenerateInsightRequest,
) -> Result<EmotionInsight, ApiError> {
    if req.start_date > req.end_date {
        return Err(ApiError::BadRequest(
            "start_date must not be after end_date".into(),
        ));
    }
    let from = day_start(req.start_date);
    let to = req
        .end_date
        .checked_add_days(Days::new(1))
        .map(day_start)
        .ok_or_else(|| ApiError::BadRequest("end_date is out of range".into()))?;

    let logs = store.logs_between(owner, from, to).await?;
    let history = store.history_between(owner, from, to).await?;

    let insight = build_insight(owner, &req, &logs, &history).ok_or_else(|| {
        ApiError::BadRequest("no emotion logs recorded in the requested range".into())
    })?;
    let insight = store.insert_insight(insight).await?;

    tracing::info!(
        owner,
        insight_id = %insight.id,
        logs = logs.len(),
        recommendations = history.len(),
        "Generated emotion insight"
    );
    Ok(insight)
}

pub async fn list(store: &dyn EmotionStore, owner: i64) -> Result<Vec<EmotionInsight>, ApiError> {
    Ok(store.list_insights(owner).await?)
}

pub async fn get(
    store: &dyn EmotionStore,
    owner: i64,
    id: Uuid,
) -> Result<EmotionInsight, ApiError> {
    Ok(store.get_insight(owner, id).await?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use emotionsense_core::models::{Emotion, EmotionSource, NewEmotionLog, NewHistory};
    use emotionsense_core::store::EmotionLogStore;
    use emotionsense_core::MemoryStore;

    fn log(emotion: Emotion) -> EmotionLog {
        NewEmotionLog {
            emotion_type: emotion,
            confidence: 0.8,
            source: EmotionSource::Face,
            session_id: None,
            raw_data: None,
        }
        .into_log(1, None)
    }

    fn rated(
        content_type: ContentType,
        feedback: Option<Feedback>,
    ) -> (RecommendationHistory, ContentType) {
        let mut h = NewHistory {
            recommendation_id: Uuid::new_v4(),
            detected_emotion: Emotion::Sad,
            emotion_confidence: 0.5,
            was_clicked: true,
            was_completed: true,
        }
        .into_history(1);
        h.user_feedback = feedback;
        (h, content_type)
    }

    fn today_range() -> GenerateInsightRequest {
        let today = Utc::now().date_naive();
        GenerateInsightRequest {
            start_date: today,
            end_date: today,
        }
    }

    #[test]
    fn test_most_helpful_counts_only_helpful() {
        let history = vec![
            rated(ContentType::Music, Some(Feedback::NotHelpful)),
            rated(ContentType::Music, Some(Feedback::NotHelpful)),
            rated(ContentType::Quote, Some(Feedback::Helpful)),
            rated(ContentType::Activity, None),
        ];
        assert_eq!(most_helpful_content_type(&history), Some(ContentType::Quote));
        assert_eq!(most_helpful_content_type(&history[..2]), None);
    }

    #[test]
    fn test_build_insight_summarises_logs() {
        let logs: Vec<EmotionLog> = [
            Emotion::Sad,
            Emotion::Sad,
            Emotion::Happy,
            Emotion::Happy,
            Emotion::Happy,
        ]
        .into_iter()
        .map(log)
        .collect();
        let history = vec![rated(ContentType::Music, Some(Feedback::Helpful))];
        let insight = build_insight(1, &today_range(), &logs, &history).unwrap();

        assert_eq!(insight.most_common_emotion, Emotion::Happy);
        assert_eq!(insight.emotion_distribution["sad"], 2);
        assert_eq!(insight.mood_trend, MoodTrend::Improving);
        assert_eq!(insight.most_helpful_content_type, Some(ContentType::Music));
        assert_eq!(insight.total_recommendations_received, 1);
        assert!(insight.ai_summary.contains("Music recommendations"));
    }

    #[test]
    fn test_no_logs_means_no_insight() {
        assert!(build_insight(1, &today_range(), &[], &[]).is_none());
    }

    #[tokio::test]
    async fn test_generate_rejects_inverted_range() {
        let store = MemoryStore::new();
        let today = Utc::now().date_naive();
        let req = GenerateInsightRequest {
            start_date: today,
            end_date: today - Days::new(1),
        };
        assert!(matches!(generate(&store, 1, req).await, Err(ApiError::BadRequest(_))));
    }

    #[tokio::test]
    async fn test_generate_stores_insight() {
        let store = MemoryStore::new();
        for emotion in [Emotion::Worried, Emotion::Worried, Emotion::Neutral] {
            store.insert_log(log(emotion)).await.unwrap();
        }

        let insight = generate(&store, 1, today_range()).await.unwrap();
        assert_eq!(insight.most_common_emotion, Emotion::Worried);
        assert_eq!(get(&store, 1, insight.id).await.unwrap(), insight);
        assert_eq!(list(&store, 1).await.unwrap().len(), 1);
        assert!(get(&store, 2, insight.id).await.is_err());
    }
}
