//! Recommendation catalog, emotion-keyed selection and interaction history.

use emotionsense_core::models::{
    ContentType, Emotion, FeedbackUpdate, NewHistory, NewRecommendation, Recommendation,
    RecommendationHistory,
};
use emotionsense_core::store::EmotionStore;
use rand::seq::SliceRandom;
use rand::Rng;
use serde::Deserialize;
use uuid::Uuid;

use crate::error::ApiError;

#[derive(Debug, Default, Deserialize)]
pub struct CatalogQuery {
    pub emotion: Option<Emotion>,
    #[serde(rename = "type")]
    pub content_type: Option<ContentType>,
}

/// Uniform sample without replacement of at most `n` items.
pub fn sample<R: Rng + ?Sized>(
    candidates: &[Recommendation],
    n: usize,
    rng: &mut R,
) -> Vec<Recommendation> {
    candidates.choose_multiple(rng, n).cloned().collect()
}

/// Random picks for an emotion; a missing emotion means `neutral`.
pub async fn for_emotion(
    store: &dyn EmotionStore,
    sample_size: usize,
    query: CatalogQuery,
) -> Result<Vec<Recommendation>, ApiError> {
    let emotion = query.emotion.unwrap_or(Emotion::Neutral);
    let candidates = store
        .list_recommendations(Some(emotion), query.content_type)
        .await?;
    let picked = sample(&candidates, sample_size, &mut rand::thread_rng());
    tracing::debug!(
        emotion = %emotion,
        content_type = ?query.content_type,
        matches = candidates.len(),
        returned = picked.len(),
        "Selected recommendations"
    );
    Ok(picked)
}

pub async fn list_items(
    store: &dyn EmotionStore,
    query: CatalogQuery,
) -> Result<Vec<Recommendation>, ApiError> {
    Ok(store
        .list_recommendations(query.emotion, query.content_type)
        .await?)
}

pub async fn get_item(store: &dyn EmotionStore, id: Uuid) -> Result<Recommendation, ApiError> {
    Ok(store.get_recommendation(id).await?)
}

pub async fn create_item(
    store: &dyn EmotionStore,
    req: NewRecommendation,
) -> Result<Recommendation, ApiError> {
    req.validate().map_err(ApiError::BadRequest)?;
    let rec = store.insert_recommendation(req.into_recommendation()).await?;
    tracing::info!(
        id = %rec.id,
        emotion = %rec.emotion_trigger,
        content_type = %rec.content_type,
        "Recommendation created"
    );
    Ok(rec)
}

pub async fn record_history(
    store: &dyn EmotionStore,
    owner: i64,
    req: NewHistory,
) -> Result<RecommendationHistory, ApiError> {
    req.validate().map_err(ApiError::BadRequest)?;
    Ok(store.record_history(req.into_history(owner)).await?)
}

pub async fn list_history(
    store: &dyn EmotionStore,
    owner: i64,
) -> Result<Vec<RecommendationHistory>, ApiError> {
    Ok(store.list_history(owner).await?)
}

pub async fn submit_feedback(
    store: &dyn EmotionStore,
    owner: i64,
    id: Uuid,
    update: FeedbackUpdate,
) -> Result<RecommendationHistory, ApiError> {
    Ok(store.update_feedback(owner, id, &update).await?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use emotionsense_core::models::Feedback;
    use emotionsense_core::MemoryStore;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use std::collections::HashSet;

    fn item(emotion: Emotion, content_type: ContentType, title: &str) -> NewRecommendation {
        NewRecommendation {
            content_type,
            emotion_trigger: emotion,
            title: title.to_string(),
            content: format!("{title} content"),
            artist: String::new(),
            spotify_url: String::new(),
            youtube_url: String::new(),
            duration_minutes: None,
            difficulty: None,
        }
    }

    #[test]
    fn test_sample_has_no_duplicates_and_respects_size() {
        let items: Vec<Recommendation> = (0..8)
            .map(|i| item(Emotion::Sad, ContentType::Quote, &format!("q{i}")).into_recommendation())
            .collect();
        let mut rng = StdRng::seed_from_u64(7);

        let picked = sample(&items, 5, &mut rng);
        assert_eq!(picked.len(), 5);
        let ids: HashSet<Uuid> = picked.iter().map(|r| r.id).collect();
        assert_eq!(ids.len(), 5);

        assert_eq!(sample(&items[..2], 5, &mut rng).len(), 2);
        assert!(sample(&[], 5, &mut rng).is_empty());
    }

    #[tokio::test]
    async fn test_for_emotion_filters_by_emotion_and_type() {
        let store = MemoryStore::new();
        for i in 0..7 {
            create_item(&store, item(Emotion::Sad, ContentType::Music, &format!("m{i}")))
                .await
                .unwrap();
        }
        create_item(&store, item(Emotion::Sad, ContentType::Quote, "quote"))
            .await
            .unwrap();
        create_item(&store, item(Emotion::Happy, ContentType::Music, "other"))
            .await
            .unwrap();

        let picked = for_emotion(
            &store,
            5,
            CatalogQuery {
                emotion: Some(Emotion::Sad),
                content_type: Some(ContentType::Music),
            },
        )
        .await
        .unwrap();
        assert_eq!(picked.len(), 5);
        assert!(picked
            .iter()
            .all(|r| r.emotion_trigger == Emotion::Sad && r.content_type == ContentType::Music));

        let none = for_emotion(&store, 5, CatalogQuery::default()).await.unwrap();
        assert!(none.is_empty(), "no neutral items were authored");
    }

    #[tokio::test]
    async fn test_history_and_feedback() {
        let store = MemoryStore::new();
        let rec = create_item(&store, item(Emotion::Worried, ContentType::Activity, "walk"))
            .await
            .unwrap();

        let history = record_history(
            &store,
            3,
            NewHistory {
                recommendation_id: rec.id,
                detected_emotion: Emotion::Worried,
                emotion_confidence: 0.6,
                was_clicked: true,
                was_completed: false,
            },
        )
        .await
        .unwrap();
        assert_eq!(get_item(&store, rec.id).await.unwrap().usage_count, 1);

        let updated = submit_feedback(
            &store,
            3,
            history.id,
            FeedbackUpdate {
                feedback: Feedback::Helpful,
                comment: "calmed me down".into(),
                was_clicked: None,
                was_completed: Some(true),
            },
        )
        .await
        .unwrap();
        assert_eq!(updated.user_feedback, Some(Feedback::Helpful));
        assert!(updated.was_completed);

        let foreign = submit_feedback(
            &store,
            4,
            history.id,
            FeedbackUpdate {
                feedback: Feedback::Neutral,
                comment: String::new(),
                was_clicked: None,
                was_completed: None,
            },
        )
        .await;
        assert!(matches!(foreign, Err(ApiError::NotFound(_))));
    }
}
