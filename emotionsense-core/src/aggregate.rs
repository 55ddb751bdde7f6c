//! Summary statistics over a set of emotion readings.

use std::collections::HashMap;

use serde::Serialize;

use crate::models::Emotion;

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct EmotionStats {
    pub total: usize,
    /// Most frequent label; ties go to the label seen first.
    pub dominant_emotion: Option<Emotion>,
    pub average_confidence: Option<f64>,
}

/// Aggregate `(emotion, confidence)` pairs in the order given.
///
/// Empty input leaves both the dominant emotion and the average unset.
pub fn aggregate<I>(readings: I) -> EmotionStats
where
    I: IntoIterator<Item = (Emotion, f64)>,
{
    // first-seen order is kept so ties resolve deterministically
    let mut counts: Vec<(Emotion, usize)> = Vec::new();
    let mut total = 0usize;
    let mut confidence_sum = 0.0f64;

    for (emotion, confidence) in readings {
        total += 1;
        confidence_sum += confidence;
        match counts.iter_mut().find(|(e, _)| *e == emotion) {
            Some((_, n)) => *n += 1,
            None => counts.push((emotion, 1)),
        }
    }

    if total == 0 {
        return EmotionStats::default();
    }

    let mut dominant: Option<(Emotion, usize)> = None;
    for &(emotion, n) in &counts {
        if dominant.map_or(true, |(_, best)| n > best) {
            dominant = Some((emotion, n));
        }
    }

    EmotionStats {
        total,
        dominant_emotion: dominant.map(|(e, _)| e),
        average_confidence: Some(confidence_sum / total as f64),
    }
}

/// Occurrence count per label, keyed by the label text.
pub fn distribution<I>(emotions: I) -> HashMap<String, u64>
where
    I: IntoIterator<Item = Emotion>,
{
    let mut out = HashMap::new();
    for emotion in emotions {
        *out.entry(emotion.as_str().to_string()).or_insert(0) += 1;
    }
    out
}
