//! Mood trend over a sequence of emotions.

use crate::models::{Emotion, MoodTrend};

/// Number of most recent readings considered.
pub const TREND_WINDOW: usize = 10;

const TREND_THRESHOLD: f64 = 0.25;

/// Trend over the most recent [`TREND_WINDOW`] readings.
///
/// Input is chronological. Fewer than two readings yields `None`.
pub fn mood_trend(emotions: &[Emotion]) -> Option<MoodTrend> {
    let start = emotions.len().saturating_sub(TREND_WINDOW);
    overall_trend(&emotions[start..])
}

/// Compare mean valence of the later half of `emotions` with the earlier half.
pub fn overall_trend(emotions: &[Emotion]) -> Option<MoodTrend> {
    if emotions.len() < 2 {
        return None;
    }

    let mid = emotions.len() / 2;
    let delta = mean_valence(&emotions[mid..]) - mean_valence(&emotions[..mid]);

    Some(if delta > TREND_THRESHOLD {
        MoodTrend::Improving
    } else if delta < -TREND_THRESHOLD {
        MoodTrend::Declining
    } else {
        MoodTrend::Stable
    })
}

fn mean_valence(emotions: &[Emotion]) -> f64 {
    emotions.iter().map(Emotion::valence).sum::<f64>() / emotions.len() as f64
}
