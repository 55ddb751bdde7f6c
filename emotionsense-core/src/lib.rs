pub mod aggregate;
pub mod config;
pub mod db;
pub mod detector;
pub mod error;
pub mod models;
pub mod mood;
pub mod responder;
pub mod store;

pub use aggregate::{aggregate, distribution, EmotionStats};
pub use config::EmotionSenseConfig;
pub use detector::{
    create_face_detector, create_voice_detector, Detection, DetectionFailure, DetectorError,
    EmotionDetector, HttpFaceDetector, MediaInput, PlaceholderVoiceDetector,
};
pub use error::{EmotionSenseError, StoreError};
pub use mood::{mood_trend, overall_trend};
pub use responder::respond;
pub use store::{EmotionStore, MemoryStore, PgStore};
