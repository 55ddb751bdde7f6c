//! The owner's profile and detection preferences.

use emotionsense_core::models::{ProfileUpdate, UserProfile};
use emotionsense_core::store::EmotionStore;

use crate::error::ApiError;

pub async fn get_profile(store: &dyn EmotionStore, owner: i64) -> Result<UserProfile, ApiError> {
    Ok(store.profile(owner).await?)
}

pub async fn update_profile(
    store: &dyn EmotionStore,
    owner: i64,
    update: ProfileUpdate,
) -> Result<UserProfile, ApiError> {
    update.validate().map_err(ApiError::BadRequest)?;
    let profile = store.update_profile(owner, &update).await?;
    tracing::debug!(
        owner,
        face = profile.enable_face_detection,
        voice = profile.enable_voice_detection,
        "Profile updated"
    );
    Ok(profile)
}
