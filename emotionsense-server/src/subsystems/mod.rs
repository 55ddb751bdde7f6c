pub mod chat;
pub mod detect;
pub mod insights;
pub mod profile;
pub mod recommend;
pub mod sessions;
