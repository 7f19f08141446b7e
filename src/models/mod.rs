//! Core data models for the media storage service.
//!
//! These entities represent principals resolved from bearer tokens and the
//! relational index rows describing uploaded media. They map cleanly to
//! database tables via `sqlx::FromRow` and serialize naturally as JSON via
//! `serde`.

pub mod media;
pub mod principal;
