//! Backup lifecycle for database dumps kept in S3-compatible storage.
//!
//! The interesting part is [`services::reconciler`]: it verifies an
//! uploaded artifact by regenerating the multipart ETag the store computed,
//! without knowing the part size the uploader used.

pub mod config;
pub mod errors;
pub mod models;
pub mod services;
