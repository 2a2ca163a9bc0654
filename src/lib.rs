//! Mentora — conversational tutoring core.
//!
//! Library root; the service binary lives in `src/main.rs`.

pub mod config;
pub mod error;
pub mod llm;
pub mod logger;
pub mod model;
pub mod runtime;
pub mod store;
pub mod tutor;

#[cfg(feature = "channel-axum")]
pub mod comms;
