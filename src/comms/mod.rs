//! Axum-based HTTP channel — the realtime chat protocol on `/ws` plus a JSON
//! API under `/api/`.
//!
//! [`AxumChannel`] implements [`Component`]: `run()` drives the axum event
//! loop and the shared [`CancellationToken`] is wired to axum's graceful
//! shutdown. Open WebSocket sessions watch the same token.
//!
//! ## URL layout
//!
//! ```text
//! GET    /api/health
//! GET    /ws                                 realtime generate/chunk/complete/error
//! GET    /api/conversations/{id}/turns
//! POST   /api/conversations/{id}/turns
//! GET    /api/conversations/{id}/follow-ups
//! POST   /api/curricula
//! GET    /api/curricula/{id}
//! DELETE /api/curricula/{id}
//! GET    /api/users/{id}/curricula
//! PUT    /api/users/{id}/profile
//! POST   /api/units/{id}/complete
//! ```

mod api;
mod ws;

use std::sync::Arc;

use axum::{
    Router,
    routing::{get, post, put},
};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::error::AppError;
use crate::runtime::{Component, ComponentFuture};
use crate::tutor::Tutor;

pub use ws::ChatSession;

// ── Shared request state ──────────────────────────────────────────────────────

/// Axum router state injected into every handler via [`axum::extract::State`].
///
/// Cheap to clone; all fields are reference-counted.
#[derive(Clone)]
pub(crate) struct AxumState {
    /// Channel identifier used in log spans.
    pub channel_id: Arc<str>,
    pub tutor: Arc<Tutor>,
    /// Cancelled on service shutdown; parent of every session token.
    pub shutdown: CancellationToken,
}

// ── AxumChannel ───────────────────────────────────────────────────────────────

pub struct AxumChannel {
    channel_id: String,
    bind_addr: String,
    tutor: Arc<Tutor>,
}

impl AxumChannel {
    pub fn new(channel_id: impl Into<String>, bind_addr: impl Into<String>, tutor: Arc<Tutor>) -> Self {
        Self {
            channel_id: channel_id.into(),
            bind_addr: bind_addr.into(),
            tutor,
        }
    }
}

impl Component for AxumChannel {
    fn id(&self) -> &str {
        &self.channel_id
    }

    fn run(self: Box<Self>, shutdown: CancellationToken) -> ComponentFuture {
        Box::pin(run_axum(self.channel_id, self.bind_addr, self.tutor, shutdown))
    }
}

// ── Server loop ───────────────────────────────────────────────────────────────

async fn run_axum(
    channel_id: String,
    bind_addr: String,
    tutor: Arc<Tutor>,
    shutdown: CancellationToken,
) -> Result<(), AppError> {
    let state = AxumState {
        channel_id: Arc::from(channel_id.as_str()),
        tutor,
        shutdown: shutdown.clone(),
    };

    let router = build_router(state);

    let listener = TcpListener::bind(&bind_addr)
        .await
        .map_err(|e| AppError::Comms(format!("axum bind failed on {bind_addr}: {e}")))?;

    info!(%channel_id, %bind_addr, "axum channel listening");

    axum::serve(listener, router)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
        .map_err(|e| AppError::Comms(format!("axum server error: {e}")))?;

    info!(%channel_id, "axum channel shut down");
    Ok(())
}

// ── Router ────────────────────────────────────────────────────────────────────

pub(crate) fn build_router(state: AxumState) -> Router {
    Router::new()
        .route("/ws",                                         get(ws::upgrade))
        .route("/api/health",                                 get(api::health))
        .route("/api/conversations/{conversation_id}/turns",  get(api::get_turns).post(api::append_turn))
        .route("/api/conversations/{conversation_id}/follow-ups", get(api::follow_ups))
        .route("/api/curricula",                              post(api::create_curriculum))
        .route("/api/curricula/{curriculum_id}",              get(api::get_curriculum).delete(api::delete_curriculum))
        .route("/api/users/{user_id}/curricula",              get(api::list_curricula))
        .route("/api/users/{user_id}/profile",                put(api::save_profile))
        .route("/api/units/{unit_id}/complete",               post(api::complete_unit))
        .with_state(state)
}
