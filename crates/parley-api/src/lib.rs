//! Parley API crate - axum HTTP server and route handlers.
//!
//! Provides the REST API: chat with retrieval-augmented answers, per-session
//! history, the conversation list, session reset and a health check.

pub mod error;
pub mod handlers;
pub mod routes;
pub mod state;

pub use error::ApiError;
pub use routes::{create_router, start_server};
pub use state::AppState;
