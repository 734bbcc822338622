//! Parley Storage crate - SQLite conversation log.
//!
//! Provides a WAL-mode SQLite database with versioned migrations and the
//! append-only [`ConversationStore`] over the `messages` table.

pub mod db;
pub mod migrations;
pub mod repository;

pub use db::Database;
pub use repository::ConversationStore;
