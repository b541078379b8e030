//! # causerie-store
//!
//! Durable storage for messages and conversations, backed by SQLite.
//!
//! The crate exposes a synchronous [`Database`] handle wrapping a
//! `rusqlite::Connection` with typed CRUD helpers. Message identity,
//! sequence number, and creation timestamp are assigned here, never by the
//! sender; the `(created_at, seq)` pair is the stable sort key history
//! pagination relies on.

pub mod conversations;
pub mod database;
pub mod messages;
pub mod migrations;
pub mod models;

mod error;

pub use database::Database;
pub use error::StoreError;
pub use models::NewMessage;
