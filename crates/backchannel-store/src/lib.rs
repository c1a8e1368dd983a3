//! # backchannel-store
//!
//! Durable conversation/message storage for Backchannel, backed by SQLite.
//!
//! The hub never touches this crate; clients write messages here first and
//! only then ask the hub to relay them, so the store is the source of truth
//! on reload.  The crate exposes a synchronous [`Database`] handle that wraps
//! a `rusqlite::Connection` and provides typed CRUD helpers for every domain
//! model.

pub mod conversations;
pub mod database;
pub mod messages;
pub mod migrations;
pub mod models;

mod error;

pub use database::Database;
pub use error::StoreError;
pub use models::*;
