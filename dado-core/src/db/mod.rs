//! Database layer for dado
//!
//! This module provides the storage layer using SQLite with:
//! - Schema migrations
//! - The persisted processing cursor
//! - A log of handled requests

pub mod cursor;
pub mod repo;
pub mod schema;

pub use cursor::{CursorStore, MemoryCursorStore};
pub use repo::Database;
