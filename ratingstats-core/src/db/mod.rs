//! Database layer for ratingstats
//!
//! SQLite storage for the reference host:
//! - Schema migrations
//! - Forms, fields and submissions behind the collaborator traits
//! - The persistent cache regeneration queue

pub mod repo;
pub mod schema;

pub use repo::Database;
