//! Persistent data models for the download gate.
//!
//! Rows map to database tables via `sqlx::FromRow`; committed grants are
//! logged as JSON via `serde`.

pub mod grant;
