//! SQLite persistence for vidsift.
//!
//! [`SqliteStore`] implements [`vidsift_core::VideoStore`] over a single
//! connection. Fingerprint rows are keyed by their uid so every video row of
//! an equivalence group points at the same fingerprint row, even when the
//! rows were written in different batches.

mod queries;
mod sqlite;

pub use queries::{StoreCounts, StoredGroup};
pub use sqlite::{SCHEMA_VERSION, SqliteStore};
