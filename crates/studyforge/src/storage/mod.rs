//! Persistence: SQLite metadata and content-addressed blobs

pub mod blob_store;
pub mod database;

pub use blob_store::{BlobStore, FsBlobStore};
pub use database::Database;
