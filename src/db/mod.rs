//! Database module: models, schema and typed queries.
//!
//! Layout:
//! - `models.rs`: Rust structs mirroring DB rows
//! - `schema.rs`: SQL DDL and seed rows (SQLite-first)
//! - `sqlite.rs`: `CrmStorage` itself plus users, roles and dispositions
//! - `customers.rs`, `finance.rs`, `comms.rs`, `docs.rs`, `work.rs`: per-area queries

pub mod comms;
pub mod customers;
pub mod docs;
pub mod finance;
pub mod models;
pub mod schema;
pub mod sqlite;
pub mod work;

pub use schema::SQLITE_INIT;
pub use sqlite::{CrmStorage, SqlitePool};
