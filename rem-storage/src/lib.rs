//! REM Storage - PostgreSQL Adapter
//!
//! Owns the pooled connection set, the typed row codec over entity
//! descriptors, and the transactional upsert path. The schema generator
//! derives DDL (tables, embeddings siblings, key-store triggers, indexes)
//! from the same descriptors the query engine validates against, and the
//! embedding worker keeps the sibling embeddings tables populated without
//! blocking ingestion.

mod codec;
mod config;
mod db;
mod diff;
mod repository;
mod schema;
mod worker;

pub use codec::*;
pub use config::*;
pub use db::*;
pub use diff::*;
pub use repository::*;
pub use schema::*;
pub use worker::*;
