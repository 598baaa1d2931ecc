//! Persistence layer for the document export service.
//!
//! This crate contains:
//! - Database connection management and embedded migrations
//! - Entity definitions (database row mappings)
//! - PostgreSQL implementations of the domain storage capabilities

pub mod db;
pub mod entities;
pub mod metrics;
pub mod repositories;
