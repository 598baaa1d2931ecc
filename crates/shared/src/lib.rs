//! Shared utilities and common types for the document export service.
//!
//! This crate provides common functionality used across all other crates:
//! - Content digests for produced archives
//! - Keyset pagination cursors
//! - Filter and filename validation helpers

pub mod crypto;
pub mod pagination;
pub mod validation;
