//! Document export service: configuration, export services, background
//! jobs and the HTTP surface.

pub mod app;
pub mod config;
pub mod error;
pub mod extractors;
pub mod jobs;
pub mod middleware;
pub mod routes;
pub mod services;
