//! Personalized feed assembly: daily featured excerpts, category-based
//! recommendations and isolated catalog sections, served through a versioned
//! cache, plus a bounded pipeline that ingests view events.

pub mod api;
pub mod config;
pub mod db;
pub mod error;
pub mod middleware;
pub mod models;
pub mod services;
