//! postrank: cache-aside reads, write invalidation and popularity ranking
//! for a Postgres-backed post store.

pub mod application;
pub mod cache;
pub mod config;
pub mod domain;
pub mod infra;
pub mod resilience;
