//! Infrastructure adapters and runtime bootstrap.

pub mod db;
pub mod error;
pub mod memory;
pub mod memory_posts;
pub mod redis;
pub mod telemetry;
