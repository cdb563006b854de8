//! Application services: post operations, deferred jobs and startup wiring.

pub mod engine;
pub mod error;
pub mod jobs;
pub mod posts;
pub mod repos;
