//! Post reads, writes, ranked listings and likes.

mod commands;
mod likes;
mod queries;
mod service;
mod types;

#[cfg(test)]
pub(crate) mod test_support;

pub use service::{PostService, PostServiceParts, READ_ATTEMPTS};
pub use types::{CreatePostCommand, DEFAULT_TAG, UpdatePostCommand};
