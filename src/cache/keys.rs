//! Cache key layout shared with every instance of the service.

use uuid::Uuid;

const POST_INFO_PREFIX: &str = "post:post_info:";
const POST_LIKE_PREFIX: &str = "post:post_like:";
const POST_LOCK_PREFIX: &str = "post:post_lock:";

/// Rotating counter that spreads cache entry expirations.
pub const TTL_COUNTER_KEY: &str = "post:post_info:expire";
/// Sorted set holding the popularity ranking.
pub const HOT_RANK_KEY: &str = "post:post_rank:hot";

pub fn post_info_key(id: Uuid) -> String {
    format!("{POST_INFO_PREFIX}{id}")
}

pub fn post_like_key(id: Uuid) -> String {
    format!("{POST_LIKE_PREFIX}{id}")
}

pub fn post_lock_key(id: Uuid) -> String {
    format!("{POST_LOCK_PREFIX}{id}")
}

/// Recover the post id from a `post:post_info:{id}` key.
pub fn parse_post_info_key(key: &str) -> Option<Uuid> {
    key.strip_prefix(POST_INFO_PREFIX)
        .and_then(|raw| Uuid::parse_str(raw).ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn info_keys_parse_back_to_ids() {
        let id = Uuid::new_v4();
        assert_eq!(parse_post_info_key(&post_info_key(id)), Some(id));
        assert_eq!(parse_post_info_key(TTL_COUNTER_KEY), None);
        assert_eq!(parse_post_info_key(&post_like_key(id)), None);
    }
}
