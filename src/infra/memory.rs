//! In-process cache tier with the same semantics as the Redis tier.
//!
//! Used for single-node runs and tests. Expiry is evaluated lazily on access
//! against the tokio clock, so paused-time tests can advance it.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;

use crate::cache::lock::mutex_lock;
use crate::cache::{CacheError, CacheTier};

const SOURCE: &str = "infra::memory";

#[derive(Debug)]
enum Value {
    Str(String),
    Set(HashSet<String>),
    SortedSet(HashMap<String, f64>),
}

#[derive(Debug)]
struct Entry {
    value: Value,
    expires_at: Option<Instant>,
}

#[derive(Debug, Default)]
pub struct MemoryCacheTier {
    entries: Mutex<HashMap<String, Entry>>,
    unavailable: AtomicBool,
    failing_deletes: AtomicU32,
}

impl MemoryCacheTier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate an outage: while unavailable every operation fails.
    pub fn set_available(&self, available: bool) {
        self.unavailable.store(!available, Ordering::SeqCst);
    }

    /// Make the next `count` deletes fail.
    pub fn fail_next_deletes(&self, count: u32) {
        self.failing_deletes.store(count, Ordering::SeqCst);
    }

    fn check(&self) -> Result<(), CacheError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(CacheError::unavailable("memory tier marked unavailable"));
        }
        Ok(())
    }

    fn with_entries<R>(
        &self,
        op: &'static str,
        f: impl FnOnce(&mut HashMap<String, Entry>) -> Result<R, CacheError>,
    ) -> Result<R, CacheError> {
        self.check()?;
        let mut entries = mutex_lock(&self.entries, SOURCE, op);
        let now = Instant::now();
        entries.retain(|_, entry| entry.expires_at.is_none_or(|at| at > now));
        f(&mut entries)
    }
}

fn wrong_type(key: &str) -> CacheError {
    CacheError::unavailable(format!(
        "WRONGTYPE operation against key `{key}` holding the wrong kind of value"
    ))
}

#[async_trait]
impl CacheTier for MemoryCacheTier {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        self.with_entries("get", |entries| match entries.get(key) {
            None => Ok(None),
            Some(Entry {
                value: Value::Str(value),
                ..
            }) => Ok(Some(value.clone())),
            Some(_) => Err(wrong_type(key)),
        })
    }

    async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<(), CacheError> {
        self.with_entries("set_ex", |entries| {
            entries.insert(
                key.to_string(),
                Entry {
                    value: Value::Str(value.to_string()),
                    expires_at: Some(Instant::now() + ttl),
                },
            );
            Ok(())
        })
    }

    async fn delete(&self, key: &str) -> Result<(), CacheError> {
        let failing = self
            .failing_deletes
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        if failing.is_ok() {
            return Err(CacheError::unavailable("injected delete failure"));
        }
        self.with_entries("delete", |entries| {
            entries.remove(key);
            Ok(())
        })
    }

    async fn incr_wrapping(&self, key: &str, ceiling: i64, floor: i64) -> Result<i64, CacheError> {
        self.with_entries("incr_wrapping", |entries| {
            let entry = entries.entry(key.to_string()).or_insert_with(|| Entry {
                value: Value::Str("0".to_string()),
                expires_at: None,
            });
            let Value::Str(raw) = &mut entry.value else {
                return Err(wrong_type(key));
            };
            let current: i64 = raw
                .parse()
                .map_err(|_| CacheError::unavailable("value is not an integer"))?;
            let mut next = current.saturating_add(1);
            if next > ceiling {
                next = floor;
            }
            *raw = next.to_string();
            Ok(next)
        })
    }

    async fn set_add(&self, key: &str, member: &str) -> Result<bool, CacheError> {
        self.with_entries("set_add", |entries| {
            let entry = entries.entry(key.to_string()).or_insert_with(|| Entry {
                value: Value::Set(HashSet::new()),
                expires_at: None,
            });
            match &mut entry.value {
                Value::Set(set) => Ok(set.insert(member.to_string())),
                _ => Err(wrong_type(key)),
            }
        })
    }

    async fn set_remove(&self, key: &str, member: &str) -> Result<bool, CacheError> {
        self.with_entries("set_remove", |entries| match entries.get_mut(key) {
            None => Ok(false),
            Some(Entry {
                value: Value::Set(set),
                ..
            }) => Ok(set.remove(member)),
            Some(_) => Err(wrong_type(key)),
        })
    }

    async fn set_contains(&self, key: &str, member: &str) -> Result<bool, CacheError> {
        self.with_entries("set_contains", |entries| match entries.get(key) {
            None => Ok(false),
            Some(Entry {
                value: Value::Set(set),
                ..
            }) => Ok(set.contains(member)),
            Some(_) => Err(wrong_type(key)),
        })
    }

    async fn zset_add(&self, key: &str, members: &[(String, f64)]) -> Result<(), CacheError> {
        self.with_entries("zset_add", |entries| {
            let entry = entries.entry(key.to_string()).or_insert_with(|| Entry {
                value: Value::SortedSet(HashMap::new()),
                expires_at: None,
            });
            let Value::SortedSet(set) = &mut entry.value else {
                return Err(wrong_type(key));
            };
            for (member, score) in members {
                set.insert(member.clone(), *score);
            }
            Ok(())
        })
    }

    async fn zset_remove(&self, key: &str, member: &str) -> Result<(), CacheError> {
        self.with_entries("zset_remove", |entries| match entries.get_mut(key) {
            None => Ok(()),
            Some(Entry {
                value: Value::SortedSet(set),
                ..
            }) => {
                set.remove(member);
                Ok(())
            }
            Some(_) => Err(wrong_type(key)),
        })
    }

    async fn zset_rev_range_with_scores(
        &self,
        key: &str,
        start: i64,
        stop: i64,
    ) -> Result<Vec<(String, f64)>, CacheError> {
        self.with_entries("zset_rev_range_with_scores", |entries| {
            let set = match entries.get(key) {
                None => return Ok(Vec::new()),
                Some(Entry {
                    value: Value::SortedSet(set),
                    ..
                }) => set,
                Some(_) => return Err(wrong_type(key)),
            };
            // Redis orders equal scores by member, reversed for ZREVRANGE.
            let mut ranked: Vec<(String, f64)> = set
                .iter()
                .map(|(member, score)| (member.clone(), *score))
                .collect();
            ranked.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| b.0.cmp(&a.0)));

            let len = ranked.len() as i64;
            let resolve = |index: i64| if index < 0 { len + index } else { index };
            let (start, stop) = (resolve(start).max(0), resolve(stop).min(len - 1));
            if start > stop || start >= len {
                return Ok(Vec::new());
            }
            Ok(ranked
                .into_iter()
                .skip(start as usize)
                .take((stop - start + 1) as usize)
                .collect())
        })
    }

    async fn set_nx_px(&self, key: &str, value: &str, ttl: Duration) -> Result<bool, CacheError> {
        self.with_entries("set_nx_px", |entries| {
            if entries.contains_key(key) {
                return Ok(false);
            }
            entries.insert(
                key.to_string(),
                Entry {
                    value: Value::Str(value.to_string()),
                    expires_at: Some(Instant::now() + ttl),
                },
            );
            Ok(true)
        })
    }

    async fn delete_if_equals(&self, key: &str, value: &str) -> Result<bool, CacheError> {
        self.with_entries("delete_if_equals", |entries| {
            let owned = matches!(
                entries.get(key),
                Some(Entry { value: Value::Str(current), .. }) if current == value
            );
            if owned {
                entries.remove(key);
            }
            Ok(owned)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn entries_expire_on_the_tokio_clock() {
        let tier = MemoryCacheTier::new();
        tier.set_ex("k", "v", Duration::from_secs(10))
            .await
            .expect("set");
        tokio::time::advance(Duration::from_secs(9)).await;
        assert_eq!(tier.get("k").await.expect("get").as_deref(), Some("v"));
        tokio::time::advance(Duration::from_secs(2)).await;
        assert_eq!(tier.get("k").await.expect("get"), None);
    }

    #[tokio::test]
    async fn reverse_range_handles_out_of_bounds() {
        let tier = MemoryCacheTier::new();
        tier.zset_add(
            "z",
            &[("a".into(), 1.0), ("b".into(), 3.0), ("c".into(), 2.0)],
        )
        .await
        .expect("add");

        let all = tier.zset_rev_range_with_scores("z", 0, -1).await.expect("range");
        let members: Vec<&str> = all.iter().map(|(m, _)| m.as_str()).collect();
        assert_eq!(members, vec!["b", "c", "a"]);
        assert!(
            tier.zset_rev_range_with_scores("z", 5, 9)
                .await
                .expect("range")
                .is_empty()
        );
        assert_eq!(
            tier.zset_rev_range_with_scores("z", 1, 99)
                .await
                .expect("range")
                .len(),
            2
        );
    }

    #[tokio::test]
    async fn set_nx_only_sets_absent_keys() {
        let tier = MemoryCacheTier::new();
        let ttl = Duration::from_secs(5);
        assert!(tier.set_nx_px("lock", "a", ttl).await.expect("nx"));
        assert!(!tier.set_nx_px("lock", "b", ttl).await.expect("nx"));
        assert!(!tier.delete_if_equals("lock", "b").await.expect("cad"));
        assert!(tier.delete_if_equals("lock", "a").await.expect("cad"));
    }

    #[tokio::test]
    async fn outage_fails_every_operation() {
        let tier = MemoryCacheTier::new();
        tier.set_available(false);
        assert!(tier.get("k").await.is_err());
        assert!(tier.set_add("s", "m").await.is_err());
        tier.set_available(true);
        assert!(tier.get("k").await.expect("get").is_none());
    }
}
