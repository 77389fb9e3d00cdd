//! The narrow shared-store contract the coordinator runs against, plus the
//! concrete Redis adapter.

use async_trait::async_trait;

use crate::error::Error;

/// Atomically increments a counter key and wraps the result into
/// `[1, total]`, so concurrent callers racing past `total` still each get a
/// value in range rather than an ever-growing counter.
///
/// `KEYS[1]`: counter key. `ARGV[1]`: total (max worker id + 1).
pub const LUA_COUNTER_WITH_WRAP: &str = r#"
local total = tonumber(ARGV[1])
local counter = redis.call('INCR', KEYS[1])
if counter > total then
    local next_val = ((counter - 1) % total) + 1
    redis.call('SET', KEYS[1], tostring(next_val))
    return next_val
end
return counter
"#;

/// Atomically verifies `instance_id` ownership and refreshes a worker
/// record's TTL. Parses with `cjson`, a tolerant JSON parser, since a
/// regex or substring check would break on quotes embedded in e.g. `ip`.
///
/// `KEYS[1]`: worker key. `ARGV[1]`: new record JSON. `ARGV[2]`: expected
/// instance id. `ARGV[3]`: TTL in seconds.
///
/// Returns 1 on success, 0 on instance_id mismatch, -1 if the key is
/// absent, -2 if the stored value isn't parseable.
pub const LUA_GUARDED_REFRESH: &str = r#"
local current = redis.call('GET', KEYS[1])
if not current then
    return -1
end
local ok, decoded = pcall(cjson.decode, current)
if not ok or not decoded or type(decoded.instance_id) ~= 'string' then
    return -2
end
if decoded.instance_id ~= ARGV[2] then
    return 0
end
redis.call('SET', KEYS[1], ARGV[1], 'EX', ARGV[3])
return 1
"#;

/// The storage operations the coordinator needs. A `RedisStore` is the
/// shipped reference adapter; any store that can offer the same atomicity
/// guarantees (an atomic counter, set-if-absent with expiry, and the two
/// scripted operations above) can implement this trait instead.
#[async_trait]
pub trait SharedStore: Send + Sync {
    async fn incr(&self, key: &str) -> Result<i64, Error>;

    /// Sets `key` to `value` with a TTL, only if it did not already exist.
    /// Returns `true` if the value was set.
    async fn set_if_absent(&self, key: &str, value: &str, ttl_secs: u64) -> Result<bool, Error>;

    /// See [`LUA_COUNTER_WITH_WRAP`].
    async fn eval_counter_with_wrap(&self, counter_key: &str, total: i64) -> Result<i64, Error>;

    /// See [`LUA_GUARDED_REFRESH`].
    async fn eval_guarded_refresh(
        &self,
        worker_key: &str,
        payload: &str,
        expected_instance_id: &str,
        ttl_secs: u64,
    ) -> Result<i64, Error>;

    async fn set_add(&self, set_key: &str, member: &str) -> Result<(), Error>;
    async fn set_remove(&self, set_key: &str, member: &str) -> Result<(), Error>;
    async fn get(&self, key: &str) -> Result<Option<String>, Error>;
    async fn delete(&self, key: &str) -> Result<(), Error>;
    async fn members(&self, set_key: &str) -> Result<Vec<String>, Error>;
}

#[cfg(feature = "redis")]
mod redis_store {
    use super::{Error, SharedStore, LUA_COUNTER_WITH_WRAP, LUA_GUARDED_REFRESH};
    use async_trait::async_trait;
    use redis::{aio::ConnectionManager, AsyncCommands, Script};

    /// A [`SharedStore`] backed by a Redis-compatible server, using a
    /// [`ConnectionManager`] for automatic reconnection.
    pub struct RedisStore {
        conn: ConnectionManager,
        counter_script: Script,
        refresh_script: Script,
    }

    impl RedisStore {
        pub fn new(conn: ConnectionManager) -> Self {
            Self {
                conn,
                counter_script: Script::new(LUA_COUNTER_WITH_WRAP),
                refresh_script: Script::new(LUA_GUARDED_REFRESH),
            }
        }

        fn map_err(err: redis::RedisError) -> Error {
            Error::StoreUnavailable {
                reason: err.to_string(),
            }
        }
    }

    #[async_trait]
    impl SharedStore for RedisStore {
        async fn incr(&self, key: &str) -> Result<i64, Error> {
            let mut conn = self.conn.clone();
            conn.incr(key, 1).await.map_err(Self::map_err)
        }

        async fn set_if_absent(&self, key: &str, value: &str, ttl_secs: u64) -> Result<bool, Error> {
            let mut conn = self.conn.clone();
            let opts = redis::SetOptions::default()
                .conditional_set(redis::ExistenceCheck::NX)
                .with_expiration(redis::SetExpiry::EX(ttl_secs as usize));
            let result: Option<String> = conn
                .set_options(key, value, opts)
                .await
                .map_err(Self::map_err)?;
            Ok(result.is_some())
        }

        async fn eval_counter_with_wrap(&self, counter_key: &str, total: i64) -> Result<i64, Error> {
            let mut conn = self.conn.clone();
            self.counter_script
                .key(counter_key)
                .arg(total)
                .invoke_async(&mut conn)
                .await
                .map_err(Self::map_err)
        }

        async fn eval_guarded_refresh(
            &self,
            worker_key: &str,
            payload: &str,
            expected_instance_id: &str,
            ttl_secs: u64,
        ) -> Result<i64, Error> {
            let mut conn = self.conn.clone();
            self.refresh_script
                .key(worker_key)
                .arg(payload)
                .arg(expected_instance_id)
                .arg(ttl_secs)
                .invoke_async(&mut conn)
                .await
                .map_err(Self::map_err)
        }

        async fn set_add(&self, set_key: &str, member: &str) -> Result<(), Error> {
            let mut conn = self.conn.clone();
            let _: i64 = conn.sadd(set_key, member).await.map_err(Self::map_err)?;
            Ok(())
        }

        async fn set_remove(&self, set_key: &str, member: &str) -> Result<(), Error> {
            let mut conn = self.conn.clone();
            let _: i64 = conn.srem(set_key, member).await.map_err(Self::map_err)?;
            Ok(())
        }

        async fn get(&self, key: &str) -> Result<Option<String>, Error> {
            let mut conn = self.conn.clone();
            conn.get(key).await.map_err(Self::map_err)
        }

        async fn delete(&self, key: &str) -> Result<(), Error> {
            let mut conn = self.conn.clone();
            let _: i64 = conn.del(key).await.map_err(Self::map_err)?;
            Ok(())
        }

        async fn members(&self, set_key: &str) -> Result<Vec<String>, Error> {
            let mut conn = self.conn.clone();
            conn.smembers(set_key).await.map_err(Self::map_err)
        }
    }
}

#[cfg(feature = "redis")]
pub use redis_store::RedisStore;

#[cfg(any(test, feature = "test-support"))]
pub mod mock {
    use super::*;
    use std::collections::{HashMap, HashSet};
    use std::sync::Mutex;

    /// An in-memory [`SharedStore`] exercising the same allocation and
    /// lease-refresh semantics as Redis, without a live server. TTLs are
    /// tracked but never expire on their own — tests simulate expiry by
    /// calling [`InMemoryStore::expire`] explicitly.
    #[derive(Default)]
    pub struct InMemoryStore {
        inner: Mutex<Inner>,
    }

    #[derive(Default)]
    struct Inner {
        values: HashMap<String, String>,
        counters: HashMap<String, i64>,
        sets: HashMap<String, HashSet<String>>,
    }

    impl InMemoryStore {
        pub fn new() -> Self {
            Self::default()
        }

        /// Simulates TTL expiry for a key (the lease loss path).
        pub fn expire(&self, key: &str) {
            self.inner.lock().unwrap().values.remove(key);
        }
    }

    #[async_trait]
    impl SharedStore for InMemoryStore {
        async fn incr(&self, key: &str) -> Result<i64, Error> {
            let mut inner = self.inner.lock().unwrap();
            let v = inner.counters.entry(key.to_string()).or_insert(0);
            *v += 1;
            Ok(*v)
        }

        async fn set_if_absent(&self, key: &str, value: &str, _ttl_secs: u64) -> Result<bool, Error> {
            let mut inner = self.inner.lock().unwrap();
            if inner.values.contains_key(key) {
                Ok(false)
            } else {
                inner.values.insert(key.to_string(), value.to_string());
                Ok(true)
            }
        }

        async fn eval_counter_with_wrap(&self, counter_key: &str, total: i64) -> Result<i64, Error> {
            let mut inner = self.inner.lock().unwrap();
            let v = inner.counters.entry(counter_key.to_string()).or_insert(0);
            *v += 1;
            if *v > total {
                *v = ((*v - 1) % total) + 1;
            }
            Ok(*v)
        }

        async fn eval_guarded_refresh(
            &self,
            worker_key: &str,
            payload: &str,
            expected_instance_id: &str,
            _ttl_secs: u64,
        ) -> Result<i64, Error> {
            let mut inner = self.inner.lock().unwrap();
            let Some(current) = inner.values.get(worker_key) else {
                return Ok(-1);
            };
            let Ok(parsed) = crate::worker_record::WorkerRecord::from_json(current) else {
                return Ok(-2);
            };
            if parsed.instance_id != expected_instance_id {
                return Ok(0);
            }
            inner.values.insert(worker_key.to_string(), payload.to_string());
            Ok(1)
        }

        async fn set_add(&self, set_key: &str, member: &str) -> Result<(), Error> {
            let mut inner = self.inner.lock().unwrap();
            inner
                .sets
                .entry(set_key.to_string())
                .or_default()
                .insert(member.to_string());
            Ok(())
        }

        async fn set_remove(&self, set_key: &str, member: &str) -> Result<(), Error> {
            let mut inner = self.inner.lock().unwrap();
            if let Some(set) = inner.sets.get_mut(set_key) {
                set.remove(member);
            }
            Ok(())
        }

        async fn get(&self, key: &str) -> Result<Option<String>, Error> {
            Ok(self.inner.lock().unwrap().values.get(key).cloned())
        }

        async fn delete(&self, key: &str) -> Result<(), Error> {
            self.inner.lock().unwrap().values.remove(key);
            Ok(())
        }

        async fn members(&self, set_key: &str) -> Result<Vec<String>, Error> {
            Ok(self
                .inner
                .lock()
                .unwrap()
                .sets
                .get(set_key)
                .map(|s| s.iter().cloned().collect())
                .unwrap_or_default())
        }
    }

    #[tokio::test]
    async fn counter_with_wrap_stays_in_range() {
        let store = InMemoryStore::new();
        for expected in 1..=5 {
            assert_eq!(
                store.eval_counter_with_wrap("k", 5).await.unwrap(),
                expected
            );
        }
        // wraps back to 1 on the 6th call
        assert_eq!(store.eval_counter_with_wrap("k", 5).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn guarded_refresh_reports_all_four_outcomes() {
        let store = InMemoryStore::new();
        assert_eq!(
            store
                .eval_guarded_refresh("w", "{}", "instance-a", 30)
                .await
                .unwrap(),
            -1
        );

        store.set_if_absent("w", "not json", 30).await.unwrap();
        assert_eq!(
            store
                .eval_guarded_refresh("w", "{}", "instance-a", 30)
                .await
                .unwrap(),
            -2
        );

        let record = crate::worker_record::WorkerRecord {
            worker_id: 0,
            datacenter_id: 0,
            ip: "1.2.3.4".to_string(),
            register_time: 0,
            last_heartbeat: 0,
            instance_id: "instance-a".to_string(),
        };
        store.delete("w").await.unwrap();
        store.set_if_absent("w", &record.to_json(), 30).await.unwrap();
        assert_eq!(
            store
                .eval_guarded_refresh("w", &record.to_json(), "instance-b", 30)
                .await
                .unwrap(),
            0
        );
        assert_eq!(
            store
                .eval_guarded_refresh("w", &record.to_json(), "instance-a", 30)
                .await
                .unwrap(),
            1
        );
    }
}
