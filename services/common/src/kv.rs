//! Cache abstraction over the depth/ticker/candle store
//!
//! The engine and the aggregator only ever touch the cache through the [`Kv`]
//! trait: plain string/list/hash commands plus one composite operation,
//! [`Kv::update_live_candle`], which must be atomic with respect to other
//! writers. The Redis implementation runs it as a single server-side Lua
//! script; the in-memory implementation reproduces the same transition for
//! tests.

use crate::constants::{keys, CLOSED_CANDLE_CAP};
use crate::errors::EngineResult;
use crate::types::{Price, Quantity};
use async_trait::async_trait;
use parking_lot::Mutex;
use redis::AsyncCommands;
use rustc_hash::FxHashMap;
use std::collections::VecDeque;
use tracing::debug;

/// Cache operations required by the engine core and the aggregator
#[async_trait]
pub trait Kv: Send + Sync {
    /// GET
    async fn get(&self, key: &str) -> EngineResult<Option<String>>;

    /// SET
    async fn set(&self, key: &str, value: &str) -> EngineResult<()>;

    /// SETEX
    async fn set_ex(&self, key: &str, value: &str, ttl_secs: u64) -> EngineResult<()>;

    /// DEL
    async fn del(&self, key: &str) -> EngineResult<()>;

    /// KEYS (glob pattern)
    async fn keys(&self, pattern: &str) -> EngineResult<Vec<String>>;

    /// LPUSH (new head)
    async fn lpush(&self, key: &str, value: &str) -> EngineResult<()>;

    /// LTRIM (inclusive range, negative indexes count from the tail)
    async fn ltrim(&self, key: &str, start: i64, stop: i64) -> EngineResult<()>;

    /// LRANGE (inclusive range)
    async fn lrange(&self, key: &str, start: i64, stop: i64) -> EngineResult<Vec<String>>;

    /// HGETALL
    async fn hgetall(&self, key: &str) -> EngineResult<FxHashMap<String, String>>;

    /// Atomic live 1m candle update for one trade.
    ///
    /// Against `candle:1m:<symbol>`: create the hash when absent, fold the
    /// trade in when the stored minute matches, or close the stored candle
    /// onto `candle:closed:1m:<symbol>` (head) and start a fresh one when the
    /// minute has advanced. Caps the closed list at 1000 and refreshes both
    /// TTLs.
    async fn update_live_candle(
        &self,
        symbol: &str,
        price: Price,
        qty: Quantity,
        minute_key: &str,
    ) -> EngineResult<()>;
}

/// Live-candle transition, executed server-side so concurrent trades of one
/// symbol can never interleave between the read of `t` and the writes.
const CANDLE_LUA: &str = r#"
local key = KEYS[1]
local closedKey = KEYS[2]
local price = tonumber(ARGV[1])
local qty = tonumber(ARGV[2])
local minute = ARGV[3]

local current_t = redis.call("HGET", key, "t")

if current_t and current_t < minute then
    local oldArr = redis.call("HGETALL", key)
    if #oldArr > 0 then
        local oldObj = {}
        for i = 1, #oldArr, 2 do
            oldObj[oldArr[i]] = oldArr[i + 1]
        end
        redis.call("LPUSH", closedKey, cjson.encode(oldObj))
        redis.call("LTRIM", closedKey, 0, 999)
    end
    redis.call("HMSET", key, "o", price, "h", price, "l", price, "c", price, "v", qty, "t", minute)
elseif not current_t then
    redis.call("HMSET", key, "o", price, "h", price, "l", price, "c", price, "v", qty, "t", minute)
else
    local h = tonumber(redis.call("HGET", key, "h"))
    local l = tonumber(redis.call("HGET", key, "l"))
    if price > h then redis.call("HSET", key, "h", price) end
    if price < l then redis.call("HSET", key, "l", price) end
    redis.call("HSET", key, "c", price)
    redis.call("HINCRBY", key, "v", qty)
end

redis.call("EXPIRE", key, 300)
redis.call("EXPIRE", closedKey, 3600)

return "OK"
"#;

/// Redis-backed cache
pub struct RedisKv {
    conn: redis::aio::ConnectionManager,
    candle_script: redis::Script,
}

impl RedisKv {
    /// Connect to the cache at `url` (e.g. `redis://host:6379`)
    pub async fn connect(url: &str) -> EngineResult<Self> {
        let client = redis::Client::open(url)
            .map_err(crate::errors::EngineError::from)?;
        let conn = client.get_connection_manager().await?;
        debug!(url, "cache connected");
        Ok(Self {
            conn,
            candle_script: redis::Script::new(CANDLE_LUA),
        })
    }
}

#[async_trait]
impl Kv for RedisKv {
    async fn get(&self, key: &str) -> EngineResult<Option<String>> {
        let mut conn = self.conn.clone();
        let value: Option<String> = conn.get(key).await?;
        Ok(value)
    }

    async fn set(&self, key: &str, value: &str) -> EngineResult<()> {
        let mut conn = self.conn.clone();
        let (): () = conn.set(key, value).await?;
        Ok(())
    }

    async fn set_ex(&self, key: &str, value: &str, ttl_secs: u64) -> EngineResult<()> {
        let mut conn = self.conn.clone();
        let (): () = conn.set_ex(key, value, ttl_secs).await?;
        Ok(())
    }

    async fn del(&self, key: &str) -> EngineResult<()> {
        let mut conn = self.conn.clone();
        let (): () = conn.del(key).await?;
        Ok(())
    }

    async fn keys(&self, pattern: &str) -> EngineResult<Vec<String>> {
        let mut conn = self.conn.clone();
        let found: Vec<String> = conn.keys(pattern).await?;
        Ok(found)
    }

    async fn lpush(&self, key: &str, value: &str) -> EngineResult<()> {
        let mut conn = self.conn.clone();
        let (): () = conn.lpush(key, value).await?;
        Ok(())
    }

    async fn ltrim(&self, key: &str, start: i64, stop: i64) -> EngineResult<()> {
        let mut conn = self.conn.clone();
        let (): () = conn.ltrim(key, start as isize, stop as isize).await?;
        Ok(())
    }

    async fn lrange(&self, key: &str, start: i64, stop: i64) -> EngineResult<Vec<String>> {
        let mut conn = self.conn.clone();
        let values: Vec<String> = conn.lrange(key, start as isize, stop as isize).await?;
        Ok(values)
    }

    async fn hgetall(&self, key: &str) -> EngineResult<FxHashMap<String, String>> {
        let mut conn = self.conn.clone();
        let fields: std::collections::HashMap<String, String> = conn.hgetall(key).await?;
        Ok(fields.into_iter().collect())
    }

    async fn update_live_candle(
        &self,
        symbol: &str,
        price: Price,
        qty: Quantity,
        minute_key: &str,
    ) -> EngineResult<()> {
        let mut conn = self.conn.clone();
        let live_key = format!("{}{symbol}", keys::CANDLE_LIVE_PREFIX);
        let closed_key = format!("{}{symbol}", keys::CANDLE_CLOSED_PREFIX);
        let _: String = self
            .candle_script
            .key(live_key)
            .key(closed_key)
            .arg(price)
            .arg(qty)
            .arg(minute_key)
            .invoke_async(&mut conn)
            .await?;
        Ok(())
    }
}

#[derive(Debug, Clone)]
enum Value {
    Str(String),
    List(VecDeque<String>),
    Hash(FxHashMap<String, String>),
}

/// In-memory cache with the same observable semantics as [`RedisKv`].
///
/// Used by the test suites and any environment without a cache. TTLs are not
/// simulated. `KEYS` supports the prefix patterns the services actually use
/// (`prefix*`).
#[derive(Default)]
pub struct MemoryKv {
    data: Mutex<FxHashMap<String, Value>>,
}

impl MemoryKv {
    /// Create an empty store
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn list_range(list: &VecDeque<String>, start: i64, stop: i64) -> Vec<String> {
        let len = list.len() as i64;
        let resolve = |idx: i64| -> i64 {
            if idx < 0 {
                len + idx
            } else {
                idx
            }
        };
        let lo = resolve(start).max(0);
        let hi = resolve(stop).min(len - 1);
        if lo > hi || len == 0 {
            return Vec::new();
        }
        list.iter()
            .skip(lo as usize)
            .take((hi - lo + 1) as usize)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl Kv for MemoryKv {
    async fn get(&self, key: &str) -> EngineResult<Option<String>> {
        let data = self.data.lock();
        Ok(match data.get(key) {
            Some(Value::Str(s)) => Some(s.clone()),
            _ => None,
        })
    }

    async fn set(&self, key: &str, value: &str) -> EngineResult<()> {
        self.data
            .lock()
            .insert(key.to_string(), Value::Str(value.to_string()));
        Ok(())
    }

    async fn set_ex(&self, key: &str, value: &str, _ttl_secs: u64) -> EngineResult<()> {
        self.set(key, value).await
    }

    async fn del(&self, key: &str) -> EngineResult<()> {
        self.data.lock().remove(key);
        Ok(())
    }

    async fn keys(&self, pattern: &str) -> EngineResult<Vec<String>> {
        let data = self.data.lock();
        let found = if let Some(prefix) = pattern.strip_suffix('*') {
            data.keys()
                .filter(|k| k.starts_with(prefix))
                .cloned()
                .collect()
        } else {
            data.keys()
                .filter(|k| k.as_str() == pattern)
                .cloned()
                .collect()
        };
        Ok(found)
    }

    async fn lpush(&self, key: &str, value: &str) -> EngineResult<()> {
        let mut data = self.data.lock();
        let entry = data
            .entry(key.to_string())
            .or_insert_with(|| Value::List(VecDeque::new()));
        if let Value::List(list) = entry {
            list.push_front(value.to_string());
        }
        Ok(())
    }

    async fn ltrim(&self, key: &str, start: i64, stop: i64) -> EngineResult<()> {
        let mut data = self.data.lock();
        let kept = match data.get(key) {
            Some(Value::List(list)) => Some(Self::list_range(list, start, stop)),
            _ => None,
        };
        if let Some(kept) = kept {
            if kept.is_empty() {
                data.remove(key);
            } else {
                data.insert(key.to_string(), Value::List(kept.into()));
            }
        }
        Ok(())
    }

    async fn lrange(&self, key: &str, start: i64, stop: i64) -> EngineResult<Vec<String>> {
        let data = self.data.lock();
        Ok(match data.get(key) {
            Some(Value::List(list)) => Self::list_range(list, start, stop),
            _ => Vec::new(),
        })
    }

    async fn hgetall(&self, key: &str) -> EngineResult<FxHashMap<String, String>> {
        let data = self.data.lock();
        Ok(match data.get(key) {
            Some(Value::Hash(fields)) => fields.clone(),
            _ => FxHashMap::default(),
        })
    }

    async fn update_live_candle(
        &self,
        symbol: &str,
        price: Price,
        qty: Quantity,
        minute_key: &str,
    ) -> EngineResult<()> {
        let live_key = format!("{}{symbol}", keys::CANDLE_LIVE_PREFIX);
        let closed_key = format!("{}{symbol}", keys::CANDLE_CLOSED_PREFIX);

        let mut data = self.data.lock();

        let current = match data.get(&live_key) {
            Some(Value::Hash(fields)) => fields.get("t").cloned(),
            _ => None,
        };

        let fresh = |price: Price, qty: Quantity| {
            let mut fields = FxHashMap::default();
            fields.insert("o".to_string(), price.to_string());
            fields.insert("h".to_string(), price.to_string());
            fields.insert("l".to_string(), price.to_string());
            fields.insert("c".to_string(), price.to_string());
            fields.insert("v".to_string(), qty.to_string());
            fields.insert("t".to_string(), minute_key.to_string());
            fields
        };

        match current {
            Some(stored) if stored.as_str() < minute_key => {
                // Close the stored candle onto the head of the list, then
                // start a fresh one at the new minute.
                let old_fields = match data.get(&live_key) {
                    Some(Value::Hash(fields)) => Some(fields.clone()),
                    _ => None,
                };
                if let Some(fields) = old_fields {
                    let closed: serde_json::Map<String, serde_json::Value> = fields
                        .iter()
                        .map(|(k, v)| (k.clone(), serde_json::Value::String(v.clone())))
                        .collect();
                    let encoded = serde_json::Value::Object(closed).to_string();
                    let entry = data
                        .entry(closed_key.clone())
                        .or_insert_with(|| Value::List(VecDeque::new()));
                    if let Value::List(list) = entry {
                        list.push_front(encoded);
                        list.truncate(CLOSED_CANDLE_CAP);
                    }
                }
                data.insert(live_key, Value::Hash(fresh(price, qty)));
            }
            Some(_) => {
                if let Some(Value::Hash(fields)) = data.get_mut(&live_key) {
                    let high: Price = fields.get("h").and_then(|v| v.parse().ok()).unwrap_or(0);
                    let low: Price = fields
                        .get("l")
                        .and_then(|v| v.parse().ok())
                        .unwrap_or(Price::MAX);
                    if price > high {
                        fields.insert("h".to_string(), price.to_string());
                    }
                    if price < low {
                        fields.insert("l".to_string(), price.to_string());
                    }
                    fields.insert("c".to_string(), price.to_string());
                    let volume: Quantity =
                        fields.get("v").and_then(|v| v.parse().ok()).unwrap_or(0);
                    fields.insert("v".to_string(), (volume + qty).to_string());
                }
            }
            None => {
                data.insert(live_key, Value::Hash(fresh(price, qty)));
            }
        }

        Ok(())
    }
}
