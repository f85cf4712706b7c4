use crate::store::{RateLimitStore, StoreError};
use crate::RateLimitDecision;
use redis::Script;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

const KEY_PREFIX: &str = "rate_limit:token_bucket:";

/// Refill-and-consume executed atomically on the server. State is a
/// hash of {tokens, last_refill}; the script refills by elapsed time,
/// consumes one token when available, and refreshes the TTL.
/// Reply: {allowed, floor(tokens), reset_ms}.
const CHECK_AND_CONSUME: &str = r#"
local key = KEYS[1]
local capacity = tonumber(ARGV[1])
local rate = tonumber(ARGV[2])
local now_ms = tonumber(ARGV[3])
local ttl = tonumber(ARGV[4])

local state = redis.call('HMGET', key, 'tokens', 'last_refill')
local tokens = tonumber(state[1])
local last_refill = tonumber(state[2])
if tokens == nil or last_refill == nil then
  tokens = capacity
  last_refill = now_ms
end

local elapsed = math.max(0, now_ms - last_refill) / 1000
tokens = math.min(capacity, tokens + elapsed * rate)

local allowed = 0
if tokens >= 1 then
  tokens = tokens - 1
  allowed = 1
end

local reset_ms = now_ms + math.ceil((capacity - tokens) / rate) * 1000

redis.call('HSET', key, 'tokens', tokens, 'last_refill', now_ms)
redis.call('EXPIRE', key, ttl)

return {allowed, math.floor(tokens), reset_ms}
"#;

/// Token-bucket limiter keyed by identifier: `limit` requests per
/// `window`, refilling continuously at `limit / window` tokens per
/// second.
pub struct TokenBucketLimiter {
    store: RateLimitStore,
    script: Script,
    capacity: u64,
    refill_rate: f64,
    ttl_secs: u64,
}

impl TokenBucketLimiter {
    pub fn new(store: RateLimitStore, limit: u64, window: Duration) -> Self {
        let limit = limit.max(1);
        let window_secs = window.as_secs_f64().max(f64::MIN_POSITIVE);
        Self {
            store,
            script: Script::new(CHECK_AND_CONSUME),
            capacity: limit,
            refill_rate: limit as f64 / window_secs,
            // TTL at twice the window bounds memory without affecting
            // correctness.
            ttl_secs: (window.as_secs() * 2).max(1),
        }
    }

    pub fn limit(&self) -> u64 {
        self.capacity
    }

    /// Atomically refill, consume, and persist for `identifier`.
    pub async fn check(&self, identifier: &str) -> Result<RateLimitDecision, StoreError> {
        let now_ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as i64;

        let mut conn = self.store.connection();
        let reply: Vec<i64> = self
            .script
            .key(format!("{KEY_PREFIX}{identifier}"))
            .arg(self.capacity)
            .arg(self.refill_rate)
            .arg(now_ms)
            .arg(self.ttl_secs)
            .invoke_async(&mut conn)
            .await?;

        let &[allowed, remaining, reset_ms] = reply.as_slice() else {
            return Err(StoreError::BadReply(format!("{reply:?}")));
        };
        Ok(shape_decision(allowed == 1, remaining, reset_ms, self.refill_rate))
    }
}

/// Shape a script reply into a decision. Denials wait one refill
/// interval (`1 / rate`) before the next token exists.
fn shape_decision(
    allowed: bool,
    remaining: i64,
    reset_ms: i64,
    refill_rate: f64,
) -> RateLimitDecision {
    let retry_after = if allowed {
        Duration::ZERO
    } else {
        Duration::from_secs_f64(1.0 / refill_rate)
    };
    RateLimitDecision {
        allowed,
        remaining: remaining.max(0) as u64,
        reset_at: reset_ms / 1000,
        retry_after,
    }
}
