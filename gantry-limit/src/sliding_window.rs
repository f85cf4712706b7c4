use crate::store::{RateLimitStore, StoreError};
use crate::RateLimitDecision;
use redis::Script;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

const KEY_PREFIX: &str = "rate_limit:sliding_window:";

/// Expire-count-insert executed atomically on the server. State is a
/// sorted set of per-request tokens scored by Unix seconds; members
/// older than the window are removed, the request is admitted while the
/// live count is under the limit, and the TTL is refreshed.
/// Reply: {allowed, count, oldest_score}.
const CHECK_AND_RECORD: &str = r#"
local key = KEYS[1]
local limit = tonumber(ARGV[1])
local window = tonumber(ARGV[2])
local now = tonumber(ARGV[3])
local member = ARGV[4]
local ttl = tonumber(ARGV[5])

redis.call('ZREMRANGEBYSCORE', key, '-inf', now - window)
local count = redis.call('ZCARD', key)

local allowed = 0
if count < limit then
  redis.call('ZADD', key, now, member)
  count = count + 1
  allowed = 1
end

local oldest = now
local first = redis.call('ZRANGE', key, 0, 0, 'WITHSCORES')
if first[2] ~= nil then
  oldest = tonumber(first[2])
end

redis.call('EXPIRE', key, ttl)

return {allowed, count, oldest}
"#;

/// Sliding-window limiter keyed by identifier: at most `limit`
/// requests inside any trailing `window`.
pub struct SlidingWindowLimiter {
    store: RateLimitStore,
    script: Script,
    limit: u64,
    window_secs: u64,
    ttl_secs: u64,
}

impl SlidingWindowLimiter {
    pub fn new(store: RateLimitStore, limit: u64, window: Duration) -> Self {
        let window_secs = window.as_secs().max(1);
        Self {
            store,
            script: Script::new(CHECK_AND_RECORD),
            limit: limit.max(1),
            window_secs,
            ttl_secs: (window_secs * 2).max(1),
        }
    }

    pub fn limit(&self) -> u64 {
        self.limit
    }

    /// Atomically expire, count, and record for `identifier`.
    pub async fn check(&self, identifier: &str) -> Result<RateLimitDecision, StoreError> {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs() as i64;
        // Member values only need uniqueness inside one window.
        let member = uuid::Uuid::new_v4().to_string();

        let mut conn = self.store.connection();
        let reply: Vec<i64> = self
            .script
            .key(format!("{KEY_PREFIX}{identifier}"))
            .arg(self.limit)
            .arg(self.window_secs)
            .arg(now)
            .arg(member)
            .arg(self.ttl_secs)
            .invoke_async(&mut conn)
            .await?;

        let &[allowed, count, oldest] = reply.as_slice() else {
            return Err(StoreError::BadReply(format!("{reply:?}")));
        };
        Ok(shape_decision(
            allowed == 1,
            count,
            oldest,
            now,
            self.limit,
            self.window_secs,
        ))
    }
}

/// Shape a script reply into a decision. The window fully resets when
/// its oldest member ages out; denial waits exactly that long.
fn shape_decision(
    allowed: bool,
    count: i64,
    oldest: i64,
    now: i64,
    limit: u64,
    window_secs: u64,
) -> RateLimitDecision {
    let reset_at = oldest + window_secs as i64;
    let retry_after = if allowed {
        Duration::ZERO
    } else {
        Duration::from_secs(reset_at.saturating_sub(now).max(0) as u64)
    };
    RateLimitDecision {
        allowed,
        remaining: (limit as i64 - count).max(0) as u64,
        reset_at,
        retry_after,
    }
}
