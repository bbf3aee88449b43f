/// Lua script for fixed window rate limiting
///
/// Only the increment that creates the counter sets its expiry, so a window
/// starts at the first request and resets abruptly when the key expires.
///
/// KEYS[1] = the rate limit key
/// ARGV[1] = window duration (seconds)
/// ARGV[2] = maximum requests (capacity)
///
/// Returns: 1 when allowed, 0 when denied
pub const FIXED_WINDOW_SCRIPT: &str = r#"
local key = KEYS[1]
local window = tonumber(ARGV[1])
local capacity = tonumber(ARGV[2])

local current = redis.call('INCR', key)

-- Only the request that opens the window sets its expiry
if current == 1 then
    redis.call('EXPIRE', key, window)
end

if current > capacity then
    return 0
end

return 1
"#;

/// Lua script for sliding window log rate limiting
///
/// Scores are request timestamps, members are unique per request. The set is
/// counted over `[now - window, now]` before anything is written, so a denied
/// request leaves no trace.
///
/// KEYS[1] = the rate limit key
/// ARGV[1] = window duration (seconds)
/// ARGV[2] = maximum requests (capacity)
/// ARGV[3] = current timestamp (seconds)
/// ARGV[4] = unique member for this request
///
/// Returns: 1 when allowed, 0 when denied
pub const SLIDING_WINDOW_SCRIPT: &str = r#"
local key = KEYS[1]
local window = tonumber(ARGV[1])
local capacity = tonumber(ARGV[2])
local now = tonumber(ARGV[3])
local member = ARGV[4]

local window_start = now - window

local count = redis.call('ZCOUNT', key, window_start, now)
if count >= capacity then
    return 0
end

redis.call('ZADD', key, now, member)

-- Drop entries that fell out of the lookback
redis.call('ZREMRANGEBYSCORE', key, '-inf', '(' .. window_start)

-- Outlive the newest entry by one second of score granularity
redis.call('EXPIRE', key, window + 1)

return 1
"#;

/// Lua script for token bucket rate limiting
///
/// State is a hash with `last_refill` and `permits`. A missing hash is a full
/// bucket. Refill is clamped at capacity. The idle expiry is only set when the
/// bucket is created.
///
/// KEYS[1] = the rate limit key
/// ARGV[1] = bucket capacity
/// ARGV[2] = refill rate (permits per second)
/// ARGV[3] = current timestamp (seconds)
/// ARGV[4] = idle expiry (seconds)
///
/// Returns: 1 when allowed, 0 when denied
pub const TOKEN_BUCKET_SCRIPT: &str = r#"
local key = KEYS[1]
local capacity = tonumber(ARGV[1])
local rate = tonumber(ARGV[2])
local now = tonumber(ARGV[3])
local ttl = tonumber(ARGV[4])

local state = redis.call('HMGET', key, 'last_refill', 'permits')
local last_refill = tonumber(state[1])
local permits = tonumber(state[2])
local first_use = false

if last_refill == nil or permits == nil then
    last_refill = now
    permits = capacity
    first_use = true
end

local elapsed = math.max(0, now - last_refill)
permits = math.min(capacity, permits + elapsed * rate)
last_refill = math.max(last_refill, now)

local allowed = 0
if permits >= 1 then
    permits = permits - 1
    allowed = 1
end

redis.call('HSET', key, 'last_refill', last_refill, 'permits', permits)

if first_use then
    redis.call('EXPIRE', key, ttl)
end

return allowed
"#;
