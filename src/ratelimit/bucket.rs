//! # Token Bucket
//!
//! Single-resource admission primitive. Tokens are a float count replenished
//! lazily from elapsed wall-clock time at the moment of use; there is no
//! background refill timer. The bucket starts full so the first burst of
//! traffic is never penalized.

use parking_lot::Mutex;
use std::time::{Duration, Instant};

/// Outcome of a single admission attempt against one bucket.
#[derive(Debug, Clone, Copy)]
pub struct RateLimitDecision {
    /// Whether a token was consumed
    pub admitted: bool,

    /// How long the caller should wait before retrying (zero when admitted)
    pub retry_after: Duration,

    /// Whole tokens left in the bucket after this decision
    pub remaining: u64,
}

/// Thread-safe token bucket with float tokens and lazy refill.
///
/// Invariant: `0 <= tokens <= capacity` at all times. All state mutation happens
/// under the bucket's own mutex so two concurrent callers can never both consume
/// the same fractional token. Each bucket owns its lock; unrelated buckets never
/// contend.
pub struct TokenBucket {
    capacity: f64,
    refill_rate: f64,
    state: Mutex<BucketState>,
}

struct BucketState {
    tokens: f64,
    last_refill: Instant,
}

impl TokenBucket {
    /// Create a bucket holding `burst` tokens, refilled at `refill_rate` tokens
    /// per second. The bucket starts full.
    pub fn new(burst: u32, refill_rate: f64) -> Self {
        let capacity = f64::from(burst);
        Self {
            capacity,
            refill_rate: refill_rate.max(0.0),
            state: Mutex::new(BucketState {
                tokens: capacity,
                last_refill: Instant::now(),
            }),
        }
    }

    /// Consume one token if available.
    pub fn allow(&self) -> RateLimitDecision {
        self.allow_at(Instant::now())
    }

    /// Admission decision evaluated at `now`. Seam for deterministic tests;
    /// `allow` passes the real clock.
    pub(crate) fn allow_at(&self, now: Instant) -> RateLimitDecision {
        let mut state = self.state.lock();

        let elapsed = now.saturating_duration_since(state.last_refill);
        if !elapsed.is_zero() {
            state.tokens =
                (state.tokens + elapsed.as_secs_f64() * self.refill_rate).min(self.capacity);
            state.last_refill = now;
        }

        if state.tokens >= 1.0 {
            state.tokens -= 1.0;
            return RateLimitDecision {
                admitted: true,
                retry_after: Duration::ZERO,
                remaining: state.tokens.floor() as u64,
            };
        }

        let need = 1.0 - state.tokens;
        let secs = if self.refill_rate > 0.0 {
            (need / self.refill_rate).ceil().max(0.0)
        } else {
            1.0
        };
        RateLimitDecision {
            admitted: false,
            retry_after: Duration::from_secs_f64(secs),
            remaining: state.tokens.floor() as u64,
        }
    }
}
