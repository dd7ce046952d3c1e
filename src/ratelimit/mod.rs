//! # Rate Limiting
//!
//! Two-tier token-bucket admission control. Every request must pass a single
//! shared global bucket, then a per-client bucket resolved by client identity
//! (left-most `X-Forwarded-For` value, else the remote socket address).
//!
//! Client buckets are created lazily and reclaimed by a periodic idle sweep so
//! churn from short-lived clients (NAT'd ranges, scanners) cannot grow memory
//! without bound. Denial is a first-class outcome, not an error: it surfaces as
//! a structured verdict that the middleware renders as an HTTP 429.

pub mod bucket;
pub mod manager;

pub use bucket::{RateLimitDecision, TokenBucket};
pub use manager::{
    rate_limit_middleware, Admission, RateLimitManager, RateLimitScope, RateLimitState,
    RateLimitVerdict,
};
