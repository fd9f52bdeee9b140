//! Request admission: cheap checks that run before any expensive work.

pub mod rate_limit;
pub mod sanitize;

pub use rate_limit::{RateDecision, RateLimiter};
pub use sanitize::{sanitize_prompt, MAX_PROMPT_CHARS};
