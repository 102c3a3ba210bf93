//! Trading primitives: stake sizing, risk models, and rate caching.

mod rates;
mod risk;
mod stake;
mod ttl_cache;

pub use rates::{RateCache, RATE_CACHE_SIZE, RATE_CACHE_TTL_SECS};
pub use risk::{FixedRiskModel, RiskModel};
pub use stake::{StakeCalculator, StakeInputs};
pub use ttl_cache::TtlCache;
