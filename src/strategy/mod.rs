//! Strategy oracle: entry/exit signals and built-in sell rules.
//!
//! The lifecycle controller treats the strategy as opaque. It asks for
//! signals, asks whether a trade should be sold at a candidate rate, and
//! honors pair locks. Shared collaborators are handed over explicitly in a
//! `StrategyContext` on every call.

mod exit_rules;
mod sample;

pub use exit_rules::ExitRules;
pub use sample::SmaCrossStrategy;

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use rust_decimal::Decimal;
use tracing::{debug, warn};

use crate::config::{timeframe_to_duration, OrderTimeInForce, OrderTypes};
use crate::data::DataProvider;
use crate::models::{Balance, Candle, SellReason, Trade};

/// Entry/exit signal for the latest candle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Signal {
    pub buy: bool,
    pub sell: bool,
}

/// Outcome of the sell rules for one candidate rate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SellCheck {
    pub sell_flag: bool,
    pub sell_type: Option<SellReason>,
}

impl SellCheck {
    pub fn none() -> Self {
        Self {
            sell_flag: false,
            sell_type: None,
        }
    }

    pub fn sell(reason: SellReason) -> Self {
        Self {
            sell_flag: true,
            sell_type: Some(reason),
        }
    }
}

/// Collaborators a strategy may consult while evaluating.
#[derive(Clone)]
pub struct StrategyContext {
    pub data: Arc<dyn DataProvider>,
    pub balances: HashMap<String, Balance>,
}

/// Pairs temporarily barred from new entries.
#[derive(Default)]
pub struct PairLocks {
    locks: Mutex<HashMap<String, DateTime<Utc>>>,
}

impl PairLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bar `pair` from entries until `until`. An earlier lock never shortens
    /// a later one.
    pub fn lock(&self, pair: &str, until: DateTime<Utc>) {
        match self.locks.lock() {
            Ok(mut locks) => {
                let entry = locks.entry(pair.to_string()).or_insert(until);
                if *entry < until {
                    *entry = until;
                }
                debug!(pair = %pair, until = %until, "Pair locked");
            }
            Err(_) => warn!(pair = %pair, "Pair lock table poisoned"),
        }
    }

    pub fn is_locked(&self, pair: &str, now: DateTime<Utc>) -> bool {
        match self.locks.lock() {
            Ok(mut locks) => match locks.get(pair) {
                Some(until) if *until > now => true,
                Some(_) => {
                    locks.remove(pair);
                    false
                }
                None => false,
            },
            Err(_) => false,
        }
    }
}

/// Open time of the candle after the one containing `now`.
pub fn next_candle_open(timeframe: &str, now: DateTime<Utc>) -> DateTime<Utc> {
    let step = timeframe_to_duration(timeframe).num_seconds().max(1);
    let next = (now.timestamp() / step + 1) * step;
    Utc.timestamp_opt(next, 0).single().unwrap_or(now)
}

/// Decision oracle used by the lifecycle controller.
#[async_trait]
pub trait StrategyOracle: Send + Sync {
    fn name(&self) -> &str;

    fn timeframe(&self) -> &str;

    /// Stoploss as a negative fraction of the entry price
    fn stoploss(&self) -> Decimal;

    fn order_types(&self) -> &OrderTypes;

    fn time_in_force(&self) -> &OrderTimeInForce;

    fn trailing_stop(&self) -> bool;

    /// Extra (pair, timeframe) combinations the strategy wants refreshed.
    fn informative_pairs(&self) -> Vec<(String, String)> {
        Vec::new()
    }

    /// Buy/sell signal for the latest candle of `pair`.
    async fn get_signal(
        &self,
        pair: &str,
        timeframe: &str,
        candles: &[Candle],
        ctx: &StrategyContext,
    ) -> Signal;

    /// Run the sell rules for `trade` at `rate`. May move the trade's stop.
    ///
    /// A non-zero `force_stoploss` replaces the configured stoploss.
    fn should_sell(
        &self,
        trade: &mut Trade,
        rate: Decimal,
        now: DateTime<Utc>,
        buy: bool,
        sell: bool,
        force_stoploss: Decimal,
    ) -> SellCheck;

    fn pair_locks(&self) -> &PairLocks;

    fn is_pair_locked(&self, pair: &str) -> bool {
        self.pair_locks().is_locked(pair, Utc::now())
    }

    fn lock_pair(&self, pair: &str, until: DateTime<Utc>) {
        self.pair_locks().lock(pair, until)
    }
}
