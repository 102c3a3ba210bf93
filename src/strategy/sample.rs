//! Reference strategy: simple moving average crossover.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

use super::{ExitRules, PairLocks, SellCheck, Signal, StrategyContext, StrategyOracle};
use crate::config::{AskStrategy, OrderTimeInForce, OrderTypes, StrategySettings};
use crate::models::{Candle, Trade};

/// Buys when the fast SMA crosses above the slow SMA, sells on the reverse.
pub struct SmaCrossStrategy {
    name: String,
    timeframe: String,
    fast_period: usize,
    slow_period: usize,
    order_types: OrderTypes,
    time_in_force: OrderTimeInForce,
    trailing_stop: bool,
    exit_rules: ExitRules,
    locks: PairLocks,
}

impl SmaCrossStrategy {
    pub fn new(settings: &StrategySettings, ask: &AskStrategy, timeframe: &str, dry_run: bool) -> Self {
        let fast_period = settings.fast_period.max(1);
        let slow_period = settings.slow_period.max(fast_period + 1);

        Self {
            name: settings.name.clone(),
            timeframe: timeframe.to_string(),
            fast_period,
            slow_period,
            order_types: settings.order_types.clone(),
            time_in_force: settings.order_time_in_force.clone(),
            trailing_stop: settings.trailing_stop,
            exit_rules: ExitRules::new(settings, ask, dry_run),
            locks: PairLocks::new(),
        }
    }
}

/// Mean close of the `period` candles ending at `end` (exclusive).
fn sma(candles: &[Candle], end: usize, period: usize) -> Option<Decimal> {
    if end < period || end > candles.len() {
        return None;
    }
    let sum: Decimal = candles[end - period..end].iter().map(|c| c.close).sum();
    Some(sum / Decimal::from(period))
}

#[async_trait]
impl StrategyOracle for SmaCrossStrategy {
    fn name(&self) -> &str {
        &self.name
    }

    fn timeframe(&self) -> &str {
        &self.timeframe
    }

    fn stoploss(&self) -> Decimal {
        self.exit_rules.stoploss()
    }

    fn order_types(&self) -> &OrderTypes {
        &self.order_types
    }

    fn time_in_force(&self) -> &OrderTimeInForce {
        &self.time_in_force
    }

    fn trailing_stop(&self) -> bool {
        self.trailing_stop
    }

    async fn get_signal(
        &self,
        _pair: &str,
        _timeframe: &str,
        candles: &[Candle],
        _ctx: &StrategyContext,
    ) -> Signal {
        let n = candles.len();
        let (Some(fast_now), Some(slow_now), Some(fast_prev), Some(slow_prev)) = (
            sma(candles, n, self.fast_period),
            sma(candles, n, self.slow_period),
            sma(candles, n.saturating_sub(1), self.fast_period),
            sma(candles, n.saturating_sub(1), self.slow_period),
        ) else {
            return Signal::default();
        };

        Signal {
            buy: fast_prev <= slow_prev && fast_now > slow_now,
            sell: fast_prev >= slow_prev && fast_now < slow_now,
        }
    }

    fn should_sell(
        &self,
        trade: &mut Trade,
        rate: Decimal,
        now: DateTime<Utc>,
        buy: bool,
        sell: bool,
        force_stoploss: Decimal,
    ) -> SellCheck {
        self.exit_rules.should_sell(trade, rate, now, buy, sell, force_stoploss)
    }

    fn pair_locks(&self) -> &PairLocks {
        &self.locks
    }
}
