//! Built-in sell rules: stoploss, trailing stop, ROI table and sell signal.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use tracing::debug;

use super::SellCheck;
use crate::config::{AskStrategy, StrategySettings};
use crate::models::{SellReason, Trade};

/// Sell rules shared by every strategy.
#[derive(Debug, Clone)]
pub struct ExitRules {
    stoploss: Decimal,

    /// (minutes since open, minimum profit ratio), ascending by minutes
    minimal_roi: Vec<(i64, Decimal)>,

    trailing_stop: bool,
    trailing_stop_positive: Option<Decimal>,
    trailing_stop_positive_offset: Decimal,
    trailing_only_offset_is_reached: bool,

    /// Stop hits are left to the exchange order
    stoploss_on_exchange: bool,

    /// Simulated stop orders never fill, so the rules sell instead
    dry_run: bool,

    use_sell_signal: bool,
    sell_profit_only: bool,
    ignore_roi_if_buy_signal: bool,
}

impl ExitRules {
    pub fn new(settings: &StrategySettings, ask: &AskStrategy, dry_run: bool) -> Self {
        let mut minimal_roi: Vec<(i64, Decimal)> = settings
            .minimal_roi
            .iter()
            .filter_map(|(minutes, roi)| minutes.trim().parse::<i64>().ok().map(|m| (m, *roi)))
            .collect();
        minimal_roi.sort_by_key(|(minutes, _)| *minutes);

        Self {
            stoploss: settings.stoploss,
            minimal_roi,
            trailing_stop: settings.trailing_stop,
            trailing_stop_positive: settings.trailing_stop_positive,
            trailing_stop_positive_offset: settings.trailing_stop_positive_offset,
            trailing_only_offset_is_reached: settings.trailing_only_offset_is_reached,
            stoploss_on_exchange: settings.order_types.stoploss_on_exchange,
            dry_run,
            use_sell_signal: ask.use_sell_signal,
            sell_profit_only: ask.sell_profit_only,
            ignore_roi_if_buy_signal: ask.ignore_roi_if_buy_signal,
        }
    }

    pub fn stoploss(&self) -> Decimal {
        self.stoploss
    }

    pub fn should_sell(
        &self,
        trade: &mut Trade,
        rate: Decimal,
        now: DateTime<Utc>,
        buy: bool,
        sell: bool,
        force_stoploss: Decimal,
    ) -> SellCheck {
        let current_profit = trade.calc_profit_ratio(rate);
        trade.adjust_min_max_rates(rate);

        let stop = self.stop_loss_reached(trade, rate, current_profit, force_stoploss);
        if stop.sell_flag {
            debug!(pair = %trade.pair, reason = ?stop.sell_type, "Stoploss reached");
            return stop;
        }

        if buy && self.ignore_roi_if_buy_signal {
            return SellCheck::none();
        }

        if self.min_roi_reached(trade, current_profit, now) {
            debug!(pair = %trade.pair, profit = %current_profit, "ROI reached");
            return SellCheck::sell(SellReason::Roi);
        }

        if self.sell_profit_only && trade.calc_profit(rate) <= Decimal::ZERO {
            return SellCheck::none();
        }

        if sell && !buy && self.use_sell_signal {
            debug!(pair = %trade.pair, "Sell signal received");
            return SellCheck::sell(SellReason::Signal);
        }

        SellCheck::none()
    }

    fn stop_loss_reached(
        &self,
        trade: &mut Trade,
        rate: Decimal,
        current_profit: Decimal,
        force_stoploss: Decimal,
    ) -> SellCheck {
        let stoploss = if force_stoploss.is_zero() { self.stoploss } else { force_stoploss };
        trade.adjust_stop_loss(trade.open_rate, stoploss, true);

        if self.trailing_stop {
            let offset = self.trailing_stop_positive_offset;
            if !(self.trailing_only_offset_is_reached && current_profit < offset) {
                let value = match self.trailing_stop_positive {
                    Some(positive) if current_profit > offset => positive,
                    _ => stoploss,
                };
                trade.adjust_stop_loss(rate, value, false);
            }
        }

        if trade.stop_loss >= rate && (!self.stoploss_on_exchange || self.dry_run) {
            let reason = if trade.initial_stop_loss != trade.stop_loss {
                SellReason::TrailingStopLoss
            } else {
                SellReason::StopLoss
            };
            return SellCheck::sell(reason);
        }

        SellCheck::none()
    }

    /// Profit target for a trade open for `minutes`, if any step applies.
    pub fn roi_for_duration(&self, minutes: i64) -> Option<Decimal> {
        self.minimal_roi
            .iter()
            .rev()
            .find(|(step, _)| *step <= minutes)
            .map(|(_, roi)| *roi)
    }

    fn min_roi_reached(&self, trade: &Trade, current_profit: Decimal, now: DateTime<Utc>) -> bool {
        let minutes = (now - trade.open_date).num_minutes();
        match self.roi_for_duration(minutes) {
            Some(roi) => current_profit > roi,
            None => false,
        }
    }
}
