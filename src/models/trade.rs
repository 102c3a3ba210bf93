//! Trade model: one record per open or closed position.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::info;

use super::order::{Order, OrderSide, OrderStatus, OrderType};

/// Why a trade was (or is being) closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SellReason {
    Signal,
    StopLoss,
    TrailingStopLoss,
    StoplossOnExchange,
    EmergencySell,
    Roi,
    ForceSell,
}

impl SellReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            SellReason::Signal => "sell_signal",
            SellReason::StopLoss => "stop_loss",
            SellReason::TrailingStopLoss => "trailing_stop_loss",
            SellReason::StoplossOnExchange => "stoploss_on_exchange",
            SellReason::EmergencySell => "emergency_sell",
            SellReason::Roi => "roi",
            SellReason::ForceSell => "force_sell",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "sell_signal" => Some(SellReason::Signal),
            "stop_loss" => Some(SellReason::StopLoss),
            "trailing_stop_loss" => Some(SellReason::TrailingStopLoss),
            "stoploss_on_exchange" => Some(SellReason::StoplossOnExchange),
            "emergency_sell" => Some(SellReason::EmergencySell),
            "roi" => Some(SellReason::Roi),
            "force_sell" => Some(SellReason::ForceSell),
            _ => None,
        }
    }

    /// Exits priced as a stoploss rather than a regular sell.
    pub fn is_stoploss(&self) -> bool {
        matches!(self, SellReason::StopLoss | SellReason::TrailingStopLoss)
    }
}

impl std::fmt::Display for SellReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle state derived from the persisted fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TradeState {
    /// Buy order still in flight
    EntryPending,
    /// Position held, no order in flight
    OpenActionable,
    /// Sell order in flight
    ExitPending,
    Closed,
}

/// A position, from entry order to close.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trade {
    /// Repository id (0 until persisted)
    pub id: i64,

    pub exchange: String,
    pub pair: String,
    pub is_open: bool,

    /// Fee rates charged on the open and close side
    pub fee_open: Decimal,
    pub fee_close: Decimal,

    /// Actual entry price
    pub open_rate: Decimal,
    pub open_rate_requested: Option<Decimal>,

    /// Entry cost including the open fee
    pub open_trade_price: Decimal,

    pub close_rate: Option<Decimal>,
    pub close_rate_requested: Option<Decimal>,
    pub close_profit: Option<Decimal>,

    /// Quote currency committed
    pub stake_amount: Decimal,

    /// Base currency held
    pub amount: Decimal,

    pub open_date: DateTime<Utc>,
    pub close_date: Option<DateTime<Utc>>,

    /// Order currently in flight, if any
    pub open_order_id: Option<String>,

    /// Current stop price (0 while unset)
    pub stop_loss: Decimal,
    pub stop_loss_pct: Option<Decimal>,
    pub initial_stop_loss: Decimal,
    pub initial_stop_loss_pct: Option<Decimal>,

    pub stoploss_order_id: Option<String>,
    pub stoploss_last_update: Option<DateTime<Utc>>,

    /// Highest and lowest price seen while open
    pub max_rate: Decimal,
    pub min_rate: Option<Decimal>,

    pub sell_reason: Option<SellReason>,
    pub strategy: String,
    pub timeframe: String,
}

impl Trade {
    /// Create an open trade for a freshly placed buy.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        exchange: &str,
        pair: &str,
        stake_amount: Decimal,
        amount: Decimal,
        open_rate: Decimal,
        fee: Decimal,
        open_order_id: Option<String>,
        strategy: &str,
        timeframe: &str,
    ) -> Self {
        let mut trade = Self {
            id: 0,
            exchange: exchange.to_string(),
            pair: pair.to_string(),
            is_open: true,
            fee_open: fee,
            fee_close: fee,
            open_rate,
            open_rate_requested: Some(open_rate),
            open_trade_price: Decimal::ZERO,
            close_rate: None,
            close_rate_requested: None,
            close_profit: None,
            stake_amount,
            amount,
            open_date: Utc::now(),
            close_date: None,
            open_order_id,
            stop_loss: Decimal::ZERO,
            stop_loss_pct: None,
            initial_stop_loss: Decimal::ZERO,
            initial_stop_loss_pct: None,
            stoploss_order_id: None,
            stoploss_last_update: None,
            max_rate: open_rate,
            min_rate: None,
            sell_reason: None,
            strategy: strategy.to_string(),
            timeframe: timeframe.to_string(),
        };
        trade.recalc_open_trade_price();
        trade
    }

    pub fn state(&self) -> TradeState {
        match (self.is_open, &self.open_order_id) {
            (false, _) => TradeState::Closed,
            (true, None) => TradeState::OpenActionable,
            (true, Some(_)) if self.close_rate_requested.is_some() => TradeState::ExitPending,
            (true, Some(_)) => TradeState::EntryPending,
        }
    }

    /// Open, with no order in flight.
    pub fn is_actionable(&self) -> bool {
        self.state() == TradeState::OpenActionable
    }

    pub fn recalc_open_trade_price(&mut self) {
        let buy_trade = self.amount * self.open_rate;
        self.open_trade_price = buy_trade + buy_trade * self.fee_open;
    }

    /// Quote received when selling everything at `rate`, net of fees.
    pub fn calc_close_trade_price(&self, rate: Decimal) -> Decimal {
        let sell_trade = self.amount * rate;
        sell_trade - sell_trade * self.fee_close
    }

    /// Absolute profit in quote currency when closing at `rate`.
    pub fn calc_profit(&self, rate: Decimal) -> Decimal {
        (self.calc_close_trade_price(rate) - self.open_trade_price).round_dp(8)
    }

    /// Relative profit when closing at `rate`.
    pub fn calc_profit_ratio(&self, rate: Decimal) -> Decimal {
        if self.open_trade_price.is_zero() {
            return Decimal::ZERO;
        }
        (self.calc_close_trade_price(rate) / self.open_trade_price - Decimal::ONE).round_dp(8)
    }

    /// Track the highest/lowest price seen while the position is open.
    pub fn adjust_min_max_rates(&mut self, current_price: Decimal) {
        self.max_rate = self.max_rate.max(current_price).max(self.open_rate);
        self.min_rate = Some(match self.min_rate {
            Some(min) => min.min(current_price),
            None => current_price.min(self.open_rate),
        });
    }

    /// Move the stop to `current_price * (1 - |stoploss|)`, upwards only.
    ///
    /// With `initial` set, only an unset stop is initialized.
    pub fn adjust_stop_loss(&mut self, current_price: Decimal, stoploss: Decimal, initial: bool) {
        if initial && !self.stop_loss.is_zero() {
            return;
        }

        let pct = -stoploss.abs();
        let new_loss = current_price * (Decimal::ONE + pct);

        if self.stop_loss.is_zero() {
            self.initial_stop_loss = new_loss;
            self.initial_stop_loss_pct = Some(pct);
            self.stop_loss = new_loss;
            self.stop_loss_pct = Some(pct);
            return;
        }

        if new_loss > self.stop_loss {
            self.stop_loss = new_loss;
            self.stop_loss_pct = Some(pct);
        }
    }

    /// Re-base the stop on the entry price when it was set with a stoploss
    /// other than `stoploss`. Returns whether anything changed.
    pub fn reinit_stop_loss(&mut self, stoploss: Decimal) -> bool {
        if self.initial_stop_loss_pct == Some(-stoploss.abs()) {
            return false;
        }
        self.stop_loss = Decimal::ZERO;
        self.adjust_stop_loss(self.open_rate, stoploss, true);
        true
    }

    /// Apply a closed order snapshot to the trade. Other statuses are ignored.
    pub fn update(&mut self, order: &Order) {
        if order.status != OrderStatus::Closed {
            return;
        }

        match (order.order_type, order.side) {
            (OrderType::Limit | OrderType::Market, OrderSide::Buy) => {
                self.open_rate = order.fill_price();
                self.amount = order.filled;
                if !order.cost.is_zero() {
                    self.stake_amount = order.cost;
                }
                self.recalc_open_trade_price();
                self.max_rate = self.max_rate.max(self.open_rate);
                info!(trade_id = self.id, pair = %self.pair, rate = %self.open_rate, "Buy order filled");
                self.open_order_id = None;
            }
            (OrderType::Limit | OrderType::Market, OrderSide::Sell) => {
                info!(trade_id = self.id, pair = %self.pair, rate = %order.fill_price(), "Sell order filled");
                self.close(order.fill_price());
            }
            (OrderType::StopLossLimit, _) => {
                self.stoploss_order_id = None;
                self.close_rate_requested = Some(self.stop_loss);
                info!(trade_id = self.id, pair = %self.pair, "Stoploss order on exchange hit");
                self.close(order.fill_price());
            }
        }
    }

    /// Mark the trade closed at `rate`.
    pub fn close(&mut self, rate: Decimal) {
        self.close_rate = Some(rate);
        self.close_profit = Some(self.calc_profit_ratio(rate));
        self.close_date = Some(Utc::now());
        self.is_open = false;
        self.open_order_id = None;
    }

    /// Replace the amount with the net amount after fees and re-derive the
    /// entry price so that `amount * open_rate == stake_amount`.
    pub fn apply_real_amount(&mut self, net_amount: Decimal) {
        if net_amount.is_zero() {
            return;
        }
        self.amount = net_amount;
        self.fee_open = Decimal::ZERO;
        self.open_rate = self.stake_amount / net_amount;
        self.recalc_open_trade_price();
    }

    /// Reopen after a sell order went away unfilled.
    pub fn reset_exit(&mut self) {
        self.close_rate = None;
        self.close_rate_requested = None;
        self.close_profit = None;
        self.close_date = None;
        self.sell_reason = None;
        self.is_open = true;
        self.open_order_id = None;
    }

    /// Base currency of the pair.
    pub fn base_currency(&self) -> &str {
        self.pair.split('/').next().unwrap_or(&self.pair)
    }
}

impl std::fmt::Display for Trade {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Trade(id={}, pair={}, amount={}, open_rate={}, open_since={})",
            self.id,
            self.pair,
            self.amount,
            self.open_rate,
            if self.is_open {
                self.open_date.format("%Y-%m-%d %H:%M:%S").to_string()
            } else {
                "closed".to_string()
            }
        )
    }
}
