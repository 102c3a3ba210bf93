//! Position lifecycle controller.
//!
//! Owns every money-moving side effect: entries, exits, stoploss orders on
//! the exchange, order timeouts and fee reconciliation. The cycle driver
//! calls into it once per tick; a forced exit from another task goes through
//! the same exit lock as the cycle's exit evaluation.
//!
//! Per-trade states:
//! - `EntryPending`: buy order in flight, only reconcilable
//! - `OpenActionable`: position held, evaluated for exit every cycle
//! - `ExitPending`: sell order in flight, only reconcilable
//! - `Closed`

mod entry;
mod exit;
mod reconcile;
mod stoploss;
mod timeout;

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use chrono::Utc;
use rust_decimal::Decimal;
use tracing::{info, warn};

use crate::config::BotConfig;
use crate::data::DataProvider;
use crate::error::Result;
use crate::exchange::Exchange;
use crate::models::{OrderType, Trade};
use crate::notify::{EntryEvent, ExitEvent, Notification, Notifier};
use crate::persistence::TradeRepository;
use crate::strategy::{next_candle_open, StrategyContext, StrategyOracle};
use crate::trading::{FixedRiskModel, RateCache, RiskModel, StakeCalculator};
use crate::wallets::Wallets;

/// Orchestrates entries, exits and order bookkeeping for all trades.
pub struct TradeLifecycle {
    config: BotConfig,
    exchange: Arc<dyn Exchange>,
    strategy: Arc<dyn StrategyOracle>,
    repository: Arc<dyn TradeRepository>,
    data: Arc<dyn DataProvider>,
    wallets: Wallets,
    rates: RateCache,
    stake: StakeCalculator,
    risk_model: Option<Arc<dyn RiskModel>>,
    notifier: Notifier,

    /// Serializes exit processing between the cycle and forced exits
    exit_lock: tokio::sync::Mutex<()>,

    /// Trades whose partially filled sell timed out and were reported
    flagged_partial_sells: Mutex<HashSet<i64>>,
}

impl TradeLifecycle {
    pub fn new(
        config: BotConfig,
        exchange: Arc<dyn Exchange>,
        strategy: Arc<dyn StrategyOracle>,
        repository: Arc<dyn TradeRepository>,
        data: Arc<dyn DataProvider>,
        notifier: Notifier,
    ) -> Self {
        let risk_model: Option<Arc<dyn RiskModel>> = if config.edge.enabled {
            Some(Arc::new(FixedRiskModel::new(config.edge.clone())))
        } else {
            None
        };

        Self {
            wallets: Wallets::new(exchange.clone()),
            rates: RateCache::new(
                exchange.clone(),
                config.bid_strategy.clone(),
                config.ask_strategy.clone(),
            ),
            stake: StakeCalculator::new(&config),
            config,
            exchange,
            strategy,
            repository,
            data,
            risk_model,
            notifier,
            exit_lock: tokio::sync::Mutex::new(()),
            flagged_partial_sells: Mutex::new(HashSet::new()),
        }
    }

    pub fn config(&self) -> &BotConfig {
        &self.config
    }

    pub fn exchange(&self) -> &Arc<dyn Exchange> {
        &self.exchange
    }

    pub fn strategy(&self) -> &Arc<dyn StrategyOracle> {
        &self.strategy
    }

    pub fn repository(&self) -> &Arc<dyn TradeRepository> {
        &self.repository
    }

    pub fn data(&self) -> &Arc<dyn DataProvider> {
        &self.data
    }

    pub fn wallets(&self) -> &Wallets {
        &self.wallets
    }

    pub fn rates(&self) -> &RateCache {
        &self.rates
    }

    pub fn risk_model(&self) -> Option<&Arc<dyn RiskModel>> {
        self.risk_model.as_ref()
    }

    pub fn notifier(&self) -> &Notifier {
        &self.notifier
    }

    /// Number of positions that may still be opened.
    pub async fn free_slots(&self) -> Result<usize> {
        let open = self.repository.get_open_trades().await?;
        Ok(self.stake.free_slots(open.len()))
    }

    /// Forget a partial-sell flag once the trade's sell order settled.
    fn clear_partial_sell_flag(&self, trade_id: i64) {
        if let Ok(mut flagged) = self.flagged_partial_sells.lock() {
            if flagged.remove(&trade_id) {
                info!(trade_id = trade_id, "Partially filled sell order resolved");
            }
        }
    }

    /// Ids of trades whose partially filled sell order timed out.
    pub fn flagged_partial_sells(&self) -> Vec<i64> {
        match self.flagged_partial_sells.lock() {
            Ok(set) => {
                let mut ids: Vec<i64> = set.iter().copied().collect();
                ids.sort_unstable();
                ids
            }
            Err(_) => Vec::new(),
        }
    }

    /// Re-base the stops of open trades opened under a different strategy
    /// stoploss. Skipped while a risk model picks the stoploss. Returns the
    /// number of trades changed.
    pub async fn reinitialize_stoploss(&self) -> Result<usize> {
        if self.risk_model.is_some() {
            return Ok(0);
        }
        let _guard = self.exit_lock.lock().await;

        let stoploss = self.strategy.stoploss();
        let mut changed = 0;
        for mut trade in self.repository.get_open_trades().await? {
            if trade.reinit_stop_loss(stoploss) {
                info!(
                    trade_id = trade.id,
                    pair = %trade.pair,
                    stop_loss = %trade.stop_loss,
                    "Stoploss reinitialized"
                );
                self.repository.update(&trade).await?;
                changed += 1;
            }
        }
        if changed > 0 {
            self.repository.flush().await?;
        }
        Ok(changed)
    }

    async fn strategy_context(&self) -> StrategyContext {
        StrategyContext {
            data: self.data.clone(),
            balances: self.wallets.snapshot().await,
        }
    }

    /// Stoploss fraction for `pair`: the risk model's if active, else the strategy's.
    fn stoploss_for(&self, pair: &str) -> Decimal {
        match &self.risk_model {
            Some(model) => model.stoploss(pair),
            None => self.strategy.stoploss(),
        }
    }

    /// Bar new entries on `pair` until the next candle opens.
    fn lock_pair_for_candle(&self, pair: &str) {
        let until = next_candle_open(&self.config.timeframe, Utc::now());
        self.strategy.lock_pair(pair, until);
    }

    // ==================== Notifications ====================

    fn entry_event(&self, trade: &Trade, order_type: OrderType, current_rate: Decimal) -> EntryEvent {
        EntryEvent {
            trade_id: trade.id,
            exchange: capitalize(&trade.exchange),
            pair: trade.pair.clone(),
            limit: trade.open_rate,
            order_type,
            stake_amount: trade.stake_amount,
            stake_currency: self.config.stake_currency.clone(),
            fiat_currency: self.config.fiat_display_currency.clone(),
            amount: trade.amount,
            open_date: trade.open_date,
            current_rate,
        }
    }

    async fn exit_event(&self, trade: &Trade, order_type: OrderType) -> ExitEvent {
        let profit_rate = trade
            .close_rate
            .or(trade.close_rate_requested)
            .unwrap_or(trade.open_rate);
        let profit_ratio = trade.calc_profit_ratio(profit_rate);

        // Rate was fetched moments ago, the cache is good enough here.
        let current_rate = match self.rates.get_sell_rate(&trade.pair, true).await {
            Ok(rate) => rate,
            Err(e) => {
                warn!(pair = %trade.pair, error = %e, "Could not fetch sell rate for notification");
                profit_rate
            }
        };

        ExitEvent {
            trade_id: trade.id,
            exchange: capitalize(&trade.exchange),
            pair: trade.pair.clone(),
            gain: if profit_ratio > Decimal::ZERO { "profit" } else { "loss" }.to_string(),
            limit: profit_rate,
            order_type,
            amount: trade.amount,
            open_rate: trade.open_rate,
            current_rate,
            profit_amount: trade.calc_profit(profit_rate),
            profit_ratio,
            sell_reason: trade.sell_reason,
            open_date: trade.open_date,
            close_date: trade.close_date,
            stake_currency: self.config.stake_currency.clone(),
            fiat_currency: self.config.fiat_display_currency.clone(),
        }
    }

    fn notify_buy(&self, trade: &Trade, order_type: OrderType) {
        let current_rate = trade.open_rate_requested.unwrap_or(trade.open_rate);
        self.notifier
            .emit(Notification::Entry(self.entry_event(trade, order_type, current_rate)));
    }

    async fn notify_buy_cancel(&self, trade: &Trade, order_type: OrderType) {
        let current_rate = match self.rates.get_buy_rate(&trade.pair, true).await {
            Ok(rate) => rate,
            Err(e) => {
                warn!(pair = %trade.pair, error = %e, "Could not fetch buy rate for notification");
                trade.open_rate
            }
        };
        self.notifier
            .emit(Notification::EntryCancel(self.entry_event(trade, order_type, current_rate)));
    }

    async fn notify_sell(&self, trade: &Trade, order_type: OrderType) {
        let mut event = self.exit_event(trade, order_type).await;
        event.close_date.get_or_insert_with(Utc::now);
        self.notifier.emit(Notification::Exit(event));
    }

    pub fn notify_status(&self, message: impl Into<String>) {
        self.notifier.emit(Notification::status(message));
    }
}

fn capitalize(name: &str) -> String {
    let mut chars = name.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}
