//! Entry scanning, stake sizing and buy execution.

use rust_decimal::Decimal;
use tracing::{debug, info, warn};

use super::TradeLifecycle;
use crate::error::{BotError, Result};
use crate::exchange::TakerOrMaker;
use crate::models::{split_pair, Order, OrderRequest, OrderStatus, Trade};
use crate::trading::StakeInputs;

/// Order book depth used for the depth-of-market check.
const DEPTH_OF_MARKET_LEVELS: usize = 1000;

impl TradeLifecycle {
    /// Try to open a trade on every whitelisted pair without one.
    ///
    /// Recoverable failures only skip the pair. Returns the number of trades
    /// created.
    pub async fn enter_positions(&self, whitelist: &[String]) -> Result<usize> {
        let open_trades = self.repository.get_open_trades().await?;
        let candidates: Vec<&String> = whitelist
            .iter()
            .filter(|pair| !open_trades.iter().any(|t| &t.pair == *pair))
            .collect();

        if candidates.is_empty() {
            info!("No currency pair in active pair whitelist, but checking to sell open trades");
            return Ok(0);
        }

        let mut created = 0;
        for pair in candidates {
            match self.create_trade(pair).await {
                Ok(true) => created += 1,
                Ok(false) => {}
                Err(e) if e.is_recoverable() => {
                    warn!(pair = %pair, error = %e, "Unable to create trade");
                }
                Err(e) => return Err(e),
            }
        }

        if created == 0 {
            debug!("Found no buy signals for whitelisted currencies");
        }

        Ok(created)
    }

    /// Check the strategy for a buy signal on `pair` and buy if it fires.
    pub async fn create_trade(&self, pair: &str) -> Result<bool> {
        debug!(pair = %pair, "create_trade");

        if self.strategy.is_pair_locked(pair) {
            info!(pair = %pair, "Pair is currently locked");
            return Ok(false);
        }

        let timeframe = self.strategy.timeframe().to_string();
        let candles = self.data.ohlcv(pair, &timeframe).await;
        let ctx = self.strategy_context().await;
        let signal = self.strategy.get_signal(pair, &timeframe, &candles, &ctx).await;

        if !signal.buy || signal.sell {
            return Ok(false);
        }

        if self.free_slots().await? == 0 {
            debug!(pair = %pair, "Can't open a new trade: max number of trades is reached");
            return Ok(false);
        }

        let stake_amount = self.get_trade_stake_amount(pair).await?;
        if stake_amount.is_zero() {
            debug!(pair = %pair, "Stake amount is 0, ignoring possible trade");
            return Ok(false);
        }

        info!(pair = %pair, stake = %stake_amount, "Buy signal found");

        let dom = &self.config.bid_strategy.check_depth_of_market;
        if dom.enabled && dom.bids_to_ask_delta > Decimal::ZERO && !self.check_depth_of_market_buy(pair).await? {
            return Ok(false);
        }

        info!(pair = %pair, "Executing buy");
        self.execute_buy(pair, stake_amount, None).await
    }

    /// Stake for a new trade on `pair`, after a full wallet refresh.
    pub async fn get_trade_stake_amount(&self, pair: &str) -> Result<Decimal> {
        self.wallets.update().await?;

        let currency = &self.config.stake_currency;
        let inputs = StakeInputs {
            free: self.wallets.get_free(currency).await,
            total: self.wallets.get_total(currency).await,
            tied_up: self.repository.total_open_trades_stakes().await?,
            open_trades: self.repository.get_open_trades().await?.len(),
        };

        self.stake.compute_stake(pair, &inputs, self.risk_model.as_deref())
    }

    /// Whether bid volume outweighs ask volume enough to buy.
    async fn check_depth_of_market_buy(&self, pair: &str) -> Result<bool> {
        let delta = self.config.bid_strategy.check_depth_of_market.bids_to_ask_delta;
        info!(pair = %pair, "Checking depth of market");

        let book = self.exchange.get_order_book(pair, DEPTH_OF_MARKET_LEVELS).await?;
        let Some(ratio) = book.bid_ask_ratio() else {
            info!(pair = %pair, "Order book is empty on one side, skipping");
            return Ok(false);
        };

        let satisfied = ratio >= delta;
        info!(
            pair = %pair,
            ratio = %ratio,
            required = %delta,
            satisfied = satisfied,
            "Bids to asks delta"
        );
        Ok(satisfied)
    }

    /// Place a buy for `pair` worth `stake_amount`, at `price` or the current
    /// buy rate. Returns false when the entry was declined.
    pub async fn execute_buy(&self, pair: &str, stake_amount: Decimal, price: Option<Decimal>) -> Result<bool> {
        info!(pair = %pair, stake = %stake_amount, price = ?price, "execute_buy");

        let time_in_force = self.strategy.time_in_force().buy;
        let buy_limit_requested = match price {
            Some(price) => price,
            None => self.rates.get_buy_rate(pair, false).await?,
        };
        if buy_limit_requested <= Decimal::ZERO {
            return Err(BotError::Dependency(format!("Invalid buy rate {} for {}", buy_limit_requested, pair)));
        }

        let market = self.exchange.market(pair).await?;
        let min_stake = self
            .stake
            .min_pair_stake(&market, buy_limit_requested, self.stoploss_for(pair));
        if let Some(min_stake) = min_stake {
            if min_stake > stake_amount {
                warn!(
                    pair = %pair,
                    stake = %stake_amount,
                    min_stake = %min_stake,
                    "Can't open a new trade: stake amount is too small"
                );
                self.lock_pair_for_candle(pair);
                return Ok(false);
            }
        }

        let amount = stake_amount / buy_limit_requested;
        let order_type = self.strategy.order_types().buy;
        let order = self
            .exchange
            .place_order(OrderRequest::buy(pair, order_type, amount, buy_limit_requested, time_in_force))
            .await?;

        let mut order_id = Some(order.id.clone());
        let mut stake_amount = stake_amount;
        let mut amount = amount;
        // Assume execution at the requested price until told otherwise.
        let mut buy_limit_filled_price = buy_limit_requested;

        if order.is_dead() {
            if order.filled.is_zero() {
                warn!(
                    pair = %pair,
                    status = order.status.as_str(),
                    time_in_force = ?time_in_force,
                    exchange = self.exchange.name(),
                    "Buy order not filled, zero amount fulfilled"
                );
                return Ok(false);
            }

            warn!(
                pair = %pair,
                status = order.status.as_str(),
                filled = %order.filled,
                amount = %order.amount,
                remaining = %order.remaining,
                "Buy order partially filled, remainder canceled"
            );
            stake_amount = filled_cost(&order);
            amount = order.filled;
            buy_limit_filled_price = order.fill_price();
            order_id = None;
        } else if order.status == OrderStatus::Closed {
            stake_amount = filled_cost(&order);
            amount = order.filled;
            buy_limit_filled_price = order.fill_price();
        }

        // Charged on both legs, the exit is a limit order too.
        let fee = self.exchange.get_fee(pair, TakerOrMaker::Maker).await?;

        let mut trade = Trade::new(
            self.exchange.name(),
            pair,
            stake_amount,
            amount,
            buy_limit_filled_price,
            fee,
            order_id,
            self.strategy.name(),
            self.strategy.timeframe(),
        );
        trade.open_rate_requested = Some(buy_limit_requested);

        let mut trade = self.repository.add(trade).await?;

        if order.status == OrderStatus::Closed {
            self.update_trade_state(&mut trade, Some(&order)).await?;
            self.repository.update(&trade).await?;
        }
        self.repository.flush().await?;

        self.wallets.update().await?;
        info!(trade_id = trade.id, pair = %pair, amount = %trade.amount, rate = %trade.open_rate, "Trade opened");
        self.notify_buy(&trade, order_type);

        Ok(true)
    }

    /// Open a trade on `pair` regardless of the strategy signal.
    pub async fn force_entry(&self, pair: &str, price: Option<Decimal>) -> Result<Option<Trade>> {
        let (_, quote) = split_pair(pair);
        if quote != self.config.stake_currency {
            return Err(BotError::Dependency(format!(
                "Wrong pair selected. Please pairs with stake {} pairs only",
                self.config.stake_currency
            )));
        }

        let open_trades = self.repository.get_open_trades().await?;
        if open_trades.iter().any(|t| t.pair == pair) {
            return Err(BotError::Dependency(format!("Position for {} already open", pair)));
        }

        let stake_amount = self.get_trade_stake_amount(pair).await?;
        if stake_amount.is_zero() {
            return Err(BotError::Dependency("No free trade slots or stake available".to_string()));
        }

        info!(pair = %pair, stake = %stake_amount, price = ?price, "Forcing entry");
        if !self.execute_buy(pair, stake_amount, price).await? {
            return Ok(None);
        }

        let trades = self.repository.get_open_trades().await?;
        Ok(trades.into_iter().find(|t| t.pair == pair))
    }
}

/// Quote spent by an order, falling back to filled × price.
fn filled_cost(order: &Order) -> Decimal {
    if order.cost.is_zero() {
        order.filled * order.fill_price()
    } else {
        order.cost
    }
}
