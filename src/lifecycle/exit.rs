//! Exit evaluation, sell execution and forced exits.

use chrono::Utc;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tracing::{debug, error, info, warn};

use super::TradeLifecycle;
use crate::error::{BotError, Result};
use crate::models::{OrderRequest, OrderSide, OrderStatus, OrderType, SellReason, Trade};

impl TradeLifecycle {
    /// Evaluate every open trade for exit. Holds the exit lock, and reads
    /// the trades only once it holds it.
    ///
    /// Returns the number of trades sold or closed by a stoploss order.
    pub async fn exit_positions(&self) -> Result<usize> {
        let _guard = self.exit_lock.lock().await;
        let trades = self.repository.get_open_trades().await?;

        let mut trades_closed = 0;
        for mut trade in trades {
            let result = self.process_exit(&mut trade).await;

            // Persist whatever changed, even when the exit itself failed.
            self.repository.update(&trade).await?;

            match result {
                Ok(true) => trades_closed += 1,
                Ok(false) => {}
                Err(e) if e.is_recoverable() => {
                    warn!(trade_id = trade.id, pair = %trade.pair, error = %e, "Unable to sell trade");
                }
                Err(e) => return Err(e),
            }
        }

        if trades_closed > 0 {
            self.wallets.update().await?;
        }

        Ok(trades_closed)
    }

    async fn process_exit(&self, trade: &mut Trade) -> Result<bool> {
        self.update_trade_state(trade, None).await?;

        if self.strategy.order_types().stoploss_on_exchange && self.handle_stoploss_on_exchange(trade).await? {
            return Ok(true);
        }

        if trade.is_actionable() && self.handle_trade(trade).await? {
            return Ok(true);
        }

        Ok(false)
    }

    /// Sell `trade` if the strategy's sell rules fire at a candidate rate.
    pub async fn handle_trade(&self, trade: &mut Trade) -> Result<bool> {
        if !trade.is_open {
            return Err(BotError::Dependency(format!("Attempt to handle closed trade: {}", trade)));
        }
        debug!(trade_id = trade.id, pair = %trade.pair, "Handling trade");

        let ask = &self.config.ask_strategy;
        let (mut buy, mut sell) = (false, false);
        if ask.use_sell_signal || ask.ignore_roi_if_buy_signal {
            let timeframe = self.strategy.timeframe().to_string();
            let candles = self.data.ohlcv(&trade.pair, &timeframe).await;
            let ctx = self.strategy_context().await;
            let signal = self.strategy.get_signal(&trade.pair, &timeframe, &candles, &ctx).await;
            buy = signal.buy;
            sell = signal.sell;
        }

        if ask.use_order_book {
            let min = ask.order_book_min.max(1);
            let max = ask.order_book_max.max(min);
            debug!(pair = %trade.pair, min = min, max = max, "Using order book for selling");

            let book = self.exchange.get_order_book(&trade.pair, max).await?;
            for level in min..=max {
                let Some(rate) = book.ask_at(level) else {
                    debug!(pair = %trade.pair, level = level, "Order book has no ask at level");
                    break;
                };
                debug!(pair = %trade.pair, level = level, rate = %rate, "Order book ask");
                if self.check_and_execute_sell(trade, rate, buy, sell).await? {
                    return Ok(true);
                }
            }
        } else {
            let rate = self.rates.get_sell_rate(&trade.pair, true).await?;
            if self.check_and_execute_sell(trade, rate, buy, sell).await? {
                return Ok(true);
            }
        }

        debug!(trade_id = trade.id, pair = %trade.pair, "Found no sell signal");
        Ok(false)
    }

    async fn check_and_execute_sell(&self, trade: &mut Trade, rate: Decimal, buy: bool, sell: bool) -> Result<bool> {
        let force_stoploss = match &self.risk_model {
            Some(model) => model.stoploss(&trade.pair),
            None => Decimal::ZERO,
        };

        let check = self
            .strategy
            .should_sell(trade, rate, Utc::now(), buy, sell, force_stoploss);

        match (check.sell_flag, check.sell_type) {
            (true, Some(reason)) => {
                info!(pair = %trade.pair, reason = %reason, rate = %rate, "Executing sell");
                self.execute_sell(trade, rate, reason).await
            }
            _ => Ok(false),
        }
    }

    /// Amount of the base currency that can be sold for a trade recorded
    /// with `amount`.
    ///
    /// Falls back to the wallet balance when it is at most 2% short.
    pub async fn safe_sell_amount(&self, pair: &str, amount: Decimal) -> Result<Decimal> {
        // Funds held by a cancelled stoploss order are free again.
        self.wallets.update().await?;

        let base_currency = self.exchange.get_pair_base_currency(pair).await?;
        let wallet_amount = self.wallets.get_free(&base_currency).await;
        debug!(pair = %pair, wallet = %wallet_amount, amount = %amount, "Checking sellable amount");

        if wallet_amount >= amount {
            Ok(amount)
        } else if wallet_amount > amount * dec!(0.98) {
            info!(pair = %pair, wallet = %wallet_amount, "Falling back to wallet amount");
            Ok(wallet_amount)
        } else {
            Err(BotError::InsufficientFunds(format!(
                "Not enough amount to sell. Trade-amount: {}, Wallet: {}",
                amount, wallet_amount
            )))
        }
    }

    /// Place a sell for `trade` at `limit`.
    pub async fn execute_sell(&self, trade: &mut Trade, limit: Decimal, reason: SellReason) -> Result<bool> {
        let order_types = self.strategy.order_types().clone();
        let mut limit = limit;

        // A simulated stoploss exit fills at the stop itself.
        if self.config.dry_run && reason.is_stoploss() && order_types.stoploss_on_exchange {
            limit = trade.stop_loss;
        }

        if order_types.stoploss_on_exchange {
            if let Some(stoploss_order_id) = trade.stoploss_order_id.clone() {
                match self.exchange.cancel_order(&stoploss_order_id, &trade.pair).await {
                    Ok(_) => trade.stoploss_order_id = None,
                    Err(e) => error!(
                        order_id = %stoploss_order_id,
                        pair = %trade.pair,
                        error = %e,
                        "Could not cancel stoploss order"
                    ),
                }
            }
        }

        let order_type = match reason {
            SellReason::EmergencySell => order_types.emergency_sell,
            r if r.is_stoploss() => order_types.stoploss,
            _ => order_types.sell,
        };

        let amount = self.safe_sell_amount(&trade.pair, trade.amount).await?;
        let time_in_force = self.strategy.time_in_force().sell;
        let order = self
            .exchange
            .place_order(OrderRequest::sell(&trade.pair, order_type, amount, limit, time_in_force))
            .await?;

        trade.open_order_id = Some(order.id.clone());
        trade.close_rate_requested = Some(limit);
        trade.sell_reason = Some(reason);
        // Market orders may close immediately.
        if order.status == OrderStatus::Closed {
            trade.update(&order);
        }

        self.repository.update(trade).await?;
        self.repository.flush().await?;

        self.lock_pair_for_candle(&trade.pair);
        self.notify_sell(trade, order_type).await;

        Ok(true)
    }

    /// Close trade `trade_id` now, at the current sell rate.
    ///
    /// A pending limit buy is cancelled instead. Waits for any running exit
    /// evaluation to finish first.
    pub async fn force_exit(&self, trade_id: i64) -> Result<()> {
        let _guard = self.exit_lock.lock().await;

        let mut trade = self
            .repository
            .get_trade(trade_id)
            .await?
            .filter(|t| t.is_open)
            .ok_or_else(|| BotError::Dependency(format!("No open trade with id {}", trade_id)))?;

        self.force_exit_trade(&mut trade).await?;
        self.repository.flush().await?;
        self.wallets.update().await?;
        Ok(())
    }

    /// Force exit every open trade. Returns the number of trades handled.
    pub async fn force_exit_all(&self) -> Result<usize> {
        let _guard = self.exit_lock.lock().await;

        let trades = self.repository.get_open_trades().await?;
        let count = trades.len();
        for mut trade in trades {
            if let Err(e) = self.force_exit_trade(&mut trade).await {
                if !e.is_recoverable() {
                    return Err(e);
                }
                warn!(trade_id = trade.id, pair = %trade.pair, error = %e, "Force exit failed");
            }
        }

        self.repository.flush().await?;
        self.wallets.update().await?;
        Ok(count)
    }

    async fn force_exit_trade(&self, trade: &mut Trade) -> Result<()> {
        if let Some(order_id) = trade.open_order_id.clone() {
            let order = self.exchange.get_order(&order_id, &trade.pair).await?;

            if order.is_open() && order.order_type == OrderType::Limit && order.side == OrderSide::Buy {
                self.exchange.cancel_order(&order_id, &trade.pair).await?;

                if order.filled.is_zero() {
                    info!(trade_id = trade.id, pair = %trade.pair, "Force exit removed unfilled entry");
                    return self.repository.delete(trade.id).await;
                }

                trade.amount = order.filled;
                trade.stake_amount = trade.amount * trade.open_rate;
                trade.open_order_id = None;
                trade.recalc_open_trade_price();
                info!(trade_id = trade.id, amount = %trade.amount, "Force exit shrunk partially filled entry");
            } else if order.is_open() && order.side == OrderSide::Sell {
                // The sell in flight settles the trade.
                info!(trade_id = trade.id, pair = %trade.pair, "Sell order already pending");
                return Ok(());
            } else {
                self.update_trade_state(trade, Some(&order)).await?;
            }
        }

        if !trade.is_open {
            return self.repository.update(trade).await;
        }

        let rate = self.rates.get_sell_rate(&trade.pair, true).await?;
        self.execute_sell(trade, rate, SellReason::ForceSell).await?;
        Ok(())
    }
}
