//! Stoploss orders resting on the exchange, including trailing re-arm.

use chrono::Utc;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tracing::{debug, error, info, warn};

use super::TradeLifecycle;
use crate::error::{BotError, Result};
use crate::models::{Order, OrderRequest, OrderStatus, SellReason, Trade};

/// Limit price of a stop order, relative to its trigger.
const STOPLOSS_LIMIT_RATIO: Decimal = dec!(0.99);

impl TradeLifecycle {
    /// Place a stop order for the whole trade at `stop_price`.
    ///
    /// If the exchange refuses the order outright the trade is sold
    /// immediately instead. Returns true only when the order was placed.
    pub async fn create_stoploss_order(&self, trade: &mut Trade, stop_price: Decimal) -> Result<bool> {
        info!(trade_id = trade.id, pair = %trade.pair, stop_price = %stop_price, "Creating stoploss order");

        let request = OrderRequest::stoploss(
            &trade.pair,
            trade.amount,
            stop_price,
            stop_price * STOPLOSS_LIMIT_RATIO,
        );

        match self.exchange.place_order(request).await {
            Ok(order) => {
                trade.stoploss_order_id = Some(order.id);
                trade.stoploss_last_update = Some(Utc::now());
                Ok(true)
            }
            Err(BotError::InvalidOrder(msg)) => {
                trade.stoploss_order_id = None;
                error!(pair = %trade.pair, error = %msg, "Unable to place a stoploss order on exchange");
                warn!(trade_id = trade.id, "Selling the trade forcefully");
                let stop_loss = trade.stop_loss;
                self.execute_sell(trade, stop_loss, SellReason::EmergencySell).await?;
                Ok(false)
            }
            Err(e) if e.is_recoverable() => {
                trade.stoploss_order_id = None;
                error!(pair = %trade.pair, error = %e, "Unable to place a stoploss order on exchange");
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }

    /// One pass of stoploss-on-exchange bookkeeping for `trade`.
    ///
    /// Returns true when the stop order has filled and the trade is closed.
    pub async fn handle_stoploss_on_exchange(&self, trade: &mut Trade) -> Result<bool> {
        debug!(trade_id = trade.id, pair = %trade.pair, "Handling stoploss on exchange");

        let stoploss_order = match trade.stoploss_order_id.clone() {
            Some(order_id) => match self.exchange.get_order(&order_id, &trade.pair).await {
                Ok(order) => Some(order),
                Err(BotError::InvalidOrder(msg)) => {
                    warn!(order_id = %order_id, error = %msg, "Unable to fetch stoploss order");
                    None
                }
                Err(e) => return Err(e),
            },
            None => None,
        };

        if let Some(order) = stoploss_order.as_ref().filter(|o| o.status == OrderStatus::Closed) {
            trade.sell_reason = Some(SellReason::StoplossOnExchange);
            trade.update(order);
            self.lock_pair_for_candle(&trade.pair);
            self.notify_sell(trade, order.order_type).await;
            return Ok(true);
        }

        // Funds are tied up in the pending order, or the trade just closed.
        if trade.open_order_id.is_some() || !trade.is_open {
            return Ok(false);
        }

        let Some(order) = stoploss_order else {
            let stoploss = self.stoploss_for(&trade.pair);
            trade.adjust_stop_loss(trade.open_rate, stoploss, true);
            let stop_price = trade.open_rate * (Decimal::ONE + stoploss);
            if self.create_stoploss_order(trade, stop_price).await? {
                info!(trade_id = trade.id, stop_price = %stop_price, "Stoploss order placed");
            }
            return Ok(false);
        };

        if order.status == OrderStatus::Canceled {
            let stop_loss = trade.stop_loss;
            if self.create_stoploss_order(trade, stop_loss).await? {
                info!(trade_id = trade.id, stop_price = %stop_loss, "Cancelled stoploss order recreated");
            } else {
                trade.stoploss_order_id = None;
                warn!(trade_id = trade.id, "Stoploss order was cancelled, but unable to recreate one");
            }
            return Ok(false);
        }

        if self.strategy.trailing_stop() {
            self.handle_trailing_stoploss_on_exchange(trade, &order).await?;
        }

        Ok(false)
    }

    /// Replace the resting stop order when the trade's stop has moved up.
    async fn handle_trailing_stoploss_on_exchange(&self, trade: &mut Trade, order: &Order) -> Result<()> {
        if !self.exchange.stoploss_adjust(trade.stop_loss, order) {
            return Ok(());
        }

        let interval = self.strategy.order_types().stoploss_on_exchange_interval;
        if let Some(last_update) = trade.stoploss_last_update {
            if (Utc::now() - last_update).num_seconds() < interval {
                debug!(trade_id = trade.id, "Stoploss re-arm interval not elapsed");
                return Ok(());
            }
        }

        info!(
            trade_id = trade.id,
            order_id = %order.id,
            pair = %trade.pair,
            "Trailing stoploss: cancelling current stoploss on exchange to add another one"
        );
        match self.exchange.cancel_order(&order.id, &trade.pair).await {
            Ok(_) => {}
            Err(BotError::InvalidOrder(msg)) => {
                error!(order_id = %order.id, pair = %trade.pair, error = %msg, "Could not cancel stoploss order");
            }
            Err(e) => return Err(e),
        }
        trade.stoploss_order_id = None;

        let sell_rate = self.rates.get_sell_rate(&trade.pair, false).await?;
        let buy_rate = self.rates.get_buy_rate(&trade.pair, false).await?;
        let market = self.exchange.market(&trade.pair).await?;
        let decimals = market.price_decimals();
        let pip = market.tick_size();
        let spread = (sell_rate - buy_rate).round_dp(decimals);
        let last_rate = self.exchange.fetch_ticker(&trade.pair).await?.last;

        let mut new_stop_loss = trade.stop_loss;
        if new_stop_loss >= buy_rate && last_rate > buy_rate {
            new_stop_loss = if spread > pip { buy_rate + pip } else { buy_rate };
            info!(
                pair = %trade.pair,
                from = %trade.stop_loss,
                to = %new_stop_loss,
                "Moving trailing stoploss target to do-able rate"
            );
        }
        if let Some(previous) = order.stop_price {
            new_stop_loss = new_stop_loss.max(previous);
        }

        info!(
            initial = %trade.initial_stop_loss,
            current = %trade.stop_loss,
            new = %new_stop_loss,
            sell_rate = %sell_rate,
            buy_rate = %buy_rate,
            last = %last_rate,
            spread = %spread,
            pip = %pip,
            "Trailing stoploss re-arm"
        );

        if !self.create_stoploss_order(trade, new_stop_loss).await? {
            error!(pair = %trade.pair, "Could not create trailing stoploss order");
        }

        Ok(())
    }
}
