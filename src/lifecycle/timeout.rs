//! Unfilled order timeouts.

use chrono::{Duration, Utc};
use tracing::{info, warn};

use super::reconcile::is_close;
use super::TradeLifecycle;
use crate::error::Result;
use crate::models::{Order, OrderSide, OrderStatus, Trade};
use crate::notify::Notification;

impl TradeLifecycle {
    /// Cancel orders that were cancelled on the exchange or sat unfilled for
    /// longer than the configured timeout, and fix up their trades.
    pub async fn check_handle_timedout(&self) -> Result<()> {
        let trades = self.repository.get_open_order_trades().await?;

        for mut trade in trades {
            let Some(order_id) = trade.open_order_id.clone() else {
                continue;
            };

            let order = match self.exchange.get_order(&order_id, &trade.pair).await {
                Ok(order) => order,
                Err(e) if e.is_recoverable() => {
                    info!(trade_id = trade.id, pair = %trade.pair, error = %e, "Cannot query order");
                    continue;
                }
                Err(e) => return Err(e),
            };

            // Fully filled, the next exit pass reconciles it.
            if order.remaining.is_zero() {
                self.wallets.update().await?;
                continue;
            }

            match self.handle_order_timeout(&mut trade, &order).await {
                Ok(()) => {}
                Err(e) if e.is_recoverable() => {
                    warn!(trade_id = trade.id, pair = %trade.pair, error = %e, "Unable to handle order timeout");
                }
                Err(e) => return Err(e),
            }
        }

        Ok(())
    }

    async fn handle_order_timeout(&self, trade: &mut Trade, order: &Order) -> Result<()> {
        let order_types = self.strategy.order_types().clone();
        let cancelled = order.status == OrderStatus::Canceled;

        if order.side == OrderSide::Buy && (cancelled || self.check_timed_out(OrderSide::Buy, order)) {
            self.handle_timedout_limit_buy(trade, order).await?;
            self.wallets.update().await?;
            self.notify_buy_cancel(trade, order_types.buy).await;
        } else if order.side == OrderSide::Sell && (cancelled || self.check_timed_out(OrderSide::Sell, order)) {
            // Snapshot before the exit fields are cleared.
            let event = self.exit_event(trade, order_types.sell).await;
            if self.handle_timedout_limit_sell(trade, order).await? {
                self.wallets.update().await?;
                self.notifier.emit(Notification::ExitCancel(event));
            }
        }

        Ok(())
    }

    /// Whether `order` is still open on `side` past its unfilled timeout.
    fn check_timed_out(&self, side: OrderSide, order: &Order) -> bool {
        let timeout = match side {
            OrderSide::Buy => self.config.unfilled_timeout.buy,
            OrderSide::Sell => self.config.unfilled_timeout.sell,
        };

        match timeout {
            Some(minutes) => {
                let threshold = Utc::now() - Duration::minutes(minutes);
                order.status == OrderStatus::Open && order.side == side && order.datetime < threshold
            }
            None => false,
        }
    }

    /// Cancel a timed out buy. An untouched order removes the trade; a
    /// partial fill shrinks it to what was bought.
    ///
    /// Returns true when the trade was deleted.
    async fn handle_timedout_limit_buy(&self, trade: &mut Trade, order: &Order) -> Result<bool> {
        let cancelled_order = if order.status != OrderStatus::Canceled {
            let cancelled = self.exchange.cancel_order(&order.id, &trade.pair).await?;
            info!(trade_id = trade.id, pair = %trade.pair, "Buy order cancelled due to timeout");
            cancelled
        } else {
            info!(trade_id = trade.id, pair = %trade.pair, "Buy order cancelled on exchange");
            order.clone()
        };

        if cancelled_order.remaining == order.amount {
            self.repository.delete(trade.id).await?;
            self.repository.flush().await?;
            info!(trade_id = trade.id, pair = %trade.pair, "Unfilled trade removed");
            return Ok(true);
        }

        trade.amount = order.amount - cancelled_order.remaining;
        trade.stake_amount = trade.amount * trade.open_rate;
        trade.recalc_open_trade_price();

        // The cancel response may not carry fee data.
        let fee_source = if cancelled_order.fee.is_some() { &cancelled_order } else { order };
        match self.get_real_amount(trade, fee_source, Some(trade.amount)).await {
            Ok(new_amount) => {
                if !is_close(trade.amount, new_amount) {
                    trade.apply_real_amount(new_amount);
                }
            }
            Err(e) if e.is_recoverable() => {
                warn!(trade_id = trade.id, error = %e, "Could not update trade amount");
            }
            Err(e) => return Err(e),
        }

        trade.open_order_id = None;
        self.repository.update(trade).await?;
        info!(trade_id = trade.id, amount = %trade.amount, "Partial buy order timeout");
        self.notify_status(format!(
            "Remaining buy order for {} cancelled due to timeout",
            trade.pair
        ));

        Ok(false)
    }

    /// Cancel a timed out sell and reopen the trade.
    ///
    /// A partially filled sell is left on the exchange: the trade is flagged
    /// for manual intervention and reported once. Returns whether an
    /// exit-cancel should be reported.
    async fn handle_timedout_limit_sell(&self, trade: &mut Trade, order: &Order) -> Result<bool> {
        if order.remaining == order.amount {
            if order.status != OrderStatus::Canceled {
                self.exchange.cancel_order(&order.id, &trade.pair).await?;
                info!(trade_id = trade.id, pair = %trade.pair, "Sell order cancelled due to timeout");
            } else {
                info!(trade_id = trade.id, pair = %trade.pair, "Sell order cancelled on exchange");
            }

            trade.reset_exit();
            self.repository.update(trade).await?;
            return Ok(true);
        }

        let first_report = match self.flagged_partial_sells.lock() {
            Ok(mut flagged) => flagged.insert(trade.id),
            Err(_) => false,
        };
        if first_report {
            warn!(
                trade_id = trade.id,
                pair = %trade.pair,
                filled = %order.filled,
                amount = %order.amount,
                "Partially filled sell order timed out, manual intervention required"
            );
            self.notify_status(format!(
                "Sell order for {} partially filled ({} of {}) and timed out, manual intervention required",
                trade.pair, order.filled, order.amount
            ));
        }

        Ok(first_report)
    }
}
