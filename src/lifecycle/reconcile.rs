//! Order state reconciliation and fee-adjusted amounts.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tracing::{info, warn};

use super::TradeLifecycle;
use crate::error::{BotError, Result};
use crate::models::{Order, OrderSide, Trade};

/// Absolute tolerance when comparing amounts.
pub const MATH_CLOSE_PREC: Decimal = dec!(0.00000000000001);

pub(crate) fn is_close(a: Decimal, b: Decimal) -> bool {
    (a - b).abs() <= MATH_CLOSE_PREC
}

impl TradeLifecycle {
    /// Bring a pending trade in line with its order on the exchange.
    ///
    /// Uses `action_order` when the caller already holds a fresh snapshot.
    pub async fn update_trade_state(&self, trade: &mut Trade, action_order: Option<&Order>) -> Result<()> {
        let Some(order_id) = trade.open_order_id.clone() else {
            return Ok(());
        };
        info!(trade_id = trade.id, pair = %trade.pair, order_id = %order_id, "Found open order for trade");

        let order = match action_order {
            Some(order) => order.clone(),
            None => match self.exchange.get_order(&order_id, &trade.pair).await {
                Ok(order) => order,
                Err(BotError::InvalidOrder(msg)) => {
                    warn!(order_id = %order_id, error = %msg, "Unable to fetch order");
                    return Ok(());
                }
                Err(e) => return Err(e),
            },
        };

        // Fees charged in the base currency shrink what we actually hold.
        let net_amount = if order.side == OrderSide::Buy {
            match self.get_real_amount(trade, &order, None).await {
                Ok(amount) => Some(amount),
                Err(e) if e.is_recoverable() => {
                    warn!(trade_id = trade.id, error = %e, "Could not update trade amount");
                    None
                }
                Err(e) => return Err(e),
            }
        } else {
            None
        };

        trade.update(&order);

        // Only a filled buy has an amount to correct.
        if let Some(net_amount) = net_amount {
            if trade.open_order_id.is_none() && !is_close(order.amount, net_amount) {
                trade.apply_real_amount(net_amount);
            }
        }

        if trade.open_order_id.is_none() {
            self.clear_partial_sell_flag(trade.id);
        }
        if !trade.is_open {
            self.wallets.update().await?;
        }

        Ok(())
    }

    /// Amount actually received for `order`, net of fees taken in the base
    /// currency.
    ///
    /// Prefers the fee embedded in the order; otherwise sums the order's fills.
    /// Fills that do not add up to the order amount are an accounting fault.
    pub async fn get_real_amount(
        &self,
        trade: &Trade,
        order: &Order,
        order_amount: Option<Decimal>,
    ) -> Result<Decimal> {
        let order_amount = order_amount.unwrap_or(order.amount);

        if trade.fee_open.is_zero() || order.is_open() {
            return Ok(order_amount);
        }

        let base_currency = self.exchange.get_pair_base_currency(&trade.pair).await?;

        if let Some(fee) = &order.fee {
            if fee.currency == base_currency {
                let new_amount = order_amount - fee.cost;
                info!(
                    trade_id = trade.id,
                    from = %order_amount,
                    to = %new_amount,
                    "Applying fee on amount from order"
                );
                return Ok(new_amount);
            }
        }

        let fills = self
            .exchange
            .get_trades_for_order(&order.id, &trade.pair, trade.open_date)
            .await?;

        if fills.is_empty() {
            info!(trade_id = trade.id, "Applying fee on amount failed: no fills found");
            return Ok(order_amount);
        }

        let mut amount = Decimal::ZERO;
        let mut fee_abs = Decimal::ZERO;
        for fill in &fills {
            amount += fill.amount;
            if let Some(fee) = &fill.fee {
                if fee.currency == base_currency {
                    fee_abs += fee.cost;
                }
            }
        }

        if !is_close(amount, order_amount) {
            warn!(
                trade_id = trade.id,
                fills = %amount,
                order_amount = %order_amount,
                "Fill amounts do not match order amount"
            );
            return Err(BotError::Reconciliation("Half bought? Amounts don't match".to_string()));
        }

        let real_amount = amount - fee_abs;
        if !fee_abs.is_zero() {
            info!(
                trade_id = trade.id,
                from = %order_amount,
                to = %real_amount,
                "Applying fee on amount from fills"
            );
        }
        Ok(real_amount)
    }
}
