//! Stake sizing: how much quote currency to commit to a new trade.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tracing::debug;

use super::RiskModel;
use crate::config::{BotConfig, StakeAmount};
use crate::error::{BotError, Result};
use crate::models::Market;

/// Balances that go into a sizing decision.
#[derive(Debug, Clone, Copy, Default)]
pub struct StakeInputs {
    /// Free stake currency in the wallet
    pub free: Decimal,

    /// Total stake currency in the wallet
    pub total: Decimal,

    /// Stake tied up in open trades
    pub tied_up: Decimal,

    /// Number of open trades
    pub open_trades: usize,
}

/// Calculator for per-trade stakes.
#[derive(Debug, Clone)]
pub struct StakeCalculator {
    stake_currency: String,
    stake_amount: StakeAmount,
    tradable_balance_ratio: Decimal,
    amend_last_stake_amount: bool,
    last_stake_amount_min_ratio: Decimal,
    amount_reserve_percent: Decimal,
    max_open_trades: usize,
}

impl StakeCalculator {
    pub fn new(config: &BotConfig) -> Self {
        Self {
            stake_currency: config.stake_currency.clone(),
            stake_amount: config.stake_amount,
            tradable_balance_ratio: config.tradable_balance_ratio,
            amend_last_stake_amount: config.amend_last_stake_amount,
            last_stake_amount_min_ratio: config.last_stake_amount_min_ratio,
            amount_reserve_percent: config.amount_reserve_percent,
            max_open_trades: config.max_open_trades,
        }
    }

    pub fn free_slots(&self, open_trades: usize) -> usize {
        self.max_open_trades.saturating_sub(open_trades)
    }

    /// Balance the bot may still commit, respecting `tradable_balance_ratio`.
    ///
    /// (tied up + free) * ratio - tied up, so earlier stakes do not shrink
    /// later ones.
    pub fn available(&self, inputs: &StakeInputs) -> Decimal {
        let available = (inputs.tied_up + inputs.free) * self.tradable_balance_ratio - inputs.tied_up;
        available.max(Decimal::ZERO)
    }

    /// Stake for a new trade on `pair`. Zero means "skip".
    pub fn compute_stake(
        &self,
        pair: &str,
        inputs: &StakeInputs,
        risk_model: Option<&dyn RiskModel>,
    ) -> Result<Decimal> {
        let free_slots = self.free_slots(inputs.open_trades);
        if free_slots == 0 {
            return Ok(Decimal::ZERO);
        }

        let available = self.available(inputs);

        let mut stake = match (risk_model, self.stake_amount) {
            (Some(model), _) => model.stake_amount(pair, inputs.free, inputs.total, inputs.tied_up),
            (None, StakeAmount::Fixed(amount)) => amount,
            (None, StakeAmount::Unlimited) => available / Decimal::from(free_slots),
        };

        if self.amend_last_stake_amount {
            // The remainder must be worth at least min_ratio of a stake.
            if available > stake * self.last_stake_amount_min_ratio {
                stake = stake.min(available);
            } else {
                stake = Decimal::ZERO;
            }
        }

        if available < stake {
            return Err(BotError::InsufficientFunds(format!(
                "Available balance ({} {}) is lower than stake amount ({} {})",
                available, self.stake_currency, stake, self.stake_currency
            )));
        }

        debug!(pair = %pair, stake = %stake, available = %available, "Stake computed");
        Ok(stake)
    }

    /// Smallest stake the exchange accepts for `pair` at `price`, with head
    /// room for fees and the stoploss distance.
    pub fn min_pair_stake(&self, market: &Market, price: Decimal, stoploss: Decimal) -> Option<Decimal> {
        let mut minimums = Vec::with_capacity(2);
        if let Some(cost_min) = market.limits.cost_min {
            minimums.push(cost_min);
        }
        if let Some(amount_min) = market.limits.amount_min {
            minimums.push(amount_min * price);
        }
        let min_stake = minimums.into_iter().max()?;

        // Never reserve more than 50%.
        let reserve = (Decimal::ONE - self.amount_reserve_percent + stoploss).max(dec!(0.5));
        Some(min_stake / reserve)
    }
}
