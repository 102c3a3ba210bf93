//! Risk models that take over stake sizing and stoploss selection.

use rust_decimal::Decimal;
use tracing::debug;

use crate::config::EdgeConfig;
use crate::error::Result;

/// Position sizing driven by a per-trade risk budget.
pub trait RiskModel: Send + Sync {
    /// Refresh whatever statistics the model keeps. Returns true when
    /// something changed.
    fn calculate(&self) -> Result<bool> {
        Ok(false)
    }

    /// Filter or reorder the tradable pairs.
    fn adjust(&self, pairs: Vec<String>) -> Vec<String> {
        pairs
    }

    /// Stake for a new trade on `pair`.
    fn stake_amount(&self, pair: &str, free: Decimal, total: Decimal, tied_up: Decimal) -> Decimal;

    /// Stoploss fraction (negative) to use for `pair`.
    fn stoploss(&self, pair: &str) -> Decimal;
}

/// Risks a fixed share of capital per trade, sized by the stoploss distance.
pub struct FixedRiskModel {
    config: EdgeConfig,
}

impl FixedRiskModel {
    pub fn new(config: EdgeConfig) -> Self {
        Self { config }
    }
}

impl RiskModel for FixedRiskModel {
    fn stake_amount(&self, pair: &str, free: Decimal, total: Decimal, tied_up: Decimal) -> Decimal {
        let stoploss = self.stoploss(pair);
        if stoploss.is_zero() {
            return Decimal::ZERO;
        }

        let available_capital = (total + tied_up) * self.config.capital_available_percentage;
        let capital_at_risk = available_capital * self.config.allowed_risk;
        let max_position = (capital_at_risk / stoploss).abs();
        let position = max_position.min(free);

        debug!(
            pair = %pair,
            capital_at_risk = %capital_at_risk,
            position = %position,
            "Risk model stake"
        );

        position
    }

    fn stoploss(&self, _pair: &str) -> Decimal {
        self.config.stoploss
    }
}
