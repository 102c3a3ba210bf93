//! Exchange capability set used by the trading engine.
//!
//! Implementations classify their failures into `BotError::Temporary` and
//! `BotError::InvalidOrder`; the engine decides per call site what to do.

mod paper;

pub use paper::PaperExchange;

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

use crate::error::{BotError, Result};
use crate::models::{Balance, Candle, Fill, Market, Order, OrderBook, OrderRequest, Ticker};

/// Fee side for `Exchange::get_fee`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TakerOrMaker {
    Maker,
    Taker,
}

/// Trait for spot exchange clients.
#[async_trait]
pub trait Exchange: Send + Sync {
    /// Exchange identifier stored on trades
    fn name(&self) -> &str;

    /// Reload market metadata. Called once per cycle.
    async fn reload_markets(&self) -> Result<()> {
        Ok(())
    }

    /// Metadata for a pair.
    async fn market(&self, pair: &str) -> Result<Market>;

    async fn fetch_ticker(&self, pair: &str) -> Result<Ticker>;

    async fn get_order_book(&self, pair: &str, depth: usize) -> Result<OrderBook>;

    async fn place_order(&self, request: OrderRequest) -> Result<Order>;

    async fn get_order(&self, order_id: &str, pair: &str) -> Result<Order>;

    async fn cancel_order(&self, order_id: &str, pair: &str) -> Result<Order>;

    /// Individual fills of an order, executed after `since`.
    async fn get_trades_for_order(
        &self,
        order_id: &str,
        pair: &str,
        since: DateTime<Utc>,
    ) -> Result<Vec<Fill>>;

    async fn get_fee(&self, pair: &str, side: TakerOrMaker) -> Result<Decimal>;

    async fn fetch_balances(&self) -> Result<HashMap<String, Balance>>;

    async fn fetch_ohlcv(&self, pair: &str, timeframe: &str, limit: usize) -> Result<Vec<Candle>>;

    async fn get_pair_base_currency(&self, pair: &str) -> Result<String> {
        Ok(self.market(pair).await?.base)
    }

    /// Whether a resting stop order should be replaced because the trade's
    /// stop moved above it.
    fn stoploss_adjust(&self, stop_loss: Decimal, order: &Order) -> bool {
        order.stop_price.map(|sp| stop_loss > sp).unwrap_or(false)
    }
}

/// Lookup helper for exchanges keeping markets in a map.
pub(crate) fn find_market(markets: &HashMap<String, Market>, pair: &str) -> Result<Market> {
    markets
        .get(pair)
        .cloned()
        .ok_or_else(|| BotError::Dependency(format!("Market {} not available", pair)))
}
