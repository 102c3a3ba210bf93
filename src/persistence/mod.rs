//! Trade persistence.
//!
//! The repository is the source of truth between cycles. Within a cycle the
//! lifecycle controller loads trades, mutates them in place and writes them
//! back with `update` before calling `flush`.

mod memory;
mod sqlite;

pub use memory::InMemoryTradeRepository;
pub use sqlite::SqliteTradeRepository;

use async_trait::async_trait;
use rust_decimal::Decimal;

use crate::error::Result;
use crate::models::Trade;

/// Transactional store of trades.
#[async_trait]
pub trait TradeRepository: Send + Sync {
    /// All trades with `is_open` set.
    async fn get_open_trades(&self) -> Result<Vec<Trade>>;

    /// All trades with an order in flight.
    async fn get_open_order_trades(&self) -> Result<Vec<Trade>>;

    async fn get_trade(&self, trade_id: i64) -> Result<Option<Trade>>;

    /// Sum of stake currently tied up in open trades.
    async fn total_open_trades_stakes(&self) -> Result<Decimal>;

    /// Persist a new trade, returning it with its assigned id.
    async fn add(&self, trade: Trade) -> Result<Trade>;

    /// Persist in-place changes to an existing trade.
    async fn update(&self, trade: &Trade) -> Result<()>;

    async fn delete(&self, trade_id: i64) -> Result<()>;

    /// Commit point at the end of a unit of work.
    async fn flush(&self) -> Result<()> {
        Ok(())
    }
}
