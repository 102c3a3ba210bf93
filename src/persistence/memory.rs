//! In-memory trade repository for dry runs and tests.

use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use rust_decimal::Decimal;

use super::TradeRepository;
use crate::error::{BotError, Result};
use crate::models::Trade;

#[derive(Default)]
struct Store {
    next_id: i64,
    trades: BTreeMap<i64, Trade>,
    flushes: usize,
}

/// Repository keeping every trade in a map keyed by id.
#[derive(Default)]
pub struct InMemoryTradeRepository {
    store: Mutex<Store>,
}

impl InMemoryTradeRepository {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, Store>> {
        self.store
            .lock()
            .map_err(|_| BotError::Internal("trade store poisoned".to_string()))
    }

    /// Every trade ever stored, open or closed.
    pub fn all_trades(&self) -> Result<Vec<Trade>> {
        Ok(self.lock()?.trades.values().cloned().collect())
    }

    /// Number of commits seen.
    pub fn flush_count(&self) -> Result<usize> {
        Ok(self.lock()?.flushes)
    }
}

#[async_trait]
impl TradeRepository for InMemoryTradeRepository {
    async fn get_open_trades(&self) -> Result<Vec<Trade>> {
        Ok(self.lock()?.trades.values().filter(|t| t.is_open).cloned().collect())
    }

    async fn get_open_order_trades(&self) -> Result<Vec<Trade>> {
        Ok(self
            .lock()?
            .trades
            .values()
            .filter(|t| t.open_order_id.is_some())
            .cloned()
            .collect())
    }

    async fn get_trade(&self, trade_id: i64) -> Result<Option<Trade>> {
        Ok(self.lock()?.trades.get(&trade_id).cloned())
    }

    async fn total_open_trades_stakes(&self) -> Result<Decimal> {
        Ok(self
            .lock()?
            .trades
            .values()
            .filter(|t| t.is_open)
            .map(|t| t.stake_amount)
            .sum())
    }

    async fn add(&self, mut trade: Trade) -> Result<Trade> {
        let mut store = self.lock()?;
        store.next_id += 1;
        trade.id = store.next_id;
        store.trades.insert(trade.id, trade.clone());
        Ok(trade)
    }

    async fn update(&self, trade: &Trade) -> Result<()> {
        let mut store = self.lock()?;
        match store.trades.get_mut(&trade.id) {
            Some(stored) => {
                *stored = trade.clone();
                Ok(())
            }
            None => Err(BotError::Internal(format!("Trade {} not persisted", trade.id))),
        }
    }

    async fn delete(&self, trade_id: i64) -> Result<()> {
        self.lock()?.trades.remove(&trade_id);
        Ok(())
    }

    async fn flush(&self) -> Result<()> {
        self.lock()?.flushes += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn trade(stake: Decimal) -> Trade {
        Trade::new("paper", "ETH/USDT", stake, dec!(1), stake, dec!(0.001), None, "test", "5m")
    }

    #[tokio::test]
    async fn test_add_assigns_ids_and_sums_stakes() {
        let repo = InMemoryTradeRepository::new();
        let a = repo.add(trade(dec!(10))).await.unwrap();
        let b = repo.add(trade(dec!(15))).await.unwrap();
        assert_eq!(a.id, 1);
        assert_eq!(b.id, 2);
        assert_eq!(repo.total_open_trades_stakes().await.unwrap(), dec!(25));

        let mut closed = b.clone();
        closed.close(dec!(16));
        repo.update(&closed).await.unwrap();
        assert_eq!(repo.total_open_trades_stakes().await.unwrap(), dec!(10));
        assert_eq!(repo.get_open_trades().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_open_order_trades_and_delete() {
        let repo = InMemoryTradeRepository::new();
        let mut pending = trade(dec!(10));
        pending.open_order_id = Some("o1".to_string());
        let pending = repo.add(pending).await.unwrap();
        repo.add(trade(dec!(10))).await.unwrap();

        let with_orders = repo.get_open_order_trades().await.unwrap();
        assert_eq!(with_orders.len(), 1);
        assert_eq!(with_orders[0].id, pending.id);

        repo.delete(pending.id).await.unwrap();
        assert!(repo.get_trade(pending.id).await.unwrap().is_none());
    }

    #[test]
    fn test_update_unknown_trade_fails() {
        let repo = InMemoryTradeRepository::new();
        let err = tokio_test::block_on(repo.update(&trade(dec!(10)))).unwrap_err();
        assert!(matches!(err, BotError::Internal(_)));

        tokio_test::block_on(repo.flush()).unwrap();
        assert_eq!(repo.flush_count().unwrap(), 1);
    }
}
