//! Candle cache feeding the strategy oracle.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::join_all;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::error::Result;
use crate::exchange::Exchange;
use crate::models::Candle;

/// Candles kept per pair/timeframe.
pub const DEFAULT_CANDLE_LIMIT: usize = 200;

/// Source of market data for strategies.
#[async_trait]
pub trait DataProvider: Send + Sync {
    /// Reload candles for every (pair, timeframe) in `pairs`.
    async fn refresh(&self, pairs: &[(String, String)]) -> Result<()>;

    /// Latest candles for a pair, oldest first. Empty if never refreshed.
    async fn ohlcv(&self, pair: &str, timeframe: &str) -> Vec<Candle>;
}

/// Data provider pulling candles from the exchange.
pub struct ExchangeDataProvider {
    exchange: Arc<dyn Exchange>,
    limit: usize,
    candles: RwLock<HashMap<(String, String), Vec<Candle>>>,
}

impl ExchangeDataProvider {
    pub fn new(exchange: Arc<dyn Exchange>) -> Self {
        Self::with_limit(exchange, DEFAULT_CANDLE_LIMIT)
    }

    pub fn with_limit(exchange: Arc<dyn Exchange>, limit: usize) -> Self {
        Self {
            exchange,
            limit,
            candles: RwLock::new(HashMap::new()),
        }
    }
}

#[async_trait]
impl DataProvider for ExchangeDataProvider {
    async fn refresh(&self, pairs: &[(String, String)]) -> Result<()> {
        let fetches = pairs.iter().map(|(pair, timeframe)| async move {
            let result = self.exchange.fetch_ohlcv(pair, timeframe, self.limit).await;
            (pair.clone(), timeframe.clone(), result)
        });

        let results = join_all(fetches).await;

        let mut candles = self.candles.write().await;
        for (pair, timeframe, result) in results {
            match result {
                Ok(data) => {
                    debug!(pair = %pair, timeframe = %timeframe, candles = data.len(), "Candles refreshed");
                    candles.insert((pair, timeframe), data);
                }
                // Keep the stale copy; the next cycle retries.
                Err(e) => warn!(pair = %pair, error = %e, "Failed to refresh candles"),
            }
        }

        Ok(())
    }

    async fn ohlcv(&self, pair: &str, timeframe: &str) -> Vec<Candle> {
        self.candles
            .read()
            .await
            .get(&(pair.to_string(), timeframe.to_string()))
            .cloned()
            .unwrap_or_default()
    }
}
