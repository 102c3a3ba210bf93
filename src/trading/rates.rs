//! Buy and sell rate resolution with short-lived per-pair caches.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use rust_decimal::Decimal;
use tracing::debug;

use super::TtlCache;
use crate::config::{AskStrategy, BidStrategy};
use crate::error::{BotError, Result};
use crate::exchange::Exchange;

/// Entries per side.
pub const RATE_CACHE_SIZE: usize = 100;

/// Seconds a cached rate stays valid.
pub const RATE_CACHE_TTL_SECS: u64 = 5;

/// Resolves entry and exit prices for pairs.
pub struct RateCache {
    exchange: Arc<dyn Exchange>,
    bid_strategy: BidStrategy,
    ask_strategy: AskStrategy,
    buy_rates: Mutex<TtlCache<String, Decimal>>,
    sell_rates: Mutex<TtlCache<String, Decimal>>,
}

impl RateCache {
    pub fn new(exchange: Arc<dyn Exchange>, bid_strategy: BidStrategy, ask_strategy: AskStrategy) -> Self {
        let ttl = Duration::from_secs(RATE_CACHE_TTL_SECS);
        Self {
            exchange,
            bid_strategy,
            ask_strategy,
            buy_rates: Mutex::new(TtlCache::new(RATE_CACHE_SIZE, ttl)),
            sell_rates: Mutex::new(TtlCache::new(RATE_CACHE_SIZE, ttl)),
        }
    }

    /// Price to buy `pair` at.
    ///
    /// With `allow_cache`, a rate computed within the TTL is returned without
    /// touching the exchange. A fresh computation always overwrites the cache.
    pub async fn get_buy_rate(&self, pair: &str, allow_cache: bool) -> Result<Decimal> {
        if allow_cache {
            if let Some(rate) = cache_get(&self.buy_rates, pair)? {
                debug!(pair = %pair, rate = %rate, "Using cached buy rate");
                return Ok(rate);
            }
        }

        let rate = if self.bid_strategy.use_order_book {
            let top = self.bid_strategy.order_book_top.max(1);
            let book = self.exchange.get_order_book(pair, top).await?;
            book.bid_at(top).ok_or_else(|| {
                BotError::Temporary(format!("Order book for {} has no bid at level {}", pair, top))
            })?
        } else {
            let ticker = self.exchange.fetch_ticker(pair).await?;
            if ticker.ask < ticker.last {
                ticker.ask
            } else {
                ticker.ask + self.bid_strategy.ask_last_balance * (ticker.last - ticker.ask)
            }
        };

        cache_put(&self.buy_rates, pair, rate)?;
        Ok(rate)
    }

    /// Price to sell `pair` at.
    pub async fn get_sell_rate(&self, pair: &str, allow_cache: bool) -> Result<Decimal> {
        if allow_cache {
            if let Some(rate) = cache_get(&self.sell_rates, pair)? {
                debug!(pair = %pair, rate = %rate, "Using cached sell rate");
                return Ok(rate);
            }
        }

        let rate = if self.ask_strategy.use_order_book {
            let book = self.exchange.get_order_book(pair, 1).await?;
            book.ask_at(1)
                .ok_or_else(|| BotError::Temporary(format!("Order book for {} has no asks", pair)))?
        } else {
            self.exchange.fetch_ticker(pair).await?.ask
        };

        cache_put(&self.sell_rates, pair, rate)?;
        Ok(rate)
    }
}

fn cache_get(cache: &Mutex<TtlCache<String, Decimal>>, pair: &str) -> Result<Option<Decimal>> {
    let mut cache = cache
        .lock()
        .map_err(|_| BotError::Internal("rate cache poisoned".to_string()))?;
    Ok(cache.get(&pair.to_string()))
}

fn cache_put(cache: &Mutex<TtlCache<String, Decimal>>, pair: &str, rate: Decimal) -> Result<()> {
    let mut cache = cache
        .lock()
        .map_err(|_| BotError::Internal("rate cache poisoned".to_string()))?;
    cache.insert(pair.to_string(), rate);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exchange::PaperExchange;
    use crate::models::Market;
    use rust_decimal_macros::dec;

    fn setup() -> (Arc<PaperExchange>, RateCache) {
        let exchange = Arc::new(PaperExchange::new("BTC", dec!(1), dec!(0.001)));
        exchange.add_market(Market::new("ETH/BTC")).unwrap();
        exchange.set_ticker("ETH/BTC", dec!(0.0099), dec!(0.0101), dec!(0.01)).unwrap();
        let rates = RateCache::new(exchange.clone(), BidStrategy::default(), AskStrategy::default());
        (exchange, rates)
    }

    #[tokio::test]
    async fn test_buy_rate_blends_ask_and_last() {
        let (_exchange, mut rates) = setup();
        rates.bid_strategy.ask_last_balance = dec!(0.5);
        // ask above last: ask + 0.5 * (last - ask)
        assert_eq!(rates.get_buy_rate("ETH/BTC", false).await.unwrap(), dec!(0.01005));
    }

    #[tokio::test]
    async fn test_cached_rate_within_ttl() {
        let (exchange, rates) = setup();
        let first = rates.get_sell_rate("ETH/BTC", true).await.unwrap();
        assert_eq!(first, dec!(0.0101));

        exchange.set_ticker("ETH/BTC", dec!(0.02), dec!(0.03), dec!(0.025)).unwrap();
        assert_eq!(rates.get_sell_rate("ETH/BTC", true).await.unwrap(), first);
        assert_eq!(rates.get_sell_rate("ETH/BTC", false).await.unwrap(), dec!(0.03));
        // fresh computation replaced the cached value
        assert_eq!(rates.get_sell_rate("ETH/BTC", true).await.unwrap(), dec!(0.03));
    }
}
