//! Market metadata and market-data snapshots for spot pairs.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Order size limits declared by the exchange.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MarketLimits {
    /// Minimum order cost in quote currency
    #[serde(default)]
    pub cost_min: Option<Decimal>,

    /// Minimum order amount in base currency
    #[serde(default)]
    pub amount_min: Option<Decimal>,
}

/// Tradable spot market.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Market {
    /// Symbol, e.g. "ETH/BTC"
    pub symbol: String,

    /// Base currency (what a buy acquires)
    pub base: String,

    /// Quote currency (what the stake is paid in)
    pub quote: String,

    #[serde(default)]
    pub limits: MarketLimits,

    /// Number of decimals prices are quoted with
    #[serde(default = "default_price_precision")]
    pub price_precision: u32,

    #[serde(default = "default_true")]
    pub active: bool,
}

/// Most decimals a `Decimal` can carry.
pub const MAX_PRICE_PRECISION: u32 = 28;

fn default_price_precision() -> u32 {
    8
}

fn default_true() -> bool {
    true
}

impl Market {
    /// Create a market from a "BASE/QUOTE" symbol.
    pub fn new(symbol: &str) -> Self {
        let (base, quote) = split_pair(symbol);
        Self {
            symbol: symbol.to_string(),
            base,
            quote,
            limits: MarketLimits::default(),
            price_precision: default_price_precision(),
            active: true,
        }
    }

    pub fn with_limits(mut self, cost_min: Option<Decimal>, amount_min: Option<Decimal>) -> Self {
        self.limits = MarketLimits { cost_min, amount_min };
        self
    }

    pub fn with_precision(mut self, price_precision: u32) -> Self {
        self.price_precision = price_precision.min(MAX_PRICE_PRECISION);
        self
    }

    /// Price decimals, capped at what `Decimal` can represent.
    pub fn price_decimals(&self) -> u32 {
        self.price_precision.min(MAX_PRICE_PRECISION)
    }

    /// Smallest price increment.
    pub fn tick_size(&self) -> Decimal {
        Decimal::new(1, self.price_decimals())
    }
}

/// Split "BASE/QUOTE" into its currencies.
pub fn split_pair(pair: &str) -> (String, String) {
    match pair.split_once('/') {
        Some((base, quote)) => (base.to_string(), quote.to_string()),
        None => (pair.to_string(), String::new()),
    }
}

/// Best prices for a pair.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Ticker {
    pub pair: String,
    pub bid: Decimal,
    pub ask: Decimal,
    pub last: Decimal,
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
}

/// One price level of an order book.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BookLevel {
    pub price: Decimal,
    pub amount: Decimal,
}

/// Order book snapshot, best levels first.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OrderBook {
    pub bids: Vec<BookLevel>,
    pub asks: Vec<BookLevel>,
}

impl OrderBook {
    /// Bid price at a 1-based level.
    pub fn bid_at(&self, level: usize) -> Option<Decimal> {
        level.checked_sub(1).and_then(|i| self.bids.get(i)).map(|l| l.price)
    }

    /// Ask price at a 1-based level.
    pub fn ask_at(&self, level: usize) -> Option<Decimal> {
        level.checked_sub(1).and_then(|i| self.asks.get(i)).map(|l| l.price)
    }

    /// Total bid size divided by total ask size.
    pub fn bid_ask_ratio(&self) -> Option<Decimal> {
        let bids: Decimal = self.bids.iter().map(|l| l.amount).sum();
        let asks: Decimal = self.asks.iter().map(|l| l.amount).sum();
        if asks.is_zero() {
            return None;
        }
        Some(bids / asks)
    }
}

/// Wallet balance for one currency.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Balance {
    pub currency: String,
    pub free: Decimal,
    pub used: Decimal,
    pub total: Decimal,
}

/// OHLCV candle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Candle {
    pub timestamp: DateTime<Utc>,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    pub volume: Decimal,
}
