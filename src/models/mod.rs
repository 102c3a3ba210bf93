//! Data models for trades, exchange orders, and market data.

mod market;
mod order;
mod trade;

pub use market::{
    split_pair, Balance, BookLevel, Candle, Market, MarketLimits, OrderBook, Ticker, MAX_PRICE_PRECISION,
};
pub use order::{Fill, Order, OrderFee, OrderRequest, OrderSide, OrderStatus, OrderType, TimeInForce};
pub use trade::{SellReason, Trade, TradeState};
