//! spotbot: trade-lifecycle engine of an automated spot trading bot.
//!
//! Decides when to open and close positions, places and reconciles orders
//! against an exchange, manages stoploss orders and keeps persisted trades
//! consistent with exchange-side order state.

pub mod bot;
pub mod config;
pub mod data;
pub mod error;
pub mod exchange;
pub mod lifecycle;
pub mod models;
pub mod notify;
pub mod pairlist;
pub mod persistence;
pub mod strategy;
pub mod trading;
pub mod wallets;

pub use error::{BotError, Result};
