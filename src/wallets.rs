//! Wallet snapshot shared by stake sizing, exits and the strategy context.
//!
//! The snapshot is only ever replaced wholesale by `update`, never patched.

use std::collections::HashMap;
use std::sync::Arc;

use rust_decimal::Decimal;
use tokio::sync::RwLock;
use tracing::debug;

use crate::error::Result;
use crate::exchange::Exchange;
use crate::models::Balance;

/// Cached exchange balances.
pub struct Wallets {
    exchange: Arc<dyn Exchange>,
    balances: RwLock<HashMap<String, Balance>>,
}

impl Wallets {
    pub fn new(exchange: Arc<dyn Exchange>) -> Self {
        Self {
            exchange,
            balances: RwLock::new(HashMap::new()),
        }
    }

    /// Re-fetch all balances from the exchange.
    pub async fn update(&self) -> Result<()> {
        let fresh = self.exchange.fetch_balances().await?;
        debug!(currencies = fresh.len(), "Wallets refreshed");
        *self.balances.write().await = fresh;
        Ok(())
    }

    pub async fn get_free(&self, currency: &str) -> Decimal {
        self.balances
            .read()
            .await
            .get(currency)
            .map(|b| b.free)
            .unwrap_or(Decimal::ZERO)
    }

    pub async fn get_total(&self, currency: &str) -> Decimal {
        self.balances
            .read()
            .await
            .get(currency)
            .map(|b| b.total)
            .unwrap_or(Decimal::ZERO)
    }

    /// Copy of the whole snapshot.
    pub async fn snapshot(&self) -> HashMap<String, Balance> {
        self.balances.read().await.clone()
    }
}
