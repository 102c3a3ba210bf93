//! Tradable pair universe.

use async_trait::async_trait;

use crate::error::Result;

/// Supplies the pairs the bot may enter.
#[async_trait]
pub trait PairListProvider: Send + Sync {
    /// Current whitelist, in priority order.
    async fn refresh_pairlist(&self) -> Result<Vec<String>>;
}

/// Fixed whitelist from configuration.
pub struct StaticPairList {
    pairs: Vec<String>,
}

impl StaticPairList {
    pub fn new(pairs: Vec<String>) -> Self {
        let mut unique = Vec::with_capacity(pairs.len());
        for pair in pairs {
            if !unique.contains(&pair) {
                unique.push(pair);
            }
        }
        Self { pairs: unique }
    }
}

#[async_trait]
impl PairListProvider for StaticPairList {
    async fn refresh_pairlist(&self) -> Result<Vec<String>> {
        Ok(self.pairs.clone())
    }
}
