//! Bot runner: the per-tick cycle driver.
//!
//! Each tick:
//! 1. Reloads exchange markets
//! 2. Refreshes the pair whitelist, keeping pairs with open trades
//! 3. Refreshes candles for the whitelist
//! 4. Evaluates open trades for exit (under the exit lock)
//! 5. Looks for entries on the shuffled whitelist if slots remain
//! 6. Handles timed out orders and commits

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use rand::seq::SliceRandom;
use rust_decimal::Decimal;
use tokio::time::interval;
use tracing::{debug, error, info, warn};

use crate::config::StakeAmount;
use crate::error::Result;
use crate::lifecycle::TradeLifecycle;
use crate::models::Trade;
use crate::pairlist::PairListProvider;

/// Main bot runner.
pub struct Bot {
    lifecycle: Arc<TradeLifecycle>,
    pairlist: Arc<dyn PairListProvider>,

    /// Whitelist of the last tick, open-trade pairs included
    active_whitelist: Vec<String>,

    // Shutdown signal
    shutdown: Arc<AtomicBool>,
}

impl Bot {
    pub fn new(lifecycle: Arc<TradeLifecycle>, pairlist: Arc<dyn PairListProvider>) -> Self {
        Self {
            lifecycle,
            pairlist,
            active_whitelist: Vec::new(),
            shutdown: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Handle for other tasks to control the bot.
    pub fn handle(&self) -> BotHandle {
        BotHandle {
            lifecycle: self.lifecycle.clone(),
            shutdown: self.shutdown.clone(),
        }
    }

    /// Get shutdown signal for external control.
    pub fn shutdown_signal(&self) -> Arc<AtomicBool> {
        self.shutdown.clone()
    }

    pub fn lifecycle(&self) -> &Arc<TradeLifecycle> {
        &self.lifecycle
    }

    pub fn active_whitelist(&self) -> &[String] {
        &self.active_whitelist
    }

    /// Re-base stops of carried-over trades and announce the running
    /// configuration.
    pub async fn startup(&self) -> Result<()> {
        self.lifecycle.reinitialize_stoploss().await?;

        let config = self.lifecycle.config();
        let whitelist = self.pairlist.refresh_pairlist().await?;
        let stake = match config.stake_amount {
            StakeAmount::Fixed(amount) => format!("{} {}", amount, config.stake_currency),
            StakeAmount::Unlimited => format!("unlimited {}", config.stake_currency),
        };

        self.lifecycle.notify_status(format!(
            "Dry run is {}\nStake per trade: {}\nMax open trades: {}\nTimeframe: {}\nStrategy: {}\nWhitelist: {}",
            if config.dry_run { "enabled" } else { "disabled" },
            stake,
            config.max_open_trades,
            config.timeframe,
            self.lifecycle.strategy().name(),
            whitelist.join(", ")
        ));
        Ok(())
    }

    /// Main run loop.
    pub async fn run(&mut self) -> Result<()> {
        let throttle = self.lifecycle.config().process_throttle_secs.max(1);
        info!(
            dry_run = self.lifecycle.config().dry_run,
            throttle_secs = throttle,
            "Starting bot run loop"
        );

        self.startup().await?;

        let mut ticker = interval(Duration::from_secs(throttle));

        // Register shutdown handler
        let shutdown = self.shutdown.clone();
        tokio::spawn(async move {
            tokio::signal::ctrl_c().await.ok();
            info!("Shutdown signal received");
            shutdown.store(true, Ordering::SeqCst);
        });

        while !self.shutdown.load(Ordering::SeqCst) {
            ticker.tick().await;
            if self.shutdown.load(Ordering::SeqCst) {
                break;
            }

            match self.process().await {
                Ok(()) => {}
                Err(e) if e.is_temporary() => {
                    warn!(error = %e, "Temporary error in bot cycle, retrying next tick");
                }
                Err(e) => {
                    error!(error = %e, "Fatal error in bot cycle");
                    self.lifecycle
                        .notify_status(format!("Bot stopped after an unexpected error: {}", e));
                    return Err(e);
                }
            }
        }

        self.shutdown().await
    }

    /// Single iteration of the main loop.
    pub async fn process(&mut self) -> Result<()> {
        debug!("Bot tick");
        let lifecycle = self.lifecycle.clone();

        // 1. Markets may have changed on the exchange
        lifecycle.exchange().reload_markets().await?;

        // 2. Trades from the previous cycle
        let trades = lifecycle.repository().get_open_trades().await?;

        // 3. Whitelist, open-trade pairs included
        self.active_whitelist = self.refresh_whitelist(&trades).await?;

        // 4. Candles
        let timeframe = lifecycle.strategy().timeframe().to_string();
        let mut pairs: Vec<(String, String)> = self
            .active_whitelist
            .iter()
            .map(|pair| (pair.clone(), timeframe.clone()))
            .collect();
        pairs.extend(lifecycle.strategy().informative_pairs());
        lifecycle.data().refresh(&pairs).await?;

        // 5. Exits, re-read under the exit lock
        lifecycle.exit_positions().await?;

        // 6. Entries
        if lifecycle.free_slots().await? > 0 {
            let mut candidates = self.active_whitelist.clone();
            candidates.shuffle(&mut rand::thread_rng());
            lifecycle.enter_positions(&candidates).await?;
        }

        // 7. Timed out orders
        lifecycle.check_handle_timedout().await?;

        // 8. Commit
        lifecycle.repository().flush().await?;

        Ok(())
    }

    /// Current pairlist, adjusted by the risk model, plus every pair that
    /// still has an open trade.
    pub async fn refresh_whitelist(&self, trades: &[Trade]) -> Result<Vec<String>> {
        let mut whitelist = self.pairlist.refresh_pairlist().await?;

        if let Some(model) = self.lifecycle.risk_model() {
            model.calculate()?;
            whitelist = model.adjust(whitelist);
        }

        for trade in trades {
            if !whitelist.contains(&trade.pair) {
                info!(pair = %trade.pair, "Adding pair back to whitelist, because there's an open trade");
                whitelist.push(trade.pair.clone());
            }
        }

        Ok(whitelist)
    }

    /// Graceful shutdown.
    async fn shutdown(&self) -> Result<()> {
        info!("Shutting down bot...");

        self.lifecycle.repository().flush().await?;
        self.lifecycle.notify_status("Bot stopped");

        info!("Bot shutdown complete");
        Ok(())
    }
}

/// Cloneable control handle for tasks outside the run loop.
#[derive(Clone)]
pub struct BotHandle {
    lifecycle: Arc<TradeLifecycle>,
    shutdown: Arc<AtomicBool>,
}

impl BotHandle {
    /// Sell (or cancel the entry of) one trade. Never overlaps the cycle's
    /// exit evaluation.
    pub async fn force_exit(&self, trade_id: i64) -> Result<()> {
        self.lifecycle.force_exit(trade_id).await
    }

    pub async fn force_exit_all(&self) -> Result<usize> {
        self.lifecycle.force_exit_all().await
    }

    pub async fn force_entry(&self, pair: &str, price: Option<Decimal>) -> Result<Option<Trade>> {
        self.lifecycle.force_entry(pair, price).await
    }

    pub async fn open_trades(&self) -> Result<Vec<Trade>> {
        self.lifecycle.repository().get_open_trades().await
    }

    /// Ask the run loop to stop after the current tick.
    pub fn stop(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
    }

    pub fn is_stopped(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }
}
