//! SQLite trade repository.
//!
//! Decimals are stored as TEXT so that no precision is lost on the way
//! through SQLite's REAL type.

use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::{sqlite::SqlitePoolOptions, SqlitePool};
use tracing::debug;

use super::TradeRepository;
use crate::error::{BotError, Result};
use crate::models::{SellReason, Trade};

/// Trade row as stored in SQLite.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct StoredTrade {
    pub id: i64,
    pub exchange: String,
    pub pair: String,
    pub is_open: bool,
    pub fee_open: String,
    pub fee_close: String,
    pub open_rate: String,
    pub open_rate_requested: Option<String>,
    pub open_trade_price: String,
    pub close_rate: Option<String>,
    pub close_rate_requested: Option<String>,
    pub close_profit: Option<String>,
    pub stake_amount: String,
    pub amount: String,
    pub open_date: DateTime<Utc>,
    pub close_date: Option<DateTime<Utc>>,
    pub open_order_id: Option<String>,
    pub stop_loss: String,
    pub stop_loss_pct: Option<String>,
    pub initial_stop_loss: String,
    pub initial_stop_loss_pct: Option<String>,
    pub stoploss_order_id: Option<String>,
    pub stoploss_last_update: Option<DateTime<Utc>>,
    pub max_rate: String,
    pub min_rate: Option<String>,
    pub sell_reason: Option<String>,
    pub strategy: String,
    pub timeframe: String,
}

fn dec(field: &str, value: &str) -> Result<Decimal> {
    Decimal::from_str(value)
        .map_err(|e| BotError::Internal(format!("Corrupt decimal in column {}: {}", field, e)))
}

fn opt_dec(field: &str, value: Option<&String>) -> Result<Option<Decimal>> {
    value.map(|v| dec(field, v)).transpose()
}

impl TryFrom<StoredTrade> for Trade {
    type Error = BotError;

    fn try_from(row: StoredTrade) -> Result<Self> {
        Ok(Trade {
            id: row.id,
            is_open: row.is_open,
            fee_open: dec("fee_open", &row.fee_open)?,
            fee_close: dec("fee_close", &row.fee_close)?,
            open_rate: dec("open_rate", &row.open_rate)?,
            open_rate_requested: opt_dec("open_rate_requested", row.open_rate_requested.as_ref())?,
            open_trade_price: dec("open_trade_price", &row.open_trade_price)?,
            close_rate: opt_dec("close_rate", row.close_rate.as_ref())?,
            close_rate_requested: opt_dec("close_rate_requested", row.close_rate_requested.as_ref())?,
            close_profit: opt_dec("close_profit", row.close_profit.as_ref())?,
            stake_amount: dec("stake_amount", &row.stake_amount)?,
            amount: dec("amount", &row.amount)?,
            open_date: row.open_date,
            close_date: row.close_date,
            stop_loss: dec("stop_loss", &row.stop_loss)?,
            stop_loss_pct: opt_dec("stop_loss_pct", row.stop_loss_pct.as_ref())?,
            initial_stop_loss: dec("initial_stop_loss", &row.initial_stop_loss)?,
            initial_stop_loss_pct: opt_dec("initial_stop_loss_pct", row.initial_stop_loss_pct.as_ref())?,
            stoploss_last_update: row.stoploss_last_update,
            max_rate: dec("max_rate", &row.max_rate)?,
            min_rate: opt_dec("min_rate", row.min_rate.as_ref())?,
            sell_reason: row.sell_reason.as_deref().and_then(SellReason::parse),
            exchange: row.exchange,
            pair: row.pair,
            open_order_id: row.open_order_id,
            stoploss_order_id: row.stoploss_order_id,
            strategy: row.strategy,
            timeframe: row.timeframe,
        })
    }
}

/// Repository backed by a SQLite pool.
pub struct SqliteTradeRepository {
    pool: SqlitePool,
}

impl SqliteTradeRepository {
    /// Connect and run migrations.
    pub async fn connect(database_url: &str) -> Result<Self> {
        let max_connections = if database_url.contains(":memory:") { 1 } else { 5 };
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await?;

        let repo = Self { pool };
        repo.run_migrations().await?;

        Ok(repo)
    }

    async fn run_migrations(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS trades (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                exchange TEXT NOT NULL,
                pair TEXT NOT NULL,
                is_open INTEGER NOT NULL DEFAULT 1,
                fee_open TEXT NOT NULL,
                fee_close TEXT NOT NULL,
                open_rate TEXT NOT NULL,
                open_rate_requested TEXT,
                open_trade_price TEXT NOT NULL,
                close_rate TEXT,
                close_rate_requested TEXT,
                close_profit TEXT,
                stake_amount TEXT NOT NULL,
                amount TEXT NOT NULL,
                open_date TEXT NOT NULL,
                close_date TEXT,
                open_order_id TEXT,
                stop_loss TEXT NOT NULL DEFAULT '0',
                stop_loss_pct TEXT,
                initial_stop_loss TEXT NOT NULL DEFAULT '0',
                initial_stop_loss_pct TEXT,
                stoploss_order_id TEXT,
                stoploss_last_update TEXT,
                max_rate TEXT NOT NULL DEFAULT '0',
                min_rate TEXT,
                sell_reason TEXT,
                strategy TEXT NOT NULL,
                timeframe TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_trades_is_open ON trades(is_open)")
            .execute(&self.pool)
            .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_trades_pair ON trades(pair)")
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    async fn fetch(&self, sql: &str) -> Result<Vec<Trade>> {
        let rows = sqlx::query_as::<_, StoredTrade>(sql).fetch_all(&self.pool).await?;
        rows.into_iter().map(Trade::try_from).collect()
    }
}

fn opt_str(value: Option<Decimal>) -> Option<String> {
    value.map(|v| v.to_string())
}

#[async_trait]
impl TradeRepository for SqliteTradeRepository {
    async fn get_open_trades(&self) -> Result<Vec<Trade>> {
        self.fetch("SELECT * FROM trades WHERE is_open = 1 ORDER BY id").await
    }

    async fn get_open_order_trades(&self) -> Result<Vec<Trade>> {
        self.fetch("SELECT * FROM trades WHERE open_order_id IS NOT NULL ORDER BY id")
            .await
    }

    async fn get_trade(&self, trade_id: i64) -> Result<Option<Trade>> {
        let row = sqlx::query_as::<_, StoredTrade>("SELECT * FROM trades WHERE id = ?")
            .bind(trade_id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(Trade::try_from).transpose()
    }

    async fn total_open_trades_stakes(&self) -> Result<Decimal> {
        let stakes: Vec<(String,)> = sqlx::query_as("SELECT stake_amount FROM trades WHERE is_open = 1")
            .fetch_all(&self.pool)
            .await?;

        stakes
            .iter()
            .map(|(s,)| dec("stake_amount", s))
            .sum::<Result<Decimal>>()
    }

    async fn add(&self, mut trade: Trade) -> Result<Trade> {
        let result = sqlx::query(
            r#"
            INSERT INTO trades (
                exchange, pair, is_open, fee_open, fee_close, open_rate, open_rate_requested,
                open_trade_price, close_rate, close_rate_requested, close_profit, stake_amount,
                amount, open_date, close_date, open_order_id, stop_loss, stop_loss_pct,
                initial_stop_loss, initial_stop_loss_pct, stoploss_order_id, stoploss_last_update,
                max_rate, min_rate, sell_reason, strategy, timeframe
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            RETURNING id
            "#,
        )
        .bind(&trade.exchange)
        .bind(&trade.pair)
        .bind(trade.is_open)
        .bind(trade.fee_open.to_string())
        .bind(trade.fee_close.to_string())
        .bind(trade.open_rate.to_string())
        .bind(opt_str(trade.open_rate_requested))
        .bind(trade.open_trade_price.to_string())
        .bind(opt_str(trade.close_rate))
        .bind(opt_str(trade.close_rate_requested))
        .bind(opt_str(trade.close_profit))
        .bind(trade.stake_amount.to_string())
        .bind(trade.amount.to_string())
        .bind(trade.open_date)
        .bind(trade.close_date)
        .bind(&trade.open_order_id)
        .bind(trade.stop_loss.to_string())
        .bind(opt_str(trade.stop_loss_pct))
        .bind(trade.initial_stop_loss.to_string())
        .bind(opt_str(trade.initial_stop_loss_pct))
        .bind(&trade.stoploss_order_id)
        .bind(trade.stoploss_last_update)
        .bind(trade.max_rate.to_string())
        .bind(opt_str(trade.min_rate))
        .bind(trade.sell_reason.map(|r| r.as_str()))
        .bind(&trade.strategy)
        .bind(&trade.timeframe)
        .fetch_one(&self.pool)
        .await?;

        trade.id = sqlx::Row::get(&result, "id");
        debug!(trade_id = trade.id, pair = %trade.pair, "Trade inserted");
        Ok(trade)
    }

    async fn update(&self, trade: &Trade) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE trades SET
                is_open = ?, fee_open = ?, fee_close = ?, open_rate = ?, open_rate_requested = ?,
                open_trade_price = ?, close_rate = ?, close_rate_requested = ?, close_profit = ?,
                stake_amount = ?, amount = ?, close_date = ?, open_order_id = ?, stop_loss = ?,
                stop_loss_pct = ?, initial_stop_loss = ?, initial_stop_loss_pct = ?,
                stoploss_order_id = ?, stoploss_last_update = ?, max_rate = ?, min_rate = ?,
                sell_reason = ?
            WHERE id = ?
            "#,
        )
        .bind(trade.is_open)
        .bind(trade.fee_open.to_string())
        .bind(trade.fee_close.to_string())
        .bind(trade.open_rate.to_string())
        .bind(opt_str(trade.open_rate_requested))
        .bind(trade.open_trade_price.to_string())
        .bind(opt_str(trade.close_rate))
        .bind(opt_str(trade.close_rate_requested))
        .bind(opt_str(trade.close_profit))
        .bind(trade.stake_amount.to_string())
        .bind(trade.amount.to_string())
        .bind(trade.close_date)
        .bind(&trade.open_order_id)
        .bind(trade.stop_loss.to_string())
        .bind(opt_str(trade.stop_loss_pct))
        .bind(trade.initial_stop_loss.to_string())
        .bind(opt_str(trade.initial_stop_loss_pct))
        .bind(&trade.stoploss_order_id)
        .bind(trade.stoploss_last_update)
        .bind(trade.max_rate.to_string())
        .bind(opt_str(trade.min_rate))
        .bind(trade.sell_reason.map(|r| r.as_str()))
        .bind(trade.id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn delete(&self, trade_id: i64) -> Result<()> {
        sqlx::query("DELETE FROM trades WHERE id = ?")
            .bind(trade_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
