//! Bot configuration.
//!
//! Every field has a default so a bare environment is a valid setup. Values
//! are layered with the `config` crate:
//! 1. Environment variables (prefixed with SPOTBOT__, nested with `__`)
//! 2. Configuration file (TOML format)
//! 3. Default values

use std::collections::BTreeMap;
use std::path::Path;

use config::{Config, Environment, File};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

use crate::error::{BotError, Result};
use crate::models::{OrderType, TimeInForce, MAX_PRICE_PRECISION};

/// Stake per trade: a fixed quote amount or an even split of what is available.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "StakeAmountRaw", into = "StakeAmountRaw")]
pub enum StakeAmount {
    Fixed(Decimal),
    Unlimited,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
enum StakeAmountRaw {
    Amount(Decimal),
    Text(String),
}

impl TryFrom<StakeAmountRaw> for StakeAmount {
    type Error = String;

    fn try_from(raw: StakeAmountRaw) -> std::result::Result<Self, Self::Error> {
        match raw {
            StakeAmountRaw::Amount(amount) => Ok(StakeAmount::Fixed(amount)),
            StakeAmountRaw::Text(text) if text.eq_ignore_ascii_case("unlimited") => {
                Ok(StakeAmount::Unlimited)
            }
            StakeAmountRaw::Text(text) => text
                .parse::<Decimal>()
                .map(StakeAmount::Fixed)
                .map_err(|_| format!("invalid stake_amount '{}'", text)),
        }
    }
}

impl From<StakeAmount> for StakeAmountRaw {
    fn from(stake: StakeAmount) -> Self {
        match stake {
            StakeAmount::Fixed(amount) => StakeAmountRaw::Amount(amount),
            StakeAmount::Unlimited => StakeAmountRaw::Text("unlimited".to_string()),
        }
    }
}

/// Minutes an unfilled order may stay open before it is cancelled.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct UnfilledTimeout {
    pub buy: Option<i64>,
    pub sell: Option<i64>,
}

/// Depth-of-market filter applied before entering.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DepthOfMarket {
    pub enabled: bool,

    /// Minimum ratio of summed bid size to summed ask size
    pub bids_to_ask_delta: Decimal,
}

impl Default for DepthOfMarket {
    fn default() -> Self {
        Self {
            enabled: false,
            bids_to_ask_delta: dec!(0),
        }
    }
}

/// How the entry price is chosen.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BidStrategy {
    pub use_order_book: bool,

    /// 1-based bid level to buy at when using the order book
    pub order_book_top: usize,

    /// Weight of the last price when the ask is above it (0 = ask, 1 = last)
    pub ask_last_balance: Decimal,

    pub check_depth_of_market: DepthOfMarket,
}

impl Default for BidStrategy {
    fn default() -> Self {
        Self {
            use_order_book: false,
            order_book_top: 1,
            ask_last_balance: dec!(0),
            check_depth_of_market: DepthOfMarket::default(),
        }
    }
}

/// How exit prices are chosen and which exit rules apply.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AskStrategy {
    pub use_order_book: bool,
    pub order_book_min: usize,
    pub order_book_max: usize,
    pub use_sell_signal: bool,
    pub sell_profit_only: bool,
    pub ignore_roi_if_buy_signal: bool,
}

impl Default for AskStrategy {
    fn default() -> Self {
        Self {
            use_order_book: false,
            order_book_min: 1,
            order_book_max: 1,
            use_sell_signal: true,
            sell_profit_only: false,
            ignore_roi_if_buy_signal: false,
        }
    }
}

/// Order types used per action.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OrderTypes {
    pub buy: OrderType,
    pub sell: OrderType,
    pub emergency_sell: OrderType,
    pub stoploss: OrderType,

    /// Keep a stop order resting on the exchange for every open trade
    pub stoploss_on_exchange: bool,

    /// Minimum seconds between trailing stop re-arms
    pub stoploss_on_exchange_interval: i64,
}

impl Default for OrderTypes {
    fn default() -> Self {
        Self {
            buy: OrderType::Limit,
            sell: OrderType::Limit,
            emergency_sell: OrderType::Market,
            stoploss: OrderType::Market,
            stoploss_on_exchange: false,
            stoploss_on_exchange_interval: 60,
        }
    }
}

/// Time in force per side.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct OrderTimeInForce {
    pub buy: TimeInForce,
    pub sell: TimeInForce,
}

/// Strategy parameters: exit rules and the reference signal settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StrategySettings {
    pub name: String,

    /// Stoploss as a negative fraction of the entry price (e.g. -0.10)
    pub stoploss: Decimal,

    /// Minutes since open -> minimum profit ratio that triggers an ROI exit
    pub minimal_roi: BTreeMap<String, Decimal>,

    pub trailing_stop: bool,
    pub trailing_stop_positive: Option<Decimal>,
    pub trailing_stop_positive_offset: Decimal,
    pub trailing_only_offset_is_reached: bool,

    pub order_types: OrderTypes,
    pub order_time_in_force: OrderTimeInForce,

    /// Candle counts for the moving averages of the reference strategy
    pub fast_period: usize,
    pub slow_period: usize,
}

impl Default for StrategySettings {
    fn default() -> Self {
        let mut minimal_roi = BTreeMap::new();
        minimal_roi.insert("0".to_string(), dec!(0.04));
        minimal_roi.insert("30".to_string(), dec!(0.02));
        minimal_roi.insert("60".to_string(), dec!(0.01));

        Self {
            name: "sma_cross".to_string(),
            stoploss: dec!(-0.10),
            minimal_roi,
            trailing_stop: false,
            trailing_stop_positive: None,
            trailing_stop_positive_offset: dec!(0),
            trailing_only_offset_is_reached: false,
            order_types: OrderTypes::default(),
            order_time_in_force: OrderTimeInForce::default(),
            fast_period: 5,
            slow_period: 20,
        }
    }
}

/// Fixed-risk position sizing (the "edge" risk model).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EdgeConfig {
    pub enabled: bool,

    /// Share of the balance the risk model may allocate (0.0 to 1.0)
    pub capital_available_percentage: Decimal,

    /// Share of allocatable capital risked per trade (0.0 to 1.0)
    pub allowed_risk: Decimal,

    /// Stoploss used for every pair while the risk model is active
    pub stoploss: Decimal,
}

impl Default for EdgeConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            capital_available_percentage: dec!(0.5),  // Half the balance
            allowed_risk: dec!(0.01),                 // 1% risk per trade
            stoploss: dec!(-0.05),
        }
    }
}

/// In-memory exchange used for dry runs.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PaperSettings {
    /// Starting balance in stake currency
    pub starting_balance: Decimal,

    /// Fee rate charged on every fill
    pub fee: Decimal,

    pub price_precision: u32,

    /// Minimum order cost declared for every market
    pub min_cost: Option<Decimal>,
}

impl Default for PaperSettings {
    fn default() -> Self {
        Self {
            starting_balance: dec!(1000),
            fee: dec!(0.001),  // 0.1%
            price_precision: 8,
            min_cost: Some(dec!(10)),
        }
    }
}

/// Top-level bot configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BotConfig {
    /// Simulate orders against the paper exchange
    pub dry_run: bool,

    pub stake_currency: String,
    pub stake_amount: StakeAmount,

    /// Share of the total balance the bot may tie up (0.0 to 1.0)
    pub tradable_balance_ratio: Decimal,

    /// Shrink the last stake to what is left instead of skipping it
    pub amend_last_stake_amount: bool,

    /// Smallest fraction of the stake still worth trading when amending
    pub last_stake_amount_min_ratio: Decimal,

    /// Safety margin on top of the exchange minimum order size
    pub amount_reserve_percent: Decimal,

    pub max_open_trades: usize,
    pub timeframe: String,
    pub fiat_display_currency: Option<String>,

    /// Minimum seconds per processing cycle
    pub process_throttle_secs: u64,

    pub unfilled_timeout: UnfilledTimeout,
    pub bid_strategy: BidStrategy,
    pub ask_strategy: AskStrategy,
    pub strategy: StrategySettings,
    pub edge: EdgeConfig,

    /// Static pair whitelist
    pub pairs: Vec<String>,

    pub database_url: String,
    pub paper: PaperSettings,
}

impl Default for BotConfig {
    fn default() -> Self {
        Self {
            dry_run: true,
            stake_currency: "USDT".to_string(),
            stake_amount: StakeAmount::Fixed(dec!(100)),
            tradable_balance_ratio: dec!(0.99),
            amend_last_stake_amount: false,
            last_stake_amount_min_ratio: dec!(0.5),
            amount_reserve_percent: dec!(0.05),
            max_open_trades: 3,
            timeframe: "5m".to_string(),
            fiat_display_currency: None,
            process_throttle_secs: 5,
            unfilled_timeout: UnfilledTimeout {
                buy: Some(10),
                sell: Some(30),
            },
            bid_strategy: BidStrategy::default(),
            ask_strategy: AskStrategy::default(),
            strategy: StrategySettings::default(),
            edge: EdgeConfig::default(),
            pairs: vec!["BTC/USDT".to_string(), "ETH/USDT".to_string()],
            database_url: "sqlite:spotbot.db?mode=rwc".to_string(),
            paper: PaperSettings::default(),
        }
    }
}

impl BotConfig {
    /// Load configuration from an optional TOML file and SPOTBOT__ variables.
    pub fn load(config_path: Option<&str>) -> Result<Self> {
        let mut builder = Config::builder();

        if let Some(path) = config_path {
            if Path::new(path).exists() {
                builder = builder.add_source(File::with_name(path).required(false));
            }
        }

        builder = builder.add_source(
            Environment::with_prefix("SPOTBOT")
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true)
                .list_separator(",")
                .with_list_parse_key("pairs"),
        );

        let config: BotConfig = builder.build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings that cannot work together.
    pub fn validate(&self) -> Result<()> {
        if self.max_open_trades == 0 && self.stake_amount == StakeAmount::Unlimited {
            return Err(BotError::Config(
                "unlimited stake_amount requires max_open_trades > 0".to_string(),
            ));
        }
        if let StakeAmount::Fixed(amount) = self.stake_amount {
            if amount <= Decimal::ZERO {
                return Err(BotError::Config("stake_amount must be positive".to_string()));
            }
        }
        if self.tradable_balance_ratio <= Decimal::ZERO || self.tradable_balance_ratio > Decimal::ONE {
            return Err(BotError::Config(
                "tradable_balance_ratio must be in (0, 1]".to_string(),
            ));
        }
        if self.ask_strategy.use_order_book
            && (self.ask_strategy.order_book_min == 0
                || self.ask_strategy.order_book_min > self.ask_strategy.order_book_max)
        {
            return Err(BotError::Config(
                "ask_strategy order_book_min must be >= 1 and <= order_book_max".to_string(),
            ));
        }
        if self.bid_strategy.use_order_book && self.bid_strategy.order_book_top == 0 {
            return Err(BotError::Config("bid_strategy order_book_top must be >= 1".to_string()));
        }
        let offset = self.strategy.trailing_stop_positive_offset;
        if !offset.is_zero() {
            match self.strategy.trailing_stop_positive {
                None => {
                    return Err(BotError::Config(
                        "trailing_stop_positive_offset requires trailing_stop_positive".to_string(),
                    ))
                }
                Some(positive) if offset <= positive => {
                    return Err(BotError::Config(
                        "trailing_stop_positive_offset must be greater than trailing_stop_positive"
                            .to_string(),
                    ))
                }
                _ => {}
            }
        }
        if self.paper.price_precision > MAX_PRICE_PRECISION {
            return Err(BotError::Config(format!(
                "paper price_precision must be at most {}",
                MAX_PRICE_PRECISION
            )));
        }
        if self.strategy.stoploss >= Decimal::ZERO {
            return Err(BotError::Config("stoploss must be negative".to_string()));
        }
        Ok(())
    }

    /// Duration of one candle of the configured timeframe.
    pub fn timeframe_duration(&self) -> chrono::Duration {
        timeframe_to_duration(&self.timeframe)
    }
}

/// Parse a timeframe such as "1m", "5m", "1h" or "1d". Unknown units fall
/// back to minutes.
pub fn timeframe_to_duration(timeframe: &str) -> chrono::Duration {
    let (digits, unit) = timeframe.split_at(timeframe.len().saturating_sub(1));
    let count: i64 = digits.parse().unwrap_or(1);
    match unit {
        "s" => chrono::Duration::seconds(count),
        "h" => chrono::Duration::hours(count),
        "d" => chrono::Duration::days(count),
        "w" => chrono::Duration::weeks(count),
        _ => chrono::Duration::minutes(count),
    }
}
