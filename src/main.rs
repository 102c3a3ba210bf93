//! spotbot command line.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

use spotbot::bot::Bot;
use spotbot::config::{BotConfig, StakeAmount};
use spotbot::data::ExchangeDataProvider;
use spotbot::exchange::PaperExchange;
use spotbot::lifecycle::TradeLifecycle;
use spotbot::models::Market;
use spotbot::notify::{spawn_log_sink, Notifier};
use spotbot::pairlist::StaticPairList;
use spotbot::persistence::{SqliteTradeRepository, TradeRepository};
use spotbot::strategy::SmaCrossStrategy;

/// Spot trading bot CLI.
#[derive(Parser)]
#[command(name = "spotbot")]
#[command(about = "Automated spot trading bot", long_about = None)]
struct Cli {
    /// Configuration file (TOML)
    #[arg(short, long, env = "SPOTBOT_CONFIG", default_value = "spotbot.toml")]
    config: String,

    /// Database URL, overrides the configuration
    #[arg(short, long)]
    database: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the bot
    Run {
        /// Simulate orders on the paper exchange
        #[arg(long)]
        dry_run: bool,
    },

    /// Show the effective configuration
    Config,

    /// Show open trades
    Status,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    // Setup logging
    let log_level = match cli.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let mut config = BotConfig::load(Some(&cli.config)).context("failed to load configuration")?;
    if let Some(database) = cli.database {
        config.database_url = database;
    }

    match cli.command {
        Commands::Run { dry_run } => run(config, dry_run).await?,

        Commands::Config => {
            let rendered = serde_json::to_string_pretty(&config)?;
            println!("{}", rendered);
        }

        Commands::Status => {
            let repository = SqliteTradeRepository::connect(&config.database_url).await?;
            let trades = repository.get_open_trades().await?;

            if trades.is_empty() {
                println!("No open trades.");
                return Ok(());
            }

            println!(
                "\n{:>4} {:<12} {:>16} {:>16} {:>14} {:<10}",
                "ID", "PAIR", "AMOUNT", "OPEN RATE", "STAKE", "ORDER"
            );
            println!("{}", "-".repeat(78));
            for trade in trades {
                println!(
                    "{:>4} {:<12} {:>16} {:>16} {:>14} {:<10}",
                    trade.id,
                    trade.pair,
                    trade.amount.round_dp(8),
                    trade.open_rate.round_dp(8),
                    trade.stake_amount.round_dp(4),
                    trade.open_order_id.as_deref().unwrap_or("-")
                );
            }
        }
    }

    Ok(())
}

async fn run(mut config: BotConfig, dry_run: bool) -> Result<()> {
    if dry_run {
        config.dry_run = true;
    }
    if !config.dry_run {
        warn!("No live exchange client configured. Running in dry-run mode.");
        config.dry_run = true;
    }

    let exchange = Arc::new(PaperExchange::new(
        &config.stake_currency,
        config.paper.starting_balance,
        config.paper.fee,
    ));
    for pair in &config.pairs {
        let market = Market::new(pair)
            .with_limits(config.paper.min_cost, None)
            .with_precision(config.paper.price_precision);
        exchange.add_market(market)?;
        exchange.set_price(pair, base_price(pair))?;
    }
    let feed = spawn_price_feed(exchange.clone(), config.pairs.clone(), config.paper.price_precision);

    let repository = Arc::new(SqliteTradeRepository::connect(&config.database_url).await?);
    let data = Arc::new(ExchangeDataProvider::new(exchange.clone()));
    let strategy = Arc::new(SmaCrossStrategy::new(
        &config.strategy,
        &config.ask_strategy,
        &config.timeframe,
        config.dry_run,
    ));
    let pairlist = Arc::new(StaticPairList::new(config.pairs.clone()));

    let (notifier, notifications) = Notifier::channel();
    let sink = spawn_log_sink(notifications);

    println!("\n=== spotbot ===");
    println!("Mode:            DRY RUN (paper exchange)");
    println!(
        "Stake:           {}",
        match config.stake_amount {
            StakeAmount::Fixed(amount) => format!("{} {}", amount, config.stake_currency),
            StakeAmount::Unlimited => format!("unlimited {}", config.stake_currency),
        }
    );
    println!("Max open trades: {}", config.max_open_trades);
    println!("Timeframe:       {}", config.timeframe);
    println!("Pairs:           {}", config.pairs.join(", "));
    println!("\nPress Ctrl+C to stop.\n");

    let lifecycle = Arc::new(TradeLifecycle::new(
        config, exchange, strategy, repository, data, notifier,
    ));
    let mut bot = Bot::new(lifecycle, pairlist);

    let result = bot.run().await;
    feed.abort();
    drop(bot);
    sink.await.ok();

    if let Err(e) = &result {
        tracing::error!(error = %e, "Bot error");
    }
    result.map_err(anyhow::Error::from)
}

/// Starting price for a simulated pair.
fn base_price(pair: &str) -> Decimal {
    match pair.split('/').next().unwrap_or(pair) {
        "BTC" => dec!(30000),
        "ETH" => dec!(2000),
        "BNB" => dec!(300),
        "SOL" => dec!(50),
        _ => dec!(10),
    }
}

/// Move every pair along a slow sine wave so the strategy sees crossings.
fn spawn_price_feed(
    exchange: Arc<PaperExchange>,
    pairs: Vec<String>,
    precision: u32,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_secs(1));
        let mut step: u64 = 0;
        loop {
            ticker.tick().await;
            step += 1;
            for (i, pair) in pairs.iter().enumerate() {
                let phase = step as f64 / 40.0 + i as f64;
                let factor = Decimal::from_f64(1.0 + 0.03 * phase.sin()).unwrap_or(Decimal::ONE);
                let price = (base_price(pair) * factor).round_dp(precision);
                if let Err(e) = exchange.set_price(pair, price) {
                    warn!(pair = %pair, error = %e, "Price feed update failed");
                }
            }
            if step % 60 == 0 {
                info!(step = step, "Price feed running");
            }
        }
    })
}
