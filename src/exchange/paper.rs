//! Paper exchange: in-memory order matching for dry runs.
//!
//! Prices are pushed in with `set_price`/`set_ticker`; resting orders are
//! matched against every update. Buy fees are charged in the base currency
//! and sell fees in the quote currency, like most spot venues do.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use tracing::{debug, info};
use uuid::Uuid;

use super::{find_market, Exchange, TakerOrMaker};
use crate::error::{BotError, Result};
use crate::models::{
    Balance, BookLevel, Candle, Fill, Market, Order, OrderBook, OrderFee, OrderRequest, OrderSide,
    OrderStatus, OrderType, Ticker,
};

/// Maximum candles kept per pair.
const MAX_CANDLES: usize = 500;

#[derive(Default)]
struct PaperState {
    markets: HashMap<String, Market>,
    tickers: HashMap<String, Ticker>,
    candles: HashMap<String, Vec<Candle>>,
    balances: HashMap<String, Balance>,
    orders: HashMap<String, Order>,
    fills: HashMap<String, Vec<Fill>>,
}

/// Simulated exchange.
pub struct PaperExchange {
    name: String,
    fee: Decimal,
    state: Mutex<PaperState>,
}

impl PaperExchange {
    /// Create a paper exchange holding `starting_balance` of `stake_currency`.
    pub fn new(stake_currency: &str, starting_balance: Decimal, fee: Decimal) -> Self {
        let mut state = PaperState::default();
        state.balances.insert(
            stake_currency.to_string(),
            Balance {
                currency: stake_currency.to_string(),
                free: starting_balance,
                used: Decimal::ZERO,
                total: starting_balance,
            },
        );

        Self {
            name: "paper".to_string(),
            fee,
            state: Mutex::new(state),
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, PaperState>> {
        self.state
            .lock()
            .map_err(|_| BotError::Internal("paper exchange state poisoned".to_string()))
    }

    /// Register a tradable market.
    pub fn add_market(&self, market: Market) -> Result<()> {
        let mut state = self.lock()?;
        state.markets.insert(market.symbol.clone(), market);
        Ok(())
    }

    /// Set bid, ask and last to the same price.
    pub fn set_price(&self, pair: &str, price: Decimal) -> Result<()> {
        self.set_ticker(pair, price, price, price)
    }

    /// Publish a new ticker and match resting orders against it.
    pub fn set_ticker(&self, pair: &str, bid: Decimal, ask: Decimal, last: Decimal) -> Result<()> {
        let now = Utc::now();
        let mut state = self.lock()?;

        state.tickers.insert(
            pair.to_string(),
            Ticker {
                pair: pair.to_string(),
                bid,
                ask,
                last,
                timestamp: now,
            },
        );

        let candles = state.candles.entry(pair.to_string()).or_default();
        candles.push(Candle {
            timestamp: now,
            open: last,
            high: last,
            low: last,
            close: last,
            volume: Decimal::ONE,
        });
        if candles.len() > MAX_CANDLES {
            let excess = candles.len() - MAX_CANDLES;
            candles.drain(..excess);
        }

        let resting: Vec<String> = state
            .orders
            .values()
            .filter(|o| o.pair == pair && o.is_open())
            .map(|o| o.id.clone())
            .collect();

        for order_id in resting {
            let Some(order) = state.orders.get(&order_id).cloned() else {
                continue;
            };
            if let Some(fill_price) = match_price(&order, bid, ask, last) {
                self.execute(&mut state, &order_id, fill_price, now)?;
            }
        }

        Ok(())
    }

    /// Snapshot of one balance.
    pub fn balance(&self, currency: &str) -> Result<Balance> {
        let state = self.lock()?;
        Ok(state.balances.get(currency).cloned().unwrap_or_else(|| Balance {
            currency: currency.to_string(),
            ..Default::default()
        }))
    }

    fn ticker(state: &PaperState, pair: &str) -> Result<Ticker> {
        state
            .tickers
            .get(pair)
            .cloned()
            .ok_or_else(|| BotError::Temporary(format!("No price for {} yet", pair)))
    }

    /// Fill an open order completely at `price`.
    fn execute(
        &self,
        state: &mut PaperState,
        order_id: &str,
        price: Decimal,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let Some(order) = state.orders.get(order_id).cloned() else {
            return Err(BotError::InvalidOrder(format!("Unknown order {}", order_id)));
        };
        let market = find_market(&state.markets, &order.pair)?;
        let amount = order.remaining;
        let cost = amount * price;

        let fee = match order.side {
            OrderSide::Buy => {
                let fee_cost = amount * self.fee;
                let reserved = order.amount * order.price;
                let quote = balance_entry(&mut state.balances, &market.quote);
                quote.used -= reserved.min(quote.used);
                quote.free += reserved - cost;
                quote.total = quote.free + quote.used;

                let base = balance_entry(&mut state.balances, &market.base);
                base.free += amount - fee_cost;
                base.total = base.free + base.used;

                OrderFee {
                    currency: market.base.clone(),
                    cost: fee_cost,
                }
            }
            OrderSide::Sell => {
                let fee_cost = cost * self.fee;
                let base = balance_entry(&mut state.balances, &market.base);
                base.used -= amount.min(base.used);
                base.total = base.free + base.used;

                let quote = balance_entry(&mut state.balances, &market.quote);
                quote.free += cost - fee_cost;
                quote.total = quote.free + quote.used;

                OrderFee {
                    currency: market.quote.clone(),
                    cost: fee_cost,
                }
            }
        };

        if let Some(order) = state.orders.get_mut(order_id) {
            order.status = OrderStatus::Closed;
            order.filled = order.amount;
            order.remaining = Decimal::ZERO;
            order.cost = cost;
            order.average = Some(price);
            order.fee = Some(fee.clone());
        }

        state.fills.entry(order_id.to_string()).or_default().push(Fill {
            order_id: order_id.to_string(),
            pair: order.pair.clone(),
            amount,
            price,
            fee: Some(fee),
            timestamp: now,
        });

        info!(
            order_id = %order_id,
            pair = %order.pair,
            side = order.side.as_str(),
            price = %price,
            amount = %amount,
            "[PAPER] Order filled"
        );

        Ok(())
    }
}

/// Price a resting order would execute at, given the current ticker.
fn match_price(order: &Order, bid: Decimal, ask: Decimal, last: Decimal) -> Option<Decimal> {
    match (order.order_type, order.side) {
        (OrderType::Market, OrderSide::Buy) => Some(ask),
        (OrderType::Market, OrderSide::Sell) => Some(bid),
        (OrderType::Limit, OrderSide::Buy) if ask <= order.price => Some(order.price.min(ask)),
        (OrderType::Limit, OrderSide::Sell) if bid >= order.price => Some(order.price.max(bid)),
        (OrderType::StopLossLimit, _) => match order.stop_price {
            Some(stop) if last <= stop => Some(order.price.min(bid)),
            _ => None,
        },
        _ => None,
    }
}

fn balance_entry<'a>(balances: &'a mut HashMap<String, Balance>, currency: &str) -> &'a mut Balance {
    balances.entry(currency.to_string()).or_insert_with(|| Balance {
        currency: currency.to_string(),
        ..Default::default()
    })
}

#[async_trait]
impl Exchange for PaperExchange {
    fn name(&self) -> &str {
        &self.name
    }

    async fn market(&self, pair: &str) -> Result<Market> {
        let state = self.lock()?;
        find_market(&state.markets, pair)
    }

    async fn fetch_ticker(&self, pair: &str) -> Result<Ticker> {
        let state = self.lock()?;
        Self::ticker(&state, pair)
    }

    async fn get_order_book(&self, pair: &str, depth: usize) -> Result<OrderBook> {
        let state = self.lock()?;
        let ticker = Self::ticker(&state, pair)?;
        let precision = find_market(&state.markets, pair)?.price_decimals();
        let step = (ticker.last * Decimal::new(1, 3)).round_dp(precision);

        let levels = depth.clamp(1, 50);
        let bids = (0..levels)
            .map(|i| BookLevel {
                price: ticker.bid - step * Decimal::from(i),
                amount: Decimal::ONE,
            })
            .collect();
        let asks = (0..levels)
            .map(|i| BookLevel {
                price: ticker.ask + step * Decimal::from(i),
                amount: Decimal::ONE,
            })
            .collect();

        Ok(OrderBook { bids, asks })
    }

    async fn place_order(&self, request: OrderRequest) -> Result<Order> {
        let now = Utc::now();
        let mut state = self.lock()?;
        let market = find_market(&state.markets, &request.pair)
            .map_err(|e| BotError::InvalidOrder(e.to_string()))?;
        let ticker = Self::ticker(&state, &request.pair)?;

        if request.amount <= Decimal::ZERO {
            return Err(BotError::InvalidOrder(format!(
                "Order amount must be positive, got {}",
                request.amount
            )));
        }

        // Market orders reserve at the current price.
        let price = match request.order_type {
            OrderType::Market if request.side == OrderSide::Buy => ticker.ask,
            OrderType::Market => ticker.bid,
            _ => request.price,
        };

        match request.side {
            OrderSide::Buy => {
                let cost = request.amount * price;
                let quote = balance_entry(&mut state.balances, &market.quote);
                if quote.free < cost {
                    return Err(BotError::InsufficientFunds(format!(
                        "Need {} {}, have {}",
                        cost, market.quote, quote.free
                    )));
                }
                quote.free -= cost;
                quote.used += cost;
            }
            OrderSide::Sell => {
                let base = balance_entry(&mut state.balances, &market.base);
                if base.free < request.amount {
                    return Err(BotError::InsufficientFunds(format!(
                        "Need {} {}, have {}",
                        request.amount, market.base, base.free
                    )));
                }
                base.free -= request.amount;
                base.used += request.amount;
            }
        }

        let order = Order {
            id: Uuid::new_v4().to_string(),
            pair: request.pair.clone(),
            status: OrderStatus::Open,
            side: request.side,
            order_type: request.order_type,
            price,
            average: None,
            amount: request.amount,
            filled: Decimal::ZERO,
            remaining: request.amount,
            cost: Decimal::ZERO,
            fee: None,
            stop_price: request.stop_price,
            datetime: now,
        };
        let order_id = order.id.clone();
        state.orders.insert(order_id.clone(), order.clone());

        debug!(
            order_id = %order_id,
            pair = %order.pair,
            side = order.side.as_str(),
            order_type = order.order_type.as_str(),
            price = %price,
            amount = %order.amount,
            "[PAPER] Order placed"
        );

        if let Some(fill_price) = match_price(&order, ticker.bid, ticker.ask, ticker.last) {
            self.execute(&mut state, &order_id, fill_price, now)?;
        }

        state
            .orders
            .get(&order_id)
            .cloned()
            .ok_or_else(|| BotError::Internal(format!("Order {} vanished", order_id)))
    }

    async fn get_order(&self, order_id: &str, _pair: &str) -> Result<Order> {
        let state = self.lock()?;
        state
            .orders
            .get(order_id)
            .cloned()
            .ok_or_else(|| BotError::InvalidOrder(format!("Unknown order {}", order_id)))
    }

    async fn cancel_order(&self, order_id: &str, _pair: &str) -> Result<Order> {
        let mut state = self.lock()?;
        let order = state
            .orders
            .get(order_id)
            .cloned()
            .ok_or_else(|| BotError::InvalidOrder(format!("Unknown order {}", order_id)))?;

        if !order.is_open() {
            return Ok(order);
        }

        let market = find_market(&state.markets, &order.pair)?;
        match order.side {
            OrderSide::Buy => {
                let reserved = order.remaining * order.price;
                let quote = balance_entry(&mut state.balances, &market.quote);
                quote.used -= reserved.min(quote.used);
                quote.free += reserved;
            }
            OrderSide::Sell => {
                let base = balance_entry(&mut state.balances, &market.base);
                base.used -= order.remaining.min(base.used);
                base.free += order.remaining;
            }
        }

        let order = match state.orders.get_mut(order_id) {
            Some(order) => {
                order.status = OrderStatus::Canceled;
                order.clone()
            }
            None => return Err(BotError::InvalidOrder(format!("Unknown order {}", order_id))),
        };

        info!(order_id = %order_id, pair = %order.pair, "[PAPER] Order cancelled");
        Ok(order)
    }

    async fn get_trades_for_order(
        &self,
        order_id: &str,
        _pair: &str,
        since: DateTime<Utc>,
    ) -> Result<Vec<Fill>> {
        let state = self.lock()?;
        Ok(state
            .fills
            .get(order_id)
            .map(|fills| fills.iter().filter(|f| f.timestamp >= since).cloned().collect())
            .unwrap_or_default())
    }

    async fn get_fee(&self, _pair: &str, _side: TakerOrMaker) -> Result<Decimal> {
        Ok(self.fee)
    }

    async fn fetch_balances(&self) -> Result<HashMap<String, Balance>> {
        let state = self.lock()?;
        Ok(state.balances.clone())
    }

    async fn fetch_ohlcv(&self, pair: &str, _timeframe: &str, limit: usize) -> Result<Vec<Candle>> {
        let state = self.lock()?;
        let candles = state.candles.get(pair).cloned().unwrap_or_default();
        let skip = candles.len().saturating_sub(limit);
        Ok(candles.into_iter().skip(skip).collect())
    }
}
