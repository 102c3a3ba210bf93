//! Shared fixtures for lifecycle scenarios: a scripted exchange, a strategy
//! with fixed signals and a harness wiring them into a `TradeLifecycle`.

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tokio::sync::mpsc::UnboundedReceiver;

use spotbot::config::{BotConfig, OrderTimeInForce, OrderTypes, StakeAmount};
use spotbot::data::ExchangeDataProvider;
use spotbot::exchange::{Exchange, TakerOrMaker};
use spotbot::lifecycle::TradeLifecycle;
use spotbot::models::{
    Balance, BookLevel, Candle, Fill, Market, Order, OrderBook, OrderFee, OrderRequest, OrderStatus,
    SellReason, Ticker, Trade,
};
use spotbot::notify::{Notification, Notifier};
use spotbot::persistence::InMemoryTradeRepository;
use spotbot::strategy::{ExitRules, PairLocks, SellCheck, Signal, StrategyContext, StrategyOracle};
use spotbot::{BotError, Result};

/// Ordered record of interesting calls, shared by the mock collaborators.
#[derive(Clone, Default)]
pub struct EventLog(Arc<Mutex<Vec<String>>>);

impl EventLog {
    pub fn push(&self, event: impl Into<String>) {
        if let Ok(mut events) = self.0.lock() {
            events.push(event.into());
        }
    }

    pub fn events(&self) -> Vec<String> {
        self.0.lock().map(|e| e.clone()).unwrap_or_default()
    }

    pub fn position(&self, event: &str) -> Option<usize> {
        self.events().iter().position(|e| e == event)
    }
}

// ==================== Mock Exchange ====================

/// Scripted outcome for the next `place_order` call.
#[derive(Debug, Clone)]
pub enum Scripted {
    /// Accept the order with `status`. `filled` defaults to the full amount
    /// for closed orders and zero otherwise.
    Order {
        status: OrderStatus,
        filled: Option<Decimal>,
        fee: Option<OrderFee>,
    },
    InvalidOrder,
    Temporary,
}

#[derive(Default)]
struct MockState {
    markets: HashMap<String, Market>,
    tickers: HashMap<String, Ticker>,
    books: HashMap<String, OrderBook>,
    balances: HashMap<String, Balance>,
    scripts: VecDeque<Scripted>,
    orders: HashMap<String, Order>,
    order_ids: Vec<String>,
    fills: HashMap<String, Vec<Fill>>,
    placed: Vec<OrderRequest>,
    cancelled: Vec<String>,
    fee: Decimal,
    next_id: u64,
}

/// Exchange double with scripted order outcomes.
///
/// Orders are accepted as open and unfilled unless a script says otherwise.
pub struct MockExchange {
    state: Mutex<MockState>,
    events: EventLog,
}

impl MockExchange {
    pub fn new(events: EventLog) -> Self {
        Self {
            state: Mutex::new(MockState::default()),
            events,
        }
    }

    fn lock(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().expect("mock exchange state poisoned")
    }

    pub fn add_market(&self, market: Market) {
        self.lock().markets.insert(market.symbol.clone(), market);
    }

    pub fn set_ticker(&self, pair: &str, bid: Decimal, ask: Decimal, last: Decimal) {
        self.lock().tickers.insert(
            pair.to_string(),
            Ticker {
                pair: pair.to_string(),
                bid,
                ask,
                last,
                timestamp: Utc::now(),
            },
        );
    }

    pub fn set_order_book(&self, pair: &str, book: OrderBook) {
        self.lock().books.insert(pair.to_string(), book);
    }

    pub fn set_balance(&self, currency: &str, free: Decimal) {
        self.lock().balances.insert(
            currency.to_string(),
            Balance {
                currency: currency.to_string(),
                free,
                used: Decimal::ZERO,
                total: free,
            },
        );
    }

    pub fn set_fee(&self, fee: Decimal) {
        self.lock().fee = fee;
    }

    pub fn script(&self, outcome: Scripted) {
        self.lock().scripts.push_back(outcome);
    }

    pub fn script_order(&self, status: OrderStatus, filled: Option<Decimal>) {
        self.script(Scripted::Order {
            status,
            filled,
            fee: None,
        });
    }

    pub fn set_fills(&self, order_id: &str, fills: Vec<Fill>) {
        self.lock().fills.insert(order_id.to_string(), fills);
    }

    /// Change an order as the exchange would between two queries.
    pub fn update_order(&self, order_id: &str, change: impl FnOnce(&mut Order)) {
        if let Some(order) = self.lock().orders.get_mut(order_id) {
            change(order);
        }
    }

    /// Fill an open order completely at its limit price.
    pub fn fill_order(&self, order_id: &str) {
        self.update_order(order_id, |order| {
            order.status = OrderStatus::Closed;
            order.filled = order.amount;
            order.remaining = Decimal::ZERO;
            order.cost = order.amount * order.price;
        });
    }

    /// Backdate an order's creation time.
    pub fn age_order(&self, order_id: &str, minutes: i64) {
        self.update_order(order_id, |order| {
            order.datetime = Utc::now() - chrono::Duration::minutes(minutes);
        });
    }

    pub fn order(&self, order_id: &str) -> Option<Order> {
        self.lock().orders.get(order_id).cloned()
    }

    /// Id of the most recently accepted order.
    pub fn last_order_id(&self) -> String {
        self.lock().order_ids.last().cloned().expect("an order was placed")
    }

    pub fn placed(&self) -> Vec<OrderRequest> {
        self.lock().placed.clone()
    }

    pub fn cancelled(&self) -> Vec<String> {
        self.lock().cancelled.clone()
    }
}

#[async_trait]
impl Exchange for MockExchange {
    fn name(&self) -> &str {
        "mock"
    }

    async fn market(&self, pair: &str) -> Result<Market> {
        self.lock()
            .markets
            .get(pair)
            .cloned()
            .ok_or_else(|| BotError::Dependency(format!("Market {} not available", pair)))
    }

    async fn fetch_ticker(&self, pair: &str) -> Result<Ticker> {
        self.lock()
            .tickers
            .get(pair)
            .cloned()
            .ok_or_else(|| BotError::Temporary(format!("No ticker for {}", pair)))
    }

    async fn get_order_book(&self, pair: &str, _depth: usize) -> Result<OrderBook> {
        self.lock()
            .books
            .get(pair)
            .cloned()
            .ok_or_else(|| BotError::Temporary(format!("No order book for {}", pair)))
    }

    async fn place_order(&self, request: OrderRequest) -> Result<Order> {
        self.events
            .push(format!("place_order:{}:{}", request.side.as_str(), request.order_type.as_str()));

        let mut state = self.lock();
        state.placed.push(request.clone());

        let script = state.scripts.pop_front().unwrap_or(Scripted::Order {
            status: OrderStatus::Open,
            filled: None,
            fee: None,
        });
        let (status, filled, fee) = match script {
            Scripted::Order { status, filled, fee } => (status, filled, fee),
            Scripted::InvalidOrder => {
                return Err(BotError::InvalidOrder(format!("{} order refused", request.pair)))
            }
            Scripted::Temporary => return Err(BotError::Temporary("exchange unavailable".to_string())),
        };

        let filled = filled.unwrap_or(if status == OrderStatus::Closed {
            request.amount
        } else {
            Decimal::ZERO
        });

        state.next_id += 1;
        let order = Order {
            id: format!("mock-{}", state.next_id),
            pair: request.pair.clone(),
            status,
            side: request.side,
            order_type: request.order_type,
            price: request.price,
            average: None,
            amount: request.amount,
            filled,
            remaining: request.amount - filled,
            cost: filled * request.price,
            fee,
            stop_price: request.stop_price,
            datetime: Utc::now(),
        };
        state.orders.insert(order.id.clone(), order.clone());
        state.order_ids.push(order.id.clone());

        Ok(order)
    }

    async fn get_order(&self, order_id: &str, _pair: &str) -> Result<Order> {
        self.lock()
            .orders
            .get(order_id)
            .cloned()
            .ok_or_else(|| BotError::InvalidOrder(format!("Order {} not found", order_id)))
    }

    async fn cancel_order(&self, order_id: &str, _pair: &str) -> Result<Order> {
        self.events.push(format!("cancel_order:{}", order_id));

        let mut state = self.lock();
        state.cancelled.push(order_id.to_string());
        let order = state
            .orders
            .get_mut(order_id)
            .ok_or_else(|| BotError::InvalidOrder(format!("Order {} not found", order_id)))?;
        if order.status == OrderStatus::Open {
            order.status = OrderStatus::Canceled;
        }
        Ok(order.clone())
    }

    async fn get_trades_for_order(
        &self,
        order_id: &str,
        _pair: &str,
        _since: DateTime<Utc>,
    ) -> Result<Vec<Fill>> {
        Ok(self.lock().fills.get(order_id).cloned().unwrap_or_default())
    }

    async fn get_fee(&self, _pair: &str, _side: TakerOrMaker) -> Result<Decimal> {
        Ok(self.lock().fee)
    }

    async fn fetch_balances(&self) -> Result<HashMap<String, Balance>> {
        Ok(self.lock().balances.clone())
    }

    async fn fetch_ohlcv(&self, _pair: &str, _timeframe: &str, _limit: usize) -> Result<Vec<Candle>> {
        Ok(Vec::new())
    }
}

// ==================== Test Strategy ====================

/// Strategy with a settable signal and the stock sell rules.
pub struct TestStrategy {
    name: String,
    timeframe: String,
    stoploss: Decimal,
    trailing_stop: bool,
    order_types: OrderTypes,
    time_in_force: OrderTimeInForce,
    rules: ExitRules,
    locks: PairLocks,
    signal: Mutex<Signal>,
    forced_sell: Mutex<Option<SellReason>>,
    signal_delay: Mutex<Option<Duration>>,
    events: EventLog,
}

impl TestStrategy {
    pub fn new(config: &BotConfig, events: EventLog) -> Self {
        Self {
            name: "test".to_string(),
            timeframe: config.timeframe.clone(),
            stoploss: config.strategy.stoploss,
            trailing_stop: config.strategy.trailing_stop,
            order_types: config.strategy.order_types.clone(),
            time_in_force: config.strategy.order_time_in_force.clone(),
            rules: ExitRules::new(&config.strategy, &config.ask_strategy, config.dry_run),
            locks: PairLocks::new(),
            signal: Mutex::new(Signal::default()),
            forced_sell: Mutex::new(None),
            signal_delay: Mutex::new(None),
            events,
        }
    }

    pub fn set_signal(&self, buy: bool, sell: bool) {
        *self.signal.lock().expect("signal poisoned") = Signal { buy, sell };
    }

    /// Make every sell check fire with `reason`.
    pub fn force_sell(&self, reason: Option<SellReason>) {
        *self.forced_sell.lock().expect("forced sell poisoned") = reason;
    }

    /// Make `get_signal` take `delay` to answer.
    pub fn delay_signal(&self, delay: Duration) {
        *self.signal_delay.lock().expect("signal delay poisoned") = Some(delay);
    }
}

#[async_trait]
impl StrategyOracle for TestStrategy {
    fn name(&self) -> &str {
        &self.name
    }

    fn timeframe(&self) -> &str {
        &self.timeframe
    }

    fn stoploss(&self) -> Decimal {
        self.stoploss
    }

    fn order_types(&self) -> &OrderTypes {
        &self.order_types
    }

    fn time_in_force(&self) -> &OrderTimeInForce {
        &self.time_in_force
    }

    fn trailing_stop(&self) -> bool {
        self.trailing_stop
    }

    async fn get_signal(
        &self,
        pair: &str,
        _timeframe: &str,
        _candles: &[Candle],
        _ctx: &StrategyContext,
    ) -> Signal {
        self.events.push(format!("signal_start:{}", pair));
        let delay = *self.signal_delay.lock().expect("signal delay poisoned");
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.events.push(format!("signal_end:{}", pair));
        *self.signal.lock().expect("signal poisoned")
    }

    fn should_sell(
        &self,
        trade: &mut Trade,
        rate: Decimal,
        now: DateTime<Utc>,
        buy: bool,
        sell: bool,
        force_stoploss: Decimal,
    ) -> SellCheck {
        if let Some(reason) = *self.forced_sell.lock().expect("forced sell poisoned") {
            return SellCheck::sell(reason);
        }
        self.rules.should_sell(trade, rate, now, buy, sell, force_stoploss)
    }

    fn pair_locks(&self) -> &PairLocks {
        &self.locks
    }
}

// ==================== Harness ====================

pub const PAIR: &str = "ETH/USDT";

/// Configuration used by most scenarios: fixed 100 USDT stakes, no ROI
/// table so exits only happen when a test asks for one.
pub fn test_config() -> BotConfig {
    let mut config = BotConfig::default();
    config.stake_currency = "USDT".to_string();
    config.stake_amount = StakeAmount::Fixed(dec!(100));
    config.max_open_trades = 3;
    config.pairs = vec![PAIR.to_string(), "BTC/USDT".to_string()];
    config.strategy.minimal_roi.clear();
    config
}

pub struct Harness {
    pub events: EventLog,
    pub exchange: Arc<MockExchange>,
    pub strategy: Arc<TestStrategy>,
    pub repository: Arc<InMemoryTradeRepository>,
    pub lifecycle: Arc<TradeLifecycle>,
    pub notifications: UnboundedReceiver<Notification>,
}

impl Harness {
    pub fn new(config: BotConfig) -> Self {
        let events = EventLog::default();
        let exchange = Arc::new(MockExchange::new(events.clone()));
        for pair in &config.pairs {
            exchange.add_market(Market::new(pair));
        }
        exchange.set_ticker(PAIR, dec!(99), dec!(100), dec!(100));
        exchange.set_ticker("BTC/USDT", dec!(29990), dec!(30000), dec!(30000));
        exchange.set_balance("USDT", dec!(1000));

        let strategy = Arc::new(TestStrategy::new(&config, events.clone()));
        let repository = Arc::new(InMemoryTradeRepository::new());
        let data = Arc::new(ExchangeDataProvider::new(exchange.clone()));
        let (notifier, notifications) = Notifier::channel();

        let lifecycle = Arc::new(TradeLifecycle::new(
            config,
            exchange.clone(),
            strategy.clone(),
            repository.clone(),
            data,
            notifier,
        ));

        Self {
            events,
            exchange,
            strategy,
            repository,
            lifecycle,
            notifications,
        }
    }

    /// Every notification emitted so far.
    pub fn drain_notifications(&mut self) -> Vec<Notification> {
        let mut received = Vec::new();
        while let Ok(notification) = self.notifications.try_recv() {
            received.push(notification);
        }
        received
    }

    pub fn trades(&self) -> Vec<Trade> {
        self.repository.all_trades().expect("repository readable")
    }

    pub fn only_trade(&self) -> Trade {
        let trades = self.trades();
        assert_eq!(trades.len(), 1, "expected exactly one trade, got {:?}", trades);
        trades.into_iter().next().expect("one trade")
    }

    /// Open a fully filled 1 ETH position at 100 and hold the coins.
    pub async fn open_filled_trade(&self) -> Trade {
        self.exchange.script_order(OrderStatus::Closed, None);
        let opened = self
            .lifecycle
            .execute_buy(PAIR, dec!(100), None)
            .await
            .expect("buy succeeds");
        assert!(opened);
        self.exchange.set_balance("ETH", dec!(1));
        self.only_trade()
    }
}

/// Whether two decimals agree to 8 places.
pub fn approx(a: Decimal, b: Decimal) -> bool {
    (a - b).abs() < dec!(0.00000001)
}

/// Order book from (price, amount) levels, best first.
pub fn order_book(bids: &[(Decimal, Decimal)], asks: &[(Decimal, Decimal)]) -> OrderBook {
    let levels = |side: &[(Decimal, Decimal)]| {
        side.iter()
            .map(|&(price, amount)| BookLevel { price, amount })
            .collect()
    };
    OrderBook {
        bids: levels(bids),
        asks: levels(asks),
    }
}
