//! Entry scenarios: order outcomes, fee reconciliation and entry guards.

mod common;

use chrono::Utc;
use rust_decimal_macros::dec;

use common::{approx, order_book, test_config, Harness, Scripted, PAIR};
use spotbot::models::{Fill, Market, OrderFee, OrderStatus};
use spotbot::notify::Notification;
use spotbot::strategy::StrategyOracle;
use spotbot::BotError;

fn fill(order_id: &str, amount: rust_decimal::Decimal, fee: rust_decimal::Decimal) -> Fill {
    Fill {
        order_id: order_id.to_string(),
        pair: PAIR.to_string(),
        amount,
        price: dec!(100),
        fee: Some(OrderFee {
            currency: "ETH".to_string(),
            cost: fee,
        }),
        timestamp: Utc::now(),
    }
}

#[tokio::test]
async fn test_rejected_entry_creates_no_trade() {
    let h = Harness::new(test_config());
    h.exchange.script_order(OrderStatus::Rejected, None);

    let opened = h.lifecycle.execute_buy(PAIR, dec!(100), None).await.unwrap();

    assert!(!opened);
    assert!(h.trades().is_empty());
}

#[tokio::test]
async fn test_filled_entry_opens_actionable_trade() {
    let mut h = Harness::new(test_config());
    h.exchange.script_order(OrderStatus::Closed, None);

    assert!(h.lifecycle.execute_buy(PAIR, dec!(100), None).await.unwrap());

    let trade = h.only_trade();
    assert!(trade.is_open);
    assert!(trade.is_actionable());
    assert_eq!(trade.open_order_id, None);
    assert_eq!(trade.amount, dec!(1));
    assert_eq!(trade.open_rate, dec!(100));
    assert_eq!(trade.stake_amount, dec!(100));
    assert_eq!(trade.open_rate_requested, Some(dec!(100)));

    let notifications = h.drain_notifications();
    assert!(matches!(notifications.as_slice(), [Notification::Entry(e)] if e.pair == PAIR));
}

#[tokio::test]
async fn test_open_entry_stays_pending() {
    let h = Harness::new(test_config());

    assert!(h.lifecycle.execute_buy(PAIR, dec!(100), None).await.unwrap());

    let trade = h.only_trade();
    assert_eq!(trade.open_order_id, Some(h.exchange.last_order_id()));
    assert!(!trade.is_actionable());
}

#[tokio::test]
async fn test_partially_filled_expired_entry_keeps_filled_part() {
    let h = Harness::new(test_config());
    h.exchange.script_order(OrderStatus::Expired, Some(dec!(0.4)));

    assert!(h.lifecycle.execute_buy(PAIR, dec!(100), None).await.unwrap());

    let trade = h.only_trade();
    assert_eq!(trade.amount, dec!(0.4));
    assert_eq!(trade.stake_amount, dec!(40));
    assert_eq!(trade.open_order_id, None);
}

#[tokio::test]
async fn test_fee_in_base_currency_is_deducted() {
    let h = Harness::new(test_config());
    h.exchange.set_fee(dec!(0.001));
    h.exchange.script(Scripted::Order {
        status: OrderStatus::Closed,
        filled: None,
        fee: Some(OrderFee {
            currency: "ETH".to_string(),
            cost: dec!(0.001),
        }),
    });

    assert!(h.lifecycle.execute_buy(PAIR, dec!(100), None).await.unwrap());

    let trade = h.only_trade();
    assert_eq!(trade.amount, dec!(0.999));
    assert!(trade.fee_open.is_zero());
    assert!(approx(trade.amount * trade.open_rate, trade.stake_amount));
}

#[tokio::test]
async fn test_fee_from_fills_is_deducted() {
    let h = Harness::new(test_config());
    h.exchange.set_fee(dec!(0.001));
    // Ids are handed out sequentially, the buy is the first order.
    h.exchange.set_fills(
        "mock-1",
        vec![
            fill("mock-1", dec!(0.6), dec!(0.0006)),
            fill("mock-1", dec!(0.4), dec!(0.0004)),
        ],
    );
    h.exchange.script_order(OrderStatus::Closed, None);

    assert!(h.lifecycle.execute_buy(PAIR, dec!(100), None).await.unwrap());

    let trade = h.only_trade();
    assert_eq!(trade.amount, dec!(0.999));
    assert!(approx(trade.amount * trade.open_rate, dec!(100)));
}

#[tokio::test]
async fn test_mismatched_fills_are_a_reconciliation_error() {
    let h = Harness::new(test_config());
    h.exchange.set_fee(dec!(0.001));
    h.exchange
        .set_fills("mock-1", vec![fill("mock-1", dec!(0.5), dec!(0.0005))]);
    h.exchange.script_order(OrderStatus::Closed, None);

    // The entry itself survives, the amount is just left uncorrected.
    assert!(h.lifecycle.execute_buy(PAIR, dec!(100), None).await.unwrap());
    let trade = h.only_trade();
    assert_eq!(trade.amount, dec!(1));

    let order = h.exchange.order("mock-1").unwrap();
    let err = h.lifecycle.get_real_amount(&trade, &order, None).await.unwrap_err();
    assert!(matches!(err, BotError::Reconciliation(_)));
}

#[tokio::test]
async fn test_pending_buy_is_reconciled_once_filled() {
    let h = Harness::new(test_config());
    assert!(h.lifecycle.execute_buy(PAIR, dec!(100), None).await.unwrap());
    let order_id = h.exchange.last_order_id();

    let mut trade = h.only_trade();
    h.lifecycle.update_trade_state(&mut trade, None).await.unwrap();
    assert_eq!(trade.open_order_id, Some(order_id.clone()));

    h.exchange.fill_order(&order_id);
    h.lifecycle.update_trade_state(&mut trade, None).await.unwrap();
    assert_eq!(trade.open_order_id, None);
    assert_eq!(trade.amount, dec!(1));
    assert!(trade.is_actionable());
}

#[tokio::test]
async fn test_stake_below_market_minimum_locks_pair() {
    let h = Harness::new(test_config());
    h.exchange
        .add_market(Market::new(PAIR).with_limits(Some(dec!(200)), None));

    let opened = h.lifecycle.execute_buy(PAIR, dec!(100), None).await.unwrap();

    assert!(!opened);
    assert!(h.exchange.placed().is_empty());
    assert!(h.strategy.is_pair_locked(PAIR));
}

#[tokio::test]
async fn test_create_trade_needs_buy_signal() {
    let h = Harness::new(test_config());

    assert!(!h.lifecycle.create_trade(PAIR).await.unwrap());

    h.strategy.set_signal(true, true);
    assert!(!h.lifecycle.create_trade(PAIR).await.unwrap());

    h.strategy.set_signal(true, false);
    assert!(h.lifecycle.create_trade(PAIR).await.unwrap());
    assert_eq!(h.trades().len(), 1);
}

#[tokio::test]
async fn test_create_trade_respects_max_open_trades() {
    let mut config = test_config();
    config.max_open_trades = 1;
    let h = Harness::new(config);
    h.open_filled_trade().await;
    h.strategy.set_signal(true, false);

    assert!(!h.lifecycle.create_trade("BTC/USDT").await.unwrap());
    assert_eq!(h.exchange.placed().len(), 1);
    assert_eq!(h.lifecycle.free_slots().await.unwrap(), 0);
}

#[tokio::test]
async fn test_enter_positions_skips_pairs_with_open_trades() {
    let h = Harness::new(test_config());
    h.open_filled_trade().await;
    h.strategy.set_signal(true, false);

    let whitelist = vec![PAIR.to_string(), "BTC/USDT".to_string()];
    let created = h.lifecycle.enter_positions(&whitelist).await.unwrap();

    assert_eq!(created, 1);
    let pairs: Vec<String> = h.trades().into_iter().map(|t| t.pair).collect();
    assert_eq!(pairs, vec![PAIR.to_string(), "BTC/USDT".to_string()]);
}

#[tokio::test]
async fn test_enter_positions_survives_exchange_errors() {
    let h = Harness::new(test_config());
    h.strategy.set_signal(true, false);
    h.exchange.script(Scripted::Temporary);

    let created = h
        .lifecycle
        .enter_positions(&[PAIR.to_string()])
        .await
        .unwrap();

    assert_eq!(created, 0);
    assert!(h.trades().is_empty());
}

#[tokio::test]
async fn test_force_entry_rejects_foreign_quote_and_duplicates() {
    let h = Harness::new(test_config());

    let err = h.lifecycle.force_entry("ETH/BTC", None).await.unwrap_err();
    assert!(matches!(err, BotError::Dependency(_)));

    h.exchange.script_order(OrderStatus::Closed, None);
    let trade = h.lifecycle.force_entry(PAIR, Some(dec!(95))).await.unwrap().unwrap();
    assert_eq!(trade.open_rate, dec!(95));

    let err = h.lifecycle.force_entry(PAIR, None).await.unwrap_err();
    assert!(matches!(err, BotError::Dependency(_)));
}

#[tokio::test]
async fn test_risk_model_sizes_stake_from_stoploss() {
    let mut config = test_config();
    config.edge.enabled = true;
    let h = Harness::new(config);

    // Half of 1000 USDT, 1% of it at risk over a 5% stop.
    let stake = h.lifecycle.get_trade_stake_amount(PAIR).await.unwrap();
    assert_eq!(stake, dec!(100));
}

#[tokio::test]
async fn test_depth_of_market_gates_entry() {
    let mut config = test_config();
    config.bid_strategy.check_depth_of_market.enabled = true;
    config.bid_strategy.check_depth_of_market.bids_to_ask_delta = dec!(1.5);
    let h = Harness::new(config);
    h.strategy.set_signal(true, false);

    // Bids 2, asks 2: ratio 1 is below the required 1.5.
    h.exchange.set_order_book(
        PAIR,
        order_book(
            &[(dec!(99), dec!(1)), (dec!(98), dec!(1))],
            &[(dec!(100), dec!(1)), (dec!(101), dec!(1))],
        ),
    );
    assert!(!h.lifecycle.create_trade(PAIR).await.unwrap());
    assert!(h.exchange.placed().is_empty());

    // Bids 4, asks 2.
    h.exchange.set_order_book(
        PAIR,
        order_book(
            &[(dec!(99), dec!(3)), (dec!(98), dec!(1))],
            &[(dec!(100), dec!(1)), (dec!(101), dec!(1))],
        ),
    );
    assert!(h.lifecycle.create_trade(PAIR).await.unwrap());
    assert_eq!(h.trades().len(), 1);
}

#[tokio::test]
async fn test_depth_of_market_skips_one_sided_book() {
    let mut config = test_config();
    config.bid_strategy.check_depth_of_market.enabled = true;
    config.bid_strategy.check_depth_of_market.bids_to_ask_delta = dec!(1);
    let h = Harness::new(config);
    h.strategy.set_signal(true, false);
    h.exchange.set_order_book(PAIR, order_book(&[(dec!(99), dec!(5))], &[]));

    assert!(!h.lifecycle.create_trade(PAIR).await.unwrap());
    assert!(h.trades().is_empty());
}
