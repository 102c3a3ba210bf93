//! Unfilled order timeouts for both sides.

mod common;

use rust_decimal_macros::dec;

use common::{test_config, Harness, PAIR};
use spotbot::models::{OrderStatus, SellReason, TradeState};
use spotbot::notify::Notification;

fn statuses(notifications: &[Notification]) -> Vec<String> {
    notifications
        .iter()
        .filter_map(|n| match n {
            Notification::Status { status } => Some(status.clone()),
            _ => None,
        })
        .collect()
}

#[tokio::test]
async fn test_unfilled_buy_timeout_deletes_trade() {
    let mut h = Harness::new(test_config());
    assert!(h.lifecycle.execute_buy(PAIR, dec!(100), None).await.unwrap());
    let order_id = h.exchange.last_order_id();
    h.exchange.age_order(&order_id, 20);
    h.drain_notifications();

    h.lifecycle.check_handle_timedout().await.unwrap();

    assert!(h.trades().is_empty());
    assert_eq!(h.exchange.cancelled(), vec![order_id]);
    let notifications = h.drain_notifications();
    assert!(notifications.iter().any(|n| matches!(n, Notification::EntryCancel(_))));
}

#[tokio::test]
async fn test_fresh_buy_is_not_cancelled() {
    let h = Harness::new(test_config());
    assert!(h.lifecycle.execute_buy(PAIR, dec!(100), None).await.unwrap());

    h.lifecycle.check_handle_timedout().await.unwrap();

    assert_eq!(h.only_trade().state(), TradeState::EntryPending);
    assert!(h.exchange.cancelled().is_empty());
}

#[tokio::test]
async fn test_partially_filled_buy_timeout_shrinks_trade() {
    let mut h = Harness::new(test_config());
    h.exchange.script_order(OrderStatus::Open, Some(dec!(0.4)));
    assert!(h.lifecycle.execute_buy(PAIR, dec!(100), None).await.unwrap());
    let order_id = h.exchange.last_order_id();
    h.exchange.age_order(&order_id, 20);
    h.drain_notifications();

    h.lifecycle.check_handle_timedout().await.unwrap();

    let trade = h.only_trade();
    assert_eq!(trade.amount, dec!(0.4));
    assert_eq!(trade.stake_amount, dec!(40));
    assert_eq!(trade.open_order_id, None);
    assert!(trade.is_actionable());

    let statuses = statuses(&h.drain_notifications());
    assert!(statuses
        .iter()
        .any(|s| s == "Remaining buy order for ETH/USDT cancelled due to timeout"));
}

#[tokio::test]
async fn test_buy_cancelled_on_exchange_is_cleaned_up() {
    let h = Harness::new(test_config());
    assert!(h.lifecycle.execute_buy(PAIR, dec!(100), None).await.unwrap());
    let order_id = h.exchange.last_order_id();
    h.exchange
        .update_order(&order_id, |order| order.status = OrderStatus::Canceled);

    h.lifecycle.check_handle_timedout().await.unwrap();

    assert!(h.trades().is_empty());
    assert!(h.exchange.cancelled().is_empty());
}

#[tokio::test]
async fn test_unfilled_sell_timeout_reopens_trade() {
    let mut h = Harness::new(test_config());
    let mut trade = h.open_filled_trade().await;
    assert!(h
        .lifecycle
        .execute_sell(&mut trade, dec!(110), SellReason::Roi)
        .await
        .unwrap());
    let order_id = h.exchange.last_order_id();
    h.exchange.age_order(&order_id, 60);
    h.drain_notifications();

    h.lifecycle.check_handle_timedout().await.unwrap();

    let trade = h.only_trade();
    assert_eq!(trade.state(), TradeState::OpenActionable);
    assert_eq!(trade.close_rate, None);
    assert_eq!(trade.close_rate_requested, None);
    assert_eq!(trade.sell_reason, None);
    assert_eq!(h.exchange.cancelled(), vec![order_id]);

    let notifications = h.drain_notifications();
    assert!(notifications
        .iter()
        .any(|n| matches!(n, Notification::ExitCancel(e) if e.sell_reason == Some(SellReason::Roi))));
}

#[tokio::test]
async fn test_partially_filled_sell_timeout_is_reported_once() {
    let mut h = Harness::new(test_config());
    let mut trade = h.open_filled_trade().await;
    assert!(h
        .lifecycle
        .execute_sell(&mut trade, dec!(110), SellReason::Roi)
        .await
        .unwrap());
    let order_id = h.exchange.last_order_id();
    h.exchange.update_order(&order_id, |order| {
        order.filled = dec!(0.4);
        order.remaining = dec!(0.6);
    });
    h.exchange.age_order(&order_id, 60);
    h.drain_notifications();

    h.lifecycle.check_handle_timedout().await.unwrap();
    h.lifecycle.check_handle_timedout().await.unwrap();

    assert_eq!(h.lifecycle.flagged_partial_sells(), vec![trade.id]);
    assert!(h.exchange.cancelled().is_empty());
    assert_eq!(h.only_trade().state(), TradeState::ExitPending);

    let statuses = statuses(&h.drain_notifications());
    let reports = statuses
        .iter()
        .filter(|s| s.contains("manual intervention required"))
        .count();
    assert_eq!(reports, 1);
}

#[tokio::test]
async fn test_filled_order_is_not_touched() {
    let h = Harness::new(test_config());
    assert!(h.lifecycle.execute_buy(PAIR, dec!(100), None).await.unwrap());
    let order_id = h.exchange.last_order_id();
    h.exchange.fill_order(&order_id);
    h.exchange.age_order(&order_id, 60);

    h.lifecycle.check_handle_timedout().await.unwrap();

    // Reconciliation happens in the next exit pass.
    assert_eq!(h.only_trade().state(), TradeState::EntryPending);
    assert!(h.exchange.cancelled().is_empty());
}

#[tokio::test]
async fn test_partial_sell_flag_clears_once_sell_fills() {
    let h = Harness::new(test_config());
    let mut trade = h.open_filled_trade().await;
    assert!(h
        .lifecycle
        .execute_sell(&mut trade, dec!(110), SellReason::Roi)
        .await
        .unwrap());
    let order_id = h.exchange.last_order_id();
    h.exchange.update_order(&order_id, |order| {
        order.filled = dec!(0.4);
        order.remaining = dec!(0.6);
    });
    h.exchange.age_order(&order_id, 60);
    h.lifecycle.check_handle_timedout().await.unwrap();
    assert_eq!(h.lifecycle.flagged_partial_sells(), vec![trade.id]);

    h.exchange.fill_order(&order_id);
    h.lifecycle.exit_positions().await.unwrap();

    assert!(!h.only_trade().is_open);
    assert!(h.lifecycle.flagged_partial_sells().is_empty());
}
