//! Exchange order snapshots and the requests used to create them.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Exchange-reported order status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    Open,
    Closed,
    Canceled,
    Expired,
    Rejected,
}

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Open => "open",
            OrderStatus::Closed => "closed",
            OrderStatus::Canceled => "canceled",
            OrderStatus::Expired => "expired",
            OrderStatus::Rejected => "rejected",
        }
    }
}

/// Order direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderSide {
    Buy,
    Sell,
}

impl OrderSide {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderSide::Buy => "buy",
            OrderSide::Sell => "sell",
        }
    }
}

/// Order type as understood by the exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderType {
    Limit,
    Market,
    StopLossLimit,
}

impl OrderType {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderType::Limit => "limit",
            OrderType::Market => "market",
            OrderType::StopLossLimit => "stop_loss_limit",
        }
    }
}

/// Time in force for submitted orders.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimeInForce {
    #[default]
    Gtc,
    Fok,
    Ioc,
}

/// Fee charged on an order or a fill.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderFee {
    /// Currency the fee was charged in
    pub currency: String,

    /// Absolute fee amount in that currency
    pub cost: Decimal,
}

/// Snapshot of an exchange order. Never owned; always re-fetched.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    pub id: String,
    pub pair: String,
    pub status: OrderStatus,
    pub side: OrderSide,
    pub order_type: OrderType,

    /// Limit price
    pub price: Decimal,

    /// Average fill price, if the exchange reports one
    #[serde(default)]
    pub average: Option<Decimal>,

    /// Requested base amount
    pub amount: Decimal,
    pub filled: Decimal,
    pub remaining: Decimal,

    /// Quote currency spent or received so far
    pub cost: Decimal,

    #[serde(default)]
    pub fee: Option<OrderFee>,

    /// Trigger price for stop orders
    #[serde(default)]
    pub stop_price: Option<Decimal>,

    pub datetime: DateTime<Utc>,
}

impl Order {
    /// Price the order actually executed at.
    pub fn fill_price(&self) -> Decimal {
        self.average.filter(|a| !a.is_zero()).unwrap_or(self.price)
    }

    pub fn is_open(&self) -> bool {
        self.status == OrderStatus::Open
    }

    /// Expired or rejected by the exchange.
    pub fn is_dead(&self) -> bool {
        matches!(self.status, OrderStatus::Expired | OrderStatus::Rejected)
    }
}

/// Order submission parameters.
#[derive(Debug, Clone)]
pub struct OrderRequest {
    pub pair: String,
    pub side: OrderSide,
    pub order_type: OrderType,
    pub amount: Decimal,
    pub price: Decimal,
    pub time_in_force: TimeInForce,
    pub stop_price: Option<Decimal>,
}

impl OrderRequest {
    pub fn buy(pair: &str, order_type: OrderType, amount: Decimal, price: Decimal, tif: TimeInForce) -> Self {
        Self {
            pair: pair.to_string(),
            side: OrderSide::Buy,
            order_type,
            amount,
            price,
            time_in_force: tif,
            stop_price: None,
        }
    }

    pub fn sell(pair: &str, order_type: OrderType, amount: Decimal, price: Decimal, tif: TimeInForce) -> Self {
        Self {
            pair: pair.to_string(),
            side: OrderSide::Sell,
            order_type,
            amount,
            price,
            time_in_force: tif,
            stop_price: None,
        }
    }

    /// Stop-loss limit sell triggered at `stop_price`.
    pub fn stoploss(pair: &str, amount: Decimal, stop_price: Decimal, limit_price: Decimal) -> Self {
        Self {
            pair: pair.to_string(),
            side: OrderSide::Sell,
            order_type: OrderType::StopLossLimit,
            amount,
            price: limit_price,
            time_in_force: TimeInForce::Gtc,
            stop_price: Some(stop_price),
        }
    }
}

/// A single execution belonging to an order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Fill {
    pub order_id: String,
    pub pair: String,
    pub amount: Decimal,
    pub price: Decimal,
    #[serde(default)]
    pub fee: Option<OrderFee>,
    pub timestamp: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn order(average: Option<Decimal>) -> Order {
        Order {
            id: "1".to_string(),
            pair: "ETH/BTC".to_string(),
            status: OrderStatus::Closed,
            side: OrderSide::Buy,
            order_type: OrderType::Limit,
            price: dec!(0.1),
            average,
            amount: dec!(10),
            filled: dec!(10),
            remaining: Decimal::ZERO,
            cost: dec!(1),
            fee: None,
            stop_price: None,
            datetime: Utc::now(),
        }
    }

    #[test]
    fn test_fill_price_prefers_average() {
        assert_eq!(order(Some(dec!(0.09))).fill_price(), dec!(0.09));
        assert_eq!(order(None).fill_price(), dec!(0.1));
        assert_eq!(order(Some(Decimal::ZERO)).fill_price(), dec!(0.1));
    }

    #[test]
    fn test_status_serializes_lowercase() {
        let json = serde_json::to_string(&OrderStatus::Canceled).unwrap();
        assert_eq!(json, "\"canceled\"");
    }
}
