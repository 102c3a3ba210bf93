//! Trade event notifications.
//!
//! Emission is fire-and-forget: events go onto an unbounded channel and a
//! delivery failure is only logged. Nothing here can fail a trade action.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::models::{OrderType, SellReason};

/// Entry (or entry-cancel) event payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntryEvent {
    pub trade_id: i64,
    pub exchange: String,
    pub pair: String,
    pub limit: Decimal,
    pub order_type: OrderType,
    pub stake_amount: Decimal,
    pub stake_currency: String,
    pub fiat_currency: Option<String>,
    pub amount: Decimal,
    pub open_date: DateTime<Utc>,
    pub current_rate: Decimal,
}

/// Exit (or exit-cancel) event payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExitEvent {
    pub trade_id: i64,
    pub exchange: String,
    pub pair: String,
    /// "profit" or "loss"
    pub gain: String,
    pub limit: Decimal,
    pub order_type: OrderType,
    pub amount: Decimal,
    pub open_rate: Decimal,
    pub current_rate: Decimal,
    pub profit_amount: Decimal,
    pub profit_ratio: Decimal,
    pub sell_reason: Option<SellReason>,
    pub open_date: DateTime<Utc>,
    pub close_date: Option<DateTime<Utc>>,
    pub stake_currency: String,
    pub fiat_currency: Option<String>,
}

/// Event emitted by the engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Notification {
    Status { status: String },
    Entry(EntryEvent),
    EntryCancel(EntryEvent),
    Exit(ExitEvent),
    ExitCancel(ExitEvent),
}

impl Notification {
    pub fn status(message: impl Into<String>) -> Self {
        Notification::Status {
            status: message.into(),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Notification::Status { .. } => "status",
            Notification::Entry(_) => "entry",
            Notification::EntryCancel(_) => "entry_cancel",
            Notification::Exit(_) => "exit",
            Notification::ExitCancel(_) => "exit_cancel",
        }
    }
}

/// Sending half of the notification channel.
#[derive(Clone)]
pub struct Notifier {
    tx: mpsc::UnboundedSender<Notification>,
}

impl Notifier {
    /// Create a notifier and the receiver events are delivered to.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<Notification>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    /// Queue an event. Never blocks, never fails the caller.
    pub fn emit(&self, notification: Notification) {
        let kind = notification.kind();
        if self.tx.send(notification).is_err() {
            warn!(kind = kind, "Notification channel closed, event dropped");
        }
    }
}

/// Drain `rx`, writing every event to the log as JSON.
pub fn spawn_log_sink(mut rx: mpsc::UnboundedReceiver<Notification>) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(notification) = rx.recv().await {
            match serde_json::to_string(&notification) {
                Ok(json) => info!(kind = notification.kind(), event = %json, "Notification"),
                Err(e) => warn!(error = %e, "Failed to serialize notification"),
            }
        }
    })
}
