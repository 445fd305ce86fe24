use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::error_log::ErrorSource;
use crate::snapshot::MarketSnapshot;

/// Messages carried on the broadcast bus between the feed, monitor, trader,
/// and TUI tasks.
#[derive(Debug, Clone)]
pub enum Command {
    Snapshot(MarketSnapshot),
    Notify(String, String),
    Error(ErrorSource, String),
    TradeResult(TradeResponse),
    BalanceUpdate(AccountBalances),
    Exit,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum TradeSide {
    Buy,
    Sell,
}

impl TradeSide {
    /// Bithumb's order API speaks in bid/ask.
    pub fn as_bithumb_side(&self) -> &'static str {
        match self {
            TradeSide::Buy => "bid",
            TradeSide::Sell => "ask",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            TradeSide::Buy => "BUY",
            TradeSide::Sell => "SELL",
        }
    }
}

/// A sized, validated order headed for the submission task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeRequest {
    pub asset: String,
    pub side: TradeSide,
    /// KRW spent (buys) or expected proceeds (sells).
    pub fiat_amount: f64,
    /// Asset quantity; what sells actually submit.
    pub quantity: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TradeResponse {
    pub asset: String,
    pub side: TradeSide,
    pub fiat_amount: f64,
    pub quantity: f64,
    pub order_id: Option<String>,
    pub message: String,
    pub success: bool,
}

/// Work items for the trader task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum TradingCommand {
    Place(TradeRequest),
    RefreshBalance,
}

/// Available holdings per currency, as reported by the primary venue.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct AccountBalances {
    pub available: HashMap<String, f64>,
}

impl AccountBalances {
    pub fn available_for(&self, currency: &str) -> f64 {
        self.available.get(currency).copied().unwrap_or(0.0)
    }
}
