use std::collections::HashMap;

use chrono::{DateTime, NaiveDateTime};
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};

/// Venues this dashboard knows about. Bithumb is always the primary venue;
/// the others only contribute cross-exchange reference prices.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Exchange {
    Bithumb,
    Binance,
    Korbit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuoteCurrency {
    Krw,
    Usdt,
}

impl QuoteCurrency {
    pub fn code(&self) -> &'static str {
        match self {
            QuoteCurrency::Krw => "KRW",
            QuoteCurrency::Usdt => "USDT",
        }
    }
}

impl Exchange {
    /// Venues that report reference prices against the primary venue.
    pub const CROSS: [Exchange; 2] = [Exchange::Binance, Exchange::Korbit];

    pub fn label(&self) -> &'static str {
        match self {
            Exchange::Bithumb => "Bithumb",
            Exchange::Binance => "Binance",
            Exchange::Korbit => "Korbit",
        }
    }

    pub fn quote(&self) -> QuoteCurrency {
        match self {
            Exchange::Bithumb | Exchange::Korbit => QuoteCurrency::Krw,
            Exchange::Binance => QuoteCurrency::Usdt,
        }
    }
}

pub const DEFAULT_ASSETS: &[&str] = &["BTC", "ETH", "XRP", "SOL", "USDT", "DOGE"];

static COIN_NAMES: Lazy<HashMap<&'static str, &'static str>> = Lazy::new(|| {
    HashMap::from([
        ("BTC", "Bitcoin"),
        ("ETH", "Ethereum"),
        ("XRP", "Ripple"),
        ("SOL", "Solana"),
        ("USDT", "Tether"),
        ("DOGE", "Dogecoin"),
    ])
});

pub fn coin_name(symbol: &str) -> Option<&'static str> {
    COIN_NAMES.get(symbol).copied()
}

/// Per-asset quotes gathered in one poll cycle. A `price` of 0.0 means the
/// primary venue had no usable quote this cycle; `cross` only carries venues
/// that reported a strictly positive price.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AssetQuote {
    pub price: f64,
    #[serde(default)]
    pub cross: HashMap<Exchange, f64>,
}

impl AssetQuote {
    pub fn cross_price(&self, exchange: Exchange) -> Option<f64> {
        self.cross.get(&exchange).copied().filter(|px| *px > 0.0)
    }
}

/// One normalized market snapshot: everything the pollers learned in a
/// single cycle, keyed by asset symbol.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketSnapshot {
    pub ts: i64,
    pub fx_rate: f64,
    pub assets: HashMap<String, AssetQuote>,
}

/// Wire shape accepted at the transport boundary. Live polling produces the
/// nested shape; recorded history files may still contain rows in the flat
/// layout the old price-log table used, so both decode into the same
/// normalized snapshot.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum SnapshotPayload {
    Nested(MarketSnapshot),
    Legacy(LegacyPriceRow),
}

/// Flat price-log row: one column per asset, KRW quotes only, no
/// cross-exchange data.
#[derive(Debug, Deserialize)]
pub struct LegacyPriceRow {
    pub timestamp: Option<String>,
    #[serde(default)]
    pub btc_price: f64,
    #[serde(default)]
    pub eth_price: f64,
    #[serde(default)]
    pub xrp_price: f64,
    #[serde(default)]
    pub sol_price: f64,
    #[serde(default)]
    pub usdt_price: f64,
    #[serde(default)]
    pub doge_price: f64,
    #[serde(default)]
    pub usd_krw_rate: f64,
}

impl SnapshotPayload {
    pub fn normalize(self) -> Option<MarketSnapshot> {
        match self {
            SnapshotPayload::Nested(mut snapshot) => {
                for quote in snapshot.assets.values_mut() {
                    quote.cross.retain(|_, px| *px > 0.0);
                }
                Some(snapshot)
            }
            SnapshotPayload::Legacy(row) => row.normalize(),
        }
    }
}

impl LegacyPriceRow {
    fn normalize(self) -> Option<MarketSnapshot> {
        let ts = parse_row_timestamp(self.timestamp.as_deref()?)?;
        let columns = [
            ("BTC", self.btc_price),
            ("ETH", self.eth_price),
            ("XRP", self.xrp_price),
            ("SOL", self.sol_price),
            ("USDT", self.usdt_price),
            ("DOGE", self.doge_price),
        ];
        let mut assets = HashMap::new();
        for (symbol, price) in columns {
            if price > 0.0 {
                assets.insert(
                    symbol.to_string(),
                    AssetQuote {
                        price,
                        cross: HashMap::new(),
                    },
                );
            }
        }
        Some(MarketSnapshot {
            ts,
            fx_rate: self.fx_rate(),
            assets,
        })
    }

    fn fx_rate(&self) -> f64 {
        if self.usd_krw_rate > 0.0 {
            self.usd_krw_rate
        } else {
            0.0
        }
    }
}

fn parse_row_timestamp(raw: &str) -> Option<i64> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.timestamp_millis());
    }
    // Naive datetimes come from the old database dump (no offset recorded);
    // they are interpreted as UTC.
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
        .ok()
        .map(|naive| naive.and_utc().timestamp_millis())
}
