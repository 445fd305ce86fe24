//! Per-asset price history and its ingestion from market snapshots.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::snapshot::{Exchange, MarketSnapshot};
use crate::window::{ViewWindow, WindowController};

/// One normalized observation for one asset.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tick {
    pub ts: i64,
    /// Primary-venue price in KRW, always strictly positive once stored.
    pub value: f64,
    /// Reference prices in each venue's native quote currency.
    pub cross: HashMap<Exchange, f64>,
    /// USD/KRW rate in effect at this instant; 0.0 when unknown.
    pub fx_rate: f64,
}

impl Tick {
    pub fn cross_price(&self, exchange: Exchange) -> Option<f64> {
        self.cross.get(&exchange).copied().filter(|px| *px > 0.0)
    }
}

/// An asset's series plus its view window. The series is append-only and
/// strictly increasing in `ts`; the window machine is notified of every
/// append so it can follow or hold its position.
#[derive(Debug, Clone, Default)]
pub struct AssetState {
    series: Vec<Tick>,
    pub window: WindowController,
}

impl AssetState {
    pub fn series(&self) -> &[Tick] {
        &self.series
    }

    pub fn latest(&self) -> Option<&Tick> {
        self.series.last()
    }

    pub fn windowed(&self) -> Option<(&[Tick], ViewWindow)> {
        let window = self.window.window()?;
        let slice = self.series.get(window.start..=window.end)?;
        Some((slice, window))
    }

    fn append(&mut self, tick: Tick) -> bool {
        if let Some(last) = self.series.last() {
            if tick.ts <= last.ts {
                return false;
            }
        }
        self.series.push(tick);
        self.window.on_append(self.series.len());
        true
    }
}

/// All per-asset state, keyed by symbol. Assets are independent: ingesting
/// a snapshot touches each asset's series and window in isolation.
#[derive(Debug, Clone, Default)]
pub struct MarketHistory {
    assets: HashMap<String, AssetState>,
    order: Vec<String>,
}

impl MarketHistory {
    /// Pre-register the display catalog so assets render in a stable order
    /// before their first tick arrives.
    pub fn new(catalog: &[String]) -> Self {
        MarketHistory {
            assets: HashMap::new(),
            order: catalog.to_vec(),
        }
    }

    /// Fold one snapshot into the per-asset series. Assets with a missing or
    /// non-positive primary price are skipped for this cycle; a snapshot that
    /// does not advance an asset's timestamp leaves that asset untouched, so
    /// re-ingesting the same snapshot never duplicates ticks. Returns the
    /// number of ticks appended.
    pub fn ingest(&mut self, snapshot: &MarketSnapshot) -> usize {
        let mut appended = 0;
        for (symbol, quote) in &snapshot.assets {
            if !(quote.price.is_finite() && quote.price > 0.0) {
                continue;
            }
            if !self.order.iter().any(|known| known == symbol) {
                self.order.push(symbol.clone());
            }
            let state = self.assets.entry(symbol.clone()).or_default();
            let cross: HashMap<Exchange, f64> = quote
                .cross
                .iter()
                .filter(|(_, px)| px.is_finite() && **px > 0.0)
                .map(|(exchange, px)| (*exchange, *px))
                .collect();
            let tick = Tick {
                ts: snapshot.ts,
                value: quote.price,
                cross,
                fx_rate: snapshot.fx_rate.max(0.0),
            };
            if state.append(tick) {
                appended += 1;
            }
        }
        appended
    }

    pub fn symbols(&self) -> &[String] {
        &self.order
    }

    pub fn state(&self, symbol: &str) -> Option<&AssetState> {
        self.assets.get(symbol)
    }

    pub fn state_mut(&mut self, symbol: &str) -> Option<&mut AssetState> {
        self.assets.get_mut(symbol)
    }

    pub fn latest(&self, symbol: &str) -> Option<&Tick> {
        self.assets.get(symbol).and_then(AssetState::latest)
    }

    /// Drop an asset from the dashboard. Its series and window go together;
    /// re-adding the asset later starts from scratch.
    pub fn remove(&mut self, symbol: &str) {
        self.assets.remove(symbol);
        self.order.retain(|known| known != symbol);
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;
    use crate::snapshot::AssetQuote;

    fn snapshot(ts: i64, entries: &[(&str, f64)]) -> MarketSnapshot {
        let assets = entries
            .iter()
            .map(|(symbol, price)| {
                (
                    symbol.to_string(),
                    AssetQuote {
                        price: *price,
                        cross: HashMap::new(),
                    },
                )
            })
            .collect();
        MarketSnapshot {
            ts,
            fx_rate: 1300.0,
            assets,
        }
    }

    #[test]
    fn invalid_prices_are_skipped_without_error() {
        let mut history = MarketHistory::default();
        let appended = history.ingest(&snapshot(
            1,
            &[("BTC", 95_000_000.0), ("ETH", 0.0), ("XRP", -3.0), ("SOL", f64::NAN)],
        ));
        assert_eq!(appended, 1);
        assert_eq!(history.state("BTC").unwrap().series().len(), 1);
        assert!(history.state("ETH").is_none());
        assert!(history.state("XRP").is_none());
        assert!(history.state("SOL").is_none());
    }

    #[test]
    fn reingesting_the_same_snapshot_is_idempotent() {
        let mut history = MarketHistory::default();
        let snap = snapshot(100, &[("BTC", 95_000_000.0)]);
        assert_eq!(history.ingest(&snap), 1);
        assert_eq!(history.ingest(&snap), 0);
        assert_eq!(history.state("BTC").unwrap().series().len(), 1);
    }

    #[test]
    fn stale_timestamps_never_regress_the_series() {
        let mut history = MarketHistory::default();
        history.ingest(&snapshot(100, &[("BTC", 95_000_000.0)]));
        history.ingest(&snapshot(50, &[("BTC", 94_000_000.0)]));
        let series = history.state("BTC").unwrap().series();
        assert_eq!(series.len(), 1);
        assert_eq!(series[0].ts, 100);
    }

    #[test]
    fn first_valid_tick_creates_series_and_window() {
        let mut history = MarketHistory::new(&["BTC".to_string()]);
        assert!(history.state("DOGE").is_none());
        history.ingest(&snapshot(1, &[("DOGE", 350.0)]));
        let state = history.state("DOGE").unwrap();
        assert_eq!(state.series().len(), 1);
        let (slice, window) = state.windowed().unwrap();
        assert_eq!(slice.len(), 1);
        assert_eq!((window.start, window.end), (0, 0));
        // the unseen asset joined the display order after the catalog
        assert_eq!(history.symbols(), &["BTC".to_string(), "DOGE".to_string()]);
    }

    #[test]
    fn appends_drive_the_window_rebase() {
        let mut history = MarketHistory::default();
        for ts in 0..100 {
            history.ingest(&snapshot(ts, &[("BTC", 95_000_000.0 + ts as f64)]));
        }
        let state = history.state_mut("BTC").unwrap();
        let live = state.window.window().unwrap();
        assert_eq!((live.start, live.end), (50, 99));

        // park the window in history, then ingest one more tick
        state.window.drag_start(0.0);
        state.window.drag_move(1_000.0, 500.0, 100);
        state.window.drag_end();
        let parked = state.window.window().unwrap();
        assert!(!parked.at_live_edge(100));
        history.ingest(&snapshot(200, &[("BTC", 96_000_000.0)]));
        assert_eq!(history.state("BTC").unwrap().window.window().unwrap(), parked);
    }

    #[test]
    fn removing_an_asset_discards_series_and_window() {
        let mut history = MarketHistory::default();
        history.ingest(&snapshot(1, &[("BTC", 95_000_000.0)]));
        history.remove("BTC");
        assert!(history.state("BTC").is_none());
        assert!(history.symbols().is_empty());
    }
}
