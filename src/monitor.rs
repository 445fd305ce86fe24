use std::collections::HashMap;

use tokio::sync::broadcast;

use crate::command::Command;
use crate::metrics;
use crate::snapshot::{Exchange, MarketSnapshot};

/// Watches the Binance premium per asset against configured bands and
/// raises a notification when a band is first crossed. Edge-triggered: a
/// premium that stays outside its band keeps quiet until it re-enters and
/// leaves again.
pub struct Monitor {
    pub bands: HashMap<String, (f64, f64)>,
    pub tx: broadcast::Sender<Command>,
    pub rx: broadcast::Receiver<Command>,
    breached: HashMap<String, bool>,
}

impl Monitor {
    pub fn new(
        bands: HashMap<String, (f64, f64)>,
        tx: broadcast::Sender<Command>,
        rx: broadcast::Receiver<Command>,
    ) -> Monitor {
        Monitor {
            bands,
            tx,
            rx,
            breached: HashMap::new(),
        }
    }

    pub async fn run(&mut self) -> Result<(), anyhow::Error> {
        loop {
            match self.rx.recv().await {
                Ok(Command::Snapshot(snapshot)) => {
                    for (asset, message) in self.scan(&snapshot) {
                        let _ = self.tx.send(Command::Notify(asset, message));
                    }
                }
                Ok(Command::Exit) => break,
                Ok(_) => {}
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
        Ok(())
    }

    fn scan(&mut self, snapshot: &MarketSnapshot) -> Vec<(String, String)> {
        let mut notifications = Vec::new();
        for (asset, (low, high)) in &self.bands {
            let Some(quote) = snapshot.assets.get(asset) else {
                continue;
            };
            let Some(foreign) = quote.cross_price(Exchange::Binance) else {
                continue;
            };
            if !(quote.price > 0.0 && snapshot.fx_rate > 0.0) {
                continue;
            }
            let premium = metrics::premium(quote.price, foreign, snapshot.fx_rate);
            let outside = premium < *low || premium > *high;
            let was_outside = self
                .breached
                .insert(asset.clone(), outside)
                .unwrap_or(false);
            if outside && !was_outside {
                let bound = if premium < *low { *low } else { *high };
                let direction = if premium < *low { "below" } else { "above" };
                notifications.push((
                    asset.clone(),
                    format!(
                        "premium {premium:+.2}% moved {direction} the {bound:+.2}% band"
                    ),
                ));
            }
        }
        notifications
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;
    use crate::snapshot::AssetQuote;

    fn snapshot(price: f64, binance: f64, fx: f64) -> MarketSnapshot {
        let mut assets = HashMap::new();
        assets.insert(
            "BTC".to_string(),
            AssetQuote {
                price,
                cross: HashMap::from([(Exchange::Binance, binance)]),
            },
        );
        MarketSnapshot {
            ts: 0,
            fx_rate: fx,
            assets,
        }
    }

    fn monitor(low: f64, high: f64) -> Monitor {
        let (tx, rx) = broadcast::channel(8);
        Monitor::new(
            HashMap::from([("BTC".to_string(), (low, high))]),
            tx,
            rx,
        )
    }

    #[test]
    fn crossing_notifies_once_until_the_band_is_reentered() {
        let mut monitor = monitor(-1.0, 3.0);
        // premium: (1_040 - 1 * 1_000) / 1_000 = +4%
        let hot = snapshot(1_040.0, 1.0, 1_000.0);
        assert_eq!(monitor.scan(&hot).len(), 1);
        assert!(monitor.scan(&hot).is_empty());
        // back inside the band, then out again
        let calm = snapshot(1_010.0, 1.0, 1_000.0);
        assert!(monitor.scan(&calm).is_empty());
        assert_eq!(monitor.scan(&hot).len(), 1);
    }

    #[test]
    fn missing_reference_data_is_ignored() {
        let mut monitor = monitor(-1.0, 3.0);
        let no_fx = snapshot(1_040.0, 1.0, 0.0);
        assert!(monitor.scan(&no_fx).is_empty());
        let mut no_cross = snapshot(1_040.0, 1.0, 1_000.0);
        no_cross
            .assets
            .get_mut("BTC")
            .unwrap()
            .cross
            .clear();
        assert!(monitor.scan(&no_cross).is_empty());
    }
}
