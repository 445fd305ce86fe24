//! Market polling: one snapshot per cycle from Bithumb (primary), Binance
//! and Korbit (reference venues), plus the USD/KRW rate. A venue that fails
//! a cycle is simply absent from that snapshot; only a cycle with no usable
//! primary quote at all is reported as an error, and the next tick retries.

use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use chrono::Utc;
use reqwest::{Client, ClientBuilder};
use serde::Deserialize;
use tokio::sync::broadcast;
use tokio::time::MissedTickBehavior;

use crate::command::Command;
use crate::error_log::ErrorSource;
use crate::snapshot::{AssetQuote, Exchange, MarketSnapshot, SnapshotPayload};

const BITHUMB_TICKER_ENDPOINT: &str = "https://api.bithumb.com/public/ticker";
const BINANCE_TICKER_ENDPOINT: &str = "https://api.binance.com/api/v3/ticker/price";
const KORBIT_TICKER_ENDPOINT: &str = "https://api.korbit.co.kr/v1/ticker";
const FX_ENDPOINT: &str = "https://api.frankfurter.app/latest";
const MAX_BOOTSTRAP_SNAPSHOTS: usize = 500;

pub struct MarketFeed {
    http: Client,
    tx: broadcast::Sender<Command>,
    assets: Vec<String>,
    interval: Duration,
    fx_rate: f64,
    history_path: PathBuf,
}

impl MarketFeed {
    pub fn new(
        assets: Vec<String>,
        interval: Duration,
        fx_fallback: f64,
        history_path: PathBuf,
        tx: broadcast::Sender<Command>,
    ) -> Result<MarketFeed> {
        Ok(MarketFeed {
            http: build_http_client()?,
            tx,
            assets,
            interval,
            fx_rate: fx_fallback.max(0.0),
            history_path,
        })
    }

    pub async fn run(mut self) -> Result<()> {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            match self.fetch_cycle().await {
                Ok(snapshot) => {
                    if let Err(err) = append_history(&self.history_path, &snapshot) {
                        let _ = self.tx.send(Command::Error(
                            ErrorSource::Feed,
                            format!("failed to record snapshot: {err}"),
                        ));
                    }
                    if self.tx.send(Command::Snapshot(snapshot)).is_err() {
                        // every receiver is gone, the dashboard has exited
                        return Ok(());
                    }
                }
                Err(err) => {
                    let _ = self.tx.send(Command::Error(
                        ErrorSource::Feed,
                        format!("market fetch error: {err}"),
                    ));
                }
            }
        }
    }

    async fn fetch_cycle(&mut self) -> Result<MarketSnapshot> {
        let ts = Utc::now().timestamp_millis();
        // a failed FX fetch silently reuses the last known rate
        if let Ok(rate) = self.fetch_fx_rate().await {
            if rate > 0.0 {
                self.fx_rate = rate;
            }
        }
        let mut assets = HashMap::new();
        for symbol in &self.assets {
            let price = self.fetch_bithumb_price(symbol).await.unwrap_or(0.0);
            let mut cross = HashMap::new();
            if let Some(pair) = binance_symbol(symbol) {
                if let Ok(px) = self.fetch_binance_price(&pair).await {
                    if px > 0.0 {
                        cross.insert(Exchange::Binance, px);
                    }
                }
            }
            if let Ok(px) = self.fetch_korbit_price(symbol).await {
                if px > 0.0 {
                    cross.insert(Exchange::Korbit, px);
                }
            }
            assets.insert(symbol.clone(), AssetQuote { price, cross });
        }
        if !assets.values().any(|quote| quote.price > 0.0) {
            return Err(anyhow!("no primary venue quote in this cycle"));
        }
        Ok(MarketSnapshot {
            ts,
            fx_rate: self.fx_rate,
            assets,
        })
    }

    async fn fetch_bithumb_price(&self, symbol: &str) -> Result<f64> {
        let url = format!("{BITHUMB_TICKER_ENDPOINT}/{symbol}_KRW");
        let response: BithumbTickerResponse = self
            .http
            .get(&url)
            .send()
            .await
            .with_context(|| format!("requesting bithumb ticker for {symbol}"))?
            .json()
            .await
            .with_context(|| format!("decoding bithumb ticker for {symbol}"))?;
        if response.status != "0000" {
            return Err(anyhow!(
                "bithumb ticker error for {symbol} (status {})",
                response.status
            ));
        }
        Ok(response
            .data
            .and_then(|data| data.closing_price.parse().ok())
            .unwrap_or(0.0))
    }

    async fn fetch_binance_price(&self, pair: &str) -> Result<f64> {
        let response: BinanceTickerResponse = self
            .http
            .get(BINANCE_TICKER_ENDPOINT)
            .query(&[("symbol", pair)])
            .send()
            .await
            .with_context(|| format!("requesting binance ticker for {pair}"))?
            .json()
            .await
            .with_context(|| format!("decoding binance ticker for {pair}"))?;
        Ok(response.price.parse().unwrap_or(0.0))
    }

    async fn fetch_korbit_price(&self, symbol: &str) -> Result<f64> {
        let pair = format!("{}_krw", symbol.to_lowercase());
        let response: KorbitTickerResponse = self
            .http
            .get(KORBIT_TICKER_ENDPOINT)
            .query(&[("currency_pair", pair.as_str())])
            .header("User-Agent", "Mozilla/5.0")
            .send()
            .await
            .with_context(|| format!("requesting korbit ticker for {symbol}"))?
            .json()
            .await
            .with_context(|| format!("decoding korbit ticker for {symbol}"))?;
        Ok(response.last.parse().unwrap_or(0.0))
    }

    async fn fetch_fx_rate(&self) -> Result<f64> {
        let response: FxResponse = self
            .http
            .get(FX_ENDPOINT)
            .query(&[("from", "USD"), ("to", "KRW")])
            .send()
            .await
            .context("requesting USD/KRW rate")?
            .json()
            .await
            .context("decoding USD/KRW rate")?;
        response
            .rates
            .get("KRW")
            .copied()
            .ok_or_else(|| anyhow!("USD/KRW rate missing from FX response"))
    }
}

/// USDT has no sensible Binance pair against itself; every other asset maps
/// to its USDT market.
fn binance_symbol(symbol: &str) -> Option<String> {
    if symbol == "USDT" {
        None
    } else {
        Some(format!("{symbol}USDT"))
    }
}

#[derive(Debug, Deserialize)]
struct BithumbTickerResponse {
    status: String,
    data: Option<BithumbTickerData>,
}

#[derive(Debug, Deserialize)]
struct BithumbTickerData {
    closing_price: String,
}

#[derive(Debug, Deserialize)]
struct BinanceTickerResponse {
    price: String,
}

#[derive(Debug, Deserialize)]
struct KorbitTickerResponse {
    last: String,
}

#[derive(Debug, Deserialize)]
struct FxResponse {
    rates: HashMap<String, f64>,
}

/// Load recorded snapshots so the dashboard starts with history instead of
/// an empty chart. Unreadable lines are skipped; ingestion drops anything
/// out of order anyway, but sorting here keeps the preload deterministic.
pub fn bootstrap_history(path: &Path) -> Result<Vec<MarketSnapshot>> {
    let file = match File::open(path) {
        Ok(file) => file,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(err) => return Err(err.into()),
    };
    let reader = BufReader::new(file);
    let mut snapshots = Vec::new();
    for line in reader.lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        if let Ok(payload) = serde_json::from_str::<SnapshotPayload>(&line) {
            if let Some(snapshot) = payload.normalize() {
                snapshots.push(snapshot);
            }
        }
    }
    snapshots.sort_by_key(|snapshot| snapshot.ts);
    if snapshots.len() > MAX_BOOTSTRAP_SNAPSHOTS {
        snapshots = snapshots.split_off(snapshots.len() - MAX_BOOTSTRAP_SNAPSHOTS);
    }
    Ok(snapshots)
}

fn append_history(path: &Path, snapshot: &MarketSnapshot) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    serde_json::to_writer(&mut file, snapshot)?;
    file.write_all(b"\n")?;
    Ok(())
}

fn build_http_client() -> Result<Client> {
    Ok(ClientBuilder::new()
        .connect_timeout(Duration::from_secs(5))
        .read_timeout(Duration::from_secs(10))
        .timeout(Duration::from_secs(20))
        .build()?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn binance_pairs_skip_usdt_itself() {
        assert_eq!(binance_symbol("BTC").as_deref(), Some("BTCUSDT"));
        assert_eq!(binance_symbol("USDT"), None);
    }

    #[test]
    fn ticker_responses_decode_from_live_shapes() {
        let bithumb: BithumbTickerResponse = serde_json::from_str(
            r#"{"status":"0000","data":{"closing_price":"95000000","opening_price":"94100000"}}"#,
        )
        .unwrap();
        assert_eq!(bithumb.data.unwrap().closing_price, "95000000");

        let binance: BinanceTickerResponse =
            serde_json::from_str(r#"{"symbol":"BTCUSDT","price":"68123.45"}"#).unwrap();
        assert_eq!(binance.price, "68123.45");

        let korbit: KorbitTickerResponse =
            serde_json::from_str(r#"{"timestamp":1700000000000,"last":"94800000"}"#).unwrap();
        assert_eq!(korbit.last, "94800000");

        let fx: FxResponse =
            serde_json::from_str(r#"{"amount":1.0,"base":"USD","rates":{"KRW":1320.55}}"#).unwrap();
        assert_eq!(fx.rates.get("KRW"), Some(&1320.55));
    }

    #[test]
    fn bootstrap_tolerates_garbage_lines() {
        let dir = std::env::temp_dir().join("kimp-term-feed-test");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("history.jsonl");
        std::fs::write(
            &path,
            concat!(
                "not json\n",
                r#"{"ts": 2, "fx_rate": 1300.0, "assets": {"BTC": {"price": 95000000.0}}}"#,
                "\n",
                r#"{"ts": 1, "fx_rate": 1300.0, "assets": {"BTC": {"price": 94000000.0}}}"#,
                "\n",
            ),
        )
        .unwrap();
        let snapshots = bootstrap_history(&path).unwrap();
        assert_eq!(snapshots.len(), 2);
        assert!(snapshots[0].ts < snapshots[1].ts);
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn bootstrap_of_a_missing_file_is_empty() {
        let path = std::env::temp_dir().join("kimp-term-no-such-history.jsonl");
        assert!(bootstrap_history(&path).unwrap().is_empty());
    }
}
