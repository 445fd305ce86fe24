//! Bithumb private REST client: account balances and market-order
//! submission. Sized orders arrive over an mpsc channel; results and balance
//! updates go back out on the broadcast bus.

use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::Utc;
use hmac::{Hmac, Mac};
use rand::Rng;
use reqwest::{Client, ClientBuilder};
use serde::Deserialize;
use serde_json::{Value, json};
use sha2::{Digest, Sha256, Sha512};
use tokio::sync::{broadcast, mpsc};

use crate::command::{AccountBalances, Command, TradeRequest, TradeResponse, TradeSide, TradingCommand};
use crate::config::TradingConfig;
use crate::error_log::ErrorSource;

const BITHUMB_API_BASE: &str = "https://api.bithumb.com";
const BALANCE_REFRESH_INTERVAL: Duration = Duration::from_secs(30);

pub struct BithumbTrader {
    http: Client,
    config: TradingConfig,
    tx: broadcast::Sender<Command>,
}

impl BithumbTrader {
    pub fn new(config: TradingConfig, tx: broadcast::Sender<Command>) -> Result<BithumbTrader> {
        let http = ClientBuilder::new()
            .connect_timeout(Duration::from_secs(5))
            .read_timeout(Duration::from_secs(10))
            .timeout(Duration::from_secs(20))
            .build()?;
        Ok(BithumbTrader { http, config, tx })
    }

    pub async fn run(self, mut orders: mpsc::Receiver<TradingCommand>) -> Result<()> {
        let mut refresh = tokio::time::interval(BALANCE_REFRESH_INTERVAL);
        loop {
            tokio::select! {
                command = orders.recv() => match command {
                    Some(TradingCommand::Place(request)) => {
                        let response = match self.place_order(&request).await {
                            Ok(response) => response,
                            Err(err) => failed_response(&request, &err.to_string()),
                        };
                        let _ = self.tx.send(Command::TradeResult(response));
                        self.broadcast_balance().await;
                    }
                    Some(TradingCommand::RefreshBalance) => {
                        self.broadcast_balance().await;
                    }
                    None => break,
                },
                _ = refresh.tick() => {
                    self.broadcast_balance().await;
                }
            }
        }
        Ok(())
    }

    async fn broadcast_balance(&self) {
        match self.fetch_balance().await {
            Ok(balances) => {
                let _ = self.tx.send(Command::BalanceUpdate(balances));
            }
            Err(err) => {
                let _ = self.tx.send(Command::Error(
                    ErrorSource::Trader,
                    format!("balance fetch error: {err}"),
                ));
            }
        }
    }

    async fn fetch_balance(&self) -> Result<AccountBalances> {
        let token = build_jwt(&self.config.api_key, &self.config.api_secret, None)?;
        let entries: Vec<AccountEntry> = self
            .http
            .get(format!("{BITHUMB_API_BASE}/v1/accounts"))
            .header("Authorization", token)
            .send()
            .await
            .context("requesting account balances")?
            .error_for_status()
            .context("account balance response status")?
            .json()
            .await
            .context("decoding account balances")?;
        Ok(normalize_balances(&entries))
    }

    async fn place_order(&self, request: &TradeRequest) -> Result<TradeResponse> {
        let params = order_params(request);
        let query =
            serde_urlencoded::to_string(&params).context("encoding order parameters")?;
        let token = build_jwt(&self.config.api_key, &self.config.api_secret, Some(&query))?;
        let body: serde_json::Map<String, Value> = params
            .into_iter()
            .map(|(key, value)| (key.to_string(), Value::String(value)))
            .collect();
        let response: Value = self
            .http
            .post(format!("{BITHUMB_API_BASE}/v1/orders"))
            .header("Authorization", token)
            .json(&body)
            .send()
            .await
            .with_context(|| format!("submitting {} order for {}", request.side.label(), request.asset))?
            .json()
            .await
            .context("decoding order response")?;
        Ok(interpret_order_response(request, &response))
    }
}

/// Bithumb market orders: buys spend a KRW amount (`ord_type=price`), sells
/// submit an asset volume (`ord_type=market`).
fn order_params(request: &TradeRequest) -> Vec<(&'static str, String)> {
    let mut params = vec![
        ("market", format!("KRW-{}", request.asset)),
        ("side", request.side.as_bithumb_side().to_string()),
    ];
    match request.side {
        TradeSide::Buy => {
            params.push(("ord_type", "price".to_string()));
            params.push(("price", format!("{:.0}", request.fiat_amount)));
        }
        TradeSide::Sell => {
            params.push(("ord_type", "market".to_string()));
            params.push(("volume", format_volume(request.quantity)));
        }
    }
    params
}

fn interpret_order_response(request: &TradeRequest, response: &Value) -> TradeResponse {
    if let Some(error) = response.get("error") {
        let message = error
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or("order rejected")
            .to_string();
        return failed_response(request, &message);
    }
    let order_id = response.get("uuid").and_then(Value::as_str).map(str::to_string);
    TradeResponse {
        asset: request.asset.clone(),
        side: request.side,
        fiat_amount: request.fiat_amount,
        quantity: request.quantity,
        message: format!(
            "{} {} order accepted",
            request.asset,
            request.side.label()
        ),
        success: true,
        order_id,
    }
}

fn failed_response(request: &TradeRequest, message: &str) -> TradeResponse {
    TradeResponse {
        asset: request.asset.clone(),
        side: request.side,
        fiat_amount: request.fiat_amount,
        quantity: request.quantity,
        order_id: None,
        message: format!("order failed: {message}"),
        success: false,
    }
}

#[derive(Debug, Deserialize)]
struct AccountEntry {
    currency: String,
    balance: String,
    #[serde(default)]
    locked: String,
}

fn normalize_balances(entries: &[AccountEntry]) -> AccountBalances {
    let mut balances = AccountBalances::default();
    for entry in entries {
        let total: f64 = entry.balance.parse().unwrap_or(0.0);
        let locked: f64 = entry.locked.parse().unwrap_or(0.0);
        let available = (total - locked).max(0.0);
        if available > 0.0 || entry.currency == "KRW" {
            balances
                .available
                .insert(entry.currency.to_uppercase(), available);
        }
    }
    balances
}

/// Authorization token for the Bithumb v1 API: a compact HS256 JWT whose
/// payload carries the access key, a one-shot nonce, a millisecond
/// timestamp, and (for requests with parameters) the SHA-512 hex digest of
/// the urlencoded query.
fn build_jwt(api_key: &str, api_secret: &str, query: Option<&str>) -> Result<String> {
    let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"HS256","typ":"JWT"}"#);
    let mut payload = json!({
        "access_key": api_key,
        "nonce": nonce(),
        "timestamp": Utc::now().timestamp_millis(),
    });
    if let Some(query) = query {
        let mut hasher = Sha512::new();
        hasher.update(query.as_bytes());
        payload["query_hash"] = json!(hex_digest(&hasher.finalize()));
        payload["query_hash_alg"] = json!("SHA512");
    }
    let payload = URL_SAFE_NO_PAD.encode(serde_json::to_string(&payload)?.as_bytes());
    let signing_input = format!("{header}.{payload}");
    let mut mac = Hmac::<Sha256>::new_from_slice(api_secret.as_bytes())
        .map_err(|_| anyhow!("api secret unusable as HMAC key"))?;
    mac.update(signing_input.as_bytes());
    let signature = URL_SAFE_NO_PAD.encode(mac.finalize().into_bytes());
    Ok(format!("Bearer {signing_input}.{signature}"))
}

fn nonce() -> String {
    let mut rng = rand::rng();
    format!("{:032x}", rng.random::<u128>())
}

fn hex_digest(bytes: &[u8]) -> String {
    bytes.iter().map(|byte| format!("{byte:02x}")).collect()
}

/// Volumes go out with eight decimals, trailing zeros trimmed, so tiny
/// quantities never serialize in scientific notation.
fn format_volume(quantity: f64) -> String {
    let formatted = format!("{quantity:.8}");
    let trimmed = formatted.trim_end_matches('0').trim_end_matches('.');
    if trimmed.is_empty() {
        "0".to_string()
    } else {
        trimmed.to_string()
    }
}
