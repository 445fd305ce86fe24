use std::collections::HashMap;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use chrono::TimeZone;
use chrono_tz::Tz;
use clap::Parser;

use crate::snapshot::DEFAULT_ASSETS;

#[derive(Parser, Clone, Debug)]
pub struct CliParams {
    /// Asset symbols to track; comma separated or pass multiple times
    #[clap(
        short = 'a',
        long = "asset",
        value_delimiter = ',',
        num_args = 1..,
    )]
    pub assets: Vec<String>,

    /// Market poll cadence (e.g., 5s, 30s, 1m)
    #[clap(long = "interval", value_name = "DURATION", default_value = "5s")]
    pub interval: DurationSpec,

    /// Per-asset Binance premium alert bands in format ASSET:LOW:HIGH
    #[clap(long = "alert", value_name = "ASSET:LOW:HIGH")]
    pub alerts: Vec<AlertSpec>,

    /// Bithumb API key used for balances and order submission
    #[clap(long = "bithumb-api-key", env = "BITHUMB_API_KEY")]
    pub bithumb_api_key: Option<String>,

    /// Bithumb API secret used for balances and order submission
    #[clap(long = "bithumb-api-secret", env = "BITHUMB_API_SECRET")]
    pub bithumb_api_secret: Option<String>,

    /// IANA timezone for axis and log timestamps
    #[clap(long = "timezone", default_value = "Asia/Seoul")]
    pub timezone: String,

    /// USD/KRW rate assumed until the first successful FX fetch
    #[clap(long = "fx-fallback", value_name = "RATE", default_value_t = 0.0)]
    pub fx_fallback: f64,

    /// JSONL file the feed records snapshots to and preloads history from
    #[clap(long = "history-file", default_value = "market_history.jsonl")]
    pub history_file: PathBuf,
}

impl CliParams {
    pub fn catalog(&self) -> Vec<String> {
        let assets: Vec<String> = self
            .assets
            .iter()
            .map(|symbol| symbol.trim().to_uppercase())
            .filter(|symbol| !symbol.is_empty())
            .collect();
        if assets.is_empty() {
            DEFAULT_ASSETS.iter().map(|s| s.to_string()).collect()
        } else {
            assets
        }
    }

    pub fn alert_map(&self) -> HashMap<String, (f64, f64)> {
        let mut map = HashMap::new();
        for spec in &self.alerts {
            map.insert(spec.asset.clone(), (spec.low, spec.high));
        }
        map
    }

    pub fn poll_interval(&self) -> Duration {
        self.interval.as_duration()
    }

    pub fn trading_config(&self) -> Option<TradingConfig> {
        let api_key = self.bithumb_api_key.as_ref()?.trim();
        let api_secret = self.bithumb_api_secret.as_ref()?.trim();
        if api_key.is_empty() || api_secret.is_empty() {
            return None;
        }
        Some(TradingConfig {
            api_key: api_key.to_string(),
            api_secret: api_secret.to_string(),
        })
    }

    pub fn configured_timezone(&self) -> Result<ConfiguredTimeZone, String> {
        ConfiguredTimeZone::from_name(&self.timezone)
    }
}

#[derive(Clone, Debug)]
pub struct AlertSpec {
    pub asset: String,
    pub low: f64,
    pub high: f64,
}

impl FromStr for AlertSpec {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.split(':').map(str::trim).collect();
        let [asset, low, high] = parts.as_slice() else {
            return Err(format!("alert spec must look like ASSET:LOW:HIGH, got `{s}`"));
        };
        if asset.is_empty() {
            return Err("alert spec asset cannot be empty".to_string());
        }
        let parse_bound = |label: &str, raw: &str| {
            raw.parse::<f64>()
                .map_err(|_| format!("invalid {label} premium bound: {raw}"))
        };
        let low = parse_bound("low", low)?;
        let high = parse_bound("high", high)?;
        if low > high {
            return Err(format!("alert bounds are inverted: {low} > {high}"));
        }
        Ok(AlertSpec {
            asset: asset.to_uppercase(),
            low,
            high,
        })
    }
}

#[derive(Copy, Clone, Debug)]
pub struct DurationSpec(Duration);

impl DurationSpec {
    pub fn as_duration(&self) -> Duration {
        self.0
    }
}

impl FromStr for DurationSpec {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let duration = parse_duration_spec(s)?;
        Ok(DurationSpec(duration))
    }
}

// Longest suffixes first so `5mins` matches `mins` before `s` gets a chance.
const DURATION_UNITS: &[(&str, f64)] = &[
    ("seconds", 1.0),
    ("minutes", 60.0),
    ("second", 1.0),
    ("minute", 60.0),
    ("hours", 3600.0),
    ("secs", 1.0),
    ("mins", 60.0),
    ("hour", 3600.0),
    ("sec", 1.0),
    ("min", 60.0),
    ("hrs", 3600.0),
    ("hr", 3600.0),
    ("s", 1.0),
    ("m", 60.0),
    ("h", 3600.0),
];

fn parse_duration_spec(input: &str) -> Result<Duration, String> {
    let spec = input.trim().to_lowercase();
    if spec.is_empty() {
        return Err("duration spec cannot be empty (examples: 5s, 30s, 1m)".to_string());
    }
    let (number, factor) = DURATION_UNITS
        .iter()
        .find_map(|(suffix, factor)| Some((spec.strip_suffix(suffix)?.trim_end(), *factor)))
        .ok_or_else(|| format!("duration spec `{spec}` must end with a unit like s, m, or h"))?;
    let value: f64 = number
        .parse()
        .map_err(|_| format!("invalid numeric portion `{number}` in duration spec `{spec}`"))?;
    let seconds = value * factor;
    if !seconds.is_finite() || seconds <= 0.0 {
        return Err(format!("duration must be positive: `{spec}`"));
    }
    Ok(Duration::from_secs_f64(seconds))
}

#[derive(Clone, Debug)]
pub struct TradingConfig {
    pub api_key: String,
    pub api_secret: String,
}

/// Timezone used for every user-facing timestamp. Market data itself stays
/// in epoch milliseconds.
#[derive(Copy, Clone, Debug)]
pub struct ConfiguredTimeZone {
    tz: Tz,
}

impl ConfiguredTimeZone {
    pub fn from_name(name: &str) -> Result<Self, String> {
        let tz: Tz = name
            .trim()
            .parse()
            .map_err(|_| format!("unknown timezone `{}`", name.trim()))?;
        Ok(ConfiguredTimeZone { tz })
    }

    pub fn format_timestamp(&self, timestamp_ms: i64, fmt: &str) -> Option<String> {
        self.tz
            .timestamp_millis_opt(timestamp_ms)
            .single()
            .map(|dt| dt.format(fmt).to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duration_spec_parses_common_forms() {
        assert_eq!(
            "5s".parse::<DurationSpec>().unwrap().as_duration(),
            Duration::from_secs(5)
        );
        assert_eq!(
            "2m".parse::<DurationSpec>().unwrap().as_duration(),
            Duration::from_secs(120)
        );
        assert_eq!(
            "1.5h".parse::<DurationSpec>().unwrap().as_duration(),
            Duration::from_secs(5400)
        );
        assert!("".parse::<DurationSpec>().is_err());
        assert!("5x".parse::<DurationSpec>().is_err());
        assert!("-3s".parse::<DurationSpec>().is_err());
    }

    #[test]
    fn alert_spec_parses_and_validates() {
        let spec: AlertSpec = "btc:-1.5:4.0".parse().unwrap();
        assert_eq!(spec.asset, "BTC");
        assert_eq!(spec.low, -1.5);
        assert_eq!(spec.high, 4.0);
        assert!("BTC:4:1".parse::<AlertSpec>().is_err());
        assert!("BTC:1".parse::<AlertSpec>().is_err());
        assert!(":1:2".parse::<AlertSpec>().is_err());
    }

    #[test]
    fn timezone_parses_iana_names() {
        let tz = ConfiguredTimeZone::from_name("Asia/Seoul").unwrap();
        // 2024-03-01T00:00:00Z is 09:00 in Seoul
        assert_eq!(
            tz.format_timestamp(1_709_251_200_000, "%H:%M").unwrap(),
            "09:00"
        );
        assert!(ConfiguredTimeZone::from_name("Mars/Olympus").is_err());
    }
}
