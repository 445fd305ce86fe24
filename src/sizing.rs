//! Order sizing: fiat amount in, estimated asset quantity out, validated
//! against the live balance for sells. Pure calculation; submission happens
//! elsewhere.

use std::fmt;

use crate::command::{AccountBalances, TradeSide};
use crate::series::Tick;
use crate::snapshot::Exchange;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InfeasibleReason {
    PriceUnavailable,
    InsufficientBalance,
}

impl InfeasibleReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            InfeasibleReason::PriceUnavailable => "price unavailable",
            InfeasibleReason::InsufficientBalance => "insufficient balance",
        }
    }
}

impl fmt::Display for InfeasibleReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TradeSizingResult {
    pub estimated_quantity: f64,
    pub feasible: bool,
    pub reason: Option<InfeasibleReason>,
}

impl TradeSizingResult {
    fn feasible(quantity: f64) -> Self {
        TradeSizingResult {
            estimated_quantity: quantity,
            feasible: true,
            reason: None,
        }
    }

    fn infeasible(reason: InfeasibleReason) -> Self {
        TradeSizingResult {
            estimated_quantity: 0.0,
            feasible: false,
            reason: Some(reason),
        }
    }
}

/// Price of an asset on the selected venue, in that venue's quote currency.
/// The primary venue prices come from the tick itself; reference venues from
/// its cross map.
pub fn quote_price(tick: &Tick, exchange: Exchange) -> Option<f64> {
    match exchange {
        Exchange::Bithumb => Some(tick.value).filter(|px| *px > 0.0),
        other => tick.cross_price(other),
    }
}

/// Size an order: `fiat_amount` of the venue's quote currency at `price`.
/// A missing or non-positive price blocks the order outright rather than
/// sizing it to zero quietly; sells additionally require the resulting
/// quantity to fit in the available balance.
pub fn size_order(
    fiat_amount: f64,
    price: Option<f64>,
    side: TradeSide,
    available_balance: f64,
) -> TradeSizingResult {
    let Some(price) = price.filter(|px| px.is_finite() && *px > 0.0) else {
        return TradeSizingResult::infeasible(InfeasibleReason::PriceUnavailable);
    };
    let quantity = fiat_amount / price;
    if side == TradeSide::Sell && quantity > available_balance {
        return TradeSizingResult::infeasible(InfeasibleReason::InsufficientBalance);
    }
    TradeSizingResult::feasible(quantity)
}

/// Assets eligible for the sell side: strictly positive balance, catalog
/// order preserved. Buys are unrestricted, so there is no buy counterpart.
pub fn sellable_assets(catalog: &[String], balances: &AccountBalances) -> Vec<(String, f64)> {
    catalog
        .iter()
        .filter_map(|symbol| {
            let held = balances.available_for(symbol);
            if held > 0.0 {
                Some((symbol.clone(), held))
            } else {
                None
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    #[test]
    fn buy_sizing_divides_fiat_by_price() {
        let result = size_order(10_000.0, Some(95_000_000.0), TradeSide::Buy, 0.0);
        assert!(result.feasible);
        assert!((result.estimated_quantity - 10_000.0 / 95_000_000.0).abs() < 1e-15);
        assert_eq!(result.reason, None);
    }

    #[test]
    fn unavailable_price_blocks_the_order() {
        for price in [None, Some(0.0), Some(-1.0), Some(f64::NAN)] {
            let result = size_order(10_000.0, price, TradeSide::Buy, 0.0);
            assert!(!result.feasible);
            assert_eq!(result.estimated_quantity, 0.0);
            assert_eq!(result.reason.unwrap().as_str(), "price unavailable");
        }
    }

    #[test]
    fn sell_exceeding_balance_is_infeasible() {
        // requesting 2.0 worth with 1.5 on hand
        let result = size_order(200.0, Some(100.0), TradeSide::Sell, 1.5);
        assert!(!result.feasible);
        assert_eq!(result.estimated_quantity, 0.0);
        assert_eq!(result.reason.unwrap().as_str(), "insufficient balance");
    }

    #[test]
    fn sell_within_balance_passes() {
        let result = size_order(100.0, Some(100.0), TradeSide::Sell, 1.5);
        assert!(result.feasible);
        assert_eq!(result.estimated_quantity, 1.0);
    }

    #[test]
    fn buys_ignore_the_asset_balance() {
        let result = size_order(1_000_000.0, Some(100.0), TradeSide::Buy, 0.0);
        assert!(result.feasible);
    }

    #[test]
    fn sellable_assets_keeps_only_positive_holdings() {
        let catalog = vec!["BTC".to_string(), "ETH".to_string(), "XRP".to_string()];
        let balances = AccountBalances {
            available: HashMap::from([
                ("BTC".to_string(), 0.5),
                ("ETH".to_string(), 0.0),
                ("KRW".to_string(), 1_000_000.0),
            ]),
        };
        let sellable = sellable_assets(&catalog, &balances);
        assert_eq!(sellable, vec![("BTC".to_string(), 0.5)]);
    }

    #[test]
    fn quote_price_selects_the_requested_venue() {
        let mut tick = Tick {
            ts: 0,
            value: 95_000_000.0,
            cross: HashMap::new(),
            fx_rate: 1_300.0,
        };
        tick.cross.insert(Exchange::Binance, 68_000.0);
        assert_eq!(quote_price(&tick, Exchange::Bithumb), Some(95_000_000.0));
        assert_eq!(quote_price(&tick, Exchange::Binance), Some(68_000.0));
        assert_eq!(quote_price(&tick, Exchange::Korbit), None);
    }
}
