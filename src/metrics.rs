//! Figures derived from a series, its window, and the latest tick. All pure;
//! recomputed on every refresh rather than cached, since a window is at most
//! a few hundred points.

use crate::series::Tick;
use crate::snapshot::{Exchange, QuoteCurrency};
use crate::window::ViewWindow;

#[derive(Debug, Clone, Default)]
pub struct DerivedMetrics {
    /// Change from the first to the last visible point, in percent.
    pub percent_change: f64,
    /// Premium of the primary venue over each reporting reference venue.
    pub premiums: Vec<(Exchange, f64)>,
}

/// Percent change across the window. A non-positive first value yields 0
/// rather than dividing by it; that degenerate case is expected while a
/// series is still sparse.
pub fn percent_change_in_window(series: &[Tick], window: ViewWindow) -> f64 {
    let (Some(first), Some(last)) = (series.get(window.start), series.get(window.end)) else {
        return 0.0;
    };
    if first.value <= 0.0 {
        return 0.0;
    }
    (last.value - first.value) / first.value * 100.0
}

/// Premium of a local quote over a foreign quote, after converting the
/// foreign price into the local quote currency. Undefined without a positive
/// converted reference price, in which case 0 is returned.
pub fn premium(local_price: f64, foreign_price: f64, fx_rate: f64) -> f64 {
    let converted = foreign_price * fx_rate;
    if converted <= 0.0 {
        return 0.0;
    }
    (local_price - converted) / converted * 100.0
}

/// Conversion rate from a venue's quote currency into KRW for a given tick.
fn conversion_rate(exchange: Exchange, tick: &Tick) -> f64 {
    match exchange.quote() {
        QuoteCurrency::Krw => 1.0,
        QuoteCurrency::Usdt => tick.fx_rate,
    }
}

/// Assemble the per-render metrics for one asset. Venues that did not report
/// in the latest tick are left out of `premiums` entirely.
pub fn derive(series: &[Tick], window: ViewWindow, latest: &Tick) -> DerivedMetrics {
    let premiums = Exchange::CROSS
        .iter()
        .filter_map(|exchange| {
            let foreign = latest.cross_price(*exchange)?;
            let rate = conversion_rate(*exchange, latest);
            Some((*exchange, premium(latest.value, foreign, rate)))
        })
        .collect();
    DerivedMetrics {
        percent_change: percent_change_in_window(series, window),
        premiums,
    }
}
