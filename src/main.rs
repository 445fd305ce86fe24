mod command;
mod config;
mod error_log;
mod feed;
mod metrics;
mod monitor;
mod series;
mod sizing;
mod snapshot;
mod trade_log;
mod trader;
mod tui;
mod window;

use anyhow::anyhow;
use clap::Parser;
use tokio::task;

use crate::command::Command;
use crate::error_log::ErrorSource;
use crate::feed::MarketFeed;
use crate::trader::BithumbTrader;
use crate::tui::TuiApp;

#[tokio::main]
async fn main() -> Result<(), anyhow::Error> {
    let param = config::CliParams::parse();
    use tokio::sync::{broadcast, mpsc};

    let timezone = param
        .configured_timezone()
        .map_err(|err| anyhow!(err))?;
    let catalog = param.catalog();
    let (tx, mut rx) = broadcast::channel::<Command>(64);

    let history = match feed::bootstrap_history(&param.history_file) {
        Ok(snapshots) => snapshots,
        Err(err) => {
            let _ = tx.send(Command::Error(
                ErrorSource::Feed,
                format!("history bootstrap error: {err}"),
            ));
            Vec::new()
        }
    };

    let feed = MarketFeed::new(
        catalog.clone(),
        param.poll_interval(),
        param.fx_fallback,
        param.history_file.clone(),
        tx.clone(),
    )?;
    let feed_error_tx = tx.clone();
    task::spawn(async move {
        if let Err(err) = feed.run().await {
            let _ = feed_error_tx.send(Command::Error(
                ErrorSource::Feed,
                format!("market feed error: {err}"),
            ));
        }
    });

    let bands = param.alert_map();
    if !bands.is_empty() {
        let mtx = tx.clone();
        let mrx = tx.subscribe();
        let monitor_error_tx = tx.clone();
        task::spawn(async move {
            let mut monitor = monitor::Monitor::new(bands, mtx, mrx);
            if let Err(err) = monitor.run().await {
                let _ = monitor_error_tx.send(Command::Error(
                    ErrorSource::Monitor,
                    format!("monitor error: {err}"),
                ));
            }
        });
    }

    let order_tx = match param.trading_config() {
        Some(trading) => {
            let (order_tx, order_rx) = mpsc::channel(8);
            let trader = BithumbTrader::new(trading, tx.clone())?;
            let trader_error_tx = tx.clone();
            task::spawn(async move {
                if let Err(err) = trader.run(order_rx).await {
                    let _ = trader_error_tx.send(Command::Error(
                        ErrorSource::Trader,
                        format!("trader error: {err}"),
                    ));
                }
            });
            Some(order_tx)
        }
        None => None,
    };

    let mut app = TuiApp::new(&catalog, order_tx, timezone);
    if !history.is_empty() {
        app.preload_history(&history);
    }
    app.preload_trade_logs();
    let app_result = tokio::select! {
        result = app.run(&mut rx) => result,
        _ = tokio::signal::ctrl_c() => Ok(()),
    };
    let _ = tx.send(Command::Exit);
    app.dispose();
    app_result.map_err(|err| anyhow!(err.to_string()))?;
    Ok(())
}
