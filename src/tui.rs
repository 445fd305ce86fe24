use std::collections::HashMap;
use std::io::stdout;
use std::time::{Duration, Instant};

use color_eyre::Result;
use crossterm::event::{
    self, DisableMouseCapture, EnableMouseCapture, Event, KeyCode, KeyEvent, KeyEventKind,
    KeyModifiers, MouseButton, MouseEvent, MouseEventKind,
};
use crossterm::execute;
use ratatui::Frame;
use ratatui::layout::{Alignment, Constraint, Direction, Layout, Rect};
use ratatui::style::{Color, Modifier, Style};
use ratatui::symbols;
use ratatui::text::{Line, Span};
use ratatui::widgets::{Axis, Block, Chart, Clear, Dataset, GraphType, Paragraph, Wrap};
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{broadcast, mpsc};
use unicode_width::{UnicodeWidthChar, UnicodeWidthStr};

use crate::command::{
    AccountBalances, Command, TradeRequest, TradeResponse, TradeSide, TradingCommand,
};
use crate::config::ConfiguredTimeZone;
use crate::error_log::{ErrorLogStore, ErrorSource};
use crate::metrics;
use crate::series::MarketHistory;
use crate::sizing::{self, TradeSizingResult};
use crate::snapshot::{Exchange, MarketSnapshot, coin_name};
use crate::trade_log::{TradeLogEntry, TradeLogStore};
use crate::window::ZoomDirection;

const COLOR_PALETTE: [Color; 8] = [
    Color::Yellow,
    Color::Cyan,
    Color::Magenta,
    Color::Green,
    Color::LightBlue,
    Color::LightMagenta,
    Color::Red,
    Color::LightCyan,
];
const MAX_TRADE_LOGS: usize = 500;
const MIN_ORDER_KRW: f64 = 5_000.0;
const SIDE_PANEL_WIDTH: u16 = 30;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum ViewMode {
    Chart,
    Trade,
}

/// Order-entry state for the trade view. The pick list depends on the side:
/// buys choose from the whole catalog, sells only from positive balances.
struct TradeState {
    side: TradeSide,
    selected_idx: usize,
    price_source: Exchange,
    amount: String,
    balances: AccountBalances,
    order_tx: Option<mpsc::Sender<TradingCommand>>,
    logs: Vec<TradeLogEntry>,
    store: TradeLogStore,
}

impl TradeState {
    fn new(order_tx: Option<mpsc::Sender<TradingCommand>>, store: TradeLogStore) -> TradeState {
        TradeState {
            side: TradeSide::Buy,
            selected_idx: 0,
            price_source: Exchange::Bithumb,
            amount: "10000".to_string(),
            balances: AccountBalances::default(),
            order_tx,
            logs: Vec::new(),
            store,
        }
    }

    fn pick_list(&self, catalog: &[String]) -> Vec<String> {
        match self.side {
            TradeSide::Buy => catalog.to_vec(),
            TradeSide::Sell => sizing::sellable_assets(catalog, &self.balances)
                .into_iter()
                .map(|(symbol, _)| symbol)
                .collect(),
        }
    }

    fn selected_asset(&self, catalog: &[String]) -> Option<String> {
        let list = self.pick_list(catalog);
        list.get(self.selected_idx.min(list.len().saturating_sub(1)))
            .cloned()
    }

    fn set_side(&mut self, side: TradeSide) {
        if self.side != side {
            self.side = side;
            self.selected_idx = 0;
        }
    }

    fn cycle_price_source(&mut self) {
        self.price_source = match self.price_source {
            Exchange::Bithumb => Exchange::Binance,
            Exchange::Binance => Exchange::Korbit,
            Exchange::Korbit => Exchange::Bithumb,
        };
    }

    fn amount_value(&self) -> Option<f64> {
        self.amount.parse::<f64>().ok().filter(|v| *v > 0.0)
    }

    fn push_amount_char(&mut self, c: char) {
        if c.is_ascii_digit() || (c == '.' && !self.amount.contains('.')) {
            if self.amount.len() < 12 {
                self.amount.push(c);
            }
        }
    }

    fn pop_amount_char(&mut self) {
        self.amount.pop();
    }

    fn load_persisted_logs(&mut self) -> anyhow::Result<()> {
        self.logs = self.store.load()?;
        Ok(())
    }

    fn record_result(&mut self, response: TradeResponse) -> anyhow::Result<()> {
        let entry = TradeLogEntry::record(response);
        self.store.append(&entry)?;
        self.logs.push(entry);
        if self.logs.len() > MAX_TRADE_LOGS {
            let overflow = self.logs.len() - MAX_TRADE_LOGS;
            self.logs.drain(..overflow);
        }
        Ok(())
    }
}

pub struct TuiApp {
    catalog: Vec<String>,
    colors: HashMap<String, Color>,
    history: MarketHistory,
    selected_asset: usize,
    view_mode: ViewMode,
    chart_area: Option<Rect>,
    fx_rate: f64,
    last_snapshot_ts: Option<i64>,
    status_message: Option<String>,
    status_visible_until: Option<Instant>,
    status_is_error: bool,
    last_draw: Instant,
    min_redraw_gap: Duration,
    trade: TradeState,
    exit_confirmation: bool,
    timezone: ConfiguredTimeZone,
    error_store: ErrorLogStore,
}

impl TuiApp {
    fn is_exit_key(key: &KeyEvent) -> bool {
        matches!(key.code, KeyCode::Char('q') | KeyCode::Char('Q'))
            || (key.code == KeyCode::Char('c') && key.modifiers.contains(KeyModifiers::CONTROL))
    }

    pub fn new(
        catalog: &[String],
        order_tx: Option<mpsc::Sender<TradingCommand>>,
        timezone: ConfiguredTimeZone,
    ) -> TuiApp {
        let min_redraw_gap = Duration::from_millis(100);
        let mut colors = HashMap::new();
        for (idx, symbol) in catalog.iter().enumerate() {
            colors.insert(symbol.clone(), COLOR_PALETTE[idx % COLOR_PALETTE.len()]);
        }
        TuiApp {
            catalog: catalog.to_vec(),
            colors,
            history: MarketHistory::new(catalog),
            selected_asset: 0,
            view_mode: ViewMode::Chart,
            chart_area: None,
            fx_rate: 0.0,
            last_snapshot_ts: None,
            status_message: None,
            status_visible_until: None,
            status_is_error: false,
            last_draw: Instant::now() - min_redraw_gap,
            min_redraw_gap,
            trade: TradeState::new(order_tx, TradeLogStore::new(TradeLogStore::default_path())),
            exit_confirmation: false,
            timezone,
            error_store: ErrorLogStore::new(ErrorLogStore::default_path()),
        }
    }

    pub fn preload_history(&mut self, snapshots: &[MarketSnapshot]) {
        let mut appended = 0;
        for snapshot in snapshots {
            appended += self.history.ingest(snapshot);
            if snapshot.fx_rate > 0.0 {
                self.fx_rate = snapshot.fx_rate;
            }
            self.last_snapshot_ts = Some(snapshot.ts);
        }
        if appended > 0 {
            self.set_status_message(format!("Loaded {appended} historical points"));
        }
    }

    pub fn preload_trade_logs(&mut self) {
        if let Err(err) = self.trade.load_persisted_logs() {
            self.set_error_status_message(format!("failed to load order history: {err}"));
        }
    }

    pub fn dispose(&self) {
        let _ = execute!(stdout(), DisableMouseCapture);
        ratatui::restore();
    }

    pub async fn run(&mut self, rx: &mut broadcast::Receiver<Command>) -> Result<()> {
        color_eyre::install()?;
        let mut terminal = ratatui::init();
        execute!(stdout(), EnableMouseCapture)?;
        let mut input_tick = tokio::time::interval(self.min_redraw_gap);
        terminal.draw(|frame| self.render(frame))?;
        self.last_draw = Instant::now();
        loop {
            tokio::select! {
                biased;
                _ = input_tick.tick() => {
                    let (exit, dirty) = self.poll_input()?;
                    if exit {
                        return Ok(());
                    }
                    // the tick itself paces input redraws, no extra throttle
                    if dirty {
                        terminal.draw(|frame| self.render(frame))?;
                        self.last_draw = Instant::now();
                    }
                }
                result = rx.recv() => {
                    match result {
                        Ok(Command::Snapshot(snapshot)) => {
                            self.clear_status_if_allowed();
                            self.on_snapshot(&snapshot);
                            if self.last_draw.elapsed() >= self.min_redraw_gap {
                                terminal.draw(|frame| self.render(frame))?;
                                self.last_draw = Instant::now();
                            }
                        }
                        Ok(Command::Notify(asset, message)) => {
                            self.set_status_message(format!("{asset}: {message}"));
                            terminal.draw(|frame| self.render(frame))?;
                            self.last_draw = Instant::now();
                        }
                        Ok(Command::Error(source, message)) => {
                            let _ = self.error_store.append_message(source, &message);
                            self.set_error_status_message(message);
                            terminal.draw(|frame| self.render(frame))?;
                            self.last_draw = Instant::now();
                        }
                        Ok(Command::TradeResult(response)) => {
                            let message = response.message.clone();
                            let success = response.success;
                            if let Err(err) = self.trade.record_result(response) {
                                let _ = self.error_store.append_message(
                                    ErrorSource::Ui,
                                    format!("failed to record order log: {err}"),
                                );
                            }
                            if success {
                                self.set_status_message(message);
                            } else {
                                self.set_error_status_message(message);
                            }
                            terminal.draw(|frame| self.render(frame))?;
                            self.last_draw = Instant::now();
                        }
                        Ok(Command::BalanceUpdate(balances)) => {
                            self.trade.balances = balances;
                            terminal.draw(|frame| self.render(frame))?;
                            self.last_draw = Instant::now();
                        }
                        Ok(Command::Exit) => return Ok(()),
                        Err(broadcast::error::RecvError::Closed) => break,
                        Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    }
                }
            }
        }
        Ok(())
    }

    /// A snapshot touches the series, which in turn rebases each asset's
    /// window before any further input is processed.
    fn on_snapshot(&mut self, snapshot: &MarketSnapshot) {
        if snapshot.fx_rate > 0.0 {
            self.fx_rate = snapshot.fx_rate;
        }
        self.last_snapshot_ts = Some(snapshot.ts);
        self.history.ingest(snapshot);
        for symbol in self.history.symbols() {
            if !self.colors.contains_key(symbol) {
                let idx = self.colors.len();
                self.colors
                    .insert(symbol.clone(), COLOR_PALETTE[idx % COLOR_PALETTE.len()]);
            }
        }
    }

    fn set_status_message(&mut self, message: impl Into<String>) {
        self.status_message = Some(message.into());
        self.status_visible_until = Some(Instant::now() + Duration::from_secs(3));
        self.status_is_error = false;
    }

    fn set_error_status_message(&mut self, message: impl Into<String>) {
        self.status_message = Some(message.into());
        self.status_visible_until = Some(Instant::now() + Duration::from_secs(5));
        self.status_is_error = true;
    }

    fn clear_status_if_allowed(&mut self) {
        if let Some(visible_until) = self.status_visible_until {
            if Instant::now() < visible_until {
                return;
            }
        }
        self.status_message = None;
        self.status_visible_until = None;
        self.status_is_error = false;
    }

    fn selected_symbol(&self) -> Option<String> {
        self.history
            .symbols()
            .get(self.selected_asset)
            .cloned()
    }

    fn poll_input(&mut self) -> Result<(bool, bool)> {
        let mut dirty = false;
        while event::poll(Duration::from_millis(0))? {
            match event::read()? {
                Event::Key(key) if key.kind == KeyEventKind::Press => {
                    let (exit, changed) = self.handle_key_event(key);
                    if exit {
                        return Ok((true, dirty));
                    }
                    dirty |= changed;
                }
                Event::Mouse(mouse) => {
                    dirty |= self.handle_mouse_event(mouse);
                }
                Event::Resize(_, _) => {
                    dirty = true;
                }
                _ => {}
            }
        }
        Ok((false, dirty))
    }

    fn handle_key_event(&mut self, key: KeyEvent) -> (bool, bool) {
        if self.exit_confirmation {
            return match key.code {
                KeyCode::Char('y') | KeyCode::Char('Y') | KeyCode::Enter => (true, false),
                _ => {
                    self.exit_confirmation = false;
                    (false, true)
                }
            };
        }
        if Self::is_exit_key(&key) || key.code == KeyCode::Esc {
            self.exit_confirmation = true;
            return (false, true);
        }
        if key.code == KeyCode::Tab {
            self.view_mode = match self.view_mode {
                ViewMode::Chart => ViewMode::Trade,
                ViewMode::Trade => ViewMode::Chart,
            };
            return (false, true);
        }
        let changed = match self.view_mode {
            ViewMode::Chart => self.handle_chart_key(key),
            ViewMode::Trade => self.handle_trade_key(key),
        };
        (false, changed)
    }

    fn handle_chart_key(&mut self, key: KeyEvent) -> bool {
        match key.code {
            KeyCode::Up => {
                if self.selected_asset > 0 {
                    self.selected_asset -= 1;
                    return true;
                }
                false
            }
            KeyCode::Down => {
                let count = self.history.symbols().len();
                if count > 0 && self.selected_asset + 1 < count {
                    self.selected_asset += 1;
                    return true;
                }
                false
            }
            KeyCode::Left => self.pan_selected(1.0),
            KeyCode::Right => self.pan_selected(-1.0),
            KeyCode::Char('+') | KeyCode::Char('=') => self.zoom_selected(ZoomDirection::In),
            KeyCode::Char('-') => self.zoom_selected(ZoomDirection::Out),
            KeyCode::End => {
                let Some(symbol) = self.selected_symbol() else {
                    return false;
                };
                let Some(state) = self.history.state_mut(&symbol) else {
                    return false;
                };
                let len = state.series().len();
                state.window.jump_to_live_edge(len)
            }
            KeyCode::Delete | KeyCode::Char('x') => {
                let Some(symbol) = self.selected_symbol() else {
                    return false;
                };
                self.history.remove(&symbol);
                let count = self.history.symbols().len();
                if count > 0 && self.selected_asset >= count {
                    self.selected_asset = count - 1;
                }
                self.set_status_message(format!("{symbol} removed from the dashboard"));
                true
            }
            _ => false,
        }
    }

    /// Keyboard pans reuse the pointer-drag math with an eighth of the
    /// viewport as the step.
    fn pan_selected(&mut self, direction: f64) -> bool {
        let Some(area) = self.chart_area else {
            return false;
        };
        let viewport = area.width as f64;
        let Some(symbol) = self.selected_symbol() else {
            return false;
        };
        let Some(state) = self.history.state_mut(&symbol) else {
            return false;
        };
        let len = state.series().len();
        state.window.shift(direction * viewport / 8.0, viewport, len)
    }

    fn zoom_selected(&mut self, direction: ZoomDirection) -> bool {
        let Some(symbol) = self.selected_symbol() else {
            return false;
        };
        let Some(state) = self.history.state_mut(&symbol) else {
            return false;
        };
        let len = state.series().len();
        state.window.wheel(direction, len)
    }

    fn handle_trade_key(&mut self, key: KeyEvent) -> bool {
        match key.code {
            KeyCode::Char('b') | KeyCode::Char('B') => {
                self.trade.set_side(TradeSide::Buy);
                true
            }
            KeyCode::Char('s') | KeyCode::Char('S') => {
                self.trade.set_side(TradeSide::Sell);
                true
            }
            KeyCode::Char('e') | KeyCode::Char('E') => {
                self.trade.cycle_price_source();
                true
            }
            KeyCode::Char('r') | KeyCode::Char('R') => {
                self.request_balance_refresh();
                true
            }
            KeyCode::Up => {
                if self.trade.selected_idx > 0 {
                    self.trade.selected_idx -= 1;
                    return true;
                }
                false
            }
            KeyCode::Down => {
                let count = self.trade.pick_list(&self.catalog).len();
                if count > 0 && self.trade.selected_idx + 1 < count {
                    self.trade.selected_idx += 1;
                    return true;
                }
                false
            }
            KeyCode::Backspace => {
                self.trade.pop_amount_char();
                true
            }
            KeyCode::Enter => {
                self.submit_trade();
                true
            }
            KeyCode::Char(c) if c.is_ascii_digit() || c == '.' => {
                self.trade.push_amount_char(c);
                true
            }
            _ => false,
        }
    }

    fn handle_mouse_event(&mut self, mouse: MouseEvent) -> bool {
        if self.view_mode != ViewMode::Chart {
            return false;
        }
        let Some(area) = self.chart_area else {
            return false;
        };
        let inside = mouse.column >= area.x
            && mouse.column < area.x + area.width
            && mouse.row >= area.y
            && mouse.row < area.y + area.height;
        let Some(symbol) = self.selected_symbol() else {
            return false;
        };
        let Some(state) = self.history.state_mut(&symbol) else {
            return false;
        };
        let len = state.series().len();
        match mouse.kind {
            MouseEventKind::Down(MouseButton::Left) if inside => {
                state.window.drag_start(mouse.column as f64);
                false
            }
            MouseEventKind::Drag(MouseButton::Left) => {
                if inside {
                    state
                        .window
                        .drag_move(mouse.column as f64, area.width as f64, len)
                } else {
                    // leaving the chart cancels the drag with nothing pending
                    state.window.drag_end();
                    false
                }
            }
            MouseEventKind::Up(MouseButton::Left) => {
                state.window.drag_end();
                false
            }
            MouseEventKind::ScrollUp if inside => state.window.wheel(ZoomDirection::In, len),
            MouseEventKind::ScrollDown if inside => state.window.wheel(ZoomDirection::Out, len),
            _ => false,
        }
    }

    fn request_balance_refresh(&mut self) {
        let Some(order_tx) = self.trade.order_tx.clone() else {
            self.set_error_status_message("trading disabled: no API credentials configured");
            return;
        };
        match order_tx.try_send(TradingCommand::RefreshBalance) {
            Ok(()) => self.set_status_message("refreshing balances..."),
            Err(_) => self.set_error_status_message("trader is busy, try again"),
        }
    }

    fn sizing_preview(&self) -> Option<(String, f64, TradeSizingResult)> {
        let asset = self.trade.selected_asset(&self.catalog)?;
        let amount = self.trade.amount_value()?;
        let price = self
            .history
            .latest(&asset)
            .and_then(|tick| sizing::quote_price(tick, self.trade.price_source));
        let available = self.trade.balances.available_for(&asset);
        let result = sizing::size_order(amount, price, self.trade.side, available);
        Some((asset, amount, result))
    }

    fn submit_trade(&mut self) {
        let Some(order_tx) = self.trade.order_tx.clone() else {
            self.set_error_status_message("trading disabled: no API credentials configured");
            return;
        };
        if self.trade.price_source != Exchange::Bithumb {
            self.set_error_status_message("orders route to Bithumb; press e until it is the price source");
            return;
        }
        let Some((asset, amount, result)) = self.sizing_preview() else {
            self.set_error_status_message("enter an amount and pick an asset first");
            return;
        };
        if amount < MIN_ORDER_KRW {
            self.set_error_status_message(format!(
                "minimum order is {} KRW",
                group_thousands(MIN_ORDER_KRW)
            ));
            return;
        }
        if !result.feasible {
            let reason = result
                .reason
                .map(|r| r.as_str())
                .unwrap_or("not feasible");
            self.set_error_status_message(format!("order blocked: {reason}"));
            return;
        }
        let request = TradeRequest {
            asset: asset.clone(),
            side: self.trade.side,
            fiat_amount: amount,
            quantity: result.estimated_quantity,
        };
        match order_tx.try_send(TradingCommand::Place(request)) {
            Ok(()) => {
                self.set_status_message(format!(
                    "submitting {} {} for {} KRW",
                    self.trade.side.label(),
                    asset,
                    group_thousands(amount)
                ));
            }
            Err(TrySendError::Full(_)) => {
                self.set_error_status_message("an order is already in flight, try again");
            }
            Err(TrySendError::Closed(_)) => {
                self.set_error_status_message("trader task is gone; restart to trade");
            }
        }
    }

    fn render(&mut self, frame: &mut Frame) {
        match self.view_mode {
            ViewMode::Chart => self.render_chart_view(frame),
            ViewMode::Trade => self.render_trade_view(frame),
        }
        if self.exit_confirmation {
            self.render_exit_confirmation(frame);
        }
    }

    fn render_chart_view(&mut self, frame: &mut Frame) {
        let area = frame.area();
        let has_status = self.status_message.is_some() && area.height >= 6;
        let (main_area, status_area) = if has_status {
            let chunks = Layout::default()
                .direction(Direction::Vertical)
                .constraints([Constraint::Min(5), Constraint::Length(3)])
                .split(area);
            (chunks[0], Some(chunks[1]))
        } else {
            (area, None)
        };
        let columns = Layout::default()
            .direction(Direction::Horizontal)
            .constraints([Constraint::Min(20), Constraint::Length(SIDE_PANEL_WIDTH)])
            .split(main_area);
        self.chart_area = Some(columns[0]);
        self.render_chart(frame, columns[0]);
        self.render_side_panel(frame, columns[1]);
        if let Some(status_area) = status_area {
            self.render_status(frame, status_area);
        }
    }

    fn render_chart(&self, frame: &mut Frame, area: Rect) {
        let Some(symbol) = self.selected_symbol() else {
            self.render_chart_placeholder(frame, area, "no assets configured");
            return;
        };
        let color = self
            .colors
            .get(&symbol)
            .copied()
            .unwrap_or(Color::White);
        let Some((slice, window)) = self
            .history
            .state(&symbol)
            .and_then(|state| state.windowed())
        else {
            self.render_chart_placeholder(frame, area, "waiting for market data...");
            return;
        };
        let len = self
            .history
            .state(&symbol)
            .map(|state| state.series().len())
            .unwrap_or(0);
        let points: Vec<(f64, f64)> = slice.iter().map(|tick| (tick.ts as f64, tick.value)).collect();
        let (x_bounds, y_bounds) = axis_bounds(&points);
        let x_labels = vec![
            self.axis_time_label(x_bounds[0]),
            self.axis_time_label((x_bounds[0] + x_bounds[1]) / 2.0),
            self.axis_time_label(x_bounds[1]),
        ];
        let y_labels = vec![
            group_thousands(y_bounds[0]),
            group_thousands((y_bounds[0] + y_bounds[1]) / 2.0),
            group_thousands(y_bounds[1]),
        ];
        let live = window.at_live_edge(len);
        let title = format!(
            "{symbol}/KRW · {}..{} of {len}{}",
            window.start,
            window.end,
            if live { " · LIVE" } else { "" }
        );
        let datasets = vec![
            Dataset::default()
                .name(symbol.clone())
                .marker(symbols::Marker::Braille)
                .graph_type(GraphType::Line)
                .style(Style::default().fg(color))
                .data(&points),
        ];
        let chart = Chart::new(datasets)
            .block(Block::bordered().title(title))
            .x_axis(
                Axis::default()
                    .style(Style::default().fg(Color::Gray))
                    .bounds(x_bounds)
                    .labels(x_labels),
            )
            .y_axis(
                Axis::default()
                    .style(Style::default().fg(Color::Gray))
                    .bounds(y_bounds)
                    .labels(y_labels),
            );
        frame.render_widget(chart, area);
    }

    fn render_chart_placeholder(&self, frame: &mut Frame, area: Rect, message: &str) {
        let block = Block::bordered().title("Chart");
        let paragraph = Paragraph::new(message)
            .style(Style::default().fg(Color::DarkGray))
            .alignment(Alignment::Center)
            .block(block);
        frame.render_widget(paragraph, area);
    }

    fn render_side_panel(&self, frame: &mut Frame, area: Rect) {
        let mut lines = Vec::new();
        lines.push(Line::from(format!(
            "USD/KRW {}",
            if self.fx_rate > 0.0 {
                group_thousands(self.fx_rate)
            } else {
                "---".to_string()
            }
        )));
        lines.push(Line::from(format!(
            "updated {}",
            self.last_snapshot_ts
                .and_then(|ts| self.timezone.format_timestamp(ts, "%H:%M:%S"))
                .unwrap_or_else(|| "--:--:--".to_string())
        )));
        lines.push(Line::from(" "));
        for (idx, symbol) in self.history.symbols().iter().enumerate() {
            let color = self.colors.get(symbol).copied().unwrap_or(Color::White);
            let marker = if idx == self.selected_asset { "▶" } else { " " };
            let mut style = Style::default().fg(color);
            if idx == self.selected_asset {
                style = style.add_modifier(Modifier::BOLD);
            }
            let name = coin_name(symbol).unwrap_or("");
            lines.push(Line::from(vec![
                Span::raw(format!("{marker} ")),
                Span::styled(symbol.clone(), style),
                Span::raw(format!(" {name}")),
            ]));
            match self.history.state(symbol).and_then(|state| {
                let (slice, window) = state.windowed()?;
                let latest = state.latest()?;
                Some((metrics::derive(state.series(), window, latest), latest.value, slice.len()))
            }) {
                Some((derived, price, _)) => {
                    lines.push(Line::from(format!(
                        "   {} KRW  Δ{:+.2}%",
                        group_thousands(price),
                        derived.percent_change
                    )));
                    for (exchange, premium) in &derived.premiums {
                        lines.push(Line::from(format!(
                            "   vs {:<8}{:+.2}%",
                            exchange.label(),
                            premium
                        )));
                    }
                }
                None => {
                    lines.push(Line::from("   ---"));
                }
            }
        }
        lines.push(Line::from(" "));
        lines.push(Line::from(Span::styled(
            "drag pan · wheel zoom · End live",
            Style::default().fg(Color::DarkGray),
        )));
        lines.push(Line::from(Span::styled(
            "Tab trade · x remove · q quit",
            Style::default().fg(Color::DarkGray),
        )));
        let block = Block::bordered().title("Market");
        let paragraph = Paragraph::new(lines)
            .alignment(Alignment::Left)
            .block(block);
        frame.render_widget(paragraph, area);
    }

    fn render_trade_view(&mut self, frame: &mut Frame) {
        let area = frame.area();
        let has_status = self.status_message.is_some() && area.height >= 8;
        let (main_area, status_area) = if has_status {
            let chunks = Layout::default()
                .direction(Direction::Vertical)
                .constraints([Constraint::Min(5), Constraint::Length(3)])
                .split(area);
            (chunks[0], Some(chunks[1]))
        } else {
            (area, None)
        };
        let columns = Layout::default()
            .direction(Direction::Horizontal)
            .constraints([Constraint::Length(44), Constraint::Min(30)])
            .split(main_area);
        self.render_order_form(frame, columns[0]);
        self.render_order_log(frame, columns[1]);
        if let Some(status_area) = status_area {
            self.render_status(frame, status_area);
        }
    }

    fn render_order_form(&self, frame: &mut Frame, area: Rect) {
        let mut lines = Vec::new();
        let krw = self.trade.balances.available_for("KRW");
        lines.push(Line::from(format!("KRW available  {}", group_thousands(krw))));
        let holdings = sizing::sellable_assets(&self.catalog, &self.trade.balances);
        if holdings.is_empty() {
            lines.push(Line::from(Span::styled(
                "no coin holdings",
                Style::default().fg(Color::DarkGray),
            )));
        }
        for (symbol, held) in &holdings {
            lines.push(Line::from(format!("{symbol:<5} {}", trim_decimal(*held, 8))));
        }
        lines.push(Line::from(" "));
        let side_style = match self.trade.side {
            TradeSide::Buy => Style::default().fg(Color::Red).add_modifier(Modifier::BOLD),
            TradeSide::Sell => Style::default().fg(Color::Blue).add_modifier(Modifier::BOLD),
        };
        lines.push(Line::from(vec![
            Span::raw("side (b/s)      "),
            Span::styled(self.trade.side.label(), side_style),
        ]));
        lines.push(Line::from(format!(
            "price source (e) {} [{}]",
            self.trade.price_source.label(),
            self.trade.price_source.quote().code()
        )));
        lines.push(Line::from(" "));
        let pick_list = self.trade.pick_list(&self.catalog);
        if pick_list.is_empty() {
            lines.push(Line::from(Span::styled(
                "nothing to sell",
                Style::default().fg(Color::DarkGray),
            )));
        }
        for (idx, symbol) in pick_list.iter().enumerate() {
            let selected = idx == self.trade.selected_idx.min(pick_list.len() - 1);
            let marker = if selected { "▶" } else { " " };
            let style = if selected {
                Style::default().add_modifier(Modifier::BOLD)
            } else {
                Style::default()
            };
            let suffix = match self.trade.side {
                TradeSide::Sell => format!(
                    "  (bal {})",
                    trim_decimal(self.trade.balances.available_for(symbol), 8)
                ),
                TradeSide::Buy => String::new(),
            };
            lines.push(Line::from(vec![
                Span::raw(format!("{marker} ")),
                Span::styled(format!("{symbol}{suffix}"), style),
            ]));
        }
        lines.push(Line::from(" "));
        lines.push(Line::from(format!(
            "amount [{}]    {}_",
            self.trade.price_source.quote().code(),
            self.trade.amount
        )));
        match self.sizing_preview() {
            Some((asset, _, result)) if result.feasible => {
                lines.push(Line::from(format!(
                    "≈ {} {asset}",
                    trim_decimal(result.estimated_quantity, 8)
                )));
            }
            Some((_, _, result)) => {
                let reason = result.reason.map(|r| r.as_str()).unwrap_or("not feasible");
                lines.push(Line::from(Span::styled(
                    format!("blocked: {reason}"),
                    Style::default().fg(Color::Red),
                )));
            }
            None => {
                lines.push(Line::from(Span::styled(
                    "enter an amount",
                    Style::default().fg(Color::DarkGray),
                )));
            }
        }
        lines.push(Line::from(" "));
        lines.push(Line::from(Span::styled(
            "Enter submit · r refresh balance · Tab chart",
            Style::default().fg(Color::DarkGray),
        )));
        let block = Block::bordered().title("Order Entry");
        let paragraph = Paragraph::new(lines)
            .wrap(Wrap { trim: false })
            .block(block);
        frame.render_widget(paragraph, area);
    }

    fn render_order_log(&self, frame: &mut Frame, area: Rect) {
        let mut lines = Vec::new();
        lines.push(Line::from(Span::styled(
            format_columns(&[
                ("Time", ColumnAlign::Left, 8),
                ("Asset", ColumnAlign::Left, 5),
                ("Side", ColumnAlign::Left, 4),
                ("KRW", ColumnAlign::Right, 12),
                ("Qty", ColumnAlign::Right, 12),
                ("Result", ColumnAlign::Left, 18),
            ]),
            Style::default().add_modifier(Modifier::BOLD),
        )));
        let visible = area.height.saturating_sub(3) as usize;
        for entry in self.trade.logs.iter().rev().take(visible.max(1)) {
            let time = self
                .timezone
                .format_timestamp(entry.ts_ms, "%H:%M:%S")
                .unwrap_or_else(|| "--:--:--".to_string());
            let response = &entry.response;
            let row = format_columns(&[
                (time.as_str(), ColumnAlign::Left, 8),
                (response.asset.as_str(), ColumnAlign::Left, 5),
                (response.side.label(), ColumnAlign::Left, 4),
                (
                    group_thousands(response.fiat_amount).as_str(),
                    ColumnAlign::Right,
                    12,
                ),
                (
                    trim_decimal(response.quantity, 8).as_str(),
                    ColumnAlign::Right,
                    12,
                ),
                (response.message.as_str(), ColumnAlign::Left, 18),
            ]);
            let style = if response.success {
                Style::default()
            } else {
                Style::default().fg(Color::Red)
            };
            lines.push(Line::from(Span::styled(row, style)));
        }
        if self.trade.logs.is_empty() {
            lines.push(Line::from(Span::styled(
                "no orders recorded yet",
                Style::default().fg(Color::DarkGray),
            )));
        }
        let block = Block::bordered().title("Recent Orders");
        frame.render_widget(Paragraph::new(lines).block(block), area);
    }

    fn render_status(&self, frame: &mut Frame, area: Rect) {
        if let Some(message) = &self.status_message {
            let color = if self.status_is_error {
                Color::Red
            } else {
                Color::Yellow
            };
            let block = Block::bordered().title("Status");
            let status = Paragraph::new(message.as_str())
                .style(Style::default().fg(color))
                .alignment(Alignment::Left)
                .block(block);
            frame.render_widget(status, area);
        }
    }

    fn render_exit_confirmation(&self, frame: &mut Frame) {
        let area = frame.area();
        if area.width < 24 || area.height < 5 {
            return;
        }
        let popup_width = area.width.saturating_sub(20).min(44).max(28);
        let popup_height = 5;
        let left = area.x + (area.width.saturating_sub(popup_width)) / 2;
        let top = area.y + (area.height.saturating_sub(popup_height)) / 2;
        let popup = Rect::new(left, top, popup_width, popup_height);
        let lines = vec![
            Line::from(Span::styled(
                "Quit the dashboard?",
                Style::default().add_modifier(Modifier::BOLD),
            )),
            Line::from(" "),
            Line::from("y / Enter to quit, any other key to stay"),
        ];
        frame.render_widget(Clear, popup);
        let block = Block::bordered().title("Confirm");
        frame.render_widget(
            Paragraph::new(lines)
                .alignment(Alignment::Center)
                .block(block),
            popup,
        );
    }

    fn axis_time_label(&self, ts_ms: f64) -> String {
        if !ts_ms.is_finite() {
            return "--:--:--".to_string();
        }
        self.timezone
            .format_timestamp(ts_ms.round() as i64, "%H:%M:%S")
            .unwrap_or_else(|| "--:--:--".to_string())
    }
}

/// Axis bounds for the visible slice, padded so a flat series still spans a
/// drawable range.
fn axis_bounds(points: &[(f64, f64)]) -> ([f64; 2], [f64; 2]) {
    let (mut x_min, mut x_max) = (f64::INFINITY, f64::NEG_INFINITY);
    let (mut y_min, mut y_max) = (f64::INFINITY, f64::NEG_INFINITY);
    for (x, y) in points {
        x_min = x_min.min(*x);
        x_max = x_max.max(*x);
        y_min = y_min.min(*y);
        y_max = y_max.max(*y);
    }
    if !x_min.is_finite() || !x_max.is_finite() {
        return ([0.0, 1.0], [0.0, 1.0]);
    }
    if x_min == x_max {
        x_min -= 1_000.0;
        x_max += 1_000.0;
    }
    if y_min == y_max {
        let pad = (y_min.abs() * 0.001).max(1.0);
        y_min -= pad;
        y_max += pad;
    }
    ([x_min, x_max], [y_min, y_max])
}

/// Thousands-grouped rendering for KRW amounts; fractional digits are
/// dropped since KRW has none worth showing.
fn group_thousands(value: f64) -> String {
    if !value.is_finite() {
        return "---".to_string();
    }
    let negative = value < 0.0;
    let rounded = value.abs().round() as u64;
    let digits = rounded.to_string();
    let mut grouped = String::with_capacity(digits.len() + digits.len() / 3);
    for (idx, ch) in digits.chars().enumerate() {
        if idx > 0 && (digits.len() - idx) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(ch);
    }
    if negative {
        format!("-{grouped}")
    } else {
        grouped
    }
}

/// Fixed-precision float with trailing zeros trimmed.
fn trim_decimal(value: f64, precision: usize) -> String {
    let formatted = format!("{value:.precision$}");
    if !formatted.contains('.') {
        return formatted;
    }
    let trimmed = formatted.trim_end_matches('0').trim_end_matches('.');
    if trimmed.is_empty() || trimmed == "-" {
        "0".to_string()
    } else {
        trimmed.to_string()
    }
}

#[derive(Clone, Copy)]
enum ColumnAlign {
    Left,
    Right,
}

fn format_columns(columns: &[(&str, ColumnAlign, usize)]) -> String {
    let mut row = String::new();
    for (idx, (value, align, width)) in columns.iter().enumerate() {
        let clipped = clip_to_width(value, *width);
        let padded = pad_to_width(&clipped, *width, *align);
        row.push_str(&padded);
        if idx + 1 != columns.len() {
            row.push(' ');
        }
    }
    row
}

fn clip_to_width(value: &str, width: usize) -> String {
    if width == 0 {
        return String::new();
    }
    if UnicodeWidthStr::width(value) <= width {
        return value.to_string();
    }
    let mut result = String::new();
    let mut remaining = width.saturating_sub(1);
    for ch in value.chars() {
        let ch_width = UnicodeWidthChar::width(ch).unwrap_or(0);
        if ch_width > remaining {
            break;
        }
        result.push(ch);
        remaining = remaining.saturating_sub(ch_width);
    }
    result.push('…');
    result
}

fn pad_to_width(value: &str, width: usize, align: ColumnAlign) -> String {
    let current = UnicodeWidthStr::width(value);
    if current >= width {
        return value.to_string();
    }
    let padding = " ".repeat(width - current);
    match align {
        ColumnAlign::Left => format!("{value}{padding}"),
        ColumnAlign::Right => format!("{padding}{value}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn thousands_grouping() {
        assert_eq!(group_thousands(0.0), "0");
        assert_eq!(group_thousands(999.0), "999");
        assert_eq!(group_thousands(95_000_000.4), "95,000,000");
        assert_eq!(group_thousands(-1_234.0), "-1,234");
        assert_eq!(group_thousands(f64::NAN), "---");
    }

    #[test]
    fn decimal_trimming() {
        assert_eq!(trim_decimal(0.00010526, 8), "0.00010526");
        assert_eq!(trim_decimal(1.50000000, 8), "1.5");
        assert_eq!(trim_decimal(2.0, 8), "2");
        assert_eq!(trim_decimal(0.0, 8), "0");
    }

    #[test]
    fn axis_bounds_pad_degenerate_ranges() {
        let ([x0, x1], [y0, y1]) = axis_bounds(&[(1_000.0, 50.0)]);
        assert!(x0 < 1_000.0 && x1 > 1_000.0);
        assert!(y0 < 50.0 && y1 > 50.0);

        let (_, [y0, y1]) = axis_bounds(&[(0.0, 10.0), (1.0, 20.0)]);
        assert_eq!(y0, 10.0);
        assert_eq!(y1, 20.0);
    }

    #[test]
    fn column_formatting_clips_and_pads() {
        assert_eq!(pad_to_width("ab", 4, ColumnAlign::Left), "ab  ");
        assert_eq!(pad_to_width("ab", 4, ColumnAlign::Right), "  ab");
        assert_eq!(clip_to_width("abcdef", 4), "abc…");
        let row = format_columns(&[
            ("a", ColumnAlign::Left, 2),
            ("b", ColumnAlign::Right, 3),
        ]);
        assert_eq!(row, "a    b");
    }

    #[test]
    fn trade_state_pick_lists_follow_the_side() {
        let catalog = vec!["BTC".to_string(), "ETH".to_string()];
        let mut trade = TradeState::new(None, TradeLogStore::new("unused-trade-logs.jsonl".into()));
        assert_eq!(trade.pick_list(&catalog).len(), 2);
        trade.set_side(TradeSide::Sell);
        assert!(trade.pick_list(&catalog).is_empty());
        trade
            .balances
            .available
            .insert("ETH".to_string(), 0.25);
        assert_eq!(trade.pick_list(&catalog), vec!["ETH".to_string()]);
        assert_eq!(trade.selected_asset(&catalog).as_deref(), Some("ETH"));
    }

    #[test]
    fn amount_editing_rejects_a_second_decimal_point() {
        let mut trade = TradeState::new(None, TradeLogStore::new("unused-trade-logs.jsonl".into()));
        trade.amount.clear();
        for c in ['1', '2', '.', '5', '.', '3'] {
            trade.push_amount_char(c);
        }
        assert_eq!(trade.amount, "12.53");
        assert_eq!(trade.amount_value(), Some(12.53));
    }
}
