//! Index window over a growing price series.
//!
//! The window is the pair `(start, end)` (both inclusive) into one asset's
//! series; every transition here is a pure function of that pair, the series
//! length, and the event parameters. Out-of-range results are clamped back
//! into validity, never rejected.

/// Fewest points a window may show once the series has that many.
pub const MIN_WINDOW: usize = 5;
/// Width a freshly created window grows toward.
pub const DEFAULT_WIDTH: usize = 50;

const ZOOM_STEP: f64 = 0.1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ViewWindow {
    pub start: usize,
    pub end: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ZoomDirection {
    /// Fewer points (wheel toward the screen).
    In,
    /// More points.
    Out,
}

impl ViewWindow {
    /// Window for a series that just became non-empty: anchored to the live
    /// edge, default width or the whole series if shorter.
    pub fn initial(len: usize) -> Option<ViewWindow> {
        if len == 0 {
            return None;
        }
        let end = len - 1;
        let width = len.min(DEFAULT_WIDTH);
        Some(ViewWindow {
            start: end + 1 - width,
            end,
        })
    }

    pub fn size(&self) -> usize {
        self.end - self.start + 1
    }

    pub fn at_live_edge(&self, len: usize) -> bool {
        len > 0 && self.end == len - 1
    }
}

/// Shift a window of unchanged size so it starts as close to `start` as the
/// series bounds allow.
fn clamp(start: i64, size: usize, len: usize) -> ViewWindow {
    debug_assert!(size >= 1 && size <= len);
    let size = size as i64;
    let len = len as i64;
    let start = start.max(0);
    let end = start + size - 1;
    if end >= len {
        let end = len - 1;
        ViewWindow {
            start: (end - size + 1).max(0) as usize,
            end: end as usize,
        }
    } else {
        ViewWindow {
            start: start as usize,
            end: end as usize,
        }
    }
}

/// Pan by a pixel delta measured against the viewport width. Window size is
/// preserved; a shift that rounds to zero indices is a no-op.
pub fn pan(window: ViewWindow, len: usize, delta_px: f64, viewport_px: f64) -> ViewWindow {
    if len == 0 || viewport_px <= 0.0 || !delta_px.is_finite() {
        return window;
    }
    let size = window.size().min(len);
    let move_count = (-delta_px * size as f64 / viewport_px).round() as i64;
    if move_count == 0 {
        return window;
    }
    clamp(window.start as i64 + move_count, size, len)
}

/// Grow or shrink the window by 10% about its center. The new size is
/// clamped into `[MIN_WINDOW, len]` before recentering, so zooming a short
/// series degenerates to a no-op.
pub fn zoom(window: ViewWindow, len: usize, direction: ZoomDirection) -> ViewWindow {
    if len == 0 {
        return window;
    }
    let current = window.size() as f64;
    let scaled = match direction {
        ZoomDirection::In => current * (1.0 - ZOOM_STEP),
        ZoomDirection::Out => current * (1.0 + ZOOM_STEP),
    };
    let floor = MIN_WINDOW.min(len) as i64;
    let new_size = (scaled.round() as i64).clamp(floor, len as i64) as usize;
    let center = (window.start + window.end) as f64 / 2.0;
    let new_start = (center - new_size as f64 / 2.0).round() as i64;
    clamp(new_start, new_size, len)
}

/// The series grew by one tick. A window that was watching the live edge
/// follows it; a window panned back into history keeps its absolute
/// position. A window that still spans the entire series keeps spanning it
/// until it reaches the default width.
pub fn rebase_on_append(window: ViewWindow, new_len: usize) -> ViewWindow {
    debug_assert!(new_len >= 2);
    let prev_last = new_len - 2;
    if window.start == 0 && window.end == prev_last && window.size() < DEFAULT_WIDTH {
        return ViewWindow::initial(new_len).unwrap_or(window);
    }
    if window.end == prev_last {
        return ViewWindow {
            start: window.start + 1,
            end: window.end + 1,
        };
    }
    window
}

/// Per-asset window state plus the pointer-drag anchor. Drag events arrive
/// as start/move/end; a move without a live anchor is ignored, and a new
/// start always resets the anchor, so interleaved pointer sequences cannot
/// smear a stale reference point into the shift computation.
#[derive(Debug, Clone, Copy, Default)]
pub struct WindowController {
    window: Option<ViewWindow>,
    drag_anchor: Option<f64>,
}

impl WindowController {
    pub fn window(&self) -> Option<ViewWindow> {
        self.window
    }

    /// Series length changed by appending one tick.
    pub fn on_append(&mut self, new_len: usize) {
        self.window = match self.window {
            Some(window) if new_len >= 2 => Some(rebase_on_append(window, new_len)),
            _ => ViewWindow::initial(new_len),
        };
    }

    pub fn drag_start(&mut self, x: f64) {
        self.drag_anchor = Some(x);
    }

    /// Returns true when the window actually moved.
    pub fn drag_move(&mut self, x: f64, viewport_px: f64, len: usize) -> bool {
        let Some(anchor) = self.drag_anchor else {
            return false;
        };
        let delta = x - anchor;
        self.drag_anchor = Some(x);
        self.shift(delta, viewport_px, len)
    }

    pub fn drag_end(&mut self) {
        self.drag_anchor = None;
    }

    /// Keyboard pans reuse the same pixel math as pointer drags.
    pub fn shift(&mut self, delta_px: f64, viewport_px: f64, len: usize) -> bool {
        let Some(window) = self.window else {
            return false;
        };
        let next = pan(window, len, delta_px, viewport_px);
        self.window = Some(next);
        next != window
    }

    pub fn wheel(&mut self, direction: ZoomDirection, len: usize) -> bool {
        let Some(window) = self.window else {
            return false;
        };
        let next = zoom(window, len, direction);
        self.window = Some(next);
        next != window
    }

    /// Jump back to the most recent data without changing the window size.
    pub fn jump_to_live_edge(&mut self, len: usize) -> bool {
        let Some(window) = self.window else {
            return false;
        };
        if len == 0 || window.at_live_edge(len) {
            return false;
        }
        let size = window.size().min(len);
        self.window = Some(clamp(len as i64 - size as i64, size, len));
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn window(start: usize, end: usize) -> ViewWindow {
        ViewWindow { start, end }
    }

    fn assert_valid(w: ViewWindow, len: usize) {
        assert!(w.start <= w.end, "{w:?} inverted");
        assert!(w.end < len, "{w:?} exceeds len {len}");
        if len >= MIN_WINDOW {
            assert!(w.size() >= MIN_WINDOW.min(len), "{w:?} below min width");
        }
    }

    #[test]
    fn initial_anchors_to_live_edge() {
        assert_eq!(ViewWindow::initial(0), None);
        assert_eq!(ViewWindow::initial(1), Some(window(0, 0)));
        assert_eq!(ViewWindow::initial(30), Some(window(0, 29)));
        assert_eq!(ViewWindow::initial(200), Some(window(150, 199)));
    }

    #[test]
    fn pan_on_single_point_window_is_a_noop() {
        // one stored tick, drag across a tenth of the viewport
        let w = window(0, 0);
        assert_eq!(pan(w, 1, 50.0, 500.0), w);
    }

    #[test]
    fn pan_preserves_size_and_clamps_at_both_ends() {
        let len = 100;
        let w = window(40, 59);
        let left = pan(w, len, 2_000.0, 100.0);
        assert_eq!(left, window(0, 19));
        let right = pan(w, len, -2_000.0, 100.0);
        assert_eq!(right, window(80, 99));
        for shifted in [left, right] {
            assert_eq!(shifted.size(), w.size());
            assert_valid(shifted, len);
        }
    }

    #[test]
    fn small_pan_rounds_to_zero_shift() {
        let w = window(40, 59);
        // 1px over a 500px viewport on a 20-point window: 0.04 indices
        assert_eq!(pan(w, 100, 1.0, 500.0), w);
    }

    #[test]
    fn zoom_out_grows_and_zoom_in_shrinks() {
        let len = 200;
        let mut w = window(100, 149);
        let grown = zoom(w, len, ZoomDirection::Out);
        assert!(grown.size() >= w.size());
        w = grown;
        let shrunk = zoom(w, len, ZoomDirection::In);
        assert!(shrunk.size() <= w.size());
        assert_valid(grown, len);
        assert_valid(shrunk, len);
    }

    #[test]
    fn zoom_clamps_to_min_window_and_series_length() {
        let len = 100;
        let mut w = window(40, 45);
        for _ in 0..50 {
            w = zoom(w, len, ZoomDirection::In);
            assert_valid(w, len);
        }
        assert_eq!(w.size(), MIN_WINDOW);
        for _ in 0..100 {
            w = zoom(w, len, ZoomDirection::Out);
            assert_valid(w, len);
        }
        assert_eq!(w.size(), len);
    }

    #[test]
    fn zoom_on_short_series_is_a_noop() {
        let w = window(0, 2);
        assert_eq!(zoom(w, 3, ZoomDirection::In), w);
        assert_eq!(zoom(w, 3, ZoomDirection::Out), w);
    }

    #[test]
    fn append_at_live_edge_advances_the_window() {
        // series of 100, window at the live edge
        let w = window(50, 99);
        assert_eq!(rebase_on_append(w, 101), window(51, 100));
    }

    #[test]
    fn append_behind_live_edge_preserves_position() {
        let w = window(0, 49);
        assert_eq!(rebase_on_append(w, 101), w);
    }

    #[test]
    fn append_grows_window_until_default_width() {
        let mut len = 1;
        let mut w = ViewWindow::initial(len).unwrap();
        while len < DEFAULT_WIDTH {
            len += 1;
            w = rebase_on_append(w, len);
            assert_eq!(w, window(0, len - 1));
        }
        // past the default width the window slides instead
        len += 1;
        w = rebase_on_append(w, len);
        assert_eq!(w, window(1, len - 1));
        assert_eq!(w.size(), DEFAULT_WIDTH);
    }

    #[test]
    fn controller_ignores_moves_without_a_drag_start() {
        let mut ctl = WindowController::default();
        ctl.on_append(60);
        assert!(!ctl.drag_move(120.0, 500.0, 60));

        ctl.drag_start(100.0);
        assert!(ctl.drag_move(400.0, 500.0, 60));
        ctl.drag_end();
        assert!(!ctl.drag_move(0.0, 500.0, 60));
    }

    #[test]
    fn a_new_drag_start_resets_the_anchor() {
        let mut ctl = WindowController::default();
        ctl.on_append(200);
        for _ in 1..200 {
            ctl.on_append(200);
        }
        ctl.drag_start(0.0);
        ctl.drag_start(300.0);
        // the move is measured from the second start, not the first
        let before = ctl.window().unwrap();
        assert!(ctl.drag_move(250.0, 500.0, 200));
        let after = ctl.window().unwrap();
        assert!(after.start > before.start);
    }

    #[test]
    fn rebase_mid_drag_keeps_shift_math_consistent() {
        let mut ctl = WindowController::default();
        for len in 1..=100 {
            ctl.on_append(len);
        }
        ctl.drag_start(200.0);
        assert!(ctl.drag_move(500.0, 500.0, 100));
        let panned = ctl.window().unwrap();
        assert!(!panned.at_live_edge(100));
        // a tick lands while the button is still held
        ctl.on_append(101);
        assert_eq!(ctl.window().unwrap(), panned);
        // the next move computes against the post-rebase state
        assert!(ctl.drag_move(450.0, 500.0, 101));
        assert_valid(ctl.window().unwrap(), 101);
    }

    #[test]
    fn jump_to_live_edge_keeps_size() {
        let mut ctl = WindowController::default();
        for len in 1..=100 {
            ctl.on_append(len);
        }
        ctl.drag_start(0.0);
        ctl.drag_move(500.0, 500.0, 100);
        ctl.drag_end();
        let parked = ctl.window().unwrap();
        assert!(!parked.at_live_edge(100));
        assert!(ctl.jump_to_live_edge(100));
        let live = ctl.window().unwrap();
        assert!(live.at_live_edge(100));
        assert_eq!(live.size(), parked.size());
        assert!(!ctl.jump_to_live_edge(100));
    }

    #[test]
    fn window_invariants_hold_under_mixed_event_sequences() {
        let mut ctl = WindowController::default();
        let mut len = 0usize;
        let events: Vec<u32> = (0..400).map(|i| (i * 7 + 3) % 5).collect();
        for event in events {
            match event {
                0 => {
                    len += 1;
                    ctl.on_append(len);
                }
                1 => {
                    ctl.drag_start((len % 37) as f64 * 3.0);
                }
                2 => {
                    ctl.drag_move((len % 53) as f64 * 5.0, 400.0, len);
                }
                3 => {
                    ctl.wheel(ZoomDirection::In, len);
                }
                _ => {
                    ctl.wheel(ZoomDirection::Out, len);
                }
            }
            if len > 0 {
                let w = ctl.window().expect("window exists once data exists");
                assert_valid(w, len);
            } else {
                assert!(ctl.window().is_none());
            }
        }
    }
}
