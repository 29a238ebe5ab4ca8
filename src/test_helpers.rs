use chrono::{DateTime, Duration, Utc};

use crate::models::{Bar, BarSeries};

fn base_time() -> DateTime<Utc> {
    DateTime::parse_from_rfc3339("2024-01-15T12:00:00Z")
        .unwrap()
        .with_timezone(&Utc)
}

fn bar_at(i: usize, open: f64, high: f64, low: f64, close: f64) -> Bar {
    let open_time = base_time() + Duration::minutes(i as i64);
    Bar {
        open_time,
        close_time: open_time + Duration::milliseconds(59_999),
        open,
        high,
        low,
        close,
        volume: 100.0,
    }
}

/// Bars from (open, high, low, close) tuples, one minute apart.
pub fn make_bars(data: &[(f64, f64, f64, f64)]) -> BarSeries {
    data.iter()
        .enumerate()
        .map(|(i, &(o, h, l, c))| bar_at(i, o, h, l, c))
        .collect()
}

/// `n` bars whose highs and lows both climb by `step` every bar.
pub fn make_rising_bars(n: usize, start: f64, step: f64) -> BarSeries {
    (0..n)
        .map(|i| {
            let open = start + i as f64 * step;
            let close = open + step * 0.8;
            bar_at(i, open, open + step, open - step * 0.2, close)
        })
        .collect()
}
