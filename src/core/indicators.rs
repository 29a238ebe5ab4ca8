use serde::{Deserialize, Serialize};

use crate::config::StrategyConfig;
use crate::models::BarSeries;

/// RSI reported for bars without enough history for the trailing mean.
pub const RSI_WARMUP_DEFAULT: f64 = 50.0;
/// RSI reported when the average loss over the window is zero.
pub const RSI_NO_LOSS: f64 = 100.0;

/// Derived values for one bar, aligned by index with the input window.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct IndicatorSnapshot {
    pub ema_short: f64,
    pub ema_long: f64,
    pub rsi: f64,
    pub plus_di: f64,
    pub minus_di: f64,
    pub adx: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Dmi {
    pub plus_di: Vec<f64>,
    pub minus_di: Vec<f64>,
    pub adx: Vec<f64>,
}

/// Recomputes every indicator over the full window on each call.
#[derive(Debug, Clone)]
pub struct IndicatorEngine {
    ema_short: usize,
    ema_long: usize,
    rsi_len: usize,
    adx_len: usize,
    adx_smooth: usize,
}

impl IndicatorEngine {
    pub fn new(cfg: &StrategyConfig) -> Self {
        Self {
            ema_short: cfg.ema_short,
            ema_long: cfg.ema_long,
            rsi_len: cfg.rsi_len,
            adx_len: cfg.adx_len,
            adx_smooth: cfg.adx_smooth,
        }
    }

    pub fn compute(&self, bars: &BarSeries) -> Vec<IndicatorSnapshot> {
        let closes = bars.closes();
        let highs = bars.highs();
        let lows = bars.lows();

        let ema_short = ema(&closes, self.ema_short);
        let ema_long = ema(&closes, self.ema_long);
        let rsi = rsi(&closes, self.rsi_len);
        let dmi = dmi_adx(&highs, &lows, &closes, self.adx_len, self.adx_smooth);

        (0..closes.len())
            .map(|i| IndicatorSnapshot {
                ema_short: ema_short[i],
                ema_long: ema_long[i],
                rsi: rsi[i],
                plus_di: dmi.plus_di[i],
                minus_di: dmi.minus_di[i],
                adx: dmi.adx[i],
            })
            .collect()
    }
}

/// EMA seeded with the first value, alpha = 2 / (period + 1), no bias correction.
pub fn ema(values: &[f64], period: usize) -> Vec<f64> {
    let alpha = 2.0 / (period as f64 + 1.0);
    let mut out = Vec::with_capacity(values.len());
    let mut prev: Option<f64> = None;
    for &v in values {
        let next = match prev {
            None => v,
            Some(p) => v * alpha + p * (1.0 - alpha),
        };
        out.push(next);
        prev = Some(next);
    }
    out
}

/// RSI over simple trailing means of gains and losses.
pub fn rsi(closes: &[f64], period: usize) -> Vec<f64> {
    // The first bar has no change; it counts as zero gain and zero loss.
    let mut gains = Vec::with_capacity(closes.len());
    let mut losses = Vec::with_capacity(closes.len());
    for i in 0..closes.len() {
        let delta = if i == 0 { 0.0 } else { closes[i] - closes[i - 1] };
        gains.push(Some(if delta > 0.0 { delta } else { 0.0 }));
        losses.push(Some(if delta < 0.0 { -delta } else { 0.0 }));
    }

    let avg_gain = rolling_mean(&gains, period);
    let avg_loss = rolling_mean(&losses, period);

    avg_gain
        .iter()
        .zip(&avg_loss)
        .map(|(g, l)| match (g, l) {
            (Some(_), Some(l)) if *l == 0.0 => RSI_NO_LOSS,
            (Some(g), Some(l)) => 100.0 - 100.0 / (1.0 + g / l),
            _ => RSI_WARMUP_DEFAULT,
        })
        .collect()
}

/// +DI, -DI and ADX from simple trailing means.
///
/// Values that cannot be computed yet (not enough bars) propagate as undefined
/// through the ADX window and are reported as 0. A zero denominator in DI or DX
/// yields 0 for that bar.
pub fn dmi_adx(
    highs: &[f64],
    lows: &[f64],
    closes: &[f64],
    length: usize,
    smoothing: usize,
) -> Dmi {
    let n = closes.len().min(highs.len()).min(lows.len());

    let mut tr = Vec::with_capacity(n);
    let mut plus_dm = Vec::with_capacity(n);
    let mut minus_dm = Vec::with_capacity(n);
    for i in 0..n {
        if i == 0 {
            tr.push(Some(highs[0] - lows[0]));
            plus_dm.push(Some(0.0));
            minus_dm.push(Some(0.0));
            continue;
        }
        let prev_close = closes[i - 1];
        let range = (highs[i] - lows[i])
            .max((highs[i] - prev_close).abs())
            .max((lows[i] - prev_close).abs());
        tr.push(Some(range));

        let up_move = highs[i] - highs[i - 1];
        let down_move = lows[i - 1] - lows[i];
        plus_dm.push(Some(if up_move > down_move && up_move > 0.0 {
            up_move
        } else {
            0.0
        }));
        minus_dm.push(Some(if down_move > up_move && down_move > 0.0 {
            down_move
        } else {
            0.0
        }));
    }

    let atr = rolling_mean(&tr, length);
    let avg_plus = rolling_mean(&plus_dm, length);
    let avg_minus = rolling_mean(&minus_dm, length);

    let plus_di: Vec<Option<f64>> = avg_plus
        .iter()
        .zip(&atr)
        .map(|(dm, tr)| directional_index(*dm, *tr))
        .collect();
    let minus_di: Vec<Option<f64>> = avg_minus
        .iter()
        .zip(&atr)
        .map(|(dm, tr)| directional_index(*dm, *tr))
        .collect();

    let dx: Vec<Option<f64>> = plus_di
        .iter()
        .zip(&minus_di)
        .map(|(p, m)| match (p, m) {
            (Some(p), Some(m)) => Some(guarded_ratio((p - m).abs(), p + m) * 100.0),
            _ => None,
        })
        .collect();

    let adx = rolling_mean(&dx, smoothing);

    Dmi {
        plus_di: fill_zero(&plus_di),
        minus_di: fill_zero(&minus_di),
        adx: fill_zero(&adx),
    }
}

fn directional_index(avg_dm: Option<f64>, avg_tr: Option<f64>) -> Option<f64> {
    match (avg_dm, avg_tr) {
        (Some(dm), Some(tr)) => Some(guarded_ratio(dm, tr) * 100.0),
        _ => None,
    }
}

fn guarded_ratio(num: f64, den: f64) -> f64 {
    if den == 0.0 {
        0.0
    } else {
        num / den
    }
}

fn fill_zero(values: &[Option<f64>]) -> Vec<f64> {
    values.iter().map(|v| v.unwrap_or(0.0)).collect()
}

/// Trailing simple mean; undefined until a full window of defined values exists.
pub fn rolling_mean(values: &[Option<f64>], window: usize) -> Vec<Option<f64>> {
    if window == 0 {
        return vec![None; values.len()];
    }
    (0..values.len())
        .map(|i| {
            if i + 1 < window {
                return None;
            }
            let slice = &values[i + 1 - window..=i];
            let mut sum = 0.0;
            for v in slice {
                sum += (*v)?;
            }
            Some(sum / window as f64)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::{make_bars, make_rising_bars};

    fn approx(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn ema_seeds_with_first_value() {
        let out = ema(&[10.0, 20.0, 30.0], 3);
        // alpha = 0.5
        assert!(approx(out[0], 10.0));
        assert!(approx(out[1], 15.0));
        assert!(approx(out[2], 22.5));
    }

    #[test]
    fn ema_of_constant_series_is_constant() {
        let out = ema(&[42.0; 30], 20);
        assert!(out.iter().all(|v| approx(*v, 42.0)));
    }

    #[test]
    fn rsi_defaults_to_50_during_warmup() {
        let closes: Vec<f64> = (0..20).map(|i| 100.0 + (i % 3) as f64).collect();
        let out = rsi(&closes, 14);
        for v in &out[..13] {
            assert_eq!(*v, RSI_WARMUP_DEFAULT);
        }
        assert_ne!(out[13], RSI_WARMUP_DEFAULT);
    }

    #[test]
    fn rsi_is_100_without_losses() {
        let closes: Vec<f64> = (0..20).map(|i| 100.0 + i as f64).collect();
        let out = rsi(&closes, 14);
        assert_eq!(out[13], RSI_NO_LOSS);
        assert_eq!(out[19], RSI_NO_LOSS);
    }

    #[test]
    fn rsi_uses_simple_trailing_means() {
        // changes: +2, -1, +2, -1
        let closes = [10.0, 12.0, 11.0, 13.0, 12.0];
        let out = rsi(&closes, 4);
        // window at index 4 covers changes +2, -1, +2, -1
        let gain = 4.0 / 4.0;
        let loss = 2.0 / 4.0;
        assert!(approx(out[4], 100.0 - 100.0 / (1.0 + gain / loss)));
        // window at index 3 includes the zero change of the first bar
        let gain = 4.0 / 4.0;
        let loss = 1.0 / 4.0;
        assert!(approx(out[3], 100.0 - 100.0 / (1.0 + gain / loss)));
    }

    #[test]
    fn rolling_mean_requires_full_defined_window() {
        let values = [Some(1.0), Some(2.0), None, Some(4.0), Some(5.0), Some(6.0)];
        let out = rolling_mean(&values, 2);
        assert_eq!(out[0], None);
        assert_eq!(out[1], Some(1.5));
        assert_eq!(out[2], None);
        assert_eq!(out[3], None);
        assert_eq!(out[4], Some(4.5));
        assert_eq!(out[5], Some(5.5));
    }

    #[test]
    fn dmi_on_flat_bars_is_zero() {
        let data = vec![(100.0, 100.0, 100.0, 100.0); 40];
        let bars = make_bars(&data);
        let dmi = dmi_adx(&bars.highs(), &bars.lows(), &bars.closes(), 14, 14);
        assert!(dmi.plus_di.iter().all(|v| *v == 0.0));
        assert!(dmi.minus_di.iter().all(|v| *v == 0.0));
        assert!(dmi.adx.iter().all(|v| *v == 0.0));
    }

    #[test]
    fn dmi_warmup_is_zero_and_rising_market_favours_plus_di() {
        let bars = make_rising_bars(60, 100.0, 1.0);
        let dmi = dmi_adx(&bars.highs(), &bars.lows(), &bars.closes(), 14, 14);

        // DI needs 14 bars, ADX needs 14 defined DX values on top of that
        for i in 0..13 {
            assert_eq!(dmi.plus_di[i], 0.0);
        }
        for i in 0..26 {
            assert_eq!(dmi.adx[i], 0.0);
        }
        assert!(dmi.plus_di[13] > 0.0);
        assert_eq!(dmi.minus_di[13], 0.0);
        assert!(approx(dmi.adx[26], 100.0));
        assert!(dmi.plus_di[59] > dmi.minus_di[59]);
    }

    #[test]
    fn engine_output_is_aligned_and_deterministic() {
        let bars = make_rising_bars(80, 100.0, 0.5);
        let engine = IndicatorEngine::new(&StrategyConfig::default());
        let a = engine.compute(&bars);
        let b = engine.compute(&bars);
        assert_eq!(a.len(), bars.len());
        for (x, y) in a.iter().zip(&b) {
            assert_eq!(x.ema_short.to_bits(), y.ema_short.to_bits());
            assert_eq!(x.ema_long.to_bits(), y.ema_long.to_bits());
            assert_eq!(x.rsi.to_bits(), y.rsi.to_bits());
            assert_eq!(x.plus_di.to_bits(), y.plus_di.to_bits());
            assert_eq!(x.minus_di.to_bits(), y.minus_di.to_bits());
            assert_eq!(x.adx.to_bits(), y.adx.to_bits());
        }
    }

    #[test]
    fn empty_window_yields_no_snapshots() {
        let engine = IndicatorEngine::new(&StrategyConfig::default());
        assert!(engine.compute(&BarSeries::default()).is_empty());
    }
}
