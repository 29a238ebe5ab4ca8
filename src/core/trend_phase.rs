use serde::{Deserialize, Serialize};

use crate::config::StrategyConfig;
use crate::core::indicators::IndicatorSnapshot;

/// Trend strength and its edges for one bar.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TrendFlags {
    pub strong_uptrend: bool,
    pub strong_downtrend: bool,
    pub begin_uptrend: bool,
    pub end_uptrend: bool,
    pub begin_downtrend: bool,
    pub end_downtrend: bool,
}

#[derive(Debug, Clone)]
pub struct TrendClassifier {
    adx_threshold: f64,
    rsi_upper: f64,
    rsi_lower: f64,
}

impl TrendClassifier {
    pub fn new(cfg: &StrategyConfig) -> Self {
        Self {
            adx_threshold: cfg.adx_threshold,
            rsi_upper: cfg.rsi_upper,
            rsi_lower: cfg.rsi_lower,
        }
    }

    /// Strong up/down trend at `cur`. Without a predecessor the short EMA
    /// slope is unknown, so neither trend holds.
    pub fn strength(
        &self,
        prev: Option<&IndicatorSnapshot>,
        cur: &IndicatorSnapshot,
    ) -> (bool, bool) {
        let Some(prev) = prev else {
            return (false, false);
        };
        let trending = cur.adx > self.adx_threshold;

        let up = cur.ema_short > cur.ema_long
            && cur.plus_di > cur.minus_di
            && cur.rsi > self.rsi_upper
            && trending
            && cur.ema_short > prev.ema_short;

        let down = cur.ema_short < cur.ema_long
            && cur.minus_di > cur.plus_di
            && cur.rsi < self.rsi_lower
            && trending
            && cur.ema_short < prev.ema_short;

        (up, down)
    }

    /// One set of flags per snapshot, edges taken against the previous bar.
    pub fn classify(&self, snapshots: &[IndicatorSnapshot]) -> Vec<TrendFlags> {
        let mut out: Vec<TrendFlags> = Vec::with_capacity(snapshots.len());
        for (i, cur) in snapshots.iter().enumerate() {
            let prev = i.checked_sub(1).map(|p| &snapshots[p]);
            let (up, down) = self.strength(prev, cur);
            let before = out.last().copied().unwrap_or_default();
            out.push(TrendFlags {
                strong_uptrend: up,
                strong_downtrend: down,
                begin_uptrend: up && !before.strong_uptrend,
                end_uptrend: !up && before.strong_uptrend,
                begin_downtrend: down && !before.strong_downtrend,
                end_downtrend: !down && before.strong_downtrend,
            });
        }
        out
    }

    /// Flags for the newest snapshot only.
    pub fn latest(&self, snapshots: &[IndicatorSnapshot]) -> Option<TrendFlags> {
        let n = snapshots.len();
        if n == 0 {
            return None;
        }
        let start = n.saturating_sub(3);
        self.classify(&snapshots[start..]).last().copied()
    }
}
