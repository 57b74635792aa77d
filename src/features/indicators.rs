//! Indicator arithmetic over OHLCV bars.
//!
//! Series-returning functions produce one value per input element unless
//! noted. Wilder smoothing is used for RSI, ATR and ADX.

use statrs::statistics::Statistics;

use crate::models::Bar;

/// Exponential moving average seeded with the first value.
pub fn ema(values: &[f64], period: usize) -> Vec<f64> {
    let Some(&first) = values.first() else {
        return Vec::new();
    };
    let alpha = 2.0 / (period.max(1) as f64 + 1.0);

    let mut out = Vec::with_capacity(values.len());
    let mut current = first;
    out.push(current);
    for &v in &values[1..] {
        current = alpha * v + (1.0 - alpha) * current;
        out.push(current);
    }
    out
}

/// Relative strength index of the last close.
pub fn rsi(closes: &[f64], period: usize) -> Option<f64> {
    if period == 0 || closes.len() <= period {
        return None;
    }
    let p = period as f64;

    let (mut avg_gain, mut avg_loss) = closes[..=period]
        .windows(2)
        .map(|w| w[1] - w[0])
        .fold((0.0, 0.0), |(g, l), d| (g + d.max(0.0), l + (-d).max(0.0)));
    avg_gain /= p;
    avg_loss /= p;

    for w in closes[period..].windows(2) {
        let d = w[1] - w[0];
        avg_gain = (avg_gain * (p - 1.0) + d.max(0.0)) / p;
        avg_loss = (avg_loss * (p - 1.0) + (-d).max(0.0)) / p;
    }

    if avg_loss == 0.0 {
        return Some(if avg_gain == 0.0 { 50.0 } else { 100.0 });
    }
    let rs = avg_gain / avg_loss;
    Some(100.0 - 100.0 / (1.0 + rs))
}

fn true_ranges(bars: &[Bar]) -> Vec<f64> {
    bars.iter()
        .enumerate()
        .map(|(i, bar)| bar.true_range(i.checked_sub(1).map(|j| bars[j].close)))
        .collect()
}

/// Average true range series. The first value covers bars `0..period`, so the
/// series has `bars.len() - period + 1` entries.
pub fn atr_series(bars: &[Bar], period: usize) -> Vec<f64> {
    let tr = true_ranges(bars);
    if period == 0 || tr.len() < period {
        return Vec::new();
    }
    let p = period as f64;

    let mut atr = tr[..period].iter().mean();
    let mut out = vec![atr];
    for &t in &tr[period..] {
        atr = (atr * (p - 1.0) + t) / p;
        out.push(atr);
    }
    out
}

/// Volume-weighted average of typical price over the window.
pub fn vwap(bars: &[Bar]) -> Option<f64> {
    let volume: f64 = bars.iter().map(|b| b.volume).sum();
    if volume <= 0.0 {
        return bars.last().map(|b| b.close);
    }
    let weighted: f64 = bars.iter().map(|b| b.typical_price() * b.volume).sum();
    Some(weighted / volume)
}

/// MACD histogram (MACD line minus its signal line) at the last close.
pub fn macd_histogram(closes: &[f64], fast: usize, slow: usize, signal: usize) -> Option<f64> {
    if closes.len() < slow + signal {
        return None;
    }
    let fast_ema = ema(closes, fast);
    let slow_ema = ema(closes, slow);
    let line: Vec<f64> = fast_ema.iter().zip(&slow_ema).map(|(f, s)| f - s).collect();
    let signal_line = ema(&line, signal);

    Some(line.last()? - signal_line.last()?)
}

/// Average directional index at the last bar.
pub fn adx(bars: &[Bar], period: usize) -> Option<f64> {
    if period == 0 || bars.len() < 2 * period + 1 {
        return None;
    }
    let p = period as f64;

    let mut tr = Vec::with_capacity(bars.len() - 1);
    let mut plus_dm = Vec::with_capacity(bars.len() - 1);
    let mut minus_dm = Vec::with_capacity(bars.len() - 1);
    for w in bars.windows(2) {
        let up = w[1].high - w[0].high;
        let down = w[0].low - w[1].low;
        plus_dm.push(if up > down && up > 0.0 { up } else { 0.0 });
        minus_dm.push(if down > up && down > 0.0 { down } else { 0.0 });
        tr.push(w[1].true_range(Some(w[0].close)));
    }

    let dx = |s_tr: f64, s_plus: f64, s_minus: f64| {
        if s_tr == 0.0 {
            return 0.0;
        }
        let plus_di = 100.0 * s_plus / s_tr;
        let minus_di = 100.0 * s_minus / s_tr;
        let sum = plus_di + minus_di;
        if sum == 0.0 {
            0.0
        } else {
            100.0 * (plus_di - minus_di).abs() / sum
        }
    };

    let mut s_tr: f64 = tr[..period].iter().sum();
    let mut s_plus: f64 = plus_dm[..period].iter().sum();
    let mut s_minus: f64 = minus_dm[..period].iter().sum();
    let mut dxs = vec![dx(s_tr, s_plus, s_minus)];

    for i in period..tr.len() {
        s_tr = s_tr - s_tr / p + tr[i];
        s_plus = s_plus - s_plus / p + plus_dm[i];
        s_minus = s_minus - s_minus / p + minus_dm[i];
        dxs.push(dx(s_tr, s_plus, s_minus));
    }

    let mut adx = dxs[..period].iter().mean();
    for &d in &dxs[period..] {
        adx = (adx * (p - 1.0) + d) / p;
    }
    Some(adx)
}

/// Cumulative on-balance volume, starting at zero.
pub fn obv_series(bars: &[Bar]) -> Vec<f64> {
    let mut out = Vec::with_capacity(bars.len());
    let mut obv = 0.0;
    for (i, bar) in bars.iter().enumerate() {
        if i > 0 {
            let prev = bars[i - 1].close;
            if bar.close > prev {
                obv += bar.volume;
            } else if bar.close < prev {
                obv -= bar.volume;
            }
        }
        out.push(obv);
    }
    out
}

/// Mean of the last `window` values (fewer if the slice is shorter).
pub fn trailing_mean(values: &[f64], window: usize) -> Option<f64> {
    if values.is_empty() || window == 0 {
        return None;
    }
    let start = values.len().saturating_sub(window);
    Some(values[start..].iter().mean())
}
