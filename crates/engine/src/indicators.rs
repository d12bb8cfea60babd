//! Indicator series used by the strategy simulators
//!
//! Every function returns one value per input bar. Bars without enough
//! history hold `f64::NAN`, so any comparison against them is false and
//! they can never trigger an entry.

use ta::indicators::{ExponentialMovingAverage, SimpleMovingAverage};
use ta::Next;

use crate::error::{EngineError, EngineResult};
use crate::types::Candle;

fn invalid_window(name: &str, window: usize, min: usize) -> EngineError {
    EngineError::InvalidParameter {
        name: name.to_string(),
        reason: format!("window {window} is below the minimum of {min}"),
    }
}

pub fn closes(candles: &[Candle]) -> Vec<f64> {
    candles.iter().map(|c| c.close).collect()
}

/// Rolling volume-weighted average close over `window` bars.
/// Undefined when the window carries no volume.
pub fn rolling_vwap(candles: &[Candle], window: usize) -> EngineResult<Vec<f64>> {
    if window == 0 {
        return Err(invalid_window("window", window, 1));
    }
    let mut out = vec![f64::NAN; candles.len()];
    for i in (window - 1)..candles.len() {
        let slice = &candles[i + 1 - window..=i];
        let volume: f64 = slice.iter().map(|c| c.volume).sum();
        if volume > 0.0 {
            let pv: f64 = slice.iter().map(|c| c.close * c.volume).sum();
            out[i] = pv / volume;
        }
    }
    Ok(out)
}

/// ATR proxy: rolling mean of the absolute bar-to-bar close change.
/// First defined at bar `window` (the first change exists at bar 1).
pub fn atr_proxy(closes: &[f64], window: usize) -> EngineResult<Vec<f64>> {
    if window == 0 {
        return Err(invalid_window("atr_window", window, 1));
    }
    let mut out = vec![f64::NAN; closes.len()];
    for i in window..closes.len() {
        let sum: f64 = (i + 1 - window..=i)
            .map(|j| (closes[j] - closes[j - 1]).abs())
            .sum();
        out[i] = sum / window as f64;
    }
    Ok(out)
}

/// Percent change over `period` bars (`x[i] / x[i - period] - 1`)
pub fn rate_of_change(series: &[f64], period: usize) -> Vec<f64> {
    let mut out = vec![f64::NAN; series.len()];
    if period == 0 {
        return out;
    }
    for i in period..series.len() {
        let base = series[i - period];
        if base != 0.0 && base.is_finite() && series[i].is_finite() {
            out[i] = series[i] / base - 1.0;
        }
    }
    out
}

/// Exponential moving average seeded with the first value (`alpha = 2 / (span + 1)`)
pub fn ema(series: &[f64], span: usize) -> EngineResult<Vec<f64>> {
    let mut ema =
        ExponentialMovingAverage::new(span).map_err(|_| invalid_window("ema_span", span, 1))?;
    Ok(series.iter().map(|&x| ema.next(x)).collect())
}

/// First difference; undefined at bar 0
pub fn diff(series: &[f64]) -> Vec<f64> {
    let mut out = vec![f64::NAN; series.len()];
    for i in 1..series.len() {
        out[i] = series[i] - series[i - 1];
    }
    out
}

/// Rolling arithmetic mean over `window` bars
pub fn rolling_mean(series: &[f64], window: usize) -> EngineResult<Vec<f64>> {
    let mut sma =
        SimpleMovingAverage::new(window).map_err(|_| invalid_window("ma_window", window, 1))?;
    Ok(series
        .iter()
        .enumerate()
        .map(|(i, &x)| {
            let value = sma.next(x);
            if i + 1 >= window {
                value
            } else {
                f64::NAN
            }
        })
        .collect())
}

/// Rolling sample standard deviation (n - 1 denominator) over `window` bars.
///
/// Computed per window with two passes so a flat window yields exactly 0.
pub fn rolling_std(series: &[f64], window: usize) -> EngineResult<Vec<f64>> {
    if window < 2 {
        return Err(invalid_window("vwap_window", window, 2));
    }
    let mut out = vec![f64::NAN; series.len()];
    for i in (window - 1)..series.len() {
        let slice = &series[i + 1 - window..=i];
        let mean = slice.iter().sum::<f64>() / window as f64;
        let var = slice.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / (window - 1) as f64;
        out[i] = var.sqrt();
    }
    Ok(out)
}

/// Sample mean and standard deviation of a return series.
/// Returns `None` for fewer than two observations.
pub fn mean_and_std(values: &[f64]) -> Option<(f64, f64)> {
    if values.len() < 2 {
        return None;
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let var = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (n - 1.0);
    Some((mean, var.sqrt()))
}

/// True when every value is identical (no variance at all)
pub fn is_constant(values: &[f64]) -> bool {
    values.windows(2).all(|w| w[0] == w[1])
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_candles(prices: &[f64], volumes: &[f64]) -> Vec<Candle> {
        prices
            .iter()
            .zip(volumes)
            .enumerate()
            .map(|(i, (&p, &v))| Candle {
                open_time: (i as i64) * 60_000,
                open: p,
                high: p,
                low: p,
                close: p,
                volume: v,
                close_time: ((i + 1) as i64) * 60_000 - 1,
            })
            .collect()
    }

    fn approx(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn test_rolling_vwap_weights_by_volume() {
        let candles = make_candles(&[10.0, 20.0, 30.0], &[1.0, 1.0, 2.0]);
        let vwap = rolling_vwap(&candles, 2).unwrap();
        assert!(vwap[0].is_nan());
        assert!(approx(vwap[1], 15.0));
        // (20*1 + 30*2) / 3
        assert!(approx(vwap[2], 80.0 / 3.0));
    }

    #[test]
    fn test_rolling_vwap_undefined_without_volume() {
        let candles = make_candles(&[10.0, 20.0, 30.0], &[0.0, 0.0, 5.0]);
        let vwap = rolling_vwap(&candles, 2).unwrap();
        assert!(vwap[1].is_nan());
        assert!(approx(vwap[2], 30.0));
    }

    #[test]
    fn test_atr_proxy_warmup_and_value() {
        let closes = [10.0, 12.0, 11.0, 15.0];
        let atr = atr_proxy(&closes, 2).unwrap();
        assert!(atr[0].is_nan());
        assert!(atr[1].is_nan());
        assert!(approx(atr[2], 1.5));
        assert!(approx(atr[3], 2.5));
    }

    #[test]
    fn test_ema_is_seeded_with_first_value() {
        let series = [10.0, 20.0, 20.0];
        let out = ema(&series, 9).unwrap();
        let alpha = 2.0 / 10.0;
        assert!(approx(out[0], 10.0));
        assert!(approx(out[1], alpha * 20.0 + (1.0 - alpha) * 10.0));
        assert!(approx(out[2], alpha * 20.0 + (1.0 - alpha) * out[1]));
    }

    #[test]
    fn test_rate_of_change() {
        let series = [f64::NAN, 100.0, 105.0, 110.0];
        let roc = rate_of_change(&series, 2);
        assert!(roc[2].is_nan());
        assert!(approx(roc[3], 0.1));
    }

    #[test]
    fn test_rolling_mean_masks_warmup() {
        let out = rolling_mean(&[1.0, 2.0, 3.0, 4.0], 3).unwrap();
        assert!(out[0].is_nan() && out[1].is_nan());
        assert!(approx(out[2], 2.0));
        assert!(approx(out[3], 3.0));
    }

    #[test]
    fn test_rolling_std_sample_and_flat() {
        let out = rolling_std(&[1.0, 2.0, 3.0, 3.0, 3.0], 3).unwrap();
        assert!(approx(out[2], 1.0));
        assert_eq!(out[4], 0.0);
        assert!(rolling_std(&[1.0, 2.0], 1).is_err());
    }

    #[test]
    fn test_zero_windows_are_rejected() {
        let candles = make_candles(&[1.0], &[1.0]);
        assert!(rolling_vwap(&candles, 0).is_err());
        assert!(atr_proxy(&[1.0], 0).is_err());
        assert!(ema(&[1.0], 0).is_err());
        assert!(rolling_mean(&[1.0], 0).is_err());
    }

    #[test]
    fn test_is_constant() {
        assert!(is_constant(&[]));
        assert!(is_constant(&[0.01; 10]));
        assert!(!is_constant(&[0.01, 0.02]));
    }

    #[test]
    fn test_mean_and_std() {
        assert!(mean_and_std(&[1.0]).is_none());
        let (mean, std) = mean_and_std(&[1.0, 3.0]).unwrap();
        assert!(approx(mean, 2.0));
        assert!(approx(std, 2.0f64.sqrt()));
    }
}
