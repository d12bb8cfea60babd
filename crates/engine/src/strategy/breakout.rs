//! Z-score breakout
//!
//! Follows closes that sit more than `z_thresh` standard deviations away
//! from their rolling mean.

use super::{integer, require, ExitRules, FeatureFrame, Strategy, SimulationSettings};
use crate::error::EngineResult;
use crate::indicators;
use crate::types::{Candle, Params, Side};

#[derive(Debug, Clone, PartialEq)]
pub struct Breakout {
    pub z_thresh: f64,
    pub ma_window: usize,
    /// Window of the rolling standard deviation
    pub vwap_window: usize,
    pub exits: ExitRules,
}

pub struct BreakoutFeatures {
    mean: Vec<f64>,
    std: Vec<f64>,
    atr: Vec<f64>,
}

impl FeatureFrame for BreakoutFeatures {
    fn atr(&self, bar: usize) -> f64 {
        self.atr[bar]
    }
}

impl BreakoutFeatures {
    /// Undefined while the deviation is zero or still warming up
    fn z_score(&self, close: f64, bar: usize) -> Option<f64> {
        let std = self.std[bar];
        if std > 0.0 {
            Some((close - self.mean[bar]) / std)
        } else {
            None
        }
    }
}

impl Breakout {
    pub fn from_params(params: &Params) -> EngineResult<Self> {
        Ok(Self {
            z_thresh: require(params, "z_thresh")?,
            ma_window: integer("ma_window", require(params, "ma_window")?, 1)?,
            vwap_window: integer("vwap_window", require(params, "vwap_window")?, 2)?,
            exits: ExitRules::from_params(params)?,
        })
    }
}

impl Strategy for Breakout {
    type Features = BreakoutFeatures;

    fn first_bar(&self, settings: &SimulationSettings) -> usize {
        (self.ma_window - 1)
            .max(self.vwap_window - 1)
            .max(settings.breakout_atr_window)
    }

    fn features(
        &self,
        candles: &[Candle],
        settings: &SimulationSettings,
    ) -> EngineResult<BreakoutFeatures> {
        let closes = indicators::closes(candles);
        Ok(BreakoutFeatures {
            mean: indicators::rolling_mean(&closes, self.ma_window)?,
            std: indicators::rolling_std(&closes, self.vwap_window)?,
            atr: indicators::atr_proxy(&closes, settings.breakout_atr_window)?,
        })
    }

    fn exit_rules(&self) -> ExitRules {
        self.exits
    }

    fn entry_signal(&self, f: &BreakoutFeatures, candles: &[Candle], bar: usize) -> Option<Side> {
        let z = f.z_score(candles[bar].close, bar)?;
        if z > self.z_thresh {
            Some(Side::Long)
        } else if z < -self.z_thresh {
            Some(Side::Short)
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::EngineError;

    fn make_candles(prices: &[f64]) -> Vec<Candle> {
        prices
            .iter()
            .enumerate()
            .map(|(i, &p)| Candle {
                open_time: (i as i64) * 900_000,
                open: p,
                high: p,
                low: p,
                close: p,
                volume: 1000.0,
                close_time: ((i + 1) as i64) * 900_000 - 1,
            })
            .collect()
    }

    fn params(z_thresh: f64, ma_window: f64, vwap_window: f64) -> Params {
        [
            ("z_thresh", z_thresh),
            ("ma_window", ma_window),
            ("vwap_window", vwap_window),
            ("rr", 2.0),
            ("atr_mult", 1.0),
            ("max_hold", 10.0),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect()
    }

    #[test]
    fn test_constant_prices_never_enter() {
        // Even a negative threshold cannot fire while the deviation is zero
        let candles = make_candles(&[100.0; 80]);
        let strategy = Breakout::from_params(&params(-1.0, 20.0, 20.0)).unwrap();
        let trace = strategy
            .simulate(&candles, &SimulationSettings::default())
            .unwrap();
        assert!(trace.trades.is_empty());
        assert!(trace.positions.iter().all(|&p| p == 0));
    }

    #[test]
    fn test_warmup_uses_longest_window() {
        let candles = make_candles(&[100.0; 80]);
        let settings = SimulationSettings::default();

        let strategy = Breakout::from_params(&params(1.0, 30.0, 20.0)).unwrap();
        assert_eq!(strategy.simulate(&candles, &settings).unwrap().first_bar, 29);

        // The fixed ATR window dominates short averaging windows
        let strategy = Breakout::from_params(&params(1.0, 5.0, 5.0)).unwrap();
        assert_eq!(strategy.simulate(&candles, &settings).unwrap().first_bar, 14);
    }

    #[test]
    fn test_upside_break_goes_long() {
        let mut prices = vec![100.0, 101.0].repeat(15);
        prices.push(110.0);
        prices.extend_from_slice(&[110.0; 5]);
        let candles = make_candles(&prices);
        let strategy = Breakout::from_params(&params(1.0, 20.0, 20.0)).unwrap();
        let trace = strategy
            .simulate(&candles, &SimulationSettings::default())
            .unwrap();
        // Bar 30 is the spike
        assert_eq!(trace.positions[30 - trace.first_bar], 1);
        assert!(trace.positions[..30 - trace.first_bar].iter().all(|&p| p == 0));
    }

    #[test]
    fn test_trend_trades_both_directions() {
        let prices: Vec<f64> = (0..200)
            .map(|i| 100.0 + 5.0 - 10.0 * (i % 20) as f64 / 19.0)
            .collect();
        let candles = make_candles(&prices);
        let strategy = Breakout::from_params(&params(0.5, 20.0, 20.0)).unwrap();
        let trace = strategy
            .simulate(&candles, &SimulationSettings::default())
            .unwrap();
        assert_eq!(trace.len(), 181);
        assert!(trace.positions.contains(&1));
        assert!(trace.positions.contains(&-1));
    }

    #[test]
    fn test_vwap_window_below_two_is_rejected() {
        assert!(matches!(
            Breakout::from_params(&params(1.0, 20.0, 1.0)),
            Err(EngineError::InvalidParameter { .. })
        ));
        let mut p = params(1.0, 20.0, 20.0);
        p.remove("ma_window");
        assert_eq!(
            Breakout::from_params(&p),
            Err(EngineError::MissingParameter("ma_window".to_string()))
        );
    }
}
