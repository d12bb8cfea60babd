//! VWAP mean reversion
//!
//! Fades closes stretched more than `threshold` ATRs from the rolling VWAP,
//! but only on the bar where the close EMA changes slope and when the VWAP
//! itself is drifting back toward the close.

use super::{integer, require, ExitRules, FeatureFrame, Strategy, SimulationSettings};
use crate::error::EngineResult;
use crate::indicators;
use crate::types::{Candle, Params, Side};

#[derive(Debug, Clone, PartialEq)]
pub struct MeanReversion {
    pub threshold: f64,
    pub window: usize,
    pub exits: ExitRules,
}

pub struct MeanReversionFeatures {
    vwap: Vec<f64>,
    atr: Vec<f64>,
    vwap_roc: Vec<f64>,
    ema_diff: Vec<f64>,
}

impl FeatureFrame for MeanReversionFeatures {
    fn atr(&self, bar: usize) -> f64 {
        self.atr[bar]
    }
}

impl MeanReversion {
    pub fn from_params(params: &Params) -> EngineResult<Self> {
        Ok(Self {
            threshold: require(params, "threshold")?,
            window: integer("window", require(params, "window")?, 1)?,
            exits: ExitRules::from_params(params)?,
        })
    }
}

impl Strategy for MeanReversion {
    type Features = MeanReversionFeatures;

    fn first_bar(&self, settings: &SimulationSettings) -> usize {
        (self.window - 1 + settings.roc_period).max(self.window).max(2)
    }

    fn features(
        &self,
        candles: &[Candle],
        settings: &SimulationSettings,
    ) -> EngineResult<MeanReversionFeatures> {
        let closes = indicators::closes(candles);
        let vwap = indicators::rolling_vwap(candles, self.window)?;
        let vwap_roc = indicators::rate_of_change(&vwap, settings.roc_period);
        let ema = indicators::ema(&closes, settings.ema_span)?;
        Ok(MeanReversionFeatures {
            atr: indicators::atr_proxy(&closes, self.window)?,
            ema_diff: indicators::diff(&ema),
            vwap,
            vwap_roc,
        })
    }

    fn exit_rules(&self) -> ExitRules {
        self.exits
    }

    fn entry_signal(
        &self,
        f: &MeanReversionFeatures,
        candles: &[Candle],
        bar: usize,
    ) -> Option<Side> {
        let close = candles[bar].close;
        let band = self.threshold * f.atr[bar];
        let slope_flip = f.ema_diff[bar - 1] * f.ema_diff[bar] < 0.0;
        if !slope_flip {
            return None;
        }

        if close < f.vwap[bar] - band && f.vwap_roc[bar] > 0.0 {
            Some(Side::Long)
        } else if close > f.vwap[bar] + band && f.vwap_roc[bar] < 0.0 {
            Some(Side::Short)
        } else {
            None
        }
    }
}
