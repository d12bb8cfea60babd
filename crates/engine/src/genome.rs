//! Genomes and the factories that seed them

use rand::Rng;
use rand_distr::StandardNormal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::types::{Params, StrategyType};

/// Parameters that hold window lengths or bar counts
pub const INTEGER_PARAMS: [&str; 4] = ["window", "ma_window", "vwap_window", "max_hold"];

const INTEGER_SIGMA: f64 = 5.0;
const REAL_SIGMA: f64 = 0.1;
const INTEGER_FLOOR: f64 = 1.0;
const REAL_FLOOR: f64 = 0.01;

pub fn is_integer_param(name: &str) -> bool {
    INTEGER_PARAMS.contains(&name)
}

/// A candidate parameter set for one strategy family
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Genome {
    pub strategy_type: StrategyType,
    pub params: Params,
    /// Last backtest score; `None` until evaluated
    pub fitness: Option<f64>,
}

impl Genome {
    pub fn new(strategy_type: StrategyType, params: Params) -> Self {
        Self {
            strategy_type,
            params,
            fitness: None,
        }
    }

    /// Fitness used for ranking; unevaluated genomes rank last
    pub fn rank_fitness(&self) -> f64 {
        self.fitness.unwrap_or(f64::NEG_INFINITY)
    }

    /// Perturb each parameter with probability `rate`.
    ///
    /// Noise is Gaussian; integer parameters are truncated and floored at
    /// 1, all others floored at 0.01.
    pub fn mutate<R: Rng + ?Sized>(&mut self, rate: f64, rng: &mut R) {
        for (name, value) in self.params.iter_mut() {
            if rng.gen::<f64>() >= rate {
                continue;
            }
            let noise: f64 = rng.sample(StandardNormal);
            if is_integer_param(name) {
                *value = (*value + noise * INTEGER_SIGMA).trunc().max(INTEGER_FLOOR);
            } else {
                *value = (*value + noise * REAL_SIGMA).max(REAL_FLOOR);
            }
        }
    }
}

/// Inclusive sampling interval of one parameter
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ParamRange {
    pub low: f64,
    pub high: f64,
    pub integer: bool,
}

impl ParamRange {
    pub fn real(low: f64, high: f64) -> Self {
        Self {
            low,
            high,
            integer: false,
        }
    }

    pub fn integer(low: f64, high: f64) -> Self {
        Self {
            low,
            high,
            integer: true,
        }
    }

    pub fn is_valid(&self) -> bool {
        self.low.is_finite() && self.high.is_finite() && self.low <= self.high
    }

    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> f64 {
        if self.integer {
            let low = self.low.ceil() as i64;
            let high = self.high.floor() as i64;
            if high <= low {
                return low as f64;
            }
            rng.gen_range(low..=high) as f64
        } else if self.high <= self.low {
            self.low
        } else {
            self.low + rng.gen::<f64>() * (self.high - self.low)
        }
    }
}

/// Draws fresh genomes of one strategy family
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenomeFactory {
    pub strategy_type: StrategyType,
    pub ranges: BTreeMap<String, ParamRange>,
}

impl GenomeFactory {
    pub fn mean_reversion() -> Self {
        Self::from_ranges(
            StrategyType::MeanReversion,
            [
                ("threshold", ParamRange::real(0.0, 5.0)),
                ("window", ParamRange::integer(30.0, 120.0)),
                ("rr", ParamRange::real(1.0, 3.0)),
                ("atr_mult", ParamRange::real(0.3, 3.0)),
                ("max_hold", ParamRange::integer(3.0, 20.0)),
            ],
        )
    }

    pub fn breakout() -> Self {
        Self::from_ranges(
            StrategyType::Breakout,
            [
                ("z_thresh", ParamRange::real(-2.0, 2.0)),
                ("ma_window", ParamRange::integer(30.0, 120.0)),
                ("vwap_window", ParamRange::integer(30.0, 100.0)),
                ("rr", ParamRange::real(1.0, 3.0)),
                ("atr_mult", ParamRange::real(1.0, 3.0)),
                ("max_hold", ParamRange::integer(5.0, 20.0)),
            ],
        )
    }

    pub fn for_type(strategy_type: StrategyType) -> Self {
        match strategy_type {
            StrategyType::MeanReversion => Self::mean_reversion(),
            StrategyType::Breakout => Self::breakout(),
        }
    }

    fn from_ranges<const N: usize>(
        strategy_type: StrategyType,
        ranges: [(&str, ParamRange); N],
    ) -> Self {
        Self {
            strategy_type,
            ranges: ranges
                .into_iter()
                .map(|(name, range)| (name.to_string(), range))
                .collect(),
        }
    }

    /// Override (or add) the sampling range of `name`
    pub fn with_range(mut self, name: &str, low: f64, high: f64) -> Self {
        let range = if is_integer_param(name) {
            ParamRange::integer(low, high)
        } else {
            ParamRange::real(low, high)
        };
        self.ranges.insert(name.to_string(), range);
        self
    }

    pub fn create<R: Rng + ?Sized>(&self, rng: &mut R) -> Genome {
        let params = self
            .ranges
            .iter()
            .map(|(name, range)| (name.clone(), range.sample(rng)))
            .collect();
        Genome::new(self.strategy_type, params)
    }
}
