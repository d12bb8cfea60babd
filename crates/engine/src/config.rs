//! Optimizer configuration with environment overrides

use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::error::{EngineError, EngineResult};
use crate::ga::GaConfig;
use crate::significance::DEFAULT_ALPHA;
use crate::strategy::SimulationSettings;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptimizerConfig {
    /// Candle interval requested from the source (e.g. "15m")
    pub interval: String,
    /// Number of most recent candles optimized per symbol
    pub lookback: usize,
    /// Significance level of the adoption gate
    pub alpha: f64,
    /// Trailing share of each series kept out of the search and used by the gate
    pub holdout_fraction: f64,
    /// Symbols optimized at the same time
    pub concurrency: usize,
    /// Wall-clock budget per symbol; `None` disables it
    pub symbol_timeout_secs: Option<u64>,
    /// Run seed; drawn at random when absent
    pub seed: Option<u64>,
    pub ga: GaConfig,
    pub simulation: SimulationSettings,
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self {
            interval: "15m".to_string(),
            lookback: 672,
            alpha: DEFAULT_ALPHA,
            holdout_fraction: 0.3,
            concurrency: 4,
            symbol_timeout_secs: Some(900),
            seed: None,
            ga: GaConfig::default(),
            simulation: SimulationSettings::default(),
        }
    }
}

fn env_parse<T: FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.trim().parse().ok())
}

impl OptimizerConfig {
    /// Defaults overridden by `OPTIMIZER_*` environment variables.
    /// Absent or unparsable values keep the default.
    pub fn from_env() -> Self {
        let mut cfg = Self::default();

        if let Ok(interval) = std::env::var("OPTIMIZER_INTERVAL") {
            if !interval.trim().is_empty() {
                cfg.interval = interval.trim().to_string();
            }
        }
        if let Some(v) = env_parse("OPTIMIZER_LOOKBACK") {
            cfg.lookback = v;
        }
        if let Some(v) = env_parse("OPTIMIZER_ALPHA") {
            cfg.alpha = v;
        }
        if let Some(v) = env_parse("OPTIMIZER_HOLDOUT_FRACTION") {
            cfg.holdout_fraction = v;
        }
        if let Some(v) = env_parse("OPTIMIZER_CONCURRENCY") {
            cfg.concurrency = v;
        }
        if let Some(v) = env_parse::<u64>("OPTIMIZER_SYMBOL_TIMEOUT_SECS") {
            // 0 disables the budget
            cfg.symbol_timeout_secs = (v > 0).then_some(v);
        }
        if let Some(v) = env_parse("OPTIMIZER_SEED") {
            cfg.seed = Some(v);
        }
        if let Some(v) = env_parse("OPTIMIZER_POPULATION") {
            cfg.ga.population_size = v;
        }
        if let Some(v) = env_parse("OPTIMIZER_GENERATIONS") {
            cfg.ga.generations = v;
        }
        if let Some(v) = env_parse("OPTIMIZER_MUTATION_RATE") {
            cfg.ga.mutation_rate = v;
        }
        if let Some(v) = env_parse("OPTIMIZER_ELITE_SIZE") {
            cfg.ga.elite_size = v;
        }
        if let Some(v) = env_parse("OPTIMIZER_SLIPPAGE") {
            cfg.simulation.slippage = v;
        }

        cfg
    }

    pub fn validate(&self) -> EngineResult<()> {
        let invalid = |msg: String| Err(EngineError::InvalidConfig(msg));

        if self.interval.is_empty() {
            return invalid("interval must not be empty".into());
        }
        if self.lookback < 2 {
            return invalid(format!("lookback {} is too short", self.lookback));
        }
        if !(self.alpha > 0.0 && self.alpha < 1.0) {
            return invalid(format!("alpha {} is outside (0, 1)", self.alpha));
        }
        if !(0.0..1.0).contains(&self.holdout_fraction) {
            return invalid(format!(
                "holdout_fraction {} is outside [0, 1)",
                self.holdout_fraction
            ));
        }
        if self.concurrency == 0 {
            return invalid("concurrency must be at least 1".into());
        }
        if !(0.0..1.0).contains(&self.simulation.slippage) {
            return invalid(format!(
                "slippage {} is outside [0, 1)",
                self.simulation.slippage
            ));
        }
        if self.simulation.ema_span == 0 || self.simulation.breakout_atr_window == 0 {
            return invalid("indicator spans must be at least 1".into());
        }
        self.ga.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cfg = OptimizerConfig::default();
        assert_eq!(cfg.interval, "15m");
        assert_eq!(cfg.lookback, 672);
        assert_eq!(cfg.concurrency, 4);
        assert_eq!(cfg.ga.population_size, 80);
        assert_eq!(cfg.simulation.cooldown_bars, 2);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn test_from_env_overrides_and_ignores_garbage() {
        // Only this test touches these variables
        std::env::set_var("OPTIMIZER_LOOKBACK", "1000");
        std::env::set_var("OPTIMIZER_GENERATIONS", "not-a-number");
        std::env::set_var("OPTIMIZER_SYMBOL_TIMEOUT_SECS", "0");
        std::env::set_var("OPTIMIZER_SEED", "42");

        let cfg = OptimizerConfig::from_env();
        assert_eq!(cfg.lookback, 1000);
        assert_eq!(cfg.ga.generations, 30);
        assert_eq!(cfg.symbol_timeout_secs, None);
        assert_eq!(cfg.seed, Some(42));

        for key in [
            "OPTIMIZER_LOOKBACK",
            "OPTIMIZER_GENERATIONS",
            "OPTIMIZER_SYMBOL_TIMEOUT_SECS",
            "OPTIMIZER_SEED",
        ] {
            std::env::remove_var(key);
        }
    }

    #[test]
    fn test_validate_rejects_nonsense() {
        let cases = [
            OptimizerConfig {
                alpha: 0.0,
                ..OptimizerConfig::default()
            },
            OptimizerConfig {
                holdout_fraction: 1.0,
                ..OptimizerConfig::default()
            },
            OptimizerConfig {
                concurrency: 0,
                ..OptimizerConfig::default()
            },
            OptimizerConfig {
                lookback: 1,
                ..OptimizerConfig::default()
            },
        ];
        for cfg in cases {
            assert!(cfg.validate().is_err(), "{cfg:?}");
        }

        let mut cfg = OptimizerConfig::default();
        cfg.ga.elite_size = 1_000;
        assert!(cfg.validate().is_err());
    }
}
