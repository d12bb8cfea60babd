//! Core data types shared by the simulators, the backtester and the GA

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::{EngineError, EngineResult};

/// A single candlestick (OHLCV)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    pub open_time: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
    pub close_time: i64,
}

/// Named strategy parameters. Ordered so seeded runs iterate deterministically.
pub type Params = BTreeMap<String, f64>;

/// The two built-in strategy families
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyType {
    MeanReversion,
    Breakout,
}

impl StrategyType {
    pub fn all() -> [StrategyType; 2] {
        [StrategyType::MeanReversion, StrategyType::Breakout]
    }

    /// Stable identifier used for persistence
    pub fn as_str(&self) -> &'static str {
        match self {
            StrategyType::MeanReversion => "mean_reversion",
            StrategyType::Breakout => "breakout",
        }
    }
}

impl std::fmt::Display for StrategyType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StrategyType::MeanReversion => write!(f, "Mean Reversion"),
            StrategyType::Breakout => write!(f, "Breakout"),
        }
    }
}

impl std::str::FromStr for StrategyType {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "mean_reversion" | "meanreversion" => Ok(StrategyType::MeanReversion),
            "breakout" => Ok(StrategyType::Breakout),
            other => Err(EngineError::InvalidParameter {
                name: "strategy_type".to_string(),
                reason: format!("unknown strategy type '{other}'"),
            }),
        }
    }
}

/// Position side during simulation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Long,
    Short,
}

impl Side {
    /// Position value written to the trace (+1 long, -1 short)
    pub fn sign(&self) -> i8 {
        match self {
            Side::Long => 1,
            Side::Short => -1,
        }
    }
}

/// Reject series whose timestamps are not strictly increasing
pub fn ensure_ordered(candles: &[Candle]) -> EngineResult<()> {
    for (i, pair) in candles.windows(2).enumerate() {
        if pair[1].open_time <= pair[0].open_time {
            return Err(EngineError::UnorderedSeries { index: i + 1 });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candle(open_time: i64, close: f64) -> Candle {
        Candle {
            open_time,
            open: close,
            high: close,
            low: close,
            close,
            volume: 1.0,
            close_time: open_time + 59_999,
        }
    }

    #[test]
    fn test_ensure_ordered_accepts_increasing_series() {
        let candles = vec![candle(0, 1.0), candle(60_000, 1.0), candle(120_000, 1.0)];
        assert!(ensure_ordered(&candles).is_ok());
        assert!(ensure_ordered(&[]).is_ok());
    }

    #[test]
    fn test_ensure_ordered_rejects_duplicate_timestamp() {
        let candles = vec![candle(0, 1.0), candle(60_000, 1.0), candle(60_000, 1.0)];
        assert_eq!(
            ensure_ordered(&candles),
            Err(EngineError::UnorderedSeries { index: 2 })
        );
    }

    #[test]
    fn test_strategy_type_round_trip() {
        for st in StrategyType::all() {
            let parsed: StrategyType = st.as_str().parse().unwrap();
            assert_eq!(parsed, st);
        }
        assert!("momentum".parse::<StrategyType>().is_err());
        assert_eq!(
            serde_json::to_string(&StrategyType::MeanReversion).unwrap(),
            "\"mean_reversion\""
        );
    }
}
