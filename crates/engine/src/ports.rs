//! Boundaries to the candle source and the strategy registry

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::EngineResult;
use crate::types::{Candle, Params, StrategyType};

/// Supplies historical candles, oldest first
#[async_trait]
pub trait CandleSource: Send + Sync {
    /// The most recent `lookback` candles of `interval` for `symbol`.
    ///
    /// Unknown symbols and unreachable sources fail with `DataUnavailable`;
    /// an empty series is a valid answer for a newly listed symbol.
    async fn fetch_candles(
        &self,
        symbol: &str,
        interval: &str,
        lookback: usize,
    ) -> EngineResult<Vec<Candle>>;
}

/// Stores the adopted strategy per symbol
#[async_trait]
pub trait StrategyRegistry: Send + Sync {
    async fn list_active_symbols(&self) -> EngineResult<Vec<String>>;

    /// Idempotent upsert keyed by symbol
    async fn record_strategy(&self, update: &StrategyUpdate) -> EngineResult<()>;
}

/// Run details an adapter may keep as history
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunDiagnostics {
    pub run_id: String,
    pub seed: u64,
    /// Champion strategy even when it was not adopted
    pub strategy_type: Option<StrategyType>,
    pub params: Option<Params>,
    pub fitness: Option<f64>,
    pub total_return: Option<f64>,
    pub t_stat: Option<f64>,
    pub p_value: Option<f64>,
    pub samples: usize,
    pub trades: usize,
    pub win_rate: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrategyUpdate {
    pub symbol: String,
    pub strategy_type: Option<StrategyType>,
    pub params: Option<Params>,
    pub active: bool,
    pub total_return: Option<f64>,
    pub diagnostics: Option<RunDiagnostics>,
}

impl StrategyUpdate {
    pub fn adopted(
        symbol: &str,
        strategy_type: StrategyType,
        params: Params,
        total_return: f64,
    ) -> Self {
        Self {
            symbol: symbol.to_string(),
            strategy_type: Some(strategy_type),
            params: Some(params),
            active: true,
            total_return: Some(total_return),
            diagnostics: None,
        }
    }

    /// Null record: the symbol has no strategy worth trading
    pub fn rejected(symbol: &str) -> Self {
        Self {
            symbol: symbol.to_string(),
            strategy_type: None,
            params: None,
            active: false,
            total_return: None,
            diagnostics: None,
        }
    }

    pub fn with_diagnostics(mut self, diagnostics: RunDiagnostics) -> Self {
        self.diagnostics = Some(diagnostics);
        self
    }
}
