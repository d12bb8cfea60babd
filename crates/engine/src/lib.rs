//! Coin Optimizer Engine: strategy simulation and genetic search
//!
//! Provides:
//! - Mean-reversion and breakout simulators over OHLCV candles
//! - Backtester with a pseudo-Sharpe fitness
//! - Genetic algorithm over strategy parameters
//! - One-sided t-test gate deciding adoption
//! - Concurrent per-symbol optimization runs
//! - Binance public API client and SQLite strategy registry

pub mod api;
pub mod backtest;
pub mod config;
pub mod error;
pub mod ga;
pub mod genome;
pub mod indicators;
pub mod population;
pub mod ports;
pub mod registry;
pub mod run;
pub mod significance;
pub mod strategy;
pub mod types;

// Re-exports for convenience
pub use api::BinanceClient;
pub use backtest::{pseudo_sharpe, BacktestReport, BacktestRow, Backtester};
pub use config::OptimizerConfig;
pub use error::{EngineError, EngineResult};
pub use ga::{GaConfig, GaEngine, GenerationStats};
pub use genome::{Genome, GenomeFactory, ParamRange};
pub use population::Population;
pub use ports::{CandleSource, RunDiagnostics, StrategyRegistry, StrategyUpdate};
pub use registry::{params_hash, SqliteRegistry};
pub use run::{
    optimize_symbol, symbol_seed, OptimizationRun, RunSummary, SymbolOptimization, SymbolReport,
    SymbolStatus,
};
pub use significance::{significance_test, SignificanceResult};
pub use strategy::{SimulationSettings, Strategy, StrategyKind};
pub use types::*;
