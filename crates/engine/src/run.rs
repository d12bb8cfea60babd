//! One optimization pass over a set of symbols
//!
//! Each symbol is fetched, evolved on its training window, re-simulated
//! over the full window and gated on the held-out tail. Symbols run
//! concurrently on the blocking pool; registry writes happen one at a time
//! in the collecting loop.

use chrono::{DateTime, Utc};
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::backtest::{BacktestReport, Backtester};
use crate::config::OptimizerConfig;
use crate::error::{EngineError, EngineResult};
use crate::ga::{GaEngine, GenerationStats};
use crate::genome::Genome;
use crate::ports::{CandleSource, RunDiagnostics, StrategyRegistry, StrategyUpdate};
use crate::significance::{significance_test, SignificanceResult};
use crate::types::{ensure_ordered, Candle, Params, StrategyType};

// =============================================================================
// Per-symbol optimization
// =============================================================================

/// Everything learned about one symbol in one pass
#[derive(Debug, Clone)]
pub struct SymbolOptimization {
    pub symbol: String,
    pub seed: u64,
    pub champion: Genome,
    /// Full-window backtest of the champion; `None` if it cannot be simulated
    pub report: Option<BacktestReport>,
    /// First candle index of the held-out tail
    pub holdout_start: usize,
    pub significance: SignificanceResult,
    pub history: Vec<GenerationStats>,
}

impl SymbolOptimization {
    pub fn adopted(&self) -> bool {
        self.significance.significant
    }

    pub fn total_return(&self) -> Option<f64> {
        self.report.as_ref().map(|r| r.total_return)
    }

    /// Registry write for this outcome
    pub fn to_update(&self, run_id: &str) -> StrategyUpdate {
        let update = match (&self.report, self.adopted()) {
            (Some(report), true) => StrategyUpdate::adopted(
                &self.symbol,
                self.champion.strategy_type,
                self.champion.params.clone(),
                report.total_return,
            ),
            _ => StrategyUpdate::rejected(&self.symbol),
        };
        update.with_diagnostics(RunDiagnostics {
            run_id: run_id.to_string(),
            seed: self.seed,
            strategy_type: Some(self.champion.strategy_type),
            params: Some(self.champion.params.clone()),
            fitness: self.champion.fitness,
            total_return: self.total_return(),
            t_stat: self.significance.t_stat,
            p_value: self.significance.p_value,
            samples: self.significance.samples,
            trades: self.report.as_ref().map_or(0, |r| r.trade_count()),
            win_rate: self.report.as_ref().and_then(|r| r.win_rate()),
        })
    }
}

/// Seed of a symbol's generator, independent of scheduling order
pub fn symbol_seed(run_seed: u64, symbol: &str) -> u64 {
    let mut hasher = Sha256::new();
    hasher.update(run_seed.to_le_bytes());
    hasher.update(symbol.as_bytes());
    let digest = hasher.finalize();
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&digest[..8]);
    u64::from_le_bytes(bytes)
}

/// Index splitting `len` candles into training bars and the held-out tail
pub fn holdout_split(len: usize, fraction: f64) -> usize {
    let holdout = ((len as f64) * fraction).round() as usize;
    len - holdout.min(len)
}

/// Evolve, re-simulate and gate one symbol. CPU-bound and deterministic.
pub fn optimize_symbol(
    symbol: &str,
    candles: &[Candle],
    config: &OptimizerConfig,
    seed: u64,
) -> EngineResult<SymbolOptimization> {
    ensure_ordered(candles)?;
    let split = holdout_split(candles.len(), config.holdout_fraction);
    // Without a holdout the gate tests the whole in-sample series
    let gate_from = if split == candles.len() { 0 } else { split };

    let engine = GaEngine::new(config.ga.clone(), Backtester::new(config.simulation))?;
    let mut rng = StdRng::seed_from_u64(seed);
    let (champion, history) = engine.evolve_with_history(&candles[..split], &mut rng)?;

    let report = if champion.rank_fitness().is_finite() {
        match engine.backtester().run(&champion, candles) {
            Ok(report) => Some(report),
            Err(e) => {
                warn!(symbol, error = %e, "Champion could not be re-simulated");
                None
            }
        }
    } else {
        None
    };

    let significance = match &report {
        Some(report) => significance_test(&report.strategy_returns_from(gate_from), config.alpha),
        None => SignificanceResult::inconclusive(0),
    };

    Ok(SymbolOptimization {
        symbol: symbol.to_string(),
        seed,
        champion,
        report,
        holdout_start: gate_from,
        significance,
        history,
    })
}

// =============================================================================
// Run summary
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", content = "reason", rename_all = "snake_case")]
pub enum SymbolStatus {
    Adopted,
    Rejected,
    Skipped(String),
    Failed(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SymbolReport {
    pub symbol: String,
    pub status: SymbolStatus,
    pub strategy_type: Option<StrategyType>,
    pub params: Option<Params>,
    pub fitness: Option<f64>,
    pub total_return: Option<f64>,
    pub p_value: Option<f64>,
    pub trades: usize,
    pub elapsed_ms: u64,
}

impl SymbolReport {
    fn without_result(symbol: &str, status: SymbolStatus, elapsed: Duration) -> Self {
        Self {
            symbol: symbol.to_string(),
            status,
            strategy_type: None,
            params: None,
            fitness: None,
            total_return: None,
            p_value: None,
            trades: 0,
            elapsed_ms: elapsed.as_millis() as u64,
        }
    }

    fn from_optimization(opt: &SymbolOptimization, status: SymbolStatus, elapsed: Duration) -> Self {
        Self {
            symbol: opt.symbol.clone(),
            status,
            strategy_type: Some(opt.champion.strategy_type),
            params: Some(opt.champion.params.clone()),
            fitness: opt.champion.fitness.filter(|f| f.is_finite()),
            total_return: opt.total_return(),
            p_value: opt.significance.p_value,
            trades: opt.report.as_ref().map_or(0, |r| r.trade_count()),
            elapsed_ms: elapsed.as_millis() as u64,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub run_id: String,
    pub seed: u64,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    /// In the order the symbols were requested
    pub results: Vec<SymbolReport>,
}

impl RunSummary {
    fn count(&self, pred: impl Fn(&SymbolStatus) -> bool) -> usize {
        self.results.iter().filter(|r| pred(&r.status)).count()
    }

    pub fn adopted(&self) -> usize {
        self.count(|s| matches!(s, SymbolStatus::Adopted))
    }

    pub fn rejected(&self) -> usize {
        self.count(|s| matches!(s, SymbolStatus::Rejected))
    }

    pub fn skipped(&self) -> usize {
        self.count(|s| matches!(s, SymbolStatus::Skipped(_)))
    }

    pub fn failed(&self) -> usize {
        self.count(|s| matches!(s, SymbolStatus::Failed(_)))
    }

    pub fn get(&self, symbol: &str) -> Option<&SymbolReport> {
        self.results.iter().find(|r| r.symbol == symbol)
    }
}

// =============================================================================
// Orchestration
// =============================================================================

/// What a symbol task hands back to the collecting loop
enum TaskOutcome {
    Optimized(Box<SymbolOptimization>),
    Skipped(String),
    Failed(String),
}

pub struct OptimizationRun {
    config: OptimizerConfig,
    seed: u64,
    run_id: String,
    symbol_timeout: Option<Duration>,
    source: Arc<dyn CandleSource>,
    registry: Arc<dyn StrategyRegistry>,
}

impl OptimizationRun {
    pub fn new(
        config: OptimizerConfig,
        source: Arc<dyn CandleSource>,
        registry: Arc<dyn StrategyRegistry>,
    ) -> EngineResult<Self> {
        config.validate()?;
        let seed = config.seed.unwrap_or_else(rand::random);
        let run_id = format!("{}-{:016x}", Utc::now().format("%Y%m%dT%H%M%S"), seed);
        let symbol_timeout = config.symbol_timeout_secs.map(Duration::from_secs);
        Ok(Self {
            config,
            seed,
            run_id,
            symbol_timeout,
            source,
            registry,
        })
    }

    /// Override the per-symbol wall-clock budget
    pub fn with_symbol_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.symbol_timeout = timeout;
        self
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }

    /// Optimize `symbols`, or every active registry symbol when `None`.
    ///
    /// Per-symbol failures are reported in the summary; only a failure to
    /// list the registry's symbols aborts the pass.
    pub async fn run_all(&self, symbols: Option<Vec<String>>) -> EngineResult<RunSummary> {
        let started_at = Utc::now();
        let symbols = match symbols {
            Some(symbols) => symbols,
            None => self.registry.list_active_symbols().await?,
        };

        info!(
            run_id = %self.run_id,
            seed = self.seed,
            symbols = symbols.len(),
            concurrency = self.config.concurrency,
            "Starting optimization pass"
        );

        let semaphore = Arc::new(Semaphore::new(self.config.concurrency));
        let mut tasks = JoinSet::new();
        for (index, symbol) in symbols.iter().enumerate() {
            let symbol = symbol.clone();
            let config = self.config.clone();
            let source = Arc::clone(&self.source);
            let semaphore = Arc::clone(&semaphore);
            let seed = symbol_seed(self.seed, &symbol);
            let timeout = self.symbol_timeout;

            tasks.spawn(async move {
                let started = Instant::now();
                let outcome = match semaphore.acquire_owned().await {
                    Ok(_permit) => {
                        optimize_task(&symbol, source.as_ref(), config, seed, timeout).await
                    }
                    Err(e) => TaskOutcome::Failed(format!("scheduler closed: {e}")),
                };
                (index, symbol, outcome, started.elapsed())
            });
        }

        let mut results: Vec<Option<SymbolReport>> = vec![None; symbols.len()];
        while let Some(joined) = tasks.join_next().await {
            let (index, symbol, outcome, elapsed) = match joined {
                Ok(done) => done,
                Err(e) => {
                    error!(error = %e, "Symbol task aborted");
                    continue;
                }
            };
            let report = self.collect(&symbol, outcome, elapsed).await;
            results[index] = Some(report);
        }

        let results = results
            .into_iter()
            .zip(&symbols)
            .map(|(report, symbol)| {
                report.unwrap_or_else(|| {
                    SymbolReport::without_result(
                        symbol,
                        SymbolStatus::Failed("task aborted".to_string()),
                        Duration::ZERO,
                    )
                })
            })
            .collect();

        let summary = RunSummary {
            run_id: self.run_id.clone(),
            seed: self.seed,
            started_at,
            finished_at: Utc::now(),
            results,
        };
        info!(
            run_id = %summary.run_id,
            adopted = summary.adopted(),
            rejected = summary.rejected(),
            skipped = summary.skipped(),
            failed = summary.failed(),
            "Optimization pass complete"
        );
        Ok(summary)
    }

    /// Persist one symbol's outcome and turn it into a report
    async fn collect(&self, symbol: &str, outcome: TaskOutcome, elapsed: Duration) -> SymbolReport {
        match outcome {
            TaskOutcome::Skipped(reason) => {
                warn!(symbol, reason = %reason, "Symbol skipped");
                SymbolReport::without_result(symbol, SymbolStatus::Skipped(reason), elapsed)
            }
            TaskOutcome::Failed(reason) => {
                warn!(symbol, reason = %reason, "Symbol failed");
                SymbolReport::without_result(symbol, SymbolStatus::Failed(reason), elapsed)
            }
            TaskOutcome::Optimized(opt) => {
                let update = opt.to_update(&self.run_id);
                if let Err(e) = self.registry.record_strategy(&update).await {
                    warn!(symbol, error = %e, "Registry write failed");
                    return SymbolReport::from_optimization(
                        &opt,
                        SymbolStatus::Failed(e.to_string()),
                        elapsed,
                    );
                }

                let status = if opt.adopted() {
                    SymbolStatus::Adopted
                } else {
                    SymbolStatus::Rejected
                };
                info!(
                    symbol,
                    strategy = %opt.champion.strategy_type,
                    fitness = opt.champion.rank_fitness(),
                    p_value = ?opt.significance.p_value,
                    adopted = opt.adopted(),
                    elapsed_ms = elapsed.as_millis() as u64,
                    "Symbol optimized"
                );
                SymbolReport::from_optimization(&opt, status, elapsed)
            }
        }
    }
}

async fn optimize_task(
    symbol: &str,
    source: &dyn CandleSource,
    config: OptimizerConfig,
    seed: u64,
    timeout: Option<Duration>,
) -> TaskOutcome {
    let candles = match source
        .fetch_candles(symbol, &config.interval, config.lookback)
        .await
    {
        Ok(candles) if candles.is_empty() => {
            return TaskOutcome::Skipped("no candles available".to_string())
        }
        Ok(candles) => candles,
        Err(e) => return TaskOutcome::Skipped(e.to_string()),
    };
    debug!(symbol, bars = candles.len(), "Candles fetched");

    let owned_symbol = symbol.to_string();
    let handle = tokio::task::spawn_blocking(move || {
        optimize_symbol(&owned_symbol, &candles, &config, seed)
    });

    // On timeout the blocking job is abandoned: it runs to completion and
    // its result is dropped
    let joined = match timeout {
        Some(limit) => match tokio::time::timeout(limit, handle).await {
            Ok(joined) => joined,
            Err(_) => {
                return TaskOutcome::Failed(format!("timed out after {}s", limit.as_secs_f64()))
            }
        },
        None => handle.await,
    };

    match joined {
        Ok(Ok(opt)) => TaskOutcome::Optimized(Box::new(opt)),
        Ok(Err(e @ EngineError::UnorderedSeries { .. })) => TaskOutcome::Skipped(e.to_string()),
        Ok(Err(e)) => TaskOutcome::Failed(e.to_string()),
        Err(e) => TaskOutcome::Failed(format!("optimization panicked: {e}")),
    }
}
