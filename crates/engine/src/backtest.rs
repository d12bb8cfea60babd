//! Backtester: turns a simulation trace into returns and a fitness score

use serde::{Deserialize, Serialize};

use crate::error::EngineResult;
use crate::genome::Genome;
use crate::indicators::{is_constant, mean_and_std};
use crate::strategy::{SimulationSettings, SimulationTrace, StrategyKind, Trade};
use crate::types::{ensure_ordered, Candle, Params, StrategyType};

/// Added to the deviation so a near-flat series cannot divide by zero
pub const FITNESS_EPSILON: f64 = 1e-9;

/// One annotated trace row
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BacktestRow {
    pub open_time: i64,
    pub close: f64,
    pub position: i8,
    pub outcome: u8,
    /// Close-to-close return; undefined on the first row
    pub raw_return: Option<f64>,
    /// Previous row's position times this row's raw return
    pub strategy_return: Option<f64>,
    /// Compounded growth of one unit of capital
    pub equity: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BacktestReport {
    pub strategy_type: StrategyType,
    /// Candle index of the first row
    pub first_bar: usize,
    pub rows: Vec<BacktestRow>,
    pub total_return: f64,
    pub fitness: f64,
    pub trades: Vec<Trade>,
}

impl BacktestReport {
    /// Defined strategy returns in row order
    pub fn strategy_returns(&self) -> Vec<f64> {
        self.rows.iter().filter_map(|r| r.strategy_return).collect()
    }

    /// Defined strategy returns of rows at candle index `bar` or later
    pub fn strategy_returns_from(&self, bar: usize) -> Vec<f64> {
        let skip = bar.saturating_sub(self.first_bar);
        self.rows
            .iter()
            .skip(skip)
            .filter_map(|r| r.strategy_return)
            .collect()
    }

    pub fn trade_count(&self) -> usize {
        self.trades.len()
    }

    /// Share of completed trades that made money
    pub fn win_rate(&self) -> Option<f64> {
        if self.trades.is_empty() {
            return None;
        }
        let wins = self.trades.iter().filter(|t| t.profit > 0.0).count();
        Some(wins as f64 / self.trades.len() as f64)
    }
}

/// Pseudo-Sharpe ratio of a per-bar return series.
///
/// Fewer than two returns or a zero deviation is degenerate and scores
/// negative infinity, never NaN.
pub fn pseudo_sharpe(returns: &[f64]) -> f64 {
    if is_constant(returns) {
        return f64::NEG_INFINITY;
    }
    match mean_and_std(returns) {
        Some((mean, std)) if std > 0.0 => {
            let score = mean / (std + FITNESS_EPSILON);
            if score.is_nan() {
                f64::NEG_INFINITY
            } else {
                score
            }
        }
        _ => f64::NEG_INFINITY,
    }
}

#[derive(Debug, Clone, Default)]
pub struct Backtester {
    pub settings: SimulationSettings,
}

impl Backtester {
    pub fn new(settings: SimulationSettings) -> Self {
        Self { settings }
    }

    pub fn run(&self, genome: &Genome, candles: &[Candle]) -> EngineResult<BacktestReport> {
        self.run_params(genome.strategy_type, &genome.params, candles)
    }

    pub fn run_params(
        &self,
        strategy_type: StrategyType,
        params: &Params,
        candles: &[Candle],
    ) -> EngineResult<BacktestReport> {
        ensure_ordered(candles)?;
        let strategy = StrategyKind::from_params(strategy_type, params)?;
        let trace = strategy.simulate(candles, &self.settings)?;
        Ok(annotate(strategy_type, candles, trace))
    }
}

/// Attach prices and returns to a simulation trace
pub(crate) fn annotate(
    strategy_type: StrategyType,
    candles: &[Candle],
    trace: SimulationTrace,
) -> BacktestReport {
    let mut rows = Vec::with_capacity(trace.len());
    let mut equity = 1.0;
    let mut total_return = 0.0;
    let mut returns = Vec::with_capacity(trace.len());

    for (i, (&position, &outcome)) in trace.positions.iter().zip(&trace.outcomes).enumerate() {
        let candle = &candles[trace.first_bar + i];
        let (raw_return, strategy_return) = if i == 0 {
            (None, None)
        } else {
            let prev_close = candles[trace.first_bar + i - 1].close;
            let raw = candle.close / prev_close - 1.0;
            let held = trace.positions[i - 1] as f64;
            (Some(raw), Some(held * raw))
        };

        if let Some(sr) = strategy_return.filter(|sr| !sr.is_nan()) {
            equity *= 1.0 + sr;
            total_return += sr;
            returns.push(sr);
        }

        rows.push(BacktestRow {
            open_time: candle.open_time,
            close: candle.close,
            position,
            outcome,
            raw_return,
            strategy_return,
            equity,
        });
    }

    BacktestReport {
        strategy_type,
        first_bar: trace.first_bar,
        rows,
        total_return,
        fitness: pseudo_sharpe(&returns),
        trades: trace.trades,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

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

    fn forced_trace(len: usize, from: usize) -> SimulationTrace {
        SimulationTrace {
            first_bar: 0,
            positions: (0..len).map(|i| if i >= from { 1 } else { 0 }).collect(),
            outcomes: vec![0; len],
            trades: Vec::new(),
        }
    }

    fn mr_params() -> Params {
        [
            ("threshold", 0.5),
            ("window", 10.0),
            ("rr", 2.0),
            ("atr_mult", 1.0),
            ("max_hold", 10.0),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect()
    }

    #[test]
    fn test_no_look_ahead() {
        let candles = make_candles(&[100.0, 101.0, 103.0, 102.0, 105.0, 104.0]);
        let k = 3;
        let report = annotate(StrategyType::Breakout, &candles, forced_trace(6, k));

        assert_eq!(report.rows[k].strategy_return, Some(0.0));
        let raw = report.rows[k + 1].raw_return.unwrap();
        assert!((raw - (105.0 / 102.0 - 1.0)).abs() < 1e-12);
        assert_eq!(report.rows[k + 1].strategy_return, Some(raw));
    }

    #[test]
    fn test_first_row_has_no_returns() {
        let candles = make_candles(&[100.0, 110.0, 99.0]);
        let report = annotate(StrategyType::Breakout, &candles, forced_trace(3, 0));
        assert_eq!(report.rows[0].raw_return, None);
        assert_eq!(report.rows[0].strategy_return, None);
        assert_eq!(report.rows[0].equity, 1.0);
        assert_eq!(report.strategy_returns().len(), 2);
    }

    #[test]
    fn test_total_return_and_equity() {
        let candles = make_candles(&[100.0, 110.0, 99.0]);
        let report = annotate(StrategyType::Breakout, &candles, forced_trace(3, 0));
        // +10% then -10%
        assert!((report.total_return - 0.0).abs() < 1e-12);
        assert!((report.rows[2].equity - 0.99).abs() < 1e-12);
    }

    #[test]
    fn test_pseudo_sharpe() {
        assert_eq!(pseudo_sharpe(&[]), f64::NEG_INFINITY);
        assert_eq!(pseudo_sharpe(&[0.01]), f64::NEG_INFINITY);
        assert_eq!(pseudo_sharpe(&[0.0, 0.0, 0.0]), f64::NEG_INFINITY);
        assert_eq!(pseudo_sharpe(&[0.01; 10]), f64::NEG_INFINITY);

        let score = pseudo_sharpe(&[0.01, 0.03]);
        let expected = 0.02 / (0.02f64.sqrt() / 10.0 + FITNESS_EPSILON);
        assert!((score - expected).abs() < 1e-6);
    }

    #[test]
    fn test_constant_prices_score_negative_infinity() {
        let candles = make_candles(&[100.0; 120]);
        let backtester = Backtester::default();

        let report = backtester
            .run_params(StrategyType::MeanReversion, &mr_params(), &candles)
            .unwrap();
        assert_eq!(report.fitness, f64::NEG_INFINITY);
        assert!(!report.fitness.is_nan());
        assert_eq!(report.trade_count(), 0);
        assert_eq!(report.win_rate(), None);

        let params: Params = [
            ("z_thresh", 0.5),
            ("ma_window", 30.0),
            ("vwap_window", 30.0),
            ("rr", 2.0),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect();
        let report = backtester
            .run_params(StrategyType::Breakout, &params, &candles)
            .unwrap();
        assert_eq!(report.fitness, f64::NEG_INFINITY);
        assert_eq!(report.trade_count(), 0);
    }

    #[test]
    fn test_returns_from_split_bar() {
        let candles = make_candles(&[100.0, 101.0, 102.0, 103.0, 104.0]);
        let mut trace = forced_trace(4, 0);
        trace.first_bar = 1;
        let report = annotate(StrategyType::Breakout, &candles, trace);
        // Rows cover bars 1..=4; the first row has no return
        assert_eq!(report.strategy_returns_from(0).len(), 3);
        assert_eq!(report.strategy_returns_from(3).len(), 2);
        assert_eq!(report.strategy_returns_from(10).len(), 0);
    }

    #[test]
    fn test_unordered_candles_are_rejected() {
        let mut candles = make_candles(&[100.0; 40]);
        candles.swap(5, 6);
        let result =
            Backtester::default().run_params(StrategyType::MeanReversion, &mr_params(), &candles);
        assert!(result.is_err());
    }

    #[test]
    fn test_sawtooth_mean_reversion_is_profitable() {
        let prices: Vec<f64> = (0..200)
            .map(|i| 105.0 - 10.0 * (i % 20) as f64 / 19.0)
            .collect();
        let candles = make_candles(&prices);
        let report = Backtester::default()
            .run_params(StrategyType::MeanReversion, &mr_params(), &candles)
            .unwrap();
        assert!(report.total_return > 0.0);
        assert!(report.fitness > 0.0);
        assert!(report.win_rate().unwrap() > 0.5);
    }
}
