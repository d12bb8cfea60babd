//! Strategy simulators
//!
//! Both families run the same position state machine: a flat trader
//! evaluates the entry rule each bar, an open position is closed by
//! take-profit, stop-loss or the holding limit (checked in that order),
//! and every exit is followed by a cooldown during which bars are skipped
//! entirely. A family only supplies its indicator features and its entry
//! rule.

mod breakout;
mod mean_reversion;

pub use breakout::Breakout;
pub use mean_reversion::MeanReversion;

use serde::{Deserialize, Serialize};

use crate::error::{EngineError, EngineResult};
use crate::types::{Candle, Params, Side, StrategyType};

// =============================================================================
// Settings
// =============================================================================

/// Tunables shared by every simulator
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SimulationSettings {
    /// Fractional fill penalty applied against the trader at entry
    pub slippage: f64,
    /// Bars skipped after every exit
    pub cooldown_bars: usize,
    /// Look-back of the VWAP rate of change (mean reversion)
    pub roc_period: usize,
    /// Span of the close EMA whose slope flip confirms a reversal
    pub ema_span: usize,
    /// Fixed ATR window of the breakout family
    pub breakout_atr_window: usize,
}

impl Default for SimulationSettings {
    fn default() -> Self {
        Self {
            slippage: 0.0005,
            cooldown_bars: 2,
            roc_period: 5,
            ema_span: 9,
            breakout_atr_window: 14,
        }
    }
}

/// Exit parameters common to both families
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ExitRules {
    /// Take-profit distance in ATR units
    pub rr: f64,
    /// Stop-loss distance in ATR units
    pub atr_mult: f64,
    /// Maximum bars a position stays open
    pub max_hold: usize,
}

impl ExitRules {
    pub const DEFAULT_ATR_MULT: f64 = 0.5;
    pub const DEFAULT_MAX_HOLD: f64 = 10.0;

    pub fn from_params(params: &Params) -> EngineResult<Self> {
        Ok(Self {
            rr: require(params, "rr")?,
            atr_mult: optional(params, "atr_mult", Self::DEFAULT_ATR_MULT)?,
            max_hold: integer(
                "max_hold",
                optional(params, "max_hold", Self::DEFAULT_MAX_HOLD)?,
                1,
            )?,
        })
    }
}

// =============================================================================
// Trace
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExitReason {
    TakeProfit,
    StopLoss,
    MaxHold,
}

/// Position currently held by the state machine
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OpenPosition {
    pub side: Side,
    pub entry_bar: usize,
    pub entry_price: f64,
}

impl OpenPosition {
    /// Directional profit per unit if closed at `price`
    pub fn profit_at(&self, price: f64) -> f64 {
        match self.side {
            Side::Long => price - self.entry_price,
            Side::Short => self.entry_price - price,
        }
    }
}

/// A completed round trip. Bars are candle indices.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Trade {
    pub entry_bar: usize,
    pub exit_bar: usize,
    pub side: Side,
    pub entry_price: f64,
    pub exit_price: f64,
    pub exit_reason: ExitReason,
    pub profit: f64,
}

/// Per-row output of a simulation. Row `i` describes candle `first_bar + i`;
/// the leading bars without full indicator history have no row.
#[derive(Debug, Clone, PartialEq)]
pub struct SimulationTrace {
    pub first_bar: usize,
    /// Position held at the close of each row (+1, 0, -1)
    pub positions: Vec<i8>,
    /// 1 at the entry row of a profitable completed trade, else 0
    pub outcomes: Vec<u8>,
    pub trades: Vec<Trade>,
}

impl SimulationTrace {
    pub fn len(&self) -> usize {
        self.positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }
}

// =============================================================================
// Strategy interface
// =============================================================================

/// Indicator values a strategy computes once per series
pub trait FeatureFrame {
    /// Volatility unit used by the exit rules at `bar`
    fn atr(&self, bar: usize) -> f64;
}

pub trait Strategy {
    type Features: FeatureFrame;

    /// First bar with complete indicator history
    fn first_bar(&self, settings: &SimulationSettings) -> usize;

    fn features(
        &self,
        candles: &[Candle],
        settings: &SimulationSettings,
    ) -> EngineResult<Self::Features>;

    fn exit_rules(&self) -> ExitRules;

    /// Side to open at `bar`, evaluated only while flat
    fn entry_signal(&self, features: &Self::Features, candles: &[Candle], bar: usize)
        -> Option<Side>;

    /// Reason to close `position` at `bar`, if any
    fn exit_signal(
        &self,
        features: &Self::Features,
        candles: &[Candle],
        bar: usize,
        position: &OpenPosition,
    ) -> Option<ExitReason> {
        let rules = self.exit_rules();
        let close = candles[bar].close;
        let atr = features.atr(bar);
        let (take_profit, stop_loss) = match position.side {
            Side::Long => (
                close >= position.entry_price + rules.rr * atr,
                close <= position.entry_price - rules.atr_mult * atr,
            ),
            Side::Short => (
                close <= position.entry_price - rules.rr * atr,
                close >= position.entry_price + rules.atr_mult * atr,
            ),
        };

        if take_profit {
            Some(ExitReason::TakeProfit)
        } else if stop_loss {
            Some(ExitReason::StopLoss)
        } else if bar - position.entry_bar >= rules.max_hold {
            Some(ExitReason::MaxHold)
        } else {
            None
        }
    }

    /// Run the position state machine over `candles`
    fn simulate(
        &self,
        candles: &[Candle],
        settings: &SimulationSettings,
    ) -> EngineResult<SimulationTrace> {
        let first = self.first_bar(settings);
        if candles.len() <= first {
            return Err(EngineError::DataInsufficient {
                required: first + 1,
                available: candles.len(),
            });
        }

        let features = self.features(candles, settings)?;
        let rows = candles.len() - first;
        let mut positions = vec![0i8; rows];
        let mut outcomes = vec![0u8; rows];
        let mut trades = Vec::new();
        let mut position: Option<OpenPosition> = None;
        let mut cooldown = 0usize;

        for bar in first..candles.len() {
            if cooldown > 0 {
                cooldown -= 1;
                continue;
            }

            let close = candles[bar].close;
            match position {
                None => {
                    if let Some(side) = self.entry_signal(&features, candles, bar) {
                        let entry_price = match side {
                            Side::Long => close * (1.0 + settings.slippage),
                            Side::Short => close * (1.0 - settings.slippage),
                        };
                        position = Some(OpenPosition {
                            side,
                            entry_bar: bar,
                            entry_price,
                        });
                    }
                }
                Some(open) => {
                    if let Some(exit_reason) = self.exit_signal(&features, candles, bar, &open) {
                        let profit = open.profit_at(close);
                        outcomes[open.entry_bar - first] = u8::from(profit > 0.0);
                        trades.push(Trade {
                            entry_bar: open.entry_bar,
                            exit_bar: bar,
                            side: open.side,
                            entry_price: open.entry_price,
                            exit_price: close,
                            exit_reason,
                            profit,
                        });
                        position = None;
                        cooldown = settings.cooldown_bars;
                    }
                }
            }

            positions[bar - first] = position.map_or(0, |p| p.side.sign());
        }

        Ok(SimulationTrace {
            first_bar: first,
            positions,
            outcomes,
            trades,
        })
    }
}

// =============================================================================
// Dispatch
// =============================================================================

/// A configured simulator of either family
#[derive(Debug, Clone, PartialEq)]
pub enum StrategyKind {
    MeanReversion(MeanReversion),
    Breakout(Breakout),
}

impl StrategyKind {
    pub fn from_params(strategy_type: StrategyType, params: &Params) -> EngineResult<Self> {
        Ok(match strategy_type {
            StrategyType::MeanReversion => {
                StrategyKind::MeanReversion(MeanReversion::from_params(params)?)
            }
            StrategyType::Breakout => StrategyKind::Breakout(Breakout::from_params(params)?),
        })
    }

    pub fn strategy_type(&self) -> StrategyType {
        match self {
            StrategyKind::MeanReversion(_) => StrategyType::MeanReversion,
            StrategyKind::Breakout(_) => StrategyType::Breakout,
        }
    }

    pub fn simulate(
        &self,
        candles: &[Candle],
        settings: &SimulationSettings,
    ) -> EngineResult<SimulationTrace> {
        match self {
            StrategyKind::MeanReversion(s) => s.simulate(candles, settings),
            StrategyKind::Breakout(s) => s.simulate(candles, settings),
        }
    }
}

// =============================================================================
// Parameter helpers
// =============================================================================

fn require(params: &Params, name: &str) -> EngineResult<f64> {
    let value = params
        .get(name)
        .copied()
        .ok_or_else(|| EngineError::MissingParameter(name.to_string()))?;
    finite(name, value)
}

fn optional(params: &Params, name: &str, default: f64) -> EngineResult<f64> {
    match params.get(name) {
        Some(&value) => finite(name, value),
        None => Ok(default),
    }
}

fn finite(name: &str, value: f64) -> EngineResult<f64> {
    if value.is_finite() {
        Ok(value)
    } else {
        Err(EngineError::InvalidParameter {
            name: name.to_string(),
            reason: format!("{value} is not a finite number"),
        })
    }
}

/// Truncate an integer parameter and enforce its lower bound
fn integer(name: &str, value: f64, min: usize) -> EngineResult<usize> {
    let truncated = value.trunc();
    if truncated < min as f64 {
        return Err(EngineError::InvalidParameter {
            name: name.to_string(),
            reason: format!("{value} is below the minimum of {min}"),
        });
    }
    Ok(truncated as usize)
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

    /// Enters on fixed bars with a constant ATR of 1
    struct Scripted {
        entries: Vec<(usize, Side)>,
        rules: ExitRules,
    }

    struct UnitAtr;

    impl FeatureFrame for UnitAtr {
        fn atr(&self, _bar: usize) -> f64 {
            1.0
        }
    }

    impl Strategy for Scripted {
        type Features = UnitAtr;

        fn first_bar(&self, _settings: &SimulationSettings) -> usize {
            1
        }

        fn features(&self, _: &[Candle], _: &SimulationSettings) -> EngineResult<UnitAtr> {
            Ok(UnitAtr)
        }

        fn exit_rules(&self) -> ExitRules {
            self.rules
        }

        fn entry_signal(&self, _: &UnitAtr, _: &[Candle], bar: usize) -> Option<Side> {
            self.entries
                .iter()
                .find(|(b, _)| *b == bar)
                .map(|(_, side)| *side)
        }
    }

    fn scripted() -> Scripted {
        Scripted {
            entries: vec![(2, Side::Long), (5, Side::Long), (7, Side::Short)],
            rules: ExitRules {
                rr: 2.0,
                atr_mult: 1.0,
                max_hold: 3,
            },
        }
    }

    #[test]
    fn test_state_machine_positions_and_outcomes() {
        let candles = make_candles(&[
            100.0, 100.0, 100.0, 100.0, 103.0, 100.0, 100.0, 100.0, 100.0, 100.0, 100.0,
        ]);
        let trace = scripted()
            .simulate(&candles, &SimulationSettings::default())
            .unwrap();

        assert_eq!(trace.first_bar, 1);
        assert_eq!(trace.positions, vec![0, 1, 1, 0, 0, 0, -1, -1, -1, 0]);
        // Long entered at bar 2 (row 1) hit take-profit
        assert_eq!(trace.outcomes[1], 1);
        assert_eq!(trace.outcomes.iter().map(|&o| o as u32).sum::<u32>(), 1);

        assert_eq!(trace.trades.len(), 2);
        assert_eq!(trace.trades[0].exit_reason, ExitReason::TakeProfit);
        assert_eq!(trace.trades[0].exit_bar, 4);
        assert!((trace.trades[0].entry_price - 100.05).abs() < 1e-9);
        // The bar-5 signal fell inside the cooldown
        assert_eq!(trace.trades[1].entry_bar, 7);
        assert_eq!(trace.trades[1].side, Side::Short);
        assert!((trace.trades[1].entry_price - 99.95).abs() < 1e-9);
        assert_eq!(trace.trades[1].exit_reason, ExitReason::MaxHold);
        assert!(trace.trades[1].profit < 0.0);
    }

    #[test]
    fn test_stop_loss_before_hold_limit() {
        let candles = make_candles(&[100.0, 100.0, 100.0, 98.0, 98.0]);
        let strategy = Scripted {
            entries: vec![(2, Side::Long)],
            rules: ExitRules {
                rr: 2.0,
                atr_mult: 1.0,
                max_hold: 1,
            },
        };
        let trace = strategy
            .simulate(&candles, &SimulationSettings::default())
            .unwrap();
        assert_eq!(trace.trades[0].exit_reason, ExitReason::StopLoss);
        assert_eq!(trace.outcomes[1], 0);
    }

    #[test]
    fn test_open_trade_at_end_has_no_outcome() {
        let candles = make_candles(&[100.0, 100.0, 100.0, 100.0]);
        let strategy = Scripted {
            entries: vec![(2, Side::Long)],
            rules: ExitRules {
                rr: 2.0,
                atr_mult: 1.0,
                max_hold: 10,
            },
        };
        let trace = strategy
            .simulate(&candles, &SimulationSettings::default())
            .unwrap();
        assert!(trace.trades.is_empty());
        assert_eq!(trace.positions, vec![0, 1, 1]);
        assert!(trace.outcomes.iter().all(|&o| o == 0));
    }

    #[test]
    fn test_too_short_series_is_insufficient() {
        let candles = make_candles(&[100.0]);
        let err = scripted()
            .simulate(&candles, &SimulationSettings::default())
            .unwrap_err();
        assert_eq!(
            err,
            EngineError::DataInsufficient {
                required: 2,
                available: 1
            }
        );
    }

    #[test]
    fn test_exit_rules_defaults_and_validation() {
        let mut params = Params::new();
        assert_eq!(
            ExitRules::from_params(&params),
            Err(EngineError::MissingParameter("rr".to_string()))
        );

        params.insert("rr".to_string(), 1.5);
        let rules = ExitRules::from_params(&params).unwrap();
        assert_eq!(rules.atr_mult, 0.5);
        assert_eq!(rules.max_hold, 10);

        params.insert("max_hold".to_string(), 7.9);
        assert_eq!(ExitRules::from_params(&params).unwrap().max_hold, 7);

        params.insert("max_hold".to_string(), 0.5);
        assert!(ExitRules::from_params(&params).is_err());
    }
}
