//! One-sided t-test deciding whether a champion's edge is real

use serde::{Deserialize, Serialize};
use statrs::distribution::{ContinuousCDF, StudentsT};

use crate::indicators::{is_constant, mean_and_std};

pub const DEFAULT_ALPHA: f64 = 0.05;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SignificanceResult {
    /// Number of returns tested
    pub samples: usize,
    /// `None` when the test is inconclusive
    pub t_stat: Option<f64>,
    /// One-sided p-value for a positive mean
    pub p_value: Option<f64>,
    pub significant: bool,
}

impl SignificanceResult {
    pub fn inconclusive(samples: usize) -> Self {
        Self {
            samples,
            t_stat: None,
            p_value: None,
            significant: false,
        }
    }
}

/// Test the mean of `returns` against zero.
///
/// NaNs are dropped first. Fewer than two returns or zero variance is
/// inconclusive and never significant.
pub fn significance_test(returns: &[f64], alpha: f64) -> SignificanceResult {
    let clean: Vec<f64> = returns.iter().copied().filter(|r| !r.is_nan()).collect();
    let n = clean.len();
    if is_constant(&clean) {
        return SignificanceResult::inconclusive(n);
    }
    let (mean, std) = match mean_and_std(&clean) {
        Some((mean, std)) if std > 0.0 && std.is_finite() => (mean, std),
        _ => return SignificanceResult::inconclusive(n),
    };

    let t = mean / (std / (n as f64).sqrt());
    let dist = match StudentsT::new(0.0, 1.0, (n - 1) as f64) {
        Ok(dist) => dist,
        Err(_) => return SignificanceResult::inconclusive(n),
    };
    let two_sided = 2.0 * (1.0 - dist.cdf(t.abs()));
    let one_sided = if t > 0.0 {
        two_sided / 2.0
    } else {
        1.0 - two_sided / 2.0
    };

    SignificanceResult {
        samples: n,
        t_stat: Some(t),
        p_value: Some(one_sided),
        significant: one_sided < alpha,
    }
}
