//! Phylogenetic-signal estimation and hypothesis testing
//!
//! For every retained posterior draw the signal ratio is
//!
//! ```text
//! λ = σ_A² / (σ_A² + σ²)
//! ```
//!
//! the proportion of trait variance attributable to shared ancestry,
//! bounded in [0, 1] by construction (Pagel's λ analogue).
//!
//! The one-sided test "λ > 0 vs λ = 0" is reported as a posterior-mass
//! evidence ratio: mass above a small null-region width divided by the
//! mass inside it. When no retained draw lands in the null region the
//! ratio is `+∞`: every draw testifies against the point null, and a
//! finite cap would understate that.

use serde::{Deserialize, Serialize};

use crate::model::FittedModel;

/// Default width of the null region around λ = 0.
pub const DEFAULT_NULL_WIDTH: f64 = 0.05;

/// Default credible-interval level.
pub const DEFAULT_CI_LEVEL: f64 = 0.95;

/// Posterior summary of the signal ratio λ.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalEstimate {
    /// Posterior mean of λ
    pub mean: f64,
    /// Posterior median of λ
    pub median: f64,
    /// Lower bound of the central credible interval
    pub ci_lower: f64,
    /// Upper bound of the central credible interval
    pub ci_upper: f64,
    /// Credible-interval level (e.g. 0.95)
    pub ci_level: f64,
}

/// One-sided hypothesis test on λ, with its posterior summary.
///
/// `evidence_ratio` serializes as `null` in JSON when infinite: JSON has
/// no representation for `+∞`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HypothesisResult {
    /// Posterior summary of λ
    pub estimate: SignalEstimate,
    /// Evidence ratio for "λ > 0": P(λ > w) / P(λ ≤ w); `+∞` when the
    /// null region holds no posterior mass
    pub evidence_ratio: f64,
    /// Null-region width w the ratio was computed with
    pub null_width: f64,
    /// Retained draws in total
    pub draws: usize,
    /// Retained draws inside the null region
    pub draws_in_null: usize,
}

/// λ for every retained draw, pooled across chains.
#[must_use]
pub fn lambda_draws(model: &FittedModel) -> Vec<f64> {
    model
        .sigma_a_draws()
        .iter()
        .zip(model.sigma_draws())
        .map(|(&sa, s)| {
            let (va, ve) = (sa * sa, s * s);
            va / (va + ve)
        })
        .collect()
}

/// Summarize the λ posterior at the given credible level.
///
/// # Panics
/// Panics if the model holds no draws (a fitted model always does).
#[must_use]
pub fn estimate(model: &FittedModel, ci_level: f64) -> SignalEstimate {
    let mut draws = lambda_draws(model);
    assert!(!draws.is_empty(), "fitted model holds no draws");
    draws.sort_unstable_by(|a, b| a.total_cmp(b));

    let mean = draws.iter().sum::<f64>() / draws.len() as f64;
    let tail = (1.0 - ci_level) / 2.0;
    SignalEstimate {
        mean,
        median: quantile(&draws, 0.5),
        ci_lower: quantile(&draws, tail),
        ci_upper: quantile(&draws, 1.0 - tail),
        ci_level,
    }
}

/// Run the one-sided test "λ > 0" with the given null-region width.
#[must_use]
pub fn test(model: &FittedModel, null_width: f64, ci_level: f64) -> HypothesisResult {
    let draws = lambda_draws(model);
    let in_null = draws.iter().filter(|&&l| l <= null_width).count();
    let above = draws.len() - in_null;

    let evidence_ratio = if in_null == 0 {
        f64::INFINITY
    } else {
        above as f64 / in_null as f64
    };

    HypothesisResult {
        estimate: estimate(model, ci_level),
        evidence_ratio,
        null_width,
        draws: draws.len(),
        draws_in_null: in_null,
    }
}

/// Linear-interpolation quantile of a sorted slice.
fn quantile(sorted: &[f64], q: f64) -> f64 {
    let n = sorted.len();
    if n == 1 {
        return sorted[0];
    }
    let position = q * (n - 1) as f64;
    let lower = position.floor() as usize;
    let upper = position.ceil() as usize;
    let weight = position - lower as f64;
    sorted[lower] * (1.0 - weight) + sorted[upper] * weight
}
