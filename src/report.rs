//! Analysis report assembly and export
//!
//! Bundles the per-species summary table, the correlation matrix, the
//! posterior parameter summaries, and the signal test into one
//! serializable record with a run timestamp. `render()` produces the
//! human-readable form; JSON export goes through serde.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::aggregate::SpeciesSummary;
use crate::model::{Diagnostic, FittedModel};
use crate::phylo::CorrelationMatrix;
use crate::signal::HypothesisResult;

/// Posterior summary of one scalar parameter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterSummary {
    /// Parameter name
    pub name: String,
    /// Posterior mean
    pub mean: f64,
    /// Posterior standard deviation
    pub sd: f64,
    /// 2.5% quantile
    pub q025: f64,
    /// Median
    pub median: f64,
    /// 97.5% quantile
    pub q975: f64,
}

impl ParameterSummary {
    /// Summarize pooled draws under a name.
    #[must_use]
    pub fn from_draws(name: impl Into<String>, draws: &[f64]) -> Self {
        let mut sorted = draws.to_vec();
        sorted.sort_unstable_by(|a, b| a.total_cmp(b));
        let n = sorted.len() as f64;
        let mean = sorted.iter().sum::<f64>() / n;
        let sd = (sorted.iter().map(|&x| (x - mean).powi(2)).sum::<f64>() / (n - 1.0)).sqrt();
        Self {
            name: name.into(),
            mean,
            sd,
            q025: sorted_quantile(&sorted, 0.025),
            median: sorted_quantile(&sorted, 0.5),
            q975: sorted_quantile(&sorted, 0.975),
        }
    }
}

/// Complete result record for one pipeline run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisReport {
    /// Wall-clock time the report was assembled
    pub generated_at: DateTime<Utc>,
    /// Per-species summary rows
    pub summaries: Vec<SpeciesSummary>,
    /// Correlation-matrix row/column labels
    pub matrix_species: Vec<String>,
    /// Correlation-matrix rows (same order as the labels)
    pub matrix_rows: Vec<Vec<f64>>,
    /// Posterior summaries: coefficients, sigma, sigma_A
    pub parameters: Vec<ParameterSummary>,
    /// Convergence diagnostics per monitored parameter
    pub diagnostics: Vec<Diagnostic>,
    /// λ estimate and the one-sided hypothesis test
    pub signal: HypothesisResult,
    /// Whether every convergence check passed
    pub reliable: bool,
    /// Convergence warnings (empty when reliable)
    pub warnings: Vec<String>,
}

impl AnalysisReport {
    /// Assemble the report from the pipeline artifacts.
    #[must_use]
    pub fn assemble(
        summaries: Vec<SpeciesSummary>,
        matrix: &CorrelationMatrix,
        fitted: &FittedModel,
        signal: HypothesisResult,
    ) -> Self {
        let mut parameters = Vec::new();
        for (k, name) in fitted.coefficient_names().iter().enumerate() {
            parameters.push(ParameterSummary::from_draws(
                format!("b_{name}"),
                &fitted.beta_draws(k),
            ));
        }
        parameters.push(ParameterSummary::from_draws(
            "sigma",
            &fitted.sigma_draws(),
        ));
        parameters.push(ParameterSummary::from_draws(
            "sigma_A",
            &fitted.sigma_a_draws(),
        ));

        Self {
            generated_at: Utc::now(),
            summaries,
            matrix_species: matrix.species().to_vec(),
            matrix_rows: matrix.to_rows(),
            parameters,
            diagnostics: fitted.diagnostics().to_vec(),
            signal,
            reliable: fitted.reliable(),
            warnings: fitted.warnings().to_vec(),
        }
    }

    /// Serialize to pretty JSON.
    ///
    /// # Errors
    /// Returns a `serde_json` error if serialization fails.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    /// Human-readable report.
    #[must_use]
    pub fn render(&self) -> String {
        let mut out = String::new();
        out.push_str(&format!(
            "Phylogenetic variation analysis ({})\n\n",
            self.generated_at.format("%Y-%m-%d %H:%M:%S UTC")
        ));

        out.push_str("Species summaries\n");
        out.push_str(&format!(
            "{:<28} {:>10} {:>8} {:>8}\n",
            "species", "cv4", "sites", "total"
        ));
        for row in &self.summaries {
            out.push_str(&format!(
                "{:<28} {:>10.5} {:>8} {:>8}\n",
                row.species, row.cv4, row.site_count, row.total_observations
            ));
        }

        out.push_str("\nPosterior parameters\n");
        out.push_str(&format!(
            "{:<20} {:>9} {:>9} {:>9} {:>9} {:>9}\n",
            "parameter", "mean", "sd", "q2.5", "median", "q97.5"
        ));
        for p in &self.parameters {
            out.push_str(&format!(
                "{:<20} {:>9.4} {:>9.4} {:>9.4} {:>9.4} {:>9.4}\n",
                p.name, p.mean, p.sd, p.q025, p.median, p.q975
            ));
        }

        out.push_str("\nConvergence\n");
        for d in &self.diagnostics {
            out.push_str(&format!(
                "{:<20} rhat {:>6.3}  ess {:>7.0}\n",
                d.name, d.rhat, d.ess
            ));
        }
        if !self.reliable {
            out.push_str("\nWARNING: result flagged UNRELIABLE\n");
            for w in &self.warnings {
                out.push_str(&format!("  - {w}\n"));
            }
        }

        let s = &self.signal;
        out.push_str(&format!(
            "\nPhylogenetic signal\nlambda: mean {:.3}, median {:.3}, {:.0}% CI [{:.3}, {:.3}]\n",
            s.estimate.mean,
            s.estimate.median,
            s.estimate.ci_level * 100.0,
            s.estimate.ci_lower,
            s.estimate.ci_upper
        ));
        if s.evidence_ratio.is_infinite() {
            out.push_str(&format!(
                "evidence ratio (lambda > {}): inf ({} draws, none in null region)\n",
                s.null_width, s.draws
            ));
        } else {
            out.push_str(&format!(
                "evidence ratio (lambda > {}): {:.2} ({} of {} draws in null region)\n",
                s.null_width, s.evidence_ratio, s.draws_in_null, s.draws
            ));
        }
        out
    }
}

fn sorted_quantile(sorted: &[f64], q: f64) -> f64 {
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
