//! Bayesian phylogenetic mixed model
//!
//! The model relates the log of the per-species variation estimate to a
//! covariate while absorbing phylogenetic non-independence into a
//! structured random intercept:
//!
//! ```text
//! y = ln(cv4)
//! y = Xβ + u + ε,   u ~ N(0, σ_A² · C),   ε ~ N(0, σ² · I)
//! ```
//!
//! where `C` is the Brownian-motion correlation matrix. Priors: flat on
//! β; half-Student-t (ν = 3, scale 2.5) on σ and σ_A, overridable via
//! [`Priors`].
//!
//! The posterior backend sits behind [`InferenceEngine`] so the bundled
//! Gibbs sampler can be swapped for another engine without touching the
//! model contract. Convergence problems flag the result as unreliable -
//! they never silently disappear and never turn into an `Err`.

pub mod diagnostics;
pub mod gibbs;

pub use diagnostics::Diagnostic;
pub use gibbs::GibbsSampler;

use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};

use crate::aggregate::SpeciesSummary;
use crate::phylo::CorrelationMatrix;
use crate::{Error, Result};

/// Fixed-effect covariate choice for the linear term.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Covariate {
    /// Intercept-only model
    None,
    /// Distinct-site count from the subsample (default)
    #[default]
    SiteCount,
    /// Total observation count before subsampling
    TotalObservations,
}

impl Covariate {
    fn value(self, row: &SpeciesSummary) -> Option<f64> {
        match self {
            Self::None => None,
            Self::SiteCount => Some(row.site_count as f64),
            Self::TotalObservations => Some(row.total_observations as f64),
        }
    }
}

/// Scale priors for the model's standard deviations.
///
/// Both σ and σ_A get a half-Student-t prior truncated at zero -
/// weakly informative with heavy tails, so large variances stay reachable
/// while the mode sits near zero.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Priors {
    /// Degrees of freedom of the half-t priors
    pub nu: f64,
    /// Scale of the half-t prior on the residual sd σ
    pub sigma_scale: f64,
    /// Scale of the half-t prior on the phylogenetic sd σ_A
    pub sigma_a_scale: f64,
}

impl Default for Priors {
    fn default() -> Self {
        Self {
            nu: 3.0,
            sigma_scale: 2.5,
            sigma_a_scale: 2.5,
        }
    }
}

/// Sampler run configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SamplerConfig {
    /// Independent chains (run in parallel)
    pub chains: usize,
    /// Warmup iterations discarded per chain
    pub warmup: usize,
    /// Retained draws per chain
    pub draws: usize,
    /// Seed; each chain derives its own stream from it
    pub seed: u64,
}

impl Default for SamplerConfig {
    fn default() -> Self {
        Self {
            chains: 4,
            warmup: 500,
            draws: 1000,
            seed: 0,
        }
    }
}

/// Full model specification handed to an inference engine.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct ModelSpec {
    /// Fixed-effect covariate
    pub covariate: Covariate,
    /// Scale priors
    pub priors: Priors,
    /// Sampler configuration
    pub sampler: SamplerConfig,
}

/// Model-ready data: response vector, design matrix, and the correlation
/// matrix aligned to the summary-table row order.
#[derive(Debug, Clone)]
pub struct ModelData {
    species: Vec<String>,
    response: DVector<f64>,
    design: DMatrix<f64>,
    correlation: CorrelationMatrix,
    coefficient_names: Vec<String>,
}

impl ModelData {
    /// Join the summary table with the correlation matrix.
    ///
    /// The matrix is reordered to the summary row order; the two species
    /// key sets must match exactly. The response is the natural log of
    /// each cv4 estimate.
    ///
    /// # Errors
    /// Returns [`Error::ModelSpecification`] for mismatched species keys,
    /// fewer than three species, or a non-positive variation estimate
    /// (whose log is undefined).
    pub fn new(
        summaries: &[SpeciesSummary],
        correlation: &CorrelationMatrix,
        covariate: Covariate,
    ) -> Result<Self> {
        if summaries.len() < 3 {
            return Err(Error::ModelSpecification(format!(
                "at least 3 species required to partition variance, got {}",
                summaries.len()
            )));
        }

        let species: Vec<String> = summaries.iter().map(|s| s.species.clone()).collect();
        {
            let mut sorted = species.clone();
            sorted.sort_unstable();
            sorted.dedup();
            if sorted.len() != species.len() {
                return Err(Error::ModelSpecification(
                    "summary table has duplicate species rows".to_string(),
                ));
            }
        }
        let correlation = correlation.reordered(&species)?;

        let mut response = DVector::zeros(summaries.len());
        for (i, row) in summaries.iter().enumerate() {
            if row.cv4 <= 0.0 {
                return Err(Error::ModelSpecification(format!(
                    "variation estimate for '{}' is {}: the log-scale model needs positive estimates",
                    row.species, row.cv4
                )));
            }
            response[i] = row.cv4.ln();
        }

        let covariate_name = match covariate {
            Covariate::None => None,
            Covariate::SiteCount => Some("site_count"),
            Covariate::TotalObservations => Some("total_observations"),
        };
        let p = 1 + usize::from(covariate_name.is_some());
        let mut design = DMatrix::zeros(summaries.len(), p);
        for (i, row) in summaries.iter().enumerate() {
            design[(i, 0)] = 1.0;
            if let Some(x) = covariate.value(row) {
                design[(i, 1)] = x;
            }
        }
        let mut coefficient_names = vec!["intercept".to_string()];
        coefficient_names.extend(covariate_name.map(String::from));

        Ok(Self {
            species,
            response,
            design,
            correlation,
            coefficient_names,
        })
    }

    /// Species in row order.
    #[must_use]
    pub fn species(&self) -> &[String] {
        &self.species
    }

    /// Log-scale response vector.
    #[must_use]
    pub fn response(&self) -> &DVector<f64> {
        &self.response
    }

    /// Design matrix (intercept column first).
    #[must_use]
    pub fn design(&self) -> &DMatrix<f64> {
        &self.design
    }

    /// Correlation matrix aligned to the row order.
    #[must_use]
    pub fn correlation(&self) -> &CorrelationMatrix {
        &self.correlation
    }

    /// Fixed-effect coefficient names, intercept first.
    #[must_use]
    pub fn coefficient_names(&self) -> &[String] {
        &self.coefficient_names
    }

    /// Number of species (rows).
    #[must_use]
    pub fn len(&self) -> usize {
        self.species.len()
    }

    /// Whether the data set is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.species.is_empty()
    }
}

/// Posterior draws from one chain, draw-major.
#[derive(Debug, Clone)]
pub struct ChainOutput {
    /// Fixed-effect draws; each entry holds the coefficient vector
    pub beta: Vec<Vec<f64>>,
    /// Residual sd draws
    pub sigma: Vec<f64>,
    /// Phylogenetic sd draws
    pub sigma_a: Vec<f64>,
    /// Per-species random-intercept draws; each entry holds one vector
    pub effects: Vec<Vec<f64>>,
}

/// Posterior approximation: retained draws plus convergence verdict.
#[derive(Debug, Clone)]
pub struct FittedModel {
    species: Vec<String>,
    coefficient_names: Vec<String>,
    chains: Vec<ChainOutput>,
    diagnostics: Vec<Diagnostic>,
    warnings: Vec<String>,
}

impl FittedModel {
    pub(crate) fn new(
        species: Vec<String>,
        coefficient_names: Vec<String>,
        chains: Vec<ChainOutput>,
        diagnostics: Vec<Diagnostic>,
        warnings: Vec<String>,
    ) -> Self {
        Self {
            species,
            coefficient_names,
            chains,
            diagnostics,
            warnings,
        }
    }

    /// Species in model row order.
    #[must_use]
    pub fn species(&self) -> &[String] {
        &self.species
    }

    /// Fixed-effect coefficient names, intercept first.
    #[must_use]
    pub fn coefficient_names(&self) -> &[String] {
        &self.coefficient_names
    }

    /// Per-chain outputs.
    #[must_use]
    pub fn chains(&self) -> &[ChainOutput] {
        &self.chains
    }

    /// Residual-sd draws pooled across chains.
    #[must_use]
    pub fn sigma_draws(&self) -> Vec<f64> {
        self.chains.iter().flat_map(|c| c.sigma.clone()).collect()
    }

    /// Phylogenetic-sd draws pooled across chains.
    #[must_use]
    pub fn sigma_a_draws(&self) -> Vec<f64> {
        self.chains.iter().flat_map(|c| c.sigma_a.clone()).collect()
    }

    /// Draws of one fixed-effect coefficient pooled across chains.
    #[must_use]
    pub fn beta_draws(&self, coefficient: usize) -> Vec<f64> {
        self.chains
            .iter()
            .flat_map(|c| c.beta.iter().map(move |b| b[coefficient]))
            .collect()
    }

    /// Draws of one species' random intercept pooled across chains.
    #[must_use]
    pub fn effect_draws(&self, species_index: usize) -> Vec<f64> {
        self.chains
            .iter()
            .flat_map(|c| c.effects.iter().map(move |e| e[species_index]))
            .collect()
    }

    /// Convergence diagnostics per monitored parameter.
    #[must_use]
    pub fn diagnostics(&self) -> &[Diagnostic] {
        &self.diagnostics
    }

    /// Whether every monitored parameter passed the convergence
    /// thresholds. An unreliable fit still carries its draws: callers
    /// decide whether to re-run with more iterations.
    #[must_use]
    pub fn reliable(&self) -> bool {
        self.warnings.is_empty()
    }

    /// Human-readable convergence warnings (empty for a reliable fit).
    #[must_use]
    pub fn warnings(&self) -> &[String] {
        &self.warnings
    }
}

/// Black-box posterior inference backend.
///
/// Implementations take the model-ready data and the specification and
/// return posterior draws. The bundled implementation is
/// [`GibbsSampler`]; alternative engines can be substituted without
/// changing the fitter contract.
pub trait InferenceEngine {
    /// Fit the phylogenetic mixed model and return posterior draws.
    ///
    /// # Errors
    /// Returns [`Error::ModelSpecification`] for a correlation matrix
    /// that is not positive definite or a singular design matrix.
    fn fit(&self, data: &ModelData, spec: &ModelSpec) -> Result<FittedModel>;
}
