//! Per-species trait aggregation
//!
//! Groups raw bee-flower interaction records by species, applies the
//! minimum-sample inclusion filter, draws a fixed-size subsample per
//! retained species, and runs the variation estimator on the subsampled
//! measurements.
//!
//! Sampling effort is wildly uneven across species, and the CV estimator's
//! residual bias depends on n, so every retained species is estimated from
//! the same subsample size rather than from whatever was collected.
//!
//! Reproducibility contract: one RNG is seeded per run and species groups
//! draw from it in first-appearance order of the input table. Same seed +
//! same input order ⇒ byte-identical summaries.

use std::collections::{BTreeSet, HashMap};

use rand::SeedableRng;
use rand_xoshiro::Xoshiro256PlusPlus;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::estimator;
use crate::{Error, Result};

/// One bee-flower interaction record. Immutable once loaded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    /// Bee species identity
    pub species: String,
    /// Site/transect identifier
    pub site: String,
    /// Spatial block (nested above locality)
    pub block: String,
    /// Locality within the block
    pub locality: String,
    /// Intertegular distance in microns
    pub measurement: f64,
    /// Interaction partner (plant) identity
    pub partner: String,
}

/// Per-species summary row emitted by the aggregator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpeciesSummary {
    /// Species identity (matches a correlation-matrix key after pruning)
    pub species: String,
    /// Bias-corrected coefficient of variation of the subsampled measurements
    pub cv4: f64,
    /// Distinct sites among the subsampled rows
    pub site_count: usize,
    /// Group size before filtering and subsampling
    pub total_observations: usize,
}

/// Aggregator configuration.
///
/// `min_sample_size` should be at least `subsample_size`: a species can
/// pass the inclusion filter yet still be too small to subsample, and that
/// inconsistency is reported as an error rather than silently shrinking
/// the subsample.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AggregatorConfig {
    /// Minimum group size for a species to be retained (default 20)
    pub min_sample_size: usize,
    /// Fixed subsample size drawn from each retained group (default 20)
    pub subsample_size: usize,
    /// Seed for the run's subsampling RNG
    pub seed: u64,
}

impl AggregatorConfig {
    /// Config with the default 20/20 filter and the given seed.
    #[must_use]
    pub const fn new(seed: u64) -> Self {
        Self {
            min_sample_size: 20,
            subsample_size: 20,
            seed,
        }
    }

    /// Set the minimum group size.
    #[must_use]
    pub const fn min_sample_size(mut self, n: usize) -> Self {
        self.min_sample_size = n;
        self
    }

    /// Set the fixed subsample size.
    #[must_use]
    pub const fn subsample_size(mut self, n: usize) -> Self {
        self.subsample_size = n;
        self
    }
}

/// Groups observations by species and produces one [`SpeciesSummary`] per
/// species passing the inclusion filter.
pub struct TraitAggregator {
    config: AggregatorConfig,
}

impl TraitAggregator {
    /// Create an aggregator with the given configuration.
    #[must_use]
    pub const fn new(config: AggregatorConfig) -> Self {
        Self { config }
    }

    /// Summarize the observation table.
    ///
    /// Species groups are processed in first-appearance order of the input
    /// and all draw from a single RNG seeded once from the configured
    /// seed, so the output is deterministic for a fixed input ordering.
    ///
    /// # Errors
    /// Returns [`Error::InsufficientSampleSize`] when a species passes the
    /// inclusion filter but holds fewer rows than the subsample size
    /// (inconsistent configuration), and propagates estimator errors for
    /// degenerate measurement values.
    pub fn summarize(&self, observations: &[Observation]) -> Result<Vec<SpeciesSummary>> {
        let groups = group_by_species(observations);
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(self.config.seed);
        let mut summaries = Vec::new();

        for (species, rows) in &groups {
            let total = rows.len();
            if total < self.config.min_sample_size {
                debug!(
                    species = species.as_str(),
                    observations = total,
                    "species below inclusion threshold, skipped"
                );
                continue;
            }
            if total < self.config.subsample_size {
                return Err(Error::InsufficientSampleSize {
                    species: species.clone(),
                    observed: total,
                    required: self.config.subsample_size,
                });
            }

            let picks =
                rand::seq::index::sample(&mut rng, total, self.config.subsample_size).into_vec();

            let measurements: Vec<f64> = picks
                .iter()
                .map(|&i| observations[rows[i]].measurement)
                .collect();
            let sites: BTreeSet<&str> = picks
                .iter()
                .map(|&i| observations[rows[i]].site.as_str())
                .collect();

            summaries.push(SpeciesSummary {
                species: species.clone(),
                cv4: estimator::cv4(&measurements)?,
                site_count: sites.len(),
                total_observations: total,
            });
        }

        info!(
            species_in = groups.len(),
            species_retained = summaries.len(),
            subsample_size = self.config.subsample_size,
            "trait aggregation complete"
        );
        Ok(summaries)
    }
}

/// Group row indices by species, preserving first-appearance order.
fn group_by_species(observations: &[Observation]) -> Vec<(String, Vec<usize>)> {
    let mut order: Vec<(String, Vec<usize>)> = Vec::new();
    let mut index: HashMap<&str, usize> = HashMap::new();

    for (row, obs) in observations.iter().enumerate() {
        if let Some(&slot) = index.get(obs.species.as_str()) {
            order[slot].1.push(row);
        } else {
            index.insert(obs.species.as_str(), order.len());
            order.push((obs.species.clone(), vec![row]));
        }
    }
    order
}
