//! Error types for phylovar
//!
//! Estimator and matrix-builder failures are fatal to a run: downstream
//! statistical validity depends on those stages being correct. Sampler
//! non-convergence is deliberately NOT an error: it is a flagged state on
//! [`crate::model::FittedModel`] so callers can decide whether to re-run
//! with more iterations.

use thiserror::Error;

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// Phylovar error types
#[derive(Error, Debug)]
pub enum Error {
    /// A species group (or a subsample configuration) is too small
    #[error("insufficient sample size for '{species}': {observed} observations, {required} required")]
    InsufficientSampleSize {
        /// Species the group belongs to, or "<config>" for a threshold/subsample mismatch
        species: String,
        /// Observations actually available
        observed: usize,
        /// Observations required
        required: usize,
    },

    /// Estimator input is numerically unusable (zero mean, non-finite or
    /// non-positive measurements)
    #[error("degenerate estimator input: {0}")]
    DegenerateInput(String),

    /// A target species is absent from the tree's tip labels
    #[error("species '{0}' not found among tree tip labels")]
    UnknownSpecies(String),

    /// Model cannot be constructed as specified (non-positive-definite
    /// correlation matrix, mismatched species keys, singular design matrix)
    #[error("model specification error: {0}")]
    ModelSpecification(String),

    /// Malformed input text (trait table or Newick tree)
    #[error("parse error: {0}")]
    Parse(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
