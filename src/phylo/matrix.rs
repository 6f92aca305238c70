//! Brownian-motion trait correlation
//!
//! Under a Brownian-motion model of trait evolution, the covariance of two
//! tips equals the branch length they share from the root to their most
//! recent common ancestor. Normalizing by each tip's root-to-tip depth
//! turns the covariance into a correlation with a unit diagonal: the
//! structure the hierarchical model's random intercept requires (a
//! covariance there would silently rescale σ_A).

use nalgebra::DMatrix;
use tracing::debug;

use crate::phylo::{PhyloNode, PhyloTree};
use crate::{Error, Result};

/// Square symmetric correlation matrix keyed by species identity.
///
/// Rows/columns follow the tip order of the tree the matrix was derived
/// from. Immutable after construction.
#[derive(Debug, Clone, PartialEq)]
pub struct CorrelationMatrix {
    species: Vec<String>,
    matrix: DMatrix<f64>,
}

impl CorrelationMatrix {
    /// Derive the correlation matrix for every tip of `tree`.
    ///
    /// Entry (i,j) is the root-to-MRCA shared path length normalized by
    /// the two tips' root-to-tip depths; the diagonal is exactly 1.0.
    ///
    /// # Errors
    /// Returns [`Error::ModelSpecification`] if any tip has a zero
    /// root-to-tip path length (no Brownian variance accumulates along a
    /// zero-length path) or if tip labels are duplicated.
    pub fn from_tree(tree: &PhyloTree) -> Result<Self> {
        let paths = tip_paths(tree);
        let n = paths.len();

        let species: Vec<String> = paths.iter().map(|p| p.label.clone()).collect();
        {
            let mut sorted = species.clone();
            sorted.sort_unstable();
            sorted.dedup();
            if sorted.len() != n {
                return Err(Error::ModelSpecification(
                    "duplicate tip labels in tree".to_string(),
                ));
            }
        }

        let depths: Vec<f64> = paths.iter().map(TipPath::depth).collect();
        for (tip, &depth) in species.iter().zip(&depths) {
            if depth <= 0.0 && n > 1 {
                return Err(Error::ModelSpecification(format!(
                    "tip '{tip}' has zero root-to-tip length"
                )));
            }
        }

        let mut matrix = DMatrix::zeros(n, n);
        for i in 0..n {
            matrix[(i, i)] = 1.0;
            for j in (i + 1)..n {
                let shared = shared_depth(&paths[i], &paths[j]);
                let rho = shared / (depths[i] * depths[j]).sqrt();
                matrix[(i, j)] = rho;
                matrix[(j, i)] = rho;
            }
        }

        debug!(species = n, "Brownian-motion correlation matrix derived");
        Ok(Self { species, matrix })
    }

    /// Rebuild a matrix from exported parts (labels plus rows), e.g. a
    /// previously cached artifact.
    ///
    /// Validates shape, symmetry, and the unit diagonal. Positive
    /// definiteness is NOT checked here: the model fitter factorizes the
    /// matrix and reports the failure where it matters.
    ///
    /// # Errors
    /// Returns [`Error::ModelSpecification`] for a non-square input, an
    /// asymmetric input, or a diagonal entry differing from 1.
    pub fn from_parts(species: Vec<String>, rows: &[Vec<f64>]) -> Result<Self> {
        let n = species.len();
        if rows.len() != n || rows.iter().any(|r| r.len() != n) {
            return Err(Error::ModelSpecification(format!(
                "correlation matrix must be {n}x{n} to match its {n} labels"
            )));
        }
        let matrix = DMatrix::from_fn(n, n, |i, j| rows[i][j]);
        for i in 0..n {
            if (matrix[(i, i)] - 1.0).abs() > 1e-9 {
                return Err(Error::ModelSpecification(format!(
                    "correlation matrix diagonal entry {i} is {}, expected 1",
                    matrix[(i, i)]
                )));
            }
            for j in 0..i {
                if (matrix[(i, j)] - matrix[(j, i)]).abs() > 1e-9 {
                    return Err(Error::ModelSpecification(format!(
                        "correlation matrix is asymmetric at ({i}, {j})"
                    )));
                }
            }
        }
        Ok(Self { species, matrix })
    }

    /// Species labels in row/column order.
    #[must_use]
    pub fn species(&self) -> &[String] {
        &self.species
    }

    /// Matrix dimension.
    #[must_use]
    pub fn len(&self) -> usize {
        self.species.len()
    }

    /// Whether the matrix is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.species.is_empty()
    }

    /// The underlying matrix.
    #[must_use]
    pub fn matrix(&self) -> &DMatrix<f64> {
        &self.matrix
    }

    /// Entry by row/column index.
    #[must_use]
    pub fn get(&self, i: usize, j: usize) -> f64 {
        self.matrix[(i, j)]
    }

    /// Entry by species pair, if both are present.
    #[must_use]
    pub fn get_by_name(&self, a: &str, b: &str) -> Option<f64> {
        let i = self.species.iter().position(|s| s == a)?;
        let j = self.species.iter().position(|s| s == b)?;
        Some(self.matrix[(i, j)])
    }

    /// Reorder rows/columns to match `order`, which must be a permutation
    /// of the species set.
    ///
    /// The model fitter aligns the matrix to the summary-table row order
    /// with this before building the random-intercept covariance.
    ///
    /// # Errors
    /// Returns [`Error::ModelSpecification`] if `order` is not a
    /// permutation of the matrix's species.
    pub fn reordered(&self, order: &[String]) -> Result<Self> {
        if order.len() != self.species.len() {
            return Err(Error::ModelSpecification(format!(
                "species key mismatch: matrix has {} species, requested order has {}",
                self.species.len(),
                order.len()
            )));
        }
        let mut perm = Vec::with_capacity(order.len());
        for name in order {
            let idx = self
                .species
                .iter()
                .position(|s| s == name)
                .ok_or_else(|| {
                    Error::ModelSpecification(format!(
                        "species key mismatch: '{name}' not present in correlation matrix"
                    ))
                })?;
            perm.push(idx);
        }

        let n = perm.len();
        let mut matrix = DMatrix::zeros(n, n);
        for (i, &pi) in perm.iter().enumerate() {
            for (j, &pj) in perm.iter().enumerate() {
                matrix[(i, j)] = self.matrix[(pi, pj)];
            }
        }
        Ok(Self {
            species: order.to_vec(),
            matrix,
        })
    }

    /// Matrix rows as plain vectors, for serialization and export.
    #[must_use]
    pub fn to_rows(&self) -> Vec<Vec<f64>> {
        (0..self.len())
            .map(|i| (0..self.len()).map(|j| self.matrix[(i, j)]).collect())
            .collect()
    }

    /// Human-readable labeled rendering.
    #[must_use]
    pub fn render(&self) -> String {
        let width = self
            .species
            .iter()
            .map(String::len)
            .max()
            .unwrap_or(0)
            .max(8);
        let mut out = String::new();
        out.push_str(&format!("{:width$}", ""));
        for name in &self.species {
            out.push_str(&format!(" {name:>width$}"));
        }
        out.push('\n');
        for (i, name) in self.species.iter().enumerate() {
            out.push_str(&format!("{name:width$}"));
            for j in 0..self.len() {
                out.push_str(&format!(" {:>width$.4}", self.matrix[(i, j)]));
            }
            out.push('\n');
        }
        out
    }
}

struct TipPath {
    label: String,
    /// (ancestor id, cumulative depth below that ancestor's edge), root
    /// excluded, ending at the tip itself.
    steps: Vec<(usize, f64)>,
}

impl TipPath {
    fn depth(&self) -> f64 {
        self.steps.last().map_or(0.0, |&(_, d)| d)
    }
}

/// Depth of the deepest ancestor (by node id) shared by two tip paths.
fn shared_depth(a: &TipPath, b: &TipPath) -> f64 {
    let mut shared = 0.0;
    for (&(ia, da), &(ib, _)) in a.steps.iter().zip(&b.steps) {
        if ia == ib {
            shared = da;
        } else {
            break;
        }
    }
    shared
}

/// Collect the root path of every tip, assigning traversal-order node ids.
fn tip_paths(tree: &PhyloTree) -> Vec<TipPath> {
    let mut paths = Vec::new();
    let mut next_id = 0usize;
    walk(
        tree.root(),
        true,
        0.0,
        &mut Vec::new(),
        &mut next_id,
        &mut paths,
    );
    paths
}

fn walk(
    node: &PhyloNode,
    is_root: bool,
    depth: f64,
    trail: &mut Vec<(usize, f64)>,
    next_id: &mut usize,
    out: &mut Vec<TipPath>,
) {
    let id = *next_id;
    *next_id += 1;

    let depth = if is_root { 0.0 } else { depth + node.length };
    if !is_root {
        trail.push((id, depth));
    }

    if node.is_tip() {
        if let Some(label) = &node.label {
            out.push(TipPath {
                label: label.clone(),
                steps: trail.clone(),
            });
        }
    } else {
        for child in &node.children {
            walk(child, false, depth, trail, next_id, out);
        }
    }

    if !is_root {
        trail.pop();
    }
}
