//! Phylogenetic tree handling
//!
//! A [`PhyloTree`] is a rooted tree with branch lengths and tip labels.
//! Every operation here is a value-returning transformation: consensus
//! averaging and pruning build new trees instead of mutating in place, so
//! several downstream computations can share one source tree without
//! aliasing.
//!
//! Supported operations:
//! - consensus branch-length averaging across topology-identical trees
//! - pruning to a target species set (unary nodes collapse, the child
//!   edge absorbing the parent edge length)
//! - Brownian-motion correlation derivation (see [`matrix`])

pub mod matrix;
pub mod newick;

pub use matrix::CorrelationMatrix;

use std::collections::BTreeSet;

use tracing::debug;

use crate::{Error, Result};

/// One node of a rooted phylogenetic tree.
#[derive(Debug, Clone, PartialEq)]
pub struct PhyloNode {
    /// Tip label (species identity); internal nodes may be unlabeled
    pub label: Option<String>,
    /// Branch length to the parent; 0.0 at the root
    pub length: f64,
    /// Child subtrees; empty for tips
    pub children: Vec<PhyloNode>,
}

impl PhyloNode {
    /// Tip node with a label.
    #[must_use]
    pub fn tip(label: impl Into<String>, length: f64) -> Self {
        Self {
            label: Some(label.into()),
            length,
            children: Vec::new(),
        }
    }

    /// Unlabeled internal node.
    #[must_use]
    pub fn internal(length: f64, children: Vec<PhyloNode>) -> Self {
        Self {
            label: None,
            length,
            children,
        }
    }

    /// Whether this node is a tip.
    #[must_use]
    pub fn is_tip(&self) -> bool {
        self.children.is_empty()
    }

    fn collect_tips<'a>(&'a self, out: &mut Vec<&'a str>) {
        if self.is_tip() {
            if let Some(label) = &self.label {
                out.push(label);
            }
        } else {
            for child in &self.children {
                child.collect_tips(out);
            }
        }
    }

    /// Smallest tip label under this node, used for canonical child order.
    fn min_tip(&self) -> &str {
        if self.is_tip() {
            self.label.as_deref().unwrap_or("")
        } else {
            self.children
                .iter()
                .map(Self::min_tip)
                .min()
                .unwrap_or("")
        }
    }

    fn canonicalize(&mut self) {
        for child in &mut self.children {
            child.canonicalize();
        }
        self.children
            .sort_by(|a, b| a.min_tip().cmp(b.min_tip()));
    }

    fn tip_set(&self) -> BTreeSet<String> {
        let mut tips = Vec::new();
        self.collect_tips(&mut tips);
        tips.into_iter().map(String::from).collect()
    }
}

/// Rooted phylogenetic tree with branch lengths.
#[derive(Debug, Clone, PartialEq)]
pub struct PhyloTree {
    root: PhyloNode,
}

impl PhyloTree {
    /// Build a tree from its root node.
    #[must_use]
    pub fn new(root: PhyloNode) -> Self {
        Self { root }
    }

    /// Root node.
    #[must_use]
    pub fn root(&self) -> &PhyloNode {
        &self.root
    }

    /// Tip labels in tree (left-to-right) order.
    #[must_use]
    pub fn tip_labels(&self) -> Vec<String> {
        let mut tips = Vec::new();
        self.root.collect_tips(&mut tips);
        tips.into_iter().map(String::from).collect()
    }

    /// Number of tips.
    #[must_use]
    pub fn tip_count(&self) -> usize {
        self.tip_labels().len()
    }

    /// Prune the tree to a target species set, returning a new tree.
    ///
    /// Tips outside the target set are removed. Internal nodes left with a
    /// single child collapse, the surviving child's edge absorbing the
    /// parent edge length. A basal chain shared by every remaining tip is
    /// folded into the new root, so shared ancestry is measured from the
    /// pruned tree's own root. Pruning an already-pruned tree with the
    /// same target set returns an identical tree.
    ///
    /// # Errors
    /// Returns [`Error::UnknownSpecies`] if the target set names a species
    /// absent from the tip labels, and [`Error::ModelSpecification`] for
    /// an empty target set.
    pub fn prune(&self, target: &[String]) -> Result<Self> {
        if target.is_empty() {
            return Err(Error::ModelSpecification(
                "cannot prune to an empty species set".to_string(),
            ));
        }
        let tips: BTreeSet<&str> = {
            let mut collected = Vec::new();
            self.root.collect_tips(&mut collected);
            collected.into_iter().collect()
        };
        for species in target {
            if !tips.contains(species.as_str()) {
                return Err(Error::UnknownSpecies(species.clone()));
            }
        }

        let keep: BTreeSet<&str> = target.iter().map(String::as_str).collect();
        let mut root = prune_node(&self.root, &keep).ok_or_else(|| {
            Error::ModelSpecification("pruning removed every tip".to_string())
        })?;

        // Collapse a basal single-child chain into the root.
        while root.children.len() == 1 {
            if let Some(child) = root.children.pop() {
                root = child;
            }
        }
        root.length = 0.0;

        debug!(
            tips_before = tips.len(),
            tips_after = keep.len(),
            "tree pruned"
        );
        Ok(Self::new(root))
    }
}

fn prune_node(node: &PhyloNode, keep: &BTreeSet<&str>) -> Option<PhyloNode> {
    if node.is_tip() {
        let label = node.label.as_deref()?;
        return keep.contains(label).then(|| node.clone());
    }

    let mut children: Vec<PhyloNode> = node
        .children
        .iter()
        .filter_map(|child| prune_node(child, keep))
        .collect();

    match children.len() {
        0 => None,
        // Unary node: merge its edge into the surviving child's.
        1 => children.pop().map(|mut child| {
            child.length += node.length;
            child
        }),
        _ => Some(PhyloNode {
            label: node.label.clone(),
            length: node.length,
            children,
        }),
    }
}

/// Average branch lengths across topology-identical trees.
///
/// All inputs must share the same tip set and the same resolved topology;
/// children are matched after canonical ordering (by smallest tip label).
/// Topological conflicts are not resolved here: they are an input error.
///
/// # Errors
/// Returns [`Error::ModelSpecification`] for an empty input slice, for
/// differing tip sets, or for differing topologies.
pub fn consensus(trees: &[PhyloTree]) -> Result<PhyloTree> {
    let Some(first) = trees.first() else {
        return Err(Error::ModelSpecification(
            "consensus requires at least one tree".to_string(),
        ));
    };

    let mut canon: Vec<PhyloNode> = trees
        .iter()
        .map(|tree| {
            let mut root = tree.root.clone();
            root.canonicalize();
            root
        })
        .collect();

    let reference = canon.remove(0);
    let tip_set = reference.tip_set();
    for other in &canon {
        if other.tip_set() != tip_set {
            return Err(Error::ModelSpecification(
                "consensus input trees have differing tip sets".to_string(),
            ));
        }
    }

    let mut accumulated = reference;
    for other in &canon {
        add_lengths(&mut accumulated, other)?;
    }
    scale_lengths(&mut accumulated, 1.0 / trees.len() as f64);

    debug!(trees = trees.len(), tips = first.tip_count(), "consensus tree built");
    Ok(PhyloTree::new(accumulated))
}

/// Add `other`'s branch lengths onto `acc`, node by node.
fn add_lengths(acc: &mut PhyloNode, other: &PhyloNode) -> Result<()> {
    if acc.children.len() != other.children.len()
        || acc.is_tip() != other.is_tip()
        || (acc.is_tip() && acc.label != other.label)
    {
        return Err(Error::ModelSpecification(
            "consensus input trees have differing topologies".to_string(),
        ));
    }
    acc.length += other.length;
    for (a, b) in acc.children.iter_mut().zip(&other.children) {
        add_lengths(a, b)?;
    }
    Ok(())
}

fn scale_lengths(node: &mut PhyloNode, factor: f64) {
    node.length *= factor;
    for child in &mut node.children {
        scale_lengths(child, factor);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn two_clade_tree() -> PhyloTree {
        // ((A:1,B:1):2,(C:1,D:1):2);
        PhyloTree::new(PhyloNode::internal(
            0.0,
            vec![
                PhyloNode::internal(2.0, vec![PhyloNode::tip("A", 1.0), PhyloNode::tip("B", 1.0)]),
                PhyloNode::internal(2.0, vec![PhyloNode::tip("C", 1.0), PhyloNode::tip("D", 1.0)]),
            ],
        ))
    }

    #[test]
    fn test_tip_labels_in_order() {
        assert_eq!(two_clade_tree().tip_labels(), ["A", "B", "C", "D"]);
    }

    #[test]
    fn test_prune_collapses_unary_nodes() {
        let pruned = two_clade_tree()
            .prune(&["A".to_string(), "C".to_string(), "D".to_string()])
            .unwrap();
        assert_eq!(pruned.tip_labels(), ["A", "C", "D"]);
        // A's clade node collapsed: A now hangs off the root with length 1+2.
        let a = &pruned.root().children[0];
        assert_eq!(a.label.as_deref(), Some("A"));
        assert!((a.length - 3.0).abs() < 1e-12);
    }

    #[test]
    fn test_prune_unknown_species() {
        let err = two_clade_tree()
            .prune(&["A".to_string(), "X".to_string()])
            .unwrap_err();
        assert!(matches!(err, Error::UnknownSpecies(ref s) if s == "X"));
    }

    #[test]
    fn test_prune_is_idempotent() {
        let target = vec!["A".to_string(), "B".to_string(), "C".to_string()];
        let once = two_clade_tree().prune(&target).unwrap();
        let twice = once.prune(&target).unwrap();
        assert_eq!(once, twice);
    }

    #[test]
    fn test_prune_discards_shared_stem() {
        // Pruning to one clade leaves its ancestral edge below the new
        // root, which must not count toward shared ancestry.
        let pruned = two_clade_tree()
            .prune(&["A".to_string(), "B".to_string()])
            .unwrap();
        assert_eq!(pruned.root().length, 0.0);
        assert_eq!(pruned.tip_labels(), ["A", "B"]);
        assert_eq!(pruned.root().children.len(), 2);
    }

    #[test]
    fn test_consensus_averages_lengths() {
        let mut longer = two_clade_tree();
        scale_lengths(&mut longer.root, 3.0);
        let avg = consensus(&[two_clade_tree(), longer]).unwrap();
        // Each edge averages (x + 3x)/2 = 2x.
        let clade = &avg.root().children[0];
        assert!((clade.length - 4.0).abs() < 1e-12);
        assert!((clade.children[0].length - 2.0).abs() < 1e-12);
    }

    #[test]
    fn test_consensus_child_order_insensitive() {
        let swapped = PhyloTree::new(PhyloNode::internal(
            0.0,
            vec![
                PhyloNode::internal(2.0, vec![PhyloNode::tip("D", 1.0), PhyloNode::tip("C", 1.0)]),
                PhyloNode::internal(2.0, vec![PhyloNode::tip("B", 1.0), PhyloNode::tip("A", 1.0)]),
            ],
        ));
        let avg = consensus(&[two_clade_tree(), swapped]).unwrap();
        assert_eq!(avg.tip_set_for_test(), two_clade_tree().root().tip_set());
    }

    #[test]
    fn test_consensus_rejects_differing_tip_sets() {
        let other = PhyloTree::new(PhyloNode::internal(
            0.0,
            vec![PhyloNode::tip("A", 1.0), PhyloNode::tip("E", 1.0)],
        ));
        assert!(matches!(
            consensus(&[two_clade_tree(), other]),
            Err(Error::ModelSpecification(_))
        ));
    }

    impl PhyloTree {
        fn tip_set_for_test(&self) -> BTreeSet<String> {
            self.root.tip_set()
        }
    }
}
