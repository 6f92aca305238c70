//! Tests for tree handling and the Brownian-motion correlation matrix

use phylovar::phylo::{self, newick, CorrelationMatrix};

const BEE_TREE: &str = "(((Apis_mellifera:0.3,Bombus_terrestris:0.3):0.7,\
Xylocopa_violacea:1.0):1.0,((Halictus_scabiosae:0.5,Lasioglossum_malachurum:0.5):0.5,\
Andrena_flavipes:1.0):1.0);";

fn species(names: &[&str]) -> Vec<String> {
    names.iter().map(|s| (*s).to_string()).collect()
}

#[test]
fn test_newick_round_trip() {
    let tree = newick::parse(BEE_TREE).unwrap();
    let rewritten = newick::write(&tree);
    let reparsed = newick::parse(&rewritten).unwrap();
    assert_eq!(tree, reparsed);
    assert_eq!(tree.tip_count(), 6);
}

#[test]
fn test_matrix_symmetry_and_labels_match_pruned_set() {
    let target = species(&[
        "Apis_mellifera",
        "Bombus_terrestris",
        "Halictus_scabiosae",
        "Andrena_flavipes",
    ]);
    let pruned = newick::parse(BEE_TREE).unwrap().prune(&target).unwrap();
    let corr = CorrelationMatrix::from_tree(&pruned).unwrap();

    let mut labels = corr.species().to_vec();
    labels.sort_unstable();
    let mut expected = target.clone();
    expected.sort_unstable();
    assert_eq!(labels, expected);

    for i in 0..corr.len() {
        assert_eq!(corr.get(i, i), 1.0);
        for j in 0..corr.len() {
            assert_eq!(corr.get(i, j), corr.get(j, i));
        }
    }
}

#[test]
fn test_star_topology_gives_identity_matrix() {
    // Five tips equidistant from the root, no shared internal branches.
    let star = newick::parse("(A:2,B:2,C:2,D:2,E:2);").unwrap();
    let target = species(&["B", "D", "E"]);
    let corr = CorrelationMatrix::from_tree(&star.prune(&target).unwrap()).unwrap();

    assert_eq!(corr.species(), ["B", "D", "E"]);
    for i in 0..3 {
        for j in 0..3 {
            let expected = if i == j { 1.0 } else { 0.0 };
            assert!((corr.get(i, j) - expected).abs() < 1e-15);
        }
    }
}

#[test]
fn test_matrix_builder_idempotent_on_pruned_tree() {
    let target = species(&["Apis_mellifera", "Xylocopa_violacea", "Andrena_flavipes"]);
    let tree = newick::parse(BEE_TREE).unwrap();

    let once = tree.prune(&target).unwrap();
    let twice = once.prune(&target).unwrap();
    assert_eq!(once, twice);

    let first = CorrelationMatrix::from_tree(&once).unwrap();
    let second = CorrelationMatrix::from_tree(&twice).unwrap();
    assert_eq!(first, second);
}

#[test]
fn test_consensus_branch_length_averaging() {
    let short = newick::parse("((A:1,B:1):1,C:2);").unwrap();
    let long = newick::parse("((B:3,A:3):3,C:6);").unwrap();
    let avg = phylo::consensus(&[short, long]).unwrap();

    // Each edge averages to twice the short tree's length.
    let corr = CorrelationMatrix::from_tree(&avg).unwrap();
    assert!((corr.get_by_name("A", "B").unwrap() - 0.5).abs() < 1e-12);

    let rendered = newick::write(&avg);
    assert!(rendered.contains("A:2"), "rendered: {rendered}");
    assert!(rendered.contains("C:4"), "rendered: {rendered}");
}

#[test]
fn test_prune_rejects_unknown_species() {
    let tree = newick::parse(BEE_TREE).unwrap();
    let err = tree
        .prune(&species(&["Apis_mellifera", "Megachile_rotundata"]))
        .unwrap_err();
    assert!(matches!(
        err,
        phylovar::Error::UnknownSpecies(ref name) if name == "Megachile_rotundata"
    ));
}

#[test]
fn test_consensus_rejects_conflicting_topology() {
    let one = newick::parse("((A:1,B:1):1,(C:1,D:1):1);").unwrap();
    let other = newick::parse("((A:1,C:1):1,(B:1,D:1):1);").unwrap();
    assert!(matches!(
        phylo::consensus(&[one, other]),
        Err(phylovar::Error::ModelSpecification(_))
    ));
}

#[test]
fn test_from_parts_round_trip_and_validation() {
    let tree = newick::parse(BEE_TREE).unwrap();
    let corr = CorrelationMatrix::from_tree(&tree).unwrap();
    let rebuilt =
        CorrelationMatrix::from_parts(corr.species().to_vec(), &corr.to_rows()).unwrap();
    assert_eq!(corr, rebuilt);

    // Asymmetric input is rejected.
    let bad = vec![vec![1.0, 0.5], vec![0.4, 1.0]];
    assert!(CorrelationMatrix::from_parts(species(&["A", "B"]), &bad).is_err());

    // Off-unit diagonal is rejected.
    let bad = vec![vec![0.9, 0.0], vec![0.0, 1.0]];
    assert!(CorrelationMatrix::from_parts(species(&["A", "B"]), &bad).is_err());
}
