//! End-to-end pipeline test: delimited table + Newick text in, report out

use phylovar::loader;
use phylovar::model::{Covariate, SamplerConfig};
use phylovar::Pipeline;

/// Route pipeline tracing through the test harness (RUST_LOG-controlled).
fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Six species, 24 records each, interleaved across sites, with
/// deterministic within-species spread.
fn trait_table() -> String {
    let species = [
        ("Apis_mellifera", 2600.0),
        ("Bombus_terrestris", 4100.0),
        ("Xylocopa_violacea", 5200.0),
        ("Halictus_scabiosae", 1800.0),
        ("Lasioglossum_malachurum", 1200.0),
        ("Andrena_flavipes", 2100.0),
    ];
    let mut table = String::from("species,site,block,locality,measurement,partner\n");
    for i in 0..(6 * 24) {
        let rank = i % 6;
        let (name, base) = species[rank];
        let spread = ((i as u64).wrapping_mul(0x9E37_79B9_7F4A_7C15) >> 51) as f64;
        // Species differ in how many sites they were recorded at (2..=7),
        // so the site-count covariate varies across species.
        table.push_str(&format!(
            "{name},T{:02},B{},L{},{:.1},Cistus_ladanifer\n",
            (i / 6) % (rank + 2),
            i % 2,
            i % 3,
            base + spread * base / 40_000.0
        ));
    }
    table
}

const TREE_SET: &str = "\
(((Apis_mellifera:0.3,Bombus_terrestris:0.3):0.7,Xylocopa_violacea:1.0):1.0,\
((Halictus_scabiosae:0.5,Lasioglossum_malachurum:0.5):0.5,Andrena_flavipes:1.0):1.0,\
Megachile_rotundata:2.0);
(((Apis_mellifera:0.5,Bombus_terrestris:0.5):0.5,Xylocopa_violacea:1.0):1.0,\
((Halictus_scabiosae:0.3,Lasioglossum_malachurum:0.3):0.7,Andrena_flavipes:1.0):1.0,\
Megachile_rotundata:2.0);";

#[test]
fn test_full_pipeline_run() {
    init_logging();
    let observations = loader::parse_observations(&trait_table(), ',').unwrap();
    let trees = phylovar::phylo::newick::parse_many(TREE_SET).unwrap();
    assert_eq!(trees.len(), 2);

    let pipeline = Pipeline::builder()
        .seed(20_220_513)
        .covariate(Covariate::SiteCount)
        .sampler(SamplerConfig {
            chains: 4,
            warmup: 400,
            draws: 500,
            seed: 20_220_513,
        })
        .build();

    let report = pipeline.run(&observations, &trees).unwrap();

    // One summary row per species, each passing the 20-record filter.
    assert_eq!(report.summaries.len(), 6);
    for row in &report.summaries {
        assert_eq!(row.total_observations, 24);
        assert!(row.cv4 > 0.0);
        assert!(row.site_count >= 1 && row.site_count <= 7);
    }

    // The tree is pruned to the observed set: Megachile drops out.
    assert_eq!(report.matrix_species.len(), 6);
    assert!(!report
        .matrix_species
        .iter()
        .any(|s| s == "Megachile_rotundata"));
    for (i, row) in report.matrix_rows.iter().enumerate() {
        assert_eq!(row.len(), 6);
        assert!((row[i] - 1.0).abs() < 1e-15);
    }

    // Posterior summaries cover both coefficients and both scales.
    let names: Vec<&str> = report.parameters.iter().map(|p| p.name.as_str()).collect();
    assert_eq!(names, ["b_intercept", "b_site_count", "sigma", "sigma_A"]);
    for p in &report.parameters {
        assert!(p.q025 <= p.median && p.median <= p.q975);
        assert!(p.sd > 0.0);
    }

    // Signal block is coherent.
    let signal = &report.signal;
    assert!(signal.estimate.mean >= 0.0 && signal.estimate.mean <= 1.0);
    assert!(signal.estimate.ci_lower <= signal.estimate.ci_upper);
    assert!(signal.evidence_ratio >= 0.0);
    assert_eq!(signal.draws, 2000);
}

#[test]
fn test_report_renders_and_serializes() {
    init_logging();
    let observations = loader::parse_observations(&trait_table(), ',').unwrap();
    let trees = phylovar::phylo::newick::parse_many(TREE_SET).unwrap();

    let pipeline = Pipeline::builder()
        .seed(7)
        .sampler(SamplerConfig {
            chains: 2,
            warmup: 200,
            draws: 300,
            seed: 7,
        })
        .build();
    let report = pipeline.run(&observations, &trees).unwrap();

    let rendered = report.render();
    assert!(rendered.contains("Species summaries"));
    assert!(rendered.contains("Posterior parameters"));
    assert!(rendered.contains("Phylogenetic signal"));
    assert!(rendered.contains("Apis_mellifera"));

    let json = report.to_json().unwrap();
    let parsed: serde_json::Value = serde_json::from_str(&json).unwrap();
    assert_eq!(parsed["summaries"].as_array().unwrap().len(), 6);
    assert!(parsed["signal"]["estimate"]["mean"].is_number());
}

#[test]
fn test_unknown_species_in_table_is_fatal() {
    let mut table = trait_table();
    for i in 0..24 {
        table.push_str(&format!(
            "Ceratina_cucurbitina,T{:02},B0,L0,{:.1},Cistus_ladanifer\n",
            i % 5,
            900.0 + f64::from(i)
        ));
    }
    let observations = loader::parse_observations(&table, ',').unwrap();
    let trees = phylovar::phylo::newick::parse_many(TREE_SET).unwrap();

    let err = Pipeline::builder()
        .seed(1)
        .build()
        .run(&observations, &trees)
        .unwrap_err();
    assert!(matches!(
        err,
        phylovar::Error::UnknownSpecies(ref s) if s == "Ceratina_cucurbitina"
    ));
}

#[test]
fn test_summary_and_matrix_survive_independent_use() {
    // The aggregator output and correlation matrix are cacheable
    // artifacts: computing them does not require running the sampler.
    use phylovar::aggregate::{AggregatorConfig, TraitAggregator};

    let observations = loader::parse_observations(&trait_table(), ',').unwrap();
    let summaries = TraitAggregator::new(AggregatorConfig::new(3))
        .summarize(&observations)
        .unwrap();
    let species: Vec<String> = summaries.iter().map(|s| s.species.clone()).collect();

    let trees = phylovar::phylo::newick::parse_many(TREE_SET).unwrap();
    let matrix = Pipeline::builder()
        .seed(3)
        .build()
        .correlation(&trees, &species)
        .unwrap();

    assert_eq!(matrix.species(), species.as_slice());
    let exported = matrix.to_rows();
    let reloaded =
        phylovar::phylo::CorrelationMatrix::from_parts(species, &exported).unwrap();
    assert_eq!(matrix, reloaded);
}
