//! Input loading (thin I/O)
//!
//! Reads the rectangular trait table and Newick tree files into the core
//! data types. The schema contract is checked against the header row, not
//! inferred: the required columns are `species`, `site`, `block`,
//! `locality`, `measurement`, and `partner` (any order, extra columns
//! ignored).

use std::collections::HashMap;
use std::fs;
use std::path::Path;

use tracing::info;

use crate::aggregate::Observation;
use crate::phylo::{newick, PhyloTree};
use crate::{Error, Result};

/// Required trait-table columns.
const REQUIRED_COLUMNS: [&str; 6] = [
    "species",
    "site",
    "block",
    "locality",
    "measurement",
    "partner",
];

/// Read a delimited trait table from a file.
///
/// # Errors
/// Returns [`Error::Io`] for unreadable files and [`Error::Parse`] for
/// schema or value problems.
pub fn read_observations<P: AsRef<Path>>(path: P, delimiter: char) -> Result<Vec<Observation>> {
    let text = fs::read_to_string(path.as_ref())?;
    let observations = parse_observations(&text, delimiter)?;
    info!(
        path = %path.as_ref().display(),
        rows = observations.len(),
        "trait table loaded"
    );
    Ok(observations)
}

/// Parse a delimited trait table from text. The first line must be a
/// header naming the required columns.
///
/// # Errors
/// Returns [`Error::Parse`] for a missing header, missing required
/// columns, ragged rows, or unparseable measurements.
pub fn parse_observations(text: &str, delimiter: char) -> Result<Vec<Observation>> {
    let mut lines = text.lines().enumerate();
    let (_, header) = lines
        .next()
        .ok_or_else(|| Error::Parse("trait table is empty".to_string()))?;

    let columns: Vec<&str> = header.split(delimiter).map(str::trim).collect();
    let mut index: HashMap<&str, usize> = HashMap::new();
    for (i, name) in columns.iter().enumerate() {
        index.entry(name).or_insert(i);
    }
    for required in REQUIRED_COLUMNS {
        if !index.contains_key(required) {
            return Err(Error::Parse(format!(
                "trait table is missing required column '{required}'"
            )));
        }
    }

    let mut observations = Vec::new();
    for (line_number, line) in lines {
        if line.trim().is_empty() {
            continue;
        }
        let fields: Vec<&str> = line.split(delimiter).map(str::trim).collect();
        if fields.len() != columns.len() {
            return Err(Error::Parse(format!(
                "line {}: expected {} fields, found {}",
                line_number + 1,
                columns.len(),
                fields.len()
            )));
        }

        let field = |name: &str| fields[index[name]];
        let measurement: f64 = field("measurement").parse().map_err(|_| {
            Error::Parse(format!(
                "line {}: invalid measurement '{}'",
                line_number + 1,
                field("measurement")
            ))
        })?;

        observations.push(Observation {
            species: field("species").to_string(),
            site: field("site").to_string(),
            block: field("block").to_string(),
            locality: field("locality").to_string(),
            measurement,
            partner: field("partner").to_string(),
        });
    }
    Ok(observations)
}

/// Read one or more Newick trees from a file.
///
/// # Errors
/// Returns [`Error::Io`] for unreadable files and [`Error::Parse`] for
/// malformed Newick text.
pub fn read_trees<P: AsRef<Path>>(path: P) -> Result<Vec<PhyloTree>> {
    let text = fs::read_to_string(path.as_ref())?;
    let trees = newick::parse_many(&text)?;
    info!(
        path = %path.as_ref().display(),
        trees = trees.len(),
        "tree file loaded"
    );
    Ok(trees)
}

#[cfg(test)]
mod tests {
    use super::*;

    const TABLE: &str = "\
species,site,block,locality,measurement,partner,collector
Apis mellifera,T01,B1,Doñana,2710.5,Cistus ladanifer,MG
Apis mellifera,T02,B1,Doñana,2695.0,Cistus ladanifer,MG
Bombus terrestris,T01,B1,Doñana,4120.2,Rosmarinus officinalis,AE
";

    #[test]
    fn test_parse_observations() {
        let rows = parse_observations(TABLE, ',').unwrap();
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[0].species, "Apis mellifera");
        assert_eq!(rows[2].site, "T01");
        assert!((rows[1].measurement - 2695.0).abs() < 1e-12);
        // Extra columns (collector) are ignored.
        assert_eq!(rows[2].partner, "Rosmarinus officinalis");
    }

    #[test]
    fn test_missing_column_rejected() {
        let text = "species,site,block,locality,partner\nA,s,b,l,p\n";
        let err = parse_observations(text, ',').unwrap_err();
        assert!(matches!(err, Error::Parse(ref m) if m.contains("measurement")));
    }

    #[test]
    fn test_ragged_row_rejected() {
        let text = "species,site,block,locality,measurement,partner\nA,s,b,l,12.0\n";
        assert!(matches!(
            parse_observations(text, ','),
            Err(Error::Parse(_))
        ));
    }

    #[test]
    fn test_bad_measurement_rejected() {
        let text = "species,site,block,locality,measurement,partner\nA,s,b,l,wide,p\n";
        let err = parse_observations(text, ',').unwrap_err();
        assert!(matches!(err, Error::Parse(ref m) if m.contains("wide")));
    }

    #[test]
    fn test_empty_input_rejected() {
        assert!(matches!(parse_observations("", ','), Err(Error::Parse(_))));
    }

    #[test]
    fn test_blank_lines_skipped() {
        let text = "species,site,block,locality,measurement,partner\n\nA,s,b,l,12.0,p\n\n";
        assert_eq!(parse_observations(text, ',').unwrap().len(), 1);
    }
}
