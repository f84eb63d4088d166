use std::path::Path;

use serde::Serialize;
use tracing::{debug, info};

use crate::domain::{AssemblyAccession, PhageId, PositivePairSet};
use crate::error::PrepError;
use crate::table::{self, Column, TableReader};

/// Header names that may carry host taxonomy in annotation exports.
pub const SPECIES_COLUMNS: &[&str] = &[
    "host_species",
    "species",
    "org",
    "organism",
    "organism_name",
    "host",
    "host_name",
    "host_taxonomy",
    "taxonomy",
    "lineage",
];

const HOST_SPECIES: Column = Column {
    name: "host_species",
    aliases: SPECIES_COLUMNS,
};

/// Case-folds and reduces every run of non-alphanumeric characters to one
/// space, so `Escherichia_coli`, `Bacteria;Escherichia coli` and
/// `escherichia  coli` all share word boundaries.
pub fn normalize_species(value: &str) -> String {
    value
        .chars()
        .map(|ch| if ch.is_alphanumeric() { ch } else { ' ' })
        .collect::<String>()
        .split_whitespace()
        .map(str::to_lowercase)
        .collect::<Vec<_>>()
        .join(" ")
}

/// True when the normalized field equals the target or contains it as a
/// whole-word phrase.
pub fn species_matches(field: &str, normalized_target: &str) -> bool {
    if normalized_target.is_empty() {
        return false;
    }
    let field = normalize_species(field);
    field == normalized_target || format!(" {field} ").contains(&format!(" {normalized_target} "))
}

#[derive(Debug, Clone)]
pub struct Extraction {
    pub pairs: PositivePairSet,
    pub hosts: Vec<AssemblyAccession>,
    pub stats: ExtractionStats,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ExtractionStats {
    pub rows: usize,
    pub species_rejected: usize,
    pub malformed_accessions: usize,
    pub missing_phage_ids: usize,
    pub duplicate_pairs: usize,
    pub pairs: usize,
    pub hosts: usize,
}

/// Filters an annotation table to positive host/phage pairs, optionally for one
/// host species.
pub fn extract_pairs(path: &Path, species: Option<&str>) -> Result<Extraction, PrepError> {
    let reader = TableReader::open(path)?;
    let host_idx = reader.require(&table::HOST_ACCESSION)?;
    let phage_idx = reader.require(&table::PHAGE_ID)?;
    let target = match species.map(normalize_species) {
        Some(target) if target.is_empty() => {
            return Err(PrepError::InvalidConfig(format!(
                "species {:?} has no letters or digits to match on",
                species.unwrap_or_default()
            )));
        }
        other => other,
    };
    let species_idx = match &target {
        Some(_) => {
            reader.require(&HOST_SPECIES)?;
            reader.find_all(SPECIES_COLUMNS)
        }
        None => Vec::new(),
    };

    let mut pairs = PositivePairSet::new();
    let mut stats = ExtractionStats::default();
    for row in reader {
        let row = row?;
        stats.rows += 1;

        if let Some(target) = &target {
            let matched = species_idx
                .iter()
                .any(|&idx| species_matches(row.get(idx), target));
            if !matched {
                stats.species_rejected += 1;
                continue;
            }
        }

        let Some(host) = AssemblyAccession::find_in(row.get(host_idx)) else {
            debug!(
                line = row.line,
                value = row.get(host_idx),
                "skipping row with malformed accession"
            );
            stats.malformed_accessions += 1;
            continue;
        };
        let Ok(phage) = row.get(phage_idx).parse::<PhageId>() else {
            debug!(line = row.line, "skipping row without phage id");
            stats.missing_phage_ids += 1;
            continue;
        };
        if !pairs.insert(host, phage) {
            stats.duplicate_pairs += 1;
        }
    }

    let hosts = pairs.hosts();
    stats.pairs = pairs.len();
    stats.hosts = hosts.len();
    info!(
        rows = stats.rows,
        pairs = stats.pairs,
        hosts = stats.hosts,
        malformed = stats.malformed_accessions,
        "extracted positive pairs"
    );
    Ok(Extraction {
        pairs,
        hosts,
        stats,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_case_and_separators() {
        assert_eq!(
            normalize_species("  Escherichia_coli   O157:H7 "),
            "escherichia coli o157 h7"
        );
        assert_eq!(normalize_species(" ;_ "), "");
    }

    #[test]
    fn matches_whole_word_phrase() {
        let target = normalize_species("Escherichia coli");
        assert!(species_matches("Escherichia coli", &target));
        assert!(species_matches("escherichia_coli O157:H7", &target));
        assert!(species_matches("Bacteria; Enterobacterales; Escherichia coli", &target));
        assert!(species_matches(
            "cellular organisms;Bacteria;Pseudomonadota;Enterobacteriaceae;Escherichia;Escherichia coli",
            &target
        ));
        assert!(species_matches("Escherichia coli|562", &target));
        assert!(!species_matches("Escherichia colinearis", &target));
        assert!(!species_matches("Bacteria;Escherichia;Escherichia albertii", &target));
        assert!(!species_matches("Salmonella enterica", &target));
    }
}
