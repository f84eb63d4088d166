//! Strain name -> assembly accession resolution against a local reference.
//!
//! Lookup stages, first hit wins:
//! - `exact`: normalized name equality (trimmed, case-folded, whitespace collapsed)
//! - `alias`: compact key equality (ASCII alphanumerics only, `ECOR-48` == `ecor48`)
//! - `token`: compact key equals one whitespace token of the reference name,
//!   not counting a leading `Genus species` pair or naming qualifiers
//!   (`str.`, `substr.`, `serovar`, ...)
//!
//! Within a stage the best-ranked RefSeq category wins, then file order.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::io::Read;
use std::path::Path;

use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::domain::AssemblyAccession;
use crate::error::PrepError;
use crate::fs_util;
use crate::table::{Column, TableReader};

const REFERENCE_NAME: Column = Column {
    name: "strain_name",
    aliases: &["strain_name", "strain", "name"],
};

const REFERENCE_ACCESSION: Column = Column {
    name: "accession",
    aliases: &["accession", "assembly_accession"],
};

const REFERENCE_CATEGORY: Column = Column {
    name: "category",
    aliases: &["category", "refseq_category"],
};

pub fn normalize_name(value: &str) -> String {
    value
        .split_whitespace()
        .map(str::to_lowercase)
        .collect::<Vec<_>>()
        .join(" ")
}

pub fn compact_key(value: &str) -> String {
    value
        .chars()
        .filter(char::is_ascii_alphanumeric)
        .map(|ch| ch.to_ascii_lowercase())
        .collect()
}

/// Compact forms of words that qualify a name rather than identify a strain.
const NAME_QUALIFIERS: &[&str] = &["str", "substr", "strain", "subsp", "serovar", "sp", "var"];

fn is_genus(word: &str) -> bool {
    let mut chars = word.chars();
    matches!(chars.next(), Some(first) if first.is_ascii_uppercase())
        && !chars.as_str().is_empty()
        && chars.all(|ch| ch.is_ascii_lowercase())
}

fn is_epithet(word: &str) -> bool {
    let word = word.trim_end_matches('.');
    !word.is_empty() && word.chars().all(|ch| ch.is_ascii_lowercase())
}

/// Tokens of `name` that may identify a strain on their own.
fn strain_tokens(name: &str) -> HashSet<String> {
    let words: Vec<&str> = name.split_whitespace().collect();
    let skip = match words.as_slice() {
        [genus, epithet, ..] if is_genus(genus) && is_epithet(epithet) => 2,
        _ => 0,
    };
    words[skip..]
        .iter()
        .map(|word| compact_key(word))
        .filter(|token| !token.is_empty() && !NAME_QUALIFIERS.contains(&token.as_str()))
        .collect()
}

fn category_rank(category: Option<&str>) -> u8 {
    let Some(category) = category.map(str::to_lowercase) else {
        return 0;
    };
    if category.contains("reference") {
        2
    } else if category.contains("representative") {
        1
    } else {
        0
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReferenceEntry {
    pub name: String,
    pub accession: AssemblyAccession,
    pub category: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchKind {
    Exact,
    Alias,
    Token,
}

impl fmt::Display for MatchKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MatchKind::Exact => write!(f, "exact"),
            MatchKind::Alias => write!(f, "alias"),
            MatchKind::Token => write!(f, "token"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StrainMatch {
    pub accession: AssemblyAccession,
    pub kind: MatchKind,
    pub reference_name: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ReferenceLoadStats {
    pub records: usize,
    pub entries: usize,
    pub skipped: usize,
}

#[derive(Debug, Clone, Default)]
pub struct StrainReference {
    entries: Vec<ReferenceEntry>,
    exact: HashMap<String, Vec<usize>>,
    alias: HashMap<String, Vec<usize>>,
    token: HashMap<String, Vec<usize>>,
}

impl StrainReference {
    pub fn new(entries: Vec<ReferenceEntry>) -> Self {
        let mut reference = Self {
            entries: Vec::new(),
            exact: HashMap::new(),
            alias: HashMap::new(),
            token: HashMap::new(),
        };
        for entry in entries {
            reference.push(entry);
        }
        reference
    }

    fn push(&mut self, entry: ReferenceEntry) {
        let idx = self.entries.len();
        self.exact
            .entry(normalize_name(&entry.name))
            .or_default()
            .push(idx);
        let compact = compact_key(&entry.name);
        if !compact.is_empty() {
            self.alias.entry(compact).or_default().push(idx);
        }
        for token in strain_tokens(&entry.name) {
            self.token.entry(token).or_default().push(idx);
        }
        self.entries.push(entry);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// `.jsonl`, `.ndjson` and `.json` are read as NCBI Datasets JSON reports,
    /// anything else as a TSV.
    pub fn load(path: &Path) -> Result<(Self, ReferenceLoadStats), PrepError> {
        let name = path
            .file_name()
            .map(|name| name.to_string_lossy().to_ascii_lowercase())
            .unwrap_or_default();
        let name = name.strip_suffix(".gz").unwrap_or(&name);
        if name.ends_with(".jsonl") || name.ends_with(".ndjson") || name.ends_with(".json") {
            Self::from_json_lines(path)
        } else {
            Self::from_tsv(path)
        }
    }

    pub fn from_tsv(path: &Path) -> Result<(Self, ReferenceLoadStats), PrepError> {
        let reader = TableReader::open(path)?;
        let name_idx = reader.require(&REFERENCE_NAME)?;
        let accession_idx = reader.require(&REFERENCE_ACCESSION)?;
        let category_idx = reader.find(&REFERENCE_CATEGORY);

        let mut stats = ReferenceLoadStats::default();
        let mut entries = Vec::new();
        for row in reader {
            let row = row?;
            stats.records += 1;
            let name = row.get(name_idx);
            let Ok(accession) = row.get(accession_idx).parse::<AssemblyAccession>() else {
                debug!(line = row.line, "reference row without a valid accession");
                stats.skipped += 1;
                continue;
            };
            if name.is_empty() {
                stats.skipped += 1;
                continue;
            }
            let category = category_idx
                .map(|idx| row.get(idx))
                .filter(|value| !value.is_empty())
                .map(str::to_string);
            entries.push(ReferenceEntry {
                name: name.to_string(),
                accession,
                category,
            });
        }
        stats.entries = entries.len();
        Ok((Self::new(entries), stats))
    }

    /// Reads `datasets summary genome ... --as-json-lines` output. A single
    /// document with a `reports` array is accepted as well.
    pub fn from_json_lines(path: &Path) -> Result<(Self, ReferenceLoadStats), PrepError> {
        let mut content = String::new();
        fs_util::open_text(path)?
            .read_to_string(&mut content)
            .map_err(|err| PrepError::Filesystem(format!("read {}: {err}", path.display())))?;

        let mut stats = ReferenceLoadStats::default();
        let mut entries = Vec::new();
        if let Ok(value) = serde_json::from_str::<Value>(&content) {
            collect_reports(&value, &mut entries, &mut stats);
        } else {
            for line in content.lines().map(str::trim).filter(|line| !line.is_empty()) {
                match serde_json::from_str::<Value>(line) {
                    Ok(value) => collect_reports(&value, &mut entries, &mut stats),
                    Err(err) => {
                        debug!(error = %err, "skipping unparsable reference line");
                        stats.skipped += 1;
                    }
                }
            }
        }
        stats.entries = entries.len();
        Ok((Self::new(entries), stats))
    }

    pub fn lookup(&self, strain: &str) -> Option<StrainMatch> {
        let normalized = normalize_name(strain);
        if normalized.is_empty() {
            return None;
        }
        if let Some(found) = self.best(self.exact.get(&normalized), MatchKind::Exact) {
            return Some(found);
        }
        let compact = compact_key(strain);
        if compact.is_empty() {
            return None;
        }
        self.best(self.alias.get(&compact), MatchKind::Alias)
            .or_else(|| self.best(self.token.get(&compact), MatchKind::Token))
    }

    fn best(&self, candidates: Option<&Vec<usize>>, kind: MatchKind) -> Option<StrainMatch> {
        let mut best: Option<(u8, &ReferenceEntry)> = None;
        for &idx in candidates? {
            let entry = &self.entries[idx];
            let rank = category_rank(entry.category.as_deref());
            if best.map(|(current, _)| rank > current).unwrap_or(true) {
                best = Some((rank, entry));
            }
        }
        best.map(|(_, entry)| StrainMatch {
            accession: entry.accession.clone(),
            kind,
            reference_name: entry.name.clone(),
        })
    }
}

fn collect_reports(value: &Value, entries: &mut Vec<ReferenceEntry>, stats: &mut ReferenceLoadStats) {
    if let Some(reports) = value.get("reports").and_then(Value::as_array) {
        for report in reports {
            collect_reports(report, entries, stats);
        }
        return;
    }
    stats.records += 1;
    match entry_from_report(value) {
        Some(entry) => entries.push(entry),
        None => stats.skipped += 1,
    }
}

fn entry_from_report(report: &Value) -> Option<ReferenceEntry> {
    let accession = ["/accession", "/current_accession", "/assembly/assembly_accession"]
        .iter()
        .filter_map(|pointer| report.pointer(pointer).and_then(Value::as_str))
        .find_map(|value| value.parse::<AssemblyAccession>().ok())?;
    let name = [
        "/organism/infraspecific_names/strain",
        "/organism/infraspecific_names/isolate",
        "/organism/organism_name",
    ]
    .iter()
    .filter_map(|pointer| report.pointer(pointer).and_then(Value::as_str))
    .map(str::trim)
    .find(|value| !value.is_empty())?
    .to_string();
    let category = report
        .pointer("/assembly_info/refseq_category")
        .and_then(Value::as_str)
        .map(str::to_string);
    Some(ReferenceEntry {
        name,
        accession,
        category,
    })
}

/// Strain name -> accession, at most one accession per strain.
#[derive(Debug, Clone, Default)]
pub struct StrainAccessionMap {
    entries: Vec<(String, AssemblyAccession)>,
    index: HashMap<String, usize>,
}

impl StrainAccessionMap {
    /// Keeps the first accession recorded for a strain; returns `false` otherwise.
    pub fn insert(&mut self, strain: String, accession: AssemblyAccession) -> bool {
        if self.index.contains_key(&strain) {
            return false;
        }
        self.index.insert(strain.clone(), self.entries.len());
        self.entries.push((strain, accession));
        true
    }

    pub fn get(&self, strain: &str) -> Option<&AssemblyAccession> {
        self.index.get(strain).map(|&idx| &self.entries[idx].1)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &AssemblyAccession)> {
        self.entries
            .iter()
            .map(|(strain, accession)| (strain.as_str(), accession))
    }

    /// Distinct accessions in strain order.
    pub fn accessions(&self) -> Vec<&AssemblyAccession> {
        let mut seen = HashSet::new();
        self.entries
            .iter()
            .map(|(_, accession)| accession)
            .filter(|accession| seen.insert(*accession))
            .collect()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct MappedStrain {
    pub strain: String,
    #[serde(flatten)]
    pub found: StrainMatch,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct MappingStats {
    pub strains: usize,
    pub duplicate_strains: usize,
    pub matched: usize,
    pub unmatched: usize,
    pub exact: usize,
    pub alias: usize,
    pub token: usize,
}

#[derive(Debug, Clone, Default)]
pub struct MappingOutcome {
    pub map: StrainAccessionMap,
    pub matches: Vec<MappedStrain>,
    /// Strains with no reference match; each was logged as a warning.
    pub unmatched: Vec<String>,
    pub stats: MappingStats,
}

pub fn map_strains(strains: &[String], reference: &StrainReference) -> MappingOutcome {
    let mut outcome = MappingOutcome::default();
    let mut seen = HashSet::new();
    for strain in strains {
        let strain = strain.trim();
        if strain.is_empty() {
            continue;
        }
        if !seen.insert(strain.to_string()) {
            outcome.stats.duplicate_strains += 1;
            continue;
        }
        outcome.stats.strains += 1;
        match reference.lookup(strain) {
            Some(found) => {
                match found.kind {
                    MatchKind::Exact => outcome.stats.exact += 1,
                    MatchKind::Alias => outcome.stats.alias += 1,
                    MatchKind::Token => outcome.stats.token += 1,
                }
                debug!(strain, accession = %found.accession, kind = %found.kind, "mapped strain");
                outcome
                    .map
                    .insert(strain.to_string(), found.accession.clone());
                outcome.matches.push(MappedStrain {
                    strain: strain.to_string(),
                    found,
                });
            }
            None => {
                warn!(strain, "no reference accession for strain");
                outcome.unmatched.push(strain.to_string());
            }
        }
    }
    outcome.stats.matched = outcome.map.len();
    outcome.stats.unmatched = outcome.unmatched.len();
    info!(
        strains = outcome.stats.strains,
        matched = outcome.stats.matched,
        unmatched = outcome.stats.unmatched,
        "mapped strains to accessions"
    );
    outcome
}

/// Strain names from the first column of an interaction matrix (header row skipped).
pub fn read_matrix_strains(path: &Path) -> Result<Vec<String>, PrepError> {
    let mut strains = Vec::new();
    for row in TableReader::open(path)? {
        let row = row?;
        let strain = row.first();
        if !strain.is_empty() {
            strains.push(strain.to_string());
        }
    }
    Ok(strains)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(name: &str, accession: &str, category: Option<&str>) -> ReferenceEntry {
        ReferenceEntry {
            name: name.to_string(),
            accession: accession.parse().unwrap(),
            category: category.map(str::to_string),
        }
    }

    #[test]
    fn compact_key_strips_punctuation() {
        assert_eq!(compact_key("ECOR-48"), "ecor48");
        assert_eq!(compact_key(" ecor 48 "), "ecor48");
    }

    #[test]
    fn lookup_stages_in_order() {
        let reference = StrainReference::new(vec![
            entry("ECOR48", "GCA_000000048.1", None),
            entry("Escherichia coli LF82", "GCA_000000082.1", None),
        ]);
        assert_eq!(reference.lookup(" ecor48 ").unwrap().kind, MatchKind::Exact);
        assert_eq!(reference.lookup("ECOR-48").unwrap().kind, MatchKind::Alias);
        let token = reference.lookup("LF82").unwrap();
        assert_eq!(token.kind, MatchKind::Token);
        assert_eq!(token.accession.as_str(), "GCA_000000082.1");
        assert!(reference.lookup("K-12").is_none());
    }

    #[test]
    fn species_words_are_not_strain_tokens() {
        let reference = StrainReference::new(vec![
            entry("Escherichia coli ECOR48", "GCA_000000048.1", None),
            entry("Escherichia coli str. K-12 substr. MG1655", "GCF_000005845.2", None),
        ]);
        for generic in ["coli", "Escherichia", "str.", "substr"] {
            assert!(reference.lookup(generic).is_none(), "{generic} matched");
        }
        assert_eq!(
            reference.lookup("ECOR48").unwrap().accession.as_str(),
            "GCA_000000048.1"
        );
        assert_eq!(
            reference.lookup("MG1655").unwrap().accession.as_str(),
            "GCF_000005845.2"
        );
    }

    #[test]
    fn leading_words_kept_when_not_a_binomial() {
        let tokens = strain_tokens("ECOR 48");
        assert!(tokens.contains("ecor"));
        assert!(tokens.contains("48"));
        assert_eq!(strain_tokens("Escherichia coli"), HashSet::new());
    }

    #[test]
    fn reference_category_beats_file_order() {
        let reference = StrainReference::new(vec![
            entry("ECOR48", "GCA_000000001.1", None),
            entry("ECOR48", "GCF_000000002.1", Some("reference genome")),
            entry("ECOR48", "GCF_000000003.1", Some("reference genome")),
        ]);
        let found = reference.lookup("ECOR48").unwrap();
        assert_eq!(found.accession.as_str(), "GCF_000000002.1");
    }

    #[test]
    fn report_fields_from_datasets_json() {
        let report: Value = serde_json::json!({
            "accession": "GCF_000005845.2",
            "organism": {
                "organism_name": "Escherichia coli str. K-12 substr. MG1655",
                "infraspecific_names": { "strain": "K-12 substr. MG1655" }
            },
            "assembly_info": { "refseq_category": "reference genome" }
        });
        let entry = entry_from_report(&report).unwrap();
        assert_eq!(entry.name, "K-12 substr. MG1655");
        assert_eq!(entry.accession.as_str(), "GCF_000005845.2");
        assert_eq!(entry.category.as_deref(), Some("reference genome"));
    }

    #[test]
    fn map_keeps_first_accession() {
        let mut map = StrainAccessionMap::default();
        assert!(map.insert("ECOR48".to_string(), "GCA_000000001.1".parse().unwrap()));
        assert!(!map.insert("ECOR48".to_string(), "GCA_000000002.1".parse().unwrap()));
        assert_eq!(map.get("ECOR48").unwrap().as_str(), "GCA_000000001.1");
    }
}
