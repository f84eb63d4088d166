use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::PrepError;

static ACCESSION_IN_TEXT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"GC[AF]_\d+\.\d+").expect("accession pattern compiles"));

/// NCBI assembly accession such as `GCA_018015695.1` or `GCF_000005845.2`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct AssemblyAccession(String);

impl AssemblyAccession {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Finds the first accession embedded in a longer sample label, e.g.
    /// `GCA_018015695.1_-_PDT000998088.1`.
    pub fn find_in(text: &str) -> Option<Self> {
        ACCESSION_IN_TEXT
            .find(text)
            .map(|found| Self(found.as_str().to_string()))
    }
}

impl fmt::Display for AssemblyAccession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for AssemblyAccession {
    type Err = PrepError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized = value.trim();
        let Some(rest) = normalized
            .strip_prefix("GCA_")
            .or_else(|| normalized.strip_prefix("GCF_"))
        else {
            return Err(PrepError::MalformedAccession(value.to_string()));
        };
        let is_valid = rest
            .split_once('.')
            .map(|(digits, version)| {
                !digits.is_empty()
                    && !version.is_empty()
                    && digits.chars().all(|ch| ch.is_ascii_digit())
                    && version.chars().all(|ch| ch.is_ascii_digit())
            })
            .unwrap_or(false);
        if !is_valid {
            return Err(PrepError::MalformedAccession(value.to_string()));
        }
        Ok(Self(normalized.to_string()))
    }
}

/// Phage contig identifier, e.g. `NAFV01000136.1`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PhageId(String);

impl PhageId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PhageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for PhageId {
    type Err = PrepError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let trimmed = value.trim();
        if trimmed.is_empty() || trimmed.contains(['\t', ',']) {
            return Err(PrepError::InvalidPhageId(value.to_string()));
        }
        Ok(Self(trimmed.to_string()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Label {
    Positive,
    Negative,
}

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Label::Positive => write!(f, "1"),
            Label::Negative => write!(f, "0"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct InteractionRecord {
    pub host_accession: AssemblyAccession,
    pub phage_id: PhageId,
    pub label: Label,
}

impl InteractionRecord {
    pub fn positive(host_accession: AssemblyAccession, phage_id: PhageId) -> Self {
        Self {
            host_accession,
            phage_id,
            label: Label::Positive,
        }
    }

    pub fn negative(host_accession: AssemblyAccession, phage_id: PhageId) -> Self {
        Self {
            host_accession,
            phage_id,
            label: Label::Negative,
        }
    }
}

/// Positive host-phage pairs, unique by `(host, phage)`, in first-seen order.
#[derive(Debug, Clone, Default)]
pub struct PositivePairSet {
    records: Vec<InteractionRecord>,
    seen: HashSet<(AssemblyAccession, PhageId)>,
}

impl PositivePairSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `false` when the pair was already present.
    pub fn insert(&mut self, host: AssemblyAccession, phage: PhageId) -> bool {
        if !self.seen.insert((host.clone(), phage.clone())) {
            return false;
        }
        self.records.push(InteractionRecord::positive(host, phage));
        true
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &InteractionRecord> {
        self.records.iter()
    }

    pub fn contains(&self, host: &AssemblyAccession, phage: &PhageId) -> bool {
        self.seen.contains(&(host.clone(), phage.clone()))
    }

    /// Distinct host accessions, sorted.
    pub fn hosts(&self) -> Vec<AssemblyAccession> {
        self.records
            .iter()
            .map(|record| record.host_accession.clone())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    /// Drops pairs whose phage is not in `universe`; returns how many were dropped.
    pub fn retain_phages(&mut self, universe: &HashSet<PhageId>) -> usize {
        let before = self.records.len();
        self.records
            .retain(|record| universe.contains(&record.phage_id));
        self.seen
            .retain(|(_, phage)| universe.contains(phage));
        before - self.records.len()
    }
}

impl FromIterator<(AssemblyAccession, PhageId)> for PositivePairSet {
    fn from_iter<I: IntoIterator<Item = (AssemblyAccession, PhageId)>>(iter: I) -> Self {
        let mut set = Self::new();
        for (host, phage) in iter {
            set.insert(host, phage);
        }
        set
    }
}

/// Host -> phages observed positive for that host, plus the sorted phage universe.
#[derive(Debug, Clone)]
pub struct HostIndex {
    positives: BTreeMap<AssemblyAccession, BTreeSet<PhageId>>,
    universe: Vec<PhageId>,
}

impl HostIndex {
    pub fn from_pairs(pairs: &PositivePairSet) -> Self {
        let mut positives: BTreeMap<AssemblyAccession, BTreeSet<PhageId>> = BTreeMap::new();
        let mut universe = BTreeSet::new();
        for record in pairs.iter() {
            positives
                .entry(record.host_accession.clone())
                .or_default()
                .insert(record.phage_id.clone());
            universe.insert(record.phage_id.clone());
        }
        Self {
            positives,
            universe: universe.into_iter().collect(),
        }
    }

    pub fn host_count(&self) -> usize {
        self.positives.len()
    }

    pub fn hosts(&self) -> impl Iterator<Item = &AssemblyAccession> {
        self.positives.keys()
    }

    pub fn positives(&self, host: &AssemblyAccession) -> Option<&BTreeSet<PhageId>> {
        self.positives.get(host)
    }

    pub fn universe(&self) -> &[PhageId] {
        &self.universe
    }
}

/// Labelled records grouped by host: each host's positives, then its negatives.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BalancedDataset {
    records: Vec<InteractionRecord>,
}

impl BalancedDataset {
    pub fn push_host_block(&mut self, block: Vec<InteractionRecord>) {
        self.records.extend(block);
    }

    pub fn records(&self) -> &[InteractionRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn positives(&self) -> impl Iterator<Item = &InteractionRecord> {
        self.records
            .iter()
            .filter(|record| record.label == Label::Positive)
    }

    pub fn negatives(&self) -> impl Iterator<Item = &InteractionRecord> {
        self.records
            .iter()
            .filter(|record| record.label == Label::Negative)
    }
}
