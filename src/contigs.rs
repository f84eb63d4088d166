use std::collections::HashSet;
use std::io::BufRead;
use std::path::Path;
use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;
use tracing::{debug, info};

use crate::domain::{InteractionRecord, PhageId, PositivePairSet};
use crate::error::PrepError;
use crate::fs_util;

static HEADER_CONTIG: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"__([A-Z0-9]+\.\d+)__").expect("contig header pattern compiles")
});

/// Extracts the contig token from a FASTA header such as
/// `>Escherichia_coli__GCA_002099625.1_-_ASM209962v1__NAFV01000136.1__259__562`.
pub fn contig_from_header(header: &str) -> Option<&str> {
    HEADER_CONTIG
        .captures(header)
        .and_then(|caps| caps.get(1))
        .map(|found| found.as_str())
}

#[derive(Debug, Clone)]
pub enum UniverseSource<'a> {
    ContigList(&'a Path),
    Fasta(&'a Path),
}

impl<'a> UniverseSource<'a> {
    /// FASTA extensions (`.fa`, `.fasta`, `.fna`, optionally `.gz`) select header
    /// scanning; anything else is read as a contig list.
    pub fn for_path(path: &'a Path) -> Self {
        let name = path
            .file_name()
            .map(|name| name.to_string_lossy().to_ascii_lowercase())
            .unwrap_or_default();
        let name = name.strip_suffix(".gz").unwrap_or(&name);
        if [".fa", ".fasta", ".fna"].iter().any(|ext| name.ends_with(ext)) {
            UniverseSource::Fasta(path)
        } else {
            UniverseSource::ContigList(path)
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct PhageUniverse {
    contigs: HashSet<PhageId>,
}

impl PhageUniverse {
    pub fn load(source: &UniverseSource<'_>) -> Result<Self, PrepError> {
        match source {
            UniverseSource::ContigList(path) => Self::from_list(path),
            UniverseSource::Fasta(path) => Self::from_fasta(path),
        }
    }

    pub fn from_list(path: &Path) -> Result<Self, PrepError> {
        let mut contigs = HashSet::new();
        for item in fs_util::read_list(path)? {
            if let Ok(id) = item.parse::<PhageId>() {
                contigs.insert(id);
            }
        }
        debug!(path = %path.display(), contigs = contigs.len(), "loaded contig list");
        Ok(Self { contigs })
    }

    /// Scans header lines only; sequence lines are never inspected.
    pub fn from_fasta(path: &Path) -> Result<Self, PrepError> {
        let reader = fs_util::open_text(path)?;
        let mut contigs = HashSet::new();
        let mut headers = 0usize;
        for line in reader.lines() {
            let line = line
                .map_err(|err| PrepError::Filesystem(format!("read {}: {err}", path.display())))?;
            if !line.starts_with('>') {
                continue;
            }
            headers += 1;
            if let Some(id) = contig_from_header(&line).and_then(|c| c.parse::<PhageId>().ok()) {
                contigs.insert(id);
            }
        }
        debug!(headers, contigs = contigs.len(), "scanned FASTA headers");
        Ok(Self { contigs })
    }

    pub fn len(&self) -> usize {
        self.contigs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.contigs.is_empty()
    }

    pub fn contains(&self, phage: &PhageId) -> bool {
        self.contigs.contains(phage)
    }

    pub fn as_set(&self) -> &HashSet<PhageId> {
        &self.contigs
    }

    pub fn sorted(&self) -> Vec<PhageId> {
        let mut items: Vec<_> = self.contigs.iter().cloned().collect();
        items.sort();
        items
    }
}

impl FromIterator<PhageId> for PhageUniverse {
    fn from_iter<I: IntoIterator<Item = PhageId>>(iter: I) -> Self {
        Self {
            contigs: iter.into_iter().collect(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct PresenceStats {
    pub contigs_available: usize,
    pub pairs_in: usize,
    pub pairs_kept: usize,
    pub pairs_removed: usize,
}

/// Keeps the pairs whose phage contig is part of `universe`.
pub fn filter_by_presence(
    pairs: &PositivePairSet,
    universe: &PhageUniverse,
) -> (Vec<InteractionRecord>, PresenceStats) {
    let kept: Vec<InteractionRecord> = pairs
        .iter()
        .filter(|record| universe.contains(&record.phage_id))
        .cloned()
        .collect();
    let stats = PresenceStats {
        contigs_available: universe.len(),
        pairs_in: pairs.len(),
        pairs_kept: kept.len(),
        pairs_removed: pairs.len() - kept.len(),
    };
    info!(
        kept = stats.pairs_kept,
        removed = stats.pairs_removed,
        "filtered pairs by contig presence"
    );
    (kept, stats)
}
