//! Balanced positive/negative sampling.
//!
//! Every random choice comes from one generator, consumed in a fixed order:
//!
//! 1. the host draw (`num_hosts` indices into the sorted host list);
//! 2. then, per drawn host in sorted accession order, the positive draw
//!    followed by that host's negative draws.
//!
//! Identical pairs, configuration and seed therefore always produce the same
//! [`BalancedDataset`].

use std::collections::HashSet;

use clap::ValueEnum;
use rand::rngs::StdRng;
use rand::seq::index;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::domain::{
    AssemblyAccession, BalancedDataset, HostIndex, InteractionRecord, PhageId, PositivePairSet,
};
use crate::error::PrepError;

/// Consecutive rejected draws tolerated for one negative before the host is
/// considered exhausted.
pub const MAX_NEGATIVE_ATTEMPTS: usize = 1000;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum ExhaustionPolicy {
    /// Fail the whole run.
    #[default]
    Abort,
    /// Drop the exhausted host's records and continue.
    SkipHost,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SamplerConfig {
    pub num_hosts: usize,
    pub max_pos_per_host: usize,
    pub neg_per_pos: usize,
    pub seed: u64,
    pub on_exhausted: ExhaustionPolicy,
}

impl Default for SamplerConfig {
    fn default() -> Self {
        Self {
            num_hosts: 200,
            max_pos_per_host: 10,
            neg_per_pos: 1,
            seed: 42,
            on_exhausted: ExhaustionPolicy::Abort,
        }
    }
}

impl SamplerConfig {
    /// File name recording the parameters that generated the dataset.
    pub fn dataset_file_name(&self) -> String {
        format!(
            "balanced_hosts{}_maxpos{}_neg{}_seed{}.csv",
            self.num_hosts, self.max_pos_per_host, self.neg_per_pos, self.seed
        )
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct SampleStats {
    pub available_hosts: usize,
    pub universe_size: usize,
    pub sampled_hosts: usize,
    pub skipped_hosts: usize,
    pub positives: usize,
    pub negatives: usize,
}

#[derive(Debug, Clone)]
pub struct SampleOutcome {
    pub dataset: BalancedDataset,
    /// Drawn hosts in sorted order, including any later skipped.
    pub sampled_hosts: Vec<AssemblyAccession>,
    pub skipped_hosts: Vec<AssemblyAccession>,
    pub stats: SampleStats,
}

impl SampleOutcome {
    /// Drawn hosts that contribute records to the dataset.
    pub fn retained_hosts(&self) -> impl Iterator<Item = &AssemblyAccession> {
        self.sampled_hosts
            .iter()
            .filter(|host| !self.skipped_hosts.contains(*host))
    }
}

/// Owns the seeded generator for one sampling run.
pub struct BalancedSampler {
    config: SamplerConfig,
    rng: StdRng,
}

impl BalancedSampler {
    pub fn new(config: SamplerConfig) -> Self {
        let rng = StdRng::seed_from_u64(config.seed);
        Self { config, rng }
    }

    pub fn config(&self) -> &SamplerConfig {
        &self.config
    }

    /// Samples from `pairs`; negatives come from `universe` when given, else
    /// from every phage observed in `pairs`.
    pub fn run(
        mut self,
        pairs: &PositivePairSet,
        universe: Option<&[PhageId]>,
    ) -> Result<SampleOutcome, PrepError> {
        sample_balanced(pairs, &self.config, universe, &mut self.rng)
    }
}

pub fn sample_balanced<R: Rng + ?Sized>(
    pairs: &PositivePairSet,
    config: &SamplerConfig,
    universe: Option<&[PhageId]>,
    rng: &mut R,
) -> Result<SampleOutcome, PrepError> {
    let host_index = HostIndex::from_pairs(pairs);
    let universe = match universe {
        Some(explicit) => sorted_distinct(explicit),
        None => host_index.universe().to_vec(),
    };

    let hosts: Vec<&AssemblyAccession> = host_index.hosts().collect();
    if config.num_hosts > hosts.len() {
        return Err(PrepError::InsufficientHosts {
            requested: config.num_hosts,
            available: hosts.len(),
        });
    }

    let mut drawn: Vec<&AssemblyAccession> = index::sample(rng, hosts.len(), config.num_hosts)
        .into_iter()
        .map(|idx| hosts[idx])
        .collect();
    drawn.sort();

    let mut dataset = BalancedDataset::default();
    let mut skipped_hosts = Vec::new();
    for host in &drawn {
        let host = *host;
        let positives = host_index
            .positives(host)
            .map(|set| set.iter().collect::<Vec<_>>())
            .unwrap_or_default();
        match sample_host(host, &positives, &universe, config, rng) {
            Ok(block) => dataset.push_host_block(block),
            Err(err @ PrepError::NegativeSamplingExhausted { .. }) => match config.on_exhausted {
                ExhaustionPolicy::Abort => return Err(err),
                ExhaustionPolicy::SkipHost => {
                    warn!(host = %host, "negative sampling exhausted; skipping host");
                    skipped_hosts.push(host.clone());
                }
            },
            Err(err) => return Err(err),
        }
    }

    let stats = SampleStats {
        available_hosts: hosts.len(),
        universe_size: universe.len(),
        sampled_hosts: drawn.len(),
        skipped_hosts: skipped_hosts.len(),
        positives: dataset.positives().count(),
        negatives: dataset.negatives().count(),
    };
    info!(
        hosts = stats.sampled_hosts,
        positives = stats.positives,
        negatives = stats.negatives,
        seed = config.seed,
        "built balanced dataset"
    );

    Ok(SampleOutcome {
        dataset,
        sampled_hosts: drawn.into_iter().cloned().collect(),
        skipped_hosts,
        stats,
    })
}

/// `host_positives` must be sorted; it is the full positive set of the host.
fn sample_host<R: Rng + ?Sized>(
    host: &AssemblyAccession,
    host_positives: &[&PhageId],
    universe: &[PhageId],
    config: &SamplerConfig,
    rng: &mut R,
) -> Result<Vec<InteractionRecord>, PrepError> {
    let take = config.max_pos_per_host.min(host_positives.len());
    let mut picked = index::sample(rng, host_positives.len(), take).into_vec();
    picked.sort_unstable();

    let mut block: Vec<InteractionRecord> = picked
        .iter()
        .map(|&idx| InteractionRecord::positive(host.clone(), host_positives[idx].clone()))
        .collect();

    let excluded: HashSet<&PhageId> = host_positives.iter().copied().collect();
    let mut chosen: HashSet<&PhageId> = HashSet::new();
    let mut negatives = Vec::with_capacity(take * config.neg_per_pos);
    for _ in 0..take * config.neg_per_pos {
        let phage = draw_negative(host, universe, &excluded, &chosen, rng)?;
        chosen.insert(phage);
        negatives.push(InteractionRecord::negative(host.clone(), phage.clone()));
    }
    debug!(host = %host, positives = take, negatives = negatives.len(), "sampled host");

    block.extend(negatives);
    Ok(block)
}

fn draw_negative<'u, R: Rng + ?Sized>(
    host: &AssemblyAccession,
    universe: &'u [PhageId],
    excluded: &HashSet<&PhageId>,
    chosen: &HashSet<&PhageId>,
    rng: &mut R,
) -> Result<&'u PhageId, PrepError> {
    if !universe.is_empty() {
        for _ in 0..MAX_NEGATIVE_ATTEMPTS {
            let candidate = &universe[rng.gen_range(0..universe.len())];
            if !excluded.contains(candidate) && !chosen.contains(candidate) {
                return Ok(candidate);
            }
        }
    }
    Err(PrepError::NegativeSamplingExhausted {
        host: host.to_string(),
        attempts: MAX_NEGATIVE_ATTEMPTS,
    })
}

fn sorted_distinct(items: &[PhageId]) -> Vec<PhageId> {
    let mut items = items.to_vec();
    items.sort();
    items.dedup();
    items
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    fn pairs(items: &[(&str, &str)]) -> PositivePairSet {
        items
            .iter()
            .map(|(host, phage)| (host.parse().unwrap(), phage.parse().unwrap()))
            .collect()
    }

    #[test]
    fn file_name_encodes_config() {
        let config = SamplerConfig::default();
        assert_eq!(
            config.dataset_file_name(),
            "balanced_hosts200_maxpos10_neg1_seed42.csv"
        );
    }

    #[test]
    fn saturated_host_is_exhausted() {
        let input = pairs(&[("GCA_000000001.1", "A"), ("GCA_000000001.1", "B")]);
        let config = SamplerConfig {
            num_hosts: 1,
            max_pos_per_host: 1,
            neg_per_pos: 1,
            seed: 7,
            on_exhausted: ExhaustionPolicy::Abort,
        };
        let err = BalancedSampler::new(config).run(&input, None).unwrap_err();
        assert_matches!(
            err,
            PrepError::NegativeSamplingExhausted { attempts: MAX_NEGATIVE_ATTEMPTS, .. }
        );
    }

    #[test]
    fn skip_host_policy_drops_only_exhausted_host() {
        let input = pairs(&[
            ("GCA_000000001.1", "A"),
            ("GCA_000000001.1", "B"),
            ("GCA_000000002.1", "A"),
        ]);
        let config = SamplerConfig {
            num_hosts: 2,
            max_pos_per_host: 2,
            neg_per_pos: 1,
            seed: 7,
            on_exhausted: ExhaustionPolicy::SkipHost,
        };
        let outcome = BalancedSampler::new(config).run(&input, None).unwrap();
        assert_eq!(outcome.skipped_hosts.len(), 1);
        assert_eq!(outcome.skipped_hosts[0].as_str(), "GCA_000000001.1");
        let retained: Vec<_> = outcome.retained_hosts().map(|host| host.as_str()).collect();
        assert!(!retained.contains(&"GCA_000000001.1"));
        assert_eq!(retained.len(), outcome.sampled_hosts.len() - 1);
        assert_eq!(outcome.stats.positives, 1);
        assert_eq!(outcome.stats.negatives, 1);
        let negative = outcome.dataset.negatives().next().unwrap();
        assert_eq!(negative.phage_id.as_str(), "B");
    }

    #[test]
    fn explicit_universe_supplies_negatives() {
        let input = pairs(&[("GCA_000000001.1", "A")]);
        let universe: Vec<PhageId> = vec!["A".parse().unwrap(), "Z".parse().unwrap()];
        let config = SamplerConfig {
            num_hosts: 1,
            max_pos_per_host: 5,
            neg_per_pos: 1,
            seed: 1,
            on_exhausted: ExhaustionPolicy::Abort,
        };
        let outcome = BalancedSampler::new(config)
            .run(&input, Some(&universe))
            .unwrap();
        let negative = outcome.dataset.negatives().next().unwrap();
        assert_eq!(negative.phage_id.as_str(), "Z");
    }

    #[test]
    fn zero_hosts_yields_empty_dataset() {
        let input = pairs(&[("GCA_000000001.1", "A")]);
        let config = SamplerConfig {
            num_hosts: 0,
            ..SamplerConfig::default()
        };
        let outcome = BalancedSampler::new(config).run(&input, None).unwrap();
        assert!(outcome.dataset.is_empty());
    }
}
