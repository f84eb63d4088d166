use std::path::Path;

use camino::Utf8PathBuf;
use serde::Serialize;
use tracing::info;

use crate::config::{ResolvedConfig, SampleOverrides};
use crate::contigs::{self, PhageUniverse, PresenceStats, UniverseSource};
use crate::error::PrepError;
use crate::extract::{self, ExtractionStats};
use crate::fs_util;
use crate::mapper::{self, MappedStrain, MappingStats, ReferenceLoadStats, StrainReference};
use crate::sampler::{BalancedSampler, SampleStats, SamplerConfig};
use crate::table;

#[derive(Debug, Clone)]
pub struct ProgressEvent {
    pub message: String,
}

pub trait ProgressSink {
    fn event(&self, event: ProgressEvent);
}

/// Forwards stage progress to `tracing`.
pub struct LogSink;

impl ProgressSink for LogSink {
    fn event(&self, event: ProgressEvent) {
        info!("{}", event.message);
    }
}

fn emit(sink: &dyn ProgressSink, message: impl Into<String>) {
    sink.event(ProgressEvent {
        message: message.into(),
    });
}

#[derive(Debug, Clone)]
pub struct ExtractRequest<'a> {
    pub annotations: &'a Path,
    /// Overrides the configured species when set.
    pub species: Option<&'a str>,
    pub out_pairs: &'a Path,
    pub out_hosts: &'a Path,
}

#[derive(Debug, Clone, Serialize)]
pub struct ExtractResult {
    pub species: Option<String>,
    pub stats: ExtractionStats,
    pub pairs_path: String,
    pub hosts_path: String,
}

#[derive(Debug, Clone)]
pub struct FilterRequest<'a> {
    pub pairs: &'a Path,
    pub universe: UniverseSource<'a>,
    pub out: &'a Path,
    pub out_contigs: Option<&'a Path>,
}

#[derive(Debug, Clone, Serialize)]
pub struct FilterResult {
    pub stats: PresenceStats,
    pub pairs_path: String,
    pub contigs_path: Option<String>,
}

#[derive(Debug, Clone)]
pub struct SampleRequest<'a> {
    pub pairs: &'a Path,
    pub out_dir: &'a Path,
    pub overrides: SampleOverrides,
    pub universe: Option<&'a Path>,
    pub out_hosts: Option<&'a Path>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SampleResult {
    pub config: SamplerConfig,
    pub stats: SampleStats,
    pub input_pairs: usize,
    pub dropped_outside_universe: usize,
    pub skipped_hosts: Vec<String>,
    pub dataset_path: String,
    pub hosts_path: Option<String>,
}

#[derive(Debug, Clone)]
pub enum StrainSource<'a> {
    List(&'a Path),
    Matrix(&'a Path),
}

#[derive(Debug, Clone)]
pub struct MapRequest<'a> {
    pub strains: StrainSource<'a>,
    pub reference: &'a Path,
    pub out_map: &'a Path,
    pub out_accessions: &'a Path,
    pub out_unmatched: Option<&'a Path>,
    /// Per-strain match report: `strain_name\taccession\tmatch_kind\treference_name`.
    pub out_details: Option<&'a Path>,
}

#[derive(Debug, Clone, Serialize)]
pub struct MapResult {
    pub reference: ReferenceLoadStats,
    pub stats: MappingStats,
    pub matches: Vec<MappedStrain>,
    pub unmatched: Vec<String>,
    pub map_path: String,
    pub accessions_path: String,
    pub unmatched_path: Option<String>,
    pub details_path: Option<String>,
}

/// Sidecar describing how a data file was produced; kept out of the data file
/// so the latter stays byte-identical across reruns.
#[derive(Debug, Clone, Serialize)]
pub struct Provenance {
    pub stage: String,
    pub tool: String,
    pub generated_at: String,
    pub inputs: Vec<String>,
    pub parameters: serde_json::Value,
    pub rows: usize,
}

pub struct App {
    config: ResolvedConfig,
}

impl App {
    pub fn new(config: ResolvedConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ResolvedConfig {
        &self.config
    }

    pub fn extract(
        &self,
        request: ExtractRequest<'_>,
        sink: &dyn ProgressSink,
    ) -> Result<ExtractResult, PrepError> {
        let species = request
            .species
            .map(str::to_string)
            .or_else(|| self.config.species.clone());
        emit(
            sink,
            format!(
                "phase=Extract; reading {} (species: {})",
                request.annotations.display(),
                species.as_deref().unwrap_or("any")
            ),
        );
        let extraction = extract::extract_pairs(request.annotations, species.as_deref())?;

        emit(sink, "phase=Write; positive pairs and host list");
        table::write_pairs_tsv(request.out_pairs, extraction.pairs.iter())?;
        fs_util::write_lines(
            request.out_hosts,
            extraction.hosts.iter().map(|host| host.as_str()),
        )?;
        write_provenance(
            request.out_pairs,
            "extract",
            &[request.annotations],
            serde_json::json!({ "species": species }),
            extraction.stats.pairs,
        )?;

        Ok(ExtractResult {
            species,
            stats: extraction.stats,
            pairs_path: request.out_pairs.display().to_string(),
            hosts_path: request.out_hosts.display().to_string(),
        })
    }

    pub fn filter(
        &self,
        request: FilterRequest<'_>,
        sink: &dyn ProgressSink,
    ) -> Result<FilterResult, PrepError> {
        emit(sink, "phase=Resolve; loading phage universe");
        let universe = PhageUniverse::load(&request.universe)?;
        let universe_path = match request.universe {
            UniverseSource::ContigList(path) | UniverseSource::Fasta(path) => path,
        };

        emit(
            sink,
            format!("phase=Filter; reading {}", request.pairs.display()),
        );
        let load = table::read_pairs(request.pairs)?;
        let (kept, stats) = contigs::filter_by_presence(&load.pairs, &universe);

        emit(sink, "phase=Write; filtered pairs");
        table::write_pairs_tsv(request.out, &kept)?;
        if let Some(out_contigs) = request.out_contigs {
            fs_util::write_lines(
                out_contigs,
                universe.sorted().iter().map(|contig| contig.as_str()),
            )?;
        }
        write_provenance(
            request.out,
            "filter",
            &[request.pairs, universe_path],
            serde_json::json!({ "contigs_available": stats.contigs_available }),
            stats.pairs_kept,
        )?;

        Ok(FilterResult {
            stats,
            pairs_path: request.out.display().to_string(),
            contigs_path: request.out_contigs.map(|path| path.display().to_string()),
        })
    }

    pub fn sample(
        &self,
        request: SampleRequest<'_>,
        sink: &dyn ProgressSink,
    ) -> Result<SampleResult, PrepError> {
        let config = self.config.sampler_with(&request.overrides);
        emit(
            sink,
            format!("phase=Resolve; reading {}", request.pairs.display()),
        );
        let mut pairs = table::read_pairs(request.pairs)?.pairs;
        let input_pairs = pairs.len();

        let mut inputs = vec![request.pairs];
        let mut dropped_outside_universe = 0;
        let universe = match request.universe {
            Some(path) => {
                inputs.push(path);
                let universe = PhageUniverse::load(&UniverseSource::for_path(path))?;
                dropped_outside_universe = pairs.retain_phages(universe.as_set());
                Some(universe.sorted())
            }
            None => None,
        };

        emit(
            sink,
            format!(
                "phase=Sample; hosts={} max_pos_per_host={} neg_per_pos={} seed={}",
                config.num_hosts, config.max_pos_per_host, config.neg_per_pos, config.seed
            ),
        );
        let outcome = BalancedSampler::new(config.clone()).run(&pairs, universe.as_deref())?;

        let out_path = dataset_path(request.out_dir, &config)?;
        emit(sink, format!("phase=Write; {out_path}"));
        table::write_dataset_csv(out_path.as_std_path(), outcome.dataset.records())?;
        if let Some(out_hosts) = request.out_hosts {
            fs_util::write_lines(
                out_hosts,
                outcome.retained_hosts().map(|host| host.as_str()),
            )?;
        }
        write_provenance(
            out_path.as_std_path(),
            "sample",
            &inputs,
            serde_json::to_value(&config).map_err(|err| PrepError::Filesystem(err.to_string()))?,
            outcome.dataset.len(),
        )?;

        Ok(SampleResult {
            config,
            stats: outcome.stats,
            input_pairs,
            dropped_outside_universe,
            skipped_hosts: outcome
                .skipped_hosts
                .iter()
                .map(|host| host.to_string())
                .collect(),
            dataset_path: out_path.to_string(),
            hosts_path: request.out_hosts.map(|path| path.display().to_string()),
        })
    }

    pub fn map(
        &self,
        request: MapRequest<'_>,
        sink: &dyn ProgressSink,
    ) -> Result<MapResult, PrepError> {
        let (strains, strains_path) = match request.strains {
            StrainSource::List(path) => (fs_util::read_list(path)?, path),
            StrainSource::Matrix(path) => (mapper::read_matrix_strains(path)?, path),
        };
        emit(
            sink,
            format!(
                "phase=Resolve; {} strain names, reference {}",
                strains.len(),
                request.reference.display()
            ),
        );
        let (reference, reference_stats) = StrainReference::load(request.reference)?;

        emit(sink, "phase=Map; matching strain names");
        let outcome = mapper::map_strains(&strains, &reference);

        emit(sink, "phase=Write; strain map and accession list");
        fs_util::write_atomic(request.out_map, |out| {
            writeln!(out, "strain_name\taccession")?;
            for (strain, accession) in outcome.map.iter() {
                writeln!(out, "{strain}\t{accession}")?;
            }
            Ok(())
        })?;
        fs_util::write_lines(
            request.out_accessions,
            outcome
                .map
                .accessions()
                .into_iter()
                .map(|accession| accession.as_str()),
        )?;
        if let Some(out_unmatched) = request.out_unmatched {
            fs_util::write_lines(out_unmatched, &outcome.unmatched)?;
        }
        if let Some(out_details) = request.out_details {
            fs_util::write_atomic(out_details, |out| {
                writeln!(out, "strain_name\taccession\tmatch_kind\treference_name")?;
                for mapped in &outcome.matches {
                    writeln!(
                        out,
                        "{}\t{}\t{}\t{}",
                        mapped.strain,
                        mapped.found.accession,
                        mapped.found.kind,
                        mapped.found.reference_name
                    )?;
                }
                Ok(())
            })?;
        }
        write_provenance(
            request.out_map,
            "map",
            &[strains_path, request.reference],
            serde_json::json!({
                "reference_entries": reference.len(),
                "exact": outcome.stats.exact,
                "alias": outcome.stats.alias,
                "token": outcome.stats.token,
                "unmatched": outcome.stats.unmatched,
            }),
            outcome.map.len(),
        )?;

        Ok(MapResult {
            reference: reference_stats,
            stats: outcome.stats,
            matches: outcome.matches,
            unmatched: outcome.unmatched,
            map_path: request.out_map.display().to_string(),
            accessions_path: request.out_accessions.display().to_string(),
            unmatched_path: request
                .out_unmatched
                .map(|path| path.display().to_string()),
            details_path: request.out_details.map(|path| path.display().to_string()),
        })
    }
}

/// `<out_dir>/balanced_hosts{H}_maxpos{P}_neg{N}_seed{S}.csv`
pub fn dataset_path(out_dir: &Path, config: &SamplerConfig) -> Result<Utf8PathBuf, PrepError> {
    let dir = Utf8PathBuf::from_path_buf(out_dir.to_path_buf())
        .map_err(|_| PrepError::Filesystem("non-utf8 output directory".to_string()))?;
    Ok(dir.join(config.dataset_file_name()))
}

pub fn provenance_path(data_path: &Path) -> Result<Utf8PathBuf, PrepError> {
    let path = Utf8PathBuf::from_path_buf(data_path.to_path_buf())
        .map_err(|_| PrepError::Filesystem("non-utf8 output path".to_string()))?;
    Ok(Utf8PathBuf::from(format!("{path}.provenance.json")))
}

fn write_provenance(
    data_path: &Path,
    stage: &str,
    inputs: &[&Path],
    parameters: serde_json::Value,
    rows: usize,
) -> Result<(), PrepError> {
    let provenance = Provenance {
        stage: stage.to_string(),
        tool: format!("phprep/{}", env!("CARGO_PKG_VERSION")),
        generated_at: chrono::Utc::now().to_rfc3339(),
        inputs: inputs
            .iter()
            .map(|path| path.display().to_string())
            .collect(),
        parameters,
        rows,
    };
    let content = serde_json::to_vec_pretty(&provenance)
        .map_err(|err| PrepError::Filesystem(err.to_string()))?;
    let path = provenance_path(data_path)?;
    fs_util::write_atomic(path.as_std_path(), |out| {
        out.write_all(&content)?;
        out.write_all(b"\n")
    })
}
