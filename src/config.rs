use std::fs;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::PrepError;
use crate::sampler::{ExhaustionPolicy, SamplerConfig};

pub const DEFAULT_CONFIG_FILE: &str = "phprep.json";

#[derive(Debug, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(default)]
    pub schema_version: Option<u32>,
    #[serde(default)]
    pub extract: ExtractSection,
    #[serde(default)]
    pub sample: SampleSection,
}

#[derive(Debug, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ExtractSection {
    #[serde(default)]
    pub species: Option<String>,
}

#[derive(Debug, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct SampleSection {
    #[serde(default)]
    pub num_hosts: Option<usize>,
    #[serde(default)]
    pub max_pos_per_host: Option<usize>,
    #[serde(default)]
    pub neg_per_pos: Option<usize>,
    #[serde(default)]
    pub seed: Option<u64>,
    #[serde(default)]
    pub on_exhausted: Option<ExhaustionPolicy>,
}

/// Command-line values that take precedence over the config file.
#[derive(Debug, Clone, Default)]
pub struct SampleOverrides {
    pub num_hosts: Option<usize>,
    pub max_pos_per_host: Option<usize>,
    pub neg_per_pos: Option<usize>,
    pub seed: Option<u64>,
    pub on_exhausted: Option<ExhaustionPolicy>,
}

#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub schema_version: u32,
    pub species: Option<String>,
    pub sampler: SamplerConfig,
}

impl ResolvedConfig {
    pub fn sampler_with(&self, overrides: &SampleOverrides) -> SamplerConfig {
        SamplerConfig {
            num_hosts: overrides.num_hosts.unwrap_or(self.sampler.num_hosts),
            max_pos_per_host: overrides
                .max_pos_per_host
                .unwrap_or(self.sampler.max_pos_per_host),
            neg_per_pos: overrides.neg_per_pos.unwrap_or(self.sampler.neg_per_pos),
            seed: overrides.seed.unwrap_or(self.sampler.seed),
            on_exhausted: overrides.on_exhausted.unwrap_or(self.sampler.on_exhausted),
        }
    }
}

pub struct ConfigLoader;

impl ConfigLoader {
    /// Loads `path`, or `phprep.json` from the working directory when present.
    /// Without either, built-in defaults apply.
    pub fn resolve(path: Option<&str>) -> Result<ResolvedConfig, PrepError> {
        let config_path = match path {
            Some(path) => PathBuf::from(path),
            None => PathBuf::from(DEFAULT_CONFIG_FILE),
        };

        if path.is_none() && !config_path.exists() {
            return Self::resolve_config(Config::default());
        }

        let content = fs::read_to_string(&config_path)
            .map_err(|_| PrepError::ConfigRead(config_path.clone()))?;
        let config: Config = serde_json::from_str(&content)
            .map_err(|err| PrepError::ConfigParse(err.to_string()))?;

        Self::resolve_config(config)
    }

    pub fn resolve_config(config: Config) -> Result<ResolvedConfig, PrepError> {
        let schema_version = config.schema_version.unwrap_or(1);
        if schema_version != 1 {
            return Err(PrepError::InvalidConfig(format!(
                "unsupported schema_version {schema_version}"
            )));
        }

        let species = match config.extract.species {
            Some(value) if value.trim().is_empty() => {
                return Err(PrepError::InvalidConfig(
                    "extract.species must not be empty".to_string(),
                ));
            }
            other => other,
        };

        let defaults = SamplerConfig::default();
        let sample = config.sample;
        let sampler = SamplerConfig {
            num_hosts: sample.num_hosts.unwrap_or(defaults.num_hosts),
            max_pos_per_host: sample.max_pos_per_host.unwrap_or(defaults.max_pos_per_host),
            neg_per_pos: sample.neg_per_pos.unwrap_or(defaults.neg_per_pos),
            seed: sample.seed.unwrap_or(defaults.seed),
            on_exhausted: sample.on_exhausted.unwrap_or(defaults.on_exhausted),
        };

        Ok(ResolvedConfig {
            schema_version,
            species,
            sampler,
        })
    }
}
