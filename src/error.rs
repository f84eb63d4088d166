use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum PrepError {
    #[error("missing required column `{column}` in {path}; found columns: {found}")]
    #[diagnostic(help("column names are matched after trimming surrounding whitespace"))]
    MissingField {
        column: String,
        path: PathBuf,
        found: String,
    },

    #[error("malformed assembly accession: {0}")]
    MalformedAccession(String),

    #[error("invalid phage identifier: {0:?}")]
    InvalidPhageId(String),

    #[error("requested {requested} hosts but only {available} distinct hosts are available")]
    InsufficientHosts { requested: usize, available: usize },

    #[error(
        "negative sampling exhausted for host {host} after {attempts} attempts; \
         the host is positive for nearly the whole phage universe"
    )]
    #[diagnostic(help("rerun with --on-exhausted skip-host to drop such hosts"))]
    NegativeSamplingExhausted { host: String, attempts: usize },

    #[error("input file is empty: {0}")]
    EmptyInput(PathBuf),

    #[error("failed to read config file at {0}")]
    ConfigRead(PathBuf),

    #[error("failed to parse JSON config: {0}")]
    ConfigParse(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("filesystem error: {0}")]
    Filesystem(String),
}
