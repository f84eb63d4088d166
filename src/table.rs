//! Header-indexed reading of delimited text tables and writing of interaction
//! records.
//!
//! A table is validated once against the columns a stage needs
//! ([`TableReader::require`]); downstream code only sees column indices and
//! typed records.

use std::io::{BufRead, Lines};
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::domain::{AssemblyAccession, InteractionRecord, PhageId, PositivePairSet};
use crate::error::PrepError;
use crate::fs_util;

/// A logical column and the header names accepted for it, in preference order.
#[derive(Debug, Clone, Copy)]
pub struct Column {
    pub name: &'static str,
    pub aliases: &'static [&'static str],
}

pub const HOST_ACCESSION: Column = Column {
    name: "host_accession",
    aliases: &["host_accession", "sample"],
};

pub const PHAGE_ID: Column = Column {
    name: "phage_id",
    aliases: &["phage_id", "phage_contig", "contig"],
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delimiter {
    Tab,
    Comma,
}

impl Delimiter {
    /// `.csv` (optionally gzipped) is comma-separated, anything else tab-separated.
    pub fn for_path(path: &Path) -> Self {
        let name = path
            .file_name()
            .map(|name| name.to_string_lossy().to_ascii_lowercase())
            .unwrap_or_default();
        let name = name.strip_suffix(".gz").unwrap_or(&name);
        if name.ends_with(".csv") {
            Delimiter::Comma
        } else {
            Delimiter::Tab
        }
    }

    fn as_char(self) -> char {
        match self {
            Delimiter::Tab => '\t',
            Delimiter::Comma => ',',
        }
    }
}

#[derive(Debug, Clone)]
pub struct Row {
    pub line: usize,
    fields: Vec<String>,
}

impl Row {
    /// Field at `index`, or `""` for short rows.
    pub fn get(&self, index: usize) -> &str {
        self.fields.get(index).map(String::as_str).unwrap_or("")
    }

    pub fn first(&self) -> &str {
        self.get(0)
    }
}

pub struct TableReader {
    path: PathBuf,
    delimiter: Delimiter,
    columns: Vec<String>,
    lines: Lines<Box<dyn BufRead>>,
    line: usize,
}

impl std::fmt::Debug for TableReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TableReader")
            .field("path", &self.path)
            .field("delimiter", &self.delimiter)
            .field("columns", &self.columns)
            .field("line", &self.line)
            .finish_non_exhaustive()
    }
}

impl TableReader {
    pub fn open(path: &Path) -> Result<Self, PrepError> {
        Self::open_with(path, Delimiter::for_path(path))
    }

    pub fn open_with(path: &Path, delimiter: Delimiter) -> Result<Self, PrepError> {
        let mut lines = fs_util::open_text(path)?.lines();
        let mut line = 0;
        let header = loop {
            line += 1;
            match lines.next() {
                Some(Ok(text)) if text.trim().is_empty() => continue,
                Some(Ok(text)) => break text,
                Some(Err(err)) => {
                    return Err(PrepError::Filesystem(format!(
                        "read {}: {err}",
                        path.display()
                    )));
                }
                None => return Err(PrepError::EmptyInput(path.to_path_buf())),
            }
        };
        let columns = split_fields(&header, delimiter);
        debug!(path = %path.display(), columns = columns.len(), "opened table");
        Ok(Self {
            path: path.to_path_buf(),
            delimiter,
            columns,
            lines,
            line,
        })
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn find(&self, column: &Column) -> Option<usize> {
        column
            .aliases
            .iter()
            .find_map(|alias| self.columns.iter().position(|name| name == alias))
    }

    pub fn require(&self, column: &Column) -> Result<usize, PrepError> {
        self.find(column).ok_or_else(|| PrepError::MissingField {
            column: column.name.to_string(),
            path: self.path.clone(),
            found: self.columns.join(", "),
        })
    }

    /// Indices of every header present in `names`, in header order.
    pub fn find_all(&self, names: &[&str]) -> Vec<usize> {
        self.columns
            .iter()
            .enumerate()
            .filter(|(_, name)| names.contains(&name.as_str()))
            .map(|(index, _)| index)
            .collect()
    }
}

impl Iterator for TableReader {
    type Item = Result<Row, PrepError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            self.line += 1;
            let text = match self.lines.next()? {
                Ok(text) => text,
                Err(err) => {
                    return Some(Err(PrepError::Filesystem(format!(
                        "read {} line {}: {err}",
                        self.path.display(),
                        self.line
                    ))));
                }
            };
            if text.trim().is_empty() {
                continue;
            }
            return Some(Ok(Row {
                line: self.line,
                fields: split_fields(&text, self.delimiter),
            }));
        }
    }
}

fn split_fields(line: &str, delimiter: Delimiter) -> Vec<String> {
    line.trim_end_matches(['\r', '\n'])
        .split(delimiter.as_char())
        .map(|field| {
            let field = field.trim();
            field
                .strip_prefix('"')
                .and_then(|inner| inner.strip_suffix('"'))
                .unwrap_or(field)
                .to_string()
        })
        .collect()
}

#[derive(Debug, Clone, Default)]
pub struct PairsLoad {
    pub pairs: PositivePairSet,
    pub rows: usize,
    pub malformed_accessions: usize,
    pub invalid_phage_ids: usize,
    pub duplicates: usize,
}

/// Loads a positive pairs table (`host_accession`, `phage_id`[, `label`]).
/// Any label column is ignored: every row of this file is a positive.
pub fn read_pairs(path: &Path) -> Result<PairsLoad, PrepError> {
    let reader = TableReader::open(path)?;
    let host_idx = reader.require(&HOST_ACCESSION)?;
    let phage_idx = reader.require(&PHAGE_ID)?;

    let mut load = PairsLoad::default();
    for row in reader {
        let row = row?;
        load.rows += 1;
        let Some(host) = AssemblyAccession::find_in(row.get(host_idx)) else {
            debug!(line = row.line, value = row.get(host_idx), "skipping malformed accession");
            load.malformed_accessions += 1;
            continue;
        };
        let Ok(phage) = row.get(phage_idx).parse::<PhageId>() else {
            load.invalid_phage_ids += 1;
            continue;
        };
        if !load.pairs.insert(host, phage) {
            load.duplicates += 1;
        }
    }
    Ok(load)
}

/// Writes records as `host_accession\tphage_id\tlabel`.
pub fn write_pairs_tsv<'a, I>(path: &Path, records: I) -> Result<(), PrepError>
where
    I: IntoIterator<Item = &'a InteractionRecord>,
{
    write_records(path, records, '\t')
}

/// Writes records as `host_accession,phage_id,label`.
pub fn write_dataset_csv<'a, I>(path: &Path, records: I) -> Result<(), PrepError>
where
    I: IntoIterator<Item = &'a InteractionRecord>,
{
    write_records(path, records, ',')
}

fn write_records<'a, I>(path: &Path, records: I, sep: char) -> Result<(), PrepError>
where
    I: IntoIterator<Item = &'a InteractionRecord>,
{
    fs_util::write_atomic(path, |out| {
        writeln!(out, "host_accession{sep}phage_id{sep}label")?;
        for record in records {
            writeln!(
                out,
                "{}{sep}{}{sep}{}",
                record.host_accession, record.phage_id, record.label
            )?;
        }
        Ok(())
    })
}
