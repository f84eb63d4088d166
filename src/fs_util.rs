use std::fs::{self, File};
use std::io::{self, BufRead, BufReader, BufWriter, Read, Write};
use std::path::Path;

use flate2::read::MultiGzDecoder;
use tempfile::Builder;

use crate::error::PrepError;

/// Opens a text file for line reading, transparently decompressing `.gz` input.
pub fn open_text(path: &Path) -> Result<Box<dyn BufRead>, PrepError> {
    let file = File::open(path)
        .map_err(|err| PrepError::Filesystem(format!("open {}: {err}", path.display())))?;
    let is_gzip = path
        .extension()
        .map(|ext| ext.eq_ignore_ascii_case("gz"))
        .unwrap_or(false);
    let reader: Box<dyn Read> = if is_gzip {
        Box::new(MultiGzDecoder::new(file))
    } else {
        Box::new(file)
    };
    Ok(Box::new(BufReader::new(reader)))
}

/// Reads non-empty trimmed lines, e.g. an accession or contig list.
pub fn read_list(path: &Path) -> Result<Vec<String>, PrepError> {
    let reader = open_text(path)?;
    let mut items = Vec::new();
    for line in reader.lines() {
        let line =
            line.map_err(|err| PrepError::Filesystem(format!("read {}: {err}", path.display())))?;
        let trimmed = line.trim();
        if !trimmed.is_empty() {
            items.push(trimmed.to_string());
        }
    }
    Ok(items)
}

/// Writes `path` through a temp file in the same directory, renamed into place
/// only after `write` succeeds.
pub fn write_atomic<F>(path: &Path, write: F) -> Result<(), PrepError>
where
    F: FnOnce(&mut dyn Write) -> io::Result<()>,
{
    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    fs::create_dir_all(parent).map_err(|err| PrepError::Filesystem(err.to_string()))?;
    let temp = Builder::new()
        .prefix(".phprep-out")
        .tempfile_in(parent)
        .map_err(|err| PrepError::Filesystem(err.to_string()))?;
    {
        let mut writer = BufWriter::new(temp.as_file());
        write(&mut writer)
            .and_then(|_| writer.flush())
            .map_err(|err| PrepError::Filesystem(format!("write {}: {err}", path.display())))?;
    }
    temp.persist(path)
        .map_err(|err| PrepError::Filesystem(format!("persist {}: {err}", path.display())))?;
    Ok(())
}

pub fn write_lines<I, S>(path: &Path, lines: I) -> Result<(), PrepError>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    write_atomic(path, |out| {
        for line in lines {
            out.write_all(line.as_ref().as_bytes())?;
            out.write_all(b"\n")?;
        }
        Ok(())
    })
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use flate2::Compression;
    use flate2::write::GzEncoder;

    use super::*;

    #[test]
    fn read_list_skips_blank_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("contigs.txt");
        fs::write(&path, "NAFV01000136.1\n\n  NAFV01000137.1  \n").unwrap();
        let items = read_list(&path).unwrap();
        assert_eq!(items, vec!["NAFV01000136.1", "NAFV01000137.1"]);
    }

    #[test]
    fn open_text_reads_gzip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("contigs.txt.gz");
        let mut encoder = GzEncoder::new(File::create(&path).unwrap(), Compression::default());
        encoder.write_all(b"A.1\nB.1\n").unwrap();
        encoder.finish().unwrap();
        assert_eq!(read_list(&path).unwrap(), vec!["A.1", "B.1"]);
    }

    #[test]
    fn failed_write_leaves_no_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.tsv");
        let result = write_atomic(&path, |out| {
            out.write_all(b"partial")?;
            Err(io::Error::other("boom"))
        });
        assert!(result.is_err());
        assert!(!path.exists());
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);
    }
}
