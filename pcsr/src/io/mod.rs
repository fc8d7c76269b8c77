//! Edge-list file loaders.
//!
//! Three on-disk formats are accepted:
//! - space-separated text: one `"src dst"` pair per line
//! - comma-separated text: `"src,dst"` per line, detected by a comma probe
//!   on the first line
//! - packed binary (`.elog` suffix): a sequence of `{u32 src; u32 dst}`
//!   records in native endianness, record count = file size / 8

use crate::types::VertexId;
use std::fs::File;
use std::io::{BufRead, BufReader, Read};
use std::path::Path;
use thiserror::Error;

/// Errors on the load path.
#[derive(Error, Debug)]
pub enum LoadError {
    #[error("I/O error reading edge list: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed edge on line {line}: {content:?}")]
    Parse { line: usize, content: String },
}

/// Load an edge list, picking the format from the file itself.
pub fn load_edge_list(path: &Path) -> Result<Vec<(VertexId, VertexId)>, LoadError> {
    if path.extension().is_some_and(|ext| ext == "elog") {
        return load_binary(path);
    }
    load_text(path)
}

fn load_text(path: &Path) -> Result<Vec<(VertexId, VertexId)>, LoadError> {
    let reader = BufReader::new(File::open(path)?);
    let mut edges = Vec::new();
    let mut separator = None;
    for (number, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let sep = *separator.get_or_insert_with(|| if line.contains(',') { ',' } else { ' ' });
        let parse = || -> Option<(u32, u32)> {
            let (src, dest) = line.split_once(sep)?;
            Some((src.trim().parse().ok()?, dest.trim().parse().ok()?))
        };
        let pair = parse().ok_or_else(|| LoadError::Parse {
            line: number + 1,
            content: line.clone(),
        })?;
        edges.push(pair);
    }
    Ok(edges)
}

fn load_binary(path: &Path) -> Result<Vec<(VertexId, VertexId)>, LoadError> {
    let file = File::open(path)?;
    let records = file.metadata()?.len() as usize / 8;
    let mut reader = BufReader::new(file);
    let mut edges = Vec::with_capacity(records);
    let mut record = [0u8; 8];
    for _ in 0..records {
        reader.read_exact(&mut record)?;
        let src = u32::from_ne_bytes([record[0], record[1], record[2], record[3]]);
        let dest = u32::from_ne_bytes([record[4], record[5], record[6], record[7]]);
        edges.push((src, dest));
    }
    Ok(edges)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_space_separated() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "0 1\n2 3\n1 2").unwrap();
        let edges = load_edge_list(file.path()).unwrap();
        assert_eq!(edges, vec![(0, 1), (2, 3), (1, 2)]);
    }

    #[test]
    fn test_comma_separated_detected_on_first_line() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "0,1\n2,3").unwrap();
        let edges = load_edge_list(file.path()).unwrap();
        assert_eq!(edges, vec![(0, 1), (2, 3)]);
    }

    #[test]
    fn test_binary_elog() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("updates.elog");
        let mut file = File::create(&path).unwrap();
        for (src, dest) in [(7u32, 9u32), (1, 4)] {
            file.write_all(&src.to_ne_bytes()).unwrap();
            file.write_all(&dest.to_ne_bytes()).unwrap();
        }
        drop(file);
        let edges = load_edge_list(&path).unwrap();
        assert_eq!(edges, vec![(7, 9), (1, 4)]);
    }

    #[test]
    fn test_malformed_line_is_reported() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "0 1\nnot an edge").unwrap();
        let err = load_edge_list(file.path()).unwrap_err();
        assert!(matches!(err, LoadError::Parse { line: 2, .. }));
    }
}
