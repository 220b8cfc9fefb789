//! FreeSurfer `.label` files
//!
//! Text format: a `#!ascii` comment line, a vertex count line, then one
//! row per vertex: `index x y z stat`. Only the vertex indices matter for
//! ROI selection; coordinates are taken from the surface the label is
//! defined on.

use std::path::Path;

use crate::error::{ExtractError, Result};

/// Read the vertex indices of a surface label.
pub fn read_label(path: &Path) -> Result<Vec<usize>> {
    let text = std::fs::read_to_string(path).map_err(|e| ExtractError::io(path, e))?;
    let mut lines = text.lines().filter(|l| !l.trim().is_empty());

    // Comment line is optional in practice; tolerate its absence
    let first = lines
        .next()
        .ok_or_else(|| ExtractError::parse(path, "empty label file"))?;
    let count_line = if first.trim_start().starts_with('#') {
        lines
            .next()
            .ok_or_else(|| ExtractError::parse(path, "label file has no count line"))?
    } else {
        first
    };

    let count: usize = count_line
        .trim()
        .parse()
        .map_err(|_| ExtractError::parse(path, format!("bad vertex count line: '{}'", count_line.trim())))?;

    let mut indices = Vec::with_capacity(count);
    for line in lines {
        let mut tokens = line.split_whitespace();
        let idx: usize = match tokens.next() {
            Some(t) => t
                .parse()
                .map_err(|_| ExtractError::parse(path, format!("bad vertex index: '{}'", t)))?,
            None => continue,
        };
        indices.push(idx);
    }

    if indices.len() != count {
        return Err(ExtractError::parse(
            path,
            format!("label declares {} vertices but lists {}", count, indices.len()),
        ));
    }
    Ok(indices)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_tmp(name: &str, content: &str) -> std::path::PathBuf {
        let dir = std::env::temp_dir().join(format!("fsub_label_{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        std::fs::write(&path, content).unwrap();
        path
    }

    #[test]
    fn test_reads_indices() {
        let path = write_tmp(
            "roi.label",
            "#!ascii label, from subject sub-01\n3\n10 1.0 2.0 3.0 0.0\n11 1.5 2.5 3.5 0.0\n42 0.0 0.0 0.0 1.0\n",
        );
        assert_eq!(read_label(&path).unwrap(), vec![10, 11, 42]);
    }

    #[test]
    fn test_count_mismatch_rejected() {
        let path = write_tmp("short.label", "#!ascii label\n5\n1 0 0 0 0\n2 0 0 0 0\n");
        assert!(read_label(&path).is_err());
    }

    #[test]
    fn test_missing_file() {
        assert!(matches!(
            read_label(Path::new("/nonexistent/roi.label")),
            Err(ExtractError::Io { .. })
        ));
    }
}
