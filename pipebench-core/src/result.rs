use std::io::Write as _;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// The record a run leaves behind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BenchResult {
    pub pass: bool,
    pub score: i64,
    pub messages: Vec<String>,
    pub language: String,
}

impl BenchResult {
    pub fn new(pass: bool, score: u64, messages: Vec<String>, language: &str) -> Self {
        Self {
            pass,
            score: i64::try_from(score).unwrap_or(i64::MAX),
            messages,
            language: language.to_string(),
        }
    }

    pub fn failed(messages: Vec<String>, language: &str) -> Self {
        Self::new(false, 0, messages, language)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Writes the record next to `path` and renames it into place, so a
    /// reader never sees a partial file.
    pub fn write_atomic(&self, path: &Path) -> Result<()> {
        let json = self.to_json()?;
        let dir = match path.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => dir,
            _ => Path::new("."),
        };
        let write_err = |source| Error::ResultWrite {
            path: path.to_path_buf(),
            source,
        };

        let mut tmp = tempfile::NamedTempFile::new_in(dir).map_err(write_err)?;
        tmp.write_all(json.as_bytes()).map_err(write_err)?;
        tmp.write_all(b"\n").map_err(write_err)?;
        tmp.as_file().sync_all().map_err(write_err)?;
        tmp.persist(path).map_err(|e| write_err(e.error))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serializes_the_four_fields() {
        let result = BenchResult::new(true, 1234, vec!["score: 1234".to_string()], "rust");
        let json = result.to_json().unwrap_or_else(|e| panic!("{e}"));
        assert_eq!(
            json,
            r#"{"pass":true,"score":1234,"messages":["score: 1234"],"language":"rust"}"#
        );
    }

    #[test]
    fn oversized_scores_saturate() {
        let result = BenchResult::new(true, u64::MAX, Vec::new(), "");
        assert_eq!(result.score, i64::MAX);
    }

    #[test]
    fn write_atomic_replaces_the_file() {
        let dir = tempfile::tempdir().unwrap_or_else(|e| panic!("{e}"));
        let path = dir.path().join("result.json");
        std::fs::write(&path, "stale").unwrap_or_else(|e| panic!("{e}"));

        let result = BenchResult::failed(vec!["pretest failed".to_string()], "go");
        result
            .write_atomic(&path)
            .unwrap_or_else(|e| panic!("write: {e}"));

        let raw = std::fs::read_to_string(&path).unwrap_or_else(|e| panic!("{e}"));
        let back: BenchResult = serde_json::from_str(&raw).unwrap_or_else(|e| panic!("{e}"));
        assert_eq!(back, result);
        assert_eq!(std::fs::read_dir(dir.path()).map(|d| d.count()).unwrap_or(0), 1);
    }

    #[test]
    fn write_into_missing_directory_fails() {
        let dir = tempfile::tempdir().unwrap_or_else(|e| panic!("{e}"));
        let path = dir.path().join("missing").join("result.json");
        let err = BenchResult::failed(Vec::new(), "go").write_atomic(&path);
        assert!(matches!(err, Err(Error::ResultWrite { .. })));
    }
}
