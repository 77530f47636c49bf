//! A reloadable list file: a mix of literal entries and glob patterns, kept
//! in memory and refreshed whenever the backing file's mtime advances.

use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use crate::error::CoreError;

use super::glob::glob_match;

/// Parsed contents of one list file: exact strings go in `literals` for an
/// O(log n) lookup, anything containing glob metacharacters goes in
/// `patterns` for a linear scan.
#[derive(Default)]
pub struct CacheFileContents {
    literals: BTreeSet<String>,
    patterns: Vec<String>,
}

impl CacheFileContents {
    fn parse(text: &str) -> Self {
        let mut literals = BTreeSet::new();
        let mut patterns = Vec::new();
        for line in text.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            if line.contains(['*', '?', '[']) {
                patterns.push(line.to_string());
            } else {
                literals.insert(line.to_string());
            }
        }
        Self { literals, patterns }
    }

    #[must_use]
    pub fn matches(&self, candidate: &str) -> bool {
        if self.literals.contains(candidate) {
            return true;
        }
        self.patterns.iter().any(|p| glob_match(p, candidate))
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.literals.is_empty() && self.patterns.is_empty()
    }
}

/// A `CacheFileContents` paired with the path and mtime it was loaded from,
/// so [`CacheFile::refresh_if_stale`] can cheaply no-op between changes.
pub struct CacheFile {
    path: PathBuf,
    loaded_mtime: Option<SystemTime>,
    contents: CacheFileContents,
}

impl CacheFile {
    #[must_use]
    pub fn unset() -> Self {
        Self { path: PathBuf::new(), loaded_mtime: None, contents: CacheFileContents::default() }
    }

    pub fn load(path: PathBuf) -> Result<Self, CoreError> {
        let mut file = Self { path, loaded_mtime: None, contents: CacheFileContents::default() };
        file.refresh_if_stale()?;
        Ok(file)
    }

    #[must_use]
    pub fn contents(&self) -> &CacheFileContents {
        &self.contents
    }

    /// Reread the file if its mtime has advanced since the last load, or if
    /// it has never been loaded. A missing path (unset filter) is always
    /// considered fresh with empty contents.
    pub fn refresh_if_stale(&mut self) -> Result<bool, CoreError> {
        if self.path.as_os_str().is_empty() {
            return Ok(false);
        }
        let metadata = match fs::metadata(&self.path) {
            Ok(m) => m,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                self.contents = CacheFileContents::default();
                self.loaded_mtime = None;
                return Ok(true);
            }
            Err(e) => {
                return Err(CoreError::ConfigFailure(format!(
                    "stat {}: {e}",
                    self.path.display()
                )))
            }
        };
        let mtime = metadata.modified().ok();
        if mtime == self.loaded_mtime {
            return Ok(false);
        }
        let text = fs::read_to_string(&self.path)
            .map_err(|e| CoreError::ConfigFailure(format!("reading {}: {e}", self.path.display())))?;
        self.contents = CacheFileContents::parse(&text);
        self.loaded_mtime = mtime;
        Ok(true)
    }
}

#[must_use]
pub fn load_optional(path: Option<&Path>) -> Result<CacheFile, CoreError> {
    match path {
        Some(p) => CacheFile::load(p.to_path_buf()),
        None => Ok(CacheFile::unset()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_splits_literals_from_patterns() {
        let contents = CacheFileContents::parse("10.0.0.1\n# comment\n*.bad.example\n\n192.168.*.*\n");
        assert!(contents.matches("10.0.0.1"));
        assert!(contents.matches("crawler.bad.example"));
        assert!(contents.matches("192.168.1.1"));
        assert!(!contents.matches("10.0.0.2"));
    }
}
