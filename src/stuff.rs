//! Ambient O: `elm-stuff/elm-watch/stuff.json`, read and written with the same
//! idiom as the teacher's `SolFilesCache` (`src/cache.rs`): a `_format`-tagged
//! top-level struct, a small JSON-file helper that creates parent directories
//! and writes through a `BufWriter`, `camelCase` serde renaming.
//!
//! Unlike the teacher's cache (a content hash used to skip recompilation),
//! this file exists purely so a target's `compilationMode`/`browserUiPosition`
//! survive a tool restart — there is no dirty-file cache to persist, since the
//! walker (Components B/C) recomputes the import graph from scratch every run.

use std::{
    collections::BTreeMap,
    fs,
    io::{self, BufWriter},
    path::{Path, PathBuf},
};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::{BrowserUiPosition, CompilationMode};

const FORMAT: &str = "elm-watch-stuff-1";

#[derive(Debug, Error)]
pub enum StuffError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to create parent directory of {path}: {source}")]
    CreateParentDir {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TargetStuff {
    pub compilation_mode: CompilationMode,
    #[serde(default)]
    pub browser_ui_position: BrowserUiPosition,
}

impl Default for TargetStuff {
    fn default() -> Self {
        Self { compilation_mode: CompilationMode::Standard, browser_ui_position: BrowserUiPosition::default() }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Stuff {
    #[serde(rename = "_format")]
    pub format: String,
    pub targets: BTreeMap<String, TargetStuff>,
}

impl Default for Stuff {
    fn default() -> Self {
        Self { format: FORMAT.to_string(), targets: BTreeMap::new() }
    }
}

impl Stuff {
    /// Reads `path`, treating a missing file as an empty, freshly-initialized
    /// `Stuff` rather than an error — there is nothing to recover on a clean
    /// checkout or a first run.
    #[instrument(skip_all, fields(path = %path.display()))]
    pub fn read(path: &Path) -> Result<Self, StuffError> {
        match fs::read(path) {
            Ok(bytes) => {
                let stuff = serde_json::from_slice(&bytes)
                    .map_err(|source| StuffError::Parse { path: path.to_path_buf(), source })?;
                trace!("read persisted state");
                Ok(stuff)
            }
            Err(source) if source.kind() == io::ErrorKind::NotFound => Ok(Self::default()),
            Err(source) => Err(StuffError::Read { path: path.to_path_buf(), source }),
        }
    }

    #[instrument(skip_all, fields(path = %path.display()))]
    pub fn write(&self, path: &Path) -> Result<(), StuffError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .map_err(|source| StuffError::CreateParentDir { path: parent.to_path_buf(), source })?;
        }
        let file =
            fs::File::create(path).map_err(|source| StuffError::Write { path: path.to_path_buf(), source })?;
        let mut writer = BufWriter::new(file);
        serde_json::to_writer_pretty(&mut writer, self)
            .map_err(|source| StuffError::Write { path: path.to_path_buf(), source: source.into() })?;
        trace!(targets = self.targets.len(), "wrote persisted state");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_reads_as_an_empty_default() {
        let dir = tempfile::tempdir().unwrap();
        let stuff = Stuff::read(&dir.path().join("elm-stuff/elm-watch/stuff.json")).unwrap();
        assert!(stuff.targets.is_empty());
        assert_eq!(stuff.format, FORMAT);
    }

    #[test]
    fn round_trips_through_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("elm-stuff/elm-watch/stuff.json");

        let mut stuff = Stuff::default();
        stuff.targets.insert(
            "Main".to_string(),
            TargetStuff { compilation_mode: CompilationMode::Optimize, browser_ui_position: BrowserUiPosition::TopRight },
        );
        stuff.write(&path).unwrap();

        let reread = Stuff::read(&path).unwrap();
        assert_eq!(reread.targets["Main"].compilation_mode, CompilationMode::Optimize);
        assert_eq!(reread.targets["Main"].browser_ui_position, BrowserUiPosition::TopRight);
    }

    #[test]
    fn malformed_file_is_a_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stuff.json");
        fs::write(&path, b"not json").unwrap();
        assert!(matches!(Stuff::read(&path), Err(StuffError::Parse { .. })));
    }
}
