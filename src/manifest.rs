//! Component D: project manifest (this tool's own config) and package manifest
//! (the compiled ecosystem's dependency file) decoding, plus source-directory
//! expansion.
//!
//! Follows the teacher's `SolFilesCache::read`/`write` idiom (`src/cache.rs`): a
//! `serde`-derived struct, JSON-file-shaped decode errors kept distinct from I/O
//! errors, `camelCase`/kebab field renames matching the on-disk shape exactly.

use std::{
    collections::BTreeMap,
    fs, io,
    path::{Path, PathBuf},
};

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ManifestError {
    #[error("elm-watch.json not found at {0}")]
    ProjectManifestNotFound(PathBuf),

    #[error("failed to read {path}: {source}")]
    ProjectManifestReadError {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to decode {path}: {source}")]
    ProjectManifestDecodeError {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to read {path}: {source}")]
    ElmJsonReadError {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to decode {path}: {source}")]
    ElmJsonDecodeError {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// The tool's own project manifest: `elm-watch.json` (§6.1).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProjectManifest {
    pub targets: BTreeMap<String, TargetManifest>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub postprocess: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TargetManifest {
    pub inputs: Vec<String>,
    pub output: String,
}

#[derive(Debug, Error)]
pub enum ProjectManifestValidationError {
    #[error("manifest has no targets")]
    NoTargets,
    #[error("invalid target name: {0:?}")]
    InvalidTargetName(String),
    #[error("target {target:?} has no inputs")]
    EmptyInputs { target: String },
    #[error("target {target:?} has an invalid input: {input:?}")]
    InvalidInput { target: String, input: String },
    #[error("target {target:?} has an invalid output: {output:?}")]
    InvalidOutput { target: String, output: String },
    #[error("postprocess must be a non-empty argv array")]
    EmptyPostprocess,
}

static TARGET_NAME: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[^\s-](?:.*\S)?$").unwrap());
static INPUT_FINAL_SEGMENT: Lazy<Regex> = Lazy::new(|| Regex::new(r"[\\/]?([\p{Lu}][^\\/]*)\.elm$").unwrap());

fn is_valid_input(input: &str) -> bool {
    INPUT_FINAL_SEGMENT.is_match(input)
}

fn is_valid_output(output: &str) -> bool {
    output.ends_with(".js") && output != ".js" && !output.starts_with('-')
}

impl ProjectManifest {
    /// Validates the structural rules of §4.D that `serde` alone cannot express.
    pub fn validate(&self) -> Result<(), ProjectManifestValidationError> {
        if self.targets.is_empty() {
            return Err(ProjectManifestValidationError::NoTargets);
        }
        if let Some(argv) = &self.postprocess {
            if argv.is_empty() {
                return Err(ProjectManifestValidationError::EmptyPostprocess);
            }
        }
        for (name, target) in &self.targets {
            if !TARGET_NAME.is_match(name) {
                return Err(ProjectManifestValidationError::InvalidTargetName(name.clone()));
            }
            if target.inputs.is_empty() {
                return Err(ProjectManifestValidationError::EmptyInputs { target: name.clone() });
            }
            for input in &target.inputs {
                if !is_valid_input(input) {
                    return Err(ProjectManifestValidationError::InvalidInput {
                        target: name.clone(),
                        input: input.clone(),
                    });
                }
            }
            if !is_valid_output(&target.output) {
                return Err(ProjectManifestValidationError::InvalidOutput {
                    target: name.clone(),
                    output: target.output.clone(),
                });
            }
        }
        Ok(())
    }

    #[instrument(skip_all, fields(path = %path.display()))]
    pub fn read(path: &Path) -> Result<Self, ManifestError> {
        if !path.is_file() {
            return Err(ManifestError::ProjectManifestNotFound(path.to_path_buf()));
        }
        let bytes = fs::read(path).map_err(|source| ManifestError::ProjectManifestReadError {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_slice(&bytes).map_err(|source| ManifestError::ProjectManifestDecodeError {
            path: path.to_path_buf(),
            source,
        })
    }
}

/// The compiled ecosystem's own manifest (`elm.json`), distinguished by its
/// `"type"` tag: `application` carries explicit source directories, `package`'s
/// source directory is fixed to `"src"`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum PackageManifest {
    Application {
        #[serde(rename = "source-directories")]
        source_directories: Vec<String>,
    },
    Package,
}

impl PackageManifest {
    /// Source directories relative to the manifest's own directory (§4.D:
    /// `application` manifests declare them explicitly, `package` manifests
    /// always expose exactly `src`).
    pub fn source_directories(&self) -> Vec<String> {
        match self {
            Self::Application { source_directories } => source_directories.clone(),
            Self::Package => vec!["src".to_string()],
        }
    }

    #[instrument(skip_all, fields(path = %path.display()))]
    pub fn read(path: &Path) -> Result<Self, ManifestError> {
        let bytes = fs::read(path)
            .map_err(|source| ManifestError::ElmJsonReadError { path: path.to_path_buf(), source })?;
        serde_json::from_slice(&bytes)
            .map_err(|source| ManifestError::ElmJsonDecodeError { path: path.to_path_buf(), source })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_minimal_project_manifest() {
        let json = r#"{"targets":{"main":{"inputs":["src/Main.elm"],"output":"build/main.js"}}}"#;
        let manifest: ProjectManifest = serde_json::from_str(json).unwrap();
        assert!(manifest.validate().is_ok());
        assert_eq!(manifest.targets.len(), 1);
    }

    #[test]
    fn rejects_unknown_fields() {
        let json = r#"{"targets":{},"bogus":1}"#;
        assert!(serde_json::from_str::<ProjectManifest>(json).is_err());
    }

    #[test]
    fn rejects_empty_targets() {
        let json = r#"{"targets":{}}"#;
        let manifest: ProjectManifest = serde_json::from_str(json).unwrap();
        assert!(matches!(manifest.validate(), Err(ProjectManifestValidationError::NoTargets)));
    }

    #[test]
    fn rejects_lowercase_input_final_segment() {
        let json = r#"{"targets":{"main":{"inputs":["src/main.elm"],"output":"build/main.js"}}}"#;
        let manifest: ProjectManifest = serde_json::from_str(json).unwrap();
        assert!(matches!(
            manifest.validate(),
            Err(ProjectManifestValidationError::InvalidInput { .. })
        ));
    }

    #[test]
    fn rejects_output_not_ending_in_js() {
        let json = r#"{"targets":{"main":{"inputs":["src/Main.elm"],"output":"build/main.txt"}}}"#;
        let manifest: ProjectManifest = serde_json::from_str(json).unwrap();
        assert!(matches!(
            manifest.validate(),
            Err(ProjectManifestValidationError::InvalidOutput { .. })
        ));
    }

    #[test]
    fn application_package_manifest_source_directories() {
        let json = r#"{"type":"application","source-directories":["src","vendor"]}"#;
        let manifest: PackageManifest = serde_json::from_str(json).unwrap();
        assert_eq!(manifest.source_directories(), vec!["src", "vendor"]);
    }

    #[test]
    fn package_package_manifest_defaults_to_src() {
        let json = r#"{"type":"package"}"#;
        let manifest: PackageManifest = serde_json::from_str(json).unwrap();
        assert_eq!(manifest.source_directories(), vec!["src"]);
    }
}
