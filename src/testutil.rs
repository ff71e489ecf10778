//! Ambient P: throwaway project-tree fixtures for integration tests, the way
//! the teacher's `project_util` feature builds a `TempProject` instead of
//! asking every test to hand-roll `tempfile::tempdir()` + a pile of `fs::write`
//! calls (see the inline `write` helper duplicated across `resolver.rs`'s own
//! unit tests — this generalizes that).
//!
//! Gated the same way the teacher gates `project_util`: behind a Cargo feature
//! (`project-util`) so release builds never pull in `tempfile`/`rand`, plus
//! `#[cfg(test)]` so this crate's own inline tests can use it unconditionally.

use std::{collections::BTreeMap, fs, path::Path};

use tempfile::TempDir;

use crate::manifest::{ProjectManifest, TargetManifest};

/// A self-contained, on-disk `.elm`/`elm.json`/`elm-watch.json` tree rooted at
/// a [`TempDir`]. Dropped (and deleted) at the end of the test that built it.
pub struct TempElmProject {
    dir: TempDir,
    targets: BTreeMap<String, TargetManifest>,
    postprocess: Option<Vec<String>>,
    port: Option<u16>,
}

impl TempElmProject {
    /// A bare project tree: just the temp directory, no `elm.json` yet. Most
    /// tests want [`TempElmProject::application`] instead.
    pub fn new() -> Self {
        Self {
            dir: tempfile::tempdir().expect("failed to create temp dir"),
            targets: BTreeMap::new(),
            postprocess: None,
            port: None,
        }
    }

    /// Convenience constructor: a single-package application project rooted at
    /// the temp dir, with `elm.json` declaring `source_directories` (relative
    /// to the root) and nothing else written yet.
    pub fn application(source_directories: &[&str]) -> Self {
        let project = Self::new();
        project.write_elm_json(source_directories);
        project
    }

    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    /// Writes an `application`-flavored `elm.json` at the project root.
    pub fn write_elm_json(&self, source_directories: &[&str]) {
        let json = serde_json::json!({
            "type": "application",
            "source-directories": source_directories,
            "elm-version": "0.19.1",
            "dependencies": { "direct": {}, "indirect": {} },
            "test-dependencies": { "direct": {}, "indirect": {} },
        });
        self.write_file("elm.json", &serde_json::to_string_pretty(&json).unwrap());
    }

    /// Writes a `package`-flavored `elm.json` at `rel_dir/elm.json` (package
    /// manifests always expose `src` as their sole source directory).
    pub fn write_package_elm_json(&self, rel_dir: &str) {
        let json = serde_json::json!({ "type": "package" });
        self.write_file(&format!("{rel_dir}/elm.json"), &serde_json::to_string_pretty(&json).unwrap());
    }

    /// Writes `content` at `rel_path`, creating parent directories as needed.
    pub fn write_file(&self, rel_path: &str, content: &str) {
        let path = self.dir.path().join(rel_path);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).expect("failed to create fixture parent dir");
        }
        fs::write(&path, content).expect("failed to write fixture file");
    }

    /// Writes a trivially-valid Elm module at `rel_path` (module name derived
    /// from the file's final segment, per Elm's own naming rule), optionally
    /// importing other modules.
    pub fn write_elm_module(&self, rel_path: &str, imports: &[&str]) {
        let module_name = rel_path
            .rsplit(['/', '\\'])
            .next()
            .unwrap_or(rel_path)
            .trim_end_matches(".elm");
        let mut source = format!("module {module_name} exposing (main)\n\n");
        for import in imports {
            source.push_str(&format!("import {import}\n"));
        }
        source.push_str("\n\nmain =\n    \"");
        source.push_str(&unique_marker());
        source.push_str("\"\n");
        self.write_file(rel_path, &source);
    }

    /// Registers a target entry for the eventual `elm-watch.json`; does not
    /// write anything to disk by itself (see [`TempElmProject::write_project_manifest`]).
    pub fn target(mut self, name: &str, inputs: &[&str], output: &str) -> Self {
        self.targets.insert(
            name.to_string(),
            TargetManifest { inputs: inputs.iter().map(|s| s.to_string()).collect(), output: output.to_string() },
        );
        self
    }

    pub fn postprocess(mut self, argv: Vec<String>) -> Self {
        self.postprocess = Some(argv);
        self
    }

    pub fn port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    pub fn manifest(&self) -> ProjectManifest {
        ProjectManifest { targets: self.targets.clone(), postprocess: self.postprocess.clone(), port: self.port }
    }

    /// Serializes the accumulated targets to `elm-watch.json` at the project
    /// root and returns its path.
    pub fn write_project_manifest(&self) -> std::path::PathBuf {
        let manifest = self.manifest();
        let json = serde_json::to_string_pretty(&manifest).expect("manifest always serializes");
        self.write_file("elm-watch.json", &json);
        self.dir.path().join("elm-watch.json")
    }
}

impl Default for TempElmProject {
    fn default() -> Self {
        Self::new()
    }
}

/// A short random marker, distinct on every call, so successive writes to the
/// same fixture file produce visibly different compiled output (needed by
/// watcher/scheduler tests that assert a rebuild actually picked up a change).
pub fn unique_marker() -> String {
    use rand::Rng as _;
    let mut rng = rand::thread_rng();
    (0..12).map(|_| rng.sample(rand::distributions::Alphanumeric) as char).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn application_project_has_a_readable_elm_json() {
        let project = TempElmProject::application(&["src"]);
        let elm_json = fs::read_to_string(project.root().join("elm.json")).unwrap();
        assert!(elm_json.contains("\"application\""));
    }

    #[test]
    fn target_and_write_project_manifest_round_trip() {
        let project = TempElmProject::application(&["src"]);
        project.write_elm_module("src/Main.elm", &[]);
        let project = project.target("main", &["src/Main.elm"], "build/main.js");
        let manifest_path = project.write_project_manifest();

        let manifest = ProjectManifest::read(&manifest_path).unwrap();
        assert_eq!(manifest.targets.len(), 1);
        assert!(manifest.validate().is_ok());
    }

    #[test]
    fn unique_marker_is_not_constant() {
        assert_ne!(unique_marker(), unique_marker());
    }
}
