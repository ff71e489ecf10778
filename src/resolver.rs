//! Component E: resolves a decoded [`crate::manifest::ProjectManifest`] into a
//! [`Project`] skeleton — targets grouped by their governing package manifest,
//! inputs canonicalized and deduplicated, outputs checked for collisions, and the
//! watch root computed.
//!
//! Grounded on the `ProjectBuilder`/`Project` shape in `src/lib.rs` (fluent
//! `#[must_use]` builder producing an immutable, already-validated `Project`) and
//! on `MaybeCompilerError<E>` (`src/compile/project.rs`) for keeping a
//! component-scoped error type that plugs into the crate-wide one via `#[from]`.

use std::{collections::BTreeMap, fs, io};

use thiserror::Error;

use crate::{
    config::{BrowserUiPosition, Env},
    manifest::{ManifestError, PackageManifest, ProjectManifest},
    paths::{self, AbsPath},
    scheduler::TargetStatus,
};

#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("target {target:?}: no elm.json found above any input")]
    ElmJsonNotFound { target: String },

    #[error("target {target:?}: inputs resolve to more than one elm.json: {paths:?}")]
    NonUniqueElmJsonPaths { target: String, paths: Vec<AbsPath> },

    #[error("target {target:?}: duplicate input {realpath:?} (given as {originals:?})")]
    DuplicateInputs { target: String, realpath: AbsPath, originals: Vec<String> },

    #[error("target {target:?}: failed to resolve input {input:?}: {message}")]
    InputsFailedToResolve { target: String, input: String, message: String },

    #[error("target {target:?}: input not found: {input:?}")]
    InputsNotFound { target: String, input: String },

    #[error("two or more targets resolve to the same output: {outputs:?}")]
    DuplicateOutputs { outputs: Vec<AbsPath> },

    #[error("project manifest and package manifests share no common root")]
    NoCommonRoot,

    #[error(transparent)]
    Manifest(#[from] ManifestError),
}

/// An input file together with the original string it was given as (kept for
/// diagnostics, never normalized — see SPEC_FULL.md §9 open question) and its
/// realpath. Equality/hashing is over the realpath only: two inputs are
/// duplicates iff their realpaths are equal.
#[derive(Debug, Clone)]
pub struct InputPath {
    pub original: String,
    pub abs: AbsPath,
    pub realpath: AbsPath,
}

impl PartialEq for InputPath {
    fn eq(&self, other: &Self) -> bool {
        self.realpath == other.realpath
    }
}
impl Eq for InputPath {}
impl std::hash::Hash for InputPath {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.realpath.hash(state);
    }
}

/// Newtype over the absolute path of a package manifest (`elm.json`), used as the
/// key grouping targets that are compiled together (§3: "targetGroups").
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PackageManifestPath(pub AbsPath);

/// All targets sharing one package manifest, plus that manifest's resolved
/// source directories (absolute, ready to feed [`crate::walker::walk_imports`]).
#[derive(Debug)]
pub struct TargetGroup {
    pub package_manifest_path: PackageManifestPath,
    pub source_directories: Vec<AbsPath>,
    /// Keyed by each target's resolved, absolute output path.
    pub targets: BTreeMap<AbsPath, TargetState>,
}

/// Mutable per-target state (§3). Created once during resolution and lives for
/// the process's lifetime; only ever mutated afterwards (by the scheduler).
#[derive(Debug)]
pub struct TargetState {
    pub name: String,
    pub inputs: Vec<InputPath>,
    pub output: AbsPath,
    pub compilation_mode: crate::config::CompilationMode,
    pub status: TargetStatus,
    pub related_files: std::collections::HashSet<AbsPath>,
    pub dirty: bool,
    pub browser_ui_position: BrowserUiPosition,
    pub open_error_overlay: bool,
}

impl TargetState {
    fn new(name: String, inputs: Vec<InputPath>, output: AbsPath) -> Self {
        Self {
            name,
            inputs,
            output,
            compilation_mode: crate::config::CompilationMode::Standard,
            status: TargetStatus::NotWrittenToDisk,
            related_files: std::collections::HashSet::new(),
            dirty: true,
            browser_ui_position: BrowserUiPosition::default(),
            open_error_overlay: false,
        }
    }
}

/// Immutable project skeleton, produced once per run (§3).
#[derive(Debug)]
pub struct Project {
    pub watch_root: AbsPath,
    pub project_manifest_path: AbsPath,
    pub stuff_json_path: AbsPath,
    pub disabled_targets: Vec<String>,
    pub target_groups: BTreeMap<PackageManifestPath, TargetGroup>,
    pub max_parallel: usize,
    pub postprocess: Option<Vec<String>>,
    /// Targets that were selected but failed to resolve (kept separate from
    /// `target_groups` so a broken target doesn't block compiling the rest of
    /// the project in `make` mode, matching §7's per-target fail-fast rule).
    pub target_errors: Vec<(String, ResolveError)>,
}

impl Project {
    pub fn target_count(&self) -> usize {
        self.target_groups.values().map(|g| g.targets.len()).sum()
    }
}

fn realpath_classified(path: &std::path::Path, target: &str, input: &str) -> Result<AbsPath, ResolveError> {
    paths::realpath(path).map_err(|err| match err.kind() {
        io::ErrorKind::NotFound => ResolveError::InputsNotFound {
            target: target.to_string(),
            input: input.to_string(),
        },
        _ => ResolveError::InputsFailedToResolve {
            target: target.to_string(),
            input: input.to_string(),
            message: err.to_string(),
        },
    })
}

struct ResolvedTarget {
    name: String,
    inputs: Vec<InputPath>,
    output: AbsPath,
    package_manifest_path: AbsPath,
}

fn resolve_target(
    name: &str,
    target: &crate::manifest::TargetManifest,
    project_manifest_dir: &std::path::Path,
) -> Result<ResolvedTarget, ResolveError> {
    let mut inputs = Vec::with_capacity(target.inputs.len());
    for original in &target.inputs {
        let abs = paths::resolve(project_manifest_dir, &[original]);
        let realpath = realpath_classified(&abs, name, original)?;
        inputs.push(InputPath { original: original.clone(), abs, realpath });
    }

    let mut by_realpath: BTreeMap<AbsPath, Vec<&str>> = BTreeMap::new();
    for input in &inputs {
        by_realpath.entry(input.realpath.clone()).or_default().push(&input.original);
    }
    for (realpath, originals) in &by_realpath {
        if originals.len() >= 2 {
            return Err(ResolveError::DuplicateInputs {
                target: name.to_string(),
                realpath: realpath.clone(),
                originals: originals.iter().map(|s| s.to_string()).collect(),
            });
        }
    }

    let mut manifest_paths: Vec<AbsPath> = Vec::new();
    for input in &inputs {
        let dir = input.realpath.parent().unwrap_or(&input.realpath);
        let found = paths::find_closest("elm.json", dir)
            .ok_or_else(|| ResolveError::ElmJsonNotFound { target: name.to_string() })?;
        if !manifest_paths.contains(&found) {
            manifest_paths.push(found);
        }
    }
    if manifest_paths.len() > 1 {
        return Err(ResolveError::NonUniqueElmJsonPaths { target: name.to_string(), paths: manifest_paths });
    }
    let package_manifest_path = manifest_paths.into_iter().next().expect("inputs is non-empty");

    let output = paths::resolve(project_manifest_dir, &[&target.output]);

    Ok(ResolvedTarget { name: name.to_string(), inputs, output, package_manifest_path })
}

/// Resolves `manifest` (already structurally validated) into a [`Project`].
/// `target_filters` is a list of substrings; a target is enabled iff its name
/// contains at least one of them (empty filter list enables every target).
#[instrument(skip_all, fields(project_manifest_path = %project_manifest_path.display()))]
pub fn resolve_project(
    manifest: &ProjectManifest,
    project_manifest_path: &std::path::Path,
    target_filters: &[String],
    env: &Env,
) -> Result<Project, ResolveError> {
    let project_manifest_dir = project_manifest_path.parent().unwrap_or(project_manifest_path);

    let mut disabled_targets = Vec::new();
    let mut resolved: Vec<ResolvedTarget> = Vec::new();
    let mut target_errors = Vec::new();

    for (name, target) in &manifest.targets {
        let enabled =
            target_filters.is_empty() || target_filters.iter().any(|filter| name.contains(filter));
        if !enabled {
            disabled_targets.push(name.clone());
            continue;
        }
        match resolve_target(name, target, project_manifest_dir) {
            Ok(t) => resolved.push(t),
            Err(e) => {
                warn!(target = name.as_str(), error = %e, "target failed to resolve");
                target_errors.push((name.clone(), e));
            }
        }
    }

    let mut outputs_seen: BTreeMap<AbsPath, Vec<String>> = BTreeMap::new();
    for t in &resolved {
        outputs_seen.entry(t.output.clone()).or_default().push(t.name.clone());
    }
    let duplicate_outputs: Vec<AbsPath> =
        outputs_seen.iter().filter(|(_, names)| names.len() >= 2).map(|(path, _)| path.clone()).collect();
    if !duplicate_outputs.is_empty() {
        return Err(ResolveError::DuplicateOutputs { outputs: duplicate_outputs });
    }

    let mut package_manifests: BTreeMap<AbsPath, PackageManifest> = BTreeMap::new();
    for t in &resolved {
        if !package_manifests.contains_key(&t.package_manifest_path) {
            let pm = PackageManifest::read(&t.package_manifest_path)?;
            package_manifests.insert(t.package_manifest_path.clone(), pm);
        }
    }

    let mut target_groups: BTreeMap<PackageManifestPath, TargetGroup> = BTreeMap::new();
    for t in resolved {
        let pm = &package_manifests[&t.package_manifest_path];
        let manifest_dir = t.package_manifest_path.parent().unwrap_or(&t.package_manifest_path);
        let source_directories: Vec<AbsPath> = pm
            .source_directories()
            .iter()
            .map(|rel| paths::resolve(manifest_dir, &[rel]))
            .collect();

        let key = PackageManifestPath(t.package_manifest_path.clone());
        let group = target_groups.entry(key.clone()).or_insert_with(|| TargetGroup {
            package_manifest_path: key,
            source_directories,
            targets: BTreeMap::new(),
        });
        group.targets.insert(t.output.clone(), TargetState::new(t.name, t.inputs, t.output));
    }

    let mut root_candidates: Vec<AbsPath> = vec![project_manifest_dir.to_path_buf()];
    root_candidates.extend(
        target_groups.keys().map(|k| k.0.parent().unwrap_or(&k.0).to_path_buf()),
    );
    let watch_root = paths::longest_common_ancestor(&root_candidates).ok_or(ResolveError::NoCommonRoot)?;

    let stuff_json_path =
        paths::resolve(project_manifest_dir, &["elm-stuff", "elm-watch", "stuff.json"]);

    Ok(Project {
        watch_root,
        project_manifest_path: project_manifest_path.to_path_buf(),
        stuff_json_path,
        disabled_targets,
        target_groups,
        max_parallel: env.max_parallel,
        postprocess: manifest.postprocess.clone(),
        target_errors,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::TargetManifest;
    use std::collections::BTreeMap;

    fn write(dir: &std::path::Path, rel: &str, content: &str) {
        let path = dir.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }

    fn app_manifest() -> &'static str {
        r#"{"type":"application","source-directories":["src"]}"#
    }

    #[test]
    fn resolves_single_target() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().canonicalize().unwrap();
        write(&root, "elm.json", app_manifest());
        write(&root, "src/Main.elm", "main = 1\n");

        let mut targets = BTreeMap::new();
        targets.insert(
            "main".to_string(),
            TargetManifest { inputs: vec!["src/Main.elm".to_string()], output: "build/main.js".to_string() },
        );
        let manifest = ProjectManifest { targets, postprocess: None, port: None };

        let project = resolve_project(&manifest, &root.join("elm-watch.json"), &[], &Env::default()).unwrap();
        assert_eq!(project.target_count(), 1);
        assert!(project.target_errors.is_empty());
    }

    #[test]
    fn missing_input_is_inputs_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().canonicalize().unwrap();
        write(&root, "elm.json", app_manifest());

        let mut targets = BTreeMap::new();
        targets.insert(
            "main".to_string(),
            TargetManifest { inputs: vec!["src/Main.elm".to_string()], output: "build/main.js".to_string() },
        );
        let manifest = ProjectManifest { targets, postprocess: None, port: None };

        let project = resolve_project(&manifest, &root.join("elm-watch.json"), &[], &Env::default()).unwrap();
        assert_eq!(project.target_errors.len(), 1);
        assert!(matches!(project.target_errors[0].1, ResolveError::InputsNotFound { .. }));
    }

    #[test]
    fn duplicate_outputs_fail_the_whole_resolve() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().canonicalize().unwrap();
        write(&root, "elm.json", app_manifest());
        write(&root, "src/A.elm", "main = 1\n");
        write(&root, "src/B.elm", "main = 1\n");

        let mut targets = BTreeMap::new();
        targets.insert(
            "a".to_string(),
            TargetManifest { inputs: vec!["src/A.elm".to_string()], output: "build/main.js".to_string() },
        );
        targets.insert(
            "b".to_string(),
            TargetManifest { inputs: vec!["src/B.elm".to_string()], output: "build/main.js".to_string() },
        );
        let manifest = ProjectManifest { targets, postprocess: None, port: None };

        let result = resolve_project(&manifest, &root.join("elm-watch.json"), &[], &Env::default());
        assert!(matches!(result, Err(ResolveError::DuplicateOutputs { .. })));
    }

    #[test]
    fn target_filter_disables_non_matching_targets() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().canonicalize().unwrap();
        write(&root, "elm.json", app_manifest());
        write(&root, "src/Main.elm", "main = 1\n");
        write(&root, "src/Admin.elm", "main = 1\n");

        let mut targets = BTreeMap::new();
        targets.insert(
            "main".to_string(),
            TargetManifest { inputs: vec!["src/Main.elm".to_string()], output: "build/main.js".to_string() },
        );
        targets.insert(
            "admin".to_string(),
            TargetManifest { inputs: vec!["src/Admin.elm".to_string()], output: "build/admin.js".to_string() },
        );
        let manifest = ProjectManifest { targets, postprocess: None, port: None };

        let project = resolve_project(
            &manifest,
            &root.join("elm-watch.json"),
            &["main".to_string()],
            &Env::default(),
        )
        .unwrap();
        assert_eq!(project.target_count(), 1);
        assert_eq!(project.disabled_targets, vec!["admin".to_string()]);
    }
}
