//! Component C: recursively discovers every file whose creation, deletion or
//! modification can affect a target, by following `import Module.Name`
//! declarations through a target group's source directories.
//!
//! Mirrors the DFS-over-importers shape of `ArtifactsCache::populate_dirty_files`/
//! `get_dirty_files` (`src/cache.rs`), except the direction is inverted: the
//! teacher walks from a changed file to its importers using a precomputed edge
//! map, this walks forward from the entry points through each file's own imports,
//! since there is no cache of the import graph to consult up front.

use std::{
    collections::{HashMap, HashSet},
    fs, io,
    path::{Path, PathBuf},
};

use thiserror::Error;

use crate::{parser, paths::AbsPath};

#[derive(Debug, Error)]
pub enum WalkError {
    #[error("failed to read {path}: {source}")]
    Fs {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Successful walk result, or a filesystem error with whatever was discovered
/// before the error was hit (§4.C: "missing files are not errors", but genuine
/// I/O failures degrade to a partial, still-useful result).
#[derive(Debug)]
pub enum WalkResult {
    Success { related: HashSet<AbsPath> },
    FsError { error: WalkError, partial_related: HashSet<AbsPath> },
}

impl WalkResult {
    pub fn related(&self) -> &HashSet<AbsPath> {
        match self {
            Self::Success { related } => related,
            Self::FsError { partial_related, .. } => partial_related,
        }
    }
}

/// Enumerates the immediate children of a source directory once, so the DFS can
/// cheaply ask "could `Foo/Bar.elm` possibly exist" without a syscall per import.
fn cache_children(dir: &Path) -> HashSet<String> {
    fs::read_dir(dir)
        .into_iter()
        .flatten()
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.file_name().to_string_lossy().into_owned())
        .collect()
}

fn module_relative_path(module: &str) -> PathBuf {
    let mut path = PathBuf::new();
    for segment in module.split('.') {
        path.push(segment);
    }
    path.set_extension("elm");
    path
}

fn first_segment(relative: &Path) -> Option<String> {
    relative.components().next().map(|c| c.as_os_str().to_string_lossy().into_owned())
}

/// Walks the import graph reachable from `inputs` through `source_dirs`,
/// returning every file (existing or not yet existing) whose change must mark
/// the owning target(s) dirty.
#[instrument(skip_all, fields(inputs = inputs.len(), source_dirs = source_dirs.len()))]
pub fn walk_imports(source_dirs: &[AbsPath], inputs: &[AbsPath]) -> WalkResult {
    let mut related: HashSet<AbsPath> = HashSet::new();
    let children_cache: HashMap<&Path, HashSet<String>> =
        source_dirs.iter().map(|dir| (dir.as_path(), cache_children(dir))).collect();

    // Seed: each input's own realpath, plus the shadow-file invariant -- every
    // path the same trailing component would have under every other source dir.
    for input in inputs {
        related.insert(input.clone());
        if let Some(owning_dir) = source_dirs.iter().find(|dir| input.starts_with(dir)) {
            if let Ok(trailing) = input.strip_prefix(owning_dir) {
                for dir in source_dirs {
                    related.insert(dir.join(trailing));
                }
            }
        }
    }

    let mut visited_modules: HashSet<PathBuf> = HashSet::new();
    let mut io_error: Option<WalkError> = None;

    let mut stack: Vec<AbsPath> = inputs.to_vec();
    while let Some(file) = stack.pop() {
        let content = match fs::read(&file) {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == io::ErrorKind::NotFound => continue,
            Err(err) => {
                io_error = Some(WalkError::Fs { path: file.clone(), source: err });
                continue;
            }
        };

        let mut parser = parser::ImportParser::new();
        let prefix = &content[..content.len().min(parser::PREFIX_READ_SIZE)];
        parser.feed(prefix);

        for imported in parser.into_imports() {
            let relative = module_relative_path(&imported.data);
            if !visited_modules.insert(relative.clone()) {
                continue;
            }

            let Some(top_level) = first_segment(&relative) else { continue };
            for dir in source_dirs {
                let candidate = dir.join(&relative);
                related.insert(candidate.clone());

                let children = children_cache.get(dir.as_path());
                let hinted_present =
                    children.map(|set| set.contains(&top_level)).unwrap_or(false);
                if hinted_present {
                    stack.push(candidate);
                }
            }
        }
    }

    match io_error {
        None => WalkResult::Success { related },
        Some(error) => WalkResult::FsError { error, partial_related: related },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn write(dir: &Path, rel: &str, content: &str) {
        let path = dir.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }

    #[test]
    fn diamond_graph() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().canonicalize().unwrap();
        write(&root, "Main.elm", "import Left\nimport Right\n");
        write(&root, "Left.elm", "import Helpers\n");
        write(&root, "Right.elm", "import Helpers\n");
        write(&root, "Helpers.elm", "main = 1\n");

        let source_dirs = vec![root.clone()];
        let inputs = vec![root.join("Main.elm")];
        let result = walk_imports(&source_dirs, &inputs);
        let related: HashSet<_> = result.related().iter().cloned().collect();

        assert!(related.contains(&root.join("Main.elm")));
        assert!(related.contains(&root.join("Left.elm")));
        assert!(related.contains(&root.join("Right.elm")));
        assert!(related.contains(&root.join("Helpers.elm")));
    }

    #[test]
    fn shadow_source_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().canonicalize().unwrap();
        for sub in ["app", "body-parts", "units"] {
            fs::create_dir_all(root.join(sub)).unwrap();
        }
        write(&root, "app/Main.elm", "import Meter\n");

        let source_dirs =
            vec![root.join("app"), root.join("body-parts"), root.join("units")];
        let inputs = vec![root.join("app/Main.elm")];
        let result = walk_imports(&source_dirs, &inputs);
        let related = result.related();

        assert!(related.contains(&root.join("app/Main.elm")));
        assert!(related.contains(&root.join("body-parts/Main.elm")));
        assert!(related.contains(&root.join("units/Main.elm")));
        assert!(related.contains(&root.join("app/Meter.elm")));
        assert!(related.contains(&root.join("body-parts/Meter.elm")));
        assert!(related.contains(&root.join("units/Meter.elm")));
    }

    #[test]
    fn cycles_do_not_overflow_the_stack() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().canonicalize().unwrap();
        write(&root, "A.elm", "import B\n");
        write(&root, "B.elm", "import A\n");

        let source_dirs = vec![root.clone()];
        let inputs = vec![root.join("A.elm")];
        let result = walk_imports(&source_dirs, &inputs);
        let related = result.related();
        assert!(related.contains(&root.join("A.elm")));
        assert!(related.contains(&root.join("B.elm")));
    }

    #[test]
    fn self_import_is_handled() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().canonicalize().unwrap();
        write(&root, "Self.elm", "import Self\n");

        let source_dirs = vec![root.clone()];
        let inputs = vec![root.join("Self.elm")];
        let result = walk_imports(&source_dirs, &inputs);
        assert!(result.related().contains(&root.join("Self.elm")));
    }

    #[test]
    fn missing_imported_file_is_not_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().canonicalize().unwrap();
        write(&root, "Main.elm", "import NeverCreated\n");

        let source_dirs = vec![root.clone()];
        let inputs = vec![root.join("Main.elm")];
        let result = walk_imports(&source_dirs, &inputs);
        match result {
            WalkResult::Success { related } => {
                assert!(related.contains(&root.join("NeverCreated.elm")));
            }
            WalkResult::FsError { .. } => panic!("missing files must not be an FS error"),
        }
    }

    #[test]
    fn idempotent_across_runs() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().canonicalize().unwrap();
        write(&root, "Main.elm", "import Left\nimport Right\n");
        write(&root, "Left.elm", "import Helpers\n");
        write(&root, "Right.elm", "import Helpers\n");
        write(&root, "Helpers.elm", "main = 1\n");

        let source_dirs = vec![root.clone()];
        let inputs = vec![root.join("Main.elm")];
        let first = walk_imports(&source_dirs, &inputs).related().clone();
        let second = walk_imports(&source_dirs, &inputs).related().clone();
        assert_eq!(first, second);
    }

    #[test]
    fn union_of_single_input_results() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().canonicalize().unwrap();
        write(&root, "A.elm", "main = 1\n");
        write(&root, "B.elm", "main = 1\n");

        let source_dirs = vec![root.clone()];
        let a_only = walk_imports(&source_dirs, &[root.join("A.elm")]).related().clone();
        let b_only = walk_imports(&source_dirs, &[root.join("B.elm")]).related().clone();
        let both =
            walk_imports(&source_dirs, &[root.join("A.elm"), root.join("B.elm")]).related().clone();

        let union: HashSet<_> = a_only.union(&b_only).cloned().collect();
        assert_eq!(both, union);
    }
}
