//! Integration tests for Component E (`resolver::resolve_project`) exercised
//! through on-disk [`elm_watch_core::testutil::TempElmProject`] fixtures rather
//! than the inline, hand-rolled `fs::write` helper `resolver.rs`'s own unit
//! tests use -- these cover cross-component behavior (manifest decode +
//! resolve + walker-ready source directories) that a single-module unit test
//! can't reach.

use std::collections::HashSet;

use elm_watch_core::{
    config::Env,
    manifest::ProjectManifest,
    resolver::{resolve_project, ResolveError},
    testutil::TempElmProject,
    walker::{walk_imports, WalkResult},
};

#[test]
fn two_targets_sharing_a_package_manifest_form_one_group() {
    let project = TempElmProject::application(&["src"]);
    project.write_elm_module("src/Main.elm", &[]);
    project.write_elm_module("src/Admin.elm", &[]);
    let project = project
        .target("main", &["src/Main.elm"], "build/main.js")
        .target("admin", &["src/Admin.elm"], "build/admin.js");
    let manifest_path = project.write_project_manifest();

    let manifest = ProjectManifest::read(&manifest_path).unwrap();
    let resolved =
        resolve_project(&manifest, &manifest_path, &[], &Env::default()).unwrap();

    assert_eq!(resolved.target_groups.len(), 1);
    let group = resolved.target_groups.values().next().unwrap();
    assert_eq!(group.targets.len(), 2);
    assert_eq!(group.source_directories.len(), 1);
}

#[test]
fn two_package_manifests_form_two_groups_and_watch_root_is_their_ancestor() {
    let project = TempElmProject::new();
    project.write_file(
        "app-a/elm.json",
        &serde_json::to_string_pretty(&serde_json::json!({
            "type": "application",
            "source-directories": ["src"],
            "elm-version": "0.19.1",
            "dependencies": {"direct": {}, "indirect": {}},
            "test-dependencies": {"direct": {}, "indirect": {}},
        }))
        .unwrap(),
    );
    project.write_file(
        "app-b/elm.json",
        &serde_json::to_string_pretty(&serde_json::json!({
            "type": "application",
            "source-directories": ["src"],
            "elm-version": "0.19.1",
            "dependencies": {"direct": {}, "indirect": {}},
            "test-dependencies": {"direct": {}, "indirect": {}},
        }))
        .unwrap(),
    );
    project.write_elm_module("app-a/src/Main.elm", &[]);
    project.write_elm_module("app-b/src/Main.elm", &[]);

    let project = project
        .target("a", &["app-a/src/Main.elm"], "app-a/build/main.js")
        .target("b", &["app-b/src/Main.elm"], "app-b/build/main.js");
    let manifest_path = project.write_project_manifest();

    let manifest = ProjectManifest::read(&manifest_path).unwrap();
    let resolved =
        resolve_project(&manifest, &manifest_path, &[], &Env::default()).unwrap();

    assert_eq!(resolved.target_groups.len(), 2);
    assert_eq!(resolved.watch_root, project.root().canonicalize().unwrap());
}

#[test]
fn inputs_split_across_two_elm_jsons_is_non_unique_elm_json_paths() {
    let project = TempElmProject::new();
    project.write_file(
        "elm.json",
        &serde_json::to_string_pretty(&serde_json::json!({
            "type": "application",
            "source-directories": ["src"],
            "elm-version": "0.19.1",
            "dependencies": {"direct": {}, "indirect": {}},
            "test-dependencies": {"direct": {}, "indirect": {}},
        }))
        .unwrap(),
    );
    project.write_package_elm_json("vendor");
    project.write_elm_module("src/Main.elm", &[]);
    project.write_file("vendor/src/Other.elm", "module Other exposing (x)\n\n\nx = 1\n");

    let project = project.target(
        "main",
        &["src/Main.elm", "vendor/src/Other.elm"],
        "build/main.js",
    );
    let manifest_path = project.write_project_manifest();

    let manifest = ProjectManifest::read(&manifest_path).unwrap();
    let resolved =
        resolve_project(&manifest, &manifest_path, &[], &Env::default()).unwrap();

    assert_eq!(resolved.target_errors.len(), 1);
    assert!(matches!(
        resolved.target_errors[0].1,
        ResolveError::NonUniqueElmJsonPaths { .. }
    ));
}

#[test]
fn resolved_source_directories_feed_the_walker_end_to_end() {
    // Mirrors the "diamond graph" scenario (spec §8 scenario 1), but driven
    // through manifest decode + resolve instead of calling `walk_imports`
    // directly with hand-built source dirs.
    let project = TempElmProject::application(&["src"]);
    project.write_elm_module("src/Main.elm", &["Left", "Right"]);
    project.write_elm_module("src/Left.elm", &["Helpers"]);
    project.write_elm_module("src/Right.elm", &["Helpers"]);
    project.write_elm_module("src/Helpers.elm", &[]);
    let project = project.target("main", &["src/Main.elm"], "build/main.js");
    let manifest_path = project.write_project_manifest();

    let manifest = ProjectManifest::read(&manifest_path).unwrap();
    let resolved =
        resolve_project(&manifest, &manifest_path, &[], &Env::default()).unwrap();

    let group = resolved.target_groups.values().next().unwrap();
    let target = group.targets.values().next().unwrap();
    let inputs: Vec<_> = target.inputs.iter().map(|i| i.realpath.clone()).collect();

    let result = walk_imports(&group.source_directories, &inputs);
    let related: HashSet<_> = match result {
        WalkResult::Success { related } => related,
        WalkResult::FsError { .. } => panic!("expected a clean walk"),
    };

    let src = project.root().canonicalize().unwrap().join("src");
    assert!(related.contains(&src.join("Main.elm")));
    assert!(related.contains(&src.join("Left.elm")));
    assert!(related.contains(&src.join("Right.elm")));
    assert!(related.contains(&src.join("Helpers.elm")));
}

#[test]
fn duplicate_outputs_across_targets_in_different_groups_is_rejected() {
    let project = TempElmProject::application(&["src"]);
    project.write_elm_module("src/Main.elm", &[]);
    project.write_elm_module("src/Other.elm", &[]);
    let project = project
        .target("main", &["src/Main.elm"], "build/shared.js")
        .target("other", &["src/Other.elm"], "build/shared.js");
    let manifest_path = project.write_project_manifest();

    let manifest = ProjectManifest::read(&manifest_path).unwrap();
    let result = resolve_project(&manifest, &manifest_path, &[], &Env::default());

    assert!(matches!(result, Err(ResolveError::DuplicateOutputs { .. })));
}

#[test]
fn target_filter_substring_matches_across_a_multi_target_project_manifest() {
    let project = TempElmProject::application(&["src"]);
    project.write_elm_module("src/Main.elm", &[]);
    project.write_elm_module("src/AdminMain.elm", &[]);
    project.write_elm_module("src/Docs.elm", &[]);
    let project = project
        .target("main", &["src/Main.elm"], "build/main.js")
        .target("admin-main", &["src/AdminMain.elm"], "build/admin.js")
        .target("docs", &["src/Docs.elm"], "build/docs.js");
    let manifest_path = project.write_project_manifest();

    let manifest = ProjectManifest::read(&manifest_path).unwrap();
    let resolved = resolve_project(
        &manifest,
        &manifest_path,
        &["main".to_string()],
        &Env::default(),
    )
    .unwrap();

    assert_eq!(resolved.target_count(), 2);
    assert_eq!(resolved.disabled_targets, vec!["docs".to_string()]);
}
