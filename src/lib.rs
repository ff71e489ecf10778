//! Development-time build orchestrator for a pure-functional compiler that produces
//! browser JavaScript.
//!
//! In `make` mode the [`Project`] is resolved once and every target is compiled. In
//! `hot` mode the same resolution feeds a [`scheduler`] that keeps recompiling
//! affected targets as the filesystem changes and pushes updates to connected
//! browsers over the [`hot`] WebSocket protocol.
//!
//! Argument parsing, `init` scaffolding, status-line rendering and bootstrapping the
//! external compiler binary are intentionally not part of this crate; see
//! [`CliRequest`] for the thin boundary type a CLI binary drives this core with.

#[macro_use]
extern crate tracing;

pub mod compiler;
pub mod config;
pub mod error;
pub mod hot;
pub mod inject;
pub mod manifest;
pub mod parser;
pub mod paths;
pub mod postprocess;
pub mod report;
pub mod resolver;
pub mod scheduler;
pub mod stuff;
pub mod walker;
pub mod watcher;

#[cfg(any(test, feature = "project-util"))]
pub mod testutil;

pub use config::{BrowserUiPosition, CompilationMode, Env, RunMode};
pub use error::{Error, Result};
pub use resolver::{PackageManifestPath, Project, TargetGroup, TargetState};

use std::path::PathBuf;

/// The out-of-core boundary interface a CLI binary uses to drive this crate.
///
/// Argument parsing, help text and `init` scaffolding are deliberately not part of
/// this crate (see the module docs); a binary that owns those concerns constructs
/// one of these and hands it to [`resolver::resolve_project`].
#[derive(Debug, Clone)]
pub struct CliRequest {
    pub command: CliCommand,
    /// Target-name substrings used to filter the project manifest's targets.
    /// Empty means "every target is enabled".
    pub target_filters: Vec<String>,
    pub project_manifest_path: PathBuf,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CliCommand {
    Make { mode: Option<CompilationMode> },
    Hot,
}
