//! Component I: the scheduler. A pure selection function (`get_output_actions`)
//! decides what each target should do next; `handle_action` carries out one
//! selected action's side effects and mutates the owning [`TargetState`].
//!
//! Grounded on `ProjectCompiler::compile`'s staged
//! `PreprocessedState -> CompiledState -> ArtifactsState` pipeline
//! (`src/compile/project.rs`) for the "advance one target through a fixed set
//! of stages, gated by what's already running" shape; the priority/trim
//! selection itself has no teacher analogue and is new.

use std::{
    collections::HashMap,
    path::Path,
    time::{SystemTime, UNIX_EPOCH},
};

use crate::{
    compiler::{self, CompileOutcome, CompileRequest, CommandOutcome},
    config::{CompilationMode, Env, RunMode},
    inject,
    paths::AbsPath,
    postprocess::{PostprocessPool, PostprocessRequest},
    resolver::{PackageManifestPath, TargetGroup, TargetState},
    walker::{self, WalkResult},
};

/// Per-target status (§4.I). `Success`/error variants carry just enough to
/// report without re-reading the output file.
#[derive(Debug, Clone)]
pub enum TargetStatus {
    NotWrittenToDisk,
    Success { file_size: u64, compiled_timestamp: u64 },
    ElmMake { mode: CompilationMode },
    ElmMakeTypecheckOnly,
    Postprocess,
    Interrupted,
    QueuedForElmMake,
    QueuedForPostprocess { postprocess_argv: Vec<String>, code: String },
    ElmMakeError(String),
    ElmMakeCrashError(String),
    ElmMakeJsonParseError(String),
    WalkError(String),
    PostprocessError(String),
    InjectError(String),
}

impl TargetStatus {
    fn is_executing(&self) -> bool {
        matches!(self, Self::ElmMake { .. } | Self::ElmMakeTypecheckOnly | Self::Postprocess)
    }

    fn is_error(&self) -> bool {
        matches!(
            self,
            Self::ElmMakeError(_)
                | Self::ElmMakeCrashError(_)
                | Self::ElmMakeJsonParseError(_)
                | Self::WalkError(_)
                | Self::PostprocessError(_)
                | Self::InjectError(_)
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionSource {
    Dirty,
    Queued,
}

#[derive(Debug, Clone)]
pub enum Action {
    NeedsElmMake { output: AbsPath, priority: u32, source: ActionSource },
    NeedsElmMakeTypecheckOnly { group: PackageManifestPath },
    NeedsPostprocess { output: AbsPath, priority: u32, code: String },
    QueueForElmMake { output: AbsPath },
}

impl Action {
    fn priority(&self) -> u32 {
        match self {
            Self::NeedsElmMake { priority, .. } | Self::NeedsPostprocess { priority, .. } => *priority,
            Self::NeedsElmMakeTypecheckOnly { .. } | Self::QueueForElmMake { .. } => 0,
        }
    }
}

/// The pure-function-per-tick selector (§4.I steps 1-4). `priorities` maps an
/// output path to "most recently interacted with by a connected browser" in
/// hot mode; ignored (every target equal) in make mode.
pub fn get_output_actions(
    target_groups: &std::collections::BTreeMap<PackageManifestPath, TargetGroup>,
    run_mode: RunMode,
    include_interrupted: bool,
    max_parallel: usize,
    priorities: &HashMap<AbsPath, u32>,
) -> Vec<Action> {
    let mut elm_make_actions = Vec::new();
    let mut typecheck_actions = Vec::new();
    let mut postprocess_actions = Vec::new();
    let mut queue_actions = Vec::new();
    let mut num_executing = 0usize;
    let mut any_error = false;

    let priority_of = |output: &AbsPath| priorities.get(output).copied().unwrap_or(0);

    for group in target_groups.values() {
        let slot_taken = group.targets.values().any(|t| t.status.is_executing());
        let mut typecheck_candidates = Vec::new();

        for (output, target) in &group.targets {
            if target.status.is_error() {
                any_error = true;
            }
            if target.status.is_executing() {
                num_executing += 1;
                continue;
            }
            match &target.status {
                TargetStatus::QueuedForElmMake => {
                    if !slot_taken {
                        elm_make_actions.push(Action::NeedsElmMake {
                            output: output.clone(),
                            priority: priority_of(output),
                            source: ActionSource::Queued,
                        });
                    }
                }
                TargetStatus::QueuedForPostprocess { code, .. } => {
                    postprocess_actions.push(Action::NeedsPostprocess {
                        output: output.clone(),
                        priority: priority_of(output),
                        code: code.clone(),
                    });
                }
                TargetStatus::Interrupted => {
                    if include_interrupted {
                        if slot_taken {
                            queue_actions.push(Action::QueueForElmMake { output: output.clone() });
                        } else {
                            elm_make_actions.push(Action::NeedsElmMake {
                                output: output.clone(),
                                priority: priority_of(output),
                                source: ActionSource::Dirty,
                            });
                        }
                    }
                }
                status if target.dirty && (matches!(status, TargetStatus::Success { .. } | TargetStatus::NotWrittenToDisk) || status.is_error()) => {
                    if slot_taken {
                        queue_actions.push(Action::QueueForElmMake { output: output.clone() });
                    } else {
                        elm_make_actions.push(Action::NeedsElmMake {
                            output: output.clone(),
                            priority: priority_of(output),
                            source: ActionSource::Dirty,
                        });
                    }
                }
                _ => typecheck_candidates.push(output.clone()),
            }
        }

        if !typecheck_candidates.is_empty() && !slot_taken {
            typecheck_actions.push(Action::NeedsElmMakeTypecheckOnly { group: group.package_manifest_path.clone() });
        }
    }

    elm_make_actions.sort_by(|a, b| b.priority().cmp(&a.priority()));
    postprocess_actions.sort_by(|a, b| b.priority().cmp(&a.priority()));

    let ordered_elm_make_family: Vec<Action> = match run_mode {
        RunMode::Make => elm_make_actions.into_iter().chain(typecheck_actions.into_iter()).collect(),
        RunMode::Hot => elm_make_actions.into_iter().chain(typecheck_actions.into_iter()).collect(),
    };

    let budget = max_parallel.saturating_sub(num_executing);
    let mut dispatched: Vec<Action> = Vec::new();
    let mut demoted: Vec<Action> = Vec::new();
    for (i, action) in ordered_elm_make_family.into_iter().enumerate() {
        if i < budget {
            dispatched.push(action);
        } else {
            match action {
                Action::NeedsElmMake { output, .. } => demoted.push(Action::QueueForElmMake { output }),
                other => dispatched.push(other), // typecheck-only actions are never demoted (§4.I step 4)
            }
        }
    }

    let mut result = Vec::new();
    match run_mode {
        RunMode::Make => {
            result.extend(dispatched);
            // Fail-fast (§7/§8): once any target in the batch has errored, make
            // mode never runs post-process for the rest of the batch.
            if !any_error {
                result.extend(postprocess_actions);
            }
        }
        RunMode::Hot => {
            result.extend(postprocess_actions);
            result.extend(dispatched);
        }
    }
    result.extend(queue_actions);
    result.extend(demoted);
    result
}

fn now_millis() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_millis() as u64).unwrap_or(0)
}

/// Writes `contents` to a sibling temporary path and renames it into place
/// (§4.F/§5: "Output writing uses a temporary path + rename to provide atomic
/// replacement" -- a crash or interrupted write must never leave a partial
/// file visible at `path`, since a connected browser may be reading it).
fn write_output_atomically(path: &Path, contents: impl AsRef<[u8]>) -> std::io::Result<()> {
    let file_name = path.file_name().unwrap_or_default().to_string_lossy();
    let tmp_name = format!(".{file_name}.tmp-{}-{}", std::process::id(), now_millis());
    let tmp_path = path.with_file_name(tmp_name);
    std::fs::write(&tmp_path, contents)?;
    std::fs::rename(&tmp_path, path)
}

/// Executes a single [`Action::QueueForElmMake`] — pure state transition, no I/O.
pub fn handle_queue_for_elm_make(target: &mut TargetState) {
    target.status = TargetStatus::QueuedForElmMake;
}

/// Executes a single [`Action::NeedsElmMake`] (§4.I: spawn compiler and
/// compute related files in parallel, then combine the two outcomes).
#[instrument(skip_all, fields(output = %target.output.display()))]
pub async fn handle_needs_elm_make(
    target: &mut TargetState,
    group_source_directories: &[AbsPath],
    run_mode: RunMode,
    env: &Env,
    diagnostic_dir: &Path,
    postprocess_argv: Option<&[String]>,
    websocket: Option<(u16, &str)>,
) -> Result<(), crate::error::Error> {
    target.dirty = false;
    target.status = TargetStatus::ElmMake { mode: target.compilation_mode };

    let inputs: Vec<AbsPath> = target.inputs.iter().map(|i| i.realpath.clone()).collect();
    let req = CompileRequest {
        mode: Some(target.compilation_mode),
        inputs: inputs.clone(),
        output_path: target.output.clone(),
    };
    let (_kill_switch, kill_rx) = compiler::kill_switch();

    let compile_fut = compiler::make(&req, env, kill_rx);
    let walk_fut = async { walker::walk_imports(group_source_directories, &inputs) };
    let (compile_result, walk_result) = tokio::join!(compile_fut, walk_fut);

    if target.dirty {
        target.status = TargetStatus::Interrupted;
        return Ok(());
    }

    match walk_result {
        WalkResult::Success { related } => target.related_files = related,
        WalkResult::FsError { partial_related, .. } => {
            if target.related_files.is_empty() {
                target.related_files = inputs.iter().cloned().collect();
            } else {
                target.related_files.extend(partial_related);
            }
        }
    }

    let outcome = match compile_result? {
        CommandOutcome::Killed => {
            target.status = TargetStatus::Interrupted;
            return Ok(());
        }
        CommandOutcome::Completed(outcome) => outcome,
    };

    match outcome {
        CompileOutcome::Success => {
            let code = std::fs::read_to_string(&target.output).unwrap_or_default();
            finish_successful_compile(target, code, run_mode, diagnostic_dir, postprocess_argv, websocket)?;
        }
        CompileOutcome::ElmMakeError(report) => {
            target.status = TargetStatus::ElmMakeError(format!("{:?}", report.kind));
        }
        CompileOutcome::ElmMakeCrashError { text, .. } => {
            target.status = TargetStatus::ElmMakeCrashError(text);
        }
        CompileOutcome::ElmMakeJsonParseError { text, .. } => {
            target.status = TargetStatus::ElmMakeJsonParseError(text);
        }
        CompileOutcome::UnexpectedElmMakeOutput { exit_reason, .. } => {
            target.status = TargetStatus::ElmMakeError(exit_reason);
        }
    }
    Ok(())
}

fn finish_successful_compile(
    target: &mut TargetState,
    code: String,
    run_mode: RunMode,
    diagnostic_dir: &Path,
    postprocess_argv: Option<&[String]>,
    websocket: Option<(u16, &str)>,
) -> Result<(), crate::error::Error> {
    let code = if run_mode == RunMode::Hot {
        inject::inject(&code, target.compilation_mode, &target.name, diagnostic_dir)?
    } else {
        code
    };

    if let Some(argv) = postprocess_argv {
        target.status =
            TargetStatus::QueuedForPostprocess { postprocess_argv: argv.to_vec(), code };
        return Ok(());
    }

    let final_code = if let Some((port, token)) = websocket {
        let identifier = inject::versioned_identifier(env!("CARGO_PKG_VERSION"), &target.name, port, token);
        format!("{identifier}{code}")
    } else {
        code
    };
    let file_size = final_code.len() as u64;
    write_output_atomically(&target.output, final_code)
        .map_err(|source| crate::error::Error::Io { path: target.output.clone(), source })?;
    target.status = TargetStatus::Success { file_size, compiled_timestamp: now_millis() };
    Ok(())
}

/// Executes a single [`Action::NeedsPostprocess`] (§4.I / §4.H).
#[instrument(skip_all, fields(output = %target.output.display()))]
pub async fn handle_needs_postprocess(
    target: &mut TargetState,
    pool: &PostprocessPool,
    run_mode: RunMode,
) -> Result<(), crate::error::Error> {
    let (postprocess_argv, code) = match &target.status {
        TargetStatus::QueuedForPostprocess { postprocess_argv, code } => {
            (postprocess_argv.clone(), code.clone())
        }
        _ => return Ok(()),
    };
    target.dirty = false;
    target.status = TargetStatus::Postprocess;

    let request = PostprocessRequest {
        code,
        target_name: target.name.clone(),
        compilation_mode: target.compilation_mode,
        run_mode,
        postprocess_argv,
    };
    match pool.run(request).await {
        Ok(transformed) => {
            let file_size = transformed.len() as u64;
            write_output_atomically(&target.output, transformed)
                .map_err(|source| crate::error::Error::Io { path: target.output.clone(), source })?;
            target.status = TargetStatus::Success { file_size, compiled_timestamp: now_millis() };
        }
        Err(err) => target.status = TargetStatus::PostprocessError(err.to_string()),
    }
    Ok(())
}

/// Executes a single [`Action::NeedsElmMakeTypecheckOnly`] (§4.I step
/// "NeedsElmMakeTypecheckOnly{group}"): one compiler run over the
/// deduplicated-by-realpath union of the group's inputs, writing a proxy file
/// per target only when its on-disk identifier prefix is stale.
#[instrument(skip_all)]
pub async fn handle_needs_elm_make_typecheck_only(
    group: &mut TargetGroup,
    env: &Env,
    expected_identifier: &str,
) -> Result<(), crate::error::Error> {
    let mut seen = std::collections::HashSet::new();
    let mut union_inputs = Vec::new();
    for target in group.targets.values() {
        for input in &target.inputs {
            if seen.insert(input.realpath.clone()) {
                union_inputs.push(input.realpath.clone());
            }
        }
    }

    for target in group.targets.values_mut() {
        target.status = TargetStatus::ElmMakeTypecheckOnly;
    }

    let req = CompileRequest { mode: None, inputs: union_inputs.clone(), output_path: AbsPath::from(compiler::DEV_NULL) };
    let (_kill_switch, kill_rx) = compiler::kill_switch();
    let compile_outcome = compiler::make(&req, env, kill_rx).await?;

    for (output, target) in group.targets.iter_mut() {
        let target_inputs: Vec<AbsPath> = target.inputs.iter().map(|i| i.realpath.clone()).collect();
        let walk = walker::walk_imports(&group.source_directories, &target_inputs);
        match &walk {
            WalkResult::Success { related } => target.related_files = related.clone(),
            WalkResult::FsError { error, .. } => {
                target.status = TargetStatus::WalkError(error.to_string());
                continue;
            }
        }

        match &compile_outcome {
            CommandOutcome::Killed => target.status = TargetStatus::Interrupted,
            CommandOutcome::Completed(CompileOutcome::Success) => {
                let needs_write = match std::fs::read(output) {
                    Ok(existing) => inject::needs_proxy_rewrite(&existing, expected_identifier),
                    Err(_) => true,
                };
                if needs_write {
                    if let Err(source) = std::fs::write(output, expected_identifier) {
                        target.status = TargetStatus::WalkError(source.to_string());
                        continue;
                    }
                }
                target.status = TargetStatus::Success { file_size: expected_identifier.len() as u64, compiled_timestamp: now_millis() };
            }
            CommandOutcome::Completed(other) => {
                target.status = TargetStatus::ElmMakeError(format!("{other:?}"));
            }
        }
    }
    Ok(())
}
