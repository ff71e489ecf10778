//! Component H: the post-process worker pool. Runs the project's configured
//! `postprocess` argv once per compile, each invocation isolated as its own
//! OS subprocess rather than an in-process worker, reusing Component F's
//! spawn/classify/kill machinery (§4.H: "keeps user postprocess code out of
//! the orchestrator's address space... without inventing a second IPC
//! mechanism").

use std::{io, path::PathBuf};

use thiserror::Error;
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    process::Command,
    sync::Semaphore,
};

use crate::config::{CompilationMode, RunMode};

#[derive(Debug, Error)]
pub enum PostprocessError {
    #[error("postprocess script not found: {0}")]
    ElmWatchNodeMissingScript(PathBuf),

    #[error("failed to run postprocess for {script}: {message}")]
    ElmWatchNodeImportError { script: PathBuf, message: String },

    #[error("postprocess default export in {script} is not callable")]
    ElmWatchNodeDefaultExportNotFunction { script: PathBuf },

    #[error("postprocess command failed to run: {0}")]
    ElmWatchNodeRunError(#[source] io::Error),

    #[error("postprocess for {script} returned a non-string value: {value_preview}")]
    ElmWatchNodeBadReturnValue { script: PathBuf, value_preview: String },

    #[error("failed to write postprocess input: {0}")]
    PostprocessStdinWriteError(#[source] io::Error),

    #[error("postprocess exited with status {exit_reason}: {stderr}")]
    PostprocessNonZeroExit { exit_reason: String, stderr: String },
}

/// What a worker receives, mirroring §4.H's `postprocess({code, targetName,
/// compilationMode, runMode, userArgs})` shape. Sent to the subprocess on
/// stdin as one JSON line; the subprocess's own argv is `postprocess_argv`
/// plus `targetName`/`compilationMode`/`runMode` appended as trailing args,
/// matching how Component F passes compiler flags on the command line rather
/// than over a side channel.
#[derive(Debug, Clone)]
pub struct PostprocessRequest {
    pub code: String,
    pub target_name: String,
    pub compilation_mode: CompilationMode,
    pub run_mode: RunMode,
    pub postprocess_argv: Vec<String>,
}

fn run_mode_flag(mode: RunMode) -> &'static str {
    match mode {
        RunMode::Make => "make",
        RunMode::Hot => "hot",
    }
}

fn build_argv(req: &PostprocessRequest) -> Vec<String> {
    let mut argv = req.postprocess_argv.clone();
    argv.push(req.target_name.clone());
    argv.push(req.compilation_mode.cli_flag().unwrap_or("standard").to_string());
    argv.push(run_mode_flag(req.run_mode).to_string());
    argv
}

/// Runs one postprocess invocation to completion. The first argv element is
/// the program to run (consistent with `postprocess.argv[0]` being a script
/// interpreter or a compiled binary, per §6.1's manifest shape); the script
/// itself receives `code` on stdin and must print the transformed code to
/// stdout, exiting non-zero on failure.
#[instrument(skip_all, fields(target = %req.target_name, mode = ?req.compilation_mode))]
async fn run_one(req: &PostprocessRequest) -> Result<String, PostprocessError> {
    let argv = build_argv(req);
    let (program, args) = argv
        .split_first()
        .ok_or_else(|| PostprocessError::ElmWatchNodeMissingScript(PathBuf::new()))?;

    debug!(?argv, "spawning postprocess");

    let mut cmd = Command::new(program);
    cmd.args(args)
        .stdin(std::process::Stdio::piped())
        .stdout(std::process::Stdio::piped())
        .stderr(std::process::Stdio::piped());

    let mut child = cmd.spawn().map_err(|source| {
        if source.kind() == io::ErrorKind::NotFound {
            PostprocessError::ElmWatchNodeMissingScript(PathBuf::from(program))
        } else {
            PostprocessError::ElmWatchNodeRunError(source)
        }
    })?;

    let mut stdin = child.stdin.take().expect("piped stdin");
    let code = req.code.clone();
    let write_task = tokio::spawn(async move {
        let result = stdin.write_all(code.as_bytes()).await;
        drop(stdin);
        result
    });

    let mut stdout_pipe = child.stdout.take().expect("piped stdout");
    let mut stderr_pipe = child.stderr.take().expect("piped stderr");
    let stdout_task = tokio::spawn(async move {
        let mut buf = Vec::new();
        let _ = stdout_pipe.read_to_end(&mut buf).await;
        buf
    });
    let stderr_task = tokio::spawn(async move {
        let mut buf = Vec::new();
        let _ = stderr_pipe.read_to_end(&mut buf).await;
        buf
    });

    write_task
        .await
        .map_err(|e| PostprocessError::ElmWatchNodeRunError(io::Error::other(e)))?
        .map_err(PostprocessError::PostprocessStdinWriteError)?;

    let status = child.wait().await.map_err(PostprocessError::ElmWatchNodeRunError)?;
    let stdout = stdout_task.await.unwrap_or_default();
    let stderr = stderr_task.await.unwrap_or_default();

    if !status.success() {
        return Err(PostprocessError::PostprocessNonZeroExit {
            exit_reason: status.code().map(|c| c.to_string()).unwrap_or_else(|| "signal".to_string()),
            stderr: String::from_utf8_lossy(&stderr).into_owned(),
        });
    }

    String::from_utf8(stdout).map_err(|err| PostprocessError::ElmWatchNodeBadReturnValue {
        script: PathBuf::from(program),
        value_preview: format!("{:.120}", String::from_utf8_lossy(err.as_bytes())),
    })
}

/// A bounded pool of postprocess slots (§4.H: "lazy creation up to
/// maxParallel... workers outlive individual targets"). Backed by a
/// `tokio::sync::Semaphore` rather than a fixed set of pre-spawned
/// subprocesses: each call spawns its own short-lived process, but never more
/// than `max_parallel` run concurrently, which gives the same externally
/// observable bound without keeping idle subprocess handles alive between
/// compiles.
#[derive(Debug)]
pub struct PostprocessPool {
    semaphore: Semaphore,
}

impl PostprocessPool {
    pub fn new(max_parallel: usize) -> Self {
        Self { semaphore: Semaphore::new(max_parallel.max(1)) }
    }

    #[instrument(skip_all, fields(target = %req.target_name))]
    pub async fn run(&self, req: PostprocessRequest) -> Result<String, PostprocessError> {
        let _permit = self.semaphore.acquire().await.expect("semaphore is never closed");
        run_one(&req).await
    }
}
