//! Typed environment/configuration surface (§6.5) plus the small runtime-mode enums
//! threaded through every component, the way the teacher threads its `Compiler`/
//! `ArtifactOutput` type parameters — except here the values are chosen at runtime,
//! not at compile time, since a target's [`CompilationMode`] can change mid-session
//! via a hot client message.

use std::{path::PathBuf, time::Duration};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    Make,
    Hot,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompilationMode {
    Debug,
    Standard,
    Optimize,
}

impl CompilationMode {
    pub fn cli_flag(self) -> Option<&'static str> {
        match self {
            Self::Debug => Some("--debug"),
            Self::Standard => None,
            Self::Optimize => Some("--optimize"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BrowserUiPosition {
    TopLeft,
    TopRight,
    BottomLeft,
    BottomRight,
}

impl Default for BrowserUiPosition {
    fn default() -> Self {
        Self::BottomLeft
    }
}

/// Parsed form of the env vars recognized by §6.5. Constructed once at startup via
/// [`Env::from_process`]; downstream code takes this by value/reference rather than
/// reading `std::env` itself, so tests can construct a fixed [`Env`] instead of
/// mutating process-global state.
#[derive(Debug, Clone)]
pub struct Env {
    pub max_parallel: usize,
    pub elm_timeout: Duration,
    pub tmp_dir: Option<PathBuf>,
    pub loading_message_delay: Duration,
    pub no_color: bool,
    pub editor: Option<String>,
}

impl Default for Env {
    fn default() -> Self {
        Self {
            max_parallel: num_cpus::get(),
            elm_timeout: Duration::from_millis(10_000),
            tmp_dir: None,
            loading_message_delay: Duration::from_millis(100),
            no_color: false,
            editor: None,
        }
    }
}

impl Env {
    /// Reads the environment variables of §6.5 from the current process,
    /// falling back to [`Env::default`] field-by-field for anything unset or
    /// unparseable.
    pub fn from_process() -> Self {
        let defaults = Self::default();
        Self {
            max_parallel: std::env::var("ELM_WATCH_MAX_PARALLEL")
                .ok()
                .and_then(|s| s.parse().ok())
                .filter(|&n: &usize| n > 0)
                .unwrap_or(defaults.max_parallel),
            elm_timeout: std::env::var("__ELM_WATCH_ELM_TIMEOUT")
                .ok()
                .and_then(|s| s.parse().ok())
                .map(Duration::from_millis)
                .unwrap_or(defaults.elm_timeout),
            tmp_dir: std::env::var_os("__ELM_WATCH_TMP_DIR").map(PathBuf::from),
            loading_message_delay: std::env::var("__ELM_WATCH_LOADING_MESSAGE_DELAY")
                .ok()
                .and_then(|s| s.parse().ok())
                .map(Duration::from_millis)
                .unwrap_or(defaults.loading_message_delay),
            no_color: std::env::var_os("NO_COLOR").is_some(),
            editor: std::env::var("EDITOR").ok(),
        }
    }
}
