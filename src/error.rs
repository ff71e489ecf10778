use thiserror::Error;

use crate::{
    compiler::CompilerError, inject::InjectError, postprocess::PostprocessError, resolver::ResolveError,
    stuff::StuffError, walker::WalkError,
};

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Crate-wide error, unifying every component's own error enum.
///
/// Each component keeps a tightly-scoped error type of its own (`ResolveError`,
/// `CompilerError`, ...) so callers deep inside a component can match on exactly
/// the variants that component can produce; this wraps them all with `#[from]` so
/// that code which only cares about propagating an error with `?` can do so without
/// threading a dozen `From` impls by hand.
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Resolve(#[from] ResolveError),

    #[error(transparent)]
    Compiler(#[from] CompilerError),

    #[error(transparent)]
    Inject(#[from] InjectError),

    #[error(transparent)]
    Walk(#[from] WalkError),

    #[error(transparent)]
    Postprocess(#[from] PostprocessError),

    #[error(transparent)]
    Stuff(#[from] StuffError),

    #[error("failed to read {path}")]
    Io {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}
