use thiserror::Error;

/// Errors surfaced by the container's fallible operations.
///
/// Structural failures (per-block memory exhaustion) are not represented
/// here; they panic, since no caller can meaningfully recover from them.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// A particle record in an import stream was truncated or failed to
    /// parse as `id x y` (`id x y r` for the radius-carrying container).
    #[error("particle import error: {0}")]
    Import(String),

    /// The underlying stream failed.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}
