//! Error types for the layout engine.
//!
//! Only structural problems abort a pass. Everything else (a tie whose end
//! note is gone, a spring set with no stretch) is logged and skipped so that
//! one bad element cannot blank the whole score.

use thiserror::Error;

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, LayoutError>;

#[derive(Debug, Error)]
pub enum LayoutError {
    /// The score graph is corrupted (segments out of order, duplicate slots,
    /// elements outside their measure).
    #[error("structural inconsistency: {0}")]
    Structure(String),

    /// A system was closed without any measure or frame in it.
    #[error("system {0} has no measures")]
    EmptySystem(usize),

    /// The style table could not be parsed.
    #[error("invalid style table: {0}")]
    InvalidStyle(#[source] serde_json::Error),

    /// A measure index does not name a measure (or names a frame).
    #[error("no measure at index {0}")]
    InvalidMeasure(usize),

    /// A chord/rest id is stale or was never issued.
    #[error("unknown chord/rest id")]
    InvalidChordRest,

    /// Track index beyond `staves * VOICES`.
    #[error("track {0} out of range")]
    InvalidTrack(usize),

    /// Layout snapshot could not be encoded.
    #[error("serialization failed: {0}")]
    Serialize(#[source] serde_json::Error),
}
