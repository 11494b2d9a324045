//! Error taxonomy for the analytics engines.
//!
//! Every engine either returns a complete, internally consistent table or
//! fails with one of these variants. The computation is deterministic, so
//! callers should not retry a failed run; the only recovery is corrected
//! input or adjusted parameters.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    /// Malformed, empty, or insufficiently diverse input.
    #[error("input error: {0}")]
    Input(String),

    /// Quintile binning could not produce five valid bins.
    #[error("scoring error: {dimension}: {reason}")]
    Scoring {
        /// The RFM dimension whose distribution degenerated.
        dimension: &'static str,
        reason: String,
    },

    /// Invalid parameter relative to the data, e.g. more clusters than
    /// distinct customers.
    #[error("config error: {0}")]
    Config(String),
}

/// Common result type used throughout the engines
pub type Result<T> = std::result::Result<T, Error>;
