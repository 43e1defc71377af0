//! Crate-wide error type.

use thiserror::Error;

/// Catch-all error for this crate.
///
/// Per the error-handling policy of the reconstruction kernel, only configuration, collection
/// resolution, and malformed-input problems are ever surfaced as an [`Error`]. Numerical
/// conditions encountered while processing an event (non-convergent annealing, divide-by-zero,
/// degenerate geometry) are recovered locally and never reach this type.
#[derive(Debug, Error)]
pub enum Error {
    /// A required configuration parameter was missing, or present with the wrong type. Fatal at
    /// `Module::init`.
    #[error("configuration error in module `{module}`: {message}")]
    Configuration {
        /// Name of the module instance that failed to initialize.
        module: String,
        /// Human-readable description of the problem.
        message: String,
    },
    /// A module referenced a collection name that no producer has registered. Fatal at
    /// `Module::init`.
    #[error("unknown collection `{name}` requested by module `{module}`")]
    UnknownCollection {
        /// Name of the module instance that requested the collection.
        module: String,
        /// The collection name that could not be resolved.
        name: String,
    },
    /// An input record was structurally invalid (e.g. a dangling mother/daughter index). Fatal
    /// to the event; the run aborts.
    #[error("malformed input record: {0}")]
    MalformedInput(String),
}

/// Specialized `Result` alias used throughout this crate.
pub type Result<T> = std::result::Result<T, Error>;
