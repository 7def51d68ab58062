//! Error types for Strata core.

use std::io;
use strata_codec::CodecError;
use strata_storage::StorageError;
use thiserror::Error;

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors that can occur in Strata core operations.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Bad or missing name, config field, or key arity for the operator kind.
    #[error("configuration error: {message}")]
    Configuration {
        /// Description of the problem.
        message: String,
    },

    /// Unknown operator or index column.
    #[error("{what} not found: {name}")]
    NotFound {
        /// What was looked up.
        what: &'static str,
        /// The name that was not found.
        name: String,
    },

    /// Operation on a closed operator, cursor, handle or manager.
    #[error("{name} is closed")]
    AlreadyClosed {
        /// Name of the closed resource.
        name: String,
    },

    /// A key or index value does not fit its declared type.
    #[error("type mismatch: {message}")]
    TypeMismatch {
        /// Description of the mismatch.
        message: String,
    },

    /// A backup stream or stored record could not be read back.
    #[error("corrupt data: {message}")]
    CorruptData {
        /// Description of the corruption.
        message: String,
    },

    /// Every sequence id of this machine id has been handed out.
    #[error("sequence ids exhausted for machine {machine_id}")]
    IdsExhausted {
        /// Machine id of the generator.
        machine_id: u16,
    },

    /// The engine failed while serving an operator.
    #[error("engine error in operator {operator}: {source}")]
    Engine {
        /// Operator the call was made for.
        operator: String,
        /// The engine error.
        #[source]
        source: StorageError,
    },

    /// Storage engine error outside any operator.
    #[error("storage error: {0}")]
    Storage(StorageError),

    /// Codec error that is not a type mismatch.
    #[error("codec error: {0}")]
    Codec(CodecError),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl CoreError {
    /// Creates a configuration error.
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Creates a not-found error.
    pub fn not_found(what: &'static str, name: impl Into<String>) -> Self {
        Self::NotFound {
            what,
            name: name.into(),
        }
    }

    /// Creates a not-found error for an operator.
    pub fn operator_not_found(name: impl Into<String>) -> Self {
        Self::not_found("operator", name)
    }

    /// Creates a not-found error for an index column.
    pub fn index_not_found(path: &[String]) -> Self {
        Self::not_found("index", path.join("."))
    }

    /// Creates an already-closed error.
    pub fn already_closed(name: impl Into<String>) -> Self {
        Self::AlreadyClosed { name: name.into() }
    }

    /// Creates a type mismatch error.
    pub fn type_mismatch(message: impl Into<String>) -> Self {
        Self::TypeMismatch {
            message: message.into(),
        }
    }

    /// Creates a corrupt data error.
    pub fn corrupt_data(message: impl Into<String>) -> Self {
        Self::CorruptData {
            message: message.into(),
        }
    }

    /// Whether this error signals caller misuse that retrying cannot fix.
    pub fn is_programming_error(&self) -> bool {
        matches!(
            self,
            Self::Configuration { .. } | Self::NotFound { .. } | Self::TypeMismatch { .. }
        )
    }

    /// Whether this error is an operational condition to report and abort.
    pub fn is_operational(&self) -> bool {
        !self.is_programming_error()
    }
}

impl From<CodecError> for CoreError {
    fn from(err: CodecError) -> Self {
        match err {
            CodecError::TypeMismatch { .. } | CodecError::InvalidCoordinate { .. } => {
                Self::type_mismatch(err.to_string())
            }
            other => Self::Codec(other),
        }
    }
}

impl From<StorageError> for CoreError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::Closed => Self::already_closed("engine"),
            other => Self::Storage(other),
        }
    }
}

/// Attaches the operator name to engine failures.
pub(crate) trait EngineContext<T> {
    /// Maps an engine error to the matching [`CoreError`] for `operator`.
    fn for_operator(self, operator: &str) -> CoreResult<T>;
}

impl<T> EngineContext<T> for Result<T, StorageError> {
    fn for_operator(self, operator: &str) -> CoreResult<T> {
        self.map_err(|err| match err {
            StorageError::Closed => CoreError::already_closed(operator),
            StorageError::TreeNotFound(_) => CoreError::operator_not_found(operator),
            source => CoreError::Engine {
                operator: operator.to_string(),
                source,
            },
        })
    }
}
