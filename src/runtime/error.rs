//! Error types for the deckhand engine
//!
//! Two layers live here. [`ApiError`] is what a controller sees: a stable
//! [`ErrorCode`], a message, and optional structured context, rendered as an
//! [`ErrorResponse`] line. The `thiserror` enums below it cover internal
//! failures (sockets, the run log, checkpoint storage, configuration) and are
//! mapped onto codes where they reach the wire.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::io;
use std::path::PathBuf;
use thiserror::Error;

use crate::sim::Phase;

/// Stable error codes sent as `error_code`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorCode {
    /// Frame is not JSON, or not a JSON object.
    #[serde(rename = "E001")]
    InvalidEnvelope,
    /// Envelope has no usable `name`.
    #[serde(rename = "E002")]
    MissingName,
    /// Envelope has no `arguments`.
    #[serde(rename = "E003")]
    MissingArguments,
    /// `name` is not a registered command.
    #[serde(rename = "E004")]
    UnknownCommand,
    /// `arguments` is not an object.
    #[serde(rename = "E005")]
    InvalidArguments,
    /// Listener could not be created.
    #[serde(rename = "E006")]
    SocketCreateFailed,
    /// Listener could not bind its address.
    #[serde(rename = "E007")]
    SocketBindFailed,
    /// Accept, send, or receive failed.
    #[serde(rename = "E008")]
    ConnectionFailed,
    /// Command is not legal in the current phase.
    #[serde(rename = "E009")]
    InvalidPhase,
    /// Argument missing, mistyped, or semantically invalid.
    #[serde(rename = "E010")]
    InvalidParameter,
    /// Index or count outside its legal range.
    #[serde(rename = "E011")]
    ParameterOutOfRange,
    /// Required game object (joker, consumable, checkpoint) absent.
    #[serde(rename = "E012")]
    MissingGameObject,
    /// Named resource (deck, challenge) does not exist.
    #[serde(rename = "E013")]
    ResourceNotFound,
    /// Card selection repeats an index.
    #[serde(rename = "E014")]
    InvalidCardIndex,
    /// Discard requested with none left.
    #[serde(rename = "E015")]
    NoDiscardsLeft,
    /// Action not currently permitted (cannot afford, slots full).
    #[serde(rename = "E016")]
    InvalidAction,
    /// Accepted command never settled before its deadline.
    #[serde(rename = "E017")]
    CompletionTimeout,
    /// Same command already awaiting completion.
    #[serde(rename = "E018")]
    CommandPending,
    /// Accepted command was invalidated by a reset.
    #[serde(rename = "E019")]
    CompletionAborted,
}

/// Broad family an [`ErrorCode`] belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Malformed frames and envelopes.
    Protocol,
    /// Socket level failures.
    Network,
    /// Phase and argument validation.
    Validation,
    /// Game resources and legality.
    Domain,
    /// Deferred completion failures.
    Completion,
}

impl ErrorCode {
    /// Every code, in wire order.
    pub const ALL: [ErrorCode; 19] = [
        ErrorCode::InvalidEnvelope,
        ErrorCode::MissingName,
        ErrorCode::MissingArguments,
        ErrorCode::UnknownCommand,
        ErrorCode::InvalidArguments,
        ErrorCode::SocketCreateFailed,
        ErrorCode::SocketBindFailed,
        ErrorCode::ConnectionFailed,
        ErrorCode::InvalidPhase,
        ErrorCode::InvalidParameter,
        ErrorCode::ParameterOutOfRange,
        ErrorCode::MissingGameObject,
        ErrorCode::ResourceNotFound,
        ErrorCode::InvalidCardIndex,
        ErrorCode::NoDiscardsLeft,
        ErrorCode::InvalidAction,
        ErrorCode::CompletionTimeout,
        ErrorCode::CommandPending,
        ErrorCode::CompletionAborted,
    ];

    /// Wire string (`E001`).
    pub const fn as_str(self) -> &'static str {
        match self {
            ErrorCode::InvalidEnvelope => "E001",
            ErrorCode::MissingName => "E002",
            ErrorCode::MissingArguments => "E003",
            ErrorCode::UnknownCommand => "E004",
            ErrorCode::InvalidArguments => "E005",
            ErrorCode::SocketCreateFailed => "E006",
            ErrorCode::SocketBindFailed => "E007",
            ErrorCode::ConnectionFailed => "E008",
            ErrorCode::InvalidPhase => "E009",
            ErrorCode::InvalidParameter => "E010",
            ErrorCode::ParameterOutOfRange => "E011",
            ErrorCode::MissingGameObject => "E012",
            ErrorCode::ResourceNotFound => "E013",
            ErrorCode::InvalidCardIndex => "E014",
            ErrorCode::NoDiscardsLeft => "E015",
            ErrorCode::InvalidAction => "E016",
            ErrorCode::CompletionTimeout => "E017",
            ErrorCode::CommandPending => "E018",
            ErrorCode::CompletionAborted => "E019",
        }
    }

    /// Family of this code.
    pub const fn category(self) -> ErrorCategory {
        match self {
            ErrorCode::InvalidEnvelope
            | ErrorCode::MissingName
            | ErrorCode::MissingArguments
            | ErrorCode::UnknownCommand
            | ErrorCode::InvalidArguments => ErrorCategory::Protocol,
            ErrorCode::SocketCreateFailed
            | ErrorCode::SocketBindFailed
            | ErrorCode::ConnectionFailed => ErrorCategory::Network,
            ErrorCode::InvalidPhase
            | ErrorCode::InvalidParameter
            | ErrorCode::ParameterOutOfRange
            | ErrorCode::MissingGameObject => ErrorCategory::Validation,
            ErrorCode::ResourceNotFound
            | ErrorCode::InvalidCardIndex
            | ErrorCode::NoDiscardsLeft
            | ErrorCode::InvalidAction => ErrorCategory::Domain,
            ErrorCode::CompletionTimeout
            | ErrorCode::CommandPending
            | ErrorCode::CompletionAborted => ErrorCategory::Completion,
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error reported to the controller.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("{code}: {message}")]
pub struct ApiError {
    /// Stable code.
    pub code: ErrorCode,
    /// Human-readable message.
    pub message: String,
    /// Structured details.
    pub context: Option<Map<String, Value>>,
}

impl ApiError {
    /// Error without context.
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            context: None,
        }
    }

    /// Attach a context field.
    pub fn with(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.context
            .get_or_insert_with(Map::new)
            .insert(key.to_string(), value.into());
        self
    }

    /// `InvalidPhase` carrying the phase the command arrived in.
    pub fn invalid_phase(message: impl Into<String>, current: Phase) -> Self {
        Self::new(ErrorCode::InvalidPhase, message).with("current_state", current.code())
    }

    /// `InvalidParameter` for an absent required field.
    pub fn missing_field(field: &str) -> Self {
        Self::new(
            ErrorCode::InvalidParameter,
            format!("Missing required field: {field}"),
        )
        .with("field", field)
    }

    /// `InvalidParameter` for a field of the wrong type.
    pub fn wrong_type(field: &str, expected: &str) -> Self {
        Self::new(ErrorCode::InvalidParameter, "Invalid parameter type")
            .with("field", field)
            .with("expected", expected)
    }

    /// Render for the wire, stamping the current phase.
    pub fn into_response(self, phase: Phase) -> ErrorResponse {
        ErrorResponse {
            error: self.message,
            error_code: self.code,
            state: phase,
            context: self.context,
        }
    }
}

/// Wire form of an error.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Message.
    pub error: String,
    /// Code.
    pub error_code: ErrorCode,
    /// Phase when the error was produced.
    pub state: Phase,
    /// Details, omitted when empty.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<Map<String, Value>>,
}

/// Top-level engine error
#[derive(Debug, Error)]
pub enum RuntimeError {
    /// Transport errors
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// Run log errors
    #[error("Journal error: {0}")]
    Journal(#[from] JournalError),

    /// Checkpoint storage errors
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
}

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Setting has a value that cannot be used
    #[error("Invalid value for {key}: {value:?}")]
    InvalidValue {
        /// Setting name
        key: &'static str,
        /// Offending value
        value: String,
    },
}

/// Transport failures
#[derive(Debug, Error)]
pub enum TransportError {
    /// Listener could not be configured
    #[error("Failed to create listener: {0}")]
    SocketCreate(#[source] io::Error),

    /// Listener could not bind
    #[error("Failed to bind {addr}: {source}")]
    Bind {
        /// Requested address
        addr: String,
        /// Underlying error
        #[source]
        source: io::Error,
    },

    /// Connection-level I/O failure
    #[error("Connection failed: {0}")]
    Io(#[from] io::Error),

    /// Inbound line exceeded the frame limit
    #[error("Frame exceeds {limit} bytes")]
    FrameTooLarge {
        /// Limit in bytes
        limit: usize,
    },

    /// No active connection matches the target
    #[error("No active connection")]
    NotConnected,
}

impl TransportError {
    /// Wire code for this failure.
    pub fn code(&self) -> ErrorCode {
        match self {
            TransportError::SocketCreate(_) => ErrorCode::SocketCreateFailed,
            TransportError::Bind { .. } => ErrorCode::SocketBindFailed,
            TransportError::Io(_) | TransportError::NotConnected => ErrorCode::ConnectionFailed,
            TransportError::FrameTooLarge { .. } => ErrorCode::InvalidEnvelope,
        }
    }
}

/// Run log errors
#[derive(Debug, Error)]
pub enum JournalError {
    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// Entry could not be encoded
    #[error("Entry encoding failed: {0}")]
    Encoding(#[source] serde_json::Error),

    /// Line could not be decoded
    #[error("Invalid entry at line {line}: {source}")]
    Decoding {
        /// 1-based line number
        line: usize,
        /// Parse error
        #[source]
        source: serde_json::Error,
    },

    /// `state_before` of an entry differs from the previous `state_after`
    #[error("Chain broken at entry {index}")]
    ChainBroken {
        /// 0-based entry index
        index: usize,
    },
}

/// Checkpoint storage errors
#[derive(Debug, Error)]
pub enum StorageError {
    /// Name contains characters outside `[A-Za-z0-9_-]`
    #[error("Invalid checkpoint name: {0:?}")]
    InvalidName(String),

    /// No checkpoint with this name
    #[error("Checkpoint not found: {0}")]
    NotFound(String),

    /// Stored digest does not match the payload
    #[error("Checkpoint {name} is corrupted")]
    Corrupted {
        /// Checkpoint name
        name: String,
    },

    /// File could not be read or written
    #[error("IO error on {path:?}: {source}")]
    Io {
        /// Path involved
        path: PathBuf,
        /// Underlying error
        #[source]
        source: io::Error,
    },

    /// Checkpoint file is not valid JSON
    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

impl From<StorageError> for ApiError {
    fn from(err: StorageError) -> Self {
        let message = err.to_string();
        match err {
            StorageError::InvalidName(name) => {
                ApiError::new(ErrorCode::InvalidParameter, message).with("name", name)
            }
            StorageError::NotFound(name) => {
                ApiError::new(ErrorCode::MissingGameObject, message).with("name", name)
            }
            StorageError::Corrupted { name } => {
                ApiError::new(ErrorCode::InvalidAction, message).with("name", name)
            }
            StorageError::Io { .. } | StorageError::Serde(_) => {
                ApiError::new(ErrorCode::InvalidAction, message)
            }
        }
    }
}

/// Result type for engine operations
pub type Result<T> = std::result::Result<T, RuntimeError>;

/// Result type for run log operations
pub type JournalResult<T> = std::result::Result<T, JournalError>;

/// Result type for storage operations
pub type StorageResult<T> = std::result::Result<T, StorageError>;
