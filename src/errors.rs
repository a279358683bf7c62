//! Error types and failure categorization.
//!
//! Per-request failures ([`TaskError`]) are never fatal: they end up as the
//! error text of a failed outcome and are classified into an [`ErrorCategory`]
//! for metrics. Only [`ConfigError`] stops the run, and it is always returned
//! before any virtual user starts.

use std::fmt;
use thiserror::Error;

/// Failure of a single request or protocol step.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TaskError {
    /// Connection refused, DNS failure, timeout and similar.
    #[error("{message}")]
    Transport { message: String, timeout: bool },

    /// The server answered with a non-success status.
    #[error("HTTP {status}: {message}")]
    Status { status: u16, message: String },

    /// Unparsable body or missing expected field.
    #[error("{0}")]
    Protocol(String),

    /// HTTP 400 while polling a job; polling stops immediately.
    #[error("{0}")]
    TerminalPoll(String),
}

impl TaskError {
    /// Build a transport error from a reqwest error.
    ///
    /// The URL is stripped: it carries random coordinates and the API key,
    /// and failures are grouped by message.
    pub fn from_reqwest(error: reqwest::Error) -> Self {
        let timeout = error.is_timeout();
        let detail = if timeout {
            " (timed out)"
        } else if error.is_connect() {
            " (connection failed)"
        } else {
            ""
        };
        TaskError::Transport {
            message: format!("{}{}", error.without_url(), detail),
            timeout,
        }
    }

    pub fn category(&self) -> ErrorCategory {
        match self {
            TaskError::Transport { timeout: true, .. } => ErrorCategory::TimeoutError,
            TaskError::Transport { .. } => ErrorCategory::NetworkError,
            TaskError::Status { status, .. } => {
                ErrorCategory::from_status_code(*status).unwrap_or(ErrorCategory::OtherError)
            }
            TaskError::Protocol(_) => ErrorCategory::ProtocolError,
            TaskError::TerminalPoll(_) => ErrorCategory::ClientError,
        }
    }
}

/// Categories of errors that can occur during load testing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// HTTP 4xx errors (client errors)
    ClientError,

    /// HTTP 5xx errors (server errors)
    ServerError,

    /// Network connectivity errors (DNS, connection refused, etc.)
    NetworkError,

    /// Request timeout errors
    TimeoutError,

    /// Unparsable body or missing field
    ProtocolError,

    /// Other/unknown errors
    OtherError,
}

impl ErrorCategory {
    /// Categorize an HTTP status code.
    ///
    /// Returns None if status is success (2xx/3xx).
    pub fn from_status_code(status_code: u16) -> Option<Self> {
        match status_code {
            200..=399 => None,
            400..=499 => Some(ErrorCategory::ClientError),
            500..=599 => Some(ErrorCategory::ServerError),
            _ => Some(ErrorCategory::OtherError),
        }
    }

    /// Get the Prometheus label for this error category.
    pub fn label(&self) -> &'static str {
        match self {
            ErrorCategory::ClientError => "client_error",
            ErrorCategory::ServerError => "server_error",
            ErrorCategory::NetworkError => "network_error",
            ErrorCategory::TimeoutError => "timeout_error",
            ErrorCategory::ProtocolError => "protocol_error",
            ErrorCategory::OtherError => "other_error",
        }
    }

    /// Get a human-readable description of this error category.
    pub fn description(&self) -> &'static str {
        match self {
            ErrorCategory::ClientError => "HTTP 4xx Client Errors",
            ErrorCategory::ServerError => "HTTP 5xx Server Errors",
            ErrorCategory::NetworkError => "Network/Connection Errors",
            ErrorCategory::TimeoutError => "Request Timeout Errors",
            ErrorCategory::ProtocolError => "Malformed Response Errors",
            ErrorCategory::OtherError => "Other/Unknown Errors",
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.description())
    }
}

/// Invalid configuration. Fatal at startup.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    #[error("Persona '{name}' has invalid weight {weight}; weights must be positive")]
    InvalidWeight { name: String, weight: f64 },

    #[error("No personas registered")]
    EmptyRegistry,

    #[error("Unknown persona '{0}'")]
    UnknownPersona(String),

    #[error("Field '{field}' is required but not provided")]
    MissingField { field: String },

    #[error("Field '{field}': invalid value '{value}' - {message}")]
    InvalidValue {
        field: String,
        value: String,
        message: String,
    },

    #[error("Failed to read config file: {0}")]
    FileRead(String),

    #[error("Failed to parse YAML: {0}")]
    YamlParse(String),
}

impl ConfigError {
    pub fn invalid(field: &str, value: impl ToString, message: impl Into<String>) -> Self {
        ConfigError::InvalidValue {
            field: field.to_string(),
            value: value.to_string(),
            message: message.into(),
        }
    }
}

/// Lifecycle misuse or startup failure of the scheduler.
#[derive(Error, Debug)]
pub enum SchedulerError {
    #[error("Scheduler is already running")]
    AlreadyRunning,

    #[error("Scheduler is not running")]
    NotRunning,

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Failed to build HTTP client: {0}")]
    Client(#[from] reqwest::Error),

    #[error("Outcome collector task failed: {0}")]
    Collector(String),
}
