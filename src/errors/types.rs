//! # Error Types
//!
//! Error types for the bootstrap workflow using `thiserror`.

use std::fmt;

use crate::bootstrap::Stage;

/// Custom result type for meshvault operations
pub type Result<T> = std::result::Result<T, BootstrapError>;

/// Main error type for provisioning, mapping and validation
#[derive(thiserror::Error, Debug)]
pub enum BootstrapError {
    /// Transport or authentication failure talking to the secrets backend.
    /// Retryable by the caller; never retried internally.
    #[error("Secrets backend unavailable: {message}")]
    BackendUnavailable { message: String },

    /// The calling identity lacks a capability on the target path
    #[error("Permission denied on '{path}': {message}")]
    PermissionDenied { path: String, message: String },

    /// A dependency was used before it was provisioned (e.g. intermediate before root)
    #[error("Ordering violation: {message}")]
    OrderingViolation { message: String },

    /// A role binding referenced a policy that does not exist
    #[error("Unknown policy: {name}")]
    UnknownPolicy { name: String },

    /// A PKI role is not registered under the issuer mount
    #[error("Unknown PKI role '{role}' on mount '{mount}'")]
    UnknownRole { mount: String, role: String },

    /// A requested mesh feature has no provisioned secret behind it
    #[error("Missing secret for feature '{feature}'")]
    MissingSecret { feature: String },

    /// Resource not found errors
    #[error("Resource not found: {resource_type} '{id}'")]
    NotFound { resource_type: String, id: String },

    /// Resource already initialized (e.g. CA on a mount)
    #[error("Resource already exists: {resource_type} '{id}'")]
    AlreadyExists { resource_type: String, id: String },

    /// Malformed secret path
    #[error("Invalid secret path '{path}': {reason}")]
    InvalidPath { path: String, reason: String },

    /// Validation errors
    #[error("Validation error: {message}")]
    Validation { message: String, field: Option<String> },

    /// Configuration errors
    #[error("Configuration error: {message}")]
    Config {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Connectivity check exhausted its attempt budget
    #[error("Connectivity check to {target} timed out after {attempts} attempts")]
    Timeout { target: String, attempts: u32 },

    /// Operation stopped by external cancellation
    #[error("Operation cancelled: {operation}")]
    Cancelled { operation: String },

    /// External mesh deployment or access policy step failed
    #[error("Deployment error: {message}")]
    Deployment { message: String },

    /// A bootstrap stage failed; carries the stage and root cause
    #[error("Bootstrap failed at stage {stage}: {source}")]
    StageFailed {
        stage: Stage,
        #[source]
        source: Box<BootstrapError>,
    },

    /// Internal errors
    #[error("Internal error: {message}")]
    Internal { message: String },
}

/// Coarse classification used for logging and metrics labels
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    BackendUnavailable,
    PermissionDenied,
    OrderingViolation,
    UnknownPolicy,
    UnknownRole,
    MissingSecret,
    NotFound,
    AlreadyExists,
    InvalidInput,
    Timeout,
    Cancelled,
    Deployment,
    Internal,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorKind::BackendUnavailable => "backend_unavailable",
            ErrorKind::PermissionDenied => "permission_denied",
            ErrorKind::OrderingViolation => "ordering_violation",
            ErrorKind::UnknownPolicy => "unknown_policy",
            ErrorKind::UnknownRole => "unknown_role",
            ErrorKind::MissingSecret => "missing_secret",
            ErrorKind::NotFound => "not_found",
            ErrorKind::AlreadyExists => "already_exists",
            ErrorKind::InvalidInput => "invalid_input",
            ErrorKind::Timeout => "timeout",
            ErrorKind::Cancelled => "cancelled",
            ErrorKind::Deployment => "deployment",
            ErrorKind::Internal => "internal",
        };
        write!(f, "{}", s)
    }
}

impl BootstrapError {
    /// Create a backend unavailable error
    pub fn backend_unavailable<S: Into<String>>(message: S) -> Self {
        Self::BackendUnavailable { message: message.into() }
    }

    /// Create a permission denied error
    pub fn permission_denied<P: Into<String>, S: Into<String>>(path: P, message: S) -> Self {
        Self::PermissionDenied { path: path.into(), message: message.into() }
    }

    /// Create an ordering violation error
    pub fn ordering<S: Into<String>>(message: S) -> Self {
        Self::OrderingViolation { message: message.into() }
    }

    /// Create an unknown policy error
    pub fn unknown_policy<S: Into<String>>(name: S) -> Self {
        Self::UnknownPolicy { name: name.into() }
    }

    /// Create an unknown PKI role error
    pub fn unknown_role<M: Into<String>, R: Into<String>>(mount: M, role: R) -> Self {
        Self::UnknownRole { mount: mount.into(), role: role.into() }
    }

    /// Create a missing secret error
    pub fn missing_secret<S: Into<String>>(feature: S) -> Self {
        Self::MissingSecret { feature: feature.into() }
    }

    /// Create a not found error
    pub fn not_found<R: Into<String>, I: Into<String>>(resource_type: R, id: I) -> Self {
        Self::NotFound { resource_type: resource_type.into(), id: id.into() }
    }

    /// Create an already exists error
    pub fn already_exists<R: Into<String>, I: Into<String>>(resource_type: R, id: I) -> Self {
        Self::AlreadyExists { resource_type: resource_type.into(), id: id.into() }
    }

    /// Create an invalid path error
    pub fn invalid_path<P: Into<String>, S: Into<String>>(path: P, reason: S) -> Self {
        Self::InvalidPath { path: path.into(), reason: reason.into() }
    }

    /// Create a validation error
    pub fn validation<S: Into<String>>(message: S) -> Self {
        Self::Validation { message: message.into(), field: None }
    }

    /// Create a validation error with field information
    pub fn validation_field<S: Into<String>, F: Into<String>>(message: S, field: F) -> Self {
        Self::Validation { message: message.into(), field: Some(field.into()) }
    }

    /// Create a new configuration error
    pub fn config<S: Into<String>>(message: S) -> Self {
        Self::Config { message: message.into(), source: None }
    }

    /// Create a configuration error with source
    pub fn config_with_source<S: Into<String>>(
        message: S,
        source: Box<dyn std::error::Error + Send + Sync>,
    ) -> Self {
        Self::Config { message: message.into(), source: Some(source) }
    }

    /// Create a connectivity timeout error
    pub fn timeout<S: Into<String>>(target: S, attempts: u32) -> Self {
        Self::Timeout { target: target.into(), attempts }
    }

    /// Create a cancellation error
    pub fn cancelled<S: Into<String>>(operation: S) -> Self {
        Self::Cancelled { operation: operation.into() }
    }

    /// Create a deployment error
    pub fn deployment<S: Into<String>>(message: S) -> Self {
        Self::Deployment { message: message.into() }
    }

    /// Create an internal error
    pub fn internal<S: Into<String>>(message: S) -> Self {
        Self::Internal { message: message.into() }
    }

    /// Wrap an error with the stage it aborted
    pub fn at_stage(stage: Stage, source: BootstrapError) -> Self {
        Self::StageFailed { stage, source: Box::new(source) }
    }

    /// The innermost cause, looking through stage wrappers
    pub fn root_cause(&self) -> &BootstrapError {
        match self {
            BootstrapError::StageFailed { source, .. } => source.root_cause(),
            other => other,
        }
    }

    /// The stage this error aborted, if it came out of the orchestrator
    pub fn failed_stage(&self) -> Option<Stage> {
        match self {
            BootstrapError::StageFailed { stage, .. } => Some(*stage),
            _ => None,
        }
    }

    /// Classify the root cause
    pub fn kind(&self) -> ErrorKind {
        match self.root_cause() {
            BootstrapError::BackendUnavailable { .. } => ErrorKind::BackendUnavailable,
            BootstrapError::PermissionDenied { .. } => ErrorKind::PermissionDenied,
            BootstrapError::OrderingViolation { .. } => ErrorKind::OrderingViolation,
            BootstrapError::UnknownPolicy { .. } => ErrorKind::UnknownPolicy,
            BootstrapError::UnknownRole { .. } => ErrorKind::UnknownRole,
            BootstrapError::MissingSecret { .. } => ErrorKind::MissingSecret,
            BootstrapError::NotFound { .. } => ErrorKind::NotFound,
            BootstrapError::AlreadyExists { .. } => ErrorKind::AlreadyExists,
            BootstrapError::InvalidPath { .. }
            | BootstrapError::Validation { .. }
            | BootstrapError::Config { .. } => ErrorKind::InvalidInput,
            BootstrapError::Timeout { .. } => ErrorKind::Timeout,
            BootstrapError::Cancelled { .. } => ErrorKind::Cancelled,
            BootstrapError::Deployment { .. } => ErrorKind::Deployment,
            BootstrapError::Internal { .. } | BootstrapError::StageFailed { .. } => {
                ErrorKind::Internal
            }
        }
    }

    /// Check if the caller may retry this error.
    ///
    /// Only transient backend failures qualify; ordering violations in particular
    /// must abort the run.
    pub fn is_retryable(&self) -> bool {
        matches!(self.root_cause(), BootstrapError::BackendUnavailable { .. })
    }
}

impl BootstrapError {
    /// Map a `vaultrs` error raised by a request against `path`.
    ///
    /// Only transport failures and 429/5xx answers are retryable; response
    /// decoding and request building errors will not go away on retry.
    pub fn from_vault(error: vaultrs::error::ClientError, path: impl Into<String>) -> Self {
        use vaultrs::error::ClientError;

        let path = path.into();
        match error {
            ClientError::APIError { code, errors } => {
                let message = errors.join("; ");
                match code {
                    403 => Self::permission_denied(path, message),
                    404 => Self::not_found("vault path", path),
                    429 | 500..=599 => Self::backend_unavailable(format!(
                        "{} returned status {}: {}",
                        path, code, message
                    )),
                    _ => Self::internal(format!("{} returned status {}: {}", path, code, message)),
                }
            }
            transport @ ClientError::RestClientError { .. } => {
                Self::backend_unavailable(format!("{}: {}", path, transport))
            }
            other => Self::internal(format!("{}: {}", path, other)),
        }
    }
}

impl From<vaultrs::error::ClientError> for BootstrapError {
    fn from(error: vaultrs::error::ClientError) -> Self {
        Self::from_vault(error, "vault request")
    }
}

impl From<config::ConfigError> for BootstrapError {
    fn from(error: config::ConfigError) -> Self {
        Self::config_with_source("Configuration loading failed", Box::new(error))
    }
}

impl From<validator::ValidationErrors> for BootstrapError {
    fn from(errors: validator::ValidationErrors) -> Self {
        let message = errors
            .field_errors()
            .iter()
            .map(|(field, field_errors)| {
                let error_messages: Vec<String> = field_errors
                    .iter()
                    .map(|e| {
                        e.message.as_ref().map_or("Invalid value".to_string(), |m| m.to_string())
                    })
                    .collect();
                format!("{}: {}", field, error_messages.join(", "))
            })
            .collect::<Vec<_>>()
            .join("; ");

        Self::validation(format!("Validation failed: {}", message))
    }
}

impl From<reqwest::Error> for BootstrapError {
    fn from(error: reqwest::Error) -> Self {
        Self::internal(format!("HTTP client error: {}", error))
    }
}

impl From<std::io::Error> for BootstrapError {
    fn from(error: std::io::Error) -> Self {
        Self::internal(format!("I/O operation failed: {}", error))
    }
}

impl From<serde_yaml::Error> for BootstrapError {
    fn from(error: serde_yaml::Error) -> Self {
        Self::internal(format!("YAML serialization failed: {}", error))
    }
}
