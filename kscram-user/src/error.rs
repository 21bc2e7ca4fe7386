//! Reconciliation error types.

use std::fmt;

use thiserror::Error;

use crate::clients::{ApiError, ClientError};
use crate::password::PasswordError;
use crate::store::StoreError;

/// Boxed cause for errors raised by pluggable collaborators.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Step of `Connect` that failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectStage {
    TrackUsage,
    GetProviderConfig,
    GetCredentials,
    NewClient,
}

impl fmt::Display for ConnectStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let msg = match self {
            Self::TrackUsage => "cannot track ProviderConfig usage",
            Self::GetProviderConfig => "cannot get ProviderConfig",
            Self::GetCredentials => "cannot get credentials",
            Self::NewClient => "cannot create new Kafka client",
        };
        f.write_str(msg)
    }
}

/// Errors returned by account operations and reconciliation passes.
#[derive(Debug, Error)]
pub enum Error {
    #[error("user {user} does not exist")]
    AccountNotFound {
        user: String,
        #[source]
        source: ApiError,
    },

    #[error("user {user} has {count} credentials, expected exactly one")]
    MultipleCredentials { user: String, count: usize },

    #[error("cannot describe user {user}")]
    DescribeFailed {
        user: String,
        #[source]
        source: ClientError,
    },

    #[error("user {user} already exists")]
    AlreadyExists { user: String },

    #[error("no create response for user {user}")]
    NoCreateResponse { user: String },

    #[error("cannot create user {user}")]
    CreateFailed {
        user: String,
        #[source]
        source: ClientError,
    },

    #[error("no delete response for user {user}")]
    NoDeleteResponse { user: String },

    #[error("cannot delete user {user}")]
    DeleteFailed {
        user: String,
        #[source]
        source: ClientError,
    },

    #[error("cannot generate password")]
    PasswordGeneration(#[source] PasswordError),

    #[error("updates are not supported")]
    UpdateNotSupported,

    #[error("{stage}")]
    Connect {
        stage: ConnectStage,
        #[source]
        source: BoxError,
    },

    #[error("invalid user parameters: {0}")]
    InvalidParameters(String),

    #[error("admin session is disconnected")]
    Disconnected,

    #[error(
        "cannot determine creation result of user {user}: remove the crossplane.io/external-create-pending annotation if it is safe to proceed"
    )]
    CreatePendingUnknown { user: String },

    #[error("cannot publish connection details to secret {secret}")]
    PublishConnectionDetails {
        secret: String,
        #[source]
        source: StoreError,
    },
}

/// Machine-testable classification of an [`Error`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    AccountNotFound,
    MultipleCredentials,
    DescribeFailed,
    AlreadyExists,
    NoCreateResponse,
    CreateFailed,
    NoDeleteResponse,
    DeleteFailed,
    PasswordGenerationFailed,
    UpdateNotSupported,
    Connect(ConnectStage),
    InvalidParameters,
    Disconnected,
    CreatePendingUnknown,
    PublishConnectionDetails,
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::AccountNotFound { .. } => ErrorKind::AccountNotFound,
            Self::MultipleCredentials { .. } => ErrorKind::MultipleCredentials,
            Self::DescribeFailed { .. } => ErrorKind::DescribeFailed,
            Self::AlreadyExists { .. } => ErrorKind::AlreadyExists,
            Self::NoCreateResponse { .. } => ErrorKind::NoCreateResponse,
            Self::CreateFailed { .. } => ErrorKind::CreateFailed,
            Self::NoDeleteResponse { .. } => ErrorKind::NoDeleteResponse,
            Self::DeleteFailed { .. } => ErrorKind::DeleteFailed,
            Self::PasswordGeneration(_) => ErrorKind::PasswordGenerationFailed,
            Self::UpdateNotSupported => ErrorKind::UpdateNotSupported,
            Self::Connect { stage, .. } => ErrorKind::Connect(*stage),
            Self::InvalidParameters(_) => ErrorKind::InvalidParameters,
            Self::Disconnected => ErrorKind::Disconnected,
            Self::CreatePendingUnknown { .. } => ErrorKind::CreatePendingUnknown,
            Self::PublishConnectionDetails { .. } => ErrorKind::PublishConnectionDetails,
        }
    }

    pub fn connect(stage: ConnectStage, source: impl Into<BoxError>) -> Self {
        Self::Connect {
            stage,
            source: source.into(),
        }
    }

    /// True when the remote call behind this error was canceled by its context.
    pub fn is_canceled(&self) -> bool {
        matches!(
            self,
            Self::DescribeFailed {
                source: ClientError::Canceled,
                ..
            } | Self::CreateFailed {
                source: ClientError::Canceled,
                ..
            } | Self::DeleteFailed {
                source: ClientError::Canceled,
                ..
            }
        )
    }
}

/// Result type for reconciliation operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use std::error::Error as _;

    use super::*;
    use crate::clients::ErrorCode;

    #[test]
    fn test_kind_survives_wrapping() {
        let err = Error::DeleteFailed {
            user: "ghost".to_string(),
            source: ClientError::Api(ApiError::new(ErrorCode::ResourceNotFound, "gone")),
        };
        assert_eq!(err.kind(), ErrorKind::DeleteFailed);
        assert_eq!(err.to_string(), "cannot delete user ghost");
        assert_eq!(
            err.source().map(|s| s.to_string()),
            Some("RESOURCE_NOT_FOUND: gone".to_string())
        );
    }

    #[test]
    fn test_connect_stage_message() {
        let err = Error::connect(ConnectStage::GetProviderConfig, "missing");
        assert_eq!(
            err.kind(),
            ErrorKind::Connect(ConnectStage::GetProviderConfig)
        );
        assert_eq!(err.to_string(), "cannot get ProviderConfig");
    }

    #[test]
    fn test_is_canceled() {
        let canceled = Error::DescribeFailed {
            user: "alice".to_string(),
            source: ClientError::Canceled,
        };
        assert!(canceled.is_canceled());
        assert!(!Error::UpdateNotSupported.is_canceled());
    }
}
