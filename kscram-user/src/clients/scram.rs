//! Request and response shapes of the SCRAM credential admin APIs
//! (DescribeUserScramCredentials / AlterUserScramCredentials).

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use thiserror::Error;

/// Lowest iteration count a broker accepts for any SCRAM mechanism.
pub const MIN_ITERATIONS: i32 = 4096;
/// Highest iteration count a broker accepts for any SCRAM mechanism.
pub const MAX_ITERATIONS: i32 = 16384;

/// SCRAM mechanism as carried on the wire (int8).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ScramMechanism {
    Sha256,
    Sha512,
    /// A mechanism code this client does not know about.
    Unknown(i8),
}

impl ScramMechanism {
    pub fn from_code(code: i8) -> Self {
        match code {
            1 => Self::Sha256,
            2 => Self::Sha512,
            other => Self::Unknown(other),
        }
    }

    pub fn code(self) -> i8 {
        match self {
            Self::Sha256 => 1,
            Self::Sha512 => 2,
            Self::Unknown(code) => code,
        }
    }

    /// Canonical name, as used in `User` manifests.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Sha256 => "SCRAM-SHA-256",
            Self::Sha512 => "SCRAM-SHA-512",
            Self::Unknown(_) => "UNKNOWN",
        }
    }
}

impl fmt::Display for ScramMechanism {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Returned when a mechanism name is not one of the supported SCRAM mechanisms.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unsupported SCRAM mechanism {0:?}, expected SCRAM-SHA-256 or SCRAM-SHA-512")]
pub struct UnknownMechanism(pub String);

impl FromStr for ScramMechanism {
    type Err = UnknownMechanism;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "SCRAM-SHA-256" => Ok(Self::Sha256),
            "SCRAM-SHA-512" => Ok(Self::Sha512),
            other => Err(UnknownMechanism(other.to_string())),
        }
    }
}

/// Broker error codes reported per user in SCRAM admin responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    ClusterAuthorizationFailed,
    UnsupportedSaslMechanism,
    ResourceNotFound,
    DuplicateResource,
    UnacceptableCredential,
    Unknown(i16),
}

impl ErrorCode {
    pub fn from_code(code: i16) -> Self {
        match code {
            31 => Self::ClusterAuthorizationFailed,
            33 => Self::UnsupportedSaslMechanism,
            91 => Self::ResourceNotFound,
            92 => Self::DuplicateResource,
            93 => Self::UnacceptableCredential,
            other => Self::Unknown(other),
        }
    }

    pub fn code(self) -> i16 {
        match self {
            Self::ClusterAuthorizationFailed => 31,
            Self::UnsupportedSaslMechanism => 33,
            Self::ResourceNotFound => 91,
            Self::DuplicateResource => 92,
            Self::UnacceptableCredential => 93,
            Self::Unknown(code) => code,
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ClusterAuthorizationFailed => f.write_str("CLUSTER_AUTHORIZATION_FAILED"),
            Self::UnsupportedSaslMechanism => f.write_str("UNSUPPORTED_SASL_MECHANISM"),
            Self::ResourceNotFound => f.write_str("RESOURCE_NOT_FOUND"),
            Self::DuplicateResource => f.write_str("DUPLICATE_RESOURCE"),
            Self::UnacceptableCredential => f.write_str("UNACCEPTABLE_CREDENTIAL"),
            Self::Unknown(code) => write!(f, "UNKNOWN_ERROR({code})"),
        }
    }
}

/// An error the broker attached to a single user entry of a response.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{code}: {}", .message.as_deref().unwrap_or("no error message"))]
pub struct ApiError {
    pub code: ErrorCode,
    pub message: Option<String>,
}

impl ApiError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: Some(message.into()),
        }
    }
}

/// One SCRAM credential attached to a user.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CredentialInfo {
    pub mechanism: ScramMechanism,
    pub iterations: i32,
}

/// Describe result for one user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DescribedUser {
    pub user: String,
    pub error: Option<ApiError>,
    pub credentials: Vec<CredentialInfo>,
}

/// Describe results keyed by user name.
pub type DescribedUsers = HashMap<String, DescribedUser>;

/// Request to set (create or replace) one credential of a user.
#[derive(Clone)]
pub struct ScramUpsertion {
    pub user: String,
    pub mechanism: ScramMechanism,
    pub iterations: i32,
    pub password: String,
}

// The password must never reach a log line.
impl fmt::Debug for ScramUpsertion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScramUpsertion")
            .field("user", &self.user)
            .field("mechanism", &self.mechanism)
            .field("iterations", &self.iterations)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Request to remove one credential of a user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScramDeletion {
    pub user: String,
    pub mechanism: ScramMechanism,
}

/// Alter result for one user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AlteredUser {
    pub user: String,
    pub error: Option<ApiError>,
}

/// Alter results keyed by user name.
pub type AlteredUsers = HashMap<String, AlteredUser>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mechanism_names_round_trip() {
        for mechanism in [ScramMechanism::Sha256, ScramMechanism::Sha512] {
            assert_eq!(mechanism.as_str().parse::<ScramMechanism>(), Ok(mechanism));
            assert_eq!(ScramMechanism::from_code(mechanism.code()), mechanism);
        }
    }

    #[test]
    fn test_unknown_mechanism() {
        assert_eq!(ScramMechanism::from_code(7), ScramMechanism::Unknown(7));
        assert_eq!(ScramMechanism::Unknown(7).to_string(), "UNKNOWN");
        assert!("scram-sha-256".parse::<ScramMechanism>().is_err());
        assert!("PLAIN".parse::<ScramMechanism>().is_err());
    }

    #[test]
    fn test_error_codes() {
        assert_eq!(ErrorCode::from_code(91), ErrorCode::ResourceNotFound);
        assert_eq!(ErrorCode::UnacceptableCredential.code(), 93);
        assert_eq!(ErrorCode::from_code(-1).to_string(), "UNKNOWN_ERROR(-1)");

        let err = ApiError::new(ErrorCode::ResourceNotFound, "no such user");
        assert_eq!(err.to_string(), "RESOURCE_NOT_FOUND: no such user");
    }

    #[test]
    fn test_upsertion_debug_redacts_password() {
        let upsertion = ScramUpsertion {
            user: "alice".to_string(),
            mechanism: ScramMechanism::Sha512,
            iterations: 4096,
            password: "hunter2".to_string(),
        };
        let printed = format!("{upsertion:?}");
        assert!(printed.contains("alice"));
        assert!(!printed.contains("hunter2"));
    }
}
