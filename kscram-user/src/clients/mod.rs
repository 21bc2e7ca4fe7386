//! Kafka admin client boundary.
//!
//! The reconciler only talks to brokers through [`AdminClient`], obtained from an
//! [`AdminConnector`] given the raw ProviderConfig credentials:
//! - `describe_user_scram_credentials`: which SCRAM credentials a user has
//! - `alter_user_scram_credentials`: upsert/delete credentials
//! - `close`: release the connection

pub mod config;
pub mod context;
pub mod memory;
pub mod scram;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

pub use config::{KafkaConfig, SaslConfig, SaslMechanism};
pub use context::CallContext;
pub use memory::{AdminApi, Fault, InMemoryAdmin, InMemoryCluster};
pub use scram::{
    AlteredUser, AlteredUsers, ApiError, CredentialInfo, DescribedUser, DescribedUsers, ErrorCode,
    ScramDeletion, ScramMechanism, ScramUpsertion,
};

/// Transport-level failures of an admin request.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("request canceled")]
    Canceled,

    #[error("request timed out after {0:?}")]
    TimedOut(Duration),

    #[error("admin client is closed")]
    Closed,

    #[error("connection failed: {0}")]
    Connection(String),

    #[error("invalid connection config: {0}")]
    Config(String),

    #[error("SASL authentication failed: {0}")]
    Authentication(String),

    /// The broker answered, but not with what was asked for.
    #[error("protocol error: {0}")]
    Protocol(String),

    #[error(transparent)]
    Api(#[from] ApiError),
}

/// An open admin session with a Kafka cluster.
#[async_trait]
pub trait AdminClient: Send + Sync {
    /// Describe the SCRAM credentials of the given users.
    async fn describe_user_scram_credentials(
        &self,
        users: &[String],
    ) -> Result<DescribedUsers, ClientError>;

    /// Apply credential deletions and upsertions in one request.
    async fn alter_user_scram_credentials(
        &self,
        deletions: Vec<ScramDeletion>,
        upsertions: Vec<ScramUpsertion>,
    ) -> Result<AlteredUsers, ClientError>;

    /// Close the session. Calls made afterwards fail with [`ClientError::Closed`].
    async fn close(&self) -> Result<(), ClientError>;
}

/// Opens admin sessions from raw credentials bytes.
#[async_trait]
pub trait AdminConnector: Send + Sync {
    async fn connect(
        &self,
        ctx: &CallContext,
        credentials: &[u8],
    ) -> Result<Arc<dyn AdminClient>, ClientError>;
}
