//! Reconciler seams for managed resources.
//!
//! A [`Connector`] opens one session per resource per pass; the session is an
//! [`ExternalClient`] that observes the external resource and, depending on the
//! observation, creates, updates or deletes it. The caller owns the pass and
//! must release the session with [`ExternalClient::disconnect`].

pub mod user;

use std::collections::BTreeMap;

use async_trait::async_trait;

use crate::clients::CallContext;
use crate::error::Result;
use crate::resource::User;

pub use user::{UserConnector, UserSession};

/// Connection details key holding the generated password.
pub const PASSWORD_KEY: &str = "password";

/// Secret values produced by a create, keyed by detail name.
pub type ConnectionDetails = BTreeMap<String, Vec<u8>>;

/// What Observe found on the external system.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExternalObservation {
    pub resource_exists: bool,
    pub resource_up_to_date: bool,
}

/// What Create produced.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct ExternalCreation {
    pub connection_details: ConnectionDetails,
}

impl std::fmt::Debug for ExternalCreation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExternalCreation")
            .field("connection_details", &self.connection_details.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// Produces sessions for a resource type.
#[async_trait]
pub trait Connector: Send + Sync {
    type Session: ExternalClient;

    /// Resolve the resource's ProviderConfig and open an admin session.
    async fn connect(&self, ctx: &CallContext, user: &User) -> Result<Self::Session>;
}

/// One pass worth of operations on an external resource.
#[async_trait]
pub trait ExternalClient: Send + Sync {
    /// Check existence and drift. May set status conditions on the resource.
    async fn observe(&self, ctx: &CallContext, user: &mut User) -> Result<ExternalObservation>;

    async fn create(&self, ctx: &CallContext, user: &User) -> Result<ExternalCreation>;

    async fn update(&self, ctx: &CallContext, user: &User) -> Result<()>;

    async fn delete(&self, ctx: &CallContext, user: &User) -> Result<()>;

    /// Release the session. Calling it again is a no-op.
    async fn disconnect(&mut self, ctx: &CallContext) -> Result<()>;
}
