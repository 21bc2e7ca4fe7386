//! Single-resource reconciliation pass.
//!
//! [`Driver::reconcile`] runs Connect, Observe, at most one of
//! Create/Update/Delete, and Disconnect for one User, and records the result in
//! the User's annotations and conditions. It never loops or retries; the
//! caller decides when to run the next pass and must persist the User between
//! passes.

use std::sync::Arc;

use chrono::{DateTime, SecondsFormat, Utc};
use tracing::{debug, info, warn};

use crate::clients::CallContext;
use crate::error::{Error, Result};
use crate::reconciler::{Connector, ExternalClient};
use crate::resource::{
    ANNOTATION_EXTERNAL_CREATE_FAILED, ANNOTATION_EXTERNAL_CREATE_PENDING,
    ANNOTATION_EXTERNAL_CREATE_SUCCEEDED, ANNOTATION_EXTERNAL_NAME, Condition, DeletionPolicy,
    User,
};
use crate::store::ConnectionPublisher;

/// What a pass did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// The account was created and its connection details published.
    Created,
    Updated,
    /// The account was deleted. The next pass should finalize.
    Deleted,
    /// Deletion requested and the account is gone.
    Finalized,
    /// Deletion requested with the Orphan policy; the account was left alone.
    Orphaned,
    UpToDate,
}

impl Outcome {
    /// True when the resource can be released by its owner.
    pub fn is_final(&self) -> bool {
        matches!(self, Self::Finalized | Self::Orphaned)
    }
}

impl std::fmt::Display for Outcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Created => "created",
            Self::Updated => "updated",
            Self::Deleted => "deleted",
            Self::Finalized => "finalized",
            Self::Orphaned => "orphaned",
            Self::UpToDate => "up to date",
        };
        f.write_str(s)
    }
}

/// Drives passes for one resource type.
pub struct Driver<C: Connector> {
    connector: C,
    publisher: Arc<dyn ConnectionPublisher>,
}

impl<C: Connector> Driver<C> {
    pub fn new(connector: C, publisher: Arc<dyn ConnectionPublisher>) -> Self {
        Self {
            connector,
            publisher,
        }
    }

    /// Run one pass for `user`. The `Synced` condition reflects the result.
    pub async fn reconcile(&self, ctx: &CallContext, user: &mut User) -> Result<Outcome> {
        if user.annotation(ANNOTATION_EXTERNAL_NAME).is_none() {
            let name = user.metadata.name.clone();
            debug!("Defaulting external name of user {}", name);
            user.set_external_name(name);
        }

        let result = self.pass(ctx, user).await;
        match &result {
            Ok(outcome) => {
                info!("User {} reconciled: {}", user.metadata.name, outcome);
                user.set_conditions([Condition::reconcile_success()]);
            }
            Err(e) => {
                warn!("Failed to reconcile user {}: {}", user.metadata.name, e);
                user.set_conditions([Condition::reconcile_error(e)]);
            }
        }
        result
    }

    async fn pass(&self, ctx: &CallContext, user: &mut User) -> Result<Outcome> {
        if create_incomplete(user) {
            return Err(Error::CreatePendingUnknown {
                user: user.external_name().to_string(),
            });
        }

        let mut session = self.connector.connect(ctx, user).await?;
        let result = self.act(ctx, &session, user).await;
        if let Err(e) = session.disconnect(ctx).await {
            warn!("Failed to disconnect session of user {}: {}", user.metadata.name, e);
        }
        result
    }

    async fn act(
        &self,
        ctx: &CallContext,
        session: &C::Session,
        user: &mut User,
    ) -> Result<Outcome> {
        let observation = session.observe(ctx, user).await?;
        debug!(
            "Observed user {}: exists={} up_to_date={}",
            user.external_name(),
            observation.resource_exists,
            observation.resource_up_to_date
        );

        if user.is_deleting() {
            user.set_conditions([Condition::deleting()]);
            if user.spec.deletion_policy == DeletionPolicy::Orphan {
                info!("Orphaning Kafka user {}", user.external_name());
                return Ok(Outcome::Orphaned);
            }
            if !observation.resource_exists {
                return Ok(Outcome::Finalized);
            }
            session.delete(ctx, user).await?;
            return Ok(Outcome::Deleted);
        }

        if !observation.resource_exists {
            return self.create(ctx, session, user).await;
        }

        if !observation.resource_up_to_date {
            session.update(ctx, user).await?;
            return Ok(Outcome::Updated);
        }

        Ok(Outcome::UpToDate)
    }

    async fn create(
        &self,
        ctx: &CallContext,
        session: &C::Session,
        user: &mut User,
    ) -> Result<Outcome> {
        user.set_annotation(ANNOTATION_EXTERNAL_CREATE_PENDING, timestamp());
        user.set_conditions([Condition::creating()]);

        let creation = match session.create(ctx, user).await {
            Ok(creation) => {
                user.set_annotation(ANNOTATION_EXTERNAL_CREATE_SUCCEEDED, timestamp());
                creation
            }
            Err(e) => {
                user.set_annotation(ANNOTATION_EXTERNAL_CREATE_FAILED, timestamp());
                return Err(e);
            }
        };

        if let Some(secret) = &user.spec.write_connection_secret_to_ref {
            self.publisher
                .publish(secret, &creation.connection_details)
                .await
                .map_err(|source| Error::PublishConnectionDetails {
                    secret: format!("{}/{}", secret.namespace, secret.name),
                    source,
                })?;
        }
        Ok(Outcome::Created)
    }
}

fn timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Nanos, true)
}

fn annotation_time(user: &User, key: &str) -> Option<DateTime<Utc>> {
    user.annotation(key)
        .and_then(|v| DateTime::parse_from_rfc3339(v).ok())
        .map(|t| t.with_timezone(&Utc))
}

/// A create was started but neither its success nor its failure was recorded.
fn create_incomplete(user: &User) -> bool {
    let Some(pending) = annotation_time(user, ANNOTATION_EXTERNAL_CREATE_PENDING) else {
        return false;
    };
    let newer = |key: &str| annotation_time(user, key).is_none_or(|t| pending > t);
    newer(ANNOTATION_EXTERNAL_CREATE_SUCCEEDED) && newer(ANNOTATION_EXTERNAL_CREATE_FAILED)
}
