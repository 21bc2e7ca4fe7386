//! SCRAM account operations against a Kafka admin client.
//!
//! Stateless: every call goes to the broker, nothing is cached, nothing is
//! retried. Failures carry their [`ErrorKind`](crate::ErrorKind) so callers can
//! tell "no such user" apart from everything else.

use tracing::debug;

use crate::clients::{
    AdminClient, CallContext, ClientError, DescribedUser, ErrorCode, ScramDeletion, ScramMechanism,
    ScramUpsertion,
};
use crate::error::{Error, Result};
use crate::resource::UserParameters;

/// A SCRAM user as it exists (or should exist) on the broker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Account {
    pub name: String,
    pub mechanism: ScramMechanism,
    pub iterations: i32,
}

impl Account {
    /// Build the account a User's parameters describe.
    pub fn from_parameters(name: &str, params: &UserParameters) -> Result<Self> {
        let mechanism = params
            .mechanism
            .parse::<ScramMechanism>()
            .map_err(|e| Error::InvalidParameters(e.to_string()))?;
        if params.iterations <= 0 {
            return Err(Error::InvalidParameters(format!(
                "iterations must be positive, got {}",
                params.iterations
            )));
        }

        Ok(Self {
            name: name.to_string(),
            mechanism,
            iterations: params.iterations,
        })
    }
}

async fn describe(ctx: &CallContext, admin: &dyn AdminClient, name: &str) -> Result<DescribedUser> {
    let users = [name.to_string()];
    let mut described = ctx
        .run(admin.describe_user_scram_credentials(&users))
        .await
        .map_err(|source| Error::DescribeFailed {
            user: name.to_string(),
            source,
        })?;

    described.remove(name).ok_or_else(|| Error::DescribeFailed {
        user: name.to_string(),
        source: ClientError::Protocol(format!("describe response has no entry for {}", name)),
    })
}

/// Fetch the single SCRAM credential of `name`.
pub async fn fetch(ctx: &CallContext, admin: &dyn AdminClient, name: &str) -> Result<Account> {
    debug!("Describing SCRAM credentials of {}", name);
    let described = describe(ctx, admin, name).await?;

    match described.error {
        Some(err) if err.code == ErrorCode::ResourceNotFound => {
            return Err(Error::AccountNotFound {
                user: name.to_string(),
                source: err,
            });
        }
        Some(err) => {
            return Err(Error::DescribeFailed {
                user: name.to_string(),
                source: err.into(),
            });
        }
        None => {}
    }

    match described.credentials.as_slice() {
        [credential] => Ok(Account {
            name: name.to_string(),
            mechanism: credential.mechanism,
            iterations: credential.iterations,
        }),
        credentials => Err(Error::MultipleCredentials {
            user: name.to_string(),
            count: credentials.len(),
        }),
    }
}

/// Create `account` with `password`. Fails with `AlreadyExists` if the broker
/// already knows the user.
pub async fn create(
    ctx: &CallContext,
    admin: &dyn AdminClient,
    account: &Account,
    password: &str,
) -> Result<()> {
    // Observe and create run as separate calls; look again before writing.
    let described = describe(ctx, admin, &account.name).await?;
    match described.error {
        None => {
            return Err(Error::AlreadyExists {
                user: account.name.clone(),
            });
        }
        Some(err) if err.code == ErrorCode::ResourceNotFound => {}
        Some(err) => {
            return Err(Error::DescribeFailed {
                user: account.name.clone(),
                source: err.into(),
            });
        }
    }

    debug!(
        "Creating SCRAM user {} ({}, {} iterations)",
        account.name, account.mechanism, account.iterations
    );
    let upsertion = ScramUpsertion {
        user: account.name.clone(),
        mechanism: account.mechanism,
        iterations: account.iterations,
        password: password.to_string(),
    };
    let mut altered = ctx
        .run(admin.alter_user_scram_credentials(Vec::new(), vec![upsertion]))
        .await
        .map_err(|source| Error::CreateFailed {
            user: account.name.clone(),
            source,
        })?;

    let result = altered
        .remove(&account.name)
        .ok_or_else(|| Error::NoCreateResponse {
            user: account.name.clone(),
        })?;
    if let Some(err) = result.error {
        return Err(Error::CreateFailed {
            user: account.name.clone(),
            source: err.into(),
        });
    }
    Ok(())
}

/// Delete the credential of `account` for its mechanism.
pub async fn delete(ctx: &CallContext, admin: &dyn AdminClient, account: &Account) -> Result<()> {
    debug!("Deleting SCRAM user {} ({})", account.name, account.mechanism);
    let deletion = ScramDeletion {
        user: account.name.clone(),
        mechanism: account.mechanism,
    };
    let mut altered = ctx
        .run(admin.alter_user_scram_credentials(vec![deletion], Vec::new()))
        .await
        .map_err(|source| Error::DeleteFailed {
            user: account.name.clone(),
            source,
        })?;

    let result = altered
        .remove(&account.name)
        .ok_or_else(|| Error::NoDeleteResponse {
            user: account.name.clone(),
        })?;
    if let Some(err) = result.error {
        return Err(Error::DeleteFailed {
            user: account.name.clone(),
            source: err.into(),
        });
    }
    Ok(())
}

/// True when the broker account matches the desired mechanism and iteration count.
pub fn is_up_to_date(desired: &UserParameters, observed: &Account) -> bool {
    desired.mechanism == observed.mechanism.as_str() && desired.iterations == observed.iterations
}
