//! User reconciler - keeps Kafka SCRAM users in line with User resources.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{info, warn};

use super::{
    ConnectionDetails, Connector, ExternalClient, ExternalCreation, ExternalObservation,
    PASSWORD_KEY,
};
use crate::account::{self, Account};
use crate::clients::{AdminClient, AdminConnector, CallContext};
use crate::error::{ConnectStage, Error, ErrorKind, Result};
use crate::password::PasswordGenerator;
use crate::resource::{Condition, User};
use crate::store::{ProviderConfigStore, SecretStore, UsageTracker, extract_credentials};

/// Opens [`UserSession`]s from a User's ProviderConfig.
pub struct UserConnector {
    usage: Arc<dyn UsageTracker>,
    configs: Arc<dyn ProviderConfigStore>,
    secrets: Arc<dyn SecretStore>,
    admin: Arc<dyn AdminConnector>,
    passwords: Arc<dyn PasswordGenerator>,
}

impl UserConnector {
    pub fn new(
        usage: Arc<dyn UsageTracker>,
        configs: Arc<dyn ProviderConfigStore>,
        secrets: Arc<dyn SecretStore>,
        admin: Arc<dyn AdminConnector>,
        passwords: Arc<dyn PasswordGenerator>,
    ) -> Self {
        Self {
            usage,
            configs,
            secrets,
            admin,
            passwords,
        }
    }
}

#[async_trait]
impl Connector for UserConnector {
    type Session = UserSession;

    async fn connect(&self, ctx: &CallContext, user: &User) -> Result<UserSession> {
        self.usage
            .track(user)
            .await
            .map_err(|e| Error::connect(ConnectStage::TrackUsage, e))?;

        let pc = self
            .configs
            .get_provider_config(user.provider_config_name())
            .await
            .map_err(|e| Error::connect(ConnectStage::GetProviderConfig, e))?;

        let credentials = extract_credentials(&pc.spec.credentials, self.secrets.as_ref())
            .await
            .map_err(|e| Error::connect(ConnectStage::GetCredentials, e))?;

        let admin = self
            .admin
            .connect(ctx, &credentials)
            .await
            .map_err(|e| Error::connect(ConnectStage::NewClient, e))?;

        info!(
            "Connected to Kafka for user {} via ProviderConfig {}",
            user.metadata.name, pc.metadata.name
        );
        Ok(UserSession::new(admin, Arc::clone(&self.passwords)))
    }
}

/// An admin session held for one User during one pass.
pub struct UserSession {
    admin: Option<Arc<dyn AdminClient>>,
    passwords: Arc<dyn PasswordGenerator>,
}

impl UserSession {
    pub fn new(admin: Arc<dyn AdminClient>, passwords: Arc<dyn PasswordGenerator>) -> Self {
        Self {
            admin: Some(admin),
            passwords,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.admin.is_some()
    }

    fn admin(&self) -> Result<&dyn AdminClient> {
        self.admin.as_deref().ok_or(Error::Disconnected)
    }

    fn desired_account(user: &User) -> Result<Account> {
        Account::from_parameters(user.external_name(), &user.spec.for_provider)
    }
}

#[async_trait]
impl ExternalClient for UserSession {
    async fn observe(&self, ctx: &CallContext, user: &mut User) -> Result<ExternalObservation> {
        let admin = self.admin()?;

        let observed = match account::fetch(ctx, admin, user.external_name()).await {
            Ok(observed) => observed,
            Err(e) if e.kind() == ErrorKind::AccountNotFound => {
                return Ok(ExternalObservation::default());
            }
            Err(e) => return Err(e),
        };

        user.set_conditions([Condition::available()]);

        Ok(ExternalObservation {
            resource_exists: true,
            resource_up_to_date: account::is_up_to_date(&user.spec.for_provider, &observed),
        })
    }

    async fn create(&self, ctx: &CallContext, user: &User) -> Result<ExternalCreation> {
        let admin = self.admin()?;
        let password = self.passwords.generate().map_err(Error::PasswordGeneration)?;
        let desired = Self::desired_account(user)?;

        account::create(ctx, admin, &desired, &password).await?;
        info!("Created Kafka user {} ({})", desired.name, desired.mechanism);

        Ok(ExternalCreation {
            connection_details: ConnectionDetails::from([(
                PASSWORD_KEY.to_string(),
                password.into_bytes(),
            )]),
        })
    }

    async fn update(&self, _ctx: &CallContext, _user: &User) -> Result<()> {
        Err(Error::UpdateNotSupported)
    }

    async fn delete(&self, ctx: &CallContext, user: &User) -> Result<()> {
        let admin = self.admin()?;
        let desired = Self::desired_account(user)?;

        account::delete(ctx, admin, &desired).await?;
        info!("Deleted Kafka user {} ({})", desired.name, desired.mechanism);
        Ok(())
    }

    async fn disconnect(&mut self, ctx: &CallContext) -> Result<()> {
        // Take the handle first so a failing close never leaves it held.
        let Some(admin) = self.admin.take() else {
            return Ok(());
        };
        // Close even when the pass was canceled.
        if let Err(e) = ctx.run_to_completion(admin.close()).await {
            warn!("Failed to close Kafka admin client: {}", e);
        }
        Ok(())
    }
}
