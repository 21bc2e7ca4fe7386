//! Control-plane collaborators of a reconciliation pass: ProviderConfig lookup,
//! secrets, usage tracking and connection-details publishing.
//!
//! [`InMemoryStore`] implements all of them for tests and `simulate`.

use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::debug;

use crate::reconciler::ConnectionDetails;
use crate::resource::{
    CredentialsSource, ProviderConfig, ProviderCredentials, SecretReference, User,
};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{kind} {name} not found")]
    NotFound { kind: &'static str, name: String },

    #[error("credentials source {0:?} requires a selector")]
    MissingSelector(CredentialsSource),

    #[error("environment variable {0} is not set")]
    MissingEnv(String),

    #[error("cannot read credentials file {path}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[async_trait]
pub trait ProviderConfigStore: Send + Sync {
    async fn get_provider_config(&self, name: &str) -> Result<ProviderConfig, StoreError>;
}

#[async_trait]
pub trait SecretStore: Send + Sync {
    async fn get_secret_key(
        &self,
        namespace: &str,
        name: &str,
        key: &str,
    ) -> Result<Vec<u8>, StoreError>;
}

/// Records which ProviderConfig each User depends on.
#[async_trait]
pub trait UsageTracker: Send + Sync {
    async fn track(&self, user: &User) -> Result<(), StoreError>;
}

/// Writes connection details where the User asked for them.
#[async_trait]
pub trait ConnectionPublisher: Send + Sync {
    async fn publish(
        &self,
        secret: &SecretReference,
        details: &ConnectionDetails,
    ) -> Result<(), StoreError>;
}

/// Read the raw credentials a ProviderConfig points at.
pub async fn extract_credentials(
    credentials: &ProviderCredentials,
    secrets: &dyn SecretStore,
) -> Result<Vec<u8>, StoreError> {
    match credentials.source {
        CredentialsSource::None => Ok(Vec::new()),
        CredentialsSource::Secret => {
            let selector = credentials
                .secret_ref
                .as_ref()
                .ok_or(StoreError::MissingSelector(CredentialsSource::Secret))?;
            secrets
                .get_secret_key(&selector.namespace, &selector.name, &selector.key)
                .await
        }
        CredentialsSource::Environment => {
            let selector = credentials
                .env
                .as_ref()
                .ok_or(StoreError::MissingSelector(CredentialsSource::Environment))?;
            std::env::var(&selector.name)
                .map(String::into_bytes)
                .map_err(|_| StoreError::MissingEnv(selector.name.clone()))
        }
        CredentialsSource::Filesystem => {
            let selector = credentials
                .fs
                .as_ref()
                .ok_or(StoreError::MissingSelector(CredentialsSource::Filesystem))?;
            tokio::fs::read(&selector.path)
                .await
                .map_err(|source| StoreError::Io {
                    path: selector.path.clone(),
                    source,
                })
        }
    }
}

type SecretData = BTreeMap<String, Vec<u8>>;

#[derive(Default)]
struct Objects {
    provider_configs: HashMap<String, ProviderConfig>,
    secrets: HashMap<(String, String), SecretData>,
    usages: HashMap<String, String>,
}

/// In-memory object store.
#[derive(Default)]
pub struct InMemoryStore {
    objects: RwLock<Objects>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert_provider_config(&self, pc: ProviderConfig) {
        self.objects
            .write()
            .await
            .provider_configs
            .insert(pc.metadata.name.clone(), pc);
    }

    pub async fn insert_secret(&self, namespace: &str, name: &str, data: SecretData) {
        self.objects
            .write()
            .await
            .secrets
            .insert((namespace.to_string(), name.to_string()), data);
    }

    pub async fn secret(&self, namespace: &str, name: &str) -> Option<SecretData> {
        self.objects
            .read()
            .await
            .secrets
            .get(&(namespace.to_string(), name.to_string()))
            .cloned()
    }

    /// ProviderConfig recorded for a User, keyed by uid or name.
    pub async fn usage(&self, user_key: &str) -> Option<String> {
        self.objects.read().await.usages.get(user_key).cloned()
    }
}

fn usage_key(user: &User) -> &str {
    user.metadata.uid.as_deref().unwrap_or(&user.metadata.name)
}

#[async_trait]
impl ProviderConfigStore for InMemoryStore {
    async fn get_provider_config(&self, name: &str) -> Result<ProviderConfig, StoreError> {
        self.objects
            .read()
            .await
            .provider_configs
            .get(name)
            .cloned()
            .ok_or_else(|| StoreError::NotFound {
                kind: "ProviderConfig",
                name: name.to_string(),
            })
    }
}

#[async_trait]
impl SecretStore for InMemoryStore {
    async fn get_secret_key(
        &self,
        namespace: &str,
        name: &str,
        key: &str,
    ) -> Result<Vec<u8>, StoreError> {
        let objects = self.objects.read().await;
        let data = objects
            .secrets
            .get(&(namespace.to_string(), name.to_string()))
            .ok_or_else(|| StoreError::NotFound {
                kind: "Secret",
                name: format!("{}/{}", namespace, name),
            })?;
        data.get(key).cloned().ok_or_else(|| StoreError::NotFound {
            kind: "Secret key",
            name: format!("{}/{}[{}]", namespace, name, key),
        })
    }
}

#[async_trait]
impl UsageTracker for InMemoryStore {
    async fn track(&self, user: &User) -> Result<(), StoreError> {
        let pc = user.provider_config_name().to_string();
        debug!("User {} uses ProviderConfig {}", user.metadata.name, pc);
        self.objects
            .write()
            .await
            .usages
            .insert(usage_key(user).to_string(), pc);
        Ok(())
    }
}

#[async_trait]
impl ConnectionPublisher for InMemoryStore {
    async fn publish(
        &self,
        secret: &SecretReference,
        details: &ConnectionDetails,
    ) -> Result<(), StoreError> {
        let mut objects = self.objects.write().await;
        let data = objects
            .secrets
            .entry((secret.namespace.clone(), secret.name.clone()))
            .or_default();
        for (key, value) in details {
            data.insert(key.clone(), value.clone());
        }
        debug!(
            "Published {} connection detail(s) to secret {}/{}",
            details.len(),
            secret.namespace,
            secret.name
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;
    use crate::resource::{EnvSelector, FsSelector, SecretKeySelector};

    fn credentials(source: CredentialsSource) -> ProviderCredentials {
        ProviderCredentials {
            source,
            secret_ref: None,
            env: None,
            fs: None,
        }
    }

    #[tokio::test]
    async fn test_extract_from_secret() {
        let store = InMemoryStore::new();
        store
            .insert_secret(
                "crossplane-system",
                "kafka-creds",
                BTreeMap::from([("credentials".to_string(), b"{}".to_vec())]),
            )
            .await;

        let mut creds = credentials(CredentialsSource::Secret);
        creds.secret_ref = Some(SecretKeySelector {
            name: "kafka-creds".to_string(),
            namespace: "crossplane-system".to_string(),
            key: "credentials".to_string(),
        });
        assert_eq!(extract_credentials(&creds, &store).await.unwrap(), b"{}".to_vec());

        creds.secret_ref.as_mut().unwrap().key = "other".to_string();
        assert!(matches!(
            extract_credentials(&creds, &store).await,
            Err(StoreError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_extract_from_environment() {
        let store = InMemoryStore::new();
        let mut creds = credentials(CredentialsSource::Environment);
        creds.env = Some(EnvSelector {
            name: "PATH".to_string(),
        });
        let expected = std::env::var("PATH").unwrap().into_bytes();
        assert_eq!(extract_credentials(&creds, &store).await.unwrap(), expected);

        creds.env = Some(EnvSelector {
            name: "KSCRAM_TEST_SURELY_UNSET_VARIABLE".to_string(),
        });
        assert!(matches!(
            extract_credentials(&creds, &store).await,
            Err(StoreError::MissingEnv(_))
        ));
    }

    #[tokio::test]
    async fn test_extract_from_filesystem() {
        let store = InMemoryStore::new();
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(br#"{"brokers": ["k:9092"]}"#).unwrap();

        let mut creds = credentials(CredentialsSource::Filesystem);
        creds.fs = Some(FsSelector {
            path: file.path().to_path_buf(),
        });
        assert_eq!(
            extract_credentials(&creds, &store).await.unwrap(),
            br#"{"brokers": ["k:9092"]}"#.to_vec()
        );

        creds.fs = Some(FsSelector {
            path: file.path().with_extension("missing"),
        });
        assert!(matches!(
            extract_credentials(&creds, &store).await,
            Err(StoreError::Io { .. })
        ));
    }

    #[tokio::test]
    async fn test_extract_none_and_missing_selector() {
        let store = InMemoryStore::new();
        assert!(
            extract_credentials(&credentials(CredentialsSource::None), &store)
                .await
                .unwrap()
                .is_empty()
        );
        for source in [
            CredentialsSource::Secret,
            CredentialsSource::Environment,
            CredentialsSource::Filesystem,
        ] {
            assert!(matches!(
                extract_credentials(&credentials(source), &store).await,
                Err(StoreError::MissingSelector(s)) if s == source
            ));
        }
    }

    #[tokio::test]
    async fn test_usage_and_publish() {
        let store = InMemoryStore::new();
        let user = User::new("alice", "SCRAM-SHA-512", 4096);
        store.track(&user).await.unwrap();
        assert_eq!(store.usage("alice").await.as_deref(), Some("default"));

        let secret = SecretReference {
            name: "alice-creds".to_string(),
            namespace: "apps".to_string(),
        };
        let details = ConnectionDetails::from([("password".to_string(), b"pw".to_vec())]);
        store.publish(&secret, &details).await.unwrap();
        assert_eq!(store.secret("apps", "alice-creds").await, Some(details));
    }
}
