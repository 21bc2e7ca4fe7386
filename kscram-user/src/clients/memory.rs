//! In-process Kafka cluster holding SCRAM credentials.
//!
//! Backs the tests and `kscram-user simulate`. It follows broker behaviour for
//! the SCRAM admin APIs: one credential per (user, mechanism), `RESOURCE_NOT_FOUND`
//! for unknown users, iteration bounds enforced on upsert, and a user vanishes
//! once its last credential is deleted. Passwords are never kept, only a salted
//! digest of them.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use rand::RngCore;
use sha2::{Digest, Sha256, Sha512};
use tokio::sync::Mutex;
use tracing::debug;

use super::config::KafkaConfig;
use super::context::CallContext;
use super::scram::{
    AlteredUser, AlteredUsers, ApiError, CredentialInfo, DescribedUser, DescribedUsers, ErrorCode,
    MAX_ITERATIONS, MIN_ITERATIONS, ScramDeletion, ScramMechanism, ScramUpsertion,
};
use super::{AdminClient, AdminConnector, ClientError};

/// Admin API a [`Fault`] is aimed at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdminApi {
    Describe,
    Alter,
}

/// Failure injected into the next call of one admin API.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    /// The call fails with a connection error.
    Unavailable,
    /// The call is applied but its response carries no entries.
    DropResponse,
    /// The call never completes.
    Stall,
}

struct StoredCredential {
    iterations: i32,
    salt: [u8; 32],
    digest: Vec<u8>,
}

#[derive(Default)]
struct ClusterState {
    users: BTreeMap<String, BTreeMap<ScramMechanism, StoredCredential>>,
    faults: VecDeque<(AdminApi, Fault)>,
}

fn salted_digest(mechanism: ScramMechanism, salt: &[u8], password: &str) -> Option<Vec<u8>> {
    match mechanism {
        ScramMechanism::Sha256 => Some(
            Sha256::new()
                .chain_update(salt)
                .chain_update(password.as_bytes())
                .finalize()
                .to_vec(),
        ),
        ScramMechanism::Sha512 => Some(
            Sha512::new()
                .chain_update(salt)
                .chain_update(password.as_bytes())
                .finalize()
                .to_vec(),
        ),
        ScramMechanism::Unknown(_) => None,
    }
}

fn not_found(action: &str) -> ApiError {
    ApiError::new(
        ErrorCode::ResourceNotFound,
        format!("Attempt to {} a user credential that does not exist", action),
    )
}

fn unacceptable(message: &str) -> ApiError {
    ApiError::new(ErrorCode::UnacceptableCredential, message)
}

impl ClusterState {
    fn describe(&self, user: &str) -> DescribedUser {
        match self.users.get(user) {
            Some(creds) if !creds.is_empty() => DescribedUser {
                user: user.to_string(),
                error: None,
                credentials: creds
                    .iter()
                    .map(|(mechanism, cred)| CredentialInfo {
                        mechanism: *mechanism,
                        iterations: cred.iterations,
                    })
                    .collect(),
            },
            _ => DescribedUser {
                user: user.to_string(),
                error: Some(not_found("describe")),
                credentials: Vec::new(),
            },
        }
    }

    fn delete(&mut self, deletion: &ScramDeletion) -> Option<ApiError> {
        let Some(creds) = self.users.get_mut(&deletion.user) else {
            return Some(not_found("delete"));
        };
        if creds.remove(&deletion.mechanism).is_none() {
            return Some(not_found("delete"));
        }
        if creds.is_empty() {
            self.users.remove(&deletion.user);
        }
        None
    }

    fn upsert(&mut self, upsertion: &ScramUpsertion) -> Option<ApiError> {
        if upsertion.user.is_empty() {
            return Some(unacceptable("Username must not be empty"));
        }
        if upsertion.iterations < MIN_ITERATIONS {
            return Some(unacceptable("Too few iterations"));
        }
        if upsertion.iterations > MAX_ITERATIONS {
            return Some(unacceptable("Too many iterations"));
        }
        if upsertion.password.is_empty() {
            return Some(unacceptable("Password must not be empty"));
        }

        let mut salt = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut salt);
        let Some(digest) = salted_digest(upsertion.mechanism, &salt, &upsertion.password) else {
            return Some(ApiError::new(
                ErrorCode::UnsupportedSaslMechanism,
                format!("Unknown SCRAM mechanism code {}", upsertion.mechanism.code()),
            ));
        };

        self.users.entry(upsertion.user.clone()).or_default().insert(
            upsertion.mechanism,
            StoredCredential {
                iterations: upsertion.iterations,
                salt,
                digest,
            },
        );
        None
    }
}

/// A shared in-memory cluster. Clones refer to the same cluster.
#[derive(Clone, Default)]
pub struct InMemoryCluster {
    state: Arc<Mutex<ClusterState>>,
    principal: Option<(String, String)>,
    closes: Arc<AtomicUsize>,
    connects: Arc<AtomicUsize>,
}

impl InMemoryCluster {
    pub fn new() -> Self {
        Self::default()
    }

    /// Require admin connections to authenticate as this SASL principal.
    pub fn with_principal(
        mut self,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        self.principal = Some((username.into(), password.into()));
        self
    }

    /// Open an admin session without going through credentials.
    pub fn admin(&self) -> Arc<InMemoryAdmin> {
        Arc::new(InMemoryAdmin {
            state: Arc::clone(&self.state),
            closed: AtomicBool::new(false),
            closes: Arc::clone(&self.closes),
        })
    }

    /// Queue a fault for the next `api` call on any session.
    pub async fn inject(&self, api: AdminApi, fault: Fault) {
        self.state.lock().await.faults.push_back((api, fault));
    }

    /// Names of all users holding at least one credential.
    pub async fn users(&self) -> Vec<String> {
        self.state.lock().await.users.keys().cloned().collect()
    }

    pub async fn credentials(&self, user: &str) -> Vec<CredentialInfo> {
        self.state.lock().await.describe(user).credentials
    }

    /// Check a password against the stored credential of `user` for `mechanism`.
    pub async fn verify_password(
        &self,
        user: &str,
        mechanism: ScramMechanism,
        password: &str,
    ) -> bool {
        let state = self.state.lock().await;
        state
            .users
            .get(user)
            .and_then(|creds| creds.get(&mechanism))
            .and_then(|cred| {
                salted_digest(mechanism, &cred.salt, password).map(|digest| digest == cred.digest)
            })
            .unwrap_or(false)
    }

    /// Number of `close` calls made on sessions of this cluster.
    pub fn close_count(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }

    /// Number of sessions opened through [`AdminConnector::connect`].
    pub fn connect_count(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AdminConnector for InMemoryCluster {
    async fn connect(
        &self,
        ctx: &CallContext,
        credentials: &[u8],
    ) -> Result<Arc<dyn AdminClient>, ClientError> {
        let config = KafkaConfig::from_slice(credentials)?;

        ctx.run(async {
            let Some((username, password)) = &self.principal else {
                return Ok(());
            };
            match &config.sasl {
                Some(sasl) if sasl.username == *username && sasl.password == *password => Ok(()),
                Some(sasl) => Err(ClientError::Authentication(format!(
                    "invalid credentials for {}",
                    sasl.username
                ))),
                None => Err(ClientError::Authentication(
                    "cluster requires SASL authentication".to_string(),
                )),
            }
        })
        .await?;

        debug!("Connected to in-memory cluster via {}", config.brokers.join(","));
        self.connects.fetch_add(1, Ordering::SeqCst);
        Ok(self.admin())
    }
}

/// One admin session on an [`InMemoryCluster`].
pub struct InMemoryAdmin {
    state: Arc<Mutex<ClusterState>>,
    closed: AtomicBool,
    closes: Arc<AtomicUsize>,
}

impl InMemoryAdmin {
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    async fn before_call(&self, api: AdminApi) -> Result<Option<Fault>, ClientError> {
        if self.is_closed() {
            return Err(ClientError::Closed);
        }
        let fault = {
            let mut state = self.state.lock().await;
            state
                .faults
                .iter()
                .position(|(target, _)| *target == api)
                .and_then(|i| state.faults.remove(i))
                .map(|(_, fault)| fault)
        };
        match fault {
            Some(Fault::Unavailable) => {
                Err(ClientError::Connection("broker unavailable".to_string()))
            }
            Some(Fault::Stall) => std::future::pending().await,
            other => Ok(other),
        }
    }
}

#[async_trait]
impl AdminClient for InMemoryAdmin {
    async fn describe_user_scram_credentials(
        &self,
        users: &[String],
    ) -> Result<DescribedUsers, ClientError> {
        let fault = self.before_call(AdminApi::Describe).await?;
        let state = self.state.lock().await;
        if fault == Some(Fault::DropResponse) {
            return Ok(DescribedUsers::new());
        }

        // An empty request describes every user.
        if users.is_empty() {
            return Ok(state
                .users
                .keys()
                .map(|user| (user.clone(), state.describe(user)))
                .collect());
        }

        let mut described = DescribedUsers::new();
        for user in users {
            let entry = if users.iter().filter(|u| *u == user).count() > 1 {
                DescribedUser {
                    user: user.clone(),
                    error: Some(ApiError::new(
                        ErrorCode::DuplicateResource,
                        "Cannot describe SCRAM credentials for the same user twice in a single request",
                    )),
                    credentials: Vec::new(),
                }
            } else {
                state.describe(user)
            };
            described.insert(user.clone(), entry);
        }
        Ok(described)
    }

    async fn alter_user_scram_credentials(
        &self,
        deletions: Vec<ScramDeletion>,
        upsertions: Vec<ScramUpsertion>,
    ) -> Result<AlteredUsers, ClientError> {
        let fault = self.before_call(AdminApi::Alter).await?;
        let mut state = self.state.lock().await;

        // A user may be the target of only one operation per request.
        let mut targets: HashMap<String, usize> = HashMap::new();
        for user in deletions
            .iter()
            .map(|d| &d.user)
            .chain(upsertions.iter().map(|u| &u.user))
        {
            *targets.entry(user.clone()).or_default() += 1;
        }
        let duplicate = |user: &str| targets.get(user).copied().unwrap_or(0) > 1;
        let duplicate_error = || {
            ApiError::new(
                ErrorCode::DuplicateResource,
                "A user credential cannot be altered twice in the same request",
            )
        };

        let mut altered = AlteredUsers::new();
        for deletion in &deletions {
            let error = if duplicate(&deletion.user) {
                Some(duplicate_error())
            } else {
                state.delete(deletion)
            };
            altered.insert(
                deletion.user.clone(),
                AlteredUser {
                    user: deletion.user.clone(),
                    error,
                },
            );
        }
        for upsertion in &upsertions {
            let error = if duplicate(&upsertion.user) {
                Some(duplicate_error())
            } else {
                state.upsert(upsertion)
            };
            altered.insert(
                upsertion.user.clone(),
                AlteredUser {
                    user: upsertion.user.clone(),
                    error,
                },
            );
        }

        debug!(
            "Altered SCRAM credentials: {} deletions, {} upsertions",
            deletions.len(),
            upsertions.len()
        );

        if fault == Some(Fault::DropResponse) {
            altered.clear();
        }
        Ok(altered)
    }

    async fn close(&self) -> Result<(), ClientError> {
        self.closes.fetch_add(1, Ordering::SeqCst);
        if self.closed.swap(true, Ordering::SeqCst) {
            return Err(ClientError::Closed);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn upsertion(
        user: &str,
        mechanism: ScramMechanism,
        iterations: i32,
        password: &str,
    ) -> ScramUpsertion {
        ScramUpsertion {
            user: user.to_string(),
            mechanism,
            iterations,
            password: password.to_string(),
        }
    }

    #[tokio::test]
    async fn test_upsert_then_describe() {
        let cluster = InMemoryCluster::new();
        let admin = cluster.admin();

        let altered = admin
            .alter_user_scram_credentials(
                vec![],
                vec![upsertion("alice", ScramMechanism::Sha512, 4096, "pw")],
            )
            .await
            .unwrap();
        assert_eq!(altered["alice"].error, None);

        let described = admin
            .describe_user_scram_credentials(&["alice".to_string()])
            .await
            .unwrap();
        assert_eq!(
            described["alice"].credentials,
            vec![CredentialInfo {
                mechanism: ScramMechanism::Sha512,
                iterations: 4096
            }]
        );
        assert!(cluster.verify_password("alice", ScramMechanism::Sha512, "pw").await);
        assert!(!cluster.verify_password("alice", ScramMechanism::Sha512, "nope").await);
        assert!(!cluster.verify_password("alice", ScramMechanism::Sha256, "pw").await);
    }

    #[tokio::test]
    async fn test_describe_unknown_user() {
        let admin = InMemoryCluster::new().admin();
        let described = admin
            .describe_user_scram_credentials(&["ghost".to_string()])
            .await
            .unwrap();
        let error = described["ghost"].error.as_ref().unwrap();
        assert_eq!(error.code, ErrorCode::ResourceNotFound);
    }

    #[tokio::test]
    async fn test_upsert_validation() {
        let admin = InMemoryCluster::new().admin();
        let altered = admin
            .alter_user_scram_credentials(
                vec![],
                vec![
                    upsertion("few", ScramMechanism::Sha256, 10, "pw"),
                    upsertion("many", ScramMechanism::Sha256, 20000, "pw"),
                    upsertion("empty", ScramMechanism::Sha256, 4096, ""),
                    upsertion("odd", ScramMechanism::Unknown(9), 4096, "pw"),
                ],
            )
            .await
            .unwrap();

        for user in ["few", "many", "empty"] {
            assert_eq!(
                altered[user].error.as_ref().map(|e| e.code),
                Some(ErrorCode::UnacceptableCredential),
                "{user}"
            );
        }
        assert_eq!(
            altered["odd"].error.as_ref().map(|e| e.code),
            Some(ErrorCode::UnsupportedSaslMechanism)
        );
    }

    #[tokio::test]
    async fn test_delete_last_credential_removes_user() {
        let cluster = InMemoryCluster::new();
        let admin = cluster.admin();
        admin
            .alter_user_scram_credentials(
                vec![],
                vec![upsertion("bob", ScramMechanism::Sha256, 4096, "pw")],
            )
            .await
            .unwrap();
        admin
            .alter_user_scram_credentials(
                vec![],
                vec![upsertion("bob", ScramMechanism::Sha512, 8192, "pw")],
            )
            .await
            .unwrap();
        assert_eq!(cluster.credentials("bob").await.len(), 2);

        let deletion = |mechanism| ScramDeletion {
            user: "bob".to_string(),
            mechanism,
        };
        let altered = admin
            .alter_user_scram_credentials(vec![deletion(ScramMechanism::Sha256)], vec![])
            .await
            .unwrap();
        assert_eq!(altered["bob"].error, None);
        assert_eq!(cluster.users().await, vec!["bob".to_string()]);

        admin
            .alter_user_scram_credentials(vec![deletion(ScramMechanism::Sha512)], vec![])
            .await
            .unwrap();
        assert!(cluster.users().await.is_empty());

        let altered = admin
            .alter_user_scram_credentials(vec![deletion(ScramMechanism::Sha512)], vec![])
            .await
            .unwrap();
        assert_eq!(
            altered["bob"].error.as_ref().map(|e| e.code),
            Some(ErrorCode::ResourceNotFound)
        );
    }

    #[tokio::test]
    async fn test_same_user_twice_is_rejected() {
        let cluster = InMemoryCluster::new();
        let altered = cluster
            .admin()
            .alter_user_scram_credentials(
                vec![ScramDeletion {
                    user: "carol".to_string(),
                    mechanism: ScramMechanism::Sha256,
                }],
                vec![upsertion("carol", ScramMechanism::Sha256, 4096, "pw")],
            )
            .await
            .unwrap();
        assert_eq!(
            altered["carol"].error.as_ref().map(|e| e.code),
            Some(ErrorCode::DuplicateResource)
        );
        assert!(cluster.users().await.is_empty());
    }

    #[tokio::test]
    async fn test_closed_session_rejects_calls() {
        let cluster = InMemoryCluster::new();
        let admin = cluster.admin();
        admin.close().await.unwrap();
        assert!(matches!(admin.close().await, Err(ClientError::Closed)));
        assert_eq!(cluster.close_count(), 2);

        let result = admin
            .describe_user_scram_credentials(&["alice".to_string()])
            .await;
        assert!(matches!(result, Err(ClientError::Closed)));
    }

    #[tokio::test]
    async fn test_faults_apply_once() {
        let cluster = InMemoryCluster::new();
        let admin = cluster.admin();
        cluster.inject(AdminApi::Describe, Fault::Unavailable).await;

        let users = ["alice".to_string()];
        assert!(matches!(
            admin.describe_user_scram_credentials(&users).await,
            Err(ClientError::Connection(_))
        ));
        assert!(admin.describe_user_scram_credentials(&users).await.is_ok());

        cluster.inject(AdminApi::Alter, Fault::DropResponse).await;
        assert!(admin.describe_user_scram_credentials(&users).await.is_ok());
        let altered = admin
            .alter_user_scram_credentials(
                vec![],
                vec![upsertion("alice", ScramMechanism::Sha256, 4096, "pw")],
            )
            .await
            .unwrap();
        assert!(altered.is_empty());
        assert_eq!(cluster.users().await, vec!["alice".to_string()]);
    }

    #[tokio::test]
    async fn test_connect_checks_principal() {
        let cluster = InMemoryCluster::new().with_principal("admin", "admin-secret");
        let ctx = CallContext::new();

        let good = br#"{"brokers": ["k:9092"], "sasl": {"mechanism": "PLAIN", "username": "admin", "password": "admin-secret"}}"#;
        let bad = br#"{"brokers": ["k:9092"], "sasl": {"mechanism": "PLAIN", "username": "admin", "password": "wrong"}}"#;
        let anonymous = br#"{"brokers": ["k:9092"]}"#;

        assert!(cluster.connect(&ctx, good).await.is_ok());
        assert!(matches!(
            cluster.connect(&ctx, bad).await,
            Err(ClientError::Authentication(_))
        ));
        assert!(matches!(
            cluster.connect(&ctx, anonymous).await,
            Err(ClientError::Authentication(_))
        ));
        assert!(matches!(
            cluster.connect(&ctx, b"").await,
            Err(ClientError::Config(_))
        ));
        assert_eq!(cluster.connect_count(), 1);
    }
}
