//! Declarative resources: the `User` being reconciled and the `ProviderConfig`
//! that says how to reach its cluster.
//!
//! Both are read from JSON manifests in the Crossplane shape (camelCase fields,
//! `metadata`/`spec`/`status`).

use std::collections::BTreeMap;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Name of the account on the broker, when it differs from `metadata.name`.
pub const ANNOTATION_EXTERNAL_NAME: &str = "crossplane.io/external-name";
/// Set (RFC 3339) right before an external create is attempted.
pub const ANNOTATION_EXTERNAL_CREATE_PENDING: &str = "crossplane.io/external-create-pending";
/// Set (RFC 3339) once an external create returned successfully.
pub const ANNOTATION_EXTERNAL_CREATE_SUCCEEDED: &str = "crossplane.io/external-create-succeeded";
/// Set (RFC 3339) once an external create returned an error.
pub const ANNOTATION_EXTERNAL_CREATE_FAILED: &str = "crossplane.io/external-create-failed";

/// ProviderConfig used when a User does not reference one.
pub const DEFAULT_PROVIDER_CONFIG: &str = "default";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectMeta {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uid: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deletion_timestamp: Option<DateTime<Utc>>,
}

/// Desired SCRAM settings of the account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserParameters {
    /// `SCRAM-SHA-256` or `SCRAM-SHA-512`.
    pub mechanism: String,
    pub iterations: i32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reference {
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecretReference {
    pub name: String,
    pub namespace: String,
}

/// What happens to the broker account when the User is deleted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeletionPolicy {
    #[default]
    Delete,
    Orphan,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserSpec {
    pub for_provider: UserParameters,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider_config_ref: Option<Reference>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub write_connection_secret_to_ref: Option<SecretReference>,
    #[serde(default)]
    pub deletion_policy: DeletionPolicy,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConditionType {
    Ready,
    Synced,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConditionStatus {
    True,
    False,
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConditionReason {
    Available,
    Creating,
    Deleting,
    ReconcileSuccess,
    ReconcileError,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    #[serde(rename = "type")]
    pub kind: ConditionType,
    pub status: ConditionStatus,
    pub reason: ConditionReason,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub last_transition_time: DateTime<Utc>,
}

impl Condition {
    fn new(kind: ConditionType, status: ConditionStatus, reason: ConditionReason) -> Self {
        Self {
            kind,
            status,
            reason,
            message: None,
            last_transition_time: Utc::now(),
        }
    }

    /// The account exists on the broker.
    pub fn available() -> Self {
        Self::new(ConditionType::Ready, ConditionStatus::True, ConditionReason::Available)
    }

    pub fn creating() -> Self {
        Self::new(ConditionType::Ready, ConditionStatus::False, ConditionReason::Creating)
    }

    pub fn deleting() -> Self {
        Self::new(ConditionType::Ready, ConditionStatus::False, ConditionReason::Deleting)
    }

    pub fn reconcile_success() -> Self {
        Self::new(
            ConditionType::Synced,
            ConditionStatus::True,
            ConditionReason::ReconcileSuccess,
        )
    }

    pub fn reconcile_error(err: &dyn std::error::Error) -> Self {
        let mut message = err.to_string();
        let mut source = err.source();
        while let Some(cause) = source {
            message.push_str(": ");
            message.push_str(&cause.to_string());
            source = cause.source();
        }

        Self {
            message: Some(message),
            ..Self::new(
                ConditionType::Synced,
                ConditionStatus::False,
                ConditionReason::ReconcileError,
            )
        }
    }

    /// Equal apart from the transition time.
    fn same_state(&self, other: &Condition) -> bool {
        self.kind == other.kind
            && self.status == other.status
            && self.reason == other.reason
            && self.message == other.message
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UserStatus {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,
}

/// A SCRAM user managed on a Kafka cluster.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub metadata: ObjectMeta,
    pub spec: UserSpec,
    #[serde(default)]
    pub status: UserStatus,
}

impl User {
    pub fn new(name: impl Into<String>, mechanism: impl Into<String>, iterations: i32) -> Self {
        Self {
            metadata: ObjectMeta {
                name: name.into(),
                ..Default::default()
            },
            spec: UserSpec {
                for_provider: UserParameters {
                    mechanism: mechanism.into(),
                    iterations,
                },
                provider_config_ref: None,
                write_connection_secret_to_ref: None,
                deletion_policy: DeletionPolicy::Delete,
            },
            status: UserStatus::default(),
        }
    }

    pub fn from_json(data: &[u8]) -> serde_json::Result<Self> {
        serde_json::from_slice(data)
    }

    /// Account name on the broker.
    pub fn external_name(&self) -> &str {
        self.annotation(ANNOTATION_EXTERNAL_NAME)
            .unwrap_or(&self.metadata.name)
    }

    pub fn set_external_name(&mut self, name: impl Into<String>) {
        self.set_annotation(ANNOTATION_EXTERNAL_NAME, name);
    }

    pub fn provider_config_name(&self) -> &str {
        self.spec
            .provider_config_ref
            .as_ref()
            .map(|r| r.name.as_str())
            .unwrap_or(DEFAULT_PROVIDER_CONFIG)
    }

    pub fn is_deleting(&self) -> bool {
        self.metadata.deletion_timestamp.is_some()
    }

    pub fn annotation(&self, key: &str) -> Option<&str> {
        self.metadata.annotations.get(key).map(String::as_str)
    }

    pub fn set_annotation(&mut self, key: &str, value: impl Into<String>) {
        self.metadata.annotations.insert(key.to_string(), value.into());
    }

    pub fn condition(&self, kind: ConditionType) -> Option<&Condition> {
        self.status.conditions.iter().find(|c| c.kind == kind)
    }

    /// Replace conditions of the same type. A condition whose state did not
    /// change keeps its original transition time.
    pub fn set_conditions(&mut self, conditions: impl IntoIterator<Item = Condition>) {
        for condition in conditions {
            match self
                .status
                .conditions
                .iter_mut()
                .find(|c| c.kind == condition.kind)
            {
                Some(existing) if existing.same_state(&condition) => {}
                Some(existing) => *existing = condition,
                None => self.status.conditions.push(condition),
            }
        }
    }
}

/// Where ProviderConfig credentials are read from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CredentialsSource {
    None,
    Secret,
    Environment,
    Filesystem,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecretKeySelector {
    pub name: String,
    pub namespace: String,
    pub key: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvSelector {
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FsSelector {
    pub path: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderCredentials {
    pub source: CredentialsSource,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret_ref: Option<SecretKeySelector>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub env: Option<EnvSelector>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fs: Option<FsSelector>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderConfigSpec {
    pub credentials: ProviderCredentials,
}

/// Cluster connection settings shared by many Users.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderConfig {
    pub metadata: ObjectMeta,
    pub spec: ProviderConfigSpec,
}

impl ProviderConfig {
    pub fn new(name: impl Into<String>, credentials: ProviderCredentials) -> Self {
        Self {
            metadata: ObjectMeta {
                name: name.into(),
                ..Default::default()
            },
            spec: ProviderConfigSpec { credentials },
        }
    }

    pub fn from_json(data: &[u8]) -> serde_json::Result<Self> {
        serde_json::from_slice(data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_manifest() {
        let user = User::from_json(
            br#"{
                "metadata": {
                    "name": "alice",
                    "annotations": {"crossplane.io/external-name": "alice-prod"}
                },
                "spec": {
                    "forProvider": {"mechanism": "SCRAM-SHA-512", "iterations": 4096},
                    "providerConfigRef": {"name": "kafka-prod"},
                    "writeConnectionSecretToRef": {"name": "alice-creds", "namespace": "apps"},
                    "deletionPolicy": "Orphan"
                }
            }"#,
        )
        .unwrap();

        assert_eq!(user.external_name(), "alice-prod");
        assert_eq!(user.provider_config_name(), "kafka-prod");
        assert_eq!(user.spec.for_provider.iterations, 4096);
        assert_eq!(user.spec.deletion_policy, DeletionPolicy::Orphan);
        assert!(!user.is_deleting());
        assert!(user.status.conditions.is_empty());
    }

    #[test]
    fn test_user_defaults() {
        let user = User::new("bob", "SCRAM-SHA-256", 8192);
        assert_eq!(user.external_name(), "bob");
        assert_eq!(user.provider_config_name(), DEFAULT_PROVIDER_CONFIG);
        assert_eq!(user.spec.deletion_policy, DeletionPolicy::Delete);
    }

    #[test]
    fn test_set_conditions_keeps_transition_time() {
        let mut user = User::new("bob", "SCRAM-SHA-256", 8192);
        user.set_conditions([Condition::available()]);
        let first = user.condition(ConditionType::Ready).unwrap().last_transition_time;

        user.set_conditions([Condition::available(), Condition::reconcile_success()]);
        assert_eq!(user.status.conditions.len(), 2);
        assert_eq!(
            user.condition(ConditionType::Ready).unwrap().last_transition_time,
            first
        );

        user.set_conditions([Condition::deleting()]);
        assert_eq!(
            user.condition(ConditionType::Ready).unwrap().reason,
            ConditionReason::Deleting
        );
        assert_eq!(user.status.conditions.len(), 2);
    }

    #[test]
    fn test_reconcile_error_includes_causes() {
        let io = std::io::Error::other("disk on fire");
        let condition = Condition::reconcile_error(&io);
        assert_eq!(condition.status, ConditionStatus::False);
        assert_eq!(condition.message.as_deref(), Some("disk on fire"));
    }

    #[test]
    fn test_provider_config_manifest() {
        let pc = ProviderConfig::from_json(
            br#"{
                "metadata": {"name": "default"},
                "spec": {"credentials": {
                    "source": "Secret",
                    "secretRef": {"name": "kafka-creds", "namespace": "crossplane-system", "key": "credentials"}
                }}
            }"#,
        )
        .unwrap();
        assert_eq!(pc.spec.credentials.source, CredentialsSource::Secret);
        assert_eq!(pc.spec.credentials.secret_ref.unwrap().key, "credentials");
    }
}
