//! Connection settings decoded from ProviderConfig credentials.
//!
//! The credentials blob is JSON:
//!
//! ```json
//! {
//!   "brokers": ["kafka-0.kafka-headless:9092"],
//!   "sasl": { "mechanism": "PLAIN", "username": "admin", "password": "..." }
//! }
//! ```

use std::fmt;

use serde::{Deserialize, Serialize};

use super::ClientError;

/// SASL mechanism used by the admin connection itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SaslMechanism {
    #[serde(rename = "PLAIN")]
    Plain,
    #[serde(rename = "SCRAM-SHA-256")]
    ScramSha256,
    #[serde(rename = "SCRAM-SHA-512")]
    ScramSha512,
}

#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SaslConfig {
    pub mechanism: SaslMechanism,
    pub username: String,
    pub password: String,
}

impl fmt::Debug for SaslConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SaslConfig")
            .field("mechanism", &self.mechanism)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Admin connection configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KafkaConfig {
    pub brokers: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sasl: Option<SaslConfig>,
}

impl KafkaConfig {
    /// Decode and validate a credentials blob.
    pub fn from_slice(data: &[u8]) -> Result<Self, ClientError> {
        if data.is_empty() {
            return Err(ClientError::Config("credentials are empty".to_string()));
        }

        let config: KafkaConfig = serde_json::from_slice(data)
            .map_err(|e| ClientError::Config(format!("cannot parse credentials: {}", e)))?;

        if config.brokers.is_empty() {
            return Err(ClientError::Config("no brokers configured".to_string()));
        }
        if config.brokers.iter().any(|b| b.trim().is_empty()) {
            return Err(ClientError::Config("empty broker address".to_string()));
        }
        if let Some(sasl) = &config.sasl {
            if sasl.username.is_empty() {
                return Err(ClientError::Config("SASL username is empty".to_string()));
            }
        }

        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_with_sasl() {
        let data = br#"{
            "brokers": [ "kafka-dev-0.kafka-dev-headless:9092"],
            "sasl": {
                "mechanism": "PLAIN",
                "username": "user",
                "password": "secret"
            }
        }"#;

        let config = KafkaConfig::from_slice(data).unwrap();
        assert_eq!(config.brokers, vec!["kafka-dev-0.kafka-dev-headless:9092"]);
        let sasl = config.sasl.unwrap();
        assert_eq!(sasl.mechanism, SaslMechanism::Plain);
        assert_eq!(sasl.username, "user");
        assert_eq!(sasl.password, "secret");
    }

    #[test]
    fn test_parse_without_sasl() {
        let config = KafkaConfig::from_slice(br#"{"brokers": ["a:9092", "b:9092"]}"#).unwrap();
        assert_eq!(config.brokers.len(), 2);
        assert!(config.sasl.is_none());
    }

    #[test]
    fn test_rejects_invalid_configs() {
        for data in [
            &b""[..],
            br#"not json"#,
            br#"{"brokers": []}"#,
            br#"{"brokers": [" "]}"#,
            br#"{"brokers": ["a:9092"], "sasl": {"mechanism": "PLAIN", "username": "", "password": "x"}}"#,
            br#"{"brokers": ["a:9092"], "sasl": {"mechanism": "GSSAPI", "username": "u", "password": "x"}}"#,
        ] {
            assert!(
                matches!(KafkaConfig::from_slice(data), Err(ClientError::Config(_))),
                "accepted {:?}",
                String::from_utf8_lossy(data)
            );
        }
    }

    #[test]
    fn test_debug_redacts_password() {
        let sasl = SaslConfig {
            mechanism: SaslMechanism::ScramSha512,
            username: "admin".to_string(),
            password: "topsecret".to_string(),
        };
        assert!(!format!("{sasl:?}").contains("topsecret"));
    }
}
