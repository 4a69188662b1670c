//! Explicit credential and region configuration for a transport.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Region used when neither the config nor the environment names one.
pub const DEFAULT_REGION: &str = "us-east-1";

const ENV_ACCESS_KEY_ID: &str = "AWS_ACCESS_KEY_ID";
const ENV_SECRET_ACCESS_KEY: &str = "AWS_SECRET_ACCESS_KEY";
const ENV_DEFAULT_REGION: &str = "AWS_DEFAULT_REGION";

/// Credentials and region requested by the caller.
#[derive(Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    pub access_key_id: Option<String>,
    pub secret_access_key: Option<String>,
    pub region: Option<String>,
}

impl fmt::Debug for TransportConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransportConfig")
            .field("access_key_id", &self.access_key_id)
            .field(
                "secret_access_key",
                &self.secret_access_key.as_ref().map(|_| "<redacted>"),
            )
            .field("region", &self.region)
            .finish()
    }
}

/// Where the credentials of a resolved config came from.
#[derive(Clone, PartialEq, Eq)]
pub enum CredentialSource {
    /// Passed explicitly in [`TransportConfig`].
    Explicit {
        access_key_id: String,
        secret_access_key: String,
    },
    /// Found in the supplied environment.
    Environment {
        access_key_id: String,
        secret_access_key: String,
    },
    /// Left to the provider's default credential chain.
    DefaultChain,
}

impl fmt::Debug for CredentialSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CredentialSource::Explicit { access_key_id, .. } => {
                write!(f, "Explicit({access_key_id})")
            }
            CredentialSource::Environment { access_key_id, .. } => {
                write!(f, "Environment({access_key_id})")
            }
            CredentialSource::DefaultChain => f.write_str("DefaultChain"),
        }
    }
}

/// Config after credential and region resolution.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResolvedTransportConfig {
    pub credentials: CredentialSource,
    pub region: String,
}

impl TransportConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_credentials(
        mut self,
        access_key_id: impl Into<String>,
        secret_access_key: impl Into<String>,
    ) -> Self {
        self.access_key_id = Some(access_key_id.into());
        self.secret_access_key = Some(secret_access_key.into());
        self
    }

    pub fn with_region(mut self, region: impl Into<String>) -> Self {
        self.region = Some(region.into());
        self
    }

    /// Resolve against an explicit environment snapshot.
    ///
    /// Explicit credentials win, then `AWS_ACCESS_KEY_ID` and
    /// `AWS_SECRET_ACCESS_KEY` from `env`, then the default chain. The region
    /// falls back to `AWS_DEFAULT_REGION`, then [`DEFAULT_REGION`].
    pub fn resolve(&self, env: &HashMap<String, String>) -> ResolvedTransportConfig {
        let region = self
            .region
            .clone()
            .or_else(|| env.get(ENV_DEFAULT_REGION).cloned())
            .unwrap_or_else(|| DEFAULT_REGION.to_string());

        let credentials = match (&self.access_key_id, &self.secret_access_key) {
            (Some(id), Some(secret)) => CredentialSource::Explicit {
                access_key_id: id.clone(),
                secret_access_key: secret.clone(),
            },
            _ => match (env.get(ENV_ACCESS_KEY_ID), env.get(ENV_SECRET_ACCESS_KEY)) {
                (Some(id), Some(secret)) => CredentialSource::Environment {
                    access_key_id: id.clone(),
                    secret_access_key: secret.clone(),
                },
                _ => CredentialSource::DefaultChain,
            },
        };

        ResolvedTransportConfig {
            credentials,
            region,
        }
    }
}
