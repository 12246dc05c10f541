//! Messaging-platform credentials: which phone-number endpoint to send from
//! and the access token that authorizes it.
//!
//! Credentials come from two places. The `connections` table holds accounts
//! linked at runtime; environment variables provide a static fallback for
//! deployments without the linking flow. The most recently connected account
//! always wins.

use std::sync::Arc;

use secrecy::SecretString;
use tracing::warn;

use crate::store::ConnectionStore;

/// Credentials for one messaging endpoint (phone number id + access token).
#[derive(Clone)]
pub struct PlatformCredentials {
    pub endpoint_id: String,
    pub access_token: SecretString,
}

impl std::fmt::Debug for PlatformCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlatformCredentials")
            .field("endpoint_id", &self.endpoint_id)
            .field("access_token", &"[REDACTED]")
            .finish()
    }
}

impl PlatformCredentials {
    /// Load static credentials from the environment.
    ///
    /// Returns `None` unless both `WHATSAPP_PHONE_NUMBER_ID` and
    /// `WHATSAPP_ACCESS_TOKEN` are set.
    pub fn from_env() -> Option<Self> {
        let endpoint_id = std::env::var("WHATSAPP_PHONE_NUMBER_ID").ok()?;
        let access_token = std::env::var("WHATSAPP_ACCESS_TOKEN").ok()?;
        Some(Self {
            endpoint_id,
            access_token: SecretString::from(access_token),
        })
    }
}

/// Resolves the credentials to use for outbound platform calls.
pub struct CredentialResolver {
    connections: Arc<dyn ConnectionStore>,
    fallback: Option<PlatformCredentials>,
}

impl CredentialResolver {
    pub fn new(
        connections: Arc<dyn ConnectionStore>,
        fallback: Option<PlatformCredentials>,
    ) -> Self {
        Self {
            connections,
            fallback,
        }
    }

    /// Most recently connected account, falling back to static credentials.
    ///
    /// A store failure degrades to the fallback rather than blocking sends.
    pub async fn resolve(&self) -> Option<PlatformCredentials> {
        match self.connections.latest_connection().await {
            Ok(Some(account)) => Some(PlatformCredentials {
                endpoint_id: account.endpoint_id,
                access_token: account.access_token,
            }),
            Ok(None) => self.fallback.clone(),
            Err(e) => {
                warn!(error = %e, "Connection lookup failed; trying static credentials");
                self.fallback.clone()
            }
        }
    }
}
