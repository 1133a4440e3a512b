//! Ramp session credential issuance
//!
//! Builds the short-lived ES256-signed request token, exchanges it at the
//! provider's token endpoint, and hands back a session credential. Issuance
//! failure is an outcome, not an error: the ramp URL builder checks it
//! explicitly and downgrades to fallback mode. Key material and issued
//! tokens are never logged.

use crate::config::Config;
use crate::error::OrchestrationError;
use crate::models::SessionCredential;
use async_trait::async_trait;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::Utc;
use p256::ecdsa::signature::Signer;
use p256::ecdsa::{Signature, SigningKey};
use p256::pkcs8::DecodePrivateKey;
use p256::SecretKey;
use rand::Rng;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::time::Duration;
use tracing::{info, warn};

/// Credential lifetime; the remote issuer enforces it, we only stamp it.
pub const CREDENTIAL_TTL_SECS: i64 = 120;

/// Resource claim bound into the signed request token.
const TOKEN_REQUEST_URI: &str = "POST /onramp/v1/token";

/// One wallet address and the chains it should be enabled for.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AddressEntry {
    pub address: String,
    pub blockchains: Vec<String>,
}

impl AddressEntry {
    pub fn base(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            blockchains: vec!["base".to_string()],
        }
    }
}

/// Issuance result. Callers must branch on it; nothing here panics or
/// propagates upstream failures.
#[derive(Debug, Clone)]
pub enum IssuanceOutcome {
    Issued(SessionCredential),
    Failed { reason: String },
}

impl IssuanceOutcome {
    pub fn failed(reason: impl Into<String>) -> Self {
        IssuanceOutcome::Failed {
            reason: reason.into(),
        }
    }

    pub fn credential(self) -> Option<SessionCredential> {
        match self {
            IssuanceOutcome::Issued(credential) => Some(credential),
            IssuanceOutcome::Failed { .. } => None,
        }
    }
}

#[async_trait]
pub trait CredentialIssuer: Send + Sync {
    async fn issue(&self, addresses: &[AddressEntry], assets: &[String]) -> IssuanceOutcome;
}

/// Issuer backed by the CDP token endpoint.
pub struct CdpCredentialIssuer {
    client: Client,
    key_name: Option<String>,
    private_key_pem: Option<String>,
    endpoint: String,
}

impl CdpCredentialIssuer {
    pub fn new(config: &Config) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(15))
            .build()
            .expect("Failed to build HTTP client");

        Self {
            client,
            key_name: config.session_key_name.clone(),
            private_key_pem: config.session_private_key.clone(),
            endpoint: config.token_endpoint.clone(),
        }
    }

    /// Build the signed bearer token: base64url(header).base64url(claims)
    /// signed with the P-256 key over SHA-256, signature appended base64url.
    fn bearer_jwt(&self) -> crate::Result<String> {
        let key_name = self.key_name.as_deref().ok_or_else(|| {
            OrchestrationError::ConfigurationError(
                "CDP_API_KEY_NAME is not configured".to_string(),
            )
        })?;
        let pem = self.private_key_pem.as_deref().ok_or_else(|| {
            OrchestrationError::ConfigurationError(
                "CDP_API_KEY_SECRET is not configured".to_string(),
            )
        })?;

        // Keys pasted into env files often arrive with escaped newlines.
        let pem = pem.replace("\\n", "\n");

        let secret = SecretKey::from_pkcs8_pem(&pem)
            .or_else(|_| SecretKey::from_sec1_pem(&pem))
            .map_err(|_| {
                OrchestrationError::ConfigurationError(
                    "CDP_API_KEY_SECRET is not a valid EC private key PEM".to_string(),
                )
            })?;
        let signing_key = SigningKey::from(&secret);

        // Fresh nonce per token for replay resistance.
        let mut nonce = [0u8; 16];
        rand::thread_rng().fill(&mut nonce[..]);

        let header = json!({
            "alg": "ES256",
            "kid": key_name,
            "nonce": hex::encode(nonce),
            "typ": "JWT",
        });

        let now = Utc::now().timestamp();
        let claims = json!({
            "iss": key_name,
            "nbf": now,
            "exp": now + CREDENTIAL_TTL_SECS,
            "sub": key_name,
            "uri": TOKEN_REQUEST_URI,
        });

        let signing_input = format!(
            "{}.{}",
            URL_SAFE_NO_PAD.encode(header.to_string()),
            URL_SAFE_NO_PAD.encode(claims.to_string())
        );

        let signature: Signature = signing_key.sign(signing_input.as_bytes());

        Ok(format!(
            "{}.{}",
            signing_input,
            URL_SAFE_NO_PAD.encode(signature.to_bytes())
        ))
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    #[serde(default)]
    token: Option<String>,
    #[serde(default)]
    channel_id: Option<String>,
}

#[async_trait]
impl CredentialIssuer for CdpCredentialIssuer {
    async fn issue(&self, addresses: &[AddressEntry], assets: &[String]) -> IssuanceOutcome {
        if addresses.is_empty() {
            return IssuanceOutcome::failed("At least one address is required");
        }

        let jwt = match self.bearer_jwt() {
            Ok(jwt) => jwt,
            Err(e) => {
                warn!("Session token request not attempted: {}", e);
                return IssuanceOutcome::failed(e.to_string());
            }
        };

        let body = json!({
            "addresses": addresses,
            "assets": assets,
        });

        let response = match self
            .client
            .post(&self.endpoint)
            .bearer_auth(&jwt)
            .json(&body)
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) => {
                warn!("Token endpoint unreachable: {}", e);
                return IssuanceOutcome::failed(format!("Token endpoint unreachable: {}", e));
            }
        };

        let status = response.status();
        let text = response.text().await.unwrap_or_default();

        if !status.is_success() {
            let reason = serde_json::from_str::<serde_json::Value>(&text)
                .ok()
                .and_then(|v| {
                    v.get("message")
                        .or_else(|| v.get("error"))
                        .and_then(serde_json::Value::as_str)
                        .map(str::to_string)
                })
                .unwrap_or_else(|| format!("Token endpoint returned {}", status));
            warn!(%status, "Session token issuance failed");
            return IssuanceOutcome::failed(reason);
        }

        match serde_json::from_str::<TokenResponse>(&text) {
            Ok(TokenResponse {
                token: Some(token),
                channel_id,
            }) if !token.is_empty() => {
                info!("Session token issued");
                IssuanceOutcome::Issued(SessionCredential::new(
                    token,
                    channel_id,
                    CREDENTIAL_TTL_SECS,
                ))
            }
            _ => {
                warn!("Token endpoint response lacked a token");
                IssuanceOutcome::failed("No token received from token endpoint")
            }
        }
    }
}
