//! Hosted on/off-ramp session URLs
//!
//! Secure mode parameterizes the hosted checkout with an issued session
//! token; fallback mode reconstructs an equivalent URL from the static
//! application id and explicit address parameters. Fallback is a supported
//! code path, not an error state: issuance failure silently downgrades.
//! Every emitted URL carries the redirect URL and the partner user id.

use crate::config::Config;
use crate::error::OrchestrationError;
use crate::models::{RampDirection, RampMode, RampRequest, MIN_FIAT_AMOUNT};
use crate::session::{AddressEntry, CredentialIssuer, IssuanceOutcome};
use crate::Result;
use serde_json::json;
use std::sync::Arc;
use tracing::{info, warn};
use url::Url;

pub const ONRAMP_BASE_URL: &str = "https://pay.coinbase.com/buy/select-asset";
pub const OFFRAMP_BASE_URL: &str = "https://pay.coinbase.com/v3/sell/input";

/// Hosted checkout truncates partner identifiers beyond this length.
const PARTNER_USER_ID_MAX_LEN: usize = 49;

const DEFAULT_ASSET: &str = "USDC";
const DEFAULT_NETWORK: &str = "base";
const DEFAULT_METHOD: &str = "ACH_BANK_ACCOUNT";

pub struct RampUrlBuilder {
    app_id: Option<String>,
    onramp_redirect_url: String,
    offramp_redirect_url: String,
}

impl RampUrlBuilder {
    pub fn new(config: &Config) -> Self {
        Self {
            app_id: config.ramp_app_id.clone(),
            onramp_redirect_url: config.onramp_redirect_url.clone(),
            offramp_redirect_url: config.offramp_redirect_url.clone(),
        }
    }

    #[cfg(test)]
    fn for_tests(app_id: Option<&str>) -> Self {
        Self {
            app_id: app_id.map(str::to_string),
            onramp_redirect_url: "https://app.example.com/onramp/success".to_string(),
            offramp_redirect_url: "https://app.example.com/offramp/success".to_string(),
        }
    }

    /// Build the hosted session URL for a fully-validated request.
    ///
    /// A credential with an empty token counts as issuance failure and
    /// selects fallback construction, never a malformed URL.
    pub fn build(&self, request: &RampRequest) -> Result<(Url, RampMode)> {
        if request.user_address.trim().is_empty() {
            return Err(OrchestrationError::ValidationError(
                "userAddress is required".to_string(),
            ));
        }

        let base = match request.direction {
            RampDirection::Onramp => ONRAMP_BASE_URL,
            RampDirection::Offramp => OFFRAMP_BASE_URL,
        };
        let redirect_url = match request.direction {
            RampDirection::Onramp => &self.onramp_redirect_url,
            RampDirection::Offramp => &self.offramp_redirect_url,
        };

        let token = request
            .credential
            .as_ref()
            .map(|credential| credential.token.as_str())
            .filter(|token| !token.is_empty());

        let mut url = Url::parse(base)?;
        let mode = {
            let mut pairs = url.query_pairs_mut();

            let mode = match token {
                Some(token) => {
                    pairs.append_pair("sessionToken", token);
                    RampMode::Secure
                }
                None => {
                    let app_id = self.app_id.as_deref().ok_or_else(|| {
                        OrchestrationError::ConfigurationError(
                            "ONRAMP_APP_ID is not configured for fallback mode".to_string(),
                        )
                    })?;
                    pairs.append_pair("appId", app_id);
                    let mut addresses = serde_json::Map::new();
                    addresses.insert(
                        request.user_address.clone(),
                        json!([request.network]),
                    );
                    pairs.append_pair(
                        "addresses",
                        &serde_json::Value::Object(addresses).to_string(),
                    );
                    pairs.append_pair("assets", &json!([request.asset]).to_string());
                    RampMode::Fallback
                }
            };

            if request.fiat_amount > 0.0 {
                pairs.append_pair("presetFiatAmount", &request.fiat_amount.to_string());
            }

            match request.direction {
                RampDirection::Onramp => {
                    pairs.append_pair("fiatCurrency", "USD");
                    pairs.append_pair("defaultNetwork", &request.network);
                    pairs.append_pair("defaultAsset", &request.asset);
                    if let Some(method) = &request.method {
                        pairs.append_pair("defaultPaymentMethod", &method.to_uppercase());
                    }
                }
                RampDirection::Offramp => {
                    pairs.append_pair("defaultNetwork", &request.network);
                    pairs.append_pair("defaultAsset", &request.asset);
                    if let Some(method) = &request.method {
                        pairs.append_pair("defaultCashoutMethod", &method.to_uppercase());
                    }
                }
            }

            let partner_user_id: String = request
                .user_address
                .chars()
                .take(PARTNER_USER_ID_MAX_LEN)
                .collect();
            pairs.append_pair("partnerUserId", &partner_user_id);
            pairs.append_pair("redirectUrl", redirect_url);

            mode
        };

        Ok((url, mode))
    }
}

/// Outcome of one ramp session request: the navigable URL plus the echo
/// fields the caller renders back to the user.
#[derive(Debug, Clone)]
pub struct RampSession {
    pub url: String,
    pub mode: RampMode,
    pub direction: RampDirection,
    pub amount: f64,
    pub asset: String,
    pub network: String,
    pub method: String,
    pub credential_issued: bool,
    pub expires_in: Option<i64>,
}

/// Validates, attempts issuance, and builds the session URL.
pub struct RampService {
    issuer: Arc<dyn CredentialIssuer>,
    builder: RampUrlBuilder,
}

impl RampService {
    pub fn new(issuer: Arc<dyn CredentialIssuer>, builder: RampUrlBuilder) -> Self {
        Self { issuer, builder }
    }

    pub async fn create_session(
        &self,
        direction: RampDirection,
        amount: f64,
        user_address: &str,
        method: Option<String>,
    ) -> Result<RampSession> {
        if user_address.trim().is_empty() {
            return Err(OrchestrationError::ValidationError(
                "Missing required parameters: amount and userAddress".to_string(),
            ));
        }

        // Boundary validation happens before any token issuance is attempted.
        if !amount.is_finite() || amount < MIN_FIAT_AMOUNT {
            return Err(OrchestrationError::ValidationError(format!(
                "Invalid amount. Minimum ${} required.",
                MIN_FIAT_AMOUNT
            )));
        }

        let outcome = self
            .issuer
            .issue(&[AddressEntry::base(user_address)], &["USDC".to_string()])
            .await;

        let credential = match outcome {
            IssuanceOutcome::Issued(credential) => Some(credential),
            IssuanceOutcome::Failed { reason } => {
                warn!("Session token issuance failed, using fallback mode: {}", reason);
                None
            }
        };

        let method = method.unwrap_or_else(|| DEFAULT_METHOD.to_string());
        let request = RampRequest {
            direction,
            asset: DEFAULT_ASSET.to_string(),
            fiat_amount: amount,
            network: DEFAULT_NETWORK.to_string(),
            method: Some(method.clone()),
            user_address: user_address.to_string(),
            credential,
        };

        let (url, mode) = self.builder.build(&request)?;
        info!(%mode, "Ramp session URL generated");

        Ok(RampSession {
            url: url.into(),
            mode,
            direction,
            amount,
            asset: request.asset,
            network: request.network,
            method,
            credential_issued: mode == RampMode::Secure,
            expires_in: match mode {
                RampMode::Secure => Some(crate::session::CREDENTIAL_TTL_SECS),
                RampMode::Fallback => None,
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::SessionCredential;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct StubIssuer {
        outcome: IssuanceOutcome,
        calls: AtomicUsize,
    }

    impl StubIssuer {
        fn issuing(token: &str) -> Self {
            Self {
                outcome: IssuanceOutcome::Issued(SessionCredential::new(
                    token.to_string(),
                    None,
                    120,
                )),
                calls: AtomicUsize::new(0),
            }
        }

        fn failing() -> Self {
            Self {
                outcome: IssuanceOutcome::failed("Token endpoint returned 503"),
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl CredentialIssuer for StubIssuer {
        async fn issue(&self, _addresses: &[AddressEntry], _assets: &[String]) -> IssuanceOutcome {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.outcome.clone()
        }
    }

    fn query_map(url: &Url) -> HashMap<String, String> {
        url.query_pairs()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn onramp_request(credential: Option<SessionCredential>) -> RampRequest {
        RampRequest {
            direction: RampDirection::Onramp,
            asset: "USDC".to_string(),
            fiat_amount: 100.0,
            network: "base".to_string(),
            method: Some("ach_bank_account".to_string()),
            user_address: "0x1111222233334444555566667777888899990000".to_string(),
            credential,
        }
    }

    #[test]
    fn test_secure_url_round_trips_amount_network_asset() {
        let builder = RampUrlBuilder::for_tests(Some("app-1"));
        let credential = SessionCredential::new("tok-123".to_string(), None, 120);

        let (url, mode) = builder.build(&onramp_request(Some(credential))).unwrap();
        assert_eq!(mode, RampMode::Secure);

        let params = query_map(&url);
        assert_eq!(params["sessionToken"], "tok-123");
        assert_eq!(params["presetFiatAmount"], "100");
        assert_eq!(params["defaultNetwork"], "base");
        assert_eq!(params["defaultAsset"], "USDC");
        assert_eq!(params["defaultPaymentMethod"], "ACH_BANK_ACCOUNT");
        assert!(!params.contains_key("appId"));
    }

    #[test]
    fn test_fallback_url_is_usable_without_credential() {
        let builder = RampUrlBuilder::for_tests(Some("app-1"));

        let (url, mode) = builder.build(&onramp_request(None)).unwrap();
        assert_eq!(mode, RampMode::Fallback);
        assert!(url.as_str().starts_with(ONRAMP_BASE_URL));

        let params = query_map(&url);
        assert_eq!(params["appId"], "app-1");
        let addresses: serde_json::Value = serde_json::from_str(&params["addresses"]).unwrap();
        assert_eq!(
            addresses["0x1111222233334444555566667777888899990000"][0],
            "base"
        );
        assert!(!params.contains_key("sessionToken"));
    }

    #[test]
    fn test_empty_token_selects_fallback_not_malformed_url() {
        let builder = RampUrlBuilder::for_tests(Some("app-1"));
        let credential = SessionCredential::new(String::new(), None, 120);

        let (_, mode) = builder.build(&onramp_request(Some(credential))).unwrap();
        assert_eq!(mode, RampMode::Fallback);
    }

    #[test]
    fn test_every_url_carries_redirect_and_partner_id() {
        let builder = RampUrlBuilder::for_tests(Some("app-1"));

        for credential in [
            None,
            Some(SessionCredential::new("tok".to_string(), None, 120)),
        ] {
            let (url, _) = builder.build(&onramp_request(credential)).unwrap();
            let params = query_map(&url);
            assert!(params.contains_key("redirectUrl"));
            assert!(params.contains_key("partnerUserId"));
        }
    }

    #[test]
    fn test_partner_user_id_is_truncated() {
        let builder = RampUrlBuilder::for_tests(Some("app-1"));
        let mut request = onramp_request(None);
        request.user_address = "0x".to_string() + &"a".repeat(60);

        let (url, _) = builder.build(&request).unwrap();
        let params = query_map(&url);
        assert_eq!(params["partnerUserId"].len(), 49);
    }

    #[test]
    fn test_offramp_uses_cashout_method_and_sell_base() {
        let builder = RampUrlBuilder::for_tests(Some("app-1"));
        let mut request = onramp_request(Some(SessionCredential::new(
            "tok".to_string(),
            None,
            120,
        )));
        request.direction = RampDirection::Offramp;

        let (url, _) = builder.build(&request).unwrap();
        assert!(url.as_str().starts_with(OFFRAMP_BASE_URL));

        let params = query_map(&url);
        assert_eq!(params["defaultCashoutMethod"], "ACH_BANK_ACCOUNT");
        assert!(!params.contains_key("defaultPaymentMethod"));
        assert!(!params.contains_key("fiatCurrency"));
    }

    #[tokio::test]
    async fn test_issuance_failure_yields_valid_fallback_session() {
        let issuer = Arc::new(StubIssuer::failing());
        let service = RampService::new(issuer.clone(), RampUrlBuilder::for_tests(Some("app-1")));

        let session = service
            .create_session(RampDirection::Onramp, 50.0, "0xabc", None)
            .await
            .unwrap();

        assert_eq!(session.mode, RampMode::Fallback);
        assert!(!session.credential_issued);
        assert_eq!(session.expires_in, None);
        // Still syntactically valid and navigable.
        let url = Url::parse(&session.url).unwrap();
        assert!(query_map(&url).contains_key("redirectUrl"));
    }

    #[tokio::test]
    async fn test_secure_session_reports_expiry() {
        let issuer = Arc::new(StubIssuer::issuing("tok-9"));
        let service = RampService::new(issuer, RampUrlBuilder::for_tests(Some("app-1")));

        let session = service
            .create_session(RampDirection::Offramp, 50.0, "0xabc", Some("ach_bank_account".into()))
            .await
            .unwrap();

        assert_eq!(session.mode, RampMode::Secure);
        assert_eq!(session.expires_in, Some(120));
        assert!(session.url.contains("sessionToken"));
    }

    #[tokio::test]
    async fn test_sub_minimum_amount_skips_issuance() {
        let issuer = Arc::new(StubIssuer::issuing("tok"));
        let service = RampService::new(issuer.clone(), RampUrlBuilder::for_tests(Some("app-1")));

        let result = service
            .create_session(RampDirection::Onramp, 5.0, "0xabc", None)
            .await;

        assert!(matches!(
            result,
            Err(OrchestrationError::ValidationError(_))
        ));
        assert_eq!(issuer.calls.load(Ordering::SeqCst), 0);
    }
}
