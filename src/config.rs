//! Process configuration
//!
//! All environment lookups happen here, once, at startup. Clients receive
//! owned copies of whatever they need; nothing reads the environment later.

use std::env;

pub const DEFAULT_LEDGER_BASE_URL: &str = "https://api-sandbox.circle.com";
pub const DEFAULT_TOKEN_ENDPOINT: &str = "https://api.developer.coinbase.com/onramp/v1/token";

#[derive(Debug, Clone)]
pub struct Config {
    /// Gemini API key for intent classification and conversational replies.
    pub gemini_api_key: String,

    /// Processor (ledger) credentials. Absent key means ledger operations
    /// report "not configured" instead of attempting the network.
    pub ledger_api_key: Option<String>,
    pub ledger_base_url: String,

    /// Session-token signing identity (CDP API key name + EC private key PEM).
    pub session_key_name: Option<String>,
    pub session_private_key: Option<String>,
    pub token_endpoint: String,

    /// Static application identifier for fallback-mode ramp URLs.
    pub ramp_app_id: Option<String>,

    /// Wallet provider RPC and paymaster endpoints for sponsorship checks.
    pub wallet_rpc_url: String,
    pub paymaster_url: String,

    /// Host application base URL; used to derive default redirect targets.
    pub app_url: String,
    pub onramp_redirect_url: String,
    pub offramp_redirect_url: String,

    pub port: u16,
}

impl Config {
    pub fn from_env() -> Self {
        let app_url =
            env::var("APP_URL").unwrap_or_else(|_| "http://localhost:3000".to_string());

        let onramp_redirect_url = env::var("ONRAMP_REDIRECT_URL")
            .unwrap_or_else(|_| format!("{}/onramp/success", app_url));
        let offramp_redirect_url = env::var("OFFRAMP_REDIRECT_URL")
            .unwrap_or_else(|_| format!("{}/offramp/success", app_url));

        let port = env::var("PORT")
            .or_else(|_| env::var("API_PORT"))
            .ok()
            .and_then(|value| value.parse().ok())
            .unwrap_or(8080);

        Self {
            gemini_api_key: env::var("GEMINI_API_KEY").unwrap_or_default(),
            ledger_api_key: non_empty(env::var("CIRCLE_API_KEY").ok()),
            ledger_base_url: env::var("CIRCLE_API_BASE_URL")
                .unwrap_or_else(|_| DEFAULT_LEDGER_BASE_URL.to_string()),
            session_key_name: non_empty(env::var("CDP_API_KEY_NAME").ok()),
            session_private_key: non_empty(env::var("CDP_API_KEY_SECRET").ok()),
            token_endpoint: env::var("ONRAMP_TOKEN_ENDPOINT")
                .unwrap_or_else(|_| DEFAULT_TOKEN_ENDPOINT.to_string()),
            ramp_app_id: non_empty(env::var("ONRAMP_APP_ID").ok()),
            wallet_rpc_url: env::var("WALLET_RPC_URL")
                .unwrap_or_else(|_| "https://sepolia.base.org".to_string()),
            paymaster_url: env::var("PAYMASTER_URL")
                .unwrap_or_else(|_| "https://sepolia.base.org".to_string()),
            app_url,
            onramp_redirect_url,
            offramp_redirect_url,
            port,
        }
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.and_then(|v| {
        let trimmed = v.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    })
}
