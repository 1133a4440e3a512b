//! Core data models for the banking agent

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Minimum fiat amount accepted for deposits, withdrawals and ramp sessions.
pub const MIN_FIAT_AMOUNT: f64 = 10.0;

//
// ================= Banking Actions =================
//

/// A classified banking intent. Every variant except `None` carries optional
/// parameters; the orchestrator prompts for whatever is missing instead of
/// executing with incomplete input.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "RawAction", into = "RawAction")]
pub enum BankingAction {
    GetAccounts,
    Deposit {
        amount: Option<f64>,
    },
    Withdraw {
        amount: Option<f64>,
        bank_account_id: Option<String>,
    },
    Send {
        amount: Option<f64>,
        recipient_address: Option<String>,
    },
    None,
}

impl BankingAction {
    /// Wire name used by the classifier vocabulary and the confirm-execute API.
    pub fn kind(&self) -> &'static str {
        match self {
            BankingAction::GetAccounts => "get_bank_accounts",
            BankingAction::Deposit { .. } => "deposit_usdc",
            BankingAction::Withdraw { .. } => "withdraw_usdc",
            BankingAction::Send { .. } => "send_usdc",
            BankingAction::None => "none",
        }
    }
}

/// Ingress shape of an action as produced by the classification backend or
/// submitted by a confirm-execute request. Unknown action types and missing
/// parameter objects are tolerated here and normalized during conversion.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawAction {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub params: RawActionParams,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RawActionParams {
    pub amount: Option<f64>,
    #[serde(rename = "bankAccountId", alias = "bank_account_id")]
    pub bank_account_id: Option<String>,
    #[serde(rename = "recipient_address", alias = "recipientAddress")]
    pub recipient_address: Option<String>,
}

impl From<RawAction> for BankingAction {
    fn from(raw: RawAction) -> Self {
        let params = raw.params;
        match raw.kind.as_str() {
            "get_bank_accounts" => BankingAction::GetAccounts,
            "deposit_usdc" => BankingAction::Deposit {
                amount: params.amount,
            },
            "withdraw_usdc" => BankingAction::Withdraw {
                amount: params.amount,
                bank_account_id: params.bank_account_id,
            },
            "send_usdc" => BankingAction::Send {
                amount: params.amount,
                recipient_address: params.recipient_address,
            },
            _ => BankingAction::None,
        }
    }
}

impl From<BankingAction> for RawAction {
    fn from(action: BankingAction) -> Self {
        let kind = action.kind().to_string();
        let params = match action {
            BankingAction::Deposit { amount } => RawActionParams {
                amount,
                ..Default::default()
            },
            BankingAction::Withdraw {
                amount,
                bank_account_id,
            } => RawActionParams {
                amount,
                bank_account_id,
                ..Default::default()
            },
            BankingAction::Send {
                amount,
                recipient_address,
            } => RawActionParams {
                amount,
                recipient_address,
                ..Default::default()
            },
            _ => RawActionParams::default(),
        };
        RawAction { kind, params }
    }
}

/// Outcome of one orchestration pass over a classified action.
///
/// `NeedsInput` is a slot-filling prompt, `Executed` is a terminal success or
/// failure text, `Conversational` defers to the general chat reply path.
#[derive(Debug, Clone, PartialEq)]
pub enum ActionOutcome {
    Executed(String),
    NeedsInput(String),
    Conversational,
}

impl ActionOutcome {
    pub fn into_text(self) -> Option<String> {
        match self {
            ActionOutcome::Executed(text) | ActionOutcome::NeedsInput(text) => Some(text),
            ActionOutcome::Conversational => None,
        }
    }
}

//
// ================= Conversation =================
//

/// One turn of the visible conversation. History is replayed to the model on
/// every request and never persisted server-side.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

//
// ================= Ramp Sessions =================
//

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RampDirection {
    Onramp,
    Offramp,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RampMode {
    Secure,
    Fallback,
}

impl fmt::Display for RampMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RampMode::Secure => write!(f, "secure"),
            RampMode::Fallback => write!(f, "fallback"),
        }
    }
}

/// Short-lived session credential returned by the token endpoint.
/// The remote issuer enforces expiry; locally we only track the window for
/// display purposes and treat an empty token as issuance failure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionCredential {
    pub token: String,
    pub channel_id: Option<String>,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl SessionCredential {
    pub fn new(token: String, channel_id: Option<String>, ttl_secs: i64) -> Self {
        let issued_at = Utc::now();
        Self {
            token,
            channel_id,
            issued_at,
            expires_at: issued_at + Duration::seconds(ttl_secs),
        }
    }
}

/// A fully-parameterized hosted ramp session request. `credential` absent
/// selects the fallback branch of URL construction, never an error.
#[derive(Debug, Clone)]
pub struct RampRequest {
    pub direction: RampDirection,
    pub asset: String,
    pub fiat_amount: f64,
    pub network: String,
    pub method: Option<String>,
    pub user_address: String,
    pub credential: Option<SessionCredential>,
}

//
// ================= Sponsorship =================
//

/// Fee-sponsorship decision for one (sender, target, amount) tuple.
/// Computed fresh per tuple; never cached across parameter changes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SponsorshipDecision {
    pub eligible: bool,
    pub reason: String,
}

impl SponsorshipDecision {
    pub fn ineligible(reason: impl Into<String>) -> Self {
        Self {
            eligible: false,
            reason: reason.into(),
        }
    }
}

//
// ================= Provider DTOs =================
//

/// Bank account record as returned by the processor. Fields the provider may
/// omit are optional here and defaulted at the display boundary.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BankAccount {
    pub id: String,
    #[serde(default)]
    pub billing_details: Option<BillingDetails>,
    #[serde(default)]
    pub account_number: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
}

impl BankAccount {
    pub fn display_name(&self) -> &str {
        self.billing_details
            .as_ref()
            .and_then(|b| b.name.as_deref())
            .unwrap_or("Bank Account")
    }

    pub fn account_last4(&self) -> String {
        match &self.account_number {
            Some(number) if number.len() >= 4 => number[number.len() - 4..].to_string(),
            Some(number) if !number.is_empty() => number.clone(),
            _ => "****".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BillingDetails {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub line1: Option<String>,
    #[serde(default)]
    pub city: Option<String>,
    #[serde(default)]
    pub district: Option<String>,
    #[serde(default, rename = "postalCode")]
    pub postal_code: Option<String>,
    #[serde(default)]
    pub country: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Payout {
    pub id: String,
    #[serde(default)]
    pub status: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transfer {
    pub id: String,
    #[serde(default)]
    pub status: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecipientAddress {
    pub id: String,
    pub address: String,
    pub chain: String,
    #[serde(default)]
    pub currency: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DepositAddress {
    pub address: String,
    #[serde(default)]
    pub currency: Option<String>,
    #[serde(default)]
    pub chain: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Balance {
    pub amount: String,
    pub currency: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BalanceSheet {
    #[serde(default)]
    pub available: Vec<Balance>,
    #[serde(default)]
    pub unsettled: Vec<Balance>,
}

//
// ================= Creation Requests =================
//

/// Creation requests own their idempotency key, minted once at construction.
/// Re-sending the same request struct therefore re-sends the same key, which
/// is what makes caller-driven retries safe against double execution.
#[derive(Debug, Clone, Serialize)]
pub struct PayoutRequest {
    pub idempotency_key: Uuid,
    pub amount: f64,
    pub bank_account_id: String,
}

impl PayoutRequest {
    pub fn new(amount: f64, bank_account_id: impl Into<String>) -> Self {
        Self {
            idempotency_key: Uuid::new_v4(),
            amount,
            bank_account_id: bank_account_id.into(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct TransferRequest {
    pub idempotency_key: Uuid,
    pub address_id: String,
    pub amount: f64,
}

impl TransferRequest {
    pub fn new(address_id: impl Into<String>, amount: f64) -> Self {
        Self {
            idempotency_key: Uuid::new_v4(),
            address_id: address_id.into(),
            amount,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RecipientAddressRequest {
    pub idempotency_key: Uuid,
    pub address: String,
    pub chain: String,
    pub currency: String,
    pub description: String,
}

impl RecipientAddressRequest {
    pub fn new(address: impl Into<String>, chain: impl Into<String>) -> Self {
        let address = address.into();
        let chain = chain.into();
        Self {
            idempotency_key: Uuid::new_v4(),
            description: format!("{} wallet: {}", chain, address),
            address,
            chain,
            currency: "USD".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct BankAccountRequest {
    pub idempotency_key: Uuid,
    pub account_number: String,
    pub routing_number: String,
    pub holder_name: String,
    pub billing_address: PostalAddress,
    pub bank_name: Option<String>,
}

impl BankAccountRequest {
    pub fn new(
        account_number: impl Into<String>,
        routing_number: impl Into<String>,
        holder_name: impl Into<String>,
        billing_address: PostalAddress,
    ) -> Self {
        Self {
            idempotency_key: Uuid::new_v4(),
            account_number: account_number.into(),
            routing_number: routing_number.into(),
            holder_name: holder_name.into(),
            billing_address,
            bank_name: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PostalAddress {
    pub line1: String,
    pub city: String,
    pub district: String,
    #[serde(rename = "postalCode", alias = "postal_code")]
    pub postal_code: String,
    #[serde(default = "default_country")]
    pub country: String,
}

fn default_country() -> String {
    "US".to_string()
}

#[derive(Debug, Clone, Serialize)]
pub struct DepositAddressRequest {
    pub idempotency_key: Uuid,
    pub currency: String,
    pub chain: String,
}

impl DepositAddressRequest {
    pub fn new(currency: impl Into<String>, chain: impl Into<String>) -> Self {
        Self {
            idempotency_key: Uuid::new_v4(),
            currency: currency.into(),
            chain: chain.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_action_wire_round_trip() {
        let action = BankingAction::Withdraw {
            amount: Some(50.0),
            bank_account_id: Some("abc123".to_string()),
        };

        let json = serde_json::to_value(&action).unwrap();
        assert_eq!(json["type"], "withdraw_usdc");
        assert_eq!(json["params"]["amount"], 50.0);
        assert_eq!(json["params"]["bankAccountId"], "abc123");

        let back: BankingAction = serde_json::from_value(json).unwrap();
        assert_eq!(back, action);
    }

    #[test]
    fn test_unknown_action_kind_is_none() {
        let parsed: BankingAction =
            serde_json::from_str(r#"{"type": "buy_lottery_ticket", "params": {}}"#).unwrap();
        assert_eq!(parsed, BankingAction::None);
    }

    #[test]
    fn test_action_without_params_object() {
        let parsed: BankingAction = serde_json::from_str(r#"{"type": "deposit_usdc"}"#).unwrap();
        assert_eq!(parsed, BankingAction::Deposit { amount: None });
    }

    #[test]
    fn test_bank_account_display_defaults() {
        let account: BankAccount = serde_json::from_str(r#"{"id": "ba-1"}"#).unwrap();
        assert_eq!(account.display_name(), "Bank Account");
        assert_eq!(account.account_last4(), "****");

        let account: BankAccount = serde_json::from_str(
            r#"{"id": "ba-2", "billingDetails": {"name": "Checking"}, "accountNumber": "000123456789"}"#,
        )
        .unwrap();
        assert_eq!(account.display_name(), "Checking");
        assert_eq!(account.account_last4(), "6789");
    }

    #[test]
    fn test_creation_request_key_is_stable() {
        let request = PayoutRequest::new(25.0, "ba-1");
        let key = request.idempotency_key;

        // Serializing twice must carry the same key: that is the retry contract.
        let first = serde_json::to_value(&request).unwrap();
        let second = serde_json::to_value(&request).unwrap();
        assert_eq!(first["idempotency_key"], second["idempotency_key"]);
        assert_eq!(first["idempotency_key"], serde_json::json!(key.to_string()));

        // A new logical request gets a fresh key.
        let other = PayoutRequest::new(25.0, "ba-1");
        assert_ne!(other.idempotency_key, key);
    }

    #[test]
    fn test_session_credential_window() {
        let credential = SessionCredential::new("tok".to_string(), None, 120);
        assert_eq!(
            (credential.expires_at - credential.issued_at).num_seconds(),
            120
        );
    }
}
