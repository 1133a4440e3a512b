//! Stablecoin processor (ledger) client
//!
//! HTTP-backed operations against the Circle-style processor API. All
//! mutating calls carry the request-owned idempotency key so caller-driven
//! retries never double-execute. Upstream error messages are surfaced
//! verbatim when the provider returns a JSON body with a `message` field.

use crate::error::OrchestrationError;
use crate::models::{
    BalanceSheet, BankAccount, BankAccountRequest, DepositAddress, DepositAddressRequest, Payout,
    PayoutRequest, RecipientAddress, RecipientAddressRequest, Transfer, TransferRequest,
};
use crate::Result;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{debug, warn};

/// Ledger operations boundary. The orchestrator and the HTTP surface depend
/// on this trait; tests substitute an in-memory implementation.
#[async_trait::async_trait]
pub trait LedgerOps: Send + Sync {
    async fn list_bank_accounts(&self, wallet_address: Option<&str>) -> Result<Vec<BankAccount>>;
    async fn create_bank_account(&self, request: &BankAccountRequest) -> Result<BankAccount>;
    async fn create_payout(&self, request: &PayoutRequest) -> Result<Payout>;
    async fn get_payout(&self, payout_id: &str) -> Result<Payout>;
    async fn list_recipient_addresses(&self) -> Result<Vec<RecipientAddress>>;
    async fn create_recipient_address(
        &self,
        request: &RecipientAddressRequest,
    ) -> Result<RecipientAddress>;
    async fn create_transfer(&self, request: &TransferRequest) -> Result<Transfer>;
    async fn create_blockchain_address(
        &self,
        request: &DepositAddressRequest,
    ) -> Result<DepositAddress>;
    async fn list_blockchain_addresses(&self) -> Result<Vec<DepositAddress>>;
    async fn get_balances(&self) -> Result<BalanceSheet>;
    async fn wire_instructions(&self, bank_account_id: &str, currency: &str) -> Result<Value>;
    async fn configuration(&self) -> Result<Value>;
}

/// Provider responses wrap their payload in a `data` field.
#[derive(Debug, Deserialize)]
struct Envelope<T> {
    data: T,
}

pub struct LedgerClient {
    client: Client,
    api_key: Option<String>,
    base_url: String,
}

impl LedgerClient {
    pub fn new(api_key: Option<String>, base_url: impl Into<String>) -> Self {
        let client = Client::builder()
            .pool_idle_timeout(Duration::from_secs(60))
            .pool_max_idle_per_host(8)
            .timeout(Duration::from_secs(30))
            .build()
            .expect("Failed to build HTTP client");

        Self {
            client,
            api_key,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    pub fn is_configured(&self) -> bool {
        self.api_key.is_some()
    }

    fn api_key(&self) -> Result<&str> {
        self.api_key.as_deref().ok_or_else(|| {
            OrchestrationError::ConfigurationError("CIRCLE_API_KEY is not configured".to_string())
        })
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        wallet_address: Option<&str>,
    ) -> Result<T> {
        let api_key = self.api_key()?;
        let url = format!("{}{}", self.base_url, path);

        debug!(%url, "Ledger API GET");

        let mut request = self
            .client
            .get(&url)
            .bearer_auth(api_key)
            .header("Accept", "application/json");
        if let Some(address) = wallet_address {
            request = request.header("X-Wallet-Address", address);
        }

        let response = request.send().await.map_err(|e| {
            OrchestrationError::LedgerError(format!("Ledger request failed for {}: {}", path, e))
        })?;

        Self::decode(path, response).await
    }

    async fn post_json<T: DeserializeOwned>(&self, path: &str, body: &Value) -> Result<T> {
        let api_key = self.api_key()?;
        let url = format!("{}{}", self.base_url, path);

        debug!(%url, "Ledger API POST");

        let response = self
            .client
            .post(&url)
            .bearer_auth(api_key)
            .header("Accept", "application/json")
            .json(body)
            .send()
            .await
            .map_err(|e| {
                OrchestrationError::LedgerError(format!(
                    "Ledger request failed for {}: {}",
                    path, e
                ))
            })?;

        Self::decode(path, response).await
    }

    async fn decode<T: DeserializeOwned>(path: &str, response: reqwest::Response) -> Result<T> {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();

        if !status.is_success() {
            warn!(%status, path, "Ledger API error");
            return Err(OrchestrationError::LedgerError(extract_error_message(
                status, &body,
            )));
        }

        serde_json::from_str::<Envelope<T>>(&body)
            .map(|envelope| envelope.data)
            .map_err(|e| {
                OrchestrationError::LedgerError(format!(
                    "Invalid ledger response for {}: {}",
                    path, e
                ))
            })
    }
}

/// Pull the provider's own error text out of its JSON body when possible,
/// so upstream failures stay debuggable end to end.
fn extract_error_message(status: reqwest::StatusCode, body: &str) -> String {
    serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|v| {
            v.get("message")
                .or_else(|| v.get("error"))
                .and_then(Value::as_str)
                .map(str::to_string)
        })
        .unwrap_or_else(|| {
            if body.is_empty() {
                format!("Ledger API error: {}", status)
            } else {
                body.to_string()
            }
        })
}

fn amount_body(amount: f64) -> Value {
    json!({ "amount": amount.to_string(), "currency": "USD" })
}

#[async_trait::async_trait]
impl LedgerOps for LedgerClient {
    async fn list_bank_accounts(&self, wallet_address: Option<&str>) -> Result<Vec<BankAccount>> {
        self.get_json("/v1/banks/wires", wallet_address).await
    }

    async fn create_bank_account(&self, request: &BankAccountRequest) -> Result<BankAccount> {
        let billing = &request.billing_address;
        let body = json!({
            "idempotencyKey": request.idempotency_key,
            "accountNumber": request.account_number,
            "routingNumber": request.routing_number,
            "billingDetails": {
                "name": request.holder_name,
                "line1": billing.line1,
                "city": billing.city,
                "district": billing.district,
                "postalCode": billing.postal_code,
                "country": billing.country,
            },
            "bankAddress": {
                "bankName": request.bank_name.as_deref().unwrap_or("Bank"),
                "line1": billing.line1,
                "city": billing.city,
                "district": billing.district,
                "country": billing.country,
            },
        });
        self.post_json("/v1/banks/wires", &body).await
    }

    async fn create_payout(&self, request: &PayoutRequest) -> Result<Payout> {
        let body = json!({
            "idempotencyKey": request.idempotency_key,
            "source": { "type": "wallet", "id": "master" },
            "amount": amount_body(request.amount),
            "destination": { "type": "wire", "id": request.bank_account_id },
        });
        self.post_json("/v1/payouts", &body).await
    }

    async fn get_payout(&self, payout_id: &str) -> Result<Payout> {
        self.get_json(&format!("/v1/payouts/{}", payout_id), None)
            .await
    }

    async fn list_recipient_addresses(&self) -> Result<Vec<RecipientAddress>> {
        self.get_json("/v1/addressBook/recipients", None).await
    }

    async fn create_recipient_address(
        &self,
        request: &RecipientAddressRequest,
    ) -> Result<RecipientAddress> {
        let body = json!({
            "idempotencyKey": request.idempotency_key,
            "address": request.address,
            "chain": request.chain,
            "currency": request.currency,
            "description": request.description,
        });
        self.post_json("/v1/addressBook/recipients", &body).await
    }

    async fn create_transfer(&self, request: &TransferRequest) -> Result<Transfer> {
        let body = json!({
            "idempotencyKey": request.idempotency_key,
            "source": { "type": "wallet", "id": "master" },
            "destination": { "type": "verified_blockchain", "addressId": request.address_id },
            "amount": amount_body(request.amount),
        });
        self.post_json("/v1/transfers", &body).await
    }

    async fn create_blockchain_address(
        &self,
        request: &DepositAddressRequest,
    ) -> Result<DepositAddress> {
        let body = json!({
            "idempotencyKey": request.idempotency_key,
            "currency": request.currency,
            "chain": request.chain,
        });
        self.post_json("/v1/wallets/addresses/deposit", &body).await
    }

    async fn list_blockchain_addresses(&self) -> Result<Vec<DepositAddress>> {
        self.get_json("/v1/wallets/addresses/deposit", None).await
    }

    async fn get_balances(&self) -> Result<BalanceSheet> {
        self.get_json("/v1/balances", None).await
    }

    async fn wire_instructions(&self, bank_account_id: &str, currency: &str) -> Result<Value> {
        self.get_json(
            &format!(
                "/v1/banks/wires/{}/instructions?currency={}",
                bank_account_id, currency
            ),
            None,
        )
        .await
    }

    async fn configuration(&self) -> Result<Value> {
        self.get_json("/v1/configuration", None).await
    }
}

/// Move funds from the processor balance to the user's wallet: resolve (or
/// create) the verified recipient address for the wallet, then transfer to
/// it by id. Shared by the orchestrator and the deposit passthrough route.
pub async fn transfer_to_wallet(
    ledger: &dyn LedgerOps,
    amount: f64,
    user_address: &str,
    chain: &str,
) -> Result<Transfer> {
    let recipients = ledger.list_recipient_addresses().await?;

    let address_id = match recipients.iter().find(|r| {
        r.address.eq_ignore_ascii_case(user_address) && r.chain.eq_ignore_ascii_case(chain)
    }) {
        Some(existing) => existing.id.clone(),
        None => {
            let request = RecipientAddressRequest::new(user_address, chain);
            ledger.create_recipient_address(&request).await?.id
        }
    };

    let request = TransferRequest::new(address_id, amount);
    ledger.create_transfer(&request).await
}


#[cfg(test)]
mod tests {
    use super::testing::MockLedger;
    use super::*;
    use crate::models::PayoutRequest;

    #[test]
    fn test_extract_error_message_prefers_provider_text() {
        let status = reqwest::StatusCode::BAD_REQUEST;
        let body = r#"{"code": 1078, "message": "Insufficient funds in master wallet"}"#;
        assert_eq!(
            extract_error_message(status, body),
            "Insufficient funds in master wallet"
        );

        assert_eq!(
            extract_error_message(reqwest::StatusCode::BAD_GATEWAY, ""),
            "Ledger API error: 502 Bad Gateway"
        );

        assert_eq!(extract_error_message(status, "plain text"), "plain text");
    }

    #[test]
    fn test_unconfigured_client_reports_eagerly() {
        let client = LedgerClient::new(None, "https://api-sandbox.circle.com");
        assert!(!client.is_configured());
        assert!(matches!(
            client.api_key(),
            Err(OrchestrationError::ConfigurationError(_))
        ));
    }

    #[tokio::test]
    async fn test_retry_with_same_key_is_idempotent() {
        let ledger = MockLedger::default();
        let request = PayoutRequest::new(50.0, "ba-1");

        let first = ledger.create_payout(&request).await.unwrap();
        let second = ledger.create_payout(&request).await.unwrap();

        assert_eq!(first.id, second.id);
        assert_eq!(ledger.payouts.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_distinct_requests_mint_distinct_payouts() {
        let ledger = MockLedger::default();

        ledger
            .create_payout(&PayoutRequest::new(50.0, "ba-1"))
            .await
            .unwrap();
        ledger
            .create_payout(&PayoutRequest::new(50.0, "ba-1"))
            .await
            .unwrap();

        assert_eq!(ledger.payouts.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_transfer_to_wallet_reuses_existing_recipient() {
        let ledger = MockLedger::default();
        ledger.recipients.lock().unwrap().push(RecipientAddress {
            id: "addr-existing".to_string(),
            address: "0xABCD".to_string(),
            chain: "BASE".to_string(),
            currency: Some("USD".to_string()),
        });

        let transfer = transfer_to_wallet(&ledger, 100.0, "0xabcd", "BASE")
            .await
            .unwrap();

        assert!(transfer.id.starts_with("transfer-"));
        // No new recipient was created for a case-insensitive address match.
        assert_eq!(ledger.recipients.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_transfer_to_wallet_creates_missing_recipient() {
        let ledger = MockLedger::default();

        transfer_to_wallet(&ledger, 100.0, "0xabcd", "BASE")
            .await
            .unwrap();

        let recipients = ledger.recipients.lock().unwrap();
        assert_eq!(recipients.len(), 1);
        assert_eq!(recipients[0].address, "0xabcd");
    }
}
