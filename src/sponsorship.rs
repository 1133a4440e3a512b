//! Fee-sponsorship (paymaster) eligibility
//!
//! Decides whether a prospective transfer would be gas-sponsored. Two
//! independent checks must agree: the wallet reports paymaster support for
//! the active chain, and the paymaster service returns sponsorship data for
//! the exact call. Probe failures make the transfer ineligible with the
//! failure text as the reason; they never propagate to the caller.

use crate::models::SponsorshipDecision;
use crate::Result;
use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, warn};

pub const BASE_SEPOLIA_CHAIN_ID: u64 = 84532;

/// Input-stability window before a recomputation actually runs.
pub const RECOMPUTE_DEBOUNCE: Duration = Duration::from_millis(500);

/// Wallet-reported capability metadata, keyed by chain id.
#[async_trait]
pub trait CapabilityProbe: Send + Sync {
    async fn wallet_capabilities(&self, address: &str) -> Result<Value>;
}

/// Sponsorship-decision endpoint: `Some(data)` when the paymaster will cover
/// the call, `None` when it declines.
#[async_trait]
pub trait PaymasterService: Send + Sync {
    async fn sponsorship_data(
        &self,
        sender: &str,
        target: &str,
        value: u128,
        call_data: &str,
    ) -> Result<Option<Value>>;
}

pub struct SponsorshipChecker {
    probe: Arc<dyn CapabilityProbe>,
    paymaster: Arc<dyn PaymasterService>,
    chain_id: u64,
}

impl SponsorshipChecker {
    pub fn new(
        probe: Arc<dyn CapabilityProbe>,
        paymaster: Arc<dyn PaymasterService>,
        chain_id: u64,
    ) -> Self {
        Self {
            probe,
            paymaster,
            chain_id,
        }
    }

    /// Decide eligibility for one (sender, target, value, call_data) tuple.
    /// Infallible by contract: any probing error becomes an ineligible
    /// decision carrying the error text.
    pub async fn check(
        &self,
        sender: &str,
        target: &str,
        value: u128,
        call_data: &str,
    ) -> SponsorshipDecision {
        match self.try_check(sender, target, value, call_data).await {
            Ok(decision) => decision,
            Err(e) => {
                warn!("Sponsorship check failed: {}", e);
                SponsorshipDecision::ineligible(format!("Sponsorship check failed: {}", e))
            }
        }
    }

    async fn try_check(
        &self,
        sender: &str,
        target: &str,
        value: u128,
        call_data: &str,
    ) -> Result<SponsorshipDecision> {
        let capabilities = self.probe.wallet_capabilities(sender).await?;

        let supported = chain_capabilities(&capabilities, self.chain_id)
            .and_then(|caps| caps.pointer("/paymasterService/supported"))
            .and_then(Value::as_bool)
            .unwrap_or(false);

        if !supported {
            return Ok(SponsorshipDecision::ineligible(
                "Paymaster service not supported by this wallet",
            ));
        }

        debug!(chain_id = self.chain_id, "Wallet reports paymaster support");

        match self
            .paymaster
            .sponsorship_data(sender, target, value, call_data)
            .await?
        {
            Some(_) => Ok(SponsorshipDecision {
                eligible: true,
                reason: "Transaction will be sponsored by paymaster".to_string(),
            }),
            None => Ok(SponsorshipDecision::ineligible(
                "Paymaster declined sponsorship",
            )),
        }
    }
}

/// Providers are inconsistent about chain-id keys: try decimal, then hex,
/// then lowercased hex.
fn chain_capabilities(capabilities: &Value, chain_id: u64) -> Option<&Value> {
    let decimal = chain_id.to_string();
    let hex = format!("0x{:X}", chain_id);
    let hex_lower = hex.to_lowercase();

    capabilities
        .get(&decimal)
        .or_else(|| capabilities.get(&hex))
        .or_else(|| capabilities.get(&hex_lower))
}

/// Debounced recomputation with a monotonically increasing sequence number.
///
/// Every parameter change books a new ticket; a computation whose ticket is
/// no longer the latest at completion is discarded, so an out-of-order slow
/// reply can never overwrite a fresher decision.
pub struct SponsorshipMonitor {
    checker: Arc<SponsorshipChecker>,
    seq: AtomicU64,
    latest: RwLock<Option<SponsorshipDecision>>,
}

impl SponsorshipMonitor {
    pub fn new(checker: Arc<SponsorshipChecker>) -> Self {
        Self {
            checker,
            seq: AtomicU64::new(0),
            latest: RwLock::new(None),
        }
    }

    /// Schedule a recomputation for the current parameter tuple. Returns the
    /// fresh decision, or `None` if this request was superseded while
    /// debouncing or in flight.
    pub async fn recompute(
        &self,
        sender: &str,
        target: &str,
        value: u128,
        call_data: &str,
    ) -> Option<SponsorshipDecision> {
        let ticket = self.seq.fetch_add(1, Ordering::SeqCst) + 1;

        tokio::time::sleep(RECOMPUTE_DEBOUNCE).await;
        if self.seq.load(Ordering::SeqCst) != ticket {
            return None;
        }

        let decision = self.checker.check(sender, target, value, call_data).await;

        // Discard stale completions: only the latest issued request may
        // publish its result.
        if self.seq.load(Ordering::SeqCst) != ticket {
            return None;
        }

        *self.latest.write().await = Some(decision.clone());
        Some(decision)
    }

    pub async fn latest(&self) -> Option<SponsorshipDecision> {
        self.latest.read().await.clone()
    }
}

/// JSON-RPC capability probe against a wallet provider endpoint.
pub struct RpcCapabilityProbe {
    client: reqwest::Client,
    rpc_url: String,
}

impl RpcCapabilityProbe {
    pub fn new(rpc_url: impl Into<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .expect("Failed to build HTTP client");
        Self {
            client,
            rpc_url: rpc_url.into(),
        }
    }

    async fn rpc(&self, method: &str, params: Value) -> Result<Value> {
        let body = json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": method,
            "params": params,
        });

        let response: Value = self
            .client
            .post(&self.rpc_url)
            .json(&body)
            .send()
            .await?
            .json()
            .await?;

        if let Some(error) = response.get("error") {
            return Err(crate::error::OrchestrationError::UpstreamError(
                error
                    .get("message")
                    .and_then(Value::as_str)
                    .unwrap_or("wallet RPC error")
                    .to_string(),
            ));
        }

        Ok(response.get("result").cloned().unwrap_or(Value::Null))
    }
}

#[async_trait]
impl CapabilityProbe for RpcCapabilityProbe {
    async fn wallet_capabilities(&self, address: &str) -> Result<Value> {
        self.rpc("wallet_getCapabilities", json!([address])).await
    }
}

/// Paymaster-service client speaking the provider's JSON-RPC surface.
pub struct RpcPaymasterService {
    client: reqwest::Client,
    paymaster_url: String,
}

impl RpcPaymasterService {
    pub fn new(paymaster_url: impl Into<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .expect("Failed to build HTTP client");
        Self {
            client,
            paymaster_url: paymaster_url.into(),
        }
    }
}

#[async_trait]
impl PaymasterService for RpcPaymasterService {
    async fn sponsorship_data(
        &self,
        sender: &str,
        target: &str,
        value: u128,
        call_data: &str,
    ) -> Result<Option<Value>> {
        let body = json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": "pm_getPaymasterData",
            "params": [{
                "sender": sender,
                "to": target,
                "value": format!("0x{:x}", value),
                "data": call_data,
            }],
        });

        let response: Value = self
            .client
            .post(&self.paymaster_url)
            .json(&body)
            .send()
            .await?
            .json()
            .await?;

        if response.get("error").is_some() {
            return Ok(None);
        }

        Ok(response
            .get("result")
            .filter(|result| !result.is_null())
            .cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::OrchestrationError;

    struct StaticProbe(Value);

    #[async_trait]
    impl CapabilityProbe for StaticProbe {
        async fn wallet_capabilities(&self, _address: &str) -> Result<Value> {
            Ok(self.0.clone())
        }
    }

    struct FailingProbe;

    #[async_trait]
    impl CapabilityProbe for FailingProbe {
        async fn wallet_capabilities(&self, _address: &str) -> Result<Value> {
            Err(OrchestrationError::UpstreamError(
                "wallet not connected".to_string(),
            ))
        }
    }

    struct StaticPaymaster(Option<Value>);

    #[async_trait]
    impl PaymasterService for StaticPaymaster {
        async fn sponsorship_data(
            &self,
            _sender: &str,
            _target: &str,
            _value: u128,
            _call_data: &str,
        ) -> Result<Option<Value>> {
            Ok(self.0.clone())
        }
    }

    fn supported_caps(key: &str) -> Value {
        json!({ key: { "paymasterService": { "supported": true } } })
    }

    fn checker(probe: impl CapabilityProbe + 'static, paymaster: StaticPaymaster) -> SponsorshipChecker {
        SponsorshipChecker::new(Arc::new(probe), Arc::new(paymaster), BASE_SEPOLIA_CHAIN_ID)
    }

    #[tokio::test]
    async fn test_eligible_when_both_checks_agree() {
        let checker = checker(
            StaticProbe(supported_caps("84532")),
            StaticPaymaster(Some(json!({ "paymaster": "0xpm" }))),
        );

        let decision = checker.check("0xsender", "0xusdc", 0, "0xa9059cbb").await;
        assert!(decision.eligible);
    }

    #[tokio::test]
    async fn test_hex_chain_id_keys_are_probed() {
        for key in ["0x14A34", "0x14a34"] {
            let checker = checker(
                StaticProbe(supported_caps(key)),
                StaticPaymaster(Some(json!({}))),
            );
            let decision = checker.check("0xsender", "0xusdc", 0, "0x").await;
            assert!(decision.eligible, "expected eligibility for key {}", key);
        }
    }

    #[tokio::test]
    async fn test_unsupported_wallet_is_ineligible() {
        let checker = checker(
            StaticProbe(json!({ "84532": { "paymasterService": { "supported": false } } })),
            StaticPaymaster(Some(json!({}))),
        );

        let decision = checker.check("0xsender", "0xusdc", 0, "0x").await;
        assert!(!decision.eligible);
        assert!(decision.reason.contains("not supported"));
    }

    #[tokio::test]
    async fn test_paymaster_decline_is_ineligible() {
        let checker = checker(StaticProbe(supported_caps("84532")), StaticPaymaster(None));

        let decision = checker.check("0xsender", "0xusdc", 0, "0x").await;
        assert!(!decision.eligible);
        assert!(decision.reason.contains("declined"));
    }

    #[tokio::test]
    async fn test_probe_error_becomes_reason_not_error() {
        let checker = checker(FailingProbe, StaticPaymaster(Some(json!({}))));

        let decision = checker.check("0xsender", "0xusdc", 0, "0x").await;
        assert!(!decision.eligible);
        assert!(decision.reason.contains("wallet not connected"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_superseded_recompute_is_discarded() {
        let checker = Arc::new(checker(
            StaticProbe(supported_caps("84532")),
            StaticPaymaster(Some(json!({}))),
        ));
        let monitor = Arc::new(SponsorshipMonitor::new(checker));

        let first = {
            let monitor = monitor.clone();
            tokio::spawn(async move { monitor.recompute("0xs", "0xt", 0, "0x01").await })
        };
        // Let the first request enter its debounce window before superseding.
        tokio::time::sleep(Duration::from_millis(100)).await;
        let second = {
            let monitor = monitor.clone();
            tokio::spawn(async move { monitor.recompute("0xs", "0xt", 0, "0x02").await })
        };

        let (first, second) = (first.await.unwrap(), second.await.unwrap());
        assert_eq!(first, None);
        assert!(second.is_some());
        assert_eq!(monitor.latest().await, second);
    }
}
