//! REST API server for the banking agent
//!
//! Exposes the chat surface, session-token issuance, ramp URL generation,
//! sponsorship checks, and the ledger passthrough routes.

use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tracing::info;

use crate::agent::ActionOrchestrator;
use crate::classifier::IntentClassifier;
use crate::conversational;
use crate::error::OrchestrationError;
use crate::gemini::GeminiClient;
use crate::ledger::{transfer_to_wallet, LedgerOps};
use crate::models::{
    ActionOutcome, BankAccountRequest, BankingAction, ChatMessage, DepositAddressRequest,
    PayoutRequest, PostalAddress, RampDirection, MIN_FIAT_AMOUNT,
};
use crate::ramp::{RampService, RampSession};
use crate::session::{AddressEntry, CredentialIssuer, IssuanceOutcome};
use crate::sponsorship::SponsorshipChecker;

/// =============================
/// Request Models
/// =============================

#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    #[serde(default)]
    pub messages: Vec<ChatMessage>,
    #[serde(rename = "walletAddress")]
    pub wallet_address: Option<String>,
    #[serde(default)]
    pub confirm: bool,
    pub action: Option<BankingAction>,
}

#[derive(Debug, Deserialize)]
pub struct SessionTokenRequest {
    #[serde(default)]
    pub addresses: Vec<AddressEntry>,
    #[serde(default)]
    pub assets: Option<Vec<String>>,
}

#[derive(Debug, Deserialize)]
pub struct RampHttpRequest {
    pub amount: Option<f64>,
    #[serde(rename = "userAddress")]
    pub user_address: Option<String>,
    #[serde(rename = "paymentMethod")]
    pub payment_method: Option<String>,
    #[serde(rename = "cashoutMethod")]
    pub cashout_method: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct WithdrawBody {
    pub amount: Option<f64>,
    #[serde(rename = "bankAccountId")]
    pub bank_account_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct DepositBody {
    pub amount: Option<f64>,
    #[serde(rename = "userAddress")]
    pub user_address: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CreateBankAccountBody {
    #[serde(rename = "accountNumber")]
    pub account_number: String,
    #[serde(rename = "routingNumber")]
    pub routing_number: String,
    #[serde(rename = "accountHolderName")]
    pub account_holder_name: String,
    pub address: PostalAddress,
    #[serde(rename = "bankName")]
    pub bank_name: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct DepositAddressBody {
    #[serde(default = "default_currency")]
    pub currency: String,
    #[serde(default = "default_chain")]
    pub chain: String,
}

fn default_currency() -> String {
    "USD".to_string()
}

fn default_chain() -> String {
    "BASE".to_string()
}

#[derive(Debug, Deserialize)]
pub struct WireInstructionsQuery {
    #[serde(rename = "bankAccountId")]
    pub bank_account_id: String,
    #[serde(default = "default_currency")]
    pub currency: String,
}

#[derive(Debug, Deserialize)]
pub struct PayoutStatusQuery {
    #[serde(rename = "payoutId")]
    pub payout_id: String,
}

#[derive(Debug, Deserialize)]
pub struct SponsorshipBody {
    pub sender: String,
    pub target: String,
    #[serde(default)]
    pub value: u128,
    #[serde(rename = "callData", default)]
    pub call_data: String,
}

/// =============================
/// Response Wrapper
/// =============================

#[derive(Debug, serde::Serialize)]
pub struct ApiResponse {
    pub success: bool,
    pub data: Option<serde_json::Value>,
    pub error: Option<String>,
    pub timestamp: String,
}

impl ApiResponse {
    pub fn success<T: serde::Serialize>(data: T) -> Self {
        Self {
            success: true,
            data: serde_json::to_value(data).ok(),
            error: None,
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }

    pub fn error(message: String) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(message),
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }
}

fn error_status(error: &OrchestrationError) -> StatusCode {
    match error {
        OrchestrationError::ValidationError(_) => StatusCode::BAD_REQUEST,
        OrchestrationError::ConfigurationError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        OrchestrationError::LedgerError(_) | OrchestrationError::UpstreamError(_) => {
            StatusCode::BAD_GATEWAY
        }
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn failure(error: OrchestrationError) -> (StatusCode, Json<ApiResponse>) {
    (error_status(&error), Json(ApiResponse::error(error.to_string())))
}

/// =============================
/// API State
/// =============================

#[derive(Clone)]
pub struct ApiState {
    pub classifier: Arc<IntentClassifier>,
    pub orchestrator: Arc<ActionOrchestrator>,
    pub gemini: Arc<GeminiClient>,
    pub ledger: Arc<dyn LedgerOps>,
    pub issuer: Arc<dyn CredentialIssuer>,
    pub ramp: Arc<RampService>,
    pub sponsorship: Arc<SponsorshipChecker>,
}

/// =============================
/// Health Endpoint
/// =============================

async fn health() -> Json<serde_json::Value> {
    Json(json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now().to_rfc3339()
    }))
}

/// =============================
/// Chat Endpoint
/// =============================

async fn chat_handler(
    State(state): State<ApiState>,
    Json(req): Json<ChatRequest>,
) -> (StatusCode, Json<ApiResponse>) {
    let wallet_address = req.wallet_address.as_deref();

    // Confirm-execute payloads short-circuit classification entirely.
    if req.confirm {
        let Some(action) = &req.action else {
            return (
                StatusCode::BAD_REQUEST,
                Json(ApiResponse::error("Missing 'action' for confirm request".into())),
            );
        };

        let outcome = state.orchestrator.handle(action, wallet_address).await;
        let reply = outcome
            .into_text()
            .unwrap_or_else(|| "Nothing to execute.".to_string());
        return (
            StatusCode::OK,
            Json(ApiResponse::success(json!({
                "executed": true,
                "reply": reply,
            }))),
        );
    }

    let Some(last_user) = req.messages.iter().rev().find(|m| m.role == "user") else {
        return (
            StatusCode::BAD_REQUEST,
            Json(ApiResponse::error("No user message found".into())),
        );
    };

    let action = state.classifier.classify(&last_user.content).await;
    info!(kind = action.kind(), "Chat turn classified");

    match state.orchestrator.handle(&action, wallet_address).await {
        ActionOutcome::Conversational => {
            match conversational::general_reply(&state.gemini, &req.messages, wallet_address).await
            {
                Ok(reply) => (
                    StatusCode::OK,
                    Json(ApiResponse::success(json!({
                        "type": "conversational",
                        "reply": reply,
                    }))),
                ),
                Err(e) => failure(e),
            }
        }
        outcome => {
            let follow_up = matches!(outcome, ActionOutcome::NeedsInput(_));
            let reply = outcome.into_text().unwrap_or_default();
            (
                StatusCode::OK,
                Json(ApiResponse::success(json!({
                    "type": "banking",
                    "action": action.kind(),
                    "reply": reply,
                    "followUpRequested": follow_up,
                }))),
            )
        }
    }
}

/// =============================
/// Session Token Endpoint
/// =============================

async fn session_handler(
    State(state): State<ApiState>,
    Json(req): Json<SessionTokenRequest>,
) -> (StatusCode, Json<ApiResponse>) {
    if req.addresses.is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            Json(ApiResponse::error("At least one address is required".into())),
        );
    }

    let assets = req.assets.unwrap_or_else(|| vec!["USDC".to_string()]);

    match state.issuer.issue(&req.addresses, &assets).await {
        IssuanceOutcome::Issued(credential) => (
            StatusCode::OK,
            Json(ApiResponse::success(json!({
                "token": credential.token,
                "channelId": credential.channel_id,
                "expiresAt": credential.expires_at,
            }))),
        ),
        IssuanceOutcome::Failed { reason } => {
            (StatusCode::BAD_GATEWAY, Json(ApiResponse::error(reason)))
        }
    }
}

/// =============================
/// Ramp Endpoints
/// =============================

fn ramp_payload(session: &RampSession) -> serde_json::Value {
    let (url_key, method_key) = match session.direction {
        RampDirection::Onramp => ("onrampUrl", "paymentMethod"),
        RampDirection::Offramp => ("offrampUrl", "cashoutMethod"),
    };

    let mut payload = json!({
        "amount": session.amount,
        "asset": session.asset,
        "network": session.network,
        "sessionToken": session.credential_issued,
        "sessionMode": session.mode,
        "expiresIn": session.expires_in,
        "message": format!(
            "Ramp URL generated for {} {} ({} mode)",
            session.amount, session.asset, session.mode
        ),
    });
    payload[url_key] = json!(session.url);
    payload[method_key] = json!(session.method);
    payload
}

async fn ramp_handler(
    state: ApiState,
    direction: RampDirection,
    req: RampHttpRequest,
) -> (StatusCode, Json<ApiResponse>) {
    let (Some(amount), Some(user_address)) = (req.amount, req.user_address.as_deref()) else {
        return (
            StatusCode::BAD_REQUEST,
            Json(ApiResponse::error(
                "Missing required parameters: amount and userAddress".into(),
            )),
        );
    };

    let method = match direction {
        RampDirection::Onramp => req.payment_method,
        RampDirection::Offramp => req.cashout_method,
    };

    match state
        .ramp
        .create_session(direction, amount, user_address, method)
        .await
    {
        Ok(session) => (
            StatusCode::OK,
            Json(ApiResponse::success(ramp_payload(&session))),
        ),
        Err(e) => failure(e),
    }
}

async fn onramp_handler(
    State(state): State<ApiState>,
    Json(req): Json<RampHttpRequest>,
) -> (StatusCode, Json<ApiResponse>) {
    ramp_handler(state, RampDirection::Onramp, req).await
}

async fn offramp_handler(
    State(state): State<ApiState>,
    Json(req): Json<RampHttpRequest>,
) -> (StatusCode, Json<ApiResponse>) {
    ramp_handler(state, RampDirection::Offramp, req).await
}

/// =============================
/// Sponsorship Endpoint
/// =============================

async fn sponsorship_handler(
    State(state): State<ApiState>,
    Json(req): Json<SponsorshipBody>,
) -> (StatusCode, Json<ApiResponse>) {
    let decision = state
        .sponsorship
        .check(&req.sender, &req.target, req.value, &req.call_data)
        .await;

    (StatusCode::OK, Json(ApiResponse::success(decision)))
}

/// =============================
/// Ledger Passthrough Endpoints
/// =============================

async fn bank_accounts_get(
    State(state): State<ApiState>,
    headers: HeaderMap,
) -> (StatusCode, Json<ApiResponse>) {
    let wallet_address = headers
        .get("x-wallet-address")
        .and_then(|value| value.to_str().ok());

    match state.ledger.list_bank_accounts(wallet_address).await {
        Ok(accounts) => (
            StatusCode::OK,
            Json(ApiResponse::success(json!({ "bankAccounts": accounts }))),
        ),
        // Graceful for the UI: an empty list plus the error text.
        Err(e) => (
            StatusCode::OK,
            Json(ApiResponse {
                success: false,
                data: Some(json!({ "bankAccounts": [] })),
                error: Some(e.to_string()),
                timestamp: chrono::Utc::now().to_rfc3339(),
            }),
        ),
    }
}

async fn bank_accounts_post(
    State(state): State<ApiState>,
    Json(body): Json<CreateBankAccountBody>,
) -> (StatusCode, Json<ApiResponse>) {
    let mut request = BankAccountRequest::new(
        body.account_number,
        body.routing_number,
        body.account_holder_name,
        body.address,
    );
    request.bank_name = body.bank_name;

    match state.ledger.create_bank_account(&request).await {
        Ok(account) => (
            StatusCode::OK,
            Json(ApiResponse::success(json!({ "bankAccount": account }))),
        ),
        Err(e) => failure(e),
    }
}

async fn withdraw_handler(
    State(state): State<ApiState>,
    Json(body): Json<WithdrawBody>,
) -> (StatusCode, Json<ApiResponse>) {
    let (Some(amount), Some(bank_account_id)) = (body.amount, body.bank_account_id) else {
        return (
            StatusCode::BAD_REQUEST,
            Json(ApiResponse::error(
                "Amount and bank account ID are required".into(),
            )),
        );
    };

    if amount < MIN_FIAT_AMOUNT {
        return (
            StatusCode::BAD_REQUEST,
            Json(ApiResponse::error(format!(
                "Invalid amount. Minimum ${} required.",
                MIN_FIAT_AMOUNT
            ))),
        );
    }

    let request = PayoutRequest::new(amount, bank_account_id);
    match state.ledger.create_payout(&request).await {
        Ok(payout) => (
            StatusCode::OK,
            Json(ApiResponse::success(json!({
                "payout": payout,
                "message": format!("Withdrawal of ${} initiated", amount),
            }))),
        ),
        Err(e) => failure(e),
    }
}

async fn payout_status_handler(
    State(state): State<ApiState>,
    Query(query): Query<PayoutStatusQuery>,
) -> (StatusCode, Json<ApiResponse>) {
    match state.ledger.get_payout(&query.payout_id).await {
        Ok(payout) => (
            StatusCode::OK,
            Json(ApiResponse::success(json!({ "payout": payout }))),
        ),
        Err(e) => failure(e),
    }
}

async fn deposit_handler(
    State(state): State<ApiState>,
    Json(body): Json<DepositBody>,
) -> (StatusCode, Json<ApiResponse>) {
    let (Some(amount), Some(user_address)) = (body.amount, body.user_address) else {
        return (
            StatusCode::BAD_REQUEST,
            Json(ApiResponse::error("Amount and user address required".into())),
        );
    };

    if amount < MIN_FIAT_AMOUNT {
        return (
            StatusCode::BAD_REQUEST,
            Json(ApiResponse::error(format!(
                "Invalid amount. Minimum ${} required.",
                MIN_FIAT_AMOUNT
            ))),
        );
    }

    match transfer_to_wallet(state.ledger.as_ref(), amount, &user_address, "BASE").await {
        Ok(transfer) => (
            StatusCode::OK,
            Json(ApiResponse::success(json!({
                "transfer": transfer,
                "message": format!("{} USDC transferred to verified blockchain address.", amount),
            }))),
        ),
        Err(e) => failure(e),
    }
}

async fn deposit_address_get(State(state): State<ApiState>) -> (StatusCode, Json<ApiResponse>) {
    match state.ledger.list_blockchain_addresses().await {
        Ok(addresses) => (
            StatusCode::OK,
            Json(ApiResponse::success(json!({ "addresses": addresses }))),
        ),
        Err(e) => failure(e),
    }
}

async fn deposit_address_post(
    State(state): State<ApiState>,
    Json(body): Json<DepositAddressBody>,
) -> (StatusCode, Json<ApiResponse>) {
    let request = DepositAddressRequest::new(body.currency, body.chain);
    match state.ledger.create_blockchain_address(&request).await {
        Ok(address) => (
            StatusCode::OK,
            Json(ApiResponse::success(json!({ "address": address }))),
        ),
        Err(e) => failure(e),
    }
}

async fn wire_instructions_handler(
    State(state): State<ApiState>,
    Query(query): Query<WireInstructionsQuery>,
) -> (StatusCode, Json<ApiResponse>) {
    match state
        .ledger
        .wire_instructions(&query.bank_account_id, &query.currency)
        .await
    {
        Ok(instructions) => (
            StatusCode::OK,
            Json(ApiResponse::success(json!({ "instructions": instructions }))),
        ),
        Err(e) => failure(e),
    }
}

async fn balances_handler(State(state): State<ApiState>) -> (StatusCode, Json<ApiResponse>) {
    match state.ledger.get_balances().await {
        Ok(balances) => (
            StatusCode::OK,
            Json(ApiResponse::success(json!({ "balances": balances }))),
        ),
        Err(e) => failure(e),
    }
}

async fn ledger_test_handler(State(state): State<ApiState>) -> (StatusCode, Json<ApiResponse>) {
    match state.ledger.configuration().await {
        Ok(configuration) => (
            StatusCode::OK,
            Json(ApiResponse::success(json!({ "configuration": configuration }))),
        ),
        Err(e) => failure(e),
    }
}

/// =============================
/// Router
/// =============================

pub fn create_router(state: ApiState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/chat", post(chat_handler))
        .route("/api/session", post(session_handler))
        .route("/api/onramp", post(onramp_handler))
        .route("/api/offramp", post(offramp_handler))
        .route("/api/sponsorship", post(sponsorship_handler))
        .route(
            "/api/ledger/bank-accounts",
            get(bank_accounts_get).post(bank_accounts_post),
        )
        .route(
            "/api/ledger/withdraw",
            post(withdraw_handler).get(payout_status_handler),
        )
        .route("/api/ledger/deposit", post(deposit_handler))
        .route(
            "/api/ledger/deposit-address",
            get(deposit_address_get).post(deposit_address_post),
        )
        .route("/api/ledger/wire-instructions", get(wire_instructions_handler))
        .route("/api/ledger/balances", get(balances_handler))
        .route("/api/ledger/test", get(ledger_test_handler))
        .with_state(state)
        .layer(CorsLayer::permissive())
}

/// =============================
/// Server Startup
/// =============================

pub async fn start_server(
    state: ApiState,
    port: u16,
) -> std::result::Result<(), Box<dyn std::error::Error>> {
    let router = create_router(state);

    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", port)).await?;

    info!("API Server listening on http://0.0.0.0:{}", port);
    info!("Local: http://127.0.0.1:{}", port);

    axum::serve(listener, router).await?;

    Ok(())
}
