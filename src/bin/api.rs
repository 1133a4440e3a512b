use banking_agent_orchestrator::{
    agent::ActionOrchestrator,
    api::{start_server, ApiState},
    classifier::IntentClassifier,
    config::Config,
    gemini::GeminiClient,
    ledger::LedgerClient,
    ramp::{RampService, RampUrlBuilder},
    session::CdpCredentialIssuer,
    sponsorship::{
        RpcCapabilityProbe, RpcPaymasterService, SponsorshipChecker, BASE_SEPOLIA_CHAIN_ID,
    },
};
use std::sync::Arc;
use tracing::info;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .init();

    // Load environment variables
    dotenv::dotenv().ok();

    let config = Config::from_env();

    if config.gemini_api_key.is_empty() {
        eprintln!("⚠️  GEMINI_API_KEY not set in .env");
        eprintln!("📌 Chat turns will fall back to 'no banking intent detected'");
    }
    if config.ledger_api_key.is_none() {
        eprintln!("⚠️  CIRCLE_API_KEY not set - ledger operations will report 'not configured'");
    }

    info!("🚀 Banking Agent Orchestrator - API Server");
    info!("📍 Port: {}", config.port);

    // Create components
    let gemini = Arc::new(GeminiClient::new(config.gemini_api_key.clone()));
    let classifier = Arc::new(IntentClassifier::new(gemini.clone()));
    let ledger = Arc::new(LedgerClient::new(
        config.ledger_api_key.clone(),
        config.ledger_base_url.clone(),
    ));
    let orchestrator = Arc::new(ActionOrchestrator::new(ledger.clone()));
    let issuer = Arc::new(CdpCredentialIssuer::new(&config));
    let ramp = Arc::new(RampService::new(
        issuer.clone(),
        RampUrlBuilder::new(&config),
    ));
    let sponsorship = Arc::new(SponsorshipChecker::new(
        Arc::new(RpcCapabilityProbe::new(config.wallet_rpc_url.clone())),
        Arc::new(RpcPaymasterService::new(config.paymaster_url.clone())),
        BASE_SEPOLIA_CHAIN_ID,
    ));

    let state = ApiState {
        classifier,
        orchestrator,
        gemini,
        ledger,
        issuer,
        ramp,
        sponsorship,
    };

    info!("✅ Orchestrator initialized");
    info!("📡 Starting API server...");

    // Start API server
    start_server(state, config.port).await?;

    Ok(())
}
