use banking_agent_orchestrator::{
    agent::ActionOrchestrator,
    classifier::{IntentClassifier, RuleIntentModel},
    config::Config,
    ledger::LedgerClient,
};
use std::sync::Arc;
use tracing::info;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .init();

    // Load environment variables
    dotenv::dotenv().ok();

    info!("Banking Agent Orchestrator starting (demo mode)");

    let config = Config::from_env();

    // The rule-based model keeps the demo functional without an LLM key.
    let classifier = IntentClassifier::new(Arc::new(RuleIntentModel));
    let ledger = Arc::new(LedgerClient::new(
        config.ledger_api_key.clone(),
        config.ledger_base_url.clone(),
    ));
    let orchestrator = ActionOrchestrator::new(ledger);

    let wallet = Some("0x1111222233334444555566667777888899990000");
    let utterances = [
        "deposit 100 usdc",
        "withdraw 50 USDC",
        "show my bank accounts",
        "send 10 USDC to 0x9f8e7d6c5b4a39281706f5e4d3c2b1a098765432",
        "what is defi",
    ];

    for utterance in utterances {
        println!("\n=== USER: {} ===", utterance);

        let action = classifier.classify(utterance).await;
        info!(kind = action.kind(), "Classified");

        match orchestrator.handle(&action, wallet).await.into_text() {
            Some(reply) => println!("{}", reply),
            None => println!("(no banking intent - would defer to conversational reply)"),
        }
    }

    Ok(())
}
