//! Banking intent classifier
//!
//! Maps a raw user utterance to one `BankingAction` with whatever parameters
//! the model could extract. Partial extraction is expected, not an error.
//! Classification failure of any kind degrades to `BankingAction::None` so a
//! general conversational reply can take over.

use crate::models::BankingAction;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, warn};

/// Text-generation backend used for intent parsing. Kept behind a trait so
/// the backend can be swapped without touching the orchestrator.
#[async_trait]
pub trait IntentModel: Send + Sync {
    async fn complete(&self, prompt: &str) -> crate::Result<String>;
}

pub struct IntentClassifier {
    model: Arc<dyn IntentModel>,
}

impl IntentClassifier {
    pub fn new(model: Arc<dyn IntentModel>) -> Self {
        Self { model }
    }

    /// Classify the latest user utterance.
    ///
    /// Never returns an error: an unreachable backend or unparseable output
    /// yields `BankingAction::None` ("no banking intent detected").
    pub async fn classify(&self, utterance: &str) -> BankingAction {
        let prompt = build_intent_prompt(utterance);

        match self.model.complete(&prompt).await {
            Ok(text) => {
                let action = parse_action_response(&text);
                debug!(kind = action.kind(), "Intent classified");
                action
            }
            Err(e) => {
                warn!("Intent backend unavailable, treating as no banking intent: {}", e);
                BankingAction::None
            }
        }
    }
}

/// Fixed instruction prompt: closed action vocabulary plus worked examples.
fn build_intent_prompt(utterance: &str) -> String {
    format!(
        "Analyze this user message and determine if it is a banking action request. \
         Extract parameters even if incomplete. Never invent parameters the user did \
         not provide. Respond ONLY with valid JSON.\n\n\
         User message: {}\n\n\
         Examples:\n\
         - deposit 100 usdc -> {{\"type\": \"deposit_usdc\", \"params\": {{\"amount\": 100}}}}\n\
         - withdraw 50 USDC -> {{\"type\": \"withdraw_usdc\", \"params\": {{\"amount\": 50}}}}\n\
         - withdraw to account abc123 -> {{\"type\": \"withdraw_usdc\", \"params\": {{\"bankAccountId\": \"abc123\"}}}}\n\
         - send 10 USDC to 0x123 -> {{\"type\": \"send_usdc\", \"params\": {{\"amount\": 10, \"recipient_address\": \"0x123\"}}}}\n\
         - show my bank accounts -> {{\"type\": \"get_bank_accounts\", \"params\": {{}}}}\n\
         - what is defi -> {{\"type\": \"none\", \"params\": {{}}}}",
        utterance
    )
}

/// Parse the backend's free-text response into an action.
/// Anything that is not a single parseable JSON object maps to `None`.
pub(crate) fn parse_action_response(text: &str) -> BankingAction {
    extract_first_json_object(text)
        .and_then(|json| serde_json::from_str::<BankingAction>(json).ok())
        .unwrap_or(BankingAction::None)
}

/// Scan for the first balanced brace-delimited substring.
///
/// Models wrap JSON in prose or ``` fences; a balanced scan (quote-aware, so
/// braces inside string values don't terminate early) recovers the object
/// without caring about the wrapping.
fn extract_first_json_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, ch) in text[start..].char_indices() {
        if escaped {
            escaped = false;
            continue;
        }
        match ch {
            '\\' if in_string => escaped = true,
            '"' => in_string = !in_string,
            '{' if !in_string => depth += 1,
            '}' if !in_string => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[start..start + offset + ch.len_utf8()]);
                }
            }
            _ => {}
        }
    }

    None
}

/// Deterministic keyword-based intent model.
///
/// Keeps the system functional without an LLM dependency: produces the same
/// JSON contract the hosted backend is prompted for. Used by the demo binary
/// and as a test double.
pub struct RuleIntentModel;

#[async_trait]
impl IntentModel for RuleIntentModel {
    async fn complete(&self, prompt: &str) -> crate::Result<String> {
        // The utterance is embedded in the prompt; pull it back out.
        let utterance = prompt
            .split("User message: ")
            .nth(1)
            .and_then(|rest| rest.split("\n\n").next())
            .unwrap_or(prompt);
        Ok(rule_based_action_json(utterance))
    }
}

fn rule_based_action_json(utterance: &str) -> String {
    let lowered = utterance.to_lowercase();

    let amount = utterance
        .split_whitespace()
        .map(|token| token.trim_start_matches('$'))
        .find_map(|token| token.parse::<f64>().ok());
    let address = utterance
        .split_whitespace()
        .find(|token| token.starts_with("0x"));

    let mut params = serde_json::Map::new();
    if let Some(amount) = amount {
        params.insert("amount".to_string(), serde_json::json!(amount));
    }

    let kind = if lowered.contains("deposit") {
        "deposit_usdc"
    } else if lowered.contains("withdraw") {
        "withdraw_usdc"
    } else if lowered.contains("send") || lowered.contains("transfer") {
        if let Some(address) = address {
            params.insert("recipient_address".to_string(), serde_json::json!(address));
        }
        "send_usdc"
    } else if lowered.contains("bank account") || lowered.contains("accounts") {
        "get_bank_accounts"
    } else {
        "none"
    };

    serde_json::json!({ "type": kind, "params": params }).to_string()
}
