//! Conversational fallback handler
//!
//! Handles turns with no detected banking intent by replaying the visible
//! conversation to the chat model. There is no server-side session store;
//! whatever context the caller sends is all the context there is.

use crate::gemini::GeminiClient;
use crate::models::ChatMessage;
use tracing::info;

/// Generate a general conversational reply for the latest user message.
pub async fn general_reply(
    gemini: &GeminiClient,
    messages: &[ChatMessage],
    wallet_address: Option<&str>,
) -> crate::Result<String> {
    let last_message = messages
        .iter()
        .rev()
        .find(|msg| msg.role == "user")
        .map(|msg| msg.content.as_str())
        .unwrap_or_default();

    // Everything before the latest user turn is replayed history.
    let history_end = messages
        .iter()
        .rposition(|msg| msg.role == "user")
        .unwrap_or(0);
    let history = &messages[..history_end];

    let system_prompt = build_system_prompt(wallet_address);

    info!(history_turns = history.len(), "Generating conversational reply");
    gemini.chat(&system_prompt, history, last_message).await
}

fn build_system_prompt(wallet_address: Option<&str>) -> String {
    let wallet_context = match wallet_address {
        Some(address) => format!(
            "\n\nUser Connected Wallet: {}\nNetwork: Base Sepolia Testnet",
            address
        ),
        None => "\n\nUser has not connected their wallet yet.".to_string(),
    };

    format!(
        "You are a helpful AI assistant for a USDC banking app on Base. You help users \
         understand crypto operations and guide them through transactions.\n\n\
         IMPORTANT CONTEXT:\n\
         - Users connect their own smart wallet\n\
         - You CAN execute banking transactions when users request them\n\
         - The app supports gasless transactions for USDC transfers{}\n\n\
         YOUR CAPABILITIES:\n\
         1. Help users understand their wallet and balances\n\
         2. Guide users through transferring ETH or USDC\n\
         3. Explain crypto concepts, DeFi, smart wallets, etc.\n\
         4. Execute banking operations (deposit/withdraw USDC via bank)\n\n\
         BANKING OPERATIONS YOU CAN PERFORM:\n\
         - Show bank accounts: show my bank accounts\n\
         - Deposit USDC: deposit 100 USDC to my wallet\n\
         - Withdraw USDC: withdraw 50 USDC to bank account ID xyz\n\n\
         For deposits and withdrawals, users need a linked bank account and a \
         sufficient balance on the corresponding side.\n\n\
         Be conversational, helpful, and clear. Always explain what is happening \
         with transactions.",
        wallet_context
    )
}
