//! Banking action orchestrator
//!
//! Request-scoped slot-filling machine: a classified action either executes
//! against the ledger, or comes back as a follow-up prompt for the missing
//! parameters. Nothing survives the request; continuity across turns is
//! whatever the caller replays through the conversation history.

use crate::ledger::{transfer_to_wallet, LedgerOps};
use crate::models::{ActionOutcome, BankingAction, PayoutRequest, MIN_FIAT_AMOUNT};
use std::sync::Arc;
use tracing::{info, warn};

/// Chain identifier used for wallet recipient addresses.
const WALLET_CHAIN: &str = "BASE";

pub struct ActionOrchestrator {
    ledger: Arc<dyn LedgerOps>,
}

impl ActionOrchestrator {
    pub fn new(ledger: Arc<dyn LedgerOps>) -> Self {
        Self { ledger }
    }

    /// Run one orchestration pass over a classified action.
    ///
    /// Never returns an error: every external failure is converted into a
    /// user-facing text so the chat surface can render it directly.
    pub async fn handle(
        &self,
        action: &BankingAction,
        wallet_address: Option<&str>,
    ) -> ActionOutcome {
        info!(kind = action.kind(), "Orchestrating banking action");

        let result = match action {
            BankingAction::GetAccounts => self.list_accounts(wallet_address).await,
            BankingAction::Deposit { amount } => self.deposit(*amount, wallet_address).await,
            BankingAction::Withdraw {
                amount,
                bank_account_id,
            } => {
                self.withdraw(*amount, bank_account_id.as_deref(), wallet_address)
                    .await
            }
            BankingAction::Send {
                amount,
                recipient_address,
            } => Ok(send_instructions(
                *amount,
                recipient_address.as_deref(),
                wallet_address,
            )),
            BankingAction::None => Ok(ActionOutcome::Conversational),
        };

        match result {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!(kind = action.kind(), error = %e, "Banking action failed");
                ActionOutcome::Executed(format!("Error: {}. Please try again.", e))
            }
        }
    }

    async fn list_accounts(&self, wallet_address: Option<&str>) -> crate::Result<ActionOutcome> {
        let accounts = self.ledger.list_bank_accounts(wallet_address).await?;

        if accounts.is_empty() {
            return Ok(ActionOutcome::Executed(
                "You do not have any bank accounts linked yet. Would you like help adding a bank account?"
                    .to_string(),
            ));
        }

        let listing = format_account_listing(&accounts);
        Ok(ActionOutcome::Executed(format!(
            "Here are your linked bank accounts:\n\n{}\n\nYou can use the account ID to deposit or withdraw funds.",
            listing
        )))
    }

    async fn deposit(
        &self,
        amount: Option<f64>,
        wallet_address: Option<&str>,
    ) -> crate::Result<ActionOutcome> {
        let Some(wallet_address) = wallet_address else {
            return Ok(ActionOutcome::NeedsInput(
                "Please connect your wallet first to deposit USDC.".to_string(),
            ));
        };

        let Some(amount) = amount else {
            return Ok(ActionOutcome::NeedsInput(
                "I can help you deposit USDC from your account balance to your wallet. How much USDC would you like to deposit?"
                    .to_string(),
            ));
        };

        if amount < MIN_FIAT_AMOUNT {
            return Ok(ActionOutcome::NeedsInput(format!(
                "The minimum deposit is {} USDC. How much would you like to deposit?",
                MIN_FIAT_AMOUNT
            )));
        }

        match transfer_to_wallet(self.ledger.as_ref(), amount, wallet_address, WALLET_CHAIN).await
        {
            Ok(transfer) => Ok(ActionOutcome::Executed(format!(
                "✅ Successfully initiated deposit of {} USDC to your wallet!\n\nTransaction ID: {}\n\nThe USDC should appear in your wallet shortly.",
                amount, transfer.id
            ))),
            Err(e) => Ok(ActionOutcome::Executed(format!(
                "❌ Deposit failed: {}. Please make sure you have sufficient USD balance in your account.",
                e
            ))),
        }
    }

    async fn withdraw(
        &self,
        amount: Option<f64>,
        bank_account_id: Option<&str>,
        wallet_address: Option<&str>,
    ) -> crate::Result<ActionOutcome> {
        if wallet_address.is_none() {
            return Ok(ActionOutcome::NeedsInput(
                "Please connect your wallet first to withdraw USDC.".to_string(),
            ));
        }

        let Some(amount) = amount else {
            return Ok(ActionOutcome::NeedsInput(
                "I can help you withdraw USDC to your bank account. How much USDC would you like to withdraw?"
                    .to_string(),
            ));
        };

        if amount < MIN_FIAT_AMOUNT {
            return Ok(ActionOutcome::NeedsInput(format!(
                "The minimum withdrawal is {} USDC. How much would you like to withdraw?",
                MIN_FIAT_AMOUNT
            )));
        }

        let Some(bank_account_id) = bank_account_id else {
            // Disambiguation is part of slot-filling: one listing call, then
            // ask which account to use. No payout is attempted here.
            let accounts = self.ledger.list_bank_accounts(wallet_address).await?;

            if accounts.is_empty() {
                return Ok(ActionOutcome::Executed(
                    "You need to add a bank account first before withdrawing. Please add your bank account details and try again."
                        .to_string(),
                ));
            }

            let listing = format_account_listing(&accounts);
            return Ok(ActionOutcome::NeedsInput(format!(
                "Great! I'll help you withdraw {} USDC. Which bank account would you like to use?\n\n{}\n\nPlease tell me the account ID.",
                amount, listing
            )));
        };

        let request = PayoutRequest::new(amount, bank_account_id);
        match self.ledger.create_payout(&request).await {
            Ok(payout) => Ok(ActionOutcome::Executed(format!(
                "✅ Successfully initiated withdrawal of {} USDC to your bank account!\n\nPayout ID: {}\n\nThe funds should arrive in your bank account within 1-2 business days.",
                amount, payout.id
            ))),
            Err(e) => Ok(ActionOutcome::Executed(format!(
                "❌ Withdrawal failed: {}. Please make sure you have sufficient USDC balance.",
                e
            ))),
        }
    }
}

/// The on-chain send itself belongs to the wallet layer; the orchestrator
/// only hands back instructions.
fn send_instructions(
    amount: Option<f64>,
    recipient_address: Option<&str>,
    wallet_address: Option<&str>,
) -> ActionOutcome {
    let (Some(amount), Some(recipient)) = (amount, recipient_address) else {
        return ActionOutcome::NeedsInput(
            "To send USDC, I need both the amount and the recipient address. For example: 'send 10 USDC to 0x123...'"
                .to_string(),
        );
    };

    if wallet_address.is_none() {
        return ActionOutcome::NeedsInput(
            "Please connect your wallet first to send USDC.".to_string(),
        );
    }

    ActionOutcome::Executed(format!(
        "To send {} USDC to {}:\n\n1. Go to the 'Send' tab\n2. Enter the recipient address: {}\n3. Enter the amount: {} USDC\n4. Click 'Send Payment'\n\nThis will be a gasless transaction - you won't need ETH for gas fees!",
        amount, recipient, recipient, amount
    ))
}

fn format_account_listing(accounts: &[crate::models::BankAccount]) -> String {
    accounts
        .iter()
        .enumerate()
        .map(|(idx, account)| {
            format!(
                "{}. {} (ID: {}) - Account ending in {}",
                idx + 1,
                account.display_name(),
                account.id,
                account.account_last4()
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::testing::MockLedger;
    use std::sync::atomic::Ordering;

    fn orchestrator_with(ledger: MockLedger) -> (ActionOrchestrator, Arc<MockLedger>) {
        let ledger = Arc::new(ledger);
        (ActionOrchestrator::new(ledger.clone()), ledger)
    }

    #[tokio::test]
    async fn test_withdraw_missing_account_lists_once_and_prompts() {
        let (orchestrator, ledger) = orchestrator_with(MockLedger::with_bank_accounts(vec![
            ("ba-1", "Checking", "000111222333"),
            ("ba-2", "Savings", "000444555666"),
        ]));

        let outcome = orchestrator
            .handle(
                &BankingAction::Withdraw {
                    amount: Some(50.0),
                    bank_account_id: None,
                },
                Some("0xabc"),
            )
            .await;

        let ActionOutcome::NeedsInput(prompt) = outcome else {
            panic!("expected disambiguation prompt, got {:?}", outcome);
        };
        assert!(prompt.contains("50"));
        assert!(prompt.contains("ba-1"));
        assert!(prompt.contains("ending in 2333"));
        assert_eq!(ledger.list_bank_account_calls.load(Ordering::SeqCst), 1);
        assert_eq!(ledger.payout_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_withdraw_with_no_accounts_instructs_adding_one() {
        let (orchestrator, ledger) = orchestrator_with(MockLedger::default());

        let outcome = orchestrator
            .handle(
                &BankingAction::Withdraw {
                    amount: Some(50.0),
                    bank_account_id: None,
                },
                Some("0xabc"),
            )
            .await;

        let ActionOutcome::Executed(text) = outcome else {
            panic!("expected terminal text, got {:?}", outcome);
        };
        assert!(text.contains("add a bank account"));
        assert_eq!(ledger.payout_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_withdraw_executes_payout_with_account_id() {
        let (orchestrator, ledger) = orchestrator_with(MockLedger::with_bank_accounts(vec![(
            "ba-1",
            "Checking",
            "000111222333",
        )]));

        let outcome = orchestrator
            .handle(
                &BankingAction::Withdraw {
                    amount: Some(50.0),
                    bank_account_id: Some("ba-1".to_string()),
                },
                Some("0xabc"),
            )
            .await;

        let ActionOutcome::Executed(text) = outcome else {
            panic!("expected success text, got {:?}", outcome);
        };
        assert!(text.contains("50"));
        assert!(text.contains("Payout ID: payout-"));
        assert_eq!(ledger.payout_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_deposit_happy_path_reports_amount_and_transfer_id() {
        let (orchestrator, ledger) = orchestrator_with(MockLedger::default());

        let outcome = orchestrator
            .handle(&BankingAction::Deposit { amount: Some(100.0) }, Some("0xabc"))
            .await;

        let ActionOutcome::Executed(text) = outcome else {
            panic!("expected success text, got {:?}", outcome);
        };
        assert!(text.contains("100"));
        assert!(text.contains("Transaction ID: transfer-"));
        assert_eq!(ledger.transfer_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_deposit_without_wallet_prompts_to_connect() {
        let (orchestrator, ledger) = orchestrator_with(MockLedger::default());

        let outcome = orchestrator
            .handle(&BankingAction::Deposit { amount: Some(100.0) }, None)
            .await;

        assert_eq!(
            outcome,
            ActionOutcome::NeedsInput("Please connect your wallet first to deposit USDC.".to_string())
        );
        assert_eq!(ledger.transfer_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_deposit_below_minimum_makes_no_external_call() {
        let (orchestrator, ledger) = orchestrator_with(MockLedger::default());

        let outcome = orchestrator
            .handle(&BankingAction::Deposit { amount: Some(5.0) }, Some("0xabc"))
            .await;

        let ActionOutcome::NeedsInput(prompt) = outcome else {
            panic!("expected minimum-amount prompt, got {:?}", outcome);
        };
        assert!(prompt.contains("minimum"));
        assert_eq!(ledger.transfer_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_deposit_failure_surfaces_provider_message() {
        let (orchestrator, _ledger) = orchestrator_with(MockLedger {
            fail_transfers_with: Some("Insufficient funds in master wallet".to_string()),
            ..Default::default()
        });

        let outcome = orchestrator
            .handle(&BankingAction::Deposit { amount: Some(100.0) }, Some("0xabc"))
            .await;

        let ActionOutcome::Executed(text) = outcome else {
            panic!("expected failure text, got {:?}", outcome);
        };
        assert!(text.starts_with("❌ Deposit failed:"));
        assert!(text.contains("Insufficient funds in master wallet"));
    }

    #[tokio::test]
    async fn test_send_requires_both_parameters() {
        let (orchestrator, _ledger) = orchestrator_with(MockLedger::default());

        let outcome = orchestrator
            .handle(
                &BankingAction::Send {
                    amount: Some(10.0),
                    recipient_address: None,
                },
                Some("0xabc"),
            )
            .await;

        let ActionOutcome::NeedsInput(prompt) = outcome else {
            panic!("expected explanatory prompt, got {:?}", outcome);
        };
        assert!(prompt.contains("both the amount and the recipient address"));
    }

    #[tokio::test]
    async fn test_send_hands_back_instructions() {
        let (orchestrator, _ledger) = orchestrator_with(MockLedger::default());

        let outcome = orchestrator
            .handle(
                &BankingAction::Send {
                    amount: Some(10.0),
                    recipient_address: Some("0x1234".to_string()),
                },
                Some("0xabc"),
            )
            .await;

        let ActionOutcome::Executed(text) = outcome else {
            panic!("expected instructions, got {:?}", outcome);
        };
        assert!(text.contains("10"));
        assert!(text.contains("0x1234"));
    }

    #[tokio::test]
    async fn test_get_accounts_empty_offers_help() {
        let (orchestrator, _ledger) = orchestrator_with(MockLedger::default());

        let outcome = orchestrator.handle(&BankingAction::GetAccounts, None).await;

        let ActionOutcome::Executed(text) = outcome else {
            panic!("expected terminal text, got {:?}", outcome);
        };
        assert!(text.contains("do not have any bank accounts"));
    }

    #[tokio::test]
    async fn test_none_defers_to_conversation() {
        let (orchestrator, _ledger) = orchestrator_with(MockLedger::default());
        let outcome = orchestrator.handle(&BankingAction::None, None).await;
        assert_eq!(outcome, ActionOutcome::Conversational);
    }
}
