//! Banking Agent Orchestrator
//!
//! A conversational banking engine that:
//! - Classifies free-form utterances into structured banking actions
//! - Slot-fills missing parameters with follow-up prompts
//! - Dispatches completed actions against the stablecoin processor API
//! - Issues short-lived signed credentials for hosted on/off-ramp sessions
//! - Checks fee-sponsorship eligibility for prospective transfers
//!
//! FLOW:
//! UTTERANCE → CLASSIFY → ORCHESTRATE → (LEDGER | RAMP | PROMPT) → REPLY

pub mod agent;
pub mod api;
pub mod classifier;
pub mod config;
pub mod conversational;
pub mod error;
pub mod gemini;
pub mod ledger;
pub mod models;
pub mod ramp;
pub mod session;
pub mod sponsorship;

pub use error::Result;

// Re-export common types
pub use classifier::{IntentClassifier, IntentModel};
pub use models::*;
