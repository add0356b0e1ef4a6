//! Governance Engine
//!
//! Guided governance sessions for a single professional:
//! - Quick Audit: five questions and a 90-day bet
//! - Portfolio Setup: problems, board of personas, published portfolio
//! - Quarterly Review: bet evaluation, board interrogation, triggers
//!
//! Every flow is a deterministic state machine. The LLM is only used to
//! judge vagueness, draft personas and questions, and write reports.
//!
//! SESSION LOOP:
//! START → GATE → ANSWER → JUDGE → CLARIFY? → NEXT → TERMINAL ACTION

pub mod analysis;
pub mod api;
pub mod audit;
pub mod config;
pub mod error;
pub mod flows;
pub mod gemini;
pub mod generation;
pub mod machine;
pub mod models;
pub mod session;
pub mod state;
pub mod vagueness;

pub use error::{GovernanceError, Result};

// Re-export common types
pub use config::EngineConfig;
pub use flows::{
    Engine, EngineContext, FlowController, PortfolioSetupController, QuarterlyReviewController,
    QuickAuditController,
};
pub use machine::{FlowState, QuarterlyState, QuickState, SetupState};
pub use session::Session;
