//! # tumbler-core
//!
//! The recoverable multi-hop mixing core: hop planning, the mix-session
//! state machine and orchestrator, the recovery ledger, and the sweep
//! scheduler that reclaims stranded funds.
//!
//! The central safety invariant is backup-before-transfer: every
//! intermediate address's encrypted secret is durably recorded before any
//! transfer touches that address, and the sweep scheduler turns those
//! records into recovered funds whenever a session crashes, stalls, or
//! fails.

mod error;
mod keys;
mod orchestrator;
mod planner;
mod recovery;
mod session;
mod sweep;

pub use error::MixError;
pub use keys::{derive_address, generate_hop_key, HopKeyMaterial};
pub use orchestrator::{MixOrchestrator, MixRequest, OrchestratorConfig};
pub use planner::{
    plan, HopPlan, HopSpec, PrivacyProfile, PLATFORM_FEE_BPS, REFERRAL_FEE_BPS,
};
pub use recovery::{
    HopRecoveryRecord, RecoveryLedger, DEFAULT_STALL_THRESHOLD_SECS,
};
pub use session::{MixSession, PlannedHop, SessionRepo, SessionStatus};
pub use sweep::{SweepConfig, SweepOutcome, SweepScheduler};
