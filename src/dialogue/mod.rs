//! Dialogue orchestration: the per-thread booking state machine.
//!
//! A turn flows through the [`DialogueEngine`]: the [`Router`] picks the
//! controller for the thread's active stage, the controller runs its
//! pending lookups and consults the reasoner, and the engine applies the
//! resulting transition before checkpointing the thread.

pub mod accountant;
pub mod dispatch;
pub mod engine;
pub mod fallback;
pub mod lookups;
pub mod prompts;
pub mod router;
pub mod signals;
pub mod stages;
pub mod state;

pub use accountant::{FileUsageLog, SessionAccountant, UsageRecord, UsageSink};
pub use dispatch::{DispatchController, EscalationNotice};
pub use engine::{DialogueEngine, InboundTurn, TurnResult};
pub use router::{Route, Router};
pub use signals::{IntentSignal, SignalAnomaly, SignalKind};
pub use stages::{EscalationReason, StageController, StageDeps};
pub use state::{ConversationThread, STATE_VERSION, Stage};
