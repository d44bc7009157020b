//! Conversation state: the durable per-thread record.
//!
//! Stored as one JSON document per thread. `version` guards against loading
//! a record written by a newer build.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::backend::{ActiveService, ServiceDetail};
use crate::booking::BookingRecord;
use crate::error::DialogueError;
use crate::llm::{ChatMessage, Role};

/// Current layout version of [`ConversationThread`].
pub const STATE_VERSION: u32 = 1;

/// Phases of a booking conversation.
///
/// Progresses Intake → Locator → Logistics → Closer → Ended. Closer may send
/// the conversation back to Locator or Logistics for corrections, and any
/// live stage may escalate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Intake,
    Locator,
    Logistics,
    Closer,
    Ended,
    Escalated,
}

impl Stage {
    /// Check if a transition from `self` to `target` is valid. Staying put
    /// is valid for every live stage.
    pub fn can_transition_to(&self, target: Stage) -> bool {
        use Stage::*;
        if self.is_terminal() {
            return false;
        }
        matches!(
            (self, target),
            (_, Escalated)
                | (Intake, Intake | Locator)
                | (Locator, Locator | Logistics)
                | (Logistics, Logistics | Closer)
                | (Closer, Closer | Locator | Logistics | Ended)
        )
    }

    /// Whether the conversation is over.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Ended | Self::Escalated)
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Intake => "intake",
            Self::Locator => "locator",
            Self::Logistics => "logistics",
            Self::Closer => "closer",
            Self::Ended => "ended",
            Self::Escalated => "escalated",
        };
        write!(f, "{s}")
    }
}

/// Hand-off to a human operator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HumanTransfer {
    pub reason: String,
    pub at: DateTime<Utc>,
}

/// What the backend told us about the caller.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CustomerProfile {
    pub name: Option<String>,
    /// Most recent known pickup address.
    pub stored_address: Option<String>,
    pub has_previous_service: bool,
    pub active_service: Option<ActiveService>,
    pub multiple_active: bool,
    pub service_detail: Option<ServiceDetail>,
    /// We offered `stored_address` as the pickup and await the answer.
    pub address_offered: bool,
    /// We asked "do you want to cancel?" and await the answer.
    pub cancellation_pending: bool,
}

/// One-shot markers for idempotent remote lookups. Set when the call was
/// attempted, whatever its outcome.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LookupCacheFlags {
    pub customer: bool,
    pub service_detail: bool,
    pub geocode: bool,
}

/// Reasoning cost and session bookkeeping.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionUsage {
    /// First reasoner invocation on this thread.
    pub started_at: Option<DateTime<Utc>>,
    pub input_units: u64,
    pub output_units: u64,
    pub reasoner_calls: u32,
    pub dispatch_executed: bool,
    pub flushed: bool,
}

/// One message in the stored transcript.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscriptEntry {
    pub role: Role,
    pub content: String,
    pub stage: Stage,
    pub at: DateTime<Utc>,
}

/// Durable per-thread conversation record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationThread {
    pub version: u32,
    pub thread_id: String,
    pub user_id: String,
    pub client_id: String,
    /// `None` until the first turn has been handled.
    pub active_stage: Option<Stage>,
    pub transfer: Option<HumanTransfer>,
    pub booking: BookingRecord,
    pub customer: CustomerProfile,
    pub lookups: LookupCacheFlags,
    pub usage: SessionUsage,
    pub transcript: Vec<TranscriptEntry>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ConversationThread {
    pub fn new(
        thread_id: impl Into<String>,
        user_id: impl Into<String>,
        client_id: impl Into<String>,
    ) -> Self {
        let client_id = client_id.into();
        let now = Utc::now();
        Self {
            version: STATE_VERSION,
            thread_id: thread_id.into(),
            user_id: user_id.into(),
            booking: BookingRecord::new(client_id.clone()),
            client_id,
            active_stage: None,
            transfer: None,
            customer: CustomerProfile::default(),
            lookups: LookupCacheFlags::default(),
            usage: SessionUsage::default(),
            transcript: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Effective stage; a fresh thread is in Intake.
    pub fn stage(&self) -> Stage {
        self.active_stage.unwrap_or(Stage::Intake)
    }

    pub fn transfer_to_human(&self) -> bool {
        self.transfer.is_some()
    }

    pub fn conversation_ended(&self) -> bool {
        self.usage.dispatch_executed || self.transfer.is_some()
    }

    /// Move to `target`, enforcing the stage graph.
    pub fn transition_to(&mut self, target: Stage) -> Result<(), DialogueError> {
        let current = self.stage();
        if !current.can_transition_to(target) {
            return Err(DialogueError::InvalidTransition {
                from: current.to_string(),
                to: target.to_string(),
            });
        }
        self.active_stage = Some(target);
        Ok(())
    }

    /// Mark the thread as handed to a human. Always succeeds.
    pub fn escalate(&mut self, reason: impl Into<String>) {
        self.transfer = Some(HumanTransfer {
            reason: reason.into(),
            at: Utc::now(),
        });
        self.active_stage = Some(Stage::Escalated);
    }

    pub fn push_user(&mut self, content: impl Into<String>) {
        self.push(Role::User, content.into());
    }

    pub fn push_assistant(&mut self, content: impl Into<String>) {
        self.push(Role::Assistant, content.into());
    }

    fn push(&mut self, role: Role, content: String) {
        self.transcript.push(TranscriptEntry {
            role,
            content,
            stage: self.stage(),
            at: Utc::now(),
        });
    }

    /// Most recent assistant message before the latest caller message.
    pub fn previous_assistant_message(&self) -> Option<&str> {
        let mut entries = self.transcript.iter().rev();
        if self
            .transcript
            .last()
            .is_some_and(|e| e.role == Role::User)
        {
            entries.next();
        }
        entries
            .take_while(|e| e.role != Role::User)
            .find(|e| e.role == Role::Assistant)
            .map(|e| e.content.as_str())
    }

    /// The last `window` transcript messages as chat messages.
    pub fn recent_history(&self, window: usize) -> Vec<ChatMessage> {
        let start = self.transcript.len().saturating_sub(window);
        self.transcript[start..]
            .iter()
            .map(|e| ChatMessage {
                role: e.role,
                content: e.content.clone(),
            })
            .collect()
    }

    /// Full transcript as "Cliente:/Asistente:" lines for extraction passes.
    pub fn transcript_text(&self) -> String {
        self.transcript
            .iter()
            .map(|e| {
                let who = match e.role {
                    Role::User => "Cliente",
                    Role::Assistant => "Asistente",
                    Role::System => "Sistema",
                };
                format!("{who}: {}", e.content)
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Reject records written by a newer layout.
    pub fn check_version(&self) -> Result<(), DialogueError> {
        if self.version > STATE_VERSION {
            return Err(DialogueError::UnsupportedVersion {
                found: self.version,
                supported: STATE_VERSION,
            });
        }
        Ok(())
    }

    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}
