//! Intent signals: the closed set of actions the reasoner may request.
//!
//! Each stage exposes a fixed catalogue as tool definitions. The first tool
//! call in a reply is decoded into [`IntentSignal`]; anything outside the
//! active stage's catalogue, or a payload that does not match its schema,
//! is reported as a [`SignalAnomaly`] and the caller falls back to the
//! keyword classifier.

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use super::state::Stage;
use crate::llm::{ToolCall, ToolDefinition};

/// A transition or action requested by the reasoner.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "name", content = "arguments", rename_all = "snake_case")]
pub enum IntentSignal {
    AdvanceToLocator {
        #[serde(default)]
        summary: String,
    },
    AdvanceToLogistics {
        #[serde(default)]
        summary: String,
    },
    AdvanceToCloser {
        #[serde(default = "yes")]
        ready: bool,
    },
    RevertToLocator {
        #[serde(default)]
        correction: String,
    },
    RevertToLogistics {
        #[serde(default)]
        correction: String,
    },
    CommitBooking {
        confirmed_by_user: bool,
    },
    EscalateToHuman {
        #[serde(default)]
        reason: String,
    },
    QueryActiveService {
        #[serde(default = "yes")]
        detail_requested: bool,
    },
    CancelActiveService {
        #[serde(default)]
        confirmed: bool,
    },
}

fn yes() -> bool {
    true
}

/// Payload-free discriminant of [`IntentSignal`], used for catalogues.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SignalKind {
    AdvanceToLocator,
    AdvanceToLogistics,
    AdvanceToCloser,
    RevertToLocator,
    RevertToLogistics,
    CommitBooking,
    EscalateToHuman,
    QueryActiveService,
    CancelActiveService,
}

impl SignalKind {
    pub fn name(&self) -> &'static str {
        match self {
            Self::AdvanceToLocator => "advance_to_locator",
            Self::AdvanceToLogistics => "advance_to_logistics",
            Self::AdvanceToCloser => "advance_to_closer",
            Self::RevertToLocator => "revert_to_locator",
            Self::RevertToLogistics => "revert_to_logistics",
            Self::CommitBooking => "commit_booking",
            Self::EscalateToHuman => "escalate_to_human",
            Self::QueryActiveService => "query_active_service",
            Self::CancelActiveService => "cancel_active_service",
        }
    }

    fn description(&self) -> &'static str {
        match self {
            Self::AdvanceToLocator => {
                "The caller wants a taxi. Use it as soon as the request is clear."
            }
            Self::AdvanceToLogistics => {
                "The pickup address (and the caller's name, if known) has been confirmed by the caller."
            }
            Self::AdvanceToCloser => {
                "Payment method and vehicle needs are settled and the caller needs nothing else."
            }
            Self::RevertToLocator => "The caller says the pickup address in the summary is wrong.",
            Self::RevertToLogistics => {
                "The caller says the payment method or vehicle needs in the summary are wrong."
            }
            Self::CommitBooking => "The caller explicitly confirmed the booking summary.",
            Self::EscalateToHuman => {
                "The caller asks for a person, or the request cannot be handled here."
            }
            Self::QueryActiveService => "The caller asks about the status of their current ride.",
            Self::CancelActiveService => "The caller wants to cancel their current ride.",
        }
    }

    fn parameters(&self) -> Value {
        let text = |name: &str, description: &str| {
            json!({
                "type": "object",
                "properties": { name: { "type": "string", "description": description } },
                "required": [name],
            })
        };
        let flag = |name: &str, description: &str| {
            json!({
                "type": "object",
                "properties": { name: { "type": "boolean", "description": description } },
                "required": [name],
            })
        };
        match self {
            Self::AdvanceToLocator => text("summary", "One-line summary of the request"),
            Self::AdvanceToLogistics => text("summary", "Confirmed address and name"),
            Self::AdvanceToCloser => flag("ready", "True when nothing else is needed"),
            Self::RevertToLocator | Self::RevertToLogistics => {
                text("correction", "What the caller wants to change")
            }
            Self::CommitBooking => flag("confirmed_by_user", "The caller said yes to the summary"),
            Self::EscalateToHuman => text("reason", "Why a human is needed"),
            Self::QueryActiveService => flag("detail_requested", "Driver or status was asked for"),
            Self::CancelActiveService => {
                flag("confirmed", "The caller already confirmed the cancellation")
            }
        }
    }

    pub fn tool_definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.name().to_string(),
            description: self.description().to_string(),
            parameters: self.parameters(),
        }
    }
}

impl IntentSignal {
    pub fn kind(&self) -> SignalKind {
        match self {
            Self::AdvanceToLocator { .. } => SignalKind::AdvanceToLocator,
            Self::AdvanceToLogistics { .. } => SignalKind::AdvanceToLogistics,
            Self::AdvanceToCloser { .. } => SignalKind::AdvanceToCloser,
            Self::RevertToLocator { .. } => SignalKind::RevertToLocator,
            Self::RevertToLogistics { .. } => SignalKind::RevertToLogistics,
            Self::CommitBooking { .. } => SignalKind::CommitBooking,
            Self::EscalateToHuman { .. } => SignalKind::EscalateToHuman,
            Self::QueryActiveService { .. } => SignalKind::QueryActiveService,
            Self::CancelActiveService { .. } => SignalKind::CancelActiveService,
        }
    }
}

/// Signals a stage will act on. Terminal stages accept none.
pub fn catalogue(stage: Stage) -> &'static [SignalKind] {
    use SignalKind::*;
    match stage {
        Stage::Intake => &[
            AdvanceToLocator,
            QueryActiveService,
            CancelActiveService,
            EscalateToHuman,
        ],
        Stage::Locator => &[AdvanceToLogistics, EscalateToHuman],
        Stage::Logistics => &[AdvanceToCloser, EscalateToHuman],
        Stage::Closer => &[
            CommitBooking,
            RevertToLocator,
            RevertToLogistics,
            EscalateToHuman,
        ],
        Stage::Ended | Stage::Escalated => &[],
    }
}

/// Tool definitions for a stage's catalogue.
pub fn tool_definitions(stage: Stage) -> Vec<ToolDefinition> {
    catalogue(stage)
        .iter()
        .map(SignalKind::tool_definition)
        .collect()
}

/// Why a tool call could not be used.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SignalAnomaly {
    #[error("signal '{name}' is not available in stage {stage}")]
    OutOfCatalogue { name: String, stage: Stage },

    #[error("malformed payload for '{name}': {reason}")]
    Malformed { name: String, reason: String },
}

/// Decode a tool call against the active stage's catalogue.
pub fn decode(stage: Stage, call: &ToolCall) -> Result<IntentSignal, SignalAnomaly> {
    let permitted = catalogue(stage).iter().any(|kind| kind.name() == call.name);
    if !permitted {
        return Err(SignalAnomaly::OutOfCatalogue {
            name: call.name.clone(),
            stage,
        });
    }

    // Some providers send arguments as a JSON-encoded string.
    let arguments = match &call.arguments {
        Value::Null => json!({}),
        Value::String(raw) => serde_json::from_str(raw).map_err(|e| SignalAnomaly::Malformed {
            name: call.name.clone(),
            reason: e.to_string(),
        })?,
        other => other.clone(),
    };

    serde_json::from_value(json!({ "name": call.name, "arguments": arguments })).map_err(|e| {
        SignalAnomaly::Malformed {
            name: call.name.clone(),
            reason: e.to_string(),
        }
    })
}
