//! Stage controllers.
//!
//! Every controller follows the same shape: run the lookups its phase still
//! needs, consult the reasoner with the stage's signal catalogue, and turn
//! the chosen signal (or the keyword fallback) into a [`Transition`]. The
//! engine applies the transition; controllers only touch booking data.

mod closer;
mod intake;
mod locator;
mod logistics;

pub use closer::CloserController;
pub use intake::IntakeController;
pub use locator::LocatorController;
pub use logistics::LogisticsController;

use std::sync::Arc;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use tracing::warn;

use super::accountant::SessionAccountant;
use super::fallback;
use super::prompts;
use super::signals::{self, IntentSignal};
use super::state::{ConversationThread, Stage};
use crate::backend::DispatchBackend;
use crate::booking::{AddressParser, ZoneValidator};
use crate::config::AgentConfig;
use crate::llm::{ChatMessage, Reasoning, ReasoningContext};

/// Line used whenever there is nothing better to say.
pub const GENERIC_FALLBACK: &str = "Lo siento, ¿podrías repetir eso? No entendí bien tu mensaje.";

/// What a controller is asked to handle.
#[derive(Debug, Clone, Copy)]
pub enum TurnInput<'a> {
    /// A caller message.
    Caller(&'a str),
    /// The previous stage handed over within the same turn, with no new
    /// caller text.
    Handoff,
}

impl<'a> TurnInput<'a> {
    pub fn text(&self) -> &'a str {
        match self {
            Self::Caller(text) => text,
            Self::Handoff => "",
        }
    }
}

/// Why a conversation is being handed to a human.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EscalationReason {
    CustomerLookupUnavailable,
    MultipleActiveServices,
    ServiceDetailUnavailable,
    CancellationUnavailable,
    MissingCoordinates,
    RegistrationUnavailable,
    /// Asked for by the caller or chosen by the reasoner.
    Requested(String),
}

impl EscalationReason {
    /// Reason recorded on the thread and in the escalation notice.
    pub fn reason(&self) -> String {
        match self {
            Self::CustomerLookupUnavailable => "Backend unavailable for customer lookup".into(),
            Self::MultipleActiveServices => "Cliente con múltiples servicios activos".into(),
            Self::ServiceDetailUnavailable => "Backend unavailable for service detail".into(),
            Self::CancellationUnavailable => "Backend unavailable for service cancellation".into(),
            Self::MissingCoordinates => "Coordenadas no disponibles para la dirección".into(),
            Self::RegistrationUnavailable => "Backend unavailable for service registration".into(),
            Self::Requested(reason) if reason.trim().is_empty() => {
                "Solicitado por el cliente".into()
            }
            Self::Requested(reason) => reason.clone(),
        }
    }

    /// What the caller is told.
    pub fn caller_message(&self) -> &'static str {
        match self {
            Self::CustomerLookupUnavailable => {
                "En este momento no puedo consultar tu información. Te comunico con un asesor que te ayudará enseguida."
            }
            Self::MultipleActiveServices => {
                "Veo que tienes varios servicios activos. Te comunico con un asesor para ayudarte."
            }
            Self::ServiceDetailUnavailable => {
                "No puedo consultar el estado de tu servicio en este momento. Te comunico con un asesor."
            }
            Self::CancellationUnavailable => {
                "No pude cancelar tu servicio en este momento. Te comunico con un asesor que lo hará por ti."
            }
            Self::MissingCoordinates => {
                "Necesito verificar tu dirección con un asesor para asignarte el taxi. Te comunico en un momento."
            }
            Self::RegistrationUnavailable => {
                "He recibido todos tus datos, pero tengo problemas para procesar tu solicitud. Voy a conectarte con un asesor que completará tu pedido."
            }
            Self::Requested(_) => "Claro, te comunico con un asesor en un momento.",
        }
    }
}

/// State change requested by a controller.
#[derive(Debug, Clone, PartialEq)]
pub enum Transition {
    Stay,
    /// Move forward. With `handoff` the next stage runs in the same turn.
    Advance { to: Stage, handoff: bool },
    /// Closer sends the caller back to correct something.
    Revert(Stage),
    Commit,
    Escalate(EscalationReason),
}

/// Result of handling one turn in one stage.
#[derive(Debug, Clone, PartialEq)]
pub struct StageOutcome {
    pub response: Option<String>,
    pub transition: Transition,
}

impl StageOutcome {
    pub fn stay(response: impl Into<String>) -> Self {
        Self {
            response: Some(response.into()),
            transition: Transition::Stay,
        }
    }

    pub fn advance(to: Stage, response: impl Into<String>) -> Self {
        Self {
            response: Some(response.into()),
            transition: Transition::Advance { to, handoff: false },
        }
    }

    /// Advance without a visible reply; the next stage speaks.
    pub fn handoff(to: Stage) -> Self {
        Self {
            response: None,
            transition: Transition::Advance { to, handoff: true },
        }
    }

    pub fn revert(to: Stage, response: impl Into<String>) -> Self {
        Self {
            response: Some(response.into()),
            transition: Transition::Revert(to),
        }
    }

    pub fn commit() -> Self {
        Self {
            response: None,
            transition: Transition::Commit,
        }
    }

    pub fn escalate(reason: EscalationReason) -> Self {
        Self {
            response: None,
            transition: Transition::Escalate(reason),
        }
    }
}

/// Reasoner reply after signal decoding.
#[derive(Debug, Clone, Default)]
pub struct Reply {
    pub text: String,
    pub signal: Option<IntentSignal>,
}

impl Reply {
    /// Reasoner text, or `fallback` when it said nothing.
    pub fn text_or(&self, fallback: &str) -> String {
        if self.text.trim().is_empty() {
            fallback.to_string()
        } else {
            self.text.trim().to_string()
        }
    }
}

/// Collaborators shared by every controller.
pub struct StageDeps {
    pub reasoning: Reasoning,
    pub backend: Arc<dyn DispatchBackend>,
    pub parser: Arc<dyn AddressParser>,
    pub zones: Arc<dyn ZoneValidator>,
    pub config: AgentConfig,
}

impl StageDeps {
    /// Ask the reasoner for the next line and signal. Failures and signals
    /// outside the stage's catalogue are logged and masked as an empty
    /// reply.
    pub async fn consult(&self, thread: &mut ConversationThread, stage: Stage) -> Reply {
        let mut messages = vec![
            ChatMessage::system(prompts::stage_instructions(stage, &self.config.name)),
            ChatMessage::system(prompts::context_section(thread)),
        ];
        messages.extend(thread.recent_history(self.config.history_window));

        let context = ReasoningContext::new()
            .with_messages(messages)
            .with_tools(signals::tool_definitions(stage))
            .with_metadata("thread_id", thread.thread_id.clone())
            .with_metadata("stage", stage.to_string());

        let output = match self.reasoning.respond_with_tools(&context).await {
            Ok(output) => output,
            Err(e) => {
                warn!(thread_id = %thread.thread_id, %stage, "Reasoner call failed: {e}");
                return Reply::default();
            }
        };
        SessionAccountant::record(&mut thread.usage, output.usage);

        let signal = output.result.first_tool_call().and_then(|call| {
            match signals::decode(stage, call) {
                Ok(signal) => Some(signal),
                Err(anomaly) => {
                    warn!(thread_id = %thread.thread_id, %stage, "Ignoring signal: {anomaly}");
                    None
                }
            }
        });
        if let Some(signal) = &signal {
            tracing::debug!(thread_id = %thread.thread_id, %stage, signal = signal.kind().name(), "Reasoner chose signal");
        }

        Reply {
            text: output.result.text().to_string(),
            signal,
        }
    }

    /// Run an extraction pass over the whole transcript.
    pub async fn extract<T: DeserializeOwned>(
        &self,
        thread: &mut ConversationThread,
        build_prompt: fn(&str) -> String,
    ) -> Option<T> {
        let prompt = build_prompt(&thread.transcript_text());
        match self.reasoning.extract_json::<T>(&prompt).await {
            Ok(extracted) => {
                SessionAccountant::record(&mut thread.usage, extracted.usage);
                extracted.value
            }
            Err(e) => {
                warn!(thread_id = %thread.thread_id, "Extraction call failed: {e}");
                None
            }
        }
    }
}

/// A "yes" with nothing before it to say yes to.
pub(crate) fn unanchored_confirmation(thread: &ConversationThread, text: &str) -> bool {
    fallback::is_bare_confirmation(text)
        && !thread
            .previous_assistant_message()
            .is_some_and(fallback::is_question)
}

/// One phase of the booking conversation.
#[async_trait]
pub trait StageController: Send + Sync {
    fn stage(&self) -> Stage;

    async fn handle(
        &self,
        input: TurnInput<'_>,
        thread: &mut ConversationThread,
        deps: &StageDeps,
    ) -> StageOutcome;
}
