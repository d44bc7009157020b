//! Logistics: payment method and vehicle needs.

use async_trait::async_trait;
use serde::Deserialize;
use tracing::info;

use super::{
    EscalationReason, StageController, StageDeps, StageOutcome, TurnInput,
    unanchored_confirmation,
};
use crate::booking::{self, PaymentMethod, VehicleFeature};
use crate::dialogue::fallback;
use crate::dialogue::lookups;
use crate::dialogue::prompts;
use crate::dialogue::signals::IntentSignal;
use crate::dialogue::state::{ConversationThread, Stage};

const ASK_PAYMENT: &str = "¿Cómo vas a pagar el servicio? Puede ser en efectivo, Nequi, Daviplata o datáfono.";
const ASK_EXTRAS: &str = "¿Necesitas algo especial en el vehículo, como parrilla o baúl grande?";

/// Output of the vehicle-details extraction pass.
#[derive(Debug, Default, Deserialize)]
pub struct VehicleDetails {
    #[serde(default)]
    pub payment_method: Option<String>,
    #[serde(default)]
    pub features: Vec<String>,
    #[serde(default)]
    pub note: Option<String>,
}

#[derive(Debug, Default)]
pub struct LogisticsController;

impl LogisticsController {
    pub fn new() -> Self {
        Self
    }

    /// Track the payment method as the caller states it. Features are left
    /// to the closing extraction, which sees the whole exchange.
    fn note_payment(&self, thread: &mut ConversationThread, text: &str) {
        if let Some(method) = PaymentMethod::parse(text) {
            thread.booking.payment_method = Some(method);
        }
    }

    /// Final pass over the transcript before handing over to Closer.
    async fn finalize(&self, thread: &mut ConversationThread, deps: &StageDeps) {
        let details: VehicleDetails = deps
            .extract(thread, prompts::vehicle_details_prompt)
            .await
            .unwrap_or_default();

        let record = &mut thread.booking;
        if let Some(method) = details.payment_method.as_deref().and_then(PaymentMethod::parse) {
            record.payment_method = Some(method);
        }
        if record.payment_method.is_none() {
            record.payment_method = Some(PaymentMethod::default());
        }
        for name in &details.features {
            match VehicleFeature::from_name(name) {
                Some(feature) => {
                    record.features.insert(feature);
                }
                None => record.features.extend(VehicleFeature::detect(name)),
            }
        }
        if let Some(note) = details.note.map(|n| n.trim().to_string()) {
            if !note.is_empty() && !note.eq_ignore_ascii_case("null") {
                record.driver_note = Some(note);
            }
        }
        record.descriptor = Some(booking::descriptor(record.payment_method, &record.features));
        info!(
            thread_id = %thread.thread_id,
            descriptor = thread.booking.descriptor.as_deref().unwrap_or(""),
            "Logistics captured"
        );
    }
}

#[async_trait]
impl StageController for LogisticsController {
    fn stage(&self) -> Stage {
        Stage::Logistics
    }

    async fn handle(
        &self,
        input: TurnInput<'_>,
        thread: &mut ConversationThread,
        deps: &StageDeps,
    ) -> StageOutcome {
        let text = input.text();

        // Soft path: without coordinates the booking continues and Closer
        // escalates at the gate.
        lookups::ensure_geocode(thread, deps.backend.as_ref()).await;

        self.note_payment(thread, text);
        if unanchored_confirmation(thread, text) {
            return StageOutcome::stay(ASK_PAYMENT);
        }

        let reply = deps.consult(thread, Stage::Logistics).await;
        let done = match &reply.signal {
            Some(IntentSignal::AdvanceToCloser { ready }) => *ready,
            Some(IntentSignal::EscalateToHuman { reason }) => {
                return StageOutcome::escalate(EscalationReason::Requested(reason.clone()));
            }
            _ => fallback::signals_nothing_else(text),
        };

        if done {
            self.finalize(thread, deps).await;
            return StageOutcome::handoff(Stage::Closer);
        }

        let next_question = if thread.booking.payment_method.is_none() {
            ASK_PAYMENT
        } else {
            ASK_EXTRAS
        };
        StageOutcome::stay(reply.text_or(next_question))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use serde_json::json;

    use super::*;
    use crate::booking::{AddressParser, ColombianAddressParser, Coordinates};
    use crate::dialogue::stages::Transition;
    use crate::dialogue::stages::test_support::{FakeBackend, Scripted, ScriptedLlm, calls, deps};

    fn logistics_thread() -> ConversationThread {
        let mut thread = ConversationThread::new("t1", "u1", "300");
        thread.active_stage = Some(Stage::Logistics);
        thread.booking.address = Some(ColombianAddressParser::new().parse("Calle 72 # 43 - 25"));
        thread.push_assistant("Perfecto. ¿Cómo vas a pagar el servicio?");
        thread
    }

    #[tokio::test]
    async fn payment_is_tracked_while_features_wait_for_extraction() {
        let backend = Arc::new(FakeBackend {
            coordinates: Some(Coordinates {
                lat: 10.99,
                lng: -74.80,
            }),
            ..Default::default()
        });
        let llm = Arc::new(ScriptedLlm::new(
            vec![
                Scripted::Text("¿Algo más para el vehículo?"),
                Scripted::Text("¿Algo más?"),
            ],
            vec![],
        ));
        let deps = deps(llm, backend.clone());
        let mut thread = logistics_thread();
        let logistics = LogisticsController::new();

        let first = logistics
            .handle(TurnInput::Caller("por nequi y con parrilla"), &mut thread, &deps)
            .await;
        assert_eq!(first.transition, Transition::Stay);
        logistics
            .handle(TurnInput::Caller("sí, con parrilla por favor"), &mut thread, &deps)
            .await;

        assert_eq!(thread.booking.payment_method, Some(PaymentMethod::Nequi));
        assert!(thread.booking.features.is_empty());
        assert_eq!(calls(&backend.geocode_calls), 1);
        assert!(thread.booking.has_usable_coordinates());
    }

    #[tokio::test]
    async fn declined_feature_is_not_booked() {
        let llm = Arc::new(ScriptedLlm::new(
            vec![Scripted::Text("Entendido. ¿Algo más?"), Scripted::Text("")],
            vec![r#"{"payment_method": "EFECTIVO", "features": [], "note": null}"#],
        ));
        let deps = deps(llm, Arc::new(FakeBackend::default()));
        let mut thread = logistics_thread();
        let logistics = LogisticsController::new();

        logistics
            .handle(TurnInput::Caller("en efectivo, no necesito parrilla"), &mut thread, &deps)
            .await;
        assert!(thread.booking.features.is_empty());

        let outcome = logistics
            .handle(TurnInput::Caller("nada más"), &mut thread, &deps)
            .await;
        assert!(matches!(outcome.transition, Transition::Advance { to: Stage::Closer, .. }));
        assert!(thread.booking.features.is_empty());
        assert_eq!(thread.booking.descriptor.as_deref(), Some("amplio"));
    }

    #[tokio::test]
    async fn nothing_else_hands_off_silently() {
        let llm = Arc::new(ScriptedLlm::new(
            vec![Scripted::Text("")],
            vec![r#"{"payment_method": "NEQUI", "features": ["parrilla", "carga", "Parrilla"], "note": "portón azul"}"#],
        ));
        let deps = deps(llm, Arc::new(FakeBackend::default()));
        let mut thread = logistics_thread();

        let outcome = LogisticsController::new()
            .handle(TurnInput::Caller("nada más, gracias"), &mut thread, &deps)
            .await;

        assert_eq!(outcome.response, None);
        assert_eq!(
            outcome.transition,
            Transition::Advance {
                to: Stage::Closer,
                handoff: true
            }
        );
        assert_eq!(
            thread.booking.descriptor.as_deref(),
            Some("nequi, parrilla, carga")
        );
        assert_eq!(thread.booking.driver_note.as_deref(), Some("portón azul"));
    }

    #[tokio::test]
    async fn failed_extraction_defaults_to_cash() {
        let llm = Arc::new(ScriptedLlm::new(
            vec![Scripted::Signal("advance_to_closer", json!({"ready": true}))],
            vec!["not json"],
        ));
        let deps = deps(llm, Arc::new(FakeBackend::default()));
        let mut thread = logistics_thread();

        LogisticsController::new()
            .handle(TurnInput::Caller("listo"), &mut thread, &deps)
            .await;
        assert_eq!(thread.booking.payment_method, Some(PaymentMethod::Efectivo));
        assert_eq!(thread.booking.descriptor.as_deref(), Some("amplio"));
    }
}
