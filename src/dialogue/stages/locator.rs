//! Locator: capture and confirm the pickup address and the caller's name.

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{info, warn};

use super::{
    EscalationReason, StageController, StageDeps, StageOutcome, TurnInput,
    unanchored_confirmation,
};
use crate::booking::ZoneVerdict;
use crate::dialogue::fallback;
use crate::dialogue::prompts;
use crate::dialogue::signals::IntentSignal;
use crate::dialogue::state::{ConversationThread, Stage};

const ASK_ADDRESS: &str = "¿Me confirmas la dirección exacta donde te recogemos?";
const ASK_STREET: &str = "No logré identificar la dirección. ¿Me la indicas con calle o carrera y número? Por ejemplo: Calle 72 # 43 - 25, El Prado.";
const ASK_CITY: &str = "¿En qué municipio te encuentras: Barranquilla, Soledad, Puerto Colombia o Galapa?";
const OUT_OF_COVERAGE: &str = "Lo siento, por ahora solo prestamos servicio en Barranquilla, Soledad, Puerto Colombia y Galapa. ¿Tienes una dirección de recogida dentro de esa zona?";
const ASK_PAYMENT: &str = "Perfecto. ¿Cómo vas a pagar el servicio?";

/// Output of the confirmed-address extraction pass.
#[derive(Debug, Default, Deserialize)]
pub struct CustomerDetails {
    #[serde(default)]
    pub customer_name: Option<String>,
    #[serde(default)]
    pub confirmed_address: Option<String>,
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty() && !v.eq_ignore_ascii_case("null"))
}

#[derive(Debug, Default)]
pub struct LocatorController;

impl LocatorController {
    pub fn new() -> Self {
        Self
    }

    /// Parse, validate and store the confirmed address.
    async fn capture(
        &self,
        thread: &mut ConversationThread,
        deps: &StageDeps,
        caller_text: &str,
    ) -> Result<(), &'static str> {
        let details: CustomerDetails = deps
            .extract(thread, prompts::customer_details_prompt)
            .await
            .unwrap_or_default();

        let address_text = non_empty(details.confirmed_address)
            .or_else(|| thread.booking.pickup_text.clone())
            .unwrap_or_else(|| caller_text.to_string());

        let mut address = deps.parser.parse(&address_text);
        if !address.has_street() {
            info!(thread_id = %thread.thread_id, "Address has no street: {address_text}");
            return Err(ASK_STREET);
        }
        address.recover_cross_from_neighborhood();

        // The parser only knows covered cities, so an out-of-area city ends
        // up in the neighborhood slot.
        let verdict = match (&address.city, &address.neighborhood) {
            (Some(city), _) => deps.zones.validate(&address, city),
            (None, Some(neighborhood)) => match deps.zones.validate(&address, neighborhood) {
                rejected @ ZoneVerdict::Rejected { .. } => rejected,
                _ => deps.zones.validate(&address, &deps.config.default_city),
            },
            (None, None) => deps.zones.validate(&address, &deps.config.default_city),
        };
        let zone = match verdict {
            ZoneVerdict::Covered(zone) => zone,
            ZoneVerdict::Rejected { city } => {
                info!(thread_id = %thread.thread_id, %city, "Pickup outside coverage");
                return Err(OUT_OF_COVERAGE);
            }
            ZoneVerdict::Unrecognized => {
                warn!(thread_id = %thread.thread_id, "Unrecognized pickup city");
                return Err(ASK_CITY);
            }
        };

        let booking = &mut thread.booking;
        booking.pickup_text = Some(address_text);
        booking.address = Some(address);
        booking.zone = Some(zone);
        if let Some(name) = non_empty(details.customer_name) {
            booking.customer_name = Some(name);
        }
        Ok(())
    }
}

#[async_trait]
impl StageController for LocatorController {
    fn stage(&self) -> Stage {
        Stage::Locator
    }

    async fn handle(
        &self,
        input: TurnInput<'_>,
        thread: &mut ConversationThread,
        deps: &StageDeps,
    ) -> StageOutcome {
        let text = input.text();
        if unanchored_confirmation(thread, text) {
            return StageOutcome::stay(ASK_ADDRESS);
        }

        let reply = deps.consult(thread, Stage::Locator).await;
        let proceed = match &reply.signal {
            Some(IntentSignal::AdvanceToLogistics { .. }) => true,
            Some(IntentSignal::EscalateToHuman { reason }) => {
                return StageOutcome::escalate(EscalationReason::Requested(reason.clone()));
            }
            _ => fallback::asks_for_payment(&reply.text),
        };
        if !proceed {
            return StageOutcome::stay(reply.text_or(ASK_ADDRESS));
        }

        match self.capture(thread, deps, text).await {
            Ok(()) => {
                let response = if fallback::asks_for_payment(&reply.text) {
                    reply.text_or(ASK_PAYMENT)
                } else {
                    ASK_PAYMENT.to_string()
                };
                StageOutcome::advance(Stage::Logistics, response)
            }
            Err(prompt) => StageOutcome::stay(prompt),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use serde_json::json;

    use super::*;
    use crate::booking::Zone;
    use crate::dialogue::stages::Transition;
    use crate::dialogue::stages::test_support::{FakeBackend, Scripted, ScriptedLlm, deps};

    fn locator_thread() -> ConversationThread {
        let mut thread = ConversationThread::new("t1", "u1", "300");
        thread.active_stage = Some(Stage::Locator);
        thread.push_user("Necesito un taxi");
        thread.push_assistant("¡Con gusto! ¿Desde dónde necesitas el taxi?");
        thread
    }

    #[tokio::test]
    async fn confirmed_address_is_parsed_and_zoned() {
        let llm = Arc::new(ScriptedLlm::new(
            vec![Scripted::Signal("advance_to_logistics", json!({"summary": "ok"}))],
            vec![r#"{"customer_name": "Ana", "confirmed_address": "Calle 72 # 43 - 25, El Prado"}"#],
        ));
        let deps = deps(llm, Arc::new(FakeBackend::default()));
        let mut thread = locator_thread();
        thread.push_user("Calle 72 # 43 - 25, El Prado, soy Ana");

        let outcome = LocatorController::new()
            .handle(
                TurnInput::Caller("Calle 72 # 43 - 25, El Prado, soy Ana"),
                &mut thread,
                &deps,
            )
            .await;

        assert_eq!(outcome.response.as_deref(), Some(ASK_PAYMENT));
        assert!(matches!(
            outcome.transition,
            Transition::Advance {
                to: Stage::Logistics,
                handoff: false
            }
        ));
        assert_eq!(thread.booking.zone, Some(Zone::Barranquilla));
        assert_eq!(thread.booking.customer_name.as_deref(), Some("Ana"));
        let address = thread.booking.address.as_ref().unwrap();
        assert_eq!(address.street_number.as_deref(), Some("72"));
        assert_eq!(address.cross_number.as_deref(), Some("43"));
    }

    #[tokio::test]
    async fn address_without_street_stays() {
        let llm = Arc::new(ScriptedLlm::new(
            vec![Scripted::Signal("advance_to_logistics", json!({}))],
            vec![r#"{"customer_name": null, "confirmed_address": "cerca al parque"}"#],
        ));
        let deps = deps(llm, Arc::new(FakeBackend::default()));
        let mut thread = locator_thread();

        let outcome = LocatorController::new()
            .handle(TurnInput::Caller("cerca al parque"), &mut thread, &deps)
            .await;
        assert_eq!(outcome.transition, Transition::Stay);
        assert_eq!(outcome.response.as_deref(), Some(ASK_STREET));
        assert!(thread.booking.address.is_none());
    }

    #[tokio::test]
    async fn out_of_coverage_city_stays() {
        let llm = Arc::new(ScriptedLlm::new(
            vec![Scripted::Signal("advance_to_logistics", json!({}))],
            vec![r#"{"confirmed_address": "Calle 30 # 20 - 10, Cartagena"}"#],
        ));
        let deps = deps(llm, Arc::new(FakeBackend::default()));
        let mut thread = locator_thread();

        let outcome = LocatorController::new()
            .handle(
                TurnInput::Caller("Calle 30 # 20 - 10, Cartagena"),
                &mut thread,
                &deps,
            )
            .await;
        assert_eq!(outcome.response.as_deref(), Some(OUT_OF_COVERAGE));
        assert!(thread.booking.zone.is_none());
    }

    #[tokio::test]
    async fn without_proceed_cue_the_reasoner_text_is_kept() {
        let llm = Arc::new(ScriptedLlm::new(
            vec![Scripted::Text("¿En qué barrio queda la Calle 72 # 43 - 25?")],
            vec![],
        ));
        let deps = deps(llm, Arc::new(FakeBackend::default()));
        let mut thread = locator_thread();

        let outcome = LocatorController::new()
            .handle(TurnInput::Caller("Calle 72 # 43 - 25"), &mut thread, &deps)
            .await;
        assert_eq!(outcome.transition, Transition::Stay);
        assert!(outcome.response.unwrap().contains("barrio"));
    }
}
