//! Closer: read back the booking and get a final yes.

use async_trait::async_trait;
use tracing::warn;

use super::{
    EscalationReason, StageController, StageDeps, StageOutcome, TurnInput,
    unanchored_confirmation,
};
use crate::booking::PaymentMethod;
use crate::dialogue::fallback;
use crate::dialogue::signals::IntentSignal;
use crate::dialogue::state::{ConversationThread, Stage};

const ASK_WHICH: &str = "¿Qué dato quieres corregir: la dirección o el método de pago?";
const ASK_NEW_ADDRESS: &str = "Claro. ¿Cuál es la dirección correcta de recogida?";
const ASK_NEW_PAYMENT: &str = "Claro. ¿Cómo prefieres pagar el servicio?";

/// Deterministic read-back of the booking.
pub fn booking_summary(thread: &ConversationThread) -> String {
    let booking = &thread.booking;
    let name = booking
        .customer_name
        .as_deref()
        .or(thread.customer.name.as_deref())
        .unwrap_or("Cliente");
    let payment = booking
        .payment_method
        .unwrap_or(PaymentMethod::Efectivo)
        .as_str()
        .to_lowercase();
    let vehicle = if booking.features.is_empty() {
        "estándar".to_string()
    } else {
        booking
            .features
            .iter()
            .map(|f| f.as_str())
            .collect::<Vec<_>>()
            .join(", ")
    };

    let mut lines = vec![
        "Este es el resumen de tu servicio:".to_string(),
        format!("- Nombre: {name}"),
        format!("- Dirección: {}", booking.address_line()),
        format!("- Pago: {payment}"),
        format!("- Vehículo: {vehicle}"),
    ];
    if let Some(note) = &booking.driver_note {
        lines.push(format!("- Indicaciones: {note}"));
    }
    lines.push("¿Es correcto?".to_string());
    lines.join("\n")
}

#[derive(Debug, Default)]
pub struct CloserController;

impl CloserController {
    pub fn new() -> Self {
        Self
    }

    fn revert_to_locator(&self, thread: &mut ConversationThread, text: String) -> StageOutcome {
        // The geocode flag stays raised: the lookup is not retried.
        thread.booking.clear_location();
        StageOutcome::revert(Stage::Locator, text)
    }

    fn revert_to_logistics(&self, thread: &mut ConversationThread, text: String) -> StageOutcome {
        thread.booking.clear_payment();
        StageOutcome::revert(Stage::Logistics, text)
    }
}

#[async_trait]
impl StageController for CloserController {
    fn stage(&self) -> Stage {
        Stage::Closer
    }

    async fn handle(
        &self,
        input: TurnInput<'_>,
        thread: &mut ConversationThread,
        deps: &StageDeps,
    ) -> StageOutcome {
        if !thread.booking.has_usable_coordinates() {
            warn!(thread_id = %thread.thread_id, "No usable coordinates at closing");
            return StageOutcome::escalate(EscalationReason::MissingCoordinates);
        }

        let text = match input {
            TurnInput::Handoff => return StageOutcome::stay(booking_summary(thread)),
            TurnInput::Caller(text) => text,
        };
        if unanchored_confirmation(thread, text) {
            return StageOutcome::stay(booking_summary(thread));
        }

        let reply = deps.consult(thread, Stage::Closer).await;
        match reply.signal.clone() {
            Some(IntentSignal::CommitBooking {
                confirmed_by_user: true,
            }) => StageOutcome::commit(),
            Some(IntentSignal::CommitBooking { .. }) => {
                StageOutcome::stay(reply.text_or(&booking_summary(thread)))
            }
            Some(IntentSignal::RevertToLocator { .. }) => {
                self.revert_to_locator(thread, reply.text_or(ASK_NEW_ADDRESS))
            }
            Some(IntentSignal::RevertToLogistics { .. }) => {
                self.revert_to_logistics(thread, reply.text_or(ASK_NEW_PAYMENT))
            }
            Some(IntentSignal::EscalateToHuman { reason }) => {
                StageOutcome::escalate(EscalationReason::Requested(reason))
            }
            _ if fallback::is_affirmative(text) => StageOutcome::commit(),
            _ if fallback::is_negative(text) => {
                if fallback::mentions_address(text) {
                    self.revert_to_locator(thread, ASK_NEW_ADDRESS.to_string())
                } else if fallback::mentions_payment(text) {
                    self.revert_to_logistics(thread, ASK_NEW_PAYMENT.to_string())
                } else {
                    StageOutcome::stay(ASK_WHICH)
                }
            }
            _ => StageOutcome::stay(reply.text_or(&booking_summary(thread))),
        }
    }
}
