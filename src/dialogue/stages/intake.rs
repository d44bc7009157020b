//! Intake: work out what the caller wants.

use async_trait::async_trait;
use tracing::{info, warn};

use super::{
    EscalationReason, GENERIC_FALLBACK, StageController, StageDeps, StageOutcome, TurnInput,
    unanchored_confirmation,
};
use crate::dialogue::fallback::{self, CallerIntent};
use crate::dialogue::lookups;
use crate::dialogue::signals::IntentSignal;
use crate::dialogue::state::{ConversationThread, Stage};

const ASK_PICKUP: &str = "¡Con gusto! ¿Desde dónde necesitas el taxi?";
const CLARIFY: &str = "¿En qué te puedo ayudar? ¿Necesitas un taxi?";

/// What the caller wants, whether the reasoner or the classifier said so.
enum Request {
    Taxi,
    Query,
    Cancel,
    Human(String),
    Other,
}

impl From<IntentSignal> for Request {
    fn from(signal: IntentSignal) -> Self {
        match signal {
            IntentSignal::AdvanceToLocator { .. } => Self::Taxi,
            IntentSignal::QueryActiveService { .. } => Self::Query,
            IntentSignal::CancelActiveService { .. } => Self::Cancel,
            IntentSignal::EscalateToHuman { reason } => Self::Human(reason),
            _ => Self::Other,
        }
    }
}

impl From<CallerIntent> for Request {
    fn from(intent: CallerIntent) -> Self {
        match intent {
            CallerIntent::TaxiRequest => Self::Taxi,
            CallerIntent::QueryService => Self::Query,
            CallerIntent::CancelService => Self::Cancel,
            CallerIntent::HumanRequest => Self::Human(String::new()),
            CallerIntent::Other => Self::Other,
        }
    }
}

/// Classifies the caller's request and answers service queries and
/// cancellations directly.
#[derive(Debug, Default)]
pub struct IntakeController;

impl IntakeController {
    pub fn new() -> Self {
        Self
    }

    fn pickup(&self, thread: &mut ConversationThread) -> StageOutcome {
        if let Some(address) = thread.customer.stored_address.clone() {
            if !thread.customer.address_offered {
                thread.customer.address_offered = true;
                return StageOutcome::stay(format!("¡Con gusto! ¿Te recogemos en {address}?"));
            }
        }
        StageOutcome::advance(Stage::Locator, ASK_PICKUP)
    }

    /// The caller answered our stored-address offer.
    fn answer_offer(&self, thread: &mut ConversationThread, text: &str) -> Option<StageOutcome> {
        thread.customer.address_offered = false;
        if fallback::is_affirmative(text) {
            let address = thread.customer.stored_address.clone()?;
            thread.booking.pickup_text = Some(address.clone());
            let name = thread.booking.customer_name.clone();
            let reply = match name {
                Some(name) => format!(
                    "Perfecto, te recogemos en {address}. ¿El servicio queda a nombre de {name}?"
                ),
                None => format!(
                    "Perfecto, te recogemos en {address}. ¿A nombre de quién registro el servicio?"
                ),
            };
            return Some(StageOutcome::advance(Stage::Locator, reply));
        }
        if fallback::is_negative(text) {
            return Some(StageOutcome::advance(
                Stage::Locator,
                "Entendido. ¿Desde dónde necesitas el taxi?",
            ));
        }
        None
    }

    async fn query(&self, thread: &mut ConversationThread, deps: &StageDeps) -> StageOutcome {
        if thread.customer.active_service.is_none() {
            return StageOutcome::stay(
                "No tienes ningún servicio activo en este momento. ¿Necesitas un taxi?",
            );
        }
        if lookups::ensure_service_detail(thread, deps.backend.as_ref())
            .await
            .is_unavailable()
        {
            return StageOutcome::escalate(EscalationReason::ServiceDetailUnavailable);
        }

        match (&thread.customer.active_service, &thread.customer.service_detail) {
            (None, _) => StageOutcome::stay(
                "Tu último servicio ya no está activo. ¿Necesitas un nuevo taxi?",
            ),
            (Some(_), Some(detail)) => {
                let plate = detail
                    .plate
                    .as_deref()
                    .map(|p| format!(", placa {p}"))
                    .unwrap_or_default();
                StageOutcome::stay(format!(
                    "Tu servicio está {}. Conductor: {}{plate}. ¿Te puedo ayudar con algo más?",
                    detail.status_phrase(),
                    detail.driver_name
                ))
            }
            (Some(service), None) => StageOutcome::stay(format!(
                "Tu servicio {} está activo y en proceso de asignación. ¿Te puedo ayudar con algo más?",
                service.service_id
            )),
        }
    }

    async fn cancel(
        &self,
        thread: &mut ConversationThread,
        deps: &StageDeps,
        confirmed: bool,
    ) -> StageOutcome {
        let Some(service) = thread.customer.active_service.clone() else {
            return StageOutcome::stay(
                "No tienes ningún servicio activo para cancelar. ¿Te puedo ayudar con algo más?",
            );
        };
        if !confirmed {
            thread.customer.cancellation_pending = true;
            return StageOutcome::stay(format!(
                "¿Confirmas que deseas cancelar tu servicio {}?",
                service.service_id
            ));
        }

        match deps.backend.cancel_service(&service.service_id).await {
            Ok(()) => {
                info!(thread_id = %thread.thread_id, service_id = %service.service_id, "Service cancelled");
                thread.customer.active_service = None;
                thread.customer.service_detail = None;
                StageOutcome::stay("Tu servicio fue cancelado. ¿Te puedo ayudar con algo más?")
            }
            Err(e) => {
                warn!(thread_id = %thread.thread_id, "Cancellation failed: {e}");
                StageOutcome::escalate(EscalationReason::CancellationUnavailable)
            }
        }
    }
}

#[async_trait]
impl StageController for IntakeController {
    fn stage(&self) -> Stage {
        Stage::Intake
    }

    async fn handle(
        &self,
        input: TurnInput<'_>,
        thread: &mut ConversationThread,
        deps: &StageDeps,
    ) -> StageOutcome {
        let text = input.text();

        if lookups::ensure_customer(thread, deps.backend.as_ref())
            .await
            .is_unavailable()
        {
            return StageOutcome::escalate(EscalationReason::CustomerLookupUnavailable);
        }
        if thread.customer.multiple_active {
            return StageOutcome::escalate(EscalationReason::MultipleActiveServices);
        }

        if thread.customer.cancellation_pending {
            thread.customer.cancellation_pending = false;
            if fallback::is_affirmative(text) {
                return self.cancel(thread, deps, true).await;
            }
            if fallback::is_negative(text) {
                return StageOutcome::stay(
                    "Entendido, tu servicio sigue activo. ¿Te puedo ayudar con algo más?",
                );
            }
        }
        if thread.customer.address_offered {
            if let Some(outcome) = self.answer_offer(thread, text) {
                return outcome;
            }
        }

        if unanchored_confirmation(thread, text) {
            return StageOutcome::stay(CLARIFY);
        }

        let reply = deps.consult(thread, Stage::Intake).await;
        let request = match reply.signal.clone() {
            Some(signal) => Request::from(signal),
            None => Request::from(fallback::classify_intent(text)),
        };

        match request {
            Request::Taxi => {
                let outcome = self.pickup(thread);
                // Keep the reasoner's wording for a plain address prompt.
                match outcome.response.as_deref() {
                    Some(ASK_PICKUP) if fallback::asks_for_address(&reply.text) => {
                        StageOutcome::advance(Stage::Locator, reply.text_or(ASK_PICKUP))
                    }
                    _ => outcome,
                }
            }
            Request::Query => self.query(thread, deps).await,
            // A cancellation always needs its own confirmation turn.
            Request::Cancel => self.cancel(thread, deps, false).await,
            Request::Human(reason) => StageOutcome::escalate(EscalationReason::Requested(reason)),
            Request::Other => StageOutcome::stay(reply.text_or(GENERIC_FALLBACK)),
        }
    }
}
