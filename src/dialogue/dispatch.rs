//! Dispatch & escalation: the two ways a conversation ends.
//!
//! Registration runs at most once per thread. `dispatch_executed` is raised
//! before the remote call, so a second commit (or a retry after a failure)
//! never reaches the registration service again. The engine serializes
//! turns per thread, which makes this read-then-write safe.

use std::sync::Arc;

use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

use super::stages::EscalationReason;
use super::state::{ConversationThread, Stage};
use crate::backend::{DispatchBackend, RegistrationRequest};
use crate::booking;

pub const DISPATCH_CONFIRMED: &str =
    "¡Listo! Tu taxi está en camino. Llegará en aproximadamente 10 minutos. ¡Buen viaje!";
const ALREADY_DISPATCHED: &str = "Tu servicio ya fue registrado. Tu taxi está en camino.";

/// Published for the human queue whenever a thread is escalated.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EscalationNotice {
    pub thread_id: String,
    pub client_id: String,
    pub stage: Stage,
    pub reason: String,
}

pub struct DispatchController {
    backend: Arc<dyn DispatchBackend>,
    notices: Option<mpsc::Sender<EscalationNotice>>,
}

impl DispatchController {
    pub fn new(backend: Arc<dyn DispatchBackend>) -> Self {
        Self {
            backend,
            notices: None,
        }
    }

    pub fn with_notices(mut self, notices: mpsc::Sender<EscalationNotice>) -> Self {
        self.notices = Some(notices);
        self
    }

    /// Register the booking. Returns the caller-facing line.
    pub async fn commit(&self, thread: &mut ConversationThread) -> String {
        if thread.usage.dispatch_executed {
            info!(thread_id = %thread.thread_id, "Dispatch already executed, skipping");
            return ALREADY_DISPATCHED.to_string();
        }
        if !thread.booking.has_usable_coordinates() {
            return self.escalate(thread, EscalationReason::MissingCoordinates);
        }

        thread.usage.dispatch_executed = true;
        let request = registration_request(thread);
        thread.booking.descriptor = Some(request.descriptor.clone());

        match self.backend.register_service(&request).await {
            Ok(receipt) => {
                info!(
                    thread_id = %thread.thread_id,
                    service_id = receipt.service_id.as_deref().unwrap_or(""),
                    descriptor = %request.descriptor,
                    "Service registered"
                );
                thread.booking.service_id = receipt.service_id;
                if let Err(e) = thread.transition_to(Stage::Ended) {
                    warn!(thread_id = %thread.thread_id, "{e}");
                    thread.active_stage = Some(Stage::Ended);
                }
                DISPATCH_CONFIRMED.to_string()
            }
            Err(e) => {
                error!(thread_id = %thread.thread_id, "Registration failed: {e}");
                self.escalate(thread, EscalationReason::RegistrationUnavailable)
            }
        }
    }

    /// Hand the thread to a human. Returns the caller-facing line.
    pub fn escalate(&self, thread: &mut ConversationThread, reason: EscalationReason) -> String {
        let stage = thread.stage();
        let reason_text = reason.reason();
        warn!(thread_id = %thread.thread_id, %stage, reason = %reason_text, "Escalating to human");
        thread.escalate(reason_text.clone());

        if let Some(notices) = &self.notices {
            let notice = EscalationNotice {
                thread_id: thread.thread_id.clone(),
                client_id: thread.client_id.clone(),
                stage,
                reason: reason_text,
            };
            if let Err(e) = notices.try_send(notice) {
                warn!(thread_id = %thread.thread_id, "Escalation notice dropped: {e}");
            }
        }
        reason.caller_message().to_string()
    }
}

fn registration_request(thread: &ConversationThread) -> RegistrationRequest {
    let booking = &thread.booking;
    let descriptor = booking
        .descriptor
        .clone()
        .unwrap_or_else(|| booking::descriptor(booking.payment_method, &booking.features));
    let (latitude, longitude) = booking
        .coordinates
        .map(|c| (c.lat.to_string(), c.lng.to_string()))
        .unwrap_or_default();

    RegistrationRequest {
        client_id: thread.client_id.clone(),
        address: booking.address_line(),
        latitude,
        longitude,
        zone: booking
            .zone
            .map(|z| z.as_str().to_string())
            .unwrap_or_default(),
        descriptor,
        note: booking.driver_note.clone().unwrap_or_default(),
        customer_name: booking
            .customer_name
            .clone()
            .or_else(|| thread.customer.name.clone())
            .unwrap_or_default(),
    }
}
