//! Dialogue engine: one caller turn in, one reply out.
//!
//! Loads the thread from the checkpoint store, routes it to the active stage
//! controller, applies the requested transition (including commit and
//! escalation), settles usage and writes the thread back. Turns for one
//! thread are serialized through a per-thread mutex; different threads run
//! in parallel.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::accountant::SessionAccountant;
use super::dispatch::DispatchController;
use super::fallback;
use super::router::{Route, Router};
use super::stages::{GENERIC_FALLBACK, StageDeps, Transition, TurnInput};
use super::state::{ConversationThread, Stage};
use crate::error::Result;
use crate::store::CheckpointStore;

/// A silent handoff chains at most one more stage in the same turn.
const MAX_HOPS: usize = 2;

const ENDED_LINE: &str = "Tu taxi ya está en camino. ¡Buen viaje!";
const ENDED_FAREWELL: &str = "¡Gracias a ti! Que tengas un buen viaje.";
const ESCALATED_LINE: &str = "Un asesor te contactará en un momento. Gracias por tu paciencia.";

/// Inbound caller message.
#[derive(Debug, Clone, Deserialize)]
pub struct InboundTurn {
    #[serde(alias = "MESSAGE")]
    pub message: String,
    #[serde(default, alias = "THREAD_ID")]
    pub thread_id: Option<String>,
    #[serde(alias = "USER_ID")]
    pub user_id: String,
    /// Defaults to `user_id`.
    #[serde(default, alias = "CLIENT_ID")]
    pub client_id: Option<String>,
}

impl InboundTurn {
    pub fn new(user_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            thread_id: None,
            user_id: user_id.into(),
            client_id: None,
        }
    }

    pub fn on_thread(mut self, thread_id: impl Into<String>) -> Self {
        self.thread_id = Some(thread_id.into());
        self
    }
}

/// Reply returned to the transport.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TurnResult {
    pub thread_id: String,
    pub response: String,
    pub transfer_to_human: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transfer_reason: Option<String>,
    pub conversation_ended: bool,
}

impl TurnResult {
    fn from_thread(thread: &ConversationThread, response: String) -> Self {
        Self {
            thread_id: thread.thread_id.clone(),
            response,
            transfer_to_human: thread.transfer_to_human(),
            transfer_reason: thread.transfer.as_ref().map(|t| t.reason.clone()),
            conversation_ended: thread.conversation_ended(),
        }
    }
}

pub struct DialogueEngine {
    store: Arc<dyn CheckpointStore>,
    deps: StageDeps,
    router: Router,
    dispatch: DispatchController,
    accountant: SessionAccountant,
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl DialogueEngine {
    pub fn new(
        store: Arc<dyn CheckpointStore>,
        deps: StageDeps,
        dispatch: DispatchController,
        accountant: SessionAccountant,
    ) -> Self {
        Self {
            store,
            deps,
            router: Router::new(),
            dispatch,
            accountant,
            locks: Mutex::new(HashMap::new()),
        }
    }

    /// Process one caller message end to end.
    pub async fn handle_turn(&self, inbound: InboundTurn) -> Result<TurnResult> {
        let thread_id = inbound
            .thread_id
            .filter(|id| !id.trim().is_empty())
            .unwrap_or_else(|| Uuid::new_v4().to_string());

        let lock = self.thread_lock(&thread_id).await;
        let result = {
            let _turn = lock.lock().await;
            self.locked_turn(
                thread_id.clone(),
                inbound.user_id,
                inbound.client_id,
                &inbound.message,
            )
            .await
        };
        self.release_lock(&thread_id, lock).await;
        result
    }

    /// Current state of a thread, if it exists.
    pub async fn get_thread(&self, thread_id: &str) -> Result<Option<ConversationThread>> {
        Ok(self.store.get(thread_id).await?)
    }

    async fn locked_turn(
        &self,
        thread_id: String,
        user_id: String,
        client_id: Option<String>,
        message: &str,
    ) -> Result<TurnResult> {
        let mut thread = match self.store.get(&thread_id).await? {
            Some(thread) => {
                thread.check_version()?;
                thread
            }
            None => {
                let client_id = client_id
                    .filter(|c| !c.trim().is_empty())
                    .unwrap_or_else(|| user_id.clone());
                info!(%thread_id, %client_id, "New conversation thread");
                ConversationThread::new(thread_id, user_id, client_id)
            }
        };

        thread.push_user(message);
        let response = match thread.active_stage {
            Some(stage) if stage.is_terminal() => terminal_line(stage, message).to_string(),
            _ => self.run_stages(&mut thread, message).await,
        };
        thread.push_assistant(response.clone());

        self.accountant.maybe_flush(&mut thread, message).await;
        thread.touch();
        self.store.put(&thread).await?;

        debug!(thread_id = %thread.thread_id, stage = %thread.stage(), "Turn complete");
        Ok(TurnResult::from_thread(&thread, response))
    }

    async fn run_stages(&self, thread: &mut ConversationThread, message: &str) -> String {
        if thread.active_stage.is_none() {
            thread.active_stage = Some(Stage::Intake);
        }

        let mut input = TurnInput::Caller(message);
        for _ in 0..MAX_HOPS {
            let controller = match self.router.select(thread.active_stage) {
                Route::Controller(controller) => controller,
                Route::Terminal(stage) => return terminal_line(stage, message).to_string(),
            };
            let stage = controller.stage();
            let outcome = controller.handle(input, thread, &self.deps).await;
            let response = outcome
                .response
                .filter(|r| !r.trim().is_empty())
                .unwrap_or_else(|| GENERIC_FALLBACK.to_string());

            match outcome.transition {
                Transition::Stay => return response,
                Transition::Advance { to, handoff } => {
                    if !self.move_to(thread, to) {
                        return GENERIC_FALLBACK.to_string();
                    }
                    if handoff {
                        input = TurnInput::Handoff;
                        continue;
                    }
                    return response;
                }
                Transition::Revert(to) => {
                    info!(thread_id = %thread.thread_id, from = %stage, to = %to, "Reverting for correction");
                    if !self.move_to(thread, to) {
                        return GENERIC_FALLBACK.to_string();
                    }
                    return response;
                }
                Transition::Commit => return self.dispatch.commit(thread).await,
                Transition::Escalate(reason) => return self.dispatch.escalate(thread, reason),
            }
        }

        warn!(thread_id = %thread.thread_id, "Stage handoff limit reached");
        GENERIC_FALLBACK.to_string()
    }

    fn move_to(&self, thread: &mut ConversationThread, to: Stage) -> bool {
        let from = thread.stage();
        match thread.transition_to(to) {
            Ok(()) => {
                if from != to {
                    info!(thread_id = %thread.thread_id, %from, %to, "Stage transition");
                }
                true
            }
            Err(e) => {
                warn!(thread_id = %thread.thread_id, "{e}");
                false
            }
        }
    }

    async fn thread_lock(&self, thread_id: &str) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().await;
        locks
            .entry(thread_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Drop the registry entry once no other turn holds or awaits it.
    async fn release_lock(&self, thread_id: &str, lock: Arc<Mutex<()>>) {
        let mut locks = self.locks.lock().await;
        if Arc::strong_count(&lock) <= 2 {
            locks.remove(thread_id);
        }
    }
}

fn terminal_line(stage: Stage, message: &str) -> &'static str {
    match stage {
        Stage::Ended if fallback::is_farewell(message) => ENDED_FAREWELL,
        Stage::Ended => ENDED_LINE,
        _ => ESCALATED_LINE,
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex as StdMutex;

    use async_trait::async_trait;
    use rust_decimal::Decimal;
    use serde_json::json;

    use super::*;
    use crate::booking::{AddressParser, ColombianAddressParser, Coordinates, PaymentMethod, Zone};
    use crate::dialogue::accountant::{UsageRecord, UsageSink};
    use crate::dialogue::dispatch::DISPATCH_CONFIRMED;
    use crate::dialogue::stages::test_support::{FakeBackend, Scripted, ScriptedLlm, calls, deps};
    use crate::dialogue::state::STATE_VERSION;
    use crate::error::Error;
    use crate::store::InMemoryCheckpointStore;

    #[derive(Default)]
    struct MemorySink {
        lines: StdMutex<Vec<String>>,
    }

    #[async_trait]
    impl UsageSink for MemorySink {
        async fn append(&self, record: &UsageRecord) -> std::io::Result<()> {
            self.lines.lock().unwrap().push(record.to_string());
            Ok(())
        }
    }

    struct Harness {
        engine: DialogueEngine,
        store: Arc<InMemoryCheckpointStore>,
        llm: Arc<ScriptedLlm>,
        backend: Arc<FakeBackend>,
        sink: Arc<MemorySink>,
    }

    fn harness(llm: ScriptedLlm, backend: FakeBackend) -> Harness {
        let llm = Arc::new(llm);
        let backend = Arc::new(backend);
        let store = Arc::new(InMemoryCheckpointStore::new());
        let sink = Arc::new(MemorySink::default());
        let engine = DialogueEngine::new(
            store.clone(),
            deps(llm.clone(), backend.clone()),
            DispatchController::new(backend.clone()),
            SessionAccountant::new(sink.clone(), (Decimal::ZERO, Decimal::ZERO)),
        );
        Harness {
            engine,
            store,
            llm,
            backend,
            sink,
        }
    }

    fn ready_for_closer(stage: Stage) -> ConversationThread {
        let mut thread = ConversationThread::new("t1", "u1", "300");
        thread.active_stage = Some(stage);
        thread.booking.customer_name = Some("Ana".into());
        thread.booking.address = Some(ColombianAddressParser::new().parse("Calle 72 # 43 - 25"));
        thread.booking.zone = Some(Zone::Barranquilla);
        thread.booking.payment_method = Some(PaymentMethod::Efectivo);
        thread.booking.coordinates = Some(Coordinates {
            lat: 10.99,
            lng: -74.80,
        });
        thread.lookups.geocode = true;
        thread
    }

    #[tokio::test]
    async fn first_message_creates_thread_and_asks_for_pickup() {
        let h = harness(ScriptedLlm::default(), FakeBackend::default());

        let result = h
            .engine
            .handle_turn(InboundTurn::new("u1", "Necesito un taxi"))
            .await
            .unwrap();

        assert!(Uuid::parse_str(&result.thread_id).is_ok());
        assert_eq!(result.response, "¡Con gusto! ¿Desde dónde necesitas el taxi?");
        assert!(!result.transfer_to_human);
        assert!(!result.conversation_ended);

        let stored = h.store.get(&result.thread_id).await.unwrap().unwrap();
        assert_eq!(stored.active_stage, Some(Stage::Locator));
        assert_eq!(stored.client_id, "u1");
        assert_eq!(stored.transcript.len(), 2);
    }

    #[tokio::test]
    async fn nothing_else_chains_into_closer_summary() {
        let h = harness(ScriptedLlm::default(), FakeBackend::default());
        let mut thread = ready_for_closer(Stage::Logistics);
        thread.push_assistant("¿Necesitas algo especial en el vehículo?");
        h.store.put(&thread).await.unwrap();

        let result = h
            .engine
            .handle_turn(InboundTurn::new("u1", "no, nada más").on_thread("t1"))
            .await
            .unwrap();

        assert!(result.response.starts_with("Este es el resumen de tu servicio:"));
        assert!(result.response.contains("- Vehículo: estándar"));
        let stored = h.store.get("t1").await.unwrap().unwrap();
        assert_eq!(stored.stage(), Stage::Closer);
        assert_eq!(stored.booking.descriptor.as_deref(), Some("amplio"));
    }

    #[tokio::test]
    async fn commit_registers_once_and_flushes_on_farewell() {
        let h = harness(
            ScriptedLlm::new(
                vec![
                    Scripted::Signal("commit_booking", json!({"confirmed_by_user": true})),
                    Scripted::Signal("commit_booking", json!({"confirmed_by_user": true})),
                ],
                vec![],
            ),
            FakeBackend::default(),
        );
        let mut thread = ready_for_closer(Stage::Closer);
        thread.push_assistant("Este es el resumen de tu servicio. ¿Es correcto?");
        h.store.put(&thread).await.unwrap();

        let first = h
            .engine
            .handle_turn(InboundTurn::new("u1", "sí, correcto").on_thread("t1"))
            .await
            .unwrap();
        assert_eq!(first.response, DISPATCH_CONFIRMED);
        assert!(first.conversation_ended);
        assert!(!first.transfer_to_human);

        let second = h
            .engine
            .handle_turn(InboundTurn::new("u1", "muchas gracias").on_thread("t1"))
            .await
            .unwrap();
        assert_eq!(second.response, ENDED_FAREWELL);
        let third = h
            .engine
            .handle_turn(InboundTurn::new("u1", "gracias, chao").on_thread("t1"))
            .await
            .unwrap();
        assert!(third.conversation_ended);

        assert_eq!(calls(&h.backend.register_calls), 1);
        assert_eq!(calls(&h.llm.calls), 1);
        assert_eq!(h.sink.lines.lock().unwrap().len(), 1);
        let stored = h.store.get("t1").await.unwrap().unwrap();
        assert_eq!(stored.booking.service_id.as_deref(), Some("S-1"));
        assert!(stored.usage.flushed);
    }

    #[tokio::test]
    async fn gate_escalation_is_reported_and_terminal() {
        let h = harness(ScriptedLlm::default(), FakeBackend::default());
        let mut thread = ready_for_closer(Stage::Closer);
        thread.booking.coordinates = None;
        h.store.put(&thread).await.unwrap();

        let result = h
            .engine
            .handle_turn(InboundTurn::new("u1", "sí").on_thread("t1"))
            .await
            .unwrap();
        assert!(result.transfer_to_human);
        assert!(result.conversation_ended);
        assert_eq!(
            result.transfer_reason.as_deref(),
            Some("Coordenadas no disponibles para la dirección")
        );

        let after = h
            .engine
            .handle_turn(InboundTurn::new("u1", "¿hola?").on_thread("t1"))
            .await
            .unwrap();
        assert_eq!(after.response, ESCALATED_LINE);
        assert!(after.transfer_to_human);
        assert_eq!(calls(&h.llm.calls), 0);
        assert_eq!(calls(&h.backend.register_calls), 0);
    }

    #[tokio::test]
    async fn geocoder_outage_continues_to_closer_gate() {
        let h = harness(
            ScriptedLlm::default(),
            FakeBackend {
                geocode_down: true,
                ..Default::default()
            },
        );
        let mut thread = ready_for_closer(Stage::Logistics);
        thread.booking.coordinates = None;
        thread.booking.payment_method = None;
        thread.lookups.geocode = false;
        thread.push_assistant("Perfecto. ¿Cómo vas a pagar el servicio?");
        h.store.put(&thread).await.unwrap();

        let result = h
            .engine
            .handle_turn(InboundTurn::new("u1", "en efectivo, nada más").on_thread("t1"))
            .await
            .unwrap();

        assert!(result.transfer_to_human);
        assert_eq!(
            result.transfer_reason.as_deref(),
            Some("Coordenadas no disponibles para la dirección")
        );
        assert_eq!(calls(&h.backend.geocode_calls), 1);
        assert_eq!(calls(&h.backend.register_calls), 0);
        // Logistics consulted the reasoner; Closer stopped at the gate.
        assert_eq!(calls(&h.llm.calls), 1);

        let stored = h.store.get("t1").await.unwrap().unwrap();
        assert!(stored.lookups.geocode);
        assert_eq!(stored.booking.descriptor.as_deref(), Some("amplio"));
        assert_eq!(stored.stage(), Stage::Escalated);
    }

    #[tokio::test]
    async fn newer_state_version_is_an_error() {
        let h = harness(ScriptedLlm::default(), FakeBackend::default());
        let mut thread = ConversationThread::new("t1", "u1", "300");
        thread.version = STATE_VERSION + 1;
        h.store.put(&thread).await.unwrap();

        let err = h
            .engine
            .handle_turn(InboundTurn::new("u1", "hola").on_thread("t1"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Dialogue(_)));
    }

    #[tokio::test]
    async fn concurrent_turns_on_one_thread_are_serialized() {
        let h = Arc::new(harness(ScriptedLlm::default(), FakeBackend::default()));
        h.store
            .put(&ConversationThread::new("t1", "u1", "300"))
            .await
            .unwrap();

        let mut handles = Vec::new();
        for i in 0..4 {
            let h = h.clone();
            handles.push(tokio::spawn(async move {
                h.engine
                    .handle_turn(InboundTurn::new("u1", format!("mensaje {i}")).on_thread("t1"))
                    .await
                    .unwrap()
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        let stored = h.store.get("t1").await.unwrap().unwrap();
        assert_eq!(stored.transcript.len(), 8);
        assert_eq!(calls(&h.backend.history_calls), 1);
        assert!(h.engine.locks.lock().await.is_empty());
    }

    #[test]
    fn inbound_accepts_upper_case_keys() {
        let inbound: InboundTurn = serde_json::from_value(json!({
            "MESSAGE": "hola",
            "USER_ID": "u1",
            "CLIENT_ID": "300",
            "THREAD_ID": "t9"
        }))
        .unwrap();
        assert_eq!(inbound.message, "hola");
        assert_eq!(inbound.client_id.as_deref(), Some("300"));
        assert_eq!(inbound.thread_id.as_deref(), Some("t9"));
    }
}
