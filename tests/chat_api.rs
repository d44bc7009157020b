//! Integration tests for the chat REST surface.
//!
//! Conversation tests run the real Axum router on a random port, backed by
//! a scripted reasoner and an in-process dispatch backend. Validation tests
//! drive the router directly with `oneshot`.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::body::{Body, to_bytes};
use axum::http::{Request, StatusCode};
use rust_decimal::Decimal;
use serde_json::{Value, json};
use tokio::net::TcpListener;
use tokio::time::timeout;
use tower::ServiceExt;

use taxi_agent::api::api_routes;
use taxi_agent::backend::{
    CustomerRecord, DispatchBackend, RegistrationReceipt, RegistrationRequest, ServiceDetail,
    ServiceHistory,
};
use taxi_agent::booking::{CityZoneValidator, ColombianAddressParser, Coordinates};
use taxi_agent::config::AgentConfig;
use taxi_agent::dialogue::{
    DialogueEngine, DispatchController, FileUsageLog, SessionAccountant, StageDeps, TurnResult,
};
use taxi_agent::error::{BackendError, LlmError};
use taxi_agent::llm::{
    CompletionRequest, CompletionResponse, FinishReason, LlmProvider, Reasoning, ToolCall,
    ToolCompletionRequest, ToolCompletionResponse,
};
use taxi_agent::store::InMemoryCheckpointStore;

/// Maximum time any test is allowed to run before we consider it hung.
const TEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Stub reasoner: replays tool calls and extraction payloads in order.
#[derive(Default)]
struct StubLlm {
    signals: Mutex<VecDeque<(&'static str, Value)>>,
    extractions: Mutex<VecDeque<&'static str>>,
}

impl StubLlm {
    fn scripted(signals: Vec<(&'static str, Value)>, extractions: Vec<&'static str>) -> Self {
        Self {
            signals: Mutex::new(signals.into()),
            extractions: Mutex::new(extractions.into()),
        }
    }
}

#[async_trait]
impl LlmProvider for StubLlm {
    fn model_name(&self) -> &str {
        "stub"
    }
    fn cost_per_token(&self) -> (Decimal, Decimal) {
        (Decimal::ZERO, Decimal::ZERO)
    }
    async fn complete(&self, _request: CompletionRequest) -> Result<CompletionResponse, LlmError> {
        let content = self
            .extractions
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or("{}")
            .to_string();
        Ok(CompletionResponse {
            content,
            input_tokens: 40,
            output_tokens: 8,
            finish_reason: FinishReason::Stop,
            response_id: None,
        })
    }
    async fn complete_with_tools(
        &self,
        _request: ToolCompletionRequest,
    ) -> Result<ToolCompletionResponse, LlmError> {
        let tool_calls = self
            .signals
            .lock()
            .unwrap()
            .pop_front()
            .map(|(name, arguments)| {
                vec![ToolCall {
                    id: "call_1".to_string(),
                    name: name.to_string(),
                    arguments,
                }]
            })
            .unwrap_or_default();
        Ok(ToolCompletionResponse {
            content: None,
            tool_calls,
            input_tokens: 120,
            output_tokens: 15,
            finish_reason: FinishReason::ToolUse,
            response_id: None,
        })
    }
}

/// Dispatch backend that knows nobody and geocodes everything to one point.
#[derive(Default)]
struct CountingBackend {
    geocode_calls: AtomicUsize,
    register_calls: AtomicUsize,
    registered: Mutex<Vec<RegistrationRequest>>,
}

#[async_trait]
impl DispatchBackend for CountingBackend {
    async fn lookup_customer(
        &self,
        _client_id: &str,
    ) -> Result<Option<CustomerRecord>, BackendError> {
        Ok(None)
    }

    async fn lookup_service_history(
        &self,
        _client_id: &str,
    ) -> Result<ServiceHistory, BackendError> {
        Ok(ServiceHistory::default())
    }

    async fn lookup_service_detail(
        &self,
        _service_id: &str,
        _client_id: &str,
    ) -> Result<Option<ServiceDetail>, BackendError> {
        Ok(None)
    }

    async fn cancel_service(&self, _service_id: &str) -> Result<(), BackendError> {
        Ok(())
    }

    async fn geocode(
        &self,
        _client_id: &str,
        _normalized_address: &str,
    ) -> Result<Option<Coordinates>, BackendError> {
        self.geocode_calls.fetch_add(1, Ordering::SeqCst);
        Ok(Some(Coordinates {
            lat: 10.9878,
            lng: -74.7889,
        }))
    }

    async fn register_service(
        &self,
        request: &RegistrationRequest,
    ) -> Result<RegistrationReceipt, BackendError> {
        self.register_calls.fetch_add(1, Ordering::SeqCst);
        self.registered.lock().unwrap().push(request.clone());
        Ok(RegistrationReceipt {
            service_id: Some("5501".to_string()),
        })
    }
}

struct TestServer {
    base: String,
    backend: Arc<CountingBackend>,
    _usage_dir: tempfile::TempDir,
    usage_log: std::path::PathBuf,
}

/// Start an Axum server on a random port.
async fn start_server(llm: StubLlm) -> TestServer {
    let backend = Arc::new(CountingBackend::default());
    let usage_dir = tempfile::tempdir().unwrap();
    let usage_log = usage_dir.path().join("token_usage.txt");

    let deps = StageDeps {
        reasoning: Reasoning::new(Arc::new(llm)),
        backend: backend.clone(),
        parser: Arc::new(ColombianAddressParser::new()),
        zones: Arc::new(CityZoneValidator::new()),
        config: AgentConfig::default(),
    };
    let engine = Arc::new(DialogueEngine::new(
        Arc::new(InMemoryCheckpointStore::new()),
        deps,
        DispatchController::new(backend.clone()),
        SessionAccountant::new(
            Arc::new(FileUsageLog::new(usage_log.clone())),
            (Decimal::ZERO, Decimal::ZERO),
        ),
    ));
    let app = api_routes(engine);

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    tokio::time::sleep(Duration::from_millis(50)).await;

    TestServer {
        base: format!("http://127.0.0.1:{port}"),
        backend,
        _usage_dir: usage_dir,
        usage_log,
    }
}

async fn say(client: &reqwest::Client, server: &TestServer, body: Value) -> TurnResult {
    let response = client
        .post(format!("{}/api/v1/chat", server.base))
        .json(&body)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    response.json().await.unwrap()
}

#[tokio::test]
async fn full_booking_over_http() {
    timeout(TEST_TIMEOUT, async {
        let server = start_server(StubLlm::scripted(
            vec![
                ("advance_to_locator", json!({"summary": "pide taxi"})),
                ("advance_to_logistics", json!({"summary": "dirección confirmada"})),
                ("advance_to_closer", json!({"ready": true})),
                ("commit_booking", json!({"confirmed_by_user": true})),
            ],
            vec![
                r#"{"customer_name": "Ana", "confirmed_address": "Calle 72 # 43 - 25, El Prado"}"#,
                r#"{"payment_method": "NEQUI", "features": ["parrilla"], "note": null}"#,
            ],
        ))
        .await;
        let client = reqwest::Client::new();

        let first = say(
            &client,
            &server,
            json!({"USER_ID": "3001234567", "MESSAGE": "Necesito un taxi"}),
        )
        .await;
        assert_eq!(first.response, "¡Con gusto! ¿Desde dónde necesitas el taxi?");
        let thread_id = first.thread_id.clone();

        let second = say(
            &client,
            &server,
            json!({
                "thread_id": thread_id,
                "user_id": "3001234567",
                "message": "Calle 72 # 43 - 25, El Prado. Soy Ana"
            }),
        )
        .await;
        assert_eq!(second.response, "Perfecto. ¿Cómo vas a pagar el servicio?");

        let third = say(
            &client,
            &server,
            json!({"thread_id": thread_id, "user_id": "3001234567", "message": "Por Nequi, con parrilla. Nada más"}),
        )
        .await;
        assert!(third.response.contains("- Nombre: Ana"));
        assert!(third.response.contains("- Pago: nequi"));
        assert!(third.response.contains("- Vehículo: parrilla"));

        let fourth = say(
            &client,
            &server,
            json!({"thread_id": thread_id, "user_id": "3001234567", "message": "Sí, todo correcto"}),
        )
        .await;
        assert!(fourth.response.starts_with("¡Listo! Tu taxi está en camino."));
        assert!(fourth.conversation_ended);
        assert!(!fourth.transfer_to_human);

        say(
            &client,
            &server,
            json!({"thread_id": thread_id, "user_id": "3001234567", "message": "Muchas gracias"}),
        )
        .await;

        assert_eq!(server.backend.geocode_calls.load(Ordering::SeqCst), 1);
        assert_eq!(server.backend.register_calls.load(Ordering::SeqCst), 1);
        let registered = server.backend.registered.lock().unwrap()[0].clone();
        assert_eq!(registered.zone, "BARRANQUILLA");
        assert_eq!(registered.descriptor, "nequi, parrilla");
        assert_eq!(registered.customer_name, "Ana");

        let usage = std::fs::read_to_string(&server.usage_log).unwrap();
        assert_eq!(usage.lines().count(), 1);
        assert!(usage.starts_with("3001234567 | "));

        let thread: Value = client
            .get(format!("{}/api/v1/threads/{thread_id}", server.base))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(thread["stage"], "ended");
        assert_eq!(thread["booking"]["service_id"], "5501");
        assert_eq!(thread["usage"]["flushed"], true);
    })
    .await
    .expect("test timed out");
}

/// Router without a listener, for `oneshot` requests.
fn router_only() -> axum::Router {
    let backend = Arc::new(CountingBackend::default());
    let deps = StageDeps {
        reasoning: Reasoning::new(Arc::new(StubLlm::default())),
        backend: backend.clone(),
        parser: Arc::new(ColombianAddressParser::new()),
        zones: Arc::new(CityZoneValidator::new()),
        config: AgentConfig::default(),
    };
    api_routes(Arc::new(DialogueEngine::new(
        Arc::new(InMemoryCheckpointStore::new()),
        deps,
        DispatchController::new(backend),
        SessionAccountant::new(
            Arc::new(FileUsageLog::new(std::env::temp_dir().join("taxi-agent-unused.txt"))),
            (Decimal::ZERO, Decimal::ZERO),
        ),
    )))
}

#[tokio::test]
async fn empty_message_is_rejected() {
    let response = router_only()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/v1/chat")
                .header("content-type", "application/json")
                .body(Body::from(json!({"user_id": "300", "message": "   "}).to_string()))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);

    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let body: Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(body["error"], "message must not be empty");
}

#[tokio::test]
async fn unknown_thread_is_not_found() {
    let response = router_only()
        .oneshot(
            Request::builder()
                .uri("/api/v1/threads/does-not-exist")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn health_and_root_respond() {
    timeout(TEST_TIMEOUT, async {
        let server = start_server(StubLlm::default()).await;
        let client = reqwest::Client::new();

        let health: Value = client
            .get(format!("{}/health", server.base))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(health["status"], "ok");

        let root = client.get(format!("{}/", server.base)).send().await.unwrap();
        assert_eq!(root.status(), 200);
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn cancel_without_active_service_makes_no_remote_call() {
    timeout(TEST_TIMEOUT, async {
        let server = start_server(StubLlm::default()).await;
        let result = say(
            &reqwest::Client::new(),
            &server,
            json!({"user_id": "300", "message": "Quiero cancelar mi servicio"}),
        )
        .await;
        assert!(result.response.starts_with("No tienes ningún servicio activo para cancelar"));
        assert!(!result.conversation_ended);
    })
    .await
    .expect("test timed out");
}
