//! Integration tests for the HTTP dispatch backend.
//!
//! A fake dispatch service runs on a random port; the real
//! `HttpDispatchBackend` talks to it over the loopback interface.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use axum::{Json, Router, extract::State, http::StatusCode, routing::post};
use serde_json::{Value, json};
use tokio::net::TcpListener;
use tokio::time::timeout;

use taxi_agent::backend::{DispatchBackend, HttpDispatchBackend, RegistrationRequest, RetryPolicy};
use taxi_agent::config::BackendConfig;
use taxi_agent::error::BackendError;

const TEST_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Clone, Default)]
struct FakeService {
    history_hits: Arc<AtomicUsize>,
    register_hits: Arc<AtomicUsize>,
}

async fn history(State(svc): State<FakeService>, Json(body): Json<Value>) -> (StatusCode, Json<Value>) {
    let hit = svc.history_hits.fetch_add(1, Ordering::SeqCst);
    match body["CLIENT_ID"].as_str() {
        // Fails once, then answers.
        Some("flaky") if hit == 0 => (StatusCode::SERVICE_UNAVAILABLE, Json(json!({}))),
        Some("down") => (StatusCode::INTERNAL_SERVER_ERROR, Json(json!({}))),
        Some("refused") => (StatusCode::OK, Json(json!({"RESPUESTA": "FALSE"}))),
        _ => (
            StatusCode::OK,
            Json(json!({
                "NOSERVICIOS": "FALSE",
                "MASDEUNO": "FALSE",
                "ID_SERVICIO": "981",
                "DIRECCION_CLIENTE": "Calle 72 # 43 - 25",
            })),
        ),
    }
}

async fn customer(Json(body): Json<Value>) -> (StatusCode, Json<Value>) {
    match body["CLIENT_ID"].as_str() {
        Some("unknown") => (StatusCode::NOT_FOUND, Json(json!({}))),
        _ => (
            StatusCode::OK,
            Json(json!({"NOMBRE_CLIENTE": "Ana", "DIRECCION_CLIENTE": "NULL"})),
        ),
    }
}

async fn geocode(Json(body): Json<Value>) -> Json<Value> {
    assert_eq!(body["UBICACION_NORMALIZADA"], "cl 72 43");
    Json(json!({"LATITUD": "10.9878", "LONGITUD": "-74.7889"}))
}

async fn register(State(svc): State<FakeService>, Json(body): Json<Value>) -> (StatusCode, Json<Value>) {
    svc.register_hits.fetch_add(1, Ordering::SeqCst);
    if body["TIPO_VEHICULO"].is_null() {
        return (StatusCode::BAD_REQUEST, Json(json!({})));
    }
    (StatusCode::CREATED, Json(json!({"ID_SERVICIO": 5501})))
}

async fn start_fake() -> (String, FakeService) {
    let svc = FakeService::default();
    let app = Router::new()
        .route("/api/consultar-servicio-clientId", post(history))
        .route("/api/consultar-cliente", post(customer))
        .route("/api/consulta-coordenadas", post(geocode))
        .route("/api/registrar-servicio", post(register))
        .with_state(svc.clone());

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    tokio::time::sleep(Duration::from_millis(50)).await;
    (format!("http://127.0.0.1:{port}"), svc)
}

fn backend(base_url: String) -> HttpDispatchBackend {
    let fast = RetryPolicy {
        base_delay: Duration::from_millis(10),
        ..RetryPolicy::informational()
    };
    HttpDispatchBackend::new(BackendConfig {
        base_url,
        lookup_policy: fast,
        cancel_policy: fast,
        ..BackendConfig::default()
    })
    .unwrap()
}

#[tokio::test]
async fn history_lookup_decodes_active_service() {
    timeout(TEST_TIMEOUT, async {
        let (base, _svc) = start_fake().await;
        let history = backend(base).lookup_service_history("300").await.unwrap();
        assert_eq!(history.last_address.as_deref(), Some("Calle 72 # 43 - 25"));
        assert_eq!(
            history.active_service.map(|s| s.service_id).as_deref(),
            Some("981")
        );
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn transient_failure_is_retried_once() {
    timeout(TEST_TIMEOUT, async {
        let (base, svc) = start_fake().await;
        let history = backend(base).lookup_service_history("flaky").await.unwrap();
        assert!(history.has_previous_service);
        assert_eq!(svc.history_hits.load(Ordering::SeqCst), 2);
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn exhausted_retries_and_refusals_are_remote_down() {
    timeout(TEST_TIMEOUT, async {
        let (base, svc) = start_fake().await;
        let backend = backend(base);

        let err = backend.lookup_service_history("down").await.unwrap_err();
        assert!(matches!(err, BackendError::Status { status: 500, .. }));
        assert_eq!(svc.history_hits.load(Ordering::SeqCst), 2);

        let err = backend.lookup_service_history("refused").await.unwrap_err();
        assert!(matches!(err, BackendError::Unavailable { .. }));
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn profile_not_found_is_none_and_null_address_is_absent() {
    timeout(TEST_TIMEOUT, async {
        let (base, _svc) = start_fake().await;
        let backend = backend(base);

        assert!(backend.lookup_customer("unknown").await.unwrap().is_none());
        let record = backend.lookup_customer("300").await.unwrap().unwrap();
        assert_eq!(record.name.as_deref(), Some("Ana"));
        assert!(record.address.is_none());
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn geocode_and_register() {
    timeout(TEST_TIMEOUT, async {
        let (base, svc) = start_fake().await;
        let backend = backend(base);

        let coords = backend.geocode("300", "cl 72 43").await.unwrap().unwrap();
        assert!(coords.is_usable());

        let receipt = backend
            .register_service(&RegistrationRequest {
                client_id: "300".into(),
                address: "Calle 72 # 43 - 25".into(),
                latitude: "10.9878".into(),
                longitude: "-74.7889".into(),
                zone: "BARRANQUILLA".into(),
                descriptor: "amplio".into(),
                note: String::new(),
                customer_name: "Ana".into(),
            })
            .await
            .unwrap();
        assert_eq!(receipt.service_id.as_deref(), Some("5501"));
        assert_eq!(svc.register_hits.load(Ordering::SeqCst), 1);
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn unreachable_backend_is_unavailable() {
    timeout(TEST_TIMEOUT, async {
        // Bind then drop to get a port nobody listens on.
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let err = backend(format!("http://127.0.0.1:{port}"))
            .lookup_service_history("300")
            .await
            .unwrap_err();
        assert!(err.is_transient());
    })
    .await
    .expect("test timed out");
}
