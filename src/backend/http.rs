//! reqwest client for the dispatch company's REST backend.
//!
//! All endpoints are `POST` with a JSON body. The backend signals its own
//! failures with `"RESPUESTA": "FALSE"` in an otherwise successful response,
//! which is treated the same as a transport error.

use async_trait::async_trait;
use reqwest::StatusCode;
use serde_json::{Value, json};

use super::{
    ActiveService, CustomerRecord, DispatchBackend, RegistrationReceipt, RegistrationRequest,
    RetryPolicy, ServiceDetail, ServiceHistory,
};
use crate::booking::Coordinates;
use crate::config::BackendConfig;
use crate::error::BackendError;

const SERVICE_HISTORY: &str = "/api/consultar-servicio-clientId";
const CUSTOMER: &str = "/api/consultar-cliente";
const SERVICE_DETAIL: &str = "/api/consultar-servicio-detalle";
const CANCEL_SERVICE: &str = "/api/cancelar-servicio";
const GEOCODE: &str = "/api/consulta-coordenadas";
const REGISTER_SERVICE: &str = "/api/registrar-servicio";

/// HTTP implementation of [`DispatchBackend`].
///
/// Cloning is cheap and shares the underlying connection pool, so one
/// instance serves every conversation.
#[derive(Clone)]
pub struct HttpDispatchBackend {
    client: reqwest::Client,
    config: BackendConfig,
}

impl HttpDispatchBackend {
    pub fn new(config: BackendConfig) -> Result<Self, BackendError> {
        let client = reqwest::Client::builder()
            .pool_max_idle_per_host(config.pool_max_idle_per_host)
            .build()
            .map_err(|e| BackendError::Unavailable {
                endpoint: config.base_url.clone(),
                reason: format!("Failed to build HTTP client: {e}"),
            })?;
        Ok(Self { client, config })
    }

    pub fn base_url(&self) -> &str {
        &self.config.base_url
    }

    /// POST `body` to `path` under `policy`. `Ok(None)` on 404.
    async fn post(
        &self,
        path: &'static str,
        policy: &RetryPolicy,
        body: &Value,
    ) -> Result<Option<Value>, BackendError> {
        let url = format!("{}{}", self.config.base_url, path);
        let url = &url;
        let client = &self.client;

        policy
            .run(path, move || async move {
                let response = client.post(url).json(body).send().await.map_err(|e| {
                    BackendError::Unavailable {
                        endpoint: path.to_string(),
                        reason: e.to_string(),
                    }
                })?;

                let status = response.status();
                if status == StatusCode::NOT_FOUND {
                    return Ok(None);
                }
                if !status.is_success() {
                    return Err(BackendError::Status {
                        endpoint: path.to_string(),
                        status: status.as_u16(),
                    });
                }

                let text = response
                    .text()
                    .await
                    .map_err(|e| BackendError::Unavailable {
                        endpoint: path.to_string(),
                        reason: e.to_string(),
                    })?;
                let value = if text.trim().is_empty() {
                    Value::Null
                } else {
                    serde_json::from_str(&text).map_err(|e| BackendError::InvalidResponse {
                        endpoint: path.to_string(),
                        reason: e.to_string(),
                    })?
                };

                if reports_failure(&value) {
                    return Err(BackendError::Unavailable {
                        endpoint: path.to_string(),
                        reason: "backend reported RESPUESTA=FALSE".to_string(),
                    });
                }
                Ok(Some(value))
            })
            .await
    }
}

#[async_trait]
impl DispatchBackend for HttpDispatchBackend {
    async fn lookup_customer(
        &self,
        client_id: &str,
    ) -> Result<Option<CustomerRecord>, BackendError> {
        let body = json!({ "CLIENT_ID": client_id });
        let Some(value) = self.post(CUSTOMER, &self.config.lookup_policy, &body).await? else {
            return Ok(None);
        };
        let record = first_entry(&value);
        Ok(Some(CustomerRecord {
            name: text_field(record, &["NOMBRE_CLIENTE", "NOMBRE"]),
            address: text_field(record, &["DIRECCION_CLIENTE"]),
        }))
    }

    async fn lookup_service_history(
        &self,
        client_id: &str,
    ) -> Result<ServiceHistory, BackendError> {
        let body = json!({ "CLIENT_ID": client_id });
        let value = self
            .post(SERVICE_HISTORY, &self.config.lookup_policy, &body)
            .await?;
        Ok(value.map(|v| parse_history(&v)).unwrap_or_default())
    }

    async fn lookup_service_detail(
        &self,
        service_id: &str,
        client_id: &str,
    ) -> Result<Option<ServiceDetail>, BackendError> {
        let body = json!({ "ID_SERVICIO": service_id, "CLIENT_ID": client_id });
        let Some(value) = self
            .post(SERVICE_DETAIL, &self.config.lookup_policy, &body)
            .await?
        else {
            return Ok(None);
        };
        Ok(parse_detail(first_entry(&value)))
    }

    async fn cancel_service(&self, service_id: &str) -> Result<(), BackendError> {
        let body = json!({ "ID_SERVICIO": service_id });
        // A 404 means the service is already gone.
        self.post(CANCEL_SERVICE, &self.config.cancel_policy, &body)
            .await
            .map(|_| ())
    }

    async fn geocode(
        &self,
        client_id: &str,
        normalized_address: &str,
    ) -> Result<Option<Coordinates>, BackendError> {
        let body = json!({
            "CLIENT_ID": client_id,
            "UBICACION_NORMALIZADA": normalized_address,
        });
        let value = self.post(GEOCODE, &self.config.geocode_policy, &body).await?;
        Ok(value.as_ref().and_then(parse_coordinates))
    }

    async fn register_service(
        &self,
        request: &RegistrationRequest,
    ) -> Result<RegistrationReceipt, BackendError> {
        let body = serde_json::to_value(request).map_err(|e| BackendError::InvalidResponse {
            endpoint: REGISTER_SERVICE.to_string(),
            reason: format!("Failed to encode registration: {e}"),
        })?;
        let value = self
            .post(REGISTER_SERVICE, &self.config.registration_policy, &body)
            .await?
            .ok_or_else(|| BackendError::Status {
                endpoint: REGISTER_SERVICE.to_string(),
                status: StatusCode::NOT_FOUND.as_u16(),
            })?;
        Ok(RegistrationReceipt {
            service_id: text_field(first_entry(&value), &["ID_SERVICIO"]),
        })
    }
}

// ── Wire decoding ──────────────────────────────────────────────────

fn reports_failure(value: &Value) -> bool {
    match first_entry(value).get("RESPUESTA") {
        Some(Value::String(s)) => s.eq_ignore_ascii_case("false"),
        Some(Value::Bool(b)) => !b,
        _ => false,
    }
}

/// Some endpoints wrap a single record in a list.
fn first_entry(value: &Value) -> &Value {
    match value {
        Value::Array(items) => items.first().unwrap_or(value),
        other => other,
    }
}

/// First present, non-placeholder string among `keys`.
fn text_field(value: &Value, keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|key| {
        let text = match value.get(*key)? {
            Value::String(s) => s.trim().to_string(),
            Value::Number(n) => n.to_string(),
            _ => return None,
        };
        (!text.is_empty() && !text.eq_ignore_ascii_case("null")).then_some(text)
    })
}

fn number_field(value: &Value, keys: &[&str]) -> Option<f64> {
    keys.iter().find_map(|key| match value.get(*key)? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().replace(',', ".").parse().ok(),
        _ => None,
    })
}

fn flag(value: &Value, key: &str) -> bool {
    match value.get(key) {
        Some(Value::String(s)) => s.eq_ignore_ascii_case("true"),
        Some(Value::Bool(b)) => *b,
        _ => false,
    }
}

fn parse_history(value: &Value) -> ServiceHistory {
    if let Value::Array(items) = value {
        return ServiceHistory {
            has_previous_service: !items.is_empty(),
            last_address: items
                .first()
                .and_then(|item| text_field(item, &["DIRECCION_CLIENTE", "UBICACION_ACTUAL"])),
            active_service: None,
            multiple_active: false,
        };
    }

    let no_services = flag(value, "NOSERVICIOS");
    let address = text_field(value, &["DIRECCION_CLIENTE", "UBICACION_ACTUAL"]);
    let active_service = if no_services {
        None
    } else {
        text_field(value, &["ID_SERVICIO"]).map(|service_id| ActiveService {
            service_id,
            pickup_address: address.clone(),
        })
    };

    ServiceHistory {
        has_previous_service: address.is_some(),
        last_address: address,
        active_service,
        multiple_active: !no_services && flag(value, "MASDEUNO"),
    }
}

fn parse_detail(value: &Value) -> Option<ServiceDetail> {
    let status = text_field(value, &["ESTADO_SERVICIO"]).unwrap_or_default();
    if status.eq_ignore_ascii_case("SERVICIO_NO_EXISTE") {
        return None;
    }
    let driver_name = text_field(value, &["NOMBRE_DRIVER"])?;
    Some(ServiceDetail {
        driver_name,
        plate: text_field(value, &["PLACA_MOVIL"]),
        status,
    })
}

fn parse_coordinates(value: &Value) -> Option<Coordinates> {
    let value = first_entry(value);
    let listed = match value.get("LISTA_DIRECCIONES") {
        Some(Value::String(raw)) => serde_json::from_str::<Value>(raw).ok(),
        Some(list @ Value::Array(_)) => Some(list.clone()),
        _ => None,
    };
    let source = listed
        .as_ref()
        .and_then(|list| list.as_array())
        .and_then(|items| items.first())
        .unwrap_or(value);

    let lat = number_field(source, &["LATITUD", "latitud", "LAT", "lat"])?;
    let lng = number_field(source, &["LONGITUD", "longitud", "LNG", "lng", "LON", "lon"])?;
    Some(Coordinates { lat, lng })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn history_with_active_service() {
        let history = parse_history(&json!({
            "NOSERVICIOS": "FALSE",
            "MASDEUNO": "FALSE",
            "ID_SERVICIO": 981,
            "DIRECCION_CLIENTE": "Calle 72 # 43 - 25",
        }));
        assert!(history.has_previous_service);
        assert_eq!(
            history.active_service,
            Some(ActiveService {
                service_id: "981".into(),
                pickup_address: Some("Calle 72 # 43 - 25".into()),
            })
        );
        assert!(!history.multiple_active);
    }

    #[test]
    fn history_without_services_ignores_multiple_flag() {
        let history = parse_history(&json!({
            "NOSERVICIOS": "TRUE",
            "MASDEUNO": "TRUE",
            "UBICACION_ACTUAL": "NULL",
        }));
        assert_eq!(history, ServiceHistory::default());
    }

    #[test]
    fn history_list_uses_first_address() {
        let history = parse_history(&json!([
            { "DIRECCION_CLIENTE": "Carrera 54 # 70 - 10" },
            { "DIRECCION_CLIENTE": "Calle 1" },
        ]));
        assert!(history.has_previous_service);
        assert_eq!(history.last_address.as_deref(), Some("Carrera 54 # 70 - 10"));
    }

    #[test]
    fn detail_for_missing_service_is_none() {
        assert!(parse_detail(&json!({"NOMBRE_DRIVER": "NULL", "ESTADO_SERVICIO": "ASIGNADO"})).is_none());
        assert!(parse_detail(&json!({"ESTADO_SERVICIO": "SERVICIO_NO_EXISTE"})).is_none());
        let detail = parse_detail(&json!({
            "NOMBRE_DRIVER": "Carlos",
            "PLACA_MOVIL": "ABC123",
            "ESTADO_SERVICIO": "EN_RUTA",
        }))
        .unwrap();
        assert_eq!(detail.plate.as_deref(), Some("ABC123"));
    }

    #[test]
    fn coordinates_prefer_address_list() {
        let coords = parse_coordinates(&json!({
            "LATITUD": "0",
            "LONGITUD": "0",
            "LISTA_DIRECCIONES": "[{\"LATITUD\": \"10.98\", \"LONGITUD\": \"-74.81\"}]",
        }))
        .unwrap();
        assert!((coords.lat - 10.98).abs() < 1e-9);
        assert!((coords.lng + 74.81).abs() < 1e-9);
    }

    #[test]
    fn coordinates_accept_numbers_and_reject_null() {
        let coords = parse_coordinates(&json!({"lat": 10.9, "lng": -74.8})).unwrap();
        assert!(coords.is_usable());
        assert!(parse_coordinates(&json!({"LATITUD": "NULL", "LONGITUD": "-74.8"})).is_none());
    }

    #[test]
    fn failure_flag_detection() {
        assert!(reports_failure(&json!({"RESPUESTA": "FALSE"})));
        assert!(reports_failure(&json!([{"RESPUESTA": false}])));
        assert!(!reports_failure(&json!({"RESPUESTA": "TRUE"})));
        assert!(!reports_failure(&Value::Null));
    }
}
