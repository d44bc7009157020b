//! Remote customer/dispatch service.
//!
//! The trait is the seam between the dialogue engine and the dispatch
//! company's REST backend. `Ok(None)` means the service answered but had
//! no data; `Err(_)` always means the service is unavailable.

mod http;
mod retry;

pub use http::HttpDispatchBackend;
pub use retry::RetryPolicy;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::booking::Coordinates;
use crate::error::BackendError;

/// Customer profile from the customer registry.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CustomerRecord {
    pub name: Option<String>,
    pub address: Option<String>,
}

/// A ride currently in progress or assigned.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActiveService {
    pub service_id: String,
    pub pickup_address: Option<String>,
}

/// What the service-history endpoint knows about a customer.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ServiceHistory {
    pub has_previous_service: bool,
    /// Pickup address of the most recent ride.
    pub last_address: Option<String>,
    pub active_service: Option<ActiveService>,
    pub multiple_active: bool,
}

/// Driver and progress of an active ride.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceDetail {
    pub driver_name: String,
    pub plate: Option<String>,
    pub status: String,
}

impl ServiceDetail {
    /// Caller-facing phrase for the backend status code.
    pub fn status_phrase(&self) -> String {
        match self.status.to_uppercase().as_str() {
            "ASIGNADO" => "asignado y en camino".to_string(),
            "EN_RUTA" => "en camino a tu ubicación".to_string(),
            "LLEGADO" => "ha llegado a tu ubicación".to_string(),
            "EN_SERVICIO" => "en curso".to_string(),
            "COMPLETADO" => "completado".to_string(),
            "CANCELADO" => "cancelado".to_string(),
            other => other.to_lowercase().replace('_', " "),
        }
    }
}

/// Payload for registering a ride.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RegistrationRequest {
    #[serde(rename = "CLIENT_ID")]
    pub client_id: String,
    #[serde(rename = "DIRECCION_CLIENTE")]
    pub address: String,
    #[serde(rename = "LATITUD")]
    pub latitude: String,
    #[serde(rename = "LONGITUD")]
    pub longitude: String,
    #[serde(rename = "ZONA")]
    pub zone: String,
    #[serde(rename = "TIPO_VEHICULO")]
    pub descriptor: String,
    #[serde(rename = "OBSERVACION")]
    pub note: String,
    #[serde(rename = "NOMBRE_CLIENTE")]
    pub customer_name: String,
}

/// Acknowledgement from the registration service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegistrationReceipt {
    pub service_id: Option<String>,
}

/// Operations the dialogue engine needs from the dispatch backend.
#[async_trait]
pub trait DispatchBackend: Send + Sync {
    /// Customer profile. `Ok(None)` for unknown customers.
    async fn lookup_customer(&self, client_id: &str)
    -> Result<Option<CustomerRecord>, BackendError>;

    async fn lookup_service_history(&self, client_id: &str)
    -> Result<ServiceHistory, BackendError>;

    /// `Ok(None)` once the service no longer exists (completed or cancelled).
    async fn lookup_service_detail(
        &self,
        service_id: &str,
        client_id: &str,
    ) -> Result<Option<ServiceDetail>, BackendError>;

    async fn cancel_service(&self, service_id: &str) -> Result<(), BackendError>;

    /// Coordinates for a normalized address. `Ok(None)` when not found.
    async fn geocode(
        &self,
        client_id: &str,
        normalized_address: &str,
    ) -> Result<Option<Coordinates>, BackendError>;

    /// Not idempotent: implementations must not retry on their own.
    async fn register_service(
        &self,
        request: &RegistrationRequest,
    ) -> Result<RegistrationReceipt, BackendError>;
}
