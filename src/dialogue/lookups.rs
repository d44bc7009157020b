//! One-shot remote lookups guarded by the thread's [`LookupCacheFlags`].
//!
//! The flag is raised before the call is awaited, so a lookup that times out
//! or fails is never attempted again on this thread. Callers decide whether
//! `Unavailable` is fatal for their stage.

use std::future::Future;

use tracing::{info, warn};

use super::state::{ConversationThread, LookupCacheFlags};
use crate::backend::DispatchBackend;
use crate::booking::normalize_for_geocoding;
use crate::error::BackendError;

/// Which guarded lookup is being run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LookupKind {
    Customer,
    ServiceDetail,
    Geocode,
}

impl LookupKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Customer => "customer",
            Self::ServiceDetail => "service_detail",
            Self::Geocode => "geocode",
        }
    }

    fn flag<'a>(&self, flags: &'a mut LookupCacheFlags) -> &'a mut bool {
        match self {
            Self::Customer => &mut flags.customer,
            Self::ServiceDetail => &mut flags.service_detail,
            Self::Geocode => &mut flags.geocode,
        }
    }
}

/// Result of a guarded lookup.
#[derive(Debug)]
pub enum LookupOutcome<T> {
    /// Flag was already set; nothing was called.
    AlreadyAttempted,
    Found(T),
    /// The service answered but had no data.
    NotFound,
    /// Remote-down: timeout, transport failure or explicit unavailable flag.
    Unavailable(BackendError),
}

impl<T> LookupOutcome<T> {
    pub fn is_unavailable(&self) -> bool {
        matches!(self, Self::Unavailable(_))
    }
}

/// Run `call` unless `kind` was already attempted on this thread.
pub async fn guarded<T, Fut>(
    thread_id: &str,
    flags: &mut LookupCacheFlags,
    kind: LookupKind,
    call: Fut,
) -> LookupOutcome<T>
where
    Fut: Future<Output = Result<Option<T>, BackendError>>,
{
    let flag = kind.flag(flags);
    if *flag {
        return LookupOutcome::AlreadyAttempted;
    }
    *flag = true;

    match call.await {
        Ok(Some(value)) => {
            info!(thread_id, lookup = kind.as_str(), "Lookup found data");
            LookupOutcome::Found(value)
        }
        Ok(None) => {
            info!(thread_id, lookup = kind.as_str(), "Lookup found no data");
            LookupOutcome::NotFound
        }
        Err(e) => {
            warn!(
                thread_id,
                lookup = kind.as_str(),
                endpoint = e.endpoint(),
                "Lookup unavailable: {e}"
            );
            LookupOutcome::Unavailable(e)
        }
    }
}

/// Merged view of the caller from service history and profile.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CustomerSnapshot {
    pub name: Option<String>,
    pub address: Option<String>,
    pub has_previous_service: bool,
    pub active_service: Option<crate::backend::ActiveService>,
    pub multiple_active: bool,
}

/// History first; the profile is only consulted when history has no
/// address. History is the only source of active-service data, so its
/// failure fails the whole lookup. A profile failure after that is
/// tolerated.
pub async fn fetch_customer(
    backend: &dyn DispatchBackend,
    client_id: &str,
) -> Result<Option<CustomerSnapshot>, BackendError> {
    let history = backend.lookup_service_history(client_id).await?;
    let mut snapshot = CustomerSnapshot {
        name: None,
        address: history.last_address.clone(),
        has_previous_service: history.has_previous_service,
        active_service: history.active_service.clone(),
        multiple_active: history.multiple_active,
    };

    if snapshot.address.is_none() {
        match backend.lookup_customer(client_id).await {
            Ok(Some(record)) => {
                snapshot.name = record.name;
                snapshot.address = record.address;
            }
            Ok(None) => {}
            Err(e) => warn!(client_id, "Profile lookup failed, continuing without it: {e}"),
        }
    }

    if snapshot == CustomerSnapshot::default() {
        return Ok(None);
    }
    Ok(Some(snapshot))
}

/// Customer lookup, applied to the thread's profile.
pub async fn ensure_customer(
    thread: &mut ConversationThread,
    backend: &dyn DispatchBackend,
) -> LookupOutcome<()> {
    let client_id = thread.client_id.clone();
    let outcome = guarded(
        &thread.thread_id,
        &mut thread.lookups,
        LookupKind::Customer,
        fetch_customer(backend, &client_id),
    )
    .await;

    match outcome {
        LookupOutcome::Found(snapshot) => {
            let profile = &mut thread.customer;
            profile.name = snapshot.name;
            profile.stored_address = snapshot.address;
            profile.has_previous_service = snapshot.has_previous_service;
            profile.active_service = snapshot.active_service;
            profile.multiple_active = snapshot.multiple_active;
            if thread.booking.customer_name.is_none() {
                thread.booking.customer_name = profile.name.clone();
            }
            LookupOutcome::Found(())
        }
        LookupOutcome::AlreadyAttempted => LookupOutcome::AlreadyAttempted,
        LookupOutcome::NotFound => LookupOutcome::NotFound,
        LookupOutcome::Unavailable(e) => LookupOutcome::Unavailable(e),
    }
}

/// Detail of the caller's active service. A service the backend no longer
/// knows clears the active-service fields.
pub async fn ensure_service_detail(
    thread: &mut ConversationThread,
    backend: &dyn DispatchBackend,
) -> LookupOutcome<()> {
    let Some(service_id) = thread
        .customer
        .active_service
        .as_ref()
        .map(|s| s.service_id.clone())
    else {
        return LookupOutcome::NotFound;
    };
    let client_id = thread.client_id.clone();
    let outcome = guarded(
        &thread.thread_id,
        &mut thread.lookups,
        LookupKind::ServiceDetail,
        backend.lookup_service_detail(&service_id, &client_id),
    )
    .await;

    match outcome {
        LookupOutcome::Found(detail) => {
            thread.customer.service_detail = Some(detail);
            LookupOutcome::Found(())
        }
        LookupOutcome::NotFound => {
            thread.customer.active_service = None;
            thread.customer.service_detail = None;
            LookupOutcome::NotFound
        }
        LookupOutcome::AlreadyAttempted => LookupOutcome::AlreadyAttempted,
        LookupOutcome::Unavailable(e) => LookupOutcome::Unavailable(e),
    }
}

/// Geocode the captured pickup. Coordinates are stored as returned; the
/// commit gate decides whether they are usable.
pub async fn ensure_geocode(
    thread: &mut ConversationThread,
    backend: &dyn DispatchBackend,
) -> LookupOutcome<()> {
    let source = match &thread.booking.address {
        Some(address) if address.has_street() => address.compact(),
        _ => thread.booking.pickup_text.clone().unwrap_or_default(),
    };
    let normalized = normalize_for_geocoding(&source);
    if normalized.is_empty() {
        return LookupOutcome::NotFound;
    }

    let client_id = thread.client_id.clone();
    let outcome = guarded(
        &thread.thread_id,
        &mut thread.lookups,
        LookupKind::Geocode,
        backend.geocode(&client_id, &normalized),
    )
    .await;

    match outcome {
        LookupOutcome::Found(coordinates) => {
            thread.booking.coordinates = Some(coordinates);
            LookupOutcome::Found(())
        }
        LookupOutcome::AlreadyAttempted => LookupOutcome::AlreadyAttempted,
        LookupOutcome::NotFound => LookupOutcome::NotFound,
        LookupOutcome::Unavailable(e) => LookupOutcome::Unavailable(e),
    }
}
