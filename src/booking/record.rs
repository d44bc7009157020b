//! The booking record and its value types.

use serde::{Deserialize, Serialize};

use super::address::StructuredAddress;
use super::fold_accents;
use super::zone::Zone;

/// How the passenger pays the driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentMethod {
    /// Cash. The service default, never spelled out in the descriptor.
    #[default]
    Efectivo,
    Nequi,
    Daviplata,
    Datafono,
}

impl PaymentMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Efectivo => "EFECTIVO",
            Self::Nequi => "NEQUI",
            Self::Daviplata => "DAVIPLATA",
            Self::Datafono => "DATAFONO",
        }
    }

    /// Lenient parse from caller or extraction text ("en efectivo", "nequi").
    pub fn parse(text: &str) -> Option<Self> {
        let text = fold_accents(text);
        if text.contains("nequi") {
            Some(Self::Nequi)
        } else if text.contains("daviplata") {
            Some(Self::Daviplata)
        } else if text.contains("datafono") || text.contains("tarjeta") || text.contains("card")
        {
            Some(Self::Datafono)
        } else if text.contains("efectivo") || text.contains("cash") {
            Some(Self::Efectivo)
        } else {
            None
        }
    }
}

/// Vehicle characteristics the dispatcher can match on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum VehicleFeature {
    #[serde(rename = "parrilla")]
    Parrilla,
    #[serde(rename = "carga")]
    Carga,
    #[serde(rename = "baul grande")]
    BaulGrande,
    #[serde(rename = "corporativo")]
    Corporativo,
    #[serde(rename = "camioneta chery")]
    CamionetaChery,
    #[serde(rename = "camioneta turbo doble cabina")]
    CamionetaTurbo,
    #[serde(rename = "estaca")]
    Estaca,
    #[serde(rename = "zapatico")]
    Zapatico,
    #[serde(rename = "portabicicleta")]
    Portabicicleta,
    #[serde(rename = "amplio")]
    Amplio,
}

impl VehicleFeature {
    pub const ALL: [VehicleFeature; 10] = [
        Self::Parrilla,
        Self::Carga,
        Self::BaulGrande,
        Self::Corporativo,
        Self::CamionetaChery,
        Self::CamionetaTurbo,
        Self::Estaca,
        Self::Zapatico,
        Self::Portabicicleta,
        Self::Amplio,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Parrilla => "parrilla",
            Self::Carga => "carga",
            Self::BaulGrande => "baul grande",
            Self::Corporativo => "corporativo",
            Self::CamionetaChery => "camioneta chery",
            Self::CamionetaTurbo => "camioneta turbo doble cabina",
            Self::Estaca => "estaca",
            Self::Zapatico => "zapatico",
            Self::Portabicicleta => "portabicicleta",
            Self::Amplio => "amplio",
        }
    }

    /// Exact catalogue name, accent- and case-insensitive.
    pub fn from_name(name: &str) -> Option<Self> {
        let name = fold_accents(name.trim());
        Self::ALL.into_iter().find(|f| f.as_str() == name)
    }

    /// Features requested in free text, including common synonyms. A mention
    /// right after "no" or "sin" ("sin parrilla", "no necesito carga") is a
    /// refusal and does not count.
    pub fn detect(text: &str) -> Vec<Self> {
        let text = fold_accents(text);
        FEATURE_KEYWORDS
            .iter()
            .filter(|(_, keywords)| keywords.iter().any(|k| requested(&text, k)))
            .map(|(feature, _)| *feature)
            .collect()
    }
}

const FEATURE_KEYWORDS: &[(VehicleFeature, &[&str])] = &[
    (VehicleFeature::Parrilla, &["parrilla"]),
    (VehicleFeature::Carga, &["carga", "mudanza", "trasteo"]),
    (
        VehicleFeature::BaulGrande,
        &["baul grande", "maletas", "equipaje", "maletero grande"],
    ),
    (VehicleFeature::Corporativo, &["corporativo"]),
    (VehicleFeature::CamionetaChery, &["chery"]),
    (VehicleFeature::CamionetaTurbo, &["turbo", "doble cabina"]),
    (VehicleFeature::Estaca, &["estaca"]),
    (VehicleFeature::Zapatico, &["zapatico"]),
    (VehicleFeature::Portabicicleta, &["bicicleta"]),
    (VehicleFeature::Amplio, &["amplio", "espacioso"]),
];

/// Words that turn the following mention into a refusal.
const NEGATIONS: &[&str] = &["no", "sin", "ni"];

/// True if `keyword` occurs in `text` at least once without a negation in
/// the three words before it.
fn requested(text: &str, keyword: &str) -> bool {
    text.match_indices(keyword).any(|(at, _)| {
        !text[..at]
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
            .rev()
            .take(3)
            .any(|w| NEGATIONS.contains(&w))
    })
}

/// Insertion-ordered set of requested features. Only grows until a revert
/// from the summary clears it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FeatureSet(Vec<VehicleFeature>);

impl FeatureSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a feature; returns false if it was already present.
    pub fn insert(&mut self, feature: VehicleFeature) -> bool {
        if self.0.contains(&feature) {
            return false;
        }
        self.0.push(feature);
        true
    }

    pub fn extend<I: IntoIterator<Item = VehicleFeature>>(&mut self, features: I) {
        for feature in features {
            self.insert(feature);
        }
    }

    pub fn contains(&self, feature: VehicleFeature) -> bool {
        self.0.contains(&feature)
    }

    pub fn iter(&self) -> impl Iterator<Item = &VehicleFeature> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromIterator<VehicleFeature> for FeatureSet {
    fn from_iter<I: IntoIterator<Item = VehicleFeature>>(iter: I) -> Self {
        let mut set = Self::new();
        set.extend(iter);
        set
    }
}

/// Pickup coordinates from the geocoder.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinates {
    pub lat: f64,
    pub lng: f64,
}

impl Coordinates {
    /// Zero is what the geocoder returns when it has nothing, so a zero
    /// component counts as missing.
    pub fn is_usable(&self) -> bool {
        self.lat.is_finite() && self.lng.is_finite() && self.lat != 0.0 && self.lng != 0.0
    }
}

/// Everything needed to register a ride, filled in stage by stage.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BookingRecord {
    pub customer_id: String,
    pub customer_name: Option<String>,
    /// Pickup text as offered or confirmed in conversation, before parsing.
    pub pickup_text: Option<String>,
    pub address: Option<StructuredAddress>,
    pub zone: Option<Zone>,
    pub payment_method: Option<PaymentMethod>,
    pub features: FeatureSet,
    pub driver_note: Option<String>,
    pub coordinates: Option<Coordinates>,
    pub descriptor: Option<String>,
    /// Set once the registration service accepted the booking.
    pub service_id: Option<String>,
}

impl BookingRecord {
    pub fn new(customer_id: impl Into<String>) -> Self {
        Self {
            customer_id: customer_id.into(),
            ..Default::default()
        }
    }

    pub fn has_usable_coordinates(&self) -> bool {
        self.coordinates.is_some_and(|c| c.is_usable())
    }

    /// Address line for read-backs and registration.
    pub fn address_line(&self) -> String {
        match (&self.address, &self.pickup_text) {
            (Some(address), _) if !address.is_empty() => address.to_string(),
            (_, Some(text)) => text.clone(),
            _ => String::new(),
        }
    }

    /// Drop the pickup location so it can be captured again.
    pub fn clear_location(&mut self) {
        self.pickup_text = None;
        self.address = None;
        self.zone = None;
        self.coordinates = None;
    }

    /// Drop payment and vehicle details so they can be captured again.
    pub fn clear_payment(&mut self) {
        self.payment_method = None;
        self.features = FeatureSet::new();
        self.driver_note = None;
        self.descriptor = None;
    }
}

/// Combine payment method and features into the registration descriptor.
///
/// Cash is implied and omitted; with nothing else to say the descriptor is
/// `"amplio"`.
pub fn descriptor(payment: Option<PaymentMethod>, features: &FeatureSet) -> String {
    let mut parts: Vec<String> = Vec::new();
    if let Some(method) = payment.filter(|m| *m != PaymentMethod::Efectivo) {
        parts.push(method.as_str().to_lowercase());
    }
    parts.extend(features.iter().map(|f| f.as_str().to_string()));
    if parts.is_empty() {
        return VehicleFeature::Amplio.as_str().to_string();
    }
    parts.join(", ")
}
