//! Service coverage zones.
//!
//! The dispatch service covers the Barranquilla metropolitan area. City
//! names arrive from callers and transcription with typos and missing
//! accents, so matching is fuzzy: exact match scores 1.0, containment 0.9,
//! otherwise a normalized Levenshtein ratio. Anything above 0.8 counts.

use serde::{Deserialize, Serialize};

use super::address::StructuredAddress;
use super::fold_accents;

const MATCH_THRESHOLD: f64 = 0.8;

/// A covered service zone, as named by the registration service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Zone {
    Barranquilla,
    Soledad,
    PuertoColombia,
    Galapa,
}

impl Zone {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Barranquilla => "BARRANQUILLA",
            Self::Soledad => "SOLEDAD",
            Self::PuertoColombia => "PUERTO_COLOMBIA",
            Self::Galapa => "GALAPA",
        }
    }
}

impl std::fmt::Display for Zone {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of validating a pickup city.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ZoneVerdict {
    Covered(Zone),
    /// A known city outside the coverage area.
    Rejected { city: String },
    /// No city given, or nothing close enough to a known name.
    Unrecognized,
}

/// Maps an address and city name onto a coverage zone.
pub trait ZoneValidator: Send + Sync {
    fn validate(&self, address: &StructuredAddress, city: &str) -> ZoneVerdict;
}

const COVERED: &[(Zone, &[&str])] = &[
    (
        Zone::Barranquilla,
        &["barranquilla", "atlantico", "b/quilla", "baq", "barranquila", "curramba"],
    ),
    (Zone::Soledad, &["soledad"]),
    (Zone::PuertoColombia, &["puerto colombia", "pto colombia"]),
    (Zone::Galapa, &["galapa"]),
];

const OUT_OF_COVERAGE: &[(&str, &[&str])] = &[
    ("CARTAGENA", &["cartagena", "ctg", "bolivar"]),
    ("SANTA_MARTA", &["santa marta"]),
    ("BOGOTA", &["bogota", "cundinamarca"]),
    ("MEDELLIN", &["medellin", "antioquia"]),
    ("CALI", &["cali", "valle del cauca"]),
    ("MONTERIA", &["monteria", "cordoba"]),
    ("SINCELEJO", &["sincelejo", "sucre"]),
    ("VALLEDUPAR", &["valledupar", "cesar"]),
];

/// City-keyword validator for the Barranquilla metropolitan area.
#[derive(Debug, Default, Clone, Copy)]
pub struct CityZoneValidator;

impl CityZoneValidator {
    pub fn new() -> Self {
        Self
    }
}

impl ZoneValidator for CityZoneValidator {
    fn validate(&self, address: &StructuredAddress, city: &str) -> ZoneVerdict {
        let city = if city.trim().is_empty() {
            address.city.as_deref().unwrap_or("")
        } else {
            city
        };
        let city = fold_accents(city.trim());
        if city.is_empty() {
            return ZoneVerdict::Unrecognized;
        }

        for (name, keywords) in OUT_OF_COVERAGE {
            if keywords.iter().any(|k| similarity(&city, k) > MATCH_THRESHOLD) {
                return ZoneVerdict::Rejected {
                    city: name.to_string(),
                };
            }
        }

        COVERED
            .iter()
            .map(|(zone, keywords)| {
                let best = keywords
                    .iter()
                    .map(|k| similarity(&city, k))
                    .fold(0.0_f64, f64::max);
                (*zone, best)
            })
            .filter(|(_, score)| *score > MATCH_THRESHOLD)
            .max_by(|a, b| a.1.total_cmp(&b.1))
            .map(|(zone, _)| ZoneVerdict::Covered(zone))
            .unwrap_or(ZoneVerdict::Unrecognized)
    }
}

/// Similarity in `[0, 1]` between two already-folded strings.
fn similarity(a: &str, b: &str) -> f64 {
    if a == b {
        return 1.0;
    }
    let shorter = a.chars().count().min(b.chars().count());
    if shorter >= 4 && (a.contains(b) || b.contains(a)) {
        return 0.9;
    }
    strsim::normalized_levenshtein(a, b)
}
