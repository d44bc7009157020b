//! Booking domain: pickup addresses, coverage zones and the booking record
//! that stage controllers fill in turn by turn.

pub mod address;
pub mod record;
pub mod zone;

pub use address::{
    AddressParser, ColombianAddressParser, StreetType, StructuredAddress, normalize_for_geocoding,
};
pub use record::{BookingRecord, Coordinates, FeatureSet, PaymentMethod, VehicleFeature, descriptor};
pub use zone::{CityZoneValidator, Zone, ZoneValidator, ZoneVerdict};

use unicode_normalization::UnicodeNormalization;
use unicode_normalization::char::is_combining_mark;

/// Lower-case and strip diacritics so keyword matching is insensitive to
/// how callers (or speech-to-text) spell things.
pub fn fold_accents(text: &str) -> String {
    text.nfd()
        .filter(|c| !is_combining_mark(*c))
        .flat_map(char::to_lowercase)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fold_accents_lowercases_and_strips() {
        assert_eq!(fold_accents("Baúl GRANDE"), "baul grande");
        assert_eq!(fold_accents("Medellín"), "medellin");
        assert_eq!(fold_accents("Atlántico"), "atlantico");
        assert_eq!(fold_accents("Ñapanga Güepsa"), "napanga guepsa");
        // Precomposed and decomposed spellings fold the same way.
        assert_eq!(fold_accents("Bogota\u{301}"), fold_accents("Bogotá"));
    }
}
