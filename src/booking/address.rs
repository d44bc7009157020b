//! Colombian street addresses: structured model, parser, canonical
//! formatter and the geocoding normalizer.
//!
//! A Colombian urban address names a street ("Calle 43B"), the crossing
//! street ("# 25") and the plate distance from the corner ("- 30"):
//! `Calle 43 B # 25 - 30, El Prado, Barranquilla`.
//!
//! The canonical `Display` output re-parses to the same structure for any
//! address the parser produced.

use std::fmt;
use std::sync::LazyLock;

use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};

use super::fold_accents;

/// Street kind at the head of an address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StreetType {
    Calle,
    Carrera,
    Diagonal,
    Transversal,
    Avenida,
}

impl StreetType {
    /// Recognize a full name or common abbreviation (`cl`, `cra`, `kr`, `dg`, `tv`, `av`…).
    pub fn from_token(token: &str) -> Option<Self> {
        let token = fold_accents(token.trim_end_matches('.'));
        match token.as_str() {
            "calle" | "cll" | "cl" => Some(Self::Calle),
            "carrera" | "cra" | "kra" | "kr" | "cr" => Some(Self::Carrera),
            "diagonal" | "diag" | "dg" => Some(Self::Diagonal),
            "transversal" | "transv" | "tv" => Some(Self::Transversal),
            "avenida" | "ave" | "av" => Some(Self::Avenida),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Calle => "Calle",
            Self::Carrera => "Carrera",
            Self::Diagonal => "Diagonal",
            Self::Transversal => "Transversal",
            Self::Avenida => "Avenida",
        }
    }
}

impl fmt::Display for StreetType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Parsed pickup address.
///
/// `house_number` is only set when the crossing street was already given
/// before the `#` (e.g. "Carrera 50 B doce # 12 - 5"), in which case the
/// number after `#` is the house number rather than the crossing street.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StructuredAddress {
    pub street_type: Option<StreetType>,
    pub street_number: Option<String>,
    pub street_letter: Option<String>,
    pub street_suffix: Option<String>,
    pub cross_number: Option<String>,
    pub cross_letter: Option<String>,
    pub house_number: Option<String>,
    pub house_letter: Option<String>,
    pub plate: Option<String>,
    pub neighborhood: Option<String>,
    pub city: Option<String>,
    pub references: Option<String>,
}

impl StructuredAddress {
    /// Street plus a neighborhood or city: enough for a driver to find it.
    pub fn is_complete(&self) -> bool {
        self.has_street() && (self.neighborhood.is_some() || self.city.is_some())
    }

    pub fn has_street(&self) -> bool {
        self.street_type.is_some() && self.street_number.is_some()
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// Human-readable text, with a placeholder for an empty address.
    pub fn describe(&self) -> String {
        if self.is_empty() {
            "Dirección no especificada".to_string()
        } else {
            self.to_string()
        }
    }

    /// Street and crossing only, letters attached ("Calle 43B 25A"). This is
    /// the form the geocoder matches best.
    pub fn compact(&self) -> String {
        let mut parts = Vec::new();
        if let (Some(kind), Some(number)) = (self.street_type, &self.street_number) {
            parts.push(kind.as_str().to_string());
            parts.push(format!(
                "{number}{}",
                self.street_letter.as_deref().unwrap_or("")
            ));
        }
        if let Some(cross) = &self.cross_number {
            parts.push(format!(
                "{cross}{}",
                self.cross_letter.as_deref().unwrap_or("")
            ));
        }
        parts.join(" ")
    }

    /// Recover a missing crossing number from digits the caller put in the
    /// neighborhood field ("número 45 - 12").
    pub fn recover_cross_from_neighborhood(&mut self) -> bool {
        if self.cross_number.is_some() {
            return false;
        }
        let Some(neighborhood) = &self.neighborhood else {
            return false;
        };
        let Some(caps) = NEIGHBORHOOD_DIGITS.captures(neighborhood) else {
            return false;
        };
        self.cross_number = Some(caps[1].to_string());
        if self.plate.is_none() {
            self.plate = caps.get(2).map(|m| m.as_str().to_string());
        }
        true
    }
}

impl fmt::Display for StructuredAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut segments = Vec::new();

        if let (Some(kind), Some(number)) = (self.street_type, &self.street_number) {
            let mut street = format!("{kind} {number}");
            if let Some(letter) = &self.street_letter {
                street.push_str(&format!(" {letter}"));
            }
            let cross = self.cross_number.as_ref().map(|n| {
                format!("{n}{}", self.cross_letter.as_deref().unwrap_or(""))
            });
            match (&self.house_number, cross) {
                (Some(house), cross) => {
                    if let Some(cross) = cross {
                        street.push_str(&format!(" {cross}"));
                    }
                    if let Some(suffix) = &self.street_suffix {
                        street.push_str(&format!(" {suffix}"));
                    }
                    street.push_str(&format!(
                        " # {house}{}",
                        self.house_letter.as_deref().unwrap_or("")
                    ));
                    if let Some(plate) = &self.plate {
                        street.push_str(&format!(" - {plate}"));
                    }
                }
                (None, Some(cross)) => {
                    if let Some(suffix) = &self.street_suffix {
                        street.push_str(&format!(" {suffix}"));
                    }
                    street.push_str(&format!(" # {cross}"));
                    if let Some(plate) = &self.plate {
                        street.push_str(&format!(" - {plate}"));
                    }
                }
                (None, None) => {
                    if let Some(suffix) = &self.street_suffix {
                        street.push_str(&format!(" {suffix}"));
                    }
                }
            }
            segments.push(street);
        }

        if let Some(neighborhood) = &self.neighborhood {
            segments.push(neighborhood.clone());
        }
        if let Some(city) = &self.city {
            segments.push(city.clone());
        }

        let mut text = segments.join(", ");
        if let Some(references) = &self.references {
            if !text.is_empty() {
                text.push(' ');
            }
            text.push_str(&format!("({references})"));
        }
        f.write_str(&text)
    }
}

/// Turns free text into a [`StructuredAddress`]. Pure and deterministic.
pub trait AddressParser: Send + Sync {
    fn parse(&self, text: &str) -> StructuredAddress;
}

static PARENTHESES: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\(([^)]*)\)").unwrap());

static CROSS_WORDS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(?:n[uú]mero|num|nro|no\.?|n°|con)\s*(\d)").unwrap()
});

static WHITESPACE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").unwrap());

static STREET_HEAD: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\b(calle|cll|cl|carrera|cra|kra|kr|cr|diagonal|diag|dg|transversal|transv|tv|avenida|ave|av)\.?\s*(\d+)",
    )
    .unwrap()
});

static CITY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\b(barranquilla|soledad|puerto colombia|galapa)\b").unwrap());

/// A street letter, optionally with a one-digit suffix attached ("B", "B1").
static LONE_LETTER: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^([A-Z])(\d)?$").unwrap());

/// A number, optionally with a letter attached ("45", "45B", "42B1").
static VIA_NUMBER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(\d+)([A-Z]\d?)?$").unwrap());

static AFTER_HASH: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^(\d+)\s*(?:([A-Z])(\d?)\b)?\s*(?:-\s*(\d+))?").unwrap()
});

static NEIGHBORHOOD_DIGITS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(?:n[uú]mero)?\s*(\d+)(?:\s*-\s*(\d+))?").unwrap()
});

const SUFFIX_WORDS: [&str; 5] = ["BIS", "SUR", "NORTE", "ESTE", "OESTE"];

/// Parser for addresses in the Barranquilla metropolitan area.
#[derive(Debug, Default, Clone, Copy)]
pub struct ColombianAddressParser;

impl ColombianAddressParser {
    pub fn new() -> Self {
        Self
    }

    /// Read the street from a segment with a street head. Returns the text
    /// around it that is not part of the street, in order.
    fn parse_street(&self, segment: &str, address: &mut StructuredAddress) -> Option<Vec<String>> {
        let caps = STREET_HEAD.captures(segment)?;
        let kind = StreetType::from_token(&caps[1])?;
        let head = caps.get(0)?;
        address.street_type = Some(kind);
        address.street_number = Some(caps[2].to_string());

        let mut leftovers = vec![segment[..head.start()].to_string()];
        let tail = &segment[head.end()..];
        let (via, after_hash) = match tail.split_once('#') {
            Some((via, rest)) => (via, Some(rest.trim_start_matches(['#', ' ']))),
            None => (tail, None),
        };

        leftovers.push(parse_via_tail(via, address));
        let cross_in_via = address.cross_number.is_some();

        if let Some(rest) = after_hash {
            let consumed = match AFTER_HASH.captures(rest) {
                Some(caps) => {
                    let number = caps[1].to_string();
                    let letter = caps.get(2).map(|m| {
                        format!(
                            "{}{}",
                            m.as_str().to_uppercase(),
                            caps.get(3).map_or("", |d| d.as_str())
                        )
                    });
                    if cross_in_via {
                        address.house_number = Some(number);
                        address.house_letter = letter;
                    } else {
                        address.cross_number = Some(number);
                        address.cross_letter = letter;
                    }
                    address.plate = caps.get(4).map(|m| m.as_str().to_string());
                    caps.get(0).map_or(0, |m| m.end())
                }
                None => 0,
            };
            leftovers.push(rest[consumed..].to_string());
        }
        Some(leftovers)
    }
}

impl AddressParser for ColombianAddressParser {
    fn parse(&self, text: &str) -> StructuredAddress {
        let mut address = StructuredAddress::default();
        if text.trim().is_empty() {
            return address;
        }

        let mut references = Vec::new();
        let text = PARENTHESES.replace_all(text, |caps: &Captures| {
            let inner = caps[1].replace('(', " ");
            let inner = WHITESPACE.replace_all(inner.trim(), " ").into_owned();
            if !inner.is_empty() {
                references.push(inner);
            }
            " ".to_string()
        });
        let text = text.replace(['(', ')'], " ");

        // The street comes from the first segment that has one; everything
        // else that is not a city describes the neighborhood.
        let mut pieces = Vec::new();
        for segment in text.split(',') {
            let segment = normalize_piece(segment, &mut address);
            if !address.has_street() {
                if let Some(leftovers) = self.parse_street(&segment, &mut address) {
                    for leftover in leftovers {
                        pieces.push(normalize_piece(&leftover, &mut address));
                    }
                    continue;
                }
            }
            pieces.push(segment);
        }

        let neighborhood: Vec<String> = pieces
            .into_iter()
            .filter(|p| p.chars().any(char::is_alphabetic))
            .collect();
        if !neighborhood.is_empty() {
            address.neighborhood = Some(neighborhood.join(", "));
        }
        if !references.is_empty() {
            address.references = Some(references.join("; "));
        }
        address
    }
}

/// Take city names out of a piece of text (the first one becomes the
/// address city) and rewrite crossing words ("número 45" → "# 45"). The
/// result is a fixed point: normalizing it again changes nothing.
fn normalize_piece(text: &str, address: &mut StructuredAddress) -> String {
    let mut text = WHITESPACE.replace_all(text.trim(), " ").into_owned();
    loop {
        let Some(city) = CITY.captures(&text).map(|caps| canonical_city(&caps[1])) else {
            break;
        };
        if address.city.is_none() {
            address.city = Some(city);
        }
        let stripped = WHITESPACE
            .replace_all(CITY.replace_all(&text, " ").trim(), " ")
            .into_owned();
        text = stripped;
    }
    let text = CROSS_WORDS.replace_all(&text, " # $1");
    WHITESPACE.replace_all(text.trim(), " ").into_owned()
}

/// Interpret what follows the street number and precedes `#`: a letter, a
/// suffix, or the crossing street when the caller gave it without `#`.
/// Tokens are consumed while they fit that grammar; the rest is returned.
fn parse_via_tail(via: &str, address: &mut StructuredAddress) -> String {
    let tokens: Vec<&str> = via.split_whitespace().collect();
    let mut consumed = 0;
    let mut seen_number = false;
    let mut last_was_cross = false;

    while let Some(token) = tokens.get(consumed) {
        let upper = token.to_uppercase();
        let taken = if SUFFIX_WORDS.contains(&upper.as_str()) {
            last_was_cross = false;
            set_once(&mut address.street_suffix, upper)
        } else if let Some(caps) = VIA_NUMBER.captures(&upper) {
            seen_number = true;
            match (caps.get(2), caps[1].parse::<u32>()) {
                (Some(letter), _) => {
                    last_was_cross = false;
                    address.cross_number.is_none()
                        && set_once(&mut address.cross_number, caps[1].to_string())
                        && set_once(&mut address.cross_letter, letter.as_str().to_string())
                }
                (None, Ok(number)) => {
                    last_was_cross = number > 10;
                    assign_low_or_cross(number, address)
                }
                (None, Err(_)) => false,
            }
        } else if let Some(number) = word_to_number(token) {
            seen_number = true;
            last_was_cross = number > 10;
            assign_low_or_cross(number, address)
        } else if let Some(caps) = LONE_LETTER.captures(&upper) {
            let continues = tokens.get(consumed + 1).is_none_or(|next| continues_street(next));
            if !continues {
                false
            } else if last_was_cross {
                last_was_cross = false;
                set_once(&mut address.cross_letter, upper.clone())
            } else if !seen_number && address.street_letter.is_none() {
                match caps.get(2) {
                    Some(digit) => {
                        address.street_suffix.is_none()
                            && set_once(&mut address.street_letter, caps[1].to_string())
                            && set_once(&mut address.street_suffix, digit.as_str().to_string())
                    }
                    None => set_once(&mut address.street_letter, caps[1].to_string()),
                }
            } else {
                false
            }
        } else {
            false
        };

        if !taken {
            break;
        }
        consumed += 1;
    }
    tokens[consumed..].join(" ")
}

/// Whether a token can follow a street letter: a number, number word or
/// suffix. Anything else means the letter starts a word ("El Prado").
fn continues_street(token: &str) -> bool {
    let upper = token.to_uppercase();
    SUFFIX_WORDS.contains(&upper.as_str())
        || VIA_NUMBER.is_match(&upper)
        || word_to_number(token).is_some()
}

fn set_once(slot: &mut Option<String>, value: String) -> bool {
    if slot.is_some() {
        return false;
    }
    *slot = Some(value);
    true
}

/// Numbers up to ten after a street are suffixes ("43 B 1"); anything
/// larger is the crossing street ("50 B doce").
fn assign_low_or_cross(number: u32, address: &mut StructuredAddress) -> bool {
    if number <= 10 {
        set_once(&mut address.street_suffix, number.to_string())
    } else {
        set_once(&mut address.cross_number, number.to_string())
    }
}

fn word_to_number(text: &str) -> Option<u32> {
    let word = fold_accents(text.split_whitespace().next()?);
    let value = match word.as_str() {
        "uno" | "un" => 1,
        "dos" => 2,
        "tres" => 3,
        "cuatro" => 4,
        "cinco" => 5,
        "seis" => 6,
        "siete" => 7,
        "ocho" => 8,
        "nueve" => 9,
        "diez" => 10,
        "once" => 11,
        "doce" => 12,
        "trece" => 13,
        "catorce" => 14,
        "quince" => 15,
        "dieciseis" => 16,
        "diecisiete" => 17,
        "dieciocho" => 18,
        "diecinueve" => 19,
        "veinte" => 20,
        "treinta" => 30,
        "cuarenta" => 40,
        "cincuenta" => 50,
        "sesenta" => 60,
        "setenta" => 70,
        "ochenta" => 80,
        "noventa" => 90,
        _ => return None,
    };
    Some(value)
}

fn canonical_city(raw: &str) -> String {
    match fold_accents(raw).as_str() {
        "soledad" => "Soledad",
        "puerto colombia" => "Puerto Colombia",
        "galapa" => "Galapa",
        _ => "Barranquilla",
    }
    .to_string()
}

/// Rewrite an address into the terse form the geocoding service expects:
/// lower-case, no punctuation, abbreviated street type, and only the street
/// and crossing numbers ("Calle 43B # 25-30" → "cl 43b 25").
pub fn normalize_for_geocoding(text: &str) -> String {
    static PLATE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(\d+)\s*-\s*\d+").unwrap());
    static NUMBER_WORDS: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"\b(numero|num|nro|no)\b\.?").unwrap());

    let lowered = fold_accents(text).replace('#', " ").replace(',', " ");
    let lowered = NUMBER_WORDS.replace_all(&lowered, " ");
    let lowered = PLATE.replace_all(&lowered, "$1");

    let tokens: Vec<String> = lowered
        .split_whitespace()
        .map(|token| geocoding_abbreviation(token).unwrap_or(token).to_string())
        .collect();

    let Some(head) = tokens
        .iter()
        .position(|t| geocoding_abbreviation(t).is_some())
    else {
        return tokens.join(" ");
    };

    let kind = &tokens[head];
    let mut rest = tokens[head + 1..].iter().peekable();
    // "calle cl 72" → "cl 72"
    while rest.peek().is_some_and(|t| *t == kind) {
        rest.next();
    }

    let mut out = vec![kind.clone()];
    out.extend(rest.take(2).cloned());
    out.join(" ")
}

fn geocoding_abbreviation(token: &str) -> Option<&'static str> {
    let token = token.trim_end_matches('.');
    let mapped = match token {
        "carrera" | "kra" | "cra" | "cr" | "kr" => "cr",
        "calle" | "cll" | "cl" => "cl",
        "diagonal" | "diag" | "dg" | "DIAG" => "DIAG",
        "transversal" | "transv" | "tv" | "TV" => "TV",
        "avenida" | "ave" | "av" | "AV" => "AV",
        "circular" | "circ" | "CIRC" => "CIRC",
        "manzana" | "man" | "mz" | "MZ" => "MZ",
        "lote" | "lt" | "LT" => "LT",
        "kilometro" | "km" | "KM" => "KM",
        _ => return None,
    };
    Some(mapped)
}
