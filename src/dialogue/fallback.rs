//! Keyword classifier used when the reasoner does not pick a signal.
//!
//! Pure functions over text. Matching is on whole words or phrases after
//! accent folding, so "sí", "Si" and "SI!" are the same word.

use crate::booking::fold_accents;

/// What the caller is asking for, by keywords alone.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallerIntent {
    TaxiRequest,
    QueryService,
    CancelService,
    HumanRequest,
    Other,
}

const CANCEL: &[&str] = &["cancelar", "cancela", "cancelen", "cancelo", "anular", "anula", "cancel"];

const HUMAN: &[&str] = &[
    "asesor",
    "asesora",
    "humano",
    "una persona",
    "operador",
    "operadora",
    "agente",
    "human",
    "operator",
];

const QUERY: &[&str] = &[
    "mi taxi",
    "mi servicio",
    "mi carro",
    "donde viene",
    "cuanto falta",
    "ya viene",
    "ya llego",
    "conductor",
    "placa",
    "estado",
    "where is my",
    "status",
];

const TAXI: &[&str] = &[
    "taxi",
    "servicio",
    "carro",
    "movil",
    "vehiculo",
    "camioneta",
    "recoger",
    "recojan",
    "necesito",
    "pedir",
    "cab",
    "ride",
];

const CONFIRMATIONS: &[&str] = &[
    "si",
    "sip",
    "ok",
    "okay",
    "vale",
    "dale",
    "listo",
    "claro",
    "correcto",
    "de acuerdo",
    "perfecto",
    "exacto",
    "bueno",
    "eso",
    "asi es",
    "si senor",
    "si senora",
    "yes",
    "yep",
    "sure",
];

const AFFIRMATIVE: &[&str] = &[
    "si",
    "correcto",
    "confirmo",
    "confirmado",
    "esta bien",
    "todo bien",
    "perfecto",
    "de acuerdo",
    "asi es",
    "exacto",
    "dale",
    "listo",
    "ok",
    "vale",
    "claro",
    "yes",
];

const NEGATIVE: &[&str] = &[
    "no",
    "incorrecto",
    "equivocado",
    "equivocada",
    "esta mal",
    "cambiar",
    "cambia",
    "corregir",
    "corrige",
    "wrong",
];

const FAREWELL: &[&str] = &[
    "gracias",
    "muchas gracias",
    "adios",
    "chao",
    "chau",
    "hasta luego",
    "nos vemos",
    "bye",
    "thanks",
    "goodbye",
];

const ADDRESS_CUES: &[&str] = &["donde", "direccion", "ubicacion", "lugar", "salir", "where", "address"];

const PAYMENT_CUES: &[&str] = &[
    "como prefieres pagar",
    "como vas a pagar",
    "metodo de pago",
    "forma de pago",
    "medio de pago",
    "efectivo nequi",
    "how will you pay",
];

const NOTHING_ELSE: &[&str] = &[
    "nada mas",
    "nada",
    "eso es todo",
    "es todo",
    "solo eso",
    "ninguna",
    "ninguno",
    "no necesito nada",
    "asi esta bien",
    "no gracias",
    "nothing else",
    "thats all",
];

const ADDRESS_WORDS: &[&str] = &[
    "direccion",
    "calle",
    "carrera",
    "diagonal",
    "transversal",
    "avenida",
    "barrio",
    "ubicacion",
    "recogida",
    "recoger",
];

const PAYMENT_WORDS: &[&str] = &[
    "pago",
    "pagar",
    "efectivo",
    "nequi",
    "daviplata",
    "datafono",
    "tarjeta",
    "vehiculo",
    "carro",
    "parrilla",
    "baul",
];

/// Folded text with punctuation turned to spaces, padded so that
/// `" word "` matches whole words at either end.
fn normalize(text: &str) -> String {
    let folded: String = fold_accents(text)
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { ' ' })
        .collect();
    let words: Vec<&str> = folded.split_whitespace().collect();
    format!(" {} ", words.join(" "))
}

fn mentions_any(normalized: &str, phrases: &[&str]) -> bool {
    phrases
        .iter()
        .any(|phrase| normalized.contains(&format!(" {phrase} ")))
}

pub fn classify_intent(text: &str) -> CallerIntent {
    let text = normalize(text);
    if mentions_any(&text, CANCEL) {
        CallerIntent::CancelService
    } else if mentions_any(&text, HUMAN) {
        CallerIntent::HumanRequest
    } else if mentions_any(&text, QUERY) {
        CallerIntent::QueryService
    } else if mentions_any(&text, TAXI) {
        CallerIntent::TaxiRequest
    } else {
        CallerIntent::Other
    }
}

/// A reply that only says "yes" and carries no content of its own.
pub fn is_bare_confirmation(text: &str) -> bool {
    let text = normalize(text);
    let trimmed = text.trim();
    !trimmed.is_empty() && CONFIRMATIONS.contains(&trimmed)
}

pub fn is_affirmative(text: &str) -> bool {
    let text = normalize(text);
    !is_negative_normalized(&text) && mentions_any(&text, AFFIRMATIVE)
}

pub fn is_negative(text: &str) -> bool {
    is_negative_normalized(&normalize(text))
}

fn is_negative_normalized(text: &str) -> bool {
    mentions_any(text, NEGATIVE)
}

pub fn is_farewell(text: &str) -> bool {
    mentions_any(&normalize(text), FAREWELL)
}

/// Whether an assistant line ends in (or contains) a question.
pub fn is_question(reply: &str) -> bool {
    reply.contains('?') || reply.contains('¿')
}

/// The assistant text asks where to pick the caller up.
pub fn asks_for_address(reply: &str) -> bool {
    is_question(reply) && mentions_any(&normalize(reply), ADDRESS_CUES)
}

/// The assistant text has moved on to payment.
pub fn asks_for_payment(reply: &str) -> bool {
    let text = normalize(reply);
    mentions_any(&text, PAYMENT_CUES)
        || (is_question(reply) && mentions_any(&text, &["pagar", "pago"]))
}

/// The caller says they need nothing more.
pub fn signals_nothing_else(text: &str) -> bool {
    mentions_any(&normalize(text), NOTHING_ELSE)
}

/// The caller talks about the pickup location.
pub fn mentions_address(text: &str) -> bool {
    mentions_any(&normalize(text), ADDRESS_WORDS)
}

/// The caller talks about payment or the vehicle.
pub fn mentions_payment(text: &str) -> bool {
    mentions_any(&normalize(text), PAYMENT_WORDS)
}
