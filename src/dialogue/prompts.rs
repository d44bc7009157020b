//! Stage instructions and extraction prompts.
//!
//! Instructions are in Spanish because callers are. The context section is
//! rebuilt every turn from the thread so the reasoner sees what is already
//! known instead of asking for it again.

use super::state::{ConversationThread, Stage};

/// Build the system prompt for a stage.
pub fn stage_instructions(stage: Stage, assistant_name: &str) -> String {
    let base = format!(
        "\
Eres {assistant_name}, asistente de una empresa de taxis en Barranquilla, Colombia.
Reglas:
- Responde en español, con frases cortas y amables. Una pregunta a la vez.
- Nunca saludes primero: el cliente ya inició la conversación.
- Nunca menciones etapas, herramientas ni transferencias internas.
- Cuando el cliente te dé una dirección, repítela para que la confirme.
- Nunca canceles un servicio sin una confirmación explícita del cliente.
- Usa las herramientas disponibles solo cuando se cumpla su condición."
    );

    let stage_rules = match stage {
        Stage::Intake => {
            "\

TAREA ACTUAL: entender qué necesita el cliente.
- Si quiere un taxi, usa advance_to_locator.
- Si pregunta por su servicio actual, usa query_active_service.
- Si quiere cancelar su servicio actual, usa cancel_active_service.
- Si pide hablar con una persona, usa escalate_to_human."
        }
        Stage::Locator => {
            "\

TAREA ACTUAL: obtener y confirmar la dirección de recogida y el nombre del cliente.
- Pide calle o carrera, número y barrio si faltan.
- Repite la dirección completa y pide confirmación.
- Cuando el cliente confirme la dirección, usa advance_to_logistics."
        }
        Stage::Logistics => {
            "\

TAREA ACTUAL: obtener el método de pago y las necesidades del vehículo.
- Métodos de pago: efectivo, Nequi, Daviplata o datáfono.
- Características: parrilla, carga, baúl grande, corporativo, camioneta chery, \
camioneta turbo doble cabina, estaca, zapatico, portabicicleta, amplio.
- Pregunta si necesita algo más para el vehículo.
- Cuando el cliente diga que no necesita nada más, usa advance_to_closer."
        }
        Stage::Closer => {
            "\

TAREA ACTUAL: el cliente está revisando el resumen de su servicio.
- Si confirma, usa commit_booking con confirmed_by_user = true.
- Si la dirección está mal, usa revert_to_locator.
- Si el pago o el vehículo están mal, usa revert_to_logistics.
- Si pide una persona, usa escalate_to_human."
        }
        Stage::Ended | Stage::Escalated => "",
    };

    format!("{base}{stage_rules}")
}

/// What is already known about the caller and the booking.
pub fn context_section(thread: &ConversationThread) -> String {
    let mut lines = vec!["DATOS CONOCIDOS:".to_string()];
    let customer = &thread.customer;
    let booking = &thread.booking;

    if let Some(name) = booking.customer_name.as_ref().or(customer.name.as_ref()) {
        lines.push(format!("- Nombre del cliente: {name}"));
    }
    if let Some(address) = &customer.stored_address {
        lines.push(format!("- Última dirección registrada: {address}"));
    }
    match &customer.active_service {
        Some(service) => lines.push(format!("- Servicio activo: {}", service.service_id)),
        None => lines.push("- Sin servicio activo".to_string()),
    }
    if let Some(text) = &booking.pickup_text {
        lines.push(format!("- Dirección de recogida: {text}"));
    }
    if let Some(zone) = booking.zone {
        lines.push(format!("- Zona: {zone}"));
    }
    if let Some(method) = booking.payment_method {
        lines.push(format!("- Pago: {}", method.as_str().to_lowercase()));
    }
    if !booking.features.is_empty() {
        let features: Vec<&str> = booking.features.iter().map(|f| f.as_str()).collect();
        lines.push(format!("- Vehículo: {}", features.join(", ")));
    }

    lines.join("\n")
}

/// Extraction prompt for the confirmed pickup address and the caller's name.
pub fn customer_details_prompt(transcript: &str) -> String {
    format!(
        "Dada esta conversación entre un cliente y una asistente de taxis:\n\n\
         {transcript}\n\n\
         Extrae lo siguiente. Usa null si no se mencionó.\n\
         {{\n  \
           \"customer_name\": \"nombre del cliente o null\",\n  \
           \"confirmed_address\": \"dirección de recogida exacta que el cliente confirmó, o null\"\n\
         }}\n\n\
         Responde SOLO con JSON válido, sin explicación ni formato markdown."
    )
}

/// Extraction prompt for payment method, vehicle features and a driver note.
pub fn vehicle_details_prompt(transcript: &str) -> String {
    format!(
        "Dada esta conversación entre un cliente y una asistente de taxis:\n\n\
         {transcript}\n\n\
         Extrae lo siguiente. Usa null o [] si no se mencionó.\n\
         {{\n  \
           \"payment_method\": \"EFECTIVO\" | \"NEQUI\" | \"DAVIPLATA\" | \"DATAFONO\" | null,\n  \
           \"features\": [\"características pedidas, con los nombres exactos del catálogo\"],\n  \
           \"note\": \"indicaciones para el conductor, o null\"\n\
         }}\n\
         Catálogo: parrilla, carga, baul grande, corporativo, camioneta chery, \
         camioneta turbo doble cabina, estaca, zapatico, portabicicleta, amplio.\n\n\
         Responde SOLO con JSON válido, sin explicación ni formato markdown."
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::ActiveService;
    use crate::booking::PaymentMethod;

    #[test]
    fn instructions_name_the_stage_signals() {
        let intake = stage_instructions(Stage::Intake, "Alice");
        assert!(intake.contains("Eres Alice"));
        assert!(intake.contains("advance_to_locator"));
        assert!(intake.contains("cancel_active_service"));

        let closer = stage_instructions(Stage::Closer, "Alice");
        assert!(closer.contains("commit_booking"));
        assert!(!closer.contains("advance_to_locator"));
    }

    #[test]
    fn context_lists_known_data() {
        let mut thread = ConversationThread::new("t1", "u1", "c1");
        thread.customer.name = Some("Ana".into());
        thread.customer.active_service = Some(ActiveService {
            service_id: "S-9".into(),
            pickup_address: None,
        });
        thread.booking.payment_method = Some(PaymentMethod::Nequi);
        let context = context_section(&thread);
        assert!(context.contains("Nombre del cliente: Ana"));
        assert!(context.contains("Servicio activo: S-9"));
        assert!(context.contains("Pago: nequi"));
    }

    #[test]
    fn extraction_prompts_embed_transcript() {
        let prompt = customer_details_prompt("Cliente: Calle 72 # 43 - 25");
        assert!(prompt.contains("confirmed_address"));
        assert!(prompt.contains("Calle 72 # 43 - 25"));

        let prompt = vehicle_details_prompt("Cliente: con parrilla");
        assert!(prompt.contains("payment_method"));
        assert!(prompt.contains("baul grande"));
    }
}
