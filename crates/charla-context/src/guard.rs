//! Post-filter for generated replies. A reply matching any banned phrase is
//! rejected and regenerated with a corrective system message; a second
//! rejection falls through to the emergency table.

/// Phrases that reveal the responder is software.
const SELF_REFERENCE: &[&str] = &[
    "como asistente",
    "soy un asistente virtual",
    "como modelo",
    "como ia",
    "como sistema",
    "no tengo información",
];

/// Prompt metadata leaking into the reply.
const METADATA_LEAK: &[&str] = &[
    "usuario:",
    "chat actual:",
    "información relevante sobre el usuario",
    "fragmentos relevantes",
];

/// Canned-deflection phrasing.
const GENERIC_DEFLECTION: &[&str] = &[
    "estoy aquí para ayudarte con cualquier pregunta",
    "en qué puedo asistirte hoy",
];

/// Returns the first banned phrase found in `reply`, or `None` when clean.
pub fn violates(reply: &str) -> Option<&'static str> {
    let lower = reply.to_lowercase();
    SELF_REFERENCE
        .iter()
        .chain(METADATA_LEAK)
        .chain(GENERIC_DEFLECTION)
        .find(|phrase| lower.contains(*phrase))
        .copied()
}

/// System turn injected for the single corrective retry.
pub fn corrective_system() -> &'static str {
    "CORRECCIÓN URGENTE: la respuesta anterior fue inaceptable porque sonó \
     robótica o reveló naturaleza artificial.\n\
     - JAMÁS uses prefijos como 'USUARIO:' o 'CHAT ACTUAL:' ni menciones \
     'información relevante', 'asistente', 'IA', 'modelo' o 'sistema'.\n\
     - Si no conoces algo de la persona, dilo de forma humana: 'no me has \
     contado sobre eso' o 'cuéntame más'.\n\
     - Responde de nuevo como la persona del perfil, con tono natural y \
     cercano, sin frases genéricas."
}

/// The consolidated behaviour rules prepended to every full preamble:
/// identity rules plus the anti-generic restrictions enumerating the banned
/// phrasing.
pub fn behaviour_rules() -> &'static str {
    "INSTRUCCIONES CLAVE (siempre obedecer):\n\
     - Cuando te pregunten quién eres, responde según el PERFIL y jamás como \
     'modelo' o 'IA'. Nunca digas 'soy un asistente virtual'.\n\
     - Usa el tono y estilo de la GUÍA DE CONVERSACIÓN si está presente.\n\
     \n\
     RESTRICCIONES ADICIONALES (cumplir siempre):\n\
     - PROHIBIDO responder con frases genéricas tipo 'Estoy aquí para \
     ayudarte con cualquier pregunta' o '¿En qué puedo asistirte hoy?'.\n\
     - JAMÁS uses términos que revelen naturaleza artificial: 'asistente', \
     'IA', 'modelo', 'sistema', 'base de datos', 'no tengo información'.\n\
     - JAMÁS copies etiquetas internas como 'USUARIO:' o 'CHAT ACTUAL:' ni \
     menciones 'fragmentos relevantes'.\n\
     - Evita frases robóticas repetidas; cada respuesta debe sentirse humana \
     y variada.\n\
     - Integra los detalles del perfil y del contexto de forma natural."
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clean_reply_passes() {
        assert!(violates("Me gusta el ejercicio y la música, ¿y a ti?").is_none());
    }

    #[test]
    fn assistant_self_reference_is_caught() {
        let reply = "Como asistente virtual, estoy aquí para ayudarte.";
        assert_eq!(violates(reply), Some("como asistente"));
    }

    #[test]
    fn matching_is_case_insensitive() {
        assert!(violates("COMO MODELO no puedo opinar").is_some());
    }

    #[test]
    fn metadata_prefix_is_caught() {
        assert!(violates("USUARIO: no aporta información previa").is_some());
        assert!(violates("CHAT ACTUAL: sin datos").is_some());
    }

    #[test]
    fn generic_deflection_is_caught() {
        assert!(violates("¡Hola! ¿En qué puedo asistirte hoy?").is_some());
    }
}
