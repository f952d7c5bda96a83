//! Tolerant parsing of the analyst's output. Preferred shape is a JSON
//! object with the three known keys; models that wander off-format get a
//! labelled-section fallback before anything is discarded.

use regex::RegexBuilder;
use serde::Deserialize;

/// The analyst's three outputs. Any field may come back empty.
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
pub struct Analysis {
    #[serde(default)]
    pub perfil_update: String,
    #[serde(default)]
    pub contexto_prioritario: String,
    #[serde(default)]
    pub estrategia: String,
}

impl Analysis {
    pub fn is_empty(&self) -> bool {
        self.perfil_update.is_empty()
            && self.contexto_prioritario.is_empty()
            && self.estrategia.is_empty()
    }
}

const LABELS: &[&str] = &["perfil_update", "contexto_prioritario", "estrategia"];

/// Parse the analyst reply: strict JSON first (code fences stripped), then
/// labelled-section extraction. Never panics, never errors — worst case is an
/// empty `Analysis`.
pub fn parse_analysis(text: &str) -> Analysis {
    let body = strip_code_fence(text);

    if let Ok(parsed) = serde_json::from_str::<Analysis>(body.trim()) {
        return normalized(parsed);
    }

    // Models sometimes wrap valid JSON in prose; try the first {...} span.
    if let (Some(start), Some(end)) = (body.find('{'), body.rfind('}')) {
        if start < end {
            if let Ok(parsed) = serde_json::from_str::<Analysis>(&body[start..=end]) {
                return normalized(parsed);
            }
        }
    }

    extract_labelled_sections(&body)
}

fn normalized(mut a: Analysis) -> Analysis {
    a.perfil_update = a.perfil_update.trim().to_string();
    a.contexto_prioritario = a.contexto_prioritario.trim().to_string();
    a.estrategia = a.estrategia.trim().to_string();
    a
}

/// Return the inside of the first ``` fence when present, else the input.
fn strip_code_fence(text: &str) -> String {
    let Some(open) = text.find("```") else {
        return text.to_string();
    };
    let after_open = &text[open + 3..];
    // Skip an optional language tag on the fence line.
    let body_start = after_open.find('\n').map(|i| i + 1).unwrap_or(0);
    let body = &after_open[body_start..];
    match body.find("```") {
        Some(close) => body[..close].to_string(),
        None => body.to_string(),
    }
}

/// Fallback: locate `label:` markers and slice the text between them.
fn extract_labelled_sections(text: &str) -> Analysis {
    let pattern = format!(r"(?i)({})\s*[:=]", LABELS.join("|"));
    let re = RegexBuilder::new(&pattern)
        .case_insensitive(true)
        .build()
        .expect("static label pattern");

    let marks: Vec<(usize, usize, String)> = re
        .find_iter(text)
        .map(|m| {
            let label = text[m.start()..m.end()]
                .trim_end_matches([':', '='])
                .trim()
                .to_lowercase();
            (m.start(), m.end(), label)
        })
        .collect();

    let mut out = Analysis::default();
    for (i, (_, end, label)) in marks.iter().enumerate() {
        let section_end = marks.get(i + 1).map(|(s, _, _)| *s).unwrap_or(text.len());
        let value = clean_section(&text[*end..section_end]);
        match label.as_str() {
            "perfil_update" => out.perfil_update = value,
            "contexto_prioritario" => out.contexto_prioritario = value,
            "estrategia" => out.estrategia = value,
            _ => {}
        }
    }
    out
}

/// Strip the JSON-ish residue a half-structured answer leaves around a value.
fn clean_section(raw: &str) -> String {
    raw.trim()
        .trim_end_matches(['，', ','])
        .trim_matches(['"', '\'', '{', '}'])
        .trim()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strict_json_parses() {
        let a = parse_analysis(
            r#"{"estrategia":"preguntar por presupuesto","contexto_prioritario":"cliente evalúa","perfil_update":"prefiere tardes"}"#,
        );
        assert_eq!(a.estrategia, "preguntar por presupuesto");
        assert_eq!(a.contexto_prioritario, "cliente evalúa");
        assert_eq!(a.perfil_update, "prefiere tardes");
    }

    #[test]
    fn json_inside_fence_parses() {
        let a = parse_analysis(
            "```json\n{\"estrategia\": \"cerrar la venta\", \"contexto_prioritario\": \"\", \"perfil_update\": \"\"}\n```",
        );
        assert_eq!(a.estrategia, "cerrar la venta");
    }

    #[test]
    fn json_with_surrounding_prose_parses() {
        let a = parse_analysis(
            "Claro, aquí está el análisis:\n{\"estrategia\": \"sondear interés\", \"perfil_update\": \"viaja seguido\"}\nEspero que sirva.",
        );
        assert_eq!(a.estrategia, "sondear interés");
        assert_eq!(a.perfil_update, "viaja seguido");
    }

    #[test]
    fn missing_keys_default_to_empty() {
        let a = parse_analysis(r#"{"estrategia":"solo esto"}"#);
        assert_eq!(a.estrategia, "solo esto");
        assert!(a.perfil_update.is_empty());
    }

    #[test]
    fn labelled_sections_fallback() {
        let a = parse_analysis(
            "perfil_update: le gusta el cine\n\
             contexto_prioritario: negocia el precio\n\
             estrategia: ofrecer descuento y cerrar",
        );
        assert_eq!(a.perfil_update, "le gusta el cine");
        assert_eq!(a.contexto_prioritario, "negocia el precio");
        assert_eq!(a.estrategia, "ofrecer descuento y cerrar");
    }

    #[test]
    fn labelled_fallback_is_case_insensitive_and_multiline() {
        let a = parse_analysis(
            "ESTRATEGIA: paso uno\npaso dos\nPERFIL_UPDATE: dato nuevo",
        );
        assert_eq!(a.estrategia, "paso uno\npaso dos");
        assert_eq!(a.perfil_update, "dato nuevo");
    }

    #[test]
    fn garbage_yields_empty_analysis() {
        let a = parse_analysis("no hay nada estructurado aquí");
        assert!(a.is_empty());
    }
}
