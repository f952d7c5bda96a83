//! Documented model windows — consulted for max_tokens clamping and the
//! context budget guard. Matched by model-name prefix, first entry wins.

pub struct ModelWindow {
    /// Model name prefix (e.g. "claude-", "gpt-4o").
    pub prefix: &'static str,
    /// Documented input context window, in tokens.
    pub context_window: u32,
    /// Documented maximum output tokens.
    pub max_output: u32,
}

/// Conservative fallback for unknown (usually local) models.
pub const DEFAULT_WINDOW: ModelWindow = ModelWindow {
    prefix: "",
    context_window: 8_192,
    max_output: 2_048,
};

pub const MODEL_WINDOWS: &[ModelWindow] = &[
    ModelWindow { prefix: "gpt-4o", context_window: 128_000, max_output: 16_384 },
    ModelWindow { prefix: "gpt-4-turbo", context_window: 128_000, max_output: 4_096 },
    ModelWindow { prefix: "gpt-4", context_window: 8_192, max_output: 4_096 },
    ModelWindow { prefix: "gpt-3.5", context_window: 16_385, max_output: 4_096 },
    ModelWindow { prefix: "o1", context_window: 200_000, max_output: 100_000 },
    ModelWindow { prefix: "claude-3-5", context_window: 200_000, max_output: 8_192 },
    ModelWindow { prefix: "claude-", context_window: 200_000, max_output: 4_096 },
    ModelWindow { prefix: "gemini-1.5-pro", context_window: 2_097_152, max_output: 8_192 },
    ModelWindow { prefix: "gemini-", context_window: 1_048_576, max_output: 8_192 },
    ModelWindow { prefix: "grok-", context_window: 131_072, max_output: 8_192 },
    ModelWindow { prefix: "llama3", context_window: 8_192, max_output: 4_096 },
    ModelWindow { prefix: "qwen", context_window: 32_768, max_output: 8_192 },
    ModelWindow { prefix: "mistral", context_window: 32_768, max_output: 8_192 },
];

/// Window for a model name; falls back to a conservative default.
pub fn lookup(model: &str) -> &'static ModelWindow {
    MODEL_WINDOWS
        .iter()
        .find(|w| model.starts_with(w.prefix))
        .unwrap_or(&DEFAULT_WINDOW)
}

/// Clamp a requested max_tokens into the model's output window, with a small
/// floor so a misconfigured zero never reaches the API.
pub fn clamp_max_tokens(model: &str, requested: u32) -> u32 {
    requested.clamp(16, lookup(model).max_output)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prefix_order_prefers_specific() {
        assert_eq!(lookup("gpt-4o-mini").max_output, 16_384);
        assert_eq!(lookup("gpt-4-0613").max_output, 4_096);
        assert_eq!(lookup("claude-3-5-sonnet-latest").max_output, 8_192);
        assert_eq!(lookup("claude-3-opus").max_output, 4_096);
    }

    #[test]
    fn unknown_model_uses_default() {
        let w = lookup("mi-modelo-local");
        assert_eq!(w.context_window, DEFAULT_WINDOW.context_window);
    }

    #[test]
    fn clamping_floors_and_caps() {
        assert_eq!(clamp_max_tokens("claude-3-opus", 99_999), 4_096);
        assert_eq!(clamp_max_tokens("claude-3-opus", 0), 16);
        assert_eq!(clamp_max_tokens("claude-3-opus", 1_000), 1_000);
    }
}
