use std::collections::HashMap;
use std::sync::Arc;

use serde::Serialize;
use tracing::info;

use charla_core::config::ProvidersConfig;

use crate::anthropic::AnthropicGenerator;
use crate::gemini::GeminiGenerator;
use crate::generator::Generator;
use crate::ollama::OllamaGenerator;
use crate::openai::OpenAiGenerator;

/// The provider slots this build knows how to construct.
const KNOWN_SLOTS: &[&str] = &["openai", "anthropic", "gemini", "xai", "ollama", "lmstudio"];

#[derive(Debug, Clone, Serialize)]
pub struct GeneratorInfo {
    pub name: String,
    pub provider: String,
    /// Whether credentials resolved and the adapter was constructed.
    pub available: bool,
}

/// Name → generator map, built once at startup from config. Model configs
/// reference generators by these names through their `provider` column.
pub struct Registry {
    generators: HashMap<String, Arc<dyn Generator>>,
}

impl Registry {
    pub fn from_config(providers: &ProvidersConfig) -> Self {
        let mut generators: HashMap<String, Arc<dyn Generator>> = HashMap::new();

        if let Some(cfg) = &providers.openai {
            generators.insert(
                "openai".into(),
                Arc::new(OpenAiGenerator::new(cfg.api_key.clone(), cfg.base_url.clone())),
            );
        }
        if let Some(cfg) = &providers.anthropic {
            generators.insert(
                "anthropic".into(),
                Arc::new(AnthropicGenerator::new(cfg.api_key.clone(), cfg.base_url.clone())),
            );
        }
        if let Some(cfg) = &providers.gemini {
            generators.insert(
                "gemini".into(),
                Arc::new(GeminiGenerator::new(cfg.api_key.clone(), cfg.base_url.clone())),
            );
        }
        if let Some(cfg) = &providers.xai {
            generators.insert(
                "xai".into(),
                Arc::new(OpenAiGenerator::with_endpoint(
                    "xai",
                    cfg.api_key.clone(),
                    cfg.base_url.clone(),
                    "/v1/chat/completions",
                )),
            );
        }
        if let Some(cfg) = &providers.ollama {
            generators.insert(
                "ollama".into(),
                Arc::new(OllamaGenerator::new(cfg.base_url.clone())),
            );
        }
        if let Some(cfg) = &providers.lmstudio {
            generators.insert(
                "lmstudio".into(),
                Arc::new(OpenAiGenerator::with_endpoint(
                    "lmstudio",
                    cfg.api_key.clone(),
                    cfg.base_url.clone(),
                    "/v1/chat/completions",
                )),
            );
        }
        for entry in &providers.openai_compat {
            generators.insert(
                entry.id.clone(),
                Arc::new(OpenAiGenerator::with_endpoint(
                    entry.id.clone(),
                    entry.api_key.clone(),
                    entry.base_url.clone(),
                    entry
                        .chat_path
                        .clone()
                        .unwrap_or_else(|| "/v1/chat/completions".to_string()),
                )),
            );
        }

        info!(count = generators.len(), "generator registry built");
        Self { generators }
    }

    /// Tests and bespoke wiring can register generators directly.
    pub fn with_generators(entries: Vec<(String, Arc<dyn Generator>)>) -> Self {
        Self {
            generators: entries.into_iter().collect(),
        }
    }

    pub fn by_name(&self, name: &str) -> Option<Arc<dyn Generator>> {
        self.generators.get(name).cloned()
    }

    /// Resolve a configured model slot to its generator and the wire-level
    /// model id (the slot's `config.model` override, else the slot name).
    pub fn resolve(
        &self,
        slot: &charla_store::types::ModelSlot,
    ) -> Option<(Arc<dyn Generator>, String)> {
        let generator = self.by_name(&slot.provider)?;
        let api_model = slot
            .config
            .as_ref()
            .and_then(|c| c.get("model"))
            .and_then(|m| m.as_str())
            .map(str::to_string)
            .unwrap_or_else(|| slot.name.clone());
        Some((generator, api_model))
    }

    /// Known slots plus any extra compat entries, with availability flags.
    pub fn list_available(&self) -> Vec<GeneratorInfo> {
        let mut out: Vec<GeneratorInfo> = KNOWN_SLOTS
            .iter()
            .map(|&name| GeneratorInfo {
                name: name.to_string(),
                provider: name.to_string(),
                available: self.generators.contains_key(name),
            })
            .collect();
        for name in self.generators.keys() {
            if !KNOWN_SLOTS.contains(&name.as_str()) {
                out.push(GeneratorInfo {
                    name: name.clone(),
                    provider: "openai-compat".to_string(),
                    available: true,
                });
            }
        }
        out
    }
}
