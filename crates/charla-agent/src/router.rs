use std::sync::Arc;

use tracing::debug;

use charla_store::types::{ModelSlot, RouteRule};
use charla_store::Store;

/// Pick the model for a turn. Pure: same rules + same turn index → same
/// answer, always.
///
/// Walks enabled rules in stable (insertion) order; the first rule with
/// `every_n_messages > 0` and `turn_index % every_n_messages == 0` selects its
/// model. When nothing matches, the first active model config wins.
pub fn choose(rules: &[RouteRule], models: &[ModelSlot], turn_index: u32) -> Option<String> {
    for rule in rules.iter().filter(|r| r.enabled) {
        if rule.every_n_messages > 0 && turn_index % rule.every_n_messages == 0 {
            if let Some(name) = &rule.model_name {
                return Some(name.clone());
            }
        }
    }
    models.iter().find(|m| m.active).map(|m| m.name.clone())
}

/// Store-backed router: loads the current rule set per turn so admin edits
/// take effect without a restart.
pub struct TurnRouter {
    store: Arc<Store>,
}

impl TurnRouter {
    pub fn new(store: Arc<Store>) -> Self {
        Self { store }
    }

    /// `turn_index` is the count of prior assistant turns in this chat.
    pub fn choose_for(
        &self,
        chat_id: &str,
        turn_index: u32,
    ) -> charla_store::Result<Option<String>> {
        let rules = self.store.route_rules()?;
        let models = self.store.model_slots()?;
        let chosen = choose(&rules, &models, turn_index);
        debug!(chat = %chat_id, turn_index, model = chosen.as_deref().unwrap_or("-"), "router decision");
        Ok(chosen)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rule(id: i64, every_n: u32, model: &str, enabled: bool) -> RouteRule {
        RouteRule {
            id,
            name: format!("rule-{id}"),
            every_n_messages: every_n,
            model_name: Some(model.to_string()),
            enabled,
        }
    }

    fn slot(id: i64, name: &str, active: bool) -> ModelSlot {
        ModelSlot {
            id,
            name: name.to_string(),
            provider: "lmstudio".to_string(),
            config: None,
            active,
        }
    }

    #[test]
    fn first_matching_rule_wins() {
        let rules = vec![rule(1, 3, "analista", true), rule(2, 3, "otro", true)];
        let models = vec![slot(1, "base", true)];
        assert_eq!(choose(&rules, &models, 6), Some("analista".to_string()));
    }

    #[test]
    fn non_matching_turn_falls_back_to_first_active_model() {
        let rules = vec![rule(1, 3, "analista", true)];
        let models = vec![slot(1, "apagado", false), slot(2, "base", true)];
        assert_eq!(choose(&rules, &models, 4), Some("base".to_string()));
    }

    #[test]
    fn disabled_rules_are_skipped() {
        let rules = vec![rule(1, 2, "analista", false)];
        let models = vec![slot(1, "base", true)];
        assert_eq!(choose(&rules, &models, 4), Some("base".to_string()));
    }

    #[test]
    fn zero_interval_rule_never_matches() {
        let rules = vec![rule(1, 0, "analista", true)];
        let models = vec![slot(1, "base", true)];
        assert_eq!(choose(&rules, &models, 0), Some("base".to_string()));
    }

    #[test]
    fn no_models_and_no_rules_yields_none() {
        assert_eq!(choose(&[], &[], 7), None);
    }

    #[test]
    fn deterministic_for_fixed_inputs() {
        let rules = vec![rule(1, 5, "analista", true)];
        let models = vec![slot(1, "base", true)];
        for _ in 0..3 {
            assert_eq!(choose(&rules, &models, 10), Some("analista".to_string()));
            assert_eq!(choose(&rules, &models, 11), Some("base".to_string()));
        }
    }
}
