//! Model selection
//!
//! Picks the downstream model for a task from static escalation tables.
//! Selection is a pure function of the task: identical tasks always get the
//! identical model, and there is always an answer.

use std::collections::HashMap;

use serde::Serialize;
use tracing::debug;

use crate::domain::Task;

/// Model used when nothing else applies
pub const DEFAULT_MODEL: &str = "claude-3-7-sonnet-20250219";

/// Static per-agent escalation tables
#[derive(Debug, Clone)]
pub struct ModelSelector {
    defaults: HashMap<&'static str, &'static str>,
    escalation: HashMap<&'static str, HashMap<&'static str, &'static str>>,
}

impl Default for ModelSelector {
    fn default() -> Self {
        Self::new()
    }
}

impl ModelSelector {
    pub fn new() -> Self {
        let defaults = HashMap::from([
            ("code-implementer", DEFAULT_MODEL),
            ("test-specialist", DEFAULT_MODEL),
            ("validation-expert", DEFAULT_MODEL),
            ("sprint-planner", DEFAULT_MODEL),
        ]);

        let escalation = HashMap::from([
            (
                "code-implementer",
                HashMap::from([
                    ("retry_1", "claude-4-sonnet"),
                    ("retry_2", "claude-4-opus"),
                    ("validation_failure", "claude-4-sonnet"),
                    ("complexity_high", "claude-4-opus"),
                ]),
            ),
            (
                "test-specialist",
                HashMap::from([
                    ("retry_1", "claude-4-sonnet"),
                    ("retry_2", "claude-4-opus"),
                    ("complex_testing", "claude-4-sonnet"),
                    ("performance_tests", "claude-4-opus"),
                ]),
            ),
            (
                "validation-expert",
                HashMap::from([
                    ("retry_1", "claude-4-sonnet"),
                    ("retry_2", "claude-4-opus"),
                    ("security_audit", "claude-4-opus"),
                    ("complex_analysis", "claude-4-opus"),
                ]),
            ),
            (
                "sprint-planner",
                HashMap::from([
                    ("retry_1", "claude-4-sonnet"),
                    ("retry_2", "gemini-2.5-pro"),
                    ("complex_planning", "gemini-2.5-pro"),
                    ("architecture_design", "o3"),
                ]),
            ),
        ]);

        Self { defaults, escalation }
    }

    /// Pick a model for the task
    ///
    /// Precedence: explicit hint, retry escalation, complexity escalation,
    /// validation-failure escalation, then the agent's default.
    pub fn select(&self, task: &Task) -> String {
        if let Some(hint) = task.model_hint.as_deref().filter(|h| !h.is_empty()) {
            debug!(%hint, agent_type = %task.agent_type, "ModelSelector::select: using model hint");
            return hint.to_string();
        }

        let Some(rules) = self.escalation.get(task.agent_type.as_str()) else {
            debug!(agent_type = %task.agent_type, "ModelSelector::select: no escalation rules");
            return self.default_model(&task.agent_type).to_string();
        };

        if task.retry_count > 0 {
            let key = format!("retry_{}", task.retry_count);
            if let Some(model) = rules.get(key.as_str()) {
                debug!(%model, retry_count = task.retry_count, "ModelSelector::select: retry escalation");
                return model.to_string();
            }
            if task.retry_count >= 2 {
                if let Some(model) = rules.get("retry_2") {
                    debug!(%model, retry_count = task.retry_count, "ModelSelector::select: retry_2 fallback");
                    return model.to_string();
                }
            }
        }

        if let Some(complexity) = task.complexity.as_deref().filter(|c| !c.is_empty()) {
            let complexity = complexity.to_lowercase();
            let key = format!("complexity_{complexity}");
            if let Some(model) = rules.get(key.as_str()) {
                debug!(%model, %complexity, "ModelSelector::select: complexity escalation");
                return model.to_string();
            }

            let special = match (complexity.as_str(), task.agent_type.as_str()) {
                ("high" | "complex", "code-implementer") => Some("complexity_high"),
                ("security", "validation-expert") => Some("security_audit"),
                ("performance", "test-specialist") => Some("performance_tests"),
                ("planning", "sprint-planner") => Some("complex_planning"),
                ("architecture", "sprint-planner") => Some("architecture_design"),
                _ => None,
            };
            if let Some(model) = special.and_then(|rule| rules.get(rule)) {
                debug!(%model, %complexity, "ModelSelector::select: specialized escalation");
                return model.to_string();
            }
        }

        if task.options.validation_failed {
            if let Some(model) = rules.get("validation_failure") {
                debug!(%model, "ModelSelector::select: validation failure escalation");
                return model.to_string();
            }
        }

        let model = self.default_model(&task.agent_type);
        debug!(%model, agent_type = %task.agent_type, "ModelSelector::select: default model");
        model.to_string()
    }

    pub fn default_model(&self, agent_type: &str) -> &'static str {
        self.defaults.get(agent_type).copied().unwrap_or(DEFAULT_MODEL)
    }

    /// What a model is good at, for runners that adapt to it
    pub fn capabilities(&self, model: &str) -> ModelCapabilities {
        let (token_efficient, reasoning_level, cost_tier, specialization) = match model {
            DEFAULT_MODEL => (true, "fast", "low", None),
            "claude-4-sonnet" => (false, "high", "medium", None),
            "claude-4-opus" => (false, "maximum", "high", None),
            "gemini-2.5-pro" => (false, "high", "medium", Some("planning")),
            "o3" => (false, "systematic", "high", Some("architecture")),
            _ => (false, "standard", "standard", None),
        };

        ModelCapabilities {
            token_efficient,
            reasoning_level: reasoning_level.to_string(),
            cost_tier: cost_tier.to_string(),
            specialization: specialization.map(str::to_string),
        }
    }
}

/// Coarse model traits
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ModelCapabilities {
    pub token_efficient: bool,
    pub reasoning_level: String,
    pub cost_tier: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub specialization: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn select(task: Task) -> String {
        ModelSelector::new().select(&task)
    }

    #[test]
    fn test_hint_wins() {
        let task = Task::new("code-implementer", "x")
            .with_retry_count(2)
            .with_model_hint("custom-model");
        assert_eq!(select(task), "custom-model");
    }

    #[test]
    fn test_default_model() {
        assert_eq!(select(Task::new("code-implementer", "x")), DEFAULT_MODEL);
        assert_eq!(select(Task::new("unknown-agent", "x")), DEFAULT_MODEL);
    }

    #[test]
    fn test_retry_escalation() {
        assert_eq!(select(Task::new("code-implementer", "x").with_retry_count(1)), "claude-4-sonnet");
        assert_eq!(select(Task::new("code-implementer", "x").with_retry_count(2)), "claude-4-opus");
        assert_eq!(select(Task::new("sprint-planner", "x").with_retry_count(5)), "gemini-2.5-pro");
    }

    #[test]
    fn test_complexity_escalation() {
        assert_eq!(select(Task::new("code-implementer", "x").with_complexity("HIGH")), "claude-4-opus");
        assert_eq!(select(Task::new("code-implementer", "x").with_complexity("complex")), "claude-4-opus");
        assert_eq!(select(Task::new("validation-expert", "x").with_complexity("security")), "claude-4-opus");
        assert_eq!(select(Task::new("test-specialist", "x").with_complexity("performance")), "claude-4-opus");
        assert_eq!(select(Task::new("sprint-planner", "x").with_complexity("planning")), "gemini-2.5-pro");
        assert_eq!(select(Task::new("sprint-planner", "x").with_complexity("architecture")), "o3");
        assert_eq!(select(Task::new("sprint-planner", "x").with_complexity("security")), DEFAULT_MODEL);
    }

    #[test]
    fn test_retry_takes_precedence_over_complexity() {
        let task = Task::new("sprint-planner", "x").with_retry_count(1).with_complexity("architecture");
        assert_eq!(select(task), "claude-4-sonnet");
    }

    #[test]
    fn test_validation_failure_escalation() {
        assert_eq!(select(Task::new("code-implementer", "x").with_validation_failed()), "claude-4-sonnet");
        assert_eq!(select(Task::new("test-specialist", "x").with_validation_failed()), DEFAULT_MODEL);
    }

    #[test]
    fn test_selection_is_deterministic() {
        let selector = ModelSelector::new();
        let task = Task::new("validation-expert", "audit").with_complexity("security");
        let first = selector.select(&task);
        for _ in 0..10 {
            assert_eq!(selector.select(&task), first);
        }
    }

    #[test]
    fn test_capabilities() {
        let selector = ModelSelector::new();

        let fast = selector.capabilities(DEFAULT_MODEL);
        assert!(fast.token_efficient);
        assert_eq!(fast.cost_tier, "low");

        let o3 = selector.capabilities("o3");
        assert_eq!(o3.reasoning_level, "systematic");
        assert_eq!(o3.specialization.as_deref(), Some("architecture"));

        let unknown = selector.capabilities("mystery");
        assert_eq!(unknown.reasoning_level, "standard");
    }
}
