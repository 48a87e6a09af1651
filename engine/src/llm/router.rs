//! Model router
//!
//! Holds every configured backend and which one is active. `/model` switches
//! between them; the choice is persisted on the session by the caller.

use sdk::EngineError;
use tracing::info;

use super::{LLMProvider, Result as LLMResult};

pub struct ModelRouter {
    providers: Vec<Box<dyn LLMProvider>>,
    active: usize,
}

impl ModelRouter {
    /// Create a router with `default_provider` active
    pub fn new(
        providers: Vec<Box<dyn LLMProvider>>,
        default_provider: &str,
    ) -> Result<Self, EngineError> {
        let active = providers
            .iter()
            .position(|p| p.name() == default_provider)
            .ok_or_else(|| EngineError::ProviderNotFound(default_provider.to_string()))?;
        Ok(Self { providers, active })
    }

    pub fn active(&self) -> &dyn LLMProvider {
        self.providers[self.active].as_ref()
    }

    pub fn active_provider(&self) -> &str {
        self.active().name()
    }

    pub fn active_model(&self) -> &str {
        self.active().model()
    }

    pub fn provider_names(&self) -> Vec<&str> {
        self.providers.iter().map(|p| p.name()).collect()
    }

    /// Make `provider` active, optionally changing its model
    pub fn switch(&mut self, provider: &str, model: Option<&str>) -> Result<(), EngineError> {
        let index = self
            .providers
            .iter()
            .position(|p| p.name() == provider)
            .ok_or_else(|| EngineError::ProviderNotFound(provider.to_string()))?;
        if let Some(model) = model.filter(|m| !m.trim().is_empty()) {
            self.providers[index].set_model(model.trim());
        }
        self.active = index;
        info!(
            "Active model is now {}:{}",
            self.active_provider(),
            self.active_model()
        );
        Ok(())
    }

    /// Interpret a `/model` argument: `<provider>`, `<provider>:<model>` or a
    /// bare `<model>` for the active provider. Ollama model names contain ':'
    /// themselves, so only a known provider prefix is split off.
    pub fn resolve_selection(&self, arg: &str) -> (String, Option<String>) {
        let arg = arg.trim();
        if self.providers.iter().any(|p| p.name() == arg) {
            return (arg.to_string(), None);
        }
        if let Some((prefix, model)) = arg.split_once(':') {
            if self.providers.iter().any(|p| p.name() == prefix) {
                return (prefix.to_string(), Some(model.to_string()));
            }
        }
        (self.active_provider().to_string(), Some(arg.to_string()))
    }

    /// Ask every provider which models it can serve
    pub async fn list_models(&self) -> Vec<(String, LLMResult<Vec<String>>)> {
        let mut listings = Vec::new();
        for provider in &self.providers {
            listings.push((provider.name().to_string(), provider.list_models().await));
        }
        listings
    }

    /// Check the health of all registered providers
    pub async fn check_health(&self) -> Vec<(String, String, bool)> {
        let mut results = Vec::new();
        for provider in &self.providers {
            let is_healthy = provider.check_health().await;
            results.push((
                provider.name().to_string(),
                provider.model().to_string(),
                is_healthy,
            ));
        }
        results
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{Message, RawProposal, Result};
    use async_trait::async_trait;
    use sdk::ToolSchema;

    struct MockProvider {
        name: &'static str,
        model: String,
        healthy: bool,
    }

    #[async_trait]
    impl LLMProvider for MockProvider {
        fn name(&self) -> &str {
            self.name
        }

        fn model(&self) -> &str {
            &self.model
        }

        fn set_model(&mut self, model: &str) {
            self.model = model.to_string();
        }

        fn is_local(&self) -> bool {
            true
        }

        async fn propose(&self, _messages: &[Message], _tools: &[ToolSchema]) -> Result<RawProposal> {
            Ok(RawProposal::answer(format!("{}:{}", self.name, self.model)))
        }

        async fn check_health(&self) -> bool {
            self.healthy
        }
    }

    fn router() -> ModelRouter {
        ModelRouter::new(
            vec![
                Box::new(MockProvider {
                    name: "ollama",
                    model: "qwen2.5-coder:7b".into(),
                    healthy: true,
                }),
                Box::new(MockProvider {
                    name: "openai",
                    model: "gpt-4o-mini".into(),
                    healthy: false,
                }),
            ],
            "ollama",
        )
        .unwrap()
    }

    #[test]
    fn test_unknown_default_is_rejected() {
        let err = ModelRouter::new(Vec::new(), "ollama").err().unwrap();
        assert!(matches!(err, EngineError::ProviderNotFound(_)));
    }

    #[tokio::test]
    async fn test_switch_changes_active_provider_and_model() {
        let mut router = router();
        router.switch("openai", Some("gpt-4o")).unwrap();
        assert_eq!(router.active_provider(), "openai");
        assert_eq!(router.active_model(), "gpt-4o");
        let text = router.active().infer("hi").await.unwrap();
        assert_eq!(text, "openai:gpt-4o");

        router.switch("ollama", None).unwrap();
        assert_eq!(router.active_model(), "qwen2.5-coder:7b");
        assert!(router.switch("anthropic", None).is_err());
        assert_eq!(router.active_provider(), "ollama");
    }

    #[test]
    fn test_resolve_selection() {
        let router = router();
        assert_eq!(router.resolve_selection("openai"), ("openai".into(), None));
        assert_eq!(
            router.resolve_selection("openai:gpt-4o"),
            ("openai".into(), Some("gpt-4o".into()))
        );
        assert_eq!(
            router.resolve_selection("llama3.1:8b"),
            ("ollama".into(), Some("llama3.1:8b".into()))
        );
        assert_eq!(
            router.resolve_selection("ollama:llama3.1:8b"),
            ("ollama".into(), Some("llama3.1:8b".into()))
        );
    }

    #[tokio::test]
    async fn test_check_health_reports_every_provider() {
        let health = router().check_health().await;
        assert_eq!(
            health,
            vec![
                ("ollama".to_string(), "qwen2.5-coder:7b".to_string(), true),
                ("openai".to_string(), "gpt-4o-mini".to_string(), false),
            ]
        );
    }

    #[tokio::test]
    async fn test_list_models_covers_every_provider() {
        let mut router = router();
        router.switch("openai", Some("gpt-4o")).unwrap();

        let listings: Vec<(String, Vec<String>)> = router
            .list_models()
            .await
            .into_iter()
            .map(|(name, models)| (name, models.unwrap()))
            .collect();
        assert_eq!(
            listings,
            vec![
                ("ollama".to_string(), vec!["qwen2.5-coder:7b".to_string()]),
                ("openai".to_string(), vec!["gpt-4o".to_string()]),
            ]
        );
    }
}
