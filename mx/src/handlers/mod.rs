//! Provider handlers and prefix routing

mod ollama;
mod openrouter;

pub use ollama::OllamaHandler;
pub use openrouter::OpenRouterHandler;

use std::sync::Arc;

use async_trait::async_trait;
use overseer::config::RoutingConfig;
use tracing::debug;

use crate::canonical::{CanonicalRequest, CanonicalResponse};
use crate::error::ProxyError;

/// Fallback routing target when no config names one
pub const DEFAULT_TARGET: &str = "ollama/llama3.3";

/// One provider dialect
#[async_trait]
pub trait ProviderHandler: Send + Sync + std::fmt::Debug {
    /// Provider name as used in model prefixes
    fn provider(&self) -> &'static str;

    /// Cheap downstream liveness probe
    async fn health(&self) -> Result<(), ProxyError>;

    /// Translate, dispatch, and translate back
    ///
    /// `model` is the target with the provider prefix already stripped.
    async fn complete(&self, model: &str, request: &CanonicalRequest) -> Result<CanonicalResponse, ProxyError>;
}

/// Routes model strings to handlers by prefix
pub struct HandlerRegistry {
    ollama: Arc<OllamaHandler>,
    openrouter: Option<Arc<OpenRouterHandler>>,
    default_target: String,
}

impl HandlerRegistry {
    /// Build from merged routing config
    pub fn from_config(config: &RoutingConfig) -> Self {
        let ollama = Arc::new(OllamaHandler::new(config.ollama_base_url.clone()));
        let openrouter = config
            .api_key("openrouter")
            .and_then(|key| OpenRouterHandler::new(key.to_string()).ok())
            .map(Arc::new);

        Self {
            ollama,
            openrouter,
            default_target: config.default.clone().unwrap_or_else(|| DEFAULT_TARGET.to_string()),
        }
    }

    /// Registry with explicit handlers (tests)
    pub fn with_handlers(
        ollama: OllamaHandler,
        openrouter: Option<OpenRouterHandler>,
        default_target: impl Into<String>,
    ) -> Self {
        Self {
            ollama: Arc::new(ollama),
            openrouter: openrouter.map(Arc::new),
            default_target: default_target.into(),
        }
    }

    /// The configured default routing target
    pub fn default_target(&self) -> &str {
        &self.default_target
    }

    /// Resolve a prefixed model string to its handler and bare model
    pub fn route(&self, model: &str) -> Result<(Arc<dyn ProviderHandler>, String), ProxyError> {
        if let Some(rest) = model.strip_prefix("ollama/") {
            debug!(model = rest, "route: ollama");
            return Ok((self.ollama.clone(), rest.to_string()));
        }
        if let Some(rest) = model.strip_prefix("openrouter/") {
            debug!(model = rest, "route: openrouter");
            return match &self.openrouter {
                Some(handler) => Ok((handler.clone(), rest.to_string())),
                None => Err(ProxyError::MissingApiKey("openrouter")),
            };
        }
        Err(ProxyError::UnknownProvider(model.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> HandlerRegistry {
        HandlerRegistry::with_handlers(
            OllamaHandler::new(None),
            Some(OpenRouterHandler::new("test-key".to_string()).unwrap()),
            DEFAULT_TARGET,
        )
    }

    #[test]
    fn test_route_by_prefix() {
        let registry = registry();

        let (handler, model) = registry.route("ollama/llama3.3").unwrap();
        assert_eq!(handler.provider(), "ollama");
        assert_eq!(model, "llama3.3");

        let (handler, model) = registry.route("openrouter/anthropic/claude-sonnet-4").unwrap();
        assert_eq!(handler.provider(), "openrouter");
        assert_eq!(model, "anthropic/claude-sonnet-4");
    }

    #[test]
    fn test_unknown_prefix_is_rejected() {
        let err = registry().route("mystery/model").unwrap_err();
        assert!(matches!(err, ProxyError::UnknownProvider(_)));
        assert_eq!(err.status_code(), 400);
    }

    #[test]
    fn test_openrouter_without_key_reports_missing() {
        let registry = HandlerRegistry::with_handlers(OllamaHandler::new(None), None, DEFAULT_TARGET);
        let err = registry.route("openrouter/x").unwrap_err();
        assert!(matches!(err, ProxyError::MissingApiKey("openrouter")));
    }

    #[test]
    fn test_registry_from_config_respects_key() {
        let mut config = RoutingConfig::default();
        assert!(HandlerRegistry::from_config(&config).openrouter.is_none());

        config.api_keys.insert("openrouter".to_string(), "k".to_string());
        assert!(HandlerRegistry::from_config(&config).openrouter.is_some());
    }
}
