use std::fmt::Debug;

const DEFAULT_MODEL: &str = "google/gemini-3-flash-preview";
const DEFAULT_BASE_URL: &str = "https://ai.gateway.lovable.dev/v1";

/// Builder for [`GatewayConfig`].
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct GatewayConfigBuilder {
    api_key: String,
    model: Option<String>,
    base_url: Option<String>,
}

impl GatewayConfigBuilder {
    /// Creates a builder with the given API key.
    #[inline]
    pub fn with_api_key<S: Into<String>>(api_key: S) -> Self {
        Self {
            api_key: api_key.into(),
            model: None,
            base_url: None,
        }
    }

    /// Sets the model to use.
    #[inline]
    pub fn with_model<S: Into<String>>(mut self, model: S) -> Self {
        self.model = Some(model.into());
        self
    }

    /// Sets a custom base URL.
    #[inline]
    pub fn with_base_url<S: Into<String>>(mut self, base_url: S) -> Self {
        self.base_url = Some(base_url.into());
        self
    }

    /// Builds the configuration.
    #[inline]
    pub fn build(self) -> GatewayConfig {
        let base_url = self
            .base_url
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string());
        GatewayConfig {
            api_key: self.api_key,
            model: self.model.unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            base_url: base_url.trim_end_matches('/').to_owned(),
        }
    }
}

impl Debug for GatewayConfigBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GatewayConfigBuilder")
            .field("api_key", &"<redacted>")
            .field("model", &self.model)
            .field("base_url", &self.base_url)
            .finish()
    }
}

/// Configuration for the upstream completion gateway.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct GatewayConfig {
    pub(crate) api_key: String,
    pub(crate) model: String,
    pub(crate) base_url: String,
}

impl GatewayConfig {
    /// Returns the model name sent with every request.
    #[inline]
    pub fn model(&self) -> &str {
        &self.model
    }

    #[inline]
    pub(crate) fn completions_url(&self) -> String {
        format!("{}/chat/completions", self.base_url)
    }
}

impl Debug for GatewayConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GatewayConfig")
            .field("api_key", &"<redacted>")
            .field("model", &self.model)
            .field("base_url", &self.base_url)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = GatewayConfigBuilder::with_api_key("secret").build();
        assert_eq!(config.model(), DEFAULT_MODEL);
        assert_eq!(
            config.completions_url(),
            "https://ai.gateway.lovable.dev/v1/chat/completions"
        );
    }

    #[test]
    fn test_debug_hides_api_key() {
        let config = GatewayConfigBuilder::with_api_key("secret")
            .with_base_url("http://localhost:8080/v1/")
            .with_model("custom")
            .build();
        assert_eq!(
            config.completions_url(),
            "http://localhost:8080/v1/chat/completions"
        );
        let debug = format!("{config:?}");
        assert!(!debug.contains("secret"));
        assert!(debug.contains("custom"));
    }
}
