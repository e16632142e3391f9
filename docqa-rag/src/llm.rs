//! Chat model client for OpenAI-compatible chat completion APIs
//!
//! Both OpenAI and Aliyun DashScope (compatible mode) speak the same
//! `/chat/completions` protocol, so one [`OpenAiChatModel`] serves both.
//! Callers go through the [`ChatModel`] and [`LlmFactory`] traits so the
//! orchestration can run against fakes.

use crate::error::LlmError;
use async_trait::async_trait;
use docqa_embed::is_usable_credential;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

pub const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";
pub const ALIYUN_BASE_URL: &str = "https://dashscope.aliyuncs.com/compatible-mode/v1";
pub const DEFAULT_TEMPERATURE: f32 = 0.1;
pub const DEFAULT_MAX_TOKENS: u32 = 1000;
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// System message sent ahead of every prompt.
pub const ENERGY_SYSTEM_PROMPT: &str = "You are a professional energy AI assistant. You answer questions about energy, including but not limited to:
- energy production (coal, oil, natural gas, wind, solar, hydro and more)
- energy consumption and efficiency
- renewable energy technology and applications
- energy policy and regulation
- energy economics and markets
- energy storage and the power grid

Give accurate, professional answers. If a question is unrelated to energy, politely explain that you focus on energy topics.";

/// Prompt used by [`test_connection`].
pub const CONNECTION_PROBE_PROMPT: &str = "Reply with a short sentence: connection successful";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LlmProvider {
    OpenAi,
    #[default]
    Aliyun,
}

impl LlmProvider {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::OpenAi => "openai",
            Self::Aliyun => "aliyun",
        }
    }

    pub fn default_model(&self) -> &'static str {
        match self {
            Self::OpenAi => "gpt-3.5-turbo",
            Self::Aliyun => "qwen-turbo",
        }
    }

    pub fn default_api_base(&self) -> &'static str {
        match self {
            Self::OpenAi => OPENAI_BASE_URL,
            Self::Aliyun => ALIYUN_BASE_URL,
        }
    }

    /// Environment keys checked for this provider's credential, in order.
    fn api_key_vars(&self) -> &'static [&'static str] {
        match self {
            Self::OpenAi => &["OPENAI_API_KEY"],
            Self::Aliyun => &["ALIYUN_API_KEY", "DASHSCOPE_API_KEY"],
        }
    }

    fn api_base_var(&self) -> &'static str {
        match self {
            Self::OpenAi => "OPENAI_BASE_URL",
            Self::Aliyun => "ALIYUN_BASE_URL",
        }
    }
}

impl fmt::Display for LlmProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LlmProvider {
    type Err = LlmError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "openai" => Ok(Self::OpenAi),
            "aliyun" | "dashscope" => Ok(Self::Aliyun),
            other => Err(LlmError::configuration(format!(
                "unknown LLM provider '{other}' (expected openai or aliyun)"
            ))),
        }
    }
}

/// Per-call settings that take precedence over the environment.
#[derive(Debug, Clone, Default)]
pub struct LlmOverrides {
    pub provider: Option<LlmProvider>,
    pub model: Option<String>,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
    pub api_key: Option<String>,
    pub api_base: Option<String>,
}

/// Fully resolved chat model settings.
#[derive(Clone)]
pub struct LlmConfig {
    pub provider: LlmProvider,
    pub model: String,
    pub api_key: String,
    pub api_base: String,
    pub temperature: f32,
    pub max_tokens: u32,
    pub timeout: Duration,
}

impl fmt::Debug for LlmConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LlmConfig")
            .field("provider", &self.provider)
            .field("model", &self.model)
            .field("api_key", &"<redacted>")
            .field("api_base", &self.api_base)
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .finish()
    }
}

impl LlmConfig {
    pub fn from_env(overrides: &LlmOverrides) -> Result<Self, LlmError> {
        Self::resolve(overrides, |key| std::env::var(key).ok())
    }

    /// Resolve settings: explicit overrides, then `lookup`, then defaults.
    ///
    /// Fails when the credential is missing or a placeholder, or when a
    /// numeric setting does not parse.
    pub fn resolve<F>(overrides: &LlmOverrides, lookup: F) -> Result<Self, LlmError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| {
            lookup(key)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };

        let provider = match overrides.provider {
            Some(provider) => provider,
            None => get("DEFAULT_PROVIDER")
                .map(|raw| raw.parse::<LlmProvider>())
                .transpose()?
                .unwrap_or_default(),
        };

        let model = overrides
            .model
            .clone()
            .or_else(|| get("MODEL_NAME"))
            .unwrap_or_else(|| provider.default_model().to_string());

        let temperature = match overrides.temperature {
            Some(t) => t,
            None => parse_or(get("TEMPERATURE"), "TEMPERATURE", DEFAULT_TEMPERATURE)?,
        };
        let max_tokens = match overrides.max_tokens {
            Some(n) => n,
            None => parse_or(get("MAX_TOKENS"), "MAX_TOKENS", DEFAULT_MAX_TOKENS)?,
        };

        let api_key = overrides
            .api_key
            .clone()
            .or_else(|| provider.api_key_vars().iter().find_map(|key| get(*key)));
        if !is_usable_credential(api_key.as_deref()) {
            return Err(LlmError::configuration(format!(
                "[{}] API key is missing or still a placeholder; set {} in .env",
                provider.as_str().to_uppercase(),
                provider.api_key_vars().join(" or ")
            )));
        }

        let api_base = overrides
            .api_base
            .clone()
            .or_else(|| get(provider.api_base_var()))
            .unwrap_or_else(|| provider.default_api_base().to_string());

        let config = Self {
            provider,
            model,
            api_key: api_key.unwrap_or_default(),
            api_base,
            temperature,
            max_tokens,
            timeout: DEFAULT_REQUEST_TIMEOUT,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), LlmError> {
        if !(0.0..=2.0).contains(&self.temperature) {
            return Err(LlmError::configuration(format!(
                "TEMPERATURE must be between 0 and 2, got {}",
                self.temperature
            )));
        }
        if self.max_tokens == 0 {
            return Err(LlmError::configuration("MAX_TOKENS must be greater than zero"));
        }
        if self.model.trim().is_empty() {
            return Err(LlmError::configuration("model name must not be empty"));
        }
        Ok(())
    }
}

fn parse_or<T>(value: Option<String>, key: &str, default: T) -> Result<T, LlmError>
where
    T: FromStr,
    T::Err: fmt::Display,
{
    match value {
        Some(raw) => raw
            .parse()
            .map_err(|e| LlmError::configuration(format!("{key} '{raw}': {e}"))),
        None => Ok(default),
    }
}

/// Whole-response chat capability.
#[async_trait]
pub trait ChatModel: Send + Sync {
    async fn chat(&self, prompt: &str) -> Result<String, LlmError>;

    fn provider_name(&self) -> &str;

    fn model_name(&self) -> &str;
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: [ChatMessage<'a>; 2],
    temperature: f32,
    max_tokens: u32,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatResponseMessage,
}

#[derive(Deserialize)]
struct ChatResponseMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Deserialize)]
struct ErrorResponse {
    error: ErrorDetail,
}

#[derive(Deserialize)]
struct ErrorDetail {
    message: String,
}

/// HTTP client for `/chat/completions`.
pub struct OpenAiChatModel {
    client: reqwest::Client,
    provider: LlmProvider,
    url: String,
    api_key: String,
    model: String,
    temperature: f32,
    max_tokens: u32,
}

impl fmt::Debug for OpenAiChatModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OpenAiChatModel")
            .field("provider", &self.provider)
            .field("url", &self.url)
            .field("model", &self.model)
            .finish()
    }
}

impl OpenAiChatModel {
    pub fn new(config: &LlmConfig) -> Result<Self, LlmError> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| LlmError::connection(config.provider.as_str(), e.to_string()))?;

        Ok(Self {
            client,
            provider: config.provider,
            url: format!("{}/chat/completions", config.api_base.trim_end_matches('/')),
            api_key: config.api_key.clone(),
            model: config.model.clone(),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
        })
    }
}

#[async_trait]
impl ChatModel for OpenAiChatModel {
    async fn chat(&self, prompt: &str) -> Result<String, LlmError> {
        let provider = self.provider.as_str();
        let request = ChatRequest {
            model: &self.model,
            messages: [
                ChatMessage {
                    role: "system",
                    content: ENERGY_SYSTEM_PROMPT,
                },
                ChatMessage {
                    role: "user",
                    content: prompt,
                },
            ],
            temperature: self.temperature,
            max_tokens: self.max_tokens,
        };

        tracing::debug!(provider, model = %self.model, prompt_chars = prompt.len(), "Sending chat request");

        let response = self
            .client
            .post(&self.url)
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                tracing::error!(provider, model = %self.model, error = %e, "Chat request failed");
                LlmError::connection(provider, e.to_string())
            })?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| LlmError::connection(provider, e.to_string()))?;

        if !status.is_success() {
            let message = serde_json::from_str::<ErrorResponse>(&body)
                .map(|e| e.error.message)
                .unwrap_or(body);
            tracing::error!(provider, model = %self.model, %status, "Chat API error");
            return Err(status_error(provider, status.as_u16(), message));
        }

        parse_chat_response(provider, &body)
    }

    fn provider_name(&self) -> &str {
        self.provider.as_str()
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

/// Map a non-success status: auth, timeout, rate limit and server errors mean
/// the service could not be used; anything else is a failed generation.
pub(crate) fn status_error(provider: &str, status: u16, message: String) -> LlmError {
    match status {
        401 | 403 | 408 | 429 | 500..=599 => {
            LlmError::connection(provider, format!("HTTP {status}: {message}"))
        }
        _ => LlmError::generation(provider, format!("HTTP {status}: {message}")),
    }
}

/// Extract the trimmed text of the first choice.
pub(crate) fn parse_chat_response(provider: &str, body: &str) -> Result<String, LlmError> {
    let response: ChatResponse = serde_json::from_str(body)
        .map_err(|e| LlmError::generation(provider, format!("malformed response: {e}")))?;

    let content = response
        .choices
        .into_iter()
        .next()
        .and_then(|choice| choice.message.content)
        .map(|content| content.trim().to_string())
        .unwrap_or_default();

    if content.is_empty() {
        return Err(LlmError::generation(provider, "response contained no content"));
    }
    Ok(content)
}

/// Builds chat models from per-call overrides.
pub trait LlmFactory: Send + Sync {
    fn create(&self, overrides: &LlmOverrides) -> Result<Arc<dyn ChatModel>, LlmError>;
}

/// Factory resolving settings from the process environment.
#[derive(Debug, Clone, Copy, Default)]
pub struct EnvLlmFactory;

impl LlmFactory for EnvLlmFactory {
    fn create(&self, overrides: &LlmOverrides) -> Result<Arc<dyn ChatModel>, LlmError> {
        let config = LlmConfig::from_env(overrides)?;
        tracing::info!(
            provider = %config.provider,
            model = %config.model,
            temperature = config.temperature,
            max_tokens = config.max_tokens,
            "Created chat model"
        );
        Ok(Arc::new(OpenAiChatModel::new(&config)?))
    }
}

/// Send a short probe and return the model's reply.
pub async fn test_connection(model: &dyn ChatModel) -> Result<String, LlmError> {
    let reply = model.chat(CONNECTION_PROBE_PROMPT).await?;
    tracing::info!(
        provider = model.provider_name(),
        model = model.model_name(),
        "LLM connection check succeeded"
    );
    Ok(reply)
}
