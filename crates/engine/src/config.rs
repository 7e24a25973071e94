//! Engine configuration from environment variables.

use std::time::Duration;

/// Prompt used for synthetic participants whose roster record carries no
/// prompt of its own. Rooms can overwrite it at runtime via `update_prompt`.
pub const DEFAULT_FALLBACK_PROMPT: &str =
    "You are a friendly creature wandering the plaza. Stay in character and keep replies short.";

#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub server_host: String,
    pub server_port: u16,

    /// Base URL of the OpenAI-compatible generation endpoint.
    pub delegate_base_url: String,
    pub delegate_model: String,
    pub delegate_api_key: Option<String>,
    /// Reply length cap forwarded as `max_tokens`.
    pub delegate_max_tokens: u32,

    /// Base URL of the roster store; `None` runs rooms without synthetic
    /// participants.
    pub roster_base_url: Option<String>,
    pub roster_poll_interval: Duration,

    /// External token verifier; `None` admits tokenless guests.
    pub auth_verify_url: Option<String>,

    pub cors_allowed_origins: Option<String>,

    pub fallback_prompt: String,
}

impl EngineConfig {
    pub fn from_env() -> Self {
        let server_host = std::env::var("SERVER_HOST").unwrap_or_else(|_| "0.0.0.0".into());
        let server_port: u16 = std::env::var("SERVER_PORT")
            .or_else(|_| std::env::var("PORT"))
            .unwrap_or_else(|_| "2567".into())
            .parse()
            .unwrap_or(2567);

        let delegate_base_url = std::env::var("DELEGATE_BASE_URL")
            .or_else(|_| std::env::var("OPENAI_BASE_URL"))
            .unwrap_or_else(|_| "https://api.openai.com".into());
        let delegate_model =
            std::env::var("DELEGATE_MODEL").unwrap_or_else(|_| "gpt-4o-mini".into());
        let delegate_api_key = std::env::var("DELEGATE_API_KEY")
            .or_else(|_| std::env::var("OPENAI_API_KEY"))
            .ok();
        let delegate_max_tokens: u32 = std::env::var("DELEGATE_MAX_TOKENS")
            .unwrap_or_else(|_| "150".into())
            .parse()
            .unwrap_or(150);

        let roster_base_url = std::env::var("ROSTER_BASE_URL").ok().filter(|s| !s.is_empty());
        let roster_poll_ms: u64 = std::env::var("ROSTER_POLL_MS")
            .unwrap_or_else(|_| "2000".into())
            .parse()
            .unwrap_or(2000);

        let auth_verify_url = std::env::var("AUTH_VERIFY_URL").ok().filter(|s| !s.is_empty());

        let cors_allowed_origins = std::env::var("CORS_ALLOWED_ORIGINS")
            .ok()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty());

        let fallback_prompt = std::env::var("ROOM_FALLBACK_PROMPT")
            .unwrap_or_else(|_| DEFAULT_FALLBACK_PROMPT.into());

        Self {
            server_host,
            server_port,
            delegate_base_url,
            delegate_model,
            delegate_api_key,
            delegate_max_tokens,
            roster_base_url,
            roster_poll_interval: Duration::from_millis(roster_poll_ms),
            auth_verify_url,
            cors_allowed_origins,
            fallback_prompt,
        }
    }
}
