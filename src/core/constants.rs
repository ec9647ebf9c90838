//! Shared constants used across the application

/// API root used when no `base-url` is configured.
pub const DEFAULT_BASE_URL: &str = "https://openrouter.ai/api/v1";

pub const CHAT_COMPLETIONS_PATH: &str = "chat/completions";

pub const DEFAULT_MODEL: &str = "openai/gpt-3.5-turbo-1106";

/// Prepended to every generation request, never stored in the transcript.
pub const DEFAULT_SYSTEM_PROMPT: &str =
    "You are a professional AI assistant. Answer questions directly and avoid repeating yourself.";

pub const DEFAULT_TEMPERATURE: f32 = 0.7;

pub const DEFAULT_MAX_TOKENS: u32 = 4096;

/// Token cap for the credential probe; keeps validation cheap.
pub const PROBE_MAX_TOKENS: u32 = 150;

pub const PROBE_CONTENT: &str = "Hi";

pub const DEFAULT_REFERER: &str = "http://localhost";

pub const DEFAULT_TITLE: &str = "Parley";

/// Key under which the credential is persisted.
pub const CREDENTIAL_STORAGE_KEY: &str = "chat_api_key";

pub const KEYRING_SERVICE: &str = "parley";

/// Event-stream marker for data-bearing lines.
pub const SSE_DATA_PREFIX: &str = "data:";

/// Data payload the API sends right before closing the stream.
pub const SSE_DONE_SENTINEL: &str = "[DONE]";
