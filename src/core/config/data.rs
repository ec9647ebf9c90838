use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

use crate::core::constants::{
    DEFAULT_BASE_URL, DEFAULT_MAX_TOKENS, DEFAULT_MODEL, DEFAULT_REFERER, DEFAULT_SYSTEM_PROMPT,
    DEFAULT_TEMPERATURE, DEFAULT_TITLE,
};

/// Where the API key is persisted between runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CredentialStoreKind {
    /// Platform keyring (Secret Service, Keychain, Credential Manager).
    #[default]
    Keyring,
    /// A `credentials.toml` file in the user's data directory.
    File,
}

impl CredentialStoreKind {
    pub fn as_str(self) -> &'static str {
        match self {
            CredentialStoreKind::Keyring => "keyring",
            CredentialStoreKind::File => "file",
        }
    }
}

impl std::str::FromStr for CredentialStoreKind {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "keyring" => Ok(CredentialStoreKind::Keyring),
            "file" => Ok(CredentialStoreKind::File),
            other => Err(format!("unknown credential store: {other}")),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Default, Clone, PartialEq)]
pub struct Config {
    /// API root; requests go to `<base-url>/chat/completions`.
    pub base_url: Option<String>,
    pub model: Option<String>,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
    /// Preamble prepended to every generation request.
    pub system_prompt: Option<String>,
    /// Sent as `HTTP-Referer`.
    pub referer: Option<String>,
    /// Sent as `X-Title`.
    pub title: Option<String>,
    pub credential_store: Option<CredentialStoreKind>,
}

/// Fully resolved request settings with defaults applied.
#[derive(Debug, Clone, PartialEq)]
pub struct ChatSettings {
    pub base_url: String,
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,
    pub system_prompt: String,
    pub referer: String,
    pub title: String,
}

impl Default for ChatSettings {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            model: DEFAULT_MODEL.to_string(),
            temperature: DEFAULT_TEMPERATURE,
            max_tokens: DEFAULT_MAX_TOKENS,
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
            referer: DEFAULT_REFERER.to_string(),
            title: DEFAULT_TITLE.to_string(),
        }
    }
}

/// Keys accepted by `parley set` / `parley unset`.
pub const CONFIG_KEYS: &[&str] = &[
    "base-url",
    "model",
    "temperature",
    "max-tokens",
    "system-prompt",
    "referer",
    "title",
    "credential-store",
];

/// Errors that can occur when modifying configuration settings.
#[derive(Debug, Clone, PartialEq)]
pub enum SettingError {
    /// The provided setting key is not recognized.
    UnknownKey(String),
    /// The value could not be parsed for the given key.
    InvalidValue {
        key: &'static str,
        input: String,
        expected: &'static str,
    },
}

impl fmt::Display for SettingError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SettingError::UnknownKey(key) => write!(
                f,
                "Unknown config key: {key} (expected one of: {})",
                CONFIG_KEYS.join(", ")
            ),
            SettingError::InvalidValue {
                key,
                input,
                expected,
            } => write!(f, "Invalid value for {key}: {input} (expected {expected})"),
        }
    }
}

impl std::error::Error for SettingError {}

impl Config {
    pub fn chat_settings(&self) -> ChatSettings {
        let defaults = ChatSettings::default();
        ChatSettings {
            base_url: self.base_url.clone().unwrap_or(defaults.base_url),
            model: self.model.clone().unwrap_or(defaults.model),
            temperature: self.temperature.unwrap_or(defaults.temperature),
            max_tokens: self.max_tokens.unwrap_or(defaults.max_tokens),
            system_prompt: self.system_prompt.clone().unwrap_or(defaults.system_prompt),
            referer: self.referer.clone().unwrap_or(defaults.referer),
            title: self.title.clone().unwrap_or(defaults.title),
        }
    }

    pub fn credential_store_kind(&self) -> CredentialStoreKind {
        self.credential_store.unwrap_or_default()
    }

    pub fn set_value(&mut self, key: &str, value: &str) -> Result<(), SettingError> {
        let value = value.trim();
        match key {
            "base-url" => self.base_url = Some(value.to_string()),
            "model" => self.model = Some(value.to_string()),
            "temperature" => {
                let parsed = value
                    .parse::<f32>()
                    .ok()
                    .filter(|t| t.is_finite() && (0.0..=2.0).contains(t))
                    .ok_or_else(|| SettingError::InvalidValue {
                        key: "temperature",
                        input: value.to_string(),
                        expected: "a number between 0 and 2",
                    })?;
                self.temperature = Some(parsed);
            }
            "max-tokens" => {
                let parsed = value
                    .parse::<u32>()
                    .ok()
                    .filter(|n| *n > 0)
                    .ok_or_else(|| SettingError::InvalidValue {
                        key: "max-tokens",
                        input: value.to_string(),
                        expected: "a positive integer",
                    })?;
                self.max_tokens = Some(parsed);
            }
            "system-prompt" => self.system_prompt = Some(value.to_string()),
            "referer" => self.referer = Some(value.to_string()),
            "title" => self.title = Some(value.to_string()),
            "credential-store" => {
                let kind = value
                    .parse::<CredentialStoreKind>()
                    .map_err(|_| SettingError::InvalidValue {
                        key: "credential-store",
                        input: value.to_string(),
                        expected: "keyring or file",
                    })?;
                self.credential_store = Some(kind);
            }
            other => return Err(SettingError::UnknownKey(other.to_string())),
        }
        Ok(())
    }

    pub fn unset_value(&mut self, key: &str) -> Result<(), SettingError> {
        match key {
            "base-url" => self.base_url = None,
            "model" => self.model = None,
            "temperature" => self.temperature = None,
            "max-tokens" => self.max_tokens = None,
            "system-prompt" => self.system_prompt = None,
            "referer" => self.referer = None,
            "title" => self.title = None,
            "credential-store" => self.credential_store = None,
            other => return Err(SettingError::UnknownKey(other.to_string())),
        }
        Ok(())
    }

    /// Lines describing the effective configuration, unset keys marked.
    pub fn describe(&self) -> Vec<String> {
        let settings = self.chat_settings();
        let mark = |set: bool| if set { "" } else { " (default)" };
        vec![
            format!("  base-url: {}{}", settings.base_url, mark(self.base_url.is_some())),
            format!("  model: {}{}", settings.model, mark(self.model.is_some())),
            format!(
                "  temperature: {}{}",
                settings.temperature,
                mark(self.temperature.is_some())
            ),
            format!(
                "  max-tokens: {}{}",
                settings.max_tokens,
                mark(self.max_tokens.is_some())
            ),
            format!(
                "  system-prompt: {}{}",
                settings.system_prompt,
                mark(self.system_prompt.is_some())
            ),
            format!("  referer: {}{}", settings.referer, mark(self.referer.is_some())),
            format!("  title: {}{}", settings.title, mark(self.title.is_some())),
            format!(
                "  credential-store: {}{}",
                self.credential_store_kind().as_str(),
                mark(self.credential_store.is_some())
            ),
        ]
    }
}

/// Get a user-friendly display string for a path
/// Converts absolute paths to use ~ notation on Unix-like systems when possible
pub fn path_display<P: AsRef<Path>>(path: P) -> String {
    let path = path.as_ref();

    #[cfg(unix)]
    {
        if let Some(home) = std::env::var_os("HOME") {
            let home_path = PathBuf::from(home);
            if let Ok(relative) = path.strip_prefix(&home_path) {
                return format!("~/{}", relative.display());
            }
        }
    }

    path.display().to_string()
}
