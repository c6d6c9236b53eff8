//! Settings resolution
//!
//! Layers, lowest to highest priority:
//! 1. built-in defaults (`Settings::default`)
//! 2. `LLM_CATCHER_*` environment variables
//! 3. a JSON config file (`config.json`, or `LLM_CATCHER_CONFIG_FILE`)
//!
//! The file layer is read with `serde_json` directly so that kind names used
//! as map keys in `custom_handlers` keep their case.

use crate::error::{Error, Result};
use catcher_llm::openai;
use catcher_llm::util::mask_api_key;
use config::{Config, Environment};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::{debug, error, warn};

/// Environment variable prefix
pub const ENV_PREFIX: &str = "LLM_CATCHER";

/// Environment variable naming the config file
pub const CONFIG_FILE_ENV: &str = "LLM_CATCHER_CONFIG_FILE";

/// Config file read when `LLM_CATCHER_CONFIG_FILE` is unset
pub const DEFAULT_CONFIG_FILE: &str = "config.json";

/// Default sampling temperature
pub const DEFAULT_TEMPERATURE: f32 = 0.2;

/// Default backend request timeout
pub const DEFAULT_TIMEOUT_SECS: u64 = 60;

// ============================================================================
// Provider
// ============================================================================

/// Diagnosis backend family
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Provider {
    /// Hosted OpenAI chat completions
    #[default]
    OpenAi,
    /// Local Ollama server
    Ollama,
}

impl Provider {
    /// Identifier used in settings
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::OpenAi => "openai",
            Self::Ollama => "ollama",
        }
    }

    /// Whether this provider needs `openai_api_key`
    #[must_use]
    pub fn requires_api_key(&self) -> bool {
        matches!(self, Self::OpenAi)
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Provider {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "openai" => Ok(Self::OpenAi),
            "ollama" => Ok(Self::Ollama),
            other => Err(Error::Configuration(format!(
                "Unsupported provider: {other}"
            ))),
        }
    }
}

impl Serialize for Provider {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for Provider {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let name = String::deserialize(deserializer)?;
        name.parse().map_err(serde::de::Error::custom)
    }
}

// ============================================================================
// Settings
// ============================================================================

/// Resolved configuration of a diagnoser
#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Credential for the hosted provider
    pub openai_api_key: Option<String>,
    /// Model name
    pub llm_model: String,
    /// Sampling temperature, clamped into [0, 1]
    pub temperature: f32,
    /// Backend family
    pub provider: Provider,
    /// Kind names to diagnose, plus the `UNHANDLED` / `ALL` sentinels
    #[serde(deserialize_with = "string_list")]
    pub handled_exceptions: Vec<String>,
    /// Kind names that always bypass diagnosis
    #[serde(deserialize_with = "string_list")]
    pub ignore_exceptions: Vec<String>,
    /// Kind name → instruction replacing the default prompt template
    #[serde(deserialize_with = "string_map")]
    pub custom_handlers: HashMap<String, String>,
    /// Base URL override for the hosted provider
    pub openai_base_url: Option<String>,
    /// Base URL of the Ollama server
    pub ollama_base_url: Option<String>,
    /// Backend HTTP timeout in seconds
    pub request_timeout_secs: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            openai_api_key: None,
            llm_model: openai::DEFAULT_MODEL.to_string(),
            temperature: DEFAULT_TEMPERATURE,
            provider: Provider::OpenAi,
            handled_exceptions: vec![crate::policy::UNHANDLED.to_string()],
            ignore_exceptions: Vec::new(),
            custom_handlers: HashMap::new(),
            openai_base_url: None,
            ollama_base_url: None,
            request_timeout_secs: DEFAULT_TIMEOUT_SECS,
        }
    }
}

impl fmt::Debug for Settings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Settings")
            .field(
                "openai_api_key",
                &self.openai_api_key.as_deref().map(mask_api_key),
            )
            .field("llm_model", &self.llm_model)
            .field("temperature", &self.temperature)
            .field("provider", &self.provider)
            .field("handled_exceptions", &self.handled_exceptions)
            .field("ignore_exceptions", &self.ignore_exceptions)
            .field("custom_handlers", &self.custom_handlers)
            .field("openai_base_url", &self.openai_base_url)
            .field("ollama_base_url", &self.ollama_base_url)
            .field("request_timeout_secs", &self.request_timeout_secs)
            .finish()
    }
}

/// Where [`Settings::resolve_from`] reads from
#[derive(Debug, Clone, Default)]
pub struct SettingsSources {
    /// JSON config file; a missing file is skipped
    pub config_file: Option<PathBuf>,
    /// Environment variables; `None` reads the process environment
    pub environment: Option<HashMap<String, String>>,
}

impl Settings {
    /// Settings for the hosted provider with the given key
    #[must_use]
    pub fn openai(api_key: impl Into<String>) -> Self {
        Self {
            openai_api_key: Some(api_key.into()),
            ..Self::default()
        }
    }

    /// Settings for a local Ollama server
    #[must_use]
    pub fn ollama(model: impl Into<String>) -> Self {
        Self {
            provider: Provider::Ollama,
            llm_model: model.into(),
            ..Self::default()
        }
    }

    /// Set the model
    #[must_use]
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.llm_model = model.into();
        self
    }

    /// Set the temperature (clamped on validation)
    #[must_use]
    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    /// Replace the handled kind list
    #[must_use]
    pub fn with_handled<I, S>(mut self, kinds: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.handled_exceptions = kinds.into_iter().map(Into::into).collect();
        self
    }

    /// Replace the ignored kind list
    #[must_use]
    pub fn with_ignored<I, S>(mut self, kinds: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.ignore_exceptions = kinds.into_iter().map(Into::into).collect();
        self
    }

    /// Add a custom instruction for one kind
    #[must_use]
    pub fn with_custom_handler(mut self, kind: impl Into<String>, prompt: impl Into<String>) -> Self {
        self.custom_handlers.insert(kind.into(), prompt.into());
        self
    }

    /// Set the Ollama base URL
    #[must_use]
    pub fn with_ollama_base_url(mut self, url: impl Into<String>) -> Self {
        self.ollama_base_url = Some(url.into());
        self
    }

    /// Resolve settings from the process environment and config file
    ///
    /// # Errors
    /// Returns `Error::Configuration` when a source is malformed or the
    /// selected provider lacks its credential
    pub fn resolve() -> Result<Self> {
        let config_file = std::env::var(CONFIG_FILE_ENV)
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(DEFAULT_CONFIG_FILE));

        Self::resolve_from(SettingsSources {
            config_file: Some(config_file),
            environment: None,
        })
        .inspect_err(|e| {
            error!("Error loading settings: {e}");
            error!("Make sure LLM_CATCHER_OPENAI_API_KEY is set in your environment if using OpenAI");
        })
    }

    /// Resolve settings from explicit sources
    ///
    /// # Errors
    /// Same as [`Settings::resolve`]
    pub fn resolve_from(sources: SettingsSources) -> Result<Self> {
        let mut environment = Environment::with_prefix(ENV_PREFIX).prefix_separator("_");
        if let Some(vars) = sources.environment {
            environment = environment.source(Some(vars.into_iter().collect()));
        }

        let mut settings: Settings = Config::builder()
            .add_source(environment)
            .build()?
            .try_deserialize()?;

        if let Some(path) = sources.config_file {
            settings = settings.overlay_file(&path)?;
        }

        settings.validate()
    }

    /// Defaults overlaid with one JSON file (environment ignored)
    ///
    /// # Errors
    /// Returns `Error::Configuration` if the file is missing or malformed
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(Error::Configuration(format!(
                "config file not found: {}",
                path.display()
            )));
        }
        Self::default().overlay_file(path)?.validate()
    }

    fn overlay_file(self, path: &Path) -> Result<Self> {
        let raw = match std::fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                warn!(
                    path = %path.display(),
                    "Config file not found, loading settings from environment"
                );
                return Ok(self);
            }
            Err(e) => {
                return Err(Error::Configuration(format!(
                    "failed to read {}: {e}",
                    path.display()
                )))
            }
        };

        let patch: SettingsPatch = serde_json::from_str(&raw).map_err(|e| {
            Error::Configuration(format!("invalid config file {}: {e}", path.display()))
        })?;
        debug!(path = %path.display(), "Settings loaded from config file");
        Ok(patch.apply(self))
    }

    /// Clamp, substitute and check the settings
    ///
    /// # Errors
    /// Returns `Error::Configuration` when the provider needs a key and none
    /// is set
    pub fn validate(self) -> Result<Self> {
        let settings = self.normalized();

        let has_key = settings
            .openai_api_key
            .as_deref()
            .is_some_and(|key| !key.trim().is_empty());
        if settings.provider.requires_api_key() && !has_key {
            return Err(Error::Configuration(
                "OpenAI API key must be provided when using OpenAI as the provider".to_string(),
            ));
        }

        Ok(settings)
    }

    /// Clamp the temperature and substitute unknown hosted models
    ///
    /// Unlike [`Settings::validate`] this never fails; it is what a diagnoser
    /// with an injected backend applies.
    #[must_use]
    pub fn normalized(mut self) -> Self {
        self.temperature = clamp_temperature(self.temperature);
        self.llm_model = validate_model(self.provider, &self.llm_model);
        self
    }
}

/// Clamp into [0, 1]; NaN falls back to the default
#[must_use]
pub fn clamp_temperature(value: f32) -> f32 {
    if value.is_nan() {
        DEFAULT_TEMPERATURE
    } else {
        value.clamp(0.0, 1.0)
    }
}

/// Substitute unknown hosted models with a safe default
///
/// Never fails: an unknown model on the hosted provider is replaced (with a
/// warning), any model is accepted for Ollama.
#[must_use]
pub fn validate_model(provider: Provider, model: &str) -> String {
    if provider == Provider::OpenAi && !openai::MODELS.contains(&model) {
        warn!(
            "Invalid model {model} for OpenAI, falling back to {}",
            openai::FALLBACK_MODEL
        );
        return openai::FALLBACK_MODEL.to_string();
    }
    model.to_string()
}

// ============================================================================
// File layer
// ============================================================================

#[derive(Debug, Default, Deserialize)]
struct SettingsPatch {
    openai_api_key: Option<String>,
    llm_model: Option<String>,
    temperature: Option<f32>,
    provider: Option<Provider>,
    #[serde(default, deserialize_with = "opt_string_list")]
    handled_exceptions: Option<Vec<String>>,
    #[serde(default, deserialize_with = "opt_string_list")]
    ignore_exceptions: Option<Vec<String>>,
    #[serde(default, deserialize_with = "opt_string_map")]
    custom_handlers: Option<HashMap<String, String>>,
    openai_base_url: Option<String>,
    ollama_base_url: Option<String>,
    request_timeout_secs: Option<u64>,
}

impl SettingsPatch {
    fn apply(self, mut base: Settings) -> Settings {
        if let Some(v) = self.openai_api_key {
            base.openai_api_key = Some(v);
        }
        if let Some(v) = self.llm_model {
            base.llm_model = v;
        }
        if let Some(v) = self.temperature {
            base.temperature = v;
        }
        if let Some(v) = self.provider {
            base.provider = v;
        }
        if let Some(v) = self.handled_exceptions {
            base.handled_exceptions = v;
        }
        if let Some(v) = self.ignore_exceptions {
            base.ignore_exceptions = v;
        }
        if let Some(v) = self.custom_handlers {
            base.custom_handlers = v;
        }
        if let Some(v) = self.openai_base_url {
            base.openai_base_url = Some(v);
        }
        if let Some(v) = self.ollama_base_url {
            base.ollama_base_url = Some(v);
        }
        if let Some(v) = self.request_timeout_secs {
            base.request_timeout_secs = v;
        }
        base
    }
}

// ============================================================================
// Lenient field formats
// ============================================================================

/// A list given as an array or as one comma-separated string
#[derive(Deserialize)]
#[serde(untagged)]
enum StringOrList {
    One(String),
    Many(Vec<String>),
}

impl From<StringOrList> for Vec<String> {
    fn from(value: StringOrList) -> Self {
        match value {
            StringOrList::One(joined) => joined
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect(),
            StringOrList::Many(items) => items,
        }
    }
}

/// A map given as an object or as a JSON-encoded string
#[derive(Deserialize)]
#[serde(untagged)]
enum MapOrJson {
    Map(HashMap<String, String>),
    Json(String),
}

impl TryFrom<MapOrJson> for HashMap<String, String> {
    type Error = serde_json::Error;

    fn try_from(value: MapOrJson) -> std::result::Result<Self, Self::Error> {
        match value {
            MapOrJson::Map(map) => Ok(map),
            MapOrJson::Json(raw) if raw.trim().is_empty() => Ok(HashMap::new()),
            MapOrJson::Json(raw) => serde_json::from_str(&raw),
        }
    }
}

fn string_list<'de, D: Deserializer<'de>>(d: D) -> std::result::Result<Vec<String>, D::Error> {
    StringOrList::deserialize(d).map(Into::into)
}

fn opt_string_list<'de, D: Deserializer<'de>>(
    d: D,
) -> std::result::Result<Option<Vec<String>>, D::Error> {
    Option::<StringOrList>::deserialize(d).map(|v| v.map(Into::into))
}

fn string_map<'de, D: Deserializer<'de>>(
    d: D,
) -> std::result::Result<HashMap<String, String>, D::Error> {
    MapOrJson::deserialize(d)?
        .try_into()
        .map_err(serde::de::Error::custom)
}

fn opt_string_map<'de, D: Deserializer<'de>>(
    d: D,
) -> std::result::Result<Option<HashMap<String, String>>, D::Error> {
    match Option::<MapOrJson>::deserialize(d)? {
        Some(value) => value.try_into().map(Some).map_err(serde::de::Error::custom),
        None => Ok(None),
    }
}
