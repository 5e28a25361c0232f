//! # Configuration
//!
//! Centralizes all settings with a clear override hierarchy:
//! defaults → config file → env vars → CLI flags.
//!
//! Config lives at `~/.aisource/config.toml`. If missing on first run, a
//! commented-out default is generated so users can discover all options.

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use crate::Provider;
use crate::inference::providers::gemini::{
    DEFAULT_GEMINI_BASE_URL, DEFAULT_GEMINI_MODEL, SafetySetting, UNBOUNDED_THINKING_BUDGET,
    default_safety_settings,
};
use crate::inference::providers::openai::{DEFAULT_OPENAI_BASE_URL, DEFAULT_OPENAI_MODEL};
use crate::inference::providers::openrouter::{
    DEFAULT_OPENROUTER_BASE_URL, DEFAULT_OPENROUTER_MODEL, OpenRouterAttribution,
};

// ============================================================================
// Config Structs (all fields Option<T> for sparse TOML)
// ============================================================================

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct AppConfig {
    #[serde(default)]
    pub general: GeneralConfig,
    #[serde(default)]
    pub gemini: GeminiSection,
    #[serde(default)]
    pub openai: OpenAiSection,
    #[serde(default)]
    pub openrouter: OpenRouterSection,
}

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct GeneralConfig {
    pub default_provider: Option<Provider>,
    pub default_model: Option<String>,
    pub system_prompt: Option<String>,
    pub system_prompt_file: Option<String>,
    /// Tool-description prompt files, relative to `~/.aisource/`.
    pub tool_prompt_files: Option<Vec<String>>,
    pub online_search: Option<bool>,
}

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct GeminiSection {
    pub api_key: Option<String>,
    pub base_url: Option<String>,
    pub thinking_budget: Option<i32>,
    pub safety_settings: Option<Vec<SafetySetting>>,
}

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct OpenAiSection {
    pub api_key: Option<String>,
    pub base_url: Option<String>,
}

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct OpenRouterSection {
    pub api_key: Option<String>,
    pub base_url: Option<String>,
    pub referer: Option<String>,
    pub title: Option<String>,
}

// ============================================================================
// Resolved Config (concrete values, no Options except secrets)
// ============================================================================

/// Everything needed to construct one AI source.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedConfig {
    pub provider: Provider,
    pub model_name: String,
    pub api_key: Option<String>,
    pub base_url: String,
    pub system_prompt: Option<String>,
    pub tool_prompts: Vec<String>,
    pub online_search: bool,
    pub thinking_budget: i32,
    pub safety_settings: Vec<SafetySetting>,
    pub attribution: OpenRouterAttribution,
}

/// Default base URL and model for a provider.
pub fn provider_defaults(provider: &Provider) -> (&'static str, &'static str) {
    match provider {
        Provider::Gemini => (DEFAULT_GEMINI_BASE_URL, DEFAULT_GEMINI_MODEL),
        Provider::OpenAi => (DEFAULT_OPENAI_BASE_URL, DEFAULT_OPENAI_MODEL),
        Provider::OpenRouter => (DEFAULT_OPENROUTER_BASE_URL, DEFAULT_OPENROUTER_MODEL),
    }
}

// ============================================================================
// Error Type
// ============================================================================

#[derive(Debug)]
pub enum ConfigError {
    Io(std::io::Error),
    Parse(toml::de::Error),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::Io(e) => write!(f, "config I/O error: {e}"),
            ConfigError::Parse(e) => write!(f, "config parse error: {e}"),
        }
    }
}

impl std::error::Error for ConfigError {}

// ============================================================================
// Loading
// ============================================================================

/// Returns `~/.aisource/`.
pub fn config_dir() -> Option<PathBuf> {
    dirs::home_dir().map(|h| h.join(".aisource"))
}

/// Returns the path to `~/.aisource/config.toml`.
pub fn config_path() -> Option<PathBuf> {
    config_dir().map(|d| d.join("config.toml"))
}

/// Load config from `~/.aisource/config.toml`.
///
/// If the file doesn't exist, generates a commented-out default and
/// returns `AppConfig::default()`. If it exists but is malformed,
/// returns `ConfigError::Parse`.
pub fn load_config() -> Result<AppConfig, ConfigError> {
    let path = match config_path() {
        Some(p) => p,
        None => {
            warn!("Could not determine home directory, using default config");
            return Ok(AppConfig::default());
        }
    };

    if !path.exists() {
        info!("No config file found, generating default at {}", path.display());
        generate_default_config(&path);
        return Ok(AppConfig::default());
    }

    load_config_from(&path)
}

/// Parses a config file at an explicit path.
pub fn load_config_from(path: &Path) -> Result<AppConfig, ConfigError> {
    let contents = fs::read_to_string(path).map_err(ConfigError::Io)?;
    let config: AppConfig = toml::from_str(&contents).map_err(ConfigError::Parse)?;
    info!("Loaded config from {}", path.display());
    debug!("Config: {:?}", redacted(&config));
    Ok(config)
}

/// Debug view of the config with API keys masked.
fn redacted(config: &AppConfig) -> String {
    let mask = |key: &Option<String>| key.as_ref().map(|_| "***");
    format!(
        "general={:?}, gemini(key={:?}, base_url={:?}), openai(key={:?}, base_url={:?}), openrouter(key={:?}, base_url={:?})",
        config.general,
        mask(&config.gemini.api_key),
        config.gemini.base_url,
        mask(&config.openai.api_key),
        config.openai.base_url,
        mask(&config.openrouter.api_key),
        config.openrouter.base_url,
    )
}

/// Generates a commented-out default config file at the given path.
fn generate_default_config(path: &Path) {
    let default_content = r#"# aisource configuration
# All settings are optional. Defaults are used for anything not specified.
# Override hierarchy: defaults → this file → env vars → CLI flags.

# [general]
# default_provider = "gemini"         # "gemini", "openai" or "openrouter"
# default_model = "gemini-2.5-pro"
# system_prompt = "You are a patient homework helper."
# system_prompt_file = "system.md"    # Path relative to ~/.aisource/
# tool_prompt_files = ["tools/mermaid.md", "tools/diagram.md"]
# online_search = false

# [gemini]
# api_key = "..."                     # Or set GEMINI_API_KEY env var
# base_url = "https://generativelanguage.googleapis.com"
# thinking_budget = -1                # -1 lets the model decide
#
# [[gemini.safety_settings]]
# category = "HARM_CATEGORY_HARASSMENT"
# threshold = "BLOCK_NONE"

# [openai]
# api_key = "sk-..."                  # Or set OPENAI_API_KEY env var
# base_url = "https://api.openai.com/v1"

# [openrouter]
# api_key = "sk-or-..."               # Or set OPENROUTER_API_KEY env var
# base_url = "https://openrouter.ai/api/v1"
# referer = "https://skidhw.serina.in"
# title = "Serina-chan Helper"
"#;

    if let Some(parent) = path.parent() {
        if let Err(e) = fs::create_dir_all(parent) {
            warn!("Failed to create config directory: {}", e);
            return;
        }
    }
    if let Err(e) = fs::write(path, default_content) {
        warn!("Failed to write default config: {}", e);
    }
}

// ============================================================================
// Resolution
// ============================================================================

/// Values coming from the command line. `None` means "not specified".
#[derive(Debug, Default, Clone)]
pub struct CliOverrides {
    pub provider: Option<Provider>,
    pub model: Option<String>,
    pub online_search: bool,
}

fn env(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn parse_provider(value: &str) -> Option<Provider> {
    match value.trim().to_lowercase().replace(['-', '_'], "").as_str() {
        "gemini" => Some(Provider::Gemini),
        "openai" => Some(Provider::OpenAi),
        "openrouter" => Some(Provider::OpenRouter),
        other => {
            warn!("Ignoring unknown provider '{}'", other);
            None
        }
    }
}

/// Resolve the final config by collapsing: defaults → config file → env vars → CLI.
pub fn resolve(config: &AppConfig, cli: &CliOverrides) -> ResolvedConfig {
    // Provider: CLI → env → config → default
    let provider = cli
        .provider
        .or_else(|| env("AISOURCE_PROVIDER").and_then(|p| parse_provider(&p)))
        .or(config.general.default_provider)
        .unwrap_or_default();

    let (default_base_url, default_model) = provider_defaults(&provider);

    // Model: CLI → env → config → provider default
    let model_name = cli
        .model
        .clone()
        .or_else(|| env("AISOURCE_MODEL"))
        .or_else(|| config.general.default_model.clone())
        .unwrap_or_else(|| default_model.to_string());

    // Key and base URL: env → config → default, from the selected provider's section
    let (key_var, url_var, section_key, section_url) = match provider {
        Provider::Gemini => (
            "GEMINI_API_KEY",
            "GEMINI_BASE_URL",
            &config.gemini.api_key,
            &config.gemini.base_url,
        ),
        Provider::OpenAi => (
            "OPENAI_API_KEY",
            "OPENAI_BASE_URL",
            &config.openai.api_key,
            &config.openai.base_url,
        ),
        Provider::OpenRouter => (
            "OPENROUTER_API_KEY",
            "OPENROUTER_BASE_URL",
            &config.openrouter.api_key,
            &config.openrouter.base_url,
        ),
    };
    let api_key = env(key_var).or_else(|| section_key.clone());
    let base_url = env(url_var)
        .or_else(|| section_url.clone())
        .unwrap_or_else(|| default_base_url.to_string());

    let default_attribution = OpenRouterAttribution::default();
    let attribution = OpenRouterAttribution {
        referer: config
            .openrouter
            .referer
            .clone()
            .unwrap_or(default_attribution.referer),
        title: config
            .openrouter
            .title
            .clone()
            .unwrap_or(default_attribution.title),
    };

    ResolvedConfig {
        provider,
        model_name,
        api_key,
        base_url,
        system_prompt: resolve_system_prompt(config),
        tool_prompts: resolve_tool_prompts(config),
        online_search: cli.online_search || config.general.online_search.unwrap_or(false),
        thinking_budget: config
            .gemini
            .thinking_budget
            .unwrap_or(UNBOUNDED_THINKING_BUDGET),
        safety_settings: config
            .gemini
            .safety_settings
            .clone()
            .unwrap_or_else(default_safety_settings),
        attribution,
    }
}

/// Reads a prompt file relative to `~/.aisource/`, returning trimmed non-empty contents.
fn read_prompt_file(file: &str) -> Option<String> {
    let path = config_dir()?.join(file);
    match fs::read_to_string(&path) {
        Ok(contents) => {
            let trimmed = contents.trim().to_string();
            if trimmed.is_empty() {
                warn!("Prompt file is empty: {}", path.display());
                return None;
            }
            info!("Loaded prompt from {}", path.display());
            Some(trimmed)
        }
        Err(e) => {
            warn!("Failed to read prompt file {}: {}", path.display(), e);
            None
        }
    }
}

/// Resolves the system prompt: inline wins over file. `None` means no system prompt.
fn resolve_system_prompt(config: &AppConfig) -> Option<String> {
    if let Some(ref prompt) = config.general.system_prompt {
        return Some(prompt.clone());
    }
    config
        .general
        .system_prompt_file
        .as_deref()
        .and_then(read_prompt_file)
}

/// Loads every configured tool prompt file, skipping unreadable ones.
fn resolve_tool_prompts(config: &AppConfig) -> Vec<String> {
    config
        .general
        .tool_prompt_files
        .iter()
        .flatten()
        .filter_map(|file| read_prompt_file(file))
        .collect()
}
