//! # AI Sources
//!
//! Turns a resolved configuration into a ready-to-use [`ChatClient`]: the
//! vendor client for the selected provider, with the configured system and
//! tool prompts already accumulated.

use log::info;

use crate::Provider;
use crate::core::config::ResolvedConfig;
use crate::inference::{
    ChatClient, GeminiConfig, GeminiProvider, OpenAiProvider, OpenRouterProvider, ProviderError,
};

/// Builds the client for `config.provider`. Fails if no API key is configured.
pub fn build_client(config: &ResolvedConfig) -> Result<Box<dyn ChatClient>, ProviderError> {
    let api_key = config
        .api_key
        .clone()
        .filter(|key| !key.trim().is_empty())
        .ok_or_else(|| {
            ProviderError::Config(format!("no API key configured for {:?}", config.provider))
        })?;
    let base_url = Some(config.base_url.clone());

    let mut client: Box<dyn ChatClient> = match config.provider {
        Provider::Gemini => Box::new(GeminiProvider::new(
            api_key,
            base_url,
            GeminiConfig {
                thinking_budget: config.thinking_budget,
                safety_settings: config.safety_settings.clone(),
            },
        )),
        Provider::OpenAi => Box::new(OpenAiProvider::new(api_key, base_url)),
        Provider::OpenRouter => Box::new(OpenRouterProvider::new(
            api_key,
            base_url,
            config.attribution.clone(),
        )),
    };

    if let Some(prompt) = &config.system_prompt {
        client.add_system_prompt(prompt.clone());
    }
    if !config.tool_prompts.is_empty() {
        client.set_available_tools(config.tool_prompts.clone());
    }

    info!(
        "Built {} client: base_url={}, model={}, system_prompts={}, tool_prompts={}",
        client.name(),
        config.base_url,
        config.model_name,
        client.prompts().system_prompts().len(),
        client.prompts().tool_prompts().len()
    );
    Ok(client)
}
