//! Static provider specs and model→provider matching.
//!
//! Matching order: explicit keyword in the model name, then key-prefix
//! detection, then the configured gateway as a fallback. A provider counts
//! as configured if its config carries an API key or its env var is set
//! (local providers need neither).

use std::collections::HashMap;

use aisbot_core::config::ProviderConfig;

/// Static description of one LLM backend.
#[derive(Clone, Debug)]
pub struct ProviderSpec {
    /// Config-table name (e.g. `"deepseek"`).
    pub name: &'static str,
    /// Lowercase substrings matched against model names.
    pub keywords: &'static [&'static str],
    /// Environment variable holding the API key.
    pub env_key: &'static str,
    /// Human-readable name for logs.
    pub display_name: &'static str,
    /// Prefix prepended to model names for gateway routing.
    pub prefix: Option<&'static str>,
    /// Prefixes that suppress re-prefixing when already present.
    pub skip_prefixes: &'static [&'static str],
    /// Gateways are the fallback when nothing matches directly.
    pub is_gateway: bool,
    /// Local providers (vLLM) need no API key.
    pub is_local: bool,
    /// Auto-detect by API key prefix (e.g. `sk-or-`).
    pub detect_by_key_prefix: Option<&'static str>,
    /// Default API base when the config sets none.
    pub default_api_base: Option<&'static str>,
}

/// Supported backends, in matching priority order.
pub static PROVIDERS: &[ProviderSpec] = &[
    ProviderSpec {
        name: "openrouter",
        keywords: &["openrouter"],
        env_key: "OPENROUTER_API_KEY",
        display_name: "OpenRouter",
        prefix: Some("openrouter"),
        skip_prefixes: &[],
        is_gateway: true,
        is_local: false,
        detect_by_key_prefix: Some("sk-or-"),
        default_api_base: Some("https://openrouter.ai/api/v1"),
    },
    ProviderSpec {
        name: "anthropic",
        keywords: &["anthropic", "claude"],
        env_key: "ANTHROPIC_API_KEY",
        display_name: "Anthropic",
        prefix: None,
        skip_prefixes: &[],
        is_gateway: false,
        is_local: false,
        detect_by_key_prefix: None,
        default_api_base: Some("https://api.anthropic.com/v1"),
    },
    ProviderSpec {
        name: "openai",
        keywords: &["openai", "gpt"],
        env_key: "OPENAI_API_KEY",
        display_name: "OpenAI",
        prefix: None,
        skip_prefixes: &[],
        is_gateway: false,
        is_local: false,
        detect_by_key_prefix: None,
        default_api_base: Some("https://api.openai.com/v1"),
    },
    ProviderSpec {
        name: "deepseek",
        keywords: &["deepseek"],
        env_key: "DEEPSEEK_API_KEY",
        display_name: "DeepSeek",
        prefix: None,
        skip_prefixes: &["deepseek/"],
        is_gateway: false,
        is_local: false,
        detect_by_key_prefix: None,
        default_api_base: Some("https://api.deepseek.com/v1"),
    },
    ProviderSpec {
        name: "groq",
        keywords: &["groq", "llama", "mixtral"],
        env_key: "GROQ_API_KEY",
        display_name: "Groq",
        prefix: None,
        skip_prefixes: &[],
        is_gateway: false,
        is_local: false,
        detect_by_key_prefix: Some("gsk_"),
        default_api_base: Some("https://api.groq.com/openai/v1"),
    },
    ProviderSpec {
        name: "vllm",
        keywords: &["vllm"],
        env_key: "VLLM_API_KEY",
        display_name: "vLLM",
        prefix: None,
        skip_prefixes: &["vllm/"],
        is_gateway: false,
        is_local: true,
        detect_by_key_prefix: None,
        default_api_base: Some("http://127.0.0.1:8000/v1"),
    },
];

/// Whether a spec is usable with the given config (key in config or env,
/// or no key required at all).
fn is_configured(spec: &ProviderSpec, config: Option<&ProviderConfig>) -> bool {
    if spec.is_local {
        return true;
    }
    if config.map(|c| c.is_configured()).unwrap_or(false) {
        return true;
    }
    std::env::var(spec.env_key).map(|v| !v.is_empty()).unwrap_or(false)
}

/// Match a model name to a provider spec, given the configured backends.
///
/// Returns the spec plus the effective config (possibly defaulted, with the
/// env key filled in).
pub fn find_spec(
    model: &str,
    configs: &HashMap<String, ProviderConfig>,
) -> Option<(&'static ProviderSpec, ProviderConfig)> {
    let model_lower = model.to_lowercase();

    // 1) Keyword match against the model name.
    for spec in PROVIDERS {
        let keyword_hit = spec.keywords.iter().any(|k| model_lower.contains(k));
        if keyword_hit && is_configured(spec, configs.get(spec.name)) {
            return Some((spec, effective_config(spec, configs)));
        }
    }

    // 2) Key-prefix detection on configured keys.
    for spec in PROVIDERS {
        if let Some(prefix) = spec.detect_by_key_prefix {
            if let Some(config) = configs.get(spec.name) {
                if config.api_key.starts_with(prefix) {
                    return Some((spec, effective_config(spec, configs)));
                }
            }
        }
    }

    // 3) Configured gateway as fallback.
    for spec in PROVIDERS {
        if spec.is_gateway && is_configured(spec, configs.get(spec.name)) {
            return Some((spec, effective_config(spec, configs)));
        }
    }

    None
}

fn effective_config(
    spec: &'static ProviderSpec,
    configs: &HashMap<String, ProviderConfig>,
) -> ProviderConfig {
    let mut config = configs.get(spec.name).cloned().unwrap_or_default();
    if config.api_key.is_empty() {
        if let Ok(key) = std::env::var(spec.env_key) {
            config.api_key = key;
        }
    }
    config
}

/// Apply gateway prefix routing to a model name.
pub fn resolve_model_name(model: &str, spec: &ProviderSpec) -> String {
    let Some(prefix) = spec.prefix else {
        return model.to_string();
    };
    if spec
        .skip_prefixes
        .iter()
        .any(|skip| model.starts_with(skip))
        || model.starts_with(&format!("{prefix}/"))
    {
        return model.to_string();
    }
    format!("{prefix}/{model}")
}
