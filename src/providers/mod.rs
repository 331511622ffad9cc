//! Provider subsystem for model inference backends.
//!
//! Every provider implements the [`Provider`] trait defined in [`traits`] and
//! is registered in [`create_provider`] by its canonical string key. All
//! currently supported backends speak the OpenAI-compatible wire format and
//! share [`compatible::OpenAiCompatibleProvider`].

pub mod compatible;
#[cfg(test)]
pub(crate) mod scripted;
pub mod traits;

pub use compatible::OpenAiCompatibleProvider;
pub use traits::{ChatMessage, FragmentStream, Provider, ProviderError, StreamFragment};

use std::sync::Arc;

const MAX_API_ERROR_CHARS: usize = 200;

fn is_secret_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | ':')
}

fn token_end(input: &str, from: usize) -> usize {
    let mut end = from;
    for (i, c) in input[from..].char_indices() {
        if is_secret_char(c) {
            end = from + i + c.len_utf8();
        } else {
            break;
        }
    }
    end
}

/// Scrub known secret-like token prefixes from provider error strings.
///
/// Redacts tokens with prefixes like `sk-` (OpenAI, DeepSeek) and `Bearer `.
pub fn scrub_secret_patterns(input: &str) -> String {
    const PREFIXES: [&str; 3] = ["sk-", "Bearer ", "api_key="];

    let mut scrubbed = input.to_string();

    for prefix in PREFIXES {
        let mut search_from = 0;
        loop {
            let Some(rel) = scrubbed[search_from..].find(prefix) else {
                break;
            };

            let start = search_from + rel;
            let content_start = start + prefix.len();
            let end = token_end(&scrubbed, content_start);

            if end == content_start {
                search_from = content_start;
                continue;
            }

            scrubbed.replace_range(start..end, "[REDACTED]");
            search_from = start + "[REDACTED]".len();
        }
    }

    scrubbed
}

/// Sanitize API error text by scrubbing secrets and truncating length.
pub fn sanitize_api_error(input: &str) -> String {
    let scrubbed = scrub_secret_patterns(input);

    if scrubbed.chars().count() <= MAX_API_ERROR_CHARS {
        return scrubbed;
    }

    let mut end = MAX_API_ERROR_CHARS;
    while end > 0 && !scrubbed.is_char_boundary(end) {
        end -= 1;
    }

    format!("{}...", &scrubbed[..end])
}

/// Build a sanitized provider error from a failed HTTP response.
pub async fn api_error(provider: &str, response: reqwest::Response) -> ProviderError {
    let status = response.status().as_u16();
    let body = response
        .text()
        .await
        .unwrap_or_else(|_| "<failed to read provider error body>".to_string());
    ProviderError::Open {
        provider: provider.to_string(),
        status,
        body: sanitize_api_error(&body),
    }
}

fn non_empty_env(var: &str) -> Option<String> {
    std::env::var(var)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

/// Resolve API key for a provider from config and environment variables.
fn resolve_provider_credential(name: &str, credential_override: Option<&str>) -> Option<String> {
    if let Some(raw_override) = credential_override {
        let trimmed_override = raw_override.trim();
        if !trimmed_override.is_empty() {
            return Some(trimmed_override.to_owned());
        }
    }

    let provider_env_candidates: &[&str] = match name {
        "openai" => &["OPENAI_API_KEY"],
        "deepseek" => &["DEEPSEEK_API_KEY"],
        _ => &[],
    };

    provider_env_candidates
        .iter()
        .chain(["AI_MODEL_KEY", "FLORENTINE_API_KEY", "API_KEY"].iter())
        .find_map(|var| non_empty_env(var))
}

/// Factory: create the right provider from config.
///
/// `api_url` overrides the provider's default base URL. `custom:<url>` names
/// any other OpenAI-compatible endpoint.
pub fn create_provider(
    name: &str,
    api_key: Option<&str>,
    api_url: Option<&str>,
) -> anyhow::Result<Arc<dyn Provider>> {
    let name = name.trim();
    let api_url = api_url.map(str::trim).filter(|url| !url.is_empty());

    let (canonical, default_url) = if let Some(url) = name.strip_prefix("custom:") {
        if url.trim().is_empty() {
            anyhow::bail!("Custom provider requires a URL, e.g. \"custom:http://localhost:8080/v1\"");
        }
        ("custom", url.trim().to_string())
    } else {
        match list_providers()
            .into_iter()
            .find(|p| p.name == name || p.aliases.iter().any(|alias| *alias == name))
        {
            Some(info) => (info.name, info.base_url.to_string()),
            None => anyhow::bail!(
                "Unknown provider: {name}. Supported: openai, deepseek, custom:<URL>."
            ),
        }
    };

    let key = resolve_provider_credential(canonical, api_key);
    let base_url = api_url.map_or(default_url, ToString::to_string);

    tracing::debug!(provider = canonical, base_url = %base_url, has_key = key.is_some(), "Provider created");

    Ok(Arc::new(OpenAiCompatibleProvider::new(
        canonical,
        &base_url,
        key.as_deref(),
    )))
}

/// Information about a supported provider for display purposes.
pub struct ProviderInfo {
    /// Canonical name used in config (e.g. `"deepseek"`)
    pub name: &'static str,
    /// Human-readable display name
    pub display_name: &'static str,
    /// Alternative names accepted in config
    pub aliases: &'static [&'static str],
    /// Default API base URL
    pub base_url: &'static str,
}

/// Return the list of all known providers for display in `florentine providers`.
pub fn list_providers() -> Vec<ProviderInfo> {
    vec![
        ProviderInfo {
            name: "deepseek",
            display_name: "DeepSeek",
            aliases: &[],
            base_url: "https://api.deepseek.com",
        },
        ProviderInfo {
            name: "openai",
            display_name: "OpenAI",
            aliases: &["gpt"],
            base_url: "https://api.openai.com/v1",
        },
    ]
}
