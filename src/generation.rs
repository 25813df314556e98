//! Generation (chat completion) collaborator.
//!
//! Defines the [`Generator`] trait and the `openai` / `gemini` chat
//! backends. The pipeline treats completions as opaque structured text —
//! schema validation happens in `extract` (episode records) and `annotate`
//! (annotation entries), never here.
//!
//! Backends share the retry/backoff contract documented in [`crate::embedding`].

use anyhow::{bail, Result};
use async_trait::async_trait;

use crate::config::GenerationConfig;
use crate::embedding::post_json_with_retry;

/// Capability interface for the generation collaborator.
///
/// Orchestration functions take `&dyn Generator` so tests can inject a
/// deterministic fake in place of a network backend.
#[async_trait]
pub trait Generator: Send + Sync {
    /// Model identifier (e.g. `"gpt-4o"`).
    fn model_name(&self) -> &str;
    /// Run one completion: system prompt + user prompt → raw response text.
    async fn complete(&self, system: &str, user: &str) -> Result<String>;
}

/// Create the appropriate [`Generator`] based on configuration.
///
/// | Config value | Backend | Credential |
/// |--------------|---------|------------|
/// | `"openai"` | [`OpenAiGenerator`] | `OPENAI_API_KEY` |
/// | `"gemini"` | [`GeminiGenerator`] | `GEMINI_API_KEY` |
pub fn create_generator(config: &GenerationConfig) -> Result<Box<dyn Generator>> {
    match config.provider.as_str() {
        "openai" => Ok(Box::new(OpenAiGenerator::new(config)?)),
        "gemini" => Ok(Box::new(GeminiGenerator::new(config)?)),
        other => bail!("Unknown generation provider: {}", other),
    }
}

fn require_env(var: &str) -> Result<String> {
    match std::env::var(var) {
        Ok(v) if !v.is_empty() => Ok(v),
        _ => bail!("{} environment variable not set", var),
    }
}

/// Chat backend using the OpenAI chat completions API.
pub struct OpenAiGenerator {
    model: String,
    temperature: f64,
    api_key: String,
    max_retries: u32,
    timeout_secs: u64,
}

impl OpenAiGenerator {
    pub fn new(config: &GenerationConfig) -> Result<Self> {
        Ok(Self {
            model: config.model.clone(),
            temperature: config.temperature,
            api_key: require_env("OPENAI_API_KEY")?,
            max_retries: config.max_retries,
            timeout_secs: config.timeout_secs,
        })
    }
}

#[async_trait]
impl Generator for OpenAiGenerator {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn complete(&self, system: &str, user: &str) -> Result<String> {
        let body = serde_json::json!({
            "model": self.model,
            "temperature": self.temperature,
            "messages": [
                { "role": "system", "content": system },
                { "role": "user", "content": user },
            ],
        });
        let json = post_json_with_retry(
            "https://api.openai.com/v1/chat/completions",
            Some(&self.api_key),
            &body,
            self.max_retries,
            self.timeout_secs,
        )
        .await?;

        json.get("choices")
            .and_then(|c| c.get(0))
            .and_then(|c| c.get("message"))
            .and_then(|m| m.get("content"))
            .and_then(|c| c.as_str())
            .map(|s| s.to_string())
            .ok_or_else(|| anyhow::anyhow!("Invalid chat response: missing message content"))
    }
}

/// Chat backend using the Gemini `generateContent` API.
pub struct GeminiGenerator {
    model: String,
    temperature: f64,
    api_key: String,
    max_retries: u32,
    timeout_secs: u64,
}

impl GeminiGenerator {
    pub fn new(config: &GenerationConfig) -> Result<Self> {
        Ok(Self {
            model: config.model.clone(),
            temperature: config.temperature,
            api_key: require_env("GEMINI_API_KEY")?,
            max_retries: config.max_retries,
            timeout_secs: config.timeout_secs,
        })
    }
}

#[async_trait]
impl Generator for GeminiGenerator {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn complete(&self, system: &str, user: &str) -> Result<String> {
        let body = serde_json::json!({
            "systemInstruction": { "parts": [{ "text": system }] },
            "contents": [{ "role": "user", "parts": [{ "text": user }] }],
            "generationConfig": { "temperature": self.temperature },
        });
        let url = format!(
            "https://generativelanguage.googleapis.com/v1beta/models/{}:generateContent?key={}",
            self.model, self.api_key
        );
        let json = post_json_with_retry(&url, None, &body, self.max_retries, self.timeout_secs)
            .await?;

        json.get("candidates")
            .and_then(|c| c.get(0))
            .and_then(|c| c.get("content"))
            .and_then(|c| c.get("parts"))
            .and_then(|p| p.get(0))
            .and_then(|p| p.get("text"))
            .and_then(|t| t.as_str())
            .map(|s| s.to_string())
            .ok_or_else(|| anyhow::anyhow!("Invalid Gemini response: missing candidate text"))
    }
}

/// Strip accidental markdown fences from a model response.
///
/// Models occasionally wrap structured output in ``` fences despite being
/// told not to; the fence lines carry no content, so they are removed
/// before parsing.
pub fn strip_fences(raw: &str) -> &str {
    let trimmed = raw.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    // Drop the rest of the fence line (e.g. "```json").
    let rest = match rest.find('\n') {
        Some(pos) => &rest[pos + 1..],
        None => return trimmed,
    };
    rest.strip_suffix("```").map(str::trim).unwrap_or(rest.trim())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strip_fences_plain() {
        assert_eq!(strip_fences("  [1, 2]  "), "[1, 2]");
    }

    #[test]
    fn test_strip_fences_json_fence() {
        assert_eq!(strip_fences("```json\n[1, 2]\n```"), "[1, 2]");
    }

    #[test]
    fn test_strip_fences_bare_fence() {
        assert_eq!(strip_fences("```\n{\"a\": 1}\n```"), "{\"a\": 1}");
    }

    #[test]
    fn test_strip_fences_unterminated() {
        assert_eq!(strip_fences("```json\n[1]"), "[1]");
    }
}
