use anyhow::{Result, anyhow};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LLMConfig {
    pub enabled: bool,
    pub url: String,
    pub model: String,
    pub max_tokens: usize,
    pub temperature: f32,
    pub top_p: f32,
    pub repeat_penalty: f32,
}

impl Default for LLMConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            url: "http://localhost:11434".to_string(),
            model: "flan-t5-base".to_string(),
            max_tokens: 300,
            temperature: 0.7,
            top_p: 0.9,
            repeat_penalty: 1.1,
        }
    }
}

/// Turns an assembled prompt into an answer.
#[async_trait]
pub trait Generator: Send + Sync {
    async fn generate(&self, prompt: &str) -> Result<String>;
}

#[derive(Serialize)]
struct GenerateOptions {
    num_predict: usize,
    temperature: f32,
    top_p: f32,
    repeat_penalty: f32,
}

#[derive(Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
    options: GenerateOptions,
}

#[derive(Deserialize)]
struct GenerateResponse {
    response: String,
}

/// Generator backed by an Ollama server's `/api/generate` endpoint.
pub struct OllamaGenerator {
    client: reqwest::Client,
    config: LLMConfig,
}

impl OllamaGenerator {
    pub fn new(config: LLMConfig) -> Result<Self> {
        if config.model.trim().is_empty() {
            return Err(anyhow!("LLM model name not set"));
        }
        Ok(OllamaGenerator {
            client: reqwest::Client::new(),
            config,
        })
    }

    fn request<'a>(&'a self, prompt: &'a str) -> GenerateRequest<'a> {
        GenerateRequest {
            model: &self.config.model,
            prompt,
            stream: false,
            options: GenerateOptions {
                num_predict: self.config.max_tokens,
                temperature: self.config.temperature,
                top_p: self.config.top_p,
                repeat_penalty: self.config.repeat_penalty,
            },
        }
    }
}

#[async_trait]
impl Generator for OllamaGenerator {
    async fn generate(&self, prompt: &str) -> Result<String> {
        if prompt.trim().is_empty() {
            return Err(anyhow!("Prompt cannot be empty"));
        }

        let url = format!("{}/api/generate", self.config.url.trim_end_matches('/'));
        let response = self
            .client
            .post(url)
            .json(&self.request(prompt))
            .send()
            .await?
            .error_for_status()?;

        let body: GenerateResponse = response.json().await?;
        Ok(body.response.trim().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_carries_sampling_parameters() -> Result<()> {
        let generator = OllamaGenerator::new(LLMConfig {
            model: "mistral".to_string(),
            max_tokens: 64,
            ..LLMConfig::default()
        })?;
        let body = serde_json::to_value(generator.request("Context:\nx\n\nQuestion: y\nAnswer:"))?;
        assert_eq!(body["model"], "mistral");
        assert_eq!(body["stream"], false);
        assert_eq!(body["options"]["num_predict"], 64);
        Ok(())
    }

    #[test]
    fn test_blank_model_is_rejected() {
        let config = LLMConfig {
            model: "  ".to_string(),
            ..LLMConfig::default()
        };
        assert!(OllamaGenerator::new(config).is_err());
    }

    #[tokio::test]
    async fn test_empty_prompt_is_rejected_before_any_request() -> Result<()> {
        let generator = OllamaGenerator::new(LLMConfig::default())?;
        assert!(generator.generate("   ").await.is_err());
        Ok(())
    }
}
