//! TOML configuration with defaults for every field.
//!
//! A missing file yields [`Config::default`]; sections may be partially
//! specified.

use crate::context::{TokenCounter, WordPieceCounter};
use crate::embedder::{Embedder, HashingEmbedder, OllamaEmbedder};
use crate::extract::CommandExtractor;
use crate::llm::{Generator, LLMConfig, OllamaGenerator};
use anyhow::{Result, anyhow, bail};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ChunkingConfig {
    pub max_words: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self { max_words: 500 }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RetrievalConfig {
    pub top_k: usize,
    pub budget_tokens: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: 3,
            budget_tokens: 512,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub dir: Option<PathBuf>,
    pub capacity: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            dir: None,
            capacity: 16,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingProvider {
    Hashing,
    Ollama,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    pub provider: EmbeddingProvider,
    pub dim: usize,
    pub model: String,
    pub url: String,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: EmbeddingProvider::Hashing,
            dim: 384,
            model: "all-minilm".to_string(),
            url: "http://localhost:11434".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct TokenizerConfig {
    /// HuggingFace `tokenizer.json`; requires the `hf-tokenizer` feature.
    pub path: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ExtractConfig {
    pub command: String,
    pub args: Vec<String>,
    pub max_pages: Option<usize>,
}

impl Default for ExtractConfig {
    fn default() -> Self {
        Self {
            command: "pdftotext".to_string(),
            args: vec!["-layout".to_string()],
            max_pages: Some(10),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub chunking: ChunkingConfig,
    pub retrieval: RetrievalConfig,
    pub cache: CacheConfig,
    pub embedding: EmbeddingConfig,
    pub llm: LLMConfig,
    pub tokenizer: TokenizerConfig,
    pub extract: ExtractConfig,
}

impl Config {
    pub fn from_toml(source: &str) -> Result<Self> {
        let config: Config =
            toml::from_str(source).map_err(|e| anyhow!("Invalid configuration: {}", e))?;
        config.validate()?;
        Ok(config)
    }

    /// Loads `path` if it exists, otherwise returns the defaults.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Config::default());
        }
        let source = std::fs::read_to_string(path)?;
        Self::from_toml(&source)
    }

    fn validate(&self) -> Result<()> {
        if self.chunking.max_words == 0 {
            bail!("chunking.max_words must be at least 1");
        }
        if self.retrieval.top_k == 0 {
            bail!("retrieval.top_k must be at least 1");
        }
        if self.cache.capacity == 0 {
            bail!("cache.capacity must be at least 1");
        }
        if self.embedding.dim == 0 {
            bail!("embedding.dim must be at least 1");
        }
        if self.extract.max_pages == Some(0) {
            bail!("extract.max_pages must be at least 1");
        }
        Ok(())
    }

    pub fn cache_dir(&self) -> Result<PathBuf> {
        if let Some(dir) = &self.cache.dir {
            return Ok(dir.clone());
        }
        let dir = dirs::cache_dir()
            .ok_or_else(|| anyhow!("Could not determine cache directory"))?
            .join("docqa")
            .join("index");
        Ok(dir)
    }

    pub fn embedder(&self) -> Arc<dyn Embedder> {
        match self.embedding.provider {
            EmbeddingProvider::Hashing => Arc::new(HashingEmbedder::new(self.embedding.dim)),
            EmbeddingProvider::Ollama => Arc::new(OllamaEmbedder::new(
                self.embedding.url.clone(),
                self.embedding.model.clone(),
            )),
        }
    }

    pub fn generator(&self) -> Result<Option<Arc<dyn Generator>>> {
        if !self.llm.enabled {
            return Ok(None);
        }
        Ok(Some(Arc::new(OllamaGenerator::new(self.llm.clone())?)))
    }

    pub fn token_counter(&self) -> Result<Arc<dyn TokenCounter>> {
        match &self.tokenizer.path {
            None => Ok(Arc::new(WordPieceCounter)),
            #[cfg(feature = "hf-tokenizer")]
            Some(path) => Ok(Arc::new(crate::context::HfTokenCounter::from_file(path)?)),
            #[cfg(not(feature = "hf-tokenizer"))]
            Some(path) => Err(anyhow!(
                "tokenizer {:?} configured but docqa was built without the hf-tokenizer feature",
                path
            )),
        }
    }

    pub fn extractor(&self) -> CommandExtractor {
        CommandExtractor::new(self.extract.command.clone(), self.extract.args.clone())
    }
}
