use crate::error::{RagError, Result, Stage};
use async_trait::async_trait;
use lazy_static::lazy_static;
use regex::Regex;
use rustc_hash::{FxHashSet, FxHasher};
use serde::{Deserialize, Serialize};
use std::hash::{Hash, Hasher};
use unicode_normalization::UnicodeNormalization;

/// Maps text to fixed-dimension vectors, one per input, in input order.
#[async_trait]
pub trait Embedder: Send + Sync {
    fn model_id(&self) -> &str;
    async fn embed(&self, texts: &[String]) -> anyhow::Result<Vec<Vec<f32>>>;
}

/// Runs `embedder` and checks that every vector shares one dimension.
///
/// When `expected_dim` is given (querying an existing index) the batch must
/// match it as well.
pub async fn embed_checked(
    embedder: &dyn Embedder,
    texts: &[String],
    expected_dim: Option<usize>,
) -> Result<Vec<Vec<f32>>> {
    if texts.is_empty() {
        return Err(RagError::EmptyInput("no text to embed".into()));
    }

    let vectors = embedder
        .embed(texts)
        .await
        .map_err(|e| RagError::collaborator(Stage::Embed, e))?;

    if vectors.len() != texts.len() {
        return Err(RagError::collaborator(
            Stage::Embed,
            anyhow::anyhow!(
                "embedder returned {} vectors for {} inputs",
                vectors.len(),
                texts.len()
            ),
        ));
    }

    let dim = expected_dim.unwrap_or(vectors[0].len());
    if dim == 0 {
        return Err(RagError::EmptyInput("embedder returned empty vectors".into()));
    }
    if let Some(bad) = vectors.iter().find(|v| v.len() != dim) {
        return Err(RagError::DimensionMismatch {
            expected: dim,
            actual: bad.len(),
        });
    }

    Ok(vectors)
}

/// Offline embedder that hashes normalized word tokens into `dim` buckets.
///
/// Seedless hashing keeps vectors stable across processes, which the on-disk
/// cache depends on.
pub struct HashingEmbedder {
    dim: usize,
    model_id: String,
}

impl HashingEmbedder {
    /// `dim` is raised to 1 if zero.
    pub fn new(dim: usize) -> Self {
        let dim = dim.max(1);
        HashingEmbedder {
            dim,
            model_id: format!("hashing-{dim}"),
        }
    }

    fn tokenize(&self, text: &str) -> Vec<String> {
        lazy_static! {
            static ref STOP_WORDS: FxHashSet<&'static str> = {
                let words = vec![
                    "a", "an", "and", "are", "as", "at", "be", "by", "for", "from",
                    "has", "he", "in", "is", "it", "its", "of", "on", "that", "the",
                    "to", "was", "were", "will", "with", "what", "which", "who",
                ];
                words.into_iter().collect()
            };
            static ref NON_WORD: Regex = Regex::new(r"[^\w\s]").expect("valid regex");
        }

        let text = text.nfc().collect::<String>().to_lowercase();
        let text = NON_WORD.replace_all(&text, " ");

        text.split_whitespace()
            .filter(|&token| !STOP_WORDS.contains(token))
            .map(stem)
            .collect()
    }

    fn embed_one(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.dim];
        for token in self.tokenize(text) {
            let mut hasher = FxHasher::default();
            token.hash(&mut hasher);
            let h = hasher.finish();
            let bucket = (h % self.dim as u64) as usize;
            // top bit picks the sign so collisions tend to cancel out
            let sign = if h >> 63 == 0 { 1.0 } else { -1.0 };
            vector[bucket] += sign;
        }

        let norm = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            vector.iter_mut().for_each(|x| *x /= norm);
        }
        vector
    }
}

/// Strips a plural "s" so "apples" and "apple" land in the same bucket.
fn stem(token: &str) -> String {
    match token.strip_suffix('s') {
        Some(stem) if stem.len() > 2 && !stem.ends_with('s') => stem.to_string(),
        _ => token.to_string(),
    }
}

#[async_trait]
impl Embedder for HashingEmbedder {
    fn model_id(&self) -> &str {
        &self.model_id
    }

    async fn embed(&self, texts: &[String]) -> anyhow::Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| self.embed_one(t)).collect())
    }
}

#[derive(Serialize)]
struct EmbedRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Deserialize)]
struct EmbedResponse {
    embeddings: Vec<Vec<f32>>,
}

/// Embedder backed by an Ollama server's `/api/embed` endpoint.
pub struct OllamaEmbedder {
    client: reqwest::Client,
    url: String,
    model: String,
}

impl OllamaEmbedder {
    pub fn new(url: impl Into<String>, model: impl Into<String>) -> Self {
        OllamaEmbedder {
            client: reqwest::Client::new(),
            url: url.into().trim_end_matches('/').to_string(),
            model: model.into(),
        }
    }
}

#[async_trait]
impl Embedder for OllamaEmbedder {
    fn model_id(&self) -> &str {
        &self.model
    }

    async fn embed(&self, texts: &[String]) -> anyhow::Result<Vec<Vec<f32>>> {
        let response = self
            .client
            .post(format!("{}/api/embed", self.url))
            .json(&EmbedRequest {
                model: &self.model,
                input: texts,
            })
            .send()
            .await?
            .error_for_status()?;

        let body: EmbedResponse = response.json().await?;
        Ok(body.embeddings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct RaggedEmbedder;

    #[async_trait]
    impl Embedder for RaggedEmbedder {
        fn model_id(&self) -> &str {
            "ragged"
        }

        async fn embed(&self, texts: &[String]) -> anyhow::Result<Vec<Vec<f32>>> {
            Ok(texts
                .iter()
                .enumerate()
                .map(|(i, _)| vec![1.0; 2 + i])
                .collect())
        }
    }

    struct FailingEmbedder;

    #[async_trait]
    impl Embedder for FailingEmbedder {
        fn model_id(&self) -> &str {
            "failing"
        }

        async fn embed(&self, _texts: &[String]) -> anyhow::Result<Vec<Vec<f32>>> {
            anyhow::bail!("model offline")
        }
    }

    #[tokio::test]
    async fn test_hashing_embedder_is_deterministic() -> anyhow::Result<()> {
        let embedder = HashingEmbedder::new(64);
        let texts = vec!["Apples are red fruits.".to_string()];
        let a = embedder.embed(&texts).await?;
        let b = HashingEmbedder::new(64).embed(&texts).await?;
        assert_eq!(a, b);
        assert_eq!(a[0].len(), 64);
        Ok(())
    }

    #[tokio::test]
    async fn test_hashing_embedder_normalizes() -> anyhow::Result<()> {
        let embedder = HashingEmbedder::new(32);
        let vectors = embedder
            .embed(&["Cars need fuel to run".to_string(), String::new()])
            .await?;
        let norm: f32 = vectors[0].iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
        assert!(vectors[1].iter().all(|&x| x == 0.0));
        Ok(())
    }

    #[tokio::test]
    async fn test_zero_dimension_is_clamped() -> anyhow::Result<()> {
        let embedder = HashingEmbedder::new(0);
        assert_eq!(embedder.model_id(), "hashing-1");
        let vectors = embedder.embed(&["Apples are red".to_string()]).await?;
        assert_eq!(vectors[0].len(), 1);
        Ok(())
    }

    #[test]
    fn test_tokenize_drops_stop_words_and_plurals() {
        let embedder = HashingEmbedder::new(8);
        let tokens = embedder.tokenize("What color are the Apples?");
        assert_eq!(tokens, vec!["color", "apple"]);
    }

    #[tokio::test]
    async fn test_embed_checked_rejects_mixed_dimensions() {
        let texts = vec!["a".to_string(), "b".to_string()];
        let err = embed_checked(&RaggedEmbedder, &texts, None).await.unwrap_err();
        assert!(matches!(
            err,
            RagError::DimensionMismatch { expected: 2, actual: 3 }
        ));
    }

    #[tokio::test]
    async fn test_embed_checked_enforces_expected_dimension() {
        let texts = vec!["query".to_string()];
        let err = embed_checked(&HashingEmbedder::new(16), &texts, Some(8))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            RagError::DimensionMismatch { expected: 8, actual: 16 }
        ));
    }

    #[tokio::test]
    async fn test_embed_checked_reports_stage() {
        let texts = vec!["x".to_string()];
        let err = embed_checked(&FailingEmbedder, &texts, None).await.unwrap_err();
        assert!(matches!(
            err,
            RagError::Collaborator { stage: Stage::Embed, .. }
        ));
    }
}
