use crate::error::{RagError, Result, Stage};
use lazy_static::lazy_static;
use regex::Regex;
use std::sync::Arc;
use tracing::{debug, warn};

/// Estimates how many model tokens a piece of text occupies.
///
/// Implementations must be monotonic: appending text never lowers the count.
pub trait TokenCounter: Send + Sync {
    fn token_length(&self, text: &str) -> anyhow::Result<usize>;
}

/// Counts words and punctuation marks, a close stand-in for subword tokenizers
/// on English prose.
#[derive(Debug, Default, Clone, Copy)]
pub struct WordPieceCounter;

impl TokenCounter for WordPieceCounter {
    fn token_length(&self, text: &str) -> anyhow::Result<usize> {
        lazy_static! {
            static ref PIECE: Regex = Regex::new(r"\w+|[^\w\s]").expect("valid regex");
        }
        Ok(PIECE.find_iter(text).count())
    }
}

/// Counts tokens with a HuggingFace `tokenizer.json`, loaded once.
#[cfg(feature = "hf-tokenizer")]
pub struct HfTokenCounter {
    tokenizer: tokenizers::Tokenizer,
}

#[cfg(feature = "hf-tokenizer")]
impl HfTokenCounter {
    pub fn from_file(path: impl AsRef<std::path::Path>) -> anyhow::Result<Self> {
        let tokenizer = tokenizers::Tokenizer::from_file(path)
            .map_err(|e| anyhow::anyhow!("Failed to load tokenizer: {}", e))?;
        Ok(HfTokenCounter { tokenizer })
    }
}

#[cfg(feature = "hf-tokenizer")]
impl TokenCounter for HfTokenCounter {
    fn token_length(&self, text: &str) -> anyhow::Result<usize> {
        let encoding = self
            .tokenizer
            .encode(text, true)
            .map_err(|e| anyhow::anyhow!("Tokenization failed: {}", e))?;
        Ok(encoding.get_ids().len())
    }
}

/// The prompt still exceeded the budget after falling back to one chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BudgetOverflow {
    pub tokens: usize,
    pub budget: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AssembledContext {
    pub prompt: String,
    pub context: String,
    pub chunks_used: usize,
    pub tokens: usize,
    /// Set when the full retrieval set was dropped for the top chunk alone.
    pub truncated: bool,
    pub overflow: Option<BudgetOverflow>,
}

pub struct ContextAssembler {
    counter: Arc<dyn TokenCounter>,
    budget_tokens: usize,
}

impl ContextAssembler {
    pub fn new(counter: Arc<dyn TokenCounter>, budget_tokens: usize) -> Self {
        ContextAssembler {
            counter,
            budget_tokens,
        }
    }

    /// Builds the prompt from ranked chunks, dropping to the top chunk alone
    /// when the full prompt is over budget.
    ///
    /// The single-chunk prompt is used even if it is still over budget; the
    /// overflow is reported in the result, never as an error.
    pub fn assemble<S: AsRef<str>>(&self, query: &str, ranked_chunks: &[S]) -> Result<AssembledContext> {
        if ranked_chunks.is_empty() {
            return Err(RagError::EmptyInput("no retrieved chunks to assemble".into()));
        }

        let (context, prompt) = construct_prompt(query, ranked_chunks);
        let tokens = self.count(&prompt)?;
        debug!(tokens, budget = self.budget_tokens, chunks = ranked_chunks.len(), "assembled prompt");
        if tokens <= self.budget_tokens {
            return Ok(AssembledContext {
                prompt,
                context,
                chunks_used: ranked_chunks.len(),
                tokens,
                truncated: false,
                overflow: None,
            });
        }

        let (context, prompt, tokens, truncated) = if ranked_chunks.len() > 1 {
            warn!(
                tokens,
                budget = self.budget_tokens,
                "prompt over budget, keeping only the top chunk"
            );
            let (context, prompt) = construct_prompt(query, &ranked_chunks[..1]);
            let tokens = self.count(&prompt)?;
            (context, prompt, tokens, true)
        } else {
            (context, prompt, tokens, false)
        };

        let overflow = (tokens > self.budget_tokens).then(|| {
            warn!(tokens, budget = self.budget_tokens, "single-chunk prompt still over budget");
            BudgetOverflow {
                tokens,
                budget: self.budget_tokens,
            }
        });

        Ok(AssembledContext {
            prompt,
            context,
            chunks_used: 1,
            tokens,
            truncated,
            overflow,
        })
    }

    fn count(&self, text: &str) -> Result<usize> {
        self.counter
            .token_length(text)
            .map_err(|e| RagError::collaborator(Stage::Tokenize, e))
    }
}

fn construct_prompt<S: AsRef<str>>(query: &str, chunks: &[S]) -> (String, String) {
    let context = chunks
        .iter()
        .map(|c| c.as_ref())
        .collect::<Vec<_>>()
        .join("\n\n");
    let prompt = format!("Context:\n{context}\n\nQuestion: {query}\nAnswer:");
    (context, prompt)
}
