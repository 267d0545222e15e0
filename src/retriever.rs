use crate::cache::{CachedIndex, IndexCache};
use crate::chunker::split_into_chunks;
use crate::config::Config;
use crate::context::{AssembledContext, ContextAssembler};
use crate::embedder::{Embedder, embed_checked};
use crate::error::{RagError, Result, Stage};
use crate::extract::TextExtractor;
use crate::llm::Generator;
use crate::utils::{cache_key, fingerprint, fingerprint_with_pages};
use std::future::Future;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};

#[derive(Debug, Clone, PartialEq)]
pub struct RetrievedChunk {
    pub position: usize,
    pub distance: f32,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Retrieval {
    pub fingerprint: String,
    pub hits: Vec<RetrievedChunk>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Answer {
    pub fingerprint: String,
    pub text: String,
    /// False when no generator is configured and `text` is the context itself.
    pub generated: bool,
    pub context: AssembledContext,
    pub hits: Vec<RetrievedChunk>,
}

/// Drives chunking, the index cache, search, context assembly and generation
/// for one document and query at a time.
pub struct Retriever {
    cache: Arc<IndexCache>,
    embedder: Arc<dyn Embedder>,
    assembler: ContextAssembler,
    generator: Option<Arc<dyn Generator>>,
    max_words: usize,
    top_k: usize,
}

impl Retriever {
    pub fn new(
        cache: Arc<IndexCache>,
        embedder: Arc<dyn Embedder>,
        assembler: ContextAssembler,
        max_words: usize,
        top_k: usize,
    ) -> Self {
        Retriever {
            cache,
            embedder,
            assembler,
            generator: None,
            max_words,
            top_k,
        }
    }

    pub fn with_generator(mut self, generator: Arc<dyn Generator>) -> Self {
        self.generator = Some(generator);
        self
    }

    pub fn from_config(config: &Config, cache: Arc<IndexCache>) -> anyhow::Result<Self> {
        let assembler = ContextAssembler::new(config.token_counter()?, config.retrieval.budget_tokens);
        let retriever = Retriever::new(
            cache,
            config.embedder(),
            assembler,
            config.chunking.max_words,
            config.retrieval.top_k,
        );
        Ok(match config.generator()? {
            Some(generator) => retriever.with_generator(generator),
            None => retriever,
        })
    }

    /// Ranked chunks of `raw_text` for `query`, without generation.
    pub async fn retrieve(&self, raw_text: &str, query: &str) -> Result<Retrieval> {
        let fingerprint = fingerprint(raw_text.as_bytes());
        let entry = self.cached_text(&fingerprint, raw_text).await?;
        let hits = self.search(&entry, query).await?;
        Ok(Retrieval { fingerprint, hits })
    }

    /// Answers `query` against already-extracted text.
    pub async fn answer(&self, raw_text: &str, query: &str) -> Result<Answer> {
        let retrieval = self.retrieve(raw_text, query).await?;
        self.finish(retrieval, query).await
    }

    /// Answers `query` against a source file, extracting its text only when
    /// the file is not cached yet.
    pub async fn answer_file(
        &self,
        source: &Path,
        query: &str,
        max_pages: Option<usize>,
        extractor: &dyn TextExtractor,
    ) -> Result<Answer> {
        let bytes = tokio::fs::read(source).await?;
        let fingerprint = fingerprint_with_pages(&bytes, max_pages);
        let max_words = self.max_words;

        let entry = self
            .cached(&fingerprint, || async move {
                let text = extractor
                    .extract(source, max_pages)
                    .await
                    .map_err(|e| RagError::collaborator(Stage::Extract, e))?;
                Ok(split_into_chunks(&text, max_words))
            })
            .await?;
        let hits = self.search(&entry, query).await?;
        self.finish(Retrieval { fingerprint, hits }, query).await
    }

    async fn cached_text(&self, fingerprint: &str, raw_text: &str) -> Result<Arc<CachedIndex>> {
        let max_words = self.max_words;
        self.cached(fingerprint, || async move { Ok(split_into_chunks(raw_text, max_words)) })
            .await
    }

    /// Looks the document up under a key that also covers the chunk size and
    /// embedding model in use.
    async fn cached<F, Fut>(&self, fingerprint: &str, chunk_source: F) -> Result<Arc<CachedIndex>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Vec<String>>>,
    {
        let key = cache_key(fingerprint, self.max_words, self.embedder.model_id());
        self.cache
            .get_or_build(&key, self.embedder.as_ref(), chunk_source)
            .await
    }

    async fn search(&self, entry: &CachedIndex, query: &str) -> Result<Vec<RetrievedChunk>> {
        let query = query.trim();
        if query.is_empty() {
            return Err(RagError::EmptyInput("query is empty".into()));
        }

        let query_vectors = embed_checked(
            self.embedder.as_ref(),
            &[query.to_string()],
            Some(entry.index.dim()),
        )
        .await?;
        let hits = entry.index.search(&query_vectors[0], self.top_k)?;
        debug!(query, hits = hits.len(), "searched index");

        Ok(hits
            .into_iter()
            .map(|hit| RetrievedChunk {
                position: hit.position,
                distance: hit.distance,
                text: entry.chunks[hit.position].clone(),
            })
            .collect())
    }

    async fn finish(&self, retrieval: Retrieval, query: &str) -> Result<Answer> {
        let Retrieval { fingerprint, hits } = retrieval;
        let ranked: Vec<&str> = hits.iter().map(|h| h.text.as_str()).collect();
        let context = self.assembler.assemble(query.trim(), &ranked)?;

        let (text, generated) = match &self.generator {
            Some(generator) => {
                info!(tokens = context.tokens, chunks = context.chunks_used, "generating answer");
                let text = generator
                    .generate(&context.prompt)
                    .await
                    .map_err(|e| RagError::collaborator(Stage::Generate, e))?;
                (text, true)
            }
            None => (context.context.clone(), false),
        };

        Ok(Answer {
            fingerprint,
            text,
            generated,
            context,
            hits,
        })
    }
}
