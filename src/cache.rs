//! Fingerprint-keyed cache of built indexes.
//!
//! Callers pass a key that already covers the document and the settings its
//! index was built with. Entries live in a bounded in-memory LRU and on disk
//! as `<key>.index` plus `<key>.chunks`. Memory is checked first,
//! then disk, and only then is the document chunked and embedded.

use crate::embedder::{Embedder, embed_checked};
use crate::error::{RagError, Result};
use crate::utils::{ensure_dir, write_atomic};
use crate::vector_db::VectorIndex;
use rustc_hash::FxHashMap;
use std::future::Future;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, info, warn};

/// An index together with the chunks it was built from, position for position.
#[derive(Debug, Clone, PartialEq)]
pub struct CachedIndex {
    pub index: VectorIndex,
    pub chunks: Vec<String>,
}

impl CachedIndex {
    pub fn new(index: VectorIndex, chunks: Vec<String>) -> Result<Self> {
        if index.len() != chunks.len() {
            return Err(RagError::CacheCorrupt(format!(
                "index has {} vectors but there are {} chunks",
                index.len(),
                chunks.len()
            )));
        }
        Ok(CachedIndex { index, chunks })
    }
}

struct Lru {
    entries: FxHashMap<String, (u64, Arc<CachedIndex>)>,
    clock: u64,
}

impl Lru {
    fn get(&mut self, key: &str) -> Option<Arc<CachedIndex>> {
        self.clock += 1;
        let clock = self.clock;
        self.entries.get_mut(key).map(|(used, entry)| {
            *used = clock;
            entry.clone()
        })
    }

    fn insert(&mut self, key: String, entry: Arc<CachedIndex>, capacity: usize) {
        self.clock += 1;
        self.entries.insert(key, (self.clock, entry));
        while self.entries.len() > capacity {
            let oldest = self
                .entries
                .iter()
                .min_by_key(|(_, (used, _))| *used)
                .map(|(key, _)| key.clone());
            match oldest {
                Some(key) => {
                    debug!(fingerprint = %key, "evicting index from memory");
                    self.entries.remove(&key);
                }
                None => break,
            }
        }
    }
}

pub struct IndexCache {
    dir: PathBuf,
    capacity: usize,
    memory: Mutex<Lru>,
    in_flight: Mutex<FxHashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl IndexCache {
    pub fn new(dir: impl Into<PathBuf>, capacity: usize) -> Result<Self> {
        let dir = dir.into();
        ensure_dir(&dir)?;
        Ok(IndexCache {
            dir,
            capacity: capacity.max(1),
            memory: Mutex::new(Lru {
                entries: FxHashMap::default(),
                clock: 0,
            }),
            in_flight: Mutex::new(FxHashMap::default()),
        })
    }

    /// Number of entries held in memory.
    pub fn len(&self) -> usize {
        lock(&self.memory).entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn index_path(&self, fingerprint: &str) -> PathBuf {
        self.dir.join(format!("{fingerprint}.index"))
    }

    pub fn chunks_path(&self, fingerprint: &str) -> PathBuf {
        self.dir.join(format!("{fingerprint}.chunks"))
    }

    /// Looks an entry up in memory, then on disk.
    ///
    /// A corrupt disk entry is deleted and reported as a miss.
    pub async fn get(&self, fingerprint: &str) -> Result<Option<Arc<CachedIndex>>> {
        if let Some(entry) = lock(&self.memory).get(fingerprint) {
            debug!(fingerprint, "index cache hit (memory)");
            return Ok(Some(entry));
        }

        match self.load(fingerprint).await {
            Ok(Some(entry)) => {
                info!(fingerprint, chunks = entry.chunks.len(), "index cache hit (disk)");
                let entry = Arc::new(entry);
                lock(&self.memory).insert(fingerprint.to_string(), entry.clone(), self.capacity);
                Ok(Some(entry))
            }
            Ok(None) => Ok(None),
            Err(RagError::CacheCorrupt(reason)) => {
                warn!(fingerprint, %reason, "discarding corrupt cache entry");
                self.remove_files(fingerprint).await;
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    /// Persists an entry and makes it visible in memory.
    pub async fn put(&self, fingerprint: &str, entry: CachedIndex) -> Result<Arc<CachedIndex>> {
        let chunks_json = serde_json::to_vec(&entry.chunks).map_err(std::io::Error::from)?;
        // the index file marks the pair as complete, so it goes last
        write_atomic(&self.chunks_path(fingerprint), &chunks_json).await?;
        entry.index.persist(&self.index_path(fingerprint)).await?;

        let entry = Arc::new(entry);
        lock(&self.memory).insert(fingerprint.to_string(), entry.clone(), self.capacity);
        Ok(entry)
    }

    /// Returns the cached entry for `fingerprint`, building it on a miss.
    ///
    /// `chunk_source` and the embedder only run on a miss. Concurrent callers
    /// for the same fingerprint wait for a single build.
    pub async fn get_or_build<F, Fut>(
        &self,
        fingerprint: &str,
        embedder: &dyn Embedder,
        chunk_source: F,
    ) -> Result<Arc<CachedIndex>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Vec<String>>>,
    {
        if let Some(entry) = lock(&self.memory).get(fingerprint) {
            debug!(fingerprint, "index cache hit (memory)");
            return Ok(entry);
        }

        let gate = lock(&self.in_flight)
            .entry(fingerprint.to_string())
            .or_default()
            .clone();
        let _guard = gate.lock().await;

        let result = self.get_or_build_locked(fingerprint, embedder, chunk_source).await;

        let mut in_flight = lock(&self.in_flight);
        if in_flight
            .get(fingerprint)
            .is_some_and(|g| Arc::ptr_eq(g, &gate) && Arc::strong_count(g) <= 2)
        {
            in_flight.remove(fingerprint);
        }
        result
    }

    async fn get_or_build_locked<F, Fut>(
        &self,
        fingerprint: &str,
        embedder: &dyn Embedder,
        chunk_source: F,
    ) -> Result<Arc<CachedIndex>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Vec<String>>>,
    {
        if let Some(entry) = self.get(fingerprint).await? {
            return Ok(entry);
        }

        info!(fingerprint, "index cache miss, building");
        let chunks = chunk_source().await?;
        if chunks.is_empty() {
            return Err(RagError::EmptyInput("document produced no chunks".into()));
        }

        let embeddings = embed_checked(embedder, &chunks, None).await?;
        let index = VectorIndex::build(&embeddings)?;
        info!(
            fingerprint,
            chunks = chunks.len(),
            dim = index.dim(),
            model = embedder.model_id(),
            "built index"
        );
        self.put(fingerprint, CachedIndex::new(index, chunks)?).await
    }

    async fn load(&self, fingerprint: &str) -> Result<Option<CachedIndex>> {
        let index_path = self.index_path(fingerprint);
        if !tokio::fs::try_exists(&index_path).await? {
            return Ok(None);
        }

        let index = VectorIndex::load(&index_path).await?;
        let chunks_bytes = match tokio::fs::read(self.chunks_path(fingerprint)).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(RagError::CacheCorrupt("chunk list missing".into()));
            }
            Err(e) => return Err(e.into()),
        };
        let chunks: Vec<String> = serde_json::from_slice(&chunks_bytes)
            .map_err(|e| RagError::CacheCorrupt(format!("unreadable chunk list: {e}")))?;

        CachedIndex::new(index, chunks).map(Some)
    }

    async fn remove_files(&self, fingerprint: &str) {
        for path in [self.index_path(fingerprint), self.chunks_path(fingerprint)] {
            if let Err(e) = tokio::fs::remove_file(&path).await {
                if e.kind() != std::io::ErrorKind::NotFound {
                    warn!(path = %path.display(), error = %e, "failed to remove cache file");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedder::HashingEmbedder;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::tempdir;

    /// Counts embed calls and sleeps a little so concurrent builds overlap.
    struct CountingEmbedder {
        inner: HashingEmbedder,
        calls: AtomicUsize,
    }

    impl CountingEmbedder {
        fn new() -> Self {
            CountingEmbedder {
                inner: HashingEmbedder::new(16),
                calls: AtomicUsize::new(0),
            }
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Embedder for CountingEmbedder {
        fn model_id(&self) -> &str {
            "counting"
        }

        async fn embed(&self, texts: &[String]) -> anyhow::Result<Vec<Vec<f32>>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
            self.inner.embed(texts).await
        }
    }

    fn chunks(texts: &[&str]) -> Vec<String> {
        texts.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn test_builds_once_then_hits_memory() -> anyhow::Result<()> {
        let dir = tempdir()?;
        let cache = IndexCache::new(dir.path(), 4)?;
        let embedder = CountingEmbedder::new();

        let first = cache
            .get_or_build("fp1", &embedder, || async { Ok(chunks(&["one", "two"])) })
            .await?;
        let second = cache
            .get_or_build("fp1", &embedder, || async {
                Err(RagError::EmptyInput("chunk source ran on a cache hit".into()))
            })
            .await?;

        assert_eq!(embedder.calls(), 1);
        assert!(Arc::ptr_eq(&first, &second));
        assert!(cache.index_path("fp1").exists());
        assert!(cache.chunks_path("fp1").exists());
        Ok(())
    }

    #[tokio::test]
    async fn test_disk_entry_survives_new_cache() -> anyhow::Result<()> {
        let dir = tempdir()?;
        let embedder = CountingEmbedder::new();
        let built = {
            let cache = IndexCache::new(dir.path(), 4)?;
            cache
                .get_or_build("doc", &embedder, || async { Ok(chunks(&["alpha", "beta", "gamma"])) })
                .await?
        };

        let cache = IndexCache::new(dir.path(), 4)?;
        let loaded = cache
            .get_or_build("doc", &embedder, || async { Ok(Vec::new()) })
            .await?;

        assert_eq!(embedder.calls(), 1);
        assert_eq!(*loaded, *built);
        Ok(())
    }

    #[tokio::test]
    async fn test_corrupt_entry_is_rebuilt() -> anyhow::Result<()> {
        let dir = tempdir()?;
        let embedder = CountingEmbedder::new();
        {
            let cache = IndexCache::new(dir.path(), 4)?;
            cache
                .get_or_build("doc", &embedder, || async { Ok(chunks(&["alpha", "beta"])) })
                .await?;
        }
        // chunk list now disagrees with the index size
        std::fs::write(dir.path().join("doc.chunks"), br#"["alpha"]"#)?;

        let cache = IndexCache::new(dir.path(), 4)?;
        let entry = cache
            .get_or_build("doc", &embedder, || async { Ok(chunks(&["alpha", "beta"])) })
            .await?;

        assert_eq!(embedder.calls(), 2);
        assert_eq!(entry.chunks, chunks(&["alpha", "beta"]));
        let on_disk: Vec<String> = serde_json::from_slice(&std::fs::read(cache.chunks_path("doc"))?)?;
        assert_eq!(on_disk.len(), 2);
        Ok(())
    }

    #[tokio::test]
    async fn test_garbage_index_file_is_a_miss() -> anyhow::Result<()> {
        let dir = tempdir()?;
        std::fs::write(dir.path().join("doc.index"), b"garbage")?;
        let cache = IndexCache::new(dir.path(), 4)?;

        assert!(cache.get("doc").await?.is_none());
        assert!(!cache.index_path("doc").exists());
        Ok(())
    }

    #[tokio::test]
    async fn test_concurrent_requests_build_once() -> anyhow::Result<()> {
        let dir = tempdir()?;
        let cache = IndexCache::new(dir.path(), 4)?;
        let embedder = CountingEmbedder::new();

        let build = || {
            cache.get_or_build("same", &embedder, || async { Ok(chunks(&["x y z", "w"])) })
        };
        let (a, b, c) = tokio::join!(build(), build(), build());

        assert_eq!(embedder.calls(), 1);
        assert!(Arc::ptr_eq(&a?, &b?));
        assert_eq!(c?.chunks.len(), 2);
        Ok(())
    }

    #[tokio::test]
    async fn test_memory_is_bounded() -> anyhow::Result<()> {
        let dir = tempdir()?;
        let cache = IndexCache::new(dir.path(), 2)?;
        let embedder = HashingEmbedder::new(8);

        for fp in ["a", "b", "c"] {
            cache
                .get_or_build(fp, &embedder, || async move { Ok(vec![format!("doc {fp}")]) })
                .await?;
        }
        assert_eq!(cache.len(), 2);

        // "a" was evicted from memory but still loads from disk
        let a = cache.get("a").await?.expect("entry on disk");
        assert_eq!(a.chunks, vec!["doc a".to_string()]);
        assert_eq!(cache.len(), 2);
        Ok(())
    }

    #[tokio::test]
    async fn test_empty_chunk_source_is_rejected() -> anyhow::Result<()> {
        let dir = tempdir()?;
        let cache = IndexCache::new(dir.path(), 2)?;
        let err = cache
            .get_or_build("empty", &HashingEmbedder::new(8), || async { Ok(Vec::new()) })
            .await
            .unwrap_err();
        assert!(matches!(err, RagError::EmptyInput(_)));
        assert!(!cache.index_path("empty").exists());
        Ok(())
    }
}
