//! Embedding service trait and mock implementation.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use sha2::{Digest, Sha256};

use crate::errors::{EmbeddingError, Result};
use crate::normalize::l2_normalize;

/// Trait for embedding text into vectors.
#[async_trait]
pub trait EmbeddingService: Send + Sync {
    /// Embed a batch of texts; output order matches input order.
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    /// Embed a single text (default: calls `embed` with one item).
    async fn embed_single(&self, text: &str) -> Result<Vec<f32>> {
        let results = self.embed(&[text.to_string()]).await?;
        let got = results.len();
        results
            .into_iter()
            .next()
            .ok_or(EmbeddingError::CountMismatch {
                expected: 1,
                actual: got,
            })
    }

    /// Output embedding dimensions.
    fn dimensions(&self) -> usize;
}

/// Mock embedding service for testing.
///
/// Unpinned texts hash to deterministic unit vectors via SHA-256. Tests that
/// need controlled similarity pin explicit vectors with [`pin`](Self::pin).
pub struct MockEmbeddingService {
    dims: usize,
    ready: AtomicBool,
    pinned: Mutex<HashMap<String, Vec<f32>>>,
    calls: AtomicUsize,
}

impl MockEmbeddingService {
    pub fn new(dims: usize) -> Self {
        Self {
            dims,
            ready: AtomicBool::new(true),
            pinned: Mutex::new(HashMap::new()),
            calls: AtomicUsize::new(0),
        }
    }

    /// Return `vector` whenever `text` is embedded.
    pub fn pin(&self, text: impl Into<String>, vector: Vec<f32>) {
        let _ = self.pinned.lock().insert(text.into(), vector);
    }

    /// When not ready, every call fails with [`EmbeddingError::NotReady`].
    pub fn set_ready(&self, ready: bool) {
        self.ready.store(ready, Ordering::SeqCst);
    }

    /// Number of `embed` calls served so far.
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn hash_to_vector(&self, text: &str) -> Vec<f32> {
        let hash = Sha256::digest(text.as_bytes());
        let mut v: Vec<f32> = (0..self.dims)
            .map(|i| (f32::from(hash[i % hash.len()]) / 127.5) - 1.0)
            .collect();
        l2_normalize(&mut v);
        v
    }
}

#[async_trait]
impl EmbeddingService for MockEmbeddingService {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let _ = self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.ready.load(Ordering::SeqCst) {
            return Err(EmbeddingError::NotReady);
        }
        let pinned = self.pinned.lock();
        Ok(texts
            .iter()
            .map(|t| {
                pinned
                    .get(t)
                    .cloned()
                    .unwrap_or_else(|| self.hash_to_vector(t))
            })
            .collect())
    }

    fn dimensions(&self) -> usize {
        self.dims
    }
}
