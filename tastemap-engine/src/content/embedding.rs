//! Pluggable text embedding.
//!
//! `TextEmbedder` abstracts over any embedding source. `HashEmbedder` is the
//! always-available local implementation; `TimeoutEmbedder` bounds a slow or
//! remote embedder; `EmbeddingProfiler` falls back to hashing whenever the
//! configured embedder fails.

use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use crate::content::ContentProfiler;
use crate::error::RecommendError;
use crate::logs::RecommenderLog;
use crate::persistence::fnv1a;
use crate::similarity::normalize_vector;
use crate::text::{term_counts, tokenize};
use crate::types::EmbeddingMethod;

/// A source of fixed-length text embeddings.
pub trait TextEmbedder: Send + Sync {
	fn name(&self) -> &str;

	fn dimensions(&self) -> usize;

	fn embed(&self, text: &str) -> Result<Vec<f64>, RecommendError>;
}

// ---------------------------------------------------------------------------
// HashEmbedder
// ---------------------------------------------------------------------------

/// Deterministic feature-hashing embedder.
///
/// Terms are hashed (FNV-1a) into `dimensions` buckets and weighted by term
/// frequency. Not semantic, but stable and free of external dependencies.
#[derive(Debug, Clone)]
pub struct HashEmbedder {
	dimensions: usize,
}

impl HashEmbedder {
	pub fn new(dimensions: usize) -> Self {
		Self {
			dimensions: dimensions.max(1),
		}
	}

	fn vector(&self, text: &str) -> Vec<f64> {
		let tokens = tokenize(text);
		let mut vec = vec![0.0; self.dimensions];
		if tokens.is_empty() {
			return vec;
		}
		let total = tokens.len() as f64;
		for (term, count) in term_counts(&tokens) {
			let h = fnv1a(term.as_bytes());
			let bucket = (h % self.dimensions as u64) as usize;
			// High bit picks the sign.
			let sign = if h >> 63 == 0 { 1.0 } else { -1.0 };
			vec[bucket] += sign * (count as f64 / total);
		}
		normalize_vector(&vec)
	}
}

impl TextEmbedder for HashEmbedder {
	fn name(&self) -> &str {
		"hash"
	}

	fn dimensions(&self) -> usize {
		self.dimensions
	}

	fn embed(&self, text: &str) -> Result<Vec<f64>, RecommendError> {
		Ok(self.vector(text))
	}
}

// ---------------------------------------------------------------------------
// TimeoutEmbedder
// ---------------------------------------------------------------------------

type EmbedJob = (String, mpsc::Sender<Result<Vec<f64>, RecommendError>>);

/// Races an embedder against a deadline.
///
/// Calls are handed to one long-lived worker thread. If it has not answered
/// within `timeout` the caller gets `EmbeddingTimeout` and the late answer
/// is discarded. A call still running on the worker delays the calls queued
/// behind it, so one hung embedder makes later calls time out too instead
/// of piling up threads. The worker exits once this value is dropped and
/// its current call returns.
pub struct TimeoutEmbedder {
	inner: Arc<dyn TextEmbedder>,
	timeout: Duration,
	name: String,
	jobs: Mutex<Option<mpsc::Sender<EmbedJob>>>,
}

impl TimeoutEmbedder {
	pub fn new(inner: Arc<dyn TextEmbedder>, timeout: Duration) -> Self {
		let name = format!("{}+timeout", inner.name());
		Self {
			inner,
			timeout,
			name,
			jobs: Mutex::new(None),
		}
	}

	fn spawn_worker(&self) -> Result<mpsc::Sender<EmbedJob>, RecommendError> {
		let (tx, rx) = mpsc::channel::<EmbedJob>();
		let inner = Arc::clone(&self.inner);
		thread::Builder::new()
			.name(format!("embedder-{}", self.inner.name()))
			.spawn(move || {
				for (text, reply) in rx {
					let _ = reply.send(inner.embed(&text));
				}
			})
			.map_err(|e| RecommendError::Embedding(format!("failed to start embedding worker: {e}")))?;
		Ok(tx)
	}

	/// Queue `text` on the worker, starting it if needed.
	fn submit(&self, text: &str) -> Result<mpsc::Receiver<Result<Vec<f64>, RecommendError>>, RecommendError> {
		let (reply_tx, reply_rx) = mpsc::channel();
		let mut jobs = self.jobs.lock().unwrap_or_else(|e| e.into_inner());
		let mut job = (text.to_string(), reply_tx);
		if let Some(tx) = jobs.as_ref() {
			match tx.send(job) {
				Ok(()) => return Ok(reply_rx),
				// Worker is gone; start a new one with the same job.
				Err(mpsc::SendError(returned)) => job = returned,
			}
		}
		let tx = self.spawn_worker()?;
		tx.send(job)
			.map_err(|_| RecommendError::Embedding("embedding worker exited on start".into()))?;
		*jobs = Some(tx);
		Ok(reply_rx)
	}
}

impl TextEmbedder for TimeoutEmbedder {
	fn name(&self) -> &str {
		&self.name
	}

	fn dimensions(&self) -> usize {
		self.inner.dimensions()
	}

	fn embed(&self, text: &str) -> Result<Vec<f64>, RecommendError> {
		let rx = self.submit(text)?;
		match rx.recv_timeout(self.timeout) {
			Ok(result) => result,
			Err(RecvTimeoutError::Timeout) => {
				Err(RecommendError::EmbeddingTimeout(self.timeout.as_millis() as u64))
			}
			Err(RecvTimeoutError::Disconnected) => Err(RecommendError::Embedding(
				"embedding worker exited without a result".into(),
			)),
		}
	}
}

// ---------------------------------------------------------------------------
// EmbeddingProfiler
// ---------------------------------------------------------------------------

/// Content profiler backed by a `TextEmbedder` with a hashing fallback of
/// the same dimensionality.
pub struct EmbeddingProfiler {
	embedder: Arc<dyn TextEmbedder>,
	fallback: HashEmbedder,
	fallbacks_used: usize,
}

impl EmbeddingProfiler {
	pub fn new(embedder: Arc<dyn TextEmbedder>) -> Self {
		let fallback = HashEmbedder::new(embedder.dimensions());
		Self {
			embedder,
			fallback,
			fallbacks_used: 0,
		}
	}

	/// Profiler using only the local hashing embedder.
	pub fn local(dimensions: usize) -> Self {
		Self::new(Arc::new(HashEmbedder::new(dimensions)))
	}

	/// How many documents were embedded by the fallback since the last fit.
	pub fn fallbacks_used(&self) -> usize {
		self.fallbacks_used
	}
}

impl ContentProfiler for EmbeddingProfiler {
	fn name(&self) -> &'static str {
		"content-embedding"
	}

	fn method(&self) -> EmbeddingMethod {
		EmbeddingMethod::TextEmbedding
	}

	fn dimensions(&self) -> usize {
		self.fallback.dimensions()
	}

	fn fit(&mut self, _corpus: &[String]) -> Result<(), RecommendError> {
		self.fallbacks_used = 0;
		Ok(())
	}

	fn embed(&mut self, text: &str, log: &mut RecommenderLog) -> Result<Vec<f64>, RecommendError> {
		let expected = self.fallback.dimensions();
		match self.embedder.embed(text) {
			Ok(v) if v.len() == expected && v.iter().all(|x| x.is_finite()) => return Ok(v),
			Ok(v) => log.error(format!(
				"Embedder {} returned {} values (expected {}), using local fallback",
				self.embedder.name(),
				v.len(),
				expected
			)),
			Err(e) => log.error(format!(
				"Embedder {} failed ({}), using local fallback",
				self.embedder.name(),
				e
			)),
		}
		self.fallbacks_used += 1;
		self.fallback.embed(text)
	}
}
