// ---------------------------------------------------------------------------
// Recommendation result cache
// ---------------------------------------------------------------------------
//
// Results are cached per (user, algorithm) as JSON blobs stamped with
// `cachedAt`. The store never expires anything itself; callers decide
// freshness with `is_fresh` / `RecommendationCache::get_fresh`.
// ---------------------------------------------------------------------------

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::error::RecommendError;
use crate::persistence::{compress, decompress, is_gzipped};
use crate::types::{RecommendationResult, UserRatings};

const BLOB_EXTENSION: &str = "json.gz";

// ---------------------------------------------------------------------------
// BlobStore
// ---------------------------------------------------------------------------

/// Key to opaque bytes. `get` takes `&mut self` so stores can track
/// recency on reads.
pub trait BlobStore {
	fn get(&mut self, key: &str) -> Result<Option<Vec<u8>>, RecommendError>;
	fn put(&mut self, key: &str, blob: Vec<u8>) -> Result<(), RecommendError>;
	fn remove(&mut self, key: &str) -> Result<bool, RecommendError>;
}

impl<B: BlobStore + ?Sized> BlobStore for Box<B> {
	fn get(&mut self, key: &str) -> Result<Option<Vec<u8>>, RecommendError> {
		(**self).get(key)
	}

	fn put(&mut self, key: &str, blob: Vec<u8>) -> Result<(), RecommendError> {
		(**self).put(key, blob)
	}

	fn remove(&mut self, key: &str) -> Result<bool, RecommendError> {
		(**self).remove(key)
	}
}

// ---------------------------------------------------------------------------
// MemoryBlobStore
// ---------------------------------------------------------------------------

/// In-memory LRU store bounded by entry count and total bytes, whichever
/// limit is hit first.
pub struct MemoryBlobStore {
	max_entries: usize,
	max_bytes: usize,
	/// Keys, least recently used first.
	order: Vec<String>,
	blobs: HashMap<String, Vec<u8>>,
	total_bytes: usize,
}

impl MemoryBlobStore {
	pub fn new(max_entries: usize, max_bytes: usize) -> Self {
		Self {
			max_entries,
			max_bytes,
			order: Vec::new(),
			blobs: HashMap::new(),
			total_bytes: 0,
		}
	}

	fn touch(&mut self, key: &str) {
		if let Some(pos) = self.order.iter().position(|k| k == key) {
			let k = self.order.remove(pos);
			self.order.push(k);
		}
	}

	fn evict(&mut self) {
		while self.order.len() > self.max_entries || self.total_bytes > self.max_bytes {
			if self.order.is_empty() {
				break;
			}
			let oldest = self.order.remove(0);
			if let Some(blob) = self.blobs.remove(&oldest) {
				self.total_bytes -= blob.len();
				tracing::debug!(key = %oldest, "Evicted cached result");
			}
		}
	}

	pub fn len(&self) -> usize {
		self.order.len()
	}

	pub fn is_empty(&self) -> bool {
		self.order.is_empty()
	}

	pub fn bytes(&self) -> usize {
		self.total_bytes
	}
}

impl Default for MemoryBlobStore {
	fn default() -> Self {
		Self::new(500, 5_242_880)
	}
}

impl BlobStore for MemoryBlobStore {
	fn get(&mut self, key: &str) -> Result<Option<Vec<u8>>, RecommendError> {
		let Some(blob) = self.blobs.get(key).cloned() else {
			return Ok(None);
		};
		self.touch(key);
		Ok(Some(blob))
	}

	fn put(&mut self, key: &str, blob: Vec<u8>) -> Result<(), RecommendError> {
		self.total_bytes += blob.len();
		match self.blobs.insert(key.to_string(), blob) {
			Some(old) => {
				self.total_bytes -= old.len();
				self.touch(key);
			}
			None => self.order.push(key.to_string()),
		}
		self.evict();
		Ok(())
	}

	fn remove(&mut self, key: &str) -> Result<bool, RecommendError> {
		let Some(blob) = self.blobs.remove(key) else {
			return Ok(false);
		};
		self.total_bytes -= blob.len();
		self.order.retain(|k| k != key);
		Ok(true)
	}
}

// ---------------------------------------------------------------------------
// FileBlobStore
// ---------------------------------------------------------------------------

/// One gzip file per key inside `dir`. File names are the URL-safe base64
/// of the key so any user id maps to a valid name.
pub struct FileBlobStore {
	dir: PathBuf,
}

impl FileBlobStore {
	pub fn new(dir: impl Into<PathBuf>) -> Result<Self, RecommendError> {
		let dir = dir.into();
		std::fs::create_dir_all(&dir)?;
		Ok(Self { dir })
	}

	pub fn dir(&self) -> &Path {
		&self.dir
	}

	fn path_for(&self, key: &str) -> PathBuf {
		let name = URL_SAFE_NO_PAD.encode(key.as_bytes());
		self.dir.join(format!("{name}.{BLOB_EXTENSION}"))
	}
}

impl BlobStore for FileBlobStore {
	fn get(&mut self, key: &str) -> Result<Option<Vec<u8>>, RecommendError> {
		let path = self.path_for(key);
		let data = match std::fs::read(&path) {
			Ok(d) => d,
			Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
			Err(e) => return Err(e.into()),
		};
		if is_gzipped(&data) {
			Ok(Some(decompress(&data)?))
		} else {
			Ok(Some(data))
		}
	}

	fn put(&mut self, key: &str, blob: Vec<u8>) -> Result<(), RecommendError> {
		let path = self.path_for(key);
		let tmp = path.with_extension("tmp");
		std::fs::write(&tmp, compress(&blob)?)?;
		std::fs::rename(&tmp, &path)?;
		Ok(())
	}

	fn remove(&mut self, key: &str) -> Result<bool, RecommendError> {
		match std::fs::remove_file(self.path_for(key)) {
			Ok(()) => Ok(true),
			Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
			Err(e) => Err(e.into()),
		}
	}
}

// ---------------------------------------------------------------------------
// Entries
// ---------------------------------------------------------------------------

/// A cached result: the result fields plus `cachedAt` and the `topN` it
/// was ranked for.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
	#[serde(flatten)]
	pub result: RecommendationResult,
	#[serde(rename = "cachedAt")]
	pub cached_at: DateTime<Utc>,
	#[serde(rename = "topN", default, skip_serializing_if = "Option::is_none")]
	pub top_n: Option<usize>,
}

impl CacheEntry {
	/// Stamp `result` with the current time.
	pub fn new(result: RecommendationResult, top_n: Option<usize>) -> Self {
		Self {
			result,
			cached_at: Utc::now(),
			top_n,
		}
	}

	/// Whether the ranking already lists every candidate it had.
	fn is_exhaustive(&self) -> bool {
		self.top_n.is_some_and(|n| self.result.recommendations.len() < n)
	}

	/// The entry as an answer to a request for `top_n` items from a user
	/// who has rated `ratings`.
	///
	/// `None` when the entry names a business the user has since rated, or
	/// holds fewer than `top_n` items while its ranking was cut short.
	pub fn answer(&self, ratings: &UserRatings, top_n: usize) -> Option<RecommendationResult> {
		if self.result.recommendations.iter().any(|id| ratings.contains_key(id)) {
			return None;
		}
		if self.result.recommendations.len() < top_n && !self.is_exhaustive() {
			return None;
		}
		let mut result = self.result.clone();
		result.recommendations.truncate(top_n);
		result.scores.truncate(top_n);
		Some(result)
	}
}

/// Whether `entry` is younger than `ttl` at `now`.
pub fn is_fresh(entry: &CacheEntry, ttl: Duration, now: DateTime<Utc>) -> bool {
	now.signed_duration_since(entry.cached_at) < ttl
}

pub fn cache_key(user_id: &str, algorithm: &str) -> String {
	format!("{algorithm}/{user_id}")
}

// ---------------------------------------------------------------------------
// RecommendationCache
// ---------------------------------------------------------------------------

/// Typed cache over a `BlobStore`. Keys may be scoped by a namespace, which
/// the engine sets to the loaded dataset's fingerprint so results ranked on
/// other data are never found.
pub struct RecommendationCache<S: BlobStore> {
	store: S,
	namespace: String,
}

impl<S: BlobStore> RecommendationCache<S> {
	pub fn new(store: S) -> Self {
		Self {
			store,
			namespace: String::new(),
		}
	}

	pub fn store(&self) -> &S {
		&self.store
	}

	pub fn namespace(&self) -> &str {
		&self.namespace
	}

	pub fn set_namespace(&mut self, namespace: impl Into<String>) {
		self.namespace = namespace.into();
	}

	fn key(&self, user_id: &str, algorithm: &str) -> String {
		if self.namespace.is_empty() {
			cache_key(user_id, algorithm)
		} else {
			format!("{}/{}", self.namespace, cache_key(user_id, algorithm))
		}
	}

	/// Cached entry for the pair, fresh or not. Unreadable blobs count as
	/// misses.
	pub fn get(&mut self, user_id: &str, algorithm: &str) -> Option<CacheEntry> {
		let key = self.key(user_id, algorithm);
		let blob = match self.store.get(&key) {
			Ok(Some(b)) => b,
			Ok(None) => return None,
			Err(e) => {
				tracing::warn!(key = %key, error = %e, "Cache read failed");
				return None;
			}
		};
		match serde_json::from_slice(&blob) {
			Ok(entry) => Some(entry),
			Err(e) => {
				tracing::warn!(key = %key, error = %e, "Discarding unreadable cache entry");
				None
			}
		}
	}

	/// Entry only if it is still within `ttl` at `now`.
	pub fn get_fresh(
		&mut self,
		user_id: &str,
		algorithm: &str,
		ttl: Duration,
		now: DateTime<Utc>,
	) -> Option<CacheEntry> {
		self.get(user_id, algorithm)
			.filter(|entry| is_fresh(entry, ttl, now))
	}

	/// Store `result` stamped with the current time.
	pub fn put(
		&mut self,
		user_id: &str,
		algorithm: &str,
		result: &RecommendationResult,
	) -> Result<CacheEntry, RecommendError> {
		let entry = CacheEntry::new(result.clone(), None);
		self.put_entry(user_id, algorithm, &entry)?;
		Ok(entry)
	}

	pub fn put_entry(&mut self, user_id: &str, algorithm: &str, entry: &CacheEntry) -> Result<(), RecommendError> {
		let blob = serde_json::to_vec(entry)
			.map_err(|e| RecommendError::Cache(format!("Failed to encode entry: {}", e)))?;
		self.store.put(&self.key(user_id, algorithm), blob)
	}

	pub fn invalidate(&mut self, user_id: &str, algorithm: &str) -> Result<bool, RecommendError> {
		let key = self.key(user_id, algorithm);
		self.store.remove(&key)
	}
}
