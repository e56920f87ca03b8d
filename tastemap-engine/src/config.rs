use chrono::Duration;
use clap::Parser;
use serde::{Deserialize, Serialize};

use crate::error::RecommendError;

// ---------------------------------------------------------------------------
// Command line
// ---------------------------------------------------------------------------

#[derive(Parser, Debug)]
#[command(name = "tastemap-engine", about = "Restaurant recommendation engine over JSON-RPC / NDJSON stdio")]
pub struct CliArgs {
	/// Directory for cached recommendation results. In-memory cache when unset.
	#[arg(long, env = "TASTEMAP_CACHE_DIR")]
	pub cache_dir: Option<String>,

	/// Hours a cached result stays fresh
	#[arg(long, default_value = "24", env = "TASTEMAP_CACHE_TTL_HOURS")]
	pub cache_ttl_hours: i64,

	/// Seed for every randomized step (SGD shuffling, k-means init)
	#[arg(long, env = "TASTEMAP_SEED")]
	pub seed: Option<u64>,

	/// Log level (trace, debug, info, warn, error)
	#[arg(long, default_value = "info", env = "TASTEMAP_LOG_LEVEL")]
	pub log_level: String,
}

/// Ten years.
pub const MAX_CACHE_TTL_HOURS: i64 = 24 * 365 * 10;

/// Freshness window for cached results. Must be positive and at most
/// `MAX_CACHE_TTL_HOURS`.
pub fn cache_ttl(hours: i64) -> Result<Duration, RecommendError> {
	if hours <= 0 || hours > MAX_CACHE_TTL_HOURS {
		return Err(invalid(format!(
			"cacheTtlHours must be between 1 and {MAX_CACHE_TTL_HOURS}, got {hours}"
		)));
	}
	Duration::try_hours(hours).ok_or_else(|| invalid(format!("cacheTtlHours {hours} is out of range")))
}

// ---------------------------------------------------------------------------
// Per-family configuration
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ContentConfig {
	/// Vocabulary size for the TF-IDF profiler.
	pub max_features: usize,
	/// Concept count for LSA.
	pub lsa_components: usize,
	pub embedding_dimensions: usize,
	pub embedding_timeout_ms: u64,
	/// How many of the user's top-rated items seed a recommendation.
	pub top_sources: usize,
}

impl Default for ContentConfig {
	fn default() -> Self {
		Self {
			max_features: 100,
			lsa_components: 20,
			embedding_dimensions: 64,
			embedding_timeout_ms: 2000,
			top_sources: 3,
		}
	}
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CollaborativeConfig {
	/// Minimum co-rated entries before a similarity is computed.
	pub min_ratings: usize,
	/// Minimum neighbours that rated an item before it can be predicted.
	pub min_similar_users: usize,
	pub neighborhood_size: usize,
	pub rating_threshold: f64,
}

impl Default for CollaborativeConfig {
	fn default() -> Self {
		Self {
			min_ratings: 2,
			min_similar_users: 1,
			neighborhood_size: 20,
			rating_threshold: 3.0,
		}
	}
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FactorizationConfig {
	pub num_factors: usize,
	pub learning_rate: f64,
	pub regularization: f64,
	pub num_epochs: usize,
	pub min_improvement: f64,
	/// Epochs without a new best RMSE before training stops.
	pub patience: usize,
	pub min_rating: f64,
	pub max_rating: f64,
	/// Cumulative explained variance kept by the PCA variant.
	pub variance_threshold: f64,
	pub seed: Option<u64>,
}

impl Default for FactorizationConfig {
	fn default() -> Self {
		Self {
			num_factors: 50,
			learning_rate: 0.005,
			regularization: 0.02,
			num_epochs: 20,
			min_improvement: 1e-4,
			patience: 5,
			min_rating: 1.0,
			max_rating: 5.0,
			variance_threshold: 0.9,
			seed: None,
		}
	}
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ClusteringConfig {
	pub k: usize,
	pub max_iterations: usize,
	pub min_cluster_size: usize,
	pub include_reviews: bool,
	pub max_features: usize,
	pub seed: Option<u64>,
}

impl Default for ClusteringConfig {
	fn default() -> Self {
		Self {
			k: 8,
			max_iterations: 100,
			min_cluster_size: 2,
			include_reviews: true,
			max_features: 200,
			seed: None,
		}
	}
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct HybridWeights {
	pub content: f64,
	pub collaborative: f64,
	pub matrix: f64,
	pub clustering: f64,
}

impl Default for HybridWeights {
	fn default() -> Self {
		Self {
			content: 0.3,
			collaborative: 0.3,
			matrix: 0.4,
			clustering: 0.0,
		}
	}
}

impl HybridWeights {
	pub fn total(&self) -> f64 {
		self.content + self.collaborative + self.matrix + self.clustering
	}
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct HybridConfig {
	pub weights: HybridWeights,
	/// Below this many ratings a user is cold-start.
	pub cold_start_threshold: usize,
	/// At or above this many ratings a user gets the rating-driven method.
	pub min_ratings: usize,
	/// Range hybrid scores are rescaled to for display.
	pub display_min: f64,
	pub display_max: f64,
}

impl Default for HybridConfig {
	fn default() -> Self {
		Self {
			weights: HybridWeights::default(),
			cold_start_threshold: 3,
			min_ratings: 10,
			display_min: 1.0,
			display_max: 5.0,
		}
	}
}

// ---------------------------------------------------------------------------
// EngineConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EngineConfig {
	pub content: ContentConfig,
	pub collaborative: CollaborativeConfig,
	pub factorization: FactorizationConfig,
	pub clustering: ClusteringConfig,
	pub hybrid: HybridConfig,
}

fn invalid(msg: impl Into<String>) -> RecommendError {
	RecommendError::InvalidConfig(msg.into())
}

impl EngineConfig {
	/// Apply one seed to every randomized component that has none.
	pub fn with_seed(mut self, seed: Option<u64>) -> Self {
		if self.factorization.seed.is_none() {
			self.factorization.seed = seed;
		}
		if self.clustering.seed.is_none() {
			self.clustering.seed = seed;
		}
		self
	}

	/// Reject configurations no recommender can run with.
	pub fn validate(&self) -> Result<(), RecommendError> {
		let c = &self.content;
		if c.max_features == 0 || c.lsa_components == 0 || c.embedding_dimensions == 0 {
			return Err(invalid("content dimensions must be positive"));
		}
		if c.top_sources == 0 {
			return Err(invalid("content.topSources must be positive"));
		}

		let f = &self.factorization;
		if f.num_factors == 0 {
			return Err(invalid("factorization.numFactors must be positive"));
		}
		if !(f.learning_rate > 0.0) || !f.learning_rate.is_finite() {
			return Err(invalid("factorization.learningRate must be positive"));
		}
		if f.regularization < 0.0 {
			return Err(invalid("factorization.regularization must not be negative"));
		}
		if f.min_rating >= f.max_rating {
			return Err(invalid("factorization.minRating must be below maxRating"));
		}
		if !(f.variance_threshold > 0.0 && f.variance_threshold <= 1.0) {
			return Err(invalid("factorization.varianceThreshold must be in (0, 1]"));
		}

		let k = &self.clustering;
		if k.k == 0 {
			return Err(invalid("clustering.k must be positive"));
		}
		if k.max_iterations == 0 {
			return Err(invalid("clustering.maxIterations must be positive"));
		}

		let h = &self.hybrid;
		let w = &h.weights;
		if [w.content, w.collaborative, w.matrix, w.clustering]
			.iter()
			.any(|x| *x < 0.0 || !x.is_finite())
		{
			return Err(invalid("hybrid weights must be finite and non-negative"));
		}
		if w.total() <= 0.0 {
			return Err(invalid("at least one hybrid weight must be positive"));
		}
		if h.display_min >= h.display_max {
			return Err(invalid("hybrid.displayMin must be below displayMax"));
		}
		if h.cold_start_threshold > h.min_ratings {
			return Err(invalid("hybrid.coldStartThreshold must not exceed minRatings"));
		}

		Ok(())
	}
}
