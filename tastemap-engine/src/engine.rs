// ---------------------------------------------------------------------------
// RecommendationEngine
// ---------------------------------------------------------------------------
//
// Application-scoped context for the serving layer. Owns the loaded
// dataset, one recommender per algorithm (built and fitted on first use),
// and the result cache. All algorithm code stays free of I/O; this type is
// where caching and model files are handled.
// ---------------------------------------------------------------------------

use std::collections::HashMap;
use std::path::Path;
use std::time::Instant;

use chrono::{Duration, Utc};
use serde::Serialize;

use crate::analysis::{find_cf_candidates, CfCandidate, DatasetStats};
use crate::cache::{BlobStore, CacheEntry, RecommendationCache};
use crate::config::EngineConfig;
use crate::error::RecommendError;
use crate::evaluation::{evaluate_result, EvaluationReport};
use crate::factorization::ModelSnapshot;
use crate::factory::{build_recommender, Algorithm};
use crate::persistence::fnv1a;
use crate::recommender::Recommender;
use crate::types::{Dataset, RecommendationResult, UserRatings};

/// A recommendation plus whether it came from the cache.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Served {
	#[serde(flatten)]
	pub result: RecommendationResult,
	pub cached: bool,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub cached_at: Option<String>,
}

pub struct RecommendationEngine {
	config: EngineConfig,
	dataset: Option<Dataset>,
	recommenders: HashMap<Algorithm, Box<dyn Recommender>>,
	cache: RecommendationCache<Box<dyn BlobStore>>,
	cache_ttl: Duration,
}

impl RecommendationEngine {
	pub fn new(
		config: EngineConfig,
		store: Box<dyn BlobStore>,
		cache_ttl: Duration,
	) -> Result<Self, RecommendError> {
		config.validate()?;
		Ok(Self {
			config,
			dataset: None,
			recommenders: HashMap::new(),
			cache: RecommendationCache::new(store),
			cache_ttl,
		})
	}

	pub fn config(&self) -> &EngineConfig {
		&self.config
	}

	pub fn cache_ttl(&self) -> Duration {
		self.cache_ttl
	}

	pub fn is_loaded(&self) -> bool {
		self.dataset.is_some()
	}

	/// Replace the dataset. Every recommender is dropped and refitted on
	/// next use.
	pub fn load(&mut self, dataset: Dataset) -> DatasetStats {
		let stats = DatasetStats::from_ratings(&dataset.ratings);
		tracing::info!(
			restaurants = dataset.restaurants.len(),
			reviews = dataset.reviews.len(),
			ratings = dataset.ratings.len(),
			"Dataset loaded"
		);
		self.recommenders.clear();
		let tag = dataset_tag(&dataset);
		tracing::debug!(namespace = %tag, "Cache scoped to dataset");
		self.cache.set_namespace(tag);
		self.dataset = Some(dataset);
		stats
	}

	fn dataset(&self) -> Result<&Dataset, RecommendError> {
		self.dataset.as_ref().ok_or(RecommendError::NotInitialized)
	}

	/// The fitted recommender for `algorithm`, building it on first use.
	pub fn recommender(&mut self, algorithm: Algorithm) -> Result<&mut Box<dyn Recommender>, RecommendError> {
		if !self.recommenders.contains_key(&algorithm) {
			let dataset = self.dataset()?;
			let mut recommender = build_recommender(algorithm, &self.config)?;
			let started = Instant::now();
			recommender.fit(dataset)?;
			tracing::info!(
				algorithm = %algorithm,
				elapsed_ms = started.elapsed().as_millis() as u64,
				"Recommender fitted"
			);
			self.recommenders.insert(algorithm, recommender);
		}
		self.recommenders
			.get_mut(&algorithm)
			.ok_or(RecommendError::NotInitialized)
	}

	/// Recommend for a user, serving a fresh cached result when allowed.
	/// A cached ranking is only served if it can answer this request: it
	/// is cut to `top_n` and never names a business in `ratings`. Fresh
	/// computations overwrite the cache entry.
	pub fn recommend(
		&mut self,
		user_id: &str,
		algorithm: Algorithm,
		ratings: &UserRatings,
		top_n: usize,
		use_cache: bool,
	) -> Result<Served, RecommendError> {
		if use_cache {
			if let Some(entry) =
				self.cache
					.get_fresh(user_id, algorithm.as_str(), self.cache_ttl, Utc::now())
			{
				match entry.answer(ratings, top_n) {
					Some(result) => {
						tracing::debug!(user = user_id, algorithm = %algorithm, "Serving cached result");
						return Ok(Served {
							cached_at: Some(entry.cached_at.to_rfc3339()),
							result,
							cached: true,
						});
					}
					None => {
						tracing::debug!(user = user_id, algorithm = %algorithm, "Cached result cannot answer request");
					}
				}
			}
		}

		let result = self.recommender(algorithm)?.recommend(user_id, ratings, top_n);
		let entry = CacheEntry::new(result.clone(), Some(top_n));
		if let Err(e) = self.cache.put_entry(user_id, algorithm.as_str(), &entry) {
			tracing::warn!(user = user_id, algorithm = %algorithm, error = %e, "Failed to cache result");
		}
		Ok(Served {
			result,
			cached: false,
			cached_at: None,
		})
	}

	pub fn explain(&mut self, user_id: &str, algorithm: Algorithm, business_id: &str) -> Result<String, RecommendError> {
		Ok(self.recommender(algorithm)?.explain(user_id, business_id))
	}

	/// Formatted log trail of a recommender; empty if it was never built.
	pub fn logs(&self, algorithm: Algorithm) -> Vec<String> {
		self.recommenders
			.get(&algorithm)
			.map(|r| r.formatted_logs())
			.unwrap_or_default()
	}

	pub fn cached(&mut self, user_id: &str, algorithm: Algorithm) -> Option<CacheEntry> {
		self.cache.get(user_id, algorithm.as_str())
	}

	pub fn stats(&self) -> Result<DatasetStats, RecommendError> {
		Ok(DatasetStats::from_ratings(&self.dataset()?.ratings))
	}

	pub fn cf_candidates(
		&self,
		min_ratings: usize,
		min_common: usize,
		min_similarity: f64,
	) -> Result<Vec<CfCandidate>, RecommendError> {
		Ok(find_cf_candidates(
			&self.dataset()?.ratings,
			min_ratings,
			min_common,
			min_similarity,
		))
	}

	/// Score a fresh top-`k` list against held-out relevant businesses.
	pub fn evaluate(
		&mut self,
		user_id: &str,
		algorithm: Algorithm,
		ratings: &UserRatings,
		relevant: &[String],
		k: usize,
	) -> Result<EvaluationReport, RecommendError> {
		let result = self.recommender(algorithm)?.recommend(user_id, ratings, k);
		Ok(evaluate_result(&result, relevant, k))
	}

	pub fn save_model(&mut self, algorithm: Algorithm, path: &Path) -> Result<(), RecommendError> {
		let snapshot = self.recommender(algorithm)?.snapshot().ok_or_else(|| {
			RecommendError::InvalidConfig(format!("{algorithm} has no trained model to save"))
		})?;
		snapshot.save(path)?;
		tracing::info!(algorithm = %algorithm, path = %path.display(), "Model saved");
		Ok(())
	}

	/// Load a saved model in place of the fitted one.
	pub fn load_model(&mut self, algorithm: Algorithm, path: &Path) -> Result<(), RecommendError> {
		let snapshot = ModelSnapshot::load(path)?;
		let mut recommender = build_recommender(algorithm, &self.config)?;
		recommender.restore(&snapshot)?;
		self.recommenders.insert(algorithm, recommender);
		tracing::info!(algorithm = %algorithm, path = %path.display(), "Model loaded");
		Ok(())
	}
}

/// Cache namespace for a dataset: FNV-1a of its JSON form, so the same
/// data reloaded in a later process finds its earlier results.
fn dataset_tag(dataset: &Dataset) -> String {
	match serde_json::to_vec(dataset) {
		Ok(bytes) => format!("{:016x}", fnv1a(&bytes)),
		Err(e) => {
			tracing::warn!(error = %e, "Could not fingerprint dataset; scoping cache by load time");
			format!("t{}", Utc::now().timestamp_nanos_opt().unwrap_or_default())
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::cache::MemoryBlobStore;
	use crate::types::{Rating, Restaurant, Review};

	fn dataset() -> Dataset {
		let restaurant = |id: &str, cats: &[&str]| Restaurant {
			business_id: id.into(),
			name: format!("Place {id}"),
			categories: cats.iter().map(|c| c.to_string()).collect(),
			review_text: None,
		};
		let rating = |u: &str, b: &str, r: f64| Rating {
			user_id: u.into(),
			business_id: b.into(),
			rating: r,
		};
		Dataset {
			restaurants: vec![
				restaurant("s1", &["Sushi", "Japanese"]),
				restaurant("s2", &["Sushi", "Japanese"]),
				restaurant("b1", &["Burgers", "American"]),
				restaurant("b2", &["Burgers", "American"]),
			],
			reviews: vec![Review {
				business_id: "s1".into(),
				user_id: "u1".into(),
				review_text: "fresh sushi and miso soup".into(),
				rating: 5.0,
			}],
			ratings: vec![
				rating("u1", "s1", 5.0),
				rating("u1", "b1", 1.0),
				rating("u2", "s1", 5.0),
				rating("u2", "s2", 4.0),
				rating("u2", "b1", 2.0),
			],
		}
	}

	fn engine() -> RecommendationEngine {
		let mut config = EngineConfig::default().with_seed(Some(3));
		config.factorization.num_factors = 4;
		let mut engine =
			RecommendationEngine::new(config, Box::new(MemoryBlobStore::default()), Duration::hours(24)).unwrap();
		engine.load(dataset());
		engine
	}

	fn ratings() -> UserRatings {
		[("s1".to_string(), 5.0)].into_iter().collect()
	}

	#[test]
	fn requires_data_before_recommending() {
		let mut engine = RecommendationEngine::new(
			EngineConfig::default(),
			Box::new(MemoryBlobStore::default()),
			Duration::hours(24),
		)
		.unwrap();
		assert!(matches!(
			engine.recommend("u1", Algorithm::Svd, &ratings(), 3, false),
			Err(RecommendError::NotInitialized)
		));
	}

	#[test]
	fn second_request_is_served_from_cache() {
		let mut engine = engine();
		let first = engine.recommend("u1", Algorithm::ContentTfidf, &ratings(), 3, true).unwrap();
		assert!(!first.cached);
		let second = engine.recommend("u1", Algorithm::ContentTfidf, &ratings(), 3, true).unwrap();
		assert!(second.cached);
		assert_eq!(first.result, second.result);
		assert!(engine.cached("u1", Algorithm::ContentTfidf).is_some());
	}

	#[test]
	fn cached_result_is_cut_to_smaller_top_n() {
		let mut engine = engine();
		let first = engine.recommend("guest", Algorithm::ContentTfidf, &ratings(), 3, true).unwrap();
		assert_eq!(first.result.recommendations.len(), 3);
		let smaller = engine.recommend("guest", Algorithm::ContentTfidf, &ratings(), 1, true).unwrap();
		assert!(smaller.cached);
		assert_eq!(smaller.result.recommendations, first.result.recommendations[..1]);
		assert_eq!(smaller.result.scores, first.result.scores[..1]);
	}

	#[test]
	fn deeper_request_than_cached_recomputes() {
		let mut engine = engine();
		engine.recommend("guest", Algorithm::ContentTfidf, &ratings(), 1, true).unwrap();
		let deeper = engine.recommend("guest", Algorithm::ContentTfidf, &ratings(), 3, true).unwrap();
		assert!(!deeper.cached);
		assert_eq!(deeper.result.recommendations.len(), 3);
	}

	#[test]
	fn cached_result_never_names_a_newly_rated_business() {
		let mut engine = engine();
		let first = engine.recommend("guest", Algorithm::ContentTfidf, &ratings(), 3, true).unwrap();
		let favourite = first.result.recommendations[0].clone();
		let mut updated = ratings();
		updated.insert(favourite.clone(), 4.0);
		let again = engine.recommend("guest", Algorithm::ContentTfidf, &updated, 3, true).unwrap();
		assert!(!again.cached);
		assert!(!again.result.recommendations.contains(&favourite));
	}

	#[test]
	fn reload_scopes_cache_to_new_data() {
		let mut engine = engine();
		engine.recommend("u1", Algorithm::Svd, &ratings(), 3, true).unwrap();
		assert!(engine.cached("u1", Algorithm::Svd).is_some());

		let mut other = dataset();
		other.ratings.pop();
		engine.load(other);
		assert!(engine.cached("u1", Algorithm::Svd).is_none());
		let served = engine.recommend("u1", Algorithm::Svd, &ratings(), 3, true).unwrap();
		assert!(!served.cached);

		// Same data again finds what was ranked on it.
		engine.load(dataset());
		assert!(engine.cached("u1", Algorithm::Svd).is_some());
	}

	#[test]
	fn bypassing_cache_recomputes() {
		let mut engine = engine();
		engine.recommend("u1", Algorithm::Svd, &ratings(), 3, true).unwrap();
		let again = engine.recommend("u1", Algorithm::Svd, &ratings(), 3, false).unwrap();
		assert!(!again.cached);
	}

	#[test]
	fn logs_exist_after_use() {
		let mut engine = engine();
		assert!(engine.logs(Algorithm::UserCf).is_empty());
		engine.recommend("u1", Algorithm::UserCf, &ratings(), 3, false).unwrap();
		assert!(!engine.logs(Algorithm::UserCf).is_empty());
	}

	#[test]
	fn reload_refits() {
		let mut engine = engine();
		engine.recommend("u1", Algorithm::Kmeans, &ratings(), 3, false).unwrap();
		let stats = engine.load(Dataset::default());
		assert_eq!(stats.ratings, 0);
		assert!(engine.logs(Algorithm::Kmeans).is_empty());
	}

	#[test]
	fn model_save_and_load() {
		let dir = tempfile::tempdir().unwrap();
		let path = dir.path().join("svd.json.gz");
		let mut engine = engine();
		engine.save_model(Algorithm::Svd, &path).unwrap();
		engine.load_model(Algorithm::Svd, &path).unwrap();
		let served = engine.recommend("u1", Algorithm::Svd, &ratings(), 3, false).unwrap();
		assert!(!served.result.is_empty());
		assert!(engine.save_model(Algorithm::Kmeans, &path).is_err());
	}

	#[test]
	fn evaluate_reports_metrics() {
		let mut engine = engine();
		let report = engine
			.evaluate("u1", Algorithm::ContentTfidf, &ratings(), &["s2".to_string()], 3)
			.unwrap();
		assert_eq!(report.method, "content-tfidf");
		assert_eq!(report.k, 3);
		assert!(report.recall <= 1.0);
	}
}
