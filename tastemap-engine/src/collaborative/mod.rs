//! Neighbourhood collaborative filtering.
//!
//! `RatingMatrix` holds the training ratings in both orientations and
//! computes Pearson similarity over co-rated entries. A `CfPredictor`
//! turns those similarities into predicted ratings; the user-based and
//! item-based variants share everything else through
//! `CollaborativeRecommender`.

pub mod item_based;
pub mod user_based;

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};

use crate::config::CollaborativeConfig;
use crate::error::RecommendError;
use crate::logs::RecommenderLog;
use crate::recommender::{no_ratings_explanation, Recommender};
use crate::similarity::pearson_correlation;
use crate::types::{Dataset, Rating, RecentRatings, RecommendationResult, ScoredItem, UserRatings};

pub use item_based::ItemBasedPredictor;
pub use user_based::UserBasedPredictor;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SimilarityKind {
	User,
	Item,
}

/// Pearson correlation over the keys both maps contain. Zero when fewer
/// than `min_common` keys are shared.
pub fn co_rated_similarity(
	a: &HashMap<String, f64>,
	b: &HashMap<String, f64>,
	min_common: usize,
) -> f64 {
	let mut common: Vec<&String> = a.keys().filter(|k| b.contains_key(*k)).collect();
	if common.is_empty() || common.len() < min_common {
		return 0.0;
	}
	common.sort();
	let xs: Vec<f64> = common.iter().map(|k| a[*k]).collect();
	let ys: Vec<f64> = common.iter().map(|k| b[*k]).collect();
	pearson_correlation(&xs, &ys)
}

/// Merge caller-supplied ratings over the stored ones; the caller wins.
pub fn merge_profile(stored: Option<&UserRatings>, supplied: &UserRatings) -> UserRatings {
	let mut profile = stored.cloned().unwrap_or_default();
	for (id, rating) in supplied {
		profile.insert(id.clone(), *rating);
	}
	profile
}

// ---------------------------------------------------------------------------
// RatingMatrix
// ---------------------------------------------------------------------------

/// User×item ratings and the item×user transpose.
#[derive(Debug, Clone, Default)]
pub struct RatingMatrix {
	by_user: BTreeMap<String, UserRatings>,
	by_item: BTreeMap<String, HashMap<String, f64>>,
	rating_range: Option<(f64, f64)>,
}

impl RatingMatrix {
	pub fn from_ratings(ratings: &[Rating]) -> Self {
		let mut matrix = Self::default();
		for r in ratings {
			matrix
				.by_user
				.entry(r.user_id.clone())
				.or_default()
				.insert(r.business_id.clone(), r.rating);
			matrix
				.by_item
				.entry(r.business_id.clone())
				.or_default()
				.insert(r.user_id.clone(), r.rating);
			matrix.rating_range = Some(match matrix.rating_range {
				Some((lo, hi)) => (lo.min(r.rating), hi.max(r.rating)),
				None => (r.rating, r.rating),
			});
		}
		matrix
	}

	pub fn user(&self, user_id: &str) -> Option<&UserRatings> {
		self.by_user.get(user_id)
	}

	pub fn item(&self, business_id: &str) -> Option<&HashMap<String, f64>> {
		self.by_item.get(business_id)
	}

	pub fn users(&self) -> impl Iterator<Item = &String> {
		self.by_user.keys()
	}

	pub fn items(&self) -> impl Iterator<Item = &String> {
		self.by_item.keys()
	}

	pub fn user_count(&self) -> usize {
		self.by_user.len()
	}

	pub fn item_count(&self) -> usize {
		self.by_item.len()
	}

	pub fn is_empty(&self) -> bool {
		self.by_user.is_empty()
	}

	/// Lowest and highest rating seen, `(1, 5)` when empty.
	pub fn rating_range(&self) -> (f64, f64) {
		self.rating_range.unwrap_or((1.0, 5.0))
	}

	fn row(&self, id: &str, kind: SimilarityKind) -> Option<&HashMap<String, f64>> {
		match kind {
			SimilarityKind::User => self.by_user.get(id),
			SimilarityKind::Item => self.by_item.get(id),
		}
	}

	pub fn calculate_similarity(
		&self,
		id1: &str,
		id2: &str,
		kind: SimilarityKind,
		min_ratings: usize,
	) -> f64 {
		match (self.row(id1, kind), self.row(id2, kind)) {
			(Some(a), Some(b)) => co_rated_similarity(a, b, min_ratings),
			_ => 0.0,
		}
	}

	/// Users most similar to `profile`, positive scores only, best first.
	/// `exclude` is the profile owner's own id.
	pub fn similar_to_profile(
		&self,
		profile: &UserRatings,
		exclude: &str,
		top_n: usize,
		min_ratings: usize,
	) -> Vec<ScoredItem> {
		let mut scored: Vec<ScoredItem> = self
			.by_user
			.iter()
			.filter(|(id, _)| id.as_str() != exclude)
			.map(|(id, row)| ScoredItem::new(id.clone(), co_rated_similarity(profile, row, min_ratings)))
			.filter(|s| s.score > 0.0)
			.collect();
		crate::types::rank_descending(&mut scored);
		scored.truncate(top_n);
		scored
	}

	fn similar(
		&self,
		id: &str,
		kind: SimilarityKind,
		top_n: usize,
		min_ratings: usize,
	) -> Vec<ScoredItem> {
		let Some(target) = self.row(id, kind) else {
			return Vec::new();
		};
		let others: Box<dyn Iterator<Item = (&String, &HashMap<String, f64>)>> = match kind {
			SimilarityKind::User => Box::new(self.by_user.iter()),
			SimilarityKind::Item => Box::new(self.by_item.iter()),
		};
		let mut scored: Vec<ScoredItem> = others
			.filter(|(other, _)| other.as_str() != id)
			.map(|(other, row)| {
				ScoredItem::new(other.clone(), co_rated_similarity(target, row, min_ratings))
			})
			.filter(|s| s.score > 0.0)
			.collect();
		crate::types::rank_descending(&mut scored);
		scored.truncate(top_n);
		scored
	}

	pub fn similar_users(&self, user_id: &str, top_n: usize, min_ratings: usize) -> Vec<ScoredItem> {
		self.similar(user_id, SimilarityKind::User, top_n, min_ratings)
	}

	pub fn similar_items(&self, business_id: &str, top_n: usize, min_ratings: usize) -> Vec<ScoredItem> {
		self.similar(business_id, SimilarityKind::Item, top_n, min_ratings)
	}
}

// ---------------------------------------------------------------------------
// CfPredictor
// ---------------------------------------------------------------------------

/// Rating prediction strategy over a `RatingMatrix`.
///
/// `profile` is the active user's ratings: stored training ratings merged
/// with whatever the caller supplied.
pub trait CfPredictor {
	fn name(&self) -> &'static str;

	/// One-line description used as the result explanation.
	fn describe(&self) -> &'static str;

	/// Called once after the matrix is rebuilt.
	fn initialize(
		&mut self,
		_matrix: &RatingMatrix,
		_config: &CollaborativeConfig,
		_log: &mut RecommenderLog,
	) {
	}

	/// Predicted rating, or 0 when there is not enough evidence.
	fn predict_rating(
		&self,
		matrix: &RatingMatrix,
		user_id: &str,
		profile: &UserRatings,
		business_id: &str,
		config: &CollaborativeConfig,
	) -> f64;

	/// Predictions for every item the profile has not rated. Items without
	/// a prediction are left out.
	fn predict_unrated(
		&self,
		matrix: &RatingMatrix,
		user_id: &str,
		profile: &UserRatings,
		config: &CollaborativeConfig,
	) -> Vec<ScoredItem> {
		matrix
			.items()
			.filter(|id| !profile.contains_key(*id))
			.map(|id| {
				ScoredItem::new(
					id.clone(),
					self.predict_rating(matrix, user_id, profile, id, config),
				)
			})
			.filter(|s| s.score > 0.0)
			.collect()
	}

	fn explain(
		&self,
		matrix: &RatingMatrix,
		user_id: &str,
		profile: &UserRatings,
		business_id: &str,
		config: &CollaborativeConfig,
	) -> String;
}

// ---------------------------------------------------------------------------
// CollaborativeRecommender
// ---------------------------------------------------------------------------

pub struct CollaborativeRecommender<P: CfPredictor> {
	predictor: P,
	config: CollaborativeConfig,
	matrix: RatingMatrix,
	/// Last active profile per user, for explanations.
	active: RecentRatings,
	log: RecommenderLog,
}

impl<P: CfPredictor> CollaborativeRecommender<P> {
	pub fn new(predictor: P, config: CollaborativeConfig) -> Self {
		let log = RecommenderLog::new(predictor.name());
		Self {
			predictor,
			config,
			matrix: RatingMatrix::default(),
			active: RecentRatings::default(),
			log,
		}
	}

	/// Rebuild the rating maps from `ratings`, replacing prior state.
	pub fn initialize(&mut self, ratings: &[Rating]) {
		self.matrix = RatingMatrix::from_ratings(ratings);
		self.active.clear();
		self.log.info(format!(
			"Initialized with {} ratings from {} users over {} items",
			ratings.len(),
			self.matrix.user_count(),
			self.matrix.item_count()
		));
		self.predictor
			.initialize(&self.matrix, &self.config, &mut self.log);
	}

	pub fn matrix(&self) -> &RatingMatrix {
		&self.matrix
	}

	pub fn predictor(&self) -> &P {
		&self.predictor
	}

	pub fn calculate_similarity(&self, id1: &str, id2: &str, kind: SimilarityKind) -> f64 {
		self.matrix
			.calculate_similarity(id1, id2, kind, self.config.min_ratings)
	}

	pub fn get_similar_users(&self, user_id: &str, top_n: usize) -> Vec<ScoredItem> {
		self.matrix
			.similar_users(user_id, top_n, self.config.min_ratings)
	}

	pub fn get_similar_items(&self, business_id: &str, top_n: usize) -> Vec<ScoredItem> {
		self.matrix
			.similar_items(business_id, top_n, self.config.min_ratings)
	}

	/// Prediction from the user's stored training ratings.
	pub fn predict_rating(&self, user_id: &str, business_id: &str) -> f64 {
		let profile = self.profile_for(user_id);
		self.predictor
			.predict_rating(&self.matrix, user_id, &profile, business_id, &self.config)
	}

	fn profile_for(&self, user_id: &str) -> UserRatings {
		self.active
			.get(user_id)
			.or_else(|| self.matrix.user(user_id))
			.cloned()
			.unwrap_or_default()
	}
}

impl<P: CfPredictor> Recommender for CollaborativeRecommender<P> {
	fn name(&self) -> &str {
		self.predictor.name()
	}

	fn fit(&mut self, dataset: &Dataset) -> Result<(), RecommendError> {
		self.initialize(&dataset.ratings);
		Ok(())
	}

	fn recommend(
		&mut self,
		user_id: &str,
		user_ratings: &UserRatings,
		top_n: usize,
	) -> RecommendationResult {
		let mark = self.log.mark();
		let method = self.predictor.name();

		if user_ratings.is_empty() {
			self.log.info(format!("User {} has no ratings", user_id));
			return RecommendationResult::empty(
				method,
				no_ratings_explanation(user_id),
				self.log.since(mark),
			);
		}

		let profile = merge_profile(self.matrix.user(user_id), user_ratings);
		let predictions =
			self.predictor
				.predict_unrated(&self.matrix, user_id, &profile, &self.config);
		let candidates = predictions.len();
		let threshold = self.config.rating_threshold;
		let items: Vec<ScoredItem> = predictions
			.into_iter()
			.filter(|s| s.score >= threshold && !user_ratings.contains_key(&s.id))
			.collect();
		self.active.insert(user_id, profile);

		if items.is_empty() {
			self.log.warning(format!(
				"No prediction for user {} reached {:.1} ({} candidates)",
				user_id, threshold, candidates
			));
			let explanation = if candidates == 0 {
				format!("Not enough overlapping ratings to find neighbours for user {user_id}")
			} else {
				format!("No restaurant is predicted at or above {threshold:.1} stars for user {user_id}")
			};
			return RecommendationResult::empty(method, explanation, self.log.since(mark));
		}

		self.log.info(format!(
			"{} of {} predictions for user {} reached {:.1}",
			items.len(),
			candidates,
			user_id,
			threshold
		));
		RecommendationResult::from_ranked(
			items,
			top_n,
			self.predictor.describe(),
			method,
			self.log.since(mark),
		)
	}

	fn explain(&self, user_id: &str, business_id: &str) -> String {
		let profile = self.profile_for(user_id);
		if profile.is_empty() {
			return no_ratings_explanation(user_id);
		}
		if self.matrix.item(business_id).is_none() {
			return format!("Nobody in the training data has rated restaurant {business_id}");
		}
		self.predictor
			.explain(&self.matrix, user_id, &profile, business_id, &self.config)
	}

	fn score_range(&self) -> (f64, f64) {
		self.matrix.rating_range()
	}

	fn log(&self) -> &RecommenderLog {
		&self.log
	}
}

#[cfg(test)]
pub(crate) mod tests {
	use super::*;

	pub(crate) fn rating(user: &str, item: &str, value: f64) -> Rating {
		Rating {
			user_id: user.into(),
			business_id: item.into(),
			rating: value,
		}
	}

	/// Alice and Bob agree, Carol disagrees with both.
	pub(crate) fn taste_ratings() -> Vec<Rating> {
		vec![
			rating("alice", "a", 5.0),
			rating("alice", "b", 4.0),
			rating("alice", "c", 1.0),
			rating("bob", "a", 5.0),
			rating("bob", "b", 5.0),
			rating("bob", "c", 2.0),
			rating("bob", "d", 5.0),
			rating("carol", "a", 1.0),
			rating("carol", "b", 2.0),
			rating("carol", "c", 5.0),
			rating("carol", "e", 5.0),
		]
	}

	#[test]
	fn matrix_holds_both_orientations() {
		let m = RatingMatrix::from_ratings(&taste_ratings());
		assert_eq!(m.user_count(), 3);
		assert_eq!(m.item_count(), 5);
		assert_eq!(m.user("bob").unwrap()["d"], 5.0);
		assert_eq!(m.item("d").unwrap()["bob"], 5.0);
		assert_eq!(m.rating_range(), (1.0, 5.0));
	}

	#[test]
	fn similarity_needs_enough_common_ratings() {
		let m = RatingMatrix::from_ratings(&taste_ratings());
		assert!(m.calculate_similarity("alice", "bob", SimilarityKind::User, 2) > 0.0);
		assert_eq!(m.calculate_similarity("alice", "bob", SimilarityKind::User, 4), 0.0);
		assert_eq!(m.calculate_similarity("alice", "nobody", SimilarityKind::User, 1), 0.0);
	}

	#[test]
	fn similar_users_are_positive_only() {
		let m = RatingMatrix::from_ratings(&taste_ratings());
		let similar = m.similar_users("alice", 10, 2);
		assert_eq!(similar.len(), 1);
		assert_eq!(similar[0].id, "bob");
	}

	#[test]
	fn similar_items_follow_co_ratings() {
		let m = RatingMatrix::from_ratings(&taste_ratings());
		let similar = m.similar_items("a", 10, 2);
		assert_eq!(similar[0].id, "b");
		assert!(similar.iter().all(|s| s.id != "c"));
	}

	#[test]
	fn merge_prefers_supplied_ratings() {
		let stored: UserRatings = [("a".to_string(), 1.0), ("b".to_string(), 2.0)].into_iter().collect();
		let supplied: UserRatings = [("a".to_string(), 5.0)].into_iter().collect();
		let merged = merge_profile(Some(&stored), &supplied);
		assert_eq!(merged["a"], 5.0);
		assert_eq!(merged["b"], 2.0);
	}
}
