//! Content-based recommendation.
//!
//! A `ContentProfiler` turns restaurant text into a fixed-length vector;
//! `ContentRecommender` owns the resulting item profiles and ranks unseen
//! restaurants by their similarity to the ones a user rated highest.

pub mod embedding;
pub mod lsa;
pub mod tfidf;

use std::collections::HashMap;

use crate::config::ContentConfig;
use crate::error::RecommendError;
use crate::logs::RecommenderLog;
use crate::recommender::{no_ratings_explanation, Recommender};
use crate::similarity::cosine_similarity;
use crate::types::{
	Dataset, Embedding, EmbeddingMethod, ItemProfile, Restaurant, Review, ScoredItem,
	RecentRatings, RecommendationResult, SimilarityScore, UserRatings,
};

pub use embedding::{EmbeddingProfiler, HashEmbedder, TextEmbedder, TimeoutEmbedder};
pub use lsa::LsaProfiler;
pub use tfidf::TfIdfProfiler;

/// Strategy that maps restaurant text to an embedding.
///
/// `fit` sees the whole corpus once before any `embed` call, so every vector
/// from one fitted profiler has `dimensions()` entries.
pub trait ContentProfiler {
	fn name(&self) -> &'static str;

	fn method(&self) -> EmbeddingMethod;

	fn dimensions(&self) -> usize;

	fn fit(&mut self, corpus: &[String]) -> Result<(), RecommendError>;

	fn embed(&mut self, text: &str, log: &mut RecommenderLog) -> Result<Vec<f64>, RecommendError>;

	/// Terms that explain why two vectors are close, strongest first.
	fn shared_terms(&self, _a: &[f64], _b: &[f64], _n: usize) -> Vec<String> {
		Vec::new()
	}
}

/// Map an average star rating in [1, 5] onto [-1, 1].
pub fn sentiment_from_rating(avg: f64) -> f64 {
	if !avg.is_finite() {
		return 0.0;
	}
	((avg - 3.0) / 2.0).clamp(-1.0, 1.0)
}

/// Text a restaurant is profiled from: categories, its own description and
/// every review. The name is left out so chains do not dominate similarity.
pub fn document_text(restaurant: &Restaurant, reviews: &[&Review]) -> String {
	let mut parts: Vec<&str> = restaurant.categories.iter().map(String::as_str).collect();
	if let Some(text) = restaurant.review_text.as_deref() {
		parts.push(text);
	}
	parts.extend(reviews.iter().map(|r| r.review_text.as_str()));
	parts.join(" ")
}

/// Group reviews by business id.
pub fn reviews_by_business(reviews: &[Review]) -> HashMap<&str, Vec<&Review>> {
	let mut grouped: HashMap<&str, Vec<&Review>> = HashMap::new();
	for review in reviews {
		grouped.entry(review.business_id.as_str()).or_default().push(review);
	}
	grouped
}

// ---------------------------------------------------------------------------
// ContentRecommender
// ---------------------------------------------------------------------------

pub struct ContentRecommender<P: ContentProfiler> {
	profiler: P,
	config: ContentConfig,
	profiles: HashMap<String, ItemProfile>,
	/// Profile ids in build order, for reproducible scans.
	order: Vec<String>,
	names: HashMap<String, String>,
	trained: HashMap<String, UserRatings>,
	recent: RecentRatings,
	log: RecommenderLog,
}

impl<P: ContentProfiler> ContentRecommender<P> {
	pub fn new(profiler: P, config: ContentConfig) -> Self {
		let log = RecommenderLog::new(profiler.name());
		Self {
			profiler,
			config,
			profiles: HashMap::new(),
			order: Vec::new(),
			names: HashMap::new(),
			trained: HashMap::new(),
			recent: RecentRatings::default(),
			log,
		}
	}

	pub fn profiler(&self) -> &P {
		&self.profiler
	}

	pub fn profile(&self, business_id: &str) -> Option<&ItemProfile> {
		self.profiles.get(business_id)
	}

	pub fn profile_count(&self) -> usize {
		self.profiles.len()
	}

	/// Replace all profiles with ones built from `restaurants`.
	///
	/// The profiler is fitted on the full corpus first. A restaurant whose
	/// profile cannot be built is logged and skipped.
	pub fn build_item_profiles(
		&mut self,
		restaurants: &[Restaurant],
		reviews: &[Review],
	) -> Result<(), RecommendError> {
		self.profiles.clear();
		self.order.clear();
		self.names.clear();

		if restaurants.is_empty() {
			self.log.warning("No restaurants supplied; content profiles are empty");
			return Ok(());
		}

		let grouped = reviews_by_business(reviews);
		let no_reviews: Vec<&Review> = Vec::new();
		let reviews_for = |id: &str| grouped.get(id).unwrap_or(&no_reviews);

		let corpus: Vec<String> = restaurants
			.iter()
			.map(|r| document_text(r, reviews_for(r.business_id.as_str())))
			.collect();
		self.profiler.fit(&corpus)?;
		let dims = self.profiler.dimensions();

		for restaurant in restaurants {
			let id = &restaurant.business_id;
			match self.build_item_profile(restaurant, reviews_for(id.as_str())) {
				Ok(profile) if profile.embedding.vector.len() == dims => {
					if self.profiles.insert(id.clone(), profile).is_none() {
						self.order.push(id.clone());
					}
					self.names.insert(id.clone(), restaurant.name.clone());
				}
				Ok(profile) => self.log.error(format!(
					"Profile for {} has {} dimensions (expected {}), skipping",
					id,
					profile.embedding.vector.len(),
					dims
				)),
				Err(e) => self.log.error(format!("Failed to build profile for {}: {}", id, e)),
			}
		}

		self.log.info(format!(
			"Built {} item profiles ({} dimensions) from {} restaurants and {} reviews",
			self.profiles.len(),
			dims,
			restaurants.len(),
			reviews.len()
		));
		Ok(())
	}

	pub fn build_item_profile(
		&mut self,
		restaurant: &Restaurant,
		reviews: &[&Review],
	) -> Result<ItemProfile, RecommendError> {
		let text = document_text(restaurant, reviews);
		let vector = self.profiler.embed(&text, &mut self.log)?;

		let sentiment_score = if reviews.is_empty() {
			0.0
		} else {
			let avg = reviews.iter().map(|r| r.rating).sum::<f64>() / reviews.len() as f64;
			sentiment_from_rating(avg)
		};

		Ok(ItemProfile {
			business_id: restaurant.business_id.clone(),
			embedding: Embedding {
				vector,
				method: self.profiler.method(),
			},
			sentiment_score,
		})
	}

	/// Every other profile scored against `business_id`, best first. `None`
	/// when the target has no profile.
	fn similar_to(&self, business_id: &str) -> Option<Vec<SimilarityScore>> {
		let target = self.profiles.get(business_id)?;
		let mut scored: Vec<ScoredItem> = self
			.order
			.iter()
			.filter(|id| id.as_str() != business_id)
			.filter_map(|id| {
				let profile = self.profiles.get(id)?;
				let score = cosine_similarity(&target.embedding.vector, &profile.embedding.vector);
				Some(ScoredItem::new(id.clone(), score))
			})
			.collect();
		crate::types::rank_descending(&mut scored);
		Some(
			scored
				.into_iter()
				.map(|s| SimilarityScore {
					business_id: s.id,
					score: s.score,
				})
				.collect(),
		)
	}

	pub fn find_similar_items(&mut self, business_id: &str, top_n: usize) -> Vec<SimilarityScore> {
		match self.similar_to(business_id) {
			Some(mut similar) => {
				similar.truncate(top_n);
				similar
			}
			None => {
				self.log.error(format!("No profile for business {}", business_id));
				Vec::new()
			}
		}
	}

	fn display_name<'a>(&'a self, business_id: &'a str) -> &'a str {
		self.names
			.get(business_id)
			.map(String::as_str)
			.unwrap_or(business_id)
	}
}

impl<P: ContentProfiler> Recommender for ContentRecommender<P> {
	fn name(&self) -> &str {
		self.profiler.name()
	}

	fn fit(&mut self, dataset: &Dataset) -> Result<(), RecommendError> {
		self.trained = dataset.ratings_by_user();
		self.recent.clear();
		self.build_item_profiles(&dataset.restaurants, &dataset.reviews)
	}

	fn recommend(
		&mut self,
		user_id: &str,
		user_ratings: &UserRatings,
		top_n: usize,
	) -> RecommendationResult {
		let mark = self.log.mark();
		let method = self.profiler.name();

		if user_ratings.is_empty() {
			self.log.info(format!("User {} has no ratings", user_id));
			return RecommendationResult::empty(
				method,
				no_ratings_explanation(user_id),
				self.log.since(mark),
			);
		}
		self.recent.insert(user_id, user_ratings.clone());

		let mut sources: Vec<(&String, f64)> = user_ratings
			.iter()
			.filter(|(id, _)| self.profiles.contains_key(id.as_str()))
			.map(|(id, r)| (id, *r))
			.collect();
		sources.sort_by(|a, b| {
			b.1.partial_cmp(&a.1)
				.unwrap_or(std::cmp::Ordering::Equal)
				.then_with(|| a.0.cmp(b.0))
		});
		sources.truncate(self.config.top_sources);

		if sources.is_empty() {
			self.log.warning(format!(
				"None of the {} restaurants rated by {} have a content profile",
				user_ratings.len(),
				user_id
			));
			return RecommendationResult::empty(
				method,
				format!("None of the restaurants rated by user {user_id} could be profiled"),
				self.log.since(mark),
			);
		}

		let fetch = top_n + user_ratings.len();
		let mut totals: HashMap<String, f64> = HashMap::new();
		for (source, _) in &sources {
			let similar = self.similar_to(source).unwrap_or_default();
			for s in similar.into_iter().take(fetch) {
				if user_ratings.contains_key(&s.business_id) {
					continue;
				}
				*totals.entry(s.business_id).or_default() += s.score;
			}
		}

		let source_names: Vec<String> = sources
			.iter()
			.map(|(id, _)| self.display_name(id).to_string())
			.collect();
		let items: Vec<ScoredItem> = totals
			.into_iter()
			.map(|(id, score)| ScoredItem::new(id, score))
			.collect();

		if items.is_empty() {
			self.log.info(format!("No similar unrated restaurants for user {}", user_id));
			return RecommendationResult::empty(
				method,
				format!(
					"No unrated restaurants are similar to {}",
					source_names.join(", ")
				),
				self.log.since(mark),
			);
		}

		self.log.info(format!(
			"Scored {} candidates for user {} from {} source restaurants",
			items.len(),
			user_id,
			sources.len()
		));
		RecommendationResult::from_ranked(
			items,
			top_n,
			format!(
				"Restaurants similar to ones you rated highly: {}",
				source_names.join(", ")
			),
			method,
			self.log.since(mark),
		)
	}

	fn explain(&self, user_id: &str, business_id: &str) -> String {
		let Some(target) = self.profiles.get(business_id) else {
			return format!("No content profile is available for restaurant {business_id}");
		};
		let ratings = self.recent.get(user_id).or_else(|| self.trained.get(user_id));
		let Some(ratings) = ratings.filter(|r| !r.is_empty()) else {
			return format!(
				"{} matches the content of restaurants in the catalog",
				self.display_name(business_id)
			);
		};

		let best = ratings
			.keys()
			.filter(|id| id.as_str() != business_id)
			.filter_map(|id| {
				let p = self.profiles.get(id)?;
				Some((
					id,
					cosine_similarity(&target.embedding.vector, &p.embedding.vector),
				))
			})
			.max_by(|a, b| {
				a.1.partial_cmp(&b.1)
					.unwrap_or(std::cmp::Ordering::Equal)
					.then_with(|| b.0.cmp(a.0))
			});

		match best {
			Some((source, sim)) => {
				let mut text = format!(
					"{} is {:.0}% similar to {}, which you rated {:.1}",
					self.display_name(business_id),
					sim.max(0.0) * 100.0,
					self.display_name(source),
					ratings[source]
				);
				let source_vec = &self.profiles[source].embedding.vector;
				let terms = self
					.profiler
					.shared_terms(&target.embedding.vector, source_vec, 3);
				if !terms.is_empty() {
					text.push_str(&format!(" (shared: {})", terms.join(", ")));
				}
				text
			}
			None => format!(
				"None of your rated restaurants have a content profile to compare with {}",
				self.display_name(business_id)
			),
		}
	}

	fn score_range(&self) -> (f64, f64) {
		(0.0, self.config.top_sources as f64)
	}

	fn log(&self) -> &RecommenderLog {
		&self.log
	}
}

#[cfg(test)]
pub(crate) mod tests {
	use super::*;

	pub(crate) fn restaurant(id: &str, name: &str, categories: &[&str]) -> Restaurant {
		Restaurant {
			business_id: id.into(),
			name: name.into(),
			categories: categories.iter().map(|c| c.to_string()).collect(),
			review_text: None,
		}
	}

	pub(crate) fn review(business: &str, user: &str, text: &str, rating: f64) -> Review {
		Review {
			business_id: business.into(),
			user_id: user.into(),
			review_text: text.into(),
			rating,
		}
	}

	fn catalog() -> (Vec<Restaurant>, Vec<Review>) {
		let restaurants = vec![
			restaurant("r1", "Ramen Ya", &["Japanese", "Ramen"]),
			restaurant("r2", "Noodle Bar", &["Japanese", "Ramen"]),
			restaurant("p1", "Slice", &["Pizza", "Italian"]),
			restaurant("p2", "Oven", &["Pizza", "Italian"]),
		];
		let reviews = vec![
			review("r1", "u1", "rich pork broth and springy noodles", 5.0),
			review("r2", "u2", "spicy broth with thick noodles", 4.0),
			review("p1", "u1", "crispy crust and fresh mozzarella", 2.0),
			review("p2", "u3", "wood fired crust with basil mozzarella", 4.0),
		];
		(restaurants, reviews)
	}

	fn fitted() -> ContentRecommender<TfIdfProfiler> {
		let (restaurants, reviews) = catalog();
		let mut rec = ContentRecommender::new(TfIdfProfiler::new(100), ContentConfig::default());
		rec.build_item_profiles(&restaurants, &reviews).unwrap();
		rec
	}

	struct PickyProfiler;

	impl ContentProfiler for PickyProfiler {
		fn name(&self) -> &'static str {
			"picky"
		}
		fn method(&self) -> EmbeddingMethod {
			EmbeddingMethod::TextEmbedding
		}
		fn dimensions(&self) -> usize {
			2
		}
		fn fit(&mut self, _corpus: &[String]) -> Result<(), RecommendError> {
			Ok(())
		}
		fn embed(&mut self, text: &str, _log: &mut RecommenderLog) -> Result<Vec<f64>, RecommendError> {
			if text.contains("Pizza") {
				Err(RecommendError::Embedding("no pizza".into()))
			} else {
				Ok(vec![1.0, 0.0])
			}
		}
	}

	// -- profiles ---------------------------------------------------------

	#[test]
	fn sentiment_maps_rating_scale() {
		assert_eq!(sentiment_from_rating(5.0), 1.0);
		assert_eq!(sentiment_from_rating(3.0), 0.0);
		assert_eq!(sentiment_from_rating(1.0), -1.0);
		assert_eq!(sentiment_from_rating(f64::NAN), 0.0);
	}

	#[test]
	fn profiles_share_dimensions() {
		let rec = fitted();
		assert_eq!(rec.profile_count(), 4);
		let dims = rec.profile("r1").unwrap().embedding.vector.len();
		for id in ["r2", "p1", "p2"] {
			assert_eq!(rec.profile(id).unwrap().embedding.vector.len(), dims);
		}
		assert_eq!(rec.profile("r1").unwrap().sentiment_score, 1.0);
	}

	#[test]
	fn failed_profiles_are_skipped() {
		let (restaurants, reviews) = catalog();
		let mut rec = ContentRecommender::new(PickyProfiler, ContentConfig::default());
		rec.build_item_profiles(&restaurants, &reviews).unwrap();
		assert_eq!(rec.profile_count(), 2);
		assert!(rec.formatted_logs().iter().any(|l| l.contains("[ERROR]")));
	}

	#[test]
	fn identical_text_profiles_match() {
		let restaurants = vec![
			restaurant("a", "A", &["Cafe"]),
			restaurant("b", "B", &["Cafe"]),
			restaurant("c", "C", &["Steakhouse"]),
		];
		let reviews = vec![
			review("a", "u", "great espresso and pastries", 4.0),
			review("b", "u", "great espresso and pastries", 4.0),
			review("c", "u", "dry aged ribeye", 5.0),
		];
		let mut rec = ContentRecommender::new(TfIdfProfiler::new(100), ContentConfig::default());
		rec.build_item_profiles(&restaurants, &reviews).unwrap();
		let similar = rec.find_similar_items("a", 1);
		assert_eq!(similar[0].business_id, "b");
		assert!((similar[0].score - 1.0).abs() < 1e-9);
	}

	// -- similarity search ------------------------------------------------

	#[test]
	fn similar_items_rank_same_cuisine_first() {
		let mut rec = fitted();
		let similar = rec.find_similar_items("r1", 3);
		assert_eq!(similar.len(), 3);
		assert_eq!(similar[0].business_id, "r2");
		assert!(similar.windows(2).all(|w| w[0].score >= w[1].score));
	}

	#[test]
	fn unknown_target_logs_error() {
		let mut rec = fitted();
		assert!(rec.find_similar_items("missing", 5).is_empty());
		assert!(rec
			.formatted_logs()
			.last()
			.unwrap()
			.contains("No profile for business missing"));
	}

	// -- recommendations --------------------------------------------------

	#[test]
	fn recommends_unrated_similar_items() {
		let mut rec = fitted();
		let ratings: UserRatings = [("r1".to_string(), 5.0)].into_iter().collect();
		let result = rec.recommend("u1", &ratings, 2);
		assert_eq!(result.recommendations[0], "r2");
		assert!(!result.recommendations.contains(&"r1".to_string()));
		assert_eq!(result.recommendations.len(), result.scores.len());
		assert!(result.explanation.contains("Ramen Ya"));
		assert!(!result.logs.is_empty());
	}

	#[test]
	fn unrelated_items_rank_last_instead_of_vanishing() {
		let mut rec = fitted();
		let ratings: UserRatings = [("r1".to_string(), 5.0)].into_iter().collect();
		let result = rec.recommend("u1", &ratings, 10);
		assert_eq!(result.recommendations.len(), 3);
		assert_eq!(result.recommendations[0], "r2");
		assert!(result.scores[1..].iter().all(|s| *s <= result.scores[0]));
	}

	#[test]
	fn empty_ratings_give_explained_empty_result() {
		let mut rec = fitted();
		let result = rec.recommend("u9", &UserRatings::new(), 5);
		assert!(result.is_empty());
		assert!(result.scores.is_empty());
		assert!(result.explanation.contains("No ratings"));
	}

	#[test]
	fn explain_names_closest_rated_item() {
		let mut rec = fitted();
		let ratings: UserRatings = [("r1".to_string(), 5.0), ("p1".to_string(), 2.0)]
			.into_iter()
			.collect();
		rec.recommend("u1", &ratings, 2);
		let text = rec.explain("u1", "r2");
		assert!(text.contains("Ramen Ya"));
		assert!(text.contains("shared"));
	}

	#[test]
	fn explain_unknown_business() {
		let rec = fitted();
		assert!(rec.explain("u1", "nope").contains("No content profile"));
	}
}
