use std::collections::HashMap;

use crate::collaborative::{CfPredictor, RatingMatrix, SimilarityKind};
use crate::config::CollaborativeConfig;
use crate::logs::RecommenderLog;
use crate::types::UserRatings;

/// Predicts from the user's own ratings of similar items.
///
/// All item pairs are scored once in `initialize`, which is quadratic in the
/// catalog size. Fine for a few thousand items; larger catalogs need an
/// approximate neighbour index instead.
#[derive(Debug, Default)]
pub struct ItemBasedPredictor {
	cache: HashMap<String, HashMap<String, f64>>,
}

impl ItemBasedPredictor {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn similarity_cache(&self) -> &HashMap<String, HashMap<String, f64>> {
		&self.cache
	}

	pub fn similarity(&self, a: &str, b: &str) -> f64 {
		self.cache
			.get(a)
			.and_then(|row| row.get(b))
			.copied()
			.unwrap_or(0.0)
	}

	/// The user's rated items most similar to `business_id`, positive only.
	fn rated_neighbours<'a>(
		&self,
		profile: &'a UserRatings,
		business_id: &str,
		limit: usize,
	) -> Vec<(&'a String, f64, f64)> {
		let mut neighbours: Vec<(&String, f64, f64)> = profile
			.iter()
			.filter(|(id, _)| id.as_str() != business_id)
			.map(|(id, r)| (id, self.similarity(business_id, id), *r))
			.filter(|(_, sim, _)| *sim > 0.0)
			.collect();
		neighbours.sort_by(|a, b| {
			b.1.partial_cmp(&a.1)
				.unwrap_or(std::cmp::Ordering::Equal)
				.then_with(|| a.0.cmp(b.0))
		});
		neighbours.truncate(limit);
		neighbours
	}
}

impl CfPredictor for ItemBasedPredictor {
	fn name(&self) -> &'static str {
		"item-cf"
	}

	fn describe(&self) -> &'static str {
		"Restaurants that people rate like the ones you rated highly"
	}

	fn initialize(
		&mut self,
		matrix: &RatingMatrix,
		config: &CollaborativeConfig,
		log: &mut RecommenderLog,
	) {
		self.cache.clear();
		let items: Vec<&String> = matrix.items().collect();
		for (i, a) in items.iter().enumerate() {
			for b in &items[i + 1..] {
				let sim = matrix.calculate_similarity(a, b, SimilarityKind::Item, config.min_ratings);
				self.cache
					.entry((*a).clone())
					.or_default()
					.insert((*b).clone(), sim);
				self.cache
					.entry((*b).clone())
					.or_default()
					.insert((*a).clone(), sim);
			}
		}
		let pairs = items.len() * items.len().saturating_sub(1) / 2;
		log.info(format!(
			"Cached {} item-item similarities for {} items",
			pairs,
			items.len()
		));
	}

	fn predict_rating(
		&self,
		_matrix: &RatingMatrix,
		_user_id: &str,
		profile: &UserRatings,
		business_id: &str,
		config: &CollaborativeConfig,
	) -> f64 {
		let neighbours = self.rated_neighbours(profile, business_id, config.neighborhood_size);
		if neighbours.is_empty() || neighbours.len() < config.min_similar_users {
			return 0.0;
		}
		let total: f64 = neighbours.iter().map(|(_, sim, _)| sim).sum();
		if total <= 0.0 {
			return 0.0;
		}
		neighbours.iter().map(|(_, sim, r)| sim * r).sum::<f64>() / total
	}

	fn explain(
		&self,
		matrix: &RatingMatrix,
		user_id: &str,
		profile: &UserRatings,
		business_id: &str,
		config: &CollaborativeConfig,
	) -> String {
		let neighbours = self.rated_neighbours(profile, business_id, 3);
		if neighbours.is_empty() {
			return format!(
				"{business_id} is not rated like any restaurant you have rated"
			);
		}
		let names: Vec<String> = neighbours
			.iter()
			.map(|(id, sim, r)| format!("{} (you rated {:.1}, similarity {:.2})", id, r, sim))
			.collect();
		format!(
			"{} is rated like {}; predicted {:.1}",
			business_id,
			names.join(", "),
			self.predict_rating(matrix, user_id, profile, business_id, config)
		)
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::collaborative::tests::taste_ratings;
	use crate::collaborative::CollaborativeRecommender;
	use crate::recommender::Recommender;

	fn recommender() -> CollaborativeRecommender<ItemBasedPredictor> {
		let mut rec = CollaborativeRecommender::new(ItemBasedPredictor::new(), CollaborativeConfig::default());
		rec.initialize(&taste_ratings());
		rec
	}

	#[test]
	fn cache_is_symmetric() {
		let rec = recommender();
		let cache = rec.predictor().similarity_cache();
		assert_eq!(cache.len(), 5);
		for (a, row) in cache {
			for (b, sim) in row {
				assert_eq!(cache[b][a], *sim);
			}
		}
	}

	#[test]
	fn predicts_from_rated_neighbours() {
		let rec = recommender();
		let sim_ab = rec.predictor().similarity("a", "b");
		assert!(sim_ab > 0.0);
		let profile: UserRatings = [("a".to_string(), 4.0)].into_iter().collect();
		let p = rec
			.predictor()
			.predict_rating(rec.matrix(), "dave", &profile, "b", &CollaborativeConfig::default());
		assert!((p - 4.0).abs() < 1e-9);
	}

	#[test]
	fn recommend_excludes_supplied_ratings() {
		let mut rec = recommender();
		let profile: UserRatings = [("a".to_string(), 5.0)].into_iter().collect();
		let result = rec.recommend("dave", &profile, 5);
		assert_eq!(result.recommendations, vec!["b"]);
		assert_eq!(result.method, "item-cf");
	}

	#[test]
	fn explain_lists_rated_neighbours() {
		let mut rec = recommender();
		let profile: UserRatings = [("a".to_string(), 5.0)].into_iter().collect();
		rec.recommend("dave", &profile, 5);
		assert!(rec.explain("dave", "b").contains("a (you rated 5.0"));
	}
}
