use std::collections::BTreeSet;

use crate::collaborative::{CfPredictor, RatingMatrix};
use crate::config::CollaborativeConfig;
use crate::types::{ScoredItem, UserRatings};

/// Predicts from the ratings of the user's nearest neighbours.
#[derive(Debug, Default)]
pub struct UserBasedPredictor;

impl UserBasedPredictor {
	pub fn new() -> Self {
		Self
	}

	fn neighbours(
		matrix: &RatingMatrix,
		user_id: &str,
		profile: &UserRatings,
		config: &CollaborativeConfig,
	) -> Vec<ScoredItem> {
		matrix.similar_to_profile(profile, user_id, config.neighborhood_size, config.min_ratings)
	}

	/// Similarity-weighted mean of the neighbours' ratings for one item.
	fn weighted_rating(
		matrix: &RatingMatrix,
		neighbours: &[ScoredItem],
		business_id: &str,
		min_similar_users: usize,
	) -> f64 {
		let Some(raters) = matrix.item(business_id) else {
			return 0.0;
		};
		let mut weighted = 0.0;
		let mut total = 0.0;
		let mut count = 0;
		for n in neighbours {
			if let Some(r) = raters.get(&n.id) {
				weighted += n.score * r;
				total += n.score;
				count += 1;
			}
		}
		if count == 0 || count < min_similar_users || total <= 0.0 {
			return 0.0;
		}
		weighted / total
	}
}

impl CfPredictor for UserBasedPredictor {
	fn name(&self) -> &'static str {
		"user-cf"
	}

	fn describe(&self) -> &'static str {
		"Restaurants rated highly by users with similar taste"
	}

	fn predict_rating(
		&self,
		matrix: &RatingMatrix,
		user_id: &str,
		profile: &UserRatings,
		business_id: &str,
		config: &CollaborativeConfig,
	) -> f64 {
		let neighbours = Self::neighbours(matrix, user_id, profile, config);
		Self::weighted_rating(matrix, &neighbours, business_id, config.min_similar_users)
	}

	fn predict_unrated(
		&self,
		matrix: &RatingMatrix,
		user_id: &str,
		profile: &UserRatings,
		config: &CollaborativeConfig,
	) -> Vec<ScoredItem> {
		let neighbours = Self::neighbours(matrix, user_id, profile, config);
		if neighbours.is_empty() {
			return Vec::new();
		}

		// Only items some neighbour rated can be predicted.
		let mut candidates: BTreeSet<&str> = BTreeSet::new();
		for n in &neighbours {
			if let Some(row) = matrix.user(&n.id) {
				for id in row.keys() {
					if !profile.contains_key(id) {
						candidates.insert(id.as_str());
					}
				}
			}
		}

		candidates
			.into_iter()
			.map(|id| {
				ScoredItem::new(
					id,
					Self::weighted_rating(matrix, &neighbours, id, config.min_similar_users),
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
	) -> String {
		let neighbours = Self::neighbours(matrix, user_id, profile, config);
		let raters: Vec<(&ScoredItem, f64)> = neighbours
			.iter()
			.filter_map(|n| {
				let r = matrix.item(business_id)?.get(&n.id)?;
				Some((n, *r))
			})
			.collect();
		if raters.is_empty() {
			return format!(
				"None of the {} users most similar to you have rated {business_id}",
				neighbours.len()
			);
		}
		let avg = raters.iter().map(|(_, r)| r).sum::<f64>() / raters.len() as f64;
		let predicted =
			Self::weighted_rating(matrix, &neighbours, business_id, config.min_similar_users);
		format!(
			"{} users with similar taste (closest: {}, similarity {:.2}) rated {} {:.1} on average; predicted {:.1}",
			raters.len(),
			raters[0].0.id,
			raters[0].0.score,
			business_id,
			avg,
			predicted
		)
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::collaborative::tests::{rating, taste_ratings};
	use crate::collaborative::CollaborativeRecommender;
	use crate::recommender::Recommender;

	fn recommender() -> CollaborativeRecommender<UserBasedPredictor> {
		let mut rec = CollaborativeRecommender::new(UserBasedPredictor::new(), CollaborativeConfig::default());
		rec.initialize(&taste_ratings());
		rec
	}

	#[test]
	fn predicts_from_similar_users() {
		let rec = recommender();
		assert_eq!(rec.predict_rating("alice", "d"), 5.0);
		// Only Carol rated e and she is not a neighbour.
		assert_eq!(rec.predict_rating("alice", "e"), 0.0);
	}

	#[test]
	fn recommends_neighbour_favourites() {
		let mut rec = recommender();
		let ratings = rec.matrix().user("alice").cloned().unwrap();
		let result = rec.recommend("alice", &ratings, 5);
		assert_eq!(result.recommendations, vec!["d"]);
		assert_eq!(result.scores, vec![5.0]);
		assert_eq!(result.method, "user-cf");
	}

	#[test]
	fn threshold_filters_low_predictions() {
		let mut ratings = taste_ratings();
		ratings.push(rating("bob", "f", 2.0));
		let mut rec = CollaborativeRecommender::new(UserBasedPredictor::new(), CollaborativeConfig::default());
		rec.initialize(&ratings);
		let alice = rec.matrix().user("alice").cloned().unwrap();
		let result = rec.recommend("alice", &alice, 5);
		assert!(!result.recommendations.contains(&"f".to_string()));
	}

	#[test]
	fn unknown_user_without_overlap_gets_explained_empty() {
		let mut rec = recommender();
		let ratings: UserRatings = [("zzz".to_string(), 4.0)].into_iter().collect();
		let result = rec.recommend("newbie", &ratings, 5);
		assert!(result.is_empty());
		assert!(!result.explanation.is_empty());
	}

	#[test]
	fn explain_mentions_neighbour() {
		let mut rec = recommender();
		let alice = rec.matrix().user("alice").cloned().unwrap();
		rec.recommend("alice", &alice, 5);
		let text = rec.explain("alice", "d");
		assert!(text.contains("bob"));
	}
}
