use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};

/// Ratings a single user gave, keyed by business id.
pub type UserRatings = HashMap<String, f64>;

const DEFAULT_RECENT_USERS: usize = 1000;

/// Ratings most recently supplied per user, for explanations. Holds at most
/// `capacity` users; the least recently inserted is dropped first.
#[derive(Debug, Clone)]
pub struct RecentRatings {
	capacity: usize,
	order: VecDeque<String>,
	ratings: HashMap<String, UserRatings>,
}

impl RecentRatings {
	pub fn with_capacity(capacity: usize) -> Self {
		Self {
			capacity: capacity.max(1),
			order: VecDeque::new(),
			ratings: HashMap::new(),
		}
	}

	pub fn insert(&mut self, user_id: &str, ratings: UserRatings) {
		if self.ratings.insert(user_id.to_string(), ratings).is_some() {
			self.order.retain(|u| u != user_id);
		}
		self.order.push_back(user_id.to_string());
		while self.order.len() > self.capacity {
			if let Some(oldest) = self.order.pop_front() {
				self.ratings.remove(&oldest);
			}
		}
	}

	pub fn get(&self, user_id: &str) -> Option<&UserRatings> {
		self.ratings.get(user_id)
	}

	pub fn len(&self) -> usize {
		self.order.len()
	}

	pub fn is_empty(&self) -> bool {
		self.order.is_empty()
	}

	pub fn clear(&mut self) {
		self.order.clear();
		self.ratings.clear();
	}
}

impl Default for RecentRatings {
	fn default() -> Self {
		Self::with_capacity(DEFAULT_RECENT_USERS)
	}
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Restaurant {
	pub business_id: String,
	pub name: String,
	#[serde(default)]
	pub categories: Vec<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub review_text: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Review {
	pub business_id: String,
	pub user_id: String,
	pub review_text: String,
	pub rating: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Rating {
	pub user_id: String,
	pub business_id: String,
	pub rating: f64,
}

/// Reference data handed over by the loader. Assumed pre-validated.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Dataset {
	#[serde(default)]
	pub restaurants: Vec<Restaurant>,
	#[serde(default)]
	pub reviews: Vec<Review>,
	#[serde(default)]
	pub ratings: Vec<Rating>,
}

impl Dataset {
	/// Group ratings by user. Later duplicates for the same pair win.
	pub fn ratings_by_user(&self) -> HashMap<String, UserRatings> {
		let mut by_user: HashMap<String, UserRatings> = HashMap::new();
		for r in &self.ratings {
			by_user
				.entry(r.user_id.clone())
				.or_default()
				.insert(r.business_id.clone(), r.rating);
		}
		by_user
	}

	pub fn restaurant(&self, business_id: &str) -> Option<&Restaurant> {
		self.restaurants.iter().find(|r| r.business_id == business_id)
	}
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum EmbeddingMethod {
	Tfidf,
	Lsa,
	TextEmbedding,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Embedding {
	pub vector: Vec<f64>,
	pub method: EmbeddingMethod,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ItemProfile {
	pub business_id: String,
	pub embedding: Embedding,
	/// In [-1, 1], derived from the average review rating.
	pub sentiment_score: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SimilarityScore {
	pub business_id: String,
	pub score: f64,
}

/// Canonical scored id produced at every recommender boundary.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScoredItem {
	pub id: String,
	pub score: f64,
}

impl ScoredItem {
	pub fn new(id: impl Into<String>, score: f64) -> Self {
		Self {
			id: id.into(),
			score,
		}
	}
}

/// Sort descending by score, dropping non-finite scores. Ties keep id order
/// so results are reproducible.
pub fn rank_descending(items: &mut Vec<ScoredItem>) {
	items.retain(|i| i.score.is_finite());
	items.sort_by(|a, b| {
		b.score
			.partial_cmp(&a.score)
			.unwrap_or(std::cmp::Ordering::Equal)
			.then_with(|| a.id.cmp(&b.id))
	});
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RecommendationResult {
	pub recommendations: Vec<String>,
	pub scores: Vec<f64>,
	pub explanation: String,
	pub method: String,
	pub logs: Vec<String>,
}

impl RecommendationResult {
	/// Build a result from unsorted scored items: sorts descending,
	/// truncates to `top_n`, and keeps ids and scores paired.
	pub fn from_ranked(
		mut items: Vec<ScoredItem>,
		top_n: usize,
		explanation: impl Into<String>,
		method: impl Into<String>,
		logs: Vec<String>,
	) -> Self {
		rank_descending(&mut items);
		items.truncate(top_n);
		let (recommendations, scores) = items.into_iter().map(|i| (i.id, i.score)).unzip();
		Self {
			recommendations,
			scores,
			explanation: explanation.into(),
			method: method.into(),
			logs,
		}
	}

	pub fn empty(
		method: impl Into<String>,
		explanation: impl Into<String>,
		logs: Vec<String>,
	) -> Self {
		Self {
			recommendations: Vec::new(),
			scores: Vec::new(),
			explanation: explanation.into(),
			method: method.into(),
			logs,
		}
	}

	pub fn is_empty(&self) -> bool {
		self.recommendations.is_empty()
	}

	pub fn items(&self) -> Vec<ScoredItem> {
		self.recommendations
			.iter()
			.zip(&self.scores)
			.map(|(id, score)| ScoredItem::new(id.clone(), *score))
			.collect()
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn recent_ratings_drop_oldest_user() {
		let one = |id: &str| -> UserRatings { [(id.to_string(), 4.0)].into_iter().collect() };
		let mut recent = RecentRatings::with_capacity(2);
		recent.insert("a", one("x"));
		recent.insert("b", one("y"));
		recent.insert("a", one("z"));
		recent.insert("c", one("w"));
		assert_eq!(recent.len(), 2);
		assert!(recent.get("b").is_none());
		assert_eq!(recent.get("a"), Some(&one("z")));
		assert!(recent.get("c").is_some());
	}

	#[test]
	fn from_ranked_sorts_and_truncates() {
		let items = vec![
			ScoredItem::new("a", 0.2),
			ScoredItem::new("b", 0.9),
			ScoredItem::new("c", 0.5),
		];
		let result = RecommendationResult::from_ranked(items, 2, "x", "test", vec![]);
		assert_eq!(result.recommendations, vec!["b", "c"]);
		assert_eq!(result.scores, vec![0.9, 0.5]);
	}

	#[test]
	fn from_ranked_drops_nan() {
		let items = vec![ScoredItem::new("a", f64::NAN), ScoredItem::new("b", 1.0)];
		let result = RecommendationResult::from_ranked(items, 10, "x", "test", vec![]);
		assert_eq!(result.recommendations, vec!["b"]);
		assert_eq!(result.scores.len(), result.recommendations.len());
	}

	#[test]
	fn ties_break_by_id() {
		let mut items = vec![ScoredItem::new("z", 1.0), ScoredItem::new("a", 1.0)];
		rank_descending(&mut items);
		assert_eq!(items[0].id, "a");
	}

	#[test]
	fn result_serializes_with_contract_field_names() {
		let result = RecommendationResult::empty("svd", "No ratings", vec![]);
		let value = serde_json::to_value(&result).unwrap();
		assert!(value.get("recommendations").is_some());
		assert!(value.get("scores").is_some());
		assert_eq!(value["method"], "svd");
	}

	#[test]
	fn ratings_by_user_groups_pairs() {
		let dataset = Dataset {
			ratings: vec![
				Rating {
					user_id: "u1".into(),
					business_id: "b1".into(),
					rating: 4.0,
				},
				Rating {
					user_id: "u1".into(),
					business_id: "b2".into(),
					rating: 2.0,
				},
			],
			..Default::default()
		};
		let grouped = dataset.ratings_by_user();
		assert_eq!(grouped["u1"].len(), 2);
		assert_eq!(grouped["u1"]["b2"], 2.0);
	}
}
