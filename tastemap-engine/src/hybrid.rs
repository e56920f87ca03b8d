// ---------------------------------------------------------------------------
// Hybrid recommenders
// ---------------------------------------------------------------------------
//
// `WeightedHybrid` fuses normalized scores from several recommenders;
// `SwitchingHybrid` picks one recommender per user from how many ratings
// the user has. Both own their sub-recommenders and fit them together.
// ---------------------------------------------------------------------------

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::config::{HybridConfig, HybridWeights};
use crate::error::RecommendError;
use crate::logs::RecommenderLog;
use crate::recommender::{no_ratings_explanation, Recommender};
use crate::types::{Dataset, RecommendationResult, ScoredItem, UserRatings};

/// Extra candidates fetched from each source so fusion has overlap to
/// work with.
const CANDIDATE_FACTOR: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
	Content,
	Collaborative,
	Matrix,
	Clustering,
}

impl SourceKind {
	pub fn weight_in(&self, weights: &HybridWeights) -> f64 {
		match self {
			SourceKind::Content => weights.content,
			SourceKind::Collaborative => weights.collaborative,
			SourceKind::Matrix => weights.matrix,
			SourceKind::Clustering => weights.clustering,
		}
	}
}

impl fmt::Display for SourceKind {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(match self {
			SourceKind::Content => "content",
			SourceKind::Collaborative => "collaborative",
			SourceKind::Matrix => "matrix",
			SourceKind::Clustering => "clustering",
		})
	}
}

// ---------------------------------------------------------------------------
// Normalization
// ---------------------------------------------------------------------------

/// Scale weights so they sum to 1. All-zero or invalid weights are a
/// configuration error.
pub fn normalize_weights(weights: &[f64]) -> Result<Vec<f64>, RecommendError> {
	if weights.iter().any(|w| *w < 0.0 || !w.is_finite()) {
		return Err(RecommendError::InvalidConfig(
			"hybrid weights must be finite and non-negative".into(),
		));
	}
	let total: f64 = weights.iter().sum();
	if total <= 0.0 {
		return Err(RecommendError::InvalidConfig(
			"at least one hybrid weight must be positive".into(),
		));
	}
	Ok(weights.iter().map(|w| w / total).collect())
}

/// Map a raw score into [0, 1] using its recommender's score range.
pub fn normalize_score(score: f64, (lo, hi): (f64, f64)) -> f64 {
	if !score.is_finite() {
		return 0.0;
	}
	if hi <= lo {
		return if score >= hi { 1.0 } else { 0.0 };
	}
	((score - lo) / (hi - lo)).clamp(0.0, 1.0)
}

// ---------------------------------------------------------------------------
// WeightedHybrid
// ---------------------------------------------------------------------------

struct WeightedSource {
	kind: SourceKind,
	weight: f64,
	recommender: Box<dyn Recommender>,
}

pub struct WeightedHybrid {
	sources: Vec<WeightedSource>,
	display: (f64, f64),
	log: RecommenderLog,
}

impl WeightedHybrid {
	/// Sources with zero weight are dropped, so they behave exactly as if
	/// they had not been configured.
	pub fn new(
		sources: Vec<(SourceKind, f64, Box<dyn Recommender>)>,
		config: &HybridConfig,
	) -> Result<Self, RecommendError> {
		let raw: Vec<f64> = sources.iter().map(|(_, w, _)| *w).collect();
		let normalized = normalize_weights(&raw)?;
		let mut log = RecommenderLog::new("hybrid-weighted");
		let mut kept = Vec::new();
		for ((kind, _, recommender), weight) in sources.into_iter().zip(normalized) {
			if weight == 0.0 {
				log.debug(format!("Skipping {} source with zero weight", kind));
				continue;
			}
			kept.push(WeightedSource {
				kind,
				weight,
				recommender,
			});
		}
		Ok(Self {
			sources: kept,
			display: (config.display_min, config.display_max),
			log,
		})
	}

	/// Normalized weight per active source.
	pub fn weights(&self) -> Vec<(SourceKind, f64)> {
		self.sources.iter().map(|s| (s.kind, s.weight)).collect()
	}
}

impl Recommender for WeightedHybrid {
	fn name(&self) -> &str {
		"hybrid-weighted"
	}

	fn fit(&mut self, dataset: &Dataset) -> Result<(), RecommendError> {
		for source in &mut self.sources {
			source.recommender.fit(dataset)?;
		}
		self.log.info(format!("Fitted {} sources", self.sources.len()));
		Ok(())
	}

	fn recommend(
		&mut self,
		user_id: &str,
		user_ratings: &UserRatings,
		top_n: usize,
	) -> RecommendationResult {
		let mark = self.log.mark();
		if user_ratings.is_empty() {
			self.log.info(format!("User {} has no ratings", user_id));
			return RecommendationResult::empty(
				"hybrid-weighted",
				no_ratings_explanation(user_id),
				self.log.since(mark),
			);
		}

		let fetch = top_n.saturating_mul(CANDIDATE_FACTOR).max(top_n);
		let mut fused: HashMap<String, f64> = HashMap::new();
		let mut sub_logs = Vec::new();
		let mut contributing = Vec::new();

		for source in &mut self.sources {
			let result = source.recommender.recommend(user_id, user_ratings, fetch);
			sub_logs.extend(result.logs.iter().cloned());
			if result.is_empty() {
				self.log.warning(format!(
					"{} source returned nothing: {}",
					source.kind, result.explanation
				));
				continue;
			}
			let range = source.recommender.score_range();
			for item in result.items() {
				if user_ratings.contains_key(&item.id) {
					continue;
				}
				*fused.entry(item.id).or_default() += source.weight * normalize_score(item.score, range);
			}
			contributing.push(format!("{} {:.0}%", source.kind, source.weight * 100.0));
		}

		if fused.is_empty() {
			self.log.warning(format!("No source produced candidates for {}", user_id));
			let mut logs = self.log.since(mark);
			logs.extend(sub_logs);
			return RecommendationResult::empty(
				"hybrid-weighted",
				format!("None of the combined recommenders found restaurants for user {user_id}"),
				logs,
			);
		}

		let (lo, hi) = self.display;
		let items: Vec<ScoredItem> = fused
			.into_iter()
			.map(|(id, score)| ScoredItem::new(id, lo + score.clamp(0.0, 1.0) * (hi - lo)))
			.collect();
		self.log.info(format!(
			"Fused {} candidates for user {} from {}",
			items.len(),
			user_id,
			contributing.join(", ")
		));
		let mut logs = self.log.since(mark);
		logs.extend(sub_logs);
		RecommendationResult::from_ranked(
			items,
			top_n,
			format!("Blend of {}", contributing.join(", ")),
			"hybrid-weighted",
			logs,
		)
	}

	fn explain(&self, user_id: &str, business_id: &str) -> String {
		let parts: Vec<String> = self
			.sources
			.iter()
			.map(|s| {
				format!(
					"{} ({:.0}%): {}",
					s.kind,
					s.weight * 100.0,
					s.recommender.explain(user_id, business_id)
				)
			})
			.collect();
		if parts.is_empty() {
			return format!("No recommenders are configured to explain {business_id}");
		}
		parts.join("; ")
	}

	fn score_range(&self) -> (f64, f64) {
		self.display
	}

	fn log(&self) -> &RecommenderLog {
		&self.log
	}
}

// ---------------------------------------------------------------------------
// SwitchingHybrid
// ---------------------------------------------------------------------------

pub struct SwitchingHybrid {
	config: HybridConfig,
	content: Box<dyn Recommender>,
	collaborative: Option<Box<dyn Recommender>>,
	matrix: Option<Box<dyn Recommender>>,
	last_choice: HashMap<String, SourceKind>,
	log: RecommenderLog,
}

impl SwitchingHybrid {
	pub fn new(
		config: HybridConfig,
		content: Box<dyn Recommender>,
		collaborative: Option<Box<dyn Recommender>>,
		matrix: Option<Box<dyn Recommender>>,
	) -> Self {
		Self {
			config,
			content,
			collaborative,
			matrix,
			last_choice: HashMap::new(),
			log: RecommenderLog::new("hybrid-switching"),
		}
	}

	/// Which family serves a user with `rating_count` ratings.
	pub fn select(&self, rating_count: usize) -> SourceKind {
		if rating_count < self.config.cold_start_threshold {
			return SourceKind::Content;
		}
		if rating_count >= self.config.min_ratings {
			if self.config.weights.matrix > 0.0 && self.matrix.is_some() {
				return SourceKind::Matrix;
			}
			if self.collaborative.is_some() {
				return SourceKind::Collaborative;
			}
		}
		SourceKind::Content
	}

	fn source_mut(&mut self, kind: SourceKind) -> Option<&mut Box<dyn Recommender>> {
		match kind {
			SourceKind::Content => Some(&mut self.content),
			SourceKind::Collaborative => self.collaborative.as_mut(),
			SourceKind::Matrix => self.matrix.as_mut(),
			SourceKind::Clustering => None,
		}
	}

	fn source(&self, kind: SourceKind) -> Option<&dyn Recommender> {
		match kind {
			SourceKind::Content => Some(self.content.as_ref()),
			SourceKind::Collaborative => self.collaborative.as_deref(),
			SourceKind::Matrix => self.matrix.as_deref(),
			SourceKind::Clustering => None,
		}
	}
}

impl Recommender for SwitchingHybrid {
	fn name(&self) -> &str {
		"hybrid-switching"
	}

	fn fit(&mut self, dataset: &Dataset) -> Result<(), RecommendError> {
		self.content.fit(dataset)?;
		if let Some(r) = self.collaborative.as_mut() {
			r.fit(dataset)?;
		}
		if let Some(r) = self.matrix.as_mut() {
			r.fit(dataset)?;
		}
		self.last_choice.clear();
		Ok(())
	}

	fn recommend(
		&mut self,
		user_id: &str,
		user_ratings: &UserRatings,
		top_n: usize,
	) -> RecommendationResult {
		let mark = self.log.mark();
		if user_ratings.is_empty() {
			self.log.info(format!("User {} has no ratings", user_id));
			return RecommendationResult::empty(
				"hybrid-switching",
				no_ratings_explanation(user_id),
				self.log.since(mark),
			);
		}

		let count = user_ratings.len();
		let chosen = self.select(count);
		self.log.info(format!(
			"User {} has {} ratings; using {}",
			user_id, count, chosen
		));

		let mut sub_logs = Vec::new();
		let mut attempt = |kind: SourceKind, this: &mut Self| -> Option<RecommendationResult> {
			let result = this.source_mut(kind)?.recommend(user_id, user_ratings, top_n);
			sub_logs.extend(result.logs.iter().cloned());
			(!result.is_empty()).then_some(result)
		};

		let mut served = attempt(chosen, self).map(|r| (chosen, r));
		if served.is_none() && chosen != SourceKind::Content {
			self.log.warning(format!(
				"{} produced nothing for {}; retrying with content",
				chosen, user_id
			));
			served = attempt(SourceKind::Content, self).map(|r| (SourceKind::Content, r));
		}

		match served {
			Some((kind, result)) => {
				self.last_choice.insert(user_id.to_string(), kind);
				let mut logs = self.log.since(mark);
				logs.extend(sub_logs);
				let explanation = format!(
					"Using {} recommendations for a user with {} ratings: {}",
					kind, count, result.explanation
				);
				RecommendationResult::from_ranked(
					result.items(),
					top_n,
					explanation,
					"hybrid-switching",
					logs,
				)
			}
			None => {
				self.log
					.error(format!("Every method failed for user {}", user_id));
				let mut logs = self.log.since(mark);
				logs.extend(sub_logs);
				RecommendationResult::empty(
					"hybrid-switching",
					format!(
						"Could not produce recommendations for user {user_id}: {chosen} and the content-based fallback both came back empty"
					),
					logs,
				)
			}
		}
	}

	fn explain(&self, user_id: &str, business_id: &str) -> String {
		let kind = self
			.last_choice
			.get(user_id)
			.copied()
			.unwrap_or(SourceKind::Content);
		match self.source(kind) {
			Some(r) => format!("Via {}: {}", kind, r.explain(user_id, business_id)),
			None => format!("No recommender available to explain {business_id}"),
		}
	}

	fn score_range(&self) -> (f64, f64) {
		let mut range = self.content.score_range();
		for r in [self.collaborative.as_deref(), self.matrix.as_deref()]
			.into_iter()
			.flatten()
		{
			let (lo, hi) = r.score_range();
			range = (range.0.min(lo), range.1.max(hi));
		}
		range
	}

	fn log(&self) -> &RecommenderLog {
		&self.log
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	/// Returns fixed scores for every item not rated.
	struct Fixed {
		name: &'static str,
		scores: Vec<(&'static str, f64)>,
		range: (f64, f64),
		log: RecommenderLog,
	}

	impl Fixed {
		fn boxed(name: &'static str, scores: &[(&'static str, f64)], range: (f64, f64)) -> Box<dyn Recommender> {
			Box::new(Self {
				name,
				scores: scores.to_vec(),
				range,
				log: RecommenderLog::new(name),
			})
		}
	}

	impl Recommender for Fixed {
		fn name(&self) -> &str {
			self.name
		}
		fn fit(&mut self, _dataset: &Dataset) -> Result<(), RecommendError> {
			Ok(())
		}
		fn recommend(&mut self, _user_id: &str, ratings: &UserRatings, top_n: usize) -> RecommendationResult {
			let items = self
				.scores
				.iter()
				.filter(|(id, _)| !ratings.contains_key(*id))
				.map(|(id, s)| ScoredItem::new(*id, *s))
				.collect();
			RecommendationResult::from_ranked(items, top_n, self.name, self.name, vec![])
		}
		fn explain(&self, _user_id: &str, business_id: &str) -> String {
			format!("{} likes {}", self.name, business_id)
		}
		fn score_range(&self) -> (f64, f64) {
			self.range
		}
		fn log(&self) -> &RecommenderLog {
			&self.log
		}
	}

	fn rated(ids: &[&str]) -> UserRatings {
		ids.iter().map(|id| (id.to_string(), 4.0)).collect()
	}

	// -- normalization ----------------------------------------------------

	#[test]
	fn weights_sum_to_one() {
		let w = normalize_weights(&[0.3, 0.3, 0.4]).unwrap();
		assert!((w.iter().sum::<f64>() - 1.0).abs() < 1e-10);
		let w = normalize_weights(&[2.0, 0.0]).unwrap();
		assert_eq!(w, vec![1.0, 0.0]);
	}

	#[test]
	fn all_zero_weights_are_invalid() {
		assert!(matches!(
			normalize_weights(&[0.0, 0.0]),
			Err(RecommendError::InvalidConfig(_))
		));
	}

	#[test]
	fn scores_normalize_into_unit_range() {
		assert_eq!(normalize_score(3.0, (1.0, 5.0)), 0.5);
		assert_eq!(normalize_score(9.0, (1.0, 5.0)), 1.0);
		assert_eq!(normalize_score(f64::NAN, (1.0, 5.0)), 0.0);
	}

	// -- weighted ---------------------------------------------------------

	#[test]
	fn weighted_fusion_rescales_to_display_range() {
		let mut hybrid = WeightedHybrid::new(
			vec![
				(SourceKind::Content, 1.0, Fixed::boxed("a", &[("x", 1.0), ("y", 0.5)], (0.0, 1.0))),
				(SourceKind::Matrix, 1.0, Fixed::boxed("b", &[("x", 5.0), ("z", 3.0)], (1.0, 5.0))),
			],
			&HybridConfig::default(),
		)
		.unwrap();
		let result = hybrid.recommend("u", &rated(&["r"]), 3);
		assert_eq!(result.recommendations[0], "x");
		assert!((result.scores[0] - 5.0).abs() < 1e-10);
		assert!(result.scores.iter().all(|s| (1.0..=5.0).contains(s)));
		assert_eq!(result.method, "hybrid-weighted");
	}

	#[test]
	fn zero_weight_source_is_same_as_absent() {
		let config = HybridConfig::default();
		let mut with_zero = WeightedHybrid::new(
			vec![
				(SourceKind::Content, 0.5, Fixed::boxed("a", &[("x", 0.2), ("y", 0.9)], (0.0, 1.0))),
				(SourceKind::Collaborative, 0.0, Fixed::boxed("c", &[("z", 5.0)], (1.0, 5.0))),
				(SourceKind::Matrix, 0.5, Fixed::boxed("b", &[("x", 4.0), ("w", 2.0)], (1.0, 5.0))),
			],
			&config,
		)
		.unwrap();
		let mut without = WeightedHybrid::new(
			vec![
				(SourceKind::Content, 0.5, Fixed::boxed("a", &[("x", 0.2), ("y", 0.9)], (0.0, 1.0))),
				(SourceKind::Matrix, 0.5, Fixed::boxed("b", &[("x", 4.0), ("w", 2.0)], (1.0, 5.0))),
			],
			&config,
		)
		.unwrap();
		let ratings = rated(&["r"]);
		let a = with_zero.recommend("u", &ratings, 5);
		let b = without.recommend("u", &ratings, 5);
		assert_eq!(a.recommendations, b.recommendations);
		assert_eq!(a.scores, b.scores);
		assert_eq!(with_zero.weights().len(), 2);
	}

	#[test]
	fn weighted_never_returns_rated_items() {
		let mut hybrid = WeightedHybrid::new(
			vec![(SourceKind::Content, 1.0, Fixed::boxed("a", &[("x", 1.0), ("r", 1.0)], (0.0, 1.0)))],
			&HybridConfig::default(),
		)
		.unwrap();
		let result = hybrid.recommend("u", &rated(&["r"]), 5);
		assert_eq!(result.recommendations, vec!["x"]);
	}

	#[test]
	fn empty_sources_give_explained_empty() {
		let mut hybrid = WeightedHybrid::new(
			vec![(SourceKind::Content, 1.0, Fixed::boxed("a", &[], (0.0, 1.0)))],
			&HybridConfig::default(),
		)
		.unwrap();
		let result = hybrid.recommend("u", &rated(&["r"]), 5);
		assert!(result.is_empty());
		assert!(!result.explanation.is_empty());
	}

	// -- switching --------------------------------------------------------

	fn switching(matrix_items: &[(&'static str, f64)]) -> SwitchingHybrid {
		SwitchingHybrid::new(
			HybridConfig {
				cold_start_threshold: 2,
				min_ratings: 4,
				..Default::default()
			},
			Fixed::boxed("content", &[("c1", 0.9)], (0.0, 3.0)),
			Some(Fixed::boxed("collab", &[("k1", 4.0)], (1.0, 5.0))),
			Some(Fixed::boxed("matrix", matrix_items, (1.0, 5.0))),
		)
	}

	#[test]
	fn selects_by_rating_count() {
		let h = switching(&[("m1", 4.5)]);
		assert_eq!(h.select(1), SourceKind::Content);
		assert_eq!(h.select(3), SourceKind::Content);
		assert_eq!(h.select(4), SourceKind::Matrix);
	}

	#[test]
	fn zero_matrix_weight_selects_collaborative() {
		let mut h = switching(&[("m1", 4.5)]);
		h.config.weights.matrix = 0.0;
		assert_eq!(h.select(10), SourceKind::Collaborative);
	}

	#[test]
	fn failed_method_falls_back_to_content() {
		let mut h = switching(&[]);
		let result = h.recommend("u", &rated(&["a", "b", "c", "d"]), 5);
		assert_eq!(result.recommendations, vec!["c1"]);
		assert!(result.explanation.contains("content"));
		assert!(result.logs.iter().any(|l| l.contains("retrying with content")));
		assert!(h.explain("u", "c1").starts_with("Via content"));
	}

	#[test]
	fn heavy_user_gets_matrix() {
		let mut h = switching(&[("m1", 4.5)]);
		let result = h.recommend("u", &rated(&["a", "b", "c", "d"]), 5);
		assert_eq!(result.recommendations, vec!["m1"]);
	}

	#[test]
	fn everything_failing_is_explained() {
		let mut h = SwitchingHybrid::new(
			HybridConfig::default(),
			Fixed::boxed("content", &[], (0.0, 3.0)),
			None,
			None,
		);
		let result = h.recommend("u", &rated(&["a"]), 5);
		assert!(result.is_empty());
		assert!(result.explanation.contains("Could not produce"));
	}
}
