//! Offline ranking metrics against a held-out set of relevant businesses.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::types::RecommendationResult;

fn relevant_set(relevant: &[String]) -> HashSet<&str> {
	relevant.iter().map(String::as_str).collect()
}

fn hits_in_top_k(recommended: &[String], relevant: &HashSet<&str>, k: usize) -> usize {
	recommended
		.iter()
		.take(k)
		.filter(|id| relevant.contains(id.as_str()))
		.count()
}

/// Fraction of the first `k` recommendations that are relevant. The
/// denominator is `k`, so short lists are penalized.
pub fn precision_at_k(recommended: &[String], relevant: &[String], k: usize) -> f64 {
	if k == 0 || relevant.is_empty() {
		return 0.0;
	}
	hits_in_top_k(recommended, &relevant_set(relevant), k) as f64 / k as f64
}

/// Fraction of relevant businesses found in the first `k` recommendations.
pub fn recall_at_k(recommended: &[String], relevant: &[String], k: usize) -> f64 {
	let set = relevant_set(relevant);
	if set.is_empty() {
		return 0.0;
	}
	hits_in_top_k(recommended, &set, k) as f64 / set.len() as f64
}

/// Binary-relevance NDCG over the first `k` positions.
pub fn ndcg_at_k(recommended: &[String], relevant: &[String], k: usize) -> f64 {
	let set = relevant_set(relevant);
	if set.is_empty() || k == 0 {
		return 0.0;
	}
	let gain = |rank: usize| 1.0 / (rank as f64 + 2.0).log2();
	let dcg: f64 = recommended
		.iter()
		.take(k)
		.enumerate()
		.filter(|(_, id)| set.contains(id.as_str()))
		.map(|(rank, _)| gain(rank))
		.sum();
	let idcg: f64 = (0..k.min(set.len())).map(gain).sum();
	if idcg == 0.0 {
		0.0
	} else {
		dcg / idcg
	}
}

/// Reciprocal rank of the first relevant recommendation.
pub fn mrr(recommended: &[String], relevant: &[String]) -> f64 {
	let set = relevant_set(relevant);
	recommended
		.iter()
		.position(|id| set.contains(id.as_str()))
		.map_or(0.0, |rank| 1.0 / (rank as f64 + 1.0))
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EvaluationReport {
	pub method: String,
	pub k: usize,
	pub precision: f64,
	pub recall: f64,
	pub ndcg: f64,
	pub mrr: f64,
	pub hits: usize,
}

pub fn evaluate_result(result: &RecommendationResult, relevant: &[String], k: usize) -> EvaluationReport {
	let recommended = &result.recommendations;
	EvaluationReport {
		method: result.method.clone(),
		k,
		precision: precision_at_k(recommended, relevant, k),
		recall: recall_at_k(recommended, relevant, k),
		ndcg: ndcg_at_k(recommended, relevant, k),
		mrr: mrr(recommended, relevant),
		hits: hits_in_top_k(recommended, &relevant_set(relevant), k),
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn ids(v: &[&str]) -> Vec<String> {
		v.iter().map(|s| s.to_string()).collect()
	}

	#[test]
	fn precision_counts_hits_over_k() {
		let rec = ids(&["a", "b", "c", "d"]);
		assert_eq!(precision_at_k(&rec, &ids(&["a", "c"]), 2), 0.5);
		assert_eq!(precision_at_k(&rec, &ids(&["a", "c"]), 4), 0.5);
		assert_eq!(precision_at_k(&rec, &[], 4), 0.0);
	}

	#[test]
	fn recall_counts_hits_over_relevant() {
		let rec = ids(&["a", "b", "c"]);
		assert_eq!(recall_at_k(&rec, &ids(&["a", "b"]), 2), 1.0);
		assert_eq!(recall_at_k(&rec, &ids(&["a", "b"]), 1), 0.5);
	}

	#[test]
	fn ndcg_is_one_for_perfect_order() {
		let rec = ids(&["a", "b", "x"]);
		assert!((ndcg_at_k(&rec, &ids(&["a", "b"]), 3) - 1.0).abs() < 1e-12);
		let worse = ids(&["x", "a", "b"]);
		assert!(ndcg_at_k(&worse, &ids(&["a", "b"]), 3) < 1.0);
	}

	#[test]
	fn mrr_uses_first_hit() {
		assert_eq!(mrr(&ids(&["x", "a", "b"]), &ids(&["b", "a"])), 0.5);
		assert_eq!(mrr(&ids(&["x"]), &ids(&["a"])), 0.0);
	}

	#[test]
	fn report_combines_metrics() {
		let result = RecommendationResult::from_ranked(
			vec![
				crate::types::ScoredItem::new("a", 0.9),
				crate::types::ScoredItem::new("x", 0.5),
			],
			5,
			"test",
			"svd",
			vec![],
		);
		let report = evaluate_result(&result, &ids(&["a"]), 2);
		assert_eq!(report.method, "svd");
		assert_eq!(report.hits, 1);
		assert_eq!(report.mrr, 1.0);
		assert_eq!(report.recall, 1.0);
	}
}
