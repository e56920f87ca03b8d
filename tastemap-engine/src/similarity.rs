// ---------------------------------------------------------------------------
// Similarity and vector math
// ---------------------------------------------------------------------------
//
// Stateless helpers shared by every recommender family. None of these
// functions panic or return NaN: degenerate inputs map to a neutral value.
// ---------------------------------------------------------------------------

use std::collections::HashSet;
use std::hash::Hash;

/// Cosine similarity between two vectors.
/// Returns 0.0 for zero-magnitude vectors or dimension mismatches.
/// Result clamped to [-1.0, 1.0].
pub fn cosine_similarity(a: &[f64], b: &[f64]) -> f64 {
	if a.len() != b.len() || a.is_empty() {
		return 0.0;
	}

	let mut dot = 0.0;
	let mut norm_a = 0.0;
	let mut norm_b = 0.0;

	for (x, y) in a.iter().zip(b) {
		dot += x * y;
		norm_a += x * x;
		norm_b += y * y;
	}

	let denom = norm_a.sqrt() * norm_b.sqrt();
	if denom == 0.0 {
		return 0.0;
	}

	let result = dot / denom;
	if !result.is_finite() {
		return 0.0;
	}
	result.clamp(-1.0, 1.0)
}

/// Cosine distance, `1 - cosine_similarity`. Lies in [0, 2].
pub fn cosine_distance(a: &[f64], b: &[f64]) -> f64 {
	1.0 - cosine_similarity(a, b)
}

/// Euclidean distance. Returns `f64::INFINITY` on length mismatch.
pub fn euclidean_distance(a: &[f64], b: &[f64]) -> f64 {
	if a.len() != b.len() {
		return f64::INFINITY;
	}
	a.iter()
		.zip(b)
		.map(|(x, y)| (x - y) * (x - y))
		.sum::<f64>()
		.sqrt()
}

/// Pearson correlation of two paired samples.
///
/// Returns 0.0 when fewer than 2 pairs are given, when the lengths differ,
/// or when either side has zero variance.
pub fn pearson_correlation(a: &[f64], b: &[f64]) -> f64 {
	if a.len() != b.len() || a.len() < 2 {
		return 0.0;
	}

	let n = a.len() as f64;
	let mean_a = a.iter().sum::<f64>() / n;
	let mean_b = b.iter().sum::<f64>() / n;

	let mut numerator = 0.0;
	let mut var_a = 0.0;
	let mut var_b = 0.0;
	for (x, y) in a.iter().zip(b) {
		let da = x - mean_a;
		let db = y - mean_b;
		numerator += da * db;
		var_a += da * da;
		var_b += db * db;
	}

	if var_a == 0.0 || var_b == 0.0 {
		return 0.0;
	}

	let result = numerator / (var_a.sqrt() * var_b.sqrt());
	if !result.is_finite() {
		return 0.0;
	}
	result.clamp(-1.0, 1.0)
}

/// Jaccard similarity `|A ∩ B| / |A ∪ B|`. Two empty sets give 0.0.
pub fn jaccard_similarity<T: Eq + Hash>(a: &HashSet<T>, b: &HashSet<T>) -> f64 {
	let union = a.union(b).count();
	if union == 0 {
		return 0.0;
	}
	a.intersection(b).count() as f64 / union as f64
}

/// L2 norm of a vector.
pub fn magnitude(v: &[f64]) -> f64 {
	v.iter().map(|x| x * x).sum::<f64>().sqrt()
}

/// Scale a vector to unit L2 norm. A zero vector stays all zeros.
pub fn normalize_vector(v: &[f64]) -> Vec<f64> {
	let mag = magnitude(v);
	if mag == 0.0 || !mag.is_finite() {
		return vec![0.0; v.len()];
	}
	v.iter().map(|x| x / mag).collect()
}

/// Dot product over the shared prefix of two vectors.
pub fn dot(a: &[f64], b: &[f64]) -> f64 {
	a.iter().zip(b).map(|(x, y)| x * y).sum()
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn identical_vectors() {
		let v = vec![1.0, 2.0, 3.0];
		assert!((cosine_similarity(&v, &v) - 1.0).abs() < 1e-10);
	}

	#[test]
	fn orthogonal_vectors() {
		assert!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]).abs() < 1e-10);
	}

	#[test]
	fn opposite_vectors() {
		assert!((cosine_similarity(&[1.0, 0.0], &[-1.0, 0.0]) + 1.0).abs() < 1e-10);
	}

	#[test]
	fn empty_and_mismatched() {
		assert_eq!(cosine_similarity(&[], &[]), 0.0);
		assert_eq!(cosine_similarity(&[1.0], &[1.0, 2.0]), 0.0);
	}

	#[test]
	fn zero_magnitude() {
		assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 2.0]), 0.0);
	}

	#[test]
	fn cosine_stays_in_bounds() {
		let a = [1e300, -1e300, 3.0];
		let b = [-2.0, 5.0, 1e-300];
		let sim = cosine_similarity(&a, &b);
		assert!((-1.0..=1.0).contains(&sim));
	}

	#[test]
	fn euclidean_basic_and_mismatch() {
		assert!((euclidean_distance(&[0.0, 0.0], &[3.0, 4.0]) - 5.0).abs() < 1e-10);
		assert_eq!(euclidean_distance(&[1.0], &[1.0, 2.0]), f64::INFINITY);
	}

	#[test]
	fn pearson_perfect_and_inverse() {
		let a = [1.0, 2.0, 3.0, 4.0];
		let b = [2.0, 4.0, 6.0, 8.0];
		let c = [4.0, 3.0, 2.0, 1.0];
		assert!((pearson_correlation(&a, &b) - 1.0).abs() < 1e-10);
		assert!((pearson_correlation(&a, &c) + 1.0).abs() < 1e-10);
	}

	#[test]
	fn pearson_degenerate_inputs() {
		assert_eq!(pearson_correlation(&[3.0], &[4.0]), 0.0);
		assert_eq!(pearson_correlation(&[3.0, 3.0, 3.0], &[1.0, 2.0, 3.0]), 0.0);
		assert_eq!(pearson_correlation(&[1.0, 2.0], &[1.0]), 0.0);
	}

	#[test]
	fn jaccard_cases() {
		let a: HashSet<&str> = ["pizza", "bar"].into_iter().collect();
		let b: HashSet<&str> = ["pizza", "cafe"].into_iter().collect();
		assert!((jaccard_similarity(&a, &b) - 1.0 / 3.0).abs() < 1e-10);

		let empty: HashSet<&str> = HashSet::new();
		assert_eq!(jaccard_similarity(&empty, &empty), 0.0);
	}

	#[test]
	fn normalize_unit_length_and_idempotent() {
		let v = vec![3.0, 4.0, 12.0];
		let n = normalize_vector(&v);
		assert!((magnitude(&n) - 1.0).abs() < 1e-10);
		let nn = normalize_vector(&n);
		for (x, y) in n.iter().zip(&nn) {
			assert!((x - y).abs() < 1e-12);
		}
	}

	#[test]
	fn normalize_zero_vector() {
		assert_eq!(normalize_vector(&[0.0, 0.0, 0.0]), vec![0.0, 0.0, 0.0]);
	}
}
