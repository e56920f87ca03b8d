// ---------------------------------------------------------------------------
// Dataset analysis
// ---------------------------------------------------------------------------
//
// Summary statistics of a rating set, and a search for users who make good
// collaborative-filtering demos (many correlated neighbours, many items
// those neighbours could contribute).
// ---------------------------------------------------------------------------

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::collaborative::{co_rated_similarity, RatingMatrix};
use crate::types::Rating;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DatasetStats {
	pub users: usize,
	pub items: usize,
	pub ratings: usize,
	/// `1 - ratings / (users * items)`.
	pub sparsity: f64,
	pub mean_rating: f64,
	pub ratings_per_user_mean: f64,
	pub ratings_per_user_median: f64,
	pub ratings_per_user_min: usize,
	pub ratings_per_user_max: usize,
}

impl DatasetStats {
	pub fn from_ratings(ratings: &[Rating]) -> Self {
		let matrix = RatingMatrix::from_ratings(ratings);
		if ratings.is_empty() {
			return Self::default();
		}

		let mut per_user: Vec<usize> = vec![0; matrix.user_count()];
		let users: Vec<&String> = matrix.users().collect();
		for r in ratings {
			if let Ok(pos) = users.binary_search(&&r.user_id) {
				per_user[pos] += 1;
			}
		}
		per_user.sort_unstable();

		let n = per_user.len();
		let median = if n % 2 == 1 {
			per_user[n / 2] as f64
		} else {
			(per_user[n / 2 - 1] + per_user[n / 2]) as f64 / 2.0
		};
		let possible = (matrix.user_count() * matrix.item_count()) as f64;

		Self {
			users: matrix.user_count(),
			items: matrix.item_count(),
			ratings: ratings.len(),
			sparsity: 1.0 - ratings.len() as f64 / possible,
			mean_rating: ratings.iter().map(|r| r.rating).sum::<f64>() / ratings.len() as f64,
			ratings_per_user_mean: ratings.len() as f64 / n as f64,
			ratings_per_user_median: median,
			ratings_per_user_min: per_user[0],
			ratings_per_user_max: per_user[n - 1],
		}
	}
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CfCandidate {
	pub user_id: String,
	pub num_ratings: usize,
	pub similar_users: usize,
	pub potential_recommendations: usize,
}

/// Rank users with at least `min_ratings` ratings by how many other such
/// users correlate with them above `min_similarity` (over at least
/// `min_common` co-rated items), then by how many unrated items those
/// neighbours cover.
pub fn find_cf_candidates(
	ratings: &[Rating],
	min_ratings: usize,
	min_common: usize,
	min_similarity: f64,
) -> Vec<CfCandidate> {
	let matrix = RatingMatrix::from_ratings(ratings);
	let qualified: Vec<&String> = matrix
		.users()
		.filter(|u| matrix.user(u).map_or(0, |r| r.len()) >= min_ratings)
		.collect();
	tracing::debug!(
		qualified = qualified.len(),
		min_ratings,
		"Scanning users for collaborative filtering candidates"
	);

	let mut candidates: Vec<CfCandidate> = Vec::with_capacity(qualified.len());
	for &user in &qualified {
		let Some(own) = matrix.user(user) else { continue };
		let mut similar = 0;
		let mut reachable: BTreeSet<&String> = BTreeSet::new();

		for &other in &qualified {
			if other == user {
				continue;
			}
			let Some(theirs) = matrix.user(other) else { continue };
			if co_rated_similarity(own, theirs, min_common.max(1)) > min_similarity {
				similar += 1;
				reachable.extend(theirs.keys().filter(|k| !own.contains_key(*k)));
			}
		}

		candidates.push(CfCandidate {
			user_id: user.clone(),
			num_ratings: own.len(),
			similar_users: similar,
			potential_recommendations: reachable.len(),
		});
	}

	candidates.sort_by(|a, b| {
		b.similar_users
			.cmp(&a.similar_users)
			.then(b.potential_recommendations.cmp(&a.potential_recommendations))
			.then_with(|| a.user_id.cmp(&b.user_id))
	});
	candidates
}
