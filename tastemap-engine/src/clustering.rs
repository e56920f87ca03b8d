//! K-means clustering over item content vectors.
//!
//! Items are embedded as L2-normalized TF-IDF vectors of their categories
//! (and optionally review text), grouped by k-means with cosine distance,
//! and recommended from the clusters the user's ratings favour.

use std::collections::{BTreeSet, HashMap};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;

use crate::config::ClusteringConfig;
use crate::content::reviews_by_business;
use crate::error::RecommendError;
use crate::logs::RecommenderLog;
use crate::recommender::{no_ratings_explanation, Recommender};
use crate::similarity::{cosine_distance, normalize_vector};
use crate::text::TfIdfModel;
use crate::types::{
	Dataset, RecentRatings, RecommendationResult, Restaurant, Review, ScoredItem, UserRatings,
};

/// Stop growing k once the Davies-Bouldin index improves by less than this
/// fraction of its previous value.
const ELBOW_FRACTION: f64 = 0.1;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterQuality {
	pub k: usize,
	pub iterations: usize,
	pub silhouette: f64,
	pub davies_bouldin: f64,
	pub sizes: Vec<usize>,
}

pub struct ClusteringRecommender {
	config: ClusteringConfig,
	rng: StdRng,
	/// Item ids in catalog order; indexes `vectors`.
	ids: Vec<String>,
	vectors: Vec<Vec<f64>>,
	index: HashMap<String, usize>,
	names: HashMap<String, String>,
	clusters: Vec<BTreeSet<usize>>,
	centroids: Vec<Vec<f64>>,
	/// Cluster of each item, parallel to `ids`. Always agrees with `clusters`.
	assignment: Vec<Option<usize>>,
	iterations: usize,
	rating_scale: f64,
	trained: HashMap<String, UserRatings>,
	recent: RecentRatings,
	log: RecommenderLog,
}

impl ClusteringRecommender {
	pub fn new(config: ClusteringConfig) -> Self {
		let rng = match config.seed {
			Some(seed) => StdRng::seed_from_u64(seed),
			None => StdRng::from_entropy(),
		};
		Self {
			config,
			rng,
			ids: Vec::new(),
			vectors: Vec::new(),
			index: HashMap::new(),
			names: HashMap::new(),
			clusters: Vec::new(),
			centroids: Vec::new(),
			assignment: Vec::new(),
			iterations: 0,
			rating_scale: 5.0,
			trained: HashMap::new(),
			recent: RecentRatings::default(),
			log: RecommenderLog::new("kmeans"),
		}
	}

	// -- features ---------------------------------------------------------

	/// Build one normalized TF-IDF vector per restaurant.
	pub fn build_feature_vectors(
		&mut self,
		restaurants: &[Restaurant],
		reviews: &[Review],
	) -> Result<(), RecommendError> {
		self.ids.clear();
		self.vectors.clear();
		self.index.clear();
		self.names.clear();
		self.reset_clusters(0);
		if restaurants.is_empty() {
			self.log.warning("No restaurants supplied; nothing to cluster");
			return Ok(());
		}

		let grouped = reviews_by_business(reviews);
		let docs: Vec<String> = restaurants
			.iter()
			.map(|r| {
				let mut parts: Vec<&str> = r.categories.iter().map(String::as_str).collect();
				if self.config.include_reviews {
					if let Some(text) = r.review_text.as_deref() {
						parts.push(text);
					}
					if let Some(list) = grouped.get(r.business_id.as_str()) {
						parts.extend(list.iter().map(|rv| rv.review_text.as_str()));
					}
				}
				parts.join(" ")
			})
			.collect();

		let model = TfIdfModel::fit(&docs, self.config.max_features)?;
		for (restaurant, doc) in restaurants.iter().zip(&docs) {
			if self.index.contains_key(&restaurant.business_id) {
				continue;
			}
			self.index.insert(restaurant.business_id.clone(), self.ids.len());
			self.ids.push(restaurant.business_id.clone());
			self.vectors.push(model.transform_normalized(doc));
			self.names
				.insert(restaurant.business_id.clone(), restaurant.name.clone());
		}
		self.assignment = vec![None; self.ids.len()];
		self.log.info(format!(
			"Built {} feature vectors over {} terms",
			self.ids.len(),
			model.dimensions()
		));
		Ok(())
	}

	// -- k-means steps ----------------------------------------------------

	fn reset_clusters(&mut self, k: usize) {
		self.clusters = vec![BTreeSet::new(); k];
		self.centroids = Vec::new();
		self.assignment = vec![None; self.ids.len()];
		self.iterations = 0;
	}

	/// `k` empty clusters with random unit centroids.
	pub fn initialize_clusters(&mut self, k: usize) {
		self.reset_clusters(k);
		let dims = self.vectors.first().map_or(0, Vec::len);
		for _ in 0..k {
			let raw: Vec<f64> = (0..dims).map(|_| self.rng.gen::<f64>()).collect();
			self.centroids.push(normalize_vector(&raw));
		}
	}

	fn nearest_centroid(&self, vector: &[f64]) -> Option<usize> {
		let mut best: Option<(usize, f64)> = None;
		for (c, centroid) in self.centroids.iter().enumerate() {
			let d = cosine_distance(vector, centroid);
			if best.map_or(true, |(_, bd)| d < bd) {
				best = Some((c, d));
			}
		}
		best.map(|(c, _)| c)
	}

	fn move_item(&mut self, item: usize, to: usize) {
		if let Some(from) = self.assignment[item] {
			self.clusters[from].remove(&item);
		}
		self.clusters[to].insert(item);
		self.assignment[item] = Some(to);
	}

	/// Assign every item to its nearest centroid. Returns whether any
	/// assignment changed.
	pub fn assign_to_clusters(&mut self) -> bool {
		let mut changed = false;
		for item in 0..self.vectors.len() {
			let Some(nearest) = self.nearest_centroid(&self.vectors[item]) else {
				continue;
			};
			if self.assignment[item] != Some(nearest) {
				self.move_item(item, nearest);
				changed = true;
			}
		}
		changed
	}

	/// Recompute each centroid as the normalized mean of its members.
	/// Empty clusters get a zero centroid.
	pub fn update_centroids(&mut self) {
		let dims = self.vectors.first().map_or(0, Vec::len);
		for (c, members) in self.clusters.iter().enumerate() {
			let mut mean = vec![0.0; dims];
			for &item in members {
				for (m, x) in mean.iter_mut().zip(&self.vectors[item]) {
					*m += x;
				}
			}
			if !members.is_empty() {
				let n = members.len() as f64;
				mean.iter_mut().for_each(|m| *m /= n);
			}
			self.centroids[c] = normalize_vector(&mean);
		}
	}

	fn has_undersized(&self) -> bool {
		self.clusters
			.iter()
			.any(|c| c.len() < self.config.min_cluster_size)
	}

	/// Move items from the largest clusters into undersized ones, picking
	/// the item closest to the receiving centroid each time. Returns how
	/// many items moved.
	pub fn rebalance_clusters(&mut self) -> usize {
		let min = self.config.min_cluster_size;
		if min == 0 || min * self.clusters.len() > self.ids.len() {
			return 0;
		}
		let mut moved = 0;
		for target in 0..self.clusters.len() {
			while self.clusters[target].len() < min {
				let donor = (0..self.clusters.len())
					.filter(|&c| c != target && self.clusters[c].len() > min)
					.max_by_key(|&c| (self.clusters[c].len(), std::cmp::Reverse(c)));
				let Some(donor) = donor else {
					break;
				};
				let centroid = &self.centroids[target];
				let pick = self.clusters[donor]
					.iter()
					.copied()
					.min_by(|&a, &b| {
						cosine_distance(&self.vectors[a], centroid)
							.partial_cmp(&cosine_distance(&self.vectors[b], centroid))
							.unwrap_or(std::cmp::Ordering::Equal)
					});
				let Some(item) = pick else {
					break;
				};
				self.move_item(item, target);
				moved += 1;
			}
		}
		moved
	}

	/// Run k-means to convergence or `max_iterations`. Returns the number of
	/// iterations run.
	pub fn cluster(&mut self, k: usize) -> usize {
		let n = self.ids.len();
		if n == 0 {
			self.reset_clusters(0);
			return 0;
		}
		let k = if k > n {
			self.log.warning(format!("k={} exceeds {} items; using k={}", k, n, n));
			n
		} else {
			k.max(1)
		};

		self.initialize_clusters(k);
		let mut iterations = 0;
		for _ in 0..self.config.max_iterations {
			iterations += 1;
			let changed = self.assign_to_clusters();
			self.update_centroids();
			if self.has_undersized() && self.rebalance_clusters() > 0 {
				self.update_centroids();
			}
			if !changed {
				break;
			}
		}
		self.iterations = iterations;

		let sizes: Vec<usize> = self.clusters.iter().map(BTreeSet::len).collect();
		self.log.info(format!(
			"Clustered {} items into {} clusters in {} iterations (sizes {:?})",
			n, k, iterations, sizes
		));
		iterations
	}

	// -- quality ----------------------------------------------------------

	/// Mean silhouette coefficient with cosine distance, in [-1, 1]. Zero
	/// with fewer than two non-empty clusters.
	pub fn silhouette_score(&self) -> f64 {
		let populated = self.clusters.iter().filter(|c| !c.is_empty()).count();
		if populated < 2 || self.ids.len() < 2 {
			return 0.0;
		}
		let mut total = 0.0;
		let mut counted = 0;
		for (item, cluster) in self.assignment.iter().enumerate() {
			let Some(own) = *cluster else {
				continue;
			};
			let mean_to = |c: usize| -> Option<f64> {
				let others: Vec<usize> = self.clusters[c].iter().copied().filter(|&o| o != item).collect();
				if others.is_empty() {
					return None;
				}
				let sum: f64 = others
					.iter()
					.map(|&o| cosine_distance(&self.vectors[item], &self.vectors[o]))
					.sum();
				Some(sum / others.len() as f64)
			};
			counted += 1;
			// Singletons score 0.
			let Some(a) = mean_to(own) else {
				continue;
			};
			let b = (0..self.clusters.len())
				.filter(|&c| c != own)
				.filter_map(mean_to)
				.fold(f64::INFINITY, f64::min);
			if !b.is_finite() {
				continue;
			}
			let max_ab = a.max(b);
			if max_ab > 0.0 {
				total += (b - a) / max_ab;
			}
		}
		if counted == 0 {
			0.0
		} else {
			total / counted as f64
		}
	}

	/// Davies-Bouldin index with cosine distance; lower is better. Zero with
	/// fewer than two non-empty clusters.
	pub fn davies_bouldin_index(&self) -> f64 {
		let populated: Vec<usize> = (0..self.clusters.len())
			.filter(|&c| !self.clusters[c].is_empty())
			.collect();
		if populated.len() < 2 {
			return 0.0;
		}
		let scatter: HashMap<usize, f64> = populated
			.iter()
			.map(|&c| {
				let members = &self.clusters[c];
				let sum: f64 = members
					.iter()
					.map(|&i| cosine_distance(&self.vectors[i], &self.centroids[c]))
					.sum();
				(c, sum / members.len() as f64)
			})
			.collect();

		let mut total = 0.0;
		for &i in &populated {
			let worst = populated
				.iter()
				.filter(|&&j| j != i)
				.filter_map(|&j| {
					let separation = cosine_distance(&self.centroids[i], &self.centroids[j]);
					(separation > 0.0).then(|| (scatter[&i] + scatter[&j]) / separation)
				})
				.fold(0.0, f64::max);
			total += worst;
		}
		total / populated.len() as f64
	}

	pub fn quality(&self) -> ClusterQuality {
		ClusterQuality {
			k: self.clusters.len(),
			iterations: self.iterations,
			silhouette: self.silhouette_score(),
			davies_bouldin: self.davies_bouldin_index(),
			sizes: self.clusters.iter().map(BTreeSet::len).collect(),
		}
	}

	/// Elbow search over k in `[min_k, max_k]` on the Davies-Bouldin index.
	/// Leaves the model clustered with the chosen k.
	pub fn find_optimal_k(&mut self, min_k: usize, max_k: usize) -> usize {
		let max_k = max_k.min(self.ids.len());
		let min_k = min_k.max(2).min(max_k.max(1));
		let mut chosen = min_k;
		let mut previous: Option<f64> = None;
		for k in min_k..=max_k {
			self.cluster(k);
			let db = self.davies_bouldin_index();
			self.log.debug(format!("k={}: Davies-Bouldin {:.4}", k, db));
			if let Some(prev) = previous {
				if prev - db < ELBOW_FRACTION * prev {
					break;
				}
			}
			chosen = k;
			previous = Some(db);
		}
		if self.clusters.len() != chosen {
			self.cluster(chosen);
		}
		self.log.info(format!("Chose k={}", chosen));
		chosen
	}

	// -- accessors --------------------------------------------------------

	pub fn iterations_run(&self) -> usize {
		self.iterations
	}

	pub fn cluster_count(&self) -> usize {
		self.clusters.len()
	}

	pub fn item_count(&self) -> usize {
		self.ids.len()
	}

	pub fn cluster_of(&self, business_id: &str) -> Option<usize> {
		self.assignment[*self.index.get(business_id)?]
	}

	/// Business ids per cluster.
	pub fn clusters(&self) -> Vec<Vec<String>> {
		self.clusters
			.iter()
			.map(|c| c.iter().map(|&i| self.ids[i].clone()).collect())
			.collect()
	}

	pub fn business_clusters(&self) -> HashMap<String, usize> {
		self.ids
			.iter()
			.zip(&self.assignment)
			.filter_map(|(id, c)| Some((id.clone(), (*c)?)))
			.collect()
	}

	pub fn centroids(&self) -> &[Vec<f64>] {
		&self.centroids
	}

	/// Average rating per cluster, scaled by the top of the rating scale.
	fn cluster_weights(&self, ratings: &UserRatings) -> Vec<(usize, f64)> {
		let mut sums: HashMap<usize, (f64, usize)> = HashMap::new();
		for (id, rating) in ratings {
			if let Some(c) = self.cluster_of(id) {
				let entry = sums.entry(c).or_default();
				entry.0 += rating;
				entry.1 += 1;
			}
		}
		let mut weights: Vec<(usize, f64)> = sums
			.into_iter()
			.map(|(c, (sum, n))| (c, (sum / n as f64 / self.rating_scale).clamp(0.0, 1.0)))
			.filter(|(_, w)| *w > 0.0)
			.collect();
		weights.sort_by(|a, b| {
			b.1.partial_cmp(&a.1)
				.unwrap_or(std::cmp::Ordering::Equal)
				.then_with(|| a.0.cmp(&b.0))
		});
		weights
	}
}

impl Recommender for ClusteringRecommender {
	fn name(&self) -> &str {
		"kmeans"
	}

	fn fit(&mut self, dataset: &Dataset) -> Result<(), RecommendError> {
		self.trained = dataset.ratings_by_user();
		self.recent.clear();
		self.rating_scale = dataset
			.ratings
			.iter()
			.map(|r| r.rating)
			.chain(dataset.reviews.iter().map(|r| r.rating))
			.fold(f64::NEG_INFINITY, f64::max);
		if !(self.rating_scale.is_finite() && self.rating_scale > 0.0) {
			self.rating_scale = 5.0;
		}
		self.build_feature_vectors(&dataset.restaurants, &dataset.reviews)?;
		self.cluster(self.config.k);
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
				"kmeans",
				no_ratings_explanation(user_id),
				self.log.since(mark),
			);
		}
		self.recent.insert(user_id, user_ratings.clone());

		let weights = self.cluster_weights(user_ratings);
		if weights.is_empty() {
			self.log.warning(format!(
				"None of the restaurants rated by {} are clustered",
				user_id
			));
			return RecommendationResult::empty(
				"kmeans",
				format!("None of the restaurants rated by user {user_id} belong to a cluster"),
				self.log.since(mark),
			);
		}

		let total_weight: f64 = weights.iter().map(|(_, w)| w).sum();
		let mut items = Vec::new();
		for &(c, weight) in &weights {
			let picks = ((top_n as f64 * weight / total_weight).ceil() as usize).max(1);
			let centroid = &self.centroids[c];
			let mut candidates: Vec<ScoredItem> = self.clusters[c]
				.iter()
				.filter(|&&i| !user_ratings.contains_key(&self.ids[i]))
				.map(|&i| {
					let closeness = 1.0 - cosine_distance(&self.vectors[i], centroid);
					ScoredItem::new(self.ids[i].clone(), closeness.max(0.0) * weight)
				})
				.collect();
			crate::types::rank_descending(&mut candidates);
			candidates.truncate(picks);
			items.extend(candidates);
		}

		if items.is_empty() {
			self.log.info(format!("Favoured clusters hold no unrated items for {}", user_id));
			return RecommendationResult::empty(
				"kmeans",
				"You have already rated every restaurant in your favourite clusters",
				self.log.since(mark),
			);
		}
		self.log.info(format!(
			"Drew {} candidates from {} clusters for user {}",
			items.len(),
			weights.len(),
			user_id
		));
		RecommendationResult::from_ranked(
			items,
			top_n,
			format!(
				"Restaurants from the {} restaurant groups you rate best",
				weights.len()
			),
			"kmeans",
			self.log.since(mark),
		)
	}

	fn explain(&self, user_id: &str, business_id: &str) -> String {
		let Some(c) = self.cluster_of(business_id) else {
			return format!("Restaurant {business_id} is not in any cluster");
		};
		let size = self.clusters[c].len();
		let Some(ratings) = self.recent.get(user_id).or_else(|| self.trained.get(user_id)) else {
			return format!("{business_id} belongs to a group of {size} similar restaurants");
		};
		let in_cluster: Vec<f64> = ratings
			.iter()
			.filter(|(id, _)| self.cluster_of(id) == Some(c))
			.map(|(_, r)| *r)
			.collect();
		if in_cluster.is_empty() {
			return format!(
				"{business_id} belongs to a group of {size} similar restaurants you have not rated yet"
			);
		}
		let avg = in_cluster.iter().sum::<f64>() / in_cluster.len() as f64;
		format!(
			"{} is in a group of {} similar restaurants where you rated {} places {:.1} on average",
			self.names.get(business_id).map_or(business_id, String::as_str),
			size,
			in_cluster.len(),
			avg
		)
	}

	fn score_range(&self) -> (f64, f64) {
		(0.0, 1.0)
	}

	fn log(&self) -> &RecommenderLog {
		&self.log
	}
}
