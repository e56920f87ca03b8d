//! Latent-factor matrix factorization.
//!
//! `SvdModel` learns user and item factors plus bias terms with SGD;
//! `SvdPcaModel` trains the same way and then projects the factors onto
//! their principal components. `FactorizationRecommender` ranks items by
//! predicted rating for any `MfModel`.

pub mod pca;
pub mod snapshot;
pub mod svd;

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::error::RecommendError;
use crate::logs::RecommenderLog;
use crate::recommender::{no_ratings_explanation, Recommender};
use crate::types::{Dataset, Rating, RecommendationResult, ScoredItem, UserRatings};

pub use pca::SvdPcaModel;
pub use snapshot::ModelSnapshot;
pub use svd::SvdModel;

/// Outcome of one training run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrainingReport {
	pub epochs_run: usize,
	/// RMSE per epoch, measured on the errors seen during that epoch.
	pub rmse_history: Vec<f64>,
	pub best_rmse: f64,
	pub stopped_early: bool,
}

/// A trained latent-factor model.
pub trait MfModel {
	fn name(&self) -> &'static str;

	/// Replace all learned state with a model of `ratings`.
	fn train(&mut self, ratings: &[Rating], log: &mut RecommenderLog) -> Result<TrainingReport, RecommendError>;

	fn is_trained(&self) -> bool;

	/// Predicted rating clipped to the configured range. `None` for an item
	/// the model has never seen. Users unseen in training get the bias-only
	/// prediction.
	fn predict(&self, user_id: &str, business_id: &str) -> Option<f64>;

	/// Items in training order.
	fn item_ids(&self) -> &[String];

	/// Items the user rated in the training data.
	fn rated_items(&self, user_id: &str) -> Option<&HashSet<String>>;

	fn rating_bounds(&self) -> (f64, f64);

	fn report(&self) -> Option<&TrainingReport>;

	fn to_snapshot(&self) -> ModelSnapshot;

	/// Replace the learned state with a saved one.
	fn restore_snapshot(&mut self, snapshot: &ModelSnapshot) -> Result<(), RecommendError>;
}

// ---------------------------------------------------------------------------
// FactorizationRecommender
// ---------------------------------------------------------------------------

pub struct FactorizationRecommender<M: MfModel> {
	model: M,
	log: RecommenderLog,
}

impl<M: MfModel> FactorizationRecommender<M> {
	pub fn new(model: M) -> Self {
		let log = RecommenderLog::new(model.name());
		Self { model, log }
	}

	pub fn model(&self) -> &M {
		&self.model
	}

	pub fn model_mut(&mut self) -> &mut M {
		&mut self.model
	}

	pub fn train(&mut self, ratings: &[Rating]) -> Result<TrainingReport, RecommendError> {
		self.model.train(ratings, &mut self.log)
	}

	fn score(&self, user_id: &str, exclude: impl Fn(&str) -> bool) -> Vec<ScoredItem> {
		self.model
			.item_ids()
			.iter()
			.filter(|id| !exclude(id.as_str()))
			.filter_map(|id| Some(ScoredItem::new(id.clone(), self.model.predict(user_id, id)?)))
			.collect()
	}
}

impl<M: MfModel> Recommender for FactorizationRecommender<M> {
	fn name(&self) -> &str {
		self.model.name()
	}

	fn fit(&mut self, dataset: &Dataset) -> Result<(), RecommendError> {
		self.train(&dataset.ratings).map(|_| ())
	}

	fn recommend(
		&mut self,
		user_id: &str,
		user_ratings: &UserRatings,
		top_n: usize,
	) -> RecommendationResult {
		let mark = self.log.mark();
		let method = self.model.name();

		if user_ratings.is_empty() {
			self.log.info(format!("User {} has no ratings", user_id));
			return RecommendationResult::empty(
				method,
				no_ratings_explanation(user_id),
				self.log.since(mark),
			);
		}
		if !self.model.is_trained() {
			self.log.warning("Recommendation requested before training");
			return RecommendationResult::empty(
				method,
				"The model has not been trained on any ratings yet",
				self.log.since(mark),
			);
		}

		let trained = self.model.rated_items(user_id);
		let unrated = self.score(user_id, |id| {
			user_ratings.contains_key(id) || trained.is_some_and(|t| t.contains(id))
		});

		let (items, explanation) = if !unrated.is_empty() {
			(
				unrated,
				format!("Highest predicted ratings for user {user_id} from learned taste factors"),
			)
		} else {
			// Everything left was rated in training; rank those rather than
			// return nothing.
			self.log.warning(format!(
				"No unrated items left for user {}; ranking previously rated items",
				user_id
			));
			(
				self.score(user_id, |id| user_ratings.contains_key(id)),
				format!(
					"User {user_id} has rated every restaurant; showing predicted favourites among them"
				),
			)
		};

		if items.is_empty() {
			return RecommendationResult::empty(
				method,
				format!("No restaurants left to recommend to user {user_id}"),
				self.log.since(mark),
			);
		}
		self.log.info(format!(
			"Ranked {} items for user {}",
			items.len(),
			user_id
		));
		RecommendationResult::from_ranked(items, top_n, explanation, method, self.log.since(mark))
	}

	fn explain(&self, user_id: &str, business_id: &str) -> String {
		match self.model.predict(user_id, business_id) {
			Some(p) if self.model.rated_items(user_id).is_some() => format!(
				"Predicted {p:.1} stars for {business_id} from the taste factors learned from your ratings"
			),
			Some(p) => format!(
				"Predicted {p:.1} stars for {business_id} from overall popularity; rate more restaurants for personal factors"
			),
			None => format!("Restaurant {business_id} has no ratings in the training data"),
		}
	}

	fn score_range(&self) -> (f64, f64) {
		self.model.rating_bounds()
	}

	fn snapshot(&self) -> Option<ModelSnapshot> {
		self.model.is_trained().then(|| self.model.to_snapshot())
	}

	fn restore(&mut self, snapshot: &ModelSnapshot) -> Result<(), RecommendError> {
		if snapshot.algorithm != self.model.name() {
			return Err(RecommendError::InvalidConfig(format!(
				"Snapshot of {} cannot be loaded into {}",
				snapshot.algorithm,
				self.model.name()
			)));
		}
		self.model.restore_snapshot(snapshot)?;
		self.log.info(format!(
			"Restored {} model with {} items",
			snapshot.algorithm,
			snapshot.item_ids.len()
		));
		Ok(())
	}

	fn log(&self) -> &RecommenderLog {
		&self.log
	}
}
