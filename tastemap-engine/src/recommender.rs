use crate::error::RecommendError;
use crate::factorization::ModelSnapshot;
use crate::logs::{LogEntry, RecommenderLog};
use crate::types::{Dataset, RecommendationResult, UserRatings};

/// Common surface of every recommender family.
///
/// `fit` is the only fallible call and runs at setup time. `recommend` and
/// `explain` always produce a well-formed value; recoverable problems show
/// up as an empty result with an explanation and as log entries.
pub trait Recommender {
	/// Algorithm name, also used as `RecommendationResult::method`.
	fn name(&self) -> &str;

	/// Replace all learned state with state derived from `dataset`.
	fn fit(&mut self, dataset: &Dataset) -> Result<(), RecommendError>;

	/// Rank unrated businesses for a user. Never returns a business that
	/// appears in `user_ratings`.
	fn recommend(
		&mut self,
		user_id: &str,
		user_ratings: &UserRatings,
		top_n: usize,
	) -> RecommendationResult;

	/// Human readable reason for recommending `business_id` to `user_id`.
	fn explain(&self, user_id: &str, business_id: &str) -> String;

	/// Raw score range of `recommend`, used to normalize scores in hybrids.
	fn score_range(&self) -> (f64, f64);

	fn log(&self) -> &RecommenderLog;

	fn logs(&self) -> &[LogEntry] {
		self.log().entries()
	}

	fn formatted_logs(&self) -> Vec<String> {
		self.log().formatted()
	}

	/// Saved learned state, for recommenders that support it.
	fn snapshot(&self) -> Option<ModelSnapshot> {
		None
	}

	fn restore(&mut self, _snapshot: &ModelSnapshot) -> Result<(), RecommendError> {
		Err(RecommendError::InvalidConfig(format!(
			"{} does not support model snapshots",
			self.name()
		)))
	}
}

/// Explanation for an empty rating set, shared by all families.
pub(crate) fn no_ratings_explanation(user_id: &str) -> String {
	format!(
		"No ratings available for user {user_id}; rate a few restaurants to get recommendations"
	)
}
