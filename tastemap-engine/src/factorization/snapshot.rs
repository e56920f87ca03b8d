// ---------------------------------------------------------------------------
// Model snapshots
// ---------------------------------------------------------------------------
//
// File format: gzipped JSON `ModelSnapshot`. Factor matrices are flattened
// row-major and stored as base64 little-endian f32 (see `persistence`).
// ---------------------------------------------------------------------------

use std::collections::{HashMap, HashSet};
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::config::FactorizationConfig;
use crate::error::RecommendError;
use crate::factorization::{SvdModel, TrainingReport};
use crate::persistence::{decode_matrix, decode_vector, encode_matrix, encode_vector, read_gz_json, write_gz_json};

pub const SNAPSHOT_VERSION: u32 = 1;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelSnapshot {
	pub version: u32,
	pub algorithm: String,
	pub factor_count: usize,
	pub min_rating: f64,
	pub max_rating: f64,
	pub global_bias: f64,
	pub user_ids: Vec<String>,
	pub item_ids: Vec<String>,
	pub user_biases: String,
	pub item_biases: String,
	pub user_factors: String,
	pub item_factors: String,
	/// Training ratings per user, as item ids.
	pub rated: HashMap<String, Vec<String>>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub report: Option<TrainingReport>,
}

impl ModelSnapshot {
	pub fn save(&self, path: &Path) -> Result<(), RecommendError> {
		write_gz_json(path, self)
	}

	pub fn load(path: &Path) -> Result<Self, RecommendError> {
		let snapshot: Self = read_gz_json(path)?;
		if snapshot.version != SNAPSHOT_VERSION {
			return Err(RecommendError::Corruption(format!(
				"Unsupported snapshot version {}",
				snapshot.version
			)));
		}
		Ok(snapshot)
	}
}

impl SvdModel {
	pub fn snapshot(&self, algorithm: &str) -> ModelSnapshot {
		let mut rated: HashMap<String, Vec<String>> = HashMap::new();
		for (user, items) in &self.rated {
			let mut items: Vec<String> = items.iter().cloned().collect();
			items.sort();
			rated.insert(user.clone(), items);
		}
		ModelSnapshot {
			version: SNAPSHOT_VERSION,
			algorithm: algorithm.to_string(),
			factor_count: self.factor_count(),
			min_rating: self.config.min_rating,
			max_rating: self.config.max_rating,
			global_bias: self.global_bias,
			user_ids: self.user_ids.clone(),
			item_ids: self.item_ids.clone(),
			user_biases: encode_vector(&self.user_biases),
			item_biases: encode_vector(&self.item_biases),
			user_factors: encode_matrix(&self.user_factors),
			item_factors: encode_matrix(&self.item_factors),
			rated,
			report: self.report.clone(),
		}
	}

	/// Rebuild a trained model. Training parameters come from `config`; the
	/// rating range comes from the snapshot.
	pub fn from_snapshot(snapshot: &ModelSnapshot, config: FactorizationConfig) -> Result<Self, RecommendError> {
		let user_biases = decode_vector(&snapshot.user_biases)?;
		let item_biases = decode_vector(&snapshot.item_biases)?;
		let user_factors = decode_matrix(&snapshot.user_factors, snapshot.factor_count)?;
		let item_factors = decode_matrix(&snapshot.item_factors, snapshot.factor_count)?;

		let users = snapshot.user_ids.len();
		let items = snapshot.item_ids.len();
		if user_biases.len() != users || user_factors.len() != users {
			return Err(RecommendError::Corruption(format!(
				"Snapshot has {} users but {} biases and {} factor rows",
				users,
				user_biases.len(),
				user_factors.len()
			)));
		}
		if item_biases.len() != items || item_factors.len() != items {
			return Err(RecommendError::Corruption(format!(
				"Snapshot has {} items but {} biases and {} factor rows",
				items,
				item_biases.len(),
				item_factors.len()
			)));
		}

		let mut model = SvdModel::new(FactorizationConfig {
			min_rating: snapshot.min_rating,
			max_rating: snapshot.max_rating,
			..config
		});
		model.user_index = index_of(&snapshot.user_ids);
		model.item_index = index_of(&snapshot.item_ids);
		model.user_ids = snapshot.user_ids.clone();
		model.item_ids = snapshot.item_ids.clone();
		model.user_biases = user_biases;
		model.item_biases = item_biases;
		model.user_factors = user_factors;
		model.item_factors = item_factors;
		model.global_bias = snapshot.global_bias;
		model.rated = snapshot
			.rated
			.iter()
			.map(|(u, items)| (u.clone(), items.iter().cloned().collect::<HashSet<_>>()))
			.collect();
		model.report = Some(snapshot.report.clone().unwrap_or_default());
		Ok(model)
	}
}

fn index_of(ids: &[String]) -> HashMap<String, usize> {
	ids.iter().enumerate().map(|(i, id)| (id.clone(), i)).collect()
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::factorization::tests::{grid_ratings, test_config};
	use crate::factorization::MfModel;
	use crate::logs::RecommenderLog;

	fn trained() -> SvdModel {
		let mut model = SvdModel::new(test_config());
		let mut log = RecommenderLog::new("svd");
		model.train(&grid_ratings(), &mut log).unwrap();
		model
	}

	#[test]
	fn snapshot_restores_predictions() {
		let model = trained();
		let dir = tempfile::tempdir().unwrap();
		let path = dir.path().join("svd.json.gz");
		model.snapshot("svd").save(&path).unwrap();

		let restored = SvdModel::from_snapshot(&ModelSnapshot::load(&path).unwrap(), test_config()).unwrap();
		assert!(restored.is_trained());
		for item in model.item_ids() {
			let a = model.predict("u2", item).unwrap();
			let b = restored.predict("u2", item).unwrap();
			assert!((a - b).abs() < 1e-4);
		}
		assert_eq!(restored.rated_items("u1").unwrap().len(), 5);
	}

	#[test]
	fn mismatched_rows_are_corruption() {
		let mut snapshot = trained().snapshot("svd");
		snapshot.user_ids.push("ghost".into());
		assert!(matches!(
			SvdModel::from_snapshot(&snapshot, test_config()),
			Err(RecommendError::Corruption(_))
		));
	}

	#[test]
	fn wrong_version_is_rejected() {
		let mut snapshot = trained().snapshot("svd");
		snapshot.version = 99;
		let dir = tempfile::tempdir().unwrap();
		let path = dir.path().join("old.json.gz");
		snapshot.save(&path).unwrap();
		assert!(ModelSnapshot::load(&path).is_err());
	}
}
