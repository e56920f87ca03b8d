use std::collections::{HashMap, HashSet};

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};

use crate::config::FactorizationConfig;
use crate::error::RecommendError;
use crate::factorization::{MfModel, ModelSnapshot, TrainingReport};
use crate::logs::RecommenderLog;
use crate::similarity::dot;
use crate::types::Rating;

const INIT_SCALE: f64 = 0.1;

/// Biased matrix factorization trained with stochastic gradient descent.
///
/// `r̂(u, i) = μ + b_u + b_i + p_u · q_i`, clipped to the rating range.
#[derive(Debug, Clone)]
pub struct SvdModel {
	pub(crate) config: FactorizationConfig,
	pub(crate) user_ids: Vec<String>,
	pub(crate) item_ids: Vec<String>,
	pub(crate) user_index: HashMap<String, usize>,
	pub(crate) item_index: HashMap<String, usize>,
	pub(crate) user_factors: Vec<Vec<f64>>,
	pub(crate) item_factors: Vec<Vec<f64>>,
	pub(crate) global_bias: f64,
	pub(crate) user_biases: Vec<f64>,
	pub(crate) item_biases: Vec<f64>,
	pub(crate) rated: HashMap<String, HashSet<String>>,
	pub(crate) report: Option<TrainingReport>,
}

impl SvdModel {
	pub fn new(config: FactorizationConfig) -> Self {
		Self {
			config,
			user_ids: Vec::new(),
			item_ids: Vec::new(),
			user_index: HashMap::new(),
			item_index: HashMap::new(),
			user_factors: Vec::new(),
			item_factors: Vec::new(),
			global_bias: 0.0,
			user_biases: Vec::new(),
			item_biases: Vec::new(),
			rated: HashMap::new(),
			report: None,
		}
	}

	pub fn config(&self) -> &FactorizationConfig {
		&self.config
	}

	pub fn global_bias(&self) -> f64 {
		self.global_bias
	}

	/// Current factor width; shrinks after PCA reduction.
	pub fn factor_count(&self) -> usize {
		self.item_factors
			.first()
			.or_else(|| self.user_factors.first())
			.map_or(0, Vec::len)
	}

	pub fn user_factors(&self, user_id: &str) -> Option<&[f64]> {
		let &u = self.user_index.get(user_id)?;
		Some(&self.user_factors[u])
	}

	pub fn item_factors(&self, business_id: &str) -> Option<&[f64]> {
		let &i = self.item_index.get(business_id)?;
		Some(&self.item_factors[i])
	}

	fn clip(&self, value: f64) -> f64 {
		value.clamp(self.config.min_rating, self.config.max_rating)
	}

	fn predict_indexed(&self, u: usize, i: usize) -> f64 {
		self.clip(
			self.global_bias
				+ self.user_biases[u]
				+ self.item_biases[i]
				+ dot(&self.user_factors[u], &self.item_factors[i]),
		)
	}

	fn rng(&self) -> StdRng {
		match self.config.seed {
			Some(seed) => StdRng::seed_from_u64(seed),
			None => StdRng::from_entropy(),
		}
	}

	fn reset(&mut self) {
		let config = self.config.clone();
		*self = Self::new(config);
	}

	fn index_ratings(&mut self, ratings: &[Rating]) -> Vec<(usize, usize, f64)> {
		let mut triples = Vec::with_capacity(ratings.len());
		for r in ratings {
			let u = *self.user_index.entry(r.user_id.clone()).or_insert_with(|| {
				self.user_ids.push(r.user_id.clone());
				self.user_ids.len() - 1
			});
			let i = *self.item_index.entry(r.business_id.clone()).or_insert_with(|| {
				self.item_ids.push(r.business_id.clone());
				self.item_ids.len() - 1
			});
			self.rated
				.entry(r.user_id.clone())
				.or_default()
				.insert(r.business_id.clone());
			triples.push((u, i, r.rating));
		}
		triples
	}
}

impl MfModel for SvdModel {
	fn name(&self) -> &'static str {
		"svd"
	}

	fn train(&mut self, ratings: &[Rating], log: &mut RecommenderLog) -> Result<TrainingReport, RecommendError> {
		self.reset();
		if ratings.is_empty() {
			log.warning("No ratings to train on; model left untrained");
			return Ok(TrainingReport::default());
		}

		let mut triples = self.index_ratings(ratings);
		let mut rng = self.rng();
		let factors = self.config.num_factors;
		let mut init = |n: usize| -> Vec<Vec<f64>> {
			(0..n)
				.map(|_| (0..factors).map(|_| rng.gen_range(-INIT_SCALE..INIT_SCALE)).collect())
				.collect()
		};
		self.user_factors = init(self.user_ids.len());
		self.item_factors = init(self.item_ids.len());
		self.user_biases = vec![0.0; self.user_ids.len()];
		self.item_biases = vec![0.0; self.item_ids.len()];
		self.global_bias = triples.iter().map(|t| t.2).sum::<f64>() / triples.len() as f64;

		let lr = self.config.learning_rate;
		let reg = self.config.regularization;
		let mut report = TrainingReport {
			best_rmse: f64::INFINITY,
			..Default::default()
		};
		let mut since_best = 0;

		for epoch in 0..self.config.num_epochs {
			triples.shuffle(&mut rng);
			let mut squared = 0.0;

			for &(u, i, actual) in &triples {
				let error = actual - self.predict_indexed(u, i);
				squared += error * error;

				let bu = self.user_biases[u];
				let bi = self.item_biases[i];
				self.user_biases[u] = bu + lr * (error - reg * bu);
				self.item_biases[i] = bi + lr * (error - reg * bi);

				let user = &mut self.user_factors[u];
				let item = &mut self.item_factors[i];
				for (p, q) in user.iter_mut().zip(item.iter_mut()) {
					let (old_p, old_q) = (*p, *q);
					*p += lr * (error * old_q - reg * old_p);
					*q += lr * (error * old_p - reg * old_q);
				}
			}

			let rmse = (squared / triples.len() as f64).sqrt();
			let previous = report.rmse_history.last().copied();
			report.rmse_history.push(rmse);
			report.epochs_run = epoch + 1;
			log.debug(format!("Epoch {}: RMSE {:.4}", epoch + 1, rmse));

			if !rmse.is_finite() {
				log.error(format!("Training diverged at epoch {}", epoch + 1));
				report.stopped_early = true;
				break;
			}
			if rmse < report.best_rmse {
				report.best_rmse = rmse;
				since_best = 0;
			} else {
				since_best += 1;
			}

			if let Some(prev) = previous {
				if prev - rmse < self.config.min_improvement {
					log.info(format!(
						"Stopping after epoch {}: RMSE improved by {:.6}",
						epoch + 1,
						prev - rmse
					));
					report.stopped_early = true;
					break;
				}
			}
			if since_best >= self.config.patience {
				log.info(format!(
					"Stopping after epoch {}: no new best RMSE for {} epochs",
					epoch + 1,
					since_best
				));
				report.stopped_early = true;
				break;
			}
		}

		log.info(format!(
			"Trained {} factors for {} users and {} items in {} epochs (best RMSE {:.4})",
			factors,
			self.user_ids.len(),
			self.item_ids.len(),
			report.epochs_run,
			report.best_rmse
		));
		self.report = Some(report.clone());
		Ok(report)
	}

	fn is_trained(&self) -> bool {
		self.report.is_some() && !self.item_ids.is_empty()
	}

	fn predict(&self, user_id: &str, business_id: &str) -> Option<f64> {
		let &i = self.item_index.get(business_id)?;
		Some(match self.user_index.get(user_id) {
			Some(&u) => self.predict_indexed(u, i),
			None => self.clip(self.global_bias + self.item_biases[i]),
		})
	}

	fn item_ids(&self) -> &[String] {
		&self.item_ids
	}

	fn rated_items(&self, user_id: &str) -> Option<&HashSet<String>> {
		self.rated.get(user_id)
	}

	fn rating_bounds(&self) -> (f64, f64) {
		(self.config.min_rating, self.config.max_rating)
	}

	fn report(&self) -> Option<&TrainingReport> {
		self.report.as_ref()
	}

	fn to_snapshot(&self) -> ModelSnapshot {
		self.snapshot(self.name())
	}

	fn restore_snapshot(&mut self, snapshot: &ModelSnapshot) -> Result<(), RecommendError> {
		*self = SvdModel::from_snapshot(snapshot, self.config.clone())?;
		Ok(())
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::factorization::tests::{grid_ratings, test_config};

	fn trained(config: FactorizationConfig) -> (SvdModel, TrainingReport) {
		let mut model = SvdModel::new(config);
		let mut log = RecommenderLog::new("svd");
		let report = model.train(&grid_ratings(), &mut log).unwrap();
		(model, report)
	}

	#[test]
	fn rmse_falls_during_training() {
		let (_, report) = trained(test_config());
		assert!(report.epochs_run <= 50);
		let first = report.rmse_history[0];
		let last = *report.rmse_history.last().unwrap();
		assert!(last < first, "{last} !< {first}");
		assert!(report.best_rmse <= last);
	}

	#[test]
	fn epochs_are_capped() {
		let config = FactorizationConfig {
			num_epochs: 3,
			..test_config()
		};
		let (_, report) = trained(config);
		assert_eq!(report.epochs_run, 3);
		assert_eq!(report.rmse_history.len(), 3);
	}

	#[test]
	fn stops_when_improvement_is_small() {
		let config = FactorizationConfig {
			min_improvement: 10.0,
			..test_config()
		};
		let (_, report) = trained(config);
		assert_eq!(report.epochs_run, 2);
		assert!(report.stopped_early);
	}

	#[test]
	fn same_seed_same_model() {
		let (a, _) = trained(test_config());
		let (b, _) = trained(test_config());
		assert_eq!(a.predict("u1", "i2"), b.predict("u1", "i2"));
	}

	#[test]
	fn predictions_are_clipped() {
		let (model, _) = trained(test_config());
		for user in ["u1", "u2", "u3", "stranger"] {
			for item in &model.item_ids {
				let p = model.predict(user, item).unwrap();
				assert!((1.0..=5.0).contains(&p));
			}
		}
		assert_eq!(model.predict("u1", "unknown"), None);
	}

	#[test]
	fn learns_taste_groups() {
		let (model, _) = trained(FactorizationConfig {
			num_factors: 2,
			learning_rate: 0.05,
			num_epochs: 300,
			min_improvement: -1.0,
			patience: 300,
			..test_config()
		});
		// u1 loves i0 and dislikes i2; u3 the reverse.
		assert!(model.predict("u1", "i0").unwrap() > model.predict("u1", "i2").unwrap());
		assert!(model.predict("u3", "i2").unwrap() > model.predict("u3", "i0").unwrap());
	}

	#[test]
	fn rated_items_come_from_training() {
		let (model, _) = trained(test_config());
		assert_eq!(model.rated_items("u2").unwrap().len(), 5);
		assert!(model.rated_items("stranger").is_none());
	}

	#[test]
	fn empty_ratings_leave_model_untrained() {
		let mut model = SvdModel::new(test_config());
		let mut log = RecommenderLog::new("svd");
		model.train(&[], &mut log).unwrap();
		assert!(!model.is_trained());
	}
}
