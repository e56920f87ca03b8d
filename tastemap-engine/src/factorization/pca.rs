use std::collections::HashSet;

use crate::config::FactorizationConfig;
use crate::error::RecommendError;
use crate::factorization::{MfModel, ModelSnapshot, SvdModel, TrainingReport};
use crate::linalg::symmetric_eigen;
use crate::logs::RecommenderLog;
use crate::similarity::dot;
use crate::types::Rating;

/// SVD followed by a PCA reduction of the learned factors.
///
/// After training, the user and item factor rows are pooled, their
/// covariance is decomposed, and both sides are projected onto the fewest
/// principal axes whose cumulative explained variance reaches
/// `variance_threshold`. Rows are projected uncentred so that dot products
/// stay an approximation of the originals.
#[derive(Debug, Clone)]
pub struct SvdPcaModel {
	inner: SvdModel,
	explained_variance: Vec<f64>,
	retained: usize,
}

impl SvdPcaModel {
	pub fn new(config: FactorizationConfig) -> Self {
		Self {
			inner: SvdModel::new(config),
			explained_variance: Vec::new(),
			retained: 0,
		}
	}

	/// Explained variance ratio per principal component, strongest first.
	pub fn explained_variance(&self) -> &[f64] {
		&self.explained_variance
	}

	pub fn retained_components(&self) -> usize {
		self.retained
	}

	pub fn inner(&self) -> &SvdModel {
		&self.inner
	}

	pub fn snapshot(&self) -> ModelSnapshot {
		self.inner.snapshot(self.name())
	}

	/// Restore an already reduced model. Explained variance is not stored.
	pub fn from_snapshot(snapshot: &ModelSnapshot, config: FactorizationConfig) -> Result<Self, RecommendError> {
		let inner = SvdModel::from_snapshot(snapshot, config)?;
		let retained = inner.factor_count();
		Ok(Self {
			inner,
			explained_variance: Vec::new(),
			retained,
		})
	}

	fn reduce(&mut self, log: &mut RecommenderLog) {
		let rows: Vec<&Vec<f64>> = self
			.inner
			.user_factors
			.iter()
			.chain(self.inner.item_factors.iter())
			.collect();
		let dims = self.inner.factor_count();
		if rows.len() < 2 || dims == 0 {
			log.warning("Too few factor rows for PCA; keeping full factors");
			self.explained_variance = Vec::new();
			self.retained = dims;
			return;
		}

		let covariance = covariance(&rows, dims);
		let total: f64 = (0..dims).map(|d| covariance[d][d]).sum();
		let eigen = symmetric_eigen(&covariance, dims);
		if total <= 0.0 || eigen.components.is_empty() {
			log.warning("Factors have no variance; keeping full factors");
			self.explained_variance = Vec::new();
			self.retained = dims;
			return;
		}

		self.explained_variance = eigen.singular_values.iter().map(|l| l / total).collect();
		let threshold = self.inner.config.variance_threshold;
		let mut cumulative = 0.0;
		let mut keep = self.explained_variance.len();
		for (m, ratio) in self.explained_variance.iter().enumerate() {
			cumulative += ratio;
			if cumulative >= threshold {
				keep = m + 1;
				break;
			}
		}
		let axes = &eigen.components[..keep];

		let project = |row: &Vec<f64>| -> Vec<f64> { axes.iter().map(|axis| dot(row, axis)).collect() };
		self.inner.user_factors = self.inner.user_factors.iter().map(project).collect();
		self.inner.item_factors = self.inner.item_factors.iter().map(project).collect();
		self.retained = keep;

		log.info(format!(
			"PCA kept {} of {} factor dimensions ({:.1}% of variance)",
			keep,
			dims,
			self.explained_variance[..keep].iter().sum::<f64>() * 100.0
		));
	}
}

/// Sample covariance of the columns of `rows`.
fn covariance(rows: &[&Vec<f64>], dims: usize) -> Vec<Vec<f64>> {
	let n = rows.len() as f64;
	let mut mean = vec![0.0; dims];
	for row in rows {
		for (m, x) in mean.iter_mut().zip(row.iter()) {
			*m += x / n;
		}
	}
	let mut cov = vec![vec![0.0; dims]; dims];
	for row in rows {
		for a in 0..dims {
			let da = row[a] - mean[a];
			for b in a..dims {
				cov[a][b] += da * (row[b] - mean[b]);
			}
		}
	}
	let denom = (n - 1.0).max(1.0);
	for a in 0..dims {
		for b in a..dims {
			cov[a][b] /= denom;
			cov[b][a] = cov[a][b];
		}
	}
	cov
}

impl MfModel for SvdPcaModel {
	fn name(&self) -> &'static str {
		"svd-pca"
	}

	fn train(&mut self, ratings: &[Rating], log: &mut RecommenderLog) -> Result<TrainingReport, RecommendError> {
		let report = self.inner.train(ratings, log)?;
		if self.inner.is_trained() {
			self.reduce(log);
		} else {
			self.explained_variance.clear();
			self.retained = 0;
		}
		Ok(report)
	}

	fn is_trained(&self) -> bool {
		self.inner.is_trained()
	}

	fn predict(&self, user_id: &str, business_id: &str) -> Option<f64> {
		self.inner.predict(user_id, business_id)
	}

	fn item_ids(&self) -> &[String] {
		self.inner.item_ids()
	}

	fn rated_items(&self, user_id: &str) -> Option<&HashSet<String>> {
		self.inner.rated_items(user_id)
	}

	fn rating_bounds(&self) -> (f64, f64) {
		self.inner.rating_bounds()
	}

	fn report(&self) -> Option<&TrainingReport> {
		self.inner.report()
	}

	fn to_snapshot(&self) -> ModelSnapshot {
		self.snapshot()
	}

	fn restore_snapshot(&mut self, snapshot: &ModelSnapshot) -> Result<(), RecommendError> {
		*self = SvdPcaModel::from_snapshot(snapshot, self.inner.config.clone())?;
		Ok(())
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::factorization::tests::{grid_ratings, test_config};

	fn trained(threshold: f64) -> SvdPcaModel {
		let mut model = SvdPcaModel::new(FactorizationConfig {
			num_factors: 6,
			variance_threshold: threshold,
			..test_config()
		});
		let mut log = RecommenderLog::new("svd-pca");
		model.train(&grid_ratings(), &mut log).unwrap();
		model
	}

	#[test]
	fn explained_variance_sums_to_at_most_one() {
		let model = trained(0.9);
		let total: f64 = model.explained_variance().iter().sum();
		assert!(total <= 1.0 + 1e-6);
		assert!(model
			.explained_variance()
			.windows(2)
			.all(|w| w[0] >= w[1] - 1e-6));
	}

	#[test]
	fn reduces_factor_width() {
		let model = trained(0.5);
		let kept = model.retained_components();
		assert!(kept >= 1 && kept <= 6);
		assert_eq!(model.inner().factor_count(), kept);
		assert_eq!(model.inner().user_factors("u1").unwrap().len(), kept);
	}

	#[test]
	fn full_threshold_keeps_more() {
		assert!(trained(1.0).retained_components() >= trained(0.3).retained_components());
	}

	#[test]
	fn snapshot_keeps_reduced_width() {
		let model = trained(0.5);
		let restored = SvdPcaModel::from_snapshot(&model.snapshot(), test_config()).unwrap();
		assert_eq!(restored.retained_components(), model.retained_components());
		assert_eq!(restored.name(), "svd-pca");
	}

	#[test]
	fn predictions_stay_in_range() {
		let model = trained(0.9);
		for item in model.item_ids() {
			let p = model.predict("u3", item).unwrap();
			assert!((1.0..=5.0).contains(&p));
		}
	}
}
