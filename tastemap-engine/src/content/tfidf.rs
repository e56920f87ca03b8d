use crate::content::ContentProfiler;
use crate::error::RecommendError;
use crate::logs::RecommenderLog;
use crate::text::TfIdfModel;
use crate::types::EmbeddingMethod;

/// Profiles items as L2-normalized TF-IDF vectors over a vocabulary fitted
/// on the whole corpus.
pub struct TfIdfProfiler {
	max_features: usize,
	model: Option<TfIdfModel>,
}

impl TfIdfProfiler {
	pub fn new(max_features: usize) -> Self {
		Self {
			max_features,
			model: None,
		}
	}

	pub fn model(&self) -> Option<&TfIdfModel> {
		self.model.as_ref()
	}
}

impl ContentProfiler for TfIdfProfiler {
	fn name(&self) -> &'static str {
		"content-tfidf"
	}

	fn method(&self) -> EmbeddingMethod {
		EmbeddingMethod::Tfidf
	}

	fn dimensions(&self) -> usize {
		self.model.as_ref().map_or(0, TfIdfModel::dimensions)
	}

	fn fit(&mut self, corpus: &[String]) -> Result<(), RecommendError> {
		self.model = Some(TfIdfModel::fit(corpus, self.max_features)?);
		Ok(())
	}

	fn embed(&mut self, text: &str, _log: &mut RecommenderLog) -> Result<Vec<f64>, RecommendError> {
		let model = self.model.as_ref().ok_or(RecommendError::NotInitialized)?;
		Ok(model.transform_normalized(text))
	}

	fn shared_terms(&self, a: &[f64], b: &[f64], n: usize) -> Vec<String> {
		let Some(model) = self.model.as_ref() else {
			return Vec::new();
		};
		let overlap: Vec<f64> = a.iter().zip(b).map(|(x, y)| x.min(*y).max(0.0)).collect();
		model
			.top_terms(&overlap, n)
			.into_iter()
			.map(|(term, _)| term)
			.collect()
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::similarity::{cosine_similarity, magnitude};

	fn fitted(corpus: &[&str]) -> TfIdfProfiler {
		let mut p = TfIdfProfiler::new(50);
		let docs: Vec<String> = corpus.iter().map(|s| s.to_string()).collect();
		p.fit(&docs).unwrap();
		p
	}

	#[test]
	fn embed_before_fit_fails() {
		let mut p = TfIdfProfiler::new(10);
		let mut log = RecommenderLog::new("test");
		assert!(matches!(
			p.embed("pizza", &mut log),
			Err(RecommendError::NotInitialized)
		));
	}

	#[test]
	fn vectors_are_unit_length() {
		let mut p = fitted(&["wood fired pizza crust", "spicy ramen broth"]);
		let mut log = RecommenderLog::new("test");
		let v = p.embed("wood fired pizza", &mut log).unwrap();
		assert!((magnitude(&v) - 1.0).abs() < 1e-10);
	}

	#[test]
	fn identical_text_has_similarity_one() {
		let mut p = fitted(&["wood fired pizza crust", "spicy ramen broth", "tacos salsa"]);
		let mut log = RecommenderLog::new("test");
		let a = p.embed("spicy ramen broth", &mut log).unwrap();
		let b = p.embed("spicy ramen broth", &mut log).unwrap();
		assert!((cosine_similarity(&a, &b) - 1.0).abs() < 1e-10);
	}

	#[test]
	fn shared_terms_names_overlap() {
		let mut p = fitted(&["spicy ramen broth", "spicy tacos salsa", "quiet cafe"]);
		let mut log = RecommenderLog::new("test");
		let a = p.embed("spicy ramen broth", &mut log).unwrap();
		let b = p.embed("spicy tacos salsa", &mut log).unwrap();
		assert_eq!(p.shared_terms(&a, &b, 3), vec!["spicy".to_string()]);
	}
}
