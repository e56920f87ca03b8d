//! Latent semantic analysis profiler.
//!
//! Fits once over the full corpus: builds the document-term TF-IDF matrix
//! `A`, extracts the top `k` right singular vectors by power iteration on
//! `AᵀA` with deflation, and embeds any text as `(t · v_j) / σ_j`, which is
//! the document's row of `U` for documents in the corpus.

use crate::content::ContentProfiler;
use crate::error::RecommendError;
use crate::linalg::{truncated_svd, TruncatedSvd};
use crate::logs::RecommenderLog;
use crate::similarity::dot;
use crate::text::TfIdfModel;
use crate::types::EmbeddingMethod;

// ---------------------------------------------------------------------------
// LsaProfiler
// ---------------------------------------------------------------------------

pub struct LsaProfiler {
	components: usize,
	max_features: usize,
	model: Option<TfIdfModel>,
	svd: TruncatedSvd,
}

impl LsaProfiler {
	pub fn new(components: usize, max_features: usize) -> Self {
		Self {
			components: components.max(1),
			max_features,
			model: None,
			svd: TruncatedSvd::default(),
		}
	}

	pub fn singular_values(&self) -> &[f64] {
		&self.svd.singular_values
	}
}

impl ContentProfiler for LsaProfiler {
	fn name(&self) -> &'static str {
		"content-lsa"
	}

	fn method(&self) -> EmbeddingMethod {
		EmbeddingMethod::Lsa
	}

	fn dimensions(&self) -> usize {
		self.components
	}

	fn fit(&mut self, corpus: &[String]) -> Result<(), RecommendError> {
		let model = TfIdfModel::fit(corpus, self.max_features)?;
		let matrix: Vec<Vec<f64>> = corpus.iter().map(|doc| model.transform(doc)).collect();
		self.svd = truncated_svd(&matrix, self.components);
		self.model = Some(model);
		Ok(())
	}

	fn embed(&mut self, text: &str, log: &mut RecommenderLog) -> Result<Vec<f64>, RecommendError> {
		let model = self.model.as_ref().ok_or(RecommendError::NotInitialized)?;
		if self.svd.components.is_empty() {
			log.warning("LSA concept space is empty; document embeds as a zero vector");
		}
		let terms = model.transform(text);
		let mut embedding = vec![0.0; self.components];
		for (slot, (v, sigma)) in embedding
			.iter_mut()
			.zip(self.svd.components.iter().zip(&self.svd.singular_values))
		{
			*slot = dot(&terms, v) / sigma;
		}
		Ok(embedding)
	}
}
