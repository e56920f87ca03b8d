// ---------------------------------------------------------------------------
// Algorithm selection
// ---------------------------------------------------------------------------

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::clustering::ClusteringRecommender;
use crate::collaborative::{CollaborativeRecommender, ItemBasedPredictor, UserBasedPredictor};
use crate::config::EngineConfig;
use crate::content::{
	ContentRecommender, EmbeddingProfiler, HashEmbedder, LsaProfiler, TextEmbedder, TfIdfProfiler,
	TimeoutEmbedder,
};
use crate::error::RecommendError;
use crate::factorization::{FactorizationRecommender, SvdModel, SvdPcaModel};
use crate::hybrid::{SourceKind, SwitchingHybrid, WeightedHybrid};
use crate::recommender::Recommender;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Algorithm {
	ContentTfidf,
	ContentLsa,
	ContentEmbedding,
	UserCf,
	ItemCf,
	Svd,
	SvdPca,
	Kmeans,
	HybridWeighted,
	HybridSwitching,
}

impl Algorithm {
	pub const ALL: [Algorithm; 10] = [
		Algorithm::ContentTfidf,
		Algorithm::ContentLsa,
		Algorithm::ContentEmbedding,
		Algorithm::UserCf,
		Algorithm::ItemCf,
		Algorithm::Svd,
		Algorithm::SvdPca,
		Algorithm::Kmeans,
		Algorithm::HybridWeighted,
		Algorithm::HybridSwitching,
	];

	pub fn as_str(&self) -> &'static str {
		match self {
			Algorithm::ContentTfidf => "content-tfidf",
			Algorithm::ContentLsa => "content-lsa",
			Algorithm::ContentEmbedding => "content-embedding",
			Algorithm::UserCf => "user-cf",
			Algorithm::ItemCf => "item-cf",
			Algorithm::Svd => "svd",
			Algorithm::SvdPca => "svd-pca",
			Algorithm::Kmeans => "kmeans",
			Algorithm::HybridWeighted => "hybrid-weighted",
			Algorithm::HybridSwitching => "hybrid-switching",
		}
	}
}

impl fmt::Display for Algorithm {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

impl FromStr for Algorithm {
	type Err = RecommendError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		Algorithm::ALL
			.iter()
			.find(|a| a.as_str() == s)
			.copied()
			.ok_or_else(|| RecommendError::UnknownAlgorithm(s.to_string()))
	}
}

// ---------------------------------------------------------------------------
// Factory
// ---------------------------------------------------------------------------

/// Build an unfitted recommender using the local hashing embedder.
pub fn build_recommender(
	algorithm: Algorithm,
	config: &EngineConfig,
) -> Result<Box<dyn Recommender>, RecommendError> {
	let embedder: Arc<dyn TextEmbedder> =
		Arc::new(HashEmbedder::new(config.content.embedding_dimensions));
	build_recommender_with(algorithm, config, embedder)
}

/// Build an unfitted recommender. `embedder` backs `content-embedding`
/// and is wrapped with the configured timeout.
pub fn build_recommender_with(
	algorithm: Algorithm,
	config: &EngineConfig,
	embedder: Arc<dyn TextEmbedder>,
) -> Result<Box<dyn Recommender>, RecommendError> {
	config.validate()?;
	build(algorithm, config, &embedder)
}

fn build(
	algorithm: Algorithm,
	config: &EngineConfig,
	embedder: &Arc<dyn TextEmbedder>,
) -> Result<Box<dyn Recommender>, RecommendError> {
	let content = &config.content;
	let recommender: Box<dyn Recommender> = match algorithm {
		Algorithm::ContentTfidf => Box::new(ContentRecommender::new(
			TfIdfProfiler::new(content.max_features),
			content.clone(),
		)),
		Algorithm::ContentLsa => Box::new(ContentRecommender::new(
			LsaProfiler::new(content.lsa_components, content.max_features),
			content.clone(),
		)),
		Algorithm::ContentEmbedding => {
			let timed: Arc<dyn TextEmbedder> = Arc::new(TimeoutEmbedder::new(
				Arc::clone(embedder),
				Duration::from_millis(content.embedding_timeout_ms),
			));
			Box::new(ContentRecommender::new(EmbeddingProfiler::new(timed), content.clone()))
		}
		Algorithm::UserCf => Box::new(CollaborativeRecommender::new(
			UserBasedPredictor::new(),
			config.collaborative.clone(),
		)),
		Algorithm::ItemCf => Box::new(CollaborativeRecommender::new(
			ItemBasedPredictor::new(),
			config.collaborative.clone(),
		)),
		Algorithm::Svd => Box::new(FactorizationRecommender::new(SvdModel::new(
			config.factorization.clone(),
		))),
		Algorithm::SvdPca => Box::new(FactorizationRecommender::new(SvdPcaModel::new(
			config.factorization.clone(),
		))),
		Algorithm::Kmeans => Box::new(ClusteringRecommender::new(config.clustering.clone())),
		Algorithm::HybridWeighted => Box::new(build_weighted(config, embedder)?),
		Algorithm::HybridSwitching => {
			let matrix = if config.hybrid.weights.matrix > 0.0 {
				Some(build(Algorithm::Svd, config, embedder)?)
			} else {
				None
			};
			Box::new(SwitchingHybrid::new(
				config.hybrid.clone(),
				build(Algorithm::ContentTfidf, config, embedder)?,
				Some(build(Algorithm::UserCf, config, embedder)?),
				matrix,
			))
		}
	};
	Ok(recommender)
}

/// The algorithm standing in for each hybrid source family.
pub fn source_algorithm(kind: SourceKind) -> Algorithm {
	match kind {
		SourceKind::Content => Algorithm::ContentTfidf,
		SourceKind::Collaborative => Algorithm::UserCf,
		SourceKind::Matrix => Algorithm::Svd,
		SourceKind::Clustering => Algorithm::Kmeans,
	}
}

fn build_weighted(
	config: &EngineConfig,
	embedder: &Arc<dyn TextEmbedder>,
) -> Result<WeightedHybrid, RecommendError> {
	let weights = &config.hybrid.weights;
	let mut sources = Vec::new();
	for kind in [
		SourceKind::Content,
		SourceKind::Collaborative,
		SourceKind::Matrix,
		SourceKind::Clustering,
	] {
		let weight = kind.weight_in(weights);
		if weight > 0.0 {
			sources.push((kind, weight, build(source_algorithm(kind), config, embedder)?));
		}
	}
	WeightedHybrid::new(sources, &config.hybrid)
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn names_round_trip() {
		for algorithm in Algorithm::ALL {
			assert_eq!(algorithm.as_str().parse::<Algorithm>().unwrap(), algorithm);
			let json = serde_json::to_value(algorithm).unwrap();
			assert_eq!(json, algorithm.as_str());
		}
	}

	#[test]
	fn unknown_name_is_an_error() {
		assert!(matches!(
			"deep-magic".parse::<Algorithm>(),
			Err(RecommendError::UnknownAlgorithm(_))
		));
	}

	#[test]
	fn built_recommenders_report_their_algorithm() {
		let config = EngineConfig::default();
		for algorithm in Algorithm::ALL {
			let rec = build_recommender(algorithm, &config).unwrap();
			assert_eq!(rec.name(), algorithm.as_str());
		}
	}

	#[test]
	fn invalid_config_fails_at_build_time() {
		let mut config = EngineConfig::default();
		config.hybrid.weights.content = 0.0;
		config.hybrid.weights.collaborative = 0.0;
		config.hybrid.weights.matrix = 0.0;
		config.hybrid.weights.clustering = 0.0;
		assert!(matches!(
			build_recommender(Algorithm::HybridWeighted, &config),
			Err(RecommendError::InvalidConfig(_))
		));
	}
}
