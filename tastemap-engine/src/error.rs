use thiserror::Error;

#[derive(Debug, Error)]
pub enum RecommendError {
	#[error("Engine not initialized: call engine/initialize and data/load first")]
	NotInitialized,
	#[error("Invalid configuration: {0}")]
	InvalidConfig(String),
	#[error("Unknown algorithm: {0}")]
	UnknownAlgorithm(String),
	#[error("Empty corpus: no documents to fit")]
	EmptyCorpus,
	#[error("Embedding error: {0}")]
	Embedding(String),
	#[error("Embedding timed out after {0} ms")]
	EmbeddingTimeout(u64),
	#[error("Cache error: {0}")]
	Cache(String),
	#[error("IO error: {0}")]
	Io(#[from] std::io::Error),
	#[error("Serialization error: {0}")]
	Serialization(String),
	#[error("Storage corruption: {0}")]
	Corruption(String),
}

impl RecommendError {
	pub fn code(&self) -> &str {
		match self {
			Self::NotInitialized => "ENGINE_NOT_INITIALIZED",
			Self::InvalidConfig(_) => "ENGINE_INVALID_CONFIG",
			Self::UnknownAlgorithm(_) => "ENGINE_UNKNOWN_ALGORITHM",
			Self::EmptyCorpus => "CONTENT_EMPTY_CORPUS",
			Self::Embedding(_) => "CONTENT_EMBEDDING",
			Self::EmbeddingTimeout(_) => "CONTENT_EMBEDDING_TIMEOUT",
			Self::Cache(_) => "CACHE_ERROR",
			Self::Io(_) => "ENGINE_IO",
			Self::Serialization(_) => "ENGINE_SERIALIZATION",
			Self::Corruption(_) => "ENGINE_CORRUPT",
		}
	}

	pub fn to_json_rpc_error(&self) -> serde_json::Value {
		serde_json::json!({
			"engineCode": self.code(),
			"message": self.to_string(),
		})
	}
}

impl From<serde_json::Error> for RecommendError {
	fn from(e: serde_json::Error) -> Self {
		Self::Serialization(e.to_string())
	}
}
