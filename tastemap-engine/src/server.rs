// ---------------------------------------------------------------------------
// RecommendServer: JSON-RPC dispatcher
// ---------------------------------------------------------------------------
//
// Routes JSON-RPC 2.0 requests (NDJSON over stdin) to a
// `RecommendationEngine`: a `run()` loop, a `dispatch()` match,
// `with_engine` / `with_engine_mut` helpers, and free-standing handlers.
// ---------------------------------------------------------------------------

use std::collections::HashMap;
use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};

use chrono::Utc;
use serde::Deserialize;

use crate::cache::{is_fresh, BlobStore, FileBlobStore, MemoryBlobStore};
use crate::config::{cache_ttl, CliArgs, EngineConfig};
use crate::engine::RecommendationEngine;
use crate::error::RecommendError;
use crate::factory::Algorithm;
use crate::persistence::read_gz_json;
use crate::protocol::*;
use crate::transport::NdjsonTransport;
use crate::types::{Dataset, Rating, Restaurant, Review, UserRatings};

const DEFAULT_TOP_N: usize = 10;

// ---------------------------------------------------------------------------
// Server
// ---------------------------------------------------------------------------

/// Process-level defaults; `engine/initialize` params override them.
#[derive(Debug, Clone)]
pub struct ServerOptions {
	pub cache_dir: Option<PathBuf>,
	pub cache_ttl_hours: i64,
	pub seed: Option<u64>,
}

impl Default for ServerOptions {
	fn default() -> Self {
		Self {
			cache_dir: None,
			cache_ttl_hours: 24,
			seed: None,
		}
	}
}

impl From<&CliArgs> for ServerOptions {
	fn from(args: &CliArgs) -> Self {
		Self {
			cache_dir: args.cache_dir.as_ref().map(PathBuf::from),
			cache_ttl_hours: args.cache_ttl_hours,
			seed: args.seed,
		}
	}
}

pub struct RecommendServer<W: Write = io::Stdout> {
	transport: NdjsonTransport<W>,
	options: ServerOptions,
	engine: Option<RecommendationEngine>,
}

impl<W: Write> RecommendServer<W> {
	/// The engine is created when `engine/initialize` is called.
	pub fn new(transport: NdjsonTransport<W>, options: ServerOptions) -> Self {
		Self {
			transport,
			options,
			engine: None,
		}
	}

	pub fn transport(&self) -> &NdjsonTransport<W> {
		&self.transport
	}

	/// Main loop: read JSON-RPC messages from stdin, dispatch to handlers.
	pub fn run(&mut self) -> Result<(), RecommendError> {
		let stdin = io::stdin();
		self.serve(stdin.lock())
	}

	/// Dispatch every request line from `reader` until it is exhausted.
	pub fn serve<R: BufRead>(&mut self, reader: R) -> Result<(), RecommendError> {
		for line_result in reader.lines() {
			let line = line_result?;
			if line.trim().is_empty() {
				continue;
			}

			let request: JsonRpcRequest = match serde_json::from_str(&line) {
				Ok(r) => r,
				Err(e) => {
					tracing::error!("Failed to parse request: {}", e);
					continue;
				}
			};

			self.dispatch(request);
		}

		Ok(())
	}

	// ── Dispatch ──────────────────────────────────────────────────────────

	fn dispatch(&mut self, req: JsonRpcRequest) {
		let id = req.id;
		let result = match req.method.as_str() {
			// -- Lifecycle -----------------------------------------------
			"engine/initialize" => self.handle_initialize(req.params),
			"data/load" => self.handle_data_load(req.params),

			// -- Recommendation ------------------------------------------
			"recommend" => self.with_engine_mut(|e| handle_recommend(e, req.params)),
			"recommend/explain" => self.with_engine_mut(|e| handle_explain(e, req.params)),
			"recommend/logs" => self.with_engine(|e| handle_logs(e, req.params)),
			"cache/get" => self.with_engine_mut(|e| handle_cache_get(e, req.params)),

			// -- Offline -------------------------------------------------
			"evaluate" => self.with_engine_mut(|e| handle_evaluate(e, req.params)),
			"dataset/stats" => self.with_engine(|e| {
				let stats = e.stats()?;
				Ok(serde_json::to_value(stats)?)
			}),
			"dataset/cfCandidates" => self.with_engine(|e| handle_cf_candidates(e, req.params)),

			// -- Models --------------------------------------------------
			"model/save" => self.with_engine_mut(|e| {
				let p: ModelParams = parse_params(req.params)?;
				e.save_model(parse_algorithm(&p.algorithm)?, Path::new(&p.path))?;
				Ok(serde_json::json!({}))
			}),
			"model/load" => self.with_engine_mut(|e| {
				let p: ModelParams = parse_params(req.params)?;
				e.load_model(parse_algorithm(&p.algorithm)?, Path::new(&p.path))?;
				Ok(serde_json::json!({}))
			}),

			// -- Unknown -------------------------------------------------
			_ => {
				self.transport.write_error(
					id,
					METHOD_NOT_FOUND,
					format!("Unknown method: {}", req.method),
					None,
				);
				return;
			}
		};

		match result {
			Ok(value) => self.transport.write_response(id, value),
			Err(e) => {
				let code = match e {
					RecommendError::Serialization(_) | RecommendError::UnknownAlgorithm(_) => INVALID_PARAMS,
					RecommendError::Io(_) => INTERNAL_ERROR,
					_ => ENGINE_ERROR,
				};
				self.transport
					.write_error(id, code, e.to_string(), Some(e.to_json_rpc_error()))
			}
		}
	}

	// ── Engine accessors ──────────────────────────────────────────────────

	fn with_engine<F>(&self, f: F) -> Result<serde_json::Value, RecommendError>
	where
		F: FnOnce(&RecommendationEngine) -> Result<serde_json::Value, RecommendError>,
	{
		match &self.engine {
			Some(e) => f(e),
			None => Err(RecommendError::NotInitialized),
		}
	}

	fn with_engine_mut<F>(&mut self, f: F) -> Result<serde_json::Value, RecommendError>
	where
		F: FnOnce(&mut RecommendationEngine) -> Result<serde_json::Value, RecommendError>,
	{
		match &mut self.engine {
			Some(e) => f(e),
			None => Err(RecommendError::NotInitialized),
		}
	}

	// ── Initialize / load ─────────────────────────────────────────────────

	fn handle_initialize(&mut self, params: serde_json::Value) -> Result<serde_json::Value, RecommendError> {
		let p: InitializeParams = parse_params(params)?;

		let seed = p.seed.or(self.options.seed);
		let config = p.config.unwrap_or_default().with_seed(seed);
		let ttl_hours = p.cache_ttl_hours.unwrap_or(self.options.cache_ttl_hours);
		let ttl = cache_ttl(ttl_hours)?;
		let cache_dir = p.cache_dir.map(PathBuf::from).or_else(|| self.options.cache_dir.clone());

		let store: Box<dyn BlobStore> = match &cache_dir {
			Some(dir) => Box::new(FileBlobStore::new(dir)?),
			None => Box::new(MemoryBlobStore::default()),
		};
		self.engine = Some(RecommendationEngine::new(config, store, ttl)?);

		tracing::info!(
			cache_dir = ?cache_dir,
			cache_ttl_hours = ttl_hours,
			"Engine initialized"
		);
		let algorithms: Vec<&str> = Algorithm::ALL.iter().map(Algorithm::as_str).collect();
		Ok(serde_json::json!({ "algorithms": algorithms }))
	}

	fn handle_data_load(&mut self, params: serde_json::Value) -> Result<serde_json::Value, RecommendError> {
		let p: DataLoadParams = parse_params(params)?;
		let dataset = match &p.path {
			Some(path) => read_gz_json::<Dataset>(Path::new(path))?,
			None => Dataset {
				restaurants: p.restaurants,
				reviews: p.reviews,
				ratings: p.ratings,
			},
		};

		let engine = self.engine.as_mut().ok_or(RecommendError::NotInitialized)?;
		let stats = engine.load(dataset);

		for name in &p.prefit {
			let algorithm = parse_algorithm(name)?;
			engine.recommender(algorithm)?;
			self.transport.write_notification(
				"recommender/fitted",
				serde_json::json!({ "algorithm": algorithm }),
			);
		}

		Ok(serde_json::to_value(stats)?)
	}
}

// ---------------------------------------------------------------------------
// Param types
// ---------------------------------------------------------------------------

/// Missing params read as `{}`.
fn parse_params<T: serde::de::DeserializeOwned>(params: serde_json::Value) -> Result<T, RecommendError> {
	let params = if params.is_null() { serde_json::json!({}) } else { params };
	serde_json::from_value(params)
		.map_err(|e| RecommendError::Serialization(format!("Invalid params: {}", e)))
}

fn parse_algorithm(name: &str) -> Result<Algorithm, RecommendError> {
	name.parse()
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct InitializeParams {
	config: Option<EngineConfig>,
	cache_dir: Option<String>,
	cache_ttl_hours: Option<i64>,
	seed: Option<u64>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct DataLoadParams {
	/// JSON or gzip JSON file holding a whole dataset.
	path: Option<String>,
	#[serde(default)]
	restaurants: Vec<Restaurant>,
	#[serde(default)]
	reviews: Vec<Review>,
	#[serde(default)]
	ratings: Vec<Rating>,
	/// Algorithms to fit right away instead of on first request.
	#[serde(default)]
	prefit: Vec<String>,
}

/// Ratings as `{ businessId: rating }` or as a list of entries.
#[derive(Deserialize)]
#[serde(untagged)]
enum RatingsParam {
	Map(HashMap<String, f64>),
	List(Vec<RatingEntry>),
}

#[derive(Deserialize)]
struct RatingEntry {
	#[serde(alias = "businessId")]
	business_id: String,
	rating: f64,
}

impl RatingsParam {
	fn into_user_ratings(self) -> UserRatings {
		match self {
			RatingsParam::Map(map) => map,
			RatingsParam::List(list) => list
				.into_iter()
				.map(|e| (e.business_id, e.rating))
				.collect(),
		}
	}
}

fn user_ratings(param: Option<RatingsParam>) -> UserRatings {
	param.map(RatingsParam::into_user_ratings).unwrap_or_default()
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RecommendParams {
	user_id: String,
	algorithm: String,
	ratings: Option<RatingsParam>,
	top_n: Option<usize>,
	use_cache: Option<bool>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ExplainParams {
	user_id: String,
	algorithm: String,
	business_id: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct AlgorithmParams {
	algorithm: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CacheGetParams {
	user_id: String,
	algorithm: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct EvaluateParams {
	user_id: String,
	algorithm: String,
	ratings: Option<RatingsParam>,
	relevant: Vec<String>,
	k: Option<usize>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CfCandidatesParams {
	min_ratings: Option<usize>,
	min_common: Option<usize>,
	min_similarity: Option<f64>,
	limit: Option<usize>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ModelParams {
	algorithm: String,
	path: String,
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

fn handle_recommend(
	engine: &mut RecommendationEngine,
	params: serde_json::Value,
) -> Result<serde_json::Value, RecommendError> {
	let p: RecommendParams = parse_params(params)?;
	let algorithm = parse_algorithm(&p.algorithm)?;
	let served = engine.recommend(
		&p.user_id,
		algorithm,
		&user_ratings(p.ratings),
		p.top_n.unwrap_or(DEFAULT_TOP_N),
		p.use_cache.unwrap_or(true),
	)?;
	Ok(serde_json::to_value(served)?)
}

fn handle_explain(
	engine: &mut RecommendationEngine,
	params: serde_json::Value,
) -> Result<serde_json::Value, RecommendError> {
	let p: ExplainParams = parse_params(params)?;
	let explanation = engine.explain(&p.user_id, parse_algorithm(&p.algorithm)?, &p.business_id)?;
	Ok(serde_json::json!({ "explanation": explanation }))
}

fn handle_logs(engine: &RecommendationEngine, params: serde_json::Value) -> Result<serde_json::Value, RecommendError> {
	let p: AlgorithmParams = parse_params(params)?;
	let logs = engine.logs(parse_algorithm(&p.algorithm)?);
	Ok(serde_json::json!({ "logs": logs }))
}

fn handle_cache_get(
	engine: &mut RecommendationEngine,
	params: serde_json::Value,
) -> Result<serde_json::Value, RecommendError> {
	let p: CacheGetParams = parse_params(params)?;
	let algorithm = parse_algorithm(&p.algorithm)?;
	let ttl = engine.cache_ttl();
	match engine.cached(&p.user_id, algorithm) {
		Some(entry) => {
			let fresh = is_fresh(&entry, ttl, Utc::now());
			Ok(serde_json::json!({ "entry": entry, "fresh": fresh }))
		}
		None => Ok(serde_json::json!({ "entry": null, "fresh": false })),
	}
}

fn handle_evaluate(
	engine: &mut RecommendationEngine,
	params: serde_json::Value,
) -> Result<serde_json::Value, RecommendError> {
	let p: EvaluateParams = parse_params(params)?;
	let report = engine.evaluate(
		&p.user_id,
		parse_algorithm(&p.algorithm)?,
		&user_ratings(p.ratings),
		&p.relevant,
		p.k.unwrap_or(DEFAULT_TOP_N),
	)?;
	Ok(serde_json::to_value(report)?)
}

fn handle_cf_candidates(
	engine: &RecommendationEngine,
	params: serde_json::Value,
) -> Result<serde_json::Value, RecommendError> {
	let p: CfCandidatesParams = parse_params(params)?;
	let mut candidates = engine.cf_candidates(
		p.min_ratings.unwrap_or(5),
		p.min_common.unwrap_or(1),
		p.min_similarity.unwrap_or(0.1),
	)?;
	if let Some(limit) = p.limit {
		candidates.truncate(limit);
	}
	Ok(serde_json::json!({ "candidates": candidates }))
}
