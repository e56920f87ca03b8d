// ---------------------------------------------------------------------------
// Text utilities: tokenization and a corpus-fitted TF-IDF model
// ---------------------------------------------------------------------------
//
// Shared by the TF-IDF and LSA profilers and by the clustering feature
// builder. The model is fitted once over a whole corpus so every vector it
// produces has the same dimensionality.
// ---------------------------------------------------------------------------

use std::collections::{HashMap, HashSet};
use std::sync::OnceLock;

use regex::Regex;

use crate::error::RecommendError;

const STOPWORDS: &[&str] = &[
	"the", "and", "for", "are", "but", "not", "you", "all", "any", "can", "had", "her", "was",
	"one", "our", "out", "has", "have", "his", "how", "its", "may", "who", "did", "get", "got",
	"this", "that", "with", "they", "them", "then", "than", "there", "their", "what", "when",
	"were", "will", "would", "from", "been", "also", "just", "very", "really", "which", "into",
	"about", "because", "some", "more", "only", "over", "your", "she", "him", "too",
];

fn word_regex() -> &'static Regex {
	static WORD_RE: OnceLock<Regex> = OnceLock::new();
	WORD_RE.get_or_init(|| Regex::new(r"[a-z][a-z0-9']*").expect("word pattern is valid"))
}

fn stopwords() -> &'static HashSet<&'static str> {
	static SET: OnceLock<HashSet<&'static str>> = OnceLock::new();
	SET.get_or_init(|| STOPWORDS.iter().copied().collect())
}

/// Lowercase, split into words, keep terms longer than 2 characters that
/// are not stopwords.
pub fn tokenize(text: &str) -> Vec<String> {
	let lower = text.to_lowercase();
	word_regex()
		.find_iter(&lower)
		.map(|m| m.as_str().trim_matches('\'').to_string())
		.filter(|t| t.chars().count() > 2 && !stopwords().contains(t.as_str()))
		.collect()
}

/// Term counts for one document.
pub fn term_counts(tokens: &[String]) -> HashMap<&str, usize> {
	let mut counts: HashMap<&str, usize> = HashMap::new();
	for t in tokens {
		*counts.entry(t.as_str()).or_default() += 1;
	}
	counts
}

// ---------------------------------------------------------------------------
// TfIdfModel
// ---------------------------------------------------------------------------

/// Fixed-vocabulary TF-IDF vectorizer.
#[derive(Debug, Clone)]
pub struct TfIdfModel {
	vocabulary: Vec<String>,
	index: HashMap<String, usize>,
	idf: Vec<f64>,
	documents: usize,
}

impl TfIdfModel {
	/// Fit over a corpus. The vocabulary is the `max_features` terms with
	/// the highest document frequency (ties alphabetical). IDF is smoothed:
	/// `ln((1 + N) / (1 + df)) + 1`.
	pub fn fit<S: AsRef<str>>(documents: &[S], max_features: usize) -> Result<Self, RecommendError> {
		if documents.is_empty() {
			return Err(RecommendError::EmptyCorpus);
		}

		let mut df: HashMap<String, usize> = HashMap::new();
		for doc in documents {
			let unique: HashSet<String> = tokenize(doc.as_ref()).into_iter().collect();
			for term in unique {
				*df.entry(term).or_default() += 1;
			}
		}

		let mut ranked: Vec<(String, usize)> = df.into_iter().collect();
		ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
		ranked.truncate(max_features);

		let n = documents.len() as f64;
		let mut vocabulary = Vec::with_capacity(ranked.len());
		let mut index = HashMap::with_capacity(ranked.len());
		let mut idf = Vec::with_capacity(ranked.len());
		for (i, (term, freq)) in ranked.into_iter().enumerate() {
			idf.push(((1.0 + n) / (1.0 + freq as f64)).ln() + 1.0);
			index.insert(term.clone(), i);
			vocabulary.push(term);
		}

		Ok(Self {
			vocabulary,
			index,
			idf,
			documents: documents.len(),
		})
	}

	/// Raw TF-IDF vector (term frequency normalized by document length).
	pub fn transform(&self, text: &str) -> Vec<f64> {
		let tokens = tokenize(text);
		let mut vector = vec![0.0; self.vocabulary.len()];
		if tokens.is_empty() {
			return vector;
		}
		let total = tokens.len() as f64;
		for (term, count) in term_counts(&tokens) {
			if let Some(&i) = self.index.get(term) {
				vector[i] = (count as f64 / total) * self.idf[i];
			}
		}
		vector
	}

	/// L2-normalized TF-IDF vector.
	pub fn transform_normalized(&self, text: &str) -> Vec<f64> {
		crate::similarity::normalize_vector(&self.transform(text))
	}

	/// The `n` strongest terms of a vector produced by this model.
	pub fn top_terms(&self, vector: &[f64], n: usize) -> Vec<(String, f64)> {
		let mut terms: Vec<(String, f64)> = vector
			.iter()
			.enumerate()
			.filter(|(_, &w)| w > 0.0)
			.filter_map(|(i, &w)| self.vocabulary.get(i).map(|t| (t.clone(), w)))
			.collect();
		terms.sort_by(|a, b| {
			b.1.partial_cmp(&a.1)
				.unwrap_or(std::cmp::Ordering::Equal)
				.then_with(|| a.0.cmp(&b.0))
		});
		terms.truncate(n);
		terms
	}

	pub fn vocabulary(&self) -> &[String] {
		&self.vocabulary
	}

	pub fn dimensions(&self) -> usize {
		self.vocabulary.len()
	}

	pub fn document_count(&self) -> usize {
		self.documents
	}
}
