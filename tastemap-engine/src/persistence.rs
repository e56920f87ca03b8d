// ---------------------------------------------------------------------------
// Gzip JSON files + base64 vector encoding
// ---------------------------------------------------------------------------
//
// Shared by the file-backed result cache and matrix-factorization model
// snapshots. Vectors are stored as base64 of little-endian f32 bytes, the
// same layout a JS `Float32Array` produces.
// ---------------------------------------------------------------------------

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use flate2::read::{GzDecoder, GzEncoder};
use flate2::Compression;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::io::Read;
use std::path::Path;

use crate::error::RecommendError;

// ---------------------------------------------------------------------------
// Vector encode / decode
// ---------------------------------------------------------------------------

/// Encode a vector as base64 of f32 little-endian bytes. Precision is
/// reduced to f32.
pub fn encode_vector(vector: &[f64]) -> String {
	let bytes: Vec<u8> = vector
		.iter()
		.flat_map(|f| (*f as f32).to_le_bytes())
		.collect();
	STANDARD.encode(&bytes)
}

pub fn decode_vector(encoded: &str) -> Result<Vec<f64>, RecommendError> {
	let bytes = STANDARD
		.decode(encoded)
		.map_err(|e| RecommendError::Corruption(format!("Invalid base64: {}", e)))?;
	if bytes.len() % 4 != 0 {
		return Err(RecommendError::Corruption("Invalid vector length".into()));
	}
	Ok(bytes
		.chunks_exact(4)
		.map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]) as f64)
		.collect())
}

/// Encode equal-length rows as one flat base64 blob.
pub fn encode_matrix(rows: &[Vec<f64>]) -> String {
	let flat: Vec<f64> = rows.iter().flatten().copied().collect();
	encode_vector(&flat)
}

pub fn decode_matrix(encoded: &str, row_len: usize) -> Result<Vec<Vec<f64>>, RecommendError> {
	let flat = decode_vector(encoded)?;
	if row_len == 0 {
		return if flat.is_empty() {
			Ok(Vec::new())
		} else {
			Err(RecommendError::Corruption("Non-empty matrix with zero-width rows".into()))
		};
	}
	if flat.len() % row_len != 0 {
		return Err(RecommendError::Corruption(format!(
			"Matrix of {} values does not split into rows of {}",
			flat.len(),
			row_len
		)));
	}
	Ok(flat.chunks_exact(row_len).map(<[f64]>::to_vec).collect())
}

// ---------------------------------------------------------------------------
// Gzip compress / decompress
// ---------------------------------------------------------------------------

/// Gzip-compress a byte slice at level 6.
pub fn compress(data: &[u8]) -> Result<Vec<u8>, RecommendError> {
	let mut encoder = GzEncoder::new(data, Compression::new(6));
	let mut compressed = Vec::new();
	encoder.read_to_end(&mut compressed)?;
	Ok(compressed)
}

pub fn decompress(data: &[u8]) -> Result<Vec<u8>, RecommendError> {
	let mut decoder = GzDecoder::new(data);
	let mut decompressed = Vec::new();
	decoder.read_to_end(&mut decompressed)?;
	Ok(decompressed)
}

/// Check if data starts with gzip magic bytes (0x1f, 0x8b).
pub fn is_gzipped(data: &[u8]) -> bool {
	data.len() >= 2 && data[0] == 0x1f && data[1] == 0x8b
}

/// 64-bit FNV-1a. Stable across processes, so usable in file names.
pub fn fnv1a(data: &[u8]) -> u64 {
	let mut h: u64 = 0xcbf29ce484222325;
	for b in data {
		h ^= *b as u64;
		h = h.wrapping_mul(0x100000001b3);
	}
	h
}

// ---------------------------------------------------------------------------
// Files
// ---------------------------------------------------------------------------

pub fn to_gz_json<T: Serialize>(value: &T) -> Result<Vec<u8>, RecommendError> {
	let json = serde_json::to_vec(value)?;
	compress(&json)
}

/// Parse gzip JSON, or plain JSON for hand-written files.
pub fn from_gz_json<T: DeserializeOwned>(data: &[u8]) -> Result<T, RecommendError> {
	let json = if is_gzipped(data) {
		decompress(data)?
	} else {
		data.to_vec()
	};
	serde_json::from_slice(&json)
		.map_err(|e| RecommendError::Corruption(format!("Invalid JSON payload: {}", e)))
}

/// Write `value` as gzip JSON. The file is written beside the target and
/// renamed into place so readers never see a partial file.
pub fn write_gz_json<T: Serialize>(path: &Path, value: &T) -> Result<(), RecommendError> {
	if let Some(parent) = path.parent() {
		std::fs::create_dir_all(parent)?;
	}
	let compressed = to_gz_json(value)?;
	let tmp = path.with_extension("tmp");
	std::fs::write(&tmp, &compressed)?;
	std::fs::rename(&tmp, path)?;
	Ok(())
}

pub fn read_gz_json<T: DeserializeOwned>(path: &Path) -> Result<T, RecommendError> {
	let data = std::fs::read(path)?;
	from_gz_json(&data)
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn fnv1a_matches_reference_values() {
		assert_eq!(fnv1a(b""), 0xcbf29ce484222325);
		assert_eq!(fnv1a(b"a"), 0xaf63dc4c8601ec8c);
	}

	#[test]
	fn vector_round_trips_at_f32_precision() {
		let v = vec![0.1, -2.5, 3.25];
		let decoded = decode_vector(&encode_vector(&v)).unwrap();
		for (a, b) in v.iter().zip(&decoded) {
			assert!((a - b).abs() < 1e-6);
		}
	}

	#[test]
	fn bad_base64_is_corruption() {
		assert!(matches!(
			decode_vector("not base64!"),
			Err(RecommendError::Corruption(_))
		));
	}

	#[test]
	fn matrix_rejects_ragged_length() {
		let encoded = encode_vector(&[1.0, 2.0, 3.0]);
		assert!(decode_matrix(&encoded, 2).is_err());
		assert_eq!(decode_matrix(&encoded, 3).unwrap(), vec![vec![1.0, 2.0, 3.0]]);
	}

	#[test]
	fn gzip_json_file_round_trip() {
		let dir = tempfile::tempdir().unwrap();
		let path = dir.path().join("nested").join("value.json.gz");
		let value = serde_json::json!({"a": [1, 2, 3]});
		write_gz_json(&path, &value).unwrap();
		let raw = std::fs::read(&path).unwrap();
		assert!(is_gzipped(&raw));
		let back: serde_json::Value = read_gz_json(&path).unwrap();
		assert_eq!(back, value);
	}

	#[test]
	fn plain_json_is_accepted() {
		let back: serde_json::Value = from_gz_json(br#"{"x":1}"#).unwrap();
		assert_eq!(back["x"], 1);
	}
}
