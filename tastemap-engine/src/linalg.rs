//! Small dense linear algebra shared by LSA and the PCA factor reduction.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::similarity::{dot, magnitude};

const MAX_ITERATIONS: usize = 100;
const TOLERANCE: f64 = 1e-10;
const MIN_SINGULAR_VALUE: f64 = 1e-10;
const INIT_SEED: u64 = 0x5eed;

/// A truncated SVD: right singular vectors and singular values, strongest
/// first. Components past the rank of the matrix are absent.
#[derive(Debug, Clone, Default)]
pub struct TruncatedSvd {
	pub components: Vec<Vec<f64>>,
	pub singular_values: Vec<f64>,
}

/// Power-iteration truncated SVD of a dense row-major matrix.
pub fn truncated_svd(rows: &[Vec<f64>], k: usize) -> TruncatedSvd {
	let cols = rows.first().map_or(0, Vec::len);
	let mut svd = TruncatedSvd::default();
	if cols == 0 {
		return svd;
	}
	let mut rng = StdRng::seed_from_u64(INIT_SEED);

	for _ in 0..k.min(cols) {
		let mut v: Vec<f64> = (0..cols).map(|_| rng.gen_range(0.1..1.0)).collect();
		orthogonalize(&mut v, &svd.components);
		if !renormalize(&mut v) {
			break;
		}

		for _ in 0..MAX_ITERATIONS {
			// v' = Aᵀ (A v)
			let av: Vec<f64> = rows.iter().map(|r| dot(r, &v)).collect();
			let mut next = vec![0.0; cols];
			for (r, &s) in rows.iter().zip(&av) {
				for (n, x) in next.iter_mut().zip(r) {
					*n += x * s;
				}
			}
			orthogonalize(&mut next, &svd.components);
			if !renormalize(&mut next) {
				break;
			}
			let delta: f64 = next
				.iter()
				.zip(&v)
				.map(|(a, b)| (a - b) * (a - b))
				.sum::<f64>()
				.sqrt();
			v = next;
			if delta < TOLERANCE {
				break;
			}
		}

		let sigma = magnitude(&rows.iter().map(|r| dot(r, &v)).collect::<Vec<_>>());
		if sigma < MIN_SINGULAR_VALUE {
			break;
		}
		svd.components.push(v);
		svd.singular_values.push(sigma);
	}

	svd
}

fn orthogonalize(v: &mut [f64], basis: &[Vec<f64>]) {
	for b in basis {
		let proj = dot(v, b);
		for (x, y) in v.iter_mut().zip(b) {
			*x -= proj * y;
		}
	}
}

fn renormalize(v: &mut [f64]) -> bool {
	let mag = magnitude(v);
	if mag < MIN_SINGULAR_VALUE {
		return false;
	}
	for x in v.iter_mut() {
		*x /= mag;
	}
	true
}

/// Eigen-decomposition of a symmetric positive semi-definite matrix, such
/// as a covariance matrix. Eigenvalues come back strongest first.
pub fn symmetric_eigen(matrix: &[Vec<f64>], k: usize) -> TruncatedSvd {
	// For a symmetric PSD matrix the singular vectors are its eigenvectors
	// and the singular values its eigenvalues.
	truncated_svd(matrix, k)
}
