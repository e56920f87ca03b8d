//! Fit and recommend timings for each algorithm family.
//!
//! Run with: cargo bench --bench training_benchmarks

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use tastemap_engine::config::EngineConfig;
use tastemap_engine::factory::{build_recommender, Algorithm};
use tastemap_engine::types::{Dataset, Rating, Restaurant, Review};

const CATEGORIES: [&str; 6] = ["Sushi", "Pizza", "Tacos", "Burgers", "Thai", "Bakery"];

fn synthetic(users: usize, items: usize, per_user: usize) -> Dataset {
	let mut rng = StdRng::seed_from_u64(42);
	let restaurants = (0..items)
		.map(|i| Restaurant {
			business_id: format!("b{i}"),
			name: format!("Restaurant {i}"),
			categories: vec![CATEGORIES[i % CATEGORIES.len()].to_string()],
			review_text: None,
		})
		.collect();
	let reviews = (0..items)
		.map(|i| Review {
			business_id: format!("b{i}"),
			user_id: "critic".to_string(),
			review_text: format!("lovely {} with friendly staff", CATEGORIES[i % CATEGORIES.len()]),
			rating: 4.0,
		})
		.collect();
	let ratings = (0..users)
		.flat_map(|u| {
			(0..per_user)
				.map(|_| rng.gen_range(0..items))
				.collect::<Vec<_>>()
				.into_iter()
				.map(move |i| (u, i))
		})
		.map(|(u, i)| Rating {
			user_id: format!("u{u}"),
			business_id: format!("b{i}"),
			rating: ((u + i) % 5 + 1) as f64,
		})
		.collect();
	Dataset {
		restaurants,
		reviews,
		ratings,
	}
}

fn config() -> EngineConfig {
	let mut config = EngineConfig::default().with_seed(Some(1));
	config.factorization.num_epochs = 10;
	config
}

fn bench_fit(c: &mut Criterion) {
	let dataset = synthetic(200, 300, 15);
	let config = config();
	let mut group = c.benchmark_group("fit");
	group.sample_size(10);

	for algorithm in [
		Algorithm::ContentTfidf,
		Algorithm::ContentLsa,
		Algorithm::UserCf,
		Algorithm::Svd,
		Algorithm::SvdPca,
		Algorithm::Kmeans,
	] {
		group.bench_with_input(BenchmarkId::from_parameter(algorithm), &algorithm, |b, &algorithm| {
			b.iter(|| {
				let mut rec = build_recommender(algorithm, &config).unwrap();
				rec.fit(&dataset).unwrap();
				black_box(rec);
			});
		});
	}
	group.finish();
}

fn bench_recommend(c: &mut Criterion) {
	let dataset = synthetic(200, 300, 15);
	let config = config();
	let ratings = dataset.ratings_by_user().remove("u7").unwrap_or_default();
	let mut group = c.benchmark_group("recommend");

	for algorithm in Algorithm::ALL {
		let mut rec = build_recommender(algorithm, &config).unwrap();
		rec.fit(&dataset).unwrap();
		group.bench_function(BenchmarkId::from_parameter(algorithm), |b| {
			b.iter(|| black_box(rec.recommend("u7", &ratings, 10)));
		});
	}
	group.finish();
}

criterion_group!(benches, bench_fit, bench_recommend);
criterion_main!(benches);
