pub mod analysis;
pub mod cache;
pub mod clustering;
pub mod collaborative;
pub mod config;
pub mod content;
pub mod engine;
pub mod error;
pub mod evaluation;
pub mod factorization;
pub mod factory;
pub mod hybrid;
pub mod linalg;
pub mod logs;
pub mod persistence;
pub mod protocol;
pub mod recommender;
pub mod server;
pub mod similarity;
pub mod text;
pub mod transport;
pub mod types;
