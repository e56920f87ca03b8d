use clap::Parser;

use tastemap_engine::config::{cache_ttl, CliArgs};
use tastemap_engine::server::{RecommendServer, ServerOptions};
use tastemap_engine::transport::NdjsonTransport;

fn main() {
	let args = CliArgs::parse();

	tracing_subscriber::fmt()
		.with_writer(std::io::stderr)
		.with_env_filter(
			tracing_subscriber::EnvFilter::try_from_default_env()
				.unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&args.log_level)),
		)
		.init();

	if let Err(e) = cache_ttl(args.cache_ttl_hours) {
		tracing::error!("{}", e);
		std::process::exit(2);
	}

	let transport = NdjsonTransport::new();
	let mut server = RecommendServer::new(transport, ServerOptions::from(&args));

	tracing::info!("tastemap-engine ready");

	if let Err(e) = server.run() {
		tracing::error!("Server error: {}", e);
		std::process::exit(1);
	}
}
