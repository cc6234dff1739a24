use std::sync::Arc;

use clap::Parser;
use color_eyre::{Result, eyre::eyre};
use quiz_headless::{
	browser::{ChromeLauncher, ChromeOptions},
	config::AppConfig,
	server::{AppState, router},
	solver::Solver,
};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};
use v_utils::log;

#[tokio::main]
async fn main() -> Result<()> {
	color_eyre::install()?;
	let config = AppConfig::parse();

	let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
	tracing_subscriber::registry().with(env_filter).with(fmt::layer().with_target(true)).init();

	let launcher = Arc::new(ChromeLauncher::new(ChromeOptions::from(&config)));
	let solver = Solver::from_config(&config, launcher)?;
	log!("Debug artifacts go to {}", solver.artifacts().root().display());

	let app = router(AppState::new(config.secret.clone(), solver));
	let addr = config.bind_addr();
	let listener = tokio::net::TcpListener::bind(&addr).await.map_err(|e| eyre!("Failed to bind {}: {}", addr, e))?;
	log!("Listening on http://{}", addr);

	axum::serve(listener, app)
		.with_graceful_shutdown(async {
			let _ = tokio::signal::ctrl_c().await;
			log!("Shutting down");
		})
		.await
		.map_err(|e| eyre!("Server error: {}", e))?;
	Ok(())
}
