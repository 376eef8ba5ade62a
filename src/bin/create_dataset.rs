//! Ground-truth dataset creator.
//!
//! Fetches resolved markets per topic, freezes the optimizer's
//! source/candidate selection into examples and uploads them to the
//! Phoenix dataset store. Run this before the optimizer so repeated runs
//! test against the same markets.

use anyhow::Result;
use tracing::{info, warn};

use relation_optimizer::config::AppConfig;
use relation_optimizer::dataset::phoenix::PhoenixClient;
use relation_optimizer::dataset::{build_examples, DatasetStore, UploadOutcome};
use relation_optimizer::logging::init_logging;
use relation_optimizer::platforms::fetch_grouped;
use relation_optimizer::platforms::polymarket::PolymarketClient;
use relation_optimizer::types::OptimizerError;

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenv::dotenv();

    let config_path = std::env::var("OPTIMIZER_CONFIG").unwrap_or_else(|_| "config.toml".to_string());
    let cfg = AppConfig::load_or_default(&config_path)?;

    init_logging();

    let phoenix = PhoenixClient::new(Some(cfg.dataset.endpoint.clone()))?;
    let polymarket = PolymarketClient::new(Some(cfg.markets.gamma_api_url.clone()))?;

    info!(
        endpoint = phoenix.endpoint(),
        dataset = %cfg.dataset.name,
        topics = cfg.markets.topics.len(),
        "Creating ground-truth dataset"
    );

    // [1/3] Resolved markets per topic
    let sets = fetch_grouped(
        &polymarket,
        &cfg.markets.topics,
        cfg.markets.fetch_limit,
        cfg.markets.min_markets_per_topic,
    )
    .await?;

    if sets.is_empty() {
        return Err(OptimizerError::NoQualifyingTopics.into());
    }

    // [2/3] Source → candidates test pairs
    let examples = build_examples(
        &sets,
        cfg.optimizer.tests_per_topic,
        cfg.optimizer.candidates_per_test,
    );
    let topics: Vec<&str> = sets.iter().map(|t| t.topic.as_str()).collect();
    info!(
        examples = examples.len(),
        markets = sets.total_markets(),
        topics = %topics.join(", "),
        "Created test examples"
    );

    // [3/3] Upload
    match phoenix.upload(&cfg.dataset.name, &examples).await? {
        UploadOutcome::Created { count } => {
            info!(
                dataset = %cfg.dataset.name,
                examples = count,
                url = format!("{}/datasets", phoenix.endpoint()),
                "Dataset uploaded. Now run: relation-optimizer"
            );
        }
        UploadOutcome::AlreadyExists => {
            warn!(
                dataset = %cfg.dataset.name,
                "Dataset already exists. Delete it first or set [dataset].name to a new name."
            );
        }
    }

    Ok(())
}
