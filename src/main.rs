//! Relation Optimizer: iterative prompt optimization for related
//! prediction-market pairs.
//!
//! Entry point. Loads configuration, initialises structured logging,
//! checks the model credential, loads resolved market sets (from the
//! ground-truth dataset when available) and runs the optimization loop,
//! writing the best prompt and reports to the output directory.

use anyhow::Result;
use std::path::Path;
use std::sync::Arc;
use tracing::info;

use relation_optimizer::config::AppConfig;
use relation_optimizer::dataset::phoenix::PhoenixClient;
use relation_optimizer::dataset::DatasetStore;
use relation_optimizer::engine::evaluator::build_scorer;
use relation_optimizer::engine::optimizer::Optimizer;
use relation_optimizer::llm::openai::OpenAiClient;
use relation_optimizer::llm::ChatModel;
use relation_optimizer::logging::init_logging;
use relation_optimizer::platforms::polymarket::PolymarketClient;

const BANNER: &str = r#"
  ____      _       _   _
 |  _ \ ___| | __ _| |_(_) ___  _ __
 | |_) / _ \ |/ _` | __| |/ _ \| '_ \
 |  _ <  __/ | (_| | |_| | (_) | | | |
 |_| \_\___|_|\__,_|\__|_|\___/|_| |_|

  Related-market prompt optimizer
  v0.1.0
"#;

/// Config file path; overridden by `OPTIMIZER_CONFIG`.
const DEFAULT_CONFIG_PATH: &str = "config.toml";

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (non-fatal if missing)
    let _ = dotenv::dotenv();

    let config_path = std::env::var("OPTIMIZER_CONFIG").unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
    let cfg = AppConfig::load_or_default(&config_path)?;

    init_logging();

    println!("{BANNER}");
    info!(
        config = %config_path,
        model = %cfg.optimizer.model,
        mutation_model = %cfg.optimizer.mutation_model,
        strategy = ?cfg.evaluation.strategy,
        max_iterations = cfg.optimizer.max_iterations,
        target_accuracy = cfg.optimizer.target_accuracy,
        target_profit = cfg.optimizer.target_profit,
        "Relation optimizer starting up"
    );

    // Fatal before any work if the credential is missing
    let api_key = cfg.api_key()?;

    // -- Initialise components -------------------------------------------

    let openai = Arc::new(OpenAiClient::new(
        api_key,
        Some(cfg.llm.api_url.clone()),
        Some(cfg.llm.max_retries),
    )?);
    let model: Arc<dyn ChatModel> = openai.clone();

    let scorer = build_scorer(cfg.evaluation.strategy, Arc::clone(&model), &cfg.llm.judge_model);
    let optimizer = Optimizer::new(cfg.optimizer.clone(), model, scorer);

    let polymarket = PolymarketClient::new(Some(cfg.markets.gamma_api_url.clone()))?;

    let phoenix = if cfg.dataset.enabled {
        let client = PhoenixClient::new(Some(cfg.dataset.endpoint.clone()))?;
        info!(endpoint = client.endpoint(), dataset = %cfg.dataset.name, "Dataset store enabled");
        Some(client)
    } else {
        None
    };
    let dataset = phoenix
        .as_ref()
        .map(|p| (p as &dyn DatasetStore, cfg.dataset.name.as_str()));

    // -- Run ---------------------------------------------------------------

    let sets = optimizer.load_markets(&polymarket, &cfg.markets, dataset).await?;
    let (report, written) = optimizer.run(&sets, Path::new(&cfg.output.dir)).await?;

    let baseline = report.baseline().map(|b| b.metrics()).unwrap_or_default();
    info!(
        baseline_accuracy = format!("{:.1}%", baseline.accuracy),
        final_accuracy = format!("{:.1}%", report.best.accuracy),
        baseline_profit = format!("{:+.2}", baseline.profit),
        final_profit = format!("{:+.2}", report.best.profit),
        rounds = report.rounds(),
        output_dir = %cfg.output.dir,
        files = written.len(),
        llm_calls = openai.total_calls(),
        llm_cost = format!("${:.4}", openai.cumulative_cost()),
        "Relation optimizer finished."
    );

    Ok(())
}
