//! Configuration loading from TOML with environment variable resolution.
//!
//! Reads `config.toml` and deserializes into strongly-typed structs.
//! Secrets (API keys) are referenced by env-var name in the config and
//! resolved at runtime via `std::env::var`.

use anyhow::{Context, Result};
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::engine::evaluator::EvaluationStrategy;
use crate::types::OptimizerError;

/// Top-level application configuration.
#[derive(Debug, Deserialize, Clone, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub optimizer: OptimizerSettings,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub evaluation: EvaluationConfig,
    #[serde(default)]
    pub markets: MarketsConfig,
    #[serde(default)]
    pub dataset: DatasetConfig,
    #[serde(default)]
    pub output: OutputConfig,
}

/// Optimization budget and targets. Immutable once the run starts and
/// serialized verbatim into every report.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
#[serde(default)]
pub struct OptimizerSettings {
    pub max_iterations: u32,
    /// Target accuracy in percent (0–100).
    pub target_accuracy: f64,
    pub target_profit: f64,
    pub tests_per_topic: usize,
    pub candidates_per_test: usize,
    pub few_shot_examples: usize,
    /// Model used for the relationship analysis calls.
    pub model: String,
    /// Stronger model used to rewrite the relationship definitions.
    pub mutation_model: String,
}

impl Default for OptimizerSettings {
    fn default() -> Self {
        Self {
            max_iterations: 4,
            target_accuracy: 75.0,
            target_profit: 0.3,
            tests_per_topic: 3,
            candidates_per_test: 10,
            few_shot_examples: 3,
            model: "gpt-4o-mini".to_string(),
            mutation_model: "gpt-4o".to_string(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct LlmConfig {
    pub api_key_env: String,
    pub api_url: String,
    pub judge_model: String,
    /// Retries on 429 / 5xx / transport errors per call.
    pub max_retries: u32,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            api_key_env: "OPENAI_API_KEY".to_string(),
            api_url: "https://api.openai.com/v1/chat/completions".to_string(),
            judge_model: "gpt-4o-mini".to_string(),
            max_retries: 2,
        }
    }
}

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct EvaluationConfig {
    pub strategy: EvaluationStrategy,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct MarketsConfig {
    pub gamma_api_url: String,
    pub topics: Vec<String>,
    pub fetch_limit: u32,
    pub min_markets_per_topic: usize,
}

impl Default for MarketsConfig {
    fn default() -> Self {
        Self {
            gamma_api_url: "https://gamma-api.polymarket.com".to_string(),
            topics: ["Trump", "Bitcoin", "Fed", "election", "China", "Ukraine", "AI", "recession"]
                .iter()
                .map(|t| t.to_string())
                .collect(),
            fetch_limit: 100,
            min_markets_per_topic: 5,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct DatasetConfig {
    pub enabled: bool,
    pub endpoint: String,
    pub name: String,
}

impl Default for DatasetConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            endpoint: "http://localhost:6006".to_string(),
            name: "polymarket_ground_truth".to_string(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct OutputConfig {
    pub dir: String,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            dir: "output".to_string(),
        }
    }
}

impl AppConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &str) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {path}"))?;
        Self::parse(&contents).with_context(|| format!("Failed to parse config file: {path}"))
    }

    /// Load from `path` if it exists, otherwise fall back to defaults.
    pub fn load_or_default(path: &str) -> Result<Self> {
        if Path::new(path).exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn parse(contents: &str) -> Result<Self> {
        let config: AppConfig = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), OptimizerError> {
        let o = &self.optimizer;
        if !(0.0..=100.0).contains(&o.target_accuracy) {
            return Err(OptimizerError::Config(format!(
                "target_accuracy must be within 0..=100, got {}",
                o.target_accuracy
            )));
        }
        if o.tests_per_topic == 0 || o.candidates_per_test == 0 {
            return Err(OptimizerError::Config(
                "tests_per_topic and candidates_per_test must be positive".to_string(),
            ));
        }
        Ok(())
    }

    /// Resolve an environment variable name to its value.
    /// Useful for loading secrets referenced in the config.
    pub fn resolve_env(env_name: &str) -> Result<String> {
        std::env::var(env_name)
            .with_context(|| format!("Environment variable not set: {env_name}"))
    }

    /// Resolve the model provider credential. A missing or empty value is
    /// fatal: nothing may run without it.
    pub fn api_key(&self) -> Result<SecretString, OptimizerError> {
        match Self::resolve_env(&self.llm.api_key_env) {
            Ok(key) if !key.trim().is_empty() => Ok(SecretString::new(key)),
            _ => Err(OptimizerError::MissingCredential(self.llm.api_key_env.clone())),
        }
    }
}
