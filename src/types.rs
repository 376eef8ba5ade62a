//! Shared types for the relation prompt optimizer.
//!
//! These types form the data model used across all modules.
//! They are designed to be stable so that platform, engine, and
//! storage modules can depend on them without circular references.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Maximum stored description length (characters).
pub const MAX_DESCRIPTION_CHARS: usize = 300;

// ---------------------------------------------------------------------------
// Market
// ---------------------------------------------------------------------------

/// A prediction market question with a resolved (or pending) state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Market {
    pub id: String,
    pub question: String,
    pub description: String,
    /// Implied YES probability in whole percent (0–100).
    pub yes_price: u8,
    /// Implied NO probability in whole percent; always `100 - yes_price`.
    pub no_price: u8,
    pub outcome: Outcome,
    pub volume: f64,
}

impl Market {
    /// Build a market from the implied probability of its first outcome.
    ///
    /// `p` is clamped to [0, 1]. The NO price is the complement of the
    /// rounded YES price so the two always sum to 100.
    pub fn from_probability(
        id: impl Into<String>,
        question: impl Into<String>,
        description: &str,
        p: f64,
        outcome: Outcome,
        volume: f64,
    ) -> Self {
        let yes_price = (p.clamp(0.0, 1.0) * 100.0).round() as u8;
        Market {
            id: id.into(),
            question: question.into(),
            description: truncate_chars(description, MAX_DESCRIPTION_CHARS),
            yes_price,
            no_price: 100 - yes_price,
            outcome,
            volume: volume.max(0.0),
        }
    }
}

impl fmt::Display for Market {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] {} ({}% YES / {}% NO | vol: ${:.0})",
            self.outcome, self.question, self.yes_price, self.no_price, self.volume,
        )
    }
}

/// Resolution state of a market.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Outcome {
    Yes,
    No,
    Pending,
}

impl Outcome {
    /// Map a resolved market's final probability to its outcome.
    /// Returns `None` inside the ambiguous (0.20, 0.80) band.
    pub fn from_resolved_probability(p: f64) -> Option<Self> {
        if p >= RESOLVED_YES_THRESHOLD {
            Some(Outcome::Yes)
        } else if p <= RESOLVED_NO_THRESHOLD {
            Some(Outcome::No)
        } else {
            None
        }
    }
}

/// A resolved market at or above this probability counts as YES.
pub const RESOLVED_YES_THRESHOLD: f64 = 0.80;
/// A resolved market at or below this probability counts as NO.
pub const RESOLVED_NO_THRESHOLD: f64 = 0.20;

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Outcome::Yes => write!(f, "YES"),
            Outcome::No => write!(f, "NO"),
            Outcome::Pending => write!(f, "PENDING"),
        }
    }
}

// ---------------------------------------------------------------------------
// Relationship labels
// ---------------------------------------------------------------------------

/// How a candidate market relates to the source market, as claimed by the
/// model. Labels outside the closed set are kept verbatim in `Unknown`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Relationship {
    Implies,
    Contradicts,
    Subevent,
    ConditionedOn,
    WeakSignal,
    Unknown(String),
}

impl Relationship {
    pub const KNOWN: &'static [Relationship] = &[
        Relationship::Implies,
        Relationship::Contradicts,
        Relationship::Subevent,
        Relationship::ConditionedOn,
        Relationship::WeakSignal,
    ];

    pub fn as_str(&self) -> &str {
        match self {
            Relationship::Implies => "IMPLIES",
            Relationship::Contradicts => "CONTRADICTS",
            Relationship::Subevent => "SUBEVENT",
            Relationship::ConditionedOn => "CONDITIONED_ON",
            Relationship::WeakSignal => "WEAK_SIGNAL",
            Relationship::Unknown(raw) => raw,
        }
    }
}

impl From<&str> for Relationship {
    fn from(s: &str) -> Self {
        match s.trim() {
            "IMPLIES" => Relationship::Implies,
            "CONTRADICTS" => Relationship::Contradicts,
            "SUBEVENT" => Relationship::Subevent,
            "CONDITIONED_ON" => Relationship::ConditionedOn,
            "WEAK_SIGNAL" => Relationship::WeakSignal,
            other => Relationship::Unknown(other.to_string()),
        }
    }
}

impl From<String> for Relationship {
    fn from(s: String) -> Self {
        Relationship::from(s.as_str())
    }
}

impl From<Relationship> for String {
    fn from(r: Relationship) -> Self {
        r.as_str().to_string()
    }
}

impl fmt::Display for Relationship {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Predictions & results
// ---------------------------------------------------------------------------

/// One relationship claim as returned by the model, before judging.
#[derive(Debug, Clone, PartialEq)]
pub struct RawPrediction {
    pub market_id: String,
    pub relationship: Relationship,
    pub reasoning: String,
}

/// A judged relationship between a source market and a related market.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Prediction {
    pub source: Market,
    pub related: Market,
    pub relationship: Relationship,
    pub reasoning: String,
    /// Whether the claimed relationship proved correct given real outcomes.
    pub held: bool,
    /// Synthetic reward/penalty for the call.
    pub profit: f64,
}

/// Minimum profit for a held prediction to be reused as a few-shot example.
pub const GOOD_PROFIT_THRESHOLD: f64 = 0.2;

impl Prediction {
    /// Held with enough profit to serve as a worked example.
    pub fn is_good(&self) -> bool {
        self.held && self.profit > GOOD_PROFIT_THRESHOLD
    }
}

/// All predictions produced for one source market in one prompt run.
#[derive(Debug, Clone)]
pub struct TestResult {
    pub topic: String,
    pub source: Market,
    pub predictions: Vec<Prediction>,
}

impl TestResult {
    /// Percentage (0–100) of predictions that held.
    pub fn accuracy(&self) -> f64 {
        if self.predictions.is_empty() {
            return 0.0;
        }
        let correct = self.predictions.iter().filter(|p| p.held).count();
        correct as f64 / self.predictions.len() as f64 * 100.0
    }

    /// Mean profit across predictions.
    pub fn profit_score(&self) -> f64 {
        if self.predictions.is_empty() {
            return 0.0;
        }
        self.predictions.iter().map(|p| p.profit).sum::<f64>() / self.predictions.len() as f64
    }
}

/// Aggregate accuracy/profit over a set of predictions.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Metrics {
    /// Percentage (0–100).
    pub accuracy: f64,
    pub profit: f64,
    pub total: usize,
    pub correct: usize,
}

impl Metrics {
    pub fn from_predictions<'a>(predictions: impl IntoIterator<Item = &'a Prediction>) -> Self {
        let mut total = 0usize;
        let mut correct = 0usize;
        let mut profit_sum = 0.0;
        for p in predictions {
            total += 1;
            if p.held {
                correct += 1;
            }
            profit_sum += p.profit;
        }
        if total == 0 {
            return Metrics::default();
        }
        Metrics {
            accuracy: correct as f64 / total as f64 * 100.0,
            profit: profit_sum / total as f64,
            total,
            correct,
        }
    }

    pub fn meets(&self, target_accuracy: f64, target_profit: f64) -> bool {
        self.accuracy >= target_accuracy && self.profit >= target_profit
    }
}

impl fmt::Display for Metrics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "accuracy {:.1}% ({}/{}) | profit {:+.2}",
            self.accuracy, self.correct, self.total, self.profit
        )
    }
}

/// Metrics for a single topic within one round.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TopicMetrics {
    pub topic: String,
    pub tests: usize,
    #[serde(flatten)]
    pub metrics: Metrics,
}

/// Checkpoint of one optimization round. Append-only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IterationResult {
    pub iteration: u32,
    pub prompt_name: String,
    pub prompt_length: usize,
    pub accuracy: f64,
    pub profit_score: f64,
    pub total_predictions: usize,
    pub correct_predictions: usize,
    pub per_topic: Vec<TopicMetrics>,
    pub good_examples: Vec<Prediction>,
    pub bad_examples: Vec<Prediction>,
    pub changes_made: Vec<String>,
    pub timestamp: DateTime<Utc>,
}

impl IterationResult {
    pub fn metrics(&self) -> Metrics {
        Metrics {
            accuracy: self.accuracy,
            profit: self.profit_score,
            total: self.total_predictions,
            correct: self.correct_predictions,
        }
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Truncate to at most `max` characters without splitting a code point.
pub fn truncate_chars(s: &str, max: usize) -> String {
    match s.char_indices().nth(max) {
        Some((idx, _)) => s[..idx].to_string(),
        None => s.to_string(),
    }
}

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Domain-specific error types.
#[derive(Debug, thiserror::Error)]
pub enum OptimizerError {
    #[error("Missing API credential: set the {0} environment variable (e.g. in .env)")]
    MissingCredential(String),

    #[error("No topics produced enough resolved markets to build a test")]
    NoQualifyingTopics,

    #[error("Market fetch failed for topic '{topic}': {message}")]
    MarketFetch { topic: String, message: String },

    #[error("LLM error ({model}): {message}")]
    Llm { model: String, message: String },

    #[error("Malformed model output: {0}")]
    MalformedOutput(String),

    #[error("Dataset store error: {0}")]
    Dataset(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
