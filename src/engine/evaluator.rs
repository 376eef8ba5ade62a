//! Relationship evaluation.
//!
//! A `Scorer` decides whether a predicted relationship held given the real
//! outcomes of both markets and assigns a profit score. Two strategies
//! exist: a deterministic rule table and an LLM judge. The judge is always
//! deployed behind `WithFallback` so every prediction gets a verdict.

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::llm::{ChatModel, ChatRequest};
use crate::types::{Market, OptimizerError, Outcome, Relationship};

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Which scorer the optimizer uses.
#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum EvaluationStrategy {
    Rules,
    #[default]
    Judge,
}

const UNKNOWN_LABEL_PROFIT: f64 = -0.5;

const JUDGE_TEMPERATURE: f32 = 0.1;
const JUDGE_MAX_TOKENS: u32 = 200;
const JUDGE_DEFAULT_CONFIDENCE: f64 = 0.5;
const JUDGE_CORRECT_WEIGHT: f64 = 0.8;
const JUDGE_WRONG_WEIGHT: f64 = 0.7;

const JUDGE_SYSTEM: &str =
    "You are a prediction market analyst evaluating relationship predictions. Be strict but fair.";

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// Everything a scorer may look at for one prediction.
#[derive(Debug, Clone, Copy)]
pub struct Judgement<'a> {
    pub source: &'a Market,
    pub related: &'a Market,
    pub relationship: &'a Relationship,
    pub reasoning: &'a str,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Verdict {
    pub held: bool,
    pub profit: f64,
    pub explanation: String,
    /// Produced by the fallback scorer after the primary failed.
    pub fallback: bool,
}

#[async_trait]
pub trait Scorer: Send + Sync {
    async fn score(&self, case: &Judgement<'_>) -> Result<Verdict>;

    /// Scorer name for logging.
    fn name(&self) -> &str;
}

// ---------------------------------------------------------------------------
// Rule table
// ---------------------------------------------------------------------------

pub struct RuleTable;

impl RuleTable {
    /// Pure verdict from outcomes and label. `PENDING` counts as not YES.
    ///
    /// `SUBEVENT` always holds; the table has no failing branch for it.
    pub fn evaluate(source: Outcome, related: Outcome, relationship: &Relationship) -> (bool, f64) {
        let source_yes = source == Outcome::Yes;
        let related_yes = related == Outcome::Yes;

        let (held, if_held, if_not) = match relationship {
            Relationship::Implies => (!source_yes || related_yes, 0.6, -0.8),
            Relationship::Contradicts => (source_yes != related_yes, 0.7, -0.7),
            Relationship::Subevent => (true, 0.3, 0.0),
            Relationship::ConditionedOn => (!source_yes || related_yes, 0.5, -0.6),
            Relationship::WeakSignal => (source_yes == related_yes, 0.2, -0.3),
            Relationship::Unknown(_) => return (false, UNKNOWN_LABEL_PROFIT),
        };

        (held, if held { if_held } else { if_not })
    }
}

#[async_trait]
impl Scorer for RuleTable {
    async fn score(&self, case: &Judgement<'_>) -> Result<Verdict> {
        let (held, profit) = Self::evaluate(case.source.outcome, case.related.outcome, case.relationship);
        Ok(Verdict {
            held,
            profit,
            explanation: String::new(),
            fallback: false,
        })
    }

    fn name(&self) -> &str {
        "rules"
    }
}

// ---------------------------------------------------------------------------
// LLM judge
// ---------------------------------------------------------------------------

pub struct LlmJudge {
    model: Arc<dyn ChatModel>,
    model_id: String,
}

impl LlmJudge {
    pub fn new(model: Arc<dyn ChatModel>, model_id: impl Into<String>) -> Self {
        Self {
            model,
            model_id: model_id.into(),
        }
    }

    pub fn build_prompt(case: &Judgement<'_>) -> String {
        format!(
            r#"You are evaluating a prediction market relationship prediction.

SOURCE MARKET:
- Question: {source_question}
- Actual Outcome: {source_outcome}

RELATED MARKET:
- Question: {related_question}
- Actual Outcome: {related_outcome}

PREDICTED RELATIONSHIP: {relationship}
REASONING GIVEN: {reasoning}

RELATIONSHIP DEFINITIONS:
- IMPLIES: If related=YES then source=YES (or contrapositive)
- CONTRADICTS: If source=YES then related=NO (opposite outcomes)
- SUBEVENT: Related event directly affects source outcome
- CONDITIONED_ON: Source outcome is prerequisite for related
- WEAK_SIGNAL: Correlated but not causal

TASK: Evaluate if this relationship prediction was CORRECT given the actual outcomes.

Return JSON:
{{
  "correct": true/false,
  "confidence": 0.0-1.0,
  "explanation": "Brief reason"
}}"#,
            source_question = case.source.question,
            source_outcome = case.source.outcome,
            related_question = case.related.question,
            related_outcome = case.related.outcome,
            relationship = case.relationship,
            reasoning = case.reasoning,
        )
    }

    /// Parse `{"correct", "confidence", "explanation"}`.
    ///
    /// Missing fields default to incorrect, 0.5 confidence and an empty
    /// explanation; confidence is clamped to [0, 1]. Booleans and numbers
    /// written as strings are accepted. Any other shape is an error, so a
    /// fallback scorer takes over.
    pub fn parse_verdict(text: &str) -> Result<Verdict> {
        let value: Value = serde_json::from_str(text.trim())
            .map_err(|e| OptimizerError::MalformedOutput(format!("judge reply is not JSON: {e}")))?;

        if !value.is_object() {
            return Err(OptimizerError::MalformedOutput("judge reply is not an object".into()).into());
        }

        let held = Self::parse_correct(value.get("correct"))?;
        let confidence = Self::parse_confidence(value.get("confidence"))?;
        let explanation = value
            .get("explanation")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();

        let profit = if held {
            confidence * JUDGE_CORRECT_WEIGHT
        } else {
            -confidence * JUDGE_WRONG_WEIGHT
        };

        Ok(Verdict {
            held,
            profit,
            explanation,
            fallback: false,
        })
    }

    fn parse_correct(value: Option<&Value>) -> Result<bool, OptimizerError> {
        match value {
            None | Some(Value::Null) => Ok(false),
            Some(Value::Bool(b)) => Ok(*b),
            Some(Value::String(s)) => match s.trim().to_ascii_lowercase().as_str() {
                "true" | "yes" => Ok(true),
                "false" | "no" => Ok(false),
                _ => Err(OptimizerError::MalformedOutput(format!(
                    "judge \"correct\" is not a boolean: {s:?}"
                ))),
            },
            Some(other) => Err(OptimizerError::MalformedOutput(format!(
                "judge \"correct\" is not a boolean: {other}"
            ))),
        }
    }

    fn parse_confidence(value: Option<&Value>) -> Result<f64, OptimizerError> {
        let confidence = match value {
            None | Some(Value::Null) => JUDGE_DEFAULT_CONFIDENCE,
            Some(Value::Number(n)) => n.as_f64().unwrap_or(JUDGE_DEFAULT_CONFIDENCE),
            Some(Value::String(s)) => s.trim().parse::<f64>().map_err(|_| {
                OptimizerError::MalformedOutput(format!("judge \"confidence\" is not a number: {s:?}"))
            })?,
            Some(other) => {
                return Err(OptimizerError::MalformedOutput(format!(
                    "judge \"confidence\" is not a number: {other}"
                )))
            }
        };

        if !confidence.is_finite() {
            return Err(OptimizerError::MalformedOutput(format!(
                "judge \"confidence\" is not finite: {confidence}"
            )));
        }
        Ok(confidence.clamp(0.0, 1.0))
    }
}

#[async_trait]
impl Scorer for LlmJudge {
    async fn score(&self, case: &Judgement<'_>) -> Result<Verdict> {
        let request = ChatRequest::new(&self.model_id, JUDGE_SYSTEM, Self::build_prompt(case))
            .temperature(JUDGE_TEMPERATURE)
            .max_tokens(JUDGE_MAX_TOKENS)
            .json();

        let text = self.model.complete(&request).await?;
        let verdict = Self::parse_verdict(&text)?;
        debug!(
            related_id = %case.related.id,
            relationship = %case.relationship,
            held = verdict.held,
            profit = verdict.profit,
            "Judge verdict"
        );
        Ok(verdict)
    }

    fn name(&self) -> &str {
        "judge"
    }
}

// ---------------------------------------------------------------------------
// Fallback decorator
// ---------------------------------------------------------------------------

/// Runs `primary`; on any error scores with `fallback` instead, once,
/// and tags the verdict.
pub struct WithFallback<P, F> {
    primary: P,
    fallback: F,
}

impl<P: Scorer, F: Scorer> WithFallback<P, F> {
    pub fn new(primary: P, fallback: F) -> Self {
        Self { primary, fallback }
    }
}

#[async_trait]
impl<P: Scorer, F: Scorer> Scorer for WithFallback<P, F> {
    async fn score(&self, case: &Judgement<'_>) -> Result<Verdict> {
        match self.primary.score(case).await {
            Ok(verdict) => Ok(verdict),
            Err(e) => {
                warn!(
                    scorer = self.primary.name(),
                    source_id = %case.source.id,
                    related_id = %case.related.id,
                    error = %e,
                    "Scorer failed, using fallback verdict"
                );
                let verdict = self.fallback.score(case).await?;
                Ok(Verdict {
                    explanation: format!("Fallback: {e}"),
                    fallback: true,
                    ..verdict
                })
            }
        }
    }

    fn name(&self) -> &str {
        self.primary.name()
    }
}

/// Wire the configured strategy. The judge always falls back to the rules.
pub fn build_scorer(
    strategy: EvaluationStrategy,
    model: Arc<dyn ChatModel>,
    judge_model: &str,
) -> Box<dyn Scorer> {
    match strategy {
        EvaluationStrategy::Rules => Box::new(RuleTable),
        EvaluationStrategy::Judge => {
            Box::new(WithFallback::new(LlmJudge::new(model, judge_model), RuleTable))
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
