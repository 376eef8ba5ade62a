//! Prompt runner.
//!
//! Fills a candidate prompt with one source market, sends the candidate
//! block to the analysis model and parses the `{"related": [...]}` reply
//! into raw predictions.

use anyhow::Result;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, warn};

use super::template::{self, Sections};
use crate::llm::{ChatModel, ChatRequest};
use crate::types::{Market, OptimizerError, RawPrediction, Relationship};

const ANALYSIS_TEMPERATURE: f32 = 0.3;
const CANDIDATE_SEPARATOR: &str = "\n\n---\n\n";

pub struct PromptRunner {
    model: Arc<dyn ChatModel>,
    model_id: String,
}

impl PromptRunner {
    pub fn new(model: Arc<dyn ChatModel>, model_id: impl Into<String>) -> Self {
        Self {
            model,
            model_id: model_id.into(),
        }
    }

    /// Render candidates as `ID / Question / Odds` blocks.
    pub fn render_candidates(candidates: &[Market]) -> String {
        candidates
            .iter()
            .map(|c| {
                format!(
                    "ID: {}\nQuestion: {}\nOdds: {}% YES / {}% NO",
                    c.id, c.question, c.yes_price, c.no_price
                )
            })
            .collect::<Vec<_>>()
            .join(CANDIDATE_SEPARATOR)
    }

    pub fn build_request(
        &self,
        prompt: &str,
        sections: &Sections,
        source: &Market,
        candidates: &[Market],
    ) -> ChatRequest {
        let system = template::fill_source(prompt, source, sections);
        let user = format!("Analyze:\n\n{}", Self::render_candidates(candidates));
        ChatRequest::new(&self.model_id, system, user)
            .temperature(ANALYSIS_TEMPERATURE)
            .json()
    }

    /// Parse the model's JSON reply.
    ///
    /// Entries without a `marketId` are dropped; a missing relationship
    /// defaults to `WEAK_SIGNAL` and a missing reasoning to empty.
    pub fn parse_response(text: &str) -> Result<Vec<RawPrediction>> {
        let value: Value = serde_json::from_str(text.trim())
            .map_err(|e| OptimizerError::MalformedOutput(format!("invalid JSON: {e}")))?;

        let related = value
            .get("related")
            .and_then(Value::as_array)
            .ok_or_else(|| OptimizerError::MalformedOutput("missing \"related\" array".into()))?;

        let predictions = related
            .iter()
            .filter_map(|entry| {
                let market_id = match entry.get("marketId")? {
                    Value::String(s) if !s.is_empty() => s.clone(),
                    Value::Number(n) => n.to_string(),
                    _ => return None,
                };
                let relationship = entry
                    .get("relationship")
                    .and_then(Value::as_str)
                    .map(Relationship::from)
                    .unwrap_or(Relationship::WeakSignal);
                let reasoning = entry
                    .get("reasoning")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string();
                Some(RawPrediction {
                    market_id,
                    relationship,
                    reasoning,
                })
            })
            .collect();

        Ok(predictions)
    }

    /// Run the prompt for one source market, with `sections` filling the
    /// feedback tokens.
    ///
    /// Never fails: a call or parse error is logged and yields no
    /// predictions, so one market cannot abort a battery.
    pub async fn run(
        &self,
        prompt: &str,
        sections: &Sections,
        source: &Market,
        candidates: &[Market],
    ) -> Vec<RawPrediction> {
        let request = self.build_request(prompt, sections, source, candidates);

        let text = match self.model.complete(&request).await {
            Ok(text) => text,
            Err(e) => {
                warn!(market_id = %source.id, error = %e, "Analysis call failed, no predictions recorded");
                return Vec::new();
            }
        };

        match Self::parse_response(&text) {
            Ok(predictions) => {
                debug!(market_id = %source.id, count = predictions.len(), "Parsed predictions");
                predictions
            }
            Err(e) => {
                warn!(market_id = %source.id, error = %e, "Unusable analysis response, no predictions recorded");
                Vec::new()
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::template::BASE_PROMPT;
    use crate::llm::MockChatModel;
    use crate::types::tests::market;
    use crate::types::Outcome;

    fn candidates() -> Vec<Market> {
        vec![market("c1", 0.9, Outcome::Yes), market("c2", 0.15, Outcome::No)]
    }

    #[test]
    fn test_render_candidates() {
        let text = PromptRunner::render_candidates(&candidates());
        assert_eq!(
            text,
            "ID: c1\nQuestion: Question c1?\nOdds: 90% YES / 10% NO\n\n---\n\nID: c2\nQuestion: Question c2?\nOdds: 15% YES / 85% NO"
        );
        assert_eq!(PromptRunner::render_candidates(&[]), "");
    }

    #[test]
    fn test_parse_full_response() {
        let text = r#"{"related": [
            {"marketId": "c1", "relationship": "IMPLIES", "reasoning": "same driver"},
            {"marketId": 42, "relationship": "CAUSES"},
            {"marketId": "c2"},
            {"relationship": "IMPLIES"},
            "garbage"
        ]}"#;
        let preds = PromptRunner::parse_response(text).unwrap();
        assert_eq!(preds.len(), 3);
        assert_eq!(preds[0].relationship, Relationship::Implies);
        assert_eq!(preds[0].reasoning, "same driver");
        assert_eq!(preds[1].market_id, "42");
        assert_eq!(preds[1].relationship, Relationship::Unknown("CAUSES".into()));
        assert_eq!(preds[2].relationship, Relationship::WeakSignal);
        assert_eq!(preds[2].reasoning, "");
    }

    #[test]
    fn test_parse_empty_related() {
        assert!(PromptRunner::parse_response(r#"{"related": []}"#).unwrap().is_empty());
    }

    #[test]
    fn test_parse_malformed() {
        assert!(PromptRunner::parse_response("not json").is_err());
        assert!(PromptRunner::parse_response(r#"{"markets": []}"#).is_err());
        assert!(PromptRunner::parse_response("").is_err());
    }

    #[tokio::test]
    async fn test_run_sends_filled_prompt() {
        let mut mock = MockChatModel::new();
        mock.expect_complete()
            .withf(|req| {
                req.json_response
                    && req.model == "gpt-4o-mini"
                    && (req.temperature - 0.3).abs() < 1e-6
                    && req.system.contains("- Question: Question src?")
                    && req.system.contains("{\"related\": []}")
                    && req.user.starts_with("Analyze:\n\nID: c1")
            })
            .times(1)
            .returning(|_| Ok(r#"{"related": [{"marketId": "c1", "relationship": "IMPLIES", "reasoning": "r"}]}"#.into()));

        let runner = PromptRunner::new(Arc::new(mock), "gpt-4o-mini");
        let source = market("src", 0.9, Outcome::Yes);
        let preds = runner.run(BASE_PROMPT, &Sections::default(), &source, &candidates()).await;
        assert_eq!(preds.len(), 1);
        assert_eq!(preds[0].market_id, "c1");
    }

    #[test]
    fn test_request_fills_sections_without_rescanning() {
        let runner = PromptRunner::new(Arc::new(MockChatModel::new()), "m");
        let mut source = market("src", 0.9, Outcome::Yes);
        source.description = "SRCDESC".into();
        let sections = Sections::new("Reasoning: compare {source_description} here", "");

        let req = runner.build_request(BASE_PROMPT, &sections, &source, &candidates());
        assert!(req.system.contains("- Description: SRCDESC"));
        assert!(req.system.contains("Reasoning: compare {source_description} here"));
        assert!(!req.system.contains("Reasoning: compare SRCDESC here"));
    }

    #[tokio::test]
    async fn test_run_swallows_errors() {
        let mut mock = MockChatModel::new();
        mock.expect_complete()
            .times(1)
            .returning(|_| Err(anyhow::anyhow!("connection reset")));
        let runner = PromptRunner::new(Arc::new(mock), "m");
        let source = market("src", 0.9, Outcome::Yes);
        assert!(runner.run(BASE_PROMPT, &Sections::default(), &source, &candidates()).await.is_empty());

        let mut mock = MockChatModel::new();
        mock.expect_complete().returning(|_| Ok("{\"oops\"".into()));
        let runner = PromptRunner::new(Arc::new(mock), "m");
        assert!(runner.run(BASE_PROMPT, &Sections::default(), &source, &candidates()).await.is_empty());
    }
}
