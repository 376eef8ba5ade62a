//! Ground-truth dataset.
//!
//! Freezes the test battery's source/candidate selection, with every
//! market's resolved outcome, into examples that can be uploaded to a
//! dataset store and reloaded later instead of refetching markets.

pub mod phoenix;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::platforms::MarketSets;
use crate::types::{Market, Outcome};

/// Topics need at least this many markets to produce examples.
const MIN_MARKETS_FOR_EXAMPLE: usize = 3;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExampleInput {
    pub source_id: String,
    pub source_question: String,
    pub source_description: String,
    pub source_outcome: Outcome,
    #[serde(default)]
    pub source_yes_price: u8,
    #[serde(default)]
    pub source_no_price: u8,
    #[serde(default)]
    pub source_volume: f64,
    pub topic: String,
    pub candidates: Vec<Market>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExampleExpected {
    pub source_outcome: Outcome,
    pub candidate_outcomes: BTreeMap<String, Outcome>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExampleMetadata {
    pub topic: String,
    pub source_volume: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroundTruthExample {
    pub input: ExampleInput,
    pub expected: ExampleExpected,
    pub metadata: ExampleMetadata,
}

impl GroundTruthExample {
    /// Rebuild the source market.
    pub fn source_market(&self) -> Market {
        let input = &self.input;
        Market {
            id: input.source_id.clone(),
            question: input.source_question.clone(),
            description: input.source_description.clone(),
            yes_price: input.source_yes_price,
            no_price: 100u8.saturating_sub(input.source_yes_price),
            outcome: input.source_outcome,
            volume: input.source_volume,
        }
    }
}

/// One example per tested source market: the first `tests_per_topic`
/// markets of each topic, each with up to `candidates_per_test` others.
pub fn build_examples(sets: &MarketSets, tests_per_topic: usize, candidates_per_test: usize) -> Vec<GroundTruthExample> {
    let mut examples = Vec::new();

    for group in sets.iter() {
        if group.markets.len() < MIN_MARKETS_FOR_EXAMPLE {
            continue;
        }

        for source in group.markets.iter().take(tests_per_topic) {
            let candidates: Vec<Market> = group
                .markets
                .iter()
                .filter(|m| m.id != source.id)
                .take(candidates_per_test)
                .cloned()
                .collect();

            let candidate_outcomes = candidates.iter().map(|c| (c.id.clone(), c.outcome)).collect();

            examples.push(GroundTruthExample {
                input: ExampleInput {
                    source_id: source.id.clone(),
                    source_question: source.question.clone(),
                    source_description: source.description.clone(),
                    source_outcome: source.outcome,
                    source_yes_price: source.yes_price,
                    source_no_price: source.no_price,
                    source_volume: source.volume,
                    topic: group.topic.clone(),
                    candidates,
                },
                expected: ExampleExpected {
                    source_outcome: source.outcome,
                    candidate_outcomes,
                },
                metadata: ExampleMetadata {
                    topic: group.topic.clone(),
                    source_volume: source.volume,
                },
            });
        }
    }

    examples
}

/// Reconstruct topic-ordered market sets from examples.
///
/// Sources come first in example order, then unseen candidates, so a set
/// built by `build_examples` reproduces the same battery.
pub fn market_sets_from_examples(examples: &[GroundTruthExample]) -> MarketSets {
    let mut grouped: Vec<(String, Vec<Market>)> = Vec::new();

    let mut push = |topic: &str, market: Market| {
        let idx = match grouped.iter().position(|(t, _)| t == topic) {
            Some(i) => i,
            None => {
                grouped.push((topic.to_string(), Vec::new()));
                grouped.len() - 1
            }
        };
        let markets = &mut grouped[idx].1;
        if !markets.iter().any(|m| m.id == market.id) {
            markets.push(market);
        }
    };

    for ex in examples {
        push(&ex.input.topic, ex.source_market());
    }
    for ex in examples {
        for c in &ex.input.candidates {
            push(&ex.input.topic, c.clone());
        }
    }

    let mut sets = MarketSets::new();
    for (topic, markets) in grouped {
        sets.insert(topic, markets);
    }
    sets
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UploadOutcome {
    Created { count: usize },
    /// A dataset with this name already exists; nothing was uploaded.
    AlreadyExists,
}

/// A named store of ground-truth examples.
#[async_trait]
pub trait DatasetStore: Send + Sync {
    async fn upload(&self, name: &str, examples: &[GroundTruthExample]) -> Result<UploadOutcome>;

    /// `None` when no dataset has this name.
    async fn load(&self, name: &str) -> Result<Option<Vec<GroundTruthExample>>>;
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::tests::market;

    fn sets() -> MarketSets {
        let mut sets = MarketSets::new();
        sets.insert(
            "Fed",
            (0..13)
                .map(|i| market(&format!("f{i}"), if i % 2 == 0 { 0.9 } else { 0.1 }, if i % 2 == 0 { Outcome::Yes } else { Outcome::No }))
                .collect(),
        );
        sets.insert("AI", vec![market("a0", 0.9, Outcome::Yes), market("a1", 0.1, Outcome::No)]);
        sets
    }

    #[test]
    fn test_build_examples_mirrors_battery() {
        let examples = build_examples(&sets(), 3, 10);
        assert_eq!(examples.len(), 3);

        let second = &examples[1];
        assert_eq!(second.input.source_id, "f1");
        assert_eq!(second.input.topic, "Fed");
        assert_eq!(second.input.candidates.len(), 10);
        assert_eq!(second.input.candidates[0].id, "f0");
        assert!(second.input.candidates.iter().all(|c| c.id != "f1"));
        assert_eq!(second.expected.source_outcome, Outcome::No);
        assert_eq!(second.expected.candidate_outcomes.get("f2"), Some(&Outcome::Yes));
        assert_eq!(second.metadata.topic, "Fed");
    }

    #[test]
    fn test_round_trip_reproduces_test_order() {
        let original = sets();
        let examples = build_examples(&original, 3, 10);
        let rebuilt = market_sets_from_examples(&examples);

        assert_eq!(rebuilt.len(), 1);
        let markets = rebuilt.get("Fed").unwrap();
        let ids: Vec<&str> = markets.iter().map(|m| m.id.as_str()).collect();
        let expected: Vec<String> = (0..11).map(|i| format!("f{i}")).collect();
        assert_eq!(ids, expected.iter().map(String::as_str).collect::<Vec<_>>());
        assert_eq!(markets[0], original.get("Fed").unwrap()[0]);
    }

    #[test]
    fn test_example_json_shape() {
        let examples = build_examples(&sets(), 1, 2);
        let value = serde_json::to_value(&examples[0]).unwrap();
        assert_eq!(value["input"]["source_outcome"], "YES");
        assert_eq!(value["expected"]["candidate_outcomes"]["f1"], "NO");
        assert_eq!(value["metadata"]["source_volume"], 1000.0);
    }

    #[test]
    fn test_source_market_from_legacy_example() {
        let json = serde_json::json!({
            "input": {
                "source_id": "s", "source_question": "Q?", "source_description": "",
                "source_outcome": "NO", "topic": "Fed", "candidates": []
            },
            "expected": {"source_outcome": "NO", "candidate_outcomes": {}},
            "metadata": {"topic": "Fed", "source_volume": 5.0}
        });
        let ex: GroundTruthExample = serde_json::from_value(json).unwrap();
        let m = ex.source_market();
        assert_eq!((m.yes_price, m.no_price), (0, 100));
        assert_eq!(m.outcome, Outcome::No);
    }
}
