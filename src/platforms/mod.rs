//! Market data sources.
//!
//! Defines the `MarketSource` trait and the topic-grouping step that turns
//! per-topic fetches into the `MarketSets` the optimizer tests against.
//! - Polymarket (Gamma API): resolved and open binary markets

pub mod polymarket;

use anyhow::Result;
use async_trait::async_trait;
use tracing::{info, warn};

use crate::types::{Market, OptimizerError};

/// Abstraction over prediction market data providers.
#[async_trait]
pub trait MarketSource: Send + Sync {
    /// Fetch up to `limit` markets mentioning `topic` (case-insensitive,
    /// question or description). Resolved requests keep only markets with
    /// an unambiguous outcome; open requests tag every market `PENDING`.
    async fn fetch_by_topic(&self, topic: &str, limit: u32, want_resolved: bool) -> Result<Vec<Market>>;

    /// Source name for logging.
    fn name(&self) -> &str;
}

/// Markets grouped by topic, in the order topics were requested.
#[derive(Debug, Clone, Default)]
pub struct MarketSets {
    topics: Vec<TopicMarkets>,
}

#[derive(Debug, Clone)]
pub struct TopicMarkets {
    pub topic: String,
    pub markets: Vec<Market>,
}

impl MarketSets {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a topic group. A topic already present is replaced in place.
    pub fn insert(&mut self, topic: impl Into<String>, markets: Vec<Market>) {
        let topic = topic.into();
        match self.topics.iter_mut().find(|t| t.topic == topic) {
            Some(existing) => existing.markets = markets,
            None => self.topics.push(TopicMarkets { topic, markets }),
        }
    }

    pub fn get(&self, topic: &str) -> Option<&[Market]> {
        self.topics
            .iter()
            .find(|t| t.topic == topic)
            .map(|t| t.markets.as_slice())
    }

    pub fn iter(&self) -> impl Iterator<Item = &TopicMarkets> {
        self.topics.iter()
    }

    pub fn len(&self) -> usize {
        self.topics.len()
    }

    pub fn is_empty(&self) -> bool {
        self.topics.is_empty()
    }

    pub fn total_markets(&self) -> usize {
        self.topics.iter().map(|t| t.markets.len()).sum()
    }
}

/// Fetch resolved markets for every topic and keep the topics that yield at
/// least `min_per_topic` markets.
///
/// A failed fetch is escalated with its topic attached; the caller decides
/// whether that aborts the run.
pub async fn fetch_grouped(
    source: &dyn MarketSource,
    topics: &[String],
    limit: u32,
    min_per_topic: usize,
) -> Result<MarketSets> {
    info!(source = source.name(), topics = topics.len(), "Fetching markets by topic");

    let mut sets = MarketSets::new();

    for topic in topics {
        let markets = source
            .fetch_by_topic(topic, limit, true)
            .await
            .map_err(|e| OptimizerError::MarketFetch {
                topic: topic.clone(),
                message: format!("{e:#}"),
            })?;

        if markets.len() >= min_per_topic {
            info!(topic = %topic, count = markets.len(), "Topic qualifies");
            sets.insert(topic.clone(), markets);
        } else {
            warn!(
                topic = %topic,
                count = markets.len(),
                required = min_per_topic,
                "Too few resolved markets, skipping topic"
            );
        }
    }

    info!(
        topics = sets.len(),
        markets = sets.total_markets(),
        "Market sets ready"
    );

    Ok(sets)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::tests::market;
    use crate::types::Outcome;

    struct FixedSource;

    #[async_trait]
    impl MarketSource for FixedSource {
        async fn fetch_by_topic(&self, topic: &str, _limit: u32, _resolved: bool) -> Result<Vec<Market>> {
            let n = match topic {
                "Bitcoin" => 6,
                "Fed" => 4,
                "broken" => anyhow::bail!("HTTP 502"),
                _ => 0,
            };
            Ok((0..n).map(|i| market(&format!("{topic}-{i}"), 0.9, Outcome::Yes)).collect())
        }

        fn name(&self) -> &str {
            "fixed"
        }
    }

    fn topics(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn test_fetch_grouped_filters_small_topics() {
        let sets = fetch_grouped(&FixedSource, &topics(&["Bitcoin", "Fed", "AI"]), 100, 5)
            .await
            .unwrap();
        assert_eq!(sets.len(), 1);
        assert_eq!(sets.get("Bitcoin").unwrap().len(), 6);
        assert!(sets.get("Fed").is_none());
        assert_eq!(sets.total_markets(), 6);
    }

    #[tokio::test]
    async fn test_fetch_grouped_escalates_with_topic() {
        let err = fetch_grouped(&FixedSource, &topics(&["Bitcoin", "broken"]), 100, 5)
            .await
            .unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("broken"));
        assert!(msg.contains("502"));
    }

    #[test]
    fn test_market_sets_preserve_order_and_replace() {
        let mut sets = MarketSets::new();
        sets.insert("b", vec![market("1", 0.9, Outcome::Yes)]);
        sets.insert("a", vec![]);
        sets.insert("b", vec![market("2", 0.1, Outcome::No), market("3", 0.1, Outcome::No)]);
        let order: Vec<&str> = sets.iter().map(|t| t.topic.as_str()).collect();
        assert_eq!(order, vec!["b", "a"]);
        assert_eq!(sets.get("b").unwrap().len(), 2);
    }
}
