//! In-memory market source and dataset store for integration testing.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;

use relation_optimizer::dataset::{DatasetStore, GroundTruthExample, UploadOutcome};
use relation_optimizer::platforms::MarketSource;
use relation_optimizer::types::{Market, Outcome};

/// Resolved market with a deterministic question.
pub fn resolved(id: &str, p: f64) -> Market {
    let outcome = Outcome::from_resolved_probability(p).unwrap_or(Outcome::Pending);
    Market::from_probability(id, format!("Will {id} happen?"), "Scripted market.", p, outcome, 1000.0)
}

/// One topic, five markets: M0 (source) YES, M1 YES, M2 YES, M3 NO, M4 NO.
pub fn five_markets() -> Vec<Market> {
    vec![
        resolved("M0", 0.95),
        resolved("M1", 0.90),
        resolved("M2", 0.85),
        resolved("M3", 0.10),
        resolved("M4", 0.05),
    ]
}

pub struct MockMarketSource {
    topics: HashMap<String, Vec<Market>>,
    force_error: Mutex<Option<String>>,
    calls: Mutex<usize>,
}

impl MockMarketSource {
    pub fn new(topics: Vec<(&str, Vec<Market>)>) -> Self {
        Self {
            topics: topics.into_iter().map(|(t, m)| (t.to_string(), m)).collect(),
            force_error: Mutex::new(None),
            calls: Mutex::new(0),
        }
    }

    /// Force all subsequent fetches to fail.
    pub fn set_error(&self, msg: &str) {
        *self.force_error.lock().unwrap() = Some(msg.to_string());
    }

    pub fn calls(&self) -> usize {
        *self.calls.lock().unwrap()
    }
}

#[async_trait]
impl MarketSource for MockMarketSource {
    async fn fetch_by_topic(&self, topic: &str, limit: u32, _want_resolved: bool) -> Result<Vec<Market>> {
        *self.calls.lock().unwrap() += 1;
        if let Some(msg) = self.force_error.lock().unwrap().clone() {
            return Err(anyhow!(msg));
        }
        Ok(self
            .topics
            .get(topic)
            .map(|m| m.iter().take(limit as usize).cloned().collect())
            .unwrap_or_default())
    }

    fn name(&self) -> &str {
        "mock"
    }
}

#[derive(Default)]
pub struct MemoryStore {
    datasets: Mutex<HashMap<String, Vec<GroundTruthExample>>>,
}

#[async_trait]
impl DatasetStore for MemoryStore {
    async fn upload(&self, name: &str, examples: &[GroundTruthExample]) -> Result<UploadOutcome> {
        let mut datasets = self.datasets.lock().unwrap();
        if datasets.contains_key(name) {
            return Ok(UploadOutcome::AlreadyExists);
        }
        datasets.insert(name.to_string(), examples.to_vec());
        Ok(UploadOutcome::Created { count: examples.len() })
    }

    async fn load(&self, name: &str) -> Result<Option<Vec<GroundTruthExample>>> {
        Ok(self.datasets.lock().unwrap().get(name).cloned())
    }
}
