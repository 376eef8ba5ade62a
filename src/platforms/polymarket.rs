//! Polymarket integration.
//!
//! Uses the Gamma API for market discovery (no auth required).
//!
//! Gamma API: https://gamma-api.polymarket.com
//!
//! Gamma is loose about field types: ids arrive as strings or numbers,
//! `outcomePrices` as a JSON-encoded string or a real array, and `volume`
//! as a string or a number. Parsing accepts all of them and skips a record
//! whose probability cannot be read rather than failing the batch.

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, info};

use crate::platforms::MarketSource;
use crate::types::{Market, Outcome};

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

const GAMMA_API_URL: &str = "https://gamma-api.polymarket.com";

// ---------------------------------------------------------------------------
// Gamma API response types (market discovery)
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize, Clone, Default)]
pub struct GammaMarket {
    #[serde(default)]
    pub id: Option<Value>,
    #[serde(default, rename = "conditionId")]
    pub condition_id: Option<String>,
    #[serde(default)]
    pub question: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    /// Outcome prices, usually as JSON string: "[\"0.65\",\"0.35\"]"
    #[serde(default, rename = "outcomePrices")]
    pub outcome_prices: Option<Value>,
    #[serde(default)]
    pub volume: Option<Value>,
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

pub struct PolymarketClient {
    http: Client,
    base_url: String,
}

impl PolymarketClient {
    /// No request timeout is set; the transport default applies.
    pub fn new(base_url: Option<String>) -> Result<Self> {
        let http = Client::builder()
            .build()
            .context("Failed to build Polymarket HTTP client")?;

        Ok(Self {
            http,
            base_url: base_url
                .unwrap_or_else(|| GAMMA_API_URL.to_string())
                .trim_end_matches('/')
                .to_string(),
        })
    }

    /// Fetch markets from the Gamma API ordered by volume, descending.
    pub async fn fetch_gamma_markets(&self, limit: u32, closed: bool) -> Result<Vec<GammaMarket>> {
        let url = format!("{}/markets", self.base_url);
        debug!(limit, closed, "Fetching Polymarket markets from Gamma API");

        let resp = self
            .http
            .get(&url)
            .query(&[
                ("limit", limit.to_string()),
                ("closed", closed.to_string()),
                ("order", "volume".to_string()),
                ("ascending", "false".to_string()),
            ])
            .send()
            .await
            .context("Gamma API request failed")?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            anyhow::bail!("Gamma API error {status}: {body}");
        }

        let markets: Vec<GammaMarket> = resp
            .json()
            .await
            .context("Failed to parse Gamma markets response")?;

        debug!(count = markets.len(), "Fetched raw Gamma markets");
        Ok(markets)
    }

    /// Convert a Gamma record into a `Market` if it matches `topic` and has a
    /// usable probability (and, for resolved requests, a clear outcome).
    pub fn convert_market(gm: &GammaMarket, topic: &str, want_resolved: bool) -> Option<Market> {
        let question = gm.question.as_deref().unwrap_or("");
        let description = gm.description.as_deref().unwrap_or("");
        if question.is_empty() || !Self::mentions_topic(question, description, topic) {
            return None;
        }

        let id = Self::market_id(gm)?;
        let p = Self::first_outcome_probability(gm.outcome_prices.as_ref()?)?;

        let outcome = if want_resolved {
            Outcome::from_resolved_probability(p)?
        } else {
            Outcome::Pending
        };

        let volume = gm.volume.as_ref().and_then(Self::number_like).unwrap_or(0.0);

        Some(Market::from_probability(id, question, description, p, outcome, volume))
    }

    fn mentions_topic(question: &str, description: &str, topic: &str) -> bool {
        let needle = topic.to_lowercase();
        question.to_lowercase().contains(&needle) || description.to_lowercase().contains(&needle)
    }

    fn market_id(gm: &GammaMarket) -> Option<String> {
        let from_id = match &gm.id {
            Some(Value::String(s)) if !s.is_empty() => Some(s.clone()),
            Some(Value::Number(n)) => Some(n.to_string()),
            _ => None,
        };
        from_id.or_else(|| gm.condition_id.clone().filter(|c| !c.is_empty()))
    }

    /// Probability of the first outcome. Accepts `"[\"0.65\",\"0.35\"]"`,
    /// `["0.65","0.35"]` and `[0.65, 0.35]`. Missing, empty or non-numeric
    /// input yields `None`.
    pub fn first_outcome_probability(prices: &Value) -> Option<f64> {
        match prices {
            Value::String(s) => {
                let decoded: Value = serde_json::from_str(s).ok()?;
                match decoded {
                    Value::Array(_) => Self::first_outcome_probability(&decoded),
                    _ => None,
                }
            }
            Value::Array(items) => items.first().and_then(Self::number_like),
            _ => None,
        }
    }

    fn number_like(v: &Value) -> Option<f64> {
        let n = match v {
            Value::Number(n) => n.as_f64(),
            Value::String(s) => s.trim().parse::<f64>().ok(),
            _ => None,
        }?;
        n.is_finite().then_some(n)
    }
}

// ---------------------------------------------------------------------------
// MarketSource trait implementation
// ---------------------------------------------------------------------------

#[async_trait]
impl MarketSource for PolymarketClient {
    async fn fetch_by_topic(&self, topic: &str, limit: u32, want_resolved: bool) -> Result<Vec<Market>> {
        let raw = self
            .fetch_gamma_markets(limit, want_resolved)
            .await
            .with_context(|| format!("Fetching '{topic}' markets"))?;

        let markets: Vec<Market> = raw
            .iter()
            .filter_map(|gm| Self::convert_market(gm, topic, want_resolved))
            .collect();

        info!(
            topic,
            raw = raw.len(),
            kept = markets.len(),
            resolved = want_resolved,
            "Polymarket markets after filtering"
        );
        Ok(markets)
    }

    fn name(&self) -> &str {
        "polymarket"
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
