//! Arize Phoenix dataset store.
//!
//! REST endpoints used:
//! - `POST /v1/datasets/upload?sync=true` with parallel `inputs`,
//!   `outputs` and `metadata` arrays
//! - `GET /v1/datasets?name=<name>` to resolve a name to an id
//! - `GET /v1/datasets/{id}/examples` for the latest version's examples

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};

use super::{DatasetStore, ExampleExpected, ExampleInput, ExampleMetadata, GroundTruthExample, UploadOutcome};
use crate::types::OptimizerError;

const DEFAULT_ENDPOINT: &str = "http://localhost:6006";

// ---------------------------------------------------------------------------
// API types
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
struct UploadRequest<'a> {
    action: &'static str,
    name: &'a str,
    inputs: Vec<&'a ExampleInput>,
    outputs: Vec<&'a ExampleExpected>,
    metadata: Vec<&'a ExampleMetadata>,
}

#[derive(Debug, Deserialize)]
struct DatasetList {
    #[serde(default)]
    data: Vec<DatasetSummary>,
}

#[derive(Debug, Deserialize)]
struct DatasetSummary {
    id: String,
    #[serde(default)]
    name: String,
}

#[derive(Debug, Deserialize)]
struct ExamplesResponse {
    data: ExamplesData,
}

#[derive(Debug, Deserialize)]
struct ExamplesData {
    #[serde(default)]
    examples: Vec<PhoenixExample>,
}

#[derive(Debug, Deserialize)]
struct PhoenixExample {
    #[serde(default)]
    input: Value,
    #[serde(default)]
    output: Value,
    #[serde(default)]
    metadata: Value,
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

pub struct PhoenixClient {
    http: Client,
    endpoint: String,
}

impl PhoenixClient {
    pub fn new(endpoint: Option<String>) -> Result<Self> {
        let http = Client::builder()
            .build()
            .context("Failed to build Phoenix HTTP client")?;

        Ok(Self {
            http,
            endpoint: endpoint
                .unwrap_or_else(|| DEFAULT_ENDPOINT.to_string())
                .trim_end_matches('/')
                .to_string(),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn upload_body<'a>(name: &'a str, examples: &'a [GroundTruthExample]) -> UploadRequest<'a> {
        UploadRequest {
            action: "create",
            name,
            inputs: examples.iter().map(|e| &e.input).collect(),
            outputs: examples.iter().map(|e| &e.expected).collect(),
            metadata: examples.iter().map(|e| &e.metadata).collect(),
        }
    }

    fn is_already_exists(status: StatusCode, body: &str) -> bool {
        status == StatusCode::CONFLICT || body.to_lowercase().contains("already exists")
    }

    /// Examples that fail to decode are skipped with a warning.
    fn decode_examples(raw: Vec<PhoenixExample>) -> Vec<GroundTruthExample> {
        let total = raw.len();
        let examples: Vec<GroundTruthExample> = raw
            .into_iter()
            .filter_map(|ex| {
                let decoded = (|| -> Result<GroundTruthExample> {
                    Ok(GroundTruthExample {
                        input: serde_json::from_value(ex.input)?,
                        expected: serde_json::from_value(ex.output)?,
                        metadata: serde_json::from_value(ex.metadata)?,
                    })
                })();
                match decoded {
                    Ok(ex) => Some(ex),
                    Err(e) => {
                        warn!(error = %e, "Skipping undecodable dataset example");
                        None
                    }
                }
            })
            .collect();

        debug!(total, decoded = examples.len(), "Decoded dataset examples");
        examples
    }

    async fn find_dataset_id(&self, name: &str) -> Result<Option<String>> {
        let url = format!("{}/v1/datasets", self.endpoint);
        let resp = self
            .http
            .get(&url)
            .query(&[("name", name)])
            .send()
            .await
            .context("Phoenix dataset lookup failed")?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(OptimizerError::Dataset(format!("lookup HTTP {status}: {body}")).into());
        }

        let list: DatasetList = resp.json().await.context("Failed to parse Phoenix dataset list")?;
        Ok(Self::pick_dataset(list, name))
    }

    /// The server may ignore the name filter, so only an exact name match
    /// counts.
    fn pick_dataset(list: DatasetList, name: &str) -> Option<String> {
        list.data.into_iter().find(|d| d.name == name).map(|d| d.id)
    }
}

#[async_trait]
impl DatasetStore for PhoenixClient {
    async fn upload(&self, name: &str, examples: &[GroundTruthExample]) -> Result<UploadOutcome> {
        let url = format!("{}/v1/datasets/upload", self.endpoint);
        info!(dataset = name, examples = examples.len(), endpoint = %self.endpoint, "Uploading dataset to Phoenix");

        let resp = self
            .http
            .post(&url)
            .query(&[("sync", "true")])
            .json(&Self::upload_body(name, examples))
            .send()
            .await
            .context("Phoenix upload request failed")?;

        let status = resp.status();
        if status.is_success() {
            return Ok(UploadOutcome::Created { count: examples.len() });
        }

        let body = resp.text().await.unwrap_or_default();
        if Self::is_already_exists(status, &body) {
            return Ok(UploadOutcome::AlreadyExists);
        }

        Err(OptimizerError::Dataset(format!("upload HTTP {status}: {body}")).into())
    }

    async fn load(&self, name: &str) -> Result<Option<Vec<GroundTruthExample>>> {
        let Some(id) = self.find_dataset_id(name).await? else {
            return Ok(None);
        };

        let url = format!("{}/v1/datasets/{}/examples", self.endpoint, urlencoding::encode(&id));
        let resp = self
            .http
            .get(&url)
            .send()
            .await
            .context("Phoenix examples request failed")?;

        if resp.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(OptimizerError::Dataset(format!("examples HTTP {status}: {body}")).into());
        }

        let parsed: ExamplesResponse = resp.json().await.context("Failed to parse Phoenix examples")?;
        Ok(Some(Self::decode_examples(parsed.data.examples)))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
