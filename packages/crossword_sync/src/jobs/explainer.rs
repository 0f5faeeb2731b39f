use std::sync::Arc;

use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info};

use crate::config::ExplainerConfig;

/// Everything the generator gets to see about one clue.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExplanationInput {
    pub clue_text: String,
    pub answer: String,
    /// The explanation being replaced, for regeneration.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub previous: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub feedback: Option<String>,
}

/// Opaque explanation generator. May take several seconds.
#[async_trait]
pub trait Explainer: Send + Sync {
    async fn explain(&self, input: &ExplanationInput) -> Result<Value>;
}

/// Posts the input as JSON to a configured endpoint and returns its JSON reply.
pub struct HttpExplainer {
    client: reqwest::Client,
    endpoint: String,
    api_key: Option<String>,
    model: Option<String>,
}

#[derive(Serialize)]
struct ExplainRequest<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    model: Option<&'a str>,
    #[serde(flatten)]
    input: &'a ExplanationInput,
}

impl HttpExplainer {
    pub fn new(config: &ExplainerConfig, endpoint: String) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .context("Failed to build explainer HTTP client")?;
        Ok(Self {
            client,
            endpoint,
            api_key: config.api_key.clone(),
            model: config.model.clone(),
        })
    }
}

#[async_trait]
impl Explainer for HttpExplainer {
    async fn explain(&self, input: &ExplanationInput) -> Result<Value> {
        let mut request = self.client.post(&self.endpoint).json(&ExplainRequest {
            model: self.model.as_deref(),
            input,
        });
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        debug!(endpoint = %self.endpoint, "requesting explanation");
        let resp = request
            .send()
            .await
            .context("explanation service unreachable")?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            bail!(
                "explanation service returned {}: {}",
                status,
                body.chars().take(200).collect::<String>()
            );
        }

        resp.json()
            .await
            .context("explanation service returned invalid JSON")
    }
}

/// Used when no endpoint is configured; every job fails with a clear message.
pub struct UnconfiguredExplainer;

#[async_trait]
impl Explainer for UnconfiguredExplainer {
    async fn explain(&self, _input: &ExplanationInput) -> Result<Value> {
        bail!("explanation service is not configured")
    }
}

pub fn from_config(config: &ExplainerConfig) -> Result<Arc<dyn Explainer>> {
    match &config.endpoint {
        Some(endpoint) => {
            info!(endpoint = %endpoint, "Explanation service configured");
            Ok(Arc::new(HttpExplainer::new(config, endpoint.clone())?))
        }
        None => {
            info!("No explanation endpoint configured; explanation requests will fail");
            Ok(Arc::new(UnconfiguredExplainer))
        }
    }
}
