use std::collections::HashMap;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use broker_core::{MarketQuote, Prediction, PredictionSource};

/// HTTP client for the prediction service. The service receives the current
/// snapshot and answers with zero or more tradable predictions.
pub struct PredictionClient {
    client: reqwest::Client,
    base_url: String,
}

impl PredictionClient {
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .context("failed to build prediction client")?;
        Ok(Self {
            client,
            base_url: base_url.into(),
        })
    }
}

#[async_trait]
impl PredictionSource for PredictionClient {
    async fn predictions(
        &self,
        snapshot: &HashMap<String, MarketQuote>,
    ) -> Result<Vec<Prediction>> {
        let url = format!("{}/predictions", self.base_url.trim_end_matches('/'));
        let response = self
            .client
            .post(&url)
            .json(snapshot)
            .send()
            .await
            .with_context(|| format!("prediction request to {} failed", url))?;

        if !response.status().is_success() {
            bail!("prediction service returned {}", response.status());
        }

        response
            .json::<Vec<Prediction>>()
            .await
            .context("failed to decode predictions")
    }
}
