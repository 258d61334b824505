//! Prediction adapter: forwards completed records to a model-serving
//! HTTP endpoint.
//!
//! The fitted regression model lives outside this process. Single records
//! go to `POST {base}/predict_item` as JSON and come back as
//! `{"price": <float>}`; batches go to `POST {base}/predict_items` as a
//! multipart CSV upload and come back as CSV bytes.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use serde::Deserialize;

use crate::collection::CarRecord;
use crate::error::InferenceError;

/// Price inference for single records and CSV batches.
#[async_trait]
pub trait PricePredictor: Send + Sync {
    /// Predict a price for one car.
    async fn predict(&self, record: &CarRecord) -> Result<f64, InferenceError>;

    /// Predict prices for every row of a CSV file, returning the result CSV.
    async fn predict_batch(&self, file_name: &str, csv: Vec<u8>)
    -> Result<Vec<u8>, InferenceError>;
}

#[derive(Debug, Deserialize)]
struct PriceResponse {
    price: f64,
}

/// `PricePredictor` backed by a model-serving HTTP service.
pub struct HttpPredictor {
    base_url: String,
    timeout: Duration,
    client: reqwest::Client,
}

impl HttpPredictor {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, InferenceError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| InferenceError::RequestFailed(format!("Failed to build HTTP client: {e}")))?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            timeout,
            client,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{path}", self.base_url)
    }

    fn map_send_error(&self, e: reqwest::Error) -> InferenceError {
        if e.is_timeout() {
            InferenceError::Timeout(self.timeout)
        } else {
            InferenceError::RequestFailed(e.to_string())
        }
    }

    /// Turn a non-2xx response into `Rejected`.
    async fn check_status(resp: reqwest::Response) -> Result<reqwest::Response, InferenceError> {
        if resp.status().is_success() {
            return Ok(resp);
        }
        let status = resp.status().as_u16();
        let body = resp
            .text()
            .await
            .unwrap_or_else(|_| "unable to read response body".to_string());
        Err(InferenceError::Rejected { status, body })
    }
}

#[async_trait]
impl PricePredictor for HttpPredictor {
    async fn predict(&self, record: &CarRecord) -> Result<f64, InferenceError> {
        let resp = self
            .client
            .post(self.url("predict_item"))
            .json(record)
            .send()
            .await
            .map_err(|e| self.map_send_error(e))?;
        let resp = Self::check_status(resp).await?;

        let parsed: PriceResponse = resp
            .json()
            .await
            .map_err(|e| InferenceError::InvalidResponse(e.to_string()))?;

        if !parsed.price.is_finite() {
            return Err(InferenceError::InvalidResponse(format!(
                "non-finite price {}",
                parsed.price
            )));
        }

        tracing::debug!(name = %record.name, price = parsed.price, "Prediction received");
        Ok(parsed.price)
    }

    async fn predict_batch(
        &self,
        file_name: &str,
        csv: Vec<u8>,
    ) -> Result<Vec<u8>, InferenceError> {
        let size = csv.len();
        let part = Part::bytes(csv)
            .file_name(file_name.to_string())
            .mime_str("text/csv")
            .map_err(|e| InferenceError::RequestFailed(e.to_string()))?;
        let form = Form::new().part("file", part);

        let resp = self
            .client
            .post(self.url("predict_items"))
            .multipart(form)
            .send()
            .await
            .map_err(|e| self.map_send_error(e))?;
        let resp = Self::check_status(resp).await?;

        let bytes = resp
            .bytes()
            .await
            .map_err(|e| InferenceError::InvalidResponse(e.to_string()))?;

        tracing::info!(file_name, input_bytes = size, output_bytes = bytes.len(), "Batch prediction received");
        Ok(bytes.to_vec())
    }
}
