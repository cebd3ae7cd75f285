use std::time::Duration;

use reqwest::blocking::Client;
use reqwest::header::{ACCEPT, HeaderMap, HeaderValue, USER_AGENT};

use crate::error::KiraError;

pub const DEFAULT_BASE_URL: &str = "https://www.bv-brc.org/api";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportResponse {
    pub status: u16,
    pub body: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    Timeout,
    Connect(String),
    Other(String),
}

/// A single outbound GET. Implementations must not retry on their own.
pub trait FeatureTransport: Send + Sync {
    fn get(
        &self,
        endpoint: &str,
        query: &str,
        timeout: Duration,
    ) -> Result<TransportResponse, TransportError>;
}

#[derive(Clone)]
pub struct BvBrcHttpClient {
    client: Client,
    base_url: String,
}

impl BvBrcHttpClient {
    pub fn new() -> Result<Self, KiraError> {
        Self::with_base_url(DEFAULT_BASE_URL)
    }

    pub fn with_base_url(base_url: &str) -> Result<Self, KiraError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&format!("kira-fs/{}", env!("CARGO_PKG_VERSION")))
                .map_err(|err| KiraError::HttpSetup(err.to_string()))?,
        );
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));

        let client = Client::builder()
            .default_headers(headers)
            .build()
            .map_err(|err| KiraError::HttpSetup(err.to_string()))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

impl FeatureTransport for BvBrcHttpClient {
    fn get(
        &self,
        endpoint: &str,
        query: &str,
        timeout: Duration,
    ) -> Result<TransportResponse, TransportError> {
        let url = format!(
            "{}/{}?{}",
            self.base_url,
            endpoint.trim_start_matches('/'),
            query
        );
        let response = self
            .client
            .get(&url)
            .timeout(timeout)
            .send()
            .map_err(classify_error)?;
        let status = response.status().as_u16();
        let body = response.text().map_err(classify_error)?;
        Ok(TransportResponse { status, body })
    }
}

fn classify_error(err: reqwest::Error) -> TransportError {
    if err.is_timeout() {
        TransportError::Timeout
    } else if err.is_connect() {
        TransportError::Connect(err.to_string())
    } else {
        TransportError::Other(err.to_string())
    }
}
