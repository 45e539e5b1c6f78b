//! Real-time web search used to ground poll prompts.

use std::time::Duration;

use async_trait::async_trait;
use driftwatch_core::GatewayError;
use parking_lot::Mutex;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use crate::http;

const TAVILY_BASE_URL: &str = "https://api.tavily.com";

/// One ranked search result.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    pub title: String,
    pub url: String,
    pub content: String,
    pub score: f64,
    #[serde(default)]
    pub published_date: Option<String>,
}

#[async_trait]
pub trait SearchGrounding: Send + Sync {
    async fn search(&self, query: &str, max_results: u32) -> Result<Vec<SearchHit>, GatewayError>;
}

/// Tavily search client.
pub struct TavilySearch {
    client: Client,
    api_key: SecretString,
    search_depth: String,
    base_url: String,
}

#[derive(Serialize)]
struct TavilyRequest<'a> {
    query: &'a str,
    search_depth: &'a str,
    max_results: u32,
    include_raw_content: bool,
}

#[derive(Deserialize)]
struct TavilyResponse {
    #[serde(default)]
    results: Vec<SearchHit>,
}

impl TavilySearch {
    pub fn new(api_key: SecretString, search_depth: &str) -> Self {
        Self {
            client: http::client(),
            api_key,
            search_depth: search_depth.to_string(),
            base_url: TAVILY_BASE_URL.to_string(),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }
}

#[async_trait]
impl SearchGrounding for TavilySearch {
    #[instrument(skip(self), fields(depth = %self.search_depth))]
    async fn search(&self, query: &str, max_results: u32) -> Result<Vec<SearchHit>, GatewayError> {
        let req = self
            .client
            .post(http::join(&self.base_url, "/search"))
            .bearer_auth(self.api_key.expose_secret())
            .json(&TavilyRequest {
                query,
                search_depth: &self.search_depth,
                max_results,
                include_raw_content: false,
            });
        let resp: TavilyResponse = http::send_json(req).await?;
        debug!(count = resp.results.len(), "search results received");
        Ok(resp.results)
    }
}

/// Canned search results for tests.
pub struct MockSearch {
    result: Result<Vec<SearchHit>, GatewayError>,
    delay: Option<Duration>,
    queries: Mutex<Vec<String>>,
}

impl MockSearch {
    pub fn with_hits(hits: Vec<SearchHit>) -> Self {
        Self {
            result: Ok(hits),
            delay: None,
            queries: Mutex::new(Vec::new()),
        }
    }

    pub fn failing(error: GatewayError) -> Self {
        Self {
            result: Err(error),
            delay: None,
            queries: Mutex::new(Vec::new()),
        }
    }

    /// Sleep this long before answering.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn queries(&self) -> Vec<String> {
        self.queries.lock().clone()
    }
}

#[async_trait]
impl SearchGrounding for MockSearch {
    async fn search(&self, query: &str, max_results: u32) -> Result<Vec<SearchHit>, GatewayError> {
        self.queries.lock().push(query.to_string());
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.result
            .clone()
            .map(|hits| hits.into_iter().take(max_results as usize).collect())
    }
}
