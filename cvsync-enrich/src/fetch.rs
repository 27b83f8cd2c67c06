//! Network fetcher
//!
//! Probes never touch `reqwest` directly; they build a [`FetchRequest`] and
//! hand it to a [`Fetcher`] through the probe context, which applies the
//! concurrency slot, rate gate and per-request timeout. Tests substitute a
//! mock fetcher.

use crate::error::ProbeError;
use async_trait::async_trait;
use std::time::Duration;
use tracing::debug;

const USER_AGENT: &str = "cvsync/0.1 (cultivar dataset maintenance)";

/// Fallback client-level timeout; per-request deadlines are enforced by the
/// probe context and are normally shorter.
const CLIENT_TIMEOUT_SECS: u64 = 60;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchMethod {
    Get,
    Head,
    /// POST with an `application/x-www-form-urlencoded` body
    PostForm,
}

/// One HTTP request issued by a probe
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchRequest {
    pub method: FetchMethod,
    pub url: String,
    pub form: Vec<(String, String)>,
    pub headers: Vec<(String, String)>,
}

impl FetchRequest {
    pub fn get(url: impl Into<String>) -> Self {
        Self::new(FetchMethod::Get, url)
    }

    pub fn head(url: impl Into<String>) -> Self {
        Self::new(FetchMethod::Head, url)
    }

    pub fn post_form(url: impl Into<String>, form: Vec<(String, String)>) -> Self {
        let mut request = Self::new(FetchMethod::PostForm, url);
        request.form = form;
        request
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    fn new(method: FetchMethod, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            form: Vec::new(),
            headers: Vec::new(),
        }
    }
}

/// Status and body of a completed request (any status code)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchResponse {
    pub status: u16,
    pub body: String,
}

impl FetchResponse {
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Non-2xx status as an error, otherwise the response itself
    pub fn require_success(self) -> Result<Self, ProbeError> {
        if self.is_success() {
            Ok(self)
        } else {
            Err(ProbeError::HttpStatus(self.status))
        }
    }

    /// Decode the body as JSON
    pub fn json<T: serde::de::DeserializeOwned>(&self) -> Result<T, ProbeError> {
        serde_json::from_str(&self.body).map_err(|e| ProbeError::Parse(e.to_string()))
    }
}

/// Performs HTTP requests
///
/// Returns `Ok` for every response that arrived, whatever its status code.
/// `Err` is reserved for requests that produced no response.
#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self, request: &FetchRequest) -> Result<FetchResponse, ProbeError>;
}

/// Fetcher backed by a shared `reqwest::Client`
pub struct ReqwestFetcher {
    http_client: reqwest::Client,
}

impl ReqwestFetcher {
    pub fn new() -> Result<Self, ProbeError> {
        let http_client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(Duration::from_secs(CLIENT_TIMEOUT_SECS))
            .build()
            .map_err(|e| ProbeError::Transport(e.to_string()))?;

        Ok(Self { http_client })
    }
}

#[async_trait]
impl Fetcher for ReqwestFetcher {
    async fn fetch(&self, request: &FetchRequest) -> Result<FetchResponse, ProbeError> {
        let mut builder = match request.method {
            FetchMethod::Get => self.http_client.get(&request.url),
            FetchMethod::Head => self.http_client.head(&request.url),
            FetchMethod::PostForm => self.http_client.post(&request.url).form(&request.form),
        };
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }

        debug!(method = ?request.method, url = %request.url, "Sending request");

        let response = builder.send().await.map_err(map_reqwest_error)?;
        let status = response.status().as_u16();

        let body = if request.method == FetchMethod::Head {
            String::new()
        } else {
            response.text().await.map_err(map_reqwest_error)?
        };

        Ok(FetchResponse { status, body })
    }
}

fn map_reqwest_error(err: reqwest::Error) -> ProbeError {
    if err.is_timeout() {
        ProbeError::Timeout
    } else {
        ProbeError::Transport(err.to_string())
    }
}
