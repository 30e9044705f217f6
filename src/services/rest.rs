//! HTTP client used by request executables

use async_trait::async_trait;
use reqwest::Method;
use std::collections::HashMap;
use std::time::Duration;

use crate::error::RunnerError;
use crate::types::HttpMethod;

#[derive(Debug, Clone)]
pub struct Request {
    pub url: String,
    pub method: HttpMethod,
    pub body: String,
    pub headers: HashMap<String, String>,
    pub timeout: Duration,
}

#[derive(Debug, Clone, Default)]
pub struct Response {
    pub status: u16,
    pub headers: HashMap<String, String>,
    pub body: String,
}

#[async_trait]
pub trait RestClient: Send + Sync {
    /// Send `request`, failing when the status is not accepted.
    async fn send_request(
        &self,
        request: &Request,
        valid_status_codes: &[u16],
    ) -> Result<Response, RunnerError>;
}

/// Empty `valid` accepts any 2xx status.
pub fn status_accepted(status: u16, valid: &[u16]) -> bool {
    if valid.is_empty() {
        (200..300).contains(&status)
    } else {
        valid.contains(&status)
    }
}

#[derive(Debug, Clone, Default)]
pub struct HttpRestClient {
    client: reqwest::Client,
}

impl HttpRestClient {
    pub fn new() -> Self {
        Self::default()
    }
}

fn to_method(method: HttpMethod) -> Method {
    match method {
        HttpMethod::Get => Method::GET,
        HttpMethod::Post => Method::POST,
        HttpMethod::Put => Method::PUT,
        HttpMethod::Patch => Method::PATCH,
        HttpMethod::Delete => Method::DELETE,
    }
}

#[async_trait]
impl RestClient for HttpRestClient {
    async fn send_request(
        &self,
        request: &Request,
        valid_status_codes: &[u16],
    ) -> Result<Response, RunnerError> {
        let mut builder = self
            .client
            .request(to_method(request.method), &request.url)
            .timeout(request.timeout);
        for (key, value) in &request.headers {
            builder = builder.header(key, value);
        }
        if !request.body.is_empty() {
            builder = builder.body(request.body.clone());
        }

        let response = builder.send().await?;
        let status = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .filter_map(|(k, v)| v.to_str().ok().map(|v| (k.to_string(), v.to_string())))
            .collect();
        let body = response.text().await?;

        if !status_accepted(status, valid_status_codes) {
            return Err(RunnerError::UnexpectedStatus { status, body });
        }

        Ok(Response {
            status,
            headers,
            body,
        })
    }
}
