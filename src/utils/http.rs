//! Blocking HTTP client with retries
//!
//! Wraps a `reqwest` blocking client configured from [`EndpointConfig`]:
//! - Request and connect timeouts
//! - Automatic retries with exponential backoff on transport errors,
//!   HTTP 429 and 5xx responses
//!
//! Retries only ever repeat idempotent reads or remote-signer calls over the
//! same payload; signing itself is never retried with new nonce material.

use reqwest::blocking::{Client, RequestBuilder, Response};
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use std::thread;
use std::time::Duration;

use crate::config::EndpointConfig;
use crate::error::{TxError, TxResult};

const USER_AGENT: &str = concat!("tx-builder/", env!("CARGO_PKG_VERSION"));

/// HTTP client with retry policy
#[derive(Debug, Clone)]
pub struct HttpClient {
    client: Client,
    max_retries: u32,
    backoff: Duration,
}

impl HttpClient {
    pub fn new(config: &EndpointConfig) -> TxResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .connect_timeout(Duration::from_secs(config.request_timeout_secs.min(10)))
            .pool_idle_timeout(Duration::from_secs(90))
            .pool_max_idle_per_host(5)
            .tcp_nodelay(true)
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| TxError::network(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            max_retries: config.max_retries,
            backoff: Duration::from_millis(config.retry_backoff_ms),
        })
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    /// GET and decode a JSON body
    pub fn get_json<T: DeserializeOwned>(&self, url: &str) -> TxResult<T> {
        let response = self.send_with_retry(url, || self.client.get(url))?;
        Ok(response.json()?)
    }

    /// GET a plain-text body
    pub fn get_text(&self, url: &str) -> TxResult<String> {
        let response = self.send_with_retry(url, || self.client.get(url))?;
        Ok(response.text()?)
    }

    /// POST a JSON body and decode the JSON reply
    pub fn post_json<B: serde::Serialize, T: DeserializeOwned>(
        &self,
        url: &str,
        body: &B,
    ) -> TxResult<T> {
        let response = self.send_with_retry(url, || self.client.post(url).json(body))?;
        Ok(response.json()?)
    }

    /// POST a JSON body with a bearer token
    pub fn post_json_with_token<B: serde::Serialize, T: DeserializeOwned>(
        &self,
        url: &str,
        body: &B,
        token: &str,
    ) -> TxResult<T> {
        let response =
            self.send_with_retry(url, || self.client.post(url).bearer_auth(token).json(body))?;
        Ok(response.json()?)
    }

    fn send_with_retry<F>(&self, url: &str, build: F) -> TxResult<Response>
    where
        F: Fn() -> RequestBuilder,
    {
        let mut attempt = 0u32;
        loop {
            let outcome = build().send();
            let retryable = match &outcome {
                Ok(resp) => is_retryable_status(resp.status()),
                Err(e) => e.is_timeout() || e.is_connect(),
            };

            if !retryable || attempt >= self.max_retries {
                return match outcome {
                    Ok(resp) if resp.status().is_success() => Ok(resp),
                    Ok(resp) => Err(TxError::network(format!(
                        "HTTP {} from {}",
                        resp.status().as_u16(),
                        extract_domain(url)
                    ))),
                    Err(e) => Err(TxError::from(e).with_details(extract_domain(url))),
                };
            }

            let delay = backoff_delay(self.backoff, attempt);
            crate::log_debug!(
                "http",
                "Retrying request",
                host = extract_domain(url),
                attempt = attempt + 1,
                delay_ms = delay.as_millis()
            );
            thread::sleep(delay);
            attempt += 1;
        }
    }
}

fn is_retryable_status(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
}

/// base · 2^attempt, capped at 32× base
pub fn backoff_delay(base: Duration, attempt: u32) -> Duration {
    base.saturating_mul(1u32 << attempt.min(5))
}

/// Host part of a URL, used in logs and error details
pub fn extract_domain(url: &str) -> String {
    match url::Url::parse(url) {
        Ok(parsed) => match (parsed.host_str(), parsed.port()) {
            (Some(host), Some(port)) => format!("{}:{}", host, port),
            (Some(host), None) => host.to_string(),
            _ => url.to_string(),
        },
        Err(_) => url.to_string(),
    }
}
