//! Shared blocking HTTP client for model services.

use std::sync::OnceLock;
use std::time::Duration;

use reqwest::blocking::Client;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::trace;

use crate::error::{ModelError, ModelResult};

/// Longest error body kept in an error message.
const MAX_ERROR_BODY: usize = 256;

/// One service endpoint with a lazily built, reusable connection pool.
///
/// The underlying client is created on first use, which happens on a
/// blocking worker thread, and is shared by every later request.
pub(crate) struct ServiceClient {
    endpoint: String,
    api_key: Option<String>,
    timeout: Duration,
    client: OnceLock<Client>,
}

impl ServiceClient {
    pub(crate) fn new(endpoint: &str, api_key_env: Option<&str>, timeout: Duration) -> Self {
        let api_key = api_key_env.and_then(|name| std::env::var(name).ok());
        Self {
            endpoint: endpoint.trim_end_matches('/').to_string(),
            api_key,
            timeout,
            client: OnceLock::new(),
        }
    }

    fn client(&self) -> ModelResult<&Client> {
        if let Some(client) = self.client.get() {
            return Ok(client);
        }
        let built = Client::builder()
            .timeout(self.timeout)
            .build()
            .map_err(|e| self.http_error(&self.endpoint, None, e.to_string()))?;
        // A concurrent caller may have won the race; either client is fine.
        let _ = self.client.set(built);
        self.client
            .get()
            .ok_or_else(|| self.http_error(&self.endpoint, None, "client unavailable".to_string()))
    }

    fn http_error(&self, url: &str, status: Option<u16>, message: String) -> ModelError {
        ModelError::Http {
            endpoint: url.to_string(),
            status,
            message,
        }
    }

    /// POST a JSON body to `{endpoint}/{path}` and decode the JSON answer.
    pub(crate) fn post_json<B, R>(&self, path: &str, body: &B) -> ModelResult<R>
    where
        B: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        let url = format!("{}/{}", self.endpoint, path.trim_start_matches('/'));
        trace!("POST {}", url);

        let mut request = self.client()?.post(&url).json(body);
        if let Some(ref key) = self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().map_err(|e| {
            self.http_error(&url, e.status().map(|s| s.as_u16()), e.to_string())
        })?;

        let status = response.status();
        if !status.is_success() {
            let mut text = response.text().unwrap_or_default();
            if text.len() > MAX_ERROR_BODY {
                let mut cut = MAX_ERROR_BODY;
                while !text.is_char_boundary(cut) {
                    cut -= 1;
                }
                text.truncate(cut);
            }
            return Err(self.http_error(&url, Some(status.as_u16()), text));
        }

        response.json::<R>().map_err(|e| {
            self.http_error(
                &url,
                Some(status.as_u16()),
                format!("Failed to decode response: {}", e),
            )
        })
    }
}

impl std::fmt::Debug for ServiceClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceClient")
            .field("endpoint", &self.endpoint)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl Drop for ServiceClient {
    fn drop(&mut self) {
        // The blocking client owns a runtime that panics if dropped on an async worker.
        if let Some(client) = self.client.take() {
            std::thread::spawn(move || drop(client));
        }
    }
}
