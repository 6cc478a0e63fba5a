use std::{thread, time::Duration};

use reqwest::blocking::Client;
use tracing::debug;

use crate::config::Settings;
use crate::error::FetchError;

/// Anything that can turn a URL into a response body. Fetch strategies only
/// talk to this, so tests can serve fixtures instead of the network.
pub trait PageFetcher: Send + Sync {
    fn get(&self, url: &str) -> Result<String, FetchError>;
}

/// Blocking HTTP client with a per-request timeout and bounded retries.
pub struct HttpClient {
    client: Client,
    max_attempts: u32,
    backoff: Duration,
}

impl HttpClient {
    pub fn from_settings(settings: &Settings) -> Result<Self, FetchError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(settings.request_timeout_secs))
            .user_agent(settings.user_agent.clone())
            .build()
            .map_err(|err| FetchError::Http(err.to_string()))?;
        Ok(Self {
            client,
            max_attempts: settings.max_attempts.max(1),
            backoff: Duration::from_millis(settings.retry_backoff_ms),
        })
    }

    fn attempt(&self, url: &str) -> Result<String, (FetchError, bool)> {
        let response = self.client.get(url).send().map_err(|err| {
            let retry = err.is_timeout() || err.is_connect() || err.is_request();
            (FetchError::Http(format!("request failed for {url}: {err}")), retry)
        })?;

        let status = response.status();
        if !status.is_success() {
            return Err((
                FetchError::Status {
                    url: url.to_string(),
                    status: status.as_u16(),
                },
                status.is_server_error(),
            ));
        }

        response.text().map_err(|err| {
            (
                FetchError::Http(format!("unable to read response body for {url}: {err}")),
                true,
            )
        })
    }
}

impl PageFetcher for HttpClient {
    fn get(&self, url: &str) -> Result<String, FetchError> {
        let mut attempt = 1;
        loop {
            debug!(attempt, %url, "sending request");
            match self.attempt(url) {
                Ok(body) => return Ok(body),
                Err((err, retry)) if retry && attempt < self.max_attempts => {
                    debug!(attempt, %url, error = %err, "request failed, retrying");
                    thread::sleep(self.backoff * attempt);
                    attempt += 1;
                }
                Err((err, _)) => return Err(err),
            }
        }
    }
}
