use crate::config::ScraperConfig;
use crate::error::FetchError;
use anyhow::{Context, Result};
use rand::Rng;
use std::time::Duration;
use tokio::time::sleep;
use tracing::debug;

/// Thin reqwest wrapper: one attempt per call, failures come back typed.
pub struct HttpClient {
    inner: reqwest::Client,
    config: ScraperConfig,
}

impl HttpClient {
    pub fn new(config: &ScraperConfig) -> Result<Self> {
        let inner = reqwest::Client::builder()
            .user_agent(&config.user_agent)
            .timeout(config.timeout())
            .gzip(true)
            // Some listing sites set a session cookie on the first hit
            .cookie_store(true)
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            inner,
            config: config.clone(),
        })
    }

    /// Fetch a URL as text. No retries; the caller decides what a failure means.
    pub async fn get_text(&self, url: &str) -> Result<String, FetchError> {
        self.polite_delay().await;
        debug!("GET {}", url);

        let resp = self
            .inner
            .get(url)
            .header("Accept", "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8")
            .header("Accept-Language", "en-US,en;q=0.5")
            .send()
            .await
            .map_err(|e| self.classify_error(url, e))?;

        let status = resp.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        resp.text().await.map_err(|e| {
            if e.is_timeout() {
                self.timeout_error(url)
            } else {
                FetchError::Body {
                    url: url.to_string(),
                    reason: e.to_string(),
                }
            }
        })
    }

    /// POST a JSON body with extra headers and decode the JSON reply.
    pub async fn post_json(
        &self,
        url: &str,
        headers: &[(&str, &str)],
        body: &serde_json::Value,
    ) -> Result<serde_json::Value, FetchError> {
        let mut req = self.inner.post(url).json(body);
        for (name, value) in headers {
            req = req.header(*name, *value);
        }

        let resp = req.send().await.map_err(|e| self.classify_error(url, e))?;
        let status = resp.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        resp.json().await.map_err(|e| FetchError::Body {
            url: url.to_string(),
            reason: e.to_string(),
        })
    }

    fn classify_error(&self, url: &str, e: reqwest::Error) -> FetchError {
        if e.is_timeout() {
            self.timeout_error(url)
        } else {
            FetchError::Network {
                url: url.to_string(),
                reason: e.to_string(),
            }
        }
    }

    fn timeout_error(&self, url: &str) -> FetchError {
        FetchError::Timeout {
            url: url.to_string(),
            timeout: self.config.timeout(),
        }
    }

    /// Sleep for the configured delay + random jitter.
    async fn polite_delay(&self) {
        let total = {
            let jitter = if self.config.jitter_ms > 0 {
                rand::rng().random_range(0..=self.config.jitter_ms)
            } else {
                0
            };
            self.config.request_delay_ms + jitter
        };
        if total > 0 {
            sleep(Duration::from_millis(total)).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn quiet_config() -> ScraperConfig {
        ScraperConfig {
            timeout_secs: 2,
            request_delay_ms: 0,
            jitter_ms: 0,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn refused_connection_is_a_network_error() {
        let client = HttpClient::new(&quiet_config()).unwrap();
        let err = client.get_text("http://127.0.0.1:9/").await.unwrap_err();
        assert!(matches!(err, FetchError::Network { .. }), "{:?}", err);
        assert!(!err.is_timeout());
    }
}
