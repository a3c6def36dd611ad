use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT_LANGUAGE, USER_AGENT};
use tracing::{debug, warn};

use crate::config::Settings;
use crate::error::FetchError;

/// Anything that can turn a URL into page content.
#[async_trait]
pub trait PageSource: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<String, FetchError>;
}

pub struct HttpFetcher {
    client: reqwest::Client,
    max_retries: u32,
    base_backoff: Duration,
}

impl HttpFetcher {
    pub fn new(settings: &Settings) -> anyhow::Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(USER_AGENT, HeaderValue::from_str(&settings.user_agent)?);
        headers.insert(ACCEPT_LANGUAGE, HeaderValue::from_static("pl,en;q=0.8"));

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(settings.timeout())
            .build()?;

        Ok(HttpFetcher {
            client,
            max_retries: settings.max_retries,
            base_backoff: Duration::from_millis(settings.base_backoff_ms),
        })
    }

    async fn fetch_once(&self, url: &str) -> Result<String, FetchError> {
        let response = self.client.get(url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }
        Ok(response.text().await?)
    }
}

#[async_trait]
impl PageSource for HttpFetcher {
    async fn fetch(&self, url: &str) -> Result<String, FetchError> {
        with_retry(url, self.max_retries, self.base_backoff, || self.fetch_once(url)).await
    }
}

/// Run `attempt` until it succeeds, fails with a stable error, or `max_retries`
/// extra attempts are spent. Backoff doubles each time.
pub async fn with_retry<F, Fut>(
    url: &str,
    max_retries: u32,
    base_backoff: Duration,
    mut attempt: F,
) -> Result<String, FetchError>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<String, FetchError>>,
{
    let mut tries = 0u32;
    loop {
        match attempt().await {
            Ok(body) => {
                debug!("Fetched {} ({} bytes)", url, body.len());
                return Ok(body);
            }
            Err(e) if e.is_transient() && tries < max_retries => {
                let backoff = base_backoff.saturating_mul(2u32.saturating_pow(tries));
                tries += 1;
                warn!(
                    "{} (attempt {}/{}), backing off {:.1}s",
                    e,
                    tries,
                    max_retries,
                    backoff.as_secs_f64()
                );
                tokio::time::sleep(backoff).await;
            }
            Err(e) => return Err(e),
        }
    }
}
