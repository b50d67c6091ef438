//! HTTP fetcher with bounded retry for client-status responses.
//!
//! Documentation hosts regularly answer 403/429 (and sometimes 404) during
//! traffic spikes and recover seconds later, so 4xx statuses are retried
//! with exponential backoff. Server errors and transport failures are
//! treated as non-retriable and surface immediately.

use async_trait::async_trait;
use reqwest::redirect;
use std::time::Duration;
use tracing::{debug, warn};

use crate::error::{DocdexError, Result};
use crate::fetcher::{parse_content_type, FetchOptions, Fetcher};
use crate::models::RawContent;

const USER_AGENT: &str = concat!("docdex/", env!("CARGO_PKG_VERSION"));
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

pub struct HttpFetcher {
    /// Client following up to 10 redirects.
    following: reqwest::Client,
    /// Client that never follows redirects.
    direct: reqwest::Client,
}

impl HttpFetcher {
    pub fn new() -> Result<Self> {
        let builder = || {
            reqwest::Client::builder()
                .user_agent(USER_AGENT)
                .timeout(REQUEST_TIMEOUT)
                .gzip(true)
        };
        let following = builder()
            .redirect(redirect::Policy::limited(10))
            .build()
            .map_err(|e| DocdexError::Other(format!("http client: {e}")))?;
        let direct = builder()
            .redirect(redirect::Policy::none())
            .build()
            .map_err(|e| DocdexError::Other(format!("http client: {e}")))?;
        Ok(Self { following, direct })
    }

    fn client(&self, follow_redirects: bool) -> &reqwest::Client {
        if follow_redirects {
            &self.following
        } else {
            &self.direct
        }
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    fn can_fetch(&self, url: &str) -> bool {
        url.starts_with("http://") || url.starts_with("https://")
    }

    async fn fetch(&self, url: &str, options: &FetchOptions) -> Result<RawContent> {
        options.validate()?;
        let client = self.client(options.follow_redirects);

        let mut last_status = 0u16;
        let mut attempts = 0u32;
        for attempt in 0..options.max_retries {
            if options.signal.is_cancelled() {
                return Err(DocdexError::Cancelled);
            }
            if attempt > 0 {
                let delay = Duration::from_millis(options.base_delay_ms << (attempt - 1).min(16));
                debug!(url, attempt, delay_ms = delay.as_millis() as u64, "retrying fetch");
                tokio::time::sleep(delay).await;
                if options.signal.is_cancelled() {
                    return Err(DocdexError::Cancelled);
                }
            }
            attempts = attempt + 1;

            let mut request = client.get(url);
            for (name, value) in &options.headers {
                request = request.header(name, value);
            }

            let response = match request.send().await {
                Ok(response) => response,
                Err(e) => {
                    return Err(DocdexError::FetchTransport {
                        url: url.to_string(),
                        reason: e.to_string(),
                    })
                }
            };
            let status = response.status();

            if status.is_success() {
                let (mime_type, charset) = response
                    .headers()
                    .get(reqwest::header::CONTENT_TYPE)
                    .and_then(|v| v.to_str().ok())
                    .map(parse_content_type)
                    .unwrap_or_else(|| ("text/html".to_string(), None));
                let final_url = response.url().to_string();
                let content = response
                    .bytes()
                    .await
                    .map_err(|e| DocdexError::FetchTransport {
                        url: url.to_string(),
                        reason: e.to_string(),
                    })?
                    .to_vec();
                debug!(url, bytes = content.len(), mime = %mime_type, "fetched");
                return Ok(RawContent {
                    content,
                    mime_type,
                    charset,
                    source_url: final_url,
                });
            }

            if status.is_client_error() {
                last_status = status.as_u16();
                warn!(url, status = last_status, attempt, "client error, will retry");
                continue;
            }

            // 5xx and everything else: not retriable.
            return Err(DocdexError::FetchTransport {
                url: url.to_string(),
                reason: format!("server returned status {status}"),
            });
        }

        Err(DocdexError::FetchStatus {
            url: url.to_string(),
            status: last_status,
            attempts,
        })
    }
}
