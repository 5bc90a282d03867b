// TzKT client - paginated delegation feed with rate limiting and retry logic
use crate::constants;
use crate::delegation::DelegationResponse;
use crate::error::FetchError;
use async_trait::async_trait;
use std::time::Duration;

/// Paginated source of delegation operations
///
/// `fetch` returns at most `limit` operations strictly newer than `after`.
/// Callers must not rely on the order of the returned page.
#[async_trait]
pub trait DelegationFeed: Send + Sync {
    async fn fetch(&self, after: &str, limit: usize) -> Result<Vec<DelegationResponse>, FetchError>;
}

/// HTTP client for the TzKT delegations endpoint
pub struct TzktClient {
    client: reqwest::Client,
    base_url: String,
    rate_limiter: RateLimiter,
    max_retries: usize,
}

impl TzktClient {
    pub fn new(base_url: impl Into<String>) -> Result<Self, FetchError> {
        Ok(Self {
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(constants::HTTP_TIMEOUT_SECS))
                .user_agent(constants::user_agent())
                .build()?,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            rate_limiter: RateLimiter::new(constants::DEFAULT_RATE_LIMIT, Duration::from_secs(60)),
            max_retries: constants::FETCH_MAX_RETRIES,
        })
    }

    pub fn with_max_retries(mut self, max_retries: usize) -> Self {
        self.max_retries = max_retries.max(1);
        self
    }

    /// Replace the default budget of `DEFAULT_RATE_LIMIT` requests per minute
    pub fn with_rate_limit(mut self, requests: usize, period: Duration) -> Self {
        self.rate_limiter = RateLimiter::new(requests, period);
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn fetch_with_retry(
        &self,
        after: &str,
        limit: usize,
    ) -> Result<Vec<DelegationResponse>, FetchError> {
        let mut backoff = Duration::from_secs(1);
        let mut last_err = None;

        for attempt in 1..=self.max_retries {
            self.rate_limiter.wait().await;

            match self.do_fetch(after, limit).await {
                Ok(delegations) => return Ok(delegations),
                Err((err, retry_after)) => {
                    // Decode failures will not fix themselves on retry
                    if matches!(err, FetchError::Decode(_)) {
                        return Err(err);
                    }

                    if attempt < self.max_retries {
                        let wait = retry_after.unwrap_or(backoff);
                        log::warn!(
                            "[Tzkt] Request failed (attempt {}/{}): {}, retrying in {:?}",
                            attempt,
                            self.max_retries,
                            err,
                            wait
                        );
                        tokio::time::sleep(wait).await;
                        backoff *= 2;
                    }
                    last_err = Some(err);
                }
            }
        }

        Err(FetchError::Exhausted {
            attempts: self.max_retries,
            last: Box::new(last_err.unwrap_or(FetchError::Transport("no attempt made".into()))),
        })
    }

    async fn do_fetch(
        &self,
        after: &str,
        limit: usize,
    ) -> Result<Vec<DelegationResponse>, (FetchError, Option<Duration>)> {
        let url = format!("{}{}", self.base_url, constants::DELEGATIONS_ENDPOINT);
        log::debug!("[Tzkt] GET {} timestamp.gt={} limit={}", url, after, limit);

        let response = self
            .client
            .get(&url)
            .query(&[("timestamp.gt", after), ("limit", &limit.to_string())])
            .send()
            .await
            .map_err(|e| (FetchError::from(e), None))?;

        if response.status() == reqwest::StatusCode::TOO_MANY_REQUESTS {
            let retry_after = parse_retry_after(&response);
            return Err((FetchError::RateLimited, Some(retry_after)));
        }

        if !response.status().is_success() {
            return Err((FetchError::Status(response.status().as_u16()), None));
        }

        let body = response
            .text()
            .await
            .map_err(|e| (FetchError::from(e), None))?;

        sonic_rs::from_str::<Vec<DelegationResponse>>(&body)
            .map_err(|e| (FetchError::Decode(e.to_string()), None))
    }
}

#[async_trait]
impl DelegationFeed for TzktClient {
    async fn fetch(&self, after: &str, limit: usize) -> Result<Vec<DelegationResponse>, FetchError> {
        self.fetch_with_retry(after, limit).await
    }
}

/// Parse the Retry-After header from a response
/// Returns the duration to wait before retrying, capped at MAX_RETRY_AFTER_SECS
fn parse_retry_after(response: &reqwest::Response) -> Duration {
    response
        .headers()
        .get(reqwest::header::RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .map(retry_after_from_str)
        .unwrap_or(Duration::from_secs(constants::MAX_RETRY_AFTER_SECS))
}

fn retry_after_from_str(value: &str) -> Duration {
    let cap = Duration::from_secs(constants::MAX_RETRY_AFTER_SECS);

    // Seconds (most common format)
    if let Ok(seconds) = value.trim().parse::<u64>() {
        return Duration::from_secs(seconds).min(cap);
    }

    // HTTP date (RFC 7231)
    if let Ok(http_time) = httpdate::parse_http_date(value)
        && let Ok(duration) = http_time.duration_since(std::time::SystemTime::now())
    {
        return duration.min(cap);
    }

    cap
}

/// Simple token bucket rate limiter
/// Starts with one permit and refills at a steady rate up to the bucket size
struct RateLimiter {
    semaphore: std::sync::Arc<tokio::sync::Semaphore>,
}

impl RateLimiter {
    fn new(requests_per_period: usize, period: Duration) -> Self {
        let semaphore = std::sync::Arc::new(tokio::sync::Semaphore::new(1));
        let refill = std::sync::Arc::downgrade(&semaphore);
        let refill_rate = period / requests_per_period.max(1) as u32;

        // The refill task ends once the limiter is dropped
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(refill_rate).await;
                let Some(sem) = refill.upgrade() else {
                    break;
                };
                if sem.available_permits() < requests_per_period {
                    sem.add_permits(1);
                }
            }
        });

        Self { semaphore }
    }

    async fn wait(&self) {
        if let Ok(permit) = self.semaphore.acquire().await {
            permit.forget();
        }
    }
}
