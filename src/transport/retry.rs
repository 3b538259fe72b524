use crate::config::RequestContext;
use crate::config::TransportConfig;
use crate::transport::remote_request_id;
use crate::transport::HttpClient;
use crate::transport::HttpRequest;
use crate::transport::Method;
use crate::transport::RemoteError;
use crate::transport::RemoteErrorKind;
use crate::transport::RemoteResponse;
use crate::transport::RequestBody;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;
use tracing::warn;

type Sleeper = Box<dyn Fn(Duration) + Send + Sync>;

/// Call wrapper adding bounded retries to an [`HttpClient`].
///
/// Holds no mutable state, so one instance can serve concurrent operations.
pub struct RetryingTransport {
    client: Arc<dyn HttpClient>,
    config: TransportConfig,
    sleep: Sleeper,
}

impl RetryingTransport {
    pub fn new(client: Arc<dyn HttpClient>, config: TransportConfig) -> Self {
        RetryingTransport { client, config, sleep: Box::new(std::thread::sleep) }
    }

    /// Replaces the blocking sleep between attempts.
    pub fn with_sleeper(mut self, sleep: impl Fn(Duration) + Send + Sync + 'static) -> Self {
        self.sleep = Box::new(sleep);
        self
    }

    pub fn config(&self) -> &TransportConfig {
        &self.config
    }

    /// Sends a request until its status is in `expected`.
    ///
    /// Network failures and retryable statuses share one attempt budget; a
    /// numeric `Retry-After` header overrides the linear backoff. Any other
    /// status fails at once as [`RemoteErrorKind::Rejected`].
    pub fn execute(
        &self,
        context: &RequestContext,
        method: Method,
        url: &str,
        expected: &[u16],
        body: Option<RequestBody>,
    ) -> Result<RemoteResponse, RemoteError> {
        let mut headers = vec![
            ("Authorization".to_owned(), format!("Bearer {}", context.bearer_token)),
            ("client-request-id".to_owned(), context.correlation_id.to_owned()),
        ];
        if matches!(body, Some(RequestBody::Bytes(_))) {
            headers.push(("Content-Type".to_owned(), "application/octet-stream".to_owned()));
        }
        let request = HttpRequest { method, url: url.to_owned(), headers, body };

        let max_attempts = self.config.max_attempts.max(1);
        let mut last_response_error = None::<RemoteError>;
        let mut last_network_error = None::<RemoteError>;
        for attempt in 1..=max_attempts {
            debug!(%method, url, attempt, correlation_id = %context.correlation_id, "Remote call");
            let delay = match self.client.send(&request) {
                Ok(response) if expected.contains(&response.status) => {
                    return Ok(RemoteResponse {
                        status: response.status,
                        request_id: remote_request_id(&response),
                        body: response.body,
                    });
                }
                Ok(response) if self.config.is_retryable(response.status) => {
                    let delay = retry_after(response.header("retry-after"))
                        .map(|delay| delay.min(self.config.max_retry_after()))
                        .unwrap_or_else(|| self.config.backoff(attempt));
                    warn!(%method, url, attempt, status = response.status, delay_ms = delay.as_millis() as u64, "Retryable status");
                    last_response_error = Some(RemoteError::from_response(RemoteErrorKind::Transient, &response, attempt));
                    delay
                }
                Ok(response) => {
                    let error = RemoteError::from_response(RemoteErrorKind::Rejected, &response, attempt);
                    warn!(%method, url, status = response.status, request_id = ?error.request_id, "Remote call rejected");
                    return Err(error);
                }
                Err(error) => {
                    let delay = self.config.backoff(attempt);
                    warn!(%method, url, attempt, error = %error, delay_ms = delay.as_millis() as u64, "Network failure");
                    let mut network_error = RemoteError::new(RemoteErrorKind::Network, None, &error.to_string());
                    network_error.attempts = attempt;
                    last_network_error = Some(network_error);
                    delay
                }
            };
            if attempt < max_attempts {
                (self.sleep)(delay);
            }
        }

        let mut error = last_response_error
            .or(last_network_error)
            .unwrap_or_else(|| RemoteError::new(RemoteErrorKind::Network, None, "no attempt was made"));
        error.attempts = max_attempts;
        warn!(%method, url, attempts = max_attempts, status = ?error.status, "Remote call gave up");
        Err(error)
    }
}

/// Parses a `Retry-After` value given in (possibly fractional) seconds.
fn retry_after(value: Option<&str>) -> Option<Duration> {
    let seconds = value?.trim().parse::<f64>().ok()?;
    Duration::try_from_secs_f64(seconds).ok()
}
