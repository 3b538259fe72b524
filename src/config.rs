use serde::Deserialize;
use serde::Serialize;
use std::time::Duration;

/// Settings of the retrying transport and the remote workbook service.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    /// Upper bound on attempts per call, shared by network failures and retryable statuses.
    pub max_attempts: u32,
    /// Linear backoff unit: attempt `n` waits `n * base_delay_ms`.
    pub base_delay_ms: u64,
    pub request_timeout_secs: u64,
    /// Ceiling applied to a server-supplied `Retry-After`.
    pub max_retry_after_secs: u64,
    /// Statuses worth retrying: locked, throttled and transient gateway failures.
    pub retryable_statuses: Vec<u16>,
    pub graph_url: String,
}

impl Default for TransportConfig {
    fn default() -> Self {
        TransportConfig {
            max_attempts: 5,
            base_delay_ms: 500,
            request_timeout_secs: 60,
            max_retry_after_secs: 120,
            retryable_statuses: vec![423, 429, 502, 503, 504],
            graph_url: "https://graph.microsoft.com/v1.0".to_owned(),
        }
    }
}

impl TransportConfig {
    pub fn backoff(&self, attempt: u32) -> Duration {
        Duration::from_millis(self.base_delay_ms.saturating_mul(attempt as u64))
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn max_retry_after(&self) -> Duration {
        Duration::from_secs(self.max_retry_after_secs)
    }

    pub fn is_retryable(&self, status: u16) -> bool {
        self.retryable_statuses.contains(&status)
    }
}

/// Owner of a stored document: a shared drive or a user's personal drive.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "id", rename_all = "lowercase")]
pub enum LocationKind {
    Drive(String),
    User(String),
}

/// Where a stored document lives.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentLocation {
    pub kind: LocationKind,
    /// Path of the item relative to the drive root, e.g. `Facturas/2024/F-001.xlsx`.
    pub path: String,
}

impl DocumentLocation {
    pub fn drive(id: &str, path: &str) -> Self {
        DocumentLocation { kind: LocationKind::Drive(id.to_owned()), path: path.to_owned() }
    }

    pub fn user(id: &str, path: &str) -> Self {
        DocumentLocation { kind: LocationKind::User(id.to_owned()), path: path.to_owned() }
    }
}

/// Per-call credentials and tracing identity, passed explicitly into every remote call.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RequestContext {
    /// Opaque bearer token supplied by the caller's credential provider.
    pub bearer_token: String,
    /// Sent as `client-request-id` so remote logs can be joined with ours.
    pub correlation_id: String,
}

impl RequestContext {
    pub fn new(bearer_token: &str, correlation_id: &str) -> Self {
        RequestContext { bearer_token: bearer_token.to_owned(), correlation_id: correlation_id.to_owned() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_config_falls_back_to_defaults() {
        let config: TransportConfig = serde_json::from_str(r#"{"base_delay_ms": 10}"#).unwrap();
        assert_eq!(config.max_attempts, 5);
        assert_eq!(config.backoff(3), Duration::from_millis(30));
        assert!(config.is_retryable(423));
        assert!(!config.is_retryable(404));
        assert_eq!(config.max_retry_after(), Duration::from_secs(120));
    }

    #[test]
    fn location_kind_is_tagged() {
        let location: DocumentLocation = serde_json::from_str(
            r#"{"kind": {"type": "user", "id": "ana@example.com"}, "path": "Facturas/F-001.xlsx"}"#,
        ).unwrap();
        assert_eq!(location, DocumentLocation::user("ana@example.com", "Facturas/F-001.xlsx"));
    }
}
