//! # Remote Transport
//!
//! HTTP plumbing toward the remote workbook service. [`HttpClient`] is the
//! seam between the engine and the network; [`RetryingTransport`] wraps it
//! with bounded linear backoff and rate-limit compliance.

pub mod client;
pub mod retry;

pub use client::ReqwestHttpClient;
pub use retry::RetryingTransport;

use crate::error::SheetMarkerError;
use serde::de::DeserializeOwned;
use std::fmt::Display;
use thiserror::Error;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
    Put,
    Patch,
}

impl Display for Method {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Method::Get => write!(f, "GET"),
            Method::Post => write!(f, "POST"),
            Method::Put => write!(f, "PUT"),
            Method::Patch => write!(f, "PATCH"),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum RequestBody {
    Json(serde_json::Value),
    Bytes(Vec<u8>),
}

#[derive(Clone, Debug, PartialEq)]
pub struct HttpRequest {
    pub method: Method,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Option<RequestBody>,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct HttpResponse {
    pub status: u16,
    /// Header names are lowercase.
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl HttpResponse {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }
}

/// A failure before any response arrived: connection refused, DNS, timeout.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("{0}")]
pub struct NetworkError(pub String);

/// Sends one HTTP request. Implementations must be shareable across threads.
pub trait HttpClient: Send + Sync {
    fn send(&self, request: &HttpRequest) -> Result<HttpResponse, NetworkError>;
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum RemoteErrorKind {
    /// A retryable status (locked, throttled, gateway) outlived the attempt budget.
    Transient,
    /// Every attempt failed before a response arrived.
    Network,
    /// A non-retryable status; carries the remote request id.
    Rejected,
}

impl RemoteErrorKind {
    pub fn is_transient(&self) -> bool {
        matches!(self, RemoteErrorKind::Transient | RemoteErrorKind::Network)
    }
}

impl Display for RemoteErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RemoteErrorKind::Transient => write!(f, "Transient"),
            RemoteErrorKind::Network => write!(f, "Network"),
            RemoteErrorKind::Rejected => write!(f, "Rejected"),
        }
    }
}

/// Typed failure of a remote call.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("{kind} remote failure after {attempts} attempt(s): {message}")]
pub struct RemoteError {
    pub kind: RemoteErrorKind,
    pub status: Option<u16>,
    pub message: String,
    /// Remote service request id, for support correlation.
    pub request_id: Option<String>,
    pub body: String,
    pub attempts: u32,
}

impl RemoteError {
    pub fn new(kind: RemoteErrorKind, status: Option<u16>, message: &str) -> Self {
        RemoteError {
            kind,
            status,
            message: message.to_owned(),
            request_id: None,
            body: String::new(),
            attempts: 1,
        }
    }

    /// Classifies an unexpected response, extracting the service's
    /// `{"error": {"message": ..}}` text when present.
    pub(crate) fn from_response(kind: RemoteErrorKind, response: &HttpResponse, attempts: u32) -> Self {
        let body = String::from_utf8_lossy(&response.body).into_owned();
        let message = serde_json::from_slice::<serde_json::Value>(&response.body)
            .ok()
            .and_then(|json| json.pointer("/error/message").and_then(|message| message.as_str()).map(str::to_owned))
            .unwrap_or_else(|| format!("HTTP {}", response.status));
        RemoteError {
            kind,
            status: Some(response.status),
            message,
            request_id: remote_request_id(response),
            body,
            attempts,
        }
    }
}

/// A successful remote call.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct RemoteResponse {
    pub status: u16,
    pub body: Vec<u8>,
    pub request_id: Option<String>,
}

impl RemoteResponse {
    pub fn json<T: DeserializeOwned>(&self) -> Result<T, SheetMarkerError> {
        Ok(serde_json::from_slice(&self.body)?)
    }
}

pub(crate) fn remote_request_id(response: &HttpResponse) -> Option<String> {
    response.header("request-id").map(str::to_owned).or_else(|| {
        serde_json::from_slice::<serde_json::Value>(&response.body)
            .ok()
            .and_then(|json| json.pointer("/error/innerError/request-id").and_then(|id| id.as_str()).map(str::to_owned))
    })
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Replays canned responses in order and records every request.
    #[derive(Default)]
    pub(crate) struct ScriptedClient {
        responses: Mutex<VecDeque<Result<HttpResponse, NetworkError>>>,
        requests: Mutex<Vec<HttpRequest>>,
        /// Answers requests whose URL contains the key, ahead of the queue.
        routes: Mutex<Vec<(String, HttpResponse)>>,
    }

    impl ScriptedClient {
        pub(crate) fn push(&self, status: u16, body: &str) -> &Self {
            self.push_response(response(status, body))
        }

        pub(crate) fn push_response(&self, response: HttpResponse) -> &Self {
            self.responses.lock().unwrap().push_back(Ok(response));
            self
        }

        pub(crate) fn push_network_error(&self, message: &str) -> &Self {
            self.responses.lock().unwrap().push_back(Err(NetworkError(message.to_owned())));
            self
        }

        /// Always answers requests whose URL contains `fragment` with this response.
        pub(crate) fn route(&self, fragment: &str, status: u16, body: &str) -> &Self {
            self.routes.lock().unwrap().push((fragment.to_owned(), response(status, body)));
            self
        }

        pub(crate) fn requests(&self) -> Vec<HttpRequest> {
            self.requests.lock().unwrap().clone()
        }
    }

    impl HttpClient for ScriptedClient {
        fn send(&self, request: &HttpRequest) -> Result<HttpResponse, NetworkError> {
            self.requests.lock().unwrap().push(request.clone());
            let routed = self.routes
                .lock()
                .unwrap()
                .iter()
                .find(|(fragment, _)| request.url.contains(fragment.as_str()))
                .map(|(_, response)| response.clone());
            if let Some(response) = routed {
                return Ok(response);
            }
            self.responses
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(NetworkError(format!("no scripted response for {} {}", request.method, request.url))))
        }
    }

    pub(crate) fn response(status: u16, body: &str) -> HttpResponse {
        HttpResponse {
            status,
            headers: vec![("request-id".to_owned(), format!("req-{status}"))],
            body: body.as_bytes().to_vec(),
        }
    }
}
