use crate::config::TransportConfig;
use crate::error::SheetMarkerError;
use crate::transport::HttpClient;
use crate::transport::HttpRequest;
use crate::transport::HttpResponse;
use crate::transport::Method;
use crate::transport::NetworkError;
use crate::transport::RequestBody;
use reqwest::blocking::Client;

/// Production [`HttpClient`] backed by a blocking `reqwest` client.
///
/// The per-call deadline from [`TransportConfig::request_timeout`] applies to
/// every request; a timeout surfaces as a [`NetworkError`].
pub struct ReqwestHttpClient {
    client: Client,
}

impl ReqwestHttpClient {
    pub fn new(config: &TransportConfig) -> Result<Self, SheetMarkerError> {
        let client = Client::builder()
            .timeout(config.request_timeout())
            .build()?;
        Ok(ReqwestHttpClient { client })
    }
}

impl HttpClient for ReqwestHttpClient {
    fn send(&self, request: &HttpRequest) -> Result<HttpResponse, NetworkError> {
        let method = match request.method {
            Method::Get => reqwest::Method::GET,
            Method::Post => reqwest::Method::POST,
            Method::Put => reqwest::Method::PUT,
            Method::Patch => reqwest::Method::PATCH,
        };
        let mut builder = self.client.request(method, request.url.as_str());
        for (key, value) in &request.headers {
            builder = builder.header(key.as_str(), value.as_str());
        }
        builder = match &request.body {
            Some(RequestBody::Json(json)) => builder.json(json),
            Some(RequestBody::Bytes(bytes)) => builder.body(bytes.clone()),
            None => builder,
        };

        let response = builder.send().map_err(|error| NetworkError(error.to_string()))?;
        let status = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .filter_map(|(name, value)| Some((name.as_str().to_owned(), value.to_str().ok()?.to_owned())))
            .collect();
        let body = response.bytes().map_err(|error| NetworkError(error.to_string()))?.to_vec();
        Ok(HttpResponse { status, headers, body })
    }
}
