use crate::transport::RemoteError;
use thiserror::Error;

/// Main error type for the sheet marker engine.
///
/// Configuration-level faults (`MarkerNotFound`, `SchemaIncomplete`) and
/// exhausted or rejected remote calls surface here. Partial writes never do:
/// they are reported through `WriteOutcome`.
#[derive(Error, Debug)]
pub enum SheetMarkerError {
    #[error("Marker '{marker}' of section '{section}' not found")]
    MarkerNotFound { section: String, marker: String },

    #[error("Incomplete schema: {0}")]
    SchemaIncomplete(String),

    #[error("Worksheet '{0}' not found")]
    SheetNotFound(String),

    #[error("{0}")]
    WithContextError(String),

    // Remote document service
    #[error("{0}")]
    RemoteError(#[from] RemoteError),

    // Standard library errors
    #[error("{0}")]
    IoError(#[from] std::io::Error),

    #[error("{0}")]
    ParseIntError(#[from] std::num::ParseIntError),

    #[error("{0}")]
    StringEncodingError(#[from] std::str::Utf8Error),

    // Third-party library errors
    #[error("{0}")]
    ZipError(#[from] zip::result::ZipError),

    #[error("{0}")]
    XmlError(#[from] quick_xml::Error),

    #[error("{0}")]
    XmlEncodingError(#[from] quick_xml::encoding::EncodingError),

    #[error("{0}")]
    XmlAttributeError(#[from] quick_xml::events::attributes::AttrError),

    #[error("{0}")]
    JsonError(#[from] serde_json::Error),

    #[error("{0}")]
    HttpClientError(#[from] reqwest::Error),

    #[error("{0}")]
    UrlError(#[from] url::ParseError),

    // Helper and spreadsheet module errors
    #[error("{0}")]
    XmlHelperError(#[from] crate::helpers::xml::XmlError),

    #[error("{0}")]
    ReferenceError(#[from] crate::spreadsheet::reference::ReferenceError),

    #[error("{0}")]
    XlsxError(#[from] crate::spreadsheet::xlsx::XlsxError),
}

impl SheetMarkerError {
    /// True when the failure came from a transient remote condition that
    /// outlived the transport's retry budget; retrying the whole operation later may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            SheetMarkerError::RemoteError(error) => error.kind.is_transient(),
            _ => false,
        }
    }

    /// Remote request id for support correlation, when the failure came from the remote service.
    pub fn request_id(&self) -> Option<&str> {
        match self {
            SheetMarkerError::RemoteError(error) => error.request_id.as_deref(),
            _ => None,
        }
    }
}

pub(crate) trait ResultMessage {
    fn with_prefix(self, message: &str) -> Self;
}

impl<T> ResultMessage for Result<T, SheetMarkerError> {
    fn with_prefix(self, message: &str) -> Self {
        self.map_err(|e| SheetMarkerError::WithContextError(format!("{}: {}", message, e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::RemoteErrorKind;

    #[test]
    fn retryable_only_for_transient_remote_failures() {
        let transient = SheetMarkerError::from(RemoteError::new(RemoteErrorKind::Transient, Some(429), "throttled"));
        let rejected = SheetMarkerError::from(RemoteError::new(RemoteErrorKind::Rejected, Some(400), "bad range"));
        let missing = SheetMarkerError::MarkerNotFound { section: "pagos".into(), marker: "Pagos:".into() };
        assert!(transient.is_retryable());
        assert!(!rejected.is_retryable());
        assert!(!missing.is_retryable());
        assert_eq!(missing.to_string(), "Marker 'Pagos:' of section 'pagos' not found");
    }

    #[test]
    fn prefix_wraps_message() {
        let result: Result<(), SheetMarkerError> = Err(SheetMarkerError::SchemaIncomplete("no fields".into()));
        let error = result.with_prefix("section 'cliente'").unwrap_err();
        assert_eq!(error.to_string(), "section 'cliente': Incomplete schema: no fields");
    }
}
