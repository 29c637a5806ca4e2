use serde::Deserialize;

/// Failure of a single request to the chat backend.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("{detail}")]
    Http { status: u16, detail: String },
    #[error("network error: {0}")]
    Network(String),
    #[error("invalid response: {0}")]
    Decode(String),
    /// The caller's cancel token fired. Not a failure to show anyone.
    #[error("request aborted")]
    Aborted,
}

impl TransportError {
    pub fn is_aborted(&self) -> bool {
        matches!(self, TransportError::Aborted)
    }

    /// Builds an HTTP error from a non-success response body.
    ///
    /// `detail` is taken from the body's `detail` field when present,
    /// otherwise `"<fallback>: <status>"`.
    pub fn from_status(status: u16, body: &str, fallback: &str) -> Self {
        let detail = serde_json::from_str::<ErrorBody>(body)
            .ok()
            .and_then(|b| b.detail)
            .map(|detail| match detail {
                serde_json::Value::String(text) => text,
                other => other.to_string(),
            })
            .unwrap_or_else(|| format!("{}: {}", fallback, status));

        TransportError::Http { status, detail }
    }
}

impl From<reqwest::Error> for TransportError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            TransportError::Decode(err.to_string())
        } else {
            TransportError::Network(err.to_string())
        }
    }
}

#[derive(Deserialize)]
struct ErrorBody {
    detail: Option<serde_json::Value>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detail_field_wins_over_generic_message() {
        let err = TransportError::from_status(400, r#"{"detail":"Invalid model"}"#, "API Error");
        assert_eq!(err.to_string(), "Invalid model");
    }

    #[test]
    fn missing_or_unparsable_body_falls_back_to_status() {
        let err = TransportError::from_status(502, "<html>bad gateway</html>", "Stream Error");
        assert_eq!(err.to_string(), "Stream Error: 502");

        let err = TransportError::from_status(500, "{}", "API Error");
        assert!(matches!(err, TransportError::Http { status: 500, .. }));
        assert_eq!(err.to_string(), "API Error: 500");
    }

    #[test]
    fn only_aborted_is_aborted() {
        assert!(TransportError::Aborted.is_aborted());
        assert!(!TransportError::Network("reset".into()).is_aborted());
    }
}
