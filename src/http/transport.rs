use std::time::Duration;

use bytes::Bytes;
use reqwest::blocking::Client;
use reqwest::header::{CONTENT_LENGTH, CONTENT_RANGE, RANGE, RETRY_AFTER};

/// Timeout for establishing a connection.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
/// Timeout for reading a response body. Range fetches can be large, so this
/// is much longer than the connect timeout.
const READ_TIMEOUT: Duration = Duration::from_secs(300);

/// Everything the stream needs out of one ranged GET.
#[derive(Debug, Clone)]
pub struct RangeResponse {
    /// HTTP status code.
    pub status: u16,
    /// Total resource size parsed from `Content-Range: bytes a-b/total`.
    pub total_size: Option<u64>,
    /// `Content-Length` of this response body.
    pub content_length: Option<u64>,
    /// `Retry-After` delay in seconds, when the server sent one.
    pub retry_after: Option<u64>,
    /// Response body.
    pub body: Bytes,
}

impl RangeResponse {
    /// Whether the status is an acceptable answer to a range request:
    /// 206 for a partial body, 200 for servers that ignore `Range`.
    pub fn is_range_ok(&self) -> bool {
        self.status == 200 || self.status == 206
    }
}

/// A source of ranged GETs against a single resource.
///
/// The stream layers all caching, retry, and backoff logic on top of this
/// one method, so tests can drive it with a scripted in-memory transport.
pub trait Transport: Send {
    /// Issue `GET` with `Range: bytes=start-end` (end inclusive).
    ///
    /// An `Err` means the request never produced an HTTP response
    /// (connect failure, timeout, broken body read). Non-2xx statuses are
    /// returned as a normal `RangeResponse` for the caller to interpret.
    fn get_range(&self, start: u64, end: u64) -> Result<RangeResponse, String>;
}

/// Blocking reqwest-backed transport with keep-alive across requests.
pub struct HttpTransport {
    client: Client,
    url: String,
}

impl HttpTransport {
    pub fn new(url: impl Into<String>) -> Result<Self, String> {
        let client = Client::builder()
            .user_agent(concat!("rextract/", env!("CARGO_PKG_VERSION")))
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(READ_TIMEOUT)
            .build()
            .map_err(|e| e.to_string())?;

        Ok(HttpTransport {
            client,
            url: url.into(),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

impl Transport for HttpTransport {
    fn get_range(&self, start: u64, end: u64) -> Result<RangeResponse, String> {
        let range = format!("bytes={start}-{end}");

        let resp = self
            .client
            .get(&self.url)
            .header(RANGE, range)
            .send()
            .map_err(|e| e.to_string())?;

        let status = resp.status().as_u16();

        let total_size = resp
            .headers()
            .get(CONTENT_RANGE)
            .and_then(|v| v.to_str().ok())
            .and_then(parse_content_range_total);

        let content_length = resp
            .headers()
            .get(CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.parse().ok());

        let retry_after = resp
            .headers()
            .get(RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.trim().parse().ok());

        let body = resp.bytes().map_err(|e| e.to_string())?;

        Ok(RangeResponse {
            status,
            total_size,
            content_length,
            retry_after,
            body,
        })
    }
}

/// Parse the total-length field of `Content-Range: bytes 0-0/12345`.
/// A `*` total (unknown length) yields `None`.
fn parse_content_range_total(value: &str) -> Option<u64> {
    value.rsplit('/').next()?.trim().parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_content_range_total() {
        assert_eq!(parse_content_range_total("bytes 0-0/12345"), Some(12345));
        assert_eq!(parse_content_range_total("bytes 100-199/200"), Some(200));
        assert_eq!(parse_content_range_total("bytes 0-0/*"), None);
        assert_eq!(parse_content_range_total("garbage"), None);
    }

    #[test]
    fn test_range_ok_statuses() {
        let mut resp = RangeResponse {
            status: 206,
            total_size: None,
            content_length: None,
            retry_after: None,
            body: Bytes::new(),
        };
        assert!(resp.is_range_ok());
        resp.status = 200;
        assert!(resp.is_range_ok());
        resp.status = 404;
        assert!(!resp.is_range_ok());
    }
}
