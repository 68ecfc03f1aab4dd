//! Shared HTTP plumbing

use crate::error::ClientError;
use reqwest::header::HeaderValue;
use std::time::Duration;
use url::Url;

/// Overall request timeout for single-shot calls
pub(crate) const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Build the HTTP client used by every REST client
///
/// `accept_invalid_certs` is needed for the Cosmos DB emulator, which serves
/// a self-signed certificate.
pub(crate) fn http_client(accept_invalid_certs: bool) -> Result<reqwest::Client, ClientError> {
    reqwest::Client::builder()
        .timeout(REQUEST_TIMEOUT)
        .danger_accept_invalid_certs(accept_invalid_certs)
        .build()
        .map_err(ClientError::Http)
}

pub(crate) fn header_value(value: &str) -> Result<HeaderValue, ClientError> {
    HeaderValue::from_str(value)
        .map_err(|_| ClientError::Parse(format!("invalid header value: {}", value)))
}

/// Append percent-encoded path segments to `base`
///
/// A trailing slash on `base` is dropped first, so
/// `http://h/acct/` + `["c", "b"]` gives `http://h/acct/c/b`.
pub(crate) fn with_segments(base: &Url, segments: &[&str]) -> Result<Url, ClientError> {
    let mut url = base.clone();
    url.path_segments_mut()
        .map_err(|_| ClientError::Parse(format!("cannot append path to {}", base)))?
        .pop_if_empty()
        .extend(segments);
    Ok(url)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_with_segments_account_path() {
        let base = Url::parse("http://localhost:10000/devstoreaccount1").unwrap();
        let url = with_segments(&base, &["container", "blob"]).unwrap();
        assert_eq!(url.as_str(), "http://localhost:10000/devstoreaccount1/container/blob");
    }

    #[test]
    fn test_with_segments_trailing_slash() {
        let base = Url::parse("https://localhost:8081/").unwrap();
        let url = with_segments(&base, &["dbs", "testdb"]).unwrap();
        assert_eq!(url.as_str(), "https://localhost:8081/dbs/testdb");
    }

    #[test]
    fn test_with_segments_encodes() {
        let base = Url::parse("http://localhost:10000/acct").unwrap();
        let url = with_segments(&base, &["c", "a b/c"]).unwrap();
        assert_eq!(url.path(), "/acct/c/a%20b%2Fc");
    }

    #[test]
    fn test_http_client_builds() {
        assert!(http_client(true).is_ok());
        assert!(http_client(false).is_ok());
    }
}
