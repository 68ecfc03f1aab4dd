//! Request signing for the emulated services
//!
//! - Storage Shared Key (Blob/Queue and the shorter Table variant)
//! - Cosmos DB master key tokens
//!
//! Both are HMAC-SHA256 over a service-specific string-to-sign. Service Bus
//! authenticates over AMQP inside `azservicebus`.

use crate::error::ClientError;
use base64::Engine;
use hmac::{Hmac, Mac};
use reqwest::header::{HeaderMap, HeaderValue};
use reqwest::Method;
use sha2::Sha256;
use std::collections::BTreeMap;
use url::Url;

type HmacSha256 = Hmac<Sha256>;

/// Standard headers covered by the Blob/Queue string-to-sign, in order
const SIGNED_STANDARD_HEADERS: [&str; 11] = [
    "content-encoding",
    "content-language",
    "content-length",
    "content-md5",
    "content-type",
    "date",
    "if-modified-since",
    "if-match",
    "if-none-match",
    "if-unmodified-since",
    "range",
];

/// Current time in the RFC 1123 form `x-ms-date` expects
pub fn rfc1123_now() -> String {
    chrono::Utc::now()
        .format("%a, %d %b %Y %H:%M:%S GMT")
        .to_string()
}

fn hmac_sha256_base64(key: &[u8], data: &str) -> Result<String, ClientError> {
    let mut mac = HmacSha256::new_from_slice(key)
        .map_err(|e| ClientError::Auth(format!("invalid HMAC key: {}", e)))?;
    mac.update(data.as_bytes());
    Ok(base64::engine::general_purpose::STANDARD.encode(mac.finalize().into_bytes()))
}

fn url_encode(value: &str) -> String {
    url::form_urlencoded::byte_serialize(value.as_bytes()).collect()
}

fn decode_key(key: &str) -> Result<Vec<u8>, ClientError> {
    base64::engine::general_purpose::STANDARD
        .decode(key)
        .map_err(|e| ClientError::Auth(format!("account key is not base64: {}", e)))
}

/// Storage account Shared Key credential
#[derive(Clone)]
pub struct StorageSharedKey {
    account: String,
    key: Vec<u8>,
}

impl std::fmt::Debug for StorageSharedKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StorageSharedKey")
            .field("account", &self.account)
            .finish_non_exhaustive()
    }
}

impl StorageSharedKey {
    /// Create a credential from the account name and base64 account key
    ///
    /// # Errors
    ///
    /// Returns `ClientError::Auth` if the key is not valid base64.
    pub fn new(account: impl Into<String>, key: &str) -> Result<Self, ClientError> {
        Ok(Self {
            account: account.into(),
            key: decode_key(key)?,
        })
    }

    pub fn account(&self) -> &str {
        &self.account
    }

    /// `/{account}{path}` followed by sorted query parameters
    fn canonicalized_resource(&self, url: &Url) -> String {
        let mut resource = format!("/{}{}", self.account, url.path());

        let mut params: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for (name, value) in url.query_pairs() {
            params
                .entry(name.to_lowercase())
                .or_default()
                .push(value.into_owned());
        }
        for (name, mut values) in params {
            values.sort();
            resource.push('\n');
            resource.push_str(&name);
            resource.push(':');
            resource.push_str(&values.join(","));
        }
        resource
    }

    /// Build the Blob/Queue Shared Key string-to-sign
    pub fn blob_queue_string_to_sign(&self, method: &Method, url: &Url, headers: &HeaderMap) -> String {
        let header = |name: &str| -> String {
            headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .unwrap_or("")
                .trim()
                .to_string()
        };

        let mut lines = vec![method.as_str().to_string()];
        for name in SIGNED_STANDARD_HEADERS {
            let value = header(name);
            // A zero length is signed as empty
            if name == "content-length" && value == "0" {
                lines.push(String::new());
            } else {
                lines.push(value);
            }
        }

        let mut canonical_headers: Vec<(String, String)> = headers
            .iter()
            .filter(|(name, _)| name.as_str().starts_with("x-ms-"))
            .map(|(name, value)| {
                (
                    name.as_str().to_string(),
                    value.to_str().unwrap_or("").trim().to_string(),
                )
            })
            .collect();
        canonical_headers.sort();

        let mut string_to_sign = lines.join("\n");
        string_to_sign.push('\n');
        for (name, value) in canonical_headers {
            string_to_sign.push_str(&name);
            string_to_sign.push(':');
            string_to_sign.push_str(&value);
            string_to_sign.push('\n');
        }
        string_to_sign.push_str(&self.canonicalized_resource(url));
        string_to_sign
    }

    /// Authorization header for a Blob or Queue request
    ///
    /// `headers` must already contain every header that will be sent,
    /// including `x-ms-date` and `x-ms-version`.
    pub fn sign_blob_queue(
        &self,
        method: &Method,
        url: &Url,
        headers: &HeaderMap,
    ) -> Result<HeaderValue, ClientError> {
        let string_to_sign = self.blob_queue_string_to_sign(method, url, headers);
        self.authorization(&string_to_sign)
    }

    /// Build the Table Shared Key string-to-sign
    ///
    /// Only the `comp` query parameter is part of the canonicalized resource.
    pub fn table_string_to_sign(
        &self,
        method: &Method,
        url: &Url,
        date: &str,
        content_type: &str,
    ) -> String {
        let mut resource = format!("/{}{}", self.account, url.path());
        if let Some((_, comp)) = url.query_pairs().find(|(name, _)| name == "comp") {
            resource.push_str("?comp=");
            resource.push_str(&comp);
        }
        format!(
            "{}\n\n{}\n{}\n{}",
            method.as_str(),
            content_type,
            date,
            resource
        )
    }

    /// Authorization header for a Table request
    pub fn sign_table(
        &self,
        method: &Method,
        url: &Url,
        date: &str,
        content_type: &str,
    ) -> Result<HeaderValue, ClientError> {
        let string_to_sign = self.table_string_to_sign(method, url, date, content_type);
        self.authorization(&string_to_sign)
    }

    fn authorization(&self, string_to_sign: &str) -> Result<HeaderValue, ClientError> {
        let signature = hmac_sha256_base64(&self.key, string_to_sign)?;
        HeaderValue::from_str(&format!("SharedKey {}:{}", self.account, signature))
            .map_err(|_| ClientError::Auth("account name contains invalid characters".into()))
    }
}

/// Cosmos DB master key authorization token
///
/// The signed text is `verb\nresource_type\nresource_link\ndate\n\n` with
/// verb, resource type and date lowercased; the resource link keeps its case.
pub fn cosmos_master_token(
    verb: &Method,
    resource_type: &str,
    resource_link: &str,
    date: &str,
    key: &str,
) -> Result<String, ClientError> {
    let key_bytes = decode_key(key)?;
    let text = format!(
        "{}\n{}\n{}\n{}\n\n",
        verb.as_str().to_lowercase(),
        resource_type.to_lowercase(),
        resource_link,
        date.to_lowercase()
    );
    let signature = hmac_sha256_base64(&key_bytes, &text)?;
    Ok(url_encode(&format!("type=master&ver=1.0&sig={}", signature)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{AZURITE_ACCOUNT, AZURITE_KEY, COSMOS_EMULATOR_KEY};
    use reqwest::header::{CONTENT_LENGTH, CONTENT_TYPE, IF_NONE_MATCH};

    fn azurite_key() -> StorageSharedKey {
        StorageSharedKey::new(AZURITE_ACCOUNT, AZURITE_KEY).expect("valid key")
    }

    #[test]
    fn test_rfc1123_format() {
        let date = rfc1123_now();
        assert!(date.ends_with(" GMT"));
        // e.g. "Fri, 16 Oct 2026 20:05:00 GMT"
        assert_eq!(date.len(), 29);
        assert_eq!(&date[3..5], ", ");
    }

    #[test]
    fn test_invalid_storage_key_rejected() {
        let result = StorageSharedKey::new("acct", "***");
        assert!(matches!(result, Err(ClientError::Auth(_))));
    }

    #[test]
    fn test_blob_string_to_sign_layout() {
        let key = azurite_key();
        let url = Url::parse("http://localhost:10000/devstoreaccount1/mycontainer?restype=container")
            .unwrap();
        let mut headers = HeaderMap::new();
        headers.insert("x-ms-version", HeaderValue::from_static("2021-08-06"));
        headers.insert(
            "x-ms-date",
            HeaderValue::from_static("Fri, 16 Oct 2026 20:05:00 GMT"),
        );
        headers.insert(CONTENT_LENGTH, HeaderValue::from_static("0"));

        let text = key.blob_queue_string_to_sign(&Method::PUT, &url, &headers);
        let expected = "PUT\n\n\n\n\n\n\n\n\n\n\n\n\
x-ms-date:Fri, 16 Oct 2026 20:05:00 GMT\n\
x-ms-version:2021-08-06\n\
/devstoreaccount1/devstoreaccount1/mycontainer\nrestype:container";
        assert_eq!(text, expected);
    }

    #[test]
    fn test_blob_string_to_sign_includes_standard_headers() {
        let key = azurite_key();
        let url = Url::parse("http://localhost:10000/devstoreaccount1/c/b").unwrap();
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_LENGTH, HeaderValue::from_static("11"));
        headers.insert(
            CONTENT_TYPE,
            HeaderValue::from_static("application/octet-stream"),
        );
        headers.insert(IF_NONE_MATCH, HeaderValue::from_static("*"));
        headers.insert("x-ms-blob-type", HeaderValue::from_static("BlockBlob"));

        let text = key.blob_queue_string_to_sign(&Method::PUT, &url, &headers);
        let lines: Vec<&str> = text.split('\n').collect();
        assert_eq!(lines[0], "PUT");
        assert_eq!(lines[3], "11");
        assert_eq!(lines[5], "application/octet-stream");
        assert_eq!(lines[9], "*");
        assert_eq!(lines[12], "x-ms-blob-type:BlockBlob");
        assert_eq!(lines[13], "/devstoreaccount1/devstoreaccount1/c/b");
    }

    #[test]
    fn test_canonicalized_resource_sorts_query() {
        let key = azurite_key();
        let url = Url::parse(
            "http://localhost:10001/devstoreaccount1/q/messages?visibilitytimeout=30&numofmessages=1",
        )
        .unwrap();
        assert_eq!(
            key.canonicalized_resource(&url),
            "/devstoreaccount1/devstoreaccount1/q/messages\nnumofmessages:1\nvisibilitytimeout:30"
        );
    }

    #[test]
    fn test_table_string_to_sign_only_keeps_comp() {
        let key = azurite_key();
        let url = Url::parse("http://localhost:10002/devstoreaccount1/Tables?comp=list&$top=1")
            .unwrap();
        let text = key.table_string_to_sign(
            &Method::GET,
            &url,
            "Fri, 16 Oct 2026 20:05:00 GMT",
            "application/json",
        );
        assert_eq!(
            text,
            "GET\n\napplication/json\nFri, 16 Oct 2026 20:05:00 GMT\n/devstoreaccount1/devstoreaccount1/Tables?comp=list"
        );
    }

    #[test]
    fn test_shared_key_header_format() {
        let key = azurite_key();
        let url = Url::parse("http://localhost:10000/devstoreaccount1?comp=list").unwrap();
        let value = key
            .sign_blob_queue(&Method::GET, &url, &HeaderMap::new())
            .unwrap();
        let value = value.to_str().unwrap();
        assert!(value.starts_with("SharedKey devstoreaccount1:"));
        // base64 of a 32-byte MAC
        let signature = value.rsplit(':').next().unwrap();
        assert_eq!(signature.len(), 44);
    }

    #[test]
    fn test_signature_is_deterministic_and_input_sensitive() {
        let key = azurite_key();
        let url = Url::parse("http://localhost:10002/devstoreaccount1/Tables").unwrap();
        let date = "Fri, 16 Oct 2026 20:05:00 GMT";
        let a = key.sign_table(&Method::GET, &url, date, "").unwrap();
        let b = key.sign_table(&Method::GET, &url, date, "").unwrap();
        let c = key.sign_table(&Method::POST, &url, date, "").unwrap();
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_cosmos_master_token_format() {
        let token = cosmos_master_token(
            &Method::GET,
            "docs",
            "dbs/testdb/colls/test_container/docs/item_1",
            "Fri, 16 Oct 2026 20:05:00 GMT",
            COSMOS_EMULATOR_KEY,
        )
        .unwrap();
        assert!(token.starts_with("type%3Dmaster%26ver%3D1.0%26sig%3D"));
        assert!(!token.contains('/'));
        assert!(!token.contains('+'));
    }

    #[test]
    fn test_cosmos_token_depends_on_date() {
        let first = cosmos_master_token(
            &Method::POST,
            "dbs",
            "",
            "Fri, 16 Oct 2026 20:05:00 GMT",
            COSMOS_EMULATOR_KEY,
        )
        .unwrap();
        let second = cosmos_master_token(
            &Method::POST,
            "dbs",
            "",
            "Sat, 17 Oct 2026 20:05:00 GMT",
            COSMOS_EMULATOR_KEY,
        )
        .unwrap();
        assert_ne!(first, second);
    }

    // Known answers: HMAC-SHA256 over the documented string-to-sign, computed
    // outside this crate

    #[test]
    fn test_blob_shared_key_known_answer() {
        let key = azurite_key();
        let url = Url::parse("http://localhost:10000/devstoreaccount1/mycontainer?restype=container")
            .unwrap();
        let mut headers = HeaderMap::new();
        headers.insert("x-ms-version", HeaderValue::from_static("2021-08-06"));
        headers.insert(
            "x-ms-date",
            HeaderValue::from_static("Fri, 16 Oct 2026 20:05:00 GMT"),
        );
        headers.insert(CONTENT_LENGTH, HeaderValue::from_static("0"));

        let value = key.sign_blob_queue(&Method::PUT, &url, &headers).unwrap();
        assert_eq!(
            value.to_str().unwrap(),
            "SharedKey devstoreaccount1:P+zWekl6nUhlgzxNyWHAy8Egbtg7cnG4CtgTL0vX07A="
        );
    }

    #[test]
    fn test_queue_shared_key_known_answer() {
        let key = azurite_key();
        let url = Url::parse(
            "http://localhost:10001/devstoreaccount1/q/messages?visibilitytimeout=30&numofmessages=1",
        )
        .unwrap();
        let mut headers = HeaderMap::new();
        headers.insert("x-ms-version", HeaderValue::from_static("2021-08-06"));
        headers.insert(
            "x-ms-date",
            HeaderValue::from_static("Fri, 16 Oct 2026 20:05:00 GMT"),
        );

        let value = key.sign_blob_queue(&Method::GET, &url, &headers).unwrap();
        assert_eq!(
            value.to_str().unwrap(),
            "SharedKey devstoreaccount1:LSCLC5rI1RR2jWuMvRSDupaePlZ53ybsNKIyK6XD5bQ="
        );
    }

    #[test]
    fn test_table_shared_key_known_answer() {
        let key = azurite_key();
        let url = Url::parse("http://localhost:10002/devstoreaccount1/Tables?comp=list&$top=1")
            .unwrap();

        let value = key
            .sign_table(
                &Method::GET,
                &url,
                "Fri, 16 Oct 2026 20:05:00 GMT",
                "application/json",
            )
            .unwrap();
        assert_eq!(
            value.to_str().unwrap(),
            "SharedKey devstoreaccount1:4i6BNnkesZ/SD8IgLCRC3cqJzNGSuTyP0Xy6PEe4OH0="
        );
    }

    /// Worked example from the Cosmos DB REST documentation
    #[test]
    fn test_cosmos_master_token_published_example() {
        let token = cosmos_master_token(
            &Method::GET,
            "dbs",
            "dbs/ToDoList",
            "Thu, 27 Apr 2017 00:51:12 GMT",
            "dsZQi3KtZmCv1ljt3VNWNm7sQUF1y5rJfC6kv5JiwvW0EndXdDku/dkKBp8/ufDToSxLzR4y+O/0H/t4bQtVNw==",
        )
        .unwrap();
        // The documentation prints lowercase percent escapes
        assert_eq!(
            token.to_lowercase(),
            "type%3dmaster%26ver%3d1.0%26sig%3dc09pevjrgp2uqrkr934kfbtqhbyc7tvr3ohyqlu%2bc%2bc%3d"
        );
        assert_eq!(
            token,
            "type%3Dmaster%26ver%3D1.0%26sig%3Dc09PEVJrgp2uQRkr934kFbTqhByc7TVr3OHyqlu%2Bc%2Bc%3D"
        );
    }

    #[test]
    fn test_cosmos_master_token_emulator_key_known_answer() {
        let token = cosmos_master_token(
            &Method::GET,
            "docs",
            "dbs/testdb/colls/test_container/docs/item_1",
            "Fri, 16 Oct 2026 20:05:00 GMT",
            COSMOS_EMULATOR_KEY,
        )
        .unwrap();
        assert_eq!(
            token,
            "type%3Dmaster%26ver%3D1.0%26sig%3DlKeyGSteD3KYP%2FEFQ9fWaZx6ni9r1DCTKuXPd4uXeS0%3D"
        );
    }
}
