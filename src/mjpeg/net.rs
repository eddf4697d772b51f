//! Networking layer: opening the byte stream a session reads from.
use log::{debug, info};
use std::io::Read;

use super::state::{Credentials, DecoderConfig};
use crate::error::{Result, StreamError};

/// An opened stream: response metadata plus the readable body.
///
/// Dropping it releases the underlying connection.
pub struct OpenedStream {
    pub headers: Vec<(String, String)>,
    pub body: Box<dyn Read + Send>,
}

impl OpenedStream {
    pub fn new(headers: Vec<(String, String)>, body: Box<dyn Read + Send>) -> Self {
        Self { headers, body }
    }

    /// First header called `name`, compared case-insensitively.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn content_type(&self) -> Option<&str> {
        self.header("content-type")
    }
}

/// Where session bytes come from.
pub trait ByteSource {
    /// Open `address`, authenticating with `credentials` if given.
    fn open(&self, address: &str, credentials: Option<&Credentials>) -> Result<OpenedStream>;
}

/// [`ByteSource`] over plain HTTP, backed by a blocking reqwest client.
pub struct HttpByteSource {
    client: reqwest::blocking::Client,
}

impl HttpByteSource {
    pub fn new(config: &DecoderConfig) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .connect_timeout(config.connect_timeout)
            .timeout(config.read_timeout)
            .build()
            .map_err(|e| StreamError::Connection(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self { client })
    }
}

impl ByteSource for HttpByteSource {
    fn open(&self, address: &str, credentials: Option<&Credentials>) -> Result<OpenedStream> {
        let url = reqwest::Url::parse(address)
            .map_err(|e| StreamError::Connection(format!("invalid address '{}': {}", address, e)))?;
        let mut request = self.client.get(url);
        if let Some(c) = credentials.filter(|c| !c.is_empty()) {
            debug!("using basic auth as '{}'", c.username);
            request = request.basic_auth(&c.username, Some(&c.password));
        }
        let response = request
            .send()
            .and_then(|r| r.error_for_status())
            .map_err(|e| StreamError::Connection(e.to_string()))?;
        info!("connected to {} ({})", address, response.status());

        let headers = response
            .headers()
            .iter()
            .filter_map(|(k, v)| Some((k.as_str().to_string(), v.to_str().ok()?.to_string())))
            .collect();
        Ok(OpenedStream::new(headers, Box::new(response)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn header_lookup_ignores_case() {
        let opened = OpenedStream::new(
            vec![("Content-Type".to_string(), "multipart/x-mixed-replace; boundary=a".to_string())],
            Box::new(Cursor::new(Vec::new())),
        );
        assert_eq!(opened.content_type(), Some("multipart/x-mixed-replace; boundary=a"));
        assert_eq!(opened.header("x-missing"), None);
    }

    #[test]
    fn invalid_address_is_a_connection_error() {
        let source = HttpByteSource::new(&DecoderConfig::default()).unwrap();
        let err = source.open("not a url", None).err().unwrap();
        assert!(matches!(err, StreamError::Connection(_)));
    }
}
