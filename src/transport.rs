//! The HTTP seam between the dispatcher and the network.

use crate::{
    cancel::Cancellation,
    config::settings::HttpSettings,
    error::{Error, Result, TransportError},
};

use async_trait::async_trait;
use std::time::Duration;
use tokio::task::JoinHandle;

/// Response header carrying the service-assigned request id.
pub const REQUEST_ID_HEADER: &str = "x-amzn-requestid";

/// A fully signed request, ready to post.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SignedRequest {
    /// Absolute URL to post to.
    pub url: String,
    /// Header names and values, in send order.
    pub headers: Vec<(&'static str, String)>,
    /// The JSON payload.
    pub body: Vec<u8>,
}

impl SignedRequest {
    /// Value of a header, looked up case-insensitively.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(header, _)| header.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }
}

/// What came back for one attempt.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct RawResponse {
    /// HTTP status code.
    pub status: u16,
    /// Response body.
    pub body: Vec<u8>,
    /// Service-assigned request id, when present.
    pub request_id: Option<String>,
}

/// Posts signed requests.
///
/// Implementations are shared by every concurrent dispatch and must not need
/// external locking.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Post one request.
    async fn post(&self, request: SignedRequest) -> Result<RawResponse, TransportError>;
}

/// [`Transport`] over a pooled `reqwest` client.
#[derive(Clone, Debug)]
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    /// Build the pooled client.
    pub fn new(settings: &HttpSettings) -> Result<Self> {
        let client = reqwest::Client::builder()
            .pool_max_idle_per_host(settings.max_idle_per_host)
            .timeout(Duration::from_secs(settings.timeout_secs))
            .build()
            .map_err(|error| Error::Transport(error.into()))?;
        Ok(Self { client })
    }

    /// Wrap an existing client.
    pub fn from_client(client: reqwest::Client) -> Self {
        Self { client }
    }

    /// Send a `HEAD` to each of `urls` every `interval` so pooled connections
    /// stay open, until `cancellation` fires or the guard is dropped.
    pub fn keep_alive(
        &self,
        urls: Vec<String>,
        interval: Duration,
        cancellation: Cancellation,
    ) -> KeepAlive {
        let client = self.client.clone();
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                tokio::select! {
                    _ = cancellation.cancelled() => break,
                    _ = ticker.tick() => {
                        for url in &urls {
                            if let Err(error) = client.head(url).send().await {
                                tracing::warn!(%url, %error, "keep-alive request failed");
                            }
                        }
                    }
                }
            }
        });
        KeepAlive { task }
    }
}

/// Running keep-alive requests. Dropping it stops them.
#[derive(Debug)]
pub struct KeepAlive {
    task: JoinHandle<()>,
}

impl Drop for KeepAlive {
    fn drop(&mut self) {
        self.task.abort();
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn post(&self, request: SignedRequest) -> Result<RawResponse, TransportError> {
        let mut builder = self.client.post(&request.url);
        for (name, value) in request.headers {
            builder = builder.header(name, value);
        }
        let response = builder.body(request.body).send().await?;
        let status = response.status().as_u16();
        let request_id = response
            .headers()
            .get(REQUEST_ID_HEADER)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string);
        let body = response.bytes().await?.to_vec();
        Ok(RawResponse {
            status,
            body,
            request_id,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use rstest::rstest;
    use tokio::io::AsyncReadExt;

    #[rstest]
    #[case::exact("X-Amz-Target", Some("t"))]
    #[case::lower_case("x-amz-target", Some("t"))]
    #[case::missing("x-amz-date", None)]
    fn test_header_lookup(#[case] name: &str, #[case] expected: Option<&str>) {
        let request = SignedRequest {
            headers: vec![("X-Amz-Target", "t".to_string())],
            ..Default::default()
        };
        assert_eq!(request.header(name), expected);
    }

    #[test]
    fn test_http_transport_builds() {
        assert!(HttpTransport::new(&HttpSettings::default()).is_ok());
    }

    #[tokio::test]
    async fn test_keep_alive_sends_head_requests() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}/", listener.local_addr().unwrap());
        let transport = HttpTransport::new(&HttpSettings::default()).unwrap();
        let _keep_alive =
            transport.keep_alive(vec![url], Duration::from_millis(10), Cancellation::never());

        let (mut socket, _) = tokio::time::timeout(Duration::from_secs(5), listener.accept())
            .await
            .unwrap()
            .unwrap();
        let mut method = [0u8; 4];
        tokio::time::timeout(Duration::from_secs(5), socket.read_exact(&mut method))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(&method, b"HEAD");
    }
}
