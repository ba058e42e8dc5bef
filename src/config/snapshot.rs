use parking_lot::RwLock;
use std::{fmt, sync::Arc};

/// Access credentials for request signing.
///
/// Static credentials carry no token. Role credentials are short-lived and must
/// carry one; signing fails with a configuration error when it is missing.
#[derive(Clone, Default, Eq, PartialEq)]
pub struct Credentials {
    /// The access key id.
    pub access_key: String,
    /// The secret access key.
    pub secret: String,
    /// The session token of role credentials.
    pub token: Option<String>,
    /// Whether these are role credentials that require a session token.
    pub use_session_credentials: bool,
}

impl Credentials {
    /// Static, long-lived credentials.
    pub fn new(access_key: impl Into<String>, secret: impl Into<String>) -> Self {
        Self {
            access_key: access_key.into(),
            secret: secret.into(),
            token: None,
            use_session_credentials: false,
        }
    }

    /// Short-lived role credentials with their session token.
    pub fn session(
        access_key: impl Into<String>,
        secret: impl Into<String>,
        token: impl Into<String>,
    ) -> Self {
        Self {
            access_key: access_key.into(),
            secret: secret.into(),
            token: Some(token.into()),
            use_session_credentials: true,
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("access_key", &self.access_key)
            .field("secret", &"<redacted>")
            .field("token", &self.token.as_ref().map(|_| "<redacted>"))
            .field("use_session_credentials", &self.use_session_credentials)
            .finish()
    }
}

/// Where requests are sent and how they are scoped for signing.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Endpoint {
    /// `http` or `https`.
    pub scheme: String,
    /// Host name of the service.
    pub host: String,
    /// Explicit port, if any.
    pub port: Option<u16>,
    /// Region used in the credential scope, e.g. `us-east-1`.
    pub region: String,
    /// Service name used in the credential scope, e.g. `dynamodb`.
    pub service: String,
}

impl Default for Endpoint {
    fn default() -> Self {
        Self::for_region("us-east-1")
    }
}

impl Endpoint {
    /// The public HTTPS endpoint of a region.
    pub fn for_region(region: impl Into<String>) -> Self {
        let region = region.into();
        Self {
            scheme: "https".to_string(),
            host: format!("dynamodb.{region}.amazonaws.com"),
            port: None,
            region,
            service: "dynamodb".to_string(),
        }
    }

    fn default_port(&self) -> u16 {
        if self.scheme.eq_ignore_ascii_case("http") {
            80
        } else {
            443
        }
    }

    /// The port to include in the signed host header: only a non-default one.
    pub fn signing_port(&self) -> Option<u16> {
        self.port.filter(|port| *port != self.default_port())
    }

    /// The URL every request is posted to.
    pub fn url(&self) -> String {
        match self.signing_port() {
            Some(port) => format!("{}://{}:{port}/", self.scheme, self.host),
            None => format!("{}://{}/", self.scheme, self.host),
        }
    }
}

/// A consistent view of credentials and endpoint, taken once per attempt.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Snapshot {
    /// Credentials to sign with.
    pub credentials: Credentials,
    /// Endpoint to send to.
    pub endpoint: Endpoint,
}

/// Hands out the current snapshot.
pub trait ConfigProvider: fmt::Debug + Send + Sync {
    /// The snapshot to use for the next attempt.
    fn snapshot(&self) -> Arc<Snapshot>;
}

/// A provider whose snapshot never changes.
#[derive(Clone, Debug)]
pub struct StaticConfig {
    snapshot: Arc<Snapshot>,
}

impl StaticConfig {
    /// Wrap a fixed snapshot.
    pub fn new(snapshot: Snapshot) -> Self {
        Self {
            snapshot: Arc::new(snapshot),
        }
    }
}

impl ConfigProvider for StaticConfig {
    fn snapshot(&self) -> Arc<Snapshot> {
        Arc::clone(&self.snapshot)
    }
}

/// A provider whose credentials are swapped at runtime.
///
/// Writers replace the whole `Arc<Snapshot>`; readers clone the current `Arc`.
#[derive(Debug)]
pub struct RotatingConfig {
    current: RwLock<Arc<Snapshot>>,
}

impl RotatingConfig {
    /// Start from an initial snapshot.
    pub fn new(snapshot: Snapshot) -> Self {
        Self {
            current: RwLock::new(Arc::new(snapshot)),
        }
    }

    /// Replace the snapshot.
    pub fn publish(&self, snapshot: Snapshot) {
        *self.current.write() = Arc::new(snapshot);
    }

    /// Replace the credentials, keeping the endpoint.
    pub fn rotate(&self, credentials: Credentials) {
        let mut current = self.current.write();
        let endpoint = current.endpoint.clone();
        *current = Arc::new(Snapshot {
            credentials,
            endpoint,
        });
    }
}

impl ConfigProvider for RotatingConfig {
    fn snapshot(&self) -> Arc<Snapshot> {
        Arc::clone(&*self.current.read())
    }
}
