use crate::{
    batch::BatchPolicy,
    cancel::Cancellation,
    config::{
        role_files::{RoleFiles, WatchedConfig},
        snapshot::{ConfigProvider, Credentials, Endpoint, RotatingConfig, Snapshot, StaticConfig},
    },
    dispatch::RetryPolicy,
    error::{Error, Result},
};

use serde::Deserialize;
use std::{path, sync::Arc, time::Duration};

/// Name of the configuration file looked up by [`Settings::load`].
pub const CONF_NAME: &str = "aws-config.json";

/// The only supported role provider.
pub const ROLE_PROVIDER_FILE: &str = "file";

/// Library configuration, read from JSON.
///
/// ```rust
/// use dynamodb_direct::config::settings::Settings;
///
/// let settings: Settings = serde_json::from_str(r#"{
///     "services": {
///         "default_settings": {
///             "params": {"access_key_id": "AKID", "secret_access_key": "secret"}
///         },
///         "dynamo_db": {"zone": "eu-west-1"}
///     }
/// }"#).unwrap();
/// settings.validate().unwrap();
/// assert_eq!(settings.endpoint().host, "dynamodb.eu-west-1.amazonaws.com");
/// ```
#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
#[serde(default)]
pub struct Settings {
    /// Credentials and endpoint.
    pub services: Services,
    /// HTTP connection pool tuning.
    pub http: HttpSettings,
    /// Retry loop tuning.
    pub retry: RetrySettings,
    /// Batch engine tuning.
    pub batch: BatchSettings,
}

/// The `services` block.
#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
#[serde(default)]
pub struct Services {
    /// Settings shared by every service.
    pub default_settings: DefaultSettings,
    /// DynamoDB endpoint and role settings.
    pub dynamo_db: DynamoDbSettings,
}

/// The `services.default_settings` block.
#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
#[serde(default)]
pub struct DefaultSettings {
    /// Static credentials.
    pub params: Params,
}

/// Static credentials.
#[derive(Clone, Default, Deserialize, PartialEq)]
#[serde(default)]
pub struct Params {
    /// The access key id.
    pub access_key_id: String,
    /// The secret access key.
    pub secret_access_key: String,
    /// Session token of temporary static credentials.
    pub session_token: Option<String>,
}

impl std::fmt::Debug for Params {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Params")
            .field("access_key_id", &self.access_key_id)
            .finish_non_exhaustive()
    }
}

/// The `services.dynamo_db` block.
#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
#[serde(default)]
pub struct DynamoDbSettings {
    /// Host name; derived from the zone when empty.
    pub host: String,
    /// Region, e.g. `us-east-1`.
    pub zone: String,
    /// Explicit port.
    pub port: Option<u16>,
    /// `http` or `https`; `https` when empty.
    pub scheme: String,
    /// Role credentials.
    pub iam: IamSettings,
}

/// The `services.dynamo_db.iam` block.
#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(default)]
pub struct IamSettings {
    /// Sign with role credentials instead of static ones.
    pub use_iam: bool,
    /// Role provider name; only `file` is supported.
    pub role_provider: String,
    /// File name of the access key id.
    pub access_key: String,
    /// File name of the secret access key.
    pub secret_key: String,
    /// File name of the session token.
    pub token: String,
    /// Directory holding the role files.
    pub base_dir: path::PathBuf,
    /// Re-read the role files periodically.
    pub watch: bool,
    /// Seconds between two reads when watching.
    pub watch_interval_secs: u64,
}

impl Default for IamSettings {
    fn default() -> Self {
        Self {
            use_iam: false,
            role_provider: ROLE_PROVIDER_FILE.to_string(),
            access_key: String::new(),
            secret_key: String::new(),
            token: String::new(),
            base_dir: path::PathBuf::new(),
            watch: false,
            watch_interval_secs: 60,
        }
    }
}

/// The `http` block.
#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(default)]
pub struct HttpSettings {
    /// Idle connections kept per host.
    pub max_idle_per_host: usize,
    /// Per-attempt timeout in seconds.
    pub timeout_secs: u64,
    /// Seconds between keep-alive `HEAD` requests to the endpoint; off when unset.
    pub keep_alive_secs: Option<u64>,
}

impl Default for HttpSettings {
    fn default() -> Self {
        Self {
            max_idle_per_host: 100,
            timeout_secs: 20,
            keep_alive_secs: None,
        }
    }
}

/// The `retry` block.
#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(default)]
pub struct RetrySettings {
    /// Total attempts per request, first one included.
    pub max_attempts: u32,
    /// Base of the exponential jitter, in milliseconds.
    pub base_delay_ms: u64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        let policy = RetryPolicy::default();
        Self {
            max_attempts: policy.max_attempts,
            base_delay_ms: policy.base_delay.as_millis() as u64,
        }
    }
}

/// The `batch` block.
#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(default)]
pub struct BatchSettings {
    /// Deepest allowed resubmission of unprocessed items.
    pub recursion_limit: usize,
}

impl Default for BatchSettings {
    fn default() -> Self {
        Self {
            recursion_limit: BatchPolicy::default().recursion_limit,
        }
    }
}

impl Settings {
    /// Read settings from a JSON file.
    pub fn from_file(file: impl AsRef<path::Path>) -> Result<Self> {
        let file = file.as_ref();
        let contents = std::fs::read_to_string(file).map_err(|error| {
            Error::configuration(format!("cannot read {}: {error}", file.display()))
        })?;
        serde_json::from_str(&contents).map_err(|error| {
            Error::configuration(format!("cannot parse {}: {error}", file.display()))
        })
    }

    /// Read the first readable file among `candidates`.
    pub fn load_from(candidates: &[path::PathBuf]) -> Result<Self> {
        for candidate in candidates {
            if !candidate.is_file() {
                tracing::debug!(file = %candidate.display(), "no configuration file");
                continue;
            }
            let settings = Self::from_file(candidate)?;
            tracing::info!(file = %candidate.display(), "configuration read");
            return Ok(settings);
        }
        let searched: Vec<_> = candidates
            .iter()
            .map(|candidate| candidate.display().to_string())
            .collect();
        Err(Error::configuration(format!(
            "no configuration file found, searched: {}",
            searched.join(", ")
        )))
    }

    /// Read `$HOME/.aws-config.json`, falling back to `/etc/aws-config.json`,
    /// then apply environment overrides.
    pub fn load() -> Result<Self> {
        let mut candidates = Vec::with_capacity(2);
        if let Some(home) = std::env::var_os("HOME") {
            candidates.push(path::Path::new(&home).join(format!(".{CONF_NAME}")));
        }
        candidates.push(path::Path::new("/etc").join(CONF_NAME));
        let settings = Self::load_from(&candidates)?;
        Ok(settings.apply_env(|name| std::env::var(name).ok()))
    }

    /// Override credentials and region from environment-style variables.
    pub fn apply_env(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        let read = |name: &str| lookup(name).filter(|value| !value.is_empty());
        let params = &mut self.services.default_settings.params;
        if let Some(access_key_id) = read("AWS_ACCESS_KEY_ID") {
            params.access_key_id = access_key_id;
        }
        if let Some(secret_access_key) = read("AWS_SECRET_ACCESS_KEY") {
            params.secret_access_key = secret_access_key;
        }
        if let Some(session_token) = read("AWS_SESSION_TOKEN") {
            params.session_token = Some(session_token);
        }
        if let Some(region) = read("AWS_REGION").or_else(|| read("AWS_DEFAULT_REGION")) {
            self.services.dynamo_db.zone = region;
        }
        self
    }

    /// Check that the settings can sign requests.
    pub fn validate(&self) -> Result<()> {
        let dynamo_db = &self.services.dynamo_db;
        if dynamo_db.iam.use_iam {
            let iam = &dynamo_db.iam;
            if iam.role_provider != ROLE_PROVIDER_FILE {
                return Err(Error::configuration(format!(
                    "unsupported role provider {:?}, only {ROLE_PROVIDER_FILE:?} is supported",
                    iam.role_provider
                )));
            }
            if iam.access_key.is_empty() || iam.secret_key.is_empty() || iam.token.is_empty() {
                return Err(Error::configuration("role file names must all be set"));
            }
        } else {
            let params = &self.services.default_settings.params;
            if params.access_key_id.is_empty() {
                return Err(Error::configuration("no access key defined"));
            }
            if params.secret_access_key.is_empty() {
                return Err(Error::configuration("no secret defined"));
            }
        }
        if self.retry.max_attempts == 0 {
            return Err(Error::configuration("retry.max_attempts must be at least 1"));
        }
        Ok(())
    }

    /// The endpoint described by `services.dynamo_db`.
    pub fn endpoint(&self) -> Endpoint {
        let dynamo_db = &self.services.dynamo_db;
        let region = if dynamo_db.zone.is_empty() {
            "us-east-1"
        } else {
            dynamo_db.zone.as_str()
        };
        let mut endpoint = Endpoint::for_region(region);
        if !dynamo_db.host.is_empty() {
            endpoint.host = dynamo_db.host.clone();
        }
        if !dynamo_db.scheme.is_empty() {
            endpoint.scheme = dynamo_db.scheme.to_ascii_lowercase();
        }
        endpoint.port = dynamo_db.port;
        endpoint
    }

    /// The static credentials from `services.default_settings.params`.
    pub fn credentials(&self) -> Credentials {
        let params = &self.services.default_settings.params;
        match &params.session_token {
            Some(token) => Credentials::session(
                params.access_key_id.as_str(),
                params.secret_access_key.as_str(),
                token.as_str(),
            ),
            None => Credentials::new(
                params.access_key_id.as_str(),
                params.secret_access_key.as_str(),
            ),
        }
    }

    /// The role files described by `services.dynamo_db.iam`.
    pub fn role_files(&self) -> RoleFiles {
        let iam = &self.services.dynamo_db.iam;
        RoleFiles {
            base_dir: iam.base_dir.clone(),
            access_key: iam.access_key.clone(),
            secret_key: iam.secret_key.clone(),
            token: iam.token.clone(),
        }
    }

    /// The retry policy described by the `retry` block.
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.retry.max_attempts,
            base_delay: Duration::from_millis(self.retry.base_delay_ms),
        }
    }

    /// The batch policy described by the `batch` block.
    pub fn batch_policy(&self) -> BatchPolicy {
        BatchPolicy {
            recursion_limit: self.batch.recursion_limit,
        }
    }

    /// Build the snapshot provider these settings describe.
    ///
    /// With roles enabled the role files are read once up front. When `watch`
    /// is set they are re-read until `cancellation` fires or the returned
    /// provider is dropped.
    pub async fn provider(&self, cancellation: Cancellation) -> Result<Arc<dyn ConfigProvider>> {
        self.validate()?;
        let endpoint = self.endpoint();
        let iam = &self.services.dynamo_db.iam;
        if !iam.use_iam {
            let snapshot = Snapshot {
                credentials: self.credentials(),
                endpoint,
            };
            return Ok(Arc::new(StaticConfig::new(snapshot)));
        }
        let role_files = self.role_files();
        let credentials = role_files.load().await?;
        let provider = Arc::new(RotatingConfig::new(Snapshot {
            credentials,
            endpoint,
        }));
        if !iam.watch {
            return Ok(provider);
        }
        let interval = Duration::from_secs(iam.watch_interval_secs.max(1));
        tracing::info!(?interval, "watching role files");
        Ok(Arc::new(WatchedConfig::start(
            role_files,
            provider,
            interval,
            cancellation,
        )))
    }
}
