use crate::{
    cancel::Cancellation,
    config::snapshot::{ConfigProvider, Credentials, RotatingConfig, Snapshot},
    error::{Error, Result},
};

use std::{path, sync::Arc, time::Duration};
use tokio::task::JoinHandle;

/// Role credentials stored as three files under one directory.
///
/// ```rust,no_run
/// use dynamodb_direct::config::role_files::RoleFiles;
///
/// # async fn example() -> dynamodb_direct::error::Result<()> {
/// let files = RoleFiles {
///     base_dir: "/var/run/roles".into(),
///     access_key: "access_key".to_string(),
///     secret_key: "secret".to_string(),
///     token: "token".to_string(),
/// };
/// let credentials = files.load().await?;
/// assert!(credentials.use_session_credentials);
/// # Ok(())
/// # }
/// ```
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct RoleFiles {
    /// Directory holding the three files.
    pub base_dir: path::PathBuf,
    /// File name of the access key id.
    pub access_key: String,
    /// File name of the secret access key.
    pub secret_key: String,
    /// File name of the session token.
    pub token: String,
}

impl RoleFiles {
    async fn read(&self, name: &str) -> Result<String> {
        let file = self.base_dir.join(name);
        let contents = tokio::fs::read_to_string(&file).await.map_err(|error| {
            Error::configuration(format!("cannot read role file {}: {error}", file.display()))
        })?;
        let value = contents.trim();
        if value.is_empty() {
            return Err(Error::configuration(format!(
                "role file {} is empty",
                file.display()
            )));
        }
        Ok(value.to_string())
    }

    /// Read the three files into session credentials.
    pub async fn load(&self) -> Result<Credentials> {
        let access_key = self.read(&self.access_key).await?;
        let secret = self.read(&self.secret_key).await?;
        let token = self.read(&self.token).await?;
        Ok(Credentials::session(access_key, secret, token))
    }

    /// Read the files and publish the credentials as one new snapshot.
    pub async fn refresh(&self, provider: &RotatingConfig) -> Result<()> {
        let credentials = self.load().await?;
        provider.rotate(credentials);
        tracing::info!(base_dir = %self.base_dir.display(), "role credentials assigned");
        Ok(())
    }

    /// Re-read the files every `interval` until `cancellation` fires.
    ///
    /// A failed read is logged and the last good snapshot stays in place.
    pub fn watch(
        self,
        provider: Arc<RotatingConfig>,
        interval: Duration,
        cancellation: Cancellation,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // the first tick completes immediately
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = cancellation.cancelled() => break,
                    _ = ticker.tick() => {
                        if let Err(error) = self.refresh(&provider).await {
                            tracing::warn!(%error, "role credential refresh failed, keeping previous credentials");
                        }
                    }
                }
            }
            tracing::debug!("role credential watch stopped");
        })
    }
}

/// A [`RotatingConfig`] refreshed by a role file watcher.
///
/// The watcher stops when the linked cancellation fires or when this provider
/// is dropped, whichever comes first.
#[derive(Debug)]
pub struct WatchedConfig {
    config: Arc<RotatingConfig>,
    watcher: JoinHandle<()>,
}

impl WatchedConfig {
    /// Start watching `files` into `config`.
    pub fn start(
        files: RoleFiles,
        config: Arc<RotatingConfig>,
        interval: Duration,
        cancellation: Cancellation,
    ) -> Self {
        let watcher = files.watch(Arc::clone(&config), interval, cancellation);
        Self { config, watcher }
    }

    /// Whether the watcher task has stopped.
    pub fn is_stopped(&self) -> bool {
        self.watcher.is_finished()
    }
}

impl ConfigProvider for WatchedConfig {
    fn snapshot(&self) -> Arc<Snapshot> {
        self.config.snapshot()
    }
}

impl Drop for WatchedConfig {
    fn drop(&mut self) {
        self.watcher.abort();
    }
}
