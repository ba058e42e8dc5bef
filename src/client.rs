use crate::{
    batch::{BatchEngine, BatchOperation, BatchPolicy},
    cancel::Cancellation,
    config::{
        settings::{HttpSettings, Settings},
        snapshot::ConfigProvider,
    },
    dispatch::{Dispatcher, RequestEnvelope, Response, RetryPolicy},
    error::{Error, Result},
    read::batch_get_item::{BatchGetItemInput, BatchGetItemOutput},
    transport::{HttpTransport, KeepAlive, Transport},
    write::batch_write_item::{BatchWriteItemInput, BatchWriteItemOutput},
};

use serde::{Serialize, de::DeserializeOwned};
use std::{sync::Arc, time::Duration};

/// Entry point: signed, retried requests and batches of any size.
///
/// ```rust,no_run
/// use dynamodb_direct::{
///     cancel,
///     client::Client,
///     config::settings::Settings,
/// };
///
/// # async fn example() -> dynamodb_direct::error::Result<()> {
/// let (_handle, cancellation) = cancel::pair();
/// let settings = Settings::load()?;
/// let client = Client::from_settings(&settings, cancellation).await?;
/// let _tables: serde_json::Value = client.call("ListTables", &serde_json::json!({})).await?;
/// # Ok(())
/// # }
/// ```
pub struct Client<T = HttpTransport> {
    engine: BatchEngine<T>,
    cancellation: Cancellation,
    keep_alive: Option<Arc<KeepAlive>>,
}

impl<T> Clone for Client<T> {
    fn clone(&self) -> Self {
        Self {
            engine: self.engine.clone(),
            cancellation: self.cancellation.clone(),
            keep_alive: self.keep_alive.clone(),
        }
    }
}

impl<T> std::fmt::Debug for Client<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("engine", &self.engine)
            .finish_non_exhaustive()
    }
}

impl Client<HttpTransport> {
    /// A client over a pooled HTTP transport.
    pub fn new(provider: Arc<dyn ConfigProvider>, http: &HttpSettings) -> Result<Self> {
        Ok(Self::with_transport(HttpTransport::new(http)?, provider))
    }

    /// A client fully described by `settings`.
    ///
    /// `cancellation` also stops the role-file watcher and the keep-alive
    /// requests, when they are started. Keep-alive requests also stop once the
    /// last clone of the client is dropped.
    pub async fn from_settings(settings: &Settings, cancellation: Cancellation) -> Result<Self> {
        let provider = settings.provider(cancellation.clone()).await?;
        let url = provider.snapshot().endpoint.url();
        let mut client = Self::new(provider, &settings.http)?
            .with_retry_policy(settings.retry_policy())
            .with_batch_policy(settings.batch_policy())
            .with_cancellation(cancellation.clone());
        if let Some(secs) = settings.http.keep_alive_secs {
            let interval = Duration::from_secs(secs.max(1));
            tracing::info!(%url, ?interval, "keeping connections alive");
            let keep_alive = client
                .dispatcher()
                .transport()
                .keep_alive(vec![url], interval, cancellation);
            client.keep_alive = Some(Arc::new(keep_alive));
        }
        Ok(client)
    }
}

impl<T: Transport> Client<T> {
    /// A client over any transport.
    pub fn with_transport(transport: T, provider: Arc<dyn ConfigProvider>) -> Self {
        Self {
            engine: BatchEngine::new(Dispatcher::new(transport, provider), BatchPolicy::default()),
            cancellation: Cancellation::never(),
            keep_alive: None,
        }
    }

    /// Replace the retry policy.
    pub fn with_retry_policy(self, policy: RetryPolicy) -> Self {
        let dispatcher = self.engine.dispatcher().clone().with_policy(policy);
        Self {
            engine: BatchEngine::new(dispatcher, self.engine.policy()),
            ..self
        }
    }

    /// Replace the resubmission bounds.
    pub fn with_batch_policy(self, policy: BatchPolicy) -> Self {
        Self {
            engine: BatchEngine::new(self.engine.dispatcher().clone(), policy),
            ..self
        }
    }

    /// Observe `cancellation` in every request.
    pub fn with_cancellation(mut self, cancellation: Cancellation) -> Self {
        self.cancellation = cancellation;
        self
    }

    /// The underlying dispatcher.
    pub fn dispatcher(&self) -> &Dispatcher<T> {
        self.engine.dispatcher()
    }

    /// Send an envelope and return the first non-retryable response, whatever its status.
    #[tracing::instrument(name = "dynamodb_direct.send", skip_all, fields(target = %envelope.target), err)]
    pub async fn send(&self, envelope: &RequestEnvelope) -> Result<Response> {
        self.engine
            .dispatcher()
            .send(envelope, &self.cancellation)
            .await
    }

    /// Send an envelope; a non-2xx response becomes [`crate::error::Error::Service`].
    pub async fn request(&self, envelope: &RequestEnvelope) -> Result<Response> {
        self.send(envelope).await?.error_for_status(&envelope.target)
    }

    /// Serialize `input` for `operation`, send it and deserialize the answer.
    pub async fn call<I, O>(&self, operation: &str, input: &I) -> Result<O>
    where
        I: Serialize + ?Sized,
        O: DeserializeOwned,
    {
        let envelope = RequestEnvelope::json(operation, input)?;
        let response = self.request(&envelope).await?;
        serde_json::from_slice(&response.body)
            .map_err(|error| Error::serialization(&envelope.target, error))
    }

    /// Run any batch operation at its service limit per call.
    pub async fn batch<O: BatchOperation>(&self, input: O) -> Result<O::Output> {
        self.engine
            .run(input, O::PER_CALL_LIMIT, &self.cancellation)
            .await
    }

    /// Read any number of keys, resolving unprocessed keys.
    #[tracing::instrument(name = "dynamodb_direct.batch_get_item", skip_all, err)]
    pub async fn batch_get_item(&self, input: BatchGetItemInput) -> Result<BatchGetItemOutput> {
        self.batch(input).await
    }

    /// Write any number of items, resolving unprocessed writes.
    #[tracing::instrument(name = "dynamodb_direct.batch_write_item", skip_all, err)]
    pub async fn batch_write_item(
        &self,
        input: BatchWriteItemInput,
    ) -> Result<BatchWriteItemOutput> {
        self.batch(input).await
    }
}
