//! Signed, retrying dispatch of one request envelope.
//!
//! Each attempt takes a fresh snapshot and a fresh timestamp, signs, posts and
//! classifies the outcome. Retryable outcomes are retried with exponential
//! jitter up to [`RetryPolicy::max_attempts`]; everything else is returned as-is.

use crate::{
    cancel::Cancellation,
    config::snapshot::ConfigProvider,
    error::{Error, Result, TransportError, excerpt},
    signer::{self, SigningContext},
    transport::{RawResponse, SignedRequest, Transport},
};

use chrono::Utc;
use rand::Rng;
use serde::Serialize;
use std::{fmt, sync::Arc, time::Duration};

/// API version every target is prefixed with.
pub const API_VERSION: &str = "DynamoDB_20120810";

/// Body marker of a throughput-exceeded rejection.
pub const EXCEEDED_MSG: &str = "ProvisionedThroughputExceededException";

/// Body marker of a rejected client, seen transiently during credential rotation.
pub const UNRECOGNIZED_CLIENT_MSG: &str = "UnrecognizedClientException";

/// Body marker of a throttled request.
pub const THROTTLING_MSG: &str = "ThrottlingException";

const RETRYABLE_BAD_REQUESTS: [&str; 3] = [EXCEEDED_MSG, THROTTLING_MSG, UNRECOGNIZED_CLIENT_MSG];

/// The `X-Amz-Target` value of an operation, e.g. `DynamoDB_20120810.BatchGetItem`.
pub fn target(operation: &str) -> String {
    format!("{API_VERSION}.{operation}")
}

/// Whether a response with this status and body should be retried.
///
/// Every 5xx is retried. A 400 is retried only when the body names throughput,
/// throttling or an unrecognized client. Anything else is final.
pub fn classify(status: u16, body: &[u8]) -> bool {
    match status {
        500.. => true,
        400 => {
            let body = String::from_utf8_lossy(body);
            RETRYABLE_BAD_REQUESTS
                .iter()
                .any(|marker| body.contains(marker))
        }
        _ => false,
    }
}

/// The unit of work handed to the dispatcher: a payload and its target action.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct RequestEnvelope {
    /// Serialized JSON request.
    pub payload: Vec<u8>,
    /// Full target action, e.g. `DynamoDB_20120810.PutItem`.
    pub target: String,
}

impl RequestEnvelope {
    /// Wrap an already serialized payload.
    pub fn new(target: impl Into<String>, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            payload: payload.into(),
            target: target.into(),
        }
    }

    /// Serialize `request` for `operation`.
    ///
    /// ```rust
    /// use dynamodb_direct::dispatch::RequestEnvelope;
    ///
    /// let envelope = RequestEnvelope::json("ListTables", &serde_json::json!({})).unwrap();
    /// assert_eq!(envelope.target, "DynamoDB_20120810.ListTables");
    /// assert_eq!(envelope.payload, b"{}");
    /// ```
    pub fn json<T: Serialize + ?Sized>(operation: &str, request: &T) -> Result<Self> {
        let target = target(operation);
        let payload =
            serde_json::to_vec(request).map_err(|error| Error::serialization(&target, error))?;
        Ok(Self::new(target, payload))
    }
}

/// The classified outcome of one attempt.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct AttemptOutcome {
    /// HTTP status, `None` when the transport failed.
    pub status: Option<u16>,
    /// Response body.
    pub body: Vec<u8>,
    /// Service-assigned request id.
    pub request_id: Option<String>,
    /// Transport failure, if any.
    pub error: Option<TransportError>,
    /// Whether another attempt should be made.
    pub retryable: bool,
}

impl From<RawResponse> for AttemptOutcome {
    fn from(response: RawResponse) -> Self {
        let retryable = classify(response.status, &response.body);
        Self {
            status: Some(response.status),
            body: response.body,
            request_id: response.request_id,
            error: None,
            retryable,
        }
    }
}

impl From<TransportError> for AttemptOutcome {
    fn from(error: TransportError) -> Self {
        Self {
            error: Some(error),
            retryable: true,
            ..Default::default()
        }
    }
}

impl AttemptOutcome {
    fn failure(&self) -> String {
        match &self.error {
            Some(error) => error.to_string(),
            None => excerpt(&self.body),
        }
    }

    fn into_response(self) -> Response {
        Response {
            status: self.status.unwrap_or_default(),
            body: self.body,
            request_id: self.request_id,
        }
    }
}

/// A non-retryable answer from the service.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Response {
    /// HTTP status code.
    pub status: u16,
    /// Response body; callers deserialize it themselves.
    pub body: Vec<u8>,
    /// Service-assigned request id.
    pub request_id: Option<String>,
}

impl Response {
    /// Whether the status is 2xx.
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Turn a non-2xx response into [`Error::Service`].
    pub fn error_for_status(self, target: &str) -> Result<Self> {
        if self.is_success() {
            return Ok(self);
        }
        Err(Error::Service {
            target: target.to_string(),
            status: self.status,
            request_id: self.request_id,
            body: excerpt(&self.body),
        })
    }
}

/// Bounds of the retry loop.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts, first one included.
    pub max_attempts: u32,
    /// Base of the jitter; retry `i` sleeps in `[0, 4^i * base_delay)`.
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 7,
            base_delay: Duration::from_millis(100),
        }
    }
}

impl RetryPolicy {
    /// Exclusive upper bound of the sleep before retry `retry` (1-based).
    pub fn backoff_ceiling(&self, retry: u32) -> Duration {
        self.base_delay.saturating_mul(4u32.saturating_pow(retry))
    }

    /// A sleep drawn uniformly from `[0, backoff_ceiling(retry))`.
    pub fn backoff(&self, retry: u32) -> Duration {
        let ceiling = u64::try_from(self.backoff_ceiling(retry).as_millis()).unwrap_or(u64::MAX);
        if ceiling == 0 {
            return Duration::ZERO;
        }
        Duration::from_millis(rand::thread_rng().gen_range(0..ceiling))
    }
}

/// Signs, sends and retries request envelopes.
///
/// Cloning is cheap: the transport and provider are shared.
pub struct Dispatcher<T> {
    transport: Arc<T>,
    provider: Arc<dyn ConfigProvider>,
    policy: RetryPolicy,
}

impl<T> Clone for Dispatcher<T> {
    fn clone(&self) -> Self {
        Self {
            transport: Arc::clone(&self.transport),
            provider: Arc::clone(&self.provider),
            policy: self.policy,
        }
    }
}

impl<T> fmt::Debug for Dispatcher<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dispatcher")
            .field("provider", &self.provider)
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

impl<T: Transport> Dispatcher<T> {
    /// Dispatch over `transport`, signing with snapshots from `provider`.
    pub fn new(transport: T, provider: Arc<dyn ConfigProvider>) -> Self {
        Self {
            transport: Arc::new(transport),
            provider,
            policy: RetryPolicy::default(),
        }
    }

    /// Replace the retry policy.
    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// The retry policy in use.
    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }

    /// The underlying transport.
    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Sign `envelope` with the current snapshot and the current time.
    pub fn prepare(&self, envelope: &RequestEnvelope) -> Result<SignedRequest> {
        let snapshot = self.provider.snapshot();
        let context = SigningContext::new(
            &snapshot.endpoint,
            &envelope.target,
            &envelope.payload,
            Utc::now(),
        );
        let authorization = signer::sign(&context, &snapshot.credentials)?;
        let mut headers = vec![("Content-Type", signer::CONTENT_TYPE.to_string())];
        if !envelope.target.is_empty() {
            headers.push(("X-Amz-Target", envelope.target.clone()));
        }
        headers.push(("X-Amz-Date", authorization.amz_date));
        headers.push(("Authorization", authorization.authorization));
        if let Some(token) = authorization.security_token {
            headers.push(("X-Amz-Security-Token", token));
        }
        Ok(SignedRequest {
            url: snapshot.endpoint.url(),
            headers,
            body: envelope.payload.clone(),
        })
    }

    /// Make exactly one attempt and classify it.
    pub async fn attempt(
        &self,
        envelope: &RequestEnvelope,
        cancellation: &Cancellation,
    ) -> Result<AttemptOutcome> {
        let request = self.prepare(envelope)?;
        tokio::select! {
            biased;
            _ = cancellation.cancelled() => Err(Error::cancelled(&envelope.target)),
            result = self.transport.post(request) => Ok(match result {
                Ok(response) => response.into(),
                Err(error) => error.into(),
            }),
        }
    }

    /// Send `envelope`, retrying retryable outcomes.
    ///
    /// Returns the first non-retryable response whatever its status; use
    /// [`Response::error_for_status`] to treat non-2xx as an error.
    #[tracing::instrument(
        name = "dynamodb_direct.dispatch",
        skip_all,
        fields(target = %envelope.target),
        err
    )]
    pub async fn send(
        &self,
        envelope: &RequestEnvelope,
        cancellation: &Cancellation,
    ) -> Result<Response> {
        let max_attempts = self.policy.max_attempts.max(1);
        let mut last = AttemptOutcome::default();
        for attempt in 1..=max_attempts {
            if attempt > 1 {
                let delay = self.policy.backoff(attempt - 1);
                tracing::debug!(attempt, ?delay, "backing off");
                tokio::select! {
                    biased;
                    _ = cancellation.cancelled() => return Err(Error::cancelled(&envelope.target)),
                    _ = tokio::time::sleep(delay) => {}
                }
            }
            let outcome = self.attempt(envelope, cancellation).await?;
            if !outcome.retryable {
                return Ok(outcome.into_response());
            }
            tracing::warn!(
                attempt,
                max_attempts,
                status = ?outcome.status,
                request_id = ?outcome.request_id,
                failure = %outcome.failure(),
                "retryable failure"
            );
            last = outcome;
        }
        Err(Error::ExhaustedRetries {
            target: envelope.target.clone(),
            attempts: max_attempts,
            last_status: last.status,
            last_failure: last.failure(),
            payload: excerpt(&envelope.payload),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::{
        cancel,
        config::snapshot::{Credentials, RotatingConfig, Snapshot, StaticConfig},
        testing::{self, ScriptedTransport},
    };

    use rstest::rstest;

    fn list_tables() -> RequestEnvelope {
        RequestEnvelope::new(target("ListTables"), "{}")
    }

    #[rstest]
    #[case::ok(200, "{}", false)]
    #[case::not_found(404, "", false)]
    #[case::server_error(500, "", true)]
    #[case::unavailable(503, "", true)]
    #[case::throughput(400, r#"{"__type":"com.amazonaws.dynamodb.v20120810#ProvisionedThroughputExceededException"}"#, true)]
    #[case::throttling(400, r#"{"__type":"com.amazon.coral.availability#ThrottlingException"}"#, true)]
    #[case::unrecognized_client(400, r#"{"__type":"com.amazon.coral.service#UnrecognizedClientException"}"#, true)]
    #[case::validation(400, r#"{"__type":"com.amazon.coral.validate#ValidationException"}"#, false)]
    #[case::throttling_on_403(403, "ThrottlingException", false)]
    fn test_classify(#[case] status: u16, #[case] body: &str, #[case] expected: bool) {
        assert_eq!(classify(status, body.as_bytes()), expected);
    }

    #[test]
    fn test_backoff_bounds() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.backoff_ceiling(1), Duration::from_millis(400));
        assert_eq!(policy.backoff_ceiling(6), Duration::from_millis(409_600));
        for retry in 1..7 {
            assert!(policy.backoff(retry) < policy.backoff_ceiling(retry));
        }
        let immediate = RetryPolicy {
            base_delay: Duration::ZERO,
            ..policy
        };
        assert_eq!(immediate.backoff(3), Duration::ZERO);
    }

    #[test]
    fn test_envelope_json_target() {
        let envelope = RequestEnvelope::json("PutItem", &serde_json::json!({"a": 1})).unwrap();
        assert_eq!(envelope.target, "DynamoDB_20120810.PutItem");
        assert_eq!(envelope.payload, br#"{"a":1}"#);
    }

    #[test]
    fn test_error_for_status() {
        let response = Response {
            status: 400,
            body: b"bad".to_vec(),
            request_id: Some("id".to_string()),
        };
        let error = response.error_for_status("t").unwrap_err();
        assert!(matches!(
            error,
            Error::Service { status: 400, ref body, .. } if body == "bad"
        ));
    }

    #[tokio::test]
    async fn test_signed_headers_are_sent() {
        let dispatcher = testing::dispatcher(ScriptedTransport::always(testing::response(200, "{}")));
        dispatcher
            .send(&list_tables(), &Cancellation::never())
            .await
            .unwrap();
        let requests = dispatcher.transport().requests();
        assert_eq!(requests.len(), 1);
        let request = &requests[0];
        assert_eq!(request.url, "https://dynamodb.us-east-1.amazonaws.com/");
        assert_eq!(request.header("content-type"), Some(signer::CONTENT_TYPE));
        assert_eq!(
            request.header("x-amz-target"),
            Some("DynamoDB_20120810.ListTables")
        );
        assert_eq!(request.header("x-amz-date").map(str::len), Some(16));
        assert!(
            request
                .header("authorization")
                .unwrap()
                .starts_with("AWS4-HMAC-SHA256 Credential=AKID/")
        );
        assert_eq!(request.header("x-amz-security-token"), None);
        assert_eq!(request.body, b"{}");
    }

    #[tokio::test]
    async fn test_session_token_header() {
        let provider = Arc::new(StaticConfig::new(Snapshot {
            credentials: Credentials::session("AKID", "secret", "token"),
            ..Default::default()
        }));
        let dispatcher = Dispatcher::new(
            ScriptedTransport::always(testing::response(200, "{}")),
            provider,
        );
        dispatcher
            .send(&list_tables(), &Cancellation::never())
            .await
            .unwrap();
        let requests = dispatcher.transport().requests();
        assert_eq!(requests[0].header("x-amz-security-token"), Some("token"));
    }

    #[tokio::test]
    async fn test_missing_credentials_fail_before_sending() {
        let provider = Arc::new(StaticConfig::new(Snapshot::default()));
        let dispatcher = Dispatcher::new(
            ScriptedTransport::always(testing::response(200, "{}")),
            provider,
        );
        let result = dispatcher.send(&list_tables(), &Cancellation::never()).await;
        let error = result.unwrap_err();
        assert!(matches!(
            &error,
            Error::Signing { target, .. } if target == "DynamoDB_20120810.ListTables"
        ));
        assert!(error.to_string().starts_with("DynamoDB_20120810.ListTables"));
        assert_eq!(dispatcher.transport().calls(), 0);
    }

    #[tokio::test]
    async fn test_throttling_is_retried() {
        let dispatcher = testing::dispatcher(ScriptedTransport::sequence(vec![
            Ok(testing::response(400, THROTTLING_MSG)),
            Ok(testing::response(200, "{}")),
        ]));
        let response = dispatcher
            .send(&list_tables(), &Cancellation::never())
            .await
            .unwrap();
        assert_eq!(response.status, 200);
        assert_eq!(dispatcher.transport().calls(), 2);
    }

    #[tokio::test]
    async fn test_unrelated_bad_request_is_returned_immediately() {
        let dispatcher = testing::dispatcher(ScriptedTransport::always(testing::response(
            400,
            "ValidationException",
        )));
        let response = dispatcher
            .send(&list_tables(), &Cancellation::never())
            .await
            .unwrap();
        assert_eq!(response.status, 400);
        assert_eq!(response.body, b"ValidationException");
        assert_eq!(dispatcher.transport().calls(), 1);
    }

    #[tokio::test]
    async fn test_transport_errors_are_retried() {
        let dispatcher = testing::dispatcher(ScriptedTransport::sequence(vec![
            Err(TransportError("connection reset".to_string())),
            Ok(testing::response(200, "{}")),
        ]));
        let response = dispatcher
            .send(&list_tables(), &Cancellation::never())
            .await
            .unwrap();
        assert!(response.is_success());
        assert_eq!(dispatcher.transport().calls(), 2);
    }

    #[tokio::test]
    async fn test_exhausted_retries() {
        let dispatcher = testing::dispatcher(ScriptedTransport::always(testing::response(
            503,
            "unavailable",
        )));
        let result = dispatcher.send(&list_tables(), &Cancellation::never()).await;
        match result {
            Err(Error::ExhaustedRetries {
                target,
                attempts,
                last_status,
                last_failure,
                payload,
            }) => {
                assert_eq!(target, "DynamoDB_20120810.ListTables");
                assert_eq!(attempts, 7);
                assert_eq!(last_status, Some(503));
                assert_eq!(last_failure, "unavailable");
                assert_eq!(payload, "{}");
            }
            other => panic!("unexpected result: {other:?}"),
        }
        assert_eq!(dispatcher.transport().calls(), 7);
    }

    #[tokio::test]
    async fn test_every_attempt_takes_a_fresh_snapshot() {
        let provider = Arc::new(RotatingConfig::new(testing::snapshot()));
        let rotating = Arc::clone(&provider);
        let transport = ScriptedTransport::new(move |_| {
            if rotating.snapshot().credentials.access_key == "AKID" {
                rotating.rotate(Credentials::new("ROTATED", "rotated-secret"));
                return Ok(testing::response(500, ""));
            }
            Ok(testing::response(200, "{}"))
        });
        let dispatcher = Dispatcher::new(transport, provider).with_policy(testing::immediate());
        dispatcher
            .send(&list_tables(), &Cancellation::never())
            .await
            .unwrap();
        let requests = dispatcher.transport().requests();
        assert_eq!(requests.len(), 2);
        assert!(requests[0].header("authorization").unwrap().contains("Credential=AKID/"));
        assert!(requests[1].header("authorization").unwrap().contains("Credential=ROTATED/"));
    }

    #[tokio::test]
    async fn test_cancelled_before_sending() {
        let dispatcher = testing::dispatcher(ScriptedTransport::always(testing::response(200, "{}")));
        let (handle, cancellation) = cancel::pair();
        handle.cancel();
        let result = dispatcher.send(&list_tables(), &cancellation).await;
        assert!(matches!(result, Err(Error::Cancelled { .. })));
        assert_eq!(dispatcher.transport().calls(), 0);
    }

    #[tokio::test]
    async fn test_cancel_interrupts_backoff() {
        let dispatcher = Dispatcher::new(
            ScriptedTransport::always(testing::response(500, "")),
            Arc::new(StaticConfig::new(testing::snapshot())),
        )
        .with_policy(RetryPolicy {
            max_attempts: 7,
            base_delay: Duration::from_secs(3600),
        });
        let (handle, cancellation) = cancel::pair();
        let canceller = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            handle.cancel();
        });
        let result = tokio::time::timeout(
            Duration::from_secs(5),
            dispatcher.send(&list_tables(), &cancellation),
        )
        .await
        .unwrap();
        canceller.await.unwrap();
        assert!(matches!(result, Err(Error::Cancelled { .. })));
        assert_eq!(dispatcher.transport().calls(), 1);
    }
}
