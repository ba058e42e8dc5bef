//! Scripted transport and fixtures shared by unit tests.

use crate::{
    config::snapshot::{Credentials, Snapshot, StaticConfig},
    dispatch::{Dispatcher, RetryPolicy},
    error::TransportError,
    transport::{RawResponse, SignedRequest, Transport},
};

use async_trait::async_trait;
use parking_lot::Mutex;
use std::{collections, sync::Arc, time::Duration};

type Handler = dyn Fn(&SignedRequest) -> Result<RawResponse, TransportError> + Send + Sync;

/// Answers every request with a closure and records what it was sent.
pub(crate) struct ScriptedTransport {
    handler: Box<Handler>,
    requests: Mutex<Vec<SignedRequest>>,
}

impl ScriptedTransport {
    pub(crate) fn new(
        handler: impl Fn(&SignedRequest) -> Result<RawResponse, TransportError> + Send + Sync + 'static,
    ) -> Self {
        Self {
            handler: Box::new(handler),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn always(response: RawResponse) -> Self {
        Self::new(move |_| Ok(response.clone()))
    }

    /// Answers in order; the last answer repeats.
    pub(crate) fn sequence(responses: Vec<Result<RawResponse, TransportError>>) -> Self {
        let queue = Mutex::new(collections::VecDeque::from(responses));
        Self::new(move |_| {
            let mut queue = queue.lock();
            match queue.len() {
                0 => Err(TransportError("script exhausted".to_string())),
                1 => queue[0].clone(),
                _ => queue.pop_front().unwrap(),
            }
        })
    }

    pub(crate) fn requests(&self) -> Vec<SignedRequest> {
        self.requests.lock().clone()
    }

    pub(crate) fn calls(&self) -> usize {
        self.requests.lock().len()
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn post(&self, request: SignedRequest) -> Result<RawResponse, TransportError> {
        let result = (self.handler)(&request);
        self.requests.lock().push(request);
        result
    }
}

pub(crate) fn response(status: u16, body: &str) -> RawResponse {
    RawResponse {
        status,
        body: body.as_bytes().to_vec(),
        request_id: Some("REQUEST-ID".to_string()),
    }
}

pub(crate) fn snapshot() -> Snapshot {
    Snapshot {
        credentials: Credentials::new("AKID", "secret"),
        ..Default::default()
    }
}

/// Retries without sleeping.
pub(crate) fn immediate() -> RetryPolicy {
    RetryPolicy {
        base_delay: Duration::ZERO,
        ..Default::default()
    }
}

pub(crate) fn dispatcher(transport: ScriptedTransport) -> Dispatcher<ScriptedTransport> {
    Dispatcher::new(transport, Arc::new(StaticConfig::new(snapshot()))).with_policy(immediate())
}

/// Parse a recorded request body.
pub(crate) fn body(request: &SignedRequest) -> serde_json::Value {
    serde_json::from_slice(&request.body).unwrap()
}
