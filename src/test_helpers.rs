//! Shared test helpers: scriptable transport stub and response builders.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use crate::error::Result;
use crate::transport::Transport;
use crate::types::{Request, Response};

/// Scriptable [`Transport`] for tests.
///
/// The handler receives the request and the 1-based call number, so tests
/// can express behaviors like "time out twice, then succeed".
pub(crate) struct StubTransport {
    handler: Box<dyn Fn(&Request, u32) -> Result<Response> + Send + Sync>,
    calls: AtomicU32,
    delay: Option<Duration>,
}

impl StubTransport {
    pub(crate) fn new(
        handler: impl Fn(&Request, u32) -> Result<Response> + Send + Sync + 'static,
    ) -> Self {
        Self {
            handler: Box::new(handler),
            calls: AtomicU32::new(0),
            delay: None,
        }
    }

    /// Sleep this long before answering, to simulate a slow upstream.
    pub(crate) fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Total number of transport calls so far.
    pub(crate) fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    pub(crate) fn into_arc(self) -> Arc<Self> {
        Arc::new(self)
    }
}

#[async_trait::async_trait]
impl Transport for StubTransport {
    async fn execute(&self, request: &Request) -> Result<Response> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        (self.handler)(request, call)
    }
}

/// In-memory [`Sink`](crate::sink::Sink) recording persisted artifacts.
#[derive(Default)]
pub(crate) struct MemorySink {
    store: tokio::sync::Mutex<std::collections::HashMap<String, Vec<u8>>>,
    fail: tokio::sync::Mutex<std::collections::HashSet<String>>,
}

impl MemorySink {
    /// Mark an artifact as already persisted.
    pub(crate) async fn preload(&self, id: &str, data: &[u8]) {
        self.store
            .lock()
            .await
            .insert(id.to_string(), data.to_vec());
    }

    /// Make future persists of this id fail.
    pub(crate) async fn fail_persist_of(&self, id: &str) {
        self.fail.lock().await.insert(id.to_string());
    }

    /// Snapshot of everything persisted so far.
    pub(crate) async fn stored(&self) -> std::collections::HashMap<String, Vec<u8>> {
        self.store.lock().await.clone()
    }
}

#[async_trait::async_trait]
impl crate::sink::Sink for MemorySink {
    async fn exists(&self, id: &crate::types::ItemId) -> bool {
        self.store.lock().await.contains_key(id.as_str())
    }

    async fn persist(
        &self,
        id: &crate::types::ItemId,
        artifact: crate::types::Artifact,
    ) -> Result<()> {
        if self.fail.lock().await.contains(id.as_str()) {
            return Err(crate::error::Error::Persistence(format!(
                "injected persist failure for '{id}'"
            )));
        }
        self.store
            .lock()
            .await
            .insert(id.to_string(), artifact.data);
        Ok(())
    }
}

/// Build a response echoing the request URL, with the given status and body.
pub(crate) fn response_for(request: &Request, status: u16, body: &str) -> Response {
    Response {
        status,
        final_url: request.url().clone(),
        content_type: Some("text/html".to_string()),
        body: body.as_bytes().to_vec(),
    }
}

/// A transport that answers every request with 200 and the request URL as body.
pub(crate) fn echo_transport() -> StubTransport {
    StubTransport::new(|request, _| {
        let body = request.url().to_string();
        Ok(response_for(request, 200, &body))
    })
}
