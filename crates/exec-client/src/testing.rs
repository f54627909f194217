use crate::transport::{HttpRequest, HttpResponse, HttpSend, TransportError};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;

/// Replays queued responses in order and records every request it sees.
#[derive(Default)]
pub(crate) struct ScriptedSender {
    script: Mutex<VecDeque<Result<HttpResponse, TransportError>>>,
    calls: Mutex<Vec<(HttpRequest, Instant)>>,
}

impl ScriptedSender {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub(crate) fn push(&self, outcome: Result<HttpResponse, TransportError>) {
        self.script.lock().expect("script lock").push_back(outcome);
    }

    pub(crate) fn push_status(&self, status: u16, body: &str) {
        self.push(Ok(HttpResponse::new(status, body)));
    }

    pub(crate) fn push_json(&self, status: u16, body: serde_json::Value) {
        self.push(Ok(HttpResponse::new(status, body.to_string())));
    }

    pub(crate) fn requests(&self) -> Vec<HttpRequest> {
        self.calls
            .lock()
            .expect("calls lock")
            .iter()
            .map(|(request, _)| request.clone())
            .collect()
    }

    pub(crate) fn call_count(&self) -> usize {
        self.calls.lock().expect("calls lock").len()
    }

    /// Number of requests whose URL contains `fragment`.
    pub(crate) fn count_matching(&self, fragment: &str) -> usize {
        self.requests()
            .iter()
            .filter(|request| request.url.contains(fragment))
            .count()
    }

    /// Time between consecutive requests.
    pub(crate) fn gaps(&self) -> Vec<Duration> {
        let calls = self.calls.lock().expect("calls lock");
        calls
            .windows(2)
            .map(|pair| pair[1].1.duration_since(pair[0].1))
            .collect()
    }
}

#[async_trait]
impl HttpSend for ScriptedSender {
    async fn send(&self, request: &HttpRequest) -> Result<HttpResponse, TransportError> {
        self.calls
            .lock()
            .expect("calls lock")
            .push((request.clone(), Instant::now()));
        self.script
            .lock()
            .expect("script lock")
            .pop_front()
            .unwrap_or_else(|| Err(TransportError::new("script exhausted")))
    }
}
