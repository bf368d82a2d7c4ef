use anyhow::{anyhow, Result};
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use std::sync::Mutex;

use crate::providers::base::{Backend, Provider, QueryRequest, Usage};

/// A mock provider that returns pre-configured raw responses for testing.
///
/// `None` entries simulate a failed model query. Every request is recorded.
pub struct MockProvider {
    backend: Backend,
    responses: Arc<Mutex<Vec<Option<Value>>>>,
    requests: Arc<Mutex<Vec<QueryRequest>>>,
}

impl MockProvider {
    /// Create a new mock provider with a sequence of responses
    pub fn new(backend: Backend, responses: Vec<Value>) -> Self {
        Self::with_failures(backend, responses.into_iter().map(Some).collect())
    }

    pub fn with_failures(backend: Backend, responses: Vec<Option<Value>>) -> Self {
        Self {
            backend,
            responses: Arc::new(Mutex::new(responses)),
            requests: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn requests(&self) -> Vec<QueryRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl Provider for MockProvider {
    fn backend(&self) -> Backend {
        self.backend
    }

    async fn complete(&self, request: &QueryRequest) -> Result<(Value, Usage)> {
        self.requests.lock().unwrap().push(request.clone());

        let mut responses = self.responses.lock().unwrap();
        if responses.is_empty() {
            return Err(anyhow!("No more mock responses"));
        }
        match responses.remove(0) {
            Some(response) => Ok((response, Usage::new(Some(1), Some(1), Some(2)))),
            None => Err(anyhow!("Server error: 500 Internal Server Error")),
        }
    }
}
