//! Mock implementations for testing
//!
//! Queue-driven fakes for the handler, classifier and LLM ports. Each mock
//! records what it was asked so tests can assert on the exchange.

use crate::handler::{Handler, HandlerError, HandlerSession, Reply};
use crate::llm::{LlmError, LlmRequest, LlmResponse, LlmService};
use crate::router::{
    Classification, ClassificationRequest, Classifier, ClassifyError, RoutingScope,
};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

// ============================================================================
// Mock Handler
// ============================================================================

#[derive(Default)]
struct HandlerLog {
    replies: Mutex<VecDeque<Result<Reply, HandlerError>>>,
    open_errors: Mutex<VecDeque<HandlerError>>,
    prompts: Mutex<Vec<String>>,
    handoffs: Mutex<Vec<String>>,
    opened: AtomicUsize,
    closed: AtomicUsize,
    acquired: AtomicUsize,
    released: AtomicUsize,
}

/// Handler whose sessions answer from a shared queue
pub struct MockHandler {
    name: String,
    delay: Option<Duration>,
    log: Arc<HandlerLog>,
}

#[allow(dead_code)] // Not every test uses every accessor
impl MockHandler {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            delay: None,
            log: Arc::new(HandlerLog::default()),
        }
    }

    /// Sleep before every invoke
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Queue a reply; with an empty queue sessions answer "<name> reply"
    pub fn queue_reply(&self, reply: Reply) {
        self.log.replies.lock().unwrap().push_back(Ok(reply));
    }

    pub fn queue_error(&self, error: HandlerError) {
        self.log.replies.lock().unwrap().push_back(Err(error));
    }

    /// Make the next `open_session` fail
    pub fn fail_next_open(&self, error: HandlerError) {
        self.log.open_errors.lock().unwrap().push_back(error);
    }

    pub fn prompts(&self) -> Vec<String> {
        self.log.prompts.lock().unwrap().clone()
    }

    pub fn handoffs(&self) -> Vec<String> {
        self.log.handoffs.lock().unwrap().clone()
    }

    pub fn opened(&self) -> usize {
        self.log.opened.load(Ordering::SeqCst)
    }

    pub fn closed(&self) -> usize {
        self.log.closed.load(Ordering::SeqCst)
    }

    pub fn acquired(&self) -> usize {
        self.log.acquired.load(Ordering::SeqCst)
    }

    pub fn released(&self) -> usize {
        self.log.released.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Handler for MockHandler {
    fn name(&self) -> &str {
        &self.name
    }

    async fn open_session(&self) -> Result<Box<dyn HandlerSession>, HandlerError> {
        if let Some(error) = self.log.open_errors.lock().unwrap().pop_front() {
            return Err(error);
        }
        let n = self.log.opened.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MockSession {
            id: format!("{}-{n}", self.name),
            name: self.name.clone(),
            delay: self.delay,
            log: self.log.clone(),
        }))
    }
}

struct MockSession {
    id: String,
    name: String,
    delay: Option<Duration>,
    log: Arc<HandlerLog>,
}

#[async_trait]
impl HandlerSession for MockSession {
    fn id(&self) -> &str {
        &self.id
    }

    async fn acquire(&mut self) -> Result<(), HandlerError> {
        self.log.acquired.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn invoke(&mut self, prompt: &str) -> Result<Reply, HandlerError> {
        self.log.prompts.lock().unwrap().push(prompt.to_string());
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let next = self.log.replies.lock().unwrap().pop_front();
        next.unwrap_or_else(|| Ok(Reply::text(format!("{} reply", self.name))))
    }

    async fn hand_off(&mut self, context: &str) -> Result<(), HandlerError> {
        self.log.handoffs.lock().unwrap().push(context.to_string());
        Ok(())
    }

    async fn release(&mut self) {
        self.log.released.fetch_add(1, Ordering::SeqCst);
    }

    async fn close(&mut self) {
        self.log.closed.fetch_add(1, Ordering::SeqCst);
    }
}

// ============================================================================
// Mock Classifier
// ============================================================================

/// Owned copy of a classification request
#[derive(Debug, Clone)]
pub struct RecordedClassification {
    pub current: String,
    pub candidates: Vec<&'static str>,
    pub scope: RoutingScope,
    pub message: String,
}

/// Classifier answering from a queue; answers STAY when the queue is empty
#[derive(Default)]
pub struct MockClassifier {
    results: Mutex<VecDeque<Result<Classification, ClassifyError>>>,
    requests: Mutex<Vec<RecordedClassification>>,
    delay: Option<Duration>,
}

#[allow(dead_code)]
impl MockClassifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn queue_target(&self, target: &str) {
        self.results
            .lock()
            .unwrap()
            .push_back(Ok(Classification::target(target)));
    }

    pub fn queue_stay(&self) {
        self.results
            .lock()
            .unwrap()
            .push_back(Ok(Classification::stay()));
    }

    pub fn queue_error(&self, error: ClassifyError) {
        self.results.lock().unwrap().push_back(Err(error));
    }

    pub fn recorded_requests(&self) -> Vec<RecordedClassification> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl Classifier for MockClassifier {
    async fn classify(
        &self,
        request: &ClassificationRequest<'_>,
    ) -> Result<Classification, ClassifyError> {
        self.requests.lock().unwrap().push(RecordedClassification {
            current: request.current.to_string(),
            candidates: request.candidates.clone(),
            scope: request.scope,
            message: request.message.to_string(),
        });
        let next = self.results.lock().unwrap().pop_front();
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        next.unwrap_or_else(|| Ok(Classification::stay()))
    }

    fn name(&self) -> &'static str {
        "mock"
    }
}

// ============================================================================
// Mock LLM
// ============================================================================

/// LLM service that returns queued responses
pub struct MockLlm {
    responses: Mutex<VecDeque<Result<LlmResponse, LlmError>>>,
    requests: Mutex<Vec<LlmRequest>>,
    model_id: String,
}

#[allow(dead_code)]
impl MockLlm {
    pub fn new(model_id: impl Into<String>) -> Self {
        Self {
            responses: Mutex::new(VecDeque::new()),
            requests: Mutex::new(Vec::new()),
            model_id: model_id.into(),
        }
    }

    pub fn queue_text(&self, text: impl Into<String>) {
        self.responses
            .lock()
            .unwrap()
            .push_back(Ok(LlmResponse::from_text(text)));
    }

    pub fn queue_error(&self, error: LlmError) {
        self.responses.lock().unwrap().push_back(Err(error));
    }

    pub fn recorded_requests(&self) -> Vec<LlmRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl LlmService for MockLlm {
    async fn complete(&self, request: &LlmRequest) -> Result<LlmResponse, LlmError> {
        self.requests.lock().unwrap().push(request.clone());
        self.responses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(LlmError::network("No mock response queued")))
    }

    fn model_id(&self) -> &str {
        &self.model_id
    }
}
