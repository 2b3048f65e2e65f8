use std::collections::VecDeque;

use tokio::sync::{Mutex, Notify, oneshot};

use crate::coordinator::CompletionResult;
use crate::judge::{TestCase, Verdict};

/// Ties a judging request to the match it may decide
#[derive(Debug, Clone, Copy)]
pub struct MatchContext {
    pub match_id: i64,
    pub participant_id: i64,
}

/// One judging request travelling from the HTTP layer to a worker
#[derive(Debug)]
pub struct JudgeRequest {
    pub code: String,
    pub language: String,
    pub test_cases: Vec<TestCase>,
    pub match_context: Option<MatchContext>,
}

/// What a worker sends back through the responder
#[derive(Debug)]
pub struct JudgeResponse {
    pub verdict: Verdict,
    pub completion: Option<CompletionResult>,
}

pub struct JudgeMessage {
    pub request: JudgeRequest,
    pub responder: oneshot::Sender<JudgeResponse>,
}

pub struct JudgeQueue {
    queue: Mutex<VecDeque<JudgeMessage>>,
    notify: Notify,
}

impl JudgeQueue {
    pub fn new() -> Self {
        Self {
            queue: Mutex::new(VecDeque::new()),
            notify: Notify::new(),
        }
    }

    pub async fn push(&self, message: JudgeMessage) {
        self.queue.lock().await.push_back(message);
        self.notify.notify_one();
    }

    pub async fn pop(&self) -> JudgeMessage {
        loop {
            if let Some(message) = self.queue.lock().await.pop_front() {
                return message;
            }
            self.notify.notified().await;
        }
    }
}

impl Default for JudgeQueue {
    fn default() -> Self {
        Self::new()
    }
}
