use serde::Serialize;
use tokio::sync::mpsc::UnboundedSender;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::termination::TerminationReason;

/// Progress reported while a request runs
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StatusUpdate {
    StepStarted { step: usize },
    ToolStarted { name: String },
    ToolSkipped { name: String, reason: String },
    ToolFailed { name: String, error: String },
    SideChannelDropped { name: String, error: String },
    /// Sent before the formatter query, and again as `cancelled` if that query is cancelled
    Terminated { reason: TerminationReason, steps: usize },
}

/// Everything tied to one request besides its inputs
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub request_id: Uuid,
    pub cancel: CancellationToken,
    status: Option<UnboundedSender<StatusUpdate>>,
}

impl Default for RequestContext {
    fn default() -> Self {
        Self::new()
    }
}

impl RequestContext {
    pub fn new() -> Self {
        Self {
            request_id: Uuid::new_v4(),
            cancel: CancellationToken::new(),
            status: None,
        }
    }

    pub fn with_status(mut self, status: UnboundedSender<StatusUpdate>) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Best effort; a closed receiver is ignored
    pub fn report(&self, update: StatusUpdate) {
        if let Some(status) = &self.status {
            let _ = status.send(update);
        }
    }
}
