use serde::Serialize;
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender, unbounded_channel};
use tracing::{debug, info};

use crate::types::PageId;

/// Stage transitions reported while a page is processed.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ProgressEvent {
    PageStarted {
        page: PageId,
    },
    StrategySelected {
        page: PageId,
        strategies: Vec<String>,
    },
    PassesCompleted {
        page: PageId,
        succeeded: usize,
        failed: usize,
    },
    FusionDone {
        page: PageId,
        lines: usize,
    },
    PageFinished {
        page: PageId,
        status: String,
    },
}

impl ProgressEvent {
    pub fn page(&self) -> &PageId {
        match self {
            Self::PageStarted { page }
            | Self::StrategySelected { page, .. }
            | Self::PassesCompleted { page, .. }
            | Self::FusionDone { page, .. }
            | Self::PageFinished { page, .. } => page,
        }
    }
}

/// Receiver of progress events. Called from page tasks, so it must not block.
pub trait ProgressSink: Send + Sync {
    fn emit(&self, event: ProgressEvent);
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NoopProgress;

impl ProgressSink for NoopProgress {
    fn emit(&self, _event: ProgressEvent) {}
}

/// Writes events to the `tracing` log.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingProgress;

impl ProgressSink for TracingProgress {
    fn emit(&self, event: ProgressEvent) {
        match &event {
            ProgressEvent::PageStarted { page } => debug!(page = %page, "Page started"),
            ProgressEvent::StrategySelected { page, strategies } => {
                debug!(page = %page, strategies = ?strategies, "Strategies selected")
            }
            ProgressEvent::PassesCompleted { page, succeeded, failed } => {
                debug!(page = %page, succeeded, failed, "Recognition passes completed")
            }
            ProgressEvent::FusionDone { page, lines } => debug!(page = %page, lines, "Fusion done"),
            ProgressEvent::PageFinished { page, status } => info!(page = %page, status = %status, "Page finished"),
        }
    }
}

/// Forwards events into an unbounded channel. Events are dropped once the receiver is gone.
#[derive(Debug, Clone)]
pub struct ChannelProgress {
    sender: UnboundedSender<ProgressEvent>,
}

impl ChannelProgress {
    pub fn new(sender: UnboundedSender<ProgressEvent>) -> Self {
        Self { sender }
    }

    pub fn channel() -> (Self, UnboundedReceiver<ProgressEvent>) {
        let (sender, receiver) = unbounded_channel();
        (Self::new(sender), receiver)
    }
}

impl ProgressSink for ChannelProgress {
    fn emit(&self, event: ProgressEvent) {
        let _ = self.sender.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_progress_forwards_events() {
        let (sink, mut rx) = ChannelProgress::channel();
        let page = PageId::new("doc", 3);
        sink.emit(ProgressEvent::PageStarted { page: page.clone() });
        sink.emit(ProgressEvent::FusionDone {
            page: page.clone(),
            lines: 12,
        });

        assert_eq!(rx.try_recv().unwrap(), ProgressEvent::PageStarted { page: page.clone() });
        let second = rx.try_recv().unwrap();
        assert_eq!(second.page(), &page);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_closed_channel_is_ignored() {
        let (sink, rx) = ChannelProgress::channel();
        drop(rx);
        sink.emit(ProgressEvent::PageStarted {
            page: PageId::new("doc", 0),
        });
    }

    #[test]
    fn test_event_json_is_tagged() {
        let json = serde_json::to_value(ProgressEvent::PassesCompleted {
            page: PageId::new("doc", 1),
            succeeded: 3,
            failed: 1,
        })
        .unwrap();
        assert_eq!(json["event"], "passes_completed");
        assert_eq!(json["succeeded"], 3);
    }
}
