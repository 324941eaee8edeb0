use tokio::sync::broadcast::error::{RecvError, TryRecvError};
use tokio::sync::{broadcast, mpsc};
use tracing::warn;

use cordial_types::events::{ChangeEvent, ChangeFilter};

use crate::realtime::Command;

/// A live stream of change events for one filter.
///
/// Dropping it stops delivery. For the hosted feed the drop also leaves the
/// server-side topic.
pub struct Subscription {
    source: Source,
    filter: ChangeFilter,
    _leave: Option<LeaveGuard>,
}

enum Source {
    Local(broadcast::Receiver<ChangeEvent>),
    Remote(mpsc::UnboundedReceiver<ChangeEvent>),
}

impl Subscription {
    pub(crate) fn local(rx: broadcast::Receiver<ChangeEvent>, filter: ChangeFilter) -> Self {
        Self {
            source: Source::Local(rx),
            filter,
            _leave: None,
        }
    }

    pub(crate) fn remote(
        rx: mpsc::UnboundedReceiver<ChangeEvent>,
        filter: ChangeFilter,
        leave: LeaveGuard,
    ) -> Self {
        Self {
            source: Source::Remote(rx),
            filter,
            _leave: Some(leave),
        }
    }

    pub fn filter(&self) -> &ChangeFilter {
        &self.filter
    }

    /// Waits for the next matching event. `None` once the feed is gone.
    pub async fn next(&mut self) -> Option<ChangeEvent> {
        loop {
            let event = match &mut self.source {
                Source::Local(rx) => match rx.recv().await {
                    Ok(event) => event,
                    Err(RecvError::Lagged(n)) => {
                        warn!("Change feed receiver lagged by {} events", n);
                        continue;
                    }
                    Err(RecvError::Closed) => return None,
                },
                Source::Remote(rx) => rx.recv().await?,
            };

            if self.filter.matches(&event) {
                return Some(event);
            }
        }
    }

    /// Returns an already-delivered matching event without waiting.
    pub fn try_next(&mut self) -> Option<ChangeEvent> {
        loop {
            let event = match &mut self.source {
                Source::Local(rx) => match rx.try_recv() {
                    Ok(event) => event,
                    Err(TryRecvError::Lagged(n)) => {
                        warn!("Change feed receiver lagged by {} events", n);
                        continue;
                    }
                    Err(_) => return None,
                },
                Source::Remote(rx) => rx.try_recv().ok()?,
            };

            if self.filter.matches(&event) {
                return Some(event);
            }
        }
    }
}

/// Sends `phx_leave` for a hosted topic when the subscription goes away.
pub(crate) struct LeaveGuard {
    pub(crate) topic: String,
    pub(crate) commands: mpsc::UnboundedSender<Command>,
}

impl Drop for LeaveGuard {
    fn drop(&mut self) {
        let _ = self.commands.send(Command::Leave {
            topic: std::mem::take(&mut self.topic),
        });
    }
}
