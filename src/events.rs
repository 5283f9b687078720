#![forbid(unsafe_code)]

//! Application-wide notifications owned by the shell. Components publish,
//! the shell subscribes and decides what to show (login prompt, YouTube
//! re-authorization).

use tokio::sync::broadcast;

const EVENT_CAPACITY: usize = 32;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AppEvent {
    /// The backend rejected our credentials; the user must sign in again.
    AuthRequired,
    /// The backend needs the user to re-authorize YouTube access.
    YoutubeAuthRequired { message: String },
    /// Restoration finished for a list context.
    ScrollRestored { context: String, scroll_y: u64 },
}

#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<AppEvent>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(EVENT_CAPACITY);
        Self { sender }
    }

    /// Returns how many subscribers received the event. Publishing with no
    /// subscriber is not an error.
    pub fn publish(&self, event: AppEvent) -> usize {
        tracing::debug!(?event, "publishing app event");
        self.sender.send(event).unwrap_or(0)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<AppEvent> {
        self.sender.subscribe()
    }
}
