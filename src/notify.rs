//! Abstract notifications for an external renderer.

use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

const DEFAULT_STREAM_CAPACITY: usize = 64;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NotificationKind {
    Info,
    Success,
    Error,
}

impl fmt::Display for NotificationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NotificationKind::Info => write!(f, "info"),
            NotificationKind::Success => write!(f, "success"),
            NotificationKind::Error => write!(f, "error"),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Notification {
    pub kind: NotificationKind,
    pub title: String,
    pub detail: String,
}

impl Notification {
    pub fn new(kind: NotificationKind, title: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            kind,
            title: title.into(),
            detail: detail.into(),
        }
    }

    pub fn info(title: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::new(NotificationKind::Info, title, detail)
    }

    pub fn success(title: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::new(NotificationKind::Success, title, detail)
    }

    pub fn error(title: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::new(NotificationKind::Error, title, detail)
    }
}

/// Rendering target for notifications.
pub trait NotificationSink: Send + Sync {
    fn deliver(&self, notification: &Notification);
}

/// Shared pass-through from the sync components to whatever sink is attached.
///
/// Without a sink, notifications are dropped.
#[derive(Clone, Default)]
pub struct NotificationDispatcher {
    sink: Arc<RwLock<Option<Arc<dyn NotificationSink>>>>,
}

impl NotificationDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_sink(sink: Arc<dyn NotificationSink>) -> Self {
        let dispatcher = Self::new();
        dispatcher.attach(sink);
        dispatcher
    }

    pub fn attach(&self, sink: Arc<dyn NotificationSink>) {
        *self.sink.write() = Some(sink);
    }

    pub fn detach(&self) {
        self.sink.write().take();
    }

    pub fn is_attached(&self) -> bool {
        self.sink.read().is_some()
    }

    pub fn dispatch(&self, notification: Notification) {
        let sink = self.sink.read().clone();
        match sink {
            Some(sink) => sink.deliver(&notification),
            None => debug!(title = %notification.title, "no notification sink attached"),
        }
    }
}

/// Ordered notification stream for UI observers.
pub struct BroadcastSink {
    sender: broadcast::Sender<Notification>,
}

impl BroadcastSink {
    pub fn new(capacity: usize) -> (Arc<Self>, broadcast::Receiver<Notification>) {
        let (sender, receiver) = broadcast::channel(capacity.max(1));
        (Arc::new(Self { sender }), receiver)
    }

    pub fn with_default_capacity() -> (Arc<Self>, broadcast::Receiver<Notification>) {
        Self::new(DEFAULT_STREAM_CAPACITY)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Notification> {
        self.sender.subscribe()
    }
}

impl NotificationSink for BroadcastSink {
    fn deliver(&self, notification: &Notification) {
        // No receivers is not an error: nobody is rendering right now.
        let _ = self.sender.send(notification.clone());
    }
}

/// Writes notifications to the log. Used by the CLI.
#[derive(Clone, Copy, Debug, Default)]
pub struct TracingSink;

impl NotificationSink for TracingSink {
    fn deliver(&self, notification: &Notification) {
        match notification.kind {
            NotificationKind::Error => warn!(
                title = %notification.title,
                detail = %notification.detail,
                "notification"
            ),
            kind => info!(
                %kind,
                title = %notification.title,
                detail = %notification.detail,
                "notification"
            ),
        }
    }
}
