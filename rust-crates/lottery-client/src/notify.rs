//! User-facing notifications (the toasts of a front end).

use std::{
    collections::VecDeque,
    fmt,
    sync::{
        Arc,
        Mutex,
    },
};
use tokio::sync::broadcast;
use tracing::{
    error,
    info,
};

const HISTORY_LIMIT: usize = 50;
const CHANNEL_CAPACITY: usize = 64;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NotificationLevel {
    Info,
    Success,
    Error,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Notification {
    pub level: NotificationLevel,
    pub title: String,
    pub message: String,
}

impl fmt::Display for Notification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.title, self.message)
    }
}

/// Fan-out of notifications to subscribers, keeping the latest few for
/// late readers.
#[derive(Clone)]
pub struct Notifier {
    tx: broadcast::Sender<Notification>,
    history: Arc<Mutex<VecDeque<Notification>>>,
}

impl Default for Notifier {
    fn default() -> Self {
        Self::new()
    }
}

impl Notifier {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self {
            tx,
            history: Arc::new(Mutex::new(VecDeque::new())),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Notification> {
        self.tx.subscribe()
    }

    pub fn info(&self, title: impl Into<String>, message: impl Into<String>) {
        self.push(NotificationLevel::Info, title.into(), message.into());
    }

    pub fn success(&self, title: impl Into<String>, message: impl Into<String>) {
        self.push(NotificationLevel::Success, title.into(), message.into());
    }

    pub fn error(&self, title: impl Into<String>, message: impl Into<String>) {
        self.push(NotificationLevel::Error, title.into(), message.into());
    }

    /// Oldest first.
    pub fn recent(&self) -> Vec<Notification> {
        match self.history.lock() {
            Ok(history) => history.iter().cloned().collect(),
            Err(poisoned) => poisoned.into_inner().iter().cloned().collect(),
        }
    }

    fn push(&self, level: NotificationLevel, title: String, message: String) {
        match level {
            NotificationLevel::Error => error!(%title, %message, "notification"),
            _ => info!(%title, %message, "notification"),
        }
        let notification = Notification {
            level,
            title,
            message,
        };
        {
            let mut history = match self.history.lock() {
                Ok(history) => history,
                Err(poisoned) => poisoned.into_inner(),
            };
            history.push_back(notification.clone());
            if history.len() > HISTORY_LIMIT {
                let drain = history.len() - HISTORY_LIMIT;
                history.drain(0..drain);
            }
        }
        // no subscribers is fine
        let _ = self.tx.send(notification);
    }
}

#[cfg(test)]
mod tests {
    #![allow(non_snake_case)]
    use super::*;

    #[tokio::test]
    async fn error__reaches_subscribers_with_level() {
        // given
        let notifier = Notifier::new();
        let mut rx = notifier.subscribe();

        // when
        notifier.error("Purchase Failed", "approval rejected");

        // then
        let received = rx.recv().await.unwrap();
        assert_eq!(received.level, NotificationLevel::Error);
        assert_eq!(received.to_string(), "Purchase Failed: approval rejected");
    }

    #[test]
    fn recent__keeps_only_the_latest_entries() {
        let notifier = Notifier::new();
        for i in 0..60 {
            notifier.info("n", i.to_string());
        }
        let recent = notifier.recent();
        assert_eq!(recent.len(), HISTORY_LIMIT);
        assert_eq!(recent[0].message, "10");
        assert_eq!(recent[49].message, "59");
    }
}
