//! User-facing notifications.
//!
//! Components report failures a user should see (a listener that could not
//! bind, a save that did not land) through [`Notifier`]. The hub logs each
//! one, keeps a short history and fans them out to WebSocket clients.

use std::collections::VecDeque;
use std::sync::Mutex;

use serde::Serialize;
use tokio::sync::broadcast;
use tracing::{error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Level {
    Info,
    Warn,
    Error,
}

pub trait Notifier: Send + Sync {
    fn notify(&self, level: Level, message: &str);
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Notification {
    pub level: Level,
    pub message: String,
    /// Unix millis.
    pub timestamp: i64,
}

const HISTORY: usize = 50;

pub struct NotificationHub {
    tx: broadcast::Sender<Notification>,
    recent: Mutex<VecDeque<Notification>>,
}

impl Default for NotificationHub {
    fn default() -> Self {
        Self::new()
    }
}

impl NotificationHub {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(64);
        Self {
            tx,
            recent: Mutex::new(VecDeque::with_capacity(HISTORY)),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Notification> {
        self.tx.subscribe()
    }

    /// Most recent notifications, oldest first.
    pub fn recent(&self) -> Vec<Notification> {
        self.recent
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .cloned()
            .collect()
    }
}

impl Notifier for NotificationHub {
    fn notify(&self, level: Level, message: &str) {
        match level {
            Level::Info => info!("{message}"),
            Level::Warn => warn!("{message}"),
            Level::Error => error!("{message}"),
        }

        let notification = Notification {
            level,
            message: message.to_string(),
            timestamp: chrono::Utc::now().timestamp_millis(),
        };
        {
            let mut recent = self.recent.lock().unwrap_or_else(|e| e.into_inner());
            if recent.len() == HISTORY {
                recent.pop_front();
            }
            recent.push_back(notification.clone());
        }
        // no subscribers is fine
        let _ = self.tx.send(notification);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_history_is_bounded() {
        let hub = NotificationHub::new();
        for i in 0..(HISTORY + 5) {
            hub.notify(Level::Info, &format!("n{i}"));
        }
        let recent = hub.recent();
        assert_eq!(recent.len(), HISTORY);
        assert_eq!(recent[0].message, "n5");
    }

    #[tokio::test]
    async fn test_subscribers_receive_notifications() {
        let hub = NotificationHub::new();
        let mut rx = hub.subscribe();
        hub.notify(Level::Error, "port 8080 is busy");
        let got = rx.recv().await.unwrap();
        assert_eq!(got.level, Level::Error);
        assert_eq!(got.message, "port 8080 is busy");
    }
}
