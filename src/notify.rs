//! Push notifications for notify-worthy events
//!
//! Every configured notify URL receives a JSON POST with a title and body.
//! Delivery is best-effort: failures are logged and never interrupt a cycle.

use reqwest::Client;
use serde::Serialize;
use std::time::Duration;
use tracing::{debug, warn};

use crate::config::{Settings, PROGRAM};

#[derive(Debug, Serialize)]
struct NotificationPayload<'a> {
    title: &'a str,
    body: &'a str,
}

/// Sends notifications to webhook URLs
#[derive(Clone)]
pub struct Notifier {
    client: Client,
    urls: Vec<String>,
    enabled: bool,
}

impl Notifier {
    /// Create a notifier
    pub fn new(enabled: bool, urls: Vec<String>) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .unwrap_or_default();

        Self {
            client,
            urls,
            enabled,
        }
    }

    /// Create a notifier from the `[settings]` table
    pub fn from_settings(settings: &Settings) -> Self {
        Self::new(settings.notifications, settings.notify_urls.clone())
    }

    /// A notifier that never sends anything
    pub fn disabled() -> Self {
        Self::new(false, Vec::new())
    }

    /// Whether messages will actually be delivered
    pub fn is_active(&self) -> bool {
        self.enabled && !self.urls.is_empty()
    }

    /// Deliver a message to all notify URLs
    pub async fn notify(&self, message: &str) {
        if !self.is_active() {
            return;
        }

        let payload = NotificationPayload {
            title: PROGRAM,
            body: message,
        };

        for url in &self.urls {
            match self.client.post(url).json(&payload).send().await {
                Ok(response) if response.status().is_success() => {
                    debug!("Sent notification to {}", url);
                }
                Ok(response) => {
                    warn!("Notification to {} rejected: {}", url, response.status());
                }
                Err(e) => {
                    warn!("Failed to send notification to {}: {}", url, e);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_active_requires_urls() {
        assert!(!Notifier::disabled().is_active());
        assert!(!Notifier::new(true, vec![]).is_active());
        assert!(!Notifier::new(false, vec!["http://localhost".into()]).is_active());
        assert!(Notifier::new(true, vec!["http://localhost".into()]).is_active());
    }

    #[test]
    fn test_payload_shape() {
        let payload = NotificationPayload {
            title: PROGRAM,
            body: "armed",
        };
        let json = serde_json::to_string(&payload).unwrap();
        assert_eq!(json, r#"{"title":"tsltp","body":"armed"}"#);
    }

    #[tokio::test]
    async fn test_disabled_notify_is_noop() {
        Notifier::disabled().notify("nothing happens").await;
    }
}
