//! Human takeover gate
//!
//! When a person replies from the page inbox the bot stays silent for that
//! user until the takeover window expires.

use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;
use tracing::{info, warn};

use crate::collaborators::TakeoverStore;

pub const DEFAULT_TAKEOVER_TIMEOUT_MINUTES: i64 = 30;

pub struct TakeoverGate {
    store: Arc<dyn TakeoverStore>,
    timeout: Duration,
    /// Our own app id; echoes carrying it are bot sends, not a human
    app_id: Option<u64>,
}

impl TakeoverGate {
    pub fn new(store: Arc<dyn TakeoverStore>, timeout: Duration, app_id: Option<u64>) -> Self {
        Self {
            store,
            timeout,
            app_id,
        }
    }

    /// True while a human agent is handling this user's conversation.
    /// Store failures are logged and treated as "no takeover".
    pub async fn is_active(&self, sender_id: &str) -> bool {
        match self.store.last_human_activity(sender_id).await {
            Ok(Some(at)) => is_within_window(at, Utc::now(), self.timeout),
            Ok(None) => false,
            Err(e) => {
                warn!("Takeover lookup failed for {}: {}", sender_id, e);
                false
            }
        }
    }

    /// Whether an echo was written by a human rather than by this app
    pub fn is_human_echo(&self, echo_app_id: Option<u64>) -> bool {
        match (echo_app_id, self.app_id) {
            (None, _) => true,
            (Some(echo), Some(ours)) => echo != ours,
            // Without our own app id every app-authored echo is assumed to be us
            (Some(_), None) => false,
        }
    }

    /// Handle an echo of a page message sent to `user_id`
    pub async fn observe_echo(&self, user_id: &str, echo_app_id: Option<u64>) {
        if !self.is_human_echo(echo_app_id) {
            return;
        }

        info!("🙋 Human agent replied to {}, pausing automation", user_id);
        if let Err(e) = self
            .store
            .record_human_activity(user_id, Utc::now())
            .await
        {
            warn!("Failed to record takeover for {}: {}", user_id, e);
        }
    }
}

fn is_within_window(at: DateTime<Utc>, now: DateTime<Utc>, timeout: Duration) -> bool {
    now.signed_duration_since(at) < timeout
}
