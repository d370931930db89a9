//! Sending a generated reply: text fragments in order, then media

use std::time::Duration;
use tracing::info;

use crate::messenger::{log_send_failure, Messenger};
use crate::model::AiReply;

/// Cooperative delays between outbound sends
#[derive(Debug, Clone, Copy)]
pub struct ReplyPacing {
    pub between_messages: Duration,
    pub between_media: Duration,
}

impl Default for ReplyPacing {
    fn default() -> Self {
        Self {
            between_messages: Duration::from_millis(500),
            between_media: Duration::from_millis(300),
        }
    }
}

/// What actually went out
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReplyStats {
    pub fragments_sent: usize,
    pub media_sent: usize,
}

/// Remove media URLs from the text fragments and drop fragments left empty.
///
/// Media is delivered as native attachments, so a pasted link to the same
/// file would show it twice.
pub fn prepare_fragments(messages: &[String], media: &[String]) -> Vec<String> {
    messages
        .iter()
        .filter_map(|message| {
            let stripped = media
                .iter()
                .filter(|url| !url.is_empty())
                .fold(message.clone(), |text, url| text.replace(url.as_str(), ""));
            let trimmed = stripped.trim();
            if trimmed.is_empty() {
                None
            } else {
                Some(trimmed.to_string())
            }
        })
        .collect()
}

/// Send fragments in order with a pause between them, then each media URL
/// as an attachment. Individual send failures are logged and skipped.
pub async fn send_reply(
    messenger: &dyn Messenger,
    page_id: &str,
    recipient: &str,
    reply: &AiReply,
    pacing: ReplyPacing,
) -> ReplyStats {
    let fragments = prepare_fragments(&reply.messages, &reply.media);
    let media: Vec<&String> = reply.media.iter().filter(|u| !u.is_empty()).collect();
    let mut stats = ReplyStats::default();

    for (i, fragment) in fragments.iter().enumerate() {
        let preview: String = fragment.chars().take(50).collect();
        info!(
            "📤 Sending response ({}/{}) to {}: {}...",
            i + 1,
            fragments.len(),
            recipient,
            preview
        );

        match messenger.send_text(page_id, recipient, fragment).await {
            Ok(()) => stats.fragments_sent += 1,
            Err(e) => log_send_failure("reply", recipient, &e),
        }

        if i + 1 < fragments.len() {
            tokio::time::sleep(pacing.between_messages).await;
        }
    }

    for (i, url) in media.iter().enumerate() {
        match messenger.send_media(page_id, recipient, url).await {
            Ok(()) => stats.media_sent += 1,
            Err(e) => log_send_failure("media", recipient, &e),
        }

        if i + 1 < media.len() {
            tokio::time::sleep(pacing.between_media).await;
        }
    }

    stats
}
