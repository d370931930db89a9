//! Send API request bodies

use serde::Serialize;

use crate::media::MediaKind;

/// Carousel element limits enforced by the platform
pub const MAX_TITLE_CHARS: usize = 80;
pub const MAX_SUBTITLE_CHARS: usize = 80;
pub const MAX_BUTTON_TITLE_CHARS: usize = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SenderAction {
    TypingOn,
    TypingOff,
}

#[derive(Debug, Clone, Serialize)]
pub struct Recipient {
    pub id: String,
}

/// One row of a generic template carousel
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CardElement {
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subtitle: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
    pub buttons: Vec<Button>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Button {
    WebUrl { url: String, title: String },
    Postback { title: String, payload: String },
}

impl Button {
    pub fn link(title: &str, url: &str) -> Self {
        Button::WebUrl {
            url: url.to_string(),
            title: truncate_chars(title, MAX_BUTTON_TITLE_CHARS),
        }
    }

    pub fn postback(title: &str, payload: impl Into<String>) -> Self {
        Button::Postback {
            title: truncate_chars(title, MAX_BUTTON_TITLE_CHARS),
            payload: payload.into(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum OutgoingMessage {
    Text { text: String },
    Attachment { attachment: Attachment },
}

#[derive(Debug, Clone, Serialize)]
pub struct Attachment {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub payload: AttachmentPayload,
}

#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum AttachmentPayload {
    Media {
        url: String,
        is_reusable: bool,
    },
    Template {
        template_type: &'static str,
        elements: Vec<CardElement>,
    },
}

/// Body of a POST to `/me/messages`
#[derive(Debug, Clone, Serialize)]
pub struct SendRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub messaging_type: Option<&'static str>,
    pub recipient: Recipient,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<OutgoingMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sender_action: Option<SenderAction>,
}

impl SendRequest {
    pub fn text(recipient: &str, text: &str) -> Self {
        Self::response(
            recipient,
            OutgoingMessage::Text {
                text: text.to_string(),
            },
        )
    }

    pub fn media(recipient: &str, kind: MediaKind, url: &str) -> Self {
        Self::response(
            recipient,
            OutgoingMessage::Attachment {
                attachment: Attachment {
                    kind: kind.as_str(),
                    payload: AttachmentPayload::Media {
                        url: url.to_string(),
                        is_reusable: true,
                    },
                },
            },
        )
    }

    pub fn generic_template(recipient: &str, elements: Vec<CardElement>) -> Self {
        Self::response(
            recipient,
            OutgoingMessage::Attachment {
                attachment: Attachment {
                    kind: "template",
                    payload: AttachmentPayload::Template {
                        template_type: "generic",
                        elements,
                    },
                },
            },
        )
    }

    pub fn action(recipient: &str, action: SenderAction) -> Self {
        Self {
            messaging_type: None,
            recipient: Recipient {
                id: recipient.to_string(),
            },
            message: None,
            sender_action: Some(action),
        }
    }

    fn response(recipient: &str, message: OutgoingMessage) -> Self {
        Self {
            messaging_type: Some("RESPONSE"),
            recipient: Recipient {
                id: recipient.to_string(),
            },
            message: Some(message),
            sender_action: None,
        }
    }
}

/// Truncate to at most `max` characters, ending with an ellipsis when cut
pub fn truncate_chars(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        return s.to_string();
    }
    let mut out: String = s.chars().take(max.saturating_sub(1)).collect();
    out.push('…');
    out
}
