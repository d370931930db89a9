//! Reply generation over an OpenAI-compatible chat completions API
//!
//! The model is asked for a JSON object `{"messages": [...], "media": [...]}`
//! so one turn can be delivered as several short Messenger bubbles plus
//! native attachments. Anything that is not valid JSON is sent as a single
//! message.

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::collaborators::{ConversationLog, ResponseGenerator};
use crate::model::{AiReply, AiRequest};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// Prior turns sent with each request
const HISTORY_TURNS: i64 = 12;

const REPLY_SYSTEM_PROMPT: &str = "You are the assistant for a business page on \
    Facebook Messenger. Answer customers warmly and briefly, in the language they \
    write in. Never invent prices, stock or payment details that were not given \
    to you. When the customer sent an image, the analysis of that image is \
    provided as JSON; if it is a verified payment receipt, thank them and say the \
    team will confirm shortly, and if it is unverified, ask them to double check \
    the account they paid to. Respond ONLY with a JSON object of the form \
    {\"messages\": [\"...\"], \"media\": [\"https://...\"]} where messages holds one \
    to three short chat bubbles and media holds image or video URLs to attach \
    (usually empty).";

/// Thin client for `POST {api_url}/chat/completions`
#[derive(Clone)]
pub struct ChatCompletionsClient {
    http: reqwest::Client,
    api_url: String,
    api_key: Option<String>,
    model: String,
    vision_model: String,
    history: Option<Arc<dyn ConversationLog>>,
}

impl ChatCompletionsClient {
    pub fn new(api_url: &str, api_key: Option<String>, model: &str) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .user_agent(concat!("pagebot/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("Failed to build AI HTTP client")?;

        Ok(Self {
            http,
            api_url: api_url.trim_end_matches('/').to_string(),
            api_key,
            model: model.to_string(),
            vision_model: model.to_string(),
            history: None,
        })
    }

    /// Model used for image classification
    pub fn with_vision_model(mut self, model: &str) -> Self {
        self.vision_model = model.to_string();
        self
    }

    /// Read prior turns from, and record new turns to, `log`
    pub fn with_history(mut self, log: Arc<dyn ConversationLog>) -> Self {
        self.history = Some(log);
        self
    }

    pub(crate) fn vision_model(&self) -> &str {
        &self.vision_model
    }

    /// Runs one completion and returns the assistant message content
    pub(crate) async fn complete(
        &self,
        model: &str,
        messages: Vec<serde_json::Value>,
        max_tokens: u32,
    ) -> Result<String> {
        let request_body = serde_json::json!({
            "model": model,
            "messages": messages,
            "max_tokens": max_tokens,
        });

        debug!("AI API request to {}/chat/completions ({})", self.api_url, model);

        let mut request = self
            .http
            .post(format!("{}/chat/completions", self.api_url))
            .json(&request_body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await.context("Failed to call AI API")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            warn!("AI API error {}: {}", status, body);
            anyhow::bail!("AI API returned {}: {}", status, body);
        }

        let json: serde_json::Value = response
            .json()
            .await
            .context("Failed to parse AI API response")?;

        json["choices"][0]["message"]["content"]
            .as_str()
            .map(str::to_string)
            .context("AI API response had no message content")
    }

    async fn history_messages(&self, sender_id: &str) -> Vec<serde_json::Value> {
        let Some(log) = &self.history else {
            return Vec::new();
        };
        match log.recent(sender_id, HISTORY_TURNS).await {
            Ok(turns) => turns
                .into_iter()
                .map(|(role, content)| serde_json::json!({ "role": role, "content": content }))
                .collect(),
            Err(e) => {
                warn!("Failed to load conversation history for {}: {}", sender_id, e);
                Vec::new()
            }
        }
    }

    async fn record_turn(&self, request: &AiRequest, reply: &AiReply) {
        let Some(log) = &self.history else {
            return;
        };
        let turns = [
            ("user", request.text.clone()),
            ("assistant", reply.messages.join("\n")),
        ];
        for (role, content) in turns {
            if content.trim().is_empty() {
                continue;
            }
            if let Err(e) = log
                .append(&request.sender_id, &request.page_id, role, &content)
                .await
            {
                warn!("Failed to record {} turn for {}: {}", role, request.sender_id, e);
            }
        }
    }
}

#[async_trait]
impl ResponseGenerator for ChatCompletionsClient {
    async fn generate(&self, request: &AiRequest) -> Result<AiReply> {
        let mut messages = vec![serde_json::json!({
            "role": "system",
            "content": REPLY_SYSTEM_PROMPT,
        })];
        messages.extend(self.history_messages(&request.sender_id).await);

        let mut user_text = request.text.clone();
        if let Some(image) = &request.image {
            let context = serde_json::to_string(image).context("Failed to encode image context")?;
            user_text = format!("{}\n\nImage analysis:\n{}", user_text, context);
        }
        messages.push(serde_json::json!({ "role": "user", "content": user_text }));

        let content = self.complete(&self.model, messages, 1024).await?;
        let reply = parse_reply(&content);

        info!(
            "AI reply for {}: {} message(s), {} media",
            request.sender_id,
            reply.messages.len(),
            reply.media.len()
        );

        self.record_turn(request, &reply).await;
        Ok(reply)
    }
}

/// Strips a surrounding markdown code fence, if any
pub(crate) fn strip_code_fence(content: &str) -> &str {
    let trimmed = content.trim();
    let Some(inner) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    // Drop the info string (`json`) on the opening line
    let inner = match inner.find('\n') {
        Some(i) => &inner[i + 1..],
        None => inner,
    };
    inner.trim_end().trim_end_matches("```").trim()
}

/// A reply field as models actually emit it: missing, null, one string or a list
#[derive(Debug, Default, Deserialize)]
#[serde(untagged)]
enum Fragments {
    #[default]
    Absent,
    One(String),
    Many(Vec<String>),
}

impl Fragments {
    fn into_cleaned(self) -> Vec<String> {
        let items = match self {
            Fragments::Absent => Vec::new(),
            Fragments::One(item) => vec![item],
            Fragments::Many(items) => items,
        };
        items
            .into_iter()
            .map(|m| m.trim().to_string())
            .filter(|m| !m.is_empty())
            .collect()
    }
}

#[derive(Debug, Deserialize)]
struct ReplyBody {
    #[serde(default)]
    messages: Fragments,
    #[serde(default)]
    media: Fragments,
}

/// Parses model output into reply fragments, falling back to one plain message
pub fn parse_reply(content: &str) -> AiReply {
    let body = strip_code_fence(content);

    match serde_json::from_str::<ReplyBody>(body) {
        Ok(reply) => AiReply {
            messages: reply.messages.into_cleaned(),
            media: reply.media.into_cleaned(),
        },
        Err(_) => {
            // A bare JSON string is still just text
            let text = serde_json::from_str::<String>(body).unwrap_or_else(|_| body.to_string());
            let text = text.trim();
            if text.is_empty() {
                AiReply::default()
            } else {
                AiReply::text(text)
            }
        }
    }
}
