//! Send API client
//!
//! Every call is a POST to `{base}/me/messages?access_token=...` using the
//! page access token the caller resolved. Failures are returned, never
//! retried here.

use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::media::MediaKind;
use crate::payload::{CardElement, SendRequest, SenderAction};

pub const DEFAULT_GRAPH_API_URL: &str = "https://graph.facebook.com/v21.0";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(20);

#[derive(Debug, thiserror::Error)]
pub enum GraphError {
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("API error: {status} - {message}")]
    Api { status: u16, message: String },
    #[error("no access token configured for page {0}")]
    MissingToken(String),
}

/// Successful Send API response
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SendResponse {
    pub recipient_id: Option<String>,
    pub message_id: Option<String>,
}

#[derive(Clone)]
pub struct GraphClient {
    client: reqwest::Client,
    base_url: Arc<String>,
}

impl GraphClient {
    pub fn new(base_url: &str) -> Result<Self, GraphError> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .user_agent("pagebot/0.1.0")
            .build()?;

        Ok(Self {
            client,
            base_url: Arc::new(base_url.trim_end_matches('/').to_string()),
        })
    }

    /// POST a prepared request body
    pub async fn send(
        &self,
        access_token: &str,
        request: &SendRequest,
    ) -> Result<SendResponse, GraphError> {
        let url = format!("{}/me/messages", self.base_url);

        let response = self
            .client
            .post(&url)
            .query(&[("access_token", access_token)])
            .json(request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            warn!("Send API returned {}: {}", status, message);
            return Err(GraphError::Api {
                status: status.as_u16(),
                message,
            });
        }

        let body: SendResponse = response.json().await.unwrap_or_default();
        debug!(
            "Send API ok (recipient={:?}, mid={:?})",
            body.recipient_id, body.message_id
        );
        Ok(body)
    }

    pub async fn send_text(
        &self,
        access_token: &str,
        recipient: &str,
        text: &str,
    ) -> Result<SendResponse, GraphError> {
        self.send(access_token, &SendRequest::text(recipient, text))
            .await
    }

    pub async fn send_action(
        &self,
        access_token: &str,
        recipient: &str,
        action: SenderAction,
    ) -> Result<SendResponse, GraphError> {
        self.send(access_token, &SendRequest::action(recipient, action))
            .await
    }

    /// Send a media URL as a native attachment, typed by its extension
    pub async fn send_attachment(
        &self,
        access_token: &str,
        recipient: &str,
        url: &str,
    ) -> Result<SendResponse, GraphError> {
        let kind = MediaKind::from_url(url);
        self.send(access_token, &SendRequest::media(recipient, kind, url))
            .await
    }

    pub async fn send_generic_template(
        &self,
        access_token: &str,
        recipient: &str,
        elements: Vec<CardElement>,
    ) -> Result<SendResponse, GraphError> {
        self.send(
            access_token,
            &SendRequest::generic_template(recipient, elements),
        )
        .await
    }
}
