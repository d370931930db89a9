use async_trait::async_trait;
use pagebot_graph::{CardElement, GraphClient, GraphError, SenderAction};
use std::sync::Arc;
use tracing::{error, warn};

use crate::collaborators::PageTokens;

/// Outbound messaging to an end user on behalf of a page
#[async_trait]
pub trait Messenger: Send + Sync {
    async fn send_text(&self, page_id: &str, recipient: &str, text: &str)
        -> Result<(), GraphError>;
    async fn send_typing(&self, page_id: &str, recipient: &str, on: bool)
        -> Result<(), GraphError>;
    /// Send a media URL as a native image/video/file attachment
    async fn send_media(&self, page_id: &str, recipient: &str, url: &str)
        -> Result<(), GraphError>;
    async fn send_cards(
        &self,
        page_id: &str,
        recipient: &str,
        elements: Vec<CardElement>,
    ) -> Result<(), GraphError>;
}

/// Log a failed send. Missing tokens are a configuration gap, not a failure.
pub fn log_send_failure(what: &str, recipient: &str, err: &GraphError) {
    match err {
        GraphError::MissingToken(page_id) => {
            warn!("Skipping {} to {}: no access token for page {}", what, recipient, page_id)
        }
        other => error!("Failed to send {} to {}: {}", what, recipient, other),
    }
}

/// Messenger backed by the Send API, resolving the page token per call
pub struct GraphMessenger {
    client: GraphClient,
    tokens: Arc<dyn PageTokens>,
    /// Used when a page has no stored token
    fallback_token: Option<String>,
}

impl GraphMessenger {
    pub fn new(
        client: GraphClient,
        tokens: Arc<dyn PageTokens>,
        fallback_token: Option<String>,
    ) -> Self {
        Self {
            client,
            tokens,
            fallback_token,
        }
    }

    async fn token(&self, page_id: &str) -> Result<String, GraphError> {
        let stored = match self.tokens.access_token(page_id).await {
            Ok(token) => token,
            Err(e) => {
                warn!("Token lookup failed for page {}: {}", page_id, e);
                None
            }
        };

        stored
            .or_else(|| self.fallback_token.clone())
            .filter(|t| !t.is_empty())
            .ok_or_else(|| GraphError::MissingToken(page_id.to_string()))
    }
}

#[async_trait]
impl Messenger for GraphMessenger {
    async fn send_text(
        &self,
        page_id: &str,
        recipient: &str,
        text: &str,
    ) -> Result<(), GraphError> {
        let token = self.token(page_id).await?;
        self.client.send_text(&token, recipient, text).await?;
        Ok(())
    }

    async fn send_typing(
        &self,
        page_id: &str,
        recipient: &str,
        on: bool,
    ) -> Result<(), GraphError> {
        let token = self.token(page_id).await?;
        let action = if on {
            SenderAction::TypingOn
        } else {
            SenderAction::TypingOff
        };
        self.client.send_action(&token, recipient, action).await?;
        Ok(())
    }

    async fn send_media(
        &self,
        page_id: &str,
        recipient: &str,
        url: &str,
    ) -> Result<(), GraphError> {
        let token = self.token(page_id).await?;
        self.client.send_attachment(&token, recipient, url).await?;
        Ok(())
    }

    async fn send_cards(
        &self,
        page_id: &str,
        recipient: &str,
        elements: Vec<CardElement>,
    ) -> Result<(), GraphError> {
        let token = self.token(page_id).await?;
        self.client
            .send_generic_template(&token, recipient, elements)
            .await?;
        Ok(())
    }
}
