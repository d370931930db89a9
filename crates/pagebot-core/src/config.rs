use anyhow::{Context, Result};
use chrono_tz::Tz;
use std::time::Duration;

use crate::batcher::DEFAULT_BATCH_WINDOW;
use crate::cards::CardSettings;
use crate::dedup::DEFAULT_DEDUP_CAPACITY;
use crate::pipeline::PipelineSettings;
use crate::takeover::DEFAULT_TAKEOVER_TIMEOUT_MINUTES;

#[derive(Debug, Clone)]
pub struct Config {
    pub http_port: u16,

    pub graph_api_url: String,
    /// Shared secret for the webhook subscription handshake
    pub verify_token: String,
    /// Our own app id; echoes without it come from a human in the inbox
    pub app_id: Option<u64>,
    /// Used for pages without a stored token
    pub page_access_token: Option<String>,

    pub database_url: String,

    pub ai_api_url: String,
    pub ai_api_key: Option<String>,
    pub ai_model: String,
    pub ai_vision_model: String,

    pub batch_window: Duration,
    /// Off for deployments where deliveries may land on different instances
    pub batching_enabled: bool,
    pub dedup_capacity: usize,
    pub takeover_timeout_minutes: i64,

    pub business_timezone: Tz,
    pub currency_symbol: String,
    pub public_base_url: String,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let http_port: u16 = std::env::var("HTTP_PORT")
            .unwrap_or_else(|_| "3000".to_string())
            .parse()
            .context("HTTP_PORT must be a valid port number")?;

        Ok(Self {
            http_port,

            graph_api_url: std::env::var("GRAPH_API_URL")
                .unwrap_or_else(|_| pagebot_graph::DEFAULT_GRAPH_API_URL.to_string()),
            verify_token: std::env::var("FB_VERIFY_TOKEN").context("FB_VERIFY_TOKEN must be set")?,
            app_id: std::env::var("FB_APP_ID")
                .ok()
                .filter(|s| !s.is_empty())
                .map(|s| s.parse())
                .transpose()
                .context("FB_APP_ID must be numeric")?,
            page_access_token: std::env::var("PAGE_ACCESS_TOKEN")
                .ok()
                .filter(|s| !s.is_empty()),

            database_url: std::env::var("DATABASE_URL").context("DATABASE_URL must be set")?,

            ai_api_url: std::env::var("AI_API_URL")
                .unwrap_or_else(|_| "https://api.openai.com/v1".to_string()),
            ai_api_key: std::env::var("AI_API_KEY").ok(),
            ai_model: std::env::var("AI_MODEL").unwrap_or_else(|_| "gpt-4o-mini".to_string()),
            ai_vision_model: std::env::var("AI_VISION_MODEL").unwrap_or_else(|_| {
                std::env::var("AI_MODEL").unwrap_or_else(|_| "gpt-4o-mini".to_string())
            }),

            batch_window: std::env::var("BATCH_WINDOW_MS")
                .ok()
                .and_then(|s| s.parse().ok())
                .map(Duration::from_millis)
                .unwrap_or(DEFAULT_BATCH_WINDOW),
            batching_enabled: std::env::var("BATCHING_ENABLED")
                .map(|s| s != "false" && s != "0")
                .unwrap_or(true),
            dedup_capacity: std::env::var("DEDUP_CAPACITY")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(DEFAULT_DEDUP_CAPACITY),
            takeover_timeout_minutes: std::env::var("TAKEOVER_TIMEOUT_MINUTES")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(DEFAULT_TAKEOVER_TIMEOUT_MINUTES),

            business_timezone: std::env::var("BUSINESS_TIMEZONE")
                .unwrap_or_else(|_| "Asia/Manila".to_string())
                .parse()
                .map_err(|e| anyhow::anyhow!("BUSINESS_TIMEZONE is invalid: {}", e))?,
            currency_symbol: std::env::var("CURRENCY_SYMBOL").unwrap_or_else(|_| "₱".to_string()),
            public_base_url: std::env::var("PUBLIC_BASE_URL")
                .unwrap_or_else(|_| format!("http://localhost:{}", http_port)),
        })
    }

    pub fn pipeline_settings(&self) -> PipelineSettings {
        PipelineSettings {
            batch_window: self.batch_window,
            batching_enabled: self.batching_enabled,
            dedup_capacity: self.dedup_capacity,
            takeover_timeout: chrono::Duration::minutes(self.takeover_timeout_minutes),
            app_id: self.app_id,
            cards: CardSettings {
                currency_symbol: self.currency_symbol.clone(),
                public_base_url: self.public_base_url.clone(),
            },
            ..Default::default()
        }
    }
}
