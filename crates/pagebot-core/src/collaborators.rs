//! Interfaces to the systems the pipeline depends on but does not own.
//!
//! The Postgres store, the chat-completions client and the heuristics in
//! `leads`/`contact` are the production implementations; tests use the
//! in-memory versions in `testing`.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::model::{
    AiReply, AiRequest, ContactInfo, ImageAnalysis, Lead, PaymentMethod, PipelineStage, Product,
    Property,
};

/// Per-page access token lookup
#[async_trait]
pub trait PageTokens: Send + Sync {
    async fn access_token(&self, page_id: &str) -> Result<Option<String>>;
}

/// Catalog rows configured for a page
#[async_trait]
pub trait Catalog: Send + Sync {
    async fn products(&self, page_id: &str) -> Result<Vec<Product>>;
    async fn properties(&self, page_id: &str) -> Result<Vec<Property>>;
    async fn payment_methods(&self, page_id: &str) -> Result<Vec<PaymentMethod>>;
    async fn property(&self, page_id: &str, id: Uuid) -> Result<Option<Property>>;
    async fn payment_method(&self, page_id: &str, id: Uuid) -> Result<Option<PaymentMethod>>;
}

/// Lead/CRM state. Every call is an independent single-row mutation.
#[async_trait]
pub trait LeadTracker: Send + Sync {
    async fn get_or_create(&self, sender_id: &str, page_id: &str) -> Result<Lead>;
    /// Returns the new count
    async fn increment_message_count(&self, lead_id: Uuid) -> Result<i32>;
    async fn set_stage(&self, lead_id: Uuid, stage: PipelineStage, reason: &str) -> Result<()>;
    async fn set_name(&self, lead_id: Uuid, name: &str) -> Result<()>;
    async fn set_contact(&self, lead_id: Uuid, contact: &ContactInfo) -> Result<()>;
    async fn set_referral(&self, lead_id: Uuid, source: &str) -> Result<()>;
    async fn record_activity(&self, lead_id: Uuid, at: DateTime<Utc>) -> Result<()>;
    async fn activity_times(&self, lead_id: Uuid) -> Result<Vec<DateTime<Utc>>>;
    async fn set_best_contact_hour(&self, lead_id: Uuid, hour: Option<u32>) -> Result<()>;
}

/// Timestamps of human-agent replies per end user
#[async_trait]
pub trait TakeoverStore: Send + Sync {
    async fn last_human_activity(&self, sender_id: &str) -> Result<Option<DateTime<Utc>>>;
    async fn record_human_activity(&self, sender_id: &str, at: DateTime<Utc>) -> Result<()>;
}

/// Produces the textual reply for a turn (text or image)
#[async_trait]
pub trait ResponseGenerator: Send + Sync {
    async fn generate(&self, request: &AiRequest) -> Result<AiReply>;
}

#[async_trait]
pub trait ImageClassifier: Send + Sync {
    async fn classify(&self, image_url: &str) -> Result<ImageAnalysis>;
}

#[async_trait]
pub trait ContactExtractor: Send + Sync {
    async fn extract_contact(&self, text: &str) -> Result<ContactInfo>;
    async fn extract_name(&self, text: &str) -> Result<Option<String>>;
}

#[async_trait]
pub trait StageAnalyzer: Send + Sync {
    /// Cheap gate deciding whether `analyze` is worth running for this turn
    fn should_analyze(&self, lead: &Lead) -> bool;
    /// New stage for the lead, or `None` to leave it unchanged
    async fn analyze(&self, lead: &Lead, text: &str) -> Result<Option<PipelineStage>>;
}

pub trait ContactTimeEstimator: Send + Sync {
    /// Hour of day (business timezone) the user is most likely to reply
    fn estimate(&self, activity: &[DateTime<Utc>]) -> Option<u32>;
}

/// Stored conversation turns, used for reply context
#[async_trait]
pub trait ConversationLog: Send + Sync {
    async fn append(&self, sender_id: &str, page_id: &str, role: &str, content: &str)
        -> Result<()>;
    /// Most recent turns, oldest first, as `(role, content)`
    async fn recent(&self, sender_id: &str, limit: i64) -> Result<Vec<(String, String)>>;
}
