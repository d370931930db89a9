//! Domain types shared across the pipeline

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One messaging event from a webhook delivery, normalised.
///
/// `sender_id` is always the end user. For echoes (messages the page sent)
/// the platform reports the page as sender, so the two ids are swapped when
/// the event is built.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InboundEvent {
    pub page_id: String,
    pub sender_id: String,
    pub message_id: Option<String>,
    pub text: Option<String>,
    pub attachments: Vec<InboundAttachment>,
    pub postback: Option<Postback>,
    pub referral: Option<Referral>,
    pub is_echo: bool,
    /// App that authored an echo; absent when a human replied from the inbox
    pub app_id: Option<u64>,
    pub timestamp: Option<i64>,
}

impl InboundEvent {
    /// First image attachment URL, if any
    pub fn image_url(&self) -> Option<&str> {
        self.attachments
            .iter()
            .find(|a| a.kind == "image")
            .and_then(|a| a.url.as_deref())
    }

    /// Trimmed text, `None` when empty
    pub fn text(&self) -> Option<&str> {
        self.text
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct InboundAttachment {
    pub kind: String,
    pub url: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Postback {
    pub payload: String,
    pub title: Option<String>,
    pub referral: Option<Referral>,
}

/// Where a conversation came from (m.me link `ref`, ad click, ...)
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Referral {
    pub ref_param: Option<String>,
    pub source: Option<String>,
    pub ad_id: Option<String>,
}

impl Referral {
    /// Compact label stored on the lead, e.g. `ADS:spring_promo`
    pub fn label(&self) -> Option<String> {
        let detail = self.ref_param.as_deref().or(self.ad_id.as_deref());
        match (self.source.as_deref(), detail) {
            (Some(source), Some(detail)) => Some(format!("{}:{}", source, detail)),
            (Some(source), None) => Some(source.to_string()),
            (None, Some(detail)) => Some(detail.to_string()),
            (None, None) => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Product {
    pub id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub category: Option<String>,
    pub price: Option<f64>,
    pub image_url: Option<String>,
    pub product_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Property {
    pub id: Uuid,
    pub title: String,
    pub property_type: Option<String>,
    pub location: Option<String>,
    pub price: Option<f64>,
    pub bedrooms: Option<i32>,
    pub image_url: Option<String>,
    pub listing_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PaymentMethod {
    pub id: Uuid,
    pub name: String,
    pub account_name: Option<String>,
    pub account_number: Option<String>,
    pub qr_code_url: Option<String>,
    pub instructions: Option<String>,
}

/// Sales pipeline stage of a lead
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineStage {
    New,
    Engaged,
    Qualified,
    Negotiating,
    ReceiptSubmitted,
    Converted,
    Lost,
}

impl PipelineStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            PipelineStage::New => "new",
            PipelineStage::Engaged => "engaged",
            PipelineStage::Qualified => "qualified",
            PipelineStage::Negotiating => "negotiating",
            PipelineStage::ReceiptSubmitted => "receipt_submitted",
            PipelineStage::Converted => "converted",
            PipelineStage::Lost => "lost",
        }
    }

    /// Position in the funnel; terminal stages rank highest
    pub fn rank(&self) -> u8 {
        match self {
            PipelineStage::New => 0,
            PipelineStage::Engaged => 1,
            PipelineStage::Qualified => 2,
            PipelineStage::Negotiating => 3,
            PipelineStage::ReceiptSubmitted => 4,
            PipelineStage::Converted => 5,
            PipelineStage::Lost => 6,
        }
    }
}

impl std::str::FromStr for PipelineStage {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        match s {
            "new" => Ok(PipelineStage::New),
            "engaged" => Ok(PipelineStage::Engaged),
            "qualified" => Ok(PipelineStage::Qualified),
            "negotiating" => Ok(PipelineStage::Negotiating),
            "receipt_submitted" => Ok(PipelineStage::ReceiptSubmitted),
            "converted" => Ok(PipelineStage::Converted),
            "lost" => Ok(PipelineStage::Lost),
            _ => Err(anyhow::anyhow!("Invalid pipeline stage: {}", s)),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Lead {
    pub id: Uuid,
    pub sender_id: String,
    pub page_id: String,
    pub name: Option<String>,
    pub phone: Option<String>,
    pub email: Option<String>,
    pub message_count: i32,
    pub stage: PipelineStage,
    pub referral_source: Option<String>,
    pub best_contact_hour: Option<i32>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ContactInfo {
    pub phone: Option<String>,
    pub email: Option<String>,
}

impl ContactInfo {
    pub fn is_empty(&self) -> bool {
        self.phone.is_none() && self.email.is_none()
    }
}

/// What the image classifier extracted from an attachment
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ImageAnalysis {
    pub is_receipt: bool,
    pub confidence: f32,
    pub amount: Option<f64>,
    pub date: Option<String>,
    pub receiver_name: Option<String>,
    pub receiver_number: Option<String>,
    pub platform: Option<String>,
    pub details: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum VerificationStatus {
    Verified,
    Unverified,
    NotReceipt,
}

/// Image classification plus the outcome of matching it against the
/// page's payment methods
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ImageContext {
    pub analysis: ImageAnalysis,
    pub verification_status: VerificationStatus,
    pub matched_method: Option<String>,
    pub verification_note: String,
}

/// Input to the reply generator
#[derive(Debug, Clone, PartialEq)]
pub struct AiRequest {
    pub sender_id: String,
    pub page_id: String,
    pub text: String,
    pub image: Option<ImageContext>,
}

/// Reply fragments plus media to send as native attachments
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AiReply {
    pub messages: Vec<String>,
    pub media: Vec<String>,
}

impl AiReply {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            messages: vec![text.into()],
            media: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn test_stage_round_trips_through_str() {
        for stage in [
            PipelineStage::New,
            PipelineStage::ReceiptSubmitted,
            PipelineStage::Lost,
        ] {
            assert_eq!(PipelineStage::from_str(stage.as_str()).unwrap(), stage);
        }
        assert!(PipelineStage::from_str("archived").is_err());
    }

    #[test]
    fn test_referral_label() {
        let referral = Referral {
            ref_param: Some("spring_promo".to_string()),
            source: Some("ADS".to_string()),
            ad_id: Some("123".to_string()),
        };
        assert_eq!(referral.label().as_deref(), Some("ADS:spring_promo"));
        assert_eq!(Referral::default().label(), None);
    }

    #[test]
    fn test_event_helpers() {
        let event = InboundEvent {
            text: Some("   ".to_string()),
            attachments: vec![
                InboundAttachment {
                    kind: "audio".to_string(),
                    url: Some("https://cdn.example.com/a.mp3".to_string()),
                },
                InboundAttachment {
                    kind: "image".to_string(),
                    url: Some("https://cdn.example.com/r.jpg".to_string()),
                },
            ],
            ..Default::default()
        };
        assert_eq!(event.text(), None);
        assert_eq!(event.image_url(), Some("https://cdn.example.com/r.jpg"));
    }
}
