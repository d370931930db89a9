//! Image attachments and payment receipt verification
//!
//! Images skip the batcher. The classification and the outcome of matching
//! it against the page's payment accounts are handed to the same reply
//! generator the text path uses.

use anyhow::{Context, Result};
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::bookkeeping::Bookkeeper;
use crate::collaborators::{Catalog, ImageClassifier, LeadTracker};
use crate::dispatcher::AiResponder;
use crate::messenger::{log_send_failure, Messenger};
use crate::model::{
    AiRequest, ImageAnalysis, ImageContext, PaymentMethod, PipelineStage, VerificationStatus,
};
use crate::reply::ReplyStats;
use crate::takeover::TakeoverGate;

/// Minimum classifier confidence before a receipt moves the lead forward
pub const RECEIPT_CONFIDENCE_THRESHOLD: f32 = 0.7;
pub const IMAGE_ACK_TEXT: &str =
    "Thanks for the image! We've received it and someone from our team will check it shortly.";
const IMAGE_PLACEHOLDER: &str = "[Sent an image]";

#[derive(Debug, Clone, PartialEq)]
pub enum ImageOutcome {
    Suppressed,
    Replied {
        status: VerificationStatus,
        stats: ReplyStats,
    },
    Fallback,
}

fn digits(s: &str) -> String {
    s.chars().filter(|c| c.is_ascii_digit()).collect()
}

fn last4(digits: &str) -> Option<&str> {
    digits.len().checked_sub(4).map(|start| &digits[start..])
}

fn number_matches(extracted: &str, configured: &str) -> bool {
    let (extracted, configured) = (digits(extracted), digits(configured));
    if extracted.len() < 4 || configured.len() < 4 {
        return false;
    }
    configured.contains(&extracted)
        || extracted.contains(&configured)
        || last4(&extracted) == last4(&configured)
}

fn normalize_name(s: &str) -> String {
    s.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Names shown partly hidden ("J*** D*** C.") cannot be compared
fn is_masked(name: &str) -> bool {
    name.chars().any(|c| matches!(c, '*' | '•' | '●'))
}

fn name_matches(extracted: &str, configured: &str) -> bool {
    let (extracted, configured) = (normalize_name(extracted), normalize_name(configured));
    if extracted.len() < 3 || configured.is_empty() {
        return false;
    }
    configured.contains(&extracted) || extracted.contains(&configured)
}

/// Match an analysed image against the configured payment accounts.
/// The receiver number is tried first, the receiver name only when it is
/// not masked.
pub fn verify_receipt(analysis: &ImageAnalysis, methods: &[PaymentMethod]) -> ImageContext {
    if !analysis.is_receipt {
        return ImageContext {
            analysis: analysis.clone(),
            verification_status: VerificationStatus::NotReceipt,
            matched_method: None,
            verification_note: "Image does not look like a payment receipt".to_string(),
        };
    }

    let by_number = analysis
        .receiver_number
        .as_deref()
        .filter(|n| !n.trim().is_empty())
        .and_then(|number| {
            methods.iter().find(|m| {
                m.account_number
                    .as_deref()
                    .is_some_and(|configured| number_matches(number, configured))
            })
        });

    let matched = by_number.or_else(|| {
        analysis
            .receiver_name
            .as_deref()
            .filter(|name| !is_masked(name))
            .and_then(|name| {
                methods.iter().find(|m| {
                    m.account_name
                        .as_deref()
                        .is_some_and(|configured| name_matches(name, configured))
                })
            })
    });

    match matched {
        Some(method) => ImageContext {
            analysis: analysis.clone(),
            verification_status: VerificationStatus::Verified,
            matched_method: Some(method.name.clone()),
            verification_note: format!("Receiver matches the {} account", method.name),
        },
        None => ImageContext {
            analysis: analysis.clone(),
            verification_status: VerificationStatus::Unverified,
            matched_method: None,
            verification_note: "Receiver does not match any configured payment account"
                .to_string(),
        },
    }
}

pub struct ReceiptHandler {
    takeover: Arc<TakeoverGate>,
    messenger: Arc<dyn Messenger>,
    classifier: Arc<dyn ImageClassifier>,
    catalog: Arc<dyn Catalog>,
    leads: Arc<dyn LeadTracker>,
    ai: Arc<AiResponder>,
    bookkeeper: Bookkeeper,
}

impl ReceiptHandler {
    pub fn new(
        takeover: Arc<TakeoverGate>,
        messenger: Arc<dyn Messenger>,
        classifier: Arc<dyn ImageClassifier>,
        catalog: Arc<dyn Catalog>,
        leads: Arc<dyn LeadTracker>,
        ai: Arc<AiResponder>,
        bookkeeper: Bookkeeper,
    ) -> Self {
        Self {
            takeover,
            messenger,
            classifier,
            catalog,
            leads,
            ai,
            bookkeeper,
        }
    }

    pub async fn handle(
        &self,
        sender_id: &str,
        page_id: &str,
        image_url: &str,
        caption: Option<&str>,
    ) -> ImageOutcome {
        if self.takeover.is_active(sender_id).await {
            info!("🙋 Human takeover active for {}, ignoring image", sender_id);
            return ImageOutcome::Suppressed;
        }

        let text = caption.unwrap_or(IMAGE_PLACEHOLDER);
        self.typing(sender_id, page_id, true).await;
        let outcome = match self.process(sender_id, page_id, image_url, text).await {
            Ok((status, stats)) => ImageOutcome::Replied { status, stats },
            Err(e) => {
                error!("Image handling for {} failed: {:#}", sender_id, e);
                if let Err(e) = self
                    .messenger
                    .send_text(page_id, sender_id, IMAGE_ACK_TEXT)
                    .await
                {
                    log_send_failure("image acknowledgement", sender_id, &e);
                }
                ImageOutcome::Fallback
            }
        };
        self.typing(sender_id, page_id, false).await;

        if matches!(outcome, ImageOutcome::Replied { .. }) {
            self.bookkeeper.schedule(sender_id, page_id, text);
        }
        outcome
    }

    async fn process(
        &self,
        sender_id: &str,
        page_id: &str,
        image_url: &str,
        text: &str,
    ) -> Result<(VerificationStatus, ReplyStats)> {
        let analysis = self
            .classifier
            .classify(image_url)
            .await
            .context("Image classification failed")?;
        let methods = self
            .catalog
            .payment_methods(page_id)
            .await
            .context("Failed to load payment methods")?;

        let context = verify_receipt(&analysis, &methods);
        info!(
            "🧾 Image from {}: receipt={} confidence={:.2} status={:?}",
            sender_id, analysis.is_receipt, analysis.confidence, context.verification_status
        );

        if analysis.is_receipt && analysis.confidence >= RECEIPT_CONFIDENCE_THRESHOLD {
            self.mark_receipt_submitted(sender_id, page_id).await;
        }

        let status = context.verification_status;
        let request = AiRequest {
            sender_id: sender_id.to_string(),
            page_id: page_id.to_string(),
            text: text.to_string(),
            image: Some(context),
        };
        let stats = self.ai.respond(&request).await?;
        Ok((status, stats))
    }

    async fn mark_receipt_submitted(&self, sender_id: &str, page_id: &str) {
        let lead = match self.leads.get_or_create(sender_id, page_id).await {
            Ok(lead) => lead,
            Err(e) => {
                warn!("Could not load lead for {}: {:#}", sender_id, e);
                return;
            }
        };

        // Converted/lost leads stay where they are
        if lead.stage.rank() >= PipelineStage::ReceiptSubmitted.rank() {
            return;
        }

        match self
            .leads
            .set_stage(lead.id, PipelineStage::ReceiptSubmitted, "receipt image submitted")
            .await
        {
            Ok(()) => info!("📈 Lead {} stage -> receipt_submitted", lead.id),
            Err(e) => warn!("Failed to update stage for lead {}: {:#}", lead.id, e),
        }
    }

    async fn typing(&self, sender_id: &str, page_id: &str, on: bool) {
        if let Err(e) = self.messenger.send_typing(page_id, sender_id, on).await {
            log_send_failure("typing indicator", sender_id, &e);
        }
    }
}
