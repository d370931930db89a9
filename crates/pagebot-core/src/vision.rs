//! Image classification
//!
//! Asks a vision-capable model whether an attachment is a payment receipt and
//! what it shows. The image is passed by URL; Messenger attachment URLs are
//! publicly fetchable for a while after delivery.

use anyhow::{Context, Result};
use async_trait::async_trait;
use tracing::{debug, info};

use crate::ai::{strip_code_fence, ChatCompletionsClient};
use crate::collaborators::ImageClassifier;
use crate::model::ImageAnalysis;

const CLASSIFY_SYSTEM_PROMPT: &str = "You inspect images customers send to a business \
    on Messenger. Decide whether the image is a payment receipt or transfer \
    confirmation (GCash, Maya, bank transfer, remittance slip, ...). Transcribe \
    numbers and names exactly as printed, including any masking characters. \
    Respond ONLY with a JSON object with these keys: \
    is_receipt (bool), confidence (0 to 1), amount (number or null), \
    date (string or null), receiver_name (string or null), \
    receiver_number (string or null), platform (string or null), \
    details (short description of the image).";

#[async_trait]
impl ImageClassifier for ChatCompletionsClient {
    async fn classify(&self, image_url: &str) -> Result<ImageAnalysis> {
        info!("Classifying image with model {}", self.vision_model());

        let messages = vec![
            serde_json::json!({ "role": "system", "content": CLASSIFY_SYSTEM_PROMPT }),
            serde_json::json!({
                "role": "user",
                "content": [
                    { "type": "image_url", "image_url": { "url": image_url } },
                    { "type": "text", "text": "Classify this image." }
                ]
            }),
        ];

        let content = self.complete(self.vision_model(), messages, 512).await?;
        let analysis = parse_analysis(&content)?;

        debug!(
            "Image analysis: receipt={} confidence={:.2} platform={:?}",
            analysis.is_receipt, analysis.confidence, analysis.platform
        );
        Ok(analysis)
    }
}

/// Parses the model's JSON answer; missing keys take their defaults
pub fn parse_analysis(content: &str) -> Result<ImageAnalysis> {
    let mut analysis: ImageAnalysis = serde_json::from_str(strip_code_fence(content))
        .context("Image classification was not valid JSON")?;
    analysis.confidence = analysis.confidence.clamp(0.0, 1.0);
    Ok(analysis)
}
