//! Response dispatcher
//!
//! One inbound turn becomes exactly one of: silence (human takeover), a
//! catalog carousel, a generated reply, or the fixed fallback text. Typing
//! is switched on before the reply and off again on every exit path.

use anyhow::{Context, Result};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::batcher::TurnHandler;
use crate::bookkeeping::Bookkeeper;
use crate::cards::CardSender;
use crate::collaborators::{Catalog, ResponseGenerator};
use crate::intent::{IntentCategory, IntentClassifier};
use crate::messenger::{log_send_failure, Messenger};
use crate::model::{AiRequest, PaymentMethod};
use crate::reply::{prepare_fragments, send_reply, ReplyPacing, ReplyStats};
use crate::takeover::TakeoverGate;

pub const FALLBACK_TEXT: &str =
    "Sorry, I'm having trouble answering right now. Someone from our team will get back to you shortly.";
pub const RECEIPT_PROMPT: &str =
    "Once you've paid, please send a screenshot of your receipt here so we can verify it. 🙏";
// Captions follow the carousel so a failed card send leaves nothing behind
const PRODUCT_CAPTION: &str = "Those are some of our products. Tap a card to see more.";
const PROPERTY_CAPTION: &str = "Those are some properties you might like. Tap a card to see more.";
const PAYMENT_CAPTION: &str = "Those are the ways you can pay. Tap \"Pay here\" for the details.";
const PAYMENT_UNAVAILABLE: &str =
    "Sorry, that payment option is no longer available. Here's what we accept right now:";

/// A batched text turn from one end user
#[derive(Debug, Clone, PartialEq)]
pub struct Turn {
    pub sender_id: String,
    pub page_id: String,
    pub text: String,
}

impl Turn {
    pub fn new(sender_id: &str, page_id: &str, text: &str) -> Self {
        Self {
            sender_id: sender_id.to_string(),
            page_id: page_id.to_string(),
            text: text.to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// A human agent owns the conversation; nothing was sent
    Suppressed,
    Cards(IntentCategory),
    AiReply(ReplyStats),
    PaymentDetails,
    Fallback,
}

impl DispatchOutcome {
    /// Whether the user got a real answer, which is when bookkeeping runs
    pub fn replied(&self) -> bool {
        matches!(
            self,
            DispatchOutcome::Cards(_) | DispatchOutcome::AiReply(_) | DispatchOutcome::PaymentDetails
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StrategyOutcome {
    Handled(DispatchOutcome),
    NotApplicable,
    /// Tried and failed; the next strategy gets the turn
    Failed,
}

/// A way of answering a turn that may decline it
#[async_trait]
pub trait ResponseStrategy: Send + Sync {
    fn name(&self) -> &'static str;
    async fn attempt(&self, turn: &Turn) -> StrategyOutcome;
}

/// Answers catalog questions with a carousel instead of a generated reply
pub struct CatalogCardStrategy {
    classifier: IntentClassifier,
    catalog: Arc<dyn Catalog>,
    cards: Arc<CardSender>,
    messenger: Arc<dyn Messenger>,
}

impl CatalogCardStrategy {
    pub fn new(
        classifier: IntentClassifier,
        catalog: Arc<dyn Catalog>,
        cards: Arc<CardSender>,
        messenger: Arc<dyn Messenger>,
    ) -> Self {
        Self {
            classifier,
            catalog,
            cards,
            messenger,
        }
    }

    async fn say(&self, turn: &Turn, text: &str) {
        if let Err(e) = self
            .messenger
            .send_text(&turn.page_id, &turn.sender_id, text)
            .await
        {
            log_send_failure("card text", &turn.sender_id, &e);
        }
    }
}

#[async_trait]
impl ResponseStrategy for CatalogCardStrategy {
    fn name(&self) -> &'static str {
        "catalog_cards"
    }

    async fn attempt(&self, turn: &Turn) -> StrategyOutcome {
        let intent = self.classifier.classify(&turn.text);
        let (page, sender) = (turn.page_id.as_str(), turn.sender_id.as_str());

        let sent = match intent {
            IntentCategory::None => return StrategyOutcome::NotApplicable,
            IntentCategory::Product => match self.catalog.products(page).await {
                Ok(items) if items.is_empty() => return StrategyOutcome::NotApplicable,
                Ok(items) => self.cards.send_products(sender, &items, page).await,
                Err(e) => {
                    warn!("Product lookup failed for page {}: {:#}", page, e);
                    return StrategyOutcome::Failed;
                }
            },
            IntentCategory::Property => match self.catalog.properties(page).await {
                Ok(items) if items.is_empty() => return StrategyOutcome::NotApplicable,
                Ok(items) => self.cards.send_properties(sender, &items, page).await,
                Err(e) => {
                    warn!("Property lookup failed for page {}: {:#}", page, e);
                    return StrategyOutcome::Failed;
                }
            },
            IntentCategory::Payment => match self.catalog.payment_methods(page).await {
                Ok(items) if items.is_empty() => return StrategyOutcome::NotApplicable,
                Ok(items) => self.cards.send_payment_methods(sender, &items, page).await,
                Err(e) => {
                    warn!("Payment method lookup failed for page {}: {:#}", page, e);
                    return StrategyOutcome::Failed;
                }
            },
        };

        if !sent {
            return StrategyOutcome::Failed;
        }

        match intent {
            IntentCategory::Product => self.say(turn, PRODUCT_CAPTION).await,
            IntentCategory::Property => self.say(turn, PROPERTY_CAPTION).await,
            IntentCategory::Payment => {
                self.say(turn, PAYMENT_CAPTION).await;
                self.say(turn, RECEIPT_PROMPT).await;
            }
            IntentCategory::None => {}
        }

        info!("🗂️ Answered {} query from {} with cards", intent.as_str(), sender);
        StrategyOutcome::Handled(DispatchOutcome::Cards(intent))
    }
}

/// Generated replies for text and image turns
pub struct AiResponder {
    generator: Arc<dyn ResponseGenerator>,
    messenger: Arc<dyn Messenger>,
    pacing: ReplyPacing,
}

impl AiResponder {
    pub fn new(
        generator: Arc<dyn ResponseGenerator>,
        messenger: Arc<dyn Messenger>,
        pacing: ReplyPacing,
    ) -> Self {
        Self {
            generator,
            messenger,
            pacing,
        }
    }

    /// Generate and send. Fails when the generator fails or returns nothing
    /// that could be sent.
    pub async fn respond(&self, request: &AiRequest) -> Result<ReplyStats> {
        let reply = self
            .generator
            .generate(request)
            .await
            .context("Failed to generate reply")?;

        if prepare_fragments(&reply.messages, &reply.media).is_empty()
            && reply.media.iter().all(|m| m.is_empty())
        {
            anyhow::bail!("Generator returned an empty reply");
        }

        Ok(send_reply(
            self.messenger.as_ref(),
            &request.page_id,
            &request.sender_id,
            &reply,
            self.pacing,
        )
        .await)
    }
}

pub struct Dispatcher {
    takeover: Arc<TakeoverGate>,
    messenger: Arc<dyn Messenger>,
    catalog: Arc<dyn Catalog>,
    cards: Arc<CardSender>,
    strategies: Vec<Box<dyn ResponseStrategy>>,
    ai: Arc<AiResponder>,
    bookkeeper: Bookkeeper,
}

impl Dispatcher {
    /// `strategies` are tried in order; the AI responder always runs last
    pub fn new(
        takeover: Arc<TakeoverGate>,
        messenger: Arc<dyn Messenger>,
        catalog: Arc<dyn Catalog>,
        cards: Arc<CardSender>,
        strategies: Vec<Box<dyn ResponseStrategy>>,
        ai: Arc<AiResponder>,
        bookkeeper: Bookkeeper,
    ) -> Self {
        Self {
            takeover,
            messenger,
            catalog,
            cards,
            strategies,
            ai,
            bookkeeper,
        }
    }

    pub async fn dispatch(&self, turn: &Turn) -> DispatchOutcome {
        if self.takeover.is_active(&turn.sender_id).await {
            info!("🙋 Human takeover active for {}, not replying", turn.sender_id);
            return DispatchOutcome::Suppressed;
        }

        self.typing(turn, true).await;
        let outcome = match self.respond(turn).await {
            Ok(outcome) => outcome,
            Err(e) => {
                error!("Reply to {} failed: {:#}", turn.sender_id, e);
                self.send_fallback(turn, FALLBACK_TEXT).await;
                DispatchOutcome::Fallback
            }
        };
        self.typing(turn, false).await;

        if outcome.replied() {
            self.bookkeeper
                .schedule(&turn.sender_id, &turn.page_id, &turn.text);
        }
        outcome
    }

    async fn respond(&self, turn: &Turn) -> Result<DispatchOutcome> {
        for strategy in &self.strategies {
            match strategy.attempt(turn).await {
                StrategyOutcome::Handled(outcome) => return Ok(outcome),
                StrategyOutcome::NotApplicable => {}
                StrategyOutcome::Failed => {
                    warn!(
                        "Strategy '{}' failed for {}, falling through",
                        strategy.name(),
                        turn.sender_id
                    );
                }
            }
        }

        let request = AiRequest {
            sender_id: turn.sender_id.clone(),
            page_id: turn.page_id.clone(),
            text: turn.text.clone(),
            image: None,
        };
        let stats = self.ai.respond(&request).await?;
        Ok(DispatchOutcome::AiReply(stats))
    }

    /// Answer a "Pay Here" tap with the account details and QR code
    pub async fn send_payment_details(
        &self,
        sender_id: &str,
        page_id: &str,
        method_id: Uuid,
    ) -> DispatchOutcome {
        let turn = Turn::new(sender_id, page_id, "");
        if self.takeover.is_active(sender_id).await {
            info!("🙋 Human takeover active for {}, not replying", sender_id);
            return DispatchOutcome::Suppressed;
        }

        self.typing(&turn, true).await;
        let outcome = match self.payment_details(&turn, method_id).await {
            Ok(outcome) => outcome,
            Err(e) => {
                error!("Payment details for {} failed: {:#}", sender_id, e);
                self.send_fallback(&turn, FALLBACK_TEXT).await;
                DispatchOutcome::Fallback
            }
        };
        self.typing(&turn, false).await;
        outcome
    }

    async fn payment_details(&self, turn: &Turn, method_id: Uuid) -> Result<DispatchOutcome> {
        let (page, sender) = (turn.page_id.as_str(), turn.sender_id.as_str());
        let Some(method) = self.catalog.payment_method(page, method_id).await? else {
            warn!("Payment method {} not found for page {}", method_id, page);
            self.send_fallback(turn, PAYMENT_UNAVAILABLE).await;
            let methods = self.catalog.payment_methods(page).await?;
            return Ok(if self.cards.send_payment_methods(sender, &methods, page).await {
                DispatchOutcome::Cards(IntentCategory::Payment)
            } else {
                DispatchOutcome::Fallback
            });
        };

        self.messenger
            .send_text(page, sender, &payment_details_text(&method))
            .await
            .context("Failed to send payment details")?;

        if let Some(qr) = method.qr_code_url.as_deref().filter(|u| !u.is_empty()) {
            if let Err(e) = self.messenger.send_media(page, sender, qr).await {
                log_send_failure("payment QR", sender, &e);
            }
        }

        if let Err(e) = self.messenger.send_text(page, sender, RECEIPT_PROMPT).await {
            log_send_failure("receipt prompt", sender, &e);
        }
        info!("💳 Sent {} details to {}", method.name, sender);
        Ok(DispatchOutcome::PaymentDetails)
    }

    async fn typing(&self, turn: &Turn, on: bool) {
        if let Err(e) = self
            .messenger
            .send_typing(&turn.page_id, &turn.sender_id, on)
            .await
        {
            log_send_failure("typing indicator", &turn.sender_id, &e);
        }
    }

    async fn send_fallback(&self, turn: &Turn, text: &str) {
        if let Err(e) = self
            .messenger
            .send_text(&turn.page_id, &turn.sender_id, text)
            .await
        {
            log_send_failure("fallback", &turn.sender_id, &e);
        }
    }
}

#[async_trait]
impl TurnHandler for Dispatcher {
    async fn handle_turn(&self, sender_id: &str, page_id: &str, text: &str) {
        let outcome = self.dispatch(&Turn::new(sender_id, page_id, text)).await;
        info!("Turn for {} finished: {:?}", sender_id, outcome);
    }
}

fn payment_details_text(method: &PaymentMethod) -> String {
    let mut lines = vec![format!("💳 {}", method.name)];
    if let Some(name) = method.account_name.as_deref() {
        lines.push(format!("Account name: {}", name));
    }
    if let Some(number) = method.account_number.as_deref() {
        lines.push(format!("Account number: {}", number));
    }
    if let Some(instructions) = method.instructions.as_deref() {
        lines.push(instructions.to_string());
    }
    lines.join("\n")
}
