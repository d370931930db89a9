//! Inbound event routing
//!
//! Built once at startup. Every messaging event from a webhook delivery goes
//! through `handle_event`: dedup, then echo, referral, postback, image or
//! text handling.

use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::background::BackgroundSpawner;
use crate::batcher::{MessageBatcher, DEFAULT_BATCH_WINDOW};
use crate::bookkeeping::{Bookkeeper, DEFAULT_CONTACT_TIME_DELAY};
use crate::cards::{CardSender, CardSettings};
use crate::collaborators::{
    Catalog, ContactExtractor, ContactTimeEstimator, ImageClassifier, LeadTracker,
    ResponseGenerator, StageAnalyzer, TakeoverStore,
};
use crate::dedup::{DeliveryDeduplicator, DEFAULT_DEDUP_CAPACITY};
use crate::dispatcher::{AiResponder, CatalogCardStrategy, DispatchOutcome, Dispatcher};
use crate::intent::IntentClassifier;
use crate::messenger::Messenger;
use crate::model::{InboundEvent, Postback};
use crate::receipt::{ImageOutcome, ReceiptHandler};
use crate::reply::ReplyPacing;
use crate::takeover::{TakeoverGate, DEFAULT_TAKEOVER_TIMEOUT_MINUTES};

pub const GET_STARTED_PAYLOAD: &str = "GET_STARTED";
pub const PAY_PREFIX: &str = "PAY_";
pub const INQUIRE_PREFIX: &str = "INQUIRE_";
const GET_STARTED_TEXT: &str = "Hi! I'd like to get started.";

/// Tunables for the pipeline, separate from `Config` so tests can build one
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub batch_window: Duration,
    pub batching_enabled: bool,
    pub dedup_capacity: usize,
    pub takeover_timeout: chrono::Duration,
    /// Our app id, used to tell our own echoes from human replies
    pub app_id: Option<u64>,
    pub pacing: ReplyPacing,
    pub cards: CardSettings,
    pub contact_time_delay: Duration,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            batch_window: DEFAULT_BATCH_WINDOW,
            batching_enabled: true,
            dedup_capacity: DEFAULT_DEDUP_CAPACITY,
            takeover_timeout: chrono::Duration::minutes(DEFAULT_TAKEOVER_TIMEOUT_MINUTES),
            app_id: None,
            pacing: ReplyPacing::default(),
            cards: CardSettings::default(),
            contact_time_delay: DEFAULT_CONTACT_TIME_DELAY,
        }
    }
}

/// Everything the pipeline talks to
#[derive(Clone)]
pub struct Collaborators {
    pub messenger: Arc<dyn Messenger>,
    pub catalog: Arc<dyn Catalog>,
    pub leads: Arc<dyn LeadTracker>,
    pub takeover: Arc<dyn TakeoverStore>,
    pub generator: Arc<dyn ResponseGenerator>,
    pub classifier: Arc<dyn ImageClassifier>,
    pub contacts: Arc<dyn ContactExtractor>,
    pub stages: Arc<dyn StageAnalyzer>,
    pub estimator: Arc<dyn ContactTimeEstimator>,
    pub spawner: Arc<dyn BackgroundSpawner>,
}

/// What happened to one event
#[derive(Debug, Clone, PartialEq)]
pub enum EventOutcome {
    Duplicate,
    Echo,
    Referral,
    PaymentDetails(DispatchOutcome),
    Image(ImageOutcome),
    /// Handed to the batcher
    Queued,
    Suppressed,
    Ignored,
}

pub struct Pipeline {
    dedup: DeliveryDeduplicator,
    takeover: Arc<TakeoverGate>,
    batcher: MessageBatcher,
    dispatcher: Arc<Dispatcher>,
    receipts: ReceiptHandler,
    catalog: Arc<dyn Catalog>,
    bookkeeper: Bookkeeper,
    spawner: Arc<dyn BackgroundSpawner>,
}

impl Pipeline {
    pub fn new(settings: PipelineSettings, c: Collaborators) -> Self {
        let takeover = Arc::new(TakeoverGate::new(
            c.takeover.clone(),
            settings.takeover_timeout,
            settings.app_id,
        ));
        let bookkeeper = Bookkeeper::new(
            c.leads.clone(),
            c.contacts.clone(),
            c.stages.clone(),
            c.estimator.clone(),
            c.spawner.clone(),
            settings.contact_time_delay,
        );
        let cards = Arc::new(CardSender::new(c.messenger.clone(), settings.cards.clone()));
        let ai = Arc::new(AiResponder::new(
            c.generator.clone(),
            c.messenger.clone(),
            settings.pacing,
        ));

        let card_strategy = CatalogCardStrategy::new(
            IntentClassifier::default(),
            c.catalog.clone(),
            cards.clone(),
            c.messenger.clone(),
        );
        let dispatcher = Arc::new(Dispatcher::new(
            takeover.clone(),
            c.messenger.clone(),
            c.catalog.clone(),
            cards,
            vec![Box::new(card_strategy)],
            ai.clone(),
            bookkeeper.clone(),
        ));
        let receipts = ReceiptHandler::new(
            takeover.clone(),
            c.messenger.clone(),
            c.classifier.clone(),
            c.catalog.clone(),
            c.leads.clone(),
            ai,
            bookkeeper.clone(),
        );
        let batcher = MessageBatcher::new(
            dispatcher.clone(),
            settings.batch_window,
            settings.batching_enabled,
        );

        Self {
            dedup: DeliveryDeduplicator::new(settings.dedup_capacity),
            takeover,
            batcher,
            dispatcher,
            receipts,
            catalog: c.catalog,
            bookkeeper,
            spawner: c.spawner,
        }
    }

    /// Run work off the request path, e.g. per-event processing
    pub fn spawner(&self) -> &Arc<dyn BackgroundSpawner> {
        &self.spawner
    }

    pub async fn handle_event(&self, event: InboundEvent) -> EventOutcome {
        if !self.dedup.should_process(event.message_id.as_deref()) {
            debug!("Skipping duplicate delivery {:?}", event.message_id);
            return EventOutcome::Duplicate;
        }

        if event.is_echo {
            self.takeover
                .observe_echo(&event.sender_id, event.app_id)
                .await;
            return EventOutcome::Echo;
        }

        let (sender, page) = (event.sender_id.as_str(), event.page_id.as_str());

        if let Some(postback) = &event.postback {
            info!("📨 Postback from {}: {}", sender, postback.payload);
            if let Some(label) = postback.referral.as_ref().and_then(|r| r.label()) {
                self.record_referral(sender, page, label).await;
            }
            return self.handle_postback(sender, page, postback).await;
        }

        if let Some(referral) = &event.referral {
            if let Some(label) = referral.label() {
                info!("📨 Referral for {}: {}", sender, label);
                self.record_referral(sender, page, label).await;
            }
            if event.text().is_none() && event.attachments.is_empty() {
                return EventOutcome::Referral;
            }
        }

        if let Some(url) = event.image_url() {
            info!("📨 Image from {}", sender);
            return EventOutcome::Image(self.receipts.handle(sender, page, url, event.text()).await);
        }

        match event.text() {
            Some(text) => {
                info!("📨 Message from {}: {}", sender, text);
                self.queue_text(sender, page, text).await
            }
            None => {
                debug!("Ignoring event from {} with no text or image", sender);
                EventOutcome::Ignored
            }
        }
    }

    /// Lead bookkeeping stays with the human agent during a takeover
    async fn record_referral(&self, sender: &str, page: &str, label: String) {
        if self.takeover.is_active(sender).await {
            debug!("Takeover active for {}, not recording referral", sender);
            return;
        }
        self.bookkeeper.schedule_referral(sender, page, label);
    }

    async fn queue_text(&self, sender: &str, page: &str, text: &str) -> EventOutcome {
        if self.takeover.is_active(sender).await {
            info!("🙋 Human takeover active for {}, not replying", sender);
            return EventOutcome::Suppressed;
        }

        match self.batcher.enqueue(sender, text, page) {
            Ok(()) => EventOutcome::Queued,
            Err(e) => {
                warn!("Could not queue message from {}: {:#}", sender, e);
                EventOutcome::Ignored
            }
        }
    }

    async fn handle_postback(&self, sender: &str, page: &str, postback: &Postback) -> EventOutcome {
        let payload = postback.payload.as_str();

        if let Some(id) = payload.strip_prefix(PAY_PREFIX) {
            return match Uuid::parse_str(id) {
                Ok(id) => EventOutcome::PaymentDetails(
                    self.dispatcher.send_payment_details(sender, page, id).await,
                ),
                Err(_) => {
                    warn!("Malformed payment postback from {}: {}", sender, payload);
                    EventOutcome::Ignored
                }
            };
        }

        let text = if payload == GET_STARTED_PAYLOAD {
            GET_STARTED_TEXT.to_string()
        } else if let Some(id) = payload.strip_prefix(INQUIRE_PREFIX) {
            self.inquiry_text(page, id).await
        } else {
            postback
                .title
                .clone()
                .filter(|t| !t.trim().is_empty())
                .unwrap_or_else(|| payload.to_string())
        };

        self.queue_text(sender, page, &text).await
    }

    async fn inquiry_text(&self, page: &str, id: &str) -> String {
        let property = match Uuid::parse_str(id) {
            Ok(id) => match self.catalog.property(page, id).await {
                Ok(property) => property,
                Err(e) => {
                    warn!("Property lookup for inquiry failed: {:#}", e);
                    None
                }
            },
            Err(_) => None,
        };

        match property {
            Some(p) => match p.location.as_deref() {
                Some(location) => format!(
                    "I'm interested in {} ({}). Can you tell me more?",
                    p.title, location
                ),
                None => format!("I'm interested in {}. Can you tell me more?", p.title),
            },
            None => "I'd like to inquire about this property.".to_string(),
        }
    }
}
