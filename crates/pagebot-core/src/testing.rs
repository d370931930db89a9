//! In-memory collaborators for unit tests

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use pagebot_graph::{CardElement, GraphError};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use uuid::Uuid;

use crate::background::{BackgroundSpawner, BackgroundTask};
use crate::collaborators::{
    Catalog, ConversationLog, ImageClassifier, LeadTracker, PageTokens, ResponseGenerator,
    TakeoverStore,
};
use crate::contact::RegexContactExtractor;
use crate::leads::{HourlyContactTimeEstimator, KeywordStageAnalyzer};
use crate::messenger::Messenger;
use crate::pipeline::{Collaborators, Pipeline, PipelineSettings};
use crate::model::{
    AiReply, AiRequest, ContactInfo, ImageAnalysis, Lead, PaymentMethod, PipelineStage, Product,
    Property,
};

#[derive(Debug, Clone, PartialEq)]
pub enum Sent {
    Typing(bool),
    Text(String),
    Media(String),
    Cards(Vec<CardElement>),
}

/// Records every outbound call in order
#[derive(Default)]
pub struct RecordingMessenger {
    sent: Mutex<Vec<Sent>>,
    fail_cards: AtomicBool,
    fail_text: AtomicBool,
}

impl RecordingMessenger {
    pub fn sent(&self) -> Vec<Sent> {
        self.sent.lock().unwrap().clone()
    }

    /// Sent texts only, in order
    pub fn texts(&self) -> Vec<String> {
        self.sent()
            .into_iter()
            .filter_map(|s| match s {
                Sent::Text(t) => Some(t),
                _ => None,
            })
            .collect()
    }

    pub fn fail_cards(&self, fail: bool) {
        self.fail_cards.store(fail, Ordering::SeqCst);
    }

    pub fn fail_text(&self, fail: bool) {
        self.fail_text.store(fail, Ordering::SeqCst);
    }

    fn api_error() -> GraphError {
        GraphError::Api {
            status: 500,
            message: "scripted failure".to_string(),
        }
    }
}

#[async_trait]
impl Messenger for RecordingMessenger {
    async fn send_text(&self, _page_id: &str, _recipient: &str, text: &str) -> Result<(), GraphError> {
        if self.fail_text.load(Ordering::SeqCst) {
            return Err(Self::api_error());
        }
        self.sent.lock().unwrap().push(Sent::Text(text.to_string()));
        Ok(())
    }

    async fn send_typing(&self, _page_id: &str, _recipient: &str, on: bool) -> Result<(), GraphError> {
        self.sent.lock().unwrap().push(Sent::Typing(on));
        Ok(())
    }

    async fn send_media(&self, _page_id: &str, _recipient: &str, url: &str) -> Result<(), GraphError> {
        self.sent.lock().unwrap().push(Sent::Media(url.to_string()));
        Ok(())
    }

    async fn send_cards(
        &self,
        _page_id: &str,
        _recipient: &str,
        elements: Vec<CardElement>,
    ) -> Result<(), GraphError> {
        if self.fail_cards.load(Ordering::SeqCst) {
            return Err(Self::api_error());
        }
        self.sent.lock().unwrap().push(Sent::Cards(elements));
        Ok(())
    }
}

#[derive(Default)]
pub struct MemoryTokens {
    tokens: Mutex<HashMap<String, String>>,
}

impl MemoryTokens {
    pub fn insert(&self, page_id: &str, token: &str) {
        self.tokens
            .lock()
            .unwrap()
            .insert(page_id.to_string(), token.to_string());
    }
}

#[async_trait]
impl PageTokens for MemoryTokens {
    async fn access_token(&self, page_id: &str) -> Result<Option<String>> {
        Ok(self.tokens.lock().unwrap().get(page_id).cloned())
    }
}

/// Same catalog for every page
#[derive(Default)]
pub struct MemoryCatalog {
    pub products: Vec<Product>,
    pub properties: Vec<Property>,
    pub payment_methods: Vec<PaymentMethod>,
    failing: AtomicBool,
}

impl MemoryCatalog {
    pub fn with_samples() -> Self {
        Self {
            products: sample_products(),
            properties: sample_properties(),
            payment_methods: sample_payment_methods(),
            failing: AtomicBool::new(false),
        }
    }

    pub fn fail(&self, fail: bool) {
        self.failing.store(fail, Ordering::SeqCst);
    }

    fn check(&self) -> Result<()> {
        if self.failing.load(Ordering::SeqCst) {
            Err(anyhow!("catalog unavailable"))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl Catalog for MemoryCatalog {
    async fn products(&self, _page_id: &str) -> Result<Vec<Product>> {
        self.check()?;
        Ok(self.products.clone())
    }

    async fn properties(&self, _page_id: &str) -> Result<Vec<Property>> {
        self.check()?;
        Ok(self.properties.clone())
    }

    async fn payment_methods(&self, _page_id: &str) -> Result<Vec<PaymentMethod>> {
        self.check()?;
        Ok(self.payment_methods.clone())
    }

    async fn property(&self, _page_id: &str, id: Uuid) -> Result<Option<Property>> {
        self.check()?;
        Ok(self.properties.iter().find(|p| p.id == id).cloned())
    }

    async fn payment_method(&self, _page_id: &str, id: Uuid) -> Result<Option<PaymentMethod>> {
        self.check()?;
        Ok(self.payment_methods.iter().find(|m| m.id == id).cloned())
    }
}

#[derive(Default)]
pub struct MemoryLeads {
    leads: Mutex<HashMap<String, Lead>>,
    activity: Mutex<HashMap<Uuid, Vec<DateTime<Utc>>>>,
    stage_changes: Mutex<Vec<(String, PipelineStage, String)>>,
    fail_contact_updates: AtomicBool,
}

impl MemoryLeads {
    pub fn lead(&self, sender_id: &str) -> Option<Lead> {
        self.leads.lock().unwrap().get(sender_id).cloned()
    }

    /// `(sender_id, stage, reason)` in the order they were applied
    pub fn stage_changes(&self) -> Vec<(String, PipelineStage, String)> {
        self.stage_changes.lock().unwrap().clone()
    }

    pub fn fail_contact_updates(&self, fail: bool) {
        self.fail_contact_updates.store(fail, Ordering::SeqCst);
    }

    fn update(&self, lead_id: Uuid, f: impl FnOnce(&mut Lead)) -> Result<()> {
        let mut leads = self.leads.lock().unwrap();
        let lead = leads
            .values_mut()
            .find(|l| l.id == lead_id)
            .ok_or_else(|| anyhow!("Lead {} not found", lead_id))?;
        f(lead);
        Ok(())
    }
}

#[async_trait]
impl LeadTracker for MemoryLeads {
    async fn get_or_create(&self, sender_id: &str, page_id: &str) -> Result<Lead> {
        let mut leads = self.leads.lock().unwrap();
        let lead = leads.entry(sender_id.to_string()).or_insert_with(|| Lead {
            id: Uuid::new_v4(),
            sender_id: sender_id.to_string(),
            page_id: page_id.to_string(),
            name: None,
            phone: None,
            email: None,
            message_count: 0,
            stage: PipelineStage::New,
            referral_source: None,
            best_contact_hour: None,
        });
        Ok(lead.clone())
    }

    async fn increment_message_count(&self, lead_id: Uuid) -> Result<i32> {
        let mut count = 0;
        self.update(lead_id, |l| {
            l.message_count += 1;
            count = l.message_count;
        })?;
        Ok(count)
    }

    async fn set_stage(&self, lead_id: Uuid, stage: PipelineStage, reason: &str) -> Result<()> {
        let mut sender = String::new();
        self.update(lead_id, |l| {
            l.stage = stage;
            sender = l.sender_id.clone();
        })?;
        self.stage_changes
            .lock()
            .unwrap()
            .push((sender, stage, reason.to_string()));
        Ok(())
    }

    async fn set_name(&self, lead_id: Uuid, name: &str) -> Result<()> {
        self.update(lead_id, |l| l.name = Some(name.to_string()))
    }

    async fn set_contact(&self, lead_id: Uuid, contact: &ContactInfo) -> Result<()> {
        if self.fail_contact_updates.load(Ordering::SeqCst) {
            return Err(anyhow!("contact update rejected"));
        }
        self.update(lead_id, |l| {
            if contact.phone.is_some() {
                l.phone = contact.phone.clone();
            }
            if contact.email.is_some() {
                l.email = contact.email.clone();
            }
        })
    }

    async fn set_referral(&self, lead_id: Uuid, source: &str) -> Result<()> {
        self.update(lead_id, |l| l.referral_source = Some(source.to_string()))
    }

    async fn record_activity(&self, lead_id: Uuid, at: DateTime<Utc>) -> Result<()> {
        self.activity
            .lock()
            .unwrap()
            .entry(lead_id)
            .or_default()
            .push(at);
        Ok(())
    }

    async fn activity_times(&self, lead_id: Uuid) -> Result<Vec<DateTime<Utc>>> {
        Ok(self
            .activity
            .lock()
            .unwrap()
            .get(&lead_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn set_best_contact_hour(&self, lead_id: Uuid, hour: Option<u32>) -> Result<()> {
        self.update(lead_id, |l| l.best_contact_hour = hour.map(|h| h as i32))
    }
}

#[derive(Default)]
pub struct MemoryTakeover {
    last: Mutex<HashMap<String, DateTime<Utc>>>,
}

impl MemoryTakeover {
    pub fn set(&self, sender_id: &str, at: DateTime<Utc>) {
        self.last.lock().unwrap().insert(sender_id.to_string(), at);
    }
}

#[async_trait]
impl TakeoverStore for MemoryTakeover {
    async fn last_human_activity(&self, sender_id: &str) -> Result<Option<DateTime<Utc>>> {
        Ok(self.last.lock().unwrap().get(sender_id).copied())
    }

    async fn record_human_activity(&self, sender_id: &str, at: DateTime<Utc>) -> Result<()> {
        self.set(sender_id, at);
        Ok(())
    }
}

/// Returns a fixed reply (or error) and records every request
pub struct ScriptedGenerator {
    reply: Option<AiReply>,
    calls: Mutex<Vec<AiRequest>>,
}

impl ScriptedGenerator {
    pub fn replying(reply: AiReply) -> Self {
        Self {
            reply: Some(reply),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn failing() -> Self {
        Self {
            reply: None,
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> Vec<AiRequest> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl ResponseGenerator for ScriptedGenerator {
    async fn generate(&self, request: &AiRequest) -> Result<AiReply> {
        self.calls.lock().unwrap().push(request.clone());
        self.reply
            .clone()
            .ok_or_else(|| anyhow!("generator unavailable"))
    }
}

pub struct FixedClassifier {
    analysis: Option<ImageAnalysis>,
}

impl FixedClassifier {
    pub fn new(analysis: ImageAnalysis) -> Self {
        Self {
            analysis: Some(analysis),
        }
    }

    pub fn failing() -> Self {
        Self { analysis: None }
    }
}

#[async_trait]
impl ImageClassifier for FixedClassifier {
    async fn classify(&self, _image_url: &str) -> Result<ImageAnalysis> {
        self.analysis
            .clone()
            .ok_or_else(|| anyhow!("vision model unavailable"))
    }
}

#[derive(Default)]
pub struct MemoryConversation {
    turns: Mutex<Vec<(String, String, String)>>,
}

impl MemoryConversation {
    /// `(sender_id, role, content)` in append order
    pub fn turns(&self) -> Vec<(String, String, String)> {
        self.turns.lock().unwrap().clone()
    }
}

#[async_trait]
impl ConversationLog for MemoryConversation {
    async fn append(&self, sender_id: &str, _page_id: &str, role: &str, content: &str) -> Result<()> {
        self.turns.lock().unwrap().push((
            sender_id.to_string(),
            role.to_string(),
            content.to_string(),
        ));
        Ok(())
    }

    async fn recent(&self, sender_id: &str, limit: i64) -> Result<Vec<(String, String)>> {
        let turns: Vec<(String, String)> = self
            .turns
            .lock()
            .unwrap()
            .iter()
            .filter(|(s, _, _)| s == sender_id)
            .map(|(_, role, content)| (role.clone(), content.clone()))
            .collect();
        let skip = turns.len().saturating_sub(limit.max(0) as usize);
        Ok(turns.into_iter().skip(skip).collect())
    }
}

/// Holds spawned jobs until the test runs them, one at a time in spawn order
#[derive(Default)]
pub struct TaskQueue {
    tasks: Mutex<VecDeque<(&'static str, BackgroundTask)>>,
    names: Mutex<Vec<&'static str>>,
}

impl TaskQueue {
    pub fn pending(&self) -> usize {
        self.tasks.lock().unwrap().len()
    }

    /// Names of every job ever spawned
    pub fn names(&self) -> Vec<&'static str> {
        self.names.lock().unwrap().clone()
    }

    /// Run until the queue is empty, including jobs spawned by jobs.
    /// Returns the number that failed.
    pub async fn run_all(&self) -> usize {
        let mut failures = 0;
        loop {
            let next = self.tasks.lock().unwrap().pop_front();
            let Some((_, task)) = next else {
                return failures;
            };
            if task.await.is_err() {
                failures += 1;
            }
        }
    }
}

impl BackgroundSpawner for TaskQueue {
    fn spawn(&self, name: &'static str, task: BackgroundTask) {
        self.names.lock().unwrap().push(name);
        self.tasks.lock().unwrap().push_back((name, task));
    }
}

/// A pipeline wired to in-memory collaborators. The generator always
/// answers "Sure!" and background jobs wait in `queue`.
pub struct TestPipeline {
    pub pipeline: Arc<Pipeline>,
    pub messenger: Arc<RecordingMessenger>,
    pub generator: Arc<ScriptedGenerator>,
    pub leads: Arc<MemoryLeads>,
    pub catalog: Arc<MemoryCatalog>,
    pub takeover: Arc<MemoryTakeover>,
    pub queue: Arc<TaskQueue>,
}

pub fn test_pipeline(settings: PipelineSettings, classifier: FixedClassifier) -> TestPipeline {
    let messenger = Arc::new(RecordingMessenger::default());
    let generator = Arc::new(ScriptedGenerator::replying(AiReply::text("Sure!")));
    let leads = Arc::new(MemoryLeads::default());
    let catalog = Arc::new(MemoryCatalog::with_samples());
    let takeover = Arc::new(MemoryTakeover::default());
    let queue = Arc::new(TaskQueue::default());

    let pipeline = Arc::new(Pipeline::new(
        settings,
        Collaborators {
            messenger: messenger.clone(),
            catalog: catalog.clone(),
            leads: leads.clone(),
            takeover: takeover.clone(),
            generator: generator.clone(),
            classifier: Arc::new(classifier),
            contacts: Arc::new(RegexContactExtractor::new().unwrap()),
            stages: Arc::new(KeywordStageAnalyzer::default()),
            estimator: Arc::new(HourlyContactTimeEstimator::new(chrono_tz::Asia::Manila)),
            spawner: queue.clone(),
        },
    ));

    TestPipeline {
        pipeline,
        messenger,
        generator,
        leads,
        catalog,
        takeover,
        queue,
    }
}

pub fn sample_products() -> Vec<Product> {
    vec![
        Product {
            id: Uuid::new_v4(),
            name: "Ube Cheese Pandesal".to_string(),
            description: Some("Box of 12".to_string()),
            category: Some("Bread".to_string()),
            price: Some(180.0),
            image_url: Some("https://cdn.example.com/pandesal.jpg".to_string()),
            product_url: None,
        },
        Product {
            id: Uuid::new_v4(),
            name: "Leche Flan".to_string(),
            description: None,
            category: Some("Dessert".to_string()),
            price: Some(250.0),
            image_url: None,
            product_url: Some("https://shop.example.com/flan".to_string()),
        },
    ]
}

pub fn sample_properties() -> Vec<Property> {
    vec![
        Property {
            id: Uuid::new_v4(),
            title: "Azure Residences 2BR".to_string(),
            property_type: Some("Condo".to_string()),
            location: Some("Parañaque".to_string()),
            price: Some(6_500_000.0),
            bedrooms: Some(2),
            image_url: Some("https://cdn.example.com/azure.jpg".to_string()),
            listing_url: None,
        },
        Property {
            id: Uuid::new_v4(),
            title: "Lot in Tagaytay".to_string(),
            property_type: Some("Lot".to_string()),
            location: Some("Tagaytay".to_string()),
            price: None,
            bedrooms: None,
            image_url: None,
            listing_url: Some("https://homes.example.com/tagaytay".to_string()),
        },
        Property {
            id: Uuid::new_v4(),
            title: "Townhouse in Cainta".to_string(),
            property_type: Some("Townhouse".to_string()),
            location: Some("Cainta, Rizal".to_string()),
            price: Some(4_200_000.0),
            bedrooms: Some(3),
            image_url: None,
            listing_url: None,
        },
    ]
}

/// GCash (with QR) and BDO (without)
pub fn sample_payment_methods() -> Vec<PaymentMethod> {
    vec![
        PaymentMethod {
            id: Uuid::new_v4(),
            name: "GCash".to_string(),
            account_name: Some("Juan Dela Cruz".to_string()),
            account_number: Some("0917 123 4567".to_string()),
            qr_code_url: Some("https://cdn.example.com/gcash-qr.png".to_string()),
            instructions: Some("Send the exact amount".to_string()),
        },
        PaymentMethod {
            id: Uuid::new_v4(),
            name: "BDO".to_string(),
            account_name: Some("Juan Dela Cruz".to_string()),
            account_number: Some("0012-3456-7890".to_string()),
            qr_code_url: None,
            instructions: None,
        },
    ]
}
