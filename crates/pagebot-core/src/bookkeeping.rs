//! Post-reply lead bookkeeping
//!
//! Each job runs as its own background task and fetches the lead itself, so
//! one failing job never affects the others or the reply already sent.

use anyhow::Result;
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use crate::background::BackgroundSpawner;
use crate::collaborators::{ContactExtractor, ContactTimeEstimator, LeadTracker, StageAnalyzer};

/// Name extraction stops once a lead has this many messages
pub const NAME_EXTRACTION_MAX_MESSAGES: i32 = 10;
/// Give conversation persistence time to land before reading activity
pub const DEFAULT_CONTACT_TIME_DELAY: Duration = Duration::from_secs(2);

#[derive(Clone)]
pub struct Bookkeeper {
    leads: Arc<dyn LeadTracker>,
    contacts: Arc<dyn ContactExtractor>,
    stages: Arc<dyn StageAnalyzer>,
    estimator: Arc<dyn ContactTimeEstimator>,
    spawner: Arc<dyn BackgroundSpawner>,
    contact_time_delay: Duration,
}

impl Bookkeeper {
    pub fn new(
        leads: Arc<dyn LeadTracker>,
        contacts: Arc<dyn ContactExtractor>,
        stages: Arc<dyn StageAnalyzer>,
        estimator: Arc<dyn ContactTimeEstimator>,
        spawner: Arc<dyn BackgroundSpawner>,
        contact_time_delay: Duration,
    ) -> Self {
        Self {
            leads,
            contacts,
            stages,
            estimator,
            spawner,
            contact_time_delay,
        }
    }

    /// Queue every bookkeeping job for a completed turn
    pub fn schedule(&self, sender_id: &str, page_id: &str, text: &str) {
        let sender_id = sender_id.to_string();
        let page_id = page_id.to_string();
        let text = text.to_string();

        let this = self.clone();
        let (s, p) = (sender_id.clone(), page_id.clone());
        self.spawner
            .spawn("lead_activity", Box::pin(async move { this.track_activity(&s, &p).await }));

        let this = self.clone();
        let (s, p, t) = (sender_id.clone(), page_id.clone(), text.clone());
        self.spawner
            .spawn("name_extraction", Box::pin(async move { this.extract_name(&s, &p, &t).await }));

        let this = self.clone();
        let (s, p, t) = (sender_id.clone(), page_id.clone(), text.clone());
        self.spawner.spawn(
            "contact_extraction",
            Box::pin(async move { this.extract_contact(&s, &p, &t).await }),
        );

        let this = self.clone();
        let (s, p, t) = (sender_id.clone(), page_id.clone(), text);
        self.spawner
            .spawn("stage_analysis", Box::pin(async move { this.analyze_stage(&s, &p, &t).await }));

        let this = self.clone();
        self.spawner.spawn(
            "best_contact_time",
            Box::pin(async move {
                tokio::time::sleep(this.contact_time_delay).await;
                this.update_contact_time(&sender_id, &page_id).await
            }),
        );
    }

    /// Record where a conversation came from
    pub fn schedule_referral(&self, sender_id: &str, page_id: &str, source: String) {
        let this = self.clone();
        let (s, p) = (sender_id.to_string(), page_id.to_string());
        self.spawner.spawn(
            "referral",
            Box::pin(async move {
                let lead = this.leads.get_or_create(&s, &p).await?;
                info!("🔗 Lead {} arrived via {}", lead.id, source);
                this.leads.set_referral(lead.id, &source).await
            }),
        );
    }

    async fn track_activity(&self, sender_id: &str, page_id: &str) -> Result<()> {
        let lead = self.leads.get_or_create(sender_id, page_id).await?;
        let count = self.leads.increment_message_count(lead.id).await?;
        self.leads.record_activity(lead.id, Utc::now()).await?;
        debug!("Lead {} message count now {}", lead.id, count);
        Ok(())
    }

    async fn extract_name(&self, sender_id: &str, page_id: &str, text: &str) -> Result<()> {
        let lead = self.leads.get_or_create(sender_id, page_id).await?;
        if lead.name.is_some() || lead.message_count > NAME_EXTRACTION_MAX_MESSAGES {
            return Ok(());
        }

        if let Some(name) = self.contacts.extract_name(text).await? {
            info!("📇 Learned name for lead {}: {}", lead.id, name);
            self.leads.set_name(lead.id, &name).await?;
        }
        Ok(())
    }

    async fn extract_contact(&self, sender_id: &str, page_id: &str, text: &str) -> Result<()> {
        let contact = self.contacts.extract_contact(text).await?;
        if contact.is_empty() {
            return Ok(());
        }

        let lead = self.leads.get_or_create(sender_id, page_id).await?;
        info!("📇 Captured contact details for lead {}", lead.id);
        self.leads.set_contact(lead.id, &contact).await
    }

    async fn analyze_stage(&self, sender_id: &str, page_id: &str, text: &str) -> Result<()> {
        let lead = self.leads.get_or_create(sender_id, page_id).await?;
        if !self.stages.should_analyze(&lead) {
            return Ok(());
        }

        match self.stages.analyze(&lead, text).await? {
            Some(stage) if stage != lead.stage => {
                info!(
                    "📈 Lead {} stage {} -> {}",
                    lead.id,
                    lead.stage.as_str(),
                    stage.as_str()
                );
                self.leads
                    .set_stage(lead.id, stage, "conversation analysis")
                    .await
            }
            _ => Ok(()),
        }
    }

    async fn update_contact_time(&self, sender_id: &str, page_id: &str) -> Result<()> {
        let lead = self.leads.get_or_create(sender_id, page_id).await?;
        let activity = self.leads.activity_times(lead.id).await?;
        let hour = self.estimator.estimate(&activity);
        if hour.map(|h| h as i32) != lead.best_contact_hour {
            self.leads.set_best_contact_hour(lead.id, hour).await?;
        }
        Ok(())
    }
}
