//! Lead heuristics: stage re-analysis and best contact time

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Timelike, Utc};
use chrono_tz::Tz;

use crate::collaborators::{ContactTimeEstimator, StageAnalyzer};
use crate::model::{Lead, PipelineStage};

const NEGOTIATING_SIGNALS: &[&str] = &[
    "reserve",
    "reservation",
    "downpayment",
    "down payment",
    "discount",
    "final price",
    "last price",
    "how to pay",
    "paano magbayad",
    "i'll take it",
    "kukunin ko",
];

const QUALIFIED_SIGNALS: &[&str] = &[
    "interested",
    "how much",
    "magkano",
    "viewing",
    "schedule",
    "available pa",
    "still available",
    "specs",
    "details",
];

/// Re-analyses a lead's stage every few messages from keyword signals.
/// Stages only move forward and terminal stages are never touched.
#[derive(Debug, Clone)]
pub struct KeywordStageAnalyzer {
    every_n_messages: i32,
}

impl KeywordStageAnalyzer {
    pub fn new(every_n_messages: i32) -> Self {
        Self {
            every_n_messages: every_n_messages.max(1),
        }
    }
}

impl Default for KeywordStageAnalyzer {
    fn default() -> Self {
        Self::new(3)
    }
}

#[async_trait]
impl StageAnalyzer for KeywordStageAnalyzer {
    fn should_analyze(&self, lead: &Lead) -> bool {
        let open = matches!(
            lead.stage,
            PipelineStage::New
                | PipelineStage::Engaged
                | PipelineStage::Qualified
                | PipelineStage::Negotiating
        );
        open && (lead.message_count <= 1 || lead.message_count % self.every_n_messages == 0)
    }

    async fn analyze(&self, lead: &Lead, text: &str) -> Result<Option<PipelineStage>> {
        let lowered = text.to_lowercase();
        let signal = if NEGOTIATING_SIGNALS.iter().any(|s| lowered.contains(s)) {
            PipelineStage::Negotiating
        } else if QUALIFIED_SIGNALS.iter().any(|s| lowered.contains(s)) {
            PipelineStage::Qualified
        } else {
            PipelineStage::Engaged
        };

        Ok((signal.rank() > lead.stage.rank()).then_some(signal))
    }
}

/// Picks the hour of day (in the business timezone) the user messages most
pub struct HourlyContactTimeEstimator {
    timezone: Tz,
    min_samples: usize,
}

impl HourlyContactTimeEstimator {
    pub fn new(timezone: Tz) -> Self {
        Self {
            timezone,
            min_samples: 3,
        }
    }
}

impl ContactTimeEstimator for HourlyContactTimeEstimator {
    fn estimate(&self, activity: &[DateTime<Utc>]) -> Option<u32> {
        if activity.len() < self.min_samples {
            return None;
        }

        let mut counts = [0usize; 24];
        for at in activity {
            counts[at.with_timezone(&self.timezone).hour() as usize] += 1;
        }

        // Earliest hour wins ties
        let (hour, _) = counts
            .iter()
            .enumerate()
            .fold((0usize, 0usize), |best, (hour, &count)| {
                if count > best.1 {
                    (hour, count)
                } else {
                    best
                }
            });
        Some(hour as u32)
    }
}
