//! Per-sender message batching
//!
//! Users tend to type several short messages in a row. Texts from the same
//! sender are collected until the sender has been quiet for the batch
//! window, then dispatched as one turn joined with blank lines.
//!
//! Timers live in this process, so batching only holds for a single
//! long-running instance. With batching disabled every message is its own
//! turn, still run one at a time per sender in arrival order.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, error, info};

pub const DEFAULT_BATCH_WINDOW: Duration = Duration::from_millis(500);
pub const BATCH_SEPARATOR: &str = "\n\n";

/// Receives one combined turn per sender
#[async_trait]
pub trait TurnHandler: Send + Sync {
    async fn handle_turn(&self, sender_id: &str, page_id: &str, text: &str);
}

struct PendingBatch {
    texts: Vec<String>,
    page_id: String,
    /// Bumped on every append; a timer only fires the batch it was started for
    generation: u64,
}

struct Inner {
    window: Duration,
    enabled: bool,
    handler: Arc<dyn TurnHandler>,
    pending: Mutex<HashMap<String, PendingBatch>>,
    /// Immediate mode: (page, text) in arrival order; an entry means a drain task is running
    queues: Mutex<HashMap<String, VecDeque<(String, String)>>>,
    /// One in-flight turn per sender
    turns: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
    generations: AtomicU64,
}

#[derive(Clone)]
pub struct MessageBatcher {
    inner: Arc<Inner>,
}

impl MessageBatcher {
    pub fn new(handler: Arc<dyn TurnHandler>, window: Duration, enabled: bool) -> Self {
        Self {
            inner: Arc::new(Inner {
                window,
                enabled,
                handler,
                pending: Mutex::new(HashMap::new()),
                queues: Mutex::new(HashMap::new()),
                turns: Mutex::new(HashMap::new()),
                generations: AtomicU64::new(0),
            }),
        }
    }

    /// Add a text to the sender's pending batch and (re)start its timer
    pub fn enqueue(&self, sender_id: &str, text: &str, page_id: &str) -> Result<()> {
        let sender = sender_id.to_string();

        if !self.inner.enabled {
            let start_drain = {
                let mut queues = self
                    .inner
                    .queues
                    .lock()
                    .map_err(|e| anyhow!("Lock error: {}", e))?;
                let item = (page_id.to_string(), text.to_string());
                match queues.get_mut(&sender) {
                    Some(queue) => {
                        queue.push_back(item);
                        false
                    }
                    None => {
                        queues.insert(sender.clone(), VecDeque::from([item]));
                        true
                    }
                }
            };
            if start_drain {
                let inner = self.inner.clone();
                tokio::spawn(async move {
                    if let Err(e) = inner.drain(&sender).await {
                        error!("Turns for {} failed: {:#}", sender, e);
                    }
                });
            }
            return Ok(());
        }

        let generation = self.inner.generations.fetch_add(1, Ordering::Relaxed) + 1;
        {
            let mut pending = self
                .inner
                .pending
                .lock()
                .map_err(|e| anyhow!("Lock error: {}", e))?;
            let batch = pending.entry(sender.clone()).or_insert_with(|| PendingBatch {
                texts: Vec::new(),
                page_id: page_id.to_string(),
                generation,
            });
            batch.texts.push(text.to_string());
            batch.generation = generation;
            debug!(
                "Batch for {} now has {} message(s)",
                sender,
                batch.texts.len()
            );
        }

        let inner = self.inner.clone();
        tokio::spawn(async move {
            tokio::time::sleep(inner.window).await;
            if let Err(e) = inner.fire(&sender, generation).await {
                error!("Batch for {} failed: {:#}", sender, e);
            }
        });
        Ok(())
    }

    /// Senders with a batch still waiting for its timer
    pub fn pending_senders(&self) -> usize {
        self.inner.pending.lock().map(|p| p.len()).unwrap_or(0)
    }
}

impl Inner {
    async fn fire(&self, sender_id: &str, generation: u64) -> Result<()> {
        let batch = {
            let mut pending = self
                .pending
                .lock()
                .map_err(|e| anyhow!("Lock error: {}", e))?;
            match pending.get(sender_id) {
                Some(batch) if batch.generation == generation => pending.remove(sender_id),
                // Superseded by a newer message
                _ => None,
            }
        };
        let Some(batch) = batch else {
            return Ok(());
        };

        info!(
            "📦 Dispatching {} batched message(s) from {}",
            batch.texts.len(),
            sender_id
        );
        let text = batch.texts.join(BATCH_SEPARATOR);
        self.run_turn(sender_id, &batch.page_id, &text).await
    }

    /// Run the sender's queued messages one turn at a time, oldest first
    async fn drain(&self, sender_id: &str) -> Result<()> {
        loop {
            let next = {
                let mut queues = self.queues.lock().map_err(|e| anyhow!("Lock error: {}", e))?;
                match queues.get_mut(sender_id).and_then(|queue| queue.pop_front()) {
                    Some(item) => item,
                    None => {
                        queues.remove(sender_id);
                        return Ok(());
                    }
                }
            };

            let (page, text) = next;
            if let Err(e) = self.run_turn(sender_id, &page, &text).await {
                error!("Turn for {} failed: {:#}", sender_id, e);
            }
        }
    }

    async fn run_turn(&self, sender_id: &str, page_id: &str, text: &str) -> Result<()> {
        let lock = {
            let mut turns = self.turns.lock().map_err(|e| anyhow!("Lock error: {}", e))?;
            turns
                .entry(sender_id.to_string())
                .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
                .clone()
        };

        {
            let _turn = lock.lock().await;
            self.handler.handle_turn(sender_id, page_id, text).await;
        }

        let mut turns = self.turns.lock().map_err(|e| anyhow!("Lock error: {}", e))?;
        // Only the map and this task hold it: nobody is waiting
        if Arc::strong_count(&lock) <= 2 {
            turns.remove(sender_id);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use tokio::time::sleep;

    #[derive(Default)]
    struct RecordingTurns {
        turns: Mutex<Vec<(String, String, String)>>,
        work: Duration,
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
    }

    impl RecordingTurns {
        fn slow(work: Duration) -> Self {
            Self {
                work,
                ..Default::default()
            }
        }

        fn turns(&self) -> Vec<(String, String, String)> {
            self.turns.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl TurnHandler for RecordingTurns {
        async fn handle_turn(&self, sender_id: &str, page_id: &str, text: &str) {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);
            sleep(self.work).await;
            self.turns.lock().unwrap().push((
                sender_id.to_string(),
                page_id.to_string(),
                text.to_string(),
            ));
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_debounce_joins_texts() {
        let handler = Arc::new(RecordingTurns::default());
        let batcher = MessageBatcher::new(handler.clone(), DEFAULT_BATCH_WINDOW, true);

        batcher.enqueue("user-1", "hi", "page-1").unwrap();
        sleep(Duration::from_millis(100)).await;
        batcher.enqueue("user-1", "magkano po", "page-1").unwrap();
        sleep(Duration::from_millis(400)).await;
        batcher.enqueue("user-1", "yung 2BR", "page-1").unwrap();

        // Window restarted by the last message
        sleep(Duration::from_millis(450)).await;
        assert!(handler.turns().is_empty());
        assert_eq!(batcher.pending_senders(), 1);

        sleep(Duration::from_millis(100)).await;
        assert_eq!(
            handler.turns(),
            vec![(
                "user-1".to_string(),
                "page-1".to_string(),
                "hi\n\nmagkano po\n\nyung 2BR".to_string()
            )]
        );
        assert_eq!(batcher.pending_senders(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_messages_inside_window_keep_delaying_dispatch() {
        let handler = Arc::new(RecordingTurns::default());
        let batcher = MessageBatcher::new(handler.clone(), DEFAULT_BATCH_WINDOW, true);

        for i in 0..8 {
            batcher.enqueue("user-1", &format!("m{}", i), "page-1").unwrap();
            sleep(Duration::from_millis(450)).await;
            assert!(handler.turns().is_empty());
        }

        sleep(Duration::from_millis(100)).await;
        let turns = handler.turns();
        assert_eq!(turns.len(), 1);
        assert_eq!(turns[0].2.split(BATCH_SEPARATOR).count(), 8);
    }

    #[tokio::test(start_paused = true)]
    async fn test_window_boundary() {
        let handler = Arc::new(RecordingTurns::default());
        let batcher = MessageBatcher::new(handler.clone(), DEFAULT_BATCH_WINDOW, true);
        let just_under = DEFAULT_BATCH_WINDOW - Duration::from_millis(1);

        batcher.enqueue("user-1", "a", "page-1").unwrap();
        sleep(just_under).await;
        batcher.enqueue("user-1", "b", "page-1").unwrap();

        // The first timer has expired by now but was superseded
        sleep(just_under).await;
        assert!(handler.turns().is_empty());

        sleep(Duration::from_millis(2)).await;
        let texts: Vec<String> = handler.turns().into_iter().map(|t| t.2).collect();
        assert_eq!(texts, vec!["a\n\nb"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_senders_are_independent() {
        let handler = Arc::new(RecordingTurns::default());
        let batcher = MessageBatcher::new(handler.clone(), DEFAULT_BATCH_WINDOW, true);

        batcher.enqueue("user-1", "a", "page-1").unwrap();
        batcher.enqueue("user-2", "b", "page-1").unwrap();
        sleep(Duration::from_millis(600)).await;

        let mut texts: Vec<String> = handler.turns().into_iter().map(|t| t.2).collect();
        texts.sort();
        assert_eq!(texts, vec!["a", "b"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_message_during_processing_waits_for_turn() {
        let handler = Arc::new(RecordingTurns::slow(Duration::from_secs(1)));
        let batcher = MessageBatcher::new(handler.clone(), DEFAULT_BATCH_WINDOW, true);

        batcher.enqueue("user-1", "first", "page-1").unwrap();
        sleep(Duration::from_millis(600)).await;
        // First turn is in flight
        batcher.enqueue("user-1", "second", "page-1").unwrap();

        sleep(Duration::from_secs(3)).await;
        let texts: Vec<String> = handler.turns().into_iter().map(|t| t.2).collect();
        assert_eq!(texts, vec!["first", "second"]);
        assert_eq!(handler.max_in_flight.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_disabled_dispatches_each_message() {
        let handler = Arc::new(RecordingTurns::default());
        let batcher = MessageBatcher::new(handler.clone(), DEFAULT_BATCH_WINDOW, false);

        batcher.enqueue("user-1", "one", "page-1").unwrap();
        batcher.enqueue("user-1", "two", "page-1").unwrap();
        sleep(Duration::from_millis(10)).await;

        let texts: Vec<String> = handler.turns().into_iter().map(|t| t.2).collect();
        assert_eq!(texts, vec!["one", "two"]);
        assert_eq!(batcher.pending_senders(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_disabled_keeps_arrival_order() {
        let handler = Arc::new(RecordingTurns::slow(Duration::from_millis(1)));
        let batcher = MessageBatcher::new(handler.clone(), DEFAULT_BATCH_WINDOW, false);

        let expected: Vec<String> = (0..40).map(|i| format!("m{}", i)).collect();
        for text in &expected {
            batcher.enqueue("user-1", text, "page-1").unwrap();
        }

        tokio::time::timeout(Duration::from_secs(10), async {
            while handler.turns().len() < expected.len() {
                sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();

        let texts: Vec<String> = handler.turns().into_iter().map(|t| t.2).collect();
        assert_eq!(texts, expected);
        assert_eq!(handler.max_in_flight.load(Ordering::SeqCst), 1);
    }
}
