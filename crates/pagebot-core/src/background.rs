//! Fire-and-forget work that must not hold up the webhook response or the
//! user-visible reply.

use anyhow::Result;
use futures_util::future::BoxFuture;
use tracing::{debug, warn};

pub type BackgroundTask = BoxFuture<'static, Result<()>>;

/// Runs tasks detached from the caller. Failures are logged by the spawner,
/// never returned.
pub trait BackgroundSpawner: Send + Sync {
    fn spawn(&self, name: &'static str, task: BackgroundTask);
}

/// Production spawner: one tokio task per job
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioSpawner;

impl BackgroundSpawner for TokioSpawner {
    fn spawn(&self, name: &'static str, task: BackgroundTask) {
        tokio::spawn(async move {
            match task.await {
                Ok(()) => debug!("Background task '{}' finished", name),
                Err(e) => warn!("Background task '{}' failed: {:#}", name, e),
            }
        });
    }
}
