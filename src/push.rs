//! Per-user periodic delivery of the top spreads for their exchange selection.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::task::JoinHandle;
use tokio::time::interval;
use tracing::{debug, info, warn};

use crate::detector::DifferenceEngine;
use crate::error::Result;
use crate::prefs::UserPreferenceStore;
use crate::types::PriceComparison;

/// Delivery channel for push messages.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, user_id: i64, text: &str) -> Result<()>;
}

/// Writes every push to the log.
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, user_id: i64, text: &str) -> Result<()> {
        info!(user_id, "Push\n{text}");
        Ok(())
    }
}

/// Render comparisons the way they are pushed: a header naming the requested
/// limit, then one numbered line each.
pub fn format_top(items: &[PriceComparison], limit: i64) -> String {
    let mut lines = Vec::with_capacity(items.len() + 1);
    lines.push(format!("Top-{limit} spreads (%):"));
    for (i, c) in items.iter().enumerate() {
        lines.push(format!(
            "{}. {} | {}: ${:.6} | {}: ${:.6} | Δ%: {:.2}",
            i + 1,
            c.symbol,
            c.exchange_a,
            c.price_a,
            c.exchange_b,
            c.price_b,
            c.pct_diff,
        ));
    }
    lines.join("\n")
}

#[derive(Clone)]
struct PushJob {
    prefs: UserPreferenceStore,
    engine: DifferenceEngine,
    notifier: Arc<dyn Notifier>,
    top_n: i64,
}

impl PushJob {
    /// Returns whether a message was sent.
    async fn push(&self, user_id: i64) -> Result<bool> {
        let selection = self.prefs.get_selection(user_id).await?;
        if selection.len() < 2 {
            debug!(user_id, "Skipping push, fewer than two exchanges selected");
            return Ok(false);
        }
        let items = self
            .engine
            .top_differences_filtered(&selection, self.top_n)
            .await?;
        if items.is_empty() {
            debug!(user_id, "Skipping push, no comparisons for selection");
            return Ok(false);
        }
        self.notifier
            .notify(user_id, &format_top(&items, self.top_n))
            .await?;
        Ok(true)
    }
}

// ---------------------------------------------------------------------------
// PushScheduler
// ---------------------------------------------------------------------------

/// One independent timer per user. Timers only read.
pub struct PushScheduler {
    job: PushJob,
    timers: DashMap<i64, JoinHandle<()>>,
}

impl PushScheduler {
    pub fn new(
        prefs: UserPreferenceStore,
        engine: DifferenceEngine,
        notifier: Arc<dyn Notifier>,
        top_n: i64,
    ) -> Self {
        Self {
            job: PushJob { prefs, engine, notifier, top_n },
            timers: DashMap::new(),
        }
    }

    /// (Re)start the user's timer at their stored interval. The first push
    /// happens one full interval after scheduling.
    pub async fn schedule(&self, user_id: i64) -> Result<()> {
        let minutes = self.job.prefs.get_interval(user_id).await?;
        let period = Duration::from_secs(u64::from(minutes) * 60);
        let job = self.job.clone();

        let handle = tokio::spawn(async move {
            let mut ticker = interval(period);
            ticker.tick().await; // first tick is immediate

            loop {
                ticker.tick().await;
                if let Err(e) = job.push(user_id).await {
                    warn!(user_id, "Push failed: {e}");
                }
            }
        });

        if let Some(previous) = self.timers.insert(user_id, handle) {
            previous.abort();
        }
        debug!(user_id, minutes, "Push timer scheduled");
        Ok(())
    }

    pub fn cancel(&self, user_id: i64) -> bool {
        match self.timers.remove(&user_id) {
            Some((_, handle)) => {
                handle.abort();
                true
            }
            None => false,
        }
    }

    /// Schedule every user with stored preferences. Returns how many were scheduled.
    pub async fn restore(&self) -> Result<usize> {
        let users = self.job.prefs.users().await?;
        for user_id in &users {
            self.schedule(*user_id).await?;
        }
        info!(users = users.len(), "Restored push timers for {} users", users.len());
        Ok(users.len())
    }

    /// Push once right now, outside the timer.
    pub async fn push_now(&self, user_id: i64) -> Result<bool> {
        self.job.push(user_id).await
    }

    #[cfg(test)]
    pub fn is_scheduled(&self, user_id: i64) -> bool {
        self.timers.contains_key(&user_id)
    }

    pub fn shutdown(&self) {
        for entry in self.timers.iter() {
            entry.value().abort();
        }
        self.timers.clear();
    }
}
