use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use futures::future::join_all;
use tokio::sync::Notify;
use tokio::time::{sleep, timeout};
use tracing::{debug, warn};

use crate::collaborators::audit::{AuditEntry, AuditLog};
use crate::collaborators::notifier::{Notification, Notifier};
use crate::config::EngineSettings;
use crate::observability::metrics::Metrics;

/// A side effect requested by an engine operation. Effects are produced
/// alongside the new state and dispatched only after that state is committed.
#[derive(Debug, Clone)]
pub enum Effect {
    Notify(Notification),
    Audit(AuditEntry),
}

/// Tracks dispatches that are still running so shutdown can let them finish.
#[derive(Default)]
struct InFlight {
    count: AtomicUsize,
    idle: Notify,
}

#[derive(Clone)]
pub struct EffectDispatcher {
    notifier: Arc<dyn Notifier>,
    audit: Arc<dyn AuditLog>,
    metrics: Metrics,
    timeout: Duration,
    max_attempts: u32,
    retry_backoff: Duration,
    in_flight: Arc<InFlight>,
}

impl EffectDispatcher {
    pub fn new(
        notifier: Arc<dyn Notifier>,
        audit: Arc<dyn AuditLog>,
        metrics: Metrics,
        settings: &EngineSettings,
    ) -> Self {
        Self {
            notifier,
            audit,
            metrics,
            timeout: settings.notifier_timeout,
            max_attempts: settings.notifier_max_attempts.max(1),
            retry_backoff: Duration::from_millis(100),
            in_flight: Arc::new(InFlight::default()),
        }
    }

    pub fn with_retry_backoff(mut self, retry_backoff: Duration) -> Self {
        self.retry_backoff = retry_backoff;
        self
    }

    /// Hands the effects to a background task and returns immediately. The
    /// state they describe is already committed, so collaborator errors and
    /// timeouts are logged and counted only.
    pub fn dispatch(&self, effects: Vec<Effect>) {
        if effects.is_empty() {
            return;
        }

        self.in_flight.count.fetch_add(1, Ordering::SeqCst);
        let this = self.clone();
        tokio::spawn(async move {
            this.deliver_all(effects).await;
            if this.in_flight.count.fetch_sub(1, Ordering::SeqCst) == 1 {
                this.in_flight.idle.notify_waiters();
            }
        });
    }

    /// Resolves once no dispatch is running.
    pub async fn wait_idle(&self) {
        loop {
            let idle = self.in_flight.idle.notified();
            tokio::pin!(idle);
            idle.as_mut().enable();
            if self.in_flight.count.load(Ordering::SeqCst) == 0 {
                return;
            }
            idle.await;
        }
    }

    pub fn pending(&self) -> usize {
        self.in_flight.count.load(Ordering::SeqCst)
    }

    async fn deliver_all(&self, effects: Vec<Effect>) {
        let mut notifications = Vec::new();
        for effect in effects {
            match effect {
                Effect::Notify(notification) => notifications.push(notification),
                Effect::Audit(entry) => self.record(entry).await,
            }
        }

        join_all(notifications.into_iter().map(|n| self.deliver(n))).await;
    }

    async fn record(&self, entry: AuditEntry) {
        let action = entry.action;
        match timeout(self.timeout, self.audit.record(entry)).await {
            Ok(Ok(())) => {}
            Ok(Err(err)) => warn!(action, error = %err, "audit record failed"),
            Err(_) => warn!(action, "audit record timed out"),
        }
    }

    async fn deliver(&self, notification: Notification) {
        for attempt in 1..=self.max_attempts {
            let outcome = match timeout(self.timeout, self.notifier.notify(notification.clone())).await {
                Ok(Ok(())) => {
                    self.metrics.notifications_total.with_label_values(&["sent"]).inc();
                    return;
                }
                Ok(Err(err)) => {
                    warn!(
                        user_id = %notification.user_id,
                        package_id = %notification.package_id,
                        attempt,
                        error = %err,
                        "notification failed"
                    );
                    "failed"
                }
                Err(_) => {
                    warn!(
                        user_id = %notification.user_id,
                        package_id = %notification.package_id,
                        attempt,
                        "notification timed out"
                    );
                    "timeout"
                }
            };

            if attempt == self.max_attempts {
                self.metrics.notifications_total.with_label_values(&[outcome]).inc();
                debug!(kind = ?notification.kind, "notification dropped after retries");
                return;
            }
            sleep(self.retry_backoff * attempt).await;
        }
    }
}
