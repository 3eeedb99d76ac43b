use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use serde_json::json;
use tracing::{debug, error, info};
use uuid::Uuid;

use crate::collaborators::audit::AuditEntry;
use crate::collaborators::notifier::{Notification, NotificationKind};
use crate::config::EngineSettings;
use crate::engine::effects::{Effect, EffectDispatcher};
use crate::error::AppError;
use crate::models::bid::BidStatus;
use crate::models::package::{Package, PackageStatus};
use crate::observability::metrics::Metrics;
use crate::store::{PackageLedger, Store, Write};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DeadlineAction {
    Warn,
    Extend,
    Expire,
}

impl DeadlineAction {
    pub fn as_str(self) -> &'static str {
        match self {
            DeadlineAction::Warn => "warned",
            DeadlineAction::Extend => "extended",
            DeadlineAction::Expire => "expired",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct DeadlineDecision {
    pub package_id: Uuid,
    pub action: DeadlineAction,
    pub bid_deadline: Option<DateTime<Utc>>,
    pub new_deadline: Option<DateTime<Utc>>,
    pub deadline_extensions: u32,
    pub expired_bids: usize,
    pub applied: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct ScanReport {
    pub dry_run: bool,
    pub scanned: usize,
    pub decisions: Vec<DeadlineDecision>,
    /// Packages that changed between the scan and the write.
    pub skipped: usize,
    pub failed: usize,
}

/// What the scheduler should do with `package` at `now`, if anything.
pub fn decide(package: &Package, now: DateTime<Utc>, settings: &EngineSettings) -> Option<DeadlineAction> {
    if !package.is_active || package.status != PackageStatus::OpenForBids {
        return None;
    }
    let deadline = package.bid_deadline?;

    if now >= deadline {
        if package.deadline_extensions < settings.max_deadline_extensions {
            Some(DeadlineAction::Extend)
        } else {
            Some(DeadlineAction::Expire)
        }
    } else if deadline - now <= Duration::hours(settings.deadline_warning_hours)
        && !package.deadline_warning_sent
    {
        Some(DeadlineAction::Warn)
    } else {
        None
    }
}

fn plan(
    ledger: &PackageLedger,
    action: DeadlineAction,
    now: DateTime<Utc>,
    settings: &EngineSettings,
) -> (PackageLedger, DeadlineDecision, Vec<Effect>) {
    let mut next = ledger.clone();
    let package_id = ledger.package.id;
    let sender_id = ledger.package.sender_id;
    let tracking_code = ledger.package.tracking_code.clone();
    let mut effects = Vec::new();
    let mut expired_bids = 0;

    match action {
        DeadlineAction::Warn => {
            next.package.deadline_warning_sent = true;
            let hours_left = ledger
                .package
                .bid_deadline
                .map(|deadline| (deadline - now).num_hours())
                .unwrap_or_default();
            effects.push(Effect::Notify(Notification::new(
                sender_id,
                NotificationKind::DeadlineWarning,
                package_id,
                format!(
                    "Bidding on package {tracking_code} closes in about {hours_left} hours; select a bid soon"
                ),
            )));
        }
        DeadlineAction::Extend => {
            next.package.bid_deadline = Some(now + Duration::hours(settings.deadline_extension_hours));
            next.package.deadline_extensions += 1;
            next.package.deadline_warning_sent = false;
            effects.push(Effect::Notify(Notification::new(
                sender_id,
                NotificationKind::DeadlineExtended,
                package_id,
                format!(
                    "Bidding on package {tracking_code} was extended ({} of {})",
                    next.package.deadline_extensions, settings.max_deadline_extensions
                ),
            )));
        }
        DeadlineAction::Expire => {
            let expired = next.close_pending_bids(BidStatus::Expired, now);
            expired_bids = expired.len();
            next.package.reset_auction();
            effects.push(Effect::Notify(Notification::new(
                sender_id,
                NotificationKind::DeadlineExpired,
                package_id,
                format!(
                    "Bidding on package {tracking_code} expired; {expired_bids} bids were closed and the package is open again"
                ),
            )));
            for bid in expired {
                effects.push(Effect::Notify(Notification::new(
                    bid.courier_id,
                    NotificationKind::BidExpired,
                    package_id,
                    format!("Your bid on package {tracking_code} expired"),
                )));
            }
        }
    }
    next.package.updated_at = now;

    effects.push(Effect::Audit(AuditEntry::new(
        match action {
            DeadlineAction::Warn => "package.deadline_warned",
            DeadlineAction::Extend => "package.deadline_extended",
            DeadlineAction::Expire => "package.deadline_expired",
        },
        None,
        package_id,
        json!({
            "bid_deadline": ledger.package.bid_deadline,
            "new_deadline": next.package.bid_deadline,
            "expired_bids": expired_bids,
        }),
    )));

    let decision = DeadlineDecision {
        package_id,
        action,
        bid_deadline: ledger.package.bid_deadline,
        new_deadline: next.package.bid_deadline,
        deadline_extensions: next.package.deadline_extensions,
        expired_bids,
        applied: false,
    };

    (next, decision, effects)
}

/// Reclaims stalled auctions: warns senders before the bidding deadline,
/// extends it a bounded number of times, then expires every pending bid.
pub struct DeadlineScheduler {
    store: Arc<Store>,
    effects: EffectDispatcher,
    metrics: Metrics,
    settings: EngineSettings,
}

impl DeadlineScheduler {
    pub fn new(
        store: Arc<Store>,
        effects: EffectDispatcher,
        metrics: Metrics,
        settings: EngineSettings,
    ) -> Self {
        Self {
            store,
            effects,
            metrics,
            settings,
        }
    }

    pub async fn run_scan(&self, dry_run: bool) -> ScanReport {
        self.scan_at(Utc::now(), dry_run).await
    }

    pub async fn scan_at(&self, now: DateTime<Utc>, dry_run: bool) -> ScanReport {
        let timer = self.metrics.deadline_scan_seconds.start_timer();
        let candidates = self.store.ledgers_where(|p| {
            p.is_active && p.status == PackageStatus::OpenForBids && p.bid_deadline.is_some()
        });

        let mut report = ScanReport {
            dry_run,
            scanned: candidates.len(),
            decisions: Vec::new(),
            skipped: 0,
            failed: 0,
        };

        for ledger in candidates {
            let Some(action) = decide(&ledger.package, now, &self.settings) else {
                continue;
            };
            let package_id = ledger.package.id;

            if dry_run {
                let (_, decision, _) = plan(&ledger, action, now, &self.settings);
                info!(
                    dry_run = true,
                    package_id = %package_id,
                    action = action.as_str(),
                    expired_bids = decision.expired_bids,
                    "deadline decision"
                );
                report.decisions.push(decision);
                continue;
            }

            match self.apply(&ledger, action, now).await {
                Ok(Some(decision)) => report.decisions.push(decision),
                Ok(None) => report.skipped += 1,
                Err(err) => {
                    report.failed += 1;
                    error!(package_id = %package_id, error = %err, "deadline action failed");
                }
            }
        }

        timer.observe_duration();
        report
    }

    /// Commits `action` for a package read during the scan. Returns `None`
    /// when the package changed in between, e.g. a bid was selected or
    /// another scan already acted on it.
    async fn apply(
        &self,
        scanned: &PackageLedger,
        action: DeadlineAction,
        now: DateTime<Utc>,
    ) -> Result<Option<DeadlineDecision>, AppError> {
        let package_id = scanned.package.id;
        let scanned_deadline = scanned.package.bid_deadline;
        let planned = self.store.update(package_id, |current| {
            let unchanged = current.package.bid_deadline == scanned_deadline
                && decide(&current.package, now, &self.settings) == Some(action);
            if !unchanged {
                return Ok(Write::Skip(None));
            }
            let (next, decision, effects) = plan(current, action, now, &self.settings);
            Ok(Write::Commit(next, Some((decision, effects))))
        })?;

        let Some((mut decision, effects)) = planned else {
            self.metrics
                .deadline_actions_total
                .with_label_values(&["skipped"])
                .inc();
            info!(package_id = %package_id, "package changed since scan; skipping");
            return Ok(None);
        };

        decision.applied = true;
        self.metrics
            .deadline_actions_total
            .with_label_values(&[action.as_str()])
            .inc();
        if action == DeadlineAction::Expire {
            self.metrics
                .bids_total
                .with_label_values(&["expired"])
                .inc_by(decision.expired_bids as u64);
        }
        info!(
            package_id = %package_id,
            action = action.as_str(),
            deadline_extensions = decision.deadline_extensions,
            expired_bids = decision.expired_bids,
            "deadline action applied"
        );
        self.effects.dispatch(effects);

        Ok(Some(decision))
    }
}

pub async fn run_deadline_scheduler(
    scheduler: Arc<DeadlineScheduler>,
    interval: StdDuration,
    dry_run: bool,
) {
    info!(
        interval_secs = interval.as_secs(),
        dry_run, "deadline scheduler started"
    );

    let mut ticker = tokio::time::interval(interval);
    loop {
        ticker.tick().await;
        let report = scheduler.run_scan(dry_run).await;
        if report.decisions.is_empty() && report.failed == 0 {
            debug!(scanned = report.scanned, "deadline scan found nothing to do");
        } else {
            info!(
                scanned = report.scanned,
                actions = report.decisions.len(),
                skipped = report.skipped,
                failed = report.failed,
                dry_run,
                "deadline scan finished"
            );
        }
    }
}
