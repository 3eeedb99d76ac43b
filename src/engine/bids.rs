use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use serde_json::json;
use tracing::info;
use uuid::Uuid;

use crate::collaborators::audit::AuditEntry;
use crate::collaborators::notifier::{Notification, NotificationKind};
use crate::config::EngineSettings;
use crate::engine::effects::{Effect, EffectDispatcher};
use crate::engine::state_machine::{apply_transition, TransitionOutcome};
use crate::error::{AppError, BidError};
use crate::models::actor::Actor;
use crate::models::bid::{BidStatus, CourierBid, MAX_MESSAGE_CHARS};
use crate::models::package::{Package, PackageStatus};
use crate::observability::metrics::Metrics;
use crate::store::{PackageLedger, Store, Write};

#[derive(Debug, Clone, Default)]
pub struct NewBid {
    pub proposed_price: f64,
    pub estimated_delivery_hours: Option<f64>,
    pub estimated_pickup_time: Option<DateTime<Utc>>,
    pub message: Option<String>,
    pub route_id: Option<Uuid>,
}

impl NewBid {
    fn validate(&self) -> Result<(), AppError> {
        if !self.proposed_price.is_finite() || self.proposed_price <= 0.0 {
            return Err(AppError::BadRequest(
                "proposed_price must be a positive amount".to_string(),
            ));
        }
        if self
            .estimated_delivery_hours
            .is_some_and(|hours| !hours.is_finite() || hours <= 0.0)
        {
            return Err(AppError::BadRequest(
                "estimated_delivery_hours must be positive".to_string(),
            ));
        }
        if self
            .message
            .as_ref()
            .is_some_and(|m| m.chars().count() > MAX_MESSAGE_CHARS)
        {
            return Err(AppError::BadRequest(format!(
                "message exceeds {MAX_MESSAGE_CHARS} characters"
            )));
        }
        Ok(())
    }
}

/// Outcome of a committed bid selection.
#[derive(Debug, Clone, Serialize)]
pub struct Selection {
    pub winner: CourierBid,
    pub rejected: Vec<CourierBid>,
    pub package: Package,
}

/// Owns bid creation, withdrawal and the single-winner selection. Every
/// operation plans its full write set against one package ledger and commits
/// it atomically through the store.
pub struct BidCoordinator {
    store: Arc<Store>,
    effects: EffectDispatcher,
    metrics: Metrics,
    settings: EngineSettings,
}

impl BidCoordinator {
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

    pub fn get_bid(&self, bid_id: Uuid) -> Result<CourierBid, AppError> {
        self.store
            .bid(bid_id)
            .ok_or_else(|| AppError::NotFound(format!("bid {bid_id} not found")))
    }

    pub async fn create_bid(
        &self,
        package_id: Uuid,
        courier: &Actor,
        input: NewBid,
    ) -> Result<CourierBid, AppError> {
        input.validate()?;

        let now = Utc::now();
        let window = Duration::hours(self.settings.bid_window_hours);
        let (bid, effects) = self.store.update(package_id, |ledger| {
            let (next, bid, effects) = plan_create(ledger, courier.id, &input, window, now)?;
            Ok(Write::Commit(next, (bid, effects)))
        })?;

        self.metrics.bids_total.with_label_values(&["created"]).inc();
        info!(
            bid_id = %bid.id,
            package_id = %package_id,
            courier_id = %courier.id,
            price = bid.proposed_price,
            "bid created"
        );
        self.effects.dispatch(effects);

        Ok(bid)
    }

    pub async fn withdraw_bid(&self, bid_id: Uuid, actor: &Actor) -> Result<CourierBid, AppError> {
        let package_id = self.package_for_bid(bid_id)?;
        let now = Utc::now();
        let (bid, effects) = self.store.update(package_id, |ledger| {
            let (next, bid, effects) = plan_withdraw(ledger, bid_id, actor, now)?;
            Ok(Write::Commit(next, (bid, effects)))
        })?;

        self.metrics.bids_total.with_label_values(&["withdrawn"]).inc();
        info!(bid_id = %bid_id, package_id = %package_id, "bid withdrawn");
        self.effects.dispatch(effects);

        Ok(bid)
    }

    /// Awards the package to `bid_id`. The winner, every rejected sibling and
    /// the package are committed together or not at all.
    pub async fn select_bid(&self, bid_id: Uuid, actor: &Actor) -> Result<Selection, AppError> {
        let package_id = self.package_for_bid(bid_id)?;
        let now = Utc::now();
        let (selection, effects) = self.store.update(package_id, |ledger| {
            let (next, selection, effects) = plan_select(ledger, bid_id, actor, now)?;
            Ok(Write::Commit(next, (selection, effects)))
        })?;

        self.metrics.bids_total.with_label_values(&["selected"]).inc();
        self.metrics
            .bids_total
            .with_label_values(&["rejected"])
            .inc_by(selection.rejected.len() as u64);
        self.metrics
            .package_transitions_total
            .with_label_values(&[PackageStatus::BidSelected.as_str()])
            .inc();
        info!(
            bid_id = %bid_id,
            package_id = %package_id,
            courier_id = %selection.winner.courier_id,
            rejected = selection.rejected.len(),
            "bid selected"
        );
        self.effects.dispatch(effects);

        Ok(selection)
    }

    /// The winning courier confirms physical pickup, moving the package
    /// straight to in transit.
    pub async fn confirm_pickup(&self, bid_id: Uuid, actor: &Actor) -> Result<Package, AppError> {
        let package_id = self.package_for_bid(bid_id)?;
        let now = Utc::now();
        let (package, effects) = self.store.update(package_id, |ledger| {
            let (next, effects) = plan_confirm_pickup(ledger, bid_id, actor, now)?;
            let package = next.package.clone();
            Ok(Write::Commit(next, (package, effects)))
        })?;

        self.metrics
            .package_transitions_total
            .with_label_values(&[PackageStatus::InTransit.as_str()])
            .inc();
        info!(bid_id = %bid_id, package_id = %package_id, "pickup confirmed");
        self.effects.dispatch(effects);

        Ok(package)
    }

    fn package_for_bid(&self, bid_id: Uuid) -> Result<Uuid, AppError> {
        self.store
            .package_id_for_bid(bid_id)
            .ok_or_else(|| AppError::NotFound(format!("bid {bid_id} not found")))
    }
}

fn plan_create(
    ledger: &PackageLedger,
    courier_id: Uuid,
    input: &NewBid,
    window: Duration,
    now: DateTime<Utc>,
) -> Result<(PackageLedger, CourierBid, Vec<Effect>), AppError> {
    let package = &ledger.package;
    if package.status != PackageStatus::OpenForBids || !package.is_active {
        return Err(BidError::NotBiddable(package.status).into());
    }
    if package.sender_id == courier_id {
        return Err(BidError::SelfBid.into());
    }
    if ledger.pending_bid_by(courier_id).is_some() {
        return Err(BidError::DuplicateBid.into());
    }

    let bid = CourierBid {
        id: Uuid::new_v4(),
        package_id: package.id,
        courier_id,
        route_id: input.route_id,
        proposed_price: input.proposed_price,
        estimated_delivery_hours: input.estimated_delivery_hours,
        estimated_pickup_time: input.estimated_pickup_time,
        message: input.message.clone(),
        status: BidStatus::Pending,
        created_at: now,
        updated_at: now,
        selected_at: None,
        withdrawn_at: None,
    };

    let mut next = ledger.clone();
    next.bids.push(bid.clone());
    next.package.bid_count += 1;
    next.package.updated_at = now;
    // The first bid of an auction opens the bidding window.
    if next.package.bid_deadline.is_none() {
        next.package.bid_deadline = Some(now + window);
    }

    let effects = vec![
        Effect::Audit(AuditEntry::new(
            "bid.created",
            Some(courier_id),
            bid.id,
            json!({ "package_id": package.id, "proposed_price": bid.proposed_price }),
        )),
        Effect::Notify(Notification::new(
            package.sender_id,
            NotificationKind::NewBid,
            package.id,
            format!(
                "New bid of {:.2} on package {}",
                bid.proposed_price, package.tracking_code
            ),
        )),
    ];

    Ok((next, bid, effects))
}

fn plan_withdraw(
    ledger: &PackageLedger,
    bid_id: Uuid,
    actor: &Actor,
    now: DateTime<Utc>,
) -> Result<(PackageLedger, CourierBid, Vec<Effect>), AppError> {
    let mut next = ledger.clone();
    let bid = next
        .bid_mut(bid_id)
        .ok_or_else(|| AppError::NotFound(format!("bid {bid_id} not found")))?;
    if bid.courier_id != actor.id {
        return Err(BidError::NotOwner.into());
    }
    if !bid.is_pending() {
        return Err(BidError::NotPending(bid.status).into());
    }

    bid.close(BidStatus::Withdrawn, now);
    let bid = bid.clone();
    next.package.bid_count = next.package.bid_count.saturating_sub(1);
    next.package.updated_at = now;

    let effects = vec![
        Effect::Audit(AuditEntry::new(
            "bid.withdrawn",
            Some(actor.id),
            bid_id,
            json!({ "package_id": next.package.id }),
        )),
        Effect::Notify(Notification::new(
            next.package.sender_id,
            NotificationKind::BidWithdrawn,
            next.package.id,
            format!(
                "A courier withdrew their bid on package {}",
                next.package.tracking_code
            ),
        )),
    ];

    Ok((next, bid, effects))
}

fn plan_select(
    ledger: &PackageLedger,
    bid_id: Uuid,
    actor: &Actor,
    now: DateTime<Utc>,
) -> Result<(PackageLedger, Selection, Vec<Effect>), AppError> {
    let package = &ledger.package;
    let bid = ledger
        .bid(bid_id)
        .ok_or_else(|| AppError::NotFound(format!("bid {bid_id} not found")))?;
    if package.sender_id != actor.id {
        return Err(BidError::NotOwner.into());
    }
    if !bid.is_pending() {
        return Err(BidError::NotPending(bid.status).into());
    }
    if package.status != PackageStatus::OpenForBids {
        return Err(BidError::NotBiddable(package.status).into());
    }

    let transitioned = match apply_transition(package, PackageStatus::BidSelected, actor, now)? {
        TransitionOutcome::Applied(done) => done,
        TransitionOutcome::ProofRequired => {
            return Err(AppError::Internal("unexpected proof requirement".to_string()));
        }
    };

    let mut next = PackageLedger {
        package: transitioned.package,
        bids: ledger.bids.clone(),
    };
    next.package.courier_id = Some(bid.courier_id);
    next.package.price = Some(bid.proposed_price);
    next.package.selected_bid_id = Some(bid.id);

    let mut winner = bid.clone();
    winner.close(BidStatus::Selected, now);
    if let Some(slot) = next.bid_mut(bid_id) {
        *slot = winner.clone();
    }
    let rejected = next.close_pending_bids(BidStatus::Rejected, now);

    let tracking_code = &next.package.tracking_code;
    let mut effects = transitioned.effects;
    effects.push(Effect::Audit(AuditEntry::new(
        "bid.selected",
        Some(actor.id),
        bid_id,
        json!({
            "package_id": package.id,
            "rejected": rejected.iter().map(|b| b.id).collect::<Vec<_>>(),
        }),
    )));
    effects.push(Effect::Notify(Notification::new(
        winner.courier_id,
        NotificationKind::BidSelected,
        package.id,
        format!("Your bid on package {tracking_code} was selected"),
    )));
    for loser in &rejected {
        effects.push(Effect::Notify(Notification::new(
            loser.courier_id,
            NotificationKind::BidRejected,
            package.id,
            format!("Another bid on package {tracking_code} was selected"),
        )));
    }

    let selection = Selection {
        winner,
        rejected,
        package: next.package.clone(),
    };
    Ok((next, selection, effects))
}

fn plan_confirm_pickup(
    ledger: &PackageLedger,
    bid_id: Uuid,
    actor: &Actor,
    now: DateTime<Utc>,
) -> Result<(PackageLedger, Vec<Effect>), AppError> {
    let bid = ledger
        .bid(bid_id)
        .ok_or_else(|| AppError::NotFound(format!("bid {bid_id} not found")))?;
    if bid.courier_id != actor.id {
        return Err(BidError::NotOwner.into());
    }
    if bid.status != BidStatus::Selected {
        return Err(BidError::NotSelected(bid.status).into());
    }
    if ledger.package.status != PackageStatus::BidSelected {
        return Err(BidError::NotAwaitingPickup(ledger.package.status).into());
    }

    let transitioned = match apply_transition(&ledger.package, PackageStatus::InTransit, actor, now)? {
        TransitionOutcome::Applied(done) => done,
        TransitionOutcome::ProofRequired => {
            return Err(AppError::Internal("unexpected proof requirement".to_string()));
        }
    };

    let mut next = ledger.clone();
    next.package = transitioned.package;
    let mut effects = transitioned.effects;
    for effect in effects.iter_mut() {
        if let Effect::Notify(notification) = effect {
            notification.kind = NotificationKind::PickupConfirmed;
        }
    }

    Ok((next, effects))
}
