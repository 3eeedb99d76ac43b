use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::json;
use tracing::{info, warn};
use uuid::Uuid;

use crate::collaborators::audit::AuditEntry;
use crate::collaborators::notifier::{Notification, NotificationKind};
use crate::engine::effects::{Effect, EffectDispatcher};
use crate::engine::state_machine::{apply_transition, TransitionOutcome};
use crate::error::AppError;
use crate::models::actor::Actor;
use crate::models::bid::{BidStatus, CourierBid};
use crate::models::location::Location;
use crate::models::package::{DeliveryProof, NewPackage, Package, PackageStatus};
use crate::observability::metrics::Metrics;
use crate::store::{PackageLedger, Store, Write};

const MAX_TRACKING_CODE_ATTEMPTS: usize = 5;
const MAX_CANCEL_REASON_CHARS: usize = 500;

#[derive(Debug, Clone)]
pub enum StatusUpdate {
    Applied(Package),
    /// The package requires a confirmed delivery proof before it can be
    /// marked delivered. It was left unchanged.
    ProofRequired(Package),
}

pub struct PackageService {
    store: Arc<Store>,
    effects: EffectDispatcher,
    metrics: Metrics,
}

impl PackageService {
    pub fn new(store: Arc<Store>, effects: EffectDispatcher, metrics: Metrics) -> Self {
        Self {
            store,
            effects,
            metrics,
        }
    }

    /// Creates a package in NEW and immediately opens it for bids.
    pub async fn create_package(&self, sender: &Actor, input: NewPackage) -> Result<Package, AppError> {
        validate_location("pickup", &input.pickup)?;
        validate_location("dropoff", &input.dropoff)?;
        if input.sender_id != sender.id {
            return Err(AppError::Forbidden(
                "packages can only be created for yourself".to_string(),
            ));
        }

        let now = Utc::now();
        for _ in 0..MAX_TRACKING_CODE_ATTEMPTS {
            let fresh = Package::new(input.clone(), now);
            let opened = match apply_transition(&fresh, PackageStatus::OpenForBids, sender, now)? {
                TransitionOutcome::Applied(done) => done,
                TransitionOutcome::ProofRequired => {
                    return Err(AppError::Internal("unexpected proof requirement".to_string()));
                }
            };

            match self.store.insert_package(opened.package.clone()) {
                Ok(()) => {
                    let package = opened.package;
                    self.metrics
                        .package_transitions_total
                        .with_label_values(&[package.status.as_str()])
                        .inc();
                    info!(
                        package_id = %package.id,
                        tracking_code = %package.tracking_code,
                        sender_id = %package.sender_id,
                        "package created"
                    );

                    let mut effects = vec![Effect::Audit(AuditEntry::new(
                        "package.created",
                        Some(sender.id),
                        package.id,
                        json!({ "tracking_code": package.tracking_code }),
                    ))];
                    effects.extend(opened.effects);
                    self.effects.dispatch(effects);
                    return Ok(package);
                }
                Err(AppError::Conflict(_)) => {
                    warn!(tracking_code = %fresh.tracking_code, "tracking code collision; regenerating");
                }
                Err(err) => return Err(err),
            }
        }

        Err(AppError::Internal(
            "could not allocate a unique tracking code".to_string(),
        ))
    }

    pub fn get_package(&self, package_id: Uuid) -> Result<Package, AppError> {
        self.store
            .package(package_id)
            .ok_or_else(|| AppError::NotFound(format!("package {package_id} not found")))
    }

    pub fn package_by_tracking_code(&self, code: &str) -> Result<Package, AppError> {
        self.store
            .package_by_tracking_code(code)
            .ok_or_else(|| AppError::NotFound(format!("tracking code {code} not found")))
    }

    /// Active packages, optionally filtered by status, newest first.
    pub fn list_packages(&self, status: Option<PackageStatus>) -> Vec<Package> {
        let mut packages = self
            .store
            .packages_where(|p| p.is_active && status.is_none_or(|s| p.status == s));
        packages.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(a.id.cmp(&b.id)));
        packages
    }

    pub fn bids_for_package(&self, package_id: Uuid) -> Result<Vec<CourierBid>, AppError> {
        let ledger = self
            .store
            .ledger(package_id)
            .ok_or_else(|| AppError::NotFound(format!("package {package_id} not found")))?;
        Ok(ledger.bids)
    }

    /// Moves a package to `target` on behalf of `actor`.
    ///
    /// Bid selection is not reachable from here; it goes through the bid
    /// coordinator so the winner and losers are settled together.
    pub async fn update_status(
        &self,
        package_id: Uuid,
        target: PackageStatus,
        actor: &Actor,
    ) -> Result<StatusUpdate, AppError> {
        if target == PackageStatus::BidSelected {
            return Err(AppError::BadRequest(
                "packages move to bid_selected only by selecting a bid".to_string(),
            ));
        }
        self.transition(package_id, target, actor, None).await
    }

    pub async fn cancel_package(
        &self,
        package_id: Uuid,
        actor: &Actor,
        reason: Option<String>,
    ) -> Result<Package, AppError> {
        if reason
            .as_ref()
            .is_some_and(|r| r.chars().count() > MAX_CANCEL_REASON_CHARS)
        {
            return Err(AppError::BadRequest(format!(
                "cancel reason exceeds {MAX_CANCEL_REASON_CHARS} characters"
            )));
        }

        match self
            .transition(package_id, PackageStatus::Canceled, actor, reason)
            .await?
        {
            StatusUpdate::Applied(package) | StatusUpdate::ProofRequired(package) => Ok(package),
        }
    }

    /// Records an externally confirmed proof of delivery for an in-transit
    /// package. Only the assigned courier (or an admin) may submit it.
    pub async fn submit_proof(
        &self,
        package_id: Uuid,
        actor: &Actor,
        reference: String,
    ) -> Result<Package, AppError> {
        let reference = reference.trim().to_string();
        if reference.is_empty() {
            return Err(AppError::BadRequest("proof reference cannot be empty".to_string()));
        }

        let now = Utc::now();
        let package = self.store.update(package_id, |ledger| {
            let package = &ledger.package;
            if !actor.is_admin() && package.courier_id != Some(actor.id) {
                return Err(AppError::Forbidden(
                    "only the assigned courier can submit delivery proof".to_string(),
                ));
            }
            if package.status != PackageStatus::InTransit {
                return Err(AppError::Conflict(format!(
                    "package is {}, proof can only be submitted in transit",
                    package.status
                )));
            }

            let mut next = ledger.clone();
            next.package.proof = Some(DeliveryProof {
                reference: reference.clone(),
                confirmed_at: now,
            });
            next.package.updated_at = now;
            let package = next.package.clone();
            Ok(Write::Commit(next, package))
        })?;

        info!(package_id = %package_id, "delivery proof recorded");
        self.effects
            .dispatch(vec![Effect::Audit(AuditEntry::new(
                "package.proof_submitted",
                Some(actor.id),
                package_id,
                json!({ "reference": reference }),
            ))]);

        Ok(package)
    }

    /// Soft-deletes a delivered or canceled package.
    pub async fn deactivate_package(&self, package_id: Uuid, actor: &Actor) -> Result<Package, AppError> {
        let now = Utc::now();
        let package = self.store.update(package_id, |ledger| {
            let package = &ledger.package;
            if !actor.is_admin() && package.sender_id != actor.id {
                return Err(AppError::Forbidden(
                    "only the sender can deactivate a package".to_string(),
                ));
            }
            if !package.is_active {
                return Ok(Write::Skip(package.clone()));
            }
            if !package.status.is_terminal() {
                return Err(AppError::Conflict(format!(
                    "package is {}, only delivered or canceled packages can be deactivated",
                    package.status
                )));
            }

            let mut next = ledger.clone();
            next.package.is_active = false;
            next.package.updated_at = now;
            let package = next.package.clone();
            Ok(Write::Commit(next, package))
        })?;

        info!(package_id = %package_id, "package deactivated");
        self.effects
            .dispatch(vec![Effect::Audit(AuditEntry::new(
                "package.deactivated",
                Some(actor.id),
                package_id,
                json!({}),
            ))]);

        Ok(package)
    }

    async fn transition(
        &self,
        package_id: Uuid,
        target: PackageStatus,
        actor: &Actor,
        cancel_reason: Option<String>,
    ) -> Result<StatusUpdate, AppError> {
        let now = Utc::now();
        let outcome = self.store.update(package_id, |ledger| {
            authorize(&ledger.package, target, actor)?;

            let done = match apply_transition(&ledger.package, target, actor, now)? {
                TransitionOutcome::Applied(done) => done,
                TransitionOutcome::ProofRequired => {
                    return Ok(Write::Skip(None));
                }
            };

            let mut next = PackageLedger {
                package: done.package,
                bids: ledger.bids.clone(),
            };
            let mut effects = done.effects;

            match (done.from, target) {
                (_, PackageStatus::Canceled) => {
                    next.package.cancel_reason = cancel_reason.clone();
                    for bid in next.close_pending_bids(BidStatus::Rejected, now) {
                        effects.push(Effect::Notify(Notification::new(
                            bid.courier_id,
                            NotificationKind::BidRejected,
                            package_id,
                            format!(
                                "Package {} was canceled; your bid was not accepted",
                                next.package.tracking_code
                            ),
                        )));
                    }
                }
                (PackageStatus::Failed, PackageStatus::OpenForBids) => requeue(&mut next, now),
                _ => {}
            }

            let package = next.package.clone();
            Ok(Write::Commit(next, Some((done.from, package, effects))))
        })?;

        let Some((from, package, effects)) = outcome else {
            info!(package_id = %package_id, "delivery held back until proof is confirmed");
            return Ok(StatusUpdate::ProofRequired(self.get_package(package_id)?));
        };

        self.metrics
            .package_transitions_total
            .with_label_values(&[package.status.as_str()])
            .inc();
        info!(
            package_id = %package_id,
            actor_id = %actor.id,
            from = %from,
            to = %package.status,
            "package status changed"
        );
        self.effects.dispatch(effects);

        Ok(StatusUpdate::Applied(package))
    }
}

/// Party checks layered over the state machine's role checks: senders steer
/// cancellation, the assigned courier steers delivery progress.
fn authorize(package: &Package, target: PackageStatus, actor: &Actor) -> Result<(), AppError> {
    if actor.is_admin() {
        return Ok(());
    }

    match target {
        PackageStatus::Canceled if package.sender_id != actor.id => Err(AppError::Forbidden(
            "only the sender can cancel a package".to_string(),
        )),
        PackageStatus::PendingPickup
        | PackageStatus::InTransit
        | PackageStatus::Delivered
        | PackageStatus::Failed
            if package.courier_id != Some(actor.id) =>
        {
            Err(AppError::Forbidden(
                "only the assigned courier can update delivery progress".to_string(),
            ))
        }
        _ => Ok(()),
    }
}

/// Puts a failed package back on the market with a clean auction. The failed
/// award is retired as expired so the next selection is the only one.
fn requeue(ledger: &mut PackageLedger, now: DateTime<Utc>) {
    if let Some(selected_id) = ledger.package.selected_bid_id.take() {
        if let Some(bid) = ledger.bid_mut(selected_id) {
            bid.close(BidStatus::Expired, now);
        }
    }
    ledger.package.courier_id = None;
    ledger.package.price = None;
    ledger.package.proof = None;
    ledger.package.reset_auction();
}

fn validate_location(field: &str, location: &Location) -> Result<(), AppError> {
    if !location.point().is_valid() {
        return Err(AppError::BadRequest(format!(
            "{field} coordinates are out of range"
        )));
    }
    if location.address.trim().is_empty() {
        return Err(AppError::BadRequest(format!("{field} address cannot be empty")));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use uuid::Uuid;

    use super::StatusUpdate;
    use crate::collaborators::notifier::NotificationKind;
    use crate::engine::testing::{harness, location, new_package, Harness};
    use crate::error::{AppError, TransitionError};
    use crate::models::actor::Actor;
    use crate::models::bid::BidStatus;
    use crate::models::package::{Package, PackageStatus};

    /// Opens a package, takes two bids and selects the first.
    async fn awarded(h: &Harness, requires_proof: bool) -> (Package, Actor, Actor, Actor) {
        let sender = Actor::user(Uuid::new_v4());
        let courier = Actor::user(Uuid::new_v4());
        let other = Actor::user(Uuid::new_v4());
        let package = h
            .packages
            .create_package(&sender, new_package(sender.id, requires_proof))
            .await
            .unwrap();
        let bid = h.bid(&package, &courier, 20.0).await;
        h.bid(&package, &other, 22.0).await;
        h.bids.select_bid(bid.id, &sender).await.unwrap();
        (h.package(package.id), sender, courier, other)
    }

    fn applied(update: StatusUpdate) -> Package {
        match update {
            StatusUpdate::Applied(package) => package,
            StatusUpdate::ProofRequired(_) => panic!("expected the transition to apply"),
        }
    }

    #[tokio::test]
    async fn new_packages_are_opened_and_trackable() {
        let h = harness();
        let sender = Actor::user(Uuid::new_v4());
        let package = h.open_package(&sender).await;

        assert_eq!(package.status, PackageStatus::OpenForBids);
        assert!(package.tracking_code.starts_with("PKG-"));
        assert_eq!(package.tracking_code.len(), 12);
        assert!(package.courier_id.is_none());
        assert!(package.price.is_none());

        let tracked = h
            .packages
            .package_by_tracking_code(&package.tracking_code)
            .unwrap();
        assert_eq!(tracked.id, package.id);
    }

    #[tokio::test]
    async fn invalid_packages_are_rejected() {
        let h = harness();
        let sender = Actor::user(Uuid::new_v4());

        let mut bad_lat = new_package(sender.id, false);
        bad_lat.pickup = location(91.0, 0.0);
        let mut no_address = new_package(sender.id, false);
        no_address.dropoff.address = "  ".to_string();

        for input in [bad_lat, no_address] {
            let result = h.packages.create_package(&sender, input).await;
            assert!(matches!(result, Err(AppError::BadRequest(_))));
        }

        let someone_else = new_package(Uuid::new_v4(), false);
        let result = h.packages.create_package(&sender, someone_else).await;
        assert!(matches!(result, Err(AppError::Forbidden(_))));
        assert_eq!(h.store.package_count(), 0);
    }

    #[tokio::test]
    async fn courier_drives_delivery_with_proof() {
        let h = harness();
        let (package, sender, courier, _) = awarded(&h, true).await;

        let not_courier = h
            .packages
            .update_status(package.id, PackageStatus::PendingPickup, &sender)
            .await;
        assert!(matches!(not_courier, Err(AppError::Forbidden(_))));

        let pending = applied(
            h.packages
                .update_status(package.id, PackageStatus::PendingPickup, &courier)
                .await
                .unwrap(),
        );
        assert!(pending.pending_pickup_at.is_some());
        applied(
            h.packages
                .update_status(package.id, PackageStatus::InTransit, &courier)
                .await
                .unwrap(),
        );

        let held = h
            .packages
            .update_status(package.id, PackageStatus::Delivered, &courier)
            .await
            .unwrap();
        let StatusUpdate::ProofRequired(unchanged) = held else {
            panic!("delivery should wait for proof");
        };
        assert_eq!(unchanged.status, PackageStatus::InTransit);

        h.packages
            .submit_proof(package.id, &courier, "pod/signature.png".to_string())
            .await
            .unwrap();
        let delivered = applied(
            h.packages
                .update_status(package.id, PackageStatus::Delivered, &courier)
                .await
                .unwrap(),
        );
        assert_eq!(delivered.status, PackageStatus::Delivered);
        assert!(delivered.delivered_at.is_some());
        assert!(
            h.notifications_for(sender.id).await
                .contains(&NotificationKind::StatusChanged)
        );

        let again = h
            .packages
            .update_status(package.id, PackageStatus::Delivered, &courier)
            .await;
        assert!(matches!(
            again,
            Err(AppError::Transition(TransitionError::SameState(
                PackageStatus::Delivered
            )))
        ));
    }

    #[tokio::test]
    async fn proof_needs_the_courier_and_an_in_transit_package() {
        let h = harness();
        let (package, sender, courier, _) = awarded(&h, true).await;

        let early = h
            .packages
            .submit_proof(package.id, &courier, "pod/1.png".to_string())
            .await;
        assert!(matches!(early, Err(AppError::Conflict(_))));

        let by_sender = h
            .packages
            .submit_proof(package.id, &sender, "pod/1.png".to_string())
            .await;
        assert!(matches!(by_sender, Err(AppError::Forbidden(_))));
    }

    #[tokio::test]
    async fn selection_cannot_bypass_the_bid_coordinator() {
        let h = harness();
        let sender = Actor::user(Uuid::new_v4());
        let package = h.open_package(&sender).await;

        let result = h
            .packages
            .update_status(package.id, PackageStatus::BidSelected, &Actor::admin(Uuid::new_v4()))
            .await;
        assert!(matches!(result, Err(AppError::BadRequest(_))));
    }

    #[tokio::test]
    async fn cancelling_an_open_package_rejects_pending_bids() {
        let h = harness();
        let sender = Actor::user(Uuid::new_v4());
        let courier = Actor::user(Uuid::new_v4());
        let package = h.open_package(&sender).await;
        let bid = h.bid(&package, &courier, 10.0).await;

        let by_courier = h.packages.cancel_package(package.id, &courier, None).await;
        assert!(matches!(by_courier, Err(AppError::Forbidden(_))));

        let canceled = h
            .packages
            .cancel_package(package.id, &sender, Some("plans changed".to_string()))
            .await
            .unwrap();
        assert_eq!(canceled.status, PackageStatus::Canceled);
        assert_eq!(canceled.cancel_reason.as_deref(), Some("plans changed"));
        assert!(canceled.canceled_at.is_some());
        assert_eq!(h.store.bid(bid.id).unwrap().status, BidStatus::Rejected);
        assert_eq!(h.notifications_for(courier.id).await, vec![NotificationKind::BidRejected]);

        let twice = h.packages.cancel_package(package.id, &sender, None).await;
        assert!(matches!(
            twice,
            Err(AppError::Transition(TransitionError::SameState(
                PackageStatus::Canceled
            )))
        ));
    }

    #[tokio::test]
    async fn only_admins_cancel_in_transit_packages() {
        let h = harness();
        let (package, sender, courier, _) = awarded(&h, false).await;
        h.bids
            .confirm_pickup(package.selected_bid_id.unwrap(), &courier)
            .await
            .unwrap();

        let by_sender = h.packages.cancel_package(package.id, &sender, None).await;
        assert!(matches!(
            by_sender,
            Err(AppError::Transition(TransitionError::RoleDenied { .. }))
        ));

        let canceled = h
            .packages
            .cancel_package(package.id, &Actor::admin(Uuid::new_v4()), None)
            .await
            .unwrap();
        assert_eq!(canceled.status, PackageStatus::Canceled);
        assert_eq!(canceled.courier_id, Some(courier.id));
        assert_eq!(canceled.selected_bid_id, package.selected_bid_id);
        assert!(
            h.notifications_for(courier.id).await
                .contains(&NotificationKind::PackageCanceled)
        );
        assert!(h.store.ledger(package.id).unwrap().invariant_violation().is_none());
    }

    #[tokio::test]
    async fn admin_requeue_starts_a_fresh_auction() {
        let h = harness();
        let (package, sender, courier, other) = awarded(&h, false).await;
        let selected_bid = package.selected_bid_id.unwrap();
        h.bids.confirm_pickup(selected_bid, &courier).await.unwrap();
        applied(
            h.packages
                .update_status(package.id, PackageStatus::Failed, &courier)
                .await
                .unwrap(),
        );

        let by_sender = h
            .packages
            .update_status(package.id, PackageStatus::OpenForBids, &sender)
            .await;
        assert!(matches!(
            by_sender,
            Err(AppError::Transition(TransitionError::RoleDenied { .. }))
        ));

        let reopened = applied(
            h.packages
                .update_status(package.id, PackageStatus::OpenForBids, &Actor::admin(Uuid::new_v4()))
                .await
                .unwrap(),
        );
        assert_eq!(reopened.status, PackageStatus::OpenForBids);
        assert!(reopened.courier_id.is_none());
        assert!(reopened.selected_bid_id.is_none());
        assert!(reopened.price.is_none());
        assert_eq!(reopened.bid_count, 0);
        assert!(reopened.bid_deadline.is_none());
        assert!(reopened.failed_at.is_some());
        assert_eq!(h.store.bid(selected_bid).unwrap().status, BidStatus::Expired);

        // The previous runner-up can compete again and win cleanly.
        let rebid = h.bid(&reopened, &other, 19.0).await;
        h.bids.select_bid(rebid.id, &sender).await.unwrap();
        let ledger = h.store.ledger(package.id).unwrap();
        assert!(ledger.invariant_violation().is_none());
        assert_eq!(ledger.package.courier_id, Some(other.id));
    }

    #[tokio::test]
    async fn only_finished_packages_can_be_deactivated() {
        let h = harness();
        let sender = Actor::user(Uuid::new_v4());
        let package = h.open_package(&sender).await;

        let open = h.packages.deactivate_package(package.id, &sender).await;
        assert!(matches!(open, Err(AppError::Conflict(_))));

        h.packages.cancel_package(package.id, &sender, None).await.unwrap();
        let stranger = h
            .packages
            .deactivate_package(package.id, &Actor::user(Uuid::new_v4()))
            .await;
        assert!(matches!(stranger, Err(AppError::Forbidden(_))));

        let hidden = h.packages.deactivate_package(package.id, &sender).await.unwrap();
        assert!(!hidden.is_active);
        assert!(h.packages.list_packages(None).is_empty());
        // Soft-deleted packages stay readable by id.
        assert!(h.packages.get_package(package.id).is_ok());
    }

    #[tokio::test]
    async fn listing_filters_by_status() {
        let h = harness();
        let sender = Actor::user(Uuid::new_v4());
        let open = h.open_package(&sender).await;
        let canceled = h.open_package(&sender).await;
        h.packages.cancel_package(canceled.id, &sender, None).await.unwrap();

        let listed = h.packages.list_packages(Some(PackageStatus::OpenForBids));
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].id, open.id);
        assert_eq!(h.packages.list_packages(None).len(), 2);
    }
}
