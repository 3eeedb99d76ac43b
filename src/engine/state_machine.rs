//! Package lifecycle rules.
//!
//! ```text
//! NEW ──▶ OPEN_FOR_BIDS ──▶ BID_SELECTED ──▶ PENDING_PICKUP ──▶ IN_TRANSIT ──▶ DELIVERED
//!              ▲                  │                                  ▲   │
//!              │                  └──────────── pickup ──────────────┘   ▼
//!              └──────────────── admin re-queue ──────────────────── FAILED
//! ```
//!
//! Every non-terminal status may also move to CANCELED. Senders may cancel
//! up to PENDING_PICKUP; cancelling IN_TRANSIT or FAILED packages, and
//! re-queueing FAILED ones, is reserved for admins.

use chrono::{DateTime, Utc};
use serde_json::json;

use crate::collaborators::audit::AuditEntry;
use crate::collaborators::notifier::{Notification, NotificationKind};
use crate::engine::effects::Effect;
use crate::error::TransitionError;
use crate::models::actor::Actor;
use crate::models::package::{Package, PackageStatus};

pub fn allowed_targets(from: PackageStatus) -> &'static [PackageStatus] {
    use PackageStatus::*;

    match from {
        New => &[OpenForBids, Canceled],
        OpenForBids => &[BidSelected, Canceled],
        BidSelected => &[PendingPickup, InTransit, Canceled],
        PendingPickup => &[InTransit, Canceled],
        InTransit => &[Delivered, Failed, Canceled],
        Failed => &[OpenForBids, Canceled],
        Delivered | Canceled => &[],
    }
}

pub fn requires_admin(from: PackageStatus, to: PackageStatus) -> bool {
    use PackageStatus::*;

    matches!(
        (from, to),
        (InTransit, Canceled) | (Failed, Canceled) | (Failed, OpenForBids)
    )
}

/// Decides whether `from -> to` is legal for an actor. Pure.
pub fn validate_transition(
    from: PackageStatus,
    to: PackageStatus,
    is_admin: bool,
) -> Result<(), TransitionError> {
    if from == to {
        return Err(TransitionError::SameState(from));
    }
    if from.is_terminal() {
        return Err(TransitionError::TerminalState(from));
    }
    if !allowed_targets(from).contains(&to) {
        return Err(TransitionError::IllegalTransition { from, to });
    }
    if requires_admin(from, to) && !is_admin {
        return Err(TransitionError::RoleDenied { from, to });
    }
    Ok(())
}

#[derive(Debug, Clone)]
pub struct Transitioned {
    pub from: PackageStatus,
    pub package: Package,
    pub effects: Vec<Effect>,
}

#[derive(Debug, Clone)]
pub enum TransitionOutcome {
    Applied(Transitioned),
    /// Delivery needs a confirmed proof first. Nothing was changed.
    ProofRequired,
}

/// Validates and applies a status change to a copy of `package`, stamping
/// the milestone timestamps. The caller persists the returned package and
/// dispatches the returned effects.
pub fn apply_transition(
    package: &Package,
    target: PackageStatus,
    actor: &Actor,
    now: DateTime<Utc>,
) -> Result<TransitionOutcome, TransitionError> {
    let from = package.status;
    validate_transition(from, target, actor.is_admin())?;

    if target == PackageStatus::Delivered && package.requires_proof && package.proof.is_none() {
        return Ok(TransitionOutcome::ProofRequired);
    }

    let mut next = package.clone();
    next.status = target;
    next.status_changed_at = now;
    next.updated_at = now;

    match target {
        PackageStatus::BidSelected => next.bid_selected_at = Some(now),
        PackageStatus::PendingPickup => next.pending_pickup_at = Some(now),
        PackageStatus::InTransit => next.in_transit_at = Some(now),
        PackageStatus::Delivered => next.delivered_at = Some(now),
        PackageStatus::Failed => next.failed_at = Some(now),
        PackageStatus::Canceled => next.canceled_at = Some(now),
        PackageStatus::New | PackageStatus::OpenForBids => {}
    }

    let mut effects = vec![Effect::Audit(AuditEntry::new(
        "package.status_changed",
        Some(actor.id),
        package.id,
        json!({ "from": from, "to": target }),
    ))];

    let kind = if target == PackageStatus::Canceled {
        NotificationKind::PackageCanceled
    } else {
        NotificationKind::StatusChanged
    };
    let message = format!("Package {} is now {}", package.tracking_code, target);
    let parties = [Some(package.sender_id), package.courier_id];
    for user_id in parties.into_iter().flatten() {
        if user_id != actor.id {
            effects.push(Effect::Notify(Notification::new(
                user_id,
                kind,
                package.id,
                message.clone(),
            )));
        }
    }

    Ok(TransitionOutcome::Applied(Transitioned {
        from,
        package: next,
        effects,
    }))
}
