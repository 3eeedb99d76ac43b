use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::location::Location;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PackageStatus {
    New,
    OpenForBids,
    BidSelected,
    PendingPickup,
    InTransit,
    Delivered,
    Failed,
    Canceled,
}

impl PackageStatus {
    pub const ALL: [PackageStatus; 8] = [
        PackageStatus::New,
        PackageStatus::OpenForBids,
        PackageStatus::BidSelected,
        PackageStatus::PendingPickup,
        PackageStatus::InTransit,
        PackageStatus::Delivered,
        PackageStatus::Failed,
        PackageStatus::Canceled,
    ];

    pub fn is_terminal(self) -> bool {
        matches!(self, PackageStatus::Delivered | PackageStatus::Canceled)
    }

    /// Statuses in which a courier has been awarded the package.
    pub fn has_courier(self) -> bool {
        matches!(
            self,
            PackageStatus::BidSelected
                | PackageStatus::PendingPickup
                | PackageStatus::InTransit
                | PackageStatus::Delivered
                | PackageStatus::Failed
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            PackageStatus::New => "new",
            PackageStatus::OpenForBids => "open_for_bids",
            PackageStatus::BidSelected => "bid_selected",
            PackageStatus::PendingPickup => "pending_pickup",
            PackageStatus::InTransit => "in_transit",
            PackageStatus::Delivered => "delivered",
            PackageStatus::Failed => "failed",
            PackageStatus::Canceled => "canceled",
        }
    }
}

impl fmt::Display for PackageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Externally confirmed proof-of-delivery. The media itself lives in object
/// storage; only its reference is kept here.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryProof {
    pub reference: String,
    pub confirmed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Package {
    pub id: Uuid,
    pub tracking_code: String,
    pub sender_id: Uuid,
    /// Set exactly while the status has a courier (see
    /// [`PackageStatus::has_courier`]), with one exception: a package
    /// canceled after selection keeps its courier and selected bid as a
    /// record of the award.
    pub courier_id: Option<Uuid>,
    pub pickup: Location,
    pub dropoff: Location,
    pub description: Option<String>,
    pub price: Option<f64>,
    pub requires_proof: bool,
    pub proof: Option<DeliveryProof>,

    pub status: PackageStatus,
    pub status_changed_at: DateTime<Utc>,
    pub bid_selected_at: Option<DateTime<Utc>>,
    pub pending_pickup_at: Option<DateTime<Utc>>,
    pub in_transit_at: Option<DateTime<Utc>>,
    pub delivered_at: Option<DateTime<Utc>>,
    pub failed_at: Option<DateTime<Utc>>,
    pub canceled_at: Option<DateTime<Utc>>,
    pub cancel_reason: Option<String>,

    pub bid_deadline: Option<DateTime<Utc>>,
    pub bid_count: u32,
    pub deadline_extensions: u32,
    pub deadline_warning_sent: bool,
    pub selected_bid_id: Option<Uuid>,

    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Optimistic concurrency token, bumped on every committed write.
    pub version: u64,
}

#[derive(Debug, Clone)]
pub struct NewPackage {
    pub sender_id: Uuid,
    pub pickup: Location,
    pub dropoff: Location,
    pub description: Option<String>,
    pub requires_proof: bool,
}

impl Package {
    pub fn new(input: NewPackage, now: DateTime<Utc>) -> Self {
        let id = Uuid::new_v4();
        Self {
            id,
            tracking_code: tracking_code_for(id),
            sender_id: input.sender_id,
            courier_id: None,
            pickup: input.pickup,
            dropoff: input.dropoff,
            description: input.description,
            price: None,
            requires_proof: input.requires_proof,
            proof: None,
            status: PackageStatus::New,
            status_changed_at: now,
            bid_selected_at: None,
            pending_pickup_at: None,
            in_transit_at: None,
            delivered_at: None,
            failed_at: None,
            canceled_at: None,
            cancel_reason: None,
            bid_deadline: None,
            bid_count: 0,
            deadline_extensions: 0,
            deadline_warning_sent: false,
            selected_bid_id: None,
            is_active: true,
            created_at: now,
            updated_at: now,
            version: 0,
        }
    }

    /// Clears all bidding metadata so the package starts a fresh auction.
    pub fn reset_auction(&mut self) {
        self.bid_deadline = None;
        self.bid_count = 0;
        self.deadline_extensions = 0;
        self.deadline_warning_sent = false;
    }
}

pub fn tracking_code_for(id: Uuid) -> String {
    let simple = id.simple().to_string().to_uppercase();
    format!("PKG-{}", &simple[..8])
}
