use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub const MAX_MESSAGE_CHARS: usize = 500;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BidStatus {
    Pending,
    Selected,
    Rejected,
    Withdrawn,
    Expired,
}

impl BidStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            BidStatus::Pending => "pending",
            BidStatus::Selected => "selected",
            BidStatus::Rejected => "rejected",
            BidStatus::Withdrawn => "withdrawn",
            BidStatus::Expired => "expired",
        }
    }
}

impl fmt::Display for BidStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CourierBid {
    pub id: Uuid,
    pub package_id: Uuid,
    pub courier_id: Uuid,
    pub route_id: Option<Uuid>,
    pub proposed_price: f64,
    pub estimated_delivery_hours: Option<f64>,
    pub estimated_pickup_time: Option<DateTime<Utc>>,
    pub message: Option<String>,
    pub status: BidStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub selected_at: Option<DateTime<Utc>>,
    pub withdrawn_at: Option<DateTime<Utc>>,
}

impl CourierBid {
    pub fn is_pending(&self) -> bool {
        self.status == BidStatus::Pending
    }

    pub(crate) fn close(&mut self, status: BidStatus, now: DateTime<Utc>) {
        self.status = status;
        self.updated_at = now;
        match status {
            BidStatus::Selected => self.selected_at = Some(now),
            BidStatus::Withdrawn => self.withdrawn_at = Some(now),
            _ => {}
        }
    }
}
