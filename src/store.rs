use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tracing::debug;
use uuid::Uuid;

use crate::error::AppError;
use crate::models::bid::{BidStatus, CourierBid};
use crate::models::package::Package;
use crate::models::route::CourierRoute;

/// A package together with every bid placed on it. This is the unit of
/// atomic writes: a winner, its rejected siblings and the package itself are
/// committed as one record.
#[derive(Debug, Clone)]
pub struct PackageLedger {
    pub package: Package,
    pub bids: Vec<CourierBid>,
}

impl PackageLedger {
    pub fn new(package: Package) -> Self {
        Self {
            package,
            bids: Vec::new(),
        }
    }

    pub fn bid(&self, bid_id: Uuid) -> Option<&CourierBid> {
        self.bids.iter().find(|bid| bid.id == bid_id)
    }

    pub fn bid_mut(&mut self, bid_id: Uuid) -> Option<&mut CourierBid> {
        self.bids.iter_mut().find(|bid| bid.id == bid_id)
    }

    pub fn pending_bid_by(&self, courier_id: Uuid) -> Option<&CourierBid> {
        self.bids
            .iter()
            .find(|bid| bid.courier_id == courier_id && bid.is_pending())
    }

    /// Closes every pending bid with `status`, returning the affected bids.
    pub fn close_pending_bids(&mut self, status: BidStatus, now: DateTime<Utc>) -> Vec<CourierBid> {
        let mut closed = Vec::new();
        for bid in self.bids.iter_mut().filter(|bid| bid.is_pending()) {
            bid.close(status, now);
            closed.push(bid.clone());
        }
        closed
    }

    /// Checks the award invariants: at most one selected bid, and the
    /// package's selected bid and courier agree with it. Canceled packages
    /// may still carry their award, so only the "courier present" direction
    /// is enforced per status.
    pub fn invariant_violation(&self) -> Option<String> {
        let selected: Vec<&CourierBid> = self
            .bids
            .iter()
            .filter(|bid| bid.status == BidStatus::Selected)
            .collect();

        match (selected.as_slice(), self.package.selected_bid_id) {
            ([], None) => {}
            ([bid], Some(selected_id)) if bid.id == selected_id => {
                if self.package.courier_id != Some(bid.courier_id) {
                    return Some(format!(
                        "package {} courier does not match selected bid {}",
                        self.package.id, bid.id
                    ));
                }
            }
            (bids, selected_id) => {
                return Some(format!(
                    "package {} has {} selected bids but selected_bid_id {:?}",
                    self.package.id,
                    bids.len(),
                    selected_id
                ));
            }
        }

        if self.package.status.has_courier() && self.package.courier_id.is_none() {
            return Some(format!(
                "package {} is {} without a courier",
                self.package.id, self.package.status
            ));
        }

        None
    }
}

/// Outcome of planning a write against a ledger snapshot.
pub enum Write<T> {
    Commit(PackageLedger, T),
    Skip(T),
}

pub struct Store {
    ledgers: DashMap<Uuid, PackageLedger>,
    bid_index: DashMap<Uuid, Uuid>,
    tracking_index: DashMap<String, Uuid>,
    routes: DashMap<Uuid, CourierRoute>,
    active_routes: DashMap<Uuid, Uuid>,
    commit_max_attempts: u32,
}

impl Store {
    pub fn new(commit_max_attempts: u32) -> Self {
        Self {
            ledgers: DashMap::new(),
            bid_index: DashMap::new(),
            tracking_index: DashMap::new(),
            routes: DashMap::new(),
            active_routes: DashMap::new(),
            commit_max_attempts: commit_max_attempts.max(1),
        }
    }

    pub fn package_count(&self) -> usize {
        self.ledgers.len()
    }

    pub fn bid_count(&self) -> usize {
        self.bid_index.len()
    }

    pub fn route_count(&self) -> usize {
        self.routes.len()
    }

    /// Inserts a brand new package. Fails with `Conflict` when its tracking
    /// code is already taken.
    pub fn insert_package(&self, package: Package) -> Result<(), AppError> {
        match self.tracking_index.entry(package.tracking_code.clone()) {
            Entry::Occupied(_) => Err(AppError::Conflict(format!(
                "tracking code {} already in use",
                package.tracking_code
            ))),
            Entry::Vacant(slot) => {
                let _slot = slot.insert(package.id);
                self.ledgers.insert(package.id, PackageLedger::new(package));
                Ok(())
            }
        }
    }

    pub fn ledger(&self, package_id: Uuid) -> Option<PackageLedger> {
        self.ledgers.get(&package_id).map(|entry| entry.value().clone())
    }

    pub fn package(&self, package_id: Uuid) -> Option<Package> {
        self.ledgers
            .get(&package_id)
            .map(|entry| entry.value().package.clone())
    }

    pub fn package_by_tracking_code(&self, code: &str) -> Option<Package> {
        let package_id = *self.tracking_index.get(code)?;
        self.package(package_id)
    }

    pub fn package_id_for_bid(&self, bid_id: Uuid) -> Option<Uuid> {
        self.bid_index.get(&bid_id).map(|entry| *entry.value())
    }

    pub fn bid(&self, bid_id: Uuid) -> Option<CourierBid> {
        let package_id = self.package_id_for_bid(bid_id)?;
        self.ledgers
            .get(&package_id)
            .and_then(|entry| entry.value().bid(bid_id).cloned())
    }

    /// Snapshots of every ledger whose package satisfies `filter`.
    pub fn ledgers_where(&self, filter: impl Fn(&Package) -> bool) -> Vec<PackageLedger> {
        self.ledgers
            .iter()
            .filter(|entry| filter(&entry.value().package))
            .map(|entry| entry.value().clone())
            .collect()
    }

    pub fn packages_where(&self, filter: impl Fn(&Package) -> bool) -> Vec<Package> {
        self.ledgers
            .iter()
            .filter(|entry| filter(&entry.value().package))
            .map(|entry| entry.value().package.clone())
            .collect()
    }

    /// Read-plan-commit loop with optimistic concurrency.
    ///
    /// `plan` runs against a fresh snapshot on every attempt and may reject
    /// the write with an error, skip it, or return the complete next ledger.
    /// The commit succeeds only if nobody else committed in between;
    /// otherwise the plan is re-run, up to the configured attempt limit.
    pub fn update<T>(
        &self,
        package_id: Uuid,
        mut plan: impl FnMut(&PackageLedger) -> Result<Write<T>, AppError>,
    ) -> Result<T, AppError> {
        for attempt in 1..=self.commit_max_attempts {
            let snapshot = self
                .ledger(package_id)
                .ok_or_else(|| AppError::NotFound(format!("package {package_id} not found")))?;

            match plan(&snapshot)? {
                Write::Skip(value) => return Ok(value),
                Write::Commit(next, value) => {
                    if self.compare_and_swap(snapshot.package.version, next)? {
                        return Ok(value);
                    }
                    debug!(package_id = %package_id, attempt, "stale package version; retrying");
                }
            }
        }

        Err(AppError::Conflict(format!(
            "package {package_id} was modified concurrently"
        )))
    }

    fn compare_and_swap(&self, expected_version: u64, mut next: PackageLedger) -> Result<bool, AppError> {
        let package_id = next.package.id;
        let mut current = self
            .ledgers
            .get_mut(&package_id)
            .ok_or_else(|| AppError::NotFound(format!("package {package_id} not found")))?;

        if current.package.version != expected_version {
            return Ok(false);
        }

        debug_assert!(
            next.invariant_violation().is_none(),
            "{:?}",
            next.invariant_violation()
        );

        next.package.version = expected_version + 1;
        if next.package.updated_at < current.package.updated_at {
            next.package.updated_at = current.package.updated_at;
        }
        let bid_ids: Vec<Uuid> = next.bids.iter().map(|bid| bid.id).collect();
        *current = next;

        // Indexed while the ledger is still locked so a reader that finds the
        // bid id always finds the bid.
        for bid_id in bid_ids {
            self.bid_index.insert(bid_id, package_id);
        }

        Ok(true)
    }

    /// Stores `route` as its courier's active route, deactivating the
    /// previous one. Returns the id of the route that was replaced.
    pub fn activate_route(&self, route: CourierRoute, now: DateTime<Utc>) -> Option<Uuid> {
        let route_id = route.id;
        match self.active_routes.entry(route.courier_id) {
            Entry::Occupied(mut slot) => {
                let previous = slot.insert(route_id);
                if let Some(mut old) = self.routes.get_mut(&previous) {
                    old.is_active = false;
                    old.deactivated_at = Some(now);
                }
                self.routes.insert(route_id, route);
                Some(previous)
            }
            Entry::Vacant(slot) => {
                let _slot = slot.insert(route_id);
                self.routes.insert(route_id, route);
                None
            }
        }
    }

    pub fn route(&self, route_id: Uuid) -> Option<CourierRoute> {
        self.routes.get(&route_id).map(|entry| entry.value().clone())
    }
}
