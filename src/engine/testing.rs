use std::sync::{Arc, Mutex};

use uuid::Uuid;

use crate::collaborators::audit::MockAuditLog;
use crate::collaborators::notifier::{MockNotifier, Notification, NotificationKind, Notifier};
use crate::config::EngineSettings;
use crate::engine::bids::{BidCoordinator, NewBid};
use crate::engine::deadlines::DeadlineScheduler;
use crate::engine::effects::EffectDispatcher;
use crate::engine::packages::PackageService;
use crate::engine::routes::RouteService;
use crate::models::actor::Actor;
use crate::models::bid::CourierBid;
use crate::models::location::Location;
use crate::models::package::{NewPackage, Package};
use crate::observability::metrics::Metrics;
use crate::store::Store;

/// Engine components wired to an in-memory store and a notifier that records
/// what it was asked to send.
pub(crate) struct Harness {
    pub store: Arc<Store>,
    pub packages: PackageService,
    pub bids: BidCoordinator,
    pub deadlines: DeadlineScheduler,
    pub routes: RouteService,
    pub effects: EffectDispatcher,
    pub metrics: Metrics,
    pub settings: EngineSettings,
    sent: Arc<Mutex<Vec<Notification>>>,
}

pub(crate) fn harness() -> Harness {
    let sent = Arc::new(Mutex::new(Vec::new()));
    let mut notifier = MockNotifier::new();
    let recorded = sent.clone();
    notifier.expect_notify().returning(move |notification| {
        recorded.lock().unwrap().push(notification);
        Ok(())
    });

    build(Arc::new(notifier), sent)
}

/// Same wiring, with `notifier` standing in for the recording mock.
pub(crate) fn harness_with_notifier(notifier: Arc<dyn Notifier>) -> Harness {
    build(notifier, Arc::new(Mutex::new(Vec::new())))
}

fn build(notifier: Arc<dyn Notifier>, sent: Arc<Mutex<Vec<Notification>>>) -> Harness {
    let settings = EngineSettings::default();
    let metrics = Metrics::new();
    let store = Arc::new(Store::new(settings.commit_max_attempts));

    let mut audit = MockAuditLog::new();
    audit.expect_record().returning(|_| Ok(()));

    let effects = EffectDispatcher::new(notifier, Arc::new(audit), metrics.clone(), &settings);

    Harness {
        packages: PackageService::new(store.clone(), effects.clone(), metrics.clone()),
        bids: BidCoordinator::new(
            store.clone(),
            effects.clone(),
            metrics.clone(),
            settings.clone(),
        ),
        deadlines: DeadlineScheduler::new(
            store.clone(),
            effects.clone(),
            metrics.clone(),
            settings.clone(),
        ),
        routes: RouteService::new(store.clone(), effects.clone()),
        effects,
        store,
        metrics,
        settings,
        sent,
    }
}

pub(crate) fn location(lat: f64, lng: f64) -> Location {
    Location {
        lat,
        lng,
        address: format!("{lat},{lng}"),
    }
}

pub(crate) fn new_package(sender_id: Uuid, requires_proof: bool) -> NewPackage {
    NewPackage {
        sender_id,
        pickup: location(37.44, -122.14),
        dropoff: location(37.36, -121.92),
        description: Some("books".to_string()),
        requires_proof,
    }
}

impl Harness {
    pub async fn open_package(&self, sender: &Actor) -> Package {
        self.packages
            .create_package(sender, new_package(sender.id, false))
            .await
            .unwrap()
    }

    pub async fn bid(&self, package: &Package, courier: &Actor, price: f64) -> CourierBid {
        self.bids
            .create_bid(
                package.id,
                courier,
                NewBid {
                    proposed_price: price,
                    ..NewBid::default()
                },
            )
            .await
            .unwrap()
    }

    pub fn package(&self, package_id: Uuid) -> Package {
        self.store.package(package_id).unwrap()
    }

    /// Kinds sent to `user_id` once every in-flight dispatch has finished.
    pub async fn notifications_for(&self, user_id: Uuid) -> Vec<NotificationKind> {
        self.effects.wait_idle().await;
        self.sent
            .lock()
            .unwrap()
            .iter()
            .filter(|n| n.user_id == user_id)
            .map(|n| n.kind)
            .collect()
    }
}
