use std::sync::Arc;

use tokio::sync::broadcast;

use crate::collaborators::audit::{AuditLog, TracingAuditLog};
use crate::collaborators::notifier::{ChannelNotifier, Notification, Notifier};
use crate::collaborators::payment::{LoggingPaymentGateway, PaymentGateway};
use crate::config::EngineSettings;
use crate::engine::bids::BidCoordinator;
use crate::engine::deadlines::DeadlineScheduler;
use crate::engine::effects::EffectDispatcher;
use crate::engine::packages::PackageService;
use crate::engine::routes::RouteService;
use crate::observability::metrics::Metrics;
use crate::store::Store;

pub struct AppState {
    pub store: Arc<Store>,
    pub packages: PackageService,
    pub bids: BidCoordinator,
    pub deadlines: Arc<DeadlineScheduler>,
    pub routes: RouteService,
    pub effects: EffectDispatcher,
    pub payments: Arc<dyn PaymentGateway>,
    pub notification_tx: broadcast::Sender<Notification>,
    pub settings: EngineSettings,
    pub metrics: Metrics,
}

impl AppState {
    /// Wires the engine with the default collaborators: notifications go to
    /// the websocket broadcast channel, audit entries and payments to the log.
    pub fn new(settings: EngineSettings, event_buffer_size: usize) -> Self {
        let (notification_tx, _unused_rx) = broadcast::channel(event_buffer_size);
        let notifier = Arc::new(ChannelNotifier::new(notification_tx.clone()));

        Self::with_collaborators(
            settings,
            notification_tx,
            notifier,
            Arc::new(TracingAuditLog),
            Arc::new(LoggingPaymentGateway),
        )
    }

    pub fn with_collaborators(
        settings: EngineSettings,
        notification_tx: broadcast::Sender<Notification>,
        notifier: Arc<dyn Notifier>,
        audit: Arc<dyn AuditLog>,
        payments: Arc<dyn PaymentGateway>,
    ) -> Self {
        let metrics = Metrics::new();
        let store = Arc::new(Store::new(settings.commit_max_attempts));
        let effects = EffectDispatcher::new(notifier, audit, metrics.clone(), &settings);

        Self {
            packages: PackageService::new(store.clone(), effects.clone(), metrics.clone()),
            bids: BidCoordinator::new(
                store.clone(),
                effects.clone(),
                metrics.clone(),
                settings.clone(),
            ),
            deadlines: Arc::new(DeadlineScheduler::new(
                store.clone(),
                effects.clone(),
                metrics.clone(),
                settings.clone(),
            )),
            routes: RouteService::new(store.clone(), effects.clone()),
            effects,
            store,
            payments,
            notification_tx,
            settings,
            metrics,
        }
    }
}
