use prometheus::{Encoder, Histogram, HistogramOpts, IntCounterVec, Opts, Registry, TextEncoder};

#[derive(Clone)]
pub struct Metrics {
    registry: Registry,
    pub bids_total: IntCounterVec,
    pub package_transitions_total: IntCounterVec,
    pub deadline_actions_total: IntCounterVec,
    pub deadline_scan_seconds: Histogram,
    pub notifications_total: IntCounterVec,
    pub payments_total: IntCounterVec,
}

impl Metrics {
    pub fn new() -> Self {
        let registry = Registry::new();

        let bids_total = IntCounterVec::new(
            Opts::new("bids_total", "Bid lifecycle events by outcome"),
            &["outcome"],
        )
        .expect("valid bids_total metric");

        let package_transitions_total = IntCounterVec::new(
            Opts::new(
                "package_transitions_total",
                "Committed package status transitions by target status",
            ),
            &["status"],
        )
        .expect("valid package_transitions_total metric");

        let deadline_actions_total = IntCounterVec::new(
            Opts::new(
                "deadline_actions_total",
                "Deadline scheduler decisions by action",
            ),
            &["action"],
        )
        .expect("valid deadline_actions_total metric");

        let deadline_scan_seconds = Histogram::with_opts(HistogramOpts::new(
            "deadline_scan_seconds",
            "Duration of a full deadline scan in seconds",
        ))
        .expect("valid deadline_scan_seconds metric");

        let notifications_total = IntCounterVec::new(
            Opts::new("notifications_total", "Notification deliveries by outcome"),
            &["outcome"],
        )
        .expect("valid notifications_total metric");

        let payments_total = IntCounterVec::new(
            Opts::new("payments_total", "Delivery charges by outcome"),
            &["outcome"],
        )
        .expect("valid payments_total metric");

        registry
            .register(Box::new(bids_total.clone()))
            .expect("register bids_total");
        registry
            .register(Box::new(package_transitions_total.clone()))
            .expect("register package_transitions_total");
        registry
            .register(Box::new(deadline_actions_total.clone()))
            .expect("register deadline_actions_total");
        registry
            .register(Box::new(deadline_scan_seconds.clone()))
            .expect("register deadline_scan_seconds");
        registry
            .register(Box::new(notifications_total.clone()))
            .expect("register notifications_total");
        registry
            .register(Box::new(payments_total.clone()))
            .expect("register payments_total");

        Self {
            registry,
            bids_total,
            package_transitions_total,
            deadline_actions_total,
            deadline_scan_seconds,
            notifications_total,
            payments_total,
        }
    }

    pub fn encode(&self) -> Result<String, String> {
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();

        TextEncoder::new()
            .encode(&metric_families, &mut buffer)
            .map_err(|err| format!("failed to encode metrics: {err}"))?;

        String::from_utf8(buffer).map_err(|err| format!("metrics are not valid utf8: {err}"))
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}
