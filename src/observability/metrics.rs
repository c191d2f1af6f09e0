use prometheus::{Encoder, HistogramVec, IntCounterVec, IntGauge, Opts, Registry, TextEncoder};

#[derive(Clone)]
pub struct Metrics {
    registry: Registry,
    pub proposals_total: IntCounterVec,
    pub requests_in_queue: IntGauge,
    pub matching_latency_seconds: HistogramVec,
    pub offers_total: IntCounterVec,
}

impl Metrics {
    pub fn new() -> Self {
        let registry = Registry::new();

        let proposals_total = IntCounterVec::new(
            Opts::new("proposals_total", "Total proposal runs by outcome"),
            &["outcome"],
        )
        .expect("valid proposals_total metric");

        let requests_in_queue =
            IntGauge::new("requests_in_queue", "Current number of requests queued for matching")
                .expect("valid requests_in_queue metric");

        let matching_latency_seconds = HistogramVec::new(
            prometheus::HistogramOpts::new(
                "matching_latency_seconds",
                "Latency of proposal runs in seconds",
            ),
            &["outcome"],
        )
        .expect("valid matching_latency_seconds metric");

        let offers_total = IntCounterVec::new(
            Opts::new("offers_total", "Total offer transitions by status"),
            &["status"],
        )
        .expect("valid offers_total metric");

        registry
            .register(Box::new(proposals_total.clone()))
            .expect("register proposals_total");
        registry
            .register(Box::new(requests_in_queue.clone()))
            .expect("register requests_in_queue");
        registry
            .register(Box::new(matching_latency_seconds.clone()))
            .expect("register matching_latency_seconds");
        registry
            .register(Box::new(offers_total.clone()))
            .expect("register offers_total");

        Self {
            registry,
            proposals_total,
            requests_in_queue,
            matching_latency_seconds,
            offers_total,
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
