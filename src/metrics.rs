use prometheus_client::encoding::EncodeLabelSet;
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::metrics::histogram::Histogram;
use prometheus_client::registry::Registry;

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct RequestLabels {
    pub operation: String,
    pub resource: String,
    pub webhook: &'static str,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct ResponseLabels {
    pub allowed: &'static str,
    pub webhook: &'static str,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct WebhookLabels {
    pub webhook: &'static str,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct PatchLabels {
    pub op: &'static str,
}

pub struct GuardMetrics {
    pub admission_requests_total: Family<RequestLabels, Counter>,
    pub admission_responses_total: Family<ResponseLabels, Counter>,
    pub admission_request_duration_seconds: Family<WebhookLabels, Histogram>,
    pub patches_total: Family<PatchLabels, Counter>,
}

const DURATION_BUCKETS: [f64; 11] = [
    0.0005, 0.001, 0.0025, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0,
];

fn new_duration_histogram() -> Histogram {
    Histogram::new(DURATION_BUCKETS.iter().copied())
}

impl GuardMetrics {
    pub fn new(registry: &mut Registry) -> Self {
        let admission_requests_total = Family::<RequestLabels, Counter>::default();
        registry.register(
            "graceguard_admission_requests",
            "Total number of admission requests received",
            admission_requests_total.clone(),
        );

        let admission_responses_total = Family::<ResponseLabels, Counter>::default();
        registry.register(
            "graceguard_admission_responses",
            "Total number of admission responses sent",
            admission_responses_total.clone(),
        );

        let admission_request_duration_seconds =
            Family::<WebhookLabels, Histogram>::new_with_constructor(new_duration_histogram);
        registry.register(
            "graceguard_admission_request_duration_seconds",
            "Duration of admission request processing in seconds",
            admission_request_duration_seconds.clone(),
        );

        let patches_total = Family::<PatchLabels, Counter>::default();
        registry.register(
            "graceguard_patches",
            "Grace-period patch operations emitted, by JSON Patch op",
            patches_total.clone(),
        );

        Self {
            admission_requests_total,
            admission_responses_total,
            admission_request_duration_seconds,
            patches_total,
        }
    }
}
