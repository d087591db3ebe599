use std::env;
use std::sync::OnceLock;

use metrics::{Unit, describe_counter, describe_gauge, describe_histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use tracing::{info, warn};

static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

pub const RETRAIN_RUNS_TOTAL: &str = "pm_retrain_runs_total";
pub const RETRAIN_FAILURES_TOTAL: &str = "pm_retrain_failures_total";
pub const RETRAIN_DURATION_SECONDS: &str = "pm_retrain_duration_seconds";
pub const ACTIVE_WEIGHT_ACCURACY: &str = "pm_active_weight_accuracy";
pub const ACCEPTANCE_RATE: &str = "pm_acceptance_rate";
pub const RECOMMENDATIONS: &str = "pm_insight_recommendations";

fn resolve_port(raw: Option<String>, default_port: u16) -> u16 {
    raw.and_then(|raw| raw.trim().parse::<u16>().ok())
        .unwrap_or(default_port)
}

/// Register help text for every metric the binaries emit.
pub fn describe_metrics() {
    describe_counter!(RETRAIN_RUNS_TOTAL, "Retraining runs by outcome and trigger");
    describe_counter!(RETRAIN_FAILURES_TOTAL, "Retraining runs that returned an error");
    describe_histogram!(
        RETRAIN_DURATION_SECONDS,
        Unit::Seconds,
        "Wall time of one retraining run"
    );
    describe_gauge!(ACTIVE_WEIGHT_ACCURACY, "Accuracy of the active weight set");
    describe_gauge!(ACCEPTANCE_RATE, "Acceptance rate over the insights window");
    describe_gauge!(RECOMMENDATIONS, "Recommendations in the latest insights report");
}

/// Initialize a Prometheus exporter listening on `0.0.0.0:<port>`.
///
/// The port is resolved from the provided environment variable name or the
/// supplied `default_port`. Returns a handle to the exporter if it was started.
pub fn init_metrics(port_env: &str, default_port: u16) -> Option<&'static PrometheusHandle> {
    if let Some(existing) = PROMETHEUS_HANDLE.get() {
        return Some(existing);
    }

    let port = resolve_port(env::var(port_env).ok(), default_port);

    match PrometheusBuilder::new()
        .with_http_listener(([0, 0, 0, 0], port))
        .install_recorder()
    {
        Ok(handle) => {
            let _ = PROMETHEUS_HANDLE.set(handle);
            describe_metrics();
            info!(metrics_port = port, "started prometheus exporter");
            PROMETHEUS_HANDLE.get()
        }
        Err(err) => {
            warn!(error = %err, metrics_port = port, "failed to start prometheus exporter");
            PROMETHEUS_HANDLE.get()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn port_falls_back_to_default() {
        assert_eq!(resolve_port(None, 9187), 9187);
        assert_eq!(resolve_port(Some("not-a-port".into()), 9187), 9187);
        assert_eq!(resolve_port(Some(" 9300 ".into()), 9187), 9300);
    }
}
