//! Pipeline metrics.
//!
//! Counters are recorded through the `metrics` facade everywhere; without an
//! installed recorder they are no-ops, which is what tests rely on.

use std::net::SocketAddr;

use metrics::{counter, describe_counter, describe_gauge, gauge};
use metrics_exporter_prometheus::PrometheusBuilder;
use sky_common::CycleId;
use tracing::info;

use crate::error::{PipelineError, Result};

pub const DOWNLOADS_TOTAL: &str = "skycast_downloads_total";
pub const CYCLES_PUBLISHED_TOTAL: &str = "skycast_cycles_published_total";
pub const CYCLES_FAILED_TOTAL: &str = "skycast_cycles_failed_total";
pub const MISSING_FIELDS: &str = "skycast_missing_fields";
pub const CURRENT_CYCLE_TIMESTAMP: &str = "skycast_current_cycle_timestamp_seconds";
pub const CELLS_REJECTED_TOTAL: &str = "skycast_climatology_rejected_total";

/// Start the Prometheus exporter on `addr`. Must run inside the runtime.
pub fn install_exporter(addr: SocketAddr) -> Result<()> {
    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|e| PipelineError::Config(format!("metrics exporter on {}: {}", addr, e)))?;
    describe();
    info!(%addr, "Prometheus exporter listening");
    Ok(())
}

fn describe() {
    describe_counter!(DOWNLOADS_TOTAL, "Source files by outcome");
    describe_counter!(CYCLES_PUBLISHED_TOTAL, "Cycles published to the cache");
    describe_counter!(CYCLES_FAILED_TOTAL, "Cycles that ended in Failed");
    describe_gauge!(MISSING_FIELDS, "Missing fields in the last published cycle");
    describe_gauge!(CURRENT_CYCLE_TIMESTAMP, "Analysis time of the newest published cycle");
    describe_counter!(CELLS_REJECTED_TOTAL, "Cell values rejected by the aggregator");
}

pub fn record_published(cycle: &CycleId, missing_fields: usize) {
    counter!(CYCLES_PUBLISHED_TOTAL).increment(1);
    gauge!(MISSING_FIELDS).set(missing_fields as f64);
    gauge!(CURRENT_CYCLE_TIMESTAMP).set(cycle.issued_at().timestamp() as f64);
}

pub fn record_failed() {
    counter!(CYCLES_FAILED_TOTAL).increment(1);
}

pub fn record_rejected(cells: usize) {
    if cells > 0 {
        counter!(CELLS_REJECTED_TOTAL).increment(cells as u64);
    }
}
