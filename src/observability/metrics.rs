//! Prometheus metrics for archive maintenance.
//!
//! Provides metrics for:
//! - Purge passes, per-period outcomes and deleted archives
//! - Table optimization batches
//! - Scheduled job runs
//! - Overlay calls whose downstream failure was suppressed
//!
//! Every recording function compiles to a no-op without the `prometheus`
//! feature.

#[cfg(feature = "prometheus")]
use metrics::counter;
#[cfg(feature = "prometheus")]
use metrics_exporter_prometheus::PrometheusBuilder;

use crate::config::MetricsConfig;

/// Install the Prometheus recorder and its scrape endpoint.
///
/// Must be called from within a Tokio runtime.
#[cfg(feature = "prometheus")]
pub fn init_metrics(config: &MetricsConfig) -> Result<(), MetricsError> {
    if !config.enabled {
        return Ok(());
    }

    PrometheusBuilder::new()
        .with_http_listener(config.listen)
        .install()
        .map_err(|e| MetricsError::Install(e.to_string()))?;

    tracing::info!(listen = %config.listen, "Prometheus metrics endpoint started");
    Ok(())
}

/// Initialize the metrics system (no-op without prometheus feature).
#[cfg(not(feature = "prometheus"))]
pub fn init_metrics(config: &MetricsConfig) -> Result<(), MetricsError> {
    if config.enabled {
        tracing::warn!(
            "Metrics are enabled in config but the 'prometheus' feature is not compiled. \
             Rebuild with: cargo build --features prometheus"
        );
    }
    Ok(())
}

/// Record the outcome of purging one period.
///
/// # Arguments
/// * `outcome` - "success", "failure" or "skipped"
pub fn record_purge_partition(outcome: &str) {
    #[cfg(feature = "prometheus")]
    {
        counter!(
            "archive_purge_partitions_total",
            "outcome" => outcome.to_string()
        )
        .increment(1);
    }
    #[cfg(not(feature = "prometheus"))]
    {
        let _ = outcome;
    }
}

/// Record archives deleted by a purge.
///
/// # Arguments
/// * `reason` - "temporary", "error" or "range"
/// * `count` - The number of archive ids deleted
pub fn record_archives_deleted(reason: &str, count: u64) {
    #[cfg(feature = "prometheus")]
    {
        counter!(
            "archive_purge_deleted_total",
            "reason" => reason.to_string()
        )
        .increment(count);
    }
    #[cfg(not(feature = "prometheus"))]
    {
        let _ = (reason, count);
    }
}

/// Record an optimize batch over `tables` archive tables.
pub fn record_tables_optimized(tables: u64, success: bool) {
    #[cfg(feature = "prometheus")]
    {
        let status = if success { "success" } else { "failure" };
        counter!("archive_optimize_runs_total", "status" => status).increment(1);
        if success {
            counter!("archive_optimize_tables_total").increment(tables);
        }
    }
    #[cfg(not(feature = "prometheus"))]
    {
        let _ = (tables, success);
    }
}

/// Record a scheduled job run.
pub fn record_job_run(job: &str, success: bool) {
    #[cfg(feature = "prometheus")]
    {
        let status = if success { "success" } else { "failure" };
        counter!(
            "scheduled_job_runs_total",
            "job" => job.to_string(),
            "status" => status
        )
        .increment(1);
    }
    #[cfg(not(feature = "prometheus"))]
    {
        let _ = (job, success);
    }
}

/// Record an overlay call that returned a suppressed (empty) result.
pub fn record_overlay_suppressed(operation: &str) {
    #[cfg(feature = "prometheus")]
    {
        counter!(
            "overlay_suppressed_total",
            "operation" => operation.to_string()
        )
        .increment(1);
    }
    #[cfg(not(feature = "prometheus"))]
    {
        let _ = operation;
    }
}

/// Metrics initialization errors.
#[derive(Debug, thiserror::Error)]
pub enum MetricsError {
    #[error("Failed to install Prometheus exporter: {0}")]
    Install(String),
}
