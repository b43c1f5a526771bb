use std::sync::OnceLock;

use anyhow::Context;
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

use crate::core::config::Settings;

static PROM_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

pub(crate) fn init(settings: &Settings) -> anyhow::Result<()> {
    if !settings.telemetry().prometheus_enabled {
        return Ok(());
    }

    let handle = PrometheusBuilder::new().install_recorder()?;
    let _ = PROM_HANDLE.set(handle);
    Ok(())
}

pub(crate) fn render() -> Option<String> {
    PROM_HANDLE.get().map(|handle| handle.render())
}

/// Writes the Prometheus text snapshot once a batch is over. No-op when disabled.
pub(crate) async fn flush(settings: &Settings) -> anyhow::Result<()> {
    let Some(snapshot) = render() else {
        return Ok(());
    };

    let path = &settings.telemetry().metrics_file;
    crate::core::fs::write_atomic(path, snapshot.as_bytes())
        .await
        .with_context(|| format!("Failed to write metrics to {}", path.display()))?;
    tracing::info!(path = %path.display(), "Metrics snapshot written");
    Ok(())
}
